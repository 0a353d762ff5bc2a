//! Standardized uptake value scaling.

use super::PetInstanceMetadata;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Multiplicative factors converting stored pixel values to SUV.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuvScalingFactors {
	/// Body weight normalization.
	pub suvbw: f64,
	/// Lean body mass normalization.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub suvlbm: Option<f64>,
	/// Body surface area normalization.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub suvbsa: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SuvError {
	#[error("No PET instances to scale")]
	Empty,
	#[error("CorrectedImage must contain ATTN and DECY")]
	NotCorrected,
	#[error("Unsupported Units {0}")]
	UnsupportedUnits(String),
	#[error("Unsupported DecayCorrection {0}")]
	UnsupportedDecayCorrection(String),
	#[error("Invalid {attribute}: {value}")]
	InvalidDateTime {
		attribute: &'static str,
		value: String,
	},
	#[error("{attribute} must be positive, got {value}")]
	NotPositive { attribute: &'static str, value: f64 },
	#[error("Neither RadiopharmaceuticalStartDateTime nor RadiopharmaceuticalStartTime is present")]
	MissingStartTime,
	#[error("Scan starts {0} s before the injection")]
	NegativeDecayTime(f64),
	#[error("Expected {expected} scaling factors, got {actual}")]
	Misaligned { expected: usize, actual: usize },
}

/// Computes SUV scaling factors for a whole series at once.
///
/// The result is positionally aligned with `instances`.
pub trait SuvScalingCalculator: Send + Sync {
	fn calculate(
		&self,
		instances: &[PetInstanceMetadata],
	) -> Result<Vec<SuvScalingFactors>, SuvError>;
}

/// Body weight, lean body mass and body surface area normalization of decay corrected
/// activity concentrations.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardSuvCalculator;

impl SuvScalingCalculator for StandardSuvCalculator {
	fn calculate(
		&self,
		instances: &[PetInstanceMetadata],
	) -> Result<Vec<SuvScalingFactors>, SuvError> {
		let first = instances.first().ok_or(SuvError::Empty)?;

		if !(first.corrected_image.contains("ATTN") && first.corrected_image.contains("DECY")) {
			return Err(SuvError::NotCorrected);
		}

		match first.units.as_str() {
			"GML" => Ok(vec![
				SuvScalingFactors {
					suvbw: 1.0,
					suvlbm: None,
					suvbsa: None,
				};
				instances.len()
			]),
			"BQML" => {
				let weight = positive("PatientWeight", first.patient_weight)?;
				let body = BodyMeasures::new(weight, first.patient_sex.as_deref(), first.patient_size);
				let factors = activity_factors(instances)?;
				Ok(factors
					.into_iter()
					.map(|factor| SuvScalingFactors {
						suvbw: factor * weight * 1000.0,
						suvlbm: body.lean_body_mass.map(|lbm| factor * lbm * 1000.0),
						suvbsa: body.surface_area.map(|bsa| factor * bsa * 10_000.0),
					})
					.collect())
			}
			units => Err(SuvError::UnsupportedUnits(units.to_owned())),
		}
	}
}

fn positive(attribute: &'static str, value: f64) -> Result<f64, SuvError> {
	if value > 0.0 && value.is_finite() {
		Ok(value)
	} else {
		Err(SuvError::NotPositive { attribute, value })
	}
}

/// 1 / (decay corrected injected dose) per record.
fn activity_factors(instances: &[PetInstanceMetadata]) -> Result<Vec<f64>, SuvError> {
	let Some(first) = instances.first() else {
		return Ok(Vec::new());
	};
	let total_dose = positive("RadionuclideTotalDose", first.radionuclide_total_dose)?;

	match first.decay_correction.as_str() {
		"ADMIN" => Ok(vec![1.0 / total_dose; instances.len()]),
		"START" => {
			let half_life = positive("RadionuclideHalfLife", first.radionuclide_half_life)?;
			let injection = injection_date_time(first)?;
			scan_date_times(instances)?
				.into_iter()
				.map(|scan| {
					let decay_time = (scan - injection).as_seconds_f64();
					if decay_time < 0.0 {
						return Err(SuvError::NegativeDecayTime(decay_time));
					}
					let decayed_dose = total_dose * (-decay_time / half_life).exp2();
					Ok(1.0 / decayed_dose)
				})
				.collect()
		}
		other => Err(SuvError::UnsupportedDecayCorrection(other.to_owned())),
	}
}

/// A millisecond offset rounded to whole milliseconds, if representable.
fn milliseconds(value: f64) -> Option<TimeDelta> {
	if !value.is_finite() {
		return None;
	}
	// saturates, and try_milliseconds rejects the saturated bounds
	#[allow(clippy::cast_possible_truncation)]
	let value = value.round() as i64;
	TimeDelta::try_milliseconds(value)
}

/// The start of each acquisition.
///
/// Series date and time are used when they precede every acquisition. Otherwise the series
/// time was reset by post-processing and each acquisition time is moved back by its frame
/// reference time.
fn scan_date_times(instances: &[PetInstanceMetadata]) -> Result<Vec<NaiveDateTime>, SuvError> {
	let Some(first) = instances.first() else {
		return Ok(Vec::new());
	};
	let series = parse_date("SeriesDate", &first.series_date)?
		.and_time(parse_time("SeriesTime", &first.series_time)?);

	let acquisitions = instances
		.iter()
		.map(|instance| {
			Ok(parse_date("AcquisitionDate", &instance.acquisition_date)?
				.and_time(parse_time("AcquisitionTime", &instance.acquisition_time)?))
		})
		.collect::<Result<Vec<_>, SuvError>>()?;

	let earliest = acquisitions.iter().min().copied().unwrap_or(series);
	if series <= earliest {
		return Ok(vec![series; instances.len()]);
	}

	acquisitions
		.into_iter()
		.zip(instances)
		.map(|(acquisition, instance)| {
			let reference = instance.frame_reference_time.unwrap_or_default();
			milliseconds(reference)
				.and_then(|offset| acquisition.checked_sub_signed(offset))
				.ok_or_else(|| SuvError::InvalidDateTime {
					attribute: "FrameReferenceTime",
					value: reference.to_string(),
				})
		})
		.collect()
}

fn injection_date_time(instance: &PetInstanceMetadata) -> Result<NaiveDateTime, SuvError> {
	if let Some(date_time) = &instance.radiopharmaceutical_start_date_time {
		return parse_date_time("RadiopharmaceuticalStartDateTime", date_time);
	}
	let time = instance
		.radiopharmaceutical_start_time
		.as_deref()
		.ok_or(SuvError::MissingStartTime)?;
	Ok(parse_date("SeriesDate", &instance.series_date)?
		.and_time(parse_time("RadiopharmaceuticalStartTime", time)?))
}

/// Parses a DA value (`YYYYMMDD`).
fn parse_date(attribute: &'static str, value: &str) -> Result<NaiveDate, SuvError> {
	NaiveDate::parse_from_str(value.trim(), "%Y%m%d").map_err(|_| SuvError::InvalidDateTime {
		attribute,
		value: value.to_owned(),
	})
}

/// Parses a TM value (`HH[MM[SS[.F{1,6}]]]`). Legacy colon separators are accepted.
fn parse_time(attribute: &'static str, value: &str) -> Result<NaiveTime, SuvError> {
	let invalid = || SuvError::InvalidDateTime {
		attribute,
		value: value.to_owned(),
	};

	let (whole, fraction) = value.trim().split_once('.').unwrap_or((value.trim(), ""));
	let digits: String = whole.chars().filter(|c| *c != ':').collect();
	if digits.is_empty()
		|| digits.len() > 6
		|| digits.len() % 2 == 1
		|| !digits.bytes().all(|b| b.is_ascii_digit())
		|| !fraction.bytes().all(|b| b.is_ascii_digit())
	{
		return Err(invalid());
	}

	let component = |range: std::ops::Range<usize>| -> u32 {
		digits
			.get(range)
			.and_then(|part| part.parse().ok())
			.unwrap_or_default()
	};
	let fraction = &fraction[..fraction.len().min(6)];
	let micros: u32 = if fraction.is_empty() {
		0
	} else {
		format!("{fraction:0<6}").parse().map_err(|_| invalid())?
	};

	NaiveTime::from_hms_micro_opt(component(0..2), component(2..4), component(4..6), micros)
		.ok_or_else(invalid)
}

/// Parses a DT value (`YYYYMMDD[HHMMSS[.F{1,6}]][&ZZXX]`). The UTC offset is ignored.
fn parse_date_time(attribute: &'static str, value: &str) -> Result<NaiveDateTime, SuvError> {
	let value = value.trim();
	let local = value
		.char_indices()
		.skip(8)
		.find(|(_, c)| *c == '+' || *c == '-')
		.map_or(value, |(index, _)| &value[..index]);

	let Some(date) = local.get(..8) else {
		return Err(SuvError::InvalidDateTime {
			attribute,
			value: value.to_owned(),
		});
	};
	let date = parse_date(attribute, date)?;
	let time = match &local[8..] {
		"" => NaiveTime::MIN,
		time => parse_time(attribute, time)?,
	};
	Ok(date.and_time(time))
}

struct BodyMeasures {
	/// kg
	lean_body_mass: Option<f64>,
	/// m²
	surface_area: Option<f64>,
}

impl BodyMeasures {
	fn new(weight: f64, sex: Option<&str>, size: Option<f64>) -> Self {
		let Some(height) = size.filter(|size| *size > 0.0).map(|size| size * 100.0) else {
			return Self {
				lean_body_mass: None,
				surface_area: None,
			};
		};

		// James
		let lean_body_mass = match sex.map(str::trim) {
			Some("M") => Some(1.10 * weight - 128.0 * (weight / height).powi(2)),
			Some("F") => Some(1.07 * weight - 148.0 * (weight / height).powi(2)),
			_ => None,
		};

		// DuBois
		let surface_area = sex
			.is_some()
			.then(|| 0.007184 * weight.powf(0.425) * height.powf(0.725));

		Self {
			lean_body_mass,
			surface_area,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::metadata::modules::CorrectedImage;

	const DOSE: f64 = 370_000_000.0;
	const HALF_LIFE: f64 = 6586.2;

	fn instance() -> PetInstanceMetadata {
		PetInstanceMetadata {
			corrected_image: CorrectedImage::List(vec![String::from("ATTN"), String::from("DECY")]),
			units: String::from("BQML"),
			radionuclide_half_life: HALF_LIFE,
			radionuclide_total_dose: DOSE,
			decay_correction: String::from("START"),
			patient_weight: 70.0,
			series_date: String::from("20240305"),
			series_time: String::from("090000"),
			acquisition_date: String::from("20240305"),
			acquisition_time: String::from("090000"),
			radiopharmaceutical_start_date_time: None,
			radiopharmaceutical_start_time: Some(String::from("080000")),
			frame_reference_time: None,
			actual_frame_duration: None,
			patient_sex: None,
			patient_size: None,
		}
	}

	fn assert_close(actual: f64, expected: f64) {
		assert!(
			(actual - expected).abs() <= expected.abs() * 1e-9,
			"{actual} != {expected}"
		);
	}

	#[test]
	fn body_weight_with_start_decay_correction() {
		let factors = StandardSuvCalculator
			.calculate(&[instance(), instance()])
			.unwrap();

		let decayed = DOSE * (-3600.0 / HALF_LIFE).exp2();
		assert_eq!(factors.len(), 2);
		assert_close(factors[0].suvbw, 70_000.0 / decayed);
		assert_eq!(factors[0], factors[1]);
		assert_eq!(factors[0].suvlbm, None);
		assert_eq!(factors[0].suvbsa, None);
	}

	#[test]
	fn admin_decay_correction_uses_total_dose() {
		let factors = StandardSuvCalculator
			.calculate(&[PetInstanceMetadata {
				decay_correction: String::from("ADMIN"),
				..instance()
			}])
			.unwrap();

		assert_close(factors[0].suvbw, 70_000.0 / DOSE);
	}

	#[test]
	fn start_date_time_takes_precedence() {
		let factors = StandardSuvCalculator
			.calculate(&[PetInstanceMetadata {
				radiopharmaceutical_start_date_time: Some(String::from("20240305083000.000000+0100")),
				..instance()
			}])
			.unwrap();

		let decayed = DOSE * (-1800.0 / HALF_LIFE).exp2();
		assert_close(factors[0].suvbw, 70_000.0 / decayed);
	}

	#[test]
	fn lean_body_mass_and_surface_area() {
		let factors = StandardSuvCalculator
			.calculate(&[PetInstanceMetadata {
				patient_sex: Some(String::from("M")),
				patient_size: Some(1.8),
				..instance()
			}])
			.unwrap();

		let factor = factors[0].suvbw / 70_000.0;
		let lbm = 1.10 * 70.0 - 128.0 * (70.0_f64 / 180.0).powi(2);
		let bsa = 0.007184 * 70.0_f64.powf(0.425) * 180.0_f64.powf(0.725);
		assert_close(factors[0].suvlbm.unwrap(), factor * lbm * 1000.0);
		assert_close(factors[0].suvbsa.unwrap(), factor * bsa * 10_000.0);
	}

	#[test]
	fn late_series_time_uses_acquisition_times() {
		let early = PetInstanceMetadata {
			series_time: String::from("100000"),
			acquisition_time: String::from("090000"),
			..instance()
		};
		let late = PetInstanceMetadata {
			acquisition_time: String::from("091000"),
			frame_reference_time: Some(600_000.0),
			..early.clone()
		};

		let factors = StandardSuvCalculator.calculate(&[early, late]).unwrap();

		// Both scans start at 09:00
		assert_close(factors[1].suvbw, factors[0].suvbw);
	}

	#[test]
	fn frame_reference_time_rounds_to_milliseconds() {
		let late = PetInstanceMetadata {
			series_time: String::from("100000"),
			acquisition_time: String::from("090001"),
			frame_reference_time: Some(999.6),
			..instance()
		};

		let factors = StandardSuvCalculator.calculate(&[late]).unwrap();

		// 999.6 ms rounds to a full second, so the scan starts at 09:00
		let decayed = DOSE * (-3600.0 / HALF_LIFE).exp2();
		assert_close(factors[0].suvbw, 70_000.0 / decayed);
	}

	#[test]
	fn reject_unrepresentable_frame_reference_time() {
		for reference in [1e30, f64::NAN] {
			let result = StandardSuvCalculator.calculate(&[PetInstanceMetadata {
				series_time: String::from("100000"),
				frame_reference_time: Some(reference),
				..instance()
			}]);

			assert!(matches!(
				result,
				Err(SuvError::InvalidDateTime {
					attribute: "FrameReferenceTime",
					..
				})
			));
		}
	}

	#[test]
	fn gml_is_already_normalized() {
		let factors = StandardSuvCalculator
			.calculate(&[PetInstanceMetadata {
				units: String::from("GML"),
				..instance()
			}])
			.unwrap();

		assert_eq!(
			factors,
			vec![SuvScalingFactors {
				suvbw: 1.0,
				suvlbm: None,
				suvbsa: None,
			}]
		);
	}

	#[test]
	fn reject_uncorrected_images() {
		let result = StandardSuvCalculator.calculate(&[PetInstanceMetadata {
			corrected_image: CorrectedImage::Delimited(String::from("DECY\\SCAT")),
			..instance()
		}]);
		assert_eq!(result, Err(SuvError::NotCorrected));
	}

	#[test]
	fn reject_invalid_input() {
		assert_eq!(StandardSuvCalculator.calculate(&[]), Err(SuvError::Empty));

		let result = StandardSuvCalculator.calculate(&[PetInstanceMetadata {
			units: String::from("CNTS"),
			..instance()
		}]);
		assert_eq!(result, Err(SuvError::UnsupportedUnits(String::from("CNTS"))));

		let result = StandardSuvCalculator.calculate(&[PetInstanceMetadata {
			radiopharmaceutical_start_time: Some(String::from("100000")),
			..instance()
		}]);
		assert!(matches!(result, Err(SuvError::NegativeDecayTime(_))));

		let result = StandardSuvCalculator.calculate(&[PetInstanceMetadata {
			patient_weight: 0.0,
			..instance()
		}]);
		assert!(matches!(result, Err(SuvError::NotPositive { .. })));
	}

	#[test]
	fn parse_time_variants() {
		let time = |value| parse_time("AcquisitionTime", value).unwrap();
		assert_eq!(time("09"), NaiveTime::from_hms_opt(9, 0, 0).unwrap());
		assert_eq!(time("0930"), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
		assert_eq!(time("09:30:15"), NaiveTime::from_hms_opt(9, 30, 15).unwrap());
		assert_eq!(
			time("093015.5"),
			NaiveTime::from_hms_micro_opt(9, 30, 15, 500_000).unwrap()
		);
		assert!(parse_time("AcquisitionTime", "9").is_err());
		assert!(parse_time("AcquisitionTime", "250000").is_err());
	}

	#[test]
	fn parse_date_time_ignores_offset() {
		let parsed = parse_date_time("RadiopharmaceuticalStartDateTime", "20240305083000-0500").unwrap();
		assert_eq!(
			parsed,
			NaiveDate::from_ymd_opt(2024, 3, 5)
				.unwrap()
				.and_hms_opt(8, 30, 0)
				.unwrap()
		);

		let midnight = parse_date_time("RadiopharmaceuticalStartDateTime", "20240305").unwrap();
		assert_eq!(midnight.time(), NaiveTime::MIN);
	}
}
