//! Quantitative PET metadata.

pub mod suv;

pub use suv::{StandardSuvCalculator, SuvError, SuvScalingCalculator, SuvScalingFactors};

use crate::metadata::modules::CorrectedImage;
use crate::metadata::ModuleProvider;
use crate::types::{ImageId, CS};
use serde::Serialize;
use thiserror::Error;

/// The attributes of one PET image needed to normalize its uptake.
///
/// Dates are `YYYYMMDD`, times `HHMMSS.ffffff`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PetInstanceMetadata {
	pub corrected_image: CorrectedImage,
	pub units: CS,
	/// s
	pub radionuclide_half_life: f64,
	/// Bq
	pub radionuclide_total_dose: f64,
	pub decay_correction: CS,
	/// kg
	pub patient_weight: f64,
	pub series_date: String,
	pub series_time: String,
	pub acquisition_date: String,
	pub acquisition_time: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub radiopharmaceutical_start_date_time: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub radiopharmaceutical_start_time: Option<String>,
	/// ms
	#[serde(skip_serializing_if = "Option::is_none")]
	pub frame_reference_time: Option<f64>,
	/// ms
	#[serde(skip_serializing_if = "Option::is_none")]
	pub actual_frame_duration: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub patient_sex: Option<CS>,
	/// m
	#[serde(skip_serializing_if = "Option::is_none")]
	pub patient_size: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PetMetadataError {
	#[error("{image_id} lacks required PET metadata: {}", missing.join(", "))]
	MissingMetadata {
		image_id: ImageId,
		missing: Vec<&'static str>,
	},
}

/// Collects the name of every absent required attribute.
struct Requirements(Vec<&'static str>);

impl Requirements {
	fn require<T>(&mut self, value: Option<T>, name: &'static str) -> Option<T> {
		if value.is_none() {
			self.0.push(name);
		}
		value
	}
}

/// Builds the [`PetInstanceMetadata`] of an image from its PET isotope, general series, patient
/// study, PET series and PET image modules.
///
/// Fails with [`PetMetadataError::MissingMetadata`] listing every absent required attribute.
/// Structured dates and times are normalized to their DICOM string form.
pub fn pet_instance_metadata<P>(
	provider: &P,
	image_id: &str,
) -> Result<PetInstanceMetadata, PetMetadataError>
where
	P: ModuleProvider + ?Sized,
{
	let missing = |missing| PetMetadataError::MissingMetadata {
		image_id: image_id.to_owned(),
		missing,
	};

	let Some(isotope) = provider.pet_isotope_module(image_id) else {
		return Err(missing(vec!["petIsotopeModule"]));
	};
	let info = isotope.radiopharmaceutical_info;
	let series = provider.general_series_module(image_id).unwrap_or_default();
	let patient = provider.patient_study_module(image_id).unwrap_or_default();
	let pet_series = provider.pet_series_module(image_id).unwrap_or_default();
	let pet_image = provider.pet_image_module(image_id).unwrap_or_default();

	let mut requirements = Requirements(Vec::new());
	let series_date = requirements.require(series.series_date, "seriesDate");
	let series_time = requirements.require(series.series_time, "seriesTime");
	let patient_weight = requirements.require(patient.patient_weight, "patientWeight");
	let acquisition_date = requirements.require(series.acquisition_date, "acquisitionDate");
	let acquisition_time = requirements.require(series.acquisition_time, "acquisitionTime");
	let corrected_image = requirements.require(pet_series.corrected_image, "correctedImage");
	let units = requirements.require(pet_series.units, "units");
	let decay_correction = requirements.require(pet_series.decay_correction, "decayCorrection");
	let total_dose = requirements.require(info.radionuclide_total_dose, "radionuclideTotalDose");
	let half_life = requirements.require(info.radionuclide_half_life, "radionuclideHalfLife");

	// Any one of the three anchors the injection time
	if info.radiopharmaceutical_start_date_time.is_none()
		&& series_date.is_none()
		&& info.radiopharmaceutical_start_time.is_none()
	{
		requirements.0.push("radiopharmaceuticalStartDateTime");
	}

	let (
		Some(series_date),
		Some(series_time),
		Some(patient_weight),
		Some(acquisition_date),
		Some(acquisition_time),
		Some(corrected_image),
		Some(units),
		Some(decay_correction),
		Some(radionuclide_total_dose),
		Some(radionuclide_half_life),
		true,
	) = (
		series_date,
		series_time,
		patient_weight,
		acquisition_date,
		acquisition_time,
		corrected_image,
		units,
		decay_correction,
		total_dose,
		half_life,
		requirements.0.is_empty(),
	)
	else {
		return Err(missing(requirements.0));
	};

	Ok(PetInstanceMetadata {
		corrected_image,
		units,
		radionuclide_half_life,
		radionuclide_total_dose,
		decay_correction,
		patient_weight,
		series_date: series_date.to_dicom_string(),
		series_time: series_time.to_dicom_string(),
		acquisition_date: acquisition_date.to_dicom_string(),
		acquisition_time: acquisition_time.to_dicom_string(),
		radiopharmaceutical_start_date_time: info
			.radiopharmaceutical_start_date_time
			.map(|date| date.to_dicom_string()),
		radiopharmaceutical_start_time: info
			.radiopharmaceutical_start_time
			.map(|time| time.to_dicom_string()),
		frame_reference_time: pet_image.frame_reference_time,
		actual_frame_duration: pet_image.actual_frame_duration,
		patient_sex: patient.patient_sex,
		patient_size: patient.patient_size,
	})
}
