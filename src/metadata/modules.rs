//! Typed metadata modules derived from a raw instance record.
//!
//! Each module groups the attributes of one IOD module that downstream steps need. Modules are
//! either read from the raw DICOM JSON record of an image identifier (dates and times then arrive
//! as [`DateValue::Raw`]/[`TimeValue::Raw`]) or deserialized from camel-cased JSON produced by
//! another metadata provider (which may carry structured dates and times).

use super::datetime::{DateValue, TimeValue};
use super::{DicomJsonExt, InstanceRecord};
use crate::types::{CS, UI};
use dicom::dictionary_std::tags;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Looks up metadata modules by image identifier.
///
/// Implementors only provide [`ModuleProvider::instance`]; every module is derived from the raw
/// record by default.
pub trait ModuleProvider {
	/// The raw record registered for the image identifier.
	fn instance(&self, image_id: &str) -> Option<Arc<InstanceRecord>>;

	fn multiframe_module(&self, image_id: &str) -> Option<MultiframeModule> {
		self.instance(image_id)
			.map(|record| MultiframeModule::from_record(&record))
	}

	fn general_series_module(&self, image_id: &str) -> Option<GeneralSeriesModule> {
		self.instance(image_id)
			.map(|record| GeneralSeriesModule::from_record(&record))
	}

	fn patient_study_module(&self, image_id: &str) -> Option<PatientStudyModule> {
		self.instance(image_id)
			.map(|record| PatientStudyModule::from_record(&record))
	}

	fn pet_series_module(&self, image_id: &str) -> Option<PetSeriesModule> {
		self.instance(image_id)
			.map(|record| PetSeriesModule::from_record(&record))
	}

	fn pet_image_module(&self, image_id: &str) -> Option<PetImageModule> {
		self.instance(image_id)
			.map(|record| PetImageModule::from_record(&record))
	}

	/// Only present when the record carries a Radiopharmaceutical Information Sequence.
	fn pet_isotope_module(&self, image_id: &str) -> Option<PetIsotopeModule> {
		self.instance(image_id)
			.and_then(|record| PetIsotopeModule::from_record(&record))
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MultiframeModule {
	pub number_of_frames: Option<u32>,
}

impl MultiframeModule {
	pub fn from_record(record: &InstanceRecord) -> Self {
		let number_of_frames = record.first_number(tags::NUMBER_OF_FRAMES).and_then(|frames| {
			let count = frame_count(frames);
			if count.is_none() {
				warn!("Ignoring invalid NumberOfFrames {frames}");
			}
			count
		});
		Self { number_of_frames }
	}
}

/// A positive integral frame count within the IS range.
fn frame_count(frames: f64) -> Option<u32> {
	if frames.fract() != 0.0 || !(1.0..=f64::from(i32::MAX)).contains(&frames) {
		return None;
	}
	// integral and within 1..=i32::MAX
	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	let count = frames as u32;
	Some(count)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeneralSeriesModule {
	pub modality: Option<CS>,
	pub series_instance_uid: Option<UI>,
	pub series_date: Option<DateValue>,
	pub series_time: Option<TimeValue>,
	pub acquisition_date: Option<DateValue>,
	pub acquisition_time: Option<TimeValue>,
}

impl GeneralSeriesModule {
	pub fn from_record(record: &InstanceRecord) -> Self {
		Self {
			modality: record.first_string(tags::MODALITY),
			series_instance_uid: record.first_string(tags::SERIES_INSTANCE_UID),
			series_date: record.first_string(tags::SERIES_DATE).map(DateValue::Raw),
			series_time: record.first_string(tags::SERIES_TIME).map(TimeValue::Raw),
			acquisition_date: record
				.first_string(tags::ACQUISITION_DATE)
				.map(DateValue::Raw),
			acquisition_time: record
				.first_string(tags::ACQUISITION_TIME)
				.map(TimeValue::Raw),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PatientStudyModule {
	/// Patient weight in kg.
	pub patient_weight: Option<f64>,
	/// Patient size in m.
	pub patient_size: Option<f64>,
	pub patient_sex: Option<CS>,
}

impl PatientStudyModule {
	pub fn from_record(record: &InstanceRecord) -> Self {
		Self {
			patient_weight: record.first_number(tags::PATIENT_WEIGHT),
			patient_size: record.first_number(tags::PATIENT_SIZE),
			patient_sex: record.first_string(tags::PATIENT_SEX),
		}
	}
}

/// Corrected Image (0028,0051) as received.
///
/// Some archives deliver the multi-valued attribute as a single backslash-delimited string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrectedImage {
	List(Vec<CS>),
	Delimited(String),
}

impl CorrectedImage {
	/// Splits a delimited value into its components. Lists are returned unchanged.
	#[must_use]
	pub fn into_list(self) -> Self {
		match self {
			Self::Delimited(value) => Self::List(
				value
					.split('\\')
					.map(str::trim)
					.filter(|component| !component.is_empty())
					.map(String::from)
					.collect(),
			),
			list @ Self::List(_) => list,
		}
	}

	pub fn contains(&self, code: &str) -> bool {
		match self {
			Self::List(codes) => codes.iter().any(|c| c == code),
			Self::Delimited(value) => value.split('\\').any(|c| c.trim() == code),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PetSeriesModule {
	pub corrected_image: Option<CorrectedImage>,
	pub units: Option<CS>,
	pub decay_correction: Option<CS>,
}

impl PetSeriesModule {
	pub fn from_record(record: &InstanceRecord) -> Self {
		let corrected_image = record.strings(tags::CORRECTED_IMAGE).map(|mut codes| {
			if codes.len() == 1 && codes[0].contains('\\') {
				CorrectedImage::Delimited(codes.remove(0))
			} else {
				CorrectedImage::List(codes)
			}
		});

		Self {
			corrected_image,
			units: record.first_string(tags::UNITS),
			decay_correction: record.first_string(tags::DECAY_CORRECTION),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PetImageModule {
	/// Frame Reference Time in ms.
	pub frame_reference_time: Option<f64>,
	/// Actual Frame Duration in ms.
	pub actual_frame_duration: Option<f64>,
}

impl PetImageModule {
	pub fn from_record(record: &InstanceRecord) -> Self {
		Self {
			frame_reference_time: record.first_number(tags::FRAME_REFERENCE_TIME),
			actual_frame_duration: record.first_number(tags::ACTUAL_FRAME_DURATION),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RadiopharmaceuticalInfo {
	pub radiopharmaceutical_start_time: Option<TimeValue>,
	pub radiopharmaceutical_start_date_time: Option<DateValue>,
	/// Total dose in Bq.
	pub radionuclide_total_dose: Option<f64>,
	/// Half life in s.
	pub radionuclide_half_life: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PetIsotopeModule {
	pub radiopharmaceutical_info: RadiopharmaceuticalInfo,
}

impl PetIsotopeModule {
	pub fn from_record(record: &InstanceRecord) -> Option<Self> {
		let item = record.first_item(tags::RADIOPHARMACEUTICAL_INFORMATION_SEQUENCE)?;
		Some(Self {
			radiopharmaceutical_info: RadiopharmaceuticalInfo {
				radiopharmaceutical_start_time: item
					.first_string(tags::RADIOPHARMACEUTICAL_START_TIME)
					.map(TimeValue::Raw),
				radiopharmaceutical_start_date_time: item
					.first_string(tags::RADIOPHARMACEUTICAL_START_DATE_TIME)
					.map(DateValue::Raw),
				radionuclide_total_dose: item.first_number(tags::RADIONUCLIDE_TOTAL_DOSE),
				radionuclide_half_life: item.first_number(tags::RADIONUCLIDE_HALF_LIFE),
			},
		})
	}
}
