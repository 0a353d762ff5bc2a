//! Resolution of a series reference into the image identifiers of its images.

use crate::archive::{ArchiveClient, FetchError};
use crate::calibration::{resolve_pixel_spacing, PixelSpacingInformation, PixelSpacingInput};
use crate::frames::{convert_multiframe_image_ids, frame_information};
use crate::metadata::{
	naturalize, remove_invalid_tags, DicomJsonExt, InstanceRecord, MetadataEntry, MetadataKind,
	MetadataStore, ModuleProvider,
};
use crate::pet::{pet_instance_metadata, SuvError, SuvScalingCalculator};
use crate::types::{wadors_image_id, ImageId, PET_MODALITY, UI};
use dicom::dictionary_std::tags;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, debug_span, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
	pub study_instance_uid: UI,
	pub series_instance_uid: UI,
	/// Restricts the result to this instance.
	pub sop_instance_uid: Option<UI>,
	/// Replace multi-frame instances by one identifier per frame.
	pub convert_multiframe: bool,
}

impl ResolveRequest {
	pub fn new(study_instance_uid: impl Into<UI>, series_instance_uid: impl Into<UI>) -> Self {
		Self {
			study_instance_uid: study_instance_uid.into(),
			series_instance_uid: series_instance_uid.into(),
			sop_instance_uid: None,
			convert_multiframe: true,
		}
	}

	#[must_use]
	pub fn with_instance(mut self, sop_instance_uid: impl Into<UI>) -> Self {
		self.sop_instance_uid = Some(sop_instance_uid.into());
		self
	}

	#[must_use]
	pub const fn with_convert_multiframe(mut self, convert_multiframe: bool) -> Self {
		self.convert_multiframe = convert_multiframe;
		self
	}
}

#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("Failed to retrieve series metadata: {0}")]
	Fetch(#[from] FetchError),
	#[error("No instances found for series {series_instance_uid}")]
	NoInstances { series_instance_uid: UI },
}

/// Turns a study/series reference into ordered image identifiers and registers the metadata
/// of every returned identifier.
pub struct SeriesMetadataResolver {
	archive: Arc<dyn ArchiveClient>,
	suv_calculator: Arc<dyn SuvScalingCalculator>,
	wado_root: String,
}

impl SeriesMetadataResolver {
	pub fn new(
		archive: Arc<dyn ArchiveClient>,
		suv_calculator: Arc<dyn SuvScalingCalculator>,
		wado_root: impl Into<String>,
	) -> Self {
		Self {
			archive,
			suv_calculator,
			wado_root: wado_root.into(),
		}
	}

	/// Only the archive query and the instance filter fail the request. Failures scoped to a
	/// single image identifier are logged and skipped.
	#[instrument(skip_all, fields(study = %request.study_instance_uid, series = %request.series_instance_uid))]
	pub async fn resolve(
		&self,
		request: &ResolveRequest,
		store: &MetadataStore,
	) -> Result<Vec<ImageId>, ResolveError> {
		let mut instances = self
			.archive
			.retrieve_series_metadata(&request.study_instance_uid, &request.series_instance_uid)
			.await?;
		debug!("Archive returned {} instances", instances.len());

		if let Some(sop_instance_uid) = &request.sop_instance_uid {
			instances.retain(|record| {
				record.first_string(tags::SOP_INSTANCE_UID).as_deref()
					== Some(sop_instance_uid.as_str())
			});
		}
		if instances.is_empty() {
			return Err(ResolveError::NoInstances {
				series_instance_uid: request.series_instance_uid.clone(),
			});
		}

		let is_pet = instances[0].first_string(tags::MODALITY).as_deref() == Some(PET_MODALITY);

		let image_ids = self.build_image_ids(request, instances, store);
		let image_ids = if request.convert_multiframe {
			expand_frames(image_ids, store)
		} else {
			image_ids
		};

		for image_id in &image_ids {
			calibrate(image_id, store);
		}

		if is_pet {
			self.scale_suv(&image_ids, store);
		}

		info!("Resolved {} image ids", image_ids.len());
		Ok(image_ids)
	}

	/// One identifier per instance, addressing its first frame.
	fn build_image_ids(
		&self,
		request: &ResolveRequest,
		instances: Vec<InstanceRecord>,
		store: &MetadataStore,
	) -> Vec<ImageId> {
		let mut image_ids = Vec::with_capacity(instances.len());
		for record in instances {
			let Some(sop_instance_uid) = record.first_string(tags::SOP_INSTANCE_UID) else {
				warn!("Skipping instance without SOPInstanceUID");
				continue;
			};
			let series_instance_uid = record
				.first_string(tags::SERIES_INSTANCE_UID)
				.unwrap_or_else(|| request.series_instance_uid.clone());

			let image_id = wadors_image_id(
				&self.wado_root,
				&request.study_instance_uid,
				&series_instance_uid,
				&sop_instance_uid,
				1,
			);
			store.add(image_id.clone(), MetadataEntry::Instance(Arc::new(record)));
			image_ids.push(image_id);
		}
		image_ids
	}

	/// Computes SUV scaling factors for the whole series in a single batch.
	fn scale_suv(&self, image_ids: &[ImageId], store: &MetadataStore) {
		let mut batch_ids = Vec::with_capacity(image_ids.len());
		let mut batch = Vec::with_capacity(image_ids.len());
		for image_id in image_ids {
			match pet_instance_metadata(store, image_id) {
				Ok(mut metadata) => {
					metadata.corrected_image = metadata.corrected_image.into_list();
					batch_ids.push(image_id);
					batch.push(metadata);
				}
				Err(err) => warn!(image_id = %image_id, "{err}"),
			}
		}

		if batch.is_empty() {
			warn!("No PET instance carries the metadata required for SUV scaling");
			return;
		}

		let factors = self
			.suv_calculator
			.calculate(&batch)
			.and_then(|factors| {
				if factors.len() == batch.len() {
					Ok(factors)
				} else {
					Err(SuvError::Misaligned {
						expected: batch.len(),
						actual: factors.len(),
					})
				}
			});

		match factors {
			Ok(factors) => {
				for (image_id, factors) in batch_ids.into_iter().zip(factors) {
					store.add(image_id.as_str(), MetadataEntry::SuvScaling(factors));
				}
			}
			Err(err) => warn!("SUV scaling is not available for this series: {err}"),
		}
	}
}

/// Replaces multi-frame identifiers by their frames and registers the instance record of the
/// source identifier for each new one.
fn expand_frames(image_ids: Vec<ImageId>, store: &MetadataStore) -> Vec<ImageId> {
	let sources: HashMap<String, Arc<InstanceRecord>> = image_ids
		.iter()
		.filter_map(|image_id| {
			let record = store.instance(image_id)?;
			Some((frame_information(image_id).image_id_frameless, record))
		})
		.collect();

	let expanded = convert_multiframe_image_ids(image_ids, |image_id| {
		store.multiframe_module(image_id)
	});

	for image_id in &expanded {
		if store.contains(MetadataKind::Instance, image_id) {
			continue;
		}
		if let Some(record) = sources.get(&frame_information(image_id).image_id_frameless) {
			store.add(image_id.as_str(), MetadataEntry::Instance(Arc::clone(record)));
		}
	}
	expanded
}

/// Registers the pixel spacing of an image identifier, when it can be determined.
fn calibrate(image_id: &str, store: &MetadataStore) {
	let _span = debug_span!("calibrate", image_id = %image_id).entered();
	let Some(record) = store.instance(image_id) else {
		return;
	};

	let natural = naturalize(&remove_invalid_tags(&record));
	let Some(information) = resolve_pixel_spacing(&PixelSpacingInput::from_natural(&natural))
	else {
		return;
	};
	if information == PixelSpacingInformation::Raw(None) {
		debug!("No pixel spacing");
		return;
	}

	if let Some(spacing) = information.pixel_spacing() {
		store.add(image_id, MetadataEntry::CalibratedPixelSpacing(spacing.into()));
	}
	store.add(image_id, MetadataEntry::PixelSpacing(information));
}
