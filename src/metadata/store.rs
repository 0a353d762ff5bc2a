use super::{InstanceRecord, ModuleProvider};
use crate::calibration::{CalibratedPixelSpacing, PixelSpacingInformation};
use crate::pet::SuvScalingFactors;
use crate::types::ImageId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

/// The kinds of metadata held per image identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataKind {
	/// The raw record received from the archive.
	Instance,
	/// The pixel spacing classification of the image.
	PixelSpacing,
	/// Row and column spacing for measurements in the rendering engine.
	CalibratedPixelSpacing,
	/// SUV scaling factors of a PET image.
	SuvScaling,
}

impl Display for MetadataKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Instance => write!(f, "instance"),
			Self::PixelSpacing => write!(f, "pixelSpacing"),
			Self::CalibratedPixelSpacing => write!(f, "calibratedPixelSpacing"),
			Self::SuvScaling => write!(f, "suvScaling"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataEntry {
	Instance(Arc<InstanceRecord>),
	PixelSpacing(PixelSpacingInformation),
	CalibratedPixelSpacing(CalibratedPixelSpacing),
	SuvScaling(SuvScalingFactors),
}

impl MetadataEntry {
	pub const fn kind(&self) -> MetadataKind {
		match self {
			Self::Instance(_) => MetadataKind::Instance,
			Self::PixelSpacing(_) => MetadataKind::PixelSpacing,
			Self::CalibratedPixelSpacing(_) => MetadataKind::CalibratedPixelSpacing,
			Self::SuvScaling(_) => MetadataKind::SuvScaling,
		}
	}
}

type Key = (MetadataKind, ImageId);

/// Metadata of one viewing session, keyed by kind and image identifier.
///
/// Every key has exactly one producer. Adding an entry for an existing key replaces it.
/// Entries are never evicted; [`MetadataStore::clear`] ends the session.
#[derive(Debug, Default)]
pub struct MetadataStore {
	entries: RwLock<HashMap<Key, MetadataEntry>>,
}

impl MetadataStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&self, image_id: impl Into<ImageId>, entry: MetadataEntry) {
		let image_id = image_id.into();
		trace!(kind = %entry.kind(), image_id = %image_id, "Registering metadata");
		self.entries
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert((entry.kind(), image_id), entry);
	}

	pub fn get(&self, kind: MetadataKind, image_id: &str) -> Option<MetadataEntry> {
		self.entries
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&(kind, image_id.to_owned()))
			.cloned()
	}

	pub fn contains(&self, kind: MetadataKind, image_id: &str) -> bool {
		self.entries
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.contains_key(&(kind, image_id.to_owned()))
	}

	pub fn pixel_spacing(&self, image_id: &str) -> Option<PixelSpacingInformation> {
		match self.get(MetadataKind::PixelSpacing, image_id)? {
			MetadataEntry::PixelSpacing(info) => Some(info),
			_ => None,
		}
	}

	pub fn calibrated_pixel_spacing(&self, image_id: &str) -> Option<CalibratedPixelSpacing> {
		match self.get(MetadataKind::CalibratedPixelSpacing, image_id)? {
			MetadataEntry::CalibratedPixelSpacing(spacing) => Some(spacing),
			_ => None,
		}
	}

	pub fn suv_scaling(&self, image_id: &str) -> Option<SuvScalingFactors> {
		match self.get(MetadataKind::SuvScaling, image_id)? {
			MetadataEntry::SuvScaling(factors) => Some(factors),
			_ => None,
		}
	}

	pub fn len(&self) -> usize {
		self.entries
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drops all entries of the session.
	pub fn clear(&self) {
		self.entries
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.clear();
	}
}

impl ModuleProvider for MetadataStore {
	fn instance(&self, image_id: &str) -> Option<Arc<InstanceRecord>> {
		match self.get(MetadataKind::Instance, image_id)? {
			MetadataEntry::Instance(record) => Some(record),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn instance(sop_instance_uid: &str) -> MetadataEntry {
		let record = json!({ "00080018": { "vr": "UI", "Value": [sop_instance_uid] } });
		MetadataEntry::Instance(Arc::new(record.as_object().unwrap().clone()))
	}

	#[test]
	fn last_write_wins() {
		let store = MetadataStore::new();
		store.add("wadors:a", instance("1"));
		store.add("wadors:a", instance("2"));

		assert_eq!(store.len(), 1);
		assert_eq!(store.get(MetadataKind::Instance, "wadors:a"), Some(instance("2")));
	}

	#[test]
	fn entries_are_keyed_by_kind() {
		let store = MetadataStore::new();
		store.add("wadors:a", instance("1"));
		store.add(
			"wadors:a",
			MetadataEntry::CalibratedPixelSpacing(CalibratedPixelSpacing {
				row_pixel_spacing: 0.5,
				column_pixel_spacing: 0.5,
			}),
		);

		assert_eq!(store.len(), 2);
		assert!(store.contains(MetadataKind::Instance, "wadors:a"));
		assert!(!store.contains(MetadataKind::SuvScaling, "wadors:a"));
		assert!(store.suv_scaling("wadors:a").is_none());
		assert!(store.calibrated_pixel_spacing("wadors:a").is_some());
		assert!(store.instance("wadors:a").is_some());
		assert!(store.instance("wadors:b").is_none());
	}

	#[test]
	fn clear_ends_session() {
		let store = MetadataStore::new();
		store.add("wadors:a", instance("1"));
		store.clear();
		assert!(store.is_empty());
	}
}
