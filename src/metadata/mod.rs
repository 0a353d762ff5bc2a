//! Raw DICOM JSON records and everything derived from them.
//!
//! Records arrive from the archive in the DICOM JSON model (PS3.18 Annex F): an object keyed by
//! the eight-digit hexadecimal tag, each entry holding the `vr` and an optional `Value` array.

pub mod datetime;
pub mod modules;
pub mod naturalize;
pub mod sanitize;
pub mod store;

pub use modules::ModuleProvider;
pub use naturalize::{naturalize, NaturalRecord};
pub use sanitize::remove_invalid_tags;
pub use store::{MetadataEntry, MetadataKind, MetadataStore};

use dicom::core::Tag;
use serde_json::{Map, Value};

/// One instance of a series metadata response, exactly as received.
pub type InstanceRecord = Map<String, Value>;

/// The DICOM JSON key of a tag, e.g. `0020000E`.
pub fn tag_key(tag: Tag) -> String {
	format!("{:04X}{:04X}", tag.group(), tag.element())
}

/// Typed accessors for DICOM JSON attributes.
pub trait DicomJsonExt {
	/// The `Value` array of the attribute, if present.
	fn values(&self, tag: Tag) -> Option<&Vec<Value>>;

	/// The first value as a string. Numbers are formatted.
	fn first_string(&self, tag: Tag) -> Option<String> {
		self.values(tag)?.first().and_then(value_to_string)
	}

	/// All values as strings.
	fn strings(&self, tag: Tag) -> Option<Vec<String>> {
		let values = self.values(tag)?;
		let strings: Vec<String> = values.iter().filter_map(value_to_string).collect();
		(!strings.is_empty()).then_some(strings)
	}

	/// The first value as a number. Decimal and integer strings are parsed.
	fn first_number(&self, tag: Tag) -> Option<f64> {
		self.values(tag)?.first().and_then(value_to_number)
	}

	/// The first item of a sequence attribute.
	fn first_item(&self, tag: Tag) -> Option<&Map<String, Value>> {
		self.values(tag)?.first()?.as_object()
	}
}

impl DicomJsonExt for Map<String, Value> {
	fn values(&self, tag: Tag) -> Option<&Vec<Value>> {
		self.get(&tag_key(tag))?.get("Value")?.as_array()
	}
}

pub(crate) fn value_to_string(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.trim().to_owned()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

pub(crate) fn value_to_number(value: &Value) -> Option<f64> {
	match value {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use dicom::dictionary_std::tags;
	use serde_json::json;

	#[test]
	fn read_attributes() {
		let record = json!({
			"00080018": { "vr": "UI", "Value": ["1.2.3"] },
			"00280030": { "vr": "DS", "Value": ["0.5", 0.25] },
			"00280051": { "vr": "CS", "Value": ["DECY", "ATTN"] },
			"00100010": { "vr": "PN" },
		});
		let record = record.as_object().unwrap();

		assert_eq!(
			record.first_string(tags::SOP_INSTANCE_UID).as_deref(),
			Some("1.2.3")
		);
		assert_eq!(record.first_number(tags::PIXEL_SPACING), Some(0.5));
		assert_eq!(
			record.strings(tags::CORRECTED_IMAGE),
			Some(vec![String::from("DECY"), String::from("ATTN")])
		);
		assert_eq!(record.first_string(tags::PATIENT_NAME), None);
		assert_eq!(record.first_string(tags::PIXEL_DATA), None);
	}

	#[test]
	fn format_tag_key() {
		assert_eq!(tag_key(tags::SERIES_INSTANCE_UID), "0020000E");
		assert_eq!(tag_key(tags::MODALITY), "00080060");
	}
}
