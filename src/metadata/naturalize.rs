use super::InstanceRecord;
use dicom::core::{DataDictionary, Tag};
use dicom::object::StandardDataDictionary;
use serde_json::{Map, Value};

/// A record keyed by standard attribute keywords (`PixelSpacing`, `SOPClassUID`, ...).
pub type NaturalRecord = Map<String, Value>;

/// Converts a DICOM JSON record into a [`NaturalRecord`].
///
/// - hexadecimal tags are replaced by their keyword from the standard dictionary;
///   tags unknown to the dictionary keep their hexadecimal key
/// - single values become scalars, multiple values become arrays
/// - sequences always become arrays of naturalized items
/// - attributes without a value are omitted
pub fn naturalize(record: &InstanceRecord) -> NaturalRecord {
	let mut natural = NaturalRecord::new();
	for (key, element) in record {
		if let Some(value) = naturalize_element(element) {
			natural.insert(keyword(key), value);
		}
	}
	natural
}

fn keyword(key: &str) -> String {
	parse_tag(key)
		.and_then(|tag| StandardDataDictionary.by_tag(tag))
		.map_or_else(|| key.to_owned(), |entry| entry.alias.to_owned())
}

fn parse_tag(key: &str) -> Option<Tag> {
	if key.len() != 8 {
		return None;
	}
	let group = u16::from_str_radix(key.get(0..4)?, 16).ok()?;
	let element = u16::from_str_radix(key.get(4..8)?, 16).ok()?;
	Some(Tag(group, element))
}

fn naturalize_element(element: &Value) -> Option<Value> {
	let element = element.as_object()?;
	let Some(Value::Array(values)) = element.get("Value") else {
		// Binary attributes are kept in their DICOM JSON representation.
		return element
			.get("InlineBinary")
			.or_else(|| element.get("BulkDataURI"))
			.cloned();
	};

	if element.get("vr").and_then(Value::as_str) == Some("SQ") {
		let items = values
			.iter()
			.filter_map(Value::as_object)
			.map(|item| Value::Object(naturalize(item)))
			.collect();
		return Some(Value::Array(items));
	}

	match values.as_slice() {
		[] => None,
		[single] => Some(single.clone()),
		_ => Some(Value::Array(values.clone())),
	}
}
