use super::InstanceRecord;

/// Returns a copy of `record` without the attributes whose value is `null`.
///
/// Entries are copied one by one. Cloning the record through a serializer round-trip is several
/// times slower on large series.
pub fn remove_invalid_tags(record: &InstanceRecord) -> InstanceRecord {
	record
		.iter()
		.filter(|(_, value)| !value.is_null())
		.map(|(tag, value)| (tag.clone(), value.clone()))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn drops_null_entries_only() {
		let record = json!({
			"00080018": { "vr": "UI", "Value": ["1.2.3"] },
			"00080060": null,
			"00100010": { "vr": "PN" },
			"00280008": { "vr": "IS", "Value": [3] },
		});
		let record = record.as_object().unwrap();

		let sanitized = remove_invalid_tags(record);

		assert_eq!(sanitized.len(), 3);
		assert!(!sanitized.contains_key("00080060"));
		for (tag, value) in &sanitized {
			assert_eq!(record.get(tag), Some(value));
			assert!(!value.is_null());
		}
	}

	#[test]
	fn empty_record() {
		assert!(remove_invalid_tags(&InstanceRecord::new()).is_empty());
	}
}
