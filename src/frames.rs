//! Expansion of multi-frame instances into one image identifier per frame.

use crate::metadata::modules::MultiframeModule;
use crate::types::{ImageId, Transport};

/// The position of the frame marker of an image identifier and the identifier cut right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInformation {
	/// Byte offset of the frame marker, if the identifier has one.
	pub frame_index: Option<usize>,
	/// The identifier up to and including the frame marker. Appending a frame number to it
	/// addresses that frame.
	pub image_id_frameless: String,
}

/// Locates the frame marker of `image_id` and strips the frame number after it.
///
/// WADO-RS identifiers use a `/frames/` path segment, WADO-URI identifiers a `&frame=` query
/// parameter. The marker is appended when the identifier has none.
pub fn frame_information(image_id: &str) -> FrameInformation {
	let marker = Transport::of(image_id).frame_marker();
	let frame_index = image_id.find(marker).filter(|index| *index > 0);

	let image_id_frameless = match frame_index {
		Some(index) => image_id[..index + marker.len()].to_owned(),
		None => format!("{image_id}{marker}"),
	};

	FrameInformation {
		frame_index,
		image_id_frameless,
	}
}

/// Replaces every multi-frame image identifier by the identifiers of its frames.
///
/// `multiframe` looks up the multi-frame module of an identifier. Identifiers reporting more than
/// one frame are replaced, in place, by frames `1..=N` in ascending order. All other identifiers
/// are kept unchanged.
pub fn convert_multiframe_image_ids<F>(image_ids: Vec<ImageId>, multiframe: F) -> Vec<ImageId>
where
	F: Fn(&str) -> Option<MultiframeModule>,
{
	let mut expanded = Vec::with_capacity(image_ids.len());
	for image_id in image_ids {
		let number_of_frames = multiframe(&image_id)
			.and_then(|module| module.number_of_frames)
			.unwrap_or_default();

		if number_of_frames > 1 {
			let FrameInformation {
				image_id_frameless, ..
			} = frame_information(&image_id);
			expanded.extend((1..=number_of_frames).map(|frame| format!("{image_id_frameless}{frame}")));
		} else {
			expanded.push(image_id);
		}
	}
	expanded
}
