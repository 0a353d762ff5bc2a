use std::fmt::{Display, Formatter};

/// UI (Unique Identifier) value representation.
pub type UI = String;

/// CS (Code String) value representation.
pub type CS = String;

/// An opaque address for one 2D image or frame, handed to the rendering engine.
pub type ImageId = String;

/// The modality code of Positron Emission Tomography series.
pub const PET_MODALITY: &str = "PT";

/// The transport used by the rendering engine to fetch the pixel data of an image identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Transport {
	/// WADO-RS, frames addressed as a path segment (`.../frames/1`).
	#[default]
	WadoRs,
	/// WADO-URI, frames addressed as a query parameter (`...&frame=1`).
	WadoUri,
}

impl Transport {
	pub const fn scheme(self) -> &'static str {
		match self {
			Self::WadoRs => "wadors:",
			Self::WadoUri => "wadouri:",
		}
	}

	/// The marker preceding the frame number in an identifier of this transport.
	pub const fn frame_marker(self) -> &'static str {
		match self {
			Self::WadoRs => "/frames/",
			Self::WadoUri => "&frame=",
		}
	}

	pub fn of(image_id: &str) -> Self {
		if image_id.contains(Self::WadoRs.scheme()) {
			Self::WadoRs
		} else {
			Self::WadoUri
		}
	}
}

impl Display for Transport {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::WadoRs => write!(f, "WADO-RS"),
			Self::WadoUri => write!(f, "WADO-URI"),
		}
	}
}

/// Builds the WADO-RS image identifier addressing `frame` of an instance.
pub fn wadors_image_id(
	wado_root: &str,
	study_instance_uid: &str,
	series_instance_uid: &str,
	sop_instance_uid: &str,
	frame: u32,
) -> ImageId {
	format!(
		"{scheme}{wado_root}/studies/{study}/series/{series}/instances/{instance}/frames/{frame}",
		scheme = Transport::WadoRs.scheme(),
		study = study_instance_uid.trim(),
		series = series_instance_uid.trim(),
		instance = sop_instance_uid.trim(),
	)
}
