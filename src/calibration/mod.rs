//! Spatial calibration of images.
//!
//! Projection radiographs carry two spacings: Imager Pixel Spacing at the detector plane and
//! Pixel Spacing at a calibrated reference plane. Measurement overlays must tell the user which
//! plane a distance refers to, so the combination of both attributes is classified here.
//!
//! <http://gdcm.sourceforge.net/wiki/index.php/Imager_Pixel_Spacing>

use crate::metadata::NaturalRecord;
use crate::types::UI;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// SOP classes of projection radiographs.
const PROJECTION_RADIOGRAPH_SOP_CLASSES: &[&str] = &[
	"1.2.840.10008.5.1.4.1.1.1",      // CR Image Storage
	"1.2.840.10008.5.1.4.1.1.1.1",    // Digital X-Ray Image Storage - For Presentation
	"1.2.840.10008.5.1.4.1.1.1.1.1",  // Digital X-Ray Image Storage - For Processing
	"1.2.840.10008.5.1.4.1.1.1.2",    // Digital Mammography X-Ray Image Storage - For Presentation
	"1.2.840.10008.5.1.4.1.1.1.2.1",  // Digital Mammography X-Ray Image Storage - For Processing
	"1.2.840.10008.5.1.4.1.1.1.3",    // Digital Intra-Oral X-Ray Image Storage - For Presentation
	"1.2.840.10008.5.1.4.1.1.1.3.1",  // Digital Intra-Oral X-Ray Image Storage - For Processing
	"1.2.840.10008.5.1.4.1.1.12.1",   // X-Ray Angiographic Image Storage
	"1.2.840.10008.5.1.4.1.1.12.1.1", // Enhanced XA Image Storage
	"1.2.840.10008.5.1.4.1.1.12.2",   // X-Ray Radiofluoroscopic Image Storage
	"1.2.840.10008.5.1.4.1.1.12.2.1", // Enhanced XRF Image Storage
	"1.2.840.10008.5.1.4.1.1.12.3",   // X-Ray Angiographic Bi-plane Image Storage (Retired)
];

/// Ultrasound regions measure physical deltas in cm.
const CENTIMETERS_TO_MILLIMETERS: f64 = 10.0;

/// Pixel spacing in millimeters (row, column)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelSpacing {
	pub row: f64,
	pub column: f64,
}

impl PixelSpacing {
	pub const fn new(row: f64, column: f64) -> Self {
		Self { row, column }
	}

	/// Reads a spacing from a naturalized attribute.
	///
	/// Accepts a two-element array of numbers or decimal strings, or a single
	/// backslash-delimited string such as `"0.1\\0.1"`.
	pub fn from_value(value: &Value) -> Option<Self> {
		let numbers: Vec<f64> = match value {
			Value::Array(values) => values.iter().filter_map(number).collect(),
			Value::String(s) => s.split('\\').filter_map(|n| n.trim().parse().ok()).collect(),
			_ => return None,
		};

		match numbers.as_slice() {
			[row, column, ..] => Some(Self::new(*row, *column)),
			_ => None,
		}
	}

	fn scaled(self, factor: f64) -> Self {
		Self::new(self.row * factor, self.column * factor)
	}
}

impl fmt::Display for PixelSpacing {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} x {} mm", self.row, self.column)
	}
}

fn number(value: &Value) -> Option<f64> {
	match value {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

/// How a pixel spacing relates to the patient.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PixelSpacingType {
	/// Projection radiograph with Pixel Spacing only; the reference plane is not known.
	Unknown,
	/// Pixel Spacing equals Imager Pixel Spacing; measurements are at the detector plane.
	Detector,
	/// Pixel Spacing differs from Imager Pixel Spacing; it was calibrated.
	Calibrated,
	/// Cross-sectional image where the distinction does not exist.
	NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelSpacingDescriptor {
	pub pixel_spacing: Option<PixelSpacing>,
	#[serde(rename = "type")]
	pub spacing_type: Option<PixelSpacingType>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub is_projection: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub calibration_type: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub calibration_description: Option<String>,
}

impl PixelSpacingDescriptor {
	fn classified(
		pixel_spacing: Option<PixelSpacing>,
		spacing_type: PixelSpacingType,
		is_projection: bool,
	) -> Self {
		Self {
			pixel_spacing,
			spacing_type: Some(spacing_type),
			is_projection: Some(is_projection),
			calibration_type: None,
			calibration_description: None,
		}
	}
}

/// The outcome of [`resolve_pixel_spacing`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PixelSpacingInformation {
	/// Pixel Spacing of an image that is not a projection radiograph, unchanged.
	Raw(Option<PixelSpacing>),
	Descriptor(PixelSpacingDescriptor),
}

impl PixelSpacingInformation {
	pub const fn pixel_spacing(&self) -> Option<PixelSpacing> {
		match self {
			Self::Raw(spacing) => *spacing,
			Self::Descriptor(descriptor) => descriptor.pixel_spacing,
		}
	}
}

/// Row and column spacing consumed by the rendering engine for measurements.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibratedPixelSpacing {
	pub row_pixel_spacing: f64,
	pub column_pixel_spacing: f64,
}

impl From<PixelSpacing> for CalibratedPixelSpacing {
	fn from(spacing: PixelSpacing) -> Self {
		Self {
			row_pixel_spacing: spacing.row,
			column_pixel_spacing: spacing.column,
		}
	}
}

/// An item of the Sequence of Ultrasound Regions (0018,6011).
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct UltrasoundRegion {
	/// cm per pixel along X
	pub physical_delta_x: Option<f64>,
	/// cm per pixel along Y
	pub physical_delta_y: Option<f64>,
}

/// The attributes of an instance that take part in the pixel spacing decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelSpacingInput {
	pub sop_class_uid: Option<UI>,
	pub pixel_spacing: Option<PixelSpacing>,
	pub imager_pixel_spacing: Option<PixelSpacing>,
	pub pixel_spacing_calibration_type: Option<String>,
	pub pixel_spacing_calibration_description: Option<String>,
	pub estimated_radiographic_magnification_factor: Option<f64>,
	pub ultrasound_regions: Vec<UltrasoundRegion>,
}

impl PixelSpacingInput {
	pub fn from_natural(record: &NaturalRecord) -> Self {
		let string = |keyword: &str| {
			record
				.get(keyword)
				.and_then(Value::as_str)
				.map(|s| s.trim().to_owned())
		};

		let ultrasound_regions = match record.get("SequenceOfUltrasoundRegions") {
			Some(Value::Array(items)) => items
				.iter()
				.filter_map(Value::as_object)
				.map(|item| UltrasoundRegion {
					physical_delta_x: item.get("PhysicalDeltaX").and_then(number),
					physical_delta_y: item.get("PhysicalDeltaY").and_then(number),
				})
				.collect(),
			_ => Vec::new(),
		};

		Self {
			sop_class_uid: string("SOPClassUID"),
			pixel_spacing: record.get("PixelSpacing").and_then(PixelSpacing::from_value),
			imager_pixel_spacing: record
				.get("ImagerPixelSpacing")
				.and_then(PixelSpacing::from_value),
			pixel_spacing_calibration_type: string("PixelSpacingCalibrationType"),
			pixel_spacing_calibration_description: string("PixelSpacingCalibrationDescription"),
			estimated_radiographic_magnification_factor: record
				.get("EstimatedRadiographicMagnificationFactor")
				.and_then(number),
			ultrasound_regions,
		}
	}

	pub fn is_projection(&self) -> bool {
		self.sop_class_uid
			.as_deref()
			.is_some_and(|uid| PROJECTION_RADIOGRAPH_SOP_CLASSES.contains(&uid))
	}
}

/// Derives the spatial calibration of an image.
///
/// The first matching rule wins:
/// 1. not a projection radiograph: Pixel Spacing as is
/// 2. projection without Imager Pixel Spacing: [`PixelSpacingType::Unknown`]
/// 3. both spacings, equal: [`PixelSpacingType::Detector`]
/// 4. both spacings, different: [`PixelSpacingType::Calibrated`] with the calibration annotations
/// 5. Imager Pixel Spacing only: corrected by the estimated radiographic magnification factor
/// 6. a single ultrasound region: its physical deltas in mm
/// 7. several ultrasound regions: unsupported
/// 8. no projection and no Imager Pixel Spacing: [`PixelSpacingType::NotApplicable`]
///
/// `None` means the spacing cannot be determined and measurements stay in pixels.
pub fn resolve_pixel_spacing(input: &PixelSpacingInput) -> Option<PixelSpacingInformation> {
	let is_projection = input.is_projection();
	let pixel_spacing = input.pixel_spacing;
	let imager_pixel_spacing = input.imager_pixel_spacing;

	if !is_projection {
		return Some(PixelSpacingInformation::Raw(pixel_spacing));
	}

	if imager_pixel_spacing.is_none() {
		return Some(PixelSpacingInformation::Descriptor(
			PixelSpacingDescriptor::classified(pixel_spacing, PixelSpacingType::Unknown, true),
		));
	}

	if let (Some(spacing), Some(imager_spacing)) = (pixel_spacing, imager_pixel_spacing) {
		if spacing == imager_spacing {
			return Some(PixelSpacingInformation::Descriptor(
				PixelSpacingDescriptor::classified(
					Some(spacing),
					PixelSpacingType::Detector,
					true,
				),
			));
		}

		return Some(PixelSpacingInformation::Descriptor(PixelSpacingDescriptor {
			calibration_type: input.pixel_spacing_calibration_type.clone(),
			calibration_description: input.pixel_spacing_calibration_description.clone(),
			..PixelSpacingDescriptor::classified(
				Some(spacing),
				PixelSpacingType::Calibrated,
				true,
			)
		}));
	}

	if let (None, Some(imager_spacing)) = (pixel_spacing, imager_pixel_spacing) {
		let corrected = match input
			.estimated_radiographic_magnification_factor
			.filter(|factor| *factor != 0.0)
		{
			// IHE Mammography: Imager Pixel Spacing is corrected by the magnification factor
			Some(factor) => imager_spacing.scaled(1.0 / factor),
			None => {
				warn!("EstimatedRadiographicMagnificationFactor is missing, ImagerPixelSpacing cannot be corrected");
				imager_spacing
			}
		};

		return Some(PixelSpacingInformation::Descriptor(PixelSpacingDescriptor {
			pixel_spacing: Some(corrected),
			spacing_type: None,
			is_projection: Some(true),
			calibration_type: None,
			calibration_description: None,
		}));
	}

	match input.ultrasound_regions.as_slice() {
		[region] => {
			let (Some(delta_x), Some(delta_y)) = (region.physical_delta_x, region.physical_delta_y)
			else {
				warn!("Ultrasound region without physical deltas, spacing cannot be determined");
				return None;
			};
			return Some(PixelSpacingInformation::Descriptor(PixelSpacingDescriptor {
				pixel_spacing: Some(
					PixelSpacing::new(delta_x, delta_y).scaled(CENTIMETERS_TO_MILLIMETERS),
				),
				spacing_type: None,
				is_projection: None,
				calibration_type: None,
				calibration_description: None,
			}));
		}
		[_, _, ..] => {
			warn!(
				regions = input.ultrasound_regions.len(),
				"Multiple ultrasound regions are not supported, measurements are in pixels"
			);
			return None;
		}
		[] => {}
	}

	if !is_projection && imager_pixel_spacing.is_none() {
		return Some(PixelSpacingInformation::Descriptor(
			PixelSpacingDescriptor::classified(
				pixel_spacing,
				PixelSpacingType::NotApplicable,
				is_projection,
			),
		));
	}

	warn!("Unknown combination of PixelSpacing and ImagerPixelSpacing, spacing cannot be determined");
	None
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::metadata::naturalize;
	use serde_json::json;

	const CR: &str = "1.2.840.10008.5.1.4.1.1.1";
	const CT: &str = "1.2.840.10008.5.1.4.1.1.2";

	fn projection() -> PixelSpacingInput {
		PixelSpacingInput {
			sop_class_uid: Some(CR.to_owned()),
			..PixelSpacingInput::default()
		}
	}

	fn descriptor(info: Option<PixelSpacingInformation>) -> PixelSpacingDescriptor {
		match info {
			Some(PixelSpacingInformation::Descriptor(descriptor)) => descriptor,
			other => panic!("expected a descriptor, got {other:?}"),
		}
	}

	#[test]
	fn non_projection_passes_pixel_spacing_through() {
		let input = PixelSpacingInput {
			sop_class_uid: Some(CT.to_owned()),
			pixel_spacing: Some(PixelSpacing::new(0.7, 0.7)),
			imager_pixel_spacing: Some(PixelSpacing::new(0.1, 0.1)),
			..PixelSpacingInput::default()
		};

		assert_eq!(
			resolve_pixel_spacing(&input),
			Some(PixelSpacingInformation::Raw(Some(PixelSpacing::new(0.7, 0.7))))
		);
		assert_eq!(
			resolve_pixel_spacing(&PixelSpacingInput::default()),
			Some(PixelSpacingInformation::Raw(None))
		);
	}

	#[test]
	fn projection_without_imager_spacing_is_unknown() {
		let input = PixelSpacingInput {
			pixel_spacing: Some(PixelSpacing::new(0.2, 0.2)),
			..projection()
		};

		let descriptor = descriptor(resolve_pixel_spacing(&input));
		assert_eq!(descriptor.spacing_type, Some(PixelSpacingType::Unknown));
		assert_eq!(descriptor.pixel_spacing, Some(PixelSpacing::new(0.2, 0.2)));
		assert_eq!(descriptor.is_projection, Some(true));
	}

	#[test]
	fn equal_spacings_are_detector() {
		let input = PixelSpacingInput {
			pixel_spacing: Some(PixelSpacing::new(0.15, 0.15)),
			imager_pixel_spacing: Some(PixelSpacing::new(0.15, 0.15)),
			..projection()
		};

		let descriptor = descriptor(resolve_pixel_spacing(&input));
		assert_eq!(descriptor.spacing_type, Some(PixelSpacingType::Detector));
	}

	#[test]
	fn different_spacings_are_calibrated() {
		let input = PixelSpacingInput {
			pixel_spacing: Some(PixelSpacing::new(0.1, 0.1)),
			imager_pixel_spacing: Some(PixelSpacing::new(0.15, 0.15)),
			pixel_spacing_calibration_type: Some(String::from("GEOMETRY")),
			pixel_spacing_calibration_description: Some(String::from("magnification")),
			..projection()
		};

		let descriptor = descriptor(resolve_pixel_spacing(&input));
		assert_eq!(descriptor.spacing_type, Some(PixelSpacingType::Calibrated));
		assert_eq!(descriptor.pixel_spacing, Some(PixelSpacing::new(0.1, 0.1)));
		assert_eq!(descriptor.calibration_type.as_deref(), Some("GEOMETRY"));
		assert_eq!(
			descriptor.calibration_description.as_deref(),
			Some("magnification")
		);
	}

	#[test]
	fn imager_spacing_is_corrected_by_magnification() {
		let input = PixelSpacingInput {
			imager_pixel_spacing: Some(PixelSpacing::new(0.2, 0.3)),
			estimated_radiographic_magnification_factor: Some(2.0),
			..projection()
		};

		let descriptor = descriptor(resolve_pixel_spacing(&input));
		assert_eq!(descriptor.pixel_spacing, Some(PixelSpacing::new(0.1, 0.15)));
		assert_eq!(descriptor.spacing_type, None);
	}

	#[test]
	fn imager_spacing_without_magnification_is_uncorrected() {
		let input = PixelSpacingInput {
			imager_pixel_spacing: Some(PixelSpacing::new(0.2, 0.3)),
			..projection()
		};

		let descriptor = descriptor(resolve_pixel_spacing(&input));
		assert_eq!(descriptor.pixel_spacing, Some(PixelSpacing::new(0.2, 0.3)));
	}

	#[test]
	fn input_from_naturalized_record() {
		let record = json!({
			"00080016": { "vr": "UI", "Value": [CR] },
			"00280030": { "vr": "DS", "Value": ["0.1", "0.2"] },
			"00181164": { "vr": "DS", "Value": [0.15, 0.25] },
			"00181114": { "vr": "DS", "Value": ["1.2"] },
			"00186011": { "vr": "SQ", "Value": [
				{ "0018602C": { "vr": "FD", "Value": [0.02] }, "0018602E": { "vr": "FD", "Value": [0.03] } }
			] }
		});

		let input = PixelSpacingInput::from_natural(&naturalize(record.as_object().unwrap()));

		assert!(input.is_projection());
		assert_eq!(input.pixel_spacing, Some(PixelSpacing::new(0.1, 0.2)));
		assert_eq!(input.imager_pixel_spacing, Some(PixelSpacing::new(0.15, 0.25)));
		assert_eq!(input.estimated_radiographic_magnification_factor, Some(1.2));
		assert_eq!(
			input.ultrasound_regions,
			vec![UltrasoundRegion {
				physical_delta_x: Some(0.02),
				physical_delta_y: Some(0.03),
			}]
		);
	}

	#[test]
	fn parse_spacing_values() {
		assert_eq!(
			PixelSpacing::from_value(&json!("0.1\\0.2")),
			Some(PixelSpacing::new(0.1, 0.2))
		);
		assert_eq!(
			PixelSpacing::from_value(&json!([0.5, "0.25"])),
			Some(PixelSpacing::new(0.5, 0.25))
		);
		assert_eq!(PixelSpacing::from_value(&json!(0.5)), None);
		assert_eq!(PixelSpacing::from_value(&json!(["x"])), None);
	}

	#[test]
	fn serialize_descriptor() {
		let input = PixelSpacingInput {
			pixel_spacing: Some(PixelSpacing::new(0.2, 0.2)),
			..projection()
		};
		let value = serde_json::to_value(resolve_pixel_spacing(&input).unwrap()).unwrap();
		assert_eq!(
			value,
			json!({
				"pixelSpacing": { "row": 0.2, "column": 0.2 },
				"type": "UNKNOWN",
				"isProjection": true,
			})
		);
	}
}
