//! Date and time attributes that arrive either as DICOM strings or as structured values.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A date split into its components. Missing components count as zero.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredDate {
	pub year: u16,
	pub month: u8,
	pub day: u8,
}

/// A time split into its components. Missing components count as zero.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StructuredTime {
	pub hours: Option<u8>,
	pub minutes: Option<u8>,
	pub seconds: Option<u8>,
	/// The digits after the decimal point, e.g. `12` for `.12`.
	pub fractional_seconds: Option<u32>,
}

/// A DA (or the date part of a DT) value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateValue {
	Raw(String),
	Structured(StructuredDate),
}

/// A TM value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
	Raw(String),
	Structured(StructuredTime),
}

impl DateValue {
	/// The value in the `YYYYMMDD` form. Raw strings are returned unchanged.
	pub fn to_dicom_string(&self) -> String {
		match self {
			Self::Raw(raw) => raw.clone(),
			Self::Structured(date) => date.to_string(),
		}
	}
}

impl TimeValue {
	/// The value in the `HHMMSS.ffffff` form. Raw strings are returned unchanged.
	pub fn to_dicom_string(&self) -> String {
		match self {
			Self::Raw(raw) => raw.clone(),
			Self::Structured(time) => time.to_string(),
		}
	}
}

impl Display for StructuredDate {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:04}{:02}{:02}", self.year, self.month, self.day)
	}
}

impl Display for StructuredTime {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		// The fraction is padded on the right: `12` stands for `.120000`
		write!(
			f,
			"{:02}{:02}{:02}.{:0<6}",
			self.hours.unwrap_or_default(),
			self.minutes.unwrap_or_default(),
			self.seconds.unwrap_or_default(),
			self.fractional_seconds.unwrap_or_default().to_string(),
		)
	}
}

impl From<&str> for DateValue {
	fn from(raw: &str) -> Self {
		Self::Raw(raw.to_owned())
	}
}

impl From<&str> for TimeValue {
	fn from(raw: &str) -> Self {
		Self::Raw(raw.to_owned())
	}
}
