//! Sources of series metadata.

mod filesystem;
#[cfg(feature = "s3")]
mod s3;

pub use filesystem::FilesystemArchive;
#[cfg(feature = "s3")]
pub use s3::S3Archive;

use crate::config::BackendConfig;
use crate::metadata::{DicomJsonExt, InstanceRecord};
use anyhow::anyhow;
use async_trait::async_trait;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Retrieves the DICOM JSON metadata of every instance of a series.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
	async fn retrieve_series_metadata(
		&self,
		study_instance_uid: &str,
		series_instance_uid: &str,
	) -> Result<Vec<InstanceRecord>, FetchError>;
}

#[derive(Debug, Error)]
pub enum FetchError {
	#[error("Invalid UID {0}")]
	InvalidUid(String),
	#[error("Series {series_instance_uid} of study {study_instance_uid} not found")]
	NotFound {
		study_instance_uid: String,
		series_instance_uid: String,
	},
	#[error("Failed to read {}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("Invalid DICOM JSON in {}: {source}", path.display())]
	InvalidJson {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
	#[error(transparent)]
	Backend { source: anyhow::Error },
}

/// Creates the archive client selected by the configuration.
pub fn from_config(config: &BackendConfig) -> Arc<dyn ArchiveClient> {
	match config {
		BackendConfig::Filesystem { root } => Arc::new(FilesystemArchive::new(root)),
		#[cfg(feature = "s3")]
		BackendConfig::S3(config) => Arc::new(S3Archive::new(config)),
	}
}

/// UIDs end up in file system paths and object keys, so only `[0-9.]` is accepted.
pub(crate) fn validate_uid(uid: &str) -> Result<(), FetchError> {
	let valid = uid.len() <= 64
		&& uid.starts_with(|c: char| c.is_ascii_digit())
		&& uid.chars().all(|c| c.is_ascii_digit() || c == '.');
	if valid {
		Ok(())
	} else {
		Err(FetchError::InvalidUid(uid.to_owned()))
	}
}

/// Converts a parsed DICOM data set to its DICOM JSON representation.
pub(crate) fn to_instance_record(object: InMemDicomObject) -> Result<InstanceRecord, FetchError> {
	match dicom_json::to_value(object) {
		Ok(Value::Object(record)) => Ok(record),
		Ok(other) => Err(FetchError::Backend {
			source: anyhow!("Expected a DICOM JSON object, got {other}"),
		}),
		Err(err) => Err(FetchError::Backend { source: err.into() }),
	}
}

/// Orders instances by Instance Number. Instances without one go last, ties keep their order.
pub(crate) fn sort_by_instance_number(instances: &mut [InstanceRecord]) {
	instances.sort_by(|a, b| {
		let number = |record: &InstanceRecord| {
			record
				.first_number(tags::INSTANCE_NUMBER)
				.unwrap_or(f64::INFINITY)
		};
		number(a).total_cmp(&number(b))
	});
}
