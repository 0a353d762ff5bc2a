use super::{sort_by_instance_number, to_instance_record, validate_uid, ArchiveClient, FetchError};
use crate::metadata::InstanceRecord;
use anyhow::Context;
use async_trait::async_trait;
use dicom::dictionary_std::tags;
use dicom::object::OpenFileOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Reads series metadata from a local directory.
///
/// Two layouts are supported, checked in this order:
/// - `<root>/studies/<study>/series/<series>/metadata[.json]`, a DICOM JSON array as written by
///   static DICOMweb exporters
/// - `<root>/<study>/<series>/*.dcm`, DICOM Part 10 files
pub struct FilesystemArchive {
	root: PathBuf,
}

impl FilesystemArchive {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		let root = root.into();
		info!("Using file system archive at {}", root.display());
		Self { root }
	}

	async fn read_metadata_document(
		&self,
		study_instance_uid: &str,
		series_instance_uid: &str,
	) -> Result<Option<Vec<InstanceRecord>>, FetchError> {
		let series_dir = self
			.root
			.join("studies")
			.join(study_instance_uid)
			.join("series")
			.join(series_instance_uid);

		for name in ["metadata", "metadata.json"] {
			let path = series_dir.join(name);
			match fs::read(&path).await {
				Ok(bytes) => {
					debug!("Reading series metadata from {}", path.display());
					return serde_json::from_slice(&bytes)
						.map(Some)
						.map_err(|source| FetchError::InvalidJson { path, source });
				}
				Err(err) if err.kind() == ErrorKind::NotFound => continue,
				Err(source) => return Err(FetchError::Io { path, source }),
			}
		}
		Ok(None)
	}

	async fn read_part10_files(
		&self,
		study_instance_uid: &str,
		series_instance_uid: &str,
	) -> Result<Vec<InstanceRecord>, FetchError> {
		let series_dir = self.root.join(study_instance_uid).join(series_instance_uid);

		let mut entries = match fs::read_dir(&series_dir).await {
			Ok(entries) => entries,
			Err(err) if err.kind() == ErrorKind::NotFound => {
				return Err(FetchError::NotFound {
					study_instance_uid: study_instance_uid.to_owned(),
					series_instance_uid: series_instance_uid.to_owned(),
				});
			}
			Err(source) => {
				return Err(FetchError::Io {
					path: series_dir,
					source,
				})
			}
		};

		let mut paths = Vec::new();
		loop {
			match entries.next_entry().await {
				Ok(Some(entry)) => {
					let path = entry.path();
					if path
						.extension()
						.is_some_and(|extension| extension.eq_ignore_ascii_case("dcm"))
					{
						paths.push(path);
					}
				}
				Ok(None) => break,
				Err(source) => {
					return Err(FetchError::Io {
						path: series_dir,
						source,
					})
				}
			}
		}
		paths.sort();
		debug!("Reading {} files from {}", paths.len(), series_dir.display());

		let mut instances = tokio::task::spawn_blocking(move || {
			paths
				.iter()
				.map(|path| read_part10_file(path))
				.collect::<Result<Vec<_>, _>>()
		})
		.await
		.map_err(|err| FetchError::Backend { source: err.into() })??;

		sort_by_instance_number(&mut instances);
		Ok(instances)
	}
}

/// Reads the data set of a Part 10 file, skipping pixel data.
fn read_part10_file(path: &Path) -> Result<InstanceRecord, FetchError> {
	let file = OpenFileOptions::new()
		.read_until(tags::PIXEL_DATA)
		.open_file(path)
		.with_context(|| format!("Failed to parse {}", path.display()))
		.map_err(|source| FetchError::Backend { source })?;
	to_instance_record(file.into_inner())
}

#[async_trait]
impl ArchiveClient for FilesystemArchive {
	async fn retrieve_series_metadata(
		&self,
		study_instance_uid: &str,
		series_instance_uid: &str,
	) -> Result<Vec<InstanceRecord>, FetchError> {
		validate_uid(study_instance_uid)?;
		validate_uid(series_instance_uid)?;

		if let Some(instances) = self
			.read_metadata_document(study_instance_uid, series_instance_uid)
			.await?
		{
			return Ok(instances);
		}
		self.read_part10_files(study_instance_uid, series_instance_uid)
			.await
	}
}
