use super::{sort_by_instance_number, to_instance_record, validate_uid, ArchiveClient, FetchError};
use crate::config::{S3Config, S3EndpointStyle};
use crate::metadata::InstanceRecord;
use anyhow::anyhow;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::stalled_stream_protection::StalledStreamProtectionConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{AppName, Region};
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::list_objects_v2::{ListObjectsV2Error, ListObjectsV2Output};
use bytes::Bytes;
use dicom::dictionary_std::tags;
use dicom::object::OpenFileOptions;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Preamble length of a DICOM Part 10 file, followed by the `DICM` magic.
const PREAMBLE_LENGTH: usize = 128;

/// Reads series metadata from `<study>/<series>/*.dcm` objects of an S3 bucket.
pub struct S3Archive {
	s3: Arc<aws_sdk_s3::Client>,
	bucket: String,
	concurrency: usize,
}

impl S3Archive {
	pub fn new(config: &S3Config) -> Self {
		info!("Using S3 endpoint {}", &config.endpoint);
		let mut builder = aws_sdk_s3::config::Builder::new()
			.endpoint_url(&config.endpoint)
			.region(config.region.clone().map(Region::new))
			.behavior_version(BehaviorVersion::latest())
			.force_path_style(matches!(config.endpoint_style, S3EndpointStyle::Path))
			.retry_config(RetryConfig::adaptive())
			.stalled_stream_protection(StalledStreamProtectionConfig::disabled())
			.timeout_config(
				TimeoutConfig::builder()
					.connect_timeout(Duration::from_secs(5))
					.read_timeout(Duration::from_secs(20))
					.operation_timeout(Duration::from_secs(60))
					.build(),
			);

		match AppName::new("wado-imageids") {
			Ok(app_name) => builder = builder.app_name(app_name),
			Err(err) => warn!("Invalid app name: {err}"),
		}

		if let Some(credentials) = &config.credentials {
			if let Ok(resolved_secrets) = credentials.resolve() {
				builder = builder.credentials_provider(resolved_secrets);
			} else {
				warn!("Failed to resolve credentials. Check your environment variables.");
			}
		}

		Self {
			s3: Arc::new(aws_sdk_s3::Client::from_conf(builder.build())),
			bucket: config.bucket.clone(),
			concurrency: config.concurrency.max(1),
		}
	}

	async fn list_next(
		&self,
		prefix: &str,
		continuation_token: Option<String>,
	) -> Result<ListObjectsV2Output, SdkError<ListObjectsV2Error>> {
		self.s3
			.list_objects_v2()
			.bucket(&self.bucket)
			.prefix(prefix)
			.set_continuation_token(continuation_token)
			.send()
			.await
	}

	/// Collects the keys of all `.dcm` objects below `prefix`, following continuation tokens.
	async fn collect_keys(&self, prefix: &str) -> Result<Vec<String>, FetchError> {
		let mut keys = Vec::new();
		let mut continuation_token: Option<String> = None;
		loop {
			let response = self
				.list_next(prefix, continuation_token)
				.await
				.map_err(|err| {
					error!("{err:?}");
					FetchError::Backend { source: err.into() }
				})?;

			keys.extend(
				response
					.contents
					.unwrap_or_default()
					.into_iter()
					.filter_map(|object| object.key)
					.filter(|key| key.ends_with(".dcm")),
			);

			if response.is_truncated.unwrap_or(false) {
				continuation_token = response.next_continuation_token;
			} else {
				break;
			}
		}
		keys.sort();
		Ok(keys)
	}

	async fn fetch_instance(
		client: Arc<aws_sdk_s3::Client>,
		bucket: String,
		key: String,
	) -> Result<InstanceRecord, FetchError> {
		debug!("Fetching {key}");
		let object = client
			.get_object()
			.bucket(&bucket)
			.key(&key)
			.send()
			.await
			.map_err(|err| FetchError::Backend { source: err.into() })?;
		let bytes = object
			.body
			.collect()
			.await
			.map_err(|err| FetchError::Backend { source: err.into() })?
			.into_bytes();

		tokio::task::spawn_blocking(move || parse_part10(&key, bytes))
			.await
			.map_err(|err| FetchError::Backend { source: err.into() })?
	}
}

fn parse_part10(key: &str, bytes: Bytes) -> Result<InstanceRecord, FetchError> {
	let data = match bytes.get(PREAMBLE_LENGTH..PREAMBLE_LENGTH + 4) {
		Some(b"DICM") => bytes.slice(PREAMBLE_LENGTH..),
		_ => bytes,
	};
	let file = OpenFileOptions::new()
		.read_until(tags::PIXEL_DATA)
		.from_reader(data.as_ref())
		.map_err(|err| FetchError::Backend {
			source: anyhow!("Failed to parse {key}: {err}"),
		})?;
	to_instance_record(file.into_inner())
}

#[async_trait]
impl ArchiveClient for S3Archive {
	async fn retrieve_series_metadata(
		&self,
		study_instance_uid: &str,
		series_instance_uid: &str,
	) -> Result<Vec<InstanceRecord>, FetchError> {
		validate_uid(study_instance_uid)?;
		validate_uid(series_instance_uid)?;

		let prefix = format!("{study_instance_uid}/{series_instance_uid}/");
		info!("Requesting {prefix} from S3");
		let keys = self.collect_keys(&prefix).await?;
		info!("Found {} objects.", keys.len());

		if keys.is_empty() {
			return Err(FetchError::NotFound {
				study_instance_uid: study_instance_uid.to_owned(),
				series_instance_uid: series_instance_uid.to_owned(),
			});
		}

		let mut instances: Vec<InstanceRecord> = futures::stream::iter(keys)
			.map(|key| Self::fetch_instance(Arc::clone(&self.s3), self.bucket.clone(), key))
			.buffered(self.concurrency)
			.try_collect()
			.await?;

		sort_by_instance_number(&mut instances);
		Ok(instances)
	}
}
