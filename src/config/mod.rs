use serde::{Deserialize, Deserializer};
use std::net::IpAddr;
use std::str::FromStr;
use tracing::Level;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub server: ServerConfig,
	pub archive: ArchiveConfig,
}

impl AppConfig {
	/// Loads the configuration from the embedded defaults, an optional `config.toml` in the
	/// working directory and `WADO_IMAGEIDS__*` environment variables (in that order).
	pub fn new() -> Result<Self, config::ConfigError> {
		use config::Config;
		let s = Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.add_source(config::File::with_name("config.toml").required(false))
			.add_source(
				config::Environment::with_prefix("WADO_IMAGEIDS")
					.prefix_separator("__")
					.separator("__"),
			)
			.build()?;

		s.try_deserialize()
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	// Configurable logging level. Also configurable via RUST_LOG.
	#[serde(deserialize_with = "deserialize_level")]
	pub level: Level,
	/// Sentry DSN. Sentry is disabled when unset.
	pub sentry: Option<String>,
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
	D: Deserializer<'de>,
{
	let level = String::deserialize(deserializer)?;
	Level::from_str(&level).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
	pub http: HttpServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
	// The interface the server will be listening on
	pub interface: IpAddr,
	// The port for the server
	pub port: u16,
	/// Request timeout in seconds.
	pub request_timeout: u64,
	pub graceful_shutdown: bool,
	/// Upper bound of requests processed at the same time.
	pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
	/// The WADO-RS root embedded into every image identifier.
	/// The rendering engine fetches pixel data relative to this URL.
	#[serde(deserialize_with = "deserialize_wado_root")]
	pub wado_root: String,
	/// Whether multi-frame instances are expanded into one identifier per frame by default.
	pub convert_multiframe: bool,
	pub backend: BackendConfig,
}

fn deserialize_wado_root<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = String::deserialize(deserializer)?;
	let url = Url::parse(&raw).map_err(serde::de::Error::custom)?;
	Ok(url.as_str().trim_end_matches('/').to_owned())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
	/// Series metadata is read from a local directory.
	Filesystem { root: String },
	#[cfg(feature = "s3")]
	S3(S3Config),
}

#[cfg(feature = "s3")]
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
	pub endpoint: String,
	pub bucket: String,
	pub region: Option<String>,
	#[serde(default)]
	pub endpoint_style: S3EndpointStyle,
	/// Maximum number of objects downloaded at the same time.
	pub concurrency: usize,
	pub credentials: Option<S3CredentialsConfig>,
}

#[cfg(feature = "s3")]
#[derive(Debug, Copy, Clone, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum S3EndpointStyle {
	#[default]
	Path,
	VHost,
}

/// Names of the environment variables holding the S3 secrets.
#[cfg(feature = "s3")]
#[derive(Debug, Clone, Deserialize)]
pub struct S3CredentialsConfig {
	pub access_key_env: String,
	pub secret_key_env: String,
}

#[cfg(feature = "s3")]
impl S3CredentialsConfig {
	pub fn resolve(&self) -> Result<aws_credential_types::Credentials, std::env::VarError> {
		let access_key = std::env::var(&self.access_key_env)?;
		let secret_key = std::env::var(&self.secret_key_env)?;
		Ok(aws_credential_types::Credentials::new(
			access_key,
			secret_key,
			None,
			None,
			"wado-imageids",
		))
	}
}
