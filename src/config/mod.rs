use std::path::{Path, PathBuf};
use std::time::Duration;

use log::Level;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::dispatch::{
	DEFAULT_CHUNK_SIZE, DEFAULT_PROGRESS_EVERY, DEFAULT_WORKER_COUNT, DispatchConfig,
	PartitionConfig,
};
use crate::dispatch::partition::DEFAULT_INDEX_PREFIX;
use crate::engine::EngineCredentials;
use crate::ingest::codec::DEFAULT_MAX_LINE_LEN;
use crate::ingest::scanner::DEFAULT_MAX_BLOCK;
use crate::ingest::{CodecConfig, ScanConfig};

pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:9200";

/// Runtime configuration for credindex.
///
/// Values are loaded from (in order): `/etc/credindex/credindex.json`, the
/// user config folder (optional), an explicit `--config` file, and
/// environment variables prefixed with `CRX` (e.g. `CRX_WORKER_COUNT`).
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	pub engine_url: String,
	pub engine_credentials: EngineCredentials,
	pub index_prefix: String,
	pub index_config_path: Option<PathBuf>,
	pub output_file: PathBuf,
	pub source_id: i64,
	pub max_block: usize,
	pub max_line_len: usize,
	pub chunk_size: usize,
	pub worker_count: usize,
	pub request_timeout_secs: u64,
	pub tolerate_errors: bool,
	pub progress_every: u64,
	pub reset_partitions: bool,
	pub dead_letter_path: Option<PathBuf>,
	pub log_level: Level,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			engine_url: DEFAULT_ENGINE_URL.to_string(),
			engine_credentials: EngineCredentials::None,
			index_prefix: DEFAULT_INDEX_PREFIX.to_string(),
			index_config_path: None,
			output_file: PathBuf::from("pwd.csv"),
			source_id: 2,
			max_block: DEFAULT_MAX_BLOCK,
			max_line_len: DEFAULT_MAX_LINE_LEN,
			chunk_size: DEFAULT_CHUNK_SIZE,
			worker_count: DEFAULT_WORKER_COUNT,
			request_timeout_secs: 480,
			tolerate_errors: true,
			progress_every: DEFAULT_PROGRESS_EVERY,
			reset_partitions: false,
			dead_letter_path: None,
			log_level: Level::Info,
		}
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error")]
	Config(#[from] config::ConfigError),

	#[error("invalid engine URL {url}")]
	EngineUrl {
		url: String,
		source: url::ParseError,
	},

	#[error("{field} must be at least 1")]
	Zero { field: &'static str },
}

impl Settings {
	pub fn engine_url(&self) -> Result<Url, SettingsError> {
		Url::parse(&self.engine_url).map_err(|source| SettingsError::EngineUrl {
			url: self.engine_url.clone(),
			source,
		})
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	/// Reject values no component can run with.
	pub fn validate(&self) -> Result<(), SettingsError> {
		self.engine_url()?;
		for (field, value) in [
			("max_block", self.max_block),
			("chunk_size", self.chunk_size),
			("worker_count", self.worker_count),
		] {
			if value == 0 {
				return Err(SettingsError::Zero { field });
			}
		}
		Ok(())
	}

	pub fn scan_config(&self) -> ScanConfig {
		ScanConfig {
			max_block: self.max_block,
		}
	}

	pub fn codec_config(&self) -> CodecConfig {
		CodecConfig {
			max_line_len: self.max_line_len,
		}
	}

	pub fn partition_config(&self) -> PartitionConfig {
		PartitionConfig {
			prefix: self.index_prefix.clone(),
			..PartitionConfig::default()
		}
	}

	pub fn dispatch_config(&self) -> DispatchConfig {
		DispatchConfig {
			chunk_size: self.chunk_size,
			worker_count: self.worker_count,
			request_timeout: self.request_timeout(),
			tolerate_errors: self.tolerate_errors,
			progress_every: self.progress_every,
			dead_letter_path: self.dead_letter_path.clone(),
		}
	}
}

pub fn load() -> Result<Settings, SettingsError> {
	load_with(None)
}

/// Like [`load`], with an extra (required) file layered over the standard
/// locations.
pub fn load_with(extra: Option<&Path>) -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/credindex/credindex.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("credindex").join("credindex.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}
	if let Some(path) = extra {
		builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
	}

	builder = builder.add_source(config::Environment::with_prefix("CRX").separator("__"));

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Flat CRX_* names take effect even where the nested mapping above
	// does not pick them up.
	override_string("CRX_ENGINE_URL", &mut s.engine_url);
	override_string("CRX_INDEX_PREFIX", &mut s.index_prefix);
	override_path("CRX_OUTPUT_FILE", &mut s.output_file);
	override_parsed("CRX_SOURCE_ID", &mut s.source_id);
	override_parsed("CRX_MAX_BLOCK", &mut s.max_block);
	override_parsed("CRX_MAX_LINE_LEN", &mut s.max_line_len);
	override_parsed("CRX_CHUNK_SIZE", &mut s.chunk_size);
	override_parsed("CRX_WORKER_COUNT", &mut s.worker_count);
	override_parsed("CRX_REQUEST_TIMEOUT_SECS", &mut s.request_timeout_secs);
	override_parsed("CRX_TOLERATE_ERRORS", &mut s.tolerate_errors);
	override_parsed("CRX_PROGRESS_EVERY", &mut s.progress_every);
	override_parsed("CRX_RESET_PARTITIONS", &mut s.reset_partitions);
	override_parsed("CRX_LOG_LEVEL", &mut s.log_level);
	if let Some(p) = non_empty_var("CRX_INDEX_CONFIG_PATH") {
		s.index_config_path = Some(PathBuf::from(p));
	}
	if let Some(p) = non_empty_var("CRX_DEAD_LETTER_PATH") {
		s.dead_letter_path = Some(PathBuf::from(p));
	}

	Ok(s)
}

fn non_empty_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn override_string(name: &str, slot: &mut String) {
	if let Some(v) = non_empty_var(name) {
		*slot = v;
	}
}

fn override_path(name: &str, slot: &mut PathBuf) {
	if let Some(v) = non_empty_var(name) {
		*slot = PathBuf::from(v);
	}
}

fn override_parsed<T: std::str::FromStr>(name: &str, slot: &mut T) {
	if let Some(parsed) = non_empty_var(name).and_then(|v| v.parse::<T>().ok()) {
		*slot = parsed;
	}
}
