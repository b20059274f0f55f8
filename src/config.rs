//! Organizer configuration
//!
//! The configuration is a JSON object stored at `<target>/.organizer/config.json`.
//! It is written with defaults on first run and is meant to be edited by hand, so
//! loading is lenient: every recognized key is read on its own, a key with a bad
//! value falls back to its default, unknown keys are ignored and a file that is
//! not valid JSON at all yields the full default configuration. Each fallback is
//! reported as a warning string, because the configuration is loaded before the
//! logging subscriber (whose level it decides) exists.

use crate::error::{OrganizerError, Result};
use crate::retry::RetryConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the watch target holding configuration and logs
pub const STATE_DIR_NAME: &str = ".organizer";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const LOG_DIR_NAME: &str = "logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Trace,
	Debug,
	Info,
	Warn,
	Error,
}

impl LogLevel {
	pub fn as_filter(&self) -> &'static str {
		match self {
			LogLevel::Trace => "trace",
			LogLevel::Debug => "debug",
			LogLevel::Info => "info",
			LogLevel::Warn => "warn",
			LogLevel::Error => "error",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizerConfig {
	pub organize_by_date: bool,
	pub organize_by_type: bool,
	/// Interval between the two size samples of a settling check
	pub delay_seconds: f64,
	pub excluded_files: Vec<String>,
	/// Regular expressions matched against the file name
	pub excluded_patterns: Vec<String>,
	/// Category label -> extensions (without the dot)
	pub categories: BTreeMap<String, Vec<String>>,
	pub default_category: String,
	pub log_level: LogLevel,
	pub rename_duplicates: bool,
	pub max_retry_attempts: u32,
	pub retry_delay_seconds: f64,
	/// Factor applied to the retry delay after each failed attempt; 1.0 keeps it fixed
	pub retry_backoff_multiplier: f64,
	/// Upper bound for the grown retry delay
	pub max_retry_delay_seconds: f64,
	/// Suffixes of in-progress downloads, never queued for settling
	pub incomplete_extensions: Vec<String>,
	/// Settling rounds before a candidate is abandoned
	pub max_settle_checks: u32,
	pub max_concurrent_settles: usize,
}

fn strings(values: &[&str]) -> Vec<String> {
	values.iter().map(|value| value.to_string()).collect()
}

pub fn default_categories() -> BTreeMap<String, Vec<String>> {
	let table: [(&str, &[&str]); 10] = [
		("images", &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "tiff", "heic", "ico"]),
		("documents", &["pdf", "doc", "docx", "txt", "rtf", "odt", "md", "epub"]),
		("spreadsheets", &["xls", "xlsx", "csv", "ods"]),
		("presentations", &["ppt", "pptx", "odp", "key"]),
		("audio", &["mp3", "wav", "flac", "aac", "ogg", "m4a", "opus"]),
		("videos", &["mp4", "mkv", "avi", "mov", "wmv", "webm", "flv"]),
		("archives", &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"]),
		("code", &["py", "rs", "js", "ts", "java", "c", "cpp", "h", "json", "html", "css", "sh"]),
		("installers", &["exe", "msi", "dmg", "pkg", "deb", "rpm", "appimage", "apk"]),
		("fonts", &["ttf", "otf", "woff", "woff2"]),
	];

	table
		.iter()
		.map(|(label, extensions)| (label.to_string(), strings(extensions)))
		.collect()
}

impl Default for OrganizerConfig {
	fn default() -> Self {
		Self {
			organize_by_date: true,
			organize_by_type: false,
			delay_seconds: 5.0,
			excluded_files: strings(&[".DS_Store", "Thumbs.db", "desktop.ini"]),
			excluded_patterns: strings(&[r"^~\$", r"^\.~lock\..*#$"]),
			categories: default_categories(),
			default_category: "other".to_string(),
			log_level: LogLevel::Info,
			rename_duplicates: true,
			max_retry_attempts: 3,
			retry_delay_seconds: 2.0,
			retry_backoff_multiplier: 1.0,
			max_retry_delay_seconds: 60.0,
			incomplete_extensions: strings(&[
				"crdownload",
				"part",
				"partial",
				"download",
				"tmp",
				"opdownload",
			]),
			max_settle_checks: 120,
			max_concurrent_settles: 16,
		}
	}
}

/// Result of loading the configuration file
#[derive(Debug, Clone)]
pub struct LoadedConfig {
	pub config: OrganizerConfig,
	/// Fallbacks applied while reading the file
	pub warnings: Vec<String>,
	/// Whether the file was written during this load
	pub created: bool,
}

impl OrganizerConfig {
	pub fn state_dir(target: &Path) -> PathBuf {
		target.join(STATE_DIR_NAME)
	}

	pub fn config_path(target: &Path) -> PathBuf {
		Self::state_dir(target).join(CONFIG_FILE_NAME)
	}

	pub fn log_dir(target: &Path) -> PathBuf {
		Self::state_dir(target).join(LOG_DIR_NAME)
	}

	pub fn settle_delay(&self) -> Duration {
		seconds_or(self.delay_seconds, Self::default().delay_seconds)
	}

	pub fn retry_config(&self) -> RetryConfig {
		let defaults = Self::default();
		RetryConfig {
			max_retries: self.max_retry_attempts,
			initial_retry_delay: seconds_or(self.retry_delay_seconds, defaults.retry_delay_seconds),
			max_retry_delay: seconds_or(self.max_retry_delay_seconds, defaults.max_retry_delay_seconds),
			backoff_multiplier: if is_valid_multiplier(self.retry_backoff_multiplier) {
				self.retry_backoff_multiplier
			} else {
				defaults.retry_backoff_multiplier
			},
		}
	}

	/// Load the configuration for `target`, creating the file with defaults if
	/// it does not exist yet. Only I/O failures while creating the file are errors.
	pub fn load_or_create(target: &Path) -> Result<LoadedConfig> {
		let path = Self::config_path(target);

		if !path.exists() {
			let config = Self::default();
			config.save(target)?;
			return Ok(LoadedConfig { config, warnings: Vec::new(), created: true });
		}

		// Bytes, so a file with broken encoding is a parse failure rather than an I/O error
		let content = fs::read(&path)?;
		let (config, warnings) = match Self::from_json_slice(&content) {
			Ok(parsed) => parsed,
			Err(e) => {
				let err = OrganizerError::config_parse(&path, e);
				(Self::default(), vec![format!("{err}; using built-in defaults")])
			}
		};

		Ok(LoadedConfig { config, warnings, created: false })
	}

	/// Discard any persisted configuration and write fresh defaults.
	pub fn reset(target: &Path) -> Result<Self> {
		let path = Self::config_path(target);
		if path.exists() {
			fs::remove_file(&path)?;
		}

		let config = Self::default();
		config.save(target)?;
		Ok(config)
	}

	pub fn save(&self, target: &Path) -> Result<()> {
		fs::create_dir_all(Self::state_dir(target))?;
		let json = serde_json::to_string_pretty(self)?;
		fs::write(Self::config_path(target), json)?;
		Ok(())
	}

	pub fn from_json_str(content: &str) -> serde_json::Result<(Self, Vec<String>)> {
		Self::from_json_slice(content.as_bytes())
	}

	/// Parse a configuration document key by key.
	///
	/// Fails only when the input is not a UTF-8 JSON object.
	pub fn from_json_slice(content: &[u8]) -> serde_json::Result<(Self, Vec<String>)> {
		let value: Value = serde_json::from_slice(content)?;
		let object = match value {
			Value::Object(object) => object,
			other => {
				return Err(serde::de::Error::custom(format!(
					"expected a JSON object at the top level, found {}",
					json_type_name(&other)
				)))
			}
		};

		let mut warnings = Vec::new();
		let mut config = Self::default();
		let reader = KeyReader { object: &object };

		reader.read("organize_by_date", &mut config.organize_by_date, &mut warnings);
		reader.read("organize_by_type", &mut config.organize_by_type, &mut warnings);
		reader.read("delay_seconds", &mut config.delay_seconds, &mut warnings);
		reader.read("excluded_files", &mut config.excluded_files, &mut warnings);
		reader.read("excluded_patterns", &mut config.excluded_patterns, &mut warnings);
		reader.read("categories", &mut config.categories, &mut warnings);
		reader.read("default_category", &mut config.default_category, &mut warnings);
		reader.read("log_level", &mut config.log_level, &mut warnings);
		reader.read("rename_duplicates", &mut config.rename_duplicates, &mut warnings);
		reader.read("max_retry_attempts", &mut config.max_retry_attempts, &mut warnings);
		reader.read("retry_delay_seconds", &mut config.retry_delay_seconds, &mut warnings);
		reader.read("retry_backoff_multiplier", &mut config.retry_backoff_multiplier, &mut warnings);
		reader.read("max_retry_delay_seconds", &mut config.max_retry_delay_seconds, &mut warnings);
		reader.read("incomplete_extensions", &mut config.incomplete_extensions, &mut warnings);
		reader.read("max_settle_checks", &mut config.max_settle_checks, &mut warnings);
		reader.read("max_concurrent_settles", &mut config.max_concurrent_settles, &mut warnings);

		config.sanitize(&mut warnings);
		Ok((config, warnings))
	}

	/// Replace semantically invalid values with their defaults.
	pub fn sanitize(&mut self, warnings: &mut Vec<String>) {
		let defaults = Self::default();

		if !is_valid_seconds(self.delay_seconds) {
			warnings.push(format!(
				"delay_seconds must be a non-negative number of seconds in range, got {}; using {}",
				self.delay_seconds, defaults.delay_seconds
			));
			self.delay_seconds = defaults.delay_seconds;
		}

		if !is_valid_seconds(self.retry_delay_seconds) {
			warnings.push(format!(
				"retry_delay_seconds must be a non-negative number of seconds in range, got {}; using {}",
				self.retry_delay_seconds, defaults.retry_delay_seconds
			));
			self.retry_delay_seconds = defaults.retry_delay_seconds;
		}

		if !is_valid_seconds(self.max_retry_delay_seconds) {
			warnings.push(format!(
				"max_retry_delay_seconds must be a non-negative number of seconds in range, got {}; using {}",
				self.max_retry_delay_seconds, defaults.max_retry_delay_seconds
			));
			self.max_retry_delay_seconds = defaults.max_retry_delay_seconds;
		}

		if !is_valid_multiplier(self.retry_backoff_multiplier) {
			warnings.push(format!(
				"retry_backoff_multiplier must be a number of at least 1.0, got {}; using {}",
				self.retry_backoff_multiplier, defaults.retry_backoff_multiplier
			));
			self.retry_backoff_multiplier = defaults.retry_backoff_multiplier;
		}

		if self.max_settle_checks == 0 {
			warnings.push(format!(
				"max_settle_checks must be at least 1; using {}",
				defaults.max_settle_checks
			));
			self.max_settle_checks = defaults.max_settle_checks;
		}

		if self.max_concurrent_settles == 0 {
			warnings.push(format!(
				"max_concurrent_settles must be at least 1; using {}",
				defaults.max_concurrent_settles
			));
			self.max_concurrent_settles = defaults.max_concurrent_settles;
		}

		if self.default_category.trim().is_empty() {
			warnings.push(format!(
				"default_category must not be empty; using '{}'",
				defaults.default_category
			));
			self.default_category = defaults.default_category;
		}
	}
}

struct KeyReader<'a> {
	object: &'a Map<String, Value>,
}

impl KeyReader<'_> {
	fn read<T: DeserializeOwned>(&self, key: &str, slot: &mut T, warnings: &mut Vec<String>) {
		let Some(raw) = self.object.get(key) else {
			return;
		};

		match serde_json::from_value::<T>(raw.clone()) {
			Ok(value) => *slot = value,
			Err(e) => warnings.push(format!("invalid value for '{key}' ({e}); using the default")),
		}
	}
}

/// Whether `value` seconds can be represented as a `Duration`.
pub fn is_valid_seconds(value: f64) -> bool {
	Duration::try_from_secs_f64(value).is_ok()
}

fn is_valid_multiplier(value: f64) -> bool {
	value.is_finite() && value >= 1.0
}

fn seconds_or(value: f64, fallback: f64) -> Duration {
	Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

fn json_type_name(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "a boolean",
		Value::Number(_) => "a number",
		Value::String(_) => "a string",
		Value::Array(_) => "an array",
		Value::Object(_) => "an object",
	}
}
