//! Destination resolution
//!
//! Layout: `<target>/[<category>/][YYYY-MM-DD/]<file name>`.

use crate::config::{OrganizerConfig, STATE_DIR_NAME};
use crate::error::{OrganizerError, Result};
use crate::pipeline::classifier::CategoryClassifier;
use chrono::{DateTime, Local};
use regex::Regex;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Marker written after the first-run sweep
pub const MARKER_FILE_NAME: &str = ".organized";
/// Destination of the first-run sweep
pub const OLD_DOWNLOAD_DIR_NAME: &str = "old_download";

/// The monitored root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
	root: PathBuf,
}

impl WatchTarget {
	/// Validate that `path` is an existing, writable directory.
	pub fn open(path: &Path) -> Result<Self> {
		let root = path.canonicalize().map_err(|_| OrganizerError::invalid_path(path))?;
		if !root.is_dir() {
			return Err(OrganizerError::invalid_path(path));
		}

		let probe = root.join(format!(".organizer-write-probe-{}", std::process::id()));
		match OpenOptions::new().write(true).create_new(true).open(&probe) {
			Ok(file) => {
				drop(file);
				let _ = fs::remove_file(&probe);
			}
			Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
				let _ = fs::remove_file(&probe);
			}
			Err(_) => {
				return Err(OrganizerError::TargetNotWritable {
					path: root.to_string_lossy().to_string(),
				})
			}
		}

		Ok(Self { root })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn marker_path(&self) -> PathBuf {
		self.root.join(MARKER_FILE_NAME)
	}

	pub fn old_download_dir(&self) -> PathBuf {
		self.root.join(OLD_DOWNLOAD_DIR_NAME)
	}

	/// Names directly under the root that belong to the organizer itself.
	pub fn is_reserved(name: &str) -> bool {
		name == MARKER_FILE_NAME || name == STATE_DIR_NAME || name == OLD_DOWNLOAD_DIR_NAME
	}

	/// Whether `path` sits directly under the root.
	pub fn contains_directly(&self, path: &Path) -> bool {
		path.parent() == Some(self.root.as_path())
	}
}

/// Filenames and patterns that are never organized.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
	names: HashSet<String>,
	patterns: Vec<Regex>,
}

impl ExclusionSet {
	/// Build the set; patterns that fail to compile are dropped and reported.
	pub fn new(names: &[String], patterns: &[String]) -> (Self, Vec<String>) {
		let mut warnings = Vec::new();
		let compiled = patterns
			.iter()
			.filter_map(|pattern| match Regex::new(pattern) {
				Ok(regex) => Some(regex),
				Err(e) => {
					warnings.push(format!("ignoring invalid excluded pattern '{pattern}': {e}"));
					None
				}
			})
			.collect();

		(Self { names: names.iter().cloned().collect(), patterns: compiled }, warnings)
	}

	/// The rule matching `file_name`, if any.
	pub fn matching_rule(&self, file_name: &str) -> Option<String> {
		if self.names.contains(file_name) {
			return Some(file_name.to_string());
		}
		self.patterns
			.iter()
			.find(|pattern| pattern.is_match(file_name))
			.map(|pattern| pattern.as_str().to_string())
	}

	pub fn is_excluded(&self, file_name: &str) -> bool {
		self.matching_rule(file_name).is_some()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
	Excluded { rule: String },
	Reserved,
	/// Destination directory is the file's current directory
	AlreadyInPlace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
	pub dir: PathBuf,
	pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	Skip(SkipReason),
	Destination(Destination),
}

#[derive(Debug, Clone)]
pub struct DestinationResolver {
	target: WatchTarget,
	organize_by_date: bool,
	organize_by_type: bool,
	classifier: CategoryClassifier,
	exclusions: ExclusionSet,
}

impl DestinationResolver {
	pub fn new(
		target: WatchTarget, organize_by_date: bool, organize_by_type: bool,
		classifier: CategoryClassifier, exclusions: ExclusionSet,
	) -> Self {
		Self { target, organize_by_date, organize_by_type, classifier, exclusions }
	}

	/// Build a resolver from the configuration, returning pattern warnings.
	pub fn from_config(target: WatchTarget, config: &OrganizerConfig) -> (Self, Vec<String>) {
		let classifier = CategoryClassifier::new(&config.categories, &config.default_category);
		let (exclusions, warnings) =
			ExclusionSet::new(&config.excluded_files, &config.excluded_patterns);
		let resolver = Self::new(
			target,
			config.organize_by_date,
			config.organize_by_type,
			classifier,
			exclusions,
		);
		(resolver, warnings)
	}

	pub fn target(&self) -> &WatchTarget {
		&self.target
	}

	pub fn classifier(&self) -> &CategoryClassifier {
		&self.classifier
	}

	/// Terminal skip check run before any other processing.
	pub fn skip_reason(&self, candidate: &Path) -> Option<SkipReason> {
		let name = candidate.file_name()?.to_string_lossy();
		if WatchTarget::is_reserved(&name) {
			return Some(SkipReason::Reserved);
		}
		self.exclusions.matching_rule(&name).map(|rule| SkipReason::Excluded { rule })
	}

	/// Compute the destination without touching the filesystem.
	pub fn plan(&self, candidate: &Path, settle_time: DateTime<Local>) -> Resolution {
		if let Some(reason) = self.skip_reason(candidate) {
			return Resolution::Skip(reason);
		}

		let category = self.classifier.classify_path(candidate).to_string();
		let mut dir = self.target.root().to_path_buf();
		if self.organize_by_type {
			dir.push(&category);
		}
		if self.organize_by_date {
			dir.push(settle_time.format("%Y-%m-%d").to_string());
		}

		if candidate.parent() == Some(dir.as_path()) {
			return Resolution::Skip(SkipReason::AlreadyInPlace);
		}

		Resolution::Destination(Destination { dir, category })
	}

	/// Compute the destination and make sure its directories exist.
	///
	/// Directory creation is idempotent, so a concurrent creator (another task or
	/// another instance) is not an error.
	pub fn resolve(&self, candidate: &Path, settle_time: DateTime<Local>) -> io::Result<Resolution> {
		let resolution = self.plan(candidate, settle_time);
		if let Resolution::Destination(destination) = &resolution {
			fs::create_dir_all(&destination.dir)?;
		}
		Ok(resolution)
	}
}
