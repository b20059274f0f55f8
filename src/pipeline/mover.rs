//! Conflict-safe relocation of settled files
//!
//! A move is a same-volume rename when possible. Across volumes the file is
//! copied, the copy is checked against the source size, and only then is the
//! source deleted. Name collisions are resolved by appending ` (n)` before the
//! extension, or reported when renaming duplicates is turned off.

use crate::config::OrganizerConfig;
use crate::pipeline::error::{is_cross_device, MoveError};
use crate::pipeline::resolver::Destination;
use crate::pipeline::settling::probe_exclusive;
use crate::pipeline::stats::MoveStatistics;
use crate::retry::RetryManager;
use crate::shutdown::Shutdown;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ConflictSafeMover {
	rename_duplicates: bool,
	retry: RetryManager,
	stats: MoveStatistics,
}

impl ConflictSafeMover {
	pub fn new(rename_duplicates: bool, retry: RetryManager, stats: MoveStatistics) -> Self {
		Self { rename_duplicates, retry, stats }
	}

	pub fn from_config(config: &OrganizerConfig, stats: MoveStatistics) -> Self {
		Self::new(config.rename_duplicates, RetryManager::new(config.retry_config()), stats)
	}

	pub fn stats(&self) -> &MoveStatistics {
		&self.stats
	}

	/// Move `source` into `destination.dir`, returning the path actually used.
	///
	/// Locked files and permission races are retried; on any error the source is
	/// left where it was. The category counter is bumped only on success.
	pub async fn move_file(
		&self, source: &Path, destination: &Destination, shutdown: &mut Shutdown,
	) -> Result<PathBuf, MoveError> {
		let operation = format!("move {}", source.display());
		let final_path = self
			.retry
			.execute(&operation, shutdown, || async { self.attempt(source, &destination.dir) })
			.await?;

		self.stats.record_move(&destination.category).await;
		Ok(final_path)
	}

	fn attempt(&self, source: &Path, destination_dir: &Path) -> Result<PathBuf, MoveError> {
		let file_name = source
			.file_name()
			.ok_or_else(|| MoveError::SourceVanished { path: source.to_string_lossy().to_string() })?;

		// Last lock check right before the move; a writer may have reopened the file
		match probe_exclusive(source) {
			Ok(true) => {}
			Ok(false) => return Err(MoveError::FileLocked { path: source.to_string_lossy().to_string() }),
			Err(e) => return Err(MoveError::from_io("open", source, e)),
		}

		let target = target_path(destination_dir, file_name, self.rename_duplicates)?;
		relocate(source, &target)?;
		debug!(from = %source.display(), to = %target.display(), "Relocated file");
		Ok(target)
	}
}

/// Pick the destination path for `file_name` inside `dir`.
pub fn target_path(dir: &Path, file_name: &OsStr, rename_duplicates: bool) -> Result<PathBuf, MoveError> {
	let direct = dir.join(file_name);
	if !path_taken(&direct) {
		return Ok(direct);
	}
	if !rename_duplicates {
		return Err(MoveError::DestinationCollision { path: direct.to_string_lossy().to_string() });
	}
	Ok(unique_path(dir, file_name))
}

/// First free `name (n).ext` in `dir`, starting at 1.
pub fn unique_path(dir: &Path, file_name: &OsStr) -> PathBuf {
	let name = file_name.to_string_lossy();
	let mut counter = 1u32;
	loop {
		let candidate = dir.join(disambiguated_name(&name, counter));
		if !path_taken(&candidate) {
			return candidate;
		}
		counter += 1;
	}
}

/// `report.pdf` + 2 → `report (2).pdf`; dotfiles and extensionless names get the
/// suffix at the end.
pub fn disambiguated_name(file_name: &str, counter: u32) -> String {
	let path = Path::new(file_name);
	match (path.file_stem(), path.extension()) {
		(Some(stem), Some(extension)) => format!(
			"{} ({}).{}",
			stem.to_string_lossy(),
			counter,
			extension.to_string_lossy()
		),
		_ => format!("{file_name} ({counter})"),
	}
}

fn path_taken(path: &Path) -> bool {
	fs::symlink_metadata(path).is_ok()
}

/// Rename `source` to `target`, falling back to copy-then-delete across volumes.
pub fn relocate(source: &Path, target: &Path) -> Result<(), MoveError> {
	match fs::rename(source, target) {
		Ok(()) => Ok(()),
		Err(e) if is_cross_device(&e) && source.is_file() => {
			debug!(from = %source.display(), to = %target.display(), "Cross-volume move, copying");
			copy_then_delete(source, target)
		}
		Err(e) => Err(MoveError::from_io("rename", source, e)),
	}
}

/// Copy `source` to a new file at `target`, verify the size and delete the source.
///
/// A failed delete after a verified copy is only logged: the data exists twice
/// rather than not at all.
pub(crate) fn copy_then_delete(source: &Path, target: &Path) -> Result<(), MoveError> {
	let metadata = fs::metadata(source).map_err(|e| MoveError::from_io("stat", source, e))?;
	let expected = metadata.len();

	let mut reader = File::open(source).map_err(|e| MoveError::from_io("open", source, e))?;
	let mut writer = match OpenOptions::new().write(true).create_new(true).open(target) {
		Ok(file) => file,
		Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
			return Err(MoveError::DestinationCollision { path: target.to_string_lossy().to_string() })
		}
		Err(e) => return Err(MoveError::from_io("create", target, e)),
	};

	let copied = match io::copy(&mut reader, &mut writer).and_then(|copied| {
		writer.sync_all()?;
		Ok(copied)
	}) {
		Ok(copied) => copied,
		Err(e) => {
			drop(writer);
			let _ = fs::remove_file(target);
			return Err(MoveError::from_io("copy", source, e));
		}
	};
	drop(writer);

	let written = fs::metadata(target).map(|m| m.len()).unwrap_or(0);
	if copied != expected || written != expected {
		let _ = fs::remove_file(target);
		return Err(MoveError::CrossVolumeCopyIncomplete {
			path: source.to_string_lossy().to_string(),
			copied: written,
			expected,
		});
	}

	if let Err(e) = fs::set_permissions(target, metadata.permissions()) {
		debug!(path = %target.display(), error = %e, "Could not copy permissions");
	}

	drop(reader);
	if let Err(e) = fs::remove_file(source) {
		warn!(
			file = %source.display(),
			copy = %target.display(),
			error = %e,
			"Copied file but could not delete the source; leaving both"
		);
	}
	Ok(())
}
