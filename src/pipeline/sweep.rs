//! One-time migration of pre-existing downloads
//!
//! On the first run everything already sitting in the target is moved into
//! `old_download/` untouched by classification, so the organized layout only
//! ever contains files that arrived while the organizer was running.

use crate::error::Result;
use crate::pipeline::error::MoveError;
use crate::pipeline::mover::{relocate, unique_path};
use crate::pipeline::resolver::WatchTarget;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct SweepReport {
	/// False when the marker showed the sweep already ran
	pub performed: bool,
	/// Final paths inside `old_download/`
	pub moved: Vec<PathBuf>,
	pub failed: Vec<(PathBuf, MoveError)>,
}

/// Move every non-reserved entry directly under the root into `old_download/`.
///
/// Runs only while the marker file is absent and writes it afterwards, even if
/// individual entries failed; those stay where they are and are logged.
pub fn run_startup_sweep(target: &WatchTarget) -> Result<SweepReport> {
	let marker = target.marker_path();
	if marker.exists() {
		return Ok(SweepReport::default());
	}

	let old_download = target.old_download_dir();
	info!(folder = %old_download.display(), "First run detected, moving existing items");
	fs::create_dir_all(&old_download)?;

	let mut report = SweepReport { performed: true, ..Default::default() };
	for entry in fs::read_dir(target.root())? {
		let entry = match entry {
			Ok(entry) => entry,
			Err(e) => {
				warn!(error = %e, "Could not read directory entry during sweep");
				continue;
			}
		};

		let name = entry.file_name();
		if WatchTarget::is_reserved(&name.to_string_lossy()) {
			continue;
		}

		let source = entry.path();
		let destination = unique_path(&old_download, &name);
		match relocate(&source, &destination) {
			Ok(()) => {
				info!(file = %name.to_string_lossy(), action = "swept", "Moved to old_download/");
				report.moved.push(destination);
			}
			Err(e) => {
				warn!(file = %name.to_string_lossy(), error = %e, kind = e.kind(), "Failed to sweep");
				report.failed.push((source, e));
			}
		}
	}

	fs::write(&marker, Utc::now().to_rfc3339())?;
	info!(
		moved = report.moved.len(),
		failed = report.failed.len(),
		"Startup sweep complete"
	);
	Ok(report)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_sweep_moves_entries_and_writes_marker() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(temp_dir.path().join("a.txt"), b"a").unwrap();
		fs::create_dir(temp_dir.path().join("photos")).unwrap();
		fs::write(temp_dir.path().join("photos").join("b.jpg"), b"b").unwrap();
		let target = WatchTarget::open(temp_dir.path()).unwrap();

		let report = run_startup_sweep(&target).unwrap();

		assert!(report.performed);
		assert_eq!(report.moved.len(), 2);
		assert!(report.failed.is_empty());
		assert!(target.old_download_dir().join("a.txt").exists());
		assert!(target.old_download_dir().join("photos").join("b.jpg").exists());
		assert!(target.marker_path().exists());
	}

	#[test]
	fn test_sweep_runs_once() {
		let temp_dir = TempDir::new().unwrap();
		let target = WatchTarget::open(temp_dir.path()).unwrap();
		run_startup_sweep(&target).unwrap();

		fs::write(temp_dir.path().join("later.zip"), b"zip").unwrap();
		let report = run_startup_sweep(&target).unwrap();

		assert!(!report.performed);
		assert!(temp_dir.path().join("later.zip").exists());
	}

	#[test]
	fn test_sweep_disambiguates_against_existing_contents() {
		let temp_dir = TempDir::new().unwrap();
		let target = WatchTarget::open(temp_dir.path()).unwrap();
		fs::create_dir(target.old_download_dir()).unwrap();
		fs::write(target.old_download_dir().join("a.txt"), b"old").unwrap();
		fs::write(temp_dir.path().join("a.txt"), b"new").unwrap();

		run_startup_sweep(&target).unwrap();

		assert_eq!(fs::read(target.old_download_dir().join("a.txt")).unwrap(), b"old");
		assert_eq!(fs::read(target.old_download_dir().join("a (1).txt")).unwrap(), b"new");
	}

	#[test]
	fn test_sweep_leaves_state_directory() {
		let temp_dir = TempDir::new().unwrap();
		fs::create_dir(temp_dir.path().join(crate::config::STATE_DIR_NAME)).unwrap();
		let target = WatchTarget::open(temp_dir.path()).unwrap();

		run_startup_sweep(&target).unwrap();

		assert!(temp_dir.path().join(crate::config::STATE_DIR_NAME).is_dir());
		assert!(!target.old_download_dir().join(crate::config::STATE_DIR_NAME).exists());
	}
}
