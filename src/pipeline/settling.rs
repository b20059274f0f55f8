//! Settling detection
//!
//! A browser writing a download creates the file long before the last byte lands.
//! Nothing tells us when it is done, so a candidate is only considered finished
//! when its size is unchanged across a delay and no other process holds it open
//! exclusively. Paths carrying an in-progress suffix (`.crdownload`, `.part`, ...)
//! are ignored outright: the browser renames them when finished, and the rename
//! arrives as a fresh candidate under the final name.

use crate::config::OrganizerConfig;
use crate::shutdown::Shutdown;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// A path seen by the watch loop that has not been confirmed finished yet.
#[derive(Debug, Clone)]
pub struct CandidateFile {
	pub id: Uuid,
	pub path: PathBuf,
	pub discovered_at: DateTime<Utc>,
	/// Completed size comparisons
	pub size_checks: u32,
}

impl CandidateFile {
	pub fn new(path: PathBuf) -> Self {
		Self { id: Uuid::new_v4(), path, discovered_at: Utc::now(), size_checks: 0 }
	}

	pub fn file_name(&self) -> String {
		self.path
			.file_name()
			.map(|name| name.to_string_lossy().to_string())
			.unwrap_or_else(|| self.path.to_string_lossy().to_string())
	}
}

/// Result of a single settling round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleCheck {
	Settled,
	Growing { previous: u64, current: u64 },
	Locked,
	Vanished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
	/// Deleted or renamed away before settling
	Vanished,
	/// Still changing after the configured number of rounds
	NeverSettled { checks: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
	Settled { size: u64 },
	Abandoned(AbandonReason),
	Cancelled,
}

#[derive(Debug, Clone)]
pub struct SettleConfig {
	/// Wait between the two size samples of a round
	pub delay: Duration,
	pub max_checks: u32,
	/// Lowercase extensions without the dot
	pub incomplete_extensions: HashSet<String>,
}

impl SettleConfig {
	pub fn from_config(config: &OrganizerConfig) -> Self {
		Self {
			delay: config.settle_delay(),
			max_checks: config.max_settle_checks,
			incomplete_extensions: config
				.incomplete_extensions
				.iter()
				.map(|extension| extension.trim_start_matches('.').to_lowercase())
				.collect(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct SettlingDetector {
	config: SettleConfig,
}

impl SettlingDetector {
	pub fn new(config: SettleConfig) -> Self {
		Self { config }
	}

	pub fn config(&self) -> &SettleConfig {
		&self.config
	}

	/// True for in-progress download markers, which are never queued.
	pub fn is_incomplete(&self, path: &Path) -> bool {
		path.extension()
			.map(|extension| {
				self.config
					.incomplete_extensions
					.contains(&extension.to_string_lossy().to_lowercase())
			})
			.unwrap_or(false)
	}

	/// Decide one round from two size samples and the exclusive-open probe.
	pub fn judge(previous: Option<u64>, current: Option<u64>, exclusive: bool) -> SettleCheck {
		match (previous, current) {
			(Some(previous), Some(current)) if previous != current => {
				SettleCheck::Growing { previous, current }
			}
			(Some(_), Some(_)) if !exclusive => SettleCheck::Locked,
			(Some(_), Some(_)) => SettleCheck::Settled,
			_ => SettleCheck::Vanished,
		}
	}

	/// Run a single settling round: sample, wait, sample, probe.
	///
	/// Returns `false` for anything but a settled file, including a stop request
	/// during the wait.
	pub async fn is_settled(&self, path: &Path, shutdown: &mut Shutdown) -> bool {
		let first = file_size(path);
		if first.is_none() {
			return false;
		}
		if !shutdown.sleep(self.config.delay).await {
			return false;
		}
		self.evaluate(first, path) == SettleCheck::Settled
	}

	/// Re-arm settling rounds until the candidate settles, disappears, runs out
	/// of rounds or the process is asked to stop.
	pub async fn wait_until_settled(
		&self, candidate: &mut CandidateFile, shutdown: &mut Shutdown,
	) -> SettleOutcome {
		let Some(mut previous) = file_size(&candidate.path) else {
			debug!(file = %candidate.file_name(), "Candidate vanished before the first sample");
			return SettleOutcome::Abandoned(AbandonReason::Vanished);
		};

		loop {
			if candidate.size_checks >= self.config.max_checks {
				warn!(
					file = %candidate.file_name(),
					checks = candidate.size_checks,
					"File never settled, leaving it in place"
				);
				return SettleOutcome::Abandoned(AbandonReason::NeverSettled {
					checks: candidate.size_checks,
				});
			}

			if !shutdown.sleep(self.config.delay).await {
				debug!(file = %candidate.file_name(), "Settling cancelled");
				return SettleOutcome::Cancelled;
			}
			candidate.size_checks += 1;

			match self.evaluate(Some(previous), &candidate.path) {
				SettleCheck::Settled => {
					debug!(
						file = %candidate.file_name(),
						size = previous,
						checks = candidate.size_checks,
						"File settled"
					);
					return SettleOutcome::Settled { size: previous };
				}
				SettleCheck::Vanished => {
					// Usually a browser renaming its temp file; the new name is its own candidate
					debug!(file = %candidate.file_name(), "Candidate vanished while settling");
					return SettleOutcome::Abandoned(AbandonReason::Vanished);
				}
				SettleCheck::Growing { current, .. } => {
					debug!(file = %candidate.file_name(), previous, current, "File still growing");
					previous = current;
				}
				SettleCheck::Locked => {
					debug!(file = %candidate.file_name(), "File held open by another process");
				}
			}
		}
	}

	fn evaluate(&self, previous: Option<u64>, path: &Path) -> SettleCheck {
		let current = file_size(path);
		if previous.is_none() || previous != current {
			return Self::judge(previous, current, false);
		}

		match probe_exclusive(path) {
			Ok(exclusive) => Self::judge(previous, current, exclusive),
			Err(e) if e.kind() == io::ErrorKind::NotFound => SettleCheck::Vanished,
			Err(e) => {
				debug!(path = %path.display(), error = %e, "Exclusive probe failed");
				SettleCheck::Locked
			}
		}
	}
}

/// Size of a regular file, `None` if it is gone or no longer a file.
pub fn file_size(path: &Path) -> Option<u64> {
	std::fs::metadata(path).ok().filter(|metadata| metadata.is_file()).map(|metadata| metadata.len())
}

/// Check that no other process holds the file exclusively.
///
/// Opens the file, takes a non-blocking exclusive lock and releases it at once;
/// no content is read.
#[cfg(unix)]
#[allow(deprecated)]
pub fn probe_exclusive(path: &Path) -> io::Result<bool> {
	use nix::errno::Errno;
	use nix::fcntl::{flock, FlockArg};
	use std::os::unix::io::AsRawFd;

	let file = OpenOptions::new().read(true).open(path)?;
	let fd = file.as_raw_fd();

	match flock(fd, FlockArg::LockExclusiveNonblock) {
		Ok(()) => {
			let _ = flock(fd, FlockArg::Unlock);
			Ok(true)
		}
		Err(e) if e == Errno::EWOULDBLOCK => Ok(false),
		Err(e) => Err(io::Error::from(e)),
	}
}

#[cfg(windows)]
pub fn probe_exclusive(path: &Path) -> io::Result<bool> {
	use crate::pipeline::error::is_lock_error;
	use std::os::windows::fs::OpenOptionsExt;

	// share_mode(0) fails with a sharing violation while anyone else has it open
	match OpenOptions::new().read(true).share_mode(0).open(path) {
		Ok(_) => Ok(true),
		Err(e) if is_lock_error(&e) => Ok(false),
		Err(e) => Err(e),
	}
}

#[cfg(not(any(unix, windows)))]
pub fn probe_exclusive(path: &Path) -> io::Result<bool> {
	OpenOptions::new().read(true).open(path).map(|_| true)
}
