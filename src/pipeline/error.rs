//! Errors raised while relocating a single settled file

use std::io;
use std::path::Path;
use thiserror::Error;

#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;
#[cfg(windows)]
const ERROR_LOCK_VIOLATION: i32 = 33;
#[cfg(windows)]
const ERROR_NOT_SAME_DEVICE: i32 = 17;

#[derive(Error, Debug)]
pub enum MoveError {
	#[error("Permission denied: {operation} on {path}")]
	PermissionDenied { operation: String, path: String },

	#[error("File is locked by another process: {path}")]
	FileLocked { path: String },

	#[error("Source vanished before it could be moved: {path}")]
	SourceVanished { path: String },

	#[error("Destination already exists and renaming is disabled: {path}")]
	DestinationCollision { path: String },

	#[error("Cross-volume copy incomplete for {path}: copied {copied} of {expected} bytes")]
	CrossVolumeCopyIncomplete { path: String, copied: u64, expected: u64 },

	#[error("Retry exhausted: {operation} after {attempts} attempts - {last_error}")]
	RetryExhausted { operation: String, attempts: u32, last_error: String },

	#[error("Move cancelled by shutdown: {path}")]
	Cancelled { path: String },

	#[error("IO error during {operation} on {path}: {source}")]
	Io {
		operation: String,
		path: String,
		#[source]
		source: io::Error,
	},
}

impl MoveError {
	/// Locks and permission races are transient; everything else is final.
	pub fn is_retryable(&self) -> bool {
		matches!(self, MoveError::FileLocked { .. } | MoveError::PermissionDenied { .. })
	}

	/// Stable label used in log fields
	pub fn kind(&self) -> &'static str {
		match self {
			MoveError::PermissionDenied { .. } => "permission_denied",
			MoveError::FileLocked { .. } => "file_locked",
			MoveError::SourceVanished { .. } => "source_vanished",
			MoveError::DestinationCollision { .. } => "destination_collision",
			MoveError::CrossVolumeCopyIncomplete { .. } => "cross_volume_copy_incomplete",
			MoveError::RetryExhausted { .. } => "retry_exhausted",
			MoveError::Cancelled { .. } => "cancelled",
			MoveError::Io { .. } => "io",
		}
	}

	/// Classify an I/O failure on `path` into the move error kinds.
	pub fn from_io(operation: &str, path: &Path, err: io::Error) -> Self {
		let path_str = path.to_string_lossy().to_string();

		if is_lock_error(&err) {
			return MoveError::FileLocked { path: path_str };
		}

		match err.kind() {
			io::ErrorKind::NotFound => MoveError::SourceVanished { path: path_str },
			io::ErrorKind::PermissionDenied => {
				MoveError::PermissionDenied { operation: operation.to_string(), path: path_str }
			}
			_ => MoveError::Io { operation: operation.to_string(), path: path_str, source: err },
		}
	}
}

/// True when another process holds the file open in a way that blocks us.
pub fn is_lock_error(err: &io::Error) -> bool {
	if err.kind() == io::ErrorKind::WouldBlock {
		return true;
	}

	#[cfg(unix)]
	{
		use nix::errno::Errno;
		if let Some(code) = err.raw_os_error() {
			return code == Errno::EBUSY as i32 || code == Errno::ETXTBSY as i32;
		}
	}

	#[cfg(windows)]
	{
		if let Some(code) = err.raw_os_error() {
			return code == ERROR_SHARING_VIOLATION || code == ERROR_LOCK_VIOLATION;
		}
	}

	false
}

/// True when a rename failed only because source and destination are on different volumes.
pub fn is_cross_device(err: &io::Error) -> bool {
	#[cfg(unix)]
	{
		use nix::errno::Errno;
		if err.raw_os_error() == Some(Errno::EXDEV as i32) {
			return true;
		}
	}

	#[cfg(windows)]
	{
		if err.raw_os_error() == Some(ERROR_NOT_SAME_DEVICE) {
			return true;
		}
	}

	let _ = err;
	false
}
