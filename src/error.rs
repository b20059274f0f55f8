use thiserror::Error;

/// Core organizer error types
///
/// Errors raised while moving individual files live in
/// `crate::pipeline::MoveError`; this enum covers startup, configuration and the
/// notification subscription.
#[derive(Error, Debug)]
pub enum OrganizerError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Notify error: {0}")]
	Notify(#[from] notify::Error),

	#[error("JSON serialization error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Invalid path: {path}")]
	InvalidPath { path: String },

	#[error("Watch target is not writable: {path}")]
	TargetNotWritable { path: String },

	#[error("Configuration parse error in {path}: {reason}")]
	ConfigParse { path: String, reason: String },

	#[error("Filesystem notification subscription lost")]
	SubscriptionLost,

	#[error("Failed to send stop signal to watcher")]
	StopSignal,
}

impl OrganizerError {
	/// Errors that must terminate the process; anything else is logged and the
	/// organizer carries on
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			OrganizerError::InvalidPath { .. }
				| OrganizerError::TargetNotWritable { .. }
				| OrganizerError::Notify(_)
				| OrganizerError::SubscriptionLost
		)
	}

	/// Get error category for logging
	pub fn category(&self) -> &'static str {
		match self {
			OrganizerError::Io(_) => "io",
			OrganizerError::Notify(_) => "notify",
			OrganizerError::Json(_) => "serialization",
			OrganizerError::InvalidPath { .. } => "configuration",
			OrganizerError::TargetNotWritable { .. } => "permission",
			OrganizerError::ConfigParse { .. } => "configuration",
			OrganizerError::SubscriptionLost => "notify",
			OrganizerError::StopSignal => "shutdown",
		}
	}

	pub fn invalid_path(path: &std::path::Path) -> Self {
		OrganizerError::InvalidPath { path: path.to_string_lossy().to_string() }
	}

	pub fn config_parse(path: &std::path::Path, reason: impl ToString) -> Self {
		OrganizerError::ConfigParse {
			path: path.to_string_lossy().to_string(),
			reason: reason.to_string(),
		}
	}
}

pub type Result<T> = std::result::Result<T, OrganizerError>;
