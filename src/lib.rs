pub mod config;
mod error;
mod events;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod shutdown;
pub mod watcher;

pub use config::{LoadedConfig, LogLevel, OrganizerConfig};
pub use error::{OrganizerError, Result};
pub use events::{EventType, FileSystemEvent};
pub use pipeline::{
	CandidateOutcome, CategoryClassifier, ConflictSafeMover, DestinationResolver, MoveError,
	MoveStatistics, Organizer, SettlingDetector, WatchTarget,
};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use watcher::{start, WatcherConfig, WatcherHandle};
