//! The organizing pipeline
//!
//! Candidates flow in one direction: the dispatcher admits a path, the settling
//! detector waits until it stops changing, the resolver picks a destination
//! using the classifier, and the mover relocates it.
//!
//! # Module Organization
//!
//! - [`classifier`] - Extension to category mapping
//! - [`settling`] - Settling detection and the candidate record
//! - [`resolver`] - Watch target, exclusions and destination layout
//! - [`mover`] - Conflict-safe relocation with retry
//! - [`stats`] - Per-category move counters
//! - [`sweep`] - First-run migration into `old_download/`
//! - [`dispatcher`] - Watch loop and candidate tasks
//! - [`error`] - Move failure kinds

pub mod classifier;
pub mod dispatcher;
pub mod error;
pub mod mover;
pub mod resolver;
pub mod settling;
pub mod stats;
pub mod sweep;

// Re-export main types for convenience
pub use classifier::CategoryClassifier;
pub use dispatcher::{CandidateOutcome, CandidateReport, Organizer, OrganizerContext};
pub use error::MoveError;
pub use mover::ConflictSafeMover;
pub use resolver::{Destination, DestinationResolver, ExclusionSet, Resolution, SkipReason, WatchTarget};
pub use settling::{CandidateFile, SettleOutcome, SettlingDetector};
pub use stats::MoveStatistics;
pub use sweep::{run_startup_sweep, SweepReport};
