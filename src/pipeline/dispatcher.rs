//! Watch loop and candidate dispatch
//!
//! The dispatcher owns the notification subscription. Every qualifying event
//! becomes a [`CandidateFile`] handled by its own task: wait for a concurrency
//! permit, settle, resolve, move. Task results flow back through a `JoinSet`,
//! which is also how the dispatcher knows a path is no longer in flight.

use crate::config::OrganizerConfig;
use crate::error::{OrganizerError, Result};
use crate::events::FileSystemEvent;
use crate::pipeline::error::MoveError;
use crate::pipeline::mover::ConflictSafeMover;
use crate::pipeline::resolver::{DestinationResolver, Resolution, SkipReason, WatchTarget};
use crate::pipeline::settling::{AbandonReason, CandidateFile, SettleConfig, SettleOutcome, SettlingDetector};
use crate::pipeline::stats::MoveStatistics;
use crate::pipeline::sweep::run_startup_sweep;
use crate::shutdown::Shutdown;
use crate::watcher::{self, WatcherConfig};
use chrono::Local;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Everything a candidate task needs, shared read-only across tasks.
#[derive(Debug)]
pub struct OrganizerContext {
	pub config: OrganizerConfig,
	pub resolver: DestinationResolver,
	pub detector: SettlingDetector,
	pub mover: ConflictSafeMover,
	pub stats: MoveStatistics,
	permits: Arc<Semaphore>,
}

impl OrganizerContext {
	/// Build the pipeline for `target`; the returned warnings come from
	/// exclusion patterns that failed to compile.
	pub fn new(target: WatchTarget, config: OrganizerConfig) -> (Self, Vec<String>) {
		let (resolver, warnings) = DestinationResolver::from_config(target, &config);
		let stats = MoveStatistics::new();
		let context = Self {
			resolver,
			detector: SettlingDetector::new(SettleConfig::from_config(&config)),
			mover: ConflictSafeMover::from_config(&config, stats.clone()),
			stats,
			permits: Arc::new(Semaphore::new(config.max_concurrent_settles.max(1))),
			config,
		};
		(context, warnings)
	}

	pub fn target(&self) -> &WatchTarget {
		self.resolver.target()
	}
}

#[derive(Debug)]
pub enum CandidateOutcome {
	Moved { destination: PathBuf, category: String },
	Skipped(SkipReason),
	Abandoned(AbandonReason),
	Failed(MoveError),
	/// Stop requested before the move began; the file was left in place
	Cancelled,
}

#[derive(Debug)]
pub struct CandidateReport {
	pub path: PathBuf,
	pub outcome: CandidateOutcome,
}

/// Drive one candidate through settle → resolve → move.
pub async fn process_candidate(
	context: &OrganizerContext, mut candidate: CandidateFile, mut shutdown: Shutdown,
) -> CandidateReport {
	let outcome = run_candidate(context, &mut candidate, &mut shutdown).await;
	CandidateReport { path: candidate.path, outcome }
}

async fn run_candidate(
	context: &OrganizerContext, candidate: &mut CandidateFile, shutdown: &mut Shutdown,
) -> CandidateOutcome {
	if let Some(reason) = context.resolver.skip_reason(&candidate.path) {
		return CandidateOutcome::Skipped(reason);
	}

	let permits = context.permits.clone();
	let _permit = tokio::select! {
		permit = permits.acquire_owned() => match permit {
			Ok(permit) => permit,
			Err(_) => return CandidateOutcome::Cancelled,
		},
		_ = shutdown.cancelled() => return CandidateOutcome::Cancelled,
	};

	match context.detector.wait_until_settled(candidate, shutdown).await {
		SettleOutcome::Settled { .. } => {}
		SettleOutcome::Abandoned(reason) => return CandidateOutcome::Abandoned(reason),
		SettleOutcome::Cancelled => return CandidateOutcome::Cancelled,
	}

	if shutdown.is_triggered() {
		return CandidateOutcome::Cancelled;
	}

	let destination = match context.resolver.resolve(&candidate.path, Local::now()) {
		Ok(Resolution::Destination(destination)) => destination,
		Ok(Resolution::Skip(reason)) => return CandidateOutcome::Skipped(reason),
		Err(e) => {
			return CandidateOutcome::Failed(MoveError::from_io(
				"create destination",
				&candidate.path,
				e,
			))
		}
	};

	match context.mover.move_file(&candidate.path, &destination, shutdown).await {
		Ok(final_path) => {
			CandidateOutcome::Moved { destination: final_path, category: destination.category }
		}
		// Renamed or deleted between settling and moving; a new event follows if renamed
		Err(MoveError::SourceVanished { .. }) => CandidateOutcome::Abandoned(AbandonReason::Vanished),
		Err(MoveError::Cancelled { .. }) => CandidateOutcome::Cancelled,
		Err(e) => CandidateOutcome::Failed(e),
	}
}

/// Paths with a running candidate task, keyed by task so a task that dies
/// without a report still releases its path.
#[derive(Debug, Default)]
struct InFlight {
	paths: HashSet<PathBuf>,
	tasks: HashMap<Id, PathBuf>,
}

impl InFlight {
	fn contains(&self, path: &Path) -> bool {
		self.paths.contains(path)
	}

	fn track(&mut self, id: Id, path: PathBuf) {
		self.paths.insert(path.clone());
		self.tasks.insert(id, path);
	}

	fn finish(&mut self, id: Id) -> Option<PathBuf> {
		let path = self.tasks.remove(&id)?;
		self.paths.remove(&path);
		Some(path)
	}

	fn len(&self) -> usize {
		self.tasks.len()
	}
}

/// The watch loop.
pub struct Organizer {
	context: Arc<OrganizerContext>,
}

impl Organizer {
	pub fn new(context: OrganizerContext) -> Self {
		Self { context: Arc::new(context) }
	}

	pub fn from_config(target: WatchTarget, config: OrganizerConfig) -> (Self, Vec<String>) {
		let (context, warnings) = OrganizerContext::new(target, config);
		(Self::new(context), warnings)
	}

	pub fn context(&self) -> &Arc<OrganizerContext> {
		&self.context
	}

	pub fn stats(&self) -> MoveStatistics {
		self.context.stats.clone()
	}

	/// Sweep on first run, then organize new arrivals until `shutdown` fires.
	///
	/// Returns `SubscriptionLost` if the notification stream ends on its own,
	/// for instance because the target was removed. A failed sweep is logged
	/// and does not stop the watch.
	pub async fn run(&self, shutdown: Shutdown) -> Result<()> {
		// A sweep that cannot run leaves the files where they are; new arrivals are still handled
		if let Err(e) = run_startup_sweep(self.context.target()) {
			if e.is_fatal() {
				return Err(e);
			}
			warn!(category = e.category(), error = %e, "Startup sweep failed, continuing");
		}

		let root = self.context.target().root().to_path_buf();
		let (handle, mut events) = watcher::start(WatcherConfig::new(root.clone()))?;
		info!("Watching {:?} for new downloads", root);

		let mut stop = shutdown.clone();
		let mut tasks: JoinSet<CandidateReport> = JoinSet::new();
		let mut in_flight = InFlight::default();

		let result = loop {
			tokio::select! {
				_ = stop.cancelled() => {
					info!("Stop requested, abandoning {} pending candidates", in_flight.len());
					break Ok(());
				}
				event = events.recv() => match event {
					Some(event) => self.dispatch(event, &mut tasks, &mut in_flight, &shutdown),
					None => {
						error!("Notification stream for {:?} ended", root);
						break Err(OrganizerError::SubscriptionLost);
					}
				},
				Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
					complete(joined, &mut in_flight);
				}
			}
		};

		if let Err(e) = handle.stop().await {
			warn!("Failed to stop watcher cleanly: {}", e);
		}

		if result.is_err() {
			// Nobody will trigger the stop signal these tasks are waiting on
			tasks.abort_all();
		}
		while let Some(joined) = tasks.join_next_with_id().await {
			complete(joined, &mut in_flight);
		}

		self.log_summary().await;
		result
	}

	/// Admit an event as a candidate, or drop it.
	fn dispatch(
		&self, event: FileSystemEvent, tasks: &mut JoinSet<CandidateReport>,
		in_flight: &mut InFlight, shutdown: &Shutdown,
	) {
		let Some(path) = self.admit(&event) else {
			return;
		};

		if in_flight.contains(&path) {
			debug!("Already tracking {:?}, dropping duplicate notification", path);
			return;
		}

		debug!(file = %path.display(), event = ?event.event_type, "New candidate");
		let context = self.context.clone();
		let shutdown = shutdown.clone();
		let candidate = CandidateFile::new(path.clone());
		let handle = tasks.spawn(async move { process_candidate(&context, candidate, shutdown).await });
		in_flight.track(handle.id(), path);
	}

	/// The path an event should start a candidate for, if any.
	pub fn admit(&self, event: &FileSystemEvent) -> Option<PathBuf> {
		if !event.announces_file() || !self.context.target().contains_directly(&event.path) {
			return None;
		}

		if let Some(reason) = self.context.resolver.skip_reason(&event.path) {
			debug!("Ignoring {:?}: {:?}", event.path, reason);
			return None;
		}

		if self.context.detector.is_incomplete(&event.path) {
			debug!("Ignoring in-progress download {:?}", event.path);
			return None;
		}

		if !event.path.is_file() {
			return None;
		}

		Some(event.path.clone())
	}

	async fn log_summary(&self) {
		let totals = self.context.stats.snapshot().await;
		if totals.is_empty() {
			info!("No files were organized during this run");
			return;
		}
		for (category, count) in &totals {
			info!(category = %category, count, "Files organized");
		}
		info!(total = totals.values().sum::<u64>(), "Organizer stopped");
	}
}

fn complete(joined: std::result::Result<(Id, CandidateReport), JoinError>, in_flight: &mut InFlight) {
	match joined {
		Ok((id, report)) => {
			in_flight.finish(id);
			log_report(&report);
		}
		Err(e) => {
			let path = in_flight.finish(e.id());
			if !e.is_cancelled() {
				error!(file = ?path, "Candidate task panicked: {}", e);
			}
		}
	}
}

fn log_report(report: &CandidateReport) {
	let name = display_name(&report.path);
	match &report.outcome {
		CandidateOutcome::Moved { destination, category } => {
			info!(file = %name, category = %category, to = %destination.display(), action = "moved", "Moved");
		}
		CandidateOutcome::Skipped(reason) => {
			debug!(file = %name, reason = ?reason, action = "skipped", "Skipped");
		}
		CandidateOutcome::Abandoned(AbandonReason::Vanished) => {
			debug!(file = %name, action = "abandoned", "Disappeared before it could be moved");
		}
		CandidateOutcome::Abandoned(AbandonReason::NeverSettled { checks }) => {
			// The detector already warned when it gave up
			debug!(file = %name, checks, action = "abandoned", "Never settled");
		}
		CandidateOutcome::Failed(e) => {
			warn!(file = %name, kind = e.kind(), error = %e, action = "failed", "Left in place");
		}
		CandidateOutcome::Cancelled => {
			debug!(file = %name, action = "cancelled", "Left in place on stop");
		}
	}
}

fn display_name(path: &Path) -> String {
	path.file_name()
		.map(|name| name.to_string_lossy().to_string())
		.unwrap_or_else(|| path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::events::EventType;
	use crate::shutdown;
	use std::fs;
	use tempfile::TempDir;

	fn quick_config() -> OrganizerConfig {
		let mut config = OrganizerConfig::default();
		config.delay_seconds = 0.02;
		config.retry_delay_seconds = 0.01;
		config.max_settle_checks = 10;
		config
	}

	fn organizer(temp_dir: &TempDir, config: OrganizerConfig) -> Organizer {
		let target = WatchTarget::open(temp_dir.path()).unwrap();
		let (organizer, warnings) = Organizer::from_config(target, config);
		assert!(warnings.is_empty());
		organizer
	}

	fn event(event_type: EventType, path: PathBuf) -> FileSystemEvent {
		let is_directory = path.is_dir();
		FileSystemEvent::new(event_type, path, is_directory, None)
	}

	#[test]
	fn test_admit_filters_events() {
		let temp_dir = TempDir::new().unwrap();
		let organizer = organizer(&temp_dir, quick_config());
		let root = organizer.context().target().root().to_path_buf();

		let report = root.join("report.pdf");
		fs::write(&report, b"pdf").unwrap();
		let partial = root.join("movie.mkv.crdownload");
		fs::write(&partial, b"..").unwrap();
		let excluded = root.join("desktop.ini");
		fs::write(&excluded, b"ini").unwrap();
		let folder = root.join("folder");
		fs::create_dir(&folder).unwrap();
		let nested = folder.join("inner.txt");
		fs::write(&nested, b"x").unwrap();

		assert_eq!(organizer.admit(&event(EventType::Create, report.clone())), Some(report.clone()));
		assert_eq!(organizer.admit(&event(EventType::RenameTo, report.clone())), Some(report.clone()));
		assert_eq!(organizer.admit(&event(EventType::Write, report.clone())), None);
		assert_eq!(organizer.admit(&event(EventType::Create, partial)), None);
		assert_eq!(organizer.admit(&event(EventType::Create, excluded)), None);
		assert_eq!(organizer.admit(&event(EventType::Create, folder)), None);
		assert_eq!(organizer.admit(&event(EventType::Create, nested)), None);
		assert_eq!(organizer.admit(&event(EventType::Create, root.join("gone.zip"))), None);
	}

	#[test]
	fn test_admit_undirected_rename() {
		use notify::event::{EventKind, ModifyKind, RenameMode};
		use notify::Event;

		let temp_dir = TempDir::new().unwrap();
		let organizer = organizer(&temp_dir, quick_config());
		let root = organizer.context().target().root().to_path_buf();
		let finished = root.join("report.pdf");
		fs::write(&finished, b"%PDF").unwrap();

		let rename = |path: PathBuf| {
			Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any))).add_path(path)
		};
		let admitted: Vec<PathBuf> = [rename(root.join("report.pdf.crdownload")), rename(finished.clone())]
			.into_iter()
			.flat_map(watcher::convert_notify_event)
			.filter_map(|event| organizer.admit(&event))
			.collect();

		assert_eq!(admitted, vec![finished]);
	}

	#[tokio::test]
	async fn test_settled_file_is_moved_into_dated_folder() {
		let temp_dir = TempDir::new().unwrap();
		let organizer = organizer(&temp_dir, quick_config());
		let root = organizer.context().target().root().to_path_buf();
		let source = root.join("holiday.jpg");
		fs::write(&source, b"jpeg").unwrap();

		let report = process_candidate(
			organizer.context(),
			CandidateFile::new(source.clone()),
			Shutdown::never(),
		)
		.await;

		let expected = root.join(Local::now().format("%Y-%m-%d").to_string()).join("holiday.jpg");
		match report.outcome {
			CandidateOutcome::Moved { destination, category } => {
				assert_eq!(destination, expected);
				assert_eq!(category, "images");
			}
			other => panic!("Expected Moved, got {other:?}"),
		}
		assert!(!source.exists());
		assert_eq!(organizer.stats().count("images").await, 1);
	}

	#[tokio::test]
	async fn test_passthrough_when_both_flags_off() {
		let temp_dir = TempDir::new().unwrap();
		let mut config = quick_config();
		config.organize_by_date = false;
		config.organize_by_type = false;
		let organizer = organizer(&temp_dir, config);
		let source = organizer.context().target().root().join("notes.txt");
		fs::write(&source, b"notes").unwrap();

		let report =
			process_candidate(organizer.context(), CandidateFile::new(source.clone()), Shutdown::never())
				.await;

		assert!(matches!(report.outcome, CandidateOutcome::Skipped(SkipReason::AlreadyInPlace)));
		assert!(source.exists());
		assert_eq!(organizer.stats().total().await, 0);
	}

	#[tokio::test]
	async fn test_excluded_file_is_never_moved() {
		let temp_dir = TempDir::new().unwrap();
		let organizer = organizer(&temp_dir, quick_config());
		let source = organizer.context().target().root().join("~$budget.xlsx");
		fs::write(&source, b"lock").unwrap();

		let report =
			process_candidate(organizer.context(), CandidateFile::new(source.clone()), Shutdown::never())
				.await;

		assert!(matches!(report.outcome, CandidateOutcome::Skipped(SkipReason::Excluded { .. })));
		assert!(source.exists());
		assert_eq!(organizer.stats().total().await, 0);
	}

	#[tokio::test]
	async fn test_stop_before_settling_leaves_file() {
		let temp_dir = TempDir::new().unwrap();
		let mut config = quick_config();
		config.delay_seconds = 30.0;
		let organizer = organizer(&temp_dir, config);
		let source = organizer.context().target().root().join("setup.msi");
		fs::write(&source, b"msi").unwrap();

		let (trigger, shutdown) = shutdown::channel();
		let context = organizer.context().clone();
		let candidate = CandidateFile::new(source.clone());
		let task = tokio::spawn(async move { process_candidate(&context, candidate, shutdown).await });
		tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		trigger.trigger();

		let report = task.await.unwrap();
		assert!(matches!(report.outcome, CandidateOutcome::Cancelled));
		assert!(source.exists());
		assert_eq!(organizer.stats().total().await, 0);
	}

	#[tokio::test]
	async fn test_run_returns_on_stop() {
		let temp_dir = TempDir::new().unwrap();
		let organizer = organizer(&temp_dir, quick_config());
		let (trigger, shutdown) = shutdown::channel();
		trigger.trigger();

		organizer.run(shutdown).await.unwrap();
		assert!(organizer.context().target().marker_path().exists());
	}

	#[tokio::test]
	async fn test_panicked_task_releases_path() {
		let path = PathBuf::from("/downloads/broken.zip");
		let mut tasks: JoinSet<CandidateReport> = JoinSet::new();
		let mut in_flight = InFlight::default();

		async fn broken() -> CandidateReport {
			panic!("candidate task failed")
		}
		let handle = tasks.spawn(broken());
		in_flight.track(handle.id(), path.clone());
		assert!(in_flight.contains(&path));

		let joined = tasks.join_next_with_id().await.unwrap();
		assert!(joined.is_err());
		complete(joined, &mut in_flight);

		assert!(!in_flight.contains(&path));
		assert_eq!(in_flight.len(), 0);
	}

	#[tokio::test]
	async fn test_finished_task_releases_path() {
		let path = PathBuf::from("/downloads/photo.png");
		let mut tasks: JoinSet<CandidateReport> = JoinSet::new();
		let mut in_flight = InFlight::default();

		let report_path = path.clone();
		let handle = tasks.spawn(async move {
			CandidateReport { path: report_path, outcome: CandidateOutcome::Cancelled }
		});
		in_flight.track(handle.id(), path.clone());

		let joined = tasks.join_next_with_id().await.unwrap();
		complete(joined, &mut in_flight);

		assert!(!in_flight.contains(&path));
	}

	#[tokio::test]
	async fn test_failed_sweep_does_not_stop_watching() {
		let temp_dir = TempDir::new().unwrap();
		let organizer = organizer(&temp_dir, quick_config());
		let target = organizer.context().target();
		// A plain file where the sweep folder should go makes the sweep fail
		fs::write(target.old_download_dir(), b"not a folder").unwrap();
		fs::write(target.root().join("before.txt"), b"old").unwrap();
		let (trigger, shutdown) = shutdown::channel();
		trigger.trigger();

		organizer.run(shutdown).await.unwrap();

		assert!(target.root().join("before.txt").exists());
		assert!(!target.marker_path().exists());
	}
}
