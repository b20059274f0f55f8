use crate::error::{OrganizerError, Result};
use crate::events::{EventType, FileSystemEvent};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WatcherConfig {
	/// Directory to observe. Only its direct entries are watched; subdirectories
	/// (including the ones the organizer creates) never produce events.
	pub path: PathBuf,
	pub poll_interval: Duration,
}

impl WatcherConfig {
	pub fn new(path: PathBuf) -> Self {
		Self { path, poll_interval: Duration::from_millis(100) }
	}
}

/// Keeps the notification subscription alive until [`WatcherHandle::stop`].
pub struct WatcherHandle {
	watcher: Option<RecommendedWatcher>,
	bridge: Option<JoinHandle<()>>,
}

impl WatcherHandle {
	/// Drop the subscription and wait for the bridge thread to drain.
	pub async fn stop(mut self) -> Result<()> {
		drop(self.watcher.take());

		if let Some(bridge) = self.bridge.take() {
			bridge.await.map_err(|e| {
				error!("Notify bridge task failed: {}", e);
				OrganizerError::StopSignal
			})?;
		}
		info!("Watcher stopped");
		Ok(())
	}
}

/// Subscribe to create/rename notifications directly under `config.path`.
///
/// The receiver yields `None` once the subscription ends, either after
/// [`WatcherHandle::stop`] or because the watched directory disappeared.
pub fn start(
	config: WatcherConfig,
) -> Result<(WatcherHandle, tokio_mpsc::UnboundedReceiver<FileSystemEvent>)> {
	let path = config.path.clone();

	if !path.is_dir() {
		return Err(OrganizerError::invalid_path(&path));
	}

	info!("Starting to watch path: {:?} (non-recursive)", path);

	let (notify_tx, notify_rx) = mpsc::channel();

	let mut watcher =
		RecommendedWatcher::new(notify_tx, Config::default().with_poll_interval(config.poll_interval))?;
	watcher.watch(&path, RecursiveMode::NonRecursive)?;

	let (event_tx, event_rx) = tokio_mpsc::unbounded_channel();

	// notify delivers on a std channel, so drain it on a blocking thread
	let bridge = tokio::task::spawn_blocking(move || {
		forward_notify_events(&path, notify_rx, event_tx);
	});

	Ok((WatcherHandle { watcher: Some(watcher), bridge: Some(bridge) }, event_rx))
}

fn forward_notify_events(
	root: &Path, notify_rx: mpsc::Receiver<notify::Result<Event>>,
	event_tx: tokio_mpsc::UnboundedSender<FileSystemEvent>,
) {
	for result in notify_rx {
		match result {
			Ok(event) => {
				debug!("Received notify event: {:?}", event);

				for fs_event in convert_notify_event(event) {
					if event_tx.send(fs_event).is_err() {
						debug!("Event receiver dropped, ending notify bridge");
						return;
					}
				}
			}
			Err(e) => {
				error!("Notify error: {}", e);
			}
		}

		if !root.is_dir() {
			warn!("Watched directory {:?} is gone, ending subscription", root);
			return;
		}
	}
}

/// Convert one notify event into per-path events.
///
/// A combined rename (`RenameMode::Both`) carries `[from, to]`; it is split so
/// the new name shows up as a `RenameTo` like on platforms that report the two
/// halves separately.
pub fn convert_notify_event(event: Event) -> Vec<FileSystemEvent> {
	if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
		if let [from, to] = event.paths.as_slice() {
			return vec![
				describe_path(EventType::RenameFrom, from.clone()),
				describe_path(EventType::RenameTo, to.clone()),
			];
		}
	}

	let event_type = EventType::from(event.kind);
	event
		.paths
		.into_iter()
		.map(|path| describe_path(event_type.clone(), path))
		.collect()
}

fn describe_path(event_type: EventType, path: PathBuf) -> FileSystemEvent {
	// Get metadata if the path still exists
	let metadata = std::fs::metadata(&path).ok();
	let is_directory = metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false);
	let size = metadata.as_ref().filter(|m| m.is_file()).map(|m| m.len());

	FileSystemEvent::new(event_type, path, is_directory, size)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_split_combined_rename() {
		let temp_dir = TempDir::new().unwrap();
		let from = temp_dir.path().join("movie.mkv.part");
		let to = temp_dir.path().join("movie.mkv");
		std::fs::write(&to, b"frames").unwrap();

		let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
			.add_path(from.clone())
			.add_path(to.clone());

		let converted = convert_notify_event(event);
		assert_eq!(converted.len(), 2);
		assert_eq!(converted[0].event_type, EventType::RenameFrom);
		assert_eq!(converted[0].path, from);
		assert_eq!(converted[1].event_type, EventType::RenameTo);
		assert_eq!(converted[1].path, to);
		assert_eq!(converted[1].size, Some(6));
		assert!(converted[1].announces_file());
	}

	#[test]
	fn test_undirected_rename_announces_new_name() {
		let temp_dir = TempDir::new().unwrap();
		let old_name = temp_dir.path().join("report.pdf.crdownload");
		let new_name = temp_dir.path().join("report.pdf");
		std::fs::write(&new_name, b"%PDF").unwrap();

		// macOS delivers one event per side of a rename, without direction
		let old_side =
			Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any))).add_path(old_name);
		let new_side =
			Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any))).add_path(new_name.clone());

		let converted = convert_notify_event(new_side);
		assert_eq!(converted.len(), 1);
		assert_eq!(converted[0].event_type, EventType::Rename);
		assert_eq!(converted[0].path, new_name);
		assert!(converted[0].announces_file());

		let converted = convert_notify_event(old_side);
		assert_eq!(converted[0].event_type, EventType::Rename);
		assert_eq!(converted[0].size, None);
	}

	#[test]
	fn test_directory_events_are_marked() {
		let temp_dir = TempDir::new().unwrap();
		let dir = temp_dir.path().join("2024-03-01");
		std::fs::create_dir(&dir).unwrap();

		let event =
			Event::new(EventKind::Create(notify::event::CreateKind::Folder)).add_path(dir.clone());
		let converted = convert_notify_event(event);

		assert_eq!(converted.len(), 1);
		assert!(converted[0].is_directory);
		assert!(!converted[0].announces_file());
	}

	#[tokio::test]
	async fn test_start_rejects_missing_directory() {
		let config = WatcherConfig::new(PathBuf::from("/nonexistent/invalid/path/that/should/not/exist"));

		match start(config) {
			Err(OrganizerError::InvalidPath { path }) => assert!(path.contains("nonexistent")),
			Err(other) => panic!("Expected InvalidPath error, got: {other:?}"),
			Ok(_) => panic!("Expected InvalidPath error"),
		}
	}

	#[tokio::test]
	async fn test_stop_closes_receiver() {
		let temp_dir = TempDir::new().unwrap();
		let (handle, mut receiver) = start(WatcherConfig::new(temp_dir.path().to_path_buf())).unwrap();

		handle.stop().await.unwrap();

		let next = tokio::time::timeout(Duration::from_secs(5), async {
			// Drain anything delivered before the stop
			while receiver.recv().await.is_some() {}
		})
		.await;
		assert!(next.is_ok(), "receiver should close after stop");
	}
}
