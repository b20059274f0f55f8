//! Common test utilities for the download organizer

#![allow(dead_code)]

use download_organizer::{OrganizerConfig, WatchTarget};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn setup_temp_dir() -> TempDir {
	TempDir::new().expect("Failed to create temp directory")
}

/// Open a temporary directory as the organizer's target
pub fn setup_target() -> (TempDir, WatchTarget) {
	let temp_dir = setup_temp_dir();
	let target = WatchTarget::open(temp_dir.path()).expect("Failed to open watch target");
	(temp_dir, target)
}

/// Create a test file with content
pub fn create_test_file(path: &Path, content: &str) -> std::io::Result<()> {
	std::fs::write(path, content)
}

/// Configuration with delays short enough for tests
pub fn fast_config() -> OrganizerConfig {
	let mut config = OrganizerConfig::default();
	config.delay_seconds = 0.05;
	config.retry_delay_seconds = 0.01;
	config.max_settle_checks = 20;
	config
}

/// Today's date folder under `root`
pub fn dated_dir(root: &Path) -> PathBuf {
	root.join(chrono::Local::now().format("%Y-%m-%d").to_string())
}

/// Wait for a short duration to allow file system events to propagate
pub async fn wait_for_events() {
	tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where F: FnMut() -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	while tokio::time::Instant::now() < deadline {
		if condition() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(25)).await;
	}
	condition()
}
