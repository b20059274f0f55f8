use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-category counters of completed moves.
///
/// Shared between every candidate task; a counter is bumped exactly once per
/// successful move and only reset by restarting the process.
#[derive(Debug, Clone, Default)]
pub struct MoveStatistics {
	counts: Arc<RwLock<BTreeMap<String, u64>>>,
}

impl MoveStatistics {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn record_move(&self, category: &str) {
		let mut counts = self.counts.write().await;
		*counts.entry(category.to_string()).or_insert(0) += 1;
	}

	pub async fn count(&self, category: &str) -> u64 {
		self.counts.read().await.get(category).copied().unwrap_or(0)
	}

	pub async fn total(&self) -> u64 {
		self.counts.read().await.values().sum()
	}

	pub async fn snapshot(&self) -> BTreeMap<String, u64> {
		self.counts.read().await.clone()
	}
}
