//! Cooperative stop signal shared by the dispatcher and every candidate task.
//!
//! Settling delays and retry delays sleep through [`Shutdown::sleep`], so a stop
//! request interrupts a pending wait instead of leaving a task blocked until its
//! timer fires.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Sending half, owned by whoever decides the process should stop.
#[derive(Debug)]
pub struct ShutdownTrigger {
	sender: watch::Sender<bool>,
}

/// Receiving half, cheap to clone into tasks.
#[derive(Debug, Clone)]
pub struct Shutdown {
	receiver: watch::Receiver<bool>,
	/// Set only by [`Shutdown::never`], which has no trigger holding the channel open
	_keepalive: Option<Arc<watch::Sender<bool>>>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
	let (sender, receiver) = watch::channel(false);
	(ShutdownTrigger { sender }, Shutdown { receiver, _keepalive: None })
}

impl ShutdownTrigger {
	pub fn trigger(&self) {
		// send_replace never fails, even with every receiver dropped
		self.sender.send_replace(true);
	}

	pub fn subscribe(&self) -> Shutdown {
		Shutdown { receiver: self.sender.subscribe(), _keepalive: None }
	}
}

impl Shutdown {
	/// A signal that never fires, for callers without a stop source.
	pub fn never() -> Self {
		let (sender, receiver) = watch::channel(false);
		Shutdown { receiver, _keepalive: Some(Arc::new(sender)) }
	}

	pub fn is_triggered(&self) -> bool {
		*self.receiver.borrow()
	}

	/// Resolves once a stop has been requested.
	pub async fn cancelled(&mut self) {
		// An Err means the trigger was dropped, which we treat as a stop
		let _ = self.receiver.wait_for(|stopped| *stopped).await;
	}

	/// Sleep for `duration`; returns `false` if a stop arrived first.
	pub async fn sleep(&mut self, duration: Duration) -> bool {
		if self.is_triggered() {
			return false;
		}
		let stopped = tokio::select! {
			_ = tokio::time::sleep(duration) => false,
			_ = self.cancelled() => true,
		};
		!stopped && !self.is_triggered()
	}
}
