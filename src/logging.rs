use crate::config::LogLevel;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "organizer.log";

/// Build the filter directive: `RUST_LOG` wins, then `--verbose`, then the config level.
pub fn filter_directive(level: LogLevel, verbose: bool) -> String {
	if let Ok(from_env) = std::env::var("RUST_LOG") {
		if !from_env.trim().is_empty() {
			return from_env;
		}
	}

	if verbose {
		LogLevel::Debug.as_filter().to_string()
	} else {
		level.as_filter().to_string()
	}
}

/// Log to stdout and to a daily rolling file under `log_dir`.
///
/// The returned guard flushes the file writer when dropped; keep it alive for
/// the lifetime of the process.
pub fn init_logging(level: LogLevel, verbose: bool, log_dir: &Path) -> std::io::Result<WorkerGuard> {
	std::fs::create_dir_all(log_dir)?;

	let filter_layer = EnvFilter::try_new(filter_directive(level, verbose))
		.unwrap_or_else(|_| EnvFilter::new(LogLevel::Info.as_filter()));

	let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
	let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

	tracing_subscriber::registry()
		.with(fmt::layer().with_writer(std::io::stdout).with_target(false).with_ansi(true))
		.with(fmt::layer().with_writer(non_blocking).with_ansi(false))
		.with(filter_layer)
		.init();

	Ok(guard)
}
