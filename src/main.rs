use anyhow::Context;
use clap::Parser;
use download_organizer::{shutdown, LoadedConfig, Organizer, OrganizerConfig, WatchTarget};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "download-organizer")]
#[command(
	about = "Sorts finished downloads into dated and categorized folders as they arrive"
)]
struct Cli {
	/// Folder to organize (defaults to the user's Downloads folder)
	#[arg(short, long)]
	downloads: Option<PathBuf>,

	/// Seconds between the two size samples of a settling check (not saved)
	#[arg(long)]
	delay: Option<f64>,

	/// Replace the saved configuration with defaults before starting
	#[arg(long)]
	reset_config: bool,

	/// Enable verbose logging
	#[arg(short, long)]
	verbose: bool,
}

fn default_downloads_dir() -> Option<PathBuf> {
	dirs::download_dir().or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let downloads = cli
		.downloads
		.or_else(default_downloads_dir)
		.context("could not determine the Downloads folder; pass --downloads")?;
	let target = WatchTarget::open(&downloads)
		.with_context(|| format!("cannot organize {}", downloads.display()))?;

	let LoadedConfig { mut config, mut warnings, created } = if cli.reset_config {
		let config = OrganizerConfig::reset(target.root()).context("failed to reset configuration")?;
		LoadedConfig { config, warnings: Vec::new(), created: true }
	} else {
		OrganizerConfig::load_or_create(target.root()).context("failed to load configuration")?
	};

	if let Some(delay) = cli.delay {
		if download_organizer::config::is_valid_seconds(delay) {
			config.delay_seconds = delay;
		} else {
			warnings.push(format!("ignoring invalid --delay {delay}"));
		}
	}

	let _guard = download_organizer::logging::init_logging(
		config.log_level,
		cli.verbose,
		&OrganizerConfig::log_dir(target.root()),
	)
	.context("failed to set up logging")?;

	if created {
		info!("Wrote default configuration to {:?}", OrganizerConfig::config_path(target.root()));
	}
	for warning in &warnings {
		warn!("Configuration: {}", warning);
	}

	info!(
		"Organizing {:?} (by date: {}, by type: {}, delay: {}s)",
		target.root(),
		config.organize_by_date,
		config.organize_by_type,
		config.delay_seconds
	);

	let (organizer, pattern_warnings) = Organizer::from_config(target, config);
	for warning in &pattern_warnings {
		warn!("Configuration: {}", warning);
	}

	let (trigger, stop) = shutdown::channel();
	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => {
				info!("Shutting down organizer...");
				trigger.trigger();
			}
			Err(e) => {
				warn!("Failed to listen for Ctrl-C: {}", e);
				// Dropping the trigger would read as a stop request
				std::future::pending::<()>().await;
				drop(trigger);
			}
		}
	});

	organizer.run(stop).await?;
	Ok(())
}
