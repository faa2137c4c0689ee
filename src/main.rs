use clap::Parser;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use repowatch::{
    cli::{Cli, OutputFormat},
    watch_repository, RepoEvent, RepoEventKind,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = cli.validate() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    cli.setup_logging();

    let config = cli.load_config().context("Failed to load configuration")?;
    let watch_path = cli.get_watch_path();
    tracing::info!("Starting repowatch on: {}", watch_path.display());

    let watcher = watch_repository(&watch_path, &config)
        .with_context(|| format!("Not a git repository: {}", watch_path.display()))?;
    let events = watcher.channel(&RepoEventKind::ALL);
    watcher
        .start()
        .context("Filesystem notifications are unavailable for this repository")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => print_event(&event, &cli.output)?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    watcher.dispose();
    Ok(())
}

fn print_event(event: &RepoEvent, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Text => {
            let time_str = chrono::Local::now().format("%H:%M:%S");
            println!("[{}] {}", time_str, event);
        }
        OutputFormat::Compact => println!("{}", event),
    }
    Ok(())
}
