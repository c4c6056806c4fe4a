use anyhow::{bail, Context};
use std::path::PathBuf;
use std::time::Duration;
use supabase_watch::config::load_watch_target;
use supabase_watch::logging::{init_logging, log_error, log_info, LogSettings};
use supabase_watch::{StopOutcome, Watcher};

const HOST_TICK: Duration = Duration::from_secs(1);

fn main() -> anyhow::Result<()> {
    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        bail!("usage: supabase-watch <config.toml>");
    };

    if let Err(e) = init_logging(LogSettings::default()) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let mut target = load_watch_target(&path)
        .with_context(|| format!("failed to load watch target from {}", path.display()))?;
    target.apply_env_overrides();
    let label = target.label();

    let watcher = Watcher::supabase(target.payload);
    watcher.start(target).context("failed to start watcher")?;

    // The host side: a plain tick loop that only reacts to dirty edges
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut tick = tokio::time::interval(HOST_TICK);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if watcher.is_dirty() {
                        let snapshot = watcher.peek_output();
                        let cursor = snapshot
                            .cursor
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "-".to_string());
                        log_info(
                            &label,
                            &format!("Output changed: {} ({})", cursor, snapshot.payload.describe()),
                        );
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        log_error(&label, &format!("Failed to listen for Ctrl-C: {}", e));
                    }
                    break;
                }
            }
        }
    });

    match watcher.stop()? {
        StopOutcome::Detached => log_info(&label, "Exiting with a poll still in flight"),
        StopOutcome::Joined | StopOutcome::NotRunning => log_info(&label, "Shut down cleanly"),
    }

    Ok(())
}
