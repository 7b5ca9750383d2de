//! Progress UI (spinner) for download runs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use pagegrab_core::StatsSnapshot;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Spawns the progress UI (spinner) when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_spinner` is false, returns (None, stop) with stop already cancelled.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    snapshots: watch::Receiver<StatsSnapshot>,
    total: usize,
) -> (Option<tokio::task::JoinHandle<()>>, CancellationToken) {
    let stop = CancellationToken::new();
    if !use_spinner {
        stop.cancel();
        return (None, stop);
    }
    let handle = spawn_spinner_inner(snapshots, total, stop.clone());
    (Some(handle), stop)
}

fn spawn_spinner_inner(
    mut snapshots: watch::Receiver<StatsSnapshot>,
    total: usize,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message(progress_message(&snapshots.borrow(), total));

        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    spinner.set_message(progress_message(&snapshots.borrow_and_update(), total));
                }
            }
        }

        spinner.finish_and_clear();
    })
}

fn progress_message(snapshot: &StatsSnapshot, total: usize) -> String {
    let current = snapshot.processed().saturating_add(1).min(total);
    format!(
        "[{current}/{total}] downloading... ({} done, {} failed, {} skipped)",
        snapshot.succeeded, snapshot.failed, snapshot.skipped
    )
}
