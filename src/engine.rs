use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::SettingsConfig;
use crate::source::MarketSource;
use crate::state::{CycleReport, PumpPhase, Tracker};

/// How a single pump cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Applied(CycleReport),
    /// The source returned nothing; cache and history were left as they were.
    Empty,
    /// Shutdown was requested while the fetch was in flight.
    Cancelled,
}

/// Fetch, detect and publish once.
///
/// The fetch is abandoned as soon as `shutdown` flips. A panic in either
/// the fetch or the detect/publish step is logged and reported as an empty
/// cycle, so the caller keeps running.
pub async fn run_cycle(
    tracker: &Tracker,
    source: &dyn MarketSource,
    shutdown: &mut watch::Receiver<bool>,
) -> CycleOutcome {
    tracker.set_phase(PumpPhase::Fetching);
    let fetched = tokio::select! {
        fetched = AssertUnwindSafe(source.fetch()).catch_unwind() => fetched,
        _ = wait_for_shutdown(shutdown) => return CycleOutcome::Cancelled,
    };
    let Ok(markets) = fetched else {
        error!("Market fetch panicked, continuing with next interval");
        return CycleOutcome::Empty;
    };

    if markets.is_empty() {
        warn!("No crypto markets fetched, keeping previous snapshot");
        return CycleOutcome::Empty;
    }

    match catch_unwind(AssertUnwindSafe(|| {
        tracker.apply_pump_cycle(markets, Utc::now())
    })) {
        Ok(report) => CycleOutcome::Applied(report),
        Err(_) => {
            error!("Update cycle error, continuing with next interval");
            CycleOutcome::Empty
        }
    }
}

/// The update pump: waits `initial_delay`, then runs a cycle every
/// `poll_interval` until `shutdown` becomes true.
pub async fn run_update_loop(
    tracker: Arc<Tracker>,
    source: Arc<dyn MarketSource>,
    settings: SettingsConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = settings.poll_interval();
    info!(
        "Starting update loop (initial delay: {}s, interval: {}s)",
        settings.initial_delay_secs, settings.poll_interval_secs
    );

    tokio::select! {
        _ = tokio::time::sleep(settings.initial_delay()) => {}
        _ = wait_for_shutdown(&mut shutdown) => {
            tracker.set_phase(PumpPhase::Idle);
            info!("Update loop stopped before first cycle");
            return;
        }
    }

    loop {
        if let CycleOutcome::Cancelled =
            run_cycle(&tracker, source.as_ref(), &mut shutdown).await
        {
            break;
        }

        tracker.set_phase(PumpPhase::Sleeping);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }

    tracker.set_phase(PumpPhase::Idle);
    info!("Update loop stopped");
}

/// Resolves once the flag is true or every sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // Err means the sender was dropped, which also ends the pump
    let _ = shutdown.wait_for(|stop| *stop).await;
}
