use crate::query::SnapshotView;
use crate::types::WhaleSignal;

/// Emit the market snapshot as a single JSON line to stdout.
pub fn report_snapshot(snapshot: &SnapshotView) {
    if let Ok(json) = serde_json::to_string(snapshot) {
        println!("{json}");
    }
}

/// Emit each whale signal as its own JSON line to stdout.
pub fn report_signals(signals: &[WhaleSignal]) {
    for signal in signals {
        if let Ok(json) = serde_json::to_string(signal) {
            println!("{json}");
        }
    }
}
