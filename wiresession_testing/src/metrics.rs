//! Readers for `metrics_util` debugging snapshots.

use metrics_util::debugging::{DebugValue, Snapshotter};

/// Current value of the counter `name`, optionally filtered by one label.
#[must_use]
pub fn counter(snapshotter: &Snapshotter, name: &str, label: Option<(&str, &str)>) -> u64 {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(key, ..)| {
            key.key().name() == name
                && label.is_none_or(|(k, v)| key.key().labels().any(|l| l.key() == k && l.value() == v))
        })
        .map(|(.., value)| match value {
            DebugValue::Counter(count) => count,
            _ => 0,
        })
        .sum()
}

/// Current value of the gauge `name`, if it was ever recorded.
#[must_use]
pub fn gauge(snapshotter: &Snapshotter, name: &str) -> Option<f64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find(|(key, ..)| key.key().name() == name)
        .and_then(|(.., value)| match value {
            DebugValue::Gauge(level) => Some(level.into_inner()),
            _ => None,
        })
}
