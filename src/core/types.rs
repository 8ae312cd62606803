//! Common types used across fedguard modules.

use std::collections::BTreeMap;

/// Scalar metrics reported by a client or produced by aggregation.
///
/// Ordered so that serialized histories are stable.
pub type Metrics = BTreeMap<String, f64>;

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Build a metrics map from `(key, value)` pairs.
pub fn metrics<I, K>(pairs: I) -> Metrics
where
    I: IntoIterator<Item = (K, f64)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
