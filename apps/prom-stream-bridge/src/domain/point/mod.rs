//! Normalized Data Points
//!
//! Canonical representation of backend query results and the flat
//! point records pushed to clients. Backend rows arrive as a label set
//! plus one or more `(timestamp, value)` samples; normalization turns
//! each sample into one wire-ready [`Point`].
//!
//! # Wire Format
//!
//! Each point serializes as a single flat JSON object:
//!
//! ```json
//! {
//!   "id": "cpu",
//!   "t": 1700000100,
//!   "k": "default/api-6f9c",
//!   "v": "0.25",
//!   "namespace": "default",
//!   "pod": "api-6f9c"
//! }
//! ```
//!
//! `id` is the owning subscription, `t` the sample timestamp in epoch
//! seconds, `k` a stable series key, and `v` the sample value exactly
//! as the backend rendered it. One extra field appears per configured
//! metric label that the row actually carries; absent labels are
//! omitted rather than sent as null, and labels sharing a name with an
//! envelope field are never copied.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::domain::subscription::SubscriptionSpec;

// =============================================================================
// Labels
// =============================================================================

/// Label consulted first when deriving a series key.
pub const ID_LABEL: &str = "id";

/// Namespace label used by the series key fallback.
pub const NAMESPACE_LABEL: &str = "namespace";

/// Pod label used by the series key fallback.
pub const POD_LABEL: &str = "pod";

/// Placeholder for labels missing from the fallback pair. Kept as a
/// literal string for wire compatibility with existing consumers.
pub const MISSING_LABEL: &str = "undefined";

/// Envelope field names a copied label may never shadow.
const RESERVED_FIELDS: [&str; 4] = ["id", "t", "k", "v"];

// =============================================================================
// Backend Rows
// =============================================================================

/// One backend sample: epoch-seconds timestamp plus the value string.
///
/// The value stays a string end to end so renderings like `+Inf` or
/// high-precision decimals survive untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Sample timestamp in epoch seconds, possibly fractional.
    pub timestamp: f64,
    /// Sample value exactly as rendered by the backend.
    pub value: String,
}

/// One result row from a backend query: a label set and its samples.
///
/// Range queries produce multiple samples per row; instant queries
/// produce exactly one. Row and sample order is preserved from the
/// backend response.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    /// Label set identifying the series.
    pub labels: HashMap<String, String>,
    /// Samples in backend order.
    pub samples: Vec<Sample>,
}

// =============================================================================
// Points
// =============================================================================

/// A normalized data point pushed to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    /// Owning subscription ID.
    pub id: String,
    /// Sample timestamp in epoch seconds.
    pub t: f64,
    /// Stable series key derived from the row's labels.
    pub k: String,
    /// Sample value exactly as rendered by the backend.
    pub v: String,
    /// Configured metric labels present on the row.
    #[serde(flatten)]
    pub labels: BTreeMap<String, String>,
}

/// Derive the stable series key for a label set.
///
/// Prefers the backend-provided `id` label. Without one, falls back to
/// `"<namespace>/<pod>"`, substituting [`MISSING_LABEL`] for either
/// missing half.
#[must_use]
pub fn series_key(labels: &HashMap<String, String>) -> String {
    labels.get(ID_LABEL).cloned().unwrap_or_else(|| {
        let namespace = labels
            .get(NAMESPACE_LABEL)
            .map_or(MISSING_LABEL, String::as_str);
        let pod = labels.get(POD_LABEL).map_or(MISSING_LABEL, String::as_str);
        format!("{namespace}/{pod}")
    })
}

/// Normalize one backend sample into a wire-ready point.
///
/// Copies each of the subscription's configured metric labels from the
/// row when present; absent labels are simply omitted. Labels named
/// `id`, `t`, `k`, or `v` are never copied, so the envelope fields
/// stay unambiguous in the flattened output.
#[must_use]
pub fn normalize(labels: &HashMap<String, String>, sample: &Sample, spec: &SubscriptionSpec) -> Point {
    let mut copied = BTreeMap::new();
    for name in &spec.metrics {
        if RESERVED_FIELDS.contains(&name.as_str()) {
            continue;
        }
        if let Some(value) = labels.get(name) {
            copied.insert(name.clone(), value.clone());
        }
    }

    Point {
        id: spec.id.clone(),
        t: sample.timestamp,
        k: series_key(labels),
        v: sample.value.clone(),
        labels: copied,
    }
}

// =============================================================================
// Tests
// =============================================================================
