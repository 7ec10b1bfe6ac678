use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recording-rule output: a label set, a value, and the timestamp it was
/// evaluated at. This is the unit the sample-writing adapter hands to the
/// `Pusher` contract's `Push` call; the pusher itself is an external
/// collaborator, so only the wire shape lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub labels: HashMap<String, String>,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}
