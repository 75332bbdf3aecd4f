//! Timestamp-derived experiment ids

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// `strftime` layout of an experiment id (microsecond precision).
///
/// Zero-padded fields make lexicographic order match chronological order.
pub const ID_FORMAT: &str = "%Y_%m_%d_%H_%M_%S_%6f";

/// Unique id of one training run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(String);

impl ExperimentId {
    /// Id for the current local time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Local::now().naive_local())
    }

    /// Id for a given wall-clock time.
    #[must_use]
    pub fn from_datetime(at: NaiveDateTime) -> Self {
        Self(at.format(ID_FORMAT).to_string())
    }

    /// Get the id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the id back into its timestamp, if it has the standard layout.
    #[must_use]
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.0, ID_FORMAT).ok()
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExperimentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ExperimentId> for String {
    fn from(id: ExperimentId) -> Self {
        id.0
    }
}

impl<Tz: chrono::TimeZone> From<DateTime<Tz>> for ExperimentId {
    fn from(at: DateTime<Tz>) -> Self {
        Self::from_datetime(at.naive_local())
    }
}

/// Format a duration in seconds as `XhYYm` (over an hour) or `XmYYs`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_hms(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let h = total / 3600;
    let m = (total - h * 3600) / 60;
    let s = total - h * 3600 - m * 60;
    if h > 0 {
        format!("{h}h{m:02}m")
    } else {
        format!("{m}m{s:02}s")
    }
}
