//! One JSON line per callback the probe sees.

use chrono::{DateTime, Utc};
use serde::Serialize;
use steam_bridge::{CallbackEvent, CallbackTag};

/// Where a printed callback came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Listener,
    CallResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallbackLine {
    pub n: u64,
    /// Native `k_iCallback` id.
    pub callback: CallbackTag,
    pub source: Source,
    pub received_at: DateTime<Utc>,
    pub event: CallbackEvent,
}

impl CallbackLine {
    pub fn stamp(n: u64, source: Source, event: &CallbackEvent) -> Self {
        CallbackLine {
            n,
            callback: event.tag(),
            source,
            received_at: Utc::now(),
            event: event.clone(),
        }
    }
}
