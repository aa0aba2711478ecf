//! Process Epoch Marker
//!
//! Identifies one continuous process run. Buffers are memory-only, so a
//! restart resets them; the epoch lets a resuming client detect that its
//! cursor predates the restart and must be discarded rather than silently
//! under-delivered.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Process-wide epoch marker, created once at startup and immutable for the
/// process lifetime.
#[derive(Debug, Clone)]
pub struct Epoch {
    epoch_id: String,
    epoch_start: DateTime<Utc>,
}

impl Epoch {
    /// Create the epoch for this process run.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch_id: Uuid::new_v4().to_string(),
            epoch_start: Utc::now(),
        }
    }

    /// Opaque identifier for this run.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.epoch_id
    }

    /// Wall-clock start of this run.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.epoch_start
    }

    /// Whether a client-presented epoch id belongs to this run.
    #[must_use]
    pub fn matches(&self, client_epoch_id: &str) -> bool {
        self.epoch_id == client_epoch_id
    }

    /// Read-only status snapshot for health reporting and stream handshakes.
    #[must_use]
    pub fn status(&self) -> EpochStatus {
        let uptime = Utc::now().signed_duration_since(self.epoch_start);
        EpochStatus {
            epoch_id: self.epoch_id.clone(),
            epoch_start: self.epoch_start,
            uptime_secs: uptime.num_seconds().max(0).unsigned_abs(),
        }
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the current epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EpochStatus {
    /// Opaque identifier for this process run.
    pub epoch_id: String,
    /// Wall-clock start of this run.
    pub epoch_start: DateTime<Utc>,
    /// Seconds since the run started.
    pub uptime_secs: u64,
}

// =============================================================================
// Tests
// =============================================================================
