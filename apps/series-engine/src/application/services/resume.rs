//! Resumable Stream Layer
//!
//! Maps a client-supplied last-seen cursor plus the process epoch marker to
//! a replay set from the bounded series buffer, then continues with live
//! event-bus delivery. The replay-to-live handoff neither drops nor
//! duplicates a bar: the bus subscription is registered *before* the replay
//! snapshot is read, and the session filters live bars by sequence number
//! against what has already been delivered.
//!
//! A cursor that predates this process run (epoch mismatch) or points below
//! retained history (eviction) is surfaced as a distinct reset signal,
//! never a silent resume with a hole.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::application::services::engine::SharedEngine;
use crate::domain::bar::{Bar, Timeframe};
use crate::domain::epoch::{Epoch, EpochStatus};
use crate::infrastructure::bus::{BusEvent, SharedEventBus, SubscriptionToken, Topic};

/// Queue depth between the bus handler and a session consumer.
const SESSION_QUEUE_CAPACITY: usize = 256;

// =============================================================================
// Requests and Errors
// =============================================================================

/// Client-presented resumption state.
#[derive(Debug, Clone, Default)]
pub struct ResumeRequest {
    /// Sequence number of the last bar the client has seen.
    pub cursor: Option<u64>,
    /// Epoch id the client observed when the cursor was issued.
    pub epoch_id: Option<String>,
}

impl ResumeRequest {
    /// Start live-only, with no replay.
    #[must_use]
    pub const fn live() -> Self {
        Self {
            cursor: None,
            epoch_id: None,
        }
    }

    /// Resume after `cursor`, validated against `epoch_id`.
    #[must_use]
    pub const fn after(cursor: u64, epoch_id: String) -> Self {
        Self {
            cursor: Some(cursor),
            epoch_id: Some(epoch_id),
        }
    }
}

/// Reset conditions a resuming client must handle by restarting its view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResumeError {
    /// The cursor was issued by a prior process run; buffers were reset.
    #[error("cursor predates current epoch {current_epoch}")]
    EpochMismatch {
        /// Epoch id of this run, for the client to adopt.
        current_epoch: String,
    },

    /// The cursor points below retained history (capacity eviction).
    #[error("history before cursor has been evicted")]
    HistoryEvicted {
        /// Start of the oldest still-retained bar, if any.
        oldest_retained: Option<DateTime<Utc>>,
    },
}

/// Parse a client "last event id" header value.
///
/// The contract is a non-negative integer; absent or non-numeric values
/// mean "no cursor" (start live).
#[must_use]
pub fn parse_cursor(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
}

// =============================================================================
// Stream Session
// =============================================================================

/// One client's resumable view over a single series.
///
/// Consume [`Self::take_replay`] first, then poll [`Self::next_live`].
/// Dropping the session unregisters its bus subscription immediately.
pub struct StreamSession {
    replay: Vec<Bar>,
    live_rx: mpsc::Receiver<Bar>,
    last_delivered_seq: u64,
    bus: SharedEventBus,
    token: SubscriptionToken,
}

impl StreamSession {
    /// The replay set, oldest-to-newest. Empty after the first call.
    pub fn take_replay(&mut self) -> Vec<Bar> {
        std::mem::take(&mut self.replay)
    }

    /// Next live bar, skipping anything already covered by the replay set
    /// or the client's cursor. `None` once the bus side is gone.
    pub async fn next_live(&mut self) -> Option<Bar> {
        loop {
            let bar = self.live_rx.recv().await?;
            if bar.seq > self.last_delivered_seq {
                self.last_delivered_seq = bar.seq;
                return Some(bar);
            }
            // Duplicate of a replayed bar that raced the snapshot.
        }
    }

    /// Highest sequence number handed to this client so far.
    #[must_use]
    pub const fn cursor(&self) -> u64 {
        self.last_delivered_seq
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("replay_len", &self.replay.len())
            .field("last_delivered_seq", &self.last_delivered_seq)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.token);
    }
}

// =============================================================================
// Resumable Streams
// =============================================================================

/// Per-connection entry point for resumable series streams.
pub struct ResumableStreams {
    engine: SharedEngine,
    epoch: Arc<Epoch>,
}

impl ResumableStreams {
    /// Create the stream layer for this process run.
    #[must_use]
    pub const fn new(engine: SharedEngine, epoch: Arc<Epoch>) -> Self {
        Self { engine, epoch }
    }

    /// Read-only view of the current epoch.
    #[must_use]
    pub fn epoch_status(&self) -> EpochStatus {
        self.epoch.status()
    }

    /// Open a session over one series.
    ///
    /// With no cursor the session is live-only. With a cursor and a
    /// matching epoch, stored bars after the cursor are replayed and live
    /// delivery continues seamlessly.
    ///
    /// # Errors
    ///
    /// [`ResumeError::EpochMismatch`] when the cursor belongs to a prior
    /// run (or presents no epoch to validate against);
    /// [`ResumeError::HistoryEvicted`] when bars past the cursor have
    /// already been evicted.
    pub fn open(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        request: &ResumeRequest,
    ) -> Result<StreamSession, ResumeError> {
        let bus = self.engine.bus();

        if let Some(cursor) = request.cursor {
            // A cursor without a verifiable epoch cannot be trusted: it may
            // predate a restart.
            let verified = request
                .epoch_id
                .as_deref()
                .is_some_and(|id| self.epoch.matches(id));
            if !verified {
                return Err(ResumeError::EpochMismatch {
                    current_epoch: self.epoch.id().to_string(),
                });
            }

            let evicted = self
                .engine
                .with_buffer(symbol, timeframe, |b| (b.is_evicted(cursor), b.oldest_ts()));
            if let Some((true, oldest_retained)) = evicted {
                return Err(ResumeError::HistoryEvicted { oldest_retained });
            }
        }

        // Subscribe before reading the snapshot so no bar finalized in
        // between can be missed; overlap is removed by seq filtering.
        let (tx, live_rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        let token = bus.subscribe(
            Topic::bar_new(symbol, timeframe),
            Arc::new(move |event| {
                if let BusEvent::BarFinalized(bar) = event {
                    tx.try_send(bar.clone())
                        .map_err(|_| anyhow::anyhow!("session queue full or closed"))?;
                }
                Ok(())
            }),
        );

        let replay = request.cursor.map_or_else(Vec::new, |cursor| {
            self.engine.since(symbol, timeframe, cursor)
        });

        let last_delivered_seq = replay
            .last()
            .map(|b| b.seq)
            .or(request.cursor)
            .unwrap_or(0);

        Ok(StreamSession {
            replay,
            live_rx,
            last_delivered_seq,
            bus,
            token,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use rust_decimal::Decimal;

    use crate::application::services::engine::{AggregationEngine, EngineSettings};
    use crate::domain::bar::Tick;
    use crate::domain::sequencer::Sequencer;
    use crate::infrastructure::bus::EventBus;

    use super::*;

    fn setup(capacity: usize) -> (SharedEngine, ResumableStreams, Arc<Epoch>) {
        let engine = Arc::new(AggregationEngine::new(
            EngineSettings {
                buffer_capacity: capacity,
                timeframes: vec![Timeframe::Min1],
            },
            Arc::new(Sequencer::new()),
            Arc::new(EventBus::new()),
        ));
        let epoch = Arc::new(Epoch::new());
        let streams = ResumableStreams::new(Arc::clone(&engine), Arc::clone(&epoch));
        (engine, streams, epoch)
    }

    fn tick_at(ms: i64, price: i64) -> Tick {
        Tick {
            symbol: "AAPL".to_string(),
            price: Decimal::from(price),
            size: 1,
            ts: DateTime::from_timestamp_millis(ms).unwrap(),
        }
    }

    /// Finalize `count` one-minute bars (seq 1..=count).
    fn produce_bars(engine: &SharedEngine, count: i64) {
        for i in 0..=count {
            engine.ingest_tick(&tick_at(60_000 * (i + 1), 100 + i)).unwrap();
        }
    }

    #[test]
    fn parse_cursor_contract() {
        assert_eq!(parse_cursor(Some("7")), Some(7));
        assert_eq!(parse_cursor(Some(" 42 ")), Some(42));
        assert_eq!(parse_cursor(Some("0")), Some(0));
        assert_eq!(parse_cursor(Some("-3")), None);
        assert_eq!(parse_cursor(Some("abc")), None);
        assert_eq!(parse_cursor(Some("")), None);
        assert_eq!(parse_cursor(None), None);
    }

    #[tokio::test]
    async fn replay_after_cursor_is_exact() {
        let (engine, streams, epoch) = setup(100);
        produce_bars(&engine, 10);

        let mut session = streams
            .open(
                "AAPL",
                Timeframe::Min1,
                &ResumeRequest::after(7, epoch.id().to_string()),
            )
            .unwrap();

        let replayed: Vec<u64> = session.take_replay().iter().map(|b| b.seq).collect();
        assert_eq!(replayed, vec![8, 9, 10]);
        assert_eq!(session.cursor(), 10);
        // Replay is consumed once.
        assert!(session.take_replay().is_empty());
    }

    #[tokio::test]
    async fn no_cursor_starts_live_only() {
        let (engine, streams, _epoch) = setup(100);
        produce_bars(&engine, 5);

        let mut session = streams
            .open("AAPL", Timeframe::Min1, &ResumeRequest::live())
            .unwrap();
        assert!(session.take_replay().is_empty());

        // Only bars finalized after open are delivered.
        engine.ingest_tick(&tick_at(60_000 * 100, 200)).unwrap();
        let live = session.next_live().await.unwrap();
        assert_eq!(live.seq, 6);
    }

    #[tokio::test]
    async fn handoff_neither_drops_nor_duplicates() {
        let (engine, streams, epoch) = setup(100);
        produce_bars(&engine, 6);

        let mut session = streams
            .open(
                "AAPL",
                Timeframe::Min1,
                &ResumeRequest::after(3, epoch.id().to_string()),
            )
            .unwrap();

        // Live bars finalized after open.
        engine.ingest_tick(&tick_at(60_000 * 50, 150)).unwrap();
        engine.ingest_tick(&tick_at(60_000 * 51, 151)).unwrap();

        let mut seen: Vec<u64> = session.take_replay().iter().map(|b| b.seq).collect();
        while seen.last().copied() != Some(8) {
            seen.push(session.next_live().await.unwrap().seq);
        }

        assert_eq!(seen, vec![4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn live_duplicates_of_replayed_bars_are_filtered() {
        let (engine, streams, epoch) = setup(100);
        produce_bars(&engine, 4);

        let mut session = streams
            .open(
                "AAPL",
                Timeframe::Min1,
                &ResumeRequest::after(0, epoch.id().to_string()),
            )
            .unwrap();

        // Republish an already-replayed bar directly on the bus (as a
        // raced snapshot would).
        let bus = engine.bus();
        let duplicate = engine.latest("AAPL", Timeframe::Min1, 1).remove(0);
        bus.publish(
            &Topic::bar_new("AAPL", Timeframe::Min1),
            &BusEvent::BarFinalized(duplicate),
        );
        engine.ingest_tick(&tick_at(60_000 * 90, 190)).unwrap();

        assert_eq!(session.take_replay().len(), 4);
        // The duplicate (seq 4) is skipped; the genuinely new bar arrives.
        let next = session.next_live().await.unwrap();
        assert_eq!(next.seq, 5);
    }

    #[test]
    fn epoch_mismatch_is_a_reset_signal() {
        let (engine, streams, _epoch) = setup(100);
        produce_bars(&engine, 3);

        let err = streams
            .open(
                "AAPL",
                Timeframe::Min1,
                &ResumeRequest::after(2, "previous-run".to_string()),
            )
            .unwrap_err();
        assert!(matches!(err, ResumeError::EpochMismatch { .. }));
    }

    #[test]
    fn cursor_without_epoch_cannot_be_trusted() {
        let (engine, streams, _epoch) = setup(100);
        produce_bars(&engine, 3);

        let request = ResumeRequest {
            cursor: Some(2),
            epoch_id: None,
        };
        let err = streams.open("AAPL", Timeframe::Min1, &request).unwrap_err();
        assert!(matches!(err, ResumeError::EpochMismatch { .. }));
    }

    #[test]
    fn evicted_history_is_distinct_from_restart() {
        let (engine, streams, epoch) = setup(3);
        produce_bars(&engine, 8); // seqs 1..=8, capacity 3 keeps 6,7,8

        let err = streams
            .open(
                "AAPL",
                Timeframe::Min1,
                &ResumeRequest::after(2, epoch.id().to_string()),
            )
            .unwrap_err();
        assert!(matches!(err, ResumeError::HistoryEvicted { .. }));

        // A cursor inside the retained window still resumes.
        let mut ok = streams
            .open(
                "AAPL",
                Timeframe::Min1,
                &ResumeRequest::after(6, epoch.id().to_string()),
            )
            .unwrap();
        let replayed: Vec<u64> = ok.take_replay().iter().map(|b| b.seq).collect();
        assert_eq!(replayed, vec![7, 8]);
    }

    #[tokio::test]
    async fn dropping_session_unregisters_subscription() {
        let (engine, streams, _epoch) = setup(100);
        let bus = engine.bus();

        let session = streams
            .open("AAPL", Timeframe::Min1, &ResumeRequest::live())
            .unwrap();
        assert_eq!(bus.total_subscribers(), 1);

        drop(session);
        assert_eq!(bus.total_subscribers(), 0);
    }

    #[test]
    fn epoch_status_is_exposed() {
        let (_engine, streams, epoch) = setup(10);
        let status = streams.epoch_status();
        assert_eq!(status.epoch_id, epoch.id());
    }
}
