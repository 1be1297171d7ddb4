//! Per-connection broadcast of session output.
//!
//! Each subscriber connection runs its own polling loop over the store.
//! A connection resolves a session (explicit id, then the Active session,
//! then the most recently ended one) and serves it in one of two modes:
//!
//! - **Replay**: `replay=true` or a terminal session. Emits `session`, every
//!   chunk in order, then `replay_complete`, and ends.
//! - **Live**: emits `session`, catches up from `fromSequence`, then polls
//!   for new chunks until the maximum connection duration, following the
//!   producer across session changes. A session left behind is drained
//!   (remaining chunks, then `session_end`) before the next one is announced.
//!
//! The stream ends early when the client disconnects (the response body is
//! dropped) or the server shuts down.

use std::time::Duration;

use async_stream::stream;
use livetail_core::codec::encode_chunk;
use livetail_core::config::StreamConfig;
use livetail_core::db::unix_timestamp;
use livetail_core::protocol::{
    ChunkEvent, CountdownEvent, ErrorEvent, HeartbeatEvent, ReplayCompleteEvent,
    SessionEndEvent, StreamQuery, TimeoutEvent,
};
use livetail_core::{Chunk, Session, StreamEvent};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::storage::{DatabaseError, StreamDatabase};

const MIN_TICK: Duration = Duration::from_millis(10);

/// Resolve which session a connection should serve.
pub async fn resolve_session(
    db: &StreamDatabase,
    explicit: Option<&str>,
) -> Result<Option<Session>, DatabaseError> {
    if let Some(id) = explicit {
        return db.get_session(id).await;
    }
    if let Some(active) = db.get_active_session().await? {
        return Ok(Some(active));
    }
    db.get_latest_session().await
}

/// Every event of the replay path for `session`.
pub async fn replay_events(
    db: &StreamDatabase,
    session: &Session,
) -> Result<Vec<StreamEvent>, DatabaseError> {
    let chunks = db.get_all_chunks(&session.id).await?;
    let total_chunks = chunks.len() as u64;

    let mut events = Vec::with_capacity(chunks.len() + 2);
    events.push(StreamEvent::Session(session.clone()));
    events.extend(chunks.iter().map(chunk_event));
    events.push(StreamEvent::ReplayComplete(ReplayCompleteEvent {
        session_id: session.id.clone(),
        total_chunks,
    }));
    Ok(events)
}

fn chunk_event(chunk: &Chunk) -> StreamEvent {
    StreamEvent::Chunk(ChunkEvent {
        session_id: chunk.session_id.clone(),
        sequence: chunk.sequence,
        content: encode_chunk(&chunk.content),
    })
}

fn error_event(err: &DatabaseError) -> StreamEvent {
    StreamEvent::Error(ErrorEvent {
        message: err.to_string(),
    })
}

// =========================================================================
// Live tail state
// =========================================================================

/// Live-path state of one connection.
#[derive(Debug)]
pub struct LiveTail {
    explicit: Option<String>,
    /// Pending `fromSequence` and the session it refers to. Consumed by the
    /// first session the connection resolves.
    resume: Option<(Option<String>, i64)>,
    current: Option<String>,
    last_sequence: Option<i64>,
    ended: bool,
    announced_none: bool,
}

impl LiveTail {
    pub fn new(query: &StreamQuery) -> Self {
        Self {
            explicit: query.session_id.clone(),
            resume: query
                .from_sequence
                .map(|from| (query.resume_session_id.clone(), from)),
            current: None,
            last_sequence: None,
            ended: false,
            announced_none: false,
        }
    }

    pub const fn last_sequence(&self) -> Option<i64> {
        self.last_sequence
    }

    pub fn current_session(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// One polling iteration: re-resolve, then emit whatever is new.
    pub async fn step(&mut self, db: &StreamDatabase) -> Result<Vec<StreamEvent>, DatabaseError> {
        let mut events = Vec::new();

        let Some(session) = resolve_session(db, self.explicit.as_deref()).await? else {
            self.drain_previous(db, &mut events).await?;
            if !self.announced_none {
                events.push(StreamEvent::NoSession);
                self.announced_none = true;
            }
            self.current = None;
            return Ok(events);
        };
        self.announced_none = false;

        if self.current.as_deref() != Some(session.id.as_str()) {
            self.drain_previous(db, &mut events).await?;
            debug!(session_id = %session.id, "Stream switched session");
            self.last_sequence = self.starting_sequence(&session.id);
            self.current = Some(session.id.clone());
            self.ended = false;
            events.push(StreamEvent::Session(session.clone()));
        }

        if self.ended {
            return Ok(events);
        }

        // Status is read before chunks, so a terminal session's chunks are
        // all visible here and precede its session_end.
        let chunks = db
            .get_chunks_since(&session.id, self.last_sequence.unwrap_or(-1))
            .await?;
        for chunk in &chunks {
            events.push(chunk_event(chunk));
            self.last_sequence = Some(chunk.sequence);
        }

        if session.status.is_terminal() {
            events.push(StreamEvent::SessionEnd(SessionEndEvent {
                session_id: session.id.clone(),
                status: session.status,
            }));
            self.ended = true;
        }

        Ok(events)
    }

    /// Flush the tail of the session being left: chunks written since the
    /// last poll, then its `session_end`. Nothing if it was pruned.
    async fn drain_previous(
        &mut self,
        db: &StreamDatabase,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), DatabaseError> {
        if self.ended {
            return Ok(());
        }
        let Some(previous) = self.current.take() else {
            return Ok(());
        };
        let Some(session) = db.get_session(&previous).await? else {
            debug!(session_id = %previous, "Previous session pruned before drain");
            return Ok(());
        };

        let chunks = db
            .get_chunks_since(&session.id, self.last_sequence.unwrap_or(-1))
            .await?;
        events.extend(chunks.iter().map(chunk_event));

        if session.status.is_terminal() {
            events.push(StreamEvent::SessionEnd(SessionEndEvent {
                session_id: session.id,
                status: session.status,
            }));
        }
        self.ended = true;
        Ok(())
    }

    fn starting_sequence(&mut self, session_id: &str) -> Option<i64> {
        match self.resume.take() {
            Some((None, from)) => Some(from),
            Some((Some(resume_id), from)) if resume_id == session_id => Some(from),
            Some((Some(resume_id), _)) => {
                debug!(%resume_id, session_id, "Resume target differs, catching up from start");
                None
            }
            None => None,
        }
    }
}

/// Tracks the schedule value last sent to a connection.
#[derive(Debug, Default)]
pub struct CountdownTracker {
    last: Option<i64>,
}

impl CountdownTracker {
    /// Event to send for a freshly read schedule value, if it changed.
    pub fn observe(&mut self, next_check_at: Option<i64>) -> Option<StreamEvent> {
        match (self.last, next_check_at) {
            (Some(prev), Some(next)) if prev == next => None,
            (_, Some(next)) => {
                self.last = Some(next);
                Some(StreamEvent::Countdown(CountdownEvent {
                    next_check_at: next,
                }))
            }
            (Some(_), None) => {
                self.last = None;
                Some(StreamEvent::CountdownClear)
            }
            (None, None) => None,
        }
    }
}

// =========================================================================
// Event stream
// =========================================================================

enum Tick {
    Shutdown,
    Deadline,
    Poll,
    Heartbeat,
    Countdown,
}

/// Build the event stream for one connection.
pub fn event_stream(
    db: StreamDatabase,
    config: StreamConfig,
    query: StreamQuery,
    shutdown: CancellationToken,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    stream! {
        let deadline = Instant::now() + config.max_duration();
        let replay = query.replay.unwrap_or(false);

        let initial = match resolve_session(&db, query.session_id.as_deref()).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Stream session resolution failed");
                yield error_event(&e);
                return;
            }
        };

        if let Some(session) = initial.filter(|s| replay || !s.is_active()) {
            match replay_events(&db, &session).await {
                Ok(events) => {
                    debug!(session_id = %session.id, events = events.len(), "Replaying session");
                    for event in events {
                        yield event;
                    }
                }
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Replay failed");
                    yield error_event(&e);
                }
            }
            return;
        }

        let mut tail = LiveTail::new(&query);
        let mut countdown = CountdownTracker::default();

        let poll_every = config.poll_interval().max(MIN_TICK);
        let heartbeat_every = config.heartbeat_interval().max(MIN_TICK);
        let mut poll = tokio::time::interval(poll_every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut countdown_check = tokio::time::interval(config.countdown_interval().max(MIN_TICK));
        countdown_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let timeout = tokio::time::sleep_until(deadline);
        tokio::pin!(timeout);

        loop {
            let tick = tokio::select! {
                biased;
                () = shutdown.cancelled() => Tick::Shutdown,
                () = &mut timeout => Tick::Deadline,
                _ = poll.tick() => Tick::Poll,
                _ = heartbeat.tick() => Tick::Heartbeat,
                _ = countdown_check.tick() => Tick::Countdown,
            };

            match tick {
                Tick::Shutdown => {
                    debug!("Server shutting down, closing stream");
                    return;
                }
                Tick::Deadline => {
                    yield StreamEvent::Timeout(TimeoutEvent {
                        last_sequence: tail.last_sequence(),
                    });
                    return;
                }
                Tick::Poll => match tail.step(&db).await {
                    Ok(events) => {
                        for event in events {
                            yield event;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Stream poll failed");
                        yield error_event(&e);
                        return;
                    }
                },
                Tick::Heartbeat => {
                    yield StreamEvent::Heartbeat(HeartbeatEvent {
                        timestamp: unix_timestamp(),
                    });
                }
                Tick::Countdown => match db.get_next_check().await {
                    Ok(value) => {
                        if let Some(event) = countdown.observe(value) {
                            yield event;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Schedule read failed");
                        yield error_event(&e);
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livetail_core::SessionStatus;
    use livetail_core::codec::decode_chunk;
    use tokio_stream::StreamExt;

    async fn test_db() -> StreamDatabase {
        StreamDatabase::open_in_memory().await.unwrap()
    }

    async fn session_with_chunks(db: &StreamDatabase, count: i64) -> Session {
        let session = db.create_session(1).await.unwrap();
        for seq in 0..count {
            db.append_chunk(&session.id, seq, format!("line {seq}\n").as_bytes())
                .await
                .unwrap();
        }
        session
    }

    fn sequences(events: &[StreamEvent]) -> Vec<i64> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(c) => Some(c.sequence),
                _ => None,
            })
            .collect()
    }

    fn quick_config(max_duration_secs: u64) -> StreamConfig {
        StreamConfig {
            poll_interval_ms: 20,
            heartbeat_secs: 30,
            countdown_check_secs: 5,
            max_duration_secs,
        }
    }

    async fn backdate_end(db: &StreamDatabase, id: &str, secs: i64) {
        sqlx::query("UPDATE sessions SET ended_at = ended_at - ? WHERE id = ?")
            .bind(secs)
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resolution_prefers_explicit_then_active_then_latest() {
        let db = test_db().await;
        assert!(resolve_session(&db, None).await.unwrap().is_none());

        let first = db.create_session(1).await.unwrap();
        let second = db.create_session(2).await.unwrap();
        db.end_session(&second.id, SessionStatus::Completed)
            .await
            .unwrap();

        let resolved = resolve_session(&db, None).await.unwrap().unwrap();
        assert_eq!(resolved.id, first.id);

        let resolved = resolve_session(&db, Some(&second.id)).await.unwrap().unwrap();
        assert_eq!(resolved.id, second.id);

        backdate_end(&db, &second.id, 30).await;
        db.end_session(&first.id, SessionStatus::Failed)
            .await
            .unwrap();
        let resolved = resolve_session(&db, None).await.unwrap().unwrap();
        assert_eq!(resolved.id, first.id);

        assert!(resolve_session(&db, Some("ghost")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn catch_up_from_sequence_is_exclusive() {
        let db = test_db().await;
        session_with_chunks(&db, 6).await;

        let mut tail = LiveTail::new(&StreamQuery {
            from_sequence: Some(3),
            ..StreamQuery::default()
        });
        let events = tail.step(&db).await.unwrap();

        assert!(matches!(events[0], StreamEvent::Session(_)));
        assert_eq!(sequences(&events), vec![4, 5]);
        assert_eq!(tail.last_sequence(), Some(5));
        assert!(tail.step(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_tail_emits_only_new_chunks() {
        let db = test_db().await;
        let session = session_with_chunks(&db, 2).await;
        let mut tail = LiveTail::new(&StreamQuery::default());

        assert_eq!(sequences(&tail.step(&db).await.unwrap()), vec![0, 1]);

        db.append_chunk(&session.id, 2, b"more").await.unwrap();
        db.append_chunk(&session.id, 3, b"more").await.unwrap();
        let events = tail.step(&db).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(sequences(&events), vec![2, 3]);
    }

    #[tokio::test]
    async fn session_end_is_emitted_once_with_no_chunks_after() {
        let db = test_db().await;
        let session = session_with_chunks(&db, 3).await;
        let mut tail = LiveTail::new(&StreamQuery::default());
        tail.step(&db).await.unwrap();

        db.append_chunk(&session.id, 3, b"last").await.unwrap();
        db.end_session(&session.id, SessionStatus::Completed)
            .await
            .unwrap();

        let events = tail.step(&db).await.unwrap();
        assert_eq!(sequences(&events), vec![3]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::SessionEnd(SessionEndEvent {
                session_id: session.id.clone(),
                status: SessionStatus::Completed,
            }))
        );

        assert!(!db.append_chunk(&session.id, 4, b"late").await.unwrap());
        assert!(tail.step(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn switch_between_polls_drains_the_old_session_first() {
        let db = test_db().await;
        let old = session_with_chunks(&db, 1).await;
        let mut tail = LiveTail::new(&StreamQuery::default());
        assert_eq!(sequences(&tail.step(&db).await.unwrap()), vec![0]);

        db.append_chunk(&old.id, 1, b"final\n").await.unwrap();
        db.end_session(&old.id, SessionStatus::Completed)
            .await
            .unwrap();
        let fresh = session_with_chunks(&db, 1).await;

        let events = tail.step(&db).await.unwrap();
        let names: Vec<&str> = events.iter().map(StreamEvent::name).collect();
        assert_eq!(names, vec!["chunk", "session_end", "session", "chunk"]);
        assert!(matches!(&events[0], StreamEvent::Chunk(c) if c.session_id == old.id && c.sequence == 1));
        assert_eq!(
            events[1],
            StreamEvent::SessionEnd(SessionEndEvent {
                session_id: old.id.clone(),
                status: SessionStatus::Completed,
            })
        );
        assert!(matches!(&events[2], StreamEvent::Session(s) if s.id == fresh.id));
        assert_eq!(tail.current_session(), Some(fresh.id.as_str()));
        assert_eq!(tail.last_sequence(), Some(0));
    }

    #[tokio::test]
    async fn switch_after_prune_skips_the_old_session() {
        let db = test_db().await;
        let old = session_with_chunks(&db, 2).await;
        let mut tail = LiveTail::new(&StreamQuery::default());
        tail.step(&db).await.unwrap();

        db.end_session(&old.id, SessionStatus::Failed)
            .await
            .unwrap();
        let fresh = db.create_session(2).await.unwrap();
        db.prune_old_sessions(1).await.unwrap();
        assert!(db.get_session(&old.id).await.unwrap().is_none());

        let events = tail.step(&db).await.unwrap();
        assert_eq!(events, vec![StreamEvent::Session(fresh)]);
    }

    #[tokio::test]
    async fn new_session_resets_catch_up() {
        let db = test_db().await;
        let old = session_with_chunks(&db, 3).await;
        let mut tail = LiveTail::new(&StreamQuery::default());
        tail.step(&db).await.unwrap();
        db.end_session(&old.id, SessionStatus::Completed)
            .await
            .unwrap();
        tail.step(&db).await.unwrap();

        let fresh = session_with_chunks(&db, 1).await;
        let events = tail.step(&db).await.unwrap();
        assert!(matches!(&events[0], StreamEvent::Session(s) if s.id == fresh.id));
        assert_eq!(sequences(&events), vec![0]);
        assert_eq!(tail.current_session(), Some(fresh.id.as_str()));
    }

    #[tokio::test]
    async fn resume_guard_ignores_sequence_from_another_session() {
        let db = test_db().await;
        let session = session_with_chunks(&db, 3).await;

        let mut stale = LiveTail::new(&StreamQuery {
            from_sequence: Some(10),
            resume_session_id: Some("previous-session".into()),
            ..StreamQuery::default()
        });
        assert_eq!(sequences(&stale.step(&db).await.unwrap()), vec![0, 1, 2]);

        let mut matching = LiveTail::new(&StreamQuery {
            from_sequence: Some(0),
            resume_session_id: Some(session.id.clone()),
            ..StreamQuery::default()
        });
        assert_eq!(sequences(&matching.step(&db).await.unwrap()), vec![1, 2]);
    }

    #[tokio::test]
    async fn no_session_is_announced_once() {
        let db = test_db().await;
        let mut tail = LiveTail::new(&StreamQuery::default());
        assert_eq!(tail.step(&db).await.unwrap(), vec![StreamEvent::NoSession]);
        assert!(tail.step(&db).await.unwrap().is_empty());

        db.create_session(1).await.unwrap();
        let events = tail.step(&db).await.unwrap();
        assert!(matches!(events[0], StreamEvent::Session(_)));
    }

    #[tokio::test]
    async fn replay_reproduces_bytes() {
        let db = test_db().await;
        let session = session_with_chunks(&db, 4).await;
        db.end_session(&session.id, SessionStatus::Completed)
            .await
            .unwrap();

        let events = replay_events(&db, &session).await.unwrap();
        assert!(matches!(events.first(), Some(StreamEvent::Session(_))));
        assert_eq!(
            events.last(),
            Some(&StreamEvent::ReplayComplete(ReplayCompleteEvent {
                session_id: session.id.clone(),
                total_chunks: 4,
            }))
        );

        let mut bytes = Vec::new();
        for event in &events {
            if let StreamEvent::Chunk(c) = event {
                bytes.extend(decode_chunk(&c.content).unwrap());
            }
        }
        assert_eq!(bytes, b"line 0\nline 1\nline 2\nline 3\n");
    }

    #[test]
    fn countdown_emits_on_change_and_clear() {
        let mut tracker = CountdownTracker::default();
        assert_eq!(tracker.observe(None), None);
        assert_eq!(
            tracker.observe(Some(100)),
            Some(StreamEvent::Countdown(CountdownEvent { next_check_at: 100 }))
        );
        assert_eq!(tracker.observe(Some(100)), None);
        assert_eq!(
            tracker.observe(Some(160)),
            Some(StreamEvent::Countdown(CountdownEvent { next_check_at: 160 }))
        );
        assert_eq!(tracker.observe(None), Some(StreamEvent::CountdownClear));
        assert_eq!(tracker.observe(None), None);
    }

    #[tokio::test]
    async fn terminal_session_stream_is_a_replay() {
        let db = test_db().await;
        let session = session_with_chunks(&db, 2).await;
        db.end_session(&session.id, SessionStatus::Failed)
            .await
            .unwrap();

        let events: Vec<StreamEvent> = event_stream(
            db,
            quick_config(60),
            StreamQuery::default(),
            CancellationToken::new(),
        )
        .collect()
        .await;

        let names: Vec<&str> = events.iter().map(StreamEvent::name).collect();
        assert_eq!(names, vec!["session", "chunk", "chunk", "replay_complete"]);
    }

    #[tokio::test]
    async fn live_stream_times_out_with_last_sequence() {
        let db = test_db().await;
        session_with_chunks(&db, 3).await;

        let events: Vec<StreamEvent> = event_stream(
            db,
            quick_config(1),
            StreamQuery::default(),
            CancellationToken::new(),
        )
        .collect()
        .await;

        assert!(matches!(events[0], StreamEvent::Session(_)));
        assert_eq!(sequences(&events), vec![0, 1, 2]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Timeout(TimeoutEvent {
                last_sequence: Some(2)
            }))
        );
    }

    #[tokio::test]
    async fn live_stream_announces_countdown() {
        let db = test_db().await;
        session_with_chunks(&db, 1).await;
        db.set_next_check(Some(1_900_000_000)).await.unwrap();

        let events: Vec<StreamEvent> = event_stream(
            db,
            quick_config(1),
            StreamQuery::default(),
            CancellationToken::new(),
        )
        .collect()
        .await;

        assert!(events.contains(&StreamEvent::Countdown(CountdownEvent {
            next_check_at: 1_900_000_000
        })));
    }

    #[tokio::test]
    async fn shutdown_ends_live_stream() {
        let db = test_db().await;
        session_with_chunks(&db, 1).await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let events: Vec<StreamEvent> =
            event_stream(db, quick_config(60), StreamQuery::default(), shutdown)
                .collect()
                .await;
        assert!(events.is_empty());
    }
}
