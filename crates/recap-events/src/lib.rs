use std::collections::HashMap;
use std::sync::Arc;

use async_stream::stream;
use futures_util::Stream;
use parking_lot::Mutex;
use recap_protocol::{Event, EventKind, SeqNo, SessionId};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

pub const DEFAULT_CAPACITY: usize = 1024;

/// Item yielded by filtered subscriptions.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(Event),
    /// The subscriber fell behind and this many events were dropped for it.
    Lagged(u64),
}

/// Fans events out to any number of observers.
///
/// Sequence numbers are assigned per session under the same lock that sends,
/// so every subscriber sees a session's events in `seq` order. There is no
/// replay: a subscriber only sees events published after it subscribed.
#[derive(Clone, Debug)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<Event>,
    sequences: Arc<Mutex<HashMap<SessionId, SeqNo>>>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequences: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Assigns the next sequence number for `session_id` and publishes.
    pub fn emit(&self, session_id: &SessionId, kind: EventKind) -> Event {
        let mut sequences = self.sequences.lock();
        let seq = sequences.entry(session_id.clone()).or_insert(0);
        *seq += 1;
        let event = Event::new(session_id.clone(), *seq, kind);
        self.send(event.clone());
        event
    }

    /// Publishes a pre-built event. Later `emit` calls continue after its `seq`.
    pub fn publish(&self, event: Event) {
        let mut sequences = self.sequences.lock();
        let seq = sequences.entry(event.session_id.clone()).or_insert(0);
        if event.seq <= *seq {
            warn!(
                session_id = %event.session_id,
                seq = event.seq,
                last_seq = *seq,
                "publishing event out of sequence"
            );
        }
        *seq = (*seq).max(event.seq);
        self.send(event);
    }

    fn send(&self, event: Event) {
        let event_type = event.kind.event_type();
        let seq = event.seq;
        match self.sender.send(event) {
            Ok(receivers) => debug!(seq, event_type, receivers, "event published"),
            Err(_) => debug!(seq, event_type, "event published with no subscribers"),
        }
    }

    pub fn last_seq(&self, session_id: &SessionId) -> SeqNo {
        self.sequences.lock().get(session_id).copied().unwrap_or(0)
    }

    /// Drops the sequence counter of a superseded session.
    pub fn forget(&self, session_id: &SessionId) {
        self.sequences.lock().remove(session_id);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Live events for one session, with lag surfaced instead of silently skipped.
    pub fn subscribe_session(&self, session_id: SessionId) -> impl Stream<Item = StreamItem> {
        let mut subscription = self.sender.subscribe();
        stream! {
            loop {
                match subscription.recv().await {
                    Ok(event) => {
                        if event.session_id == session_id {
                            yield StreamItem::Event(event);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => yield StreamItem::Lagged(skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use futures_util::StreamExt;
    use recap_protocol::{
        EventKind, PipelineStage, SessionId, SessionState, StageStatus, Trigger,
    };

    use crate::{EventBroadcaster, StreamItem};

    fn progress(message: &str) -> EventKind {
        EventKind::Progress {
            stage: PipelineStage::Process,
            status: StageStatus::Running,
            message: message.to_owned(),
        }
    }

    #[tokio::test]
    async fn sequences_are_per_session_and_start_at_one() -> Result<()> {
        let hub = EventBroadcaster::default();
        let a = SessionId::new_uuid();
        let b = SessionId::new_uuid();
        let mut rx = hub.subscribe();

        hub.emit(&a, progress("a1"));
        hub.emit(&b, progress("b1"));
        hub.emit(&a, progress("a2"));

        let seqs: Vec<_> = (0..3)
            .map(|_| rx.try_recv().map(|e| (e.session_id, e.seq)))
            .collect::<Result<_, _>>()?;
        assert_eq!(seqs, vec![(a.clone(), 1), (b.clone(), 1), (a.clone(), 2)]);
        assert_eq!(hub.last_seq(&a), 2);

        hub.forget(&a);
        assert_eq!(hub.last_seq(&a), 0);
        Ok(())
    }

    #[tokio::test]
    async fn session_stream_filters_other_sessions() -> Result<()> {
        let hub = EventBroadcaster::default();
        let mine = SessionId::new_uuid();
        let other = SessionId::new_uuid();
        let stream = hub.subscribe_session(mine.clone());
        tokio::pin!(stream);

        hub.emit(&other, progress("ignored"));
        hub.emit(
            &mine,
            EventKind::StateChanged {
                from: SessionState::Idle,
                to: SessionState::Recording,
                trigger: Trigger::StartRequested,
                error: None,
            },
        );

        match stream.next().await {
            Some(StreamItem::Event(event)) => {
                assert_eq!(event.session_id, mine);
                assert_eq!(event.seq, 1);
            }
            other => panic!("unexpected stream item {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_is_told_about_lag() -> Result<()> {
        let hub = EventBroadcaster::new(2);
        let session = SessionId::new_uuid();
        let stream = hub.subscribe_session(session.clone());
        tokio::pin!(stream);

        for n in 0..5 {
            hub.emit(&session, progress(&format!("step {n}")));
        }

        match stream.next().await {
            Some(StreamItem::Lagged(skipped)) => assert_eq!(skipped, 3),
            other => panic!("expected lag notice, got {other:?}"),
        }
        match stream.next().await {
            Some(StreamItem::Event(event)) => assert_eq!(event.seq, 4),
            other => panic!("unexpected stream item {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn publish_advances_the_counter() -> Result<()> {
        let hub = EventBroadcaster::default();
        let session = SessionId::new_uuid();
        hub.publish(recap_protocol::Event::new(session.clone(), 7, progress("x")));
        let next = hub.emit(&session, progress("y"));
        assert_eq!(next.seq, 8);
        Ok(())
    }

    #[tokio::test]
    async fn unfiltered_stream_sees_every_session() -> Result<()> {
        let hub = EventBroadcaster::default();
        assert_eq!(hub.subscriber_count(), 0);
        let mut stream = hub.subscribe_stream();
        assert_eq!(hub.subscriber_count(), 1);

        let first = SessionId::new_uuid();
        let second = SessionId::new_uuid();
        hub.emit(&first, progress("a"));
        hub.emit(&second, progress("b"));

        let mut sessions = Vec::new();
        for _ in 0..2 {
            match stream.next().await {
                Some(Ok(event)) => sessions.push(event.session_id),
                other => anyhow::bail!("unexpected stream item: {other:?}"),
            }
        }
        assert_eq!(sessions, vec![first, second]);

        drop(stream);
        assert_eq!(hub.subscriber_count(), 0);
        Ok(())
    }
}
