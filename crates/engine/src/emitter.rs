//! Per-turn typed event bus.
//!
//! One emitter per turn, thread-safe, with monotonic contiguous `seq`
//! assignment under a single lock. Delivery is non-blocking: each
//! subscriber has a bounded buffer; on overflow the oldest non-essential
//! event is dropped and a single `overflow{dropped}` event is queued in
//! its place. Lifecycle events are never dropped (the buffer stretches
//! for them rather than lose one).

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;

use cortex_domain::event::{EventPayload, TurnEvent, PROTOCOL};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Emitter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct Emitter {
    inner: Arc<EmitterInner>,
}

struct EmitterInner {
    turn_id: String,
    buffer_cap: usize,
    state: Mutex<EmitState>,
}

struct EmitState {
    seq: u64,
    subscribers: Vec<Arc<Subscriber>>,
}

struct Subscriber {
    queue: Mutex<SubQueue>,
    notify: Notify,
}

struct SubQueue {
    events: VecDeque<TurnEvent>,
    /// Evictions since the last overflow event was consumed.
    dropped: u64,
    /// An overflow event is sitting in `events` (its count is bumped in
    /// place on further evictions).
    overflow_pending: bool,
    closed: bool,
}

impl Emitter {
    pub fn new(turn_id: impl Into<String>, buffer_cap: usize) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                turn_id: turn_id.into(),
                buffer_cap: buffer_cap.max(1),
                state: Mutex::new(EmitState {
                    seq: 0,
                    subscribers: Vec::new(),
                }),
            }),
        }
    }

    pub fn turn_id(&self) -> &str {
        &self.inner.turn_id
    }

    /// Attach a new subscriber. Events emitted before subscription are not
    /// replayed.
    pub fn subscribe(&self) -> EventStream {
        let sub = Arc::new(Subscriber {
            queue: Mutex::new(SubQueue {
                events: VecDeque::new(),
                dropped: 0,
                overflow_pending: false,
                closed: false,
            }),
            notify: Notify::new(),
        });
        self.inner.state.lock().subscribers.push(sub.clone());
        EventStream { sub }
    }

    /// Emit one event to every subscriber. Returns the assigned seq.
    pub fn emit(&self, payload: EventPayload) -> u64 {
        let mut state = self.inner.state.lock();
        state.seq += 1;
        let seq = state.seq;
        let event = TurnEvent {
            protocol: PROTOCOL.into(),
            seq,
            turn_id: self.inner.turn_id.clone(),
            ts: Utc::now().to_rfc3339(),
            payload,
        };

        let subscribers: Vec<Arc<Subscriber>> = state.subscribers.clone();
        let mut overflow_seqs: Vec<(Arc<Subscriber>, u64)> = Vec::new();
        for sub in &subscribers {
            if let PushOutcome::NeedsOverflow = push_bounded(sub, self.inner.buffer_cap, &event) {
                // Mint the overflow event under the same seq lock so the
                // counter stays contiguous.
                state.seq += 1;
                overflow_seqs.push((sub.clone(), state.seq));
            }
            sub.notify.notify_one();
        }

        for (sub, overflow_seq) in overflow_seqs {
            let mut q = sub.queue.lock();
            let dropped = q.dropped;
            q.overflow_pending = true;
            q.events.push_back(TurnEvent {
                protocol: PROTOCOL.into(),
                seq: overflow_seq,
                turn_id: self.inner.turn_id.clone(),
                ts: Utc::now().to_rfc3339(),
                payload: EventPayload::Overflow { dropped },
            });
            drop(q);
            sub.notify.notify_one();
        }

        seq
    }

    /// Convenience for in-band diagnostics mirrored to `tracing`.
    pub fn log(&self, level: &str, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(source, level, "{message}");
        self.emit(EventPayload::Log {
            level: level.to_string(),
            source: source.to_string(),
            message,
        });
    }

    /// Mark the stream complete. Subscribers drain their queues and then
    /// observe end-of-stream.
    pub fn close(&self) {
        let state = self.inner.state.lock();
        for sub in &state.subscribers {
            sub.queue.lock().closed = true;
            sub.notify.notify_one();
        }
    }
}

enum PushOutcome {
    Pushed,
    NeedsOverflow,
}

fn push_bounded(sub: &Subscriber, cap: usize, event: &TurnEvent) -> PushOutcome {
    let mut q = sub.queue.lock();
    if q.closed {
        return PushOutcome::Pushed;
    }

    let mut outcome = PushOutcome::Pushed;
    if q.events.len() >= cap {
        let evict = q.events.iter().position(|e| e.payload.is_droppable());
        match evict {
            Some(idx) => {
                q.events.remove(idx);
                q.dropped += 1;
                if q.overflow_pending {
                    bump_overflow(&mut q);
                } else {
                    outcome = PushOutcome::NeedsOverflow;
                }
            }
            None if event.payload.is_droppable() => {
                // Buffer full of essential events; shed the incoming one.
                q.dropped += 1;
                if q.overflow_pending {
                    bump_overflow(&mut q);
                    return PushOutcome::Pushed;
                }
                return PushOutcome::NeedsOverflow;
            }
            // Essential events are never dropped; let the buffer stretch.
            None => {}
        }
    }
    q.events.push_back(event.clone());
    outcome
}

fn bump_overflow(q: &mut SubQueue) {
    let dropped = q.dropped;
    for ev in q.events.iter_mut() {
        if let EventPayload::Overflow { dropped: d } = &mut ev.payload {
            *d = dropped;
            break;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventStream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receiving side of a subscription.
pub struct EventStream {
    sub: Arc<Subscriber>,
}

impl EventStream {
    /// Await the next event; `None` once the turn is complete and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<TurnEvent> {
        loop {
            let notified = self.sub.notify.notified();
            {
                let mut q = self.sub.queue.lock();
                if let Some(event) = q.events.pop_front() {
                    if matches!(event.payload, EventPayload::Overflow { .. }) {
                        q.overflow_pending = false;
                        q.dropped = 0;
                    }
                    return Some(event);
                }
                if q.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking pop, for tests and polling consumers.
    pub fn try_recv(&mut self) -> Option<TurnEvent> {
        let mut q = self.sub.queue.lock();
        let event = q.events.pop_front()?;
        if matches!(event.payload, EventPayload::Overflow { .. }) {
            q.overflow_pending = false;
            q.dropped = 0;
        }
        Some(event)
    }

    /// Drain everything currently buffered plus anything until close.
    pub async fn collect_all(mut self) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some(ev) = self.recv().await {
            events.push(ev);
        }
        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> EventPayload {
        EventPayload::AssistantDelta { text: text.into() }
    }

    fn node_start(stage: &str) -> EventPayload {
        EventPayload::NodeStart {
            stage_id: stage.into(),
            role_key: "answer".into(),
        }
    }

    #[test]
    fn seq_starts_at_one_and_is_contiguous() {
        let emitter = Emitter::new("t1", 64);
        let mut stream = emitter.subscribe();
        assert_eq!(emitter.emit(delta("a")), 1);
        assert_eq!(emitter.emit(delta("b")), 2);
        assert_eq!(emitter.emit(delta("c")), 3);

        let seqs: Vec<u64> = std::iter::from_fn(|| stream.try_recv())
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let emitter = Emitter::new("t1", 64);
        emitter.emit(delta("early"));
        let mut stream = emitter.subscribe();
        emitter.emit(delta("late"));
        let ev = stream.try_recv().unwrap();
        assert_eq!(ev.seq, 2);
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn overflow_drops_oldest_droppable_and_queues_overflow_event() {
        let emitter = Emitter::new("t1", 2);
        let mut stream = emitter.subscribe();
        emitter.emit(delta("one"));
        emitter.emit(delta("two"));
        emitter.emit(delta("three")); // evicts "one"

        let events: Vec<TurnEvent> = std::iter::from_fn(|| stream.try_recv()).collect();
        let kinds: Vec<&str> = events.iter().map(|e| e.payload.kind()).collect();
        assert!(kinds.contains(&"overflow"));
        let texts: Vec<&str> = events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::AssistantDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["two", "three"], "oldest delta was shed");
    }

    #[test]
    fn essential_events_survive_overflow() {
        let emitter = Emitter::new("t1", 2);
        let mut stream = emitter.subscribe();
        emitter.emit(node_start("router"));
        emitter.emit(node_start("answer"));
        // Queue is full of essentials; incoming droppable is shed instead.
        emitter.emit(delta("lost"));

        let events: Vec<TurnEvent> = std::iter::from_fn(|| stream.try_recv()).collect();
        let kinds: Vec<&str> = events.iter().map(|e| e.payload.kind()).collect();
        assert!(kinds.contains(&"node_start"));
        assert!(!kinds.contains(&"assistant_delta"));
        assert!(kinds.contains(&"overflow"));
    }

    #[test]
    fn repeated_overflow_bumps_single_queued_event() {
        let emitter = Emitter::new("t1", 1);
        let mut stream = emitter.subscribe();
        emitter.emit(delta("a"));
        emitter.emit(delta("b")); // evict a, queue overflow{1}
        emitter.emit(delta("c")); // evict b, bump overflow to 2

        let events: Vec<TurnEvent> = std::iter::from_fn(|| stream.try_recv()).collect();
        let overflows: Vec<u64> = events
            .iter()
            .filter_map(|e| match e.payload {
                EventPayload::Overflow { dropped } => Some(dropped),
                _ => None,
            })
            .collect();
        assert_eq!(overflows.len(), 1, "one overflow event per burst");
        assert_eq!(overflows[0], 2);
    }

    #[tokio::test]
    async fn recv_returns_none_after_close() {
        let emitter = Emitter::new("t1", 8);
        let mut stream = emitter.subscribe();
        emitter.emit(delta("only"));
        emitter.close();

        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_wakes_on_emit_from_other_task() {
        let emitter = Emitter::new("t1", 8);
        let mut stream = emitter.subscribe();
        let e2 = emitter.clone();
        let handle = tokio::spawn(async move { stream.recv().await });
        tokio::task::yield_now().await;
        e2.emit(delta("ping"));
        let received = handle.await.unwrap().unwrap();
        assert_eq!(received.seq, 1);
    }
}
