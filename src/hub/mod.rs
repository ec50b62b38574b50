//! Process-wide publish/subscribe for job progress events.
//!
//! Clients negotiate a session id over plain HTTP, then attach a
//! bidirectional message transport (a WebSocket in the API layer).
//! Publication is non-blocking: each subscription has a bounded buffer
//! and a job filter; an empty filter receives everything, a non-empty
//! filter only its jobs. A subscription whose buffer is full is
//! dropped — the client must renegotiate and reconnect.
//!
//! The subscription table is guarded by a reader/writer lock; publish
//! holds the read side so concurrent publishers never serialize on each
//! other. Per-publisher ordering is preserved by the per-subscription
//! mpsc channels; no cross-publisher order is promised.

use crate::error::{Error, Result};
use crate::types::ProgressEvent;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// Buffered events per subscription before it is dropped
const SUBSCRIPTION_BUFFER: usize = 256;

/// Seconds a negotiated session may stay unattached
const PENDING_SESSION_TTL_SECS: i64 = 60;

#[derive(Debug)]
struct Subscription {
    tx: mpsc::Sender<ProgressEvent>,
    jobs: Arc<Mutex<HashSet<String>>>,
}

type SubscriptionMap = Arc<RwLock<HashMap<String, Subscription>>>;

/// Process-wide progress broadcaster
pub struct ProgressHub {
    subs: SubscriptionMap,
    pending: Mutex<HashMap<String, i64>>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self {
            subs: Arc::new(RwLock::new(HashMap::new())),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Negotiate a new session. The returned id must be presented when
    /// attaching the stream; unattached sessions expire.
    pub fn negotiate(&self, client_hint: Option<&str>) -> String {
        let token: u128 = rand::thread_rng().r#gen();
        let session_id = format!("{:032x}", token);
        let now = chrono::Utc::now().timestamp();

        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|_, negotiated_at| now - *negotiated_at < PENDING_SESSION_TTL_SECS);
            pending.insert(session_id.clone(), now);
        }

        tracing::debug!(session = %session_id, hint = client_hint.unwrap_or(""), "progress session negotiated");
        session_id
    }

    /// Bind a negotiated session to a stream of events.
    ///
    /// Fails for unknown or expired session ids; each session attaches
    /// at most once.
    pub fn attach(self: &Arc<Self>, session_id: &str) -> Result<ProgressStream> {
        let now = chrono::Utc::now().timestamp();
        let live = self
            .pending
            .lock()
            .map(|mut pending| {
                pending
                    .remove(session_id)
                    .is_some_and(|negotiated_at| now - negotiated_at < PENDING_SESSION_TTL_SECS)
            })
            .unwrap_or(false);

        if !live {
            return Err(Error::UnknownSession(session_id.to_string()));
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let jobs = Arc::new(Mutex::new(HashSet::new()));

        if let Ok(mut subs) = self.subs.write() {
            subs.insert(
                session_id.to_string(),
                Subscription {
                    tx,
                    jobs: Arc::clone(&jobs),
                },
            );
        }

        tracing::debug!(session = session_id, "progress session attached");
        Ok(ProgressStream {
            session_id: session_id.to_string(),
            events: rx,
            jobs,
            subs: Arc::clone(&self.subs),
        })
    }

    /// Fan an event out to every matching subscription, without blocking.
    ///
    /// Subscriptions that cannot keep up are dropped.
    pub fn publish(&self, event: ProgressEvent) {
        let mut stale: Vec<String> = Vec::new();

        if let Ok(subs) = self.subs.read() {
            for (session_id, sub) in subs.iter() {
                let wants_event = sub
                    .jobs
                    .lock()
                    .map(|jobs| jobs.is_empty() || jobs.contains(&event.job_id))
                    .unwrap_or(false);
                if !wants_event {
                    continue;
                }

                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(session = %session_id, "progress subscriber lagged, dropping");
                        stale.push(session_id.clone());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        stale.push(session_id.clone());
                    }
                }
            }
        }

        if !stale.is_empty()
            && let Ok(mut subs) = self.subs.write()
        {
            for session_id in stale {
                subs.remove(&session_id);
            }
        }
    }

    /// Number of attached subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subs.read().map(|subs| subs.len()).unwrap_or(0)
    }
}

/// One attached subscription's receiving side.
///
/// Dropping the stream detaches the subscription.
#[derive(Debug)]
pub struct ProgressStream {
    /// The session this stream belongs to
    pub session_id: String,

    /// Delivered events, in publication order per publisher
    pub events: mpsc::Receiver<ProgressEvent>,

    jobs: Arc<Mutex<HashSet<String>>>,
    subs: SubscriptionMap,
}

impl ProgressStream {
    /// Narrow the subscription to a job. The first subscribe switches
    /// the stream from broadcast mode to filtered mode.
    pub fn subscribe_job(&self, job_id: &str) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.insert(job_id.to_string());
        }
    }

    /// Remove a job from the filter. An empty filter means broadcast.
    pub fn unsubscribe_job(&self, job_id: &str) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.remove(job_id);
        }
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        if let Ok(mut subs) = self.subs.write() {
            subs.remove(&self.session_id);
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobKind, ProgressStatus};

    fn event(job_id: &str, message: &str) -> ProgressEvent {
        ProgressEvent {
            job_id: job_id.to_string(),
            kind: JobKind::Download,
            status: ProgressStatus::InProgress,
            percent: 50.0,
            message: message.to_string(),
            error: None,
            chapter: None,
        }
    }

    #[tokio::test]
    async fn broadcast_subscription_receives_every_job() {
        let hub = Arc::new(ProgressHub::new());
        let session = hub.negotiate(None);
        let mut stream = hub.attach(&session).unwrap();

        hub.publish(event("download:1", "a"));
        hub.publish(event("download:2", "b"));

        assert_eq!(stream.events.recv().await.unwrap().job_id, "download:1");
        assert_eq!(stream.events.recv().await.unwrap().job_id, "download:2");
    }

    #[tokio::test]
    async fn filtered_subscription_only_receives_its_jobs() {
        let hub = Arc::new(ProgressHub::new());
        let session = hub.negotiate(None);
        let mut stream = hub.attach(&session).unwrap();

        stream.subscribe_job("download:7");
        hub.publish(event("download:1", "other"));
        hub.publish(event("download:7", "mine"));

        let received = stream.events.recv().await.unwrap();
        assert_eq!(received.job_id, "download:7");
        assert!(
            stream.events.try_recv().is_err(),
            "the unsubscribed job must not be delivered"
        );
    }

    #[tokio::test]
    async fn unsubscribing_the_last_job_returns_to_broadcast() {
        let hub = Arc::new(ProgressHub::new());
        let session = hub.negotiate(None);
        let mut stream = hub.attach(&session).unwrap();

        stream.subscribe_job("download:7");
        stream.unsubscribe_job("download:7");

        hub.publish(event("download:1", "broadcast again"));
        assert_eq!(stream.events.recv().await.unwrap().job_id, "download:1");
    }

    #[tokio::test]
    async fn events_arrive_in_publication_order() {
        let hub = Arc::new(ProgressHub::new());
        let session = hub.negotiate(None);
        let mut stream = hub.attach(&session).unwrap();

        for i in 0..10 {
            hub.publish(event("download:1", &i.to_string()));
        }
        for i in 0..10 {
            assert_eq!(stream.events.recv().await.unwrap().message, i.to_string());
        }
    }

    #[tokio::test]
    async fn attach_with_unknown_session_fails() {
        let hub = Arc::new(ProgressHub::new());
        let err = hub.attach("deadbeef").unwrap_err();
        assert!(matches!(err, Error::UnknownSession(_)));
    }

    #[tokio::test]
    async fn attach_refuses_a_session_past_the_pending_ttl() {
        let hub = Arc::new(ProgressHub::new());
        let session = hub.negotiate(None);

        // Backdate the negotiation past the TTL
        {
            let mut pending = hub.pending.lock().unwrap();
            let stale = chrono::Utc::now().timestamp() - PENDING_SESSION_TTL_SECS - 1;
            pending.insert(session.clone(), stale);
        }

        let err = hub.attach(&session).unwrap_err();
        assert!(matches!(err, Error::UnknownSession(_)));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn sessions_attach_at_most_once() {
        let hub = Arc::new(ProgressHub::new());
        let session = hub.negotiate(None);

        let _stream = hub.attach(&session).unwrap();
        assert!(hub.attach(&session).is_err(), "second attach must fail");
    }

    #[tokio::test]
    async fn negotiated_session_ids_are_unique() {
        let hub = Arc::new(ProgressHub::new());
        let a = hub.negotiate(Some("ui"));
        let b = hub.negotiate(Some("ui"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_not_blocked() {
        let hub = Arc::new(ProgressHub::new());
        let session = hub.negotiate(None);
        let stream = hub.attach(&session).unwrap();
        assert_eq!(hub.subscriber_count(), 1);

        // Never read; overflow the bounded buffer
        for i in 0..(SUBSCRIPTION_BUFFER + 2) {
            hub.publish(event("download:1", &i.to_string()));
        }

        assert_eq!(
            hub.subscriber_count(),
            0,
            "a full buffer must drop the subscription"
        );
        drop(stream);
    }

    #[tokio::test]
    async fn dropping_the_stream_detaches_the_subscription() {
        let hub = Arc::new(ProgressHub::new());
        let session = hub.negotiate(None);
        let stream = hub.attach(&session).unwrap();
        assert_eq!(hub.subscriber_count(), 1);

        drop(stream);
        assert_eq!(hub.subscriber_count(), 0);

        // Publishing into the void is a no-op
        hub.publish(event("download:1", "nobody listening"));
    }

    #[tokio::test]
    async fn publish_reaches_multiple_subscribers_independently() {
        let hub = Arc::new(ProgressHub::new());
        let mut broadcast = hub.attach(&hub.negotiate(None)).unwrap();
        let mut filtered = hub.attach(&hub.negotiate(None)).unwrap();
        filtered.subscribe_job("download:2");

        hub.publish(event("download:1", "one"));
        hub.publish(event("download:2", "two"));

        assert_eq!(broadcast.events.recv().await.unwrap().job_id, "download:1");
        assert_eq!(broadcast.events.recv().await.unwrap().job_id, "download:2");
        assert_eq!(filtered.events.recv().await.unwrap().job_id, "download:2");
        assert!(filtered.events.try_recv().is_err());
    }
}
