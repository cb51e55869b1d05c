//! Dispatch loop.
//!
//! Drains the delivery queue in batches while the readiness gate is open.
//! Jobs in a batch are sent concurrently (optionally staggered), each under
//! its own timeout, and failures are handled per job. Only one drain cycle
//! runs at a time; concurrent calls to [`Dispatcher::drain`] return
//! immediately and the running cycle picks their work up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{FailurePolicy, RelayConfig};
use crate::error::RelayError;
use crate::media::MediaResolver;
use crate::transport::{OutboundContent, OutboundTransport, SendOptions};

use super::{DeliveryQueue, DestinationHandle, JobPayload, ReadinessGate, RelayJob};

/// Tuning knobs for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub concurrent_messages: usize,
    pub batch_delay: Duration,
    pub max_retry_delay: Duration,
    pub stagger: Duration,
    pub send_timeout: Duration,
    pub failure_policy: FailurePolicy,
    /// Total delivery attempts before a job is dropped
    pub max_attempts: Option<u32>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

impl DispatchSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            concurrent_messages: config.concurrent_messages.max(1),
            batch_delay: config.batch_delay(),
            max_retry_delay: config.max_retry_delay(),
            stagger: config.stagger(),
            send_timeout: config.send_timeout(),
            failure_policy: config.failure_policy,
            max_attempts: config.max_attempts,
        }
    }
}

/// Lifetime delivery counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// What one call to [`Dispatcher::drain`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub batches: usize,
    pub sent: usize,
    pub failed: usize,
    pub requeued: usize,
    pub dropped: usize,
    /// Jobs put back untouched because the gate closed mid-batch
    pub deferred: usize,
}

impl DrainReport {
    pub fn is_noop(&self) -> bool {
        self.batches == 0
    }
}

enum Delivery {
    Sent,
    Deferred,
    Failed(RelayError),
}

/// Clears the in-progress flag however the drain cycle ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The batched, concurrent queue drainer.
pub struct Dispatcher {
    queue: Arc<Mutex<DeliveryQueue>>,
    gate: ReadinessGate,
    transport: Arc<dyn OutboundTransport>,
    resolver: MediaResolver,
    settings: DispatchSettings,
    draining: AtomicBool,
    stats: DispatchStats,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<Mutex<DeliveryQueue>>,
        gate: ReadinessGate,
        transport: Arc<dyn OutboundTransport>,
        resolver: MediaResolver,
        settings: DispatchSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            gate,
            transport,
            resolver,
            settings,
            draining: AtomicBool::new(false),
            stats: DispatchStats::default(),
            shutdown,
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Whether a drain cycle is running right now.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    fn lock_queue(&self) -> MutexGuard<'_, DeliveryQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn has_work(&self) -> bool {
        !self.shutting_down() && self.gate.is_open() && !self.lock_queue().is_empty()
    }

    /// Drain the queue until it is empty, the gate closes or shutdown starts.
    ///
    /// A no-op when another drain is in progress, the gate is closed or the
    /// queue is empty.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            if !self.has_work() {
                return report;
            }
            if self
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!("Drain already in progress");
                return report;
            }

            {
                let _guard = DrainGuard(&self.draining);
                self.drain_cycle(&mut report).await;
            }

            // Work enqueued while the flag was being released would otherwise
            // wait for the next kick or poll.
        }
    }

    async fn drain_cycle(&self, report: &mut DrainReport) {
        let mut shutdown = self.shutdown.clone();
        let mut delay = self.settings.batch_delay;

        loop {
            if self.shutting_down() || !self.gate.is_open() {
                return;
            }

            let batch = self.lock_queue().dequeue_batch(self.settings.concurrent_messages);
            if batch.is_empty() {
                return;
            }

            let (had_failures, gate_closed) = self.run_batch(batch, report).await;
            report.batches += 1;

            if gate_closed {
                info!("Gate closed mid-batch, pausing dispatch");
                return;
            }
            if self.lock_queue().is_empty() || !self.gate.is_open() {
                return;
            }

            delay = if had_failures {
                delay.saturating_mul(2).min(self.settings.max_retry_delay)
            } else {
                self.settings.batch_delay
            };
            debug!(delay_ms = delay.as_millis() as u64, "Waiting before next batch");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(()) = shutdown.changed() => return,
            }
        }
    }

    /// Send one batch and apply the failure policy.
    ///
    /// Returns `(had_failures, gate_closed)`.
    async fn run_batch(&self, batch: Vec<RelayJob>, report: &mut DrainReport) -> (bool, bool) {
        let size = batch.len();
        debug!(size, "Dispatching batch");

        let sends = batch
            .into_iter()
            .enumerate()
            .map(|(index, job)| self.deliver(index, job));
        let results = join_all(sends).await;

        let mut had_failures = false;
        let mut gate_closed = false;
        let mut requeue = Vec::new();

        for (job, delivery) in results {
            match delivery {
                Delivery::Sent => {
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                    report.sent += 1;
                    debug!(
                        job_id = %job.id,
                        kind = %job.kind,
                        attempts = job.attempts,
                        latency_ms = job.age().num_milliseconds(),
                        "Job delivered"
                    );
                }
                Delivery::Deferred => {
                    gate_closed = true;
                    report.deferred += 1;
                    requeue.push(job);
                }
                Delivery::Failed(e) => {
                    had_failures = true;
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    report.failed += 1;
                    if let Some(job) = self.after_failure(job, &e) {
                        report.requeued += 1;
                        requeue.push(job);
                    } else {
                        report.dropped += 1;
                    }
                }
            }
        }

        if !requeue.is_empty() {
            let mut queue = self.lock_queue();
            for job in requeue.into_iter().rev() {
                queue.requeue_front(job);
            }
        }

        (had_failures, gate_closed)
    }

    /// Apply the failure policy; returns the job to requeue, if any.
    fn after_failure(&self, job: RelayJob, err: &RelayError) -> Option<RelayJob> {
        if let RelayError::Media(media) = err {
            debug!(job_id = %job.id, transient = media.is_transient(), "Media resolution failed");
        }
        match self.settings.failure_policy {
            FailurePolicy::Drop => {
                warn!(job_id = %job.id, kind = %job.kind, error = %err, "Send failed, dropping job");
                self.stats.record_dropped();
                None
            }
            FailurePolicy::Requeue => {
                let job = job.retried();
                match self.settings.max_attempts {
                    Some(max) if job.attempts >= max => {
                        error!(
                            job_id = %job.id,
                            attempts = job.attempts,
                            error = %err,
                            "Send failed, attempt limit reached, dropping job"
                        );
                        self.stats.record_dropped();
                        None
                    }
                    _ => {
                        warn!(
                            job_id = %job.id,
                            attempts = job.attempts,
                            error = %err,
                            "Send failed, requeued at head"
                        );
                        Some(job)
                    }
                }
            }
        }
    }

    async fn deliver(&self, index: usize, job: RelayJob) -> (RelayJob, Delivery) {
        if index > 0 && !self.settings.stagger.is_zero() {
            let offset = self.settings.stagger.saturating_mul(index as u32);
            tokio::time::sleep(offset).await;
        }

        if self.gate.open_destination().is_none() {
            return (job, Delivery::Deferred);
        }

        let job = if job.needs_resolution() {
            match self.resolve(job).await {
                Ok(job) => job,
                Err((job, e)) => return (job, Delivery::Failed(e)),
            }
        } else {
            job
        };

        // Read again: the link may have dropped while media was downloading.
        match self.gate.open_destination() {
            Some(destination) => self.send(job, &destination).await,
            None => (job, Delivery::Deferred),
        }
    }

    async fn send(&self, job: RelayJob, destination: &DestinationHandle) -> (RelayJob, Delivery) {
        let result = match send_parts(&job.payload) {
            Some((content, options)) => {
                let send = self
                    .transport
                    .send_message(&destination.id, &content, &options);
                match tokio::time::timeout(self.settings.send_timeout, send).await {
                    Ok(result) => result,
                    Err(_) => Err(RelayError::Transport(format!(
                        "send timed out after {:?}",
                        self.settings.send_timeout
                    ))),
                }
            }
            None => Err(RelayError::Transport("job payload is not sendable".into())),
        };

        match result {
            Ok(()) => (job, Delivery::Sent),
            Err(e) => (job, Delivery::Failed(e)),
        }
    }

    /// Swap a pending media reference for its bytes.
    ///
    /// The resolved payload stays on the job so retries do not download again.
    async fn resolve(
        &self,
        mut job: RelayJob,
    ) -> std::result::Result<RelayJob, (RelayJob, RelayError)> {
        let JobPayload::Media(media) = &job.payload else {
            return Ok(job);
        };
        match self.resolver.resolve(media).await {
            Ok(resolved) => {
                job.payload = JobPayload::Resolved(resolved);
                Ok(job)
            }
            Err(e) => Err((job, e.into())),
        }
    }
}

fn send_parts(payload: &JobPayload) -> Option<(OutboundContent<'_>, SendOptions)> {
    match payload {
        JobPayload::Text(text) => Some((OutboundContent::Text(text), SendOptions::default())),
        JobPayload::Resolved(media) => Some((
            OutboundContent::Media(media),
            SendOptions::for_media(media),
        )),
        JobPayload::Poll(poll) => Some((OutboundContent::Poll(poll), SendOptions::default())),
        JobPayload::Media(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::error::{MediaError, Result};
    use crate::media::MockMediaFetcher;
    use crate::relay::{
        ConnectionState, DestinationHandle, LifecycleEvent, MediaKind, MediaRef, SharedLink,
    };
    use crate::transport::ChatInfo;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Records sent texts; fails any text listed in `fail`.
    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<String>>,
        fail: Mutex<Vec<String>>,
        in_flight: AtomicU64,
        max_in_flight: AtomicU64,
        delay: Duration,
        close_gate_on_send: Option<SharedLink>,
    }

    impl FakeTransport {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        fn failing(texts: &[&str]) -> Self {
            Self {
                fail: Mutex::new(texts.iter().map(|t| t.to_string()).collect()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl OutboundTransport for FakeTransport {
        fn name(&self) -> &str {
            "fake"
        }

        async fn start(&self, _events: mpsc::Sender<LifecycleEvent>) -> Result<()> {
            Ok(())
        }

        async fn reconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn send_message(
            &self,
            _chat_id: &str,
            content: &OutboundContent<'_>,
            _options: &SendOptions,
        ) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let label = match content {
                OutboundContent::Text(t) => t.to_string(),
                OutboundContent::Media(m) => format!("media:{}", m.bytes.len()),
                OutboundContent::Poll(p) => format!("poll:{}", p.question),
            };
            if let Some(link) = &self.close_gate_on_send {
                link.set_destination(None);
            }
            if self.fail.lock().unwrap().contains(&label) {
                return Err(RelayError::Transport(format!("rejected {}", label)));
            }
            self.sent.lock().unwrap().push(label);
            Ok(())
        }

        async fn list_chats(&self) -> Result<Vec<ChatInfo>> {
            Ok(vec![])
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        queue: Arc<Mutex<DeliveryQueue>>,
        link: SharedLink,
        _shutdown: watch::Sender<bool>,
    }

    fn settings() -> DispatchSettings {
        DispatchSettings {
            concurrent_messages: 5,
            batch_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(4),
            stagger: Duration::ZERO,
            send_timeout: Duration::from_secs(2),
            failure_policy: FailurePolicy::Requeue,
            max_attempts: Some(5),
        }
    }

    fn harness_with(
        transport: Arc<FakeTransport>,
        fetcher: MockMediaFetcher,
        settings: DispatchSettings,
    ) -> Harness {
        let queue = Arc::new(Mutex::new(DeliveryQueue::unbounded()));
        let link = SharedLink::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let resolver = MediaResolver::new(Arc::new(fetcher), &MediaConfig::default());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            ReadinessGate::new(link.clone()),
            transport,
            resolver,
            settings,
            shutdown_rx,
        ));
        Harness {
            dispatcher,
            queue,
            link,
            _shutdown: shutdown_tx,
        }
    }

    fn harness(transport: Arc<FakeTransport>) -> Harness {
        harness_with(transport, MockMediaFetcher::new(), settings())
    }

    impl Harness {
        fn open_gate(&self) {
            self.link.set_connection(ConnectionState::Ready);
            self.link.set_destination(Some(DestinationHandle {
                id: "g@g.us".into(),
                name: "G".into(),
            }));
        }

        fn push(&self, texts: &[&str]) {
            let mut q = self.queue.lock().unwrap();
            for t in texts {
                q.enqueue(RelayJob::text(t)).unwrap();
            }
        }

        fn queued(&self) -> usize {
            self.queue.lock().unwrap().size()
        }
    }

    #[tokio::test]
    async fn test_fifo_without_failures() {
        let transport = Arc::new(FakeTransport::default());
        let h = harness(Arc::clone(&transport));
        h.open_gate();
        h.push(&["1", "2", "3", "4", "5", "6", "7"]);

        let report = h.dispatcher.drain().await;
        assert_eq!(report.sent, 7);
        assert_eq!(report.batches, 2);
        assert_eq!(transport.sent(), vec!["1", "2", "3", "4", "5", "6", "7"]);
        assert_eq!(h.queued(), 0);
    }

    #[tokio::test]
    async fn test_gate_closed_sends_nothing() {
        let transport = Arc::new(FakeTransport::default());
        let h = harness(Arc::clone(&transport));
        h.link.set_connection(ConnectionState::Ready);
        h.push(&["a", "b"]);

        let report = h.dispatcher.drain().await;
        assert!(report.is_noop());
        assert!(transport.sent().is_empty());
        assert_eq!(h.queued(), 2);
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let h = harness(Arc::new(FakeTransport::default()));
        h.open_gate();
        assert!(h.dispatcher.drain().await.is_noop());
    }

    #[tokio::test]
    async fn test_concurrent_drain_calls_are_idempotent() {
        let transport = Arc::new(FakeTransport {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let h = harness(Arc::clone(&transport));
        h.open_gate();
        h.push(&["a", "b", "c"]);

        let (r1, r2, r3) = tokio::join!(
            h.dispatcher.drain(),
            h.dispatcher.drain(),
            h.dispatcher.drain()
        );

        assert_eq!(r1.sent + r2.sent + r3.sent, 3);
        assert_eq!(transport.sent().len(), 3);
        assert!(!h.dispatcher.is_draining());
    }

    #[tokio::test]
    async fn test_batch_sends_concurrently() {
        let transport = Arc::new(FakeTransport {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let h = harness(Arc::clone(&transport));
        h.open_gate();
        h.push(&["a", "b", "c", "d", "e"]);

        h.dispatcher.drain().await;
        assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_one_failure_in_batch_requeued_once() {
        let transport = Arc::new(FakeTransport::failing(&["c"]));
        let mut s = settings();
        s.max_attempts = Some(2);
        let h = harness_with(Arc::clone(&transport), MockMediaFetcher::new(), s);
        h.open_gate();
        h.push(&["a", "b", "c", "d", "e"]);

        let report = h.dispatcher.drain().await;

        // first batch: c fails and is requeued; second batch: c fails again and
        // hits the attempt limit
        assert_eq!(report.requeued, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(transport.sent(), vec!["a", "b", "d", "e"]);
        assert_eq!(h.dispatcher.stats().snapshot().failed, 2);
        assert_eq!(h.queued(), 0);
    }

    #[tokio::test]
    async fn test_requeued_job_precedes_newer_jobs() {
        let transport = Arc::new(FakeTransport::failing(&["b"]));
        let mut s = settings();
        s.concurrent_messages = 2;
        let h = harness_with(Arc::clone(&transport), MockMediaFetcher::new(), s);
        h.open_gate();
        h.push(&["a", "b", "c", "d"]);

        let jobs = h.queue.lock().unwrap().dequeue_batch(2);
        let mut report = DrainReport::default();
        h.dispatcher.run_batch(jobs, &mut report).await;

        let order: Vec<String> = h
            .queue
            .lock()
            .unwrap()
            .dequeue_batch(10)
            .into_iter()
            .map(|j| match j.payload {
                JobPayload::Text(t) => format!("{}:{}", t, j.kind),
                _ => String::new(),
            })
            .collect();
        assert_eq!(order, vec!["b:retry", "c:text", "d:text"]);
    }

    #[tokio::test]
    async fn test_requeue_preserves_relative_order_of_failures() {
        let transport = Arc::new(FakeTransport::failing(&["a", "c"]));
        let h = harness(Arc::clone(&transport));
        h.open_gate();
        h.push(&["a", "b", "c", "x"]);

        let jobs = h.queue.lock().unwrap().dequeue_batch(3);
        let mut report = DrainReport::default();
        h.dispatcher.run_batch(jobs, &mut report).await;

        let texts: Vec<String> = h
            .queue
            .lock()
            .unwrap()
            .dequeue_batch(10)
            .into_iter()
            .filter_map(|j| match j.payload {
                JobPayload::Text(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["a", "c", "x"]);
    }

    #[tokio::test]
    async fn test_drop_policy_discards_failures() {
        let transport = Arc::new(FakeTransport::failing(&["b"]));
        let mut s = settings();
        s.failure_policy = FailurePolicy::Drop;
        let h = harness_with(Arc::clone(&transport), MockMediaFetcher::new(), s);
        h.open_gate();
        h.push(&["a", "b", "c"]);

        let report = h.dispatcher.drain().await;
        assert_eq!(report.dropped, 1);
        assert_eq!(report.requeued, 0);
        assert_eq!(h.queued(), 0);
        assert_eq!(h.dispatcher.stats().snapshot().dropped, 1);
    }

    #[tokio::test]
    async fn test_gate_closing_mid_batch_defers_without_attempt() {
        let link = SharedLink::new();
        let queue = Arc::new(Mutex::new(DeliveryQueue::unbounded()));
        let transport = Arc::new(FakeTransport {
            close_gate_on_send: Some(link.clone()),
            ..Default::default()
        });
        let (_tx, rx) = watch::channel(false);
        let mut s = settings();
        s.stagger = Duration::from_millis(30);
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            ReadinessGate::new(link.clone()),
            transport.clone(),
            MediaResolver::new(Arc::new(MockMediaFetcher::new()), &MediaConfig::default()),
            s,
            rx,
        );
        link.set_connection(ConnectionState::Ready);
        link.set_destination(Some(DestinationHandle {
            id: "g@g.us".into(),
            name: "G".into(),
        }));
        {
            let mut q = queue.lock().unwrap();
            for t in ["a", "b", "c"] {
                q.enqueue(RelayJob::text(t)).unwrap();
            }
        }

        let report = dispatcher.drain().await;
        assert_eq!(report.sent, 1);
        assert_eq!(report.deferred, 2);
        assert_eq!(report.batches, 1);

        let rest = queue.lock().unwrap().dequeue_batch(10);
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|j| j.attempts == 0));
    }

    #[tokio::test]
    async fn test_media_is_resolved_before_send() {
        let transport = Arc::new(FakeTransport::default());
        let mut fetcher = MockMediaFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_, _| Ok(vec![7u8; 16]));
        let h = harness_with(Arc::clone(&transport), fetcher, settings());
        h.open_gate();
        h.queue
            .lock()
            .unwrap()
            .enqueue(RelayJob::media(MediaRef::new(MediaKind::Photo, "p")))
            .unwrap();

        let report = h.dispatcher.drain().await;
        assert_eq!(report.sent, 1);
        assert_eq!(transport.sent(), vec!["media:16"]);
    }

    #[tokio::test]
    async fn test_media_failure_is_a_send_failure() {
        let transport = Arc::new(FakeTransport::default());
        let mut fetcher = MockMediaFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|id, _| Err(MediaError::NotFound(id.to_string())));
        let mut s = settings();
        s.max_attempts = Some(1);
        let h = harness_with(Arc::clone(&transport), fetcher, s);
        h.open_gate();
        h.queue
            .lock()
            .unwrap()
            .enqueue(RelayJob::media(MediaRef::new(MediaKind::Video, "v")))
            .unwrap();
        h.push(&["after"]);

        let report = h.dispatcher.drain().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(transport.sent(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_link_drop_during_media_fetch_defers_with_bytes_cached() {
        let link = SharedLink::new();
        let queue = Arc::new(Mutex::new(DeliveryQueue::unbounded()));
        let transport = Arc::new(FakeTransport::default());

        let mut fetcher = MockMediaFetcher::new();
        let dropping = link.clone();
        fetcher.expect_fetch().times(1).returning(move |_, _| {
            dropping.set_connection(ConnectionState::Disconnected);
            dropping.set_destination(None);
            Ok(vec![1u8; 8])
        });

        let (_tx, rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            ReadinessGate::new(link.clone()),
            transport.clone(),
            MediaResolver::new(Arc::new(fetcher), &MediaConfig::default()),
            settings(),
            rx,
        );
        let open = || {
            link.set_connection(ConnectionState::Ready);
            link.set_destination(Some(DestinationHandle {
                id: "g@g.us".into(),
                name: "G".into(),
            }));
        };
        open();
        queue
            .lock()
            .unwrap()
            .enqueue(RelayJob::media(MediaRef::new(MediaKind::Photo, "p")))
            .unwrap();

        let report = dispatcher.drain().await;
        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.deferred, 1);
        assert!(transport.sent().is_empty());
        assert_eq!(queue.lock().unwrap().size(), 1);
        let job = queue.lock().unwrap().dequeue_batch(1).remove(0);
        assert_eq!(job.attempts, 0);
        assert!(!job.needs_resolution());
        queue.lock().unwrap().requeue_front(job);

        // Bytes stay on the job, so the fetcher (times(1)) is not hit again.
        open();
        let report = dispatcher.drain().await;
        assert_eq!(report.sent, 1);
        assert_eq!(transport.sent(), vec!["media:8"]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_drain() {
        let transport = Arc::new(FakeTransport::default());
        let queue = Arc::new(Mutex::new(DeliveryQueue::unbounded()));
        let link = SharedLink::new();
        let (tx, rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            ReadinessGate::new(link.clone()),
            transport.clone(),
            MediaResolver::new(Arc::new(MockMediaFetcher::new()), &MediaConfig::default()),
            settings(),
            rx,
        );
        link.set_connection(ConnectionState::Ready);
        link.set_destination(Some(DestinationHandle {
            id: "g".into(),
            name: "G".into(),
        }));
        queue.lock().unwrap().enqueue(RelayJob::text("a")).unwrap();
        tx.send(true).unwrap();

        assert!(dispatcher.drain().await.is_noop());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_settings_from_config_clamps_concurrency() {
        let config = RelayConfig {
            concurrent_messages: 0,
            ..Default::default()
        };
        let s = DispatchSettings::from_config(&config);
        assert_eq!(s.concurrent_messages, 1);
    }
}
