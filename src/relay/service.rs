//! Relay service: owns the queue, the dispatcher and the lifecycle driver.
//!
//! ```text
//!  InboundPost ──submit──> DeliveryQueue ──kick──> drain worker ──> Dispatcher ──> transport
//!                                                        ^
//!  transport ──LifecycleEvent──> lifecycle driver ──(Ready + destination)──┘
//! ```
//!
//! Construct with [`RelayService::new`], then [`start`](RelayService::start)
//! and eventually [`stop`](RelayService::stop). Everything else talks to the
//! running relay through a cloneable [`RelayHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, MatchMode};
use crate::error::{RelayError, Result};
use crate::media::{MediaFetcher, MediaResolver};
use crate::session::SessionBackup;
use crate::transport::OutboundTransport;

use super::{
    resolve_destination, ConnectionLifecycle, ConnectionState, DeliveryQueue, DestinationHandle,
    DispatchSettings, Dispatcher, Enqueued, InboundPost, LifecycleAction, LifecycleEvent,
    ReadinessGate, ReconnectPolicy, RelayJob, SharedLink, StatsSnapshot,
};

/// Capacity of the transport → lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Point-in-time view of the relay, served by the health endpoint and the
/// `/status` admin command.
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    /// Readiness gate: connected and destination resolved
    pub ready: bool,
    pub destination_resolved: bool,
    pub queue_size: usize,
    pub connection_state: ConnectionState,
    pub destination: Option<DestinationHandle>,
    pub draining: bool,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    /// Last destination-resolution problem, cleared on success
    pub diagnostic: Option<String>,
}

/// State shared by the service, its tasks and every handle.
struct Shared {
    queue: Arc<Mutex<DeliveryQueue>>,
    link: SharedLink,
    gate: ReadinessGate,
    dispatcher: Dispatcher,
    kick: Notify,
    diagnostic: RwLock<Option<String>>,
    last_qr: RwLock<Option<String>>,
    shutdown: watch::Receiver<bool>,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, DeliveryQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_diagnostic(&self, value: Option<String>) {
        *self
            .diagnostic
            .write()
            .unwrap_or_else(PoisonError::into_inner) = value;
    }

    fn set_last_qr(&self, value: Option<String>) {
        *self.last_qr.write().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

/// Cheap, cloneable access to a relay service.
#[derive(Clone)]
pub struct RelayHandle {
    shared: Arc<Shared>,
}

impl RelayHandle {
    /// Turn an inbound post into a job and submit it.
    ///
    /// Returns the job id, or `None` when the post has nothing to relay.
    pub fn submit(&self, post: InboundPost) -> Result<Option<Uuid>> {
        match post.into_job() {
            Some(job) => {
                let id = job.id;
                self.submit_job(job)?;
                Ok(Some(id))
            }
            None => {
                debug!("Inbound post has no relayable content, skipping");
                Ok(None)
            }
        }
    }

    /// Enqueue a job and wake the drain worker.
    ///
    /// Every job goes through the queue, even when the gate is open, so a
    /// fresh post can never overtake jobs already waiting.
    pub fn submit_job(&self, job: RelayJob) -> Result<()> {
        if *self.shared.shutdown.borrow() {
            return Err(RelayError::Shutdown);
        }

        let (id, kind) = (job.id, job.kind);
        let outcome = self.shared.lock_queue().enqueue(job)?;
        match outcome {
            Enqueued::Accepted => {}
            Enqueued::Evicted(old) => {
                self.shared.dispatcher.stats().record_dropped();
                warn!(job_id = %old.id, kind = %old.kind, "Queue full, evicted oldest job");
            }
            Enqueued::Discarded(new) => {
                self.shared.dispatcher.stats().record_dropped();
                warn!(job_id = %new.id, kind = %new.kind, "Queue full, discarded incoming job");
                return Ok(());
            }
        }

        if self.shared.gate.is_open() {
            debug!(job_id = %id, kind = %kind, "Gate open, dispatching");
        } else {
            debug!(job_id = %id, kind = %kind, "Gate closed, job queued");
        }
        self.kick();
        Ok(())
    }

    /// Ask the drain worker to run now.
    pub fn kick(&self) {
        self.shared.kick.notify_one();
    }

    pub fn is_ready(&self) -> bool {
        self.shared.gate.is_open()
    }

    pub fn queue_size(&self) -> usize {
        self.shared.lock_queue().size()
    }

    /// Drop every pending job. Returns how many were removed.
    pub fn clear_queue(&self) -> usize {
        let n = self.shared.lock_queue().clear();
        if n > 0 {
            warn!(count = n, "Delivery queue cleared");
        }
        n
    }

    /// Latest pairing QR payload, while pairing is pending.
    pub fn pending_qr(&self) -> Option<String> {
        self.shared
            .last_qr
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> RelayStatus {
        let link = self.shared.link.snapshot();
        RelayStatus {
            ready: link.gate_open(),
            destination_resolved: link.destination.is_some(),
            queue_size: self.queue_size(),
            connection_state: link.connection,
            destination: link.destination,
            draining: self.shared.dispatcher.is_draining(),
            stats: self.shared.dispatcher.stats().snapshot(),
            diagnostic: self
                .shared
                .diagnostic
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Where and how the destination chat is looked up on `Ready`.
#[derive(Debug, Clone)]
struct DestinationTarget {
    name: String,
    mode: MatchMode,
    groups_only: bool,
}

/// The relay: queue, dispatch loop and connection lifecycle.
pub struct RelayService {
    shared: Arc<Shared>,
    transport: Arc<dyn OutboundTransport>,
    target: DestinationTarget,
    reconnect: ReconnectPolicy,
    poll_interval: Duration,
    shutdown_grace: Duration,
    session: Option<Arc<SessionBackup>>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayService {
    pub fn new(
        config: &Config,
        transport: Arc<dyn OutboundTransport>,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let queue = match config.relay.max_queue_size {
            Some(cap) => DeliveryQueue::bounded(cap, config.relay.overflow_policy),
            None => DeliveryQueue::unbounded(),
        };
        let queue = Arc::new(Mutex::new(queue));
        let link = SharedLink::new();
        let gate = ReadinessGate::new(link.clone());

        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            gate.clone(),
            Arc::clone(&transport),
            MediaResolver::new(fetcher, &config.media),
            DispatchSettings::from_config(&config.relay),
            shutdown_rx.clone(),
        );

        let shared = Arc::new(Shared {
            queue,
            link,
            gate,
            dispatcher,
            kick: Notify::new(),
            diagnostic: RwLock::new(None),
            last_qr: RwLock::new(None),
            shutdown: shutdown_rx,
        });

        Self {
            shared,
            transport,
            target: DestinationTarget {
                name: config.whatsapp.target_chat.clone(),
                mode: config.whatsapp.match_mode,
                groups_only: config.whatsapp.groups_only,
            },
            reconnect: ReconnectPolicy::from_config(&config.reconnect),
            poll_interval: config.relay.poll_interval(),
            shutdown_grace: config.relay.shutdown_grace(),
            session: None,
            shutdown_tx,
            running: AtomicBool::new(false),
            tasks: Vec::new(),
        }
    }

    /// Attach session persistence (restore at start, backup on auth).
    pub fn with_session_backup(mut self, backup: SessionBackup) -> Self {
        self.session = Some(Arc::new(backup));
        self
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Restore the session, start the transport and spawn the background
    /// tasks. Returns immediately.
    pub async fn start(&mut self) -> Result<()> {
        if *self.shutdown_tx.borrow() {
            return Err(RelayError::Shutdown);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Relay service already running");
            return Ok(());
        }

        if let Some(session) = &self.session {
            if let Err(e) = session.restore_if_missing().await {
                warn!("Session restore failed, pairing may be required: {}", e);
            }
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        self.tasks.push(tokio::spawn(drain_worker(
            Arc::clone(&self.shared),
            self.poll_interval,
            self.shutdown_tx.subscribe(),
        )));

        let driver = LifecycleDriver {
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            machine: ConnectionLifecycle::new(self.reconnect.clone()),
            target: self.target.clone(),
            session: self.session.clone(),
            events_tx: events_tx.clone(),
            shutdown: self.shutdown_tx.subscribe(),
            pending_reconnect: None,
        };
        self.tasks.push(tokio::spawn(driver.run(events_rx)));

        if let Some(session) = &self.session {
            if let Some(task) = session.spawn_periodic(self.shutdown_tx.subscribe()) {
                self.tasks.push(task);
            }
        }

        if let Err(e) = self.transport.start(events_tx).await {
            error!(transport = self.transport.name(), "Transport failed to start: {}", e);
            self.stop().await?;
            return Err(e);
        }

        info!(
            transport = self.transport.name(),
            target = %self.target.name,
            "Relay service started"
        );
        Ok(())
    }

    /// Stop accepting work, let the in-flight batch finish (bounded by the
    /// shutdown grace period) and close the transport.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("Relay service already stopped");
            return Ok(());
        }

        let _ = self.shutdown_tx.send(true);
        self.shared.kick.notify_one();

        let tasks: Vec<JoinHandle<()>> = self.tasks.drain(..).collect();
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(self.shutdown_grace, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!(
                grace_secs = self.shutdown_grace.as_secs(),
                "Relay tasks did not finish in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        if let Err(e) = self.transport.shutdown().await {
            warn!("Transport shutdown failed: {}", e);
        }

        let pending = self.shared.lock_queue().size();
        if pending > 0 {
            warn!(pending, "Relay stopped with undelivered jobs");
        }
        info!("Relay service stopped");
        Ok(())
    }
}

/// Wakes the dispatcher on kicks and on a fallback poll interval.
async fn drain_worker(
    shared: Arc<Shared>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.kick.notified() => {}
            _ = ticker.tick() => {}
            Ok(()) = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        let report = shared.dispatcher.drain().await;
        if !report.is_noop() {
            crate::log_component!(
                info,
                "dispatch",
                "Drain cycle finished",
                batches = report.batches,
                sent = report.sent,
                failed = report.failed,
                requeued = report.requeued,
                dropped = report.dropped,
                deferred = report.deferred,
                remaining = shared.lock_queue().size(),
            );
        }
    }
    debug!("Drain worker stopped");
}

/// Applies transport events to the lifecycle machine and runs its actions.
struct LifecycleDriver {
    shared: Arc<Shared>,
    transport: Arc<dyn OutboundTransport>,
    machine: ConnectionLifecycle,
    target: DestinationTarget,
    session: Option<Arc<SessionBackup>>,
    events_tx: mpsc::Sender<LifecycleEvent>,
    shutdown: watch::Receiver<bool>,
    /// The one outstanding reconnect timer, if any.
    pending_reconnect: Option<AbortHandle>,
}

impl LifecycleDriver {
    async fn run(mut self, mut events: mpsc::Receiver<LifecycleEvent>) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                Ok(()) = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.cancel_reconnect();
        debug!("Lifecycle driver stopped");
    }

    async fn handle(&mut self, event: LifecycleEvent) {
        let from = self.machine.state();
        match &event {
            LifecycleEvent::QrNeeded(_) => info!(%from, "Pairing QR received"),
            LifecycleEvent::Authenticated => info!(%from, "Transport authenticated"),
            LifecycleEvent::Ready => info!(%from, "Transport ready"),
            LifecycleEvent::Disconnected(reason) => {
                warn!(%from, reason = %reason, "Transport disconnected")
            }
            LifecycleEvent::AuthFailure(reason) => {
                warn!(%from, reason = %reason, "Transport authentication failed")
            }
        }

        let actions = self.machine.apply(event);
        let to = self.machine.state();
        self.shared.link.set_connection(to);
        if to != ConnectionState::QrPending {
            self.shared.set_last_qr(None);
        }
        if from != to {
            info!(%from, %to, "Connection state changed");
        }
        if to != ConnectionState::Disconnected {
            self.cancel_reconnect();
        }

        for action in actions {
            self.run_action(action).await;
        }
    }

    async fn run_action(&mut self, action: LifecycleAction) {
        match action {
            LifecycleAction::ShowQr(code) => {
                crate::qr::display(&code);
                self.shared.set_last_qr(Some(code));
            }
            LifecycleAction::PersistSession => {
                if let Some(session) = &self.session {
                    session.backup_in_background();
                }
            }
            LifecycleAction::ResolveDestination => self.resolve_destination().await,
            LifecycleAction::ClearDestination => {
                self.shared.link.set_destination(None);
            }
            LifecycleAction::ScheduleReconnect { attempt, delay } => {
                crate::log_component!(
                    info,
                    "lifecycle",
                    "Reconnect scheduled",
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                );
                self.schedule_reconnect(delay);
            }
            LifecycleAction::Escalate { failures, reason } => {
                error!(
                    failures,
                    reason = %reason,
                    "Repeated WhatsApp authentication failures; the stored session may be invalid and a new QR pairing may be needed"
                );
            }
        }
    }

    async fn resolve_destination(&self) {
        let result = match self.transport.list_chats().await {
            Ok(chats) => resolve_destination(
                &chats,
                &self.target.name,
                self.target.mode,
                self.target.groups_only,
            ),
            Err(e) => Err(e),
        };

        match result {
            Ok(destination) => {
                info!(
                    id = %destination.id,
                    name = %destination.name,
                    "Destination chat resolved, gate open"
                );
                self.shared.link.set_destination(Some(destination));
                self.shared.set_diagnostic(None);
                self.shared.kick.notify_one();
            }
            Err(e) => {
                error!(target = %self.target.name, "Destination resolution failed: {}", e);
                self.shared.link.set_destination(None);
                self.shared.set_diagnostic(Some(e.to_string()));
            }
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.pending_reconnect.take() {
            if !pending.is_finished() {
                debug!("Pending reconnect cancelled");
            }
            pending.abort();
        }
    }

    /// Replace any pending reconnect with one that fires after `delay`.
    fn schedule_reconnect(&mut self, delay: Duration) {
        self.cancel_reconnect();

        let shared = Arc::clone(&self.shared);
        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        let mut shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(()) = shutdown.changed() => return,
            }
            if *shutdown.borrow() {
                return;
            }
            let state = shared.link.snapshot().connection;
            if state != ConnectionState::Disconnected {
                debug!(%state, "Link recovered before reconnect, skipping");
                return;
            }
            if let Err(e) = transport.reconnect().await {
                // Feed the failure back so the next attempt backs off further.
                let event = LifecycleEvent::Disconnected(format!("reconnect failed: {}", e));
                if events.send(event).await.is_err() {
                    debug!("Lifecycle driver gone, reconnect failure not reported");
                }
            }
        });
        self.pending_reconnect = Some(task.abort_handle());
    }
}
