//! Sync engine: local commits, push, pull, reconcile.
//!
//! One engine per device. It owns the outbox, the audit log and the rate
//! limiter, and borrows the entity store, key session and relay channel
//! from the application. A cycle runs the phases in order:
//!
//! `Idle -> Pushing -> Pulling -> Reconciling -> Idle`
//!
//! [`push`](SyncEngine::push) and [`pull`](SyncEngine::pull) can also be
//! driven separately (and concurrently); entity writes are serialized by
//! [`EntityLocks`], which are never held across a send.

use crate::audit::{self, AuditKind, AuditLog, AuditOrigin};
use crate::config::SyncConfig;
use crate::db::SyncDb;
use crate::error::{Disposition, SyncError, SyncResult};
use crate::locks::EntityLocks;
use crate::protocol::{open_entity, seal_entity, WireEnvelope};
use crate::queue::{self, OutboundEntry, OutboundQueue};
use crate::rate_limit::{OperationClass, RateLimiter};
use crate::store::EntityStore;
use crate::transport::{Channel, Inbound, SyncTransport};
use crate::validator::{AcceptAll, MutationValidator};
use ledgersync_crypto::{CryptoError, KdfHeader, KeySession};
use ledgersync_model::{resolve, Entity, EntityMutation, Resolution};
use ledgersync_types::{DeviceId, EntityId, Timestamp};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// Where the engine is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Pushing,
    Pulling,
    Reconciling,
}

/// Running counters since the engine was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub cycles: u64,
    pub pushed: u64,
    pub pulled: u64,
    pub merged: u64,
    pub discarded: u64,
    pub decrypt_failures: u64,
    pub retries: u64,
    pub last_error: Option<String>,
}

/// Result of one [`sync_cycle`](SyncEngine::sync_cycle).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub pushed: usize,
    pub pulled: usize,
    pub reconciled: usize,
}

/// What happened to one inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Remote copy stored as-is.
    Accepted,
    /// Concurrent copies merged and stored.
    Merged,
    /// Remote copy was older than ours.
    Discarded,
    /// Already had exactly this version.
    Unchanged,
    /// Our own envelope echoed back.
    Ignored,
}

/// Inbound bytes not yet processed. `backlog` holds envelopes that were
/// taken off the channel but could not be applied yet.
struct InboundState {
    rx: Inbound,
    backlog: VecDeque<Vec<u8>>,
    open: bool,
}

impl InboundState {
    fn next(&mut self) -> Option<Vec<u8>> {
        if let Some(bytes) = self.backlog.pop_front() {
            return Some(bytes);
        }
        match self.rx.try_recv() {
            Ok(bytes) => Some(bytes),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => None,
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                self.open = false;
                None
            }
        }
    }
}

/// The per-device sync engine.
pub struct SyncEngine {
    device: DeviceId,
    config: SyncConfig,
    store: Arc<dyn EntityStore>,
    session: Arc<KeySession>,
    transport: Arc<dyn SyncTransport>,
    inbound: AsyncMutex<InboundState>,
    validator: Arc<dyn MutationValidator>,
    db: SyncDb,
    queue: OutboundQueue,
    audit: AuditLog,
    limiter: RateLimiter,
    locks: EntityLocks,
    phase: watch::Sender<SyncPhase>,
    shutdown: watch::Sender<bool>,
    stats: Mutex<SyncStats>,
}

impl SyncEngine {
    /// Creates an engine with the [`AcceptAll`] validator.
    pub fn new(
        device: DeviceId,
        config: SyncConfig,
        db: SyncDb,
        store: Arc<dyn EntityStore>,
        session: Arc<KeySession>,
        channel: Channel,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limits.clone());
        Self {
            device,
            config,
            store,
            session,
            transport: channel.transport,
            inbound: AsyncMutex::new(InboundState {
                rx: channel.inbound,
                backlog: VecDeque::new(),
                open: true,
            }),
            validator: Arc::new(AcceptAll),
            queue: OutboundQueue::new(db.clone()),
            audit: AuditLog::new(db.clone()),
            db,
            limiter,
            locks: EntityLocks::new(),
            phase: watch::Sender::new(SyncPhase::Idle),
            shutdown: watch::Sender::new(false),
            stats: Mutex::new(SyncStats::default()),
        }
    }

    /// Replaces the mutation validator.
    pub fn with_validator(mut self, validator: Arc<dyn MutationValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn session(&self) -> &Arc<KeySession> {
        &self.session
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Subscribes to phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn stats(&self) -> SyncStats {
        self.stats_mut().clone()
    }

    // ── Session ──────────────────────────────────────────────────

    /// Derives the sync key on a blocking thread and unlocks the session.
    ///
    /// Counts against [`OperationClass::KeyDerivation`].
    pub async fn unlock(&self, secret: String, header: KdfHeader) -> SyncResult<()> {
        self.limiter.check(OperationClass::KeyDerivation)?;
        let key = tokio::task::spawn_blocking(move || header.derive(&secret))
            .await
            .map_err(|e| SyncError::Crypto(CryptoError::KeyDerivation(e.to_string())))??;
        self.session.install(key);
        info!("sync unlocked on {}", self.device);
        Ok(())
    }

    /// Drops the sync key. Queued changes stay queued.
    pub fn lock(&self) {
        self.session.lock();
    }

    // ── Local changes ────────────────────────────────────────────

    /// Validates, applies and records a local mutation, then queues the
    /// result for sending. Returns the stored entity.
    ///
    /// The audit row and the outbox row are written in one transaction
    /// before the store. If the store write then fails, the outbox still
    /// holds the change and the next commit or reconcile restores it.
    pub async fn commit_local(&self, mutation: EntityMutation) -> SyncResult<Entity> {
        self.validator.validate(&mutation).inspect_err(|e| {
            warn!("rejected {} on {}: {}", mutation.kind, mutation.entity_id, e);
        })?;

        let _guard = self.locks.lock(mutation.entity_id).await;
        let current = self.settled(&mutation.entity_id)?;
        let next = mutation.apply(current.as_ref(), &self.device, Timestamp::now())?;

        self.db.transaction(|tx| {
            audit::append_in(tx, mutation.kind.into(), AuditOrigin::Local, &self.device, &next)?;
            queue::enqueue_in(tx, &next)
        })?;
        self.store.put(&next)?;
        debug!(
            "committed {} {} at {}",
            mutation.kind, next.id, next.version_vector
        );
        Ok(next)
    }

    /// The stored copy of `id`, repaired from its outbox row first if the
    /// store fell behind.
    fn settled(&self, id: &EntityId) -> SyncResult<Option<Entity>> {
        if let Some(entry) = self.queue.get(id)? {
            self.settle(&entry)?;
        }
        self.store.get(id)
    }

    /// Brings the store and one outbox row back in step. Returns true if the
    /// row was rebuilt.
    ///
    /// Caller holds the entity lock.
    fn settle(&self, entry: &OutboundEntry) -> SyncResult<bool> {
        let current = self.store.get(&entry.entity_id())?;
        match resolve(current.as_ref(), &entry.entity) {
            Resolution::Unchanged => Ok(false),
            // Store moved past the row, typically through a merge on pull.
            Resolution::Discard => match &current {
                Some(current) => self.queue.replace(entry, current),
                None => Ok(false),
            },
            // A commit reached the outbox but not the store.
            Resolution::Accept(entity) => {
                warn!("restoring {} from the outbox", entity.id);
                self.store.put(&entity)?;
                Ok(false)
            }
            Resolution::Merged(entity) => {
                warn!("merging outbox row for {} into the store", entity.id);
                self.db.transaction(|tx| {
                    audit::record_in(
                        tx,
                        AuditKind::Merge,
                        AuditOrigin::Local,
                        &self.device,
                        &entity,
                    )?;
                    queue::replace_in(tx, entry, &entity)
                })?;
                self.store.put(&entity)?;
                Ok(true)
            }
        }
    }

    // ── Cycle ────────────────────────────────────────────────────

    /// Runs push, pull and reconcile once.
    ///
    /// A push failure does not prevent the pull; it is returned after the
    /// other phases have run.
    pub async fn sync_cycle(&self) -> SyncResult<CycleReport> {
        if let Some(idle) = self.config.idle_lock() {
            if self.session.lock_if_idle(idle) {
                info!("sync key locked after inactivity");
            }
        }

        let pushed = match self.push().await {
            Ok(n) => Ok(n),
            Err(SyncError::Cancelled) => {
                self.set_phase(SyncPhase::Idle);
                return Err(SyncError::Cancelled);
            }
            Err(e) => {
                warn!("push failed: {}", e);
                Err(e)
            }
        };

        let pulled = self.pull().await;
        let reconciled = self.reconcile().await;
        self.set_phase(SyncPhase::Idle);

        let result = match (pushed, pulled, reconciled) {
            (Ok(pushed), Ok(pulled), Ok(reconciled)) => Ok(CycleReport {
                pushed,
                pulled,
                reconciled,
            }),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => Err(e),
        };

        let mut stats = self.stats_mut();
        stats.cycles += 1;
        match &result {
            Ok(report) => {
                debug!(
                    "cycle done: pushed {}, pulled {}, reconciled {}",
                    report.pushed, report.pulled, report.reconciled
                );
            }
            Err(e) => stats.last_error = Some(e.to_string()),
        }
        result
    }

    /// Drives cycles on the configured interval and whenever an envelope
    /// arrives, until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> SyncResult<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.sync_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("sync loop started on {}", self.device);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let inbound_open = self.inbound.lock().await.open;

            tokio::select! {
                _ = shutdown.changed() => continue,
                _ = ticker.tick() => {}
                arrived = self.wait_inbound(), if inbound_open => {
                    if !arrived {
                        continue;
                    }
                }
            }

            match self.sync_cycle().await {
                Ok(_) => {}
                Err(SyncError::Cancelled) => break,
                Err(e) => debug!("cycle ended with {}: {}", e, e.user_message()),
            }
        }

        info!("sync loop stopped on {}", self.device);
        Ok(())
    }

    /// Asks [`run`](Self::run) and any in-flight push or pull to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Clears a previous [`shutdown`](Self::shutdown) so the engine can be
    /// driven again.
    pub fn resume(&self) {
        self.shutdown.send_replace(false);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    // ── Push ─────────────────────────────────────────────────────

    /// Sends up to `batch_size` queued entries in order.
    ///
    /// Entries leave the queue only once the relay acknowledges them. A
    /// failed or timed out send is retried with backoff; after
    /// `max_attempts` the push stops with [`SyncError::RetriesExhausted`]
    /// and everything not yet acknowledged stays queued.
    pub async fn push(&self) -> SyncResult<usize> {
        self.set_phase(SyncPhase::Pushing);
        let entries = self.queue.pending(self.config.batch_size)?;
        if entries.is_empty() {
            return Ok(0);
        }
        if !self.session.is_unlocked() {
            return Err(SyncError::Locked);
        }
        self.limiter.check(OperationClass::BatchEncryption)?;

        let mut sent = 0;
        for entry in entries {
            let Some(entry) = self.settle_before_send(entry).await? else {
                continue;
            };
            self.push_entry(&entry).await?;
            sent += 1;
        }
        self.stats_mut().pushed += sent as u64;
        info!("pushed {} queued changes", sent);
        Ok(sent)
    }

    /// Settles `entry` against the store so an acked row never leaves the
    /// store behind. Returns the row as it now stands.
    async fn settle_before_send(
        &self,
        entry: OutboundEntry,
    ) -> SyncResult<Option<OutboundEntry>> {
        let _guard = self.locks.lock(entry.entity_id()).await;
        if self.settle(&entry)? {
            self.queue.get(&entry.entity_id())
        } else {
            Ok(Some(entry))
        }
    }

    async fn push_entry(&self, entry: &OutboundEntry) -> SyncResult<()> {
        let mut shutdown = self.shutdown.subscribe();
        let retry = &self.config.retry;
        let mut tries = 0u32;

        loop {
            if *shutdown.borrow() {
                return Err(SyncError::Cancelled);
            }
            let bytes = seal_entity(&self.session, &entry.entity, &self.device)?.encode()?;

            let outcome = tokio::select! {
                _ = shutdown.changed() => return Err(SyncError::Cancelled),
                r = tokio::time::timeout(self.config.timeout(), self.transport.send(bytes)) => r,
            };
            let error = match outcome {
                Ok(Ok(ack)) => {
                    if !self.queue.ack(entry)? {
                        debug!("seq {} changed while in flight, keeping it queued", entry.seq);
                    }
                    debug!("relay acked {} as {}", entry.entity_id(), ack.seq);
                    return Ok(());
                }
                Ok(Err(e)) if e.disposition() == Disposition::RetryLater => e.to_string(),
                Ok(Err(e)) => return Err(e),
                Err(_) => format!("send timed out after {:?}", self.config.timeout()),
            };

            tries += 1;
            self.queue.record_attempt(entry, &error)?;
            if tries >= retry.max_attempts {
                warn!(
                    "giving up on {} after {} attempts: {}",
                    entry.entity_id(),
                    tries,
                    error
                );
                return Err(SyncError::RetriesExhausted {
                    attempts: tries,
                    last_error: error,
                });
            }

            self.stats_mut().retries += 1;
            let delay = retry.delay_for_attempt(tries);
            debug!(
                "send of {} failed ({}), retry {} in {:?}",
                entry.entity_id(),
                error,
                tries,
                delay
            );
            tokio::select! {
                _ = shutdown.changed() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    // ── Pull ─────────────────────────────────────────────────────

    /// Applies every envelope that has arrived so far.
    ///
    /// Envelopes that fail authentication are dropped and counted; they are
    /// never retried. If the session is locked, nothing is consumed.
    pub async fn pull(&self) -> SyncResult<usize> {
        self.set_phase(SyncPhase::Pulling);
        let shutdown = self.shutdown.subscribe();
        let mut inbound = self.inbound.lock().await;
        let mut applied = 0;

        while let Some(bytes) = inbound.next() {
            if *shutdown.borrow() {
                inbound.backlog.push_front(bytes);
                return Err(SyncError::Cancelled);
            }
            let result = self.apply_inbound(&bytes).await;
            match result {
                Ok(InboundOutcome::Accepted | InboundOutcome::Merged) => applied += 1,
                Ok(_) => {}
                Err(SyncError::Locked) => {
                    inbound.backlog.push_front(bytes);
                    return Err(SyncError::Locked);
                }
                Err(e @ SyncError::Storage(_)) => {
                    inbound.backlog.push_front(bytes);
                    return Err(e);
                }
                Err(SyncError::DecryptionFailed) => {
                    warn!("discarding inbound envelope that failed authentication");
                    self.stats_mut().decrypt_failures += 1;
                }
                Err(e) => warn!("discarding unreadable inbound envelope: {}", e),
            }
        }

        if applied > 0 {
            info!("applied {} inbound changes", applied);
        }
        Ok(applied)
    }

    /// Decrypts, resolves and stores one encoded envelope.
    ///
    /// Safe to call with the same bytes any number of times: after the first
    /// application the result is always [`InboundOutcome::Unchanged`].
    pub async fn apply_inbound(&self, bytes: &[u8]) -> SyncResult<InboundOutcome> {
        let envelope = WireEnvelope::decode(bytes)?;
        if envelope.sender_device_id == self.device {
            return Ok(InboundOutcome::Ignored);
        }
        let remote = open_entity(&self.session, &envelope)?;

        let _guard = self.locks.lock(remote.id).await;
        let local = self.store.get(&remote.id)?;
        let resolution = resolve(local.as_ref(), &remote);

        let outcome = match &resolution {
            Resolution::Accept(entity) => {
                let kind = AuditKind::infer(local.as_ref(), entity);
                self.record_remote(kind, &envelope.sender_device_id, entity)?;
                self.stats_mut().pulled += 1;
                InboundOutcome::Accepted
            }
            Resolution::Merged(entity) => {
                self.record_remote(AuditKind::Merge, &self.device, entity)?;
                let mut stats = self.stats_mut();
                stats.pulled += 1;
                stats.merged += 1;
                InboundOutcome::Merged
            }
            Resolution::Discard => {
                self.stats_mut().discarded += 1;
                InboundOutcome::Discarded
            }
            Resolution::Unchanged => InboundOutcome::Unchanged,
        };
        debug!(
            "{:?} {} from {}",
            outcome, envelope.entity_id, envelope.sender_device_id
        );
        Ok(outcome)
    }

    /// Logs a remote version, then stores it.
    ///
    /// A version is logged at most once, so redelivering an envelope whose
    /// store write failed does not log it twice.
    fn record_remote(&self, kind: AuditKind, actor: &DeviceId, entity: &Entity) -> SyncResult<()> {
        self.db
            .transaction(|tx| audit::record_in(tx, kind, AuditOrigin::Remote, actor, entity))?;
        self.store.put(entity)
    }

    // ── Reconcile ────────────────────────────────────────────────

    /// Brings every queued entry in step with the store.
    ///
    /// Entries whose entity has moved forward (typically through a merge
    /// during pull) are rebuilt so the relay receives the converged state.
    /// Entries the store never received are written back to it.
    pub async fn reconcile(&self) -> SyncResult<usize> {
        self.set_phase(SyncPhase::Reconciling);
        let mut rebuilt = 0;
        for entry in self.queue.pending(usize::MAX)? {
            let _guard = self.locks.lock(entry.entity_id()).await;
            if self.settle(&entry)? {
                rebuilt += 1;
            }
        }
        if rebuilt > 0 {
            debug!("rebuilt {} queued changes from converged state", rebuilt);
        }
        Ok(rebuilt)
    }

    // ── Recovery ─────────────────────────────────────────────────

    /// Rebuilds entity state into `store` from the audit log.
    pub fn replay(&self, store: &dyn EntityStore) -> SyncResult<usize> {
        self.audit.replay(store)
    }

    // ── Internals ────────────────────────────────────────────────

    /// Waits for the next inbound envelope and parks it in the backlog.
    /// Returns false once the channel is closed.
    async fn wait_inbound(&self) -> bool {
        let mut inbound = self.inbound.lock().await;
        match inbound.rx.recv().await {
            Some(bytes) => {
                inbound.backlog.push_back(bytes);
                true
            }
            None => {
                inbound.open = false;
                false
            }
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
    }

    fn stats_mut(&self) -> MutexGuard<'_, SyncStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}
