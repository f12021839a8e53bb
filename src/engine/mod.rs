mod catalog;
mod error;
mod lifecycle;
mod queries;
mod reservation;

pub use error::{EngineError, ValidationRule};
pub use lifecycle::{CASCADE_REASON, EXPIRED_REASON};
pub use reservation::BookingRequest;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{
    mpsc, oneshot, Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
    RwLockReadGuard,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::*;
use crate::wal::Wal;

pub type SharedHostState = Arc<RwLock<HostState>>;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2_000);

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, write the
/// batch, fsync once, then answer every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            error!("WAL flush of {} records failed: {e}", batch.len());
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stale bytes never lead the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let batch = vec![(event, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

/// Apply an event to one host's state. The caller holds the host lock.
fn apply_to_host(hs: &mut HostState, event: &Event) {
    match event {
        Event::HostUpserted { profile } => hs.profile = profile.clone(),
        Event::BookingRecorded { booking } => {
            if booking.status.holds_calendar() {
                hs.calendar.reserve(booking.id, booking.stay, booking.status);
            } else {
                hs.calendar.release(booking.id);
            }
            hs.bookings.insert(booking.id, booking.clone());
        }
        Event::StatusChanged { at, changes, .. } => {
            for change in changes {
                let Some(booking) = hs.bookings.get_mut(&change.booking_id) else {
                    continue;
                };
                booking.status = change.status;
                if change.reason.is_some() {
                    booking.cancellation_reason = change.reason.clone();
                }
                booking.updated_at = *at;
                if change.status.holds_calendar() {
                    hs.calendar.reserve(booking.id, booking.stay, change.status);
                } else {
                    hs.calendar.release(booking.id);
                }
            }
        }
    }
}

/// Engine-wide lookups kept in step with host state.
#[derive(Clone, Default)]
struct Indexes {
    /// Reverse lookup: booking id → host id.
    booking_to_host: Arc<DashMap<Ulid, Ulid>>,
    /// Guest id → booking ids, in creation order.
    guest_bookings: Arc<DashMap<Ulid, Vec<Ulid>>>,
}

impl Indexes {
    fn record(&self, event: &Event) {
        if let Event::BookingRecorded { booking } = event {
            self.booking_to_host.insert(booking.id, booking.host_id);
            let mut ids = self.guest_bookings.entry(booking.guest_id).or_default();
            if !ids.contains(&booking.id) {
                ids.push(booking.id);
            }
        }
    }
}

/// Send one event to the group-commit writer and wait for its fsync.
async fn append_to_wal(wal_tx: &mpsc::Sender<WalCommand>, event: Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event,
            response: tx,
        })
        .await
        .map_err(|_| EngineError::Unavailable("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::Unavailable("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::Unavailable(e.to_string()))
}

async fn join_commit<T>(commit: JoinHandle<Result<T, EngineError>>) -> Result<T, EngineError> {
    commit
        .await
        .map_err(|e| EngineError::Unavailable(format!("commit task failed: {e}")))?
}

/// Host an event belongs to.
fn event_host_id(event: &Event) -> Ulid {
    match event {
        Event::HostUpserted { profile } => profile.id,
        Event::BookingRecorded { booking } => booking.host_id,
        Event::StatusChanged { host_id, .. } => *host_id,
    }
}

/// Tunables for one engine instance.
#[derive(Clone)]
pub struct EngineOptions {
    /// Longest wait for a host section before failing with `Busy`.
    pub lock_timeout: Duration,
    pub clock: Arc<dyn Clock>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }
}

/// The booking engine. Each host's profile, bookings and calendar sit behind
/// one `RwLock`; holding its write half is the host's exclusive section.
pub struct Engine {
    hosts: Arc<DashMap<Ulid, SharedHostState>>,
    indexes: Indexes,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    /// Held shared by every mutation and exclusively by compaction.
    gate: RwLock<()>,
    /// Serializes creation of new hosts.
    catalog: Arc<Mutex<()>>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must be
    /// called inside a Tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, options: EngineOptions) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            hosts: Arc::new(DashMap::new()),
            indexes: Indexes::default(),
            wal_tx,
            notify,
            clock: options.clock,
            lock_timeout: options.lock_timeout,
            gate: RwLock::new(()),
            catalog: Arc::new(Mutex::new(())),
        };

        // Nothing else holds these locks yet, so try_write always succeeds.
        // Never block here: replay may run inside an async context.
        for event in &events {
            let host_id = event_host_id(event);
            let existing = engine.get_host_state(&host_id);
            match (existing, event) {
                (Some(hs), _) => {
                    let mut guard = hs
                        .try_write()
                        .map_err(|_| io::Error::other("replay: host state contended"))?;
                    engine.apply(&mut guard, event);
                }
                (None, Event::HostUpserted { profile }) => {
                    engine
                        .hosts
                        .insert(host_id, Arc::new(RwLock::new(HostState::new(profile.clone()))));
                }
                (None, _) => warn!(%host_id, "replay: event for unknown host skipped"),
            }
        }
        metrics::gauge!(HOSTS_ACTIVE).set(engine.hosts.len() as f64);
        Ok(engine)
    }

    pub fn get_host_state(&self, id: &Ulid) -> Option<SharedHostState> {
        self.hosts.get(id).map(|e| e.value().clone())
    }

    pub fn host_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.indexes.booking_to_host.get(booking_id).map(|e| *e.value())
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn today(&self) -> chrono::NaiveDate {
        self.clock.today()
    }

    /// Apply to host state and keep the engine-wide indexes in step.
    fn apply(&self, hs: &mut HostState, event: &Event) {
        apply_to_host(hs, event);
        self.indexes.record(event);
    }

    /// Durably log `event`, then apply it under the held section and hand
    /// the section back. A failed append leaves state untouched.
    ///
    /// Both steps run on their own task, so a caller dropped mid-commit
    /// cannot leave the log ahead of memory.
    pub(super) async fn persist_and_apply(
        &self,
        mut guard: OwnedRwLockWriteGuard<HostState>,
        event: Event,
    ) -> Result<OwnedRwLockWriteGuard<HostState>, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let indexes = self.indexes.clone();
        join_commit(tokio::spawn(async move {
            append_to_wal(&wal_tx, event.clone()).await?;
            apply_to_host(&mut guard, &event);
            indexes.record(&event);
            Ok(guard)
        }))
        .await
    }

    /// Log and insert a new host. Runs detached like `persist_and_apply`,
    /// holding the catalog lock until the host is visible.
    pub(super) async fn persist_new_host(
        &self,
        catalog: OwnedMutexGuard<()>,
        profile: HostProfile,
    ) -> Result<(), EngineError> {
        let wal_tx = self.wal_tx.clone();
        let hosts = self.hosts.clone();
        join_commit(tokio::spawn(async move {
            let _catalog = catalog;
            append_to_wal(
                &wal_tx,
                Event::HostUpserted {
                    profile: profile.clone(),
                },
            )
            .await?;
            hosts.insert(profile.id, Arc::new(RwLock::new(HostState::new(profile))));
            metrics::gauge!(HOSTS_ACTIVE).set(hosts.len() as f64);
            Ok(())
        }))
        .await
    }

    /// Take the catalog lock for host creation.
    pub(super) async fn lock_catalog(&self) -> OwnedMutexGuard<()> {
        self.catalog.clone().lock_owned().await
    }

    /// Shared hold on the engine gate, bounded by `lock_timeout`. Compaction
    /// holds the gate exclusively, so a long snapshot surfaces as `Busy`.
    pub(super) async fn enter_gate(&self) -> Result<RwLockReadGuard<'_, ()>, EngineError> {
        tokio::time::timeout(self.lock_timeout, self.gate.read())
            .await
            .map_err(|_| {
                metrics::counter!(HOST_LOCK_TIMEOUTS_TOTAL).increment(1);
                warn!("engine gate busy after {:?}", self.lock_timeout);
                EngineError::Busy
            })
    }

    /// Enter the host's exclusive section, waiting at most `lock_timeout`.
    pub(super) async fn lock_host(
        &self,
        host_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<HostState>, EngineError> {
        let hs = self
            .get_host_state(&host_id)
            .ok_or(EngineError::host_not_found(host_id))?;
        let started = Instant::now();
        match tokio::time::timeout(self.lock_timeout, hs.write_owned()).await {
            Ok(guard) => {
                metrics::histogram!(HOST_LOCK_WAIT_SECONDS).record(started.elapsed().as_secs_f64());
                Ok(guard)
            }
            Err(_) => {
                metrics::counter!(HOST_LOCK_TIMEOUTS_TOTAL).increment(1);
                warn!(%host_id, "host section busy after {:?}", self.lock_timeout);
                Err(EngineError::Busy)
            }
        }
    }

    /// Shared read of a host's state, bounded like `lock_host`.
    pub(super) async fn read_host(
        &self,
        host_id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<HostState>, EngineError> {
        let hs = self
            .get_host_state(&host_id)
            .ok_or(EngineError::host_not_found(host_id))?;
        tokio::time::timeout(self.lock_timeout, hs.read_owned())
            .await
            .map_err(|_| {
                metrics::counter!(HOST_LOCK_TIMEOUTS_TOTAL).increment(1);
                EngineError::Busy
            })
    }

    /// Lookup booking → host, then enter that host's section.
    pub(super) async fn lock_booking_host(
        &self,
        booking_id: Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<HostState>), EngineError> {
        let host_id = self
            .host_for_booking(&booking_id)
            .ok_or(EngineError::booking_not_found(booking_id))?;
        let guard = self.lock_host(host_id).await?;
        Ok((host_id, guard))
    }

    /// Hand notices to the dispatcher. Call only after the section is released.
    pub(super) fn dispatch(&self, notices: &[BookingNotice]) {
        for notice in notices {
            debug!(
                booking_id = %notice.booking_id,
                host_id = %notice.host_id,
                kind = ?notice.kind,
                "dispatch notice"
            );
            self.notify.send(notice);
        }
    }

    /// Rewrite the WAL as a snapshot of current state: each host's profile
    /// followed by its bookings.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;

        let mut host_ids: Vec<Ulid> = self.hosts.iter().map(|e| *e.key()).collect();
        host_ids.sort();
        let mut events = Vec::new();
        for host_id in host_ids {
            let Some(hs) = self.get_host_state(&host_id) else {
                continue;
            };
            let guard = hs.read().await;
            events.push(Event::HostUpserted {
                profile: guard.profile.clone(),
            });
            let mut bookings: Vec<&Booking> = guard.bookings.values().collect();
            bookings.sort_by_key(|b| b.id);
            events.extend(bookings.into_iter().map(|b| Event::BookingRecorded {
                booking: b.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Unavailable(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
