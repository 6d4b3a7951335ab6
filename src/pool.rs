//! Pool core: checkout, return, idle reaper and singleton lifecycle
//!
//! For each configured database id the pool keeps two LIFO stacks of
//! connection names: `available` (descriptor exists, physically closed)
//! and `cached` (descriptor open and idle). Checkout pops `cached` first
//! and falls back to `available` plus a physical open; return pushes back
//! onto `cached`. A background reaper migrates names from `cached` to
//! `available` once the id has seen no returns for the idle threshold,
//! closing the underlying socket.
//!
//! The stacks are the only shared pool state; there is no per-checkout
//! mutex. A descriptor is only ever opened, closed or mutated by the
//! party currently holding its name, which is what makes the racing pops
//! safe.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::driver::DriverExtension;
use crate::error::{Error, Result};
use crate::registry::{connection_name, database_id, Descriptor, DriverRegistry};
use crate::settings::AppContext;

/// Reaper period
const SWEEP_PERIOD: Duration = Duration::from_secs(10);

/// Seconds without a return before an id's cached connections are closed
const IDLE_AFTER_SECS: u64 = 30;

static GLOBAL_POOL: OnceLock<DatabasePool> = OnceLock::new();

/// Concurrent LIFO of connection names. Push and pop take a short
/// uncontended lock that is never held across an await point.
#[derive(Default)]
struct NameStack(Mutex<Vec<String>>);

impl NameStack {
    fn push(&self, name: String) {
        self.0.lock().push(name);
    }

    fn pop(&self) -> Option<String> {
        self.0.lock().pop()
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }

    fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Per-database-id state
#[derive(Default)]
struct IdState {
    available: NameStack,
    cached: NameStack,
    /// Seconds (relative to the pool epoch) of the most recent push into
    /// `cached`. One timestamp for the whole stack: a burst of returns
    /// resets the idle clock for every cached entry.
    last_cached: AtomicU64,
}

/// Stack depths for one database id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdStatus {
    /// Closed descriptors ready to be opened
    pub available: usize,
    /// Open descriptors ready for reuse
    pub cached: usize,
}

/// A checked-out database handle.
///
/// Obtained from [`DatabasePool::checkout`] and surrendered with
/// [`DatabasePool::release`], which consumes it; a handle cannot be
/// returned twice. A handle may be *invalid* (SQL not configured, or the
/// physical open failed), in which case every operation on it fails with
/// [`Error::InvalidHandle`] and releasing it is a no-op.
#[derive(Default)]
pub struct SqlHandle {
    descriptor: Option<Arc<Descriptor>>,
}

impl SqlHandle {
    /// An invalid handle
    pub fn invalid() -> Self {
        Self { descriptor: None }
    }

    pub(crate) fn checked_out(descriptor: Arc<Descriptor>) -> Self {
        Self {
            descriptor: Some(descriptor),
        }
    }

    pub(crate) fn into_descriptor(self) -> Option<Arc<Descriptor>> {
        self.descriptor
    }

    /// Whether the handle refers to a pooled connection
    pub fn is_valid(&self) -> bool {
        self.descriptor.is_some()
    }

    /// The connection name, if valid
    pub fn connection_name(&self) -> Option<&str> {
        self.descriptor.as_deref().map(Descriptor::name)
    }

    /// Execute a statement, returning the affected row count
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        match &self.descriptor {
            Some(descriptor) => descriptor.execute(sql).await,
            None => Err(Error::InvalidHandle),
        }
    }

    /// Whether upsert-style writes are enabled for this database
    pub fn upsert_enabled(&self) -> bool {
        self.descriptor
            .as_deref()
            .is_some_and(Descriptor::upsert_enabled)
    }

    /// The driver-extension capability attached to the connection, if any
    pub fn extension(&self) -> Option<Arc<dyn DriverExtension>> {
        self.descriptor.as_deref().and_then(Descriptor::extension)
    }
}

impl std::fmt::Debug for SqlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlHandle")
            .field("connection", &self.connection_name())
            .finish()
    }
}

struct PoolInner {
    context: Arc<dyn AppContext>,
    registry: Arc<DriverRegistry>,
    states: Vec<IdState>,
    epoch: tokio::time::Instant,
}

impl PoolInner {
    fn now_secs(&self) -> u64 {
        self.epoch.elapsed().as_secs()
    }

    async fn checkout(&self, id: usize) -> Result<SqlHandle> {
        if !self.context.sql_available() {
            return Ok(SqlHandle::invalid());
        }
        let Some(state) = self.states.get(id) else {
            return Err(Error::NoPooledConnection { id });
        };

        loop {
            // Fast path: reuse an open cached connection.
            if let Some(name) = state.cached.pop() {
                match self.registry.descriptor(&name) {
                    Some(descriptor) if descriptor.is_open() => {
                        debug!(%name, "reusing cached connection");
                        return Ok(SqlHandle::checked_out(descriptor));
                    }
                    _ => {
                        // Lost a race with a forced close; the name goes
                        // back through the slow path.
                        error!(%name, "cached connection is not open");
                        state.available.push(name);
                        continue;
                    }
                }
            }

            // Slow path: open a configured connection.
            let Some(name) = state.available.pop() else {
                return Err(Error::NoPooledConnection { id });
            };
            let Some(descriptor) = self.registry.descriptor(&name) else {
                error!(%name, "pooled connection has no descriptor");
                state.available.push(name);
                return Ok(SqlHandle::invalid());
            };
            if descriptor.is_open() {
                warn!(%name, "connection is already open");
                return Ok(SqlHandle::checked_out(descriptor));
            }
            if let Err(e) = descriptor.open().await {
                error!(%name, error = %e, "database open error; invalid settings or connection limit exceeded");
                state.available.push(name);
                return Ok(SqlHandle::invalid());
            }
            debug!(
                %name,
                environment = %self.context.environment(),
                "database opened"
            );
            // Session setup; per-statement failures do not unwind the open.
            for statement in descriptor.post_open_statements() {
                if let Err(e) = descriptor.execute(&statement).await {
                    warn!(%name, %statement, error = %e, "post-open statement failed");
                }
            }
            return Ok(SqlHandle::checked_out(descriptor));
        }
    }

    async fn release(&self, handle: SqlHandle, force_close: bool) {
        let Some(descriptor) = handle.into_descriptor() else {
            return;
        };
        let name = descriptor.name().to_owned();
        let state = database_id(&name).and_then(|id| self.states.get(id));
        let Some(state) = state else {
            error!(%name, "returned connection does not belong to the pool");
            return;
        };

        if force_close {
            warn!(%name, "force closing pooled connection");
            descriptor.close().await;
            state.available.push(name);
        } else {
            state.cached.push(name.clone());
            state.last_cached.store(self.now_secs(), Ordering::Release);
            debug!(%name, "connection returned to pool");
        }
    }

    async fn sweep_idle(&self) {
        let threshold = self.now_secs().saturating_sub(IDLE_AFTER_SECS);
        for state in &self.states {
            if state.cached.is_empty() {
                continue;
            }
            while state.last_cached.load(Ordering::Acquire) < threshold {
                let Some(name) = state.cached.pop() else {
                    break;
                };
                if let Some(descriptor) = self.registry.descriptor(&name) {
                    descriptor.close().await;
                }
                debug!(%name, "closed idle connection");
                state.available.push(name);
            }
        }
    }
}

/// Slot-based SQL connection pool.
///
/// For each configured database id, `max_worker_threads` connection
/// descriptors are created up front and named `rdb{JJ}_{I}`; checkout and
/// release move the names between the per-id stacks. Descriptors are
/// never allocated on the checkout path.
///
/// Most deployments use the process-wide instance through
/// [`DatabasePool::install`] and [`DatabasePool::instance`]; the pool can
/// also be constructed directly for embedding. Construction spawns the
/// idle reaper task and therefore must happen inside a Tokio runtime
/// whenever at least one database id carries a driver type.
pub struct DatabasePool {
    inner: Arc<PoolInner>,
    shutdown_tx: watch::Sender<bool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl DatabasePool {
    /// Create a pool from an application context and a driver registry.
    ///
    /// Reads the settings for every database id, creates and parameterises
    /// the descriptors, and seeds the `available` stacks. Ids whose
    /// `DriverType` is empty or unregistered are left without slots;
    /// checkout on them reports saturation.
    pub fn new(context: Arc<dyn AppContext>, registry: Arc<DriverRegistry>) -> Self {
        let worker_threads = context.max_worker_threads();
        let mut states: Vec<IdState> = Vec::new();
        let mut seeded = false;

        if context.sql_available() {
            debug!("SQL database available");
            states.resize_with(context.database_count(), IdState::default);

            for (id, state) in states.iter().enumerate() {
                let settings = context.database_settings(id);
                let kind = settings.driver_type.trim();
                if kind.is_empty() {
                    warn!(id, "empty parameter: DriverType");
                    continue;
                }
                seeded = true;

                for slot in 0..worker_threads {
                    let name = connection_name(id, slot);
                    let descriptor = match registry.add_descriptor(kind, &name) {
                        Ok(descriptor) => descriptor,
                        Err(e) => {
                            warn!(id, error = %e, "parameter 'DriverType' is invalid");
                            break;
                        }
                    };
                    if let Err(e) = registry.apply_settings(
                        &descriptor,
                        &settings,
                        context.web_root(),
                    ) {
                        error!(%name, error = %e, "invalid database settings");
                    }
                    state.available.push(name.clone());
                    debug!(%name, "added pooled connection");
                }
            }
        } else {
            warn!("SQL database not available");
        }

        let inner = Arc::new(PoolInner {
            context,
            registry,
            states,
            epoch: tokio::time::Instant::now(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reaper = seeded.then(|| spawn_reaper(Arc::downgrade(&inner), shutdown_rx));

        Self {
            inner,
            shutdown_tx,
            reaper: Mutex::new(reaper),
        }
    }

    /// Install the process-wide pool, constructing it on first call.
    ///
    /// Later calls return the already-installed instance and ignore their
    /// arguments.
    pub fn install(
        context: Arc<dyn AppContext>,
        registry: Arc<DriverRegistry>,
    ) -> &'static DatabasePool {
        GLOBAL_POOL.get_or_init(|| DatabasePool::new(context, registry))
    }

    /// The process-wide pool, if one has been installed
    pub fn instance() -> Option<&'static DatabasePool> {
        GLOBAL_POOL.get()
    }

    /// Borrow a connection for the database id.
    ///
    /// Returns an invalid handle when SQL is not configured or the
    /// physical open failed (the slot is restored for a later retry).
    /// Fails with [`Error::NoPooledConnection`] when every slot for the id
    /// is already checked out.
    pub async fn checkout(&self, id: usize) -> Result<SqlHandle> {
        self.inner.checkout(id).await
    }

    /// Surrender a handle at the end of a request.
    ///
    /// With `force_close` the descriptor is physically closed and parked
    /// on the `available` stack instead of being cached for reuse; callers
    /// do this after observing a terminal driver error. Releasing an
    /// invalid handle is a no-op.
    pub async fn release(&self, handle: SqlHandle, force_close: bool) {
        self.inner.release(handle, force_close).await;
    }

    /// Close cached connections for every id that has seen no returns for
    /// the idle threshold, moving their names to the `available` stacks.
    ///
    /// This is the reaper tick body; it runs on the background task every
    /// 10 seconds and may be driven directly by an external scheduler.
    pub async fn sweep_idle(&self) {
        self.inner.sweep_idle().await;
    }

    /// Stack depths for a database id
    pub fn status(&self, id: usize) -> Option<IdStatus> {
        self.inner.states.get(id).map(|state| IdStatus {
            available: state.available.len(),
            cached: state.cached.len(),
        })
    }

    /// Number of database ids the pool was initialised with
    pub fn database_count(&self) -> usize {
        self.inner.states.len()
    }

    /// Stop the reaper and destroy every slot.
    ///
    /// Cached connections are closed and de-registered; available ones are
    /// de-registered without closing (they are closed already). Handles
    /// still checked out are not reclaimed.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            let _ = reaper.await;
        }

        for state in &self.inner.states {
            while let Some(name) = state.cached.pop() {
                if let Some(descriptor) = self.inner.registry.descriptor(&name) {
                    descriptor.close().await;
                }
                self.inner.registry.remove(&name);
            }
            while let Some(name) = state.available.pop() {
                self.inner.registry.remove(&name);
            }
        }
    }
}

impl Drop for DatabasePool {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("databases", &self.inner.states.len())
            .finish_non_exhaustive()
    }
}

fn spawn_reaper(inner: Weak<PoolInner>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_PERIOD);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.sweep_idle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
