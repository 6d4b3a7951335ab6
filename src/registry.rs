//! Connection-name registry and settings applier
//!
//! Every pooled connection is a named [`Descriptor`] owned by the
//! [`DriverRegistry`]. The pool moves *names* between its stacks and looks
//! descriptors up by name on demand; nothing holds a descriptor pointer
//! across a checkout boundary. Names have the fixed form `rdb{JJ}_{I}`
//! (`JJ` = database id zero-padded to two digits, `I` = slot index), so a
//! name alone identifies the database it belongs to.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::driver::{
    Connection, ConnectionParams, Driver, DriverExtension, DriverKind, ExtensionFactory,
};
use crate::error::{Error, Result};
use crate::settings::DatabaseSettings;

/// Format a pooled connection name for a database id and slot index
pub fn connection_name(id: usize, slot: usize) -> String {
    format!("rdb{id:02}_{slot}")
}

/// Decode the database id from a pooled connection name.
///
/// The id is carried in characters `[3..5)`; anything that does not parse
/// as a decimal number there is not a pool name.
pub fn database_id(name: &str) -> Option<usize> {
    name.get(3..5)?.parse::<usize>().ok()
}

/// A configured, named connection slot.
///
/// Created once during pool initialisation and destroyed at teardown; a
/// descriptor may be physically opened and closed many times in between.
/// Parameter mutation and open/close are only ever performed by the party
/// that currently holds the descriptor's name, so the interior locks here
/// are uncontended in practice.
pub struct Descriptor {
    name: String,
    driver: Arc<dyn Driver>,
    params: Mutex<ConnectionParams>,
    post_open_statements: Mutex<Vec<String>>,
    upsert_enabled: AtomicBool,
    extension: Mutex<Option<Arc<dyn DriverExtension>>>,
    session: Mutex<Option<Arc<dyn Connection>>>,
}

impl Descriptor {
    fn new(name: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        Self {
            name: name.into(),
            driver,
            params: Mutex::new(ConnectionParams::default()),
            post_open_statements: Mutex::new(Vec::new()),
            upsert_enabled: AtomicBool::new(false),
            extension: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// The connection name this descriptor is registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The driver kind backing this descriptor
    pub fn kind(&self) -> DriverKind {
        self.driver.kind()
    }

    /// The driver's registry key
    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Snapshot of the current connection parameters
    pub fn params(&self) -> ConnectionParams {
        self.params.lock().clone()
    }

    /// Replace the connection parameters. Only meaningful before the
    /// descriptor is first opened.
    pub fn set_params(&self, params: ConnectionParams) {
        *self.params.lock() = params;
    }

    /// Statements executed once after each physical open
    pub fn post_open_statements(&self) -> Vec<String> {
        self.post_open_statements.lock().clone()
    }

    /// Set the post-open statements
    pub fn set_post_open_statements(&self, statements: Vec<String>) {
        *self.post_open_statements.lock() = statements;
    }

    /// Whether upsert-style writes are enabled for this database
    pub fn upsert_enabled(&self) -> bool {
        self.upsert_enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable upsert-style writes
    pub fn set_upsert_enabled(&self, enabled: bool) {
        self.upsert_enabled.store(enabled, Ordering::Relaxed);
    }

    /// The driver-extension capability, if any
    pub fn extension(&self) -> Option<Arc<dyn DriverExtension>> {
        self.extension.lock().clone()
    }

    /// Attach a driver-extension capability
    pub fn set_extension(&self, extension: Option<Arc<dyn DriverExtension>>) {
        *self.extension.lock() = extension;
    }

    /// Whether the descriptor is physically open
    pub fn is_open(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Physically open the descriptor with its current parameters
    pub async fn open(&self) -> Result<()> {
        if self.is_open() {
            warn!(name = %self.name, "descriptor is already open");
            return Ok(());
        }
        let params = self.params.lock().clone();
        let session = self.driver.open(&params).await?;
        *self.session.lock() = Some(Arc::from(session));
        Ok(())
    }

    /// Physically close the descriptor. Close failures are logged, not
    /// surfaced: the session is discarded either way.
    pub async fn close(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                warn!(name = %self.name, error = %e, "error closing connection");
            }
        }
    }

    /// Execute a statement on the open session
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let session = self.session.lock().clone();
        match session {
            Some(session) => session.execute(sql).await,
            None => Err(Error::NotOpen {
                name: self.name.clone(),
            }),
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Name-keyed registry of drivers, extension factories and descriptors.
///
/// Concurrent: lookups on the checkout hot path take no coarse lock.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: DashMap<String, Arc<dyn Driver>>,
    extension_factories: DashMap<String, Arc<dyn ExtensionFactory>>,
    descriptors: DashMap<String, Arc<Descriptor>>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its own name
    pub fn register_driver(&self, driver: Arc<dyn Driver>) {
        let name = driver.name().to_owned();
        debug!(driver = %name, kind = %driver.kind(), "registered driver");
        self.drivers.insert(name, driver);
    }

    /// Register an extension factory for a driver name
    pub fn register_extension_factory(
        &self,
        driver: impl Into<String>,
        factory: Arc<dyn ExtensionFactory>,
    ) {
        self.extension_factories.insert(driver.into(), factory);
    }

    /// Create the extension for a driver name, if a factory is registered
    /// and produces one
    pub fn create_extension(&self, driver: &str) -> Option<Arc<dyn DriverExtension>> {
        self.extension_factories
            .get(driver)
            .and_then(|factory| factory.create(driver))
    }

    /// Create and register a descriptor for the named driver.
    ///
    /// Replaces (and warns about) any descriptor already registered under
    /// the same connection name.
    pub fn add_descriptor(&self, driver: &str, name: &str) -> Result<Arc<Descriptor>> {
        let driver = self
            .drivers
            .get(driver)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::UnknownDriver {
                kind: driver.to_owned(),
            })?;

        let descriptor = Arc::new(Descriptor::new(name, driver));
        if self
            .descriptors
            .insert(name.to_owned(), Arc::clone(&descriptor))
            .is_some()
        {
            warn!(%name, "replacing existing descriptor");
        }
        Ok(descriptor)
    }

    /// Look up a descriptor by connection name
    pub fn descriptor(&self, name: &str) -> Option<Arc<Descriptor>> {
        self.descriptors
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// De-register a descriptor
    pub fn remove(&self, name: &str) -> Option<Arc<Descriptor>> {
        self.descriptors.remove(name).map(|(_, descriptor)| descriptor)
    }

    /// Number of registered descriptors
    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether no descriptors are registered
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Apply settings to a descriptor.
    ///
    /// `DatabaseName` is required; when it is empty an error is reported
    /// and the remaining settings are skipped. For file-based drivers a
    /// relative database path without a `:` is resolved under `web_root`.
    /// Other values are applied only when non-empty (`Port` when positive).
    pub fn apply_settings(
        &self,
        descriptor: &Descriptor,
        settings: &DatabaseSettings,
        web_root: &Path,
    ) -> Result<()> {
        let mut database = settings.database_name.trim().to_owned();
        if database.is_empty() {
            error!(name = %descriptor.name(), "database name is empty");
            return Err(Error::config("database name is empty"));
        }

        if descriptor.kind().is_file_based()
            && !database.contains(':')
            && Path::new(&database).is_relative()
        {
            database = web_root.join(&database).to_string_lossy().into_owned();
        }
        debug!(
            name = %descriptor.name(),
            driver = %descriptor.driver_name(),
            %database,
            "applying database settings"
        );

        let mut params = ConnectionParams {
            database,
            ..Default::default()
        };

        let host = settings.host_name.trim();
        if !host.is_empty() {
            params.host = Some(host.to_owned());
        }
        if settings.port > 0 {
            params.port = Some(settings.port);
        }
        let user = settings.user_name.trim();
        if !user.is_empty() {
            params.user = Some(user.to_owned());
        }
        let password = settings.password.trim();
        if !password.is_empty() {
            params.password = Some(password.to_owned());
        }
        let options = settings.connect_options.trim();
        if !options.is_empty() {
            params.connect_options = Some(options.to_owned());
        }
        descriptor.set_params(params);

        descriptor.set_post_open_statements(settings.post_open_statement_list());
        descriptor.set_upsert_enabled(settings.enable_upsert);
        descriptor.set_extension(self.create_extension(descriptor.driver_name()));

        Ok(())
    }
}
