//! # rdbc-pool
//!
//! Slot-based SQL connection pooling for multi-threaded application
//! servers.
//!
//! Worker tasks borrow a database handle per request, use it, and return
//! it; the pool amortises connection setup across requests while bounding
//! the number of open sockets per configured database.
//!
//! ## Features
//!
//! - **Pre-created slots**: one descriptor per worker thread and database
//!   id, created at initialisation and never allocated on the checkout
//!   path
//! - **Two-tier free lists**: a stack of configured-but-closed names and a
//!   stack of cached-open names per database, both LIFO for cache-warm
//!   reuse
//! - **Idle reaping**: a background task closes cached connections once a
//!   database has seen no returns for 30 seconds
//! - **Driver agnostic**: vendors plug in through the [`driver::Driver`]
//!   and [`driver::Connection`] traits; optional per-driver capabilities
//!   ride along as [`driver::DriverExtension`] objects
//! - **No waiting**: when every slot of an id is checked out the pool
//!   reports saturation instead of queueing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rdbc_pool::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(DriverRegistry::new());
//! registry.register_driver(Arc::new(PgDriver::new()));
//!
//! let context = Arc::new(
//!     StaticContext::new(8).with_database(DatabaseSettings {
//!         driver_type: "postgres".into(),
//!         database_name: "app".into(),
//!         host_name: "127.0.0.1".into(),
//!         port: 5432,
//!         ..Default::default()
//!     }),
//! );
//!
//! let pool = DatabasePool::install(context, registry);
//!
//! let handle = pool.checkout(0).await?;
//! handle.execute("INSERT INTO events (kind) VALUES ('login')").await?;
//! pool.release(handle, false).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod driver;
pub mod error;
pub mod pool;
pub mod registry;
pub mod settings;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, Result};

    // Driver traits and parameter types
    pub use crate::driver::{
        Connection, ConnectionParams, Driver, DriverExtension, DriverKind, ExtensionFactory,
    };

    // Registry types
    pub use crate::registry::{connection_name, database_id, Descriptor, DriverRegistry};

    // Configuration types
    pub use crate::settings::{AppContext, DatabaseSettings, StaticContext};

    // Pool types
    pub use crate::pool::{DatabasePool, IdStatus, SqlHandle};
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use pool::{DatabasePool, SqlHandle};

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _settings = DatabaseSettings::default();
        let _handle = SqlHandle::invalid();
        let _registry = DriverRegistry::new();
        assert_eq!(connection_name(0, 1), "rdb00_1");
    }

    #[test]
    fn test_error_reexport() {
        let err = Error::NoPooledConnection { id: 0 };
        assert!(err.is_saturation());
    }
}
