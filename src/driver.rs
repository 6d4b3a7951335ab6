//! Driver-facing traits for rdbc-pool
//!
//! The pool never talks to a database vendor directly. It consumes:
//! - [`Driver`]: materialises a physical connection from parameters
//! - [`Connection`]: a live socket with statement execution
//! - [`ExtensionFactory`] / [`DriverExtension`]: optional per-driver
//!   capability objects, opaque to the pool itself

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Database driver kind identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    /// PostgreSQL
    Postgres,
    /// MySQL/MariaDB
    MySql,
    /// SQL Server
    SqlServer,
    /// SQLite (embedded, file-based)
    Sqlite,
    /// Oracle
    Oracle,
    /// Unknown/custom
    Unknown,
}

impl DriverKind {
    /// Parse a driver kind from a registry key name
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Self::Postgres,
            "mysql" | "mariadb" => Self::MySql,
            "sqlserver" | "mssql" => Self::SqlServer,
            "sqlite" | "sqlite3" => Self::Sqlite,
            "oracle" => Self::Oracle,
            _ => Self::Unknown,
        }
    }

    /// Whether the database lives in a local file rather than behind a
    /// server socket. Drives the web-root path rule during settings
    /// application.
    pub fn is_file_based(self) -> bool {
        matches!(self, Self::Sqlite)
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => write!(f, "PostgreSQL"),
            Self::MySql => write!(f, "MySQL"),
            Self::SqlServer => write!(f, "SQL Server"),
            Self::Sqlite => write!(f, "SQLite"),
            Self::Oracle => write!(f, "Oracle"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Parameters of a pooled connection descriptor.
///
/// Populated from [`DatabaseSettings`](crate::settings::DatabaseSettings)
/// during pool initialisation, before the descriptor is first opened.
/// `None`/empty fields leave the driver default in place.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Database name, or file path for file-based drivers
    pub database: String,
    /// Host to connect to
    pub host: Option<String>,
    /// TCP port
    pub port: Option<u16>,
    /// User name
    pub user: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Driver-specific connect options
    pub connect_options: Option<String>,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Redact the password so parameters can be logged safely.
        f.debug_struct("ConnectionParams")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_options", &self.connect_options)
            .finish()
    }
}

/// A physical database connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a statement, returning the affected row count
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Materialises physical connections for one driver kind
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry key, e.g. `"postgres"`
    fn name(&self) -> &str;

    /// The driver kind
    fn kind(&self) -> DriverKind;

    /// Open a physical connection. May block on network I/O.
    async fn open(&self, params: &ConnectionParams) -> Result<Box<dyn Connection>>;
}

/// Opaque capability object attached to a descriptor.
///
/// The pool stores and hands these out; it never interprets them. The
/// query layer downcasts through [`DriverExtension::as_any`].
pub trait DriverExtension: Send + Sync {
    /// Extension name, typically the driver kind it augments
    fn name(&self) -> &str;

    /// Downcast support for the query layer
    fn as_any(&self) -> &dyn Any;
}

/// Creates [`DriverExtension`]s for a driver kind
pub trait ExtensionFactory: Send + Sync {
    /// Create the extension for the named driver, if one applies
    fn create(&self, driver: &str) -> Option<Arc<dyn DriverExtension>>;
}
