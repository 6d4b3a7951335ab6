//! Configuration sources for the pool
//!
//! [`DatabaseSettings`] is the per-database parameter block; its serde
//! keys match the application settings file verbatim (`DriverType`,
//! `DatabaseName`, ...). [`AppContext`] is the application-side
//! collaborator the pool reads its sizing and settings from;
//! [`StaticContext`] is a fixed in-memory implementation for embedding
//! and tests.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Per-database driver parameters.
///
/// All fields default to empty/zero/false; empty values leave the driver
/// default in place when applied. An empty `DriverType` disables the
/// database id entirely.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DatabaseSettings {
    /// Driver registry key; empty disables the slot
    pub driver_type: String,
    /// Database name, or file path for file-based drivers. Required.
    pub database_name: String,
    /// Host to connect to
    pub host_name: String,
    /// TCP port, applied if > 0
    pub port: u16,
    /// User name
    pub user_name: String,
    /// Password
    pub password: String,
    /// Driver-specific connect options
    pub connect_options: String,
    /// `;`-separated statements executed after each physical open
    pub post_open_statements: String,
    /// Enable upsert-style writes
    pub enable_upsert: bool,
}

impl DatabaseSettings {
    /// Build settings from a string-keyed map, ignoring unknown keys.
    ///
    /// `Port` must parse as a decimal number and `EnableUpsert` accepts
    /// `"true"`/`"1"`; anything else leaves the default.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let value = |key: &str| map.get(key).map(|v| v.trim().to_owned()).unwrap_or_default();
        Self {
            driver_type: value("DriverType"),
            database_name: value("DatabaseName"),
            host_name: value("HostName"),
            port: value("Port").parse().unwrap_or(0),
            user_name: value("UserName"),
            password: value("Password"),
            connect_options: value("ConnectOptions"),
            post_open_statements: value("PostOpenStatements"),
            enable_upsert: parse_bool(&value("EnableUpsert")),
        }
    }

    /// The post-open statements split on `;`, trimmed, empty fragments
    /// discarded
    pub fn post_open_statement_list(&self) -> Vec<String> {
        self.post_open_statements
            .split(';')
            .map(str::trim)
            .filter(|fragment| !fragment.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("driver_type", &self.driver_type)
            .field("database_name", &self.database_name)
            .field("host_name", &self.host_name)
            .field("port", &self.port)
            .field("user_name", &self.user_name)
            .field(
                "password",
                &if self.password.is_empty() { "" } else { "***" },
            )
            .field("connect_options", &self.connect_options)
            .field("post_open_statements", &self.post_open_statements)
            .field("enable_upsert", &self.enable_upsert)
            .finish()
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Application context consumed by the pool.
///
/// Supplies pool sizing, the per-database settings, and the paths the
/// settings applier needs. Read once during pool initialisation, except
/// for [`sql_available`](AppContext::sql_available) which gates every
/// checkout.
pub trait AppContext: Send + Sync {
    /// Worker thread count of the surrounding server; the pool creates
    /// this many slots per database
    fn max_worker_threads(&self) -> usize;

    /// Number of configured databases
    fn database_count(&self) -> usize;

    /// Whether SQL is configured at all. When false, checkouts return
    /// invalid handles without error.
    fn sql_available(&self) -> bool;

    /// Environment name, e.g. `"product"` or `"dev"`; diagnostic only
    fn environment(&self) -> &str;

    /// Web root, used to resolve relative file-based database paths
    fn web_root(&self) -> &Path;

    /// Settings for a database id. Out-of-range ids yield defaults.
    fn database_settings(&self, id: usize) -> DatabaseSettings;
}

/// Fixed, in-memory [`AppContext`]
#[derive(Debug, Clone)]
pub struct StaticContext {
    max_worker_threads: usize,
    environment: String,
    web_root: PathBuf,
    sql_available: bool,
    databases: Vec<DatabaseSettings>,
}

impl StaticContext {
    /// Create a context with the given worker thread count and no
    /// databases
    pub fn new(max_worker_threads: usize) -> Self {
        Self {
            max_worker_threads,
            environment: "product".into(),
            web_root: PathBuf::from("."),
            sql_available: true,
            databases: Vec::new(),
        }
    }

    /// Append a configured database, in id order
    pub fn with_database(mut self, settings: DatabaseSettings) -> Self {
        self.databases.push(settings);
        self
    }

    /// Set the environment name
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Set the web root
    pub fn with_web_root(mut self, web_root: impl Into<PathBuf>) -> Self {
        self.web_root = web_root.into();
        self
    }

    /// Mark SQL as configured or not
    pub fn with_sql_available(mut self, available: bool) -> Self {
        self.sql_available = available;
        self
    }
}

impl AppContext for StaticContext {
    fn max_worker_threads(&self) -> usize {
        self.max_worker_threads
    }

    fn database_count(&self) -> usize {
        self.databases.len()
    }

    fn sql_available(&self) -> bool {
        self.sql_available
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn web_root(&self) -> &Path {
        &self.web_root
    }

    fn database_settings(&self, id: usize) -> DatabaseSettings {
        self.databases.get(id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_map() {
        let mut map = HashMap::new();
        map.insert("DriverType".into(), " postgres ".into());
        map.insert("DatabaseName".into(), "app".into());
        map.insert("Port".into(), "5432".into());
        map.insert("EnableUpsert".into(), "TRUE".into());
        map.insert("SomethingElse".into(), "ignored".into());

        let settings = DatabaseSettings::from_map(&map);
        assert_eq!(settings.driver_type, "postgres");
        assert_eq!(settings.database_name, "app");
        assert_eq!(settings.port, 5432);
        assert!(settings.enable_upsert);
        assert!(settings.host_name.is_empty());
    }

    #[test]
    fn test_from_map_bad_values() {
        let mut map = HashMap::new();
        map.insert("Port".into(), "not-a-port".into());
        map.insert("EnableUpsert".into(), "2".into());

        let settings = DatabaseSettings::from_map(&map);
        assert_eq!(settings.port, 0);
        assert!(!settings.enable_upsert);
    }

    #[test]
    fn test_post_open_statement_list() {
        let settings = DatabaseSettings {
            post_open_statements: "SET search_path TO app;;  SET timezone = 'UTC' ;".into(),
            ..Default::default()
        };
        assert_eq!(
            settings.post_open_statement_list(),
            vec!["SET search_path TO app", "SET timezone = 'UTC'"]
        );

        let empty = DatabaseSettings::default();
        assert!(empty.post_open_statement_list().is_empty());
    }

    #[test]
    fn test_debug_redacts_password() {
        let settings = DatabaseSettings {
            password: "hunter2".into(),
            ..Default::default()
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_static_context_defaults() {
        let context = StaticContext::new(4);
        assert_eq!(context.max_worker_threads(), 4);
        assert_eq!(context.database_count(), 0);
        assert!(context.sql_available());
        // Unknown ids fall back to defaults rather than panicking.
        assert_eq!(context.database_settings(9), DatabaseSettings::default());
    }
}
