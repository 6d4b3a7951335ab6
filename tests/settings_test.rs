//! Tests for the settings schema and the settings applier

use async_trait::async_trait;
use rdbc_pool::prelude::*;
use std::any::Any;
use std::path::Path;
use std::sync::Arc;

// ==================== Minimal driver ====================

struct NullConnection;

#[async_trait]
impl Connection for NullConnection {
    async fn execute(&self, _sql: &str) -> Result<u64> {
        Ok(0)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct NullDriver {
    name: &'static str,
    kind: DriverKind,
}

#[async_trait]
impl Driver for NullDriver {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> DriverKind {
        self.kind
    }

    async fn open(&self, _params: &ConnectionParams) -> Result<Box<dyn Connection>> {
        Ok(Box::new(NullConnection))
    }
}

fn registry() -> Arc<DriverRegistry> {
    let registry = Arc::new(DriverRegistry::new());
    registry.register_driver(Arc::new(NullDriver {
        name: "sqlite",
        kind: DriverKind::Sqlite,
    }));
    registry.register_driver(Arc::new(NullDriver {
        name: "postgres",
        kind: DriverKind::Postgres,
    }));
    registry
}

// ==================== Schema ====================

#[test]
fn test_settings_deserialize_pascal_case_keys() {
    let settings: DatabaseSettings = serde_json::from_str(
        r#"{
            "DriverType": "postgres",
            "DatabaseName": "app",
            "HostName": "db.internal",
            "Port": 5432,
            "UserName": "web",
            "Password": "secret",
            "ConnectOptions": "sslmode=require",
            "PostOpenStatements": "SET timezone = 'UTC'",
            "EnableUpsert": true
        }"#,
    )
    .unwrap();

    assert_eq!(settings.driver_type, "postgres");
    assert_eq!(settings.database_name, "app");
    assert_eq!(settings.host_name, "db.internal");
    assert_eq!(settings.port, 5432);
    assert_eq!(settings.user_name, "web");
    assert_eq!(settings.password, "secret");
    assert_eq!(settings.connect_options, "sslmode=require");
    assert!(settings.enable_upsert);
}

#[test]
fn test_settings_partial_document_uses_defaults() {
    let settings: DatabaseSettings =
        serde_json::from_str(r#"{"DriverType": "sqlite", "DatabaseName": "db.sqlite"}"#).unwrap();

    assert_eq!(settings.driver_type, "sqlite");
    assert_eq!(settings.port, 0);
    assert!(!settings.enable_upsert);
    assert!(settings.post_open_statements.is_empty());
}

#[test]
fn test_settings_serialize_pascal_case_keys() {
    let value = serde_json::to_value(DatabaseSettings::default()).unwrap();
    let object = value.as_object().unwrap();
    for key in [
        "DriverType",
        "DatabaseName",
        "HostName",
        "Port",
        "UserName",
        "Password",
        "ConnectOptions",
        "PostOpenStatements",
        "EnableUpsert",
    ] {
        assert!(object.contains_key(key), "missing key {key}");
    }
}

// ==================== Settings application ====================

fn apply(
    registry: &DriverRegistry,
    driver: &str,
    settings: &DatabaseSettings,
    web_root: &str,
) -> Arc<Descriptor> {
    let descriptor = registry.add_descriptor(driver, "rdb00_0").unwrap();
    let _ = registry.apply_settings(&descriptor, settings, Path::new(web_root));
    descriptor
}

#[test]
fn test_relative_sqlite_path_resolved_under_web_root() {
    let registry = registry();
    let settings = DatabaseSettings {
        driver_type: "sqlite".into(),
        database_name: "data/app.db".into(),
        ..Default::default()
    };
    let descriptor = apply(&registry, "sqlite", &settings, "/srv/app");
    assert_eq!(descriptor.params().database, "/srv/app/data/app.db");
}

#[test]
fn test_sqlite_special_and_absolute_names_untouched() {
    let registry = registry();

    let memory = DatabaseSettings {
        driver_type: "sqlite".into(),
        database_name: ":memory:".into(),
        ..Default::default()
    };
    let descriptor = apply(&registry, "sqlite", &memory, "/srv/app");
    assert_eq!(descriptor.params().database, ":memory:");

    let absolute = DatabaseSettings {
        driver_type: "sqlite".into(),
        database_name: "/var/lib/app.db".into(),
        ..Default::default()
    };
    let descriptor = apply(&registry, "sqlite", &absolute, "/srv/app");
    assert_eq!(descriptor.params().database, "/var/lib/app.db");
}

#[test]
fn test_server_databases_keep_relative_names() {
    let registry = registry();
    let settings = DatabaseSettings {
        driver_type: "postgres".into(),
        database_name: "app".into(),
        ..Default::default()
    };
    let descriptor = apply(&registry, "postgres", &settings, "/srv/app");
    assert_eq!(descriptor.params().database, "app");
}

#[test]
fn test_empty_values_leave_driver_defaults() {
    let registry = registry();
    let settings = DatabaseSettings {
        driver_type: "postgres".into(),
        database_name: "app".into(),
        host_name: "  ".into(),
        port: 0,
        ..Default::default()
    };
    let descriptor = apply(&registry, "postgres", &settings, "/");
    let params = descriptor.params();
    assert_eq!(params.host, None);
    assert_eq!(params.port, None);
    assert_eq!(params.user, None);
    assert_eq!(params.password, None);
    assert_eq!(params.connect_options, None);
}

#[test]
fn test_non_empty_values_applied() {
    let registry = registry();
    let settings = DatabaseSettings {
        driver_type: "postgres".into(),
        database_name: "app".into(),
        host_name: "db.internal".into(),
        port: 6432,
        user_name: "web".into(),
        password: "secret".into(),
        connect_options: "sslmode=require".into(),
        post_open_statements: "SET search_path TO app; SET timezone = 'UTC'".into(),
        enable_upsert: true,
        ..Default::default()
    };
    let descriptor = apply(&registry, "postgres", &settings, "/");
    let params = descriptor.params();
    assert_eq!(params.host.as_deref(), Some("db.internal"));
    assert_eq!(params.port, Some(6432));
    assert_eq!(params.user.as_deref(), Some("web"));
    assert_eq!(params.password.as_deref(), Some("secret"));
    assert_eq!(params.connect_options.as_deref(), Some("sslmode=require"));
    assert_eq!(
        descriptor.post_open_statements(),
        vec!["SET search_path TO app", "SET timezone = 'UTC'"]
    );
    assert!(descriptor.upsert_enabled());
}

#[test]
fn test_empty_database_name_rejected() {
    let registry = registry();
    let settings = DatabaseSettings {
        driver_type: "postgres".into(),
        database_name: "   ".into(),
        host_name: "db.internal".into(),
        ..Default::default()
    };
    let descriptor = registry.add_descriptor("postgres", "rdb00_0").unwrap();
    let result = registry.apply_settings(&descriptor, &settings, Path::new("/"));
    assert!(result.is_err());
    // Remaining settings were skipped.
    assert_eq!(descriptor.params(), ConnectionParams::default());
}

// ==================== Driver extensions ====================

struct UpsertExtension;

impl DriverExtension for UpsertExtension {
    fn name(&self) -> &str {
        "postgres-upsert"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct UpsertExtensionFactory;

impl ExtensionFactory for UpsertExtensionFactory {
    fn create(&self, driver: &str) -> Option<Arc<dyn DriverExtension>> {
        (driver == "postgres").then(|| Arc::new(UpsertExtension) as Arc<dyn DriverExtension>)
    }
}

#[test]
fn test_extension_attached_per_driver() {
    let registry = registry();
    registry.register_extension_factory("postgres", Arc::new(UpsertExtensionFactory));

    let settings = DatabaseSettings {
        driver_type: "postgres".into(),
        database_name: "app".into(),
        ..Default::default()
    };
    let descriptor = apply(&registry, "postgres", &settings, "/");
    let extension = descriptor.extension().unwrap();
    assert_eq!(extension.name(), "postgres-upsert");
    assert!(extension.as_any().downcast_ref::<UpsertExtension>().is_some());

    let sqlite = DatabaseSettings {
        driver_type: "sqlite".into(),
        database_name: ":memory:".into(),
        ..Default::default()
    };
    let descriptor = apply(&registry, "sqlite", &sqlite, "/");
    assert!(descriptor.extension().is_none());
}
