//! SurrealDB connection setup
//!
//! A [`DbTarget`] names where checkpoints live: in memory (`mem://`), an
//! embedded SurrealKV directory, any SurrealDB URL, or a cloud instance with
//! credentials. Every connection selects its namespace/database and runs the
//! schema migrations before it is handed out.

use crate::error::StateError;
use crate::migrations;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

const DEFAULT_NAMESPACE: &str = "deepresearch";
const DEFAULT_DATABASE: &str = "main";

/// Default embedded database location when nothing else is configured.
pub const DEFAULT_LOCAL_PATH: &str = ".deepresearch/db";

/// Credentials and location of a hosted SurrealDB instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    /// WebSocket endpoint, e.g. `wss://xxx.aws-use1.surrealdb.cloud`
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Sign in as a root user instead of a database user.
    pub is_root: bool,
}

impl CloudConfig {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }
}

/// Where to open the checkpoint database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbTarget {
    Cloud(CloudConfig),
    /// Any URL `surrealdb::engine::any` understands.
    Url(String),
    /// Embedded SurrealKV directory, created on demand.
    Local(String),
}

impl DbTarget {
    /// Interpret a user-supplied location: anything with a scheme is a URL,
    /// everything else a local directory.
    pub fn parse(location: &str) -> Self {
        if location.contains("://") {
            DbTarget::Url(location.to_string())
        } else {
            DbTarget::Local(location.to_string())
        }
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolution order: cloud (`SURREALDB_ENDPOINT` with `SURREALDB_USERNAME`
    /// and `SURREALDB_PASSWORD`), then `SURREALDB_URL`, then
    /// [`DEFAULT_LOCAL_PATH`]. `SURREALDB_NAMESPACE`, `SURREALDB_DATABASE` and
    /// `SURREALDB_ROOT` refine the cloud target.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let (Some(endpoint), Some(username), Some(password)) = (
            get("SURREALDB_ENDPOINT"),
            get("SURREALDB_USERNAME"),
            get("SURREALDB_PASSWORD"),
        ) {
            let mut cloud = CloudConfig::new(endpoint, username, password)
                .with_root(get("SURREALDB_ROOT").is_some_and(|v| v.eq_ignore_ascii_case("true")));
            if let Some(ns) = get("SURREALDB_NAMESPACE") {
                cloud = cloud.with_namespace(ns);
            }
            if let Some(db) = get("SURREALDB_DATABASE") {
                cloud = cloud.with_database(db);
            }
            return DbTarget::Cloud(cloud);
        }

        match get("SURREALDB_URL") {
            Some(url) => DbTarget::Url(url),
            None => DbTarget::Local(DEFAULT_LOCAL_PATH.to_string()),
        }
    }

    /// Open a migrated connection to this target.
    pub async fn open(&self) -> Result<Surreal<Any>> {
        match self {
            DbTarget::Cloud(config) => connect_cloud(config).await,
            DbTarget::Url(url) => connect(url).await,
            DbTarget::Local(path) => connect_local(path).await,
        }
    }
}

/// Connect to `url` (any engine) with the default namespace and run migrations.
#[instrument(skip_all, fields(url = %url))]
pub async fn connect(url: &str) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StateError::Connection(format!("cannot reach {url}: {e}")))?;

    db.use_ns(DEFAULT_NAMESPACE)
        .use_db(DEFAULT_DATABASE)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    migrations::init_schema(&db).await?;
    info!("checkpoint database ready");
    Ok(db)
}

/// Sign in to a hosted instance and run migrations.
#[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace))]
pub async fn connect_cloud(config: &CloudConfig) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(&config.endpoint)
        .await
        .map_err(|e| StateError::Connection(format!("cannot reach {}: {e}", config.endpoint)))?;

    let signin = if config.is_root {
        db.signin(Root {
            username: &config.username,
            password: &config.password,
        })
        .await
    } else {
        db.signin(Database {
            namespace: &config.namespace,
            database: &config.database,
            username: &config.username,
            password: &config.password,
        })
        .await
    };
    signin.map_err(|e| StateError::Connection(format!("sign-in rejected: {e}")))?;

    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    migrations::init_schema(&db).await?;
    info!(root = config.is_root, "checkpoint database ready");
    Ok(db)
}

/// Connect to whatever [`DbTarget::from_env`] resolves to.
pub async fn connect_from_env() -> Result<Surreal<Any>> {
    DbTarget::from_env().open().await
}

/// Open an embedded SurrealKV database under `path`, creating the directory.
pub async fn connect_local(path: &str) -> Result<Surreal<Any>> {
    std::fs::create_dir_all(path)
        .map_err(|e| StateError::Connection(format!("cannot create {path}: {e}")))?;
    connect(&format!("surrealkv://{path}")).await
}
