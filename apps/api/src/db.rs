//! PostgreSQL client handle and startup connectivity probe.
//!
//! The pool is built lazily: constructing a [`Database`] performs no network
//! I/O, connections are opened on first use. [`verify_connection`] is the
//! startup handshake.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, Connection, PgPool};
use tracing::{error, info};

use crate::config::DbSettings;
use crate::errors::AppError;

/// Fixed pool sizing. Never derived from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl PoolSettings {
    pub const FIXED: PoolSettings = PoolSettings {
        max_connections: 5,
        min_connections: 0,
        acquire_timeout: Duration::from_millis(30_000),
        idle_timeout: Duration::from_millis(10_000),
    };
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::FIXED
    }
}

/// Shared client handle. Clones refer to the same underlying pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    connect: PgConnectOptions,
    settings: PoolSettings,
}

impl Database {
    /// Builds the pool for `db` with [`PoolSettings::FIXED`].
    pub fn new(db: &DbSettings) -> Self {
        let settings = PoolSettings::FIXED;
        let connect = connect_options(db);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(settings.idle_timeout)
            .connect_lazy_with(connect.clone());

        info!(
            "PostgreSQL pool configured for {}:{}/{} (max {} connections)",
            db.host, db.port, db.name, settings.max_connections
        );

        Database {
            pool,
            connect,
            settings,
        }
    }

    /// The pool used to issue queries.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }
}

/// SQL statement logging is always off.
fn connect_options(db: &DbSettings) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&db.host)
        .port(db.port)
        .database(&db.name)
        .username(&db.user)
        .password(&db.password)
        .disable_statement_logging()
}

/// Anything that can prove the database is reachable and accepts our credentials.
///
/// Carried behind `Arc<dyn ConnectionProbe>` so the startup check and the
/// health endpoint can run against a substitute in tests.
#[async_trait]
pub trait ConnectionProbe: Send + Sync {
    async fn handshake(&self) -> Result<(), sqlx::Error>;
}

#[async_trait]
impl ConnectionProbe for Database {
    // A dedicated connection instead of the pool: pool acquisition retries
    // connect errors until the acquire timeout and reports only PoolTimedOut.
    async fn handshake(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.connect.connect().await?;
        conn.ping().await?;
        conn.close().await
    }
}

/// Runs the handshake once and logs the outcome.
///
/// Never panics or exits; the caller decides whether a failure is fatal.
pub async fn verify_connection(probe: &dyn ConnectionProbe) -> Result<(), AppError> {
    match probe.handshake().await {
        Ok(()) => {
            info!("Database connection established successfully");
            Ok(())
        }
        Err(e) => {
            error!("Unable to connect to the database: {e}");
            Err(AppError::Database(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Runs `fut` with a thread-local subscriber and returns what it logged.
    async fn with_captured_logs<F: Future>(fut: F) -> (F::Output, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();

        let _guard = tracing::subscriber::set_default(subscriber);
        let output = fut.await;
        (output, buffer.contents())
    }

    struct FakeProbe {
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ConnectionProbe for FakeProbe {
        async fn handshake(&self) -> Result<(), sqlx::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(sqlx::Error::PoolTimedOut)
            } else {
                Ok(())
            }
        }
    }

    fn settings(host: &str, port: u16) -> DbSettings {
        DbSettings {
            host: host.to_string(),
            port,
            name: "erp".to_string(),
            user: "erp_app".to_string(),
            password: "s3cret".to_string(),
        }
    }

    #[test]
    fn test_fixed_pool_settings() {
        let fixed = PoolSettings::FIXED;
        assert_eq!(fixed.max_connections, 5);
        assert_eq!(fixed.min_connections, 0);
        assert_eq!(fixed.acquire_timeout, Duration::from_millis(30_000));
        assert_eq!(fixed.idle_timeout, Duration::from_millis(10_000));
        assert_eq!(PoolSettings::default(), fixed);
    }

    #[tokio::test]
    async fn test_handle_uses_fixed_settings_regardless_of_input() {
        for db in [settings("localhost", 5432), settings("10.0.0.9", 6543)] {
            let database = Database::new(&db);
            assert_eq!(*database.settings(), PoolSettings::FIXED);

            let options = database.pool().options();
            assert_eq!(options.get_max_connections(), 5);
            assert_eq!(options.get_min_connections(), 0);
            assert_eq!(options.get_acquire_timeout(), Duration::from_millis(30_000));
            assert_eq!(options.get_idle_timeout(), Some(Duration::from_millis(10_000)));
        }
    }

    #[tokio::test]
    async fn test_construction_opens_no_connections() {
        let database = Database::new(&settings("unreachable.invalid", 5432));
        assert_eq!(database.pool().size(), 0);
        assert!(!database.pool().is_closed());
    }

    #[tokio::test]
    async fn test_clones_share_one_pool() {
        let database = Database::new(&settings("localhost", 5432));
        let shared = database.clone();

        database.pool().close().await;
        assert!(shared.pool().is_closed());
    }

    #[tokio::test]
    async fn test_verify_connection_success() {
        let probe = FakeProbe::new(false);
        assert!(verify_connection(&probe).await.is_ok());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_verify_connection_failure_returns_typed_error() {
        let probe = FakeProbe::new(true);
        let err = verify_connection(&probe).await.unwrap_err();

        assert!(matches!(err, AppError::Database(sqlx::Error::PoolTimedOut)));
        assert!(err.to_string().contains("pool timed out"));
    }

    #[tokio::test]
    async fn test_statement_logging_is_disabled() {
        let database = Database::new(&settings("localhost", 5432));
        let options = format!("{:?}", database.connect);

        assert!(options.contains("statements_level: Off"));
        assert!(options.contains("slow_statements_level: Off"));
    }

    #[tokio::test]
    async fn test_success_is_logged() {
        let probe = FakeProbe::new(false);
        let (result, logs) = with_captured_logs(verify_connection(&probe)).await;

        assert!(result.is_ok());
        assert!(logs.contains("Database connection established successfully"));
        assert!(!logs.contains("ERROR"));
    }

    #[tokio::test]
    async fn test_failure_is_logged_with_driver_detail() {
        let probe = FakeProbe::new(true);
        let (result, logs) = with_captured_logs(verify_connection(&probe)).await;

        assert!(result.is_err());
        assert!(logs.contains("ERROR"));
        assert!(logs.contains("Unable to connect to the database"));
        assert!(logs.contains("pool timed out while waiting for an open connection"));
    }

    #[tokio::test]
    async fn test_refused_connection_reports_io_error_promptly() {
        let database = Database::new(&settings("127.0.0.1", 1));

        let result = tokio::time::timeout(Duration::from_secs(10), verify_connection(&database))
            .await
            .expect("handshake waited for the pool acquire timeout");

        match result {
            Err(AppError::Database(sqlx::Error::Io(e))) => {
                assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused);
            }
            other => panic!("expected a refused I/O error, got {other:?}"),
        }
    }
}
