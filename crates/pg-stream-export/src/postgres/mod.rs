//! PostgreSQL connection pool and record source.
//!
//! Uses deadpool-postgres for pooling. A leased [`deadpool_postgres::Object`]
//! is the pipeline's resource handle; dropping it returns the connection to
//! the pool.

mod convert;
mod source;
mod tls;

pub use convert::{bind_params, row_to_record};
pub use source::PgRecordSource;
pub use tls::SslMode;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::core::{ConnectionPool, QuerySpec, RecordSource};
use crate::error::{ExportError, Result};

/// PostgreSQL connection pool.
pub struct PgPool {
    pool: Pool,
    target: String,
}

impl PgPool {
    /// Build a pool from configuration. No connection is made until the
    /// first [`acquire`](ConnectionPool::acquire).
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let pg_config = config.pg_config()?;
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match ssl_mode.connector()? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
            Some(connector) => {
                debug!(
                    "PostgreSQL TLS enabled (ssl_mode={:?}, hostname checked: {})",
                    ssl_mode,
                    ssl_mode.checks_hostname()
                );
                Manager::from_config(pg_config, connector, mgr_config)
            }
        };

        let pool = Pool::builder(mgr)
            .max_size(config.max_connections.max(1))
            .build()
            .map_err(|e| ExportError::pool(e, "creating PostgreSQL pool"))?;

        Ok(Self {
            pool,
            target: config.display_target(),
        })
    }

    /// Acquire a connection and run `SELECT 1`, returning the round-trip time.
    pub async fn health_check(&self) -> Result<Duration> {
        let start = Instant::now();
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| ExportError::pool(e, "testing PostgreSQL connection"))?;
        client.simple_query("SELECT 1").await?;
        let latency = start.elapsed();

        info!("Connected to PostgreSQL source: {} ({:?})", self.target, latency);
        Ok(latency)
    }

    /// Endpoint description for logs.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Close the pool; outstanding handles are dropped when released.
    pub fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl ConnectionPool for PgPool {
    type Handle = Object;

    async fn acquire(&self) -> Result<Object> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| ExportError::pool(e, format!("acquiring connection to {}", self.target)))?;
        debug!("Acquired connection to {}", self.target);
        Ok(client)
    }

    fn release(&self, handle: Object) {
        drop(handle);
        debug!("Released connection to {}", self.target);
    }

    async fn open_source<'h>(
        &self,
        handle: &'h mut Object,
        query: &QuerySpec,
    ) -> Result<Box<dyn RecordSource + 'h>> {
        let source = PgRecordSource::open(handle, query).await?;
        Ok(Box::new(source))
    }
}
