//! Connection handle

use crate::config::{redact_dsn, ConnConfig};
use crate::cursor::{Cursor, Protocol};
use crate::error::{Error, Result};
use crate::typecast::{CastRegistry, Caster};
use std::fmt;
use tokio_postgres::{Client as PgClient, NoTls, SimpleQueryMessage};
use tracing::{debug, info, warn};

/// One PostgreSQL connection
///
/// Cursors borrow the client, so none can outlive the connection they run
/// on. Typecasters registered here apply to every binary cursor of this
/// connection unless a cursor overrides them.
pub struct Client {
    inner: PgClient,
    casts: CastRegistry,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("closed", &self.inner.is_closed())
            .field("casts", &self.casts)
            .finish()
    }
}

impl Client {
    /// Connect with a libpq-style DSN
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use pgprobe_client::Client;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::connect("dbname=pgprobe_test host=localhost").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(dsn: &str) -> Result<Self> {
        info!("Connecting to PostgreSQL");
        debug!("Connection string: {}", redact_dsn(dsn));

        let (client, connection) = tokio_postgres::connect(dsn, NoTls)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Connection error: {}", e);
            }
        });

        info!("Connected");
        Ok(Self {
            inner: client,
            casts: CastRegistry::new(),
        })
    }

    /// Connect using the settings in `config`
    ///
    /// tokio-postgres has no default host, so an unset host means
    /// `localhost`.
    pub async fn connect_config(config: &ConnConfig) -> Result<Self> {
        info!("Connecting with {}", config);
        let mut dsn = config.dsn();
        if config.host.is_none() {
            dsn.push_str(" host=localhost");
        }
        Self::connect(&dsn).await
    }

    /// Open a cursor on this connection
    ///
    /// ```no_run
    /// # use pgprobe_client::{Client, Protocol, Value};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = Client::connect("dbname=pgprobe_test").await?;
    /// let mut cur = client.cursor(Protocol::Binary);
    /// cur.execute("SELECT %s + %s", vec![Value::from(1), Value::from(2)]).await?;
    /// println!("{:?}", cur.fetchone()?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn cursor(&self, protocol: Protocol) -> Cursor<'_> {
        Cursor::new(self, protocol)
    }

    /// Run statements through the simple query protocol
    ///
    /// Returns the row count reported for the last command.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        debug!("Executing SQL: {}", sql);

        let messages = self
            .inner
            .simple_query(sql)
            .await
            .map_err(Error::from_server)?;

        let mut rows = 0u64;
        for msg in messages {
            if let SimpleQueryMessage::CommandComplete(count) = msg {
                rows = count;
            }
        }
        debug!("Affected {} rows", rows);
        Ok(rows)
    }

    /// Connection-level binary typecasters
    pub fn casts(&self) -> &CastRegistry {
        &self.casts
    }

    /// Add a binary typecaster for every cursor of this connection
    pub fn register_cast(&mut self, oid: u32, caster: Caster) {
        debug!(oid, "Registering connection typecaster");
        self.casts.register(oid, caster);
    }

    /// The server's `server_version` setting
    pub async fn server_version(&self) -> Result<String> {
        let messages = self
            .inner
            .simple_query("SHOW server_version")
            .await
            .map_err(Error::from_server)?;

        messages
            .iter()
            .find_map(|msg| match msg {
                SimpleQueryMessage::Row(row) => row.get(0).map(str::to_string),
                _ => None,
            })
            .ok_or_else(|| Error::Query("server_version not reported".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub(crate) fn pg(&self) -> &PgClient {
        &self.inner
    }

    /// Close the connection
    pub async fn close(self) -> Result<()> {
        // dropping the tokio-postgres client terminates the connection task
        drop(self.inner);
        info!("Connection closed");
        Ok(())
    }
}
