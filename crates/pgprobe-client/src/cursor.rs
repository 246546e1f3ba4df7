//! Cursors: plain (text), binary and dict-style fetching

use crate::client::Client;
use crate::error::{Error, Result};
use crate::placeholders::{self, Template};
use crate::rows::{DictRow, RowFactory};
use crate::typecast::{CastChain, CastRegistry, Caster};
use crate::types::{Column, Params, Row, Value};
use postgres_types::{FromSql, ToSql, Type};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio_postgres::SimpleQueryMessage;
use tracing::debug;

/// How a cursor talks to the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    /// Arguments interpolated client-side, results as server text
    #[default]
    Text,
    /// Arguments bound as `$N`, results decoded from binary
    Binary,
}

/// A cursor over one connection
///
/// Holds the result set of the last `execute`. Rows are handed out in order
/// and each row is returned once.
#[derive(Debug)]
pub struct Cursor<'a> {
    client: &'a Client,
    protocol: Protocol,
    casts: CastRegistry,
    description: Option<Arc<[Column]>>,
    rows: VecDeque<Row>,
    rowcount: i64,
    rownumber: usize,
    query: Option<String>,
    closed: bool,
    /// Rows returned by `fetchmany(None)`
    pub arraysize: usize,
}

/// Raw column bytes, NULL as `None`
struct RawValue<'a>(Option<&'a [u8]>);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawValue(Some(raw)))
    }

    fn from_sql_null(_: &Type) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawValue(None))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// Result of one round trip, before it is installed on the cursor
struct Outcome {
    description: Option<Arc<[Column]>>,
    rows: Vec<Row>,
    rowcount: i64,
}

fn scan(sql: &str, params: &Params) -> Result<Template> {
    if params.is_none() {
        placeholders::parse_verbatim(sql)
    } else {
        placeholders::parse(sql)
    }
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(client: &'a Client, protocol: Protocol) -> Self {
        Self {
            client,
            protocol,
            casts: CastRegistry::new(),
            description: None,
            rows: VecDeque::new(),
            rowcount: -1,
            rownumber: 0,
            query: None,
            closed: false,
            arraysize: 1,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Execute a query with pyformat arguments
    ///
    /// Without arguments the query is sent as written, `%` included. The
    /// previous result set is discarded even when the execute fails.
    pub async fn execute(&mut self, sql: &str, params: impl Into<Params>) -> Result<()> {
        self.check_open()?;
        self.reset();
        let params = params.into();
        if sql.trim().is_empty() {
            return Err(Error::programming("can't execute an empty query"));
        }
        let template = scan(sql, &params)?;
        debug!(
            protocol = ?self.protocol,
            params = params.len(),
            "Executing: {}",
            sql
        );

        let outcome = match self.protocol {
            Protocol::Text => {
                let rendered = template.render_client(&params)?;
                self.query = Some(rendered.clone());
                self.run_simple(&rendered).await?
            }
            Protocol::Binary => self.run_binary(&template, &params).await?,
        };
        self.install(outcome);
        Ok(())
    }

    /// Execute the same query once per argument set
    ///
    /// `rowcount` is the total over all executions; no result set is kept.
    pub async fn executemany<I, P>(&mut self, sql: &str, seq: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<Params>,
    {
        self.check_open()?;
        let mut total = 0i64;
        for params in seq {
            self.execute(sql, params).await?;
            total += self.rowcount.max(0);
        }
        self.install(Outcome {
            description: None,
            rows: Vec::new(),
            rowcount: total,
        });
        Ok(())
    }

    /// The query as the text cursor would send it
    pub fn mogrify(&self, sql: &str, params: impl Into<Params>) -> Result<String> {
        self.check_open()?;
        let params = params.into();
        scan(sql, &params)?.render_client(&params)
    }

    async fn run_simple(&self, sql: &str) -> Result<Outcome> {
        let messages = self
            .client
            .pg()
            .simple_query(sql)
            .await
            .map_err(Error::from_server)?;

        // only the last command's result set survives
        let mut outcome = Outcome {
            description: None,
            rows: Vec::new(),
            rowcount: -1,
        };
        let mut pending: Option<(Arc<[Column]>, Vec<Row>)> = None;
        for msg in messages {
            match msg {
                SimpleQueryMessage::RowDescription(columns) => {
                    let columns: Arc<[Column]> =
                        columns.iter().map(|c| Column::named(c.name())).collect();
                    pending = Some((columns, Vec::new()));
                }
                SimpleQueryMessage::Row(row) => {
                    let (columns, rows) = pending.get_or_insert_with(|| {
                        let columns: Arc<[Column]> =
                            row.columns().iter().map(|c| Column::named(c.name())).collect();
                        (columns, Vec::new())
                    });
                    let values = (0..row.len())
                        .map(|idx| match row.get(idx) {
                            Some(text) => Value::Text(text.to_string()),
                            None => Value::Null,
                        })
                        .collect();
                    rows.push(Row::new(Arc::clone(columns), values));
                }
                SimpleQueryMessage::CommandComplete(count) => {
                    outcome.rowcount = i64::try_from(count).unwrap_or(i64::MAX);
                    match pending.take() {
                        Some((columns, rows)) => {
                            outcome.description = Some(columns);
                            outcome.rows = rows;
                        }
                        None => {
                            outcome.description = None;
                            outcome.rows.clear();
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(outcome)
    }

    async fn run_binary(&mut self, template: &Template, params: &Params) -> Result<Outcome> {
        if template.is_multi_statement() {
            return Err(Error::MultipleStatements);
        }
        if !params.is_none() && placeholders::rejects_bind_params(template.source()) {
            let rendered = template.render_client(params)?;
            debug!("Statement can't take bind parameters, sending as text");
            self.query = Some(rendered.clone());
            return self.run_simple(&rendered).await;
        }

        let (sql, values) = template.render_server(params)?;
        self.query = Some(sql.clone());
        let types: Vec<Type> = values.iter().map(Value::pg_type).collect();
        let pg = self.client.pg();
        let statement = pg
            .prepare_typed(&sql, &types)
            .await
            .map_err(Error::from_server)?;
        let args: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

        if statement.columns().is_empty() {
            let count = pg
                .execute(&statement, &args)
                .await
                .map_err(Error::from_server)?;
            return Ok(Outcome {
                description: None,
                rows: Vec::new(),
                rowcount: i64::try_from(count).unwrap_or(i64::MAX),
            });
        }

        let columns: Arc<[Column]> = statement
            .columns()
            .iter()
            .map(|c| Column {
                name: c.name().to_string(),
                type_oid: Some(c.type_().oid()),
                type_name: Some(c.type_().name().to_string()),
            })
            .collect();
        let oids: Vec<u32> = statement.columns().iter().map(|c| c.type_().oid()).collect();

        let pg_rows = pg
            .query(&statement, &args)
            .await
            .map_err(Error::from_server)?;

        let chain = CastChain::new(Some(&self.casts), Some(self.client.casts()));
        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let mut values = Vec::with_capacity(oids.len());
            for (idx, oid) in oids.iter().enumerate() {
                let raw: RawValue<'_> = pg_row.try_get(idx).map_err(Error::from_server)?;
                values.push(chain.cast(*oid, raw.0)?);
            }
            rows.push(Row::new(Arc::clone(&columns), values));
        }

        Ok(Outcome {
            description: Some(columns),
            rowcount: rows.len() as i64,
            rows,
        })
    }

    fn reset(&mut self) {
        self.description = None;
        self.rows.clear();
        self.rowcount = -1;
        self.rownumber = 0;
        self.query = None;
    }

    fn install(&mut self, outcome: Outcome) {
        debug!(
            rowcount = outcome.rowcount,
            has_rows = outcome.description.is_some(),
            "Execute finished"
        );
        self.description = outcome.description;
        self.rows = outcome.rows.into();
        self.rowcount = outcome.rowcount;
        self.rownumber = 0;
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::CursorClosed)
        } else {
            Ok(())
        }
    }

    fn check_results(&self) -> Result<()> {
        self.check_open()?;
        if self.description.is_none() {
            return Err(Error::NoResults);
        }
        Ok(())
    }

    /// Next row, `None` when the result set is exhausted
    pub fn fetchone(&mut self) -> Result<Option<Row>> {
        self.check_results()?;
        let row = self.rows.pop_front();
        if row.is_some() {
            self.rownumber += 1;
        }
        Ok(row)
    }

    /// Up to `size` rows (`arraysize` when `None`)
    pub fn fetchmany(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        self.check_results()?;
        let n = size.unwrap_or(self.arraysize).min(self.rows.len());
        self.rownumber += n;
        Ok(self.rows.drain(..n).collect())
    }

    /// All remaining rows
    pub fn fetchall(&mut self) -> Result<Vec<Row>> {
        self.check_results()?;
        self.rownumber += self.rows.len();
        Ok(self.rows.drain(..).collect())
    }

    /// Drain the remaining rows as an iterator
    pub fn rows(&mut self) -> Result<impl Iterator<Item = Row> + '_> {
        self.check_results()?;
        self.rownumber += self.rows.len();
        Ok(self.rows.drain(..))
    }

    /// All remaining rows, shaped by `factory`
    pub fn fetchall_with<F: RowFactory>(&mut self, mut factory: F) -> Result<Vec<F::Output>> {
        Ok(self
            .fetchall()?
            .into_iter()
            .map(|row| factory.build(row))
            .collect())
    }

    /// Next row, shaped by `factory`
    pub fn fetchone_with<F: RowFactory>(&mut self, mut factory: F) -> Result<Option<F::Output>> {
        Ok(self.fetchone()?.map(|row| factory.build(row)))
    }

    /// All remaining rows as column name → value maps
    pub fn dictfetchall(&mut self) -> Result<Vec<HashMap<String, Value>>> {
        self.fetchall_with(DictRow)
    }

    /// Columns of the current result set
    pub fn description(&self) -> Option<&[Column]> {
        self.description.as_deref()
    }

    /// Rows affected or returned by the last execute, -1 when unknown
    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    /// Rows fetched so far from the current result set
    pub fn rownumber(&self) -> usize {
        self.rownumber
    }

    /// Last query sent, after placeholder rewriting
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Add a binary typecaster for this cursor only
    pub fn register_cast(&mut self, oid: u32, caster: Caster) {
        self.casts.register(oid, caster);
    }

    pub fn casts(&self) -> &CastRegistry {
        &self.casts
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drop the result set; later operations fail
    pub fn close(&mut self) {
        self.closed = true;
        self.description = None;
        self.rows.clear();
    }
}
