//! Demonstration blocks
//!
//! Each block runs a fixed sequence of queries and prints what came back.
//! Results go to stdout; timings go to stderr.

use anyhow::{bail, Context, Result};
use pgprobe_client::{
    params, Client, Error, OrderedDictRow, Params, Protocol, Row, Value,
};
use std::collections::HashMap;
use std::fmt::Display;
use std::time::Instant;
use time::macros::{date, datetime};
use uuid::Uuid;

/// Columns every pg_type row can decode with the built-in casters
pub const DEFAULT_DICTFETCH_QUERY: &str = "SELECT oid, typname, typlen, typbyval, \
     typcategory, typdelim, typisdefined FROM pg_catalog.pg_type";

const SAMPLE_UUID: Uuid = Uuid::from_u128(0x9c6d5a77_7256_457e_9461_347b4358e350);

/// Arguments bound by the stress query
const STRESS_PARAMS: usize = 1499;

pub struct Settings {
    pub verbose: bool,
    pub protocol: Protocol,
    pub repeat: u32,
}

impl Settings {
    pub fn status(&self, message: impl Display) {
        if self.verbose {
            println!("{}", message);
        }
    }
}

fn report_time(label: &str, started: Instant) {
    eprintln!("Times: {} {:.3}s", label, started.elapsed().as_secs_f64());
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Text(s) => format!("'{}'", s),
        other => other.to_string(),
    }
}

fn render_row(row: &Row) -> String {
    let parts: Vec<String> = row.values().iter().map(render_value).collect();
    format!("({})", parts.join(", "))
}

fn render_rows(rows: &[Row]) -> String {
    let parts: Vec<String> = rows.iter().map(render_row).collect();
    format!("[{}]", parts.join(", "))
}

/// Bind one argument of each kind and print what the server sent back
pub async fn params(client: &Client, settings: &Settings) -> Result<()> {
    settings.status("Parameter binding:");
    let mut cur = client.cursor(settings.protocol);

    let samples: Vec<(&str, Value)> = vec![
        ("integer", Value::from(1)),
        ("long integer", Value::from(10_000_000_000i64)),
        ("string with quotes", Value::from("O'Reilly said \"hi\"")),
        ("boolean", Value::from(true)),
        ("unicode", Value::from("Ελληνικά, 日本語, ✓")),
        ("float", Value::from(3.25)),
        ("null", Value::Null),
        ("integer array", Value::from(vec![1, 2, 3])),
        ("text array", Value::from(vec!["a", "b c", "d'e"])),
        ("uuid", Value::Uuid(SAMPLE_UUID)),
        ("timestamp", Value::from(datetime!(2009-03-08 12:34:56.789))),
    ];
    for (label, value) in samples {
        cur.execute("SELECT %s", vec![value])
            .await
            .with_context(|| format!("SELECT %s with {}", label))?;
        println!("{}: {}", label, render_rows(&cur.fetchall()?));
    }

    cur.execute("SELECT %s || '%%'", params!["100"]).await?;
    println!("percent escape: {}", render_rows(&cur.fetchall()?));

    cur.execute(
        "SELECT %(a)s AS a, %(b)s AS b, %(a)s AS a_again",
        params! { "a" => 10, "b" => "ten" },
    )
    .await?;
    println!("named: {}", render_rows(&cur.fetchall()?));
    if let Some(sent) = cur.query() {
        settings.status(format!("  sent as: {}", sent));
    }

    client
        .execute("PREPARE pgprobe_stmt(int, text) AS SELECT $1 AS n, $2 AS label")
        .await
        .context("PREPARE failed")?;
    cur.execute("EXECUTE pgprobe_stmt(%s, %s)", params![7, "seven"])
        .await?;
    println!("prepared: {}", render_rows(&cur.fetchall()?));
    client.execute("DEALLOCATE pgprobe_stmt").await?;

    client
        .execute("CREATE TEMPORARY TABLE IF NOT EXISTS pgprobe_items (id int, label text)")
        .await?;
    client.execute("TRUNCATE pgprobe_items").await?;
    let seq: Vec<Params> = (1..=5)
        .map(|i| params![i, format!("item {}", i)])
        .collect();
    cur.executemany("INSERT INTO pgprobe_items (id, label) VALUES (%s, %s)", seq)
        .await?;
    println!("executemany: {} rows inserted", cur.rowcount());
    cur.execute("SELECT id, label FROM pgprobe_items ORDER BY id", ())
        .await?;
    println!("inserted: {}", render_rows(&cur.fetchall()?));

    // a single parameterized call must not carry two commands
    let mut bin = client.cursor(Protocol::Binary);
    match bin.execute("SELECT %s; SELECT %s", params![1, 2]).await {
        Err(err @ Error::MultipleStatements) => {
            println!("multi-statement query rejected: {}", err)
        }
        Err(err) => return Err(err).context("multi-statement query failed unexpectedly"),
        Ok(()) => bail!("multi-statement query was accepted"),
    }

    cur.close();
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    List,
    ColumnZip,
    DictFactory,
    OrderedDict,
    NamedRow,
    Closure,
}

impl Shape {
    const ALL: [Shape; 6] = [
        Shape::List,
        Shape::ColumnZip,
        Shape::DictFactory,
        Shape::OrderedDict,
        Shape::NamedRow,
        Shape::Closure,
    ];

    fn label(self) -> &'static str {
        match self {
            Shape::List => "List case",
            Shape::ColumnZip => "Dictfetchall case with column zip",
            Shape::DictFactory => "Dictfetchall case with dict row factory",
            Shape::OrderedDict => "Dictfetchall case with ordered dict rows",
            Shape::NamedRow => "Rows with column names",
            Shape::Closure => "Dictfetchall case with closure factory",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Shape::List => "list",
            Shape::ColumnZip => "zip",
            Shape::DictFactory => "dict",
            Shape::OrderedDict => "ordered",
            Shape::NamedRow => "named",
            Shape::Closure => "closure",
        }
    }
}

/// Fetch the same result set in every row shape, timing each
pub async fn dictfetch(client: &Client, settings: &Settings, sql: &str) -> Result<()> {
    for shape in Shape::ALL {
        settings.status(format!("{}:", shape.label()));
        for _ in 0..settings.repeat {
            let mut cur = client.cursor(settings.protocol);
            cur.execute(sql, ())
                .await
                .with_context(|| format!("{} query failed", shape.key()))?;

            let started = Instant::now();
            let len = match shape {
                Shape::List => cur.fetchall()?.len(),
                Shape::ColumnZip => {
                    let names: Vec<String> = cur
                        .description()
                        .map(|cols| cols.iter().map(|c| c.name.clone()).collect())
                        .unwrap_or_default();
                    let rows: Vec<HashMap<String, Value>> = cur
                        .fetchall()?
                        .into_iter()
                        .map(|row| names.iter().cloned().zip(row.into_values()).collect())
                        .collect();
                    rows.len()
                }
                Shape::DictFactory => cur.dictfetchall()?.len(),
                Shape::OrderedDict => cur.fetchall_with(OrderedDictRow)?.len(),
                Shape::NamedRow => {
                    let rows = cur.fetchall()?;
                    let first = rows
                        .first()
                        .and_then(|row| row.columns().first().map(|c| c.name.clone()));
                    if let Some(name) = first {
                        let present = rows.iter().filter(|row| row.get(&name).is_some()).count();
                        tracing::debug!(column = %name, present, "Looked up rows by name");
                    }
                    rows.len()
                }
                Shape::Closure => cur.fetchall_with(|row: Row| row.to_map())?.len(),
            };
            println!("Data len: {}", len);
            report_time(shape.key(), started);
            cur.close();
        }
        settings.status("");
    }
    Ok(())
}

fn adapt_samples() -> Vec<(&'static str, Value)> {
    vec![
        ("uuid", Value::Uuid(SAMPLE_UUID)),
        ("integer", Value::from(42)),
        ("negative long integer", Value::from(-10_000_000_000i64)),
        ("string", Value::from("O'Reilly")),
        ("string with backslash", Value::from(r"C:\temp")),
        ("bytes", Value::from(vec![0xde_u8, 0xad, 0xbe, 0xef])),
        ("float", Value::from(f64::NAN)),
        ("numeric", Value::Numeric("1234.5000".to_string())),
        ("date", Value::from(date!(2024 - 02 - 29))),
        ("timestamptz", Value::from(datetime!(2024-01-02 03:04:05 +2))),
        ("json", Value::from(serde_json::json!({"k": [1, 2]}))),
        ("integer array", Value::from(vec![1, -2, 3])),
        ("empty array", Value::Array(Vec::new())),
        ("null", Value::Null),
    ]
}

/// Print the quoted and the bound form of sample values
pub fn adapt(settings: &Settings) -> Result<()> {
    settings.status("Adaptation (quoted literal, then bound parameter):");
    for (label, value) in adapt_samples() {
        println!("{}:", label);
        println!("  quoted:  {}", value.quoted()?);
        println!("  binding: {}", value.describe_binding()?);
    }
    Ok(())
}

fn stress_query() -> String {
    format!("SELECT {};", vec!["%s"; STRESS_PARAMS].join(", "))
}

/// Bind many positional arguments into a single SELECT
pub async fn stress(client: &Client, settings: &Settings) -> Result<()> {
    settings.status(format!(
        "Stress: {} parameters, {} runs",
        STRESS_PARAMS, settings.repeat
    ));
    let sql = stress_query();
    let values: Vec<Value> = (1..=STRESS_PARAMS as i32).map(Value::from).collect();
    let mut cur = client.cursor(settings.protocol);

    let started = Instant::now();
    let mut first = None;
    for _ in 0..settings.repeat {
        cur.execute(&sql, values.clone()).await?;
        let rows = cur.fetchall()?;
        if first.is_none() {
            first = rows.into_iter().next();
        }
    }
    report_time("stress", started);

    match first {
        Some(row) => println!(
            "stress: {} columns, first {}, last {}",
            row.len(),
            row.get_idx(0).map(render_value).unwrap_or_default(),
            row.get_idx(row.len().saturating_sub(1))
                .map(render_value)
                .unwrap_or_default()
        ),
        None => println!("stress: no rows"),
    }
    cur.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stress_query_has_every_placeholder() {
        let sql = stress_query();
        let template = pgprobe_client::placeholders::parse(&sql).unwrap();
        assert_eq!(template.placeholder_count(), STRESS_PARAMS);
        assert!(!template.is_multi_statement());
    }

    #[test]
    fn test_adapt_samples_all_render() {
        for (label, value) in adapt_samples() {
            assert!(value.quoted().is_ok(), "{} failed to quote", label);
            assert!(value.describe_binding().is_ok(), "{} failed to bind", label);
        }
    }

    #[test]
    fn test_render_row_quotes_text_only() {
        let row = Row::new(
            vec![
                pgprobe_client::Column::named("a"),
                pgprobe_client::Column::named("b"),
            ]
            .into(),
            vec![Value::Int(1), Value::from("x")],
        );
        assert_eq!(render_row(&row), "(1, 'x')");
    }
}
