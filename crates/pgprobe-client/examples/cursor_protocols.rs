//! Text and binary cursors side by side
//!
//! Runs the same parameterized query through both protocols and shows what
//! each one sends and gets back, then teaches the binary cursor a type it
//! doesn't know.
//!
//! Run with:
//! ```bash
//! PGPROBE_TESTDB=pgprobe_test cargo run --example cursor_protocols
//! ```

use pgprobe_client::{
    params, CastContext, Client, ConnConfig, Error, Protocol, Result, Value,
};

/// `point` arrives as two big-endian float8s
fn cast_point(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    let coord = |range: std::ops::Range<usize>| -> Result<f64> {
        let bytes: [u8; 8] = raw
            .get(range)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::Decode {
                type_name: ctx.type_name(),
                message: format!("expected 16 bytes, got {}", raw.len()),
            })?;
        Ok(f64::from_be_bytes(bytes))
    };
    Ok(Value::Text(format!("({}, {})", coord(0..8)?, coord(8..16)?)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut client = Client::connect_config(&ConnConfig::from_env()?).await?;
    println!("Connected to PostgreSQL {}\n", client.server_version().await?);

    let sql = "SELECT %(n)s AS n, %(s)s AS s, %(n)s * 2 AS doubled, %(tags)s AS tags";
    for protocol in [Protocol::Text, Protocol::Binary] {
        let mut cur = client.cursor(protocol);
        cur.execute(
            sql,
            params! { "n" => 21, "s" => "it's", "tags" => vec!["a", "b"] },
        )
        .await?;

        println!("{:?} cursor", protocol);
        println!("  sent: {}", cur.query().unwrap_or_default());
        for column in cur.description().unwrap_or_default() {
            println!(
                "  column {} type {}",
                column.name,
                column.type_name.as_deref().unwrap_or("(not reported)")
            );
        }
        if let Some(row) = cur.fetchone()? {
            println!("  values: {:?}\n", row.values());
        }
    }

    let mut cur = client.cursor(Protocol::Binary);
    match cur.execute("SELECT point(1.5, -2)", ()).await {
        Err(err @ Error::Typecast { .. }) => println!("Without a caster: {}", err),
        other => println!("Unexpected: {:?}", other),
    }
    drop(cur);

    client.register_cast(600, cast_point);
    let mut cur = client.cursor(Protocol::Binary);
    cur.execute("SELECT point(1.5, -2)", ()).await?;
    if let Some(row) = cur.fetchone()? {
        println!("With a caster: {}", row.values()[0]);
    }

    Ok(())
}
