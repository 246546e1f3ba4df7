//! pgprobe client library
//!
//! A thin cursor layer over `tokio-postgres` for probing how query
//! parameters are bound and how results come back.
//!
//! # Features
//!
//! - **pyformat placeholders** - `%s` and `%(name)s`, rewritten to `$N` or
//!   interpolated client-side
//! - **Two cursor protocols** - plain text results over the simple query
//!   protocol, or typed binary results decoded by OID
//! - **Pluggable typecasters** - per cursor, per connection, then built-ins
//! - **Row factories** - lists, dicts, ordered dicts or any closure
//!
//! # Quick Start
//!
//! ```no_run
//! use pgprobe_client::{params, Client, ConnConfig, Protocol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect_config(&ConnConfig::from_env()?).await?;
//!
//!     let mut cur = client.cursor(Protocol::Binary);
//!     cur.execute("SELECT %s AS n, %s AS s", params![42, "hello"]).await?;
//!     for row in cur.dictfetchall()? {
//!         println!("{:?}", row);
//!     }
//!
//!     // a single parameterized call can't carry two commands
//!     let err = cur.execute("SELECT %s; SELECT %s", params![1, 2]).await;
//!     assert!(err.is_err());
//!
//!     Ok(())
//! }
//! ```

pub mod adapt;
pub mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod placeholders;
pub mod rows;
pub mod typecast;
pub mod types;

pub use client::Client;
pub use config::ConnConfig;
pub use cursor::{Cursor, Protocol};
pub use error::{Error, Result};
pub use rows::{DictRow, OrderedDictRow, RowFactory, TupleRow};
pub use typecast::{CastContext, CastRegistry, Caster};
pub use types::{Column, Params, Row, Value};

/// Build [`Params`] from a list of values or `name => value` pairs
///
/// ```
/// use pgprobe_client::{params, Params, Value};
///
/// let positional = params![1, "two", None::<i32>];
/// assert_eq!(positional.len(), 3);
///
/// let named = params! { "id" => 7, "name" => "x" };
/// assert!(matches!(named, Params::Named(_)));
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::Positional(::std::vec::Vec::new())
    };
    ($($name:literal => $value:expr),+ $(,)?) => {
        $crate::Params::named([$(($name, $crate::Value::from($value))),+])
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(::std::vec![$($crate::Value::from($value)),+])
    };
}
