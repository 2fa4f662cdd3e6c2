//! # sqlx-template-bind
//!
//! A SQLx extension for PostgreSQL that rewrites `#{...}` markers in SQL templates into
//! positional `$n` parameters, binds them through a configurable registry of type
//! converters, and materializes result rows into plain Rust types.
//!
//! ## Features
//!
//! - **Template Markers**: `#{int32}` names a converter, `#{name}` a getter on a bean,
//!   `#{amount/set_amount}` an INOUT procedure parameter
//! - **Converter Registry**: type keys map to converters, layered from built-in defaults
//!   and any number of configuration sources
//! - **Bean Mapping**: rows become values through a matching constructor or `set_<column>`
//!   mutators, chosen once per result set
//! - **Procedures and Cursors**: `CALL` with OUT parameters, and functions that open a
//!   `refcursor`
//! - **Generic Executor Support**: works with `PgPool`, `Transaction`, and any SQLx `Executor`
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sqlx = { version = "0.8", features = ["postgres", "runtime-tokio"] }
//! sqlx-template-bind = "0.1"
//! ```
//!
//! ## Examples
//!
//! ### Basic Query Execution
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sqlx::PgPool;
//! use sqlx_template_bind::{ArgMode, ConverterStore, PreparedQuery, Value};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgres://localhost/test").await?;
//! let store = Arc::new(ConverterStore::with_defaults()?);
//!
//! let query = PreparedQuery::new(
//!     "INSERT INTO users (id, name) VALUES (#{int32}, #{string})",
//!     ArgMode::Basic,
//!     store,
//! )?;
//!
//! let result = query.execute(&pool, &[Value::Int32(42), "John Doe".into()]).await?;
//! println!("Inserted {} rows", result.rows_affected());
//! # Ok(())
//! # }
//! ```
//!
//! ### Sessions
//!
//! A [`Session`] owns a pool and runs every command in its own transaction, rolling
//! back when the command fails:
//!
//! ```rust,no_run
//! use sqlx_template_bind::{Session, SessionConfig, Value};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::connect(&SessionConfig::new("postgres://localhost/test")).await?;
//!
//! session
//!     .execute(
//!         "UPDATE accounts SET balance = balance - #{int64} WHERE id = #{int32}",
//!         &[Value::Int64(100), Value::Int32(1)],
//!     )
//!     .await?;
//!
//! let names: Vec<String> = session
//!     .select_scalars("SELECT name FROM users ORDER BY id", &())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## How It Works
//!
//! 1. **Parse**: markers are replaced by `$1`, `$2`, ... and described by
//!    [`template::ArgDescriptor`]s
//! 2. **Bind**: each descriptor finds its converter (by type name, or by a getter's return type)
//!    and sets its parameter on a [`pg::PgStatement`]
//! 3. **Execute**: a fresh SQLx `Query` is built from the bound arguments on each execution
//! 4. **Materialize**: the first row's column labels and types pick a constructor or mutators,
//!    which are then applied to every row
//!
//! ## License
//!
//! Licensed under either of Apache License, Version 2.0 or MIT license at your option.

pub mod bean;
pub mod bind;
pub mod call;
pub mod config;
pub mod converter;
pub mod error;
pub mod loader;
pub mod materialize;
pub mod pg;
pub mod query;
pub mod query_as;
pub mod session;
pub mod statement;
pub mod template;
pub mod types;

#[cfg(test)]
mod testing;

pub use bean::{Bean, BeanClass};
pub use call::{CursorQuery, PreparedCall};
pub use config::SessionConfig;
pub use converter::{ConfigSource, Converter, ConverterStore};
pub use error::{Error, Result};
pub use loader::{FsLoader, ResourceLoader, TemplateSource};
pub use materialize::ResultStyle;
pub use query::{BindArgs, PreparedQuery, Source};
pub use query_as::PreparedQueryAs;
pub use session::Session;
pub use template::{parse_template, ArgMode};
pub use types::{SqlScalar, SqlType, TypeKey, Value};

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::{ArgMode, Bean, BeanClass, ResultStyle, Source, Value};
    pub use crate::{CursorQuery, PreparedCall, PreparedQuery, PreparedQueryAs, Session};
}
