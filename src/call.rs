//! Stored procedure calls with output parameters, and functions returning a
//! cursor.

use std::sync::Arc;

use sqlx::{Connection, Executor, PgConnection, Postgres};
use uuid::Uuid;

use crate::bean::Bean;
use crate::bind::Binder;
use crate::converter::ConverterStore;
use crate::error::{Error, Result};
use crate::materialize::{
    build_shape, materialize_rows, populate_from_outputs, scalar_shape_fn, ResultStyle, ShapeFn,
};
use crate::pg::{PgCallable, PgStatement};
use crate::session::finish;
use crate::template::{parse_template, ArgMode, ParsedTemplate};
use crate::types::{SqlScalar, TypeKey, Value};

/// A `CALL` whose markers name a getter, a setter, or both.
///
/// `#{amount}` is an IN parameter, `#{/set_total}` an OUT parameter and
/// `#{amount/set_amount}` an INOUT parameter. After execution every declared
/// setter is invoked on the target with the returned value.
///
/// # Examples
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use sqlx::PgPool;
/// # use sqlx_template_bind::{Bean, ConverterStore, PreparedCall};
/// # async fn example<T: Bean>(
/// #     pool: PgPool,
/// #     target: &mut T,
/// # ) -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(ConverterStore::with_defaults()?);
/// let call = PreparedCall::new(
///     "CALL deposit(#{account}, #{amount/set_amount}, #{/set_balance})",
///     store,
/// )?;
/// call.execute(&pool, target).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PreparedCall {
    template: Arc<ParsedTemplate>,
    store: Arc<ConverterStore>,
}

impl PreparedCall {
    pub fn new<T>(template: T, store: Arc<ConverterStore>) -> Result<Self>
    where
        T: AsRef<str>,
    {
        let parsed = parse_template(template.as_ref(), ArgMode::InOut)?;
        Self::from_parsed(Arc::new(parsed), store)
    }

    pub fn from_parsed(template: Arc<ParsedTemplate>, store: Arc<ConverterStore>) -> Result<Self> {
        if template.mode != ArgMode::InOut {
            return Err(Error::Config(format!(
                "a procedure call needs an InOut template, not {:?}",
                template.mode
            )));
        }
        Ok(Self { template, store })
    }

    pub fn sql(&self) -> &str {
        &self.template.sql
    }

    /// Number of parameters that return a value.
    pub fn output_count(&self) -> usize {
        self.template.args.iter().filter(|a| a.is_output()).count()
    }

    /// Runs the call with inputs read from `target`, then writes the outputs
    /// back into it.
    ///
    /// # Errors
    ///
    /// Conversion errors name the marker they came from; a server-side failure
    /// is an [`Error::Execution`].
    pub async fn execute<'e, E, T>(&self, executor: E, target: &mut T) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
        T: Bean,
    {
        let mut stmt = PgCallable::new();
        let outputs =
            Binder::new(&self.store).bind_in_out(&mut stmt, &self.template.args, target)?;
        let q = sqlx::query_with(self.template.sql.as_str(), stmt.take_arguments()?);
        if outputs == 0 {
            q.execute(executor)
                .await
                .map_err(|e| Error::execution(self.sql(), e))?;
            return Ok(());
        }

        let row = q
            .fetch_optional(executor)
            .await
            .map_err(|e| Error::execution(self.sql(), e))?
            .ok_or_else(|| {
                Error::Config(format!(
                    "{} declared {outputs} outputs but returned no row",
                    self.sql()
                ))
            })?;
        stmt.set_outputs(row);
        populate_from_outputs(&self.store, &stmt, &self.template.args, target)
    }
}

/// A function call whose first argument is the cursor it opens.
///
/// The template's first marker must be `#{refcursor}`. The cursor is named
/// here, bound at `$1`, fetched in full and closed again inside one
/// transaction; the remaining markers take the caller's values from `$2` on.
pub struct CursorQuery<R: 'static> {
    template: Arc<ParsedTemplate>,
    store: Arc<ConverterStore>,
    style: ResultStyle,
    build: ShapeFn<R>,
}

impl<R: Bean> CursorQuery<R> {
    pub fn new<T>(template: T, style: ResultStyle, store: Arc<ConverterStore>) -> Result<Self>
    where
        T: AsRef<str>,
    {
        let parsed = parse_template(template.as_ref(), ArgMode::RefCursor)?;
        Self::from_parsed(Arc::new(parsed), style, store)
    }

    pub fn from_parsed(
        template: Arc<ParsedTemplate>,
        style: ResultStyle,
        store: Arc<ConverterStore>,
    ) -> Result<Self> {
        check_cursor_mode(&template)?;
        if style == ResultStyle::Scalar {
            return Err(Error::Config(format!(
                "result style {style:?} needs a scalar target, not {}",
                R::class().name()
            )));
        }
        Ok(Self {
            template,
            store,
            style,
            build: build_shape::<R>,
        })
    }
}

impl<R: SqlScalar + 'static> CursorQuery<R> {
    pub fn scalar<T>(template: T, store: Arc<ConverterStore>) -> Result<Self>
    where
        T: AsRef<str>,
    {
        let parsed = parse_template(template.as_ref(), ArgMode::RefCursor)?;
        check_cursor_mode(&parsed)?;
        Ok(Self {
            template: Arc::new(parsed),
            store,
            style: ResultStyle::Scalar,
            build: scalar_shape_fn::<R>,
        })
    }
}

fn check_cursor_mode(template: &ParsedTemplate) -> Result<()> {
    if template.mode == ArgMode::RefCursor {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "a cursor query needs a RefCursor template, not {:?}",
            template.mode
        )))
    }
}

impl<R: 'static> CursorQuery<R> {
    pub fn sql(&self) -> &str {
        &self.template.sql
    }

    /// Opens the cursor, reads every row from it and closes it.
    ///
    /// `values` cover the markers after `#{refcursor}`.
    ///
    /// # Errors
    ///
    /// A cursor that cannot be closed is an [`Error::Cleanup`]; everything
    /// else is reported as for [`crate::PreparedQueryAs::fetch_all`].
    pub async fn fetch_all(&self, conn: &mut PgConnection, values: &[Value]) -> Result<Vec<R>> {
        let cursor = cursor_name();
        let mut stmt = PgStatement::new();
        self.store
            .lookup(&TypeKey::REFCURSOR)
            .and_then(|c| c.set_parameter(&mut stmt, 1, Value::RefCursor(cursor.clone())))
            .map_err(|e| e.at_argument(1))?;
        Binder::new(&self.store).bind_variadic(&mut stmt, &self.template.args[1..], values, 2)?;

        let mut tx = conn.begin().await?;
        let result = self.read_cursor(&mut tx, &cursor, stmt).await;
        finish(tx, result).await
    }

    async fn read_cursor(
        &self,
        conn: &mut PgConnection,
        cursor: &str,
        stmt: PgStatement,
    ) -> Result<Vec<R>> {
        sqlx::query_with(self.template.sql.as_str(), stmt.into_arguments()?)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::execution(self.sql(), e))?;

        let fetch = format!("FETCH ALL IN {}", quote_ident(cursor));
        let rows = sqlx::query(&fetch)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| Error::execution(&fetch, e))?;
        tracing::debug!(cursor, rows = rows.len(), "fetched cursor");

        // a failed fetch aborts the transaction, whose rollback drops the cursor
        let close = format!("CLOSE {}", quote_ident(cursor));
        if let Err(source) = sqlx::query(&close).execute(&mut *conn).await {
            tracing::warn!(cursor, error = %source, "failed to close cursor");
            return Err(Error::Cleanup {
                resource: format!("cursor {cursor}"),
                source,
                original: None,
            });
        }

        materialize_rows(&self.store, rows.as_slice(), self.style, self.build)
    }
}

impl<R: 'static> std::fmt::Debug for CursorQuery<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorQuery")
            .field("sql", &self.template.sql)
            .field("style", &self.style)
            .finish()
    }
}

fn cursor_name() -> String {
    format!("cursor_{}", Uuid::new_v4().simple())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
