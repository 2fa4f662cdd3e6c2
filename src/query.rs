use std::sync::Arc;

use sqlx::postgres::{PgArguments, PgQueryResult};
use sqlx::query::Query;
use sqlx::{Executor, Postgres};

use crate::bean::Bean;
use crate::bind::Binder;
use crate::converter::ConverterStore;
use crate::error::{Error, Result};
use crate::pg::PgStatement;
use crate::template::{parse_template, ArgDescriptor, ArgMode, ParsedTemplate};
use crate::types::Value;

/// Type alias for SQLx Query with PostgreSQL arguments
pub type Q<'q> = Query<'q, Postgres, PgArguments>;

/// Something that can supply the arguments of a parsed template.
///
/// Flat value lists bind through the converter named in each marker; a
/// [`Source`] binds through the bean's getters.
pub trait BindArgs {
    /// The marker syntax these arguments expect.
    fn mode(&self) -> ArgMode;

    fn bind_to(
        &self,
        binder: &Binder<'_>,
        stmt: &mut PgStatement,
        args: &[ArgDescriptor],
    ) -> Result<()>;
}

impl BindArgs for [Value] {
    fn mode(&self) -> ArgMode {
        ArgMode::Basic
    }

    fn bind_to(
        &self,
        binder: &Binder<'_>,
        stmt: &mut PgStatement,
        args: &[ArgDescriptor],
    ) -> Result<()> {
        binder.bind_variadic(stmt, args, self, 1)
    }
}

impl<const N: usize> BindArgs for [Value; N] {
    fn mode(&self) -> ArgMode {
        ArgMode::Basic
    }

    fn bind_to(
        &self,
        binder: &Binder<'_>,
        stmt: &mut PgStatement,
        args: &[ArgDescriptor],
    ) -> Result<()> {
        self.as_slice().bind_to(binder, stmt, args)
    }
}

impl BindArgs for Vec<Value> {
    fn mode(&self) -> ArgMode {
        ArgMode::Basic
    }

    fn bind_to(
        &self,
        binder: &Binder<'_>,
        stmt: &mut PgStatement,
        args: &[ArgDescriptor],
    ) -> Result<()> {
        self.as_slice().bind_to(binder, stmt, args)
    }
}

/// No arguments at all.
impl BindArgs for () {
    fn mode(&self) -> ArgMode {
        ArgMode::Basic
    }

    fn bind_to(
        &self,
        binder: &Binder<'_>,
        stmt: &mut PgStatement,
        args: &[ArgDescriptor],
    ) -> Result<()> {
        binder.bind_variadic(stmt, args, &[], 1)
    }
}

/// Arguments read from a bean through the getters named in each marker.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a, T>(pub &'a T);

impl<T: Bean> BindArgs for Source<'_, T> {
    fn mode(&self) -> ArgMode {
        ArgMode::Bean
    }

    fn bind_to(
        &self,
        binder: &Binder<'_>,
        stmt: &mut PgStatement,
        args: &[ArgDescriptor],
    ) -> Result<()> {
        binder.bind_from_source(stmt, args, self.0, 1)
    }
}

/// A prepared statement with `#{...}` markers rewritten to `$n` placeholders.
///
/// `PreparedQuery` keeps the parsed template and the converter registry and
/// builds a fresh `Query` on each execution, so the same instance can be run
/// any number of times with different arguments.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sqlx::PgPool;
/// use sqlx_template_bind::{ArgMode, ConverterStore, PreparedQuery, Value};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let pool = PgPool::connect("postgres://localhost/test").await?;
/// let store = Arc::new(ConverterStore::with_defaults()?);
/// let query = PreparedQuery::new(
///     "INSERT INTO users (user_id, name) VALUES (#{int32}, #{string})",
///     ArgMode::Basic,
///     store,
/// )?;
///
/// let result = query.execute(&pool, &[Value::Int32(42), "John Doe".into()]).await?;
/// println!("Inserted {} rows", result.rows_affected());
/// # Ok(())
/// # }
/// ```
///
/// # Using with Transactions
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sqlx::{PgPool, Postgres, Transaction};
/// use sqlx_template_bind::{ArgMode, ConverterStore, PreparedQuery, Value};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let pool = PgPool::connect("postgres://localhost/test").await?;
/// let store = Arc::new(ConverterStore::with_defaults()?);
/// let mut tx: Transaction<Postgres> = pool.begin().await?;
///
/// let query = PreparedQuery::new(
///     "UPDATE users SET name = #{string} WHERE user_id = #{int32}",
///     ArgMode::Basic,
///     store,
/// )?;
///
/// query.execute(&mut *tx, &[Value::from("Jane Doe"), Value::Int32(1)]).await?;
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    template: Arc<ParsedTemplate>,
    store: Arc<ConverterStore>,
}

impl PreparedQuery {
    /// Parses `template` with the marker syntax of `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] if a marker is unterminated, empty or malformed.
    pub fn new<T>(template: T, mode: ArgMode, store: Arc<ConverterStore>) -> Result<Self>
    where
        T: AsRef<str>,
    {
        let parsed = parse_template(template.as_ref(), mode)?;
        Ok(Self::from_parsed(Arc::new(parsed), store))
    }

    pub fn from_parsed(template: Arc<ParsedTemplate>, store: Arc<ConverterStore>) -> Self {
        Self { template, store }
    }

    /// The rewritten SQL text.
    pub fn sql(&self) -> &str {
        &self.template.sql
    }

    pub fn args(&self) -> &[ArgDescriptor] {
        &self.template.args
    }

    pub fn template(&self) -> &Arc<ParsedTemplate> {
        &self.template
    }

    pub fn store(&self) -> &Arc<ConverterStore> {
        &self.store
    }

    /// Binds `args` and returns the ready-to-run query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the arguments do not fit the template's
    /// marker syntax, or a conversion error naming the failing parameter.
    pub fn bind<A>(&self, args: &A) -> Result<Q<'_>>
    where
        A: BindArgs + ?Sized,
    {
        if args.mode() != self.template.mode {
            return Err(Error::Config(format!(
                "{:?} arguments cannot bind a {:?} template",
                args.mode(),
                self.template.mode
            )));
        }
        let mut stmt = PgStatement::new();
        args.bind_to(&Binder::new(&self.store), &mut stmt, &self.template.args)?;
        Ok(sqlx::query_with(self.template.sql.as_str(), stmt.into_arguments()?))
    }

    /// Executes the statement using the provided executor.
    ///
    /// Works with any SQLx `Executor`: a pool, a connection or a transaction.
    ///
    /// # Errors
    ///
    /// Binding failures as for [`PreparedQuery::bind`]; a server-side failure is
    /// an [`Error::Execution`] carrying the SQL text and diagnostics.
    pub async fn execute<'e, E, A>(&self, executor: E, args: &A) -> Result<PgQueryResult>
    where
        E: Executor<'e, Database = Postgres>,
        A: BindArgs + ?Sized,
    {
        let q = self.bind(args)?;
        q.execute(executor)
            .await
            .map_err(|e| Error::execution(self.sql(), e))
    }

    /// Executes the statement with arguments read from `source`.
    pub async fn execute_bean<'e, E, T>(&self, executor: E, source: &T) -> Result<PgQueryResult>
    where
        E: Executor<'e, Database = Postgres>,
        T: Bean,
    {
        self.execute(executor, &Source(source)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConversionError;
    use crate::testing::Person;
    use sqlx::Arguments as _;

    fn store() -> Arc<ConverterStore> {
        Arc::new(ConverterStore::with_defaults().unwrap())
    }

    #[test]
    fn test_prepared_query_new() {
        let result = PreparedQuery::new(
            "SELECT * FROM users WHERE id = #{int32}",
            ArgMode::Basic,
            store(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_prepared_query_placeholder_order() {
        let query = PreparedQuery::new(
            "SELECT * FROM users WHERE id = #{int32} AND name = #{string}",
            ArgMode::Basic,
            store(),
        )
        .unwrap();

        let types: Vec<_> = query.args().iter().map(|a| a.type_name.as_deref()).collect();
        assert_eq!(types, vec![Some("int32"), Some("string")]);
        assert_eq!(query.sql(), "SELECT * FROM users WHERE id = $1 AND name = $2");
    }

    #[test]
    fn test_prepared_query_repeated_markers() {
        let query = PreparedQuery::new(
            "SELECT * FROM users WHERE id = #{int32} OR user_id = #{int32}",
            ArgMode::Basic,
            store(),
        )
        .unwrap();

        // each occurrence is its own parameter
        assert_eq!(query.args().len(), 2);
        assert_eq!(query.sql(), "SELECT * FROM users WHERE id = $1 OR user_id = $2");
    }

    #[test]
    fn test_prepared_query_invalid_template() {
        let err = PreparedQuery::new("SELECT #{int32", ArgMode::Basic, store()).unwrap_err();
        assert!(err.is_template());
    }

    #[test]
    fn test_bind_values() {
        let query =
            PreparedQuery::new("SELECT #{int32}, #{string}", ArgMode::Basic, store()).unwrap();
        assert!(query.bind(&[Value::Int32(1), Value::Null]).is_ok());
        assert!(query.bind(&vec![Value::Int32(1), "x".into()]).is_ok());
    }

    #[test]
    fn test_bind_wrong_count() {
        let query = PreparedQuery::new("SELECT #{int32}", ArgMode::Basic, store()).unwrap();
        let Err(err) = query.bind(&()) else {
            panic!("binding no values to one marker succeeded");
        };
        assert!(matches!(
            err,
            Error::Conversion(ConversionError::ArgumentCount { expected: 1, found: 0 })
        ));
    }

    #[test]
    fn test_bind_bean_source() {
        let query = PreparedQuery::new(
            "UPDATE people SET name = #{name} WHERE id = #{id}",
            ArgMode::Bean,
            store(),
        )
        .unwrap();
        let person = Person {
            id: 1,
            name: "Ann".into(),
            ..Person::default()
        };
        assert!(query.bind(&Source(&person)).is_ok());
    }

    #[test]
    fn test_bind_mode_mismatch() {
        let query = PreparedQuery::new("SELECT #{id}", ArgMode::Bean, store()).unwrap();
        let Err(err) = query.bind(&[Value::Int64(1)]) else {
            panic!("value list bound to bean markers");
        };
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_statement_arguments_match_markers() {
        let query = PreparedQuery::new(
            "SELECT #{int32}, #{boolean}, #{json}",
            ArgMode::Basic,
            store(),
        )
        .unwrap();
        let mut stmt = PgStatement::new();
        [Value::Int32(1), Value::Bool(false), Value::Null]
            .bind_to(&Binder::new(query.store()), &mut stmt, query.args())
            .unwrap();
        assert_eq!(stmt.into_arguments().unwrap().len(), 3);
    }
}
