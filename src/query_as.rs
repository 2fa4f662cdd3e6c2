use std::sync::Arc;

use sqlx::{Executor, Postgres};

use crate::bean::Bean;
use crate::converter::ConverterStore;
use crate::error::{Error, Result};
use crate::materialize::{
    build_shape, column_metadata, materialize_rows, scalar_shape_fn, ResultStyle, ShapeFn,
};
use crate::query::{BindArgs, PreparedQuery, Source};
use crate::template::{parse_template, ArgMode, ParsedTemplate};
use crate::types::SqlScalar;

/// A prepared query that materializes its rows into `R`.
///
/// `R` is either a [`Bean`], filled according to a [`ResultStyle`], or a
/// single [`SqlScalar`] column. It supports `fetch_all`, `fetch_one`, and
/// `fetch_optional`.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use once_cell::sync::Lazy;
/// use sqlx::PgPool;
/// use sqlx_template_bind::{
///     ArgMode, Bean, BeanClass, ConverterStore, PreparedQueryAs, ResultStyle, Value,
/// };
///
/// #[derive(Default)]
/// struct User {
///     id: i32,
///     name: String,
/// }
///
/// impl Bean for User {
///     fn class() -> &'static BeanClass<Self> {
///         static CLASS: Lazy<BeanClass<User>> = Lazy::new(|| {
///             BeanClass::new("User")
///                 .no_arg(User::default)
///                 .setter("set_id", |u: &mut User, v: i32| u.id = v)
///                 .setter("set_name", |u: &mut User, v: String| u.name = v)
///         });
///         &CLASS
///     }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let pool = PgPool::connect("postgres://localhost/test").await?;
/// let store = Arc::new(ConverterStore::with_defaults()?);
/// let query = PreparedQueryAs::<User>::new(
///     "SELECT id, name FROM users WHERE id = #{int32}",
///     ArgMode::Basic,
///     ResultStyle::GuessSetters,
///     store,
/// )?;
///
/// let user: User = query.fetch_one(&pool, &[Value::Int32(42)]).await?;
/// println!("User: {} ({})", user.name, user.id);
/// # Ok(())
/// # }
/// ```
pub struct PreparedQueryAs<R: 'static> {
    query: PreparedQuery,
    style: ResultStyle,
    build: ShapeFn<R>,
}

impl<R: Bean> PreparedQueryAs<R> {
    /// Creates a query whose rows become beans.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] for a bad template and [`Error::Config`] for
    /// [`ResultStyle::Scalar`], which only applies to [`PreparedQueryAs::scalar`].
    pub fn new<T>(
        template: T,
        mode: ArgMode,
        style: ResultStyle,
        store: Arc<ConverterStore>,
    ) -> Result<Self>
    where
        T: AsRef<str>,
    {
        let parsed = parse_template(template.as_ref(), mode)?;
        Self::from_parsed(Arc::new(parsed), style, store)
    }

    pub fn from_parsed(
        template: Arc<ParsedTemplate>,
        style: ResultStyle,
        store: Arc<ConverterStore>,
    ) -> Result<Self> {
        if style == ResultStyle::Scalar {
            return Err(Error::Config(format!(
                "result style {style:?} needs a scalar target, not {}",
                R::class().name()
            )));
        }
        Ok(Self {
            query: PreparedQuery::from_parsed(template, store),
            style,
            build: build_shape::<R>,
        })
    }
}

impl<R: SqlScalar + 'static> PreparedQueryAs<R> {
    /// Creates a query whose single result column is read as `R`.
    pub fn scalar<T>(template: T, mode: ArgMode, store: Arc<ConverterStore>) -> Result<Self>
    where
        T: AsRef<str>,
    {
        let parsed = parse_template(template.as_ref(), mode)?;
        Ok(Self::scalar_from_parsed(Arc::new(parsed), store))
    }

    pub fn scalar_from_parsed(template: Arc<ParsedTemplate>, store: Arc<ConverterStore>) -> Self {
        Self {
            query: PreparedQuery::from_parsed(template, store),
            style: ResultStyle::Scalar,
            build: scalar_shape_fn::<R>,
        }
    }
}

impl<R: 'static> PreparedQueryAs<R> {
    pub fn sql(&self) -> &str {
        self.query.sql()
    }

    pub fn style(&self) -> ResultStyle {
        self.style
    }

    /// Executes the query and returns all matching rows.
    ///
    /// An empty result set is an empty vector; no shape is planned for it.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails, the server rejects the statement, or
    /// a row cannot be materialized into `R`.
    pub async fn fetch_all<'e, E, A>(&self, executor: E, args: &A) -> Result<Vec<R>>
    where
        E: Executor<'e, Database = Postgres>,
        A: BindArgs + ?Sized,
    {
        let rows = self
            .query
            .bind(args)?
            .fetch_all(executor)
            .await
            .map_err(|e| Error::execution(self.sql(), e))?;
        materialize_rows(self.query.store(), rows.as_slice(), self.style, self.build)
    }

    /// Executes the query and returns exactly one row.
    ///
    /// # Errors
    ///
    /// No row at all is reported as `sqlx::Error::RowNotFound`.
    pub async fn fetch_one<'e, E, A>(&self, executor: E, args: &A) -> Result<R>
    where
        E: Executor<'e, Database = Postgres>,
        A: BindArgs + ?Sized,
    {
        self.fetch_optional(executor, args)
            .await?
            .ok_or(Error::Database(sqlx::Error::RowNotFound))
    }

    /// Executes the query and returns at most one row.
    pub async fn fetch_optional<'e, E, A>(&self, executor: E, args: &A) -> Result<Option<R>>
    where
        E: Executor<'e, Database = Postgres>,
        A: BindArgs + ?Sized,
    {
        let row = self
            .query
            .bind(args)?
            .fetch_optional(executor)
            .await
            .map_err(|e| Error::execution(self.sql(), e))?;
        match row {
            None => Ok(None),
            Some(row) => {
                let shape = (self.build)(self.query.store(), &column_metadata(&row)?, self.style)?;
                shape.materialize_row(&row).map(Some)
            }
        }
    }

    /// [`PreparedQueryAs::fetch_all`] with arguments read from `source`.
    pub async fn fetch_all_bean<'e, E, T>(&self, executor: E, source: &T) -> Result<Vec<R>>
    where
        E: Executor<'e, Database = Postgres>,
        T: Bean,
    {
        self.fetch_all(executor, &Source(source)).await
    }

    /// [`PreparedQueryAs::fetch_optional`] with arguments read from `source`.
    pub async fn fetch_optional_bean<'e, E, T>(&self, executor: E, source: &T) -> Result<Option<R>>
    where
        E: Executor<'e, Database = Postgres>,
        T: Bean,
    {
        self.fetch_optional(executor, &Source(source)).await
    }
}

impl<R: 'static> std::fmt::Debug for PreparedQueryAs<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedQueryAs")
            .field("query", &self.query)
            .field("style", &self.style)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Person;

    fn store() -> Arc<ConverterStore> {
        Arc::new(ConverterStore::with_defaults().unwrap())
    }

    #[test]
    fn test_prepared_query_as_new() {
        let query = PreparedQueryAs::<Person>::new(
            "SELECT id, name, age FROM people WHERE id = #{int64}",
            ArgMode::Basic,
            ResultStyle::GuessConstructor,
            store(),
        )
        .unwrap();
        assert_eq!(query.sql(), "SELECT id, name, age FROM people WHERE id = $1");
        assert_eq!(query.style(), ResultStyle::GuessConstructor);
    }

    #[test]
    fn test_bean_target_rejects_scalar_style() {
        let err =
            PreparedQueryAs::<Person>::new("SELECT 1", ArgMode::Basic, ResultStyle::Scalar, store())
                .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_scalar_query() {
        let query = PreparedQueryAs::<i64>::scalar(
            "SELECT count(*) FROM people WHERE age > #{int32}",
            ArgMode::Basic,
            store(),
        )
        .unwrap();
        assert_eq!(query.style(), ResultStyle::Scalar);
        assert_eq!(query.sql(), "SELECT count(*) FROM people WHERE age > $1");
    }

    #[test]
    fn test_prepared_query_as_invalid_template() {
        let err = PreparedQueryAs::<Option<String>>::scalar("SELECT #{}", ArgMode::Basic, store())
            .unwrap_err();
        assert!(err.is_template());
    }
}
