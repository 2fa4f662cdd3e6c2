//! A pooled entry point that runs every command in its own transaction.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use crate::bean::Bean;
use crate::call::{CursorQuery, PreparedCall};
use crate::config::SessionConfig;
use crate::converter::ConverterStore;
use crate::error::{Error, Result};
use crate::loader::{FsLoader, ResourceLoader, TemplateSource};
use crate::materialize::ResultStyle;
use crate::query::{BindArgs, PreparedQuery, Source};
use crate::query_as::PreparedQueryAs;
use crate::template::{ArgMode, ParsedTemplate, Scanner};
use crate::types::{SqlScalar, Value};

/// Commits `tx` if `result` is a success, otherwise rolls it back and returns
/// the original error.
pub(crate) async fn finish<T>(tx: Transaction<'_, Postgres>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(original) => {
            tracing::warn!(error = %original, "rolling back");
            match tx.rollback().await {
                Ok(()) => Err(original),
                Err(source) => {
                    tracing::error!(error = %source, original = %original, "rollback failed");
                    Err(Error::Rollback {
                        source,
                        original: Box::new(original),
                    })
                }
            }
        }
    }
}

/// Parsed templates keyed by their exact text and marker syntax.
///
/// Entries are never evicted.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<(ArgMode, String), Arc<ParsedTemplate>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_parse(
        &self,
        scanner: &Scanner,
        text: &str,
        mode: ArgMode,
    ) -> Result<Arc<ParsedTemplate>> {
        let key = (mode, text.to_owned());
        if let Some(parsed) = self.entries.read().ok().and_then(|m| m.get(&key).cloned()) {
            return Ok(parsed);
        }
        let parsed = Arc::new(scanner.scan(text, mode)?);
        if let Ok(mut entries) = self.entries.write() {
            return Ok(entries.entry(key).or_insert(parsed).clone());
        }
        Ok(parsed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs templated statements against a pool.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx_template_bind::{Session, SessionConfig, Value};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Session::connect(&SessionConfig::new("postgres://localhost/test")).await?;
/// // count(*) is an int8, so it reads as i64
/// let count: Option<i64> = session
///     .select_scalar("SELECT count(*) FROM users WHERE age > #{int32}", &[Value::Int32(18)])
///     .await?;
/// println!("{count:?} adults");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Session {
    pool: PgPool,
    store: Arc<ConverterStore>,
    loader: Arc<dyn ResourceLoader>,
    cache: Option<Arc<TemplateCache>>,
    scanner: Scanner,
}

impl Session {
    pub fn new(pool: PgPool, store: Arc<ConverterStore>) -> Result<Self> {
        Ok(Self {
            pool,
            store,
            loader: Arc::new(FsLoader::default()),
            cache: None,
            scanner: Scanner::new()?,
        })
    }

    /// Opens a pool and builds the converter registry described by `config`.
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(config.converter_store()?);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        tracing::debug!(max_connections = config.max_connections, "connected session pool");

        let mut session = Self::new(pool, store)?;
        if let Some(root) = &config.template_root {
            session = session.with_loader(FsLoader::new(root));
        }
        if config.cache_templates {
            session = session.with_template_cache();
        }
        Ok(session)
    }

    pub fn with_loader<L: ResourceLoader + 'static>(mut self, loader: L) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn with_template_cache(mut self) -> Self {
        self.cache = Some(Arc::new(TemplateCache::new()));
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn store(&self) -> &Arc<ConverterStore> {
        &self.store
    }

    pub fn template_cache(&self) -> Option<&TemplateCache> {
        self.cache.as_deref()
    }

    /// Resolves and parses a template, consulting the cache when enabled.
    pub fn prepare(&self, source: &TemplateSource, mode: ArgMode) -> Result<Arc<ParsedTemplate>> {
        let text = source.read(self.loader.as_ref())?;
        match &self.cache {
            Some(cache) => cache.get_or_parse(&self.scanner, &text, mode),
            None => Ok(Arc::new(self.scanner.scan(&text, mode)?)),
        }
    }

    /// Runs a statement and returns the number of affected rows.
    pub async fn execute<S, A>(&self, template: S, args: &A) -> Result<u64>
    where
        S: Into<TemplateSource>,
        A: BindArgs + ?Sized,
    {
        let parsed = self.prepare(&template.into(), args.mode())?;
        let query = PreparedQuery::from_parsed(parsed, self.store.clone());
        let mut tx = self.pool.begin().await?;
        let result = query.execute(&mut *tx, args).await.map(|r| r.rows_affected());
        finish(tx, result).await
    }

    /// [`Session::execute`] with arguments read from `source`.
    pub async fn execute_bean<S, T>(&self, template: S, source: &T) -> Result<u64>
    where
        S: Into<TemplateSource>,
        T: Bean,
    {
        self.execute(template, &Source(source)).await
    }

    /// Every row materialized as `T`.
    pub async fn select_list<T, S, A>(
        &self,
        template: S,
        args: &A,
        style: ResultStyle,
    ) -> Result<Vec<T>>
    where
        T: Bean,
        S: Into<TemplateSource>,
        A: BindArgs + ?Sized,
    {
        let parsed = self.prepare(&template.into(), args.mode())?;
        let query = PreparedQueryAs::<T>::from_parsed(parsed, style, self.store.clone())?;
        let mut tx = self.pool.begin().await?;
        let result = query.fetch_all(&mut *tx, args).await;
        finish(tx, result).await
    }

    /// [`Session::select_list`] with arguments read from `source`.
    pub async fn select_list_bean<T, S, B>(
        &self,
        template: S,
        source: &B,
        style: ResultStyle,
    ) -> Result<Vec<T>>
    where
        T: Bean,
        S: Into<TemplateSource>,
        B: Bean,
    {
        self.select_list(template, &Source(source), style).await
    }

    /// The first row materialized as `T`, or `None` for an empty result.
    pub async fn select_one<T, S, A>(
        &self,
        template: S,
        args: &A,
        style: ResultStyle,
    ) -> Result<Option<T>>
    where
        T: Bean,
        S: Into<TemplateSource>,
        A: BindArgs + ?Sized,
    {
        let parsed = self.prepare(&template.into(), args.mode())?;
        let query = PreparedQueryAs::<T>::from_parsed(parsed, style, self.store.clone())?;
        let mut tx = self.pool.begin().await?;
        let result = query.fetch_optional(&mut *tx, args).await;
        finish(tx, result).await
    }

    /// The single column of the first row, or `None` for an empty result.
    ///
    /// The column type must match `V` exactly: `SELECT 1` is an `int4` and
    /// reads as `i32`, while `count(*)` is an `int8` and reads as `i64`.
    /// Cast in SQL to read a column as another width.
    pub async fn select_scalar<V, S, A>(&self, template: S, args: &A) -> Result<Option<V>>
    where
        V: SqlScalar + 'static,
        S: Into<TemplateSource>,
        A: BindArgs + ?Sized,
    {
        let parsed = self.prepare(&template.into(), args.mode())?;
        let query = PreparedQueryAs::<V>::scalar_from_parsed(parsed, self.store.clone());
        let mut tx = self.pool.begin().await?;
        let result = query.fetch_optional(&mut *tx, args).await;
        finish(tx, result).await
    }

    /// The single column of every row.
    pub async fn select_scalars<V, S, A>(&self, template: S, args: &A) -> Result<Vec<V>>
    where
        V: SqlScalar + 'static,
        S: Into<TemplateSource>,
        A: BindArgs + ?Sized,
    {
        let parsed = self.prepare(&template.into(), args.mode())?;
        let query = PreparedQueryAs::<V>::scalar_from_parsed(parsed, self.store.clone());
        let mut tx = self.pool.begin().await?;
        let result = query.fetch_all(&mut *tx, args).await;
        finish(tx, result).await
    }

    /// Calls a procedure, reading inputs from `target` and writing outputs back.
    pub async fn call<S, T>(&self, template: S, target: &mut T) -> Result<()>
    where
        S: Into<TemplateSource>,
        T: Bean,
    {
        let parsed = self.prepare(&template.into(), ArgMode::InOut)?;
        let call = PreparedCall::from_parsed(parsed, self.store.clone())?;
        let mut tx = self.pool.begin().await?;
        let result = call.execute(&mut *tx, target).await;
        finish(tx, result).await
    }

    /// Rows read from the cursor a function opens on its first argument.
    pub async fn select_cursor<T, S>(
        &self,
        template: S,
        values: &[Value],
        style: ResultStyle,
    ) -> Result<Vec<T>>
    where
        T: Bean,
        S: Into<TemplateSource>,
    {
        let parsed = self.prepare(&template.into(), ArgMode::RefCursor)?;
        let query = CursorQuery::<T>::from_parsed(parsed, style, self.store.clone())?;
        let mut conn = self.pool.acquire().await?;
        query.fetch_all(&mut conn, values).await
    }
}
