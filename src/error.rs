use std::path::PathBuf;

use sqlx::postgres::{PgDatabaseError, PgErrorPosition};

use crate::types::TypeKey;

/// Error types for sqlx-template-bind
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or unterminated placeholder marker
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Missing SQL text, missing shape/converter configuration or an invalid option value
    #[error("Configuration error: {0}")]
    Config(String),

    /// No converter, accessor, mutator or constructor for a required type
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// A conversion or binding failure attributed to one statement parameter
    #[error("Argument {index}: {source}")]
    Argument {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    /// The server rejected a statement
    #[error("{0}")]
    Execution(Box<ExecutionError>),

    /// Error from SQLx connection or transaction plumbing
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Identifier pattern failed to compile
    #[error("Failed to compile identifier pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// SQL template resource could not be read
    #[error("Failed to read SQL template '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A cursor or statement could not be released
    #[error("Failed to release {resource}: {source}")]
    Cleanup {
        resource: String,
        #[source]
        source: sqlx::Error,
        original: Option<Box<Error>>,
    },

    /// Rolling back after a failed command failed as well
    #[error("Rollback failed ({source}) after: {original}")]
    Rollback {
        #[source]
        source: sqlx::Error,
        original: Box<Error>,
    },
}

impl Error {
    pub(crate) fn at_argument(self, index: usize) -> Self {
        match self {
            Error::Argument { .. } => self,
            other => Error::Argument {
                index,
                source: Box::new(other),
            },
        }
    }

    /// Wraps a failure reported while running `sql`.
    ///
    /// Server-side diagnostics are lifted into [`ExecutionError`]; anything else
    /// (pool timeouts, protocol errors) stays a [`Error::Database`].
    pub fn execution(sql: &str, err: sqlx::Error) -> Self {
        let is_server_error = err
            .as_database_error()
            .and_then(|db| db.try_downcast_ref::<PgDatabaseError>())
            .is_some();
        if is_server_error {
            Error::Execution(Box::new(ExecutionError::new(sql, err)))
        } else {
            Error::Database(err)
        }
    }

    pub fn is_template(&self) -> bool {
        matches!(self, Error::Template(_))
    }

    pub fn is_conversion(&self) -> bool {
        match self {
            Error::Conversion(_) => true,
            Error::Argument { source, .. } => source.is_conversion(),
            _ => false,
        }
    }

    pub fn is_execution(&self) -> bool {
        self.as_execution().is_some()
    }

    /// Structured server diagnostics, looking through rollback and cleanup wrappers.
    pub fn as_execution(&self) -> Option<&ExecutionError> {
        match self {
            Error::Execution(e) => Some(e),
            Error::Rollback { original, .. } => original.as_execution(),
            Error::Cleanup {
                original: Some(original),
                ..
            } => original.as_execution(),
            _ => None,
        }
    }
}

/// Placeholder scanning failures. Positions are byte offsets into the template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Unterminated placeholder starting at byte {position}")]
    Unterminated { position: usize },

    #[error("Empty placeholder at byte {position}")]
    EmptyMarker { position: usize },

    #[error("Malformed placeholder '{body}' at byte {position}")]
    Malformed { position: usize, body: String },

    #[error(
        "First placeholder must be #{{refcursor}}, found {}",
        found.as_deref().unwrap_or("no placeholder")
    )]
    MissingRefCursor { found: Option<String> },
}

/// Converter and bean lookup failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    #[error("No converter registered for type '{0}'")]
    NoConverter(TypeKey),

    #[error("No converter implementation named '{0}'")]
    UnknownConverter(String),

    #[error("No accessor '{name}' on {class}")]
    NoAccessor { class: &'static str, name: String },

    #[error(
        "No mutator '{name}'{} on {class}",
        param.as_ref().map(|p| format!("({p})")).unwrap_or_default()
    )]
    NoMutator {
        class: &'static str,
        name: String,
        param: Option<TypeKey>,
    },

    #[error("No constructor on {class} taking ({})", join_types(types))]
    NoConstructor {
        class: &'static str,
        types: Vec<TypeKey>,
    },

    #[error("No no-argument constructor on {class}")]
    NoDefaultConstructor { class: &'static str },

    #[error("Scalar result needs exactly one column, found {0}")]
    ScalarColumnCount(usize),

    #[error("Expected {expected} argument values, found {found}")]
    ArgumentCount { expected: usize, found: usize },

    #[error("Expected a {expected} value, found {found}")]
    ValueMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("NULL cannot be stored in non-nullable type '{0}'")]
    UnexpectedNull(TypeKey),

    #[error("No type mapping for database type '{0}'")]
    UnknownColumnType(String),

    #[error("Column {index} is out of range")]
    ColumnIndex { index: usize },

    #[error("Parameter ${index} was never bound")]
    UnboundParameter { index: usize },

    #[error("Output {index} is not available: {reason}")]
    Output { index: usize, reason: String },

    #[error("Failed to decode column {index}: {message}")]
    Decode { index: usize, message: String },

    #[error("Failed to encode parameter ${index}: {message}")]
    Encode { index: usize, message: String },
}

fn join_types(types: &[TypeKey]) -> String {
    types
        .iter()
        .map(TypeKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Server diagnostics for a failed statement.
#[derive(Debug)]
pub struct ExecutionError {
    pub sql: String,
    pub code: Option<String>,
    pub severity: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// 1-based character position in `sql`, when the server reported one
    pub position: Option<usize>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub constraint: Option<String>,
    pub source: sqlx::Error,
}

impl ExecutionError {
    fn new(sql: &str, source: sqlx::Error) -> Self {
        let mut err = ExecutionError {
            sql: sql.to_owned(),
            code: None,
            severity: None,
            message: source.to_string(),
            detail: None,
            hint: None,
            position: None,
            schema: None,
            table: None,
            column: None,
            constraint: None,
            source,
        };
        if let Some(pg) = err
            .source
            .as_database_error()
            .and_then(|db| db.try_downcast_ref::<PgDatabaseError>())
        {
            err.code = Some(pg.code().to_owned());
            err.severity = Some(format!("{:?}", pg.severity()).to_uppercase());
            err.message = pg.message().to_owned();
            err.detail = pg.detail().map(str::to_owned);
            err.hint = pg.hint().map(str::to_owned);
            err.position = match pg.position() {
                Some(PgErrorPosition::Original(position)) => Some(position),
                _ => None,
            };
            err.schema = pg.schema().map(str::to_owned);
            err.table = pg.table().map(str::to_owned);
            err.column = pg.column().map(str::to_owned);
            err.constraint = pg.constraint().map(str::to_owned);
        }
        err
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Execution failed: {}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " [{code}]")?;
        }
        if let Some(position) = self.position {
            write!(f, " at position {position}")?;
        }
        write!(f, " in `{}`", self.sql)
    }
}

/// Result type alias for sqlx-template-bind operations
pub type Result<T> = std::result::Result<T, Error>;
