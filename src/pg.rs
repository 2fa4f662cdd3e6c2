//! PostgreSQL implementations of the statement and row capabilities.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgRow, PgTypeInfo, PgValueRef};
use sqlx::{Arguments, Column, Decode, Encode, Postgres, Row, Type, TypeInfo};
use uuid::Uuid;

use crate::error::{ConversionError, Error, Result};
use crate::statement::{CallableStatement, ResultRow, StatementHandle};
use crate::types::{SqlType, TypeKey, Value};

/// Name of a server-side cursor, sent and read as `refcursor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorName(pub String);

impl Type<Postgres> for CursorName {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("refcursor")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        ty.name().eq_ignore_ascii_case("refcursor") || <String as Type<Postgres>>::compatible(ty)
    }
}

impl Encode<'_, Postgres> for CursorName {
    fn encode_by_ref(
        &self,
        buf: &mut PgArgumentBuffer,
    ) -> std::result::Result<IsNull, BoxDynError> {
        <&str as Encode<Postgres>>::encode_by_ref(&self.0.as_str(), buf)
    }
}

impl<'r> Decode<'r, Postgres> for CursorName {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        <String as Decode<Postgres>>::decode(value).map(CursorName)
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Value(Value),
    Null(SqlType),
}

/// Collects positional parameters for one execution.
#[derive(Debug, Default)]
pub struct PgStatement {
    slots: Vec<Option<Slot>>,
}

impl PgStatement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest parameter number bound so far.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn is_bound(&self, index: usize) -> bool {
        matches!(self.slots.get(index.wrapping_sub(1)), Some(Some(_)))
    }

    fn put(&mut self, index: usize, slot: Slot) -> Result<()> {
        if index == 0 {
            return Err(Error::Config("statement parameters are numbered from 1".into()));
        }
        if self.slots.len() < index {
            self.slots.resize_with(index, || None);
        }
        self.slots[index - 1] = Some(slot);
        Ok(())
    }

    /// Encodes every parameter; a gap in the numbering is an error.
    pub fn into_arguments(self) -> Result<PgArguments> {
        let mut args = PgArguments::default();
        for (offset, slot) in self.slots.into_iter().enumerate() {
            let index = offset + 1;
            let added = match slot {
                None => return Err(ConversionError::UnboundParameter { index }.into()),
                Some(Slot::Value(value)) => add_value(&mut args, value),
                Some(Slot::Null(ty)) => add_null(&mut args, ty),
            };
            added.map_err(|e| ConversionError::Encode {
                index,
                message: e.to_string(),
            })?;
        }
        Ok(args)
    }
}

impl StatementHandle for PgStatement {
    fn set_value(&mut self, index: usize, value: Value) -> Result<()> {
        tracing::trace!(index, kind = value.kind_name(), "set parameter");
        self.put(index, Slot::Value(value))
    }

    fn set_null(&mut self, index: usize, ty: SqlType) -> Result<()> {
        tracing::trace!(index, ?ty, "set null parameter");
        self.put(index, Slot::Null(ty))
    }
}

fn add_value(args: &mut PgArguments, value: Value) -> std::result::Result<(), BoxDynError> {
    match value {
        Value::Null => args.add(None::<String>),
        Value::Bool(v) => args.add(v),
        Value::Int16(v) => args.add(v),
        Value::Int32(v) => args.add(v),
        Value::Int64(v) => args.add(v),
        Value::Float32(v) => args.add(v),
        Value::Float64(v) => args.add(v),
        Value::String(v) => args.add(v),
        Value::Bytes(v) => args.add(v),
        Value::Uuid(v) => args.add(v),
        Value::Date(v) => args.add(v),
        Value::Time(v) => args.add(v),
        Value::Timestamp(v) => args.add(v),
        Value::TimestampTz(v) => args.add(v),
        Value::Json(v) => args.add(v),
        Value::RefCursor(v) => args.add(CursorName(v)),
    }
}

fn add_null(args: &mut PgArguments, ty: SqlType) -> std::result::Result<(), BoxDynError> {
    match ty {
        SqlType::Bool => args.add(None::<bool>),
        SqlType::Int2 => args.add(None::<i16>),
        SqlType::Int4 => args.add(None::<i32>),
        SqlType::Int8 => args.add(None::<i64>),
        SqlType::Float4 => args.add(None::<f32>),
        SqlType::Float8 => args.add(None::<f64>),
        SqlType::Text => args.add(None::<String>),
        SqlType::Bytea => args.add(None::<Vec<u8>>),
        SqlType::Uuid => args.add(None::<Uuid>),
        SqlType::Date => args.add(None::<NaiveDate>),
        SqlType::Time => args.add(None::<NaiveTime>),
        SqlType::Timestamp => args.add(None::<NaiveDateTime>),
        SqlType::TimestampTz => args.add(None::<DateTime<Utc>>),
        SqlType::Json => args.add(None::<serde_json::Value>),
        SqlType::RefCursor => args.add(None::<CursorName>),
    }
}

/// A `CALL` whose OUT and INOUT values come back as a single row.
///
/// OUT-only parameters are sent as typed NULLs.
#[derive(Default)]
pub struct PgCallable {
    statement: PgStatement,
    outputs: Vec<(usize, SqlType)>,
    row: Option<PgRow>,
}

impl PgCallable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absolute parameter numbers and types of the declared outputs.
    pub fn outputs(&self) -> &[(usize, SqlType)] {
        &self.outputs
    }

    /// Takes the bound parameters, leaving the declared outputs in place.
    pub fn take_arguments(&mut self) -> Result<PgArguments> {
        std::mem::take(&mut self.statement).into_arguments()
    }

    /// Stores the row returned by the executed call.
    pub fn set_outputs(&mut self, row: PgRow) {
        self.row = Some(row);
    }
}

impl std::fmt::Debug for PgCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgCallable")
            .field("statement", &self.statement)
            .field("outputs", &self.outputs)
            .field("executed", &self.row.is_some())
            .finish()
    }
}

impl StatementHandle for PgCallable {
    fn set_value(&mut self, index: usize, value: Value) -> Result<()> {
        self.statement.set_value(index, value)
    }

    fn set_null(&mut self, index: usize, ty: SqlType) -> Result<()> {
        self.statement.set_null(index, ty)
    }
}

impl CallableStatement for PgCallable {
    fn register_out(&mut self, index: usize, ty: SqlType) -> Result<()> {
        if !self.statement.is_bound(index) {
            self.statement.set_null(index, ty)?;
        }
        self.outputs.push((index, ty));
        Ok(())
    }

    fn get_out(&self, index: usize, ty: SqlType) -> Result<Value> {
        let row = self.row.as_ref().ok_or_else(|| ConversionError::Output {
            index,
            reason: "the call has not returned a row".into(),
        })?;
        decode(row, index, ty)
    }
}

/// Registry key for a Postgres column type name.
pub fn type_key_for(pg_type: &str) -> Option<TypeKey> {
    let key = match pg_type.to_ascii_uppercase().as_str() {
        "BOOL" => TypeKey::BOOLEAN,
        "INT2" => TypeKey::INT16,
        "INT4" => TypeKey::INT32,
        "INT8" => TypeKey::INT64,
        "FLOAT4" => TypeKey::FLOAT32,
        "FLOAT8" => TypeKey::FLOAT64,
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => TypeKey::STRING,
        "BYTEA" => TypeKey::BYTES,
        "UUID" => TypeKey::UUID,
        "DATE" => TypeKey::DATE,
        "TIME" => TypeKey::TIME,
        "TIMESTAMP" => TypeKey::TIMESTAMP,
        "TIMESTAMPTZ" => TypeKey::TIMESTAMPTZ,
        "JSON" | "JSONB" => TypeKey::JSON,
        "REFCURSOR" => TypeKey::REFCURSOR,
        _ => return None,
    };
    Some(key)
}

fn decode(row: &PgRow, index: usize, ty: SqlType) -> Result<Value> {
    let column = index
        .checked_sub(1)
        .filter(|&i| i < row.len())
        .ok_or(ConversionError::ColumnIndex { index })?;
    let decoded = match ty {
        SqlType::Bool => row.try_get::<Option<bool>, _>(column).map(|v| v.map(Value::Bool)),
        SqlType::Int2 => row.try_get::<Option<i16>, _>(column).map(|v| v.map(Value::Int16)),
        SqlType::Int4 => row.try_get::<Option<i32>, _>(column).map(|v| v.map(Value::Int32)),
        SqlType::Int8 => row.try_get::<Option<i64>, _>(column).map(|v| v.map(Value::Int64)),
        SqlType::Float4 => row.try_get::<Option<f32>, _>(column).map(|v| v.map(Value::Float32)),
        SqlType::Float8 => row.try_get::<Option<f64>, _>(column).map(|v| v.map(Value::Float64)),
        SqlType::Text => row.try_get::<Option<String>, _>(column).map(|v| v.map(Value::String)),
        SqlType::Bytea => row.try_get::<Option<Vec<u8>>, _>(column).map(|v| v.map(Value::Bytes)),
        SqlType::Uuid => row.try_get::<Option<Uuid>, _>(column).map(|v| v.map(Value::Uuid)),
        SqlType::Date => row.try_get::<Option<NaiveDate>, _>(column).map(|v| v.map(Value::Date)),
        SqlType::Time => row.try_get::<Option<NaiveTime>, _>(column).map(|v| v.map(Value::Time)),
        SqlType::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(column)
            .map(|v| v.map(Value::Timestamp)),
        SqlType::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(column)
            .map(|v| v.map(Value::TimestampTz)),
        SqlType::Json => row
            .try_get::<Option<serde_json::Value>, _>(column)
            .map(|v| v.map(Value::Json)),
        SqlType::RefCursor => row
            .try_get::<Option<CursorName>, _>(column)
            .map(|v| v.map(|c| Value::RefCursor(c.0))),
    };
    decoded
        .map(|v| v.unwrap_or(Value::Null))
        .map_err(|e| {
            ConversionError::Decode {
                index,
                message: e.to_string(),
            }
            .into()
        })
}

impl ResultRow for PgRow {
    fn column_count(&self) -> usize {
        self.len()
    }

    fn column_type(&self, index: usize) -> Result<TypeKey> {
        let column = index
            .checked_sub(1)
            .and_then(|i| self.columns().get(i))
            .ok_or(ConversionError::ColumnIndex { index })?;
        let name = column.type_info().name();
        type_key_for(name).ok_or_else(|| ConversionError::UnknownColumnType(name.to_owned()).into())
    }

    fn column_label(&self, index: usize) -> Result<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.columns().get(i))
            .map(|c| c.name())
            .ok_or_else(|| ConversionError::ColumnIndex { index }.into())
    }

    fn get_value(&self, index: usize, ty: SqlType) -> Result<Value> {
        decode(self, index, ty)
    }
}
