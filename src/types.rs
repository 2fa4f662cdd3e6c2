//! Value model shared by the binder, the converters and the row materializer.
//!
//! A [`TypeKey`] plays the part of a runtime class: it names the host type a
//! converter is registered under. Non-nullable scalars (`i32`, `bool`, ...) have
//! *primitive* keys, their `Option` forms have *wrapper* keys (`int32`,
//! `boolean`, ...). Object-like types (strings, UUIDs, timestamps) only have a
//! wrapper key.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use once_cell::sync::Lazy;
use uuid::Uuid;

use crate::error::{ConversionError, Result};

/// Name of a host value type, used as the converter registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(Cow<'static, str>);

impl TypeKey {
    pub const BOOLEAN: TypeKey = TypeKey::from_static("boolean");
    pub const INT16: TypeKey = TypeKey::from_static("int16");
    pub const INT32: TypeKey = TypeKey::from_static("int32");
    pub const INT64: TypeKey = TypeKey::from_static("int64");
    pub const FLOAT32: TypeKey = TypeKey::from_static("float32");
    pub const FLOAT64: TypeKey = TypeKey::from_static("float64");
    pub const STRING: TypeKey = TypeKey::from_static("string");
    pub const BYTES: TypeKey = TypeKey::from_static("bytes");
    pub const UUID: TypeKey = TypeKey::from_static("uuid");
    pub const DATE: TypeKey = TypeKey::from_static("date");
    pub const TIME: TypeKey = TypeKey::from_static("time");
    pub const TIMESTAMP: TypeKey = TypeKey::from_static("timestamp");
    pub const TIMESTAMPTZ: TypeKey = TypeKey::from_static("timestamptz");
    pub const JSON: TypeKey = TypeKey::from_static("json");
    pub const REFCURSOR: TypeKey = TypeKey::from_static("refcursor");

    pub const BOOL: TypeKey = TypeKey::from_static("bool");
    pub const I16: TypeKey = TypeKey::from_static("i16");
    pub const I32: TypeKey = TypeKey::from_static("i32");
    pub const I64: TypeKey = TypeKey::from_static("i64");
    pub const F32: TypeKey = TypeKey::from_static("f32");
    pub const F64: TypeKey = TypeKey::from_static("f64");

    pub const fn from_static(name: &'static str) -> Self {
        TypeKey(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        TypeKey(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for TypeKey {
    fn from(name: &'static str) -> Self {
        TypeKey::from_static(name)
    }
}

/// Column type tag used for typed NULLs and output parameter declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Bytea,
    Uuid,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    RefCursor,
}

impl SqlType {
    /// Postgres type name, as reported in column metadata.
    pub fn pg_name(self) -> &'static str {
        match self {
            SqlType::Bool => "BOOL",
            SqlType::Int2 => "INT2",
            SqlType::Int4 => "INT4",
            SqlType::Int8 => "INT8",
            SqlType::Float4 => "FLOAT4",
            SqlType::Float8 => "FLOAT8",
            SqlType::Text => "TEXT",
            SqlType::Bytea => "BYTEA",
            SqlType::Uuid => "UUID",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampTz => "TIMESTAMPTZ",
            SqlType::Json => "JSONB",
            SqlType::RefCursor => "REFCURSOR",
        }
    }

    /// Wrapper key of the values this tag carries.
    pub fn type_key(self) -> TypeKey {
        match self {
            SqlType::Bool => TypeKey::BOOLEAN,
            SqlType::Int2 => TypeKey::INT16,
            SqlType::Int4 => TypeKey::INT32,
            SqlType::Int8 => TypeKey::INT64,
            SqlType::Float4 => TypeKey::FLOAT32,
            SqlType::Float8 => TypeKey::FLOAT64,
            SqlType::Text => TypeKey::STRING,
            SqlType::Bytea => TypeKey::BYTES,
            SqlType::Uuid => TypeKey::UUID,
            SqlType::Date => TypeKey::DATE,
            SqlType::Time => TypeKey::TIME,
            SqlType::Timestamp => TypeKey::TIMESTAMP,
            SqlType::TimestampTz => TypeKey::TIMESTAMPTZ,
            SqlType::Json => TypeKey::JSON,
            SqlType::RefCursor => TypeKey::REFCURSOR,
        }
    }
}

/// A host value in transit between a bean and a statement or row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    /// Name of a server-side cursor
    RefCursor(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Tag of a non-null value.
    pub fn sql_type(&self) -> Option<SqlType> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => SqlType::Bool,
            Value::Int16(_) => SqlType::Int2,
            Value::Int32(_) => SqlType::Int4,
            Value::Int64(_) => SqlType::Int8,
            Value::Float32(_) => SqlType::Float4,
            Value::Float64(_) => SqlType::Float8,
            Value::String(_) => SqlType::Text,
            Value::Bytes(_) => SqlType::Bytea,
            Value::Uuid(_) => SqlType::Uuid,
            Value::Date(_) => SqlType::Date,
            Value::Time(_) => SqlType::Time,
            Value::Timestamp(_) => SqlType::Timestamp,
            Value::TimestampTz(_) => SqlType::TimestampTz,
            Value::Json(_) => SqlType::Json,
            Value::RefCursor(_) => SqlType::RefCursor,
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self.sql_type() {
            None => "null",
            Some(ty) => kind_name(ty),
        }
    }
}

pub(crate) fn kind_name(ty: SqlType) -> &'static str {
    match ty {
        SqlType::Bool => "boolean",
        SqlType::Int2 => "int16",
        SqlType::Int4 => "int32",
        SqlType::Int8 => "int64",
        SqlType::Float4 => "float32",
        SqlType::Float8 => "float64",
        SqlType::Text => "string",
        SqlType::Bytea => "bytes",
        SqlType::Uuid => "uuid",
        SqlType::Date => "date",
        SqlType::Time => "time",
        SqlType::Timestamp => "timestamp",
        SqlType::TimestampTz => "timestamptz",
        SqlType::Json => "json",
        SqlType::RefCursor => "refcursor",
    }
}

/// Primitive/wrapper pairs and primitive type-name aliases.
///
/// Built once and never mutated; the converter store keeps a `&'static`
/// reference to it.
#[derive(Debug)]
pub struct PrimitiveTable {
    to_wrapper: HashMap<TypeKey, TypeKey>,
    to_primitive: HashMap<TypeKey, TypeKey>,
    names: HashMap<&'static str, TypeKey>,
}

static PRIMITIVES: Lazy<PrimitiveTable> = Lazy::new(PrimitiveTable::build);

impl PrimitiveTable {
    pub fn global() -> &'static PrimitiveTable {
        &PRIMITIVES
    }

    fn build() -> Self {
        let pairs = [
            (TypeKey::BOOL, TypeKey::BOOLEAN),
            (TypeKey::I16, TypeKey::INT16),
            (TypeKey::I32, TypeKey::INT32),
            (TypeKey::I64, TypeKey::INT64),
            (TypeKey::F32, TypeKey::FLOAT32),
            (TypeKey::F64, TypeKey::FLOAT64),
        ];
        let names = [
            ("bool", TypeKey::BOOL),
            ("i16", TypeKey::I16),
            ("short", TypeKey::I16),
            ("i32", TypeKey::I32),
            ("int", TypeKey::I32),
            ("i64", TypeKey::I64),
            ("long", TypeKey::I64),
            ("f32", TypeKey::F32),
            ("float", TypeKey::F32),
            ("f64", TypeKey::F64),
            ("double", TypeKey::F64),
        ];
        PrimitiveTable {
            to_wrapper: pairs.iter().cloned().collect(),
            to_primitive: pairs.iter().cloned().map(|(p, w)| (w, p)).collect(),
            names: names.into_iter().collect(),
        }
    }

    pub fn is_primitive(&self, key: &TypeKey) -> bool {
        self.to_wrapper.contains_key(key)
    }

    pub fn wrapper_of(&self, key: &TypeKey) -> Option<&TypeKey> {
        self.to_wrapper.get(key)
    }

    pub fn primitive_of(&self, key: &TypeKey) -> Option<&TypeKey> {
        self.to_primitive.get(key)
    }

    /// The other half of a primitive/wrapper pair.
    pub fn counterpart(&self, key: &TypeKey) -> Option<&TypeKey> {
        self.wrapper_of(key).or_else(|| self.primitive_of(key))
    }

    /// Resolves an explicit type name: primitive aliases first, then the name as given.
    pub fn resolve_name(&self, name: &str) -> TypeKey {
        let name = name.trim();
        match self.names.get(name.to_ascii_lowercase().as_str()) {
            Some(key) => key.clone(),
            None => TypeKey::new(name),
        }
    }
}

/// A Rust type that moves through the binder as a [`Value`].
pub trait SqlScalar: Sized {
    /// Key of the type itself.
    const TYPE: TypeKey;
    /// Key of the nullable form.
    const BOXED: TypeKey;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, found: &Value) -> crate::Error {
    ConversionError::ValueMismatch {
        expected,
        found: found.kind_name(),
    }
    .into()
}

macro_rules! impl_sql_scalar {
    ($($ty:ty => $variant:ident($tag:ident), $key:expr, $boxed:expr;)*) => {
        $(
            impl SqlScalar for $ty {
                const TYPE: TypeKey = $key;
                const BOXED: TypeKey = $boxed;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        Value::Null => Err(ConversionError::UnexpectedNull(Self::TYPE).into()),
                        other => Err(mismatch(kind_name(SqlType::$tag), &other)),
                    }
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_sql_scalar! {
    bool => Bool(Bool), TypeKey::BOOL, TypeKey::BOOLEAN;
    i16 => Int16(Int2), TypeKey::I16, TypeKey::INT16;
    i32 => Int32(Int4), TypeKey::I32, TypeKey::INT32;
    i64 => Int64(Int8), TypeKey::I64, TypeKey::INT64;
    f32 => Float32(Float4), TypeKey::F32, TypeKey::FLOAT32;
    f64 => Float64(Float8), TypeKey::F64, TypeKey::FLOAT64;
    String => String(Text), TypeKey::STRING, TypeKey::STRING;
    Vec<u8> => Bytes(Bytea), TypeKey::BYTES, TypeKey::BYTES;
    Uuid => Uuid(Uuid), TypeKey::UUID, TypeKey::UUID;
    NaiveDate => Date(Date), TypeKey::DATE, TypeKey::DATE;
    NaiveTime => Time(Time), TypeKey::TIME, TypeKey::TIME;
    NaiveDateTime => Timestamp(Timestamp), TypeKey::TIMESTAMP, TypeKey::TIMESTAMP;
    DateTime<Utc> => TimestampTz(TimestampTz), TypeKey::TIMESTAMPTZ, TypeKey::TIMESTAMPTZ;
    serde_json::Value => Json(Json), TypeKey::JSON, TypeKey::JSON;
}

impl<T: SqlScalar> SqlScalar for Option<T> {
    const TYPE: TypeKey = T::BOXED;
    const BOXED: TypeKey = T::BOXED;

    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
