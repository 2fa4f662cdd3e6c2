//! Converters and the store that maps [`TypeKey`]s to them.
//!
//! The store is assembled once from layered key/value sources (built-in
//! defaults first, later sources win) and is read-only afterwards, so it can be
//! shared behind an `Arc` by any number of sessions.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bean::{Bean, Getter, Setter};
use crate::error::{ConversionError, Error, Result};
use crate::statement::{CallableStatement, ResultRow, StatementHandle};
use crate::types::{kind_name, PrimitiveTable, SqlType, TypeKey, Value};

/// Moves values of one host type in and out of statements and rows.
///
/// Implementations must be stateless; one instance serves every caller.
pub trait Converter: Send + Sync + fmt::Debug {
    /// Name used in configuration sources.
    fn name(&self) -> &str;

    fn sql_type(&self) -> SqlType;

    fn set_parameter(
        &self,
        stmt: &mut dyn StatementHandle,
        index: usize,
        value: Value,
    ) -> Result<()> {
        if value.is_null() {
            return stmt.set_null(index, self.sql_type());
        }
        let value = coerce(value, self.sql_type())?;
        stmt.set_value(index, value)
    }

    fn get_column(&self, row: &dyn ResultRow, index: usize) -> Result<Value> {
        row.get_value(index, self.sql_type())
    }

    fn register_out_parameter(&self, stmt: &mut dyn CallableStatement, index: usize) -> Result<()> {
        stmt.register_out(index, self.sql_type())
    }

    fn get_out_parameter(&self, stmt: &dyn CallableStatement, index: usize) -> Result<Value> {
        stmt.get_out(index, self.sql_type())
    }
}

/// Checks that `value` fits `ty`, widening integers and floats losslessly.
fn coerce(value: Value, ty: SqlType) -> Result<Value> {
    let coerced = match (value, ty) {
        (value, ty) if value.sql_type() == Some(ty) => value,
        (Value::Int16(v), SqlType::Int4) => Value::Int32(v.into()),
        (Value::Int16(v), SqlType::Int8) => Value::Int64(v.into()),
        (Value::Int32(v), SqlType::Int8) => Value::Int64(v.into()),
        (Value::Float32(v), SqlType::Float8) => Value::Float64(v.into()),
        (Value::String(name), SqlType::RefCursor) => Value::RefCursor(name),
        (value, ty) => {
            return Err(ConversionError::ValueMismatch {
                expected: kind_name(ty),
                found: value.kind_name(),
            }
            .into())
        }
    };
    Ok(coerced)
}

/// Passes values of a single [`SqlType`] through unchanged.
#[derive(Debug, Clone)]
pub struct ScalarConverter {
    name: &'static str,
    sql_type: SqlType,
}

impl ScalarConverter {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self { name, sql_type }
    }
}

impl Converter for ScalarConverter {
    fn name(&self) -> &str {
        self.name
    }

    fn sql_type(&self) -> SqlType {
        self.sql_type
    }
}

/// Stores JSON documents in text columns.
///
/// Reads accept both text and native `json`/`jsonb` columns, so the override
/// can be registered for a schema that mixes the two.
#[derive(Debug, Clone, Default)]
pub struct JsonTextConverter;

impl JsonTextConverter {
    fn parse(value: Value, index: usize) -> Result<Value> {
        match value {
            Value::String(text) => serde_json::from_str(&text).map(Value::Json).map_err(|e| {
                ConversionError::Decode {
                    index,
                    message: e.to_string(),
                }
                .into()
            }),
            other => Ok(other),
        }
    }
}

impl Converter for JsonTextConverter {
    fn name(&self) -> &str {
        "JsonTextConverter"
    }

    fn sql_type(&self) -> SqlType {
        SqlType::Text
    }

    fn set_parameter(
        &self,
        stmt: &mut dyn StatementHandle,
        index: usize,
        value: Value,
    ) -> Result<()> {
        match value {
            Value::Null => stmt.set_null(index, SqlType::Text),
            Value::Json(doc) => stmt.set_value(index, Value::String(doc.to_string())),
            Value::String(text) => stmt.set_value(index, Value::String(text)),
            other => Err(ConversionError::ValueMismatch {
                expected: "json",
                found: other.kind_name(),
            }
            .into()),
        }
    }

    fn get_column(&self, row: &dyn ResultRow, index: usize) -> Result<Value> {
        if row.column_type(index)? == TypeKey::JSON {
            return row.get_value(index, SqlType::Json);
        }
        Self::parse(row.get_value(index, SqlType::Text)?, index)
    }

    fn get_out_parameter(&self, stmt: &dyn CallableStatement, index: usize) -> Result<Value> {
        // output types are not reported before decoding
        match stmt.get_out(index, SqlType::Text) {
            Ok(text) => Self::parse(text, index),
            Err(_) => stmt.get_out(index, SqlType::Json),
        }
    }
}

type ConverterFactory = Box<dyn Fn() -> Arc<dyn Converter> + Send + Sync>;

/// Built-in defaults: type key, converter name, column type.
const BUILTINS: &[(&str, &str, SqlType)] = &[
    ("boolean", "BooleanConverter", SqlType::Bool),
    ("int16", "Int16Converter", SqlType::Int2),
    ("int32", "Int32Converter", SqlType::Int4),
    ("int64", "Int64Converter", SqlType::Int8),
    ("float32", "Float32Converter", SqlType::Float4),
    ("float64", "Float64Converter", SqlType::Float8),
    ("string", "StringConverter", SqlType::Text),
    ("bytes", "BytesConverter", SqlType::Bytea),
    ("uuid", "UuidConverter", SqlType::Uuid),
    ("date", "DateConverter", SqlType::Date),
    ("time", "TimeConverter", SqlType::Time),
    ("timestamp", "TimestampConverter", SqlType::Timestamp),
    ("timestamptz", "TimestampTzConverter", SqlType::TimestampTz),
    ("json", "JsonConverter", SqlType::Json),
    ("refcursor", "RefCursorConverter", SqlType::RefCursor),
];

/// One layer of `type name -> converter name` configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSource {
    entries: BTreeMap<String, String>,
}

impl ConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: &HashMap<String, String>) -> Self {
        Self {
            entries: map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    /// Parses `key = value` lines; `#` and `!` start comments, later keys win.
    ///
    /// Only the first `=` separates key and value, so type names may contain
    /// `:` (`crate::Money = MoneyConverter`).
    pub fn from_properties(text: &str) -> Result<Self> {
        let mut source = Self::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "converter config line {}: expected 'type = converter', found '{line}'",
                    line_no + 1
                ))
            })?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return Err(Error::Config(format!(
                    "converter config line {}: empty type or converter name",
                    line_no + 1
                )));
            }
            source.insert(key, value);
        }
        Ok(source)
    }

    pub fn insert(&mut self, type_name: impl Into<String>, converter: impl Into<String>) {
        self.entries.insert(type_name.into(), converter.into());
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn defaults() -> Self {
        let mut source = Self::new();
        for (key, name, _) in BUILTINS {
            source.insert(*key, *name);
        }
        source
    }
}

/// Collects converter factories, configuration layers and explicit registrations.
pub struct ConverterStoreBuilder {
    factories: HashMap<String, ConverterFactory>,
    sources: Vec<ConfigSource>,
    registered: Vec<(TypeKey, Arc<dyn Converter>)>,
    primitives: &'static PrimitiveTable,
}

impl ConverterStoreBuilder {
    fn new() -> Self {
        let mut builder = Self {
            factories: HashMap::new(),
            sources: vec![ConfigSource::defaults()],
            registered: Vec::new(),
            primitives: PrimitiveTable::global(),
        };
        for &(_, name, sql_type) in BUILTINS {
            builder = builder
                .register_factory(name, move || Arc::new(ScalarConverter::new(name, sql_type)));
        }
        builder.register_factory("JsonTextConverter", || Arc::new(JsonTextConverter))
    }

    /// Makes a converter implementation available to configuration sources by name.
    pub fn register_factory<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Converter> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Adds a configuration layer on top of the ones already added.
    pub fn source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Registers a converter directly; applied after every configuration layer.
    pub fn register(mut self, key: impl Into<TypeKey>, converter: Arc<dyn Converter>) -> Self {
        self.registered.push((key.into(), converter));
        self
    }

    pub fn build(self) -> Result<ConverterStore> {
        let mut instances: HashMap<&str, Arc<dyn Converter>> = HashMap::new();
        let mut converters: HashMap<TypeKey, Arc<dyn Converter>> = HashMap::new();

        for source in &self.sources {
            for (type_name, converter_name) in source.entries() {
                let converter = match instances.get(converter_name) {
                    Some(existing) => existing.clone(),
                    None => {
                        let factory = self.factories.get(converter_name).ok_or_else(|| {
                            ConversionError::UnknownConverter(converter_name.to_owned())
                        })?;
                        let created = factory();
                        instances.insert(converter_name, created.clone());
                        created
                    }
                };
                converters.insert(TypeKey::new(type_name), converter);
            }
        }
        for (key, converter) in self.registered {
            converters.insert(key, converter);
        }

        tracing::debug!(converters = converters.len(), "built converter store");
        Ok(ConverterStore {
            converters,
            primitives: self.primitives,
        })
    }
}

/// Read-only registry of converters keyed by host type.
pub struct ConverterStore {
    converters: HashMap<TypeKey, Arc<dyn Converter>>,
    primitives: &'static PrimitiveTable,
}

impl ConverterStore {
    pub fn builder() -> ConverterStoreBuilder {
        ConverterStoreBuilder::new()
    }

    /// The built-in converters only.
    pub fn with_defaults() -> Result<Self> {
        Self::builder().build()
    }

    /// Built-in defaults overlaid with `sources`, in order.
    pub fn load(sources: &[ConfigSource]) -> Result<Self> {
        sources
            .iter()
            .cloned()
            .fold(Self::builder(), ConverterStoreBuilder::source)
            .build()
    }

    pub fn primitives(&self) -> &'static PrimitiveTable {
        self.primitives
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Converter for `key`, falling back to its primitive/wrapper counterpart.
    pub fn lookup(&self, key: &TypeKey) -> Result<Arc<dyn Converter>> {
        self.converters
            .get(key)
            .or_else(|| {
                self.primitives
                    .counterpart(key)
                    .and_then(|other| self.converters.get(other))
            })
            .cloned()
            .ok_or_else(|| ConversionError::NoConverter(key.clone()).into())
    }

    /// Converter for an explicit type name such as `int32` or `int`.
    pub fn lookup_name(&self, name: &str) -> Result<Arc<dyn Converter>> {
        self.lookup(&self.primitives.resolve_name(name))
    }

    /// Zero-argument accessor `name` on `T`.
    pub fn find_accessor<T: Bean>(&self, name: &str) -> Result<&'static Getter<T>> {
        let class = T::class();
        class.find_getter(name).ok_or_else(|| {
            ConversionError::NoAccessor {
                class: class.name(),
                name: name.to_owned(),
            }
            .into()
        })
    }

    /// Single-argument mutator `name(param)` on `T`, trying the primitive/wrapper
    /// counterpart of `param` when no exact overload exists.
    pub fn find_mutator<T: Bean>(&self, name: &str, param: &TypeKey) -> Result<&'static Setter<T>> {
        let class = T::class();
        class.find_setter(name, param, self.primitives).ok_or_else(|| {
            ConversionError::NoMutator {
                class: class.name(),
                name: name.to_owned(),
                param: Some(param.clone()),
            }
            .into()
        })
    }

    /// Mutator `name` on `T` whatever its parameter type.
    pub fn find_mutator_by_name<T: Bean>(&self, name: &str) -> Result<&'static Setter<T>> {
        let class = T::class();
        class.find_setter_by_name(name).ok_or_else(|| {
            ConversionError::NoMutator {
                class: class.name(),
                name: name.to_owned(),
                param: None,
            }
            .into()
        })
    }
}

impl fmt::Debug for ConverterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.converters.keys().map(TypeKey::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("ConverterStore").field("types", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRow, FakeStatement};

    fn store() -> ConverterStore {
        ConverterStore::with_defaults().unwrap()
    }

    #[test]
    fn test_defaults_cover_builtin_types() {
        let store = store();
        assert_eq!(store.len(), BUILTINS.len());
        for (key, name, sql_type) in BUILTINS {
            let converter = store.lookup(&TypeKey::new(*key)).unwrap();
            assert_eq!(converter.name(), *name);
            assert_eq!(converter.sql_type(), *sql_type);
        }
    }

    #[test]
    fn test_primitive_key_falls_back_to_wrapper() {
        let store = store();
        let converter = store.lookup(&TypeKey::I64).unwrap();
        assert_eq!(converter.name(), "Int64Converter");
        assert_eq!(store.lookup_name("double").unwrap().name(), "Float64Converter");
    }

    #[test]
    fn test_missing_converter_is_an_error() {
        let err = store().lookup(&TypeKey::new("money")).unwrap_err();
        assert!(err.is_conversion());
        assert_eq!(err.to_string(), "No converter registered for type 'money'");
    }

    #[test]
    fn test_later_sources_win() {
        let overrides = ConfigSource::from_properties(
            "# store documents as text\njson = JsonTextConverter\nmoney = StringConverter\n",
        )
        .unwrap();
        let store = ConverterStore::load(&[overrides]).unwrap();
        assert_eq!(store.lookup(&TypeKey::JSON).unwrap().name(), "JsonTextConverter");
        assert_eq!(store.lookup(&TypeKey::new("money")).unwrap().name(), "StringConverter");
        assert_eq!(store.lookup(&TypeKey::INT32).unwrap().name(), "Int32Converter");
    }

    #[test]
    fn test_converters_are_instantiated_once() {
        let mut source = ConfigSource::new();
        source.insert("varchar", "StringConverter");
        source.insert("citext", "StringConverter");
        let store = ConverterStore::load(&[source]).unwrap();
        let a = store.lookup(&TypeKey::new("varchar")).unwrap();
        let b = store.lookup(&TypeKey::new("citext")).unwrap();
        let c = store.lookup(&TypeKey::STRING).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_unknown_converter_name() {
        let mut source = ConfigSource::new();
        source.insert("money", "MoneyConverter");
        let err = ConverterStore::load(&[source]).unwrap_err();
        assert!(matches!(
            err,
            Error::Conversion(ConversionError::UnknownConverter(ref name))
                if name == "MoneyConverter"
        ));
    }

    #[test]
    fn test_custom_factory_and_registration() {
        let mut source = ConfigSource::new();
        source.insert("cents", "CentsConverter");
        let store = ConverterStore::builder()
            .register_factory("CentsConverter", || {
                Arc::new(ScalarConverter::new("CentsConverter", SqlType::Int8))
            })
            .source(source)
            .register("label", Arc::new(ScalarConverter::new("LabelConverter", SqlType::Text)))
            .build()
            .unwrap();
        assert_eq!(store.lookup(&TypeKey::new("cents")).unwrap().sql_type(), SqlType::Int8);
        assert_eq!(store.lookup(&TypeKey::new("label")).unwrap().name(), "LabelConverter");
    }

    #[test]
    fn test_properties_syntax_errors() {
        assert!(matches!(
            ConfigSource::from_properties("json JsonTextConverter"),
            Err(Error::Config(_))
        ));
        assert!(matches!(ConfigSource::from_properties("json ="), Err(Error::Config(_))));
        assert!(matches!(
            ConfigSource::from_properties("money: StringConverter"),
            Err(Error::Config(_))
        ));
        assert!(ConfigSource::from_properties("! nothing here\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_null_binds_typed_null() {
        let store = store();
        let mut stmt = FakeStatement::default();
        store
            .lookup(&TypeKey::UUID)
            .unwrap()
            .set_parameter(&mut stmt, 1, Value::Null)
            .unwrap();
        assert_eq!(stmt.null_type(1), Some(SqlType::Uuid));
    }

    #[test]
    fn test_integer_values_widen() {
        let store = store();
        let mut stmt = FakeStatement::default();
        store
            .lookup(&TypeKey::INT64)
            .unwrap()
            .set_parameter(&mut stmt, 1, Value::Int32(7))
            .unwrap();
        assert_eq!(stmt.value(1), Some(&Value::Int64(7)));
    }

    #[test]
    fn test_narrowing_is_rejected() {
        let store = store();
        let mut stmt = FakeStatement::default();
        let err = store
            .lookup(&TypeKey::INT32)
            .unwrap()
            .set_parameter(&mut stmt, 1, Value::Int64(7))
            .unwrap_err();
        assert_eq!(err.to_string(), "Expected a int32 value, found int64");
    }

    #[test]
    fn test_json_text_round_trip() {
        let converter = JsonTextConverter;
        let doc = serde_json::json!({"tags": ["a", "b"], "n": 1});
        let mut stmt = FakeStatement::default();
        converter
            .set_parameter(&mut stmt, 1, Value::Json(doc.clone()))
            .unwrap();
        let stored = stmt.value(1).cloned().unwrap();
        assert!(matches!(stored, Value::String(_)));

        let row = FakeRow::new(vec![("doc", TypeKey::STRING, stored)]);
        assert_eq!(converter.get_column(&row, 1).unwrap(), Value::Json(doc));
    }

    #[test]
    fn test_properties_keys_keep_path_separators() {
        let source = ConfigSource::from_properties(
            "billing::Money = StringConverter\nurl = a=b\n",
        )
        .unwrap();
        let entries: Vec<_> = source.entries().collect();
        assert_eq!(
            entries,
            vec![("billing::Money", "StringConverter"), ("url", "a=b")]
        );
    }

    #[test]
    fn test_json_text_reads_native_json_columns() {
        let converter = JsonTextConverter;
        let doc = serde_json::json!({"ok": true});

        let row = FakeRow::new(vec![("doc", TypeKey::JSON, Value::Json(doc.clone()))]);
        assert_eq!(converter.get_column(&row, 1).unwrap(), Value::Json(doc.clone()));

        let mut stmt = FakeStatement::default();
        stmt.set_results(vec![Value::Json(doc.clone()), Value::String("[1]".into())]);
        assert_eq!(converter.get_out_parameter(&stmt, 1).unwrap(), Value::Json(doc));
        assert_eq!(
            converter.get_out_parameter(&stmt, 2).unwrap(),
            Value::Json(serde_json::json!([1]))
        );
    }
}
