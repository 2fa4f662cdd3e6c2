//! Turning result rows into values.
//!
//! A [`RowShape`] is planned once from the first row's column metadata and then
//! applied to every row of the same result set.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bean::{mutator_name, Bean, BeanClass, Constructor, Setter};
use crate::converter::{Converter, ConverterStore};
use crate::error::{ConversionError, Error, Result};
use crate::statement::{CallableStatement, ResultRow};
use crate::template::ArgDescriptor;
use crate::types::{SqlScalar, TypeKey, Value};

/// How a row is mapped onto the target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStyle {
    /// Constructor whose parameters match the column types.
    GuessConstructor,
    /// `set_<label>` mutators taking the column types.
    #[default]
    GuessSetters,
    /// Constructor whose parameters are the type names given as column labels.
    SpecifyConstructor,
    /// Mutators named by the column labels.
    SpecifySetters,
    /// The single column's value.
    Scalar,
}

impl FromStr for ResultStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "guess_constructor" => Ok(ResultStyle::GuessConstructor),
            "guess_setters" => Ok(ResultStyle::GuessSetters),
            "specify_constructor" => Ok(ResultStyle::SpecifyConstructor),
            "specify_setters" => Ok(ResultStyle::SpecifySetters),
            "scalar" => Ok(ResultStyle::Scalar),
            _ => Err(Error::Config(format!("invalid result style '{s}'"))),
        }
    }
}

/// Label and host type of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub label: String,
    pub type_key: TypeKey,
}

pub fn column_metadata<R: ResultRow>(row: &R) -> Result<Vec<ColumnMeta>> {
    (1..=row.column_count())
        .map(|index| {
            Ok(ColumnMeta {
                label: row.column_label(index)?.to_owned(),
                type_key: row.column_type(index)?,
            })
        })
        .collect()
}

/// Plan for building one value from one row.
pub enum RowShape<T: 'static> {
    Constructor {
        constructor: &'static Constructor<T>,
        converters: Vec<Arc<dyn Converter>>,
    },
    Setters {
        class: &'static BeanClass<T>,
        setters: Vec<(&'static Setter<T>, Arc<dyn Converter>)>,
    },
    Scalar {
        converter: Arc<dyn Converter>,
        extract: fn(Value) -> Result<T>,
    },
}

/// Signature shared by [`build_shape`] and [`build_scalar_shape`].
pub type ShapeFn<T> = fn(&ConverterStore, &[ColumnMeta], ResultStyle) -> Result<RowShape<T>>;

/// Plans how to build a `T` from rows with the given columns.
pub fn build_shape<T: Bean>(
    store: &ConverterStore,
    columns: &[ColumnMeta],
    style: ResultStyle,
) -> Result<RowShape<T>> {
    let class = T::class();
    match style {
        ResultStyle::GuessConstructor => {
            let types: Vec<_> = columns.iter().map(|c| c.type_key.clone()).collect();
            constructor_shape(store, class, types)
        }
        ResultStyle::SpecifyConstructor => {
            let types = columns
                .iter()
                .map(|c| store.primitives().resolve_name(&c.label))
                .collect();
            constructor_shape(store, class, types)
        }
        ResultStyle::GuessSetters => {
            require_no_arg(class)?;
            let setters = columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    let setter = store
                        .find_mutator::<T>(&mutator_name(&column.label), &column.type_key)
                        .map_err(|e| e.at_argument(i + 1))?;
                    let converter = store
                        .lookup(&column.type_key)
                        .map_err(|e| e.at_argument(i + 1))?;
                    Ok((setter, converter))
                })
                .collect::<Result<_>>()?;
            Ok(RowShape::Setters { class, setters })
        }
        ResultStyle::SpecifySetters => {
            require_no_arg(class)?;
            let setters = columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    let setter = store
                        .find_mutator_by_name::<T>(column.label.trim())
                        .map_err(|e| e.at_argument(i + 1))?;
                    let converter = store
                        .lookup(setter.param_type())
                        .map_err(|e| e.at_argument(i + 1))?;
                    Ok((setter, converter))
                })
                .collect::<Result<_>>()?;
            Ok(RowShape::Setters { class, setters })
        }
        ResultStyle::Scalar => Err(Error::Config(format!(
            "{} is not a scalar type; scalar results need a scalar target",
            class.name()
        ))),
    }
}

/// Plans a single-column result read straight into `V`.
///
/// The column is decoded as the type it reports and must be exactly `V` or
/// `Option<V>`; an `int4` column does not widen into `i64`.
pub fn build_scalar_shape<V: SqlScalar + 'static>(
    store: &ConverterStore,
    columns: &[ColumnMeta],
) -> Result<RowShape<V>> {
    let [column] = columns else {
        return Err(ConversionError::ScalarColumnCount(columns.len()).into());
    };
    Ok(RowShape::Scalar {
        converter: store.lookup(&column.type_key)?,
        extract: V::from_value,
    })
}

pub(crate) fn scalar_shape_fn<V: SqlScalar + 'static>(
    store: &ConverterStore,
    columns: &[ColumnMeta],
    _style: ResultStyle,
) -> Result<RowShape<V>> {
    build_scalar_shape(store, columns)
}

fn constructor_shape<T: Bean>(
    store: &ConverterStore,
    class: &'static BeanClass<T>,
    types: Vec<TypeKey>,
) -> Result<RowShape<T>> {
    let constructor = class
        .find_constructor(&types, store.primitives())
        .ok_or_else(|| ConversionError::NoConstructor {
            class: class.name(),
            types: types.clone(),
        })?;
    let converters = types
        .iter()
        .enumerate()
        .map(|(i, key)| store.lookup(key).map_err(|e| e.at_argument(i + 1)))
        .collect::<Result<_>>()?;
    Ok(RowShape::Constructor {
        constructor,
        converters,
    })
}

fn require_no_arg<T: 'static>(class: &BeanClass<T>) -> Result<()> {
    if class.has_no_arg() {
        Ok(())
    } else {
        Err(ConversionError::NoDefaultConstructor { class: class.name() }.into())
    }
}

impl<T: 'static> RowShape<T> {
    pub fn materialize_row<R: ResultRow>(&self, row: &R) -> Result<T> {
        match self {
            RowShape::Constructor {
                constructor,
                converters,
            } => {
                let values = converters
                    .iter()
                    .enumerate()
                    .map(|(i, converter)| converter.get_column(row, i + 1))
                    .collect::<Result<Vec<_>>>()?;
                constructor.invoke(values)
            }
            RowShape::Setters { class, setters } => {
                let mut target = class.instantiate()?;
                for (i, (setter, converter)) in setters.iter().enumerate() {
                    let value = converter.get_column(row, i + 1)?;
                    setter
                        .invoke(&mut target, value)
                        .map_err(|e| e.at_argument(i + 1))?;
                }
                Ok(target)
            }
            RowShape::Scalar { converter, extract } => extract(converter.get_column(row, 1)?),
        }
    }

    pub fn column_count(&self) -> usize {
        match self {
            RowShape::Constructor { converters, .. } => converters.len(),
            RowShape::Setters { setters, .. } => setters.len(),
            RowShape::Scalar { .. } => 1,
        }
    }
}

impl<T: 'static> fmt::Debug for RowShape<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowShape::Constructor {
                constructor,
                converters,
            } => f
                .debug_struct("Constructor")
                .field("params", &constructor.param_types())
                .field("converters", converters)
                .finish(),
            RowShape::Setters { class, setters } => f
                .debug_struct("Setters")
                .field("class", &class.name())
                .field(
                    "setters",
                    &setters.iter().map(|(s, _)| s.name()).collect::<Vec<_>>(),
                )
                .finish(),
            RowShape::Scalar { converter, .. } => f.debug_tuple("Scalar").field(converter).finish(),
        }
    }
}

/// Materializes every row with one shape planned from the first row.
///
/// An empty result yields an empty vector without planning anything.
pub fn materialize_rows<T: 'static, R: ResultRow>(
    store: &ConverterStore,
    rows: &[R],
    style: ResultStyle,
    build: ShapeFn<T>,
) -> Result<Vec<T>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let shape = build(store, &column_metadata(first)?, style)?;
    tracing::debug!(rows = rows.len(), ?shape, "materializing rows");
    rows.iter().map(|row| shape.materialize_row(row)).collect()
}

/// Copies output parameters of an executed call into `target`.
///
/// Outputs are numbered among the descriptors that declared one, not by
/// absolute parameter position.
pub fn populate_from_outputs<T, S>(
    store: &ConverterStore,
    stmt: &S,
    args: &[ArgDescriptor],
    target: &mut T,
) -> Result<()>
where
    T: Bean,
    S: CallableStatement,
{
    let mut output = 0;
    for arg in args {
        let Some(name) = arg.setter.as_deref() else {
            continue;
        };
        output += 1;
        let setter = store
            .find_mutator_by_name::<T>(name)
            .map_err(|e| e.at_argument(arg.index))?;
        let converter = store
            .lookup(setter.param_type())
            .map_err(|e| e.at_argument(arg.index))?;
        let value = converter
            .get_out_parameter(stmt, output)
            .map_err(|e| e.at_argument(arg.index))?;
        setter
            .invoke(target, value)
            .map_err(|e| e.at_argument(arg.index))?;
    }
    Ok(())
}
