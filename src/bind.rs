use crate::bean::Bean;
use crate::converter::ConverterStore;
use crate::error::{Error, Result};
use crate::statement::{CallableStatement, StatementHandle};
use crate::template::ArgDescriptor;
use crate::types::Value;

/// Sets statement parameters from argument descriptors.
///
/// # Examples
///
/// ```
/// use sqlx_template_bind::bind::Binder;
/// use sqlx_template_bind::converter::ConverterStore;
/// use sqlx_template_bind::pg::PgStatement;
/// use sqlx_template_bind::template::{parse_template, ArgMode};
/// use sqlx_template_bind::Value;
///
/// let store = ConverterStore::with_defaults()?;
/// let parsed = parse_template("SELECT * FROM users WHERE id = #{int32}", ArgMode::Basic)?;
///
/// let mut stmt = PgStatement::new();
/// Binder::new(&store).bind_variadic(&mut stmt, &parsed.args, &[Value::Int32(42)], 1)?;
/// assert_eq!(stmt.len(), 1);
/// # Ok::<(), sqlx_template_bind::Error>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Binder<'s> {
    store: &'s ConverterStore,
}

impl<'s> Binder<'s> {
    pub fn new(store: &'s ConverterStore) -> Self {
        Self { store }
    }

    /// Binds `values[i]` at parameter `start + i`, using the converter named by
    /// each descriptor's type.
    pub fn bind_variadic<S>(
        &self,
        stmt: &mut S,
        args: &[ArgDescriptor],
        values: &[Value],
        start: usize,
    ) -> Result<()>
    where
        S: StatementHandle,
    {
        if args.len() != values.len() {
            return Err(crate::error::ConversionError::ArgumentCount {
                expected: args.len(),
                found: values.len(),
            }
            .into());
        }

        for (offset, (arg, value)) in args.iter().zip(values).enumerate() {
            let index = start + offset;
            let type_name = arg
                .type_name
                .as_deref()
                .ok_or_else(|| Error::Config(format!("argument {} has no type name", arg.index)))?;
            let converter = self
                .store
                .lookup_name(type_name)
                .map_err(|e| e.at_argument(index))?;
            tracing::trace!(index, converter = converter.name(), "binding value");
            converter
                .set_parameter(stmt, index, value.clone())
                .map_err(|e| e.at_argument(index))?;
        }
        Ok(())
    }

    /// Binds the result of each descriptor's getter on `source` at `start + i`.
    pub fn bind_from_source<T, S>(
        &self,
        stmt: &mut S,
        args: &[ArgDescriptor],
        source: &T,
        start: usize,
    ) -> Result<()>
    where
        T: Bean,
        S: StatementHandle,
    {
        for (offset, arg) in args.iter().enumerate() {
            let index = start + offset;
            let name = arg
                .getter
                .as_deref()
                .ok_or_else(|| Error::Config(format!("argument {} has no getter", arg.index)))?;
            self.bind_getter(stmt, index, name, source)?;
        }
        Ok(())
    }

    /// Binds inputs and declares outputs of a procedure call.
    ///
    /// The parameter number advances once per descriptor, whichever halves it
    /// has. Returns the number of declared outputs.
    pub fn bind_in_out<T, S>(
        &self,
        stmt: &mut S,
        args: &[ArgDescriptor],
        source: &T,
    ) -> Result<usize>
    where
        T: Bean,
        S: CallableStatement,
    {
        let mut index = 0;
        let mut outputs = 0;
        for arg in args {
            index += 1;
            if let Some(name) = arg.getter.as_deref() {
                self.bind_getter(stmt, index, name, source)?;
            }
            if let Some(name) = arg.setter.as_deref() {
                let setter = self
                    .store
                    .find_mutator_by_name::<T>(name)
                    .map_err(|e| e.at_argument(index))?;
                let converter = self
                    .store
                    .lookup(setter.param_type())
                    .map_err(|e| e.at_argument(index))?;
                tracing::trace!(index, converter = converter.name(), "declaring output");
                converter
                    .register_out_parameter(stmt, index)
                    .map_err(|e| e.at_argument(index))?;
                outputs += 1;
            }
        }
        Ok(outputs)
    }

    fn bind_getter<T, S>(&self, stmt: &mut S, index: usize, name: &str, source: &T) -> Result<()>
    where
        T: Bean,
        S: StatementHandle,
    {
        let getter = self
            .store
            .find_accessor::<T>(name)
            .map_err(|e| e.at_argument(index))?;
        let converter = self
            .store
            .lookup(getter.return_type())
            .map_err(|e| e.at_argument(index))?;
        tracing::trace!(index, getter = name, converter = converter.name(), "binding value");
        converter
            .set_parameter(stmt, index, getter.invoke(source))
            .map_err(|e| e.at_argument(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConversionError;
    use crate::materialize::populate_from_outputs;
    use crate::template::{parse_template, ArgMode};
    use crate::testing::{FakeStatement, Person, Transfer};
    use crate::types::{SqlType, TypeKey};

    fn store() -> ConverterStore {
        ConverterStore::with_defaults().unwrap()
    }

    #[test]
    fn test_bind_variadic_in_order() {
        let store = store();
        let parsed = parse_template(
            "INSERT INTO t VALUES (#{int32}, #{string}, #{boolean})",
            ArgMode::Basic,
        )
        .unwrap();
        let mut stmt = FakeStatement::default();
        Binder::new(&store)
            .bind_variadic(
                &mut stmt,
                &parsed.args,
                &[Value::Int32(1), "two".into(), Value::Bool(true)],
                1,
            )
            .unwrap();
        assert_eq!(stmt.value(1), Some(&Value::Int32(1)));
        assert_eq!(stmt.value(2), Some(&Value::String("two".into())));
        assert_eq!(stmt.value(3), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_bind_variadic_start_index() {
        let store = store();
        let parsed =
            parse_template("SELECT f(#{refcursor}, #{int64})", ArgMode::RefCursor).unwrap();
        let mut stmt = FakeStatement::default();
        Binder::new(&store)
            .bind_variadic(&mut stmt, &parsed.args[1..], &[Value::Int64(5)], 2)
            .unwrap();
        assert_eq!(stmt.value(1), None);
        assert_eq!(stmt.value(2), Some(&Value::Int64(5)));
    }

    #[test]
    fn test_bind_variadic_null_is_typed() {
        let store = store();
        let parsed = parse_template("SELECT #{timestamptz}", ArgMode::Basic).unwrap();
        let mut stmt = FakeStatement::default();
        Binder::new(&store)
            .bind_variadic(&mut stmt, &parsed.args, &[Value::Null], 1)
            .unwrap();
        assert_eq!(stmt.null_type(1), Some(SqlType::TimestampTz));
    }

    #[test]
    fn test_bind_variadic_length_mismatch() {
        let store = store();
        let parsed = parse_template("SELECT #{int32}, #{int32}", ArgMode::Basic).unwrap();
        let mut stmt = FakeStatement::default();
        let err = Binder::new(&store)
            .bind_variadic(&mut stmt, &parsed.args, &[Value::Int32(1)], 1)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conversion(ConversionError::ArgumentCount { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_bind_variadic_unknown_type_reports_position() {
        let store = store();
        let parsed = parse_template("SELECT #{int32}, #{money}", ArgMode::Basic).unwrap();
        let mut stmt = FakeStatement::default();
        let err = Binder::new(&store)
            .bind_variadic(&mut stmt, &parsed.args, &[Value::Int32(1), Value::Int32(2)], 1)
            .unwrap_err();
        match err {
            Error::Argument { index, source } => {
                assert_eq!(index, 2);
                assert!(matches!(
                    *source,
                    Error::Conversion(ConversionError::NoConverter(ref key))
                        if key == &TypeKey::new("money")
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bind_from_source_uses_getter_types() {
        let store = store();
        let parsed = parse_template(
            "UPDATE people SET name = #{name}, age = #{age}, nickname = #{nickname} \
             WHERE id = #{id}",
            ArgMode::Bean,
        )
        .unwrap();
        let person = Person {
            id: 7,
            name: "Ann".into(),
            age: 41,
            ..Person::default()
        };
        let mut stmt = FakeStatement::default();
        Binder::new(&store)
            .bind_from_source(&mut stmt, &parsed.args, &person, 1)
            .unwrap();
        assert_eq!(stmt.value(1), Some(&Value::String("Ann".into())));
        assert_eq!(stmt.value(2), Some(&Value::Int32(41)));
        assert_eq!(stmt.null_type(3), Some(SqlType::Text));
        assert_eq!(stmt.value(4), Some(&Value::Int64(7)));
    }

    #[test]
    fn test_bind_from_source_missing_getter() {
        let store = store();
        let parsed = parse_template("SELECT #{id}, #{email}", ArgMode::Bean).unwrap();
        let mut stmt = FakeStatement::default();
        let err = Binder::new(&store)
            .bind_from_source(&mut stmt, &parsed.args, &Person::default(), 1)
            .unwrap_err();
        assert!(matches!(err, Error::Argument { index: 2, .. }));
        assert!(err.is_conversion());
    }

    #[test]
    fn test_in_out_index_discipline() {
        let store = store();
        let parsed = parse_template(
            "CALL transfer(#{account}, #{/set_balance}, #{amount/set_amount})",
            ArgMode::InOut,
        )
        .unwrap();
        let mut transfer = Transfer {
            account: 3,
            amount: 250,
            ..Transfer::default()
        };

        let mut stmt = FakeStatement::default();
        let outputs = Binder::new(&store)
            .bind_in_out(&mut stmt, &parsed.args, &transfer)
            .unwrap();
        assert_eq!(outputs, 2);

        // absolute positions: IN at 1, OUT at 2, INOUT at 3
        assert_eq!(stmt.value(1), Some(&Value::Int32(3)));
        assert_eq!(stmt.value(2), None);
        assert_eq!(stmt.out_type(2), Some(SqlType::Int8));
        assert_eq!(stmt.value(3), Some(&Value::Int64(250)));
        assert_eq!(stmt.out_type(3), Some(SqlType::Int8));
        assert_eq!(stmt.out_type(1), None);

        // outputs come back numbered 1 and 2
        stmt.set_results(vec![Value::Int64(750), Value::Int64(240)]);
        populate_from_outputs(&store, &stmt, &parsed.args, &mut transfer).unwrap();
        assert_eq!(transfer.balance, Some(750));
        assert_eq!(transfer.amount, 240);
    }

    #[test]
    fn test_in_out_unknown_setter() {
        let store = store();
        let parsed = parse_template("CALL p(#{account/set_missing})", ArgMode::InOut).unwrap();
        let mut stmt = FakeStatement::default();
        let err = Binder::new(&store)
            .bind_in_out(&mut stmt, &parsed.args, &Transfer::default())
            .unwrap_err();
        assert!(matches!(err, Error::Argument { index: 1, .. }));
    }
}
