//! In-memory statement and row doubles plus sample beans for unit tests.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::bean::{Bean, BeanClass};
use crate::error::{ConversionError, Result};
use crate::statement::{CallableStatement, ResultRow, StatementHandle};
use crate::types::{SqlType, TypeKey, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Value(Value),
    Null(SqlType),
}

/// Records what the binder does; outputs are served from `results`.
#[derive(Debug, Default)]
pub struct FakeStatement {
    params: BTreeMap<usize, Bound>,
    outs: BTreeMap<usize, SqlType>,
    results: Vec<Value>,
}

impl FakeStatement {
    pub fn value(&self, index: usize) -> Option<&Value> {
        match self.params.get(&index) {
            Some(Bound::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn null_type(&self, index: usize) -> Option<SqlType> {
        match self.params.get(&index) {
            Some(Bound::Null(ty)) => Some(*ty),
            _ => None,
        }
    }

    pub fn out_type(&self, index: usize) -> Option<SqlType> {
        self.outs.get(&index).copied()
    }

    pub fn set_results(&mut self, results: Vec<Value>) {
        self.results = results;
    }

    /// Echoes the bound parameters back as a row, one column per parameter.
    pub fn into_row(self, labels: &[&str]) -> FakeRow {
        let columns = self
            .params
            .into_values()
            .zip(labels)
            .map(|(bound, label)| match bound {
                Bound::Value(v) => {
                    let key = v.sql_type().map(SqlType::type_key).unwrap_or(TypeKey::STRING);
                    (label.to_string(), key, v)
                }
                Bound::Null(ty) => (label.to_string(), ty.type_key(), Value::Null),
            })
            .collect();
        FakeRow { columns }
    }
}

impl StatementHandle for FakeStatement {
    fn set_value(&mut self, index: usize, value: Value) -> Result<()> {
        self.params.insert(index, Bound::Value(value));
        Ok(())
    }

    fn set_null(&mut self, index: usize, ty: SqlType) -> Result<()> {
        self.params.insert(index, Bound::Null(ty));
        Ok(())
    }
}

impl CallableStatement for FakeStatement {
    fn register_out(&mut self, index: usize, ty: SqlType) -> Result<()> {
        self.outs.insert(index, ty);
        Ok(())
    }

    fn get_out(&self, index: usize, ty: SqlType) -> Result<Value> {
        let value = self
            .results
            .get(index.wrapping_sub(1))
            .cloned()
            .ok_or_else(|| ConversionError::Output {
                index,
                reason: "no such output".into(),
            })?;
        check_type(index, &value, ty)?;
        Ok(value)
    }
}

/// A row whose decoding is as strict as the driver's: the requested type must
/// match the stored value.
#[derive(Debug, Clone)]
pub struct FakeRow {
    columns: Vec<(String, TypeKey, Value)>,
}

impl FakeRow {
    pub fn new(columns: Vec<(&str, TypeKey, Value)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(label, key, value)| (label.to_owned(), key, value))
                .collect(),
        }
    }

    fn column(&self, index: usize) -> Result<&(String, TypeKey, Value)> {
        self.columns
            .get(index.wrapping_sub(1))
            .ok_or_else(|| ConversionError::ColumnIndex { index }.into())
    }
}

impl ResultRow for FakeRow {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_type(&self, index: usize) -> Result<TypeKey> {
        Ok(self.column(index)?.1.clone())
    }

    fn column_label(&self, index: usize) -> Result<&str> {
        Ok(&self.column(index)?.0)
    }

    fn get_value(&self, index: usize, ty: SqlType) -> Result<Value> {
        let value = self.column(index)?.2.clone();
        check_type(index, &value, ty)?;
        Ok(value)
    }
}

fn check_type(index: usize, value: &Value, ty: SqlType) -> Result<()> {
    match value.sql_type() {
        Some(actual) if actual != ty => Err(ConversionError::Decode {
            index,
            message: format!("{actual:?} is not compatible with {ty:?}"),
        }
        .into()),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub age: i32,
    pub nickname: Option<String>,
    pub score: Option<i64>,
    pub label: Option<String>,
}

impl Bean for Person {
    fn class() -> &'static BeanClass<Self> {
        static CLASS: Lazy<BeanClass<Person>> = Lazy::new(|| {
            BeanClass::new("Person")
                .no_arg(Person::default)
                .constructor(|(id, name, age): (i64, String, i32)| Person {
                    id,
                    name,
                    age,
                    ..Person::default()
                })
                .getter("id", |p: &Person| p.id)
                .getter("name", |p: &Person| p.name.clone())
                .getter("age", |p: &Person| p.age)
                .getter("nickname", |p: &Person| p.nickname.clone())
                .getter("score", |p: &Person| p.score)
                .setter("set_id", |p: &mut Person, v: i64| p.id = v)
                .setter("set_name", |p: &mut Person, v: String| p.name = v)
                .setter("set_age", |p: &mut Person, v: i32| p.age = v)
                .setter("set_nickname", |p: &mut Person, v: Option<String>| p.nickname = v)
                .setter("set_score", |p: &mut Person, v: Option<i64>| p.score = v)
                .setter("set_label", |p: &mut Person, v: String| p.label = Some(v))
                .setter("set_label", |p: &mut Person, v: Option<i32>| {
                    p.label = v.map(|n| n.to_string())
                })
        });
        &CLASS
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transfer {
    pub account: i32,
    pub amount: i64,
    pub balance: Option<i64>,
}

impl Bean for Transfer {
    fn class() -> &'static BeanClass<Self> {
        static CLASS: Lazy<BeanClass<Transfer>> = Lazy::new(|| {
            BeanClass::new("Transfer")
                .no_arg(Transfer::default)
                .getter("account", |t: &Transfer| t.account)
                .getter("amount", |t: &Transfer| t.amount)
                .setter("set_amount", |t: &mut Transfer, v: i64| t.amount = v)
                .setter("set_balance", |t: &mut Transfer, v: Option<i64>| t.balance = v)
        });
        &CLASS
    }
}
