//! What the binder and materializer need from a driver.
//!
//! Parameter and column numbers are 1-based throughout. Executing, advancing a
//! cursor and closing handles belong to the command layer, which drives the
//! driver asynchronously around these synchronous hooks.

use crate::error::Result;
use crate::types::{SqlType, TypeKey, Value};

/// A statement whose positional parameters can be set.
pub trait StatementHandle {
    fn set_value(&mut self, index: usize, value: Value) -> Result<()>;

    fn set_null(&mut self, index: usize, ty: SqlType) -> Result<()>;
}

/// A procedure call with output parameters.
///
/// `register_out` takes the absolute parameter number; `get_out` takes the
/// position among declared outputs, which is how the server returns them.
pub trait CallableStatement: StatementHandle {
    fn register_out(&mut self, index: usize, ty: SqlType) -> Result<()>;

    fn get_out(&self, index: usize, ty: SqlType) -> Result<Value>;
}

/// One row of a result set, with its column metadata.
pub trait ResultRow {
    fn column_count(&self) -> usize;

    /// Registry key of the host type the column decodes to.
    fn column_type(&self, index: usize) -> Result<TypeKey>;

    fn column_label(&self, index: usize) -> Result<&str>;

    fn get_value(&self, index: usize, ty: SqlType) -> Result<Value>;
}
