//! Named accessors, mutators and constructors for host types.
//!
//! This is the only place where members are looked up by name at runtime. A
//! type opts in by implementing [`Bean`] and describing itself once:
//!
//! ```
//! use once_cell::sync::Lazy;
//! use sqlx_template_bind::bean::{Bean, BeanClass};
//!
//! #[derive(Default)]
//! struct User {
//!     id: i32,
//!     name: Option<String>,
//! }
//!
//! impl Bean for User {
//!     fn class() -> &'static BeanClass<Self> {
//!         static CLASS: Lazy<BeanClass<User>> = Lazy::new(|| {
//!             BeanClass::new("User")
//!                 .no_arg(User::default)
//!                 .constructor(|(id, name): (i32, Option<String>)| User { id, name })
//!                 .getter("id", |u: &User| u.id)
//!                 .getter("name", |u: &User| u.name.clone())
//!                 .setter("set_id", |u: &mut User, v: i32| u.id = v)
//!                 .setter("set_name", |u: &mut User, v: Option<String>| u.name = v)
//!         });
//!         &CLASS
//!     }
//! }
//! ```

use crate::error::{ConversionError, Result};
use crate::types::{PrimitiveTable, SqlScalar, TypeKey, Value};

/// A type with a static description of its members.
pub trait Bean: Sized + 'static {
    fn class() -> &'static BeanClass<Self>;
}

type GetFn<T> = Box<dyn Fn(&T) -> Value + Send + Sync>;
type SetFn<T> = Box<dyn Fn(&mut T, Value) -> Result<()> + Send + Sync>;
type BuildFn<T> = Box<dyn Fn(Vec<Value>) -> Result<T> + Send + Sync>;
type NewFn<T> = Box<dyn Fn() -> T + Send + Sync>;

pub struct Getter<T> {
    name: String,
    return_type: TypeKey,
    get: GetFn<T>,
}

impl<T> Getter<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> &TypeKey {
        &self.return_type
    }

    pub fn invoke(&self, target: &T) -> Value {
        (self.get)(target)
    }
}

pub struct Setter<T> {
    name: String,
    param_type: TypeKey,
    set: SetFn<T>,
}

impl<T> Setter<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_type(&self) -> &TypeKey {
        &self.param_type
    }

    pub fn invoke(&self, target: &mut T, value: Value) -> Result<()> {
        (self.set)(target, value)
    }
}

pub struct Constructor<T> {
    param_types: Vec<TypeKey>,
    build: BuildFn<T>,
}

impl<T> Constructor<T> {
    pub fn param_types(&self) -> &[TypeKey] {
        &self.param_types
    }

    pub fn invoke(&self, values: Vec<Value>) -> Result<T> {
        (self.build)(values)
    }
}

/// Constructor argument lists: tuples of up to eight [`SqlScalar`]s.
pub trait CtorArgs: Sized {
    fn types() -> Vec<TypeKey>;

    fn from_values(values: Vec<Value>) -> Result<Self>;
}

macro_rules! impl_ctor_args {
    ($($arg:ident),+) => {
        impl<$($arg: SqlScalar),+> CtorArgs for ($($arg,)+) {
            fn types() -> Vec<TypeKey> {
                vec![$($arg::TYPE),+]
            }

            fn from_values(values: Vec<Value>) -> Result<Self> {
                let expected = [$(stringify!($arg)),+].len();
                if values.len() != expected {
                    return Err(ConversionError::ArgumentCount {
                        expected,
                        found: values.len(),
                    }
                    .into());
                }
                let mut values = values.into_iter().enumerate();
                Ok(($({
                    let (i, value) = values.next().unwrap_or((expected, Value::Null));
                    $arg::from_value(value).map_err(|e| e.at_argument(i + 1))?
                },)+))
            }
        }
    };
}

impl_ctor_args!(A);
impl_ctor_args!(A, B);
impl_ctor_args!(A, B, C);
impl_ctor_args!(A, B, C, D);
impl_ctor_args!(A, B, C, D, E);
impl_ctor_args!(A, B, C, D, E, F);
impl_ctor_args!(A, B, C, D, E, F, G);
impl_ctor_args!(A, B, C, D, E, F, G, H);

/// Member table of a [`Bean`].
pub struct BeanClass<T> {
    name: &'static str,
    getters: Vec<Getter<T>>,
    setters: Vec<Setter<T>>,
    constructors: Vec<Constructor<T>>,
    no_arg: Option<NewFn<T>>,
}

impl<T: 'static> BeanClass<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            getters: Vec::new(),
            setters: Vec::new(),
            constructors: Vec::new(),
            no_arg: None,
        }
    }

    pub fn getter<V, F>(mut self, name: &str, get: F) -> Self
    where
        V: SqlScalar,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.getters.push(Getter {
            name: name.to_owned(),
            return_type: V::TYPE,
            get: Box::new(move |target| get(target).into_value()),
        });
        self
    }

    /// Adds a mutator; several mutators may share a name if their types differ.
    pub fn setter<V, F>(mut self, name: &str, set: F) -> Self
    where
        V: SqlScalar,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.setters.push(Setter {
            name: name.to_owned(),
            param_type: V::TYPE,
            set: Box::new(move |target, value| {
                set(target, V::from_value(value)?);
                Ok(())
            }),
        });
        self
    }

    pub fn constructor<A, F>(mut self, build: F) -> Self
    where
        A: CtorArgs,
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        self.constructors.push(Constructor {
            param_types: A::types(),
            build: Box::new(move |values| A::from_values(values).map(&build)),
        });
        self
    }

    pub fn no_arg<F>(mut self, new: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.no_arg = Some(Box::new(new));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn find_getter(&self, name: &str) -> Option<&Getter<T>> {
        self.getters.iter().find(|g| g.name == name)
    }

    /// First mutator called `name`, whatever its parameter type.
    pub fn find_setter_by_name(&self, name: &str) -> Option<&Setter<T>> {
        self.setters.iter().find(|s| s.name == name)
    }

    /// Mutator `name(param)`, or `name(counterpart)` when `param` is one half
    /// of a primitive/wrapper pair and no exact overload exists.
    pub fn find_setter(
        &self,
        name: &str,
        param: &TypeKey,
        primitives: &PrimitiveTable,
    ) -> Option<&Setter<T>> {
        let named = |ty: &TypeKey| {
            self.setters
                .iter()
                .find(|s| s.name == name && &s.param_type == ty)
        };
        named(param).or_else(|| named(primitives.counterpart(param)?))
    }

    /// Constructor whose parameters match `types`, exact signatures first.
    ///
    /// Columns always report wrapper keys (`int32`), while a constructor may
    /// declare the primitive (`i32`). When no signature matches exactly, a
    /// parameter also matches the primitive/wrapper counterpart of its column
    /// type. A NULL reaching a primitive parameter then fails at invocation.
    pub fn find_constructor(
        &self,
        types: &[TypeKey],
        primitives: &PrimitiveTable,
    ) -> Option<&Constructor<T>> {
        let arity = |c: &&Constructor<T>| c.param_types.len() == types.len();
        self.constructors
            .iter()
            .filter(arity)
            .find(|c| c.param_types == types)
            .or_else(|| {
                self.constructors.iter().filter(arity).find(|c| {
                    c.param_types
                        .iter()
                        .zip(types)
                        .all(|(p, t)| p == t || primitives.counterpart(t) == Some(p))
                })
            })
    }

    /// Creates an instance through the no-argument constructor.
    pub fn instantiate(&self) -> Result<T> {
        match &self.no_arg {
            Some(new) => Ok(new()),
            None => Err(ConversionError::NoDefaultConstructor { class: self.name }.into()),
        }
    }

    pub fn has_no_arg(&self) -> bool {
        self.no_arg.is_some()
    }
}

/// Mutator name for a column label: `user_name`, `userName` and `UserName`
/// all map to `set_user_name`.
pub fn mutator_name(label: &str) -> String {
    let mut name = String::from("set_");
    let mut prev: Option<char> = None;
    for c in label.trim().chars() {
        if c == ' ' || c == '-' || c == '_' {
            if !name.ends_with('_') {
                name.push('_');
            }
        } else if c.is_uppercase() {
            let boundary = prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit());
            if boundary && !name.ends_with('_') {
                name.push('_');
            }
            name.extend(c.to_lowercase());
        } else {
            name.push(c);
        }
        prev = Some(c);
    }
    name
}
