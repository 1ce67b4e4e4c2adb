//! Runtime values and the heap they live on.
//!
//! Scalars (`Int`/`Float`/`Bool`/`Nil`) and references to the enclosing
//! `function`/`Frame` are inline and `Copy`-cheap to clone; everything
//! mutable or large (`Str`, `Array`, `Table`, `Instance`) is addressed
//! through a [`Handle`] into the [`crate::vm::gc::Gc`] slab: heap values
//! are allocated in a slab indexed by a handle, never exposed as raw
//! pointers across the public API.
//!
//! `Function`/`NativeFunction` are *not* heap-tracked: only strings,
//! arrays, tables, and instances get constructed as heap objects, so
//! lambda and native-function values are cheap `Rc` clones outside the
//! GC's mark-and-sweep entirely (see DESIGN.md).

use std::fmt;
use std::rc::Rc;

use crate::common::ast::Param;
use crate::common::frame::Frame;
use crate::error::RuntimeError;
use crate::vm::context::Binding;
use crate::vm::vm::VM;

/// A non-owning index into the [`crate::vm::gc::Gc`] slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub usize);

/// Natives that allocate (arrays, strings) need access to the VM's
/// [`crate::vm::gc::Gc`], so the VM itself is threaded through.
pub type NativeFn = dyn Fn(&mut VM, &[Value]) -> Result<Value, RuntimeError>;

#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Str(Handle),
    Array(Handle),
    Table(Handle),
    Instance(Handle),
    /// Resolved by name in the current context chain, never by address
    /// (see DESIGN.md for the rejected address-based alternative).
    Reference(String),
    Function(Rc<Frame>),
    NativeFunction { name: String, func: Rc<NativeFn> },
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Nil => "nil",
            Value::Str(_) => "str",
            Value::Array(_) => "array",
            Value::Table(_) => "table",
            Value::Instance(_) => "instance",
            Value::Reference(_) => "ref",
            Value::Function(_) => "function",
            Value::NativeFunction { .. } => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Nil => false,
            _ => true,
        }
    }

    pub fn params(&self) -> Option<&[Param]> {
        match self {
            Value::Function(frame) => Some(&frame.params),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Nil => write!(f, "Nil"),
            Value::Str(h) => write!(f, "Str({:?})", h),
            Value::Array(h) => write!(f, "Array({:?})", h),
            Value::Table(h) => write!(f, "Table({:?})", h),
            Value::Instance(h) => write!(f, "Instance({:?})", h),
            Value::Reference(n) => write!(f, "Reference({n})"),
            Value::Function(_) => write!(f, "Function(..)"),
            Value::NativeFunction { name, .. } => write!(f, "NativeFunction({name})"),
        }
    }
}

/// What a heap slot holds. Every variant here is reachable only through a
/// [`Handle`]; the slab in `Gc` owns the data outright.
#[derive(Debug, Clone)]
pub enum HeapData {
    Str(String),
    Array(Vec<Value>),
    Table(Vec<(Value, Value)>),
    /// A class instance's flattened member bindings (fields and methods
    /// alike — see `vm::vm::VM::new_instance`). Never chained to an
    /// enclosing scope: an instance is detached at construction, realized
    /// by simply never storing a parent link here at all.
    Instance(std::collections::HashMap<String, Binding>),
}
