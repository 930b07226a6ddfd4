//! Script values
//!
//! Only what frames need to reference: primitives, strings, tables,
//! script closures and named native functions. Heap objects are `Rc`
//! handles; the whole value graph belongs to one runtime and is `!Send`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::vm::closure::Closure;
use crate::vm::dispatch::{NativeCall, NativeResult};
use crate::vm::errors::{ScriptError, ThreadResult};

/// Shared table handle
pub type TableRef = Rc<RefCell<Table>>;

/// Shared closure handle
pub type ClosureRef = Rc<Closure>;

/// Signature of a host function callable from scripts
pub type NativeFn = dyn Fn(&mut NativeCall<'_>, Varargs) -> ThreadResult<NativeResult>;

/// Host function bound under a stable name
///
/// The name is what gets persisted; on load it is resolved against the
/// runtime's native registry.
#[derive(Clone)]
pub struct NativeFunction {
    name: Rc<str>,
    func: Rc<NativeFn>,
}

impl NativeFunction {
    /// Wrap a host function
    pub fn new<F>(
        name: &str,
        func: F,
    ) -> Self
    where
        F: Fn(&mut NativeCall<'_>, Varargs) -> ThreadResult<NativeResult> + 'static,
    {
        Self {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    /// Registered name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the function
    pub fn invoke(
        &self,
        call: &mut NativeCall<'_>,
        args: Varargs,
    ) -> ThreadResult<NativeResult> {
        let func = Rc::clone(&self.func);
        func(call, args)
    }

    /// Identity comparison
    pub fn ptr_eq(
        &self,
        other: &NativeFunction,
    ) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "native<{}>", self.name)
    }
}

/// Script value
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Table(TableRef),
    Closure(ClosureRef),
    Native(NativeFunction),
}

impl Value {
    /// Build a string value
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    /// Build a fresh empty table value
    pub fn new_table() -> Self {
        Value::Table(Rc::new(RefCell::new(Table::new())))
    }

    /// Name of the value's type, as scripts see it
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Closure(_) | Value::Native(_) => "function",
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except nil and false
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ClosureRef> {
        match self {
            Value::Closure(c) => Some(c),
            _ => None,
        }
    }

    /// Primitive equality for scalars, identity for heap objects
    pub fn raw_eq(
        &self,
        other: &Value,
    ) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// String form used by concatenation and debug output
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.to_string(),
            Value::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
            Value::Closure(c) => format!("function: {}", c.proto().name),
            Value::Native(n) => format!("function: builtin {}", n.name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.raw_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            // Tables may be cyclic
            Value::Table(t) => write!(f, "table@{:p}", Rc::as_ptr(t)),
            Value::Closure(c) => write!(f, "closure<{}>", c.proto().name),
            Value::Native(n) => write!(f, "{:?}", n),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<ClosureRef> for Value {
    fn from(c: ClosureRef) -> Self {
        Value::Closure(c)
    }
}

impl From<TableRef> for Value {
    fn from(t: TableRef) -> Self {
        Value::Table(t)
    }
}

impl From<NativeFunction> for Value {
    fn from(n: NativeFunction) -> Self {
        Value::Native(n)
    }
}

/// Argument/result list passed across call boundaries
#[derive(Clone, Default, PartialEq)]
pub struct Varargs(SmallVec<[Value; 4]>);

impl Varargs {
    /// The empty list
    #[inline]
    pub fn none() -> Self {
        Self(SmallVec::new())
    }

    pub fn from_vec(values: Vec<Value>) -> Self {
        Self(SmallVec::from_vec(values))
    }

    pub fn from_slice(values: &[Value]) -> Self {
        values.iter().cloned().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value at `index` (0-based), nil when absent
    pub fn get(
        &self,
        index: usize,
    ) -> Value {
        self.0.get(index).cloned().unwrap_or_default()
    }

    /// Everything from `start` (0-based) onwards
    pub fn subargs(
        &self,
        start: usize,
    ) -> Varargs {
        if start >= self.0.len() {
            return Varargs::none();
        }
        Self(self.0[start..].iter().cloned().collect())
    }

    pub fn push(
        &mut self,
        value: Value,
    ) {
        self.0.push(value);
    }

    /// Append another list
    pub fn concat(
        mut self,
        other: &Varargs,
    ) -> Varargs {
        self.0.extend(other.0.iter().cloned());
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }
}

impl fmt::Debug for Varargs {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl FromIterator<Value> for Varargs {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Varargs {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Hashable table key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
}

impl Key {
    pub fn str(s: &str) -> Self {
        Key::Str(Rc::from(s))
    }

    /// Convert a value into a key; integral floats normalize to ints
    pub fn from_value(value: &Value) -> Result<Key, ScriptError> {
        match value {
            Value::Bool(b) => Ok(Key::Bool(*b)),
            Value::Int(i) => Ok(Key::Int(*i)),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(Key::Int(*f as i64)),
            Value::Str(s) => Ok(Key::Str(Rc::clone(s))),
            other => Err(ScriptError::InvalidKey(other.type_name())),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Int(*i),
            Key::Str(s) => Value::Str(Rc::clone(s)),
        }
    }
}

/// Insertion-ordered table
///
/// Ordering keeps iteration, and therefore persisted output, deterministic.
#[derive(Debug, Default)]
pub struct Table {
    entries: IndexMap<Key, Value>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence `1..=n` of the given values plus the `n` field
    pub fn from_varargs(args: &Varargs) -> Self {
        let mut table = Table::new();
        for (i, value) in args.iter().enumerate() {
            table.set(Key::Int(i as i64 + 1), value.clone());
        }
        table.set(Key::str("n"), Value::Int(args.len() as i64));
        table
    }

    pub fn get(
        &self,
        key: &Key,
    ) -> Value {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    pub fn get_str(
        &self,
        key: &str,
    ) -> Value {
        self.get(&Key::str(key))
    }

    /// Assign; nil removes the entry
    pub fn set(
        &mut self,
        key: Key,
        value: Value,
    ) {
        if value.is_nil() {
            self.entries.shift_remove(&key);
        } else {
            self.entries.insert(key, value);
        }
    }

    pub fn set_str(
        &mut self,
        key: &str,
        value: impl Into<Value>,
    ) {
        self.set(Key::str(key), value.into());
    }

    /// Border of the array part
    pub fn len(&self) -> usize {
        let mut n = 0;
        while self.entries.contains_key(&Key::Int(n as i64 + 1)) {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, Key, Value> {
        self.entries.iter()
    }
}
