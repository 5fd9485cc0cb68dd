//! Dynamically typed story values
//!
//! Values flow through the evaluation stack, temporaries, globals and
//! external function calls. Arithmetic follows ink's promotion rules:
//! booleans act as integers, any float operand promotes to float and a
//! string operand turns `+` into concatenation.

use crate::types::list::ListValue;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    List(ListValue),
    /// Address of a container, produced by `-> knot` used as a value.
    Divert(u32),
    /// Reference to a variable, produced for `ref` parameters. `frame` is the
    /// call frame holding the temporary, or none for a global.
    Pointer { name: String, frame: Option<usize> },
}

/// Kind tag used for type checks and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    None,
    Bool,
    Int,
    Float,
    String,
    List,
    Divert,
    Pointer,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::None => "none",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Divert => "divert",
            ValueKind::Pointer => "pointer",
        };
        f.write_str(name)
    }
}

impl ValueKind {
    fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Bool | ValueKind::Int | ValueKind::Float)
    }

    /// Whether a variable declared as `self` may hold a value of kind `other`.
    pub fn accepts(self, other: ValueKind) -> bool {
        self == other || (self.is_numeric() && other.is_numeric()) || self == ValueKind::None
    }
}

/// Pair of numeric operands after promotion.
enum Numbers {
    Ints(i32, i32),
    Floats(f32, f32),
}

/// Operation failure; the runner attaches the instruction pointer.
pub type OpResult<T> = std::result::Result<T, String>;

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::None => ValueKind::None,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Divert(_) => ValueKind::Divert,
            Value::Pointer { .. } => ValueKind::Pointer,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(list) => !list.is_empty(),
            Value::Divert(_) | Value::Pointer { .. } => true,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Bool(b) => Some(*b as i32),
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i32),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Bool(b) => Some(*b as i32 as f32),
            Value::Int(i) => Some(*i as f32),
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

    pub fn as_list(&self) -> Option<&ListValue> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Converts a value assigned to a variable declared as `declared`, so the
    /// variable keeps its declared kind. Floats assigned to int variables are
    /// truncated like `INT()`.
    pub(crate) fn coerce_to(self, declared: ValueKind) -> Value {
        match (declared, &self) {
            (ValueKind::Int, Value::Bool(b)) => Value::Int(*b as i32),
            (ValueKind::Int, Value::Float(f)) => Value::Int(*f as i32),
            (ValueKind::Float, Value::Int(i)) => Value::Float(*i as f32),
            (ValueKind::Float, Value::Bool(b)) => Value::Float(*b as i32 as f32),
            (ValueKind::Bool, Value::Int(i)) => Value::Bool(*i != 0),
            (ValueKind::Bool, Value::Float(f)) => Value::Bool(*f != 0.0),
            _ => self,
        }
    }

    fn numbers(lhs: &Value, rhs: &Value) -> Option<Numbers> {
        match (lhs, rhs) {
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                Some(Numbers::Floats(lhs.as_float()?, rhs.as_float()?))
            }
            _ => Some(Numbers::Ints(lhs.as_int()?, rhs.as_int()?)),
        }
    }

    fn mismatch(op: &str, lhs: &Value, rhs: &Value) -> String {
        format!("cannot apply '{op}' to {} and {}", lhs.kind(), rhs.kind())
    }

    pub fn add(&self, rhs: &Value) -> OpResult<Value> {
        match (self, rhs) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{self}{rhs}"))),
            (Value::List(a), Value::List(b)) => Ok(Value::List(a.union(b))),
            (Value::List(a), other) => match other.as_int() {
                Some(n) => Ok(Value::List(a.shift(n))),
                None => Err(Self::mismatch("+", self, rhs)),
            },
            _ => match Self::numbers(self, rhs) {
                Some(Numbers::Ints(a, b)) => Ok(Value::Int(a.wrapping_add(b))),
                Some(Numbers::Floats(a, b)) => Ok(Value::Float(a + b)),
                None => Err(Self::mismatch("+", self, rhs)),
            },
        }
    }

    pub fn sub(&self, rhs: &Value) -> OpResult<Value> {
        match (self, rhs) {
            (Value::List(a), Value::List(b)) => Ok(Value::List(a.difference(b))),
            (Value::List(a), other) => match other.as_int() {
                Some(n) => Ok(Value::List(a.shift(-n))),
                None => Err(Self::mismatch("-", self, rhs)),
            },
            _ => match Self::numbers(self, rhs) {
                Some(Numbers::Ints(a, b)) => Ok(Value::Int(a.wrapping_sub(b))),
                Some(Numbers::Floats(a, b)) => Ok(Value::Float(a - b)),
                None => Err(Self::mismatch("-", self, rhs)),
            },
        }
    }

    pub fn mul(&self, rhs: &Value) -> OpResult<Value> {
        match Self::numbers(self, rhs) {
            Some(Numbers::Ints(a, b)) => Ok(Value::Int(a.wrapping_mul(b))),
            Some(Numbers::Floats(a, b)) => Ok(Value::Float(a * b)),
            None => Err(Self::mismatch("*", self, rhs)),
        }
    }

    pub fn div(&self, rhs: &Value) -> OpResult<Value> {
        match Self::numbers(self, rhs) {
            Some(Numbers::Ints(_, 0)) => Err("integer division by zero".to_string()),
            Some(Numbers::Ints(a, b)) => Ok(Value::Int(a.wrapping_div(b))),
            Some(Numbers::Floats(a, b)) => Ok(Value::Float(a / b)),
            None => Err(Self::mismatch("/", self, rhs)),
        }
    }

    pub fn rem(&self, rhs: &Value) -> OpResult<Value> {
        match Self::numbers(self, rhs) {
            Some(Numbers::Ints(_, 0)) => Err("integer modulo by zero".to_string()),
            Some(Numbers::Ints(a, b)) => Ok(Value::Int(a.wrapping_rem(b))),
            Some(Numbers::Floats(a, b)) => Ok(Value::Float(a % b)),
            None => Err(Self::mismatch("%", self, rhs)),
        }
    }

    pub fn equals(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Divert(a), Value::Divert(b)) => a == b,
            (Value::Pointer { .. }, Value::Pointer { .. }) => self == rhs,
            (Value::None, Value::None) => true,
            _ => match Self::numbers(self, rhs) {
                Some(Numbers::Ints(a, b)) => a == b,
                Some(Numbers::Floats(a, b)) => a == b,
                None => false,
            },
        }
    }

    fn compare(&self, rhs: &Value, op: &str) -> OpResult<bool> {
        if let (Value::List(a), Value::List(b)) = (self, rhs) {
            return Ok(match op {
                "<" => a.less_than(b),
                ">" => a.greater_than(b),
                "<=" => a.less_or_equal(b),
                _ => a.greater_or_equal(b),
            });
        }
        let ordering = match Self::numbers(self, rhs) {
            Some(Numbers::Ints(a, b)) => a.partial_cmp(&b),
            Some(Numbers::Floats(a, b)) => a.partial_cmp(&b),
            None => return Err(Self::mismatch(op, self, rhs)),
        };
        let Some(ordering) = ordering else {
            return Ok(false);
        };
        Ok(match op {
            "<" => ordering.is_lt(),
            ">" => ordering.is_gt(),
            "<=" => ordering.is_le(),
            _ => ordering.is_ge(),
        })
    }

    pub fn less_than(&self, rhs: &Value) -> OpResult<Value> {
        self.compare(rhs, "<").map(Value::Bool)
    }

    pub fn greater_than(&self, rhs: &Value) -> OpResult<Value> {
        self.compare(rhs, ">").map(Value::Bool)
    }

    pub fn less_or_equal(&self, rhs: &Value) -> OpResult<Value> {
        self.compare(rhs, "<=").map(Value::Bool)
    }

    pub fn greater_or_equal(&self, rhs: &Value) -> OpResult<Value> {
        self.compare(rhs, ">=").map(Value::Bool)
    }

    pub fn min(&self, rhs: &Value) -> OpResult<Value> {
        let rhs_smaller = self.compare(rhs, ">")?;
        Ok(if rhs_smaller { rhs.clone() } else { self.clone() })
    }

    pub fn max(&self, rhs: &Value) -> OpResult<Value> {
        let rhs_larger = self.compare(rhs, "<")?;
        Ok(if rhs_larger { rhs.clone() } else { self.clone() })
    }

    /// `?` operator: list inclusion or substring test.
    pub fn has(&self, rhs: &Value) -> OpResult<bool> {
        match (self, rhs) {
            (Value::List(a), Value::List(b)) => Ok(a.has_all(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.contains(b.as_str())),
            _ => Err(Self::mismatch("?", self, rhs)),
        }
    }

    pub fn intersect(&self, rhs: &Value) -> OpResult<Value> {
        match (self, rhs) {
            (Value::List(a), Value::List(b)) => Ok(Value::List(a.intersection(b))),
            _ => Err(Self::mismatch("^", self, rhs)),
        }
    }

    pub fn negate(&self) -> OpResult<Value> {
        match self {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Bool(b) => Ok(Value::Int(-(*b as i32))),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(format!("cannot negate {}", other.kind())),
        }
    }

    pub fn floor(&self) -> OpResult<Value> {
        match self {
            Value::Float(f) => Ok(Value::Float(f.floor())),
            Value::Int(_) | Value::Bool(_) => Ok(self.clone()),
            other => Err(format!("cannot floor {}", other.kind())),
        }
    }

    pub fn ceiling(&self) -> OpResult<Value> {
        match self {
            Value::Float(f) => Ok(Value::Float(f.ceil())),
            Value::Int(_) | Value::Bool(_) => Ok(self.clone()),
            other => Err(format!("cannot ceiling {}", other.kind())),
        }
    }

    pub fn to_int(&self) -> OpResult<Value> {
        self.as_int()
            .map(Value::Int)
            .ok_or_else(|| format!("cannot convert {} to int", self.kind()))
    }

    pub fn to_float(&self) -> OpResult<Value> {
        self.as_float()
            .map(Value::Float)
            .ok_or_else(|| format!("cannot convert {} to float", self.kind()))
    }
}

/// Structural equality; numeric kinds are not unified here.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Divert(a), Value::Divert(b)) => a == b,
            (
                Value::Pointer { name, frame },
                Value::Pointer {
                    name: other_name,
                    frame: other_frame,
                },
            ) => name == other_name && frame == other_frame,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{}", *x as i64),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::List(list) => write!(f, "{list}"),
            Value::Divert(address) => write!(f, "-> {address}"),
            Value::Pointer { name, .. } => write!(f, "ref {name}"),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<ListValue> for Value {
    fn from(value: ListValue) -> Self {
        Value::List(value)
    }
}
