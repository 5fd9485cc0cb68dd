//! External function bindings
//!
//! Stories call host code through `EXTERNAL` declarations. A binding wraps a
//! closure together with its declared arity, whether it produces a value and
//! whether the runner may call it speculatively during lookahead.

use crate::types::value::Value;
use std::collections::HashMap;
use std::fmt;

type Callable = dyn FnMut(&[Value]) -> anyhow::Result<Value>;

pub struct ExternalFunction {
    callable: Box<Callable>,
    arity: Option<usize>,
    lookahead_safe: bool,
    returns_value: bool,
}

impl fmt::Debug for ExternalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalFunction")
            .field("arity", &self.arity)
            .field("lookahead_safe", &self.lookahead_safe)
            .field("returns_value", &self.returns_value)
            .finish_non_exhaustive()
    }
}

impl ExternalFunction {
    /// A function whose result is pushed back to the story.
    pub fn returning<F>(callable: F) -> Self
    where
        F: FnMut(&[Value]) -> anyhow::Result<Value> + 'static,
    {
        Self {
            callable: Box::new(callable),
            arity: None,
            lookahead_safe: false,
            returns_value: true,
        }
    }

    /// A function called for its side effects only.
    pub fn void<F>(mut callable: F) -> Self
    where
        F: FnMut(&[Value]) -> anyhow::Result<()> + 'static,
    {
        Self {
            callable: Box::new(move |args| callable(args).map(|()| Value::None)),
            arity: None,
            lookahead_safe: false,
            returns_value: false,
        }
    }

    /// Requires exactly `count` arguments at every call site.
    pub fn arity(mut self, count: usize) -> Self {
        self.arity = Some(count);
        self
    }

    /// Allows calls during lookahead; the function may run more than once
    /// per logical call.
    pub fn lookahead_safe(mut self) -> Self {
        self.lookahead_safe = true;
        self
    }

    pub fn is_lookahead_safe(&self) -> bool {
        self.lookahead_safe
    }

    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    pub fn expected_arity(&self) -> Option<usize> {
        self.arity
    }

    pub(crate) fn call(&mut self, args: &[Value]) -> anyhow::Result<Value> {
        (self.callable)(args)
    }
}

/// Name to binding registry owned by a runner.
#[derive(Debug, Default)]
pub(crate) struct Functions {
    bindings: HashMap<String, ExternalFunction>,
}

impl Functions {
    /// Registers `function`, replacing any previous binding of `name`.
    pub fn bind(&mut self, name: &str, function: ExternalFunction) -> Option<ExternalFunction> {
        self.bindings.insert(name.to_string(), function)
    }

    pub fn unbind(&mut self, name: &str) -> Option<ExternalFunction> {
        self.bindings.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ExternalFunction> {
        self.bindings.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ExternalFunction> {
        self.bindings.get_mut(name)
    }
}
