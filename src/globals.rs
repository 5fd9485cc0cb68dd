//! Global variable store
//!
//! A [`Globals`] handle owns the values of every variable the story declares
//! plus the observers attached to them. Handles are cheap clones sharing the
//! same store, so several runners (and host callbacks) can read and write it.
//! No borrow is held while observers run, which lets them re-enter the store.

use crate::error::{InkError, Result};
use crate::storage::state::{SavedGlobals, SavedValue, SavedVariable};
use crate::story::Story;
use crate::types::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Handle returned by the `observe*` methods, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ChangedFn = dyn Fn(&Value, Option<&Value>) -> anyhow::Result<()>;
type PingFn = dyn Fn() -> anyhow::Result<()>;
type DeltaFn = dyn Fn(&Value, &Value) -> anyhow::Result<()>;

#[derive(Clone)]
enum Observer {
    /// `(new, previous)`; previous is none on the first delivery.
    Changed(Rc<ChangedFn>),
    /// Any write.
    Ping(Rc<PingFn>),
    /// `(new, previous)` for writes that actually changed the value.
    Delta(Rc<DeltaFn>),
}

struct Registration {
    id: ObserverId,
    variable: usize,
    observer: Observer,
}

/// Notification held back until a speculative run is committed.
struct Deferred {
    variable: usize,
    new: Value,
    old: Value,
}

/// Handle of one speculation frame. Frames nest: a runner continued from
/// inside another runner's lookahead opens its frame on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SpeculationId(usize);

/// Undo journal of one speculation frame, oldest write first.
#[derive(Default)]
struct Speculation {
    undo: Vec<(usize, Value)>,
    deferred: Vec<Deferred>,
}

struct GlobalsState {
    values: Vec<Value>,
    observers: Vec<Registration>,
    next_observer: u64,
    speculations: Vec<Speculation>,
}

#[derive(Clone)]
pub struct Globals {
    story: Story,
    state: Rc<RefCell<GlobalsState>>,
}

impl fmt::Debug for Globals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        let mut map = f.debug_map();
        for (decl, value) in self.story.globals_table().iter().zip(&state.values) {
            map.entry(&decl.name, value);
        }
        map.finish()
    }
}

impl Globals {
    pub(crate) fn new(story: Story) -> Self {
        let values = story
            .globals_table()
            .iter()
            .map(|decl| decl.default.clone())
            .collect();
        Self::with_values(story, values)
    }

    fn with_values(story: Story, values: Vec<Value>) -> Self {
        Self {
            story,
            state: Rc::new(RefCell::new(GlobalsState {
                values,
                observers: Vec::new(),
                next_observer: 0,
                speculations: Vec::new(),
            })),
        }
    }

    pub fn story(&self) -> &Story {
        &self.story
    }

    /// True when both handles refer to the same store.
    pub fn ptr_eq(&self, other: &Globals) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.story
            .global_index(name)
            .ok_or_else(|| InkError::unknown_variable(name))
    }

    /// Declared variable names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.story
            .globals_table()
            .iter()
            .map(|decl| decl.name.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        let index = self.index_of(name)?;
        Ok(self.state.borrow().values[index].clone())
    }

    /// Writes a variable and notifies its observers.
    ///
    /// The write is kept even if an observer fails; the first failure is
    /// returned as [`InkError::Callback`] after every observer ran.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.index_of(name)?;
        let value = value.into();
        let declared = self.story.globals_table()[index].default.kind();
        if !declared.accepts(value.kind()) {
            return Err(InkError::TypeMismatch {
                name: name.to_string(),
                expected: declared,
                actual: value.kind(),
            });
        }
        let value = value.coerce_to(declared);

        let old = {
            let mut state = self.state.borrow_mut();
            let old = std::mem::replace(&mut state.values[index], value.clone());
            if let Some(speculation) = state.speculations.last_mut() {
                speculation.undo.push((index, old.clone()));
                speculation.deferred.push(Deferred {
                    variable: index,
                    new: value,
                    old,
                });
                return Ok(());
            }
            old
        };
        self.notify(index, &value, Some(&old))
    }

    fn notify(&self, variable: usize, new: &Value, old: Option<&Value>) -> Result<()> {
        let observers: Vec<Observer> = self
            .state
            .borrow()
            .observers
            .iter()
            .filter(|registration| registration.variable == variable)
            .map(|registration| registration.observer.clone())
            .collect();
        if observers.is_empty() {
            return Ok(());
        }

        let name = &self.story.globals_table()[variable].name;
        let mut first_error = None;
        for observer in observers {
            let result = match &observer {
                Observer::Changed(callback) => callback(new, old),
                Observer::Ping(callback) => callback(),
                Observer::Delta(callback) => match old {
                    Some(old) if old != new => callback(new, old),
                    _ => Ok(()),
                },
            };
            if let Err(error) = result {
                log::warn!("observer for '{name}' failed: {error:#}");
                if first_error.is_none() {
                    first_error = Some(InkError::callback(name.clone(), error));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn register(&self, name: &str, observer: Observer) -> Result<ObserverId> {
        let variable = self.index_of(name)?;
        let id = {
            let mut state = self.state.borrow_mut();
            let id = ObserverId(state.next_observer);
            state.next_observer += 1;
            state.observers.push(Registration {
                id,
                variable,
                observer: observer.clone(),
            });
            id
        };

        let current = self.get(name)?;
        let initial = match &observer {
            Observer::Changed(callback) => callback(&current, None),
            Observer::Ping(callback) => callback(),
            Observer::Delta(_) => Ok(()),
        };
        if let Err(error) = initial {
            self.unobserve(id);
            return Err(InkError::callback(name, error));
        }
        Ok(id)
    }

    /// Observes every write with `(new, previous)`. The current value is
    /// delivered immediately with no previous value.
    pub fn observe<F>(&self, name: &str, callback: F) -> Result<ObserverId>
    where
        F: Fn(&Value, Option<&Value>) -> anyhow::Result<()> + 'static,
    {
        self.register(name, Observer::Changed(Rc::new(callback)))
    }

    /// Observes every write without payload, pinged once on registration.
    pub fn observe_ping<F>(&self, name: &str, callback: F) -> Result<ObserverId>
    where
        F: Fn() -> anyhow::Result<()> + 'static,
    {
        self.register(name, Observer::Ping(Rc::new(callback)))
    }

    /// Observes writes that change the value, with `(new, previous)`.
    pub fn observe_delta<F>(&self, name: &str, callback: F) -> Result<ObserverId>
    where
        F: Fn(&Value, &Value) -> anyhow::Result<()> + 'static,
    {
        self.register(name, Observer::Delta(Rc::new(callback)))
    }

    /// Removes an observer. Returns false if it was not registered.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.observers.len();
        state.observers.retain(|registration| registration.id != id);
        state.observers.len() != before
    }

    /// Opens a speculation frame. Writes made until the frame is closed are
    /// journaled and their notifications held back.
    pub(crate) fn begin_speculation(&self) -> SpeculationId {
        let mut state = self.state.borrow_mut();
        state.speculations.push(Speculation::default());
        SpeculationId(state.speculations.len() - 1)
    }

    /// Undoes every write made since `id` was opened, including those of
    /// frames nested inside it; their notifications are dropped.
    pub(crate) fn rollback_speculation(&self, id: SpeculationId) {
        let mut state = self.state.borrow_mut();
        while state.speculations.len() > id.0 {
            let Some(speculation) = state.speculations.pop() else {
                break;
            };
            for (index, old) in speculation.undo.into_iter().rev() {
                state.values[index] = old;
            }
        }
    }

    /// Keeps the writes made since `id` was opened. Inside an enclosing frame
    /// they join that frame; otherwise their notifications are delivered.
    pub(crate) fn commit_speculation(&self, id: SpeculationId) -> Vec<InkError> {
        let deferred = {
            let mut state = self.state.borrow_mut();
            if state.speculations.len() <= id.0 {
                return Vec::new();
            }
            let closed = state.speculations.split_off(id.0);
            match state.speculations.last_mut() {
                Some(parent) => {
                    for speculation in closed {
                        parent.undo.extend(speculation.undo);
                        parent.deferred.extend(speculation.deferred);
                    }
                    return Vec::new();
                }
                None => closed
                    .into_iter()
                    .flat_map(|speculation| speculation.deferred)
                    .collect::<Vec<_>>(),
            }
        };
        deferred
            .into_iter()
            .filter_map(|d| self.notify(d.variable, &d.new, Some(&d.old)).err())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn is_speculating(&self) -> bool {
        !self.state.borrow().speculations.is_empty()
    }

    pub(crate) fn save(&self) -> SavedGlobals {
        let state = self.state.borrow();
        let variables = self
            .story
            .globals_table()
            .iter()
            .zip(&state.values)
            .map(|(decl, value)| SavedVariable {
                name: decl.name.clone(),
                kind: value.kind(),
                value: SavedValue::from_value(value),
            })
            .collect();
        SavedGlobals { variables }
    }

    /// Rebuilds a store; observers are not part of saved state.
    pub(crate) fn restore(story: &Story, saved: &SavedGlobals) -> Result<Globals> {
        let globals = Globals::new(story.clone());
        {
            let mut state = globals.state.borrow_mut();
            for variable in &saved.variables {
                let index = globals.index_of(&variable.name).map_err(|_| {
                    InkError::snapshot_mismatch(format!(
                        "variable '{}' is not declared by the story",
                        variable.name
                    ))
                })?;
                let value = variable.value.to_value(story)?;
                if value.kind() != variable.kind {
                    return Err(InkError::snapshot_corrupt(format!(
                        "variable '{}' recorded as {} but holds {}",
                        variable.name,
                        variable.kind,
                        value.kind()
                    )));
                }
                state.values[index] = value;
            }
        }
        Ok(globals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::StoryBuilder;
    use std::cell::Cell;

    fn story() -> Story {
        let mut b = StoryBuilder::new();
        b.list("colors", &[("red", 1), ("yellow", 2)]);
        b.global_int("age", 23);
        b.global_str("name", "Sam");
        b.global_float("ratio", 0.5);
        b.global_list("palette", &["colors.red"]);
        b.story().unwrap()
    }

    #[test]
    fn set_then_get_returns_written_value() {
        let globals = story().new_globals();
        assert_eq!(globals.get("age").unwrap(), Value::Int(23));
        globals.set("age", 30).unwrap();
        assert_eq!(globals.get("age").unwrap(), Value::Int(30));
        globals.set("name", "Alex").unwrap();
        assert_eq!(globals.get("name").unwrap(), Value::from("Alex"));
    }

    #[test]
    fn numeric_kinds_are_compatible() {
        let globals = story().new_globals();
        globals.set("ratio", 2).unwrap();
        assert_eq!(globals.get("ratio").unwrap(), Value::Float(2.0));
        globals.set("age", 1.5f32).unwrap();
        assert_eq!(globals.get("age").unwrap(), Value::Int(1));
    }

    #[test]
    fn unknown_variable_and_type_mismatch() {
        let globals = story().new_globals();
        assert!(matches!(globals.get("nope"), Err(InkError::UnknownVariable { .. })));
        assert!(matches!(globals.set("nope", 1), Err(InkError::UnknownVariable { .. })));
        match globals.set("age", "old") {
            Err(InkError::TypeMismatch { name, .. }) => assert_eq!(name, "age"),
            other => panic!("Expected TypeMismatch, got {other:?}"),
        }
        assert_eq!(globals.get("age").unwrap(), Value::Int(23));
    }

    #[test]
    fn failed_set_never_fires_observers() {
        let globals = story().new_globals();
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        globals
            .observe("age", move |_, _| {
                seen.set(seen.get() + 1);
                Ok(())
            })
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert!(globals.set("age", "x").is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn observers_receive_new_and_previous_values_in_order() {
        let globals = story().new_globals();
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = Rc::clone(&log);
        globals
            .observe("age", move |new, old| {
                first.borrow_mut().push(format!("a {new} {:?}", old.map(|v| v.to_string())));
                Ok(())
            })
            .unwrap();
        let second = Rc::clone(&log);
        globals
            .observe("age", move |new, _| {
                second.borrow_mut().push(format!("b {new}"));
                Ok(())
            })
            .unwrap();
        globals.set("age", 24).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "a 23 None".to_string(),
                "b 23".to_string(),
                "a 24 Some(\"23\")".to_string(),
                "b 24".to_string(),
            ]
        );
    }

    #[test]
    fn ping_and_delta_variants() {
        let globals = story().new_globals();
        let pings = Rc::new(Cell::new(0));
        let deltas = Rc::new(Cell::new(0));
        let p = Rc::clone(&pings);
        globals
            .observe_ping("age", move || {
                p.set(p.get() + 1);
                Ok(())
            })
            .unwrap();
        let d = Rc::clone(&deltas);
        globals
            .observe_delta("age", move |new, old| {
                assert_ne!(new, old);
                d.set(d.get() + 1);
                Ok(())
            })
            .unwrap();

        globals.set("age", 23).unwrap();
        globals.set("age", 40).unwrap();
        assert_eq!(pings.get(), 3);
        assert_eq!(deltas.get(), 1);
    }

    #[test]
    fn observer_failure_keeps_the_write_and_other_observers() {
        let globals = story().new_globals();
        let reached = Rc::new(Cell::new(false));
        globals
            .observe("age", |new, _| {
                if new == &Value::Int(99) {
                    anyhow::bail!("refusing 99");
                }
                Ok(())
            })
            .unwrap();
        let r = Rc::clone(&reached);
        globals
            .observe("age", move |new, _| {
                r.set(new == &Value::Int(99));
                Ok(())
            })
            .unwrap();

        let err = globals.set("age", 99).unwrap_err();
        assert!(err.is_callback());
        assert_eq!(globals.get("age").unwrap(), Value::Int(99));
        assert!(reached.get());
    }

    #[test]
    fn observers_may_write_back() {
        let globals = story().new_globals();
        let handle = globals.clone();
        globals
            .observe("age", move |new, _| {
                if new == &Value::Int(5) {
                    handle.set("age", 8)?;
                }
                Ok(())
            })
            .unwrap();
        globals.set("age", 5).unwrap();
        assert_eq!(globals.get("age").unwrap(), Value::Int(8));
    }

    #[test]
    fn unobserve_stops_delivery() {
        let globals = story().new_globals();
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let id = globals
            .observe_ping("name", move || {
                c.set(c.get() + 1);
                Ok(())
            })
            .unwrap();
        assert!(globals.unobserve(id));
        assert!(!globals.unobserve(id));
        globals.set("name", "x").unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn speculation_defers_notifications() {
        let globals = story().new_globals();
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        globals
            .observe_ping("age", move || {
                c.set(c.get() + 1);
                Ok(())
            })
            .unwrap();

        let id = globals.begin_speculation();
        globals.set("age", 1).unwrap();
        assert_eq!(calls.get(), 1);
        globals.rollback_speculation(id);
        assert_eq!(globals.get("age").unwrap(), Value::Int(23));
        assert_eq!(calls.get(), 1);

        let id = globals.begin_speculation();
        globals.set("age", 2).unwrap();
        assert!(globals.commit_speculation(id).is_empty());
        assert_eq!(globals.get("age").unwrap(), Value::Int(2));
        assert_eq!(calls.get(), 2);
        assert!(!globals.is_speculating());
    }

    #[test]
    fn nested_rollback_keeps_the_outer_frame() {
        let globals = story().new_globals();
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        globals
            .observe_ping("age", move || {
                c.set(c.get() + 1);
                Ok(())
            })
            .unwrap();

        let outer = globals.begin_speculation();
        globals.set("age", 30).unwrap();
        let inner = globals.begin_speculation();
        globals.set("age", 31).unwrap();
        globals.set("name", "Kai").unwrap();
        globals.rollback_speculation(inner);
        assert_eq!(globals.get("age").unwrap(), Value::Int(30));
        assert_eq!(globals.get("name").unwrap(), Value::from("Sam"));
        assert!(globals.is_speculating());

        globals.rollback_speculation(outer);
        assert_eq!(globals.get("age").unwrap(), Value::Int(23));
        assert_eq!(calls.get(), 1);
        assert!(!globals.is_speculating());
    }

    #[test]
    fn nested_commit_joins_the_outer_frame() {
        let globals = story().new_globals();
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        globals
            .observe_ping("age", move || {
                c.set(c.get() + 1);
                Ok(())
            })
            .unwrap();

        let outer = globals.begin_speculation();
        let inner = globals.begin_speculation();
        globals.set("age", 40).unwrap();
        assert!(globals.commit_speculation(inner).is_empty());
        assert_eq!(calls.get(), 1);
        globals.rollback_speculation(outer);
        assert_eq!(globals.get("age").unwrap(), Value::Int(23));

        let outer = globals.begin_speculation();
        let inner = globals.begin_speculation();
        globals.set("age", 41).unwrap();
        assert!(globals.commit_speculation(inner).is_empty());
        assert!(globals.commit_speculation(outer).is_empty());
        assert_eq!(globals.get("age").unwrap(), Value::Int(41));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn list_globals_can_be_edited_and_stored() {
        let globals = story().new_globals();
        let mut palette = globals.get("palette").unwrap().as_list().cloned().unwrap();
        palette.add("yellow").unwrap();
        globals.set("palette", palette).unwrap();
        assert_eq!(globals.get("palette").unwrap().to_string(), "red, yellow");
        assert!(matches!(globals.set("palette", 3), Err(InkError::TypeMismatch { .. })));
    }
}
