//! Serializable mirrors of globals and runner state
//!
//! Runtime values hold `Rc` handles to list definitions, so they are saved in
//! a self-describing form (list and flag names) and resolved against the
//! story again on restore.

use crate::error::{InkError, Result};
use crate::runtime::callstack::{CallStack, Frame, FrameKind, SuspendedFlow};
use crate::runtime::output::{OutputStream, Piece};
use crate::runtime::{ExecState, RngState};
use crate::story::Story;
use crate::types::choice::Choice;
use crate::types::list::{ListItemId, ListValue};
use crate::types::tags::TagState;
use crate::types::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub(crate) enum SavedValue {
    None,
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    List {
        /// `(list, flag)` name pairs.
        items: Vec<(String, String)>,
        origins: Vec<String>,
    },
    Divert(u32),
    Pointer {
        name: String,
        frame: Option<usize>,
    },
}

impl SavedValue {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::None => SavedValue::None,
            Value::Bool(b) => SavedValue::Bool(*b),
            Value::Int(i) => SavedValue::Int(*i),
            Value::Float(f) => SavedValue::Float(*f),
            Value::Str(s) => SavedValue::Str(s.clone()),
            Value::Divert(target) => SavedValue::Divert(*target),
            Value::Pointer { name, frame } => SavedValue::Pointer {
                name: name.clone(),
                frame: *frame,
            },
            Value::List(list) => {
                let defs = list.definitions();
                let list_name = |index: u16| {
                    defs.list(index)
                        .map(|def| def.name.clone())
                        .unwrap_or_default()
                };
                SavedValue::List {
                    items: list
                        .items()
                        .iter()
                        .map(|item| {
                            let flag = defs.flag_name(*item).unwrap_or_default().to_string();
                            (list_name(item.list), flag)
                        })
                        .collect(),
                    origins: list.origins().iter().map(|o| list_name(*o)).collect(),
                }
            }
        }
    }

    pub fn to_value(&self, story: &Story) -> Result<Value> {
        Ok(match self {
            SavedValue::None => Value::None,
            SavedValue::Bool(b) => Value::Bool(*b),
            SavedValue::Int(i) => Value::Int(*i),
            SavedValue::Float(f) => Value::Float(*f),
            SavedValue::Str(s) => Value::Str(s.clone()),
            SavedValue::Divert(target) => {
                if *target as usize > story.instruction_count() {
                    return Err(InkError::snapshot_mismatch(format!(
                        "divert target {target} is outside the story"
                    )));
                }
                Value::Divert(*target)
            }
            SavedValue::Pointer { name, frame } => {
                if frame.is_none() && story.global_index(name).is_none() {
                    return Err(InkError::snapshot_mismatch(format!(
                        "reference to undeclared global '{name}'"
                    )));
                }
                Value::Pointer {
                    name: name.clone(),
                    frame: *frame,
                }
            }
            SavedValue::List { items, origins } => {
                let defs = Rc::clone(story.list_definitions());
                let list_index = |name: &str| {
                    defs.list_index(name).ok_or_else(|| {
                        InkError::snapshot_mismatch(format!("unknown list '{name}'"))
                    })
                };
                let mut ids = Vec::with_capacity(items.len());
                for (list, flag) in items {
                    let index = list_index(list)?;
                    let position = defs
                        .list(index)
                        .and_then(|def| def.flags.iter().position(|(name, _)| name == flag))
                        .ok_or_else(|| {
                            InkError::snapshot_mismatch(format!("unknown flag '{list}.{flag}'"))
                        })?;
                    ids.push(ListItemId {
                        list: index,
                        flag: position as u16,
                    });
                }
                let origins = origins
                    .iter()
                    .map(|name| list_index(name))
                    .collect::<Result<Vec<_>>>()?;
                Value::List(ListValue::from_parts(defs.clone(), ids, origins))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SavedVariable {
    pub name: String,
    pub kind: ValueKind,
    pub value: SavedValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct SavedGlobals {
    pub variables: Vec<SavedVariable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SavedFrame {
    kind: FrameKind,
    return_to: usize,
    caller_eval: bool,
    temps: Vec<(String, SavedValue)>,
}

impl SavedFrame {
    fn capture(frame: &Frame) -> Self {
        Self {
            kind: frame.kind,
            return_to: frame.return_to,
            caller_eval: frame.caller_eval,
            temps: frame
                .temps
                .iter()
                .map(|(name, value)| (name.clone(), SavedValue::from_value(value)))
                .collect(),
        }
    }

    fn restore(&self, story: &Story) -> Result<Frame> {
        check_address(story, self.return_to, "return address")?;
        let temps = self
            .temps
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.to_value(story)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Frame {
            kind: self.kind,
            return_to: self.return_to,
            caller_eval: self.caller_eval,
            temps,
        })
    }
}

fn capture_frames(frames: &[Frame]) -> Vec<SavedFrame> {
    frames.iter().map(SavedFrame::capture).collect()
}

fn restore_frames(frames: &[SavedFrame], story: &Story) -> Result<Vec<Frame>> {
    let frames = frames
        .iter()
        .map(|frame| frame.restore(story))
        .collect::<Result<Vec<_>>>()?;
    match frames.first() {
        Some(root) if root.kind == FrameKind::Root => Ok(frames),
        _ => Err(InkError::snapshot_corrupt("call stack has no root frame")),
    }
}

fn check_address(story: &Story, address: usize, what: &str) -> Result<()> {
    if address > story.instruction_count() {
        return Err(InkError::snapshot_mismatch(format!(
            "{what} {address} is outside the story"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SavedChoice {
    text: String,
    tags: Vec<String>,
    target: usize,
    frames: Vec<SavedFrame>,
}

impl SavedChoice {
    fn capture(choice: &Choice) -> Self {
        Self {
            text: choice.text.clone(),
            tags: choice.tags.clone(),
            target: choice.target,
            frames: capture_frames(&choice.frames),
        }
    }

    fn restore(&self, index: usize, story: &Story) -> Result<Choice> {
        check_address(story, self.target, "choice target")?;
        Ok(Choice {
            index,
            text: self.text.clone(),
            tags: self.tags.clone(),
            target: self.target,
            frames: restore_frames(&self.frames, story)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SavedThread {
    frames: Vec<SavedFrame>,
    resume_at: usize,
    eval_mode: bool,
}

impl SavedThread {
    fn capture(flow: &SuspendedFlow) -> Self {
        Self {
            frames: capture_frames(flow.callstack.frames()),
            resume_at: flow.resume_at,
            eval_mode: flow.eval_mode,
        }
    }

    fn restore(&self, story: &Story) -> Result<SuspendedFlow> {
        check_address(story, self.resume_at, "thread resume address")?;
        Ok(SuspendedFlow {
            callstack: CallStack::from_frames(restore_frames(&self.frames, story)?),
            resume_at: self.resume_at,
            eval_mode: self.eval_mode,
        })
    }
}

/// Everything a runner needs to resume; observers and bindings excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SavedRunner {
    ip: Option<usize>,
    eval_mode: bool,
    eval: Vec<SavedValue>,
    frames: Vec<SavedFrame>,
    #[serde(default)]
    threads: Vec<SavedThread>,
    output: Vec<Piece>,
    containers: Vec<u32>,
    choices: Vec<SavedChoice>,
    fallback_choice: Option<SavedChoice>,
    visits: Vec<u32>,
    turn_visited: Vec<Option<u32>>,
    turn: u32,
    tags: TagState,
    rng: RngState,
    ended: bool,
}

impl SavedRunner {
    pub fn capture(state: &ExecState) -> Self {
        Self {
            ip: state.ip,
            eval_mode: state.eval_mode,
            eval: state.eval.iter().map(SavedValue::from_value).collect(),
            frames: capture_frames(state.callstack.frames()),
            threads: state.threads.iter().map(SavedThread::capture).collect(),
            output: state.output.pieces().to_vec(),
            containers: state.containers.clone(),
            choices: state.choices.iter().map(SavedChoice::capture).collect(),
            fallback_choice: state.fallback_choice.as_ref().map(SavedChoice::capture),
            visits: state.visits.clone(),
            turn_visited: state.turn_visited.clone(),
            turn: state.turn,
            tags: state.tags.clone(),
            rng: state.rng,
            ended: state.ended,
        }
    }

    pub fn restore(&self, story: &Story) -> Result<ExecState> {
        let containers = story.container_count();
        if self.visits.len() != containers || self.turn_visited.len() != containers {
            return Err(InkError::snapshot_mismatch(format!(
                "snapshot tracks {} containers, story has {containers}",
                self.visits.len()
            )));
        }
        if let Some(id) = self.containers.iter().find(|id| **id as usize >= containers) {
            return Err(InkError::snapshot_corrupt(format!("unknown container {id}")));
        }
        if let Some(ip) = self.ip {
            check_address(story, ip, "instruction pointer")?;
        }

        let choices = self
            .choices
            .iter()
            .enumerate()
            .map(|(index, choice)| choice.restore(index, story))
            .collect::<Result<Vec<_>>>()?;
        let fallback_choice = match &self.fallback_choice {
            Some(choice) => Some(choice.restore(0, story)?),
            None => None,
        };

        Ok(ExecState {
            ip: self.ip,
            eval_mode: self.eval_mode,
            eval: self
                .eval
                .iter()
                .map(|value| value.to_value(story))
                .collect::<Result<Vec<_>>>()?,
            callstack: CallStack::from_frames(restore_frames(&self.frames, story)?),
            threads: self
                .threads
                .iter()
                .map(|thread| thread.restore(story))
                .collect::<Result<Vec<_>>>()?,
            output: OutputStream::from_pieces(self.output.clone()),
            containers: self.containers.clone(),
            choices,
            fallback_choice,
            visits: self.visits.clone(),
            turn_visited: self.turn_visited.clone(),
            turn: self.turn,
            tags: self.tags.clone(),
            rng: self.rng,
            ended: self.ended,
        })
    }
}
