//! Call stack frames for tunnels, function calls and threads

use crate::types::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Root,
    Tunnel,
    Function,
}

/// One activation: where to return and the temporaries defined in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub return_to: usize,
    /// Evaluation mode of the caller, restored on return.
    pub caller_eval: bool,
    pub temps: Vec<(String, Value)>,
}

impl Frame {
    pub fn root() -> Self {
        Self {
            kind: FrameKind::Root,
            return_to: 0,
            caller_eval: false,
            temps: Vec::new(),
        }
    }

    pub fn temp(&self, name: &str) -> Option<&Value> {
        self.temps.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn set_temp(&mut self, name: &str, value: Value) {
        match self.temps.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.temps.push((name.to_string(), value)),
        }
    }
}

/// Frames from the root (index 0) to the innermost call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl Default for CallStack {
    fn default() -> Self {
        Self {
            frames: vec![Frame::root()],
        }
    }
}

impl CallStack {
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        if frames.is_empty() {
            Self::default()
        } else {
            Self { frames }
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, kind: FrameKind, return_to: usize, caller_eval: bool) {
        self.frames.push(Frame {
            kind,
            return_to,
            caller_eval,
            temps: Vec::new(),
        });
    }

    /// Pops the innermost frame if it has the expected kind.
    pub fn pop(&mut self, kind: FrameKind) -> Option<Frame> {
        match self.frames.last() {
            Some(frame) if frame.kind == kind && self.frames.len() > 1 => self.frames.pop(),
            _ => None,
        }
    }

    pub fn top(&self) -> &Frame {
        // The root frame is never popped.
        &self.frames[self.frames.len() - 1]
    }

    pub fn top_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn frame_mut(&mut self, index: usize) -> Option<&mut Frame> {
        self.frames.get_mut(index)
    }

    pub fn top_kind(&self) -> FrameKind {
        self.top().kind
    }

    pub fn clear(&mut self) {
        self.frames.truncate(1);
        self.frames[0].temps.clear();
    }
}

/// Flow suspended by a thread fork, resumed once the thread is done.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendedFlow {
    pub callstack: CallStack,
    pub resume_at: usize,
    pub eval_mode: bool,
}
