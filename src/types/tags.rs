//! Tag bookkeeping for the global, knot and line scopes

use serde::{Deserialize, Serialize};

/// Where the next evaluated tag lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagPhase {
    /// Before any content or knot: tags are global.
    Global,
    /// At the top of a freshly entered knot or stitch.
    KnotHeader,
    /// Content has started; tags belong to the current line.
    Line,
}

/// Tag scope selector for [`TagState::tags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagScope {
    Global,
    Knot,
    Line,
}

/// All tags partitioned by scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllTags {
    pub global: Vec<String>,
    pub knot: Vec<String>,
    pub line: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagState {
    phase: TagPhase,
    global: Vec<String>,
    knot: Vec<String>,
    line: Vec<String>,
    /// Tags evaluated inside choice text, claimed by the next choice.
    pending_choice: Vec<String>,
}

impl Default for TagState {
    fn default() -> Self {
        Self {
            phase: TagPhase::Global,
            global: Vec::new(),
            knot: Vec::new(),
            line: Vec::new(),
            pending_choice: Vec::new(),
        }
    }
}

impl TagState {
    pub fn phase(&self) -> TagPhase {
        self.phase
    }

    /// Records a tag evaluated as part of the content flow.
    pub fn push(&mut self, tag: String) {
        match self.phase {
            TagPhase::Global => self.global.push(tag.clone()),
            TagPhase::KnotHeader => self.knot.push(tag.clone()),
            TagPhase::Line => {}
        }
        self.line.push(tag);
    }

    pub fn push_choice_tag(&mut self, tag: String) {
        self.pending_choice.push(tag);
    }

    pub fn take_choice_tags(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_choice)
    }

    pub fn enter_knot(&mut self) {
        self.knot.clear();
        self.phase = TagPhase::KnotHeader;
    }

    pub fn content_started(&mut self) {
        self.phase = TagPhase::Line;
    }

    pub fn clear_line(&mut self) {
        self.line.clear();
    }

    pub fn tags(&self, scope: TagScope) -> &[String] {
        match scope {
            TagScope::Global => &self.global,
            TagScope::Knot => &self.knot,
            TagScope::Line => &self.line,
        }
    }

    pub fn all(&self) -> AllTags {
        AllTags {
            global: self.global.clone(),
            knot: self.knot.clone(),
            line: self.line.clone(),
        }
    }
}
