//! Choices presented to the player at a branch point

use crate::runtime::callstack::Frame;

/// A selectable branch. Valid until the runner advances or `choose` is called.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub(crate) index: usize,
    pub(crate) text: String,
    pub(crate) tags: Vec<String>,
    pub(crate) target: usize,
    pub(crate) frames: Vec<Frame>,
}

impl Choice {
    /// Position among the visible choices, starting at zero.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    pub fn has_tags(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn get_tag(&self, index: usize) -> Option<&str> {
        self.tags.get(index).map(String::as_str)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}
