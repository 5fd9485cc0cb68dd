//! Programmatic story assembler
//!
//! `StoryBuilder` writes the binary story format directly: instructions,
//! containers, list definitions and declared globals. Jumps may reference
//! labels placed later or container paths; both are resolved in [`build`].
//!
//! [`build`]: StoryBuilder::build

use super::Story;
use super::format::{
    self, NO_NAME, RawContainer, RawList, RawListLiteral, RawStory, RawValue, container_flags,
};
use crate::error::{InkError, Result};
use crate::types::command::{Command, Instruction, flags};
use crate::types::list::ListItemId;
use std::collections::HashMap;

/// A jump target placed with [`StoryBuilder::place`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Where a jump goes: a label or the start of a named container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Label(Label),
    Path(String),
}

impl From<Label> for Target {
    fn from(label: Label) -> Self {
        Target::Label(label)
    }
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Target::Path(path.to_string())
    }
}

#[derive(Debug, Default)]
pub struct StoryBuilder {
    raw: RawStory,
    string_ids: HashMap<String, u32>,
    open: Vec<usize>,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Target)>,
    errors: Vec<String>,
}

impl StoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, text: &str) -> u32 {
        if let Some(id) = self.string_ids.get(text) {
            return *id;
        }
        let id = self.raw.strings.len() as u32;
        self.raw.strings.push(text.to_string());
        self.string_ids.insert(text.to_string(), id);
        id
    }

    pub fn emit(&mut self, command: Command, flag: u8, payload: u32) -> &mut Self {
        self.raw
            .instructions
            .push(Instruction::new(command, flag, payload));
        self
    }

    fn emit_jump(&mut self, command: Command, flag: u8, target: Target) -> &mut Self {
        self.fixups.push((self.raw.instructions.len(), target));
        self.emit(command, flag, 0)
    }

    fn emit_named(&mut self, command: Command, flag: u8, name: &str) -> &mut Self {
        let id = self.intern(name);
        self.emit(command, flag, id)
    }

    // Declarations

    pub fn list(&mut self, name: &str, list_flags: &[(&str, i32)]) -> &mut Self {
        let name = self.intern(name);
        let flags = list_flags
            .iter()
            .map(|(flag, value)| (self.intern(flag), *value))
            .collect();
        self.raw.lists.push(RawList { name, flags });
        self
    }

    fn resolve_flag(&self, path: &str) -> Option<ListItemId> {
        let (list_name, flag_name) = path.split_once('.')?;
        let lookup = |id: u32| self.raw.strings.get(id as usize).map(String::as_str);
        let mut sorted: Vec<(usize, &RawList)> = self.raw.lists.iter().enumerate().collect();
        sorted.retain(|(_, list)| lookup(list.name) == Some(list_name));
        let (list, def) = sorted.first().copied()?;
        let mut by_value = def.flags.clone();
        by_value.sort_by_key(|(_, value)| *value);
        let flag = by_value
            .iter()
            .position(|(name, _)| lookup(*name) == Some(flag_name))?;
        Some(ListItemId {
            list: list as u16,
            flag: flag as u16,
        })
    }

    /// Interns a list literal made of `list.flag` entries.
    fn list_literal(&mut self, items: &[&str]) -> u32 {
        let mut literal = RawListLiteral {
            origins: Vec::new(),
            items: Vec::new(),
        };
        for item in items {
            match self.resolve_flag(item) {
                Some(id) => {
                    if !literal.origins.contains(&id.list) {
                        literal.origins.push(id.list);
                    }
                    literal.items.push(id);
                }
                None => self.errors.push(format!("unknown list flag '{item}'")),
            }
        }
        self.raw.list_literals.push(literal);
        (self.raw.list_literals.len() - 1) as u32
    }

    fn global(&mut self, name: &str, value: RawValue) -> &mut Self {
        let name = self.intern(name);
        self.raw.globals.push((name, value));
        self
    }

    pub fn global_int(&mut self, name: &str, value: i32) -> &mut Self {
        self.global(name, RawValue::Int(value))
    }

    pub fn global_float(&mut self, name: &str, value: f32) -> &mut Self {
        self.global(name, RawValue::Float(value))
    }

    pub fn global_bool(&mut self, name: &str, value: bool) -> &mut Self {
        self.global(name, RawValue::Bool(value))
    }

    pub fn global_str(&mut self, name: &str, value: &str) -> &mut Self {
        let value = self.intern(value);
        self.global(name, RawValue::Str(value))
    }

    /// Declares a list variable holding `items` (`list.flag` paths).
    pub fn global_list(&mut self, name: &str, items: &[&str]) -> &mut Self {
        let literal = self.list_literal(items);
        self.global(name, RawValue::List(literal))
    }

    // Containers

    pub fn begin_container(&mut self, name: Option<&str>, container_flags: u8) -> &mut Self {
        let name = name.map_or(NO_NAME, |name| self.intern(name));
        let id = self.raw.containers.len();
        let start = self.raw.instructions.len() as u32;
        self.raw.containers.push(RawContainer {
            name,
            start,
            end: start,
            flags: container_flags,
        });
        self.open.push(id);
        self.emit(Command::StartContainerMarker, 0, id as u32)
    }

    /// Knot or stitch (`knot.stitch`) that counts visits and turns.
    pub fn begin_knot(&mut self, path: &str) -> &mut Self {
        self.begin_container(
            Some(path),
            container_flags::KNOT | container_flags::TRACK_VISITS | container_flags::TRACK_TURNS,
        )
    }

    pub fn begin_function(&mut self, name: &str) -> &mut Self {
        self.begin_container(Some(name), container_flags::FUNCTION)
    }

    /// Unnamed container counting visits, e.g. a choice target.
    pub fn begin_anonymous(&mut self) -> &mut Self {
        self.begin_container(None, container_flags::TRACK_VISITS)
    }

    pub fn end_container(&mut self) -> &mut Self {
        let Some(id) = self.open.pop() else {
            self.errors.push("end_container without open container".to_string());
            return self;
        };
        self.raw.containers[id].end = self.raw.instructions.len() as u32;
        self.emit(Command::EndContainerMarker, 0, id as u32)
    }

    // Labels

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn place(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.raw.instructions.len() as u32);
        self
    }

    /// Address the next instruction will get.
    pub fn address(&self) -> u32 {
        self.raw.instructions.len() as u32
    }

    // Content

    /// Outputs `text`, or pushes it as a string while evaluating.
    pub fn text(&mut self, text: &str) -> &mut Self {
        self.emit_named(Command::Str, 0, text)
    }

    pub fn newline(&mut self) -> &mut Self {
        self.emit(Command::Newline, 0, 0)
    }

    pub fn line(&mut self, text: &str) -> &mut Self {
        self.text(text).newline()
    }

    pub fn glue(&mut self) -> &mut Self {
        self.emit(Command::Glue, 0, 0)
    }

    pub fn tag(&mut self, tag: &str) -> &mut Self {
        self.emit_named(Command::Tag, 0, tag)
    }

    pub fn start_tag(&mut self) -> &mut Self {
        self.emit(Command::StartTag, 0, 0)
    }

    pub fn end_tag(&mut self) -> &mut Self {
        self.emit(Command::EndTag, 0, 0)
    }

    // Evaluation

    pub fn start_eval(&mut self) -> &mut Self {
        self.emit(Command::StartEval, 0, 0)
    }

    pub fn end_eval(&mut self) -> &mut Self {
        self.emit(Command::EndEval, 0, 0)
    }

    pub fn output(&mut self) -> &mut Self {
        self.emit(Command::Output, 0, 0)
    }

    pub fn pop(&mut self) -> &mut Self {
        self.emit(Command::Pop, 0, 0)
    }

    pub fn duplicate(&mut self) -> &mut Self {
        self.emit(Command::Duplicate, 0, 0)
    }

    pub fn int(&mut self, value: i32) -> &mut Self {
        self.emit(Command::Int, 0, value as u32)
    }

    pub fn float(&mut self, value: f32) -> &mut Self {
        self.emit(Command::Float, 0, value.to_bits())
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.emit(Command::Bool, 0, value as u32)
    }

    pub fn void(&mut self) -> &mut Self {
        self.emit(Command::Void, 0, 0)
    }

    pub fn list_value(&mut self, items: &[&str]) -> &mut Self {
        let literal = self.list_literal(items);
        self.emit(Command::List, 0, literal)
    }

    pub fn divert_value(&mut self, target: impl Into<Target>) -> &mut Self {
        self.emit_jump(Command::DivertValue, 0, target.into())
    }

    /// Emits an operator command (`Add`, `Not`, `ListCount`, ...).
    pub fn op(&mut self, command: Command) -> &mut Self {
        self.emit(command, 0, 0)
    }

    /// Evaluates `value` and outputs it: `{value}`.
    pub fn output_int(&mut self, value: i32) -> &mut Self {
        self.start_eval().int(value).output().end_eval()
    }

    /// Outputs the current value of a variable: `{name}`.
    pub fn output_var(&mut self, name: &str) -> &mut Self {
        self.start_eval().get_var(name).output().end_eval()
    }

    // Variables

    pub fn get_var(&mut self, name: &str) -> &mut Self {
        self.emit_named(Command::PushVariableValue, 0, name)
    }

    pub fn set_var(&mut self, name: &str) -> &mut Self {
        self.emit_named(Command::SetVariable, 0, name)
    }

    pub fn temp(&mut self, name: &str) -> &mut Self {
        self.emit_named(Command::DefineTemp, 0, name)
    }

    /// Assigns an existing temp, writing through it when it holds a reference.
    pub fn reassign_temp(&mut self, name: &str) -> &mut Self {
        self.emit_named(Command::DefineTemp, flags::ASSIGNMENT_IS_REDEFINE, name)
    }

    /// Pushes a reference to a variable, for `ref` parameters.
    pub fn pointer(&mut self, name: &str) -> &mut Self {
        self.emit_named(Command::ValuePointer, flags::POINTER_RESOLVE, name)
    }

    // Flow

    pub fn divert(&mut self, target: impl Into<Target>) -> &mut Self {
        self.emit_jump(Command::Divert, 0, target.into())
    }

    /// Conditional divert; pops the condition.
    pub fn divert_if(&mut self, target: impl Into<Target>) -> &mut Self {
        self.emit_jump(Command::Divert, flags::DIVERT_HAS_CONDITION, target.into())
    }

    pub fn divert_to_variable(&mut self, name: &str) -> &mut Self {
        self.emit_named(Command::DivertToVariable, 0, name)
    }

    pub fn tunnel(&mut self, target: impl Into<Target>) -> &mut Self {
        self.emit_jump(Command::Tunnel, 0, target.into())
    }

    pub fn tunnel_return(&mut self) -> &mut Self {
        self.emit(Command::TunnelReturn, 0, 0)
    }

    pub fn call_function(&mut self, target: impl Into<Target>) -> &mut Self {
        self.emit_jump(Command::Function, 0, target.into())
    }

    pub fn ret_function(&mut self) -> &mut Self {
        self.emit(Command::FunctionReturn, 0, 0)
    }

    pub fn call_external(&mut self, name: &str, arguments: u8) -> &mut Self {
        self.emit_named(Command::CallExternal, arguments, name)
    }

    /// `<- target`: gathers the target's content and choices, then carries on.
    pub fn thread(&mut self, target: impl Into<Target>) -> &mut Self {
        self.emit_jump(Command::Thread, 0, target.into())
    }

    pub fn done(&mut self) -> &mut Self {
        self.emit(Command::Done, 0, 0)
    }

    pub fn end(&mut self) -> &mut Self {
        self.emit(Command::End, 0, 0)
    }

    // Strings and choices

    pub fn start_str(&mut self) -> &mut Self {
        self.emit(Command::StartStr, 0, 0)
    }

    pub fn end_str(&mut self) -> &mut Self {
        self.emit(Command::EndStr, 0, 0)
    }

    pub fn choice(&mut self, target: impl Into<Target>, choice_flags: u8) -> &mut Self {
        self.emit_jump(Command::Choice, choice_flags, target.into())
    }

    /// `* [text] -> target` with optional choice tags.
    pub fn choice_text(&mut self, text: &str, tags: &[&str], target: impl Into<Target>) -> &mut Self {
        self.start_eval().start_str().text(text);
        for tag in tags {
            self.tag(tag);
        }
        self.end_str()
            .end_eval()
            .choice(target, flags::CHOICE_HAS_CHOICE_ONLY_CONTENT)
    }

    pub fn read_count(&mut self, path: &str) -> &mut Self {
        self.fixups.push((self.raw.instructions.len(), Target::Path(path.to_string())));
        self.emit(Command::ReadCount, 0, 0)
    }

    // Assembly

    pub fn build(&self) -> Result<Vec<u8>> {
        if let Some(error) = self.errors.first() {
            return Err(InkError::invalid_format(error.clone()));
        }
        if let Some(id) = self.open.last() {
            return Err(InkError::invalid_format(format!("container {id} is never closed")));
        }
        let mut raw = self.raw.clone();
        for (address, target) in &self.fixups {
            let instruction = &mut raw.instructions[*address];
            let container_id = instruction.command == Command::ReadCount;
            instruction.payload = match target {
                Target::Label(label) => self.labels[label.0].ok_or_else(|| {
                    InkError::invalid_format(format!("label {} is never placed", label.0))
                })?,
                Target::Path(path) => {
                    let found = raw.containers.iter().enumerate().find(|(_, c)| {
                        c.name != NO_NAME && raw.strings.get(c.name as usize) == Some(path)
                    });
                    match found {
                        Some((id, _)) if container_id => id as u32,
                        Some((_, container)) => container.start,
                        None => {
                            return Err(InkError::invalid_format(format!("unknown path '{path}'")));
                        }
                    }
                }
            };
        }
        Ok(format::encode(&raw))
    }

    /// Builds and loads in one step.
    pub fn story(&self) -> Result<Story> {
        Story::from_bytes(&self.build()?)
    }
}
