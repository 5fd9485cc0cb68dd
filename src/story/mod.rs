//! Loaded story programs
//!
//! A [`Story`] is the immutable result of loading a compiled blob: the
//! instruction table, container (knot/stitch) table, list definitions and
//! declared globals. It is a cheap handle; clones share the same tables.
//! Globals stores and runners are created from it.

pub mod builder;
pub mod format;

use crate::config::RunnerConfig;
use crate::error::{InkError, Result};
use crate::globals::Globals;
use crate::runtime::Runner;
use crate::storage::Snapshot;
use crate::types::command::{Command, Instruction, flags};
use crate::types::list::{ListDefinition, ListDefinitions, ListItemId, ListValue};
use crate::types::value::Value;
use format::{RawStory, RawValue, container_flags};
use std::collections::HashMap;
use std::rc::Rc;

pub use builder::{Label, StoryBuilder};

/// A knot, stitch, function or anonymous container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: Option<String>,
    /// Address of the start marker.
    pub start: usize,
    /// Address of the end marker.
    pub end: usize,
    pub flags: u8,
}

impl ContainerInfo {
    pub fn tracks_visits(&self) -> bool {
        self.flags & container_flags::TRACK_VISITS != 0
    }

    pub fn tracks_turns(&self) -> bool {
        self.flags & container_flags::TRACK_TURNS != 0
    }

    pub fn is_knot(&self) -> bool {
        self.flags & container_flags::KNOT != 0
    }

    pub fn is_function(&self) -> bool {
        self.flags & container_flags::FUNCTION != 0
    }

    fn encloses(&self, address: usize) -> bool {
        self.start < address && address <= self.end
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GlobalDecl {
    pub name: String,
    pub default: Value,
}

struct StoryData {
    instructions: Vec<Instruction>,
    strings: Vec<String>,
    lists: Rc<ListDefinitions>,
    list_literals: Vec<ListValue>,
    globals: Vec<GlobalDecl>,
    global_index: HashMap<String, usize>,
    containers: Vec<ContainerInfo>,
    paths: HashMap<String, u32>,
    structure_hash: [u8; 16],
}

#[derive(Clone)]
pub struct Story {
    data: Rc<StoryData>,
}

impl std::fmt::Debug for Story {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Story")
            .field("instructions", &self.data.instructions.len())
            .field("containers", &self.data.containers.len())
            .field("globals", &self.data.globals.len())
            .finish()
    }
}

impl Story {
    /// Loads a compiled story blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Story> {
        let raw = format::decode(bytes)?;
        let story = Self::from_raw(raw)?;
        log::debug!(
            "loaded story: {} instructions, {} containers, {} globals",
            story.data.instructions.len(),
            story.data.containers.len(),
            story.data.globals.len()
        );
        Ok(story)
    }

    /// Reads and loads a compiled story file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Story> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            InkError::invalid_format(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_bytes(&bytes)
    }

    fn from_raw(raw: RawStory) -> Result<Story> {
        let strings = raw.strings;
        let string = |index: u32| -> Result<&str> {
            strings
                .get(index as usize)
                .map(String::as_str)
                .ok_or_else(|| InkError::invalid_format(format!("string index {index} out of range")))
        };

        if raw.lists.len() > u16::MAX as usize {
            return Err(InkError::invalid_format("too many list definitions"));
        }
        let mut definitions = Vec::with_capacity(raw.lists.len());
        for list in &raw.lists {
            let mut flags = Vec::with_capacity(list.flags.len());
            for (name, value) in &list.flags {
                flags.push((string(*name)?.to_string(), *value));
            }
            definitions.push(ListDefinition {
                name: string(list.name)?.to_string(),
                flags,
            });
        }
        let lists = Rc::new(ListDefinitions::new(definitions));

        let mut list_literals = Vec::with_capacity(raw.list_literals.len());
        for literal in &raw.list_literals {
            let valid_origin = |list: u16| lists.list(list).is_some();
            let valid_item = |item: &ListItemId| lists.flag_name(*item).is_some();
            if !literal.origins.iter().all(|o| valid_origin(*o)) || !literal.items.iter().all(valid_item) {
                return Err(InkError::invalid_format("list literal references unknown flag"));
            }
            list_literals.push(ListValue::from_parts(
                Rc::clone(&lists),
                literal.items.iter().copied(),
                literal.origins.iter().copied(),
            ));
        }

        let instruction_count = raw.instructions.len();
        let decode_value = |value: RawValue| -> Result<Value> {
            Ok(match value {
                RawValue::None => Value::None,
                RawValue::Bool(b) => Value::Bool(b),
                RawValue::Int(i) => Value::Int(i),
                RawValue::Float(f) => Value::Float(f),
                RawValue::Str(s) => Value::Str(string(s)?.to_string()),
                RawValue::List(l) => Value::List(
                    list_literals
                        .get(l as usize)
                        .cloned()
                        .ok_or_else(|| InkError::invalid_format(format!("list literal {l} out of range")))?,
                ),
                RawValue::Divert(d) if (d as usize) <= instruction_count => Value::Divert(d),
                RawValue::Divert(d) => {
                    return Err(InkError::invalid_format(format!("divert target {d} out of range")));
                }
            })
        };

        let mut globals = Vec::with_capacity(raw.globals.len());
        let mut global_index = HashMap::new();
        for (name, value) in &raw.globals {
            let name = string(*name)?.to_string();
            if global_index.insert(name.clone(), globals.len()).is_some() {
                return Err(InkError::invalid_format(format!("global '{name}' declared twice")));
            }
            globals.push(GlobalDecl {
                name,
                default: decode_value(*value)?,
            });
        }

        let mut containers = Vec::with_capacity(raw.containers.len());
        let mut paths = HashMap::new();
        for (id, container) in raw.containers.iter().enumerate() {
            let (start, end) = (container.start as usize, container.end as usize);
            let marker = |address: usize, command: Command| {
                raw.instructions
                    .get(address)
                    .is_some_and(|i| i.command == command && i.payload as usize == id)
            };
            if start > end
                || !marker(start, Command::StartContainerMarker)
                || !marker(end, Command::EndContainerMarker)
            {
                return Err(InkError::invalid_format(format!(
                    "container {id} has inconsistent markers"
                )));
            }
            let name = if container.name == format::NO_NAME {
                None
            } else {
                let name = string(container.name)?.to_string();
                paths.insert(name.clone(), id as u32);
                Some(name)
            };
            containers.push(ContainerInfo {
                name,
                start,
                end,
                flags: container.flags,
            });
        }

        for (ip, instruction) in raw.instructions.iter().enumerate() {
            let payload = instruction.payload as usize;
            let valid = match instruction.command {
                Command::Tunnel | Command::Function | Command::Thread
                    if instruction.has_flag(flags::TO_VARIABLE) =>
                {
                    payload < strings.len()
                }
                command if command.has_address() => payload <= instruction_count,
                Command::Str
                | Command::Tag
                | Command::DivertToVariable
                | Command::DefineTemp
                | Command::SetVariable
                | Command::PushVariableValue
                | Command::ValuePointer
                | Command::CallExternal => payload < strings.len(),
                Command::ReadCount | Command::StartContainerMarker | Command::EndContainerMarker => {
                    payload < containers.len()
                }
                Command::List => payload < list_literals.len(),
                _ => true,
            };
            if !valid {
                return Err(InkError::invalid_format(format!(
                    "instruction {ip} ({:?}) has out of range payload {payload}",
                    instruction.command
                )));
            }
        }

        let structure_hash = structure_hash(&globals, &lists);
        Ok(Story {
            data: Rc::new(StoryData {
                instructions: raw.instructions,
                strings,
                lists,
                list_literals,
                globals,
                global_index,
                containers,
                paths,
                structure_hash,
            }),
        })
    }

    /// Creates a fresh globals store holding the declared defaults.
    pub fn new_globals(&self) -> Globals {
        Globals::new(self.clone())
    }

    /// Creates a runner. Without `globals` a fresh store is created.
    pub fn new_runner(&self, globals: Option<Globals>) -> Result<Runner> {
        self.new_runner_with_config(globals, RunnerConfig::default())
    }

    pub fn new_runner_with_config(
        &self,
        globals: Option<Globals>,
        config: RunnerConfig,
    ) -> Result<Runner> {
        let globals = self.bind_globals(globals)?;
        Ok(Runner::new(self.clone(), globals, config))
    }

    /// Restores the globals stored in `snapshot`.
    pub fn new_globals_from_snapshot(&self, snapshot: &Snapshot) -> Result<Globals> {
        snapshot.restore_globals(self)
    }

    /// Restores runner `index` from `snapshot`.
    ///
    /// With `globals` given, only the runner state is restored and bound to
    /// that store. Otherwise the snapshot's globals are used when present, or
    /// a fresh store is created for runner-only snapshots.
    pub fn new_runner_from_snapshot(
        &self,
        snapshot: &Snapshot,
        globals: Option<Globals>,
        index: usize,
    ) -> Result<Runner> {
        snapshot.restore_runner(self, globals, index, RunnerConfig::default())
    }

    pub(crate) fn bind_globals(&self, globals: Option<Globals>) -> Result<Globals> {
        match globals {
            Some(globals) if !globals.story().same_structure(self) => Err(InkError::snapshot_mismatch(
                "globals store belongs to a structurally different story",
            )),
            Some(globals) => Ok(globals),
            None => Ok(self.new_globals()),
        }
    }

    /// Names of all knots and stitches, in declaration order.
    pub fn knots(&self) -> impl Iterator<Item = &str> {
        self.data
            .containers
            .iter()
            .filter(|c| c.is_knot())
            .filter_map(|c| c.name.as_deref())
    }

    pub fn list_definitions(&self) -> &Rc<ListDefinitions> {
        &self.data.lists
    }

    /// Declared globals with their default values.
    pub fn declared_globals(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.data
            .globals
            .iter()
            .map(|g| (g.name.as_str(), &g.default))
    }

    pub(crate) fn globals_table(&self) -> &[GlobalDecl] {
        &self.data.globals
    }

    pub(crate) fn global_index(&self, name: &str) -> Option<usize> {
        self.data.global_index.get(name).copied()
    }

    pub(crate) fn instruction(&self, ip: usize) -> Option<Instruction> {
        self.data.instructions.get(ip).copied()
    }

    pub(crate) fn instruction_count(&self) -> usize {
        self.data.instructions.len()
    }

    /// String table entry. Indices were range-checked at load.
    pub(crate) fn string(&self, index: u32) -> &str {
        self.data
            .strings
            .get(index as usize)
            .map_or("", String::as_str)
    }

    pub(crate) fn list_literal(&self, index: u32) -> Value {
        self.data
            .list_literals
            .get(index as usize)
            .cloned()
            .map_or(Value::None, Value::List)
    }

    pub(crate) fn container(&self, id: u32) -> Option<&ContainerInfo> {
        self.data.containers.get(id as usize)
    }

    pub(crate) fn container_count(&self) -> usize {
        self.data.containers.len()
    }

    /// Container whose start marker sits at `address`.
    pub(crate) fn container_starting_at(&self, address: usize) -> Option<u32> {
        self.data
            .containers
            .iter()
            .position(|c| c.start == address)
            .map(|id| id as u32)
    }

    /// Containers active when execution resumes at `address`, outermost first.
    pub(crate) fn enclosing_containers(&self, address: usize) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .data
            .containers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.encloses(address))
            .map(|(id, _)| id as u32)
            .collect();
        ids.sort_by_key(|id| self.data.containers[*id as usize].start);
        ids
    }

    /// Looks up a knot, stitch or function by its full path (`knot.stitch`).
    pub(crate) fn find_path(&self, path: &str) -> Option<u32> {
        self.data.paths.get(path).copied()
    }

    /// Entry address of an ink function usable as external fallback.
    pub(crate) fn fallback_function(&self, name: &str) -> Option<usize> {
        let id = self.find_path(name)?;
        let container = self.container(id)?;
        container.is_function().then_some(container.start)
    }

    pub(crate) fn structure_hash(&self) -> [u8; 16] {
        self.data.structure_hash
    }

    pub(crate) fn same_structure(&self, other: &Story) -> bool {
        Rc::ptr_eq(&self.data, &other.data) || self.structure_hash() == other.structure_hash()
    }
}

/// md5 over the declared globals (name and kind) and list definitions.
fn structure_hash(globals: &[GlobalDecl], lists: &ListDefinitions) -> [u8; 16] {
    let mut text = String::new();
    for global in globals {
        text.push_str(&format!("var {}:{}\n", global.name, global.default.kind()));
    }
    for list in lists.iter() {
        text.push_str(&format!("list {}", list.name));
        for (flag, value) in &list.flags {
            text.push_str(&format!(" {flag}={value}"));
        }
        text.push('\n');
    }
    md5::compute(text.as_bytes()).0
}
