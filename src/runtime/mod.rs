//! Story execution
//!
//! A [`Runner`] walks the instruction table, producing lines of text, tags
//! and choices. After each newline it keeps executing on a checkpoint to see
//! whether the next content glues onto the line; depending on what follows,
//! the speculative work is either committed or rolled back.

pub mod callstack;
pub mod debug;
mod ops;
pub mod output;
#[cfg(test)]
mod tests;

use crate::config::RunnerConfig;
use crate::error::{InkError, Result};
use crate::functions::{ExternalFunction, Functions};
use crate::globals::{Globals, SpeculationId};
use crate::story::Story;
use crate::types::choice::Choice;
use crate::types::command::{Command, Instruction, flags};
use crate::types::tags::{AllTags, TagScope, TagState};
use crate::types::value::Value;
use callstack::{CallStack, FrameKind, SuspendedFlow};
use debug::{DebugCategory, LogLevel};
use output::{OutputStream, Piece};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Coarse state of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStatus {
    /// Nothing to read and nothing to choose.
    Idle,
    /// `getline` will produce more content.
    HasOutput,
    /// Waiting for `choose`.
    HasChoices,
    /// A script error occurred; the runner is unusable.
    Error,
}

/// Deterministic random source. Every draw reseeds from `seed + draws`, so
/// the whole generator state is two integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RngState {
    pub seed: u64,
    pub draws: u64,
}

impl RngState {
    pub fn new(seed: u64) -> Self {
        Self { seed, draws: 0 }
    }

    fn generator(&mut self) -> StdRng {
        let rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.draws));
        self.draws += 1;
        rng
    }

    /// Uniform integer in `min..=max` (bounds may come in either order).
    pub fn range(&mut self, min: i32, max: i32) -> i32 {
        let (low, high) = if min <= max { (min, max) } else { (max, min) };
        self.generator().gen_range(low..=high)
    }
}

/// Everything a lookahead checkpoint or snapshot has to capture.
#[derive(Debug, Clone)]
pub(crate) struct ExecState {
    pub ip: Option<usize>,
    pub eval_mode: bool,
    pub eval: Vec<Value>,
    pub callstack: CallStack,
    /// Parents of the running thread, innermost last.
    pub threads: Vec<SuspendedFlow>,
    pub output: OutputStream,
    pub containers: Vec<u32>,
    pub choices: Vec<Choice>,
    pub fallback_choice: Option<Choice>,
    pub visits: Vec<u32>,
    pub turn_visited: Vec<Option<u32>>,
    pub turn: u32,
    pub tags: TagState,
    pub rng: RngState,
    pub ended: bool,
}

impl ExecState {
    fn new(story: &Story, seed: u64) -> Self {
        let containers = story.container_count();
        Self {
            ip: (story.instruction_count() > 0).then_some(0),
            eval_mode: false,
            eval: Vec::new(),
            callstack: CallStack::default(),
            threads: Vec::new(),
            output: OutputStream::default(),
            containers: Vec::new(),
            choices: Vec::new(),
            fallback_choice: None,
            visits: vec![0; containers],
            turn_visited: vec![None; containers],
            turn: 0,
            tags: TagState::default(),
            rng: RngState::new(seed),
            ended: false,
        }
    }
}

struct Checkpoint {
    state: ExecState,
    output_len: usize,
    callback_errors: Vec<InkError>,
    speculation: SpeculationId,
}

/// How the output changed since the last checkpoint.
enum Change {
    None,
    NewlineRemoved,
    ExtendedPastNewline,
}

pub struct Runner {
    story: Story,
    globals: Globals,
    functions: Functions,
    config: RunnerConfig,
    state: ExecState,
    checkpoint: Option<Checkpoint>,
    failure: Option<String>,
    callback_errors: Vec<InkError>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("ip", &self.state.ip)
            .field("status", &self.status())
            .field("choices", &self.state.choices.len())
            .finish_non_exhaustive()
    }
}

impl Runner {
    pub(crate) fn new(story: Story, globals: Globals, config: RunnerConfig) -> Self {
        let state = ExecState::new(&story, config.initial_seed());
        Self::from_state(story, globals, config, state)
    }

    pub(crate) fn from_state(
        story: Story,
        globals: Globals,
        config: RunnerConfig,
        state: ExecState,
    ) -> Self {
        Self {
            story,
            globals,
            functions: Functions::default(),
            config,
            state,
            checkpoint: None,
            failure: None,
            callback_errors: Vec::new(),
        }
    }

    pub(crate) fn exec_state(&self) -> &ExecState {
        &self.state
    }

    pub fn story(&self) -> &Story {
        &self.story
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn trace(&self, category: DebugCategory, level: LogLevel, message: impl FnOnce() -> String) {
        if self.config.debug.is_enabled(category, level) {
            debug::log(&self.config.debug, category, level, &message());
        }
    }

    // Externals

    /// Binds an external function, replacing any previous binding.
    pub fn bind(&mut self, name: &str, function: ExternalFunction) {
        self.trace(DebugCategory::Externals, LogLevel::Debug, || {
            format!("bind '{name}' ({function:?})")
        });
        self.functions.bind(name, function);
    }

    pub fn unbind(&mut self, name: &str) -> bool {
        self.functions.unbind(name).is_some()
    }

    /// Observer and external failures isolated since the last call.
    pub fn take_callback_errors(&mut self) -> Vec<InkError> {
        std::mem::take(&mut self.callback_errors)
    }

    fn record_callback_error(&mut self, error: InkError) {
        match self.checkpoint.as_mut() {
            Some(checkpoint) => checkpoint.callback_errors.push(error),
            None => self.callback_errors.push(error),
        }
    }

    // State machine

    pub fn status(&self) -> RunnerStatus {
        if self.failure.is_some() {
            RunnerStatus::Error
        } else if self.can_continue() {
            RunnerStatus::HasOutput
        } else if self.has_choices() {
            RunnerStatus::HasChoices
        } else {
            RunnerStatus::Idle
        }
    }

    pub(crate) fn ensure_usable(&self) -> Result<()> {
        match &self.failure {
            Some(reason) => Err(InkError::invalid_state(format!(
                "runner stopped after an error: {reason}"
            ))),
            None => Ok(()),
        }
    }

    fn fail(&mut self, error: InkError) -> InkError {
        if let Some(checkpoint) = self.checkpoint.take() {
            self.state = checkpoint.state;
            self.globals.rollback_speculation(checkpoint.speculation);
        }
        log::error!("runner failed: {error}");
        self.failure = Some(error.to_string());
        error
    }

    pub fn can_continue(&self) -> bool {
        self.failure.is_none() && self.state.ip.is_some()
    }

    /// True once the story reached `END`.
    pub fn is_ended(&self) -> bool {
        self.state.ended
    }

    /// Runs until one line of output is complete, a choice point is reached
    /// or the story stops.
    pub fn getline(&mut self) -> Result<String> {
        self.ensure_usable()?;
        if self.state.ip.is_none() {
            return Err(InkError::invalid_state("no content to continue"));
        }
        self.state.tags.clear_line();
        if let Err(error) = self.advance_line() {
            return Err(self.fail(error));
        }
        let line = self.state.output.take_line();
        self.trace(DebugCategory::Output, LogLevel::Debug, || format!("line {line:?}"));
        Ok(line)
    }

    /// Concatenates lines until the runner cannot continue.
    pub fn getall(&mut self) -> Result<String> {
        let mut text = String::new();
        while self.can_continue() {
            text.push_str(&self.getline()?);
        }
        Ok(text)
    }

    fn advance_line(&mut self) -> Result<()> {
        loop {
            let Some(ip) = self.state.ip else {
                if self.take_fallback_choice() {
                    continue;
                }
                break;
            };

            if self.checkpoint.is_some() && self.blocks_lookahead(ip) {
                self.trace(DebugCategory::Lookahead, LogLevel::Debug, || {
                    format!("unsafe external at {ip}, line ends")
                });
                self.restore_checkpoint();
                return Ok(());
            }

            if let Err(error) = self.step(ip) {
                if self.checkpoint.is_some() {
                    self.trace(DebugCategory::Lookahead, LogLevel::Debug, || {
                        format!("error during lookahead, line ends: {error}")
                    });
                    self.restore_checkpoint();
                    return Ok(());
                }
                return Err(error);
            }

            if self.state.output.has_marker() {
                continue;
            }

            if let Some(saved) = self.checkpoint.as_ref().map(|c| c.output_len) {
                match self.detect_change(saved) {
                    Change::ExtendedPastNewline => {
                        self.restore_checkpoint();
                        return Ok(());
                    }
                    Change::NewlineRemoved => self.commit_checkpoint(),
                    Change::None => {}
                }
            }

            if self.checkpoint.is_none() && self.state.output.ends_with_newline() {
                if !self.config.lookahead {
                    return Ok(());
                }
                if self.state.ip.is_some() {
                    self.save_checkpoint();
                }
            }
        }
        self.commit_checkpoint();
        Ok(())
    }

    fn detect_change(&self, saved: usize) -> Change {
        let output = &self.state.output;
        if saved == 0 || !output.newline_at(saved - 1) {
            Change::NewlineRemoved
        } else if output.has_text_since(saved) {
            Change::ExtendedPastNewline
        } else {
            Change::None
        }
    }

    /// Whether executing `ip` speculatively would call an unsafe external.
    fn blocks_lookahead(&self, ip: usize) -> bool {
        match self.story.instruction(ip) {
            Some(Instruction {
                command: Command::CallExternal,
                payload,
                ..
            }) => self
                .functions
                .get(self.story.string(payload))
                .is_some_and(|f| !f.is_lookahead_safe()),
            _ => false,
        }
    }

    fn save_checkpoint(&mut self) {
        self.trace(DebugCategory::Lookahead, LogLevel::Trace, || {
            format!("checkpoint at {:?}", self.state.ip)
        });
        self.checkpoint = Some(Checkpoint {
            state: self.state.clone(),
            output_len: self.state.output.len(),
            callback_errors: Vec::new(),
            speculation: self.globals.begin_speculation(),
        });
    }

    fn restore_checkpoint(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            self.trace(DebugCategory::Lookahead, LogLevel::Trace, || {
                format!("rollback to {:?}", checkpoint.state.ip)
            });
            self.state = checkpoint.state;
            self.globals.rollback_speculation(checkpoint.speculation);
        }
    }

    fn commit_checkpoint(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            self.callback_errors.extend(checkpoint.callback_errors);
            let errors = self.globals.commit_speculation(checkpoint.speculation);
            self.callback_errors.extend(errors);
        }
    }

    // Choices

    pub fn has_choices(&self) -> bool {
        self.failure.is_none() && self.state.ip.is_none() && !self.state.choices.is_empty()
    }

    pub fn num_choices(&self) -> usize {
        if self.has_choices() {
            self.state.choices.len()
        } else {
            0
        }
    }

    pub fn get_choice(&self, index: usize) -> Option<&Choice> {
        self.choices().get(index)
    }

    pub fn choices(&self) -> &[Choice] {
        if self.has_choices() {
            &self.state.choices
        } else {
            &[]
        }
    }

    /// Selects choice `index` and makes the runner continuable again.
    pub fn choose(&mut self, index: usize) -> Result<()> {
        self.ensure_usable()?;
        let available = self.num_choices();
        if index >= available {
            return Err(InkError::InvalidChoiceIndex { index, available });
        }
        let choice = self.state.choices[index].clone();
        self.trace(DebugCategory::Flow, LogLevel::Debug, || {
            format!("choose {index} {:?} -> {}", choice.text, choice.target)
        });
        self.select(choice);
        Ok(())
    }

    fn select(&mut self, choice: Choice) {
        self.state.choices.clear();
        self.state.fallback_choice = None;
        self.state.tags.clear_line();
        self.state.callstack = CallStack::from_frames(choice.frames);
        self.state.threads.clear();
        self.state.eval_mode = false;
        self.state.turn += 1;
        self.jump(choice.target);
    }

    fn take_fallback_choice(&mut self) -> bool {
        if self.state.ended || !self.state.choices.is_empty() {
            return false;
        }
        match self.state.fallback_choice.take() {
            Some(choice) => {
                self.trace(DebugCategory::Flow, LogLevel::Debug, || {
                    format!("taking fallback choice -> {}", choice.target)
                });
                self.select(choice);
                true
            }
            None => false,
        }
    }

    // Tags

    pub fn current_knot(&self) -> Option<&str> {
        self.state
            .containers
            .iter()
            .rev()
            .filter_map(|id| self.story.container(*id))
            .find(|container| container.is_knot())
            .and_then(|container| container.name.as_deref())
    }

    pub fn tags(&self, scope: TagScope) -> &[String] {
        self.state.tags.tags(scope)
    }

    pub fn all_tags(&self) -> AllTags {
        self.state.tags.all()
    }

    pub fn num_tags(&self) -> usize {
        self.tags(TagScope::Line).len()
    }

    pub fn has_tags(&self) -> bool {
        self.num_tags() > 0
    }

    pub fn get_tag(&self, index: usize) -> Option<&str> {
        self.tags(TagScope::Line).get(index).map(String::as_str)
    }

    pub fn num_global_tags(&self) -> usize {
        self.tags(TagScope::Global).len()
    }

    pub fn has_global_tags(&self) -> bool {
        self.num_global_tags() > 0
    }

    pub fn get_global_tag(&self, index: usize) -> Option<&str> {
        self.tags(TagScope::Global).get(index).map(String::as_str)
    }

    pub fn num_knot_tags(&self) -> usize {
        self.tags(TagScope::Knot).len()
    }

    pub fn has_knot_tags(&self) -> bool {
        self.num_knot_tags() > 0
    }

    pub fn get_knot_tag(&self, index: usize) -> Option<&str> {
        self.tags(TagScope::Knot).get(index).map(String::as_str)
    }

    // Navigation and counters

    /// Jumps to the start of a knot or stitch, dropping pending output,
    /// choices and the call stack.
    pub fn move_to(&mut self, path: &str) -> Result<()> {
        self.ensure_usable()?;
        let container = self
            .story
            .find_path(path)
            .and_then(|id| self.story.container(id))
            .ok_or_else(|| InkError::invalid_state(format!("unknown path '{path}'")))?;
        let start = container.start;
        self.state.output = OutputStream::default();
        self.state.choices.clear();
        self.state.fallback_choice = None;
        self.state.eval.clear();
        self.state.eval_mode = false;
        self.state.callstack.clear();
        self.state.threads.clear();
        self.state.tags.clear_line();
        self.state.ended = false;
        self.jump(start);
        Ok(())
    }

    /// Times the named container was entered, if it tracks visits.
    pub fn visit_count(&self, path: &str) -> Option<u32> {
        let id = self.story.find_path(path)?;
        self.state.visits.get(id as usize).copied()
    }

    /// Number of choices taken so far.
    pub fn turn(&self) -> u32 {
        self.state.turn
    }

    // Execution

    fn jump(&mut self, target: usize) {
        self.trace(DebugCategory::Flow, LogLevel::Trace, || format!("jump -> {target}"));
        self.state.ip = Some(target);
        self.state.containers = self.story.enclosing_containers(target);
    }

    fn push(&mut self, value: Value) {
        self.state.eval.push(value);
    }

    pub(crate) fn pop(&mut self, ip: usize) -> Result<Value> {
        self.state
            .eval
            .pop()
            .ok_or_else(|| InkError::runtime(ip, "evaluation stack underflow"))
    }

    /// Pushes in evaluation mode, outputs otherwise.
    fn push_or_output(&mut self, value: Value) {
        if self.state.eval_mode {
            self.push(value);
        } else {
            self.append_text(&value.to_string());
        }
    }

    fn append_text(&mut self, text: &str) {
        self.state.output.append_text(text);
        if !text.trim().is_empty() && !self.state.output.has_marker() {
            self.state.tags.content_started();
        }
    }

    fn add_tag(&mut self, tag: String) {
        if self.state.output.pieces().contains(&Piece::StringMarker) {
            self.state.tags.push_choice_tag(tag);
        } else {
            self.state.tags.push(tag);
        }
    }

    fn step(&mut self, ip: usize) -> Result<()> {
        let Some(instruction) = self.story.instruction(ip) else {
            self.stop(false);
            return Ok(());
        };
        self.state.ip = Some(ip + 1);
        let Instruction {
            command,
            flag,
            payload,
        } = instruction;

        match command {
            Command::Str => {
                let text = self.story.string(payload).to_string();
                self.push_or_output(Value::Str(text));
            }
            Command::Int => self.push_or_output(Value::Int(payload as i32)),
            Command::Bool => self.push_or_output(Value::Bool(payload != 0)),
            Command::Float => self.push_or_output(Value::Float(f32::from_bits(payload))),
            Command::DivertValue => self.push(Value::Divert(payload)),
            Command::List => {
                let list = self.story.list_literal(payload);
                self.push_or_output(list);
            }
            Command::Newline => {
                if self.state.eval_mode {
                    self.push(Value::Str("\n".to_string()));
                } else {
                    self.state.output.append_newline();
                }
            }
            Command::Glue => self.state.output.append_glue(),
            Command::Void => self.push(Value::None),
            Command::Tag => {
                let tag = self.story.string(payload).to_string();
                self.add_tag(tag);
            }

            Command::Divert => {
                if instruction.has_flag(flags::DIVERT_HAS_CONDITION) && !self.pop(ip)?.is_truthy() {
                    return Ok(());
                }
                self.jump(payload as usize);
            }
            Command::DivertToVariable => {
                let target = self.divert_target(self.story.string(payload).to_string(), ip)?;
                self.jump(target);
            }
            Command::Tunnel | Command::Function => {
                let target = if instruction.has_flag(flags::TO_VARIABLE) {
                    self.divert_target(self.story.string(payload).to_string(), ip)?
                } else {
                    payload as usize
                };
                self.call(command, target, ip + 1);
            }
            Command::Thread => {
                let target = if instruction.has_flag(flags::TO_VARIABLE) {
                    self.divert_target(self.story.string(payload).to_string(), ip)?
                } else {
                    payload as usize
                };
                self.fork(target, ip + 1);
            }
            Command::Done => self.stop(false),
            Command::End => self.stop(true),
            Command::TunnelReturn => self.return_from(FrameKind::Tunnel, ip)?,
            Command::FunctionReturn => self.return_from(FrameKind::Function, ip)?,

            Command::DefineTemp => {
                let value = self.pop(ip)?;
                let name = self.story.string(payload).to_string();
                let redirected = instruction.has_flag(flags::ASSIGNMENT_IS_REDEFINE)
                    && matches!(self.state.callstack.top().temp(&name), Some(Value::Pointer { .. }));
                if redirected {
                    self.write_variable(&name, value)?;
                } else {
                    self.state.callstack.top_mut().set_temp(&name, value);
                }
            }
            Command::SetVariable => {
                let value = self.pop(ip)?;
                let name = self.story.string(payload).to_string();
                self.write_variable(&name, value)?;
            }

            Command::StartEval => self.state.eval_mode = true,
            Command::EndEval => self.state.eval_mode = false,
            Command::Output => {
                let value = self.pop(ip)?;
                self.append_text(&value.to_string());
            }
            Command::Pop => {
                self.pop(ip)?;
            }
            Command::Duplicate => {
                let top = self
                    .state
                    .eval
                    .last()
                    .cloned()
                    .ok_or_else(|| InkError::runtime(ip, "duplicate on empty stack"))?;
                self.push(top);
            }
            Command::PushVariableValue => {
                let value = self.read_variable(self.story.string(payload))?;
                self.push(value);
            }
            Command::ValuePointer => {
                let name = self.story.string(payload).to_string();
                let pointer = self.pointer_to(name, flag);
                self.push(pointer);
            }
            Command::Visit => {
                let count = self
                    .state
                    .containers
                    .last()
                    .and_then(|id| self.state.visits.get(*id as usize))
                    .copied()
                    .unwrap_or(0);
                self.push(Value::Int(count.saturating_sub(1) as i32));
            }
            Command::Turn => self.push(Value::Int(self.state.turn as i32)),
            Command::ReadCount => {
                let count = self.state.visits.get(payload as usize).copied().unwrap_or(0);
                self.push(Value::Int(count as i32));
            }
            Command::Sequence => self.shuffle_index(ip)?,
            Command::Seed => {
                let seed = self.pop(ip)?;
                let seed = seed
                    .as_int()
                    .ok_or_else(|| InkError::runtime(ip, "seed must be numeric"))?;
                self.state.rng = RngState::new(seed as i64 as u64);
                self.push(Value::None);
            }
            Command::StartStr => {
                self.state.output.open_marker(Piece::StringMarker);
                self.state.eval_mode = false;
            }
            Command::EndStr => {
                let text = self
                    .state
                    .output
                    .close_marker(Piece::StringMarker)
                    .ok_or_else(|| InkError::runtime(ip, "end of string without start"))?;
                self.state.eval_mode = true;
                self.push(Value::Str(text));
            }
            Command::StartTag => self.state.output.open_marker(Piece::TagMarker),
            Command::EndTag => {
                let tag = self
                    .state
                    .output
                    .close_marker(Piece::TagMarker)
                    .ok_or_else(|| InkError::runtime(ip, "end of tag without start"))?;
                self.add_tag(tag);
            }
            Command::Choice => self.add_choice(instruction, ip)?,

            Command::ListRange => self.list_range(ip)?,
            command if command.is_binary_operator() => self.binary(command, ip)?,
            command if command.is_unary_operator() => self.unary(command, ip)?,

            Command::ChoiceCount => self.push(Value::Int(self.state.choices.len() as i32)),
            Command::StartContainerMarker => self.enter_container(payload),
            Command::EndContainerMarker => self.leave_container(payload, ip)?,
            Command::CallExternal => {
                let name = self.story.string(payload).to_string();
                self.call_external(&name, flag as usize, ip)?;
            }
            // Operators are dispatched by the guards above.
            _ => return Err(InkError::runtime(ip, format!("unexpected {command:?}"))),
        }
        Ok(())
    }

    fn stop(&mut self, end: bool) {
        if !end {
            if let Some(parent) = self.state.threads.pop() {
                self.trace(DebugCategory::Flow, LogLevel::Debug, || {
                    format!("thread done, resuming at {}", parent.resume_at)
                });
                self.state.callstack = parent.callstack;
                self.state.eval_mode = parent.eval_mode;
                self.jump(parent.resume_at);
                return;
            }
        }
        self.state.ip = None;
        if end {
            self.trace(DebugCategory::Flow, LogLevel::Debug, || "story ended".to_string());
            self.state.ended = true;
            self.state.choices.clear();
            self.state.fallback_choice = None;
            self.state.callstack.clear();
            self.state.threads.clear();
        }
    }

    /// Runs `target` on a copy of the call stack. The current flow resumes
    /// at `resume_at` once the thread is done; choices it gathers keep the
    /// thread's frames.
    fn fork(&mut self, target: usize, resume_at: usize) {
        self.state.threads.push(SuspendedFlow {
            callstack: self.state.callstack.clone(),
            resume_at,
            eval_mode: self.state.eval_mode,
        });
        self.trace(DebugCategory::Flow, LogLevel::Debug, || {
            format!("thread -> {target}, {} waiting", self.state.threads.len())
        });
        self.jump(target);
    }

    fn call(&mut self, command: Command, target: usize, return_to: usize) {
        let kind = if command == Command::Function {
            FrameKind::Function
        } else {
            FrameKind::Tunnel
        };
        self.state
            .callstack
            .push(kind, return_to, self.state.eval_mode);
        if kind == FrameKind::Function {
            self.state.output.append_function_start();
            self.state.eval_mode = false;
        }
        self.trace(DebugCategory::Flow, LogLevel::Debug, || {
            format!("{kind:?} call -> {target}, depth {}", self.state.callstack.depth())
        });
        self.jump(target);
    }

    fn return_from(&mut self, kind: FrameKind, ip: usize) -> Result<()> {
        let frame = self
            .state
            .callstack
            .pop(kind)
            .ok_or_else(|| InkError::runtime(ip, format!("{kind:?} return without call")))?;
        if kind == FrameKind::Function {
            self.state.output.append_function_end();
        }
        self.state.eval_mode = frame.caller_eval;
        self.jump(frame.return_to);
        Ok(())
    }

    fn enter_container(&mut self, id: u32) {
        self.state.containers.push(id);
        let Some(container) = self.story.container(id) else {
            return;
        };
        let index = id as usize;
        if container.tracks_visits() {
            self.state.visits[index] += 1;
        }
        if container.tracks_turns() {
            self.state.turn_visited[index] = Some(self.state.turn);
        }
        if container.is_knot() {
            self.trace(DebugCategory::Flow, LogLevel::Debug, || {
                format!("enter knot {:?}", container.name)
            });
            self.state.tags.enter_knot();
        }
    }

    fn leave_container(&mut self, id: u32, ip: usize) -> Result<()> {
        match self.state.containers.iter().rposition(|c| *c == id) {
            Some(position) => self.state.containers.truncate(position),
            None => return Err(InkError::runtime(ip, format!("left container {id} never entered"))),
        }
        let is_function = self.story.container(id).is_some_and(|c| c.is_function());
        if is_function && self.state.callstack.top_kind() == FrameKind::Function {
            self.push(Value::None);
            self.return_from(FrameKind::Function, ip)?;
        }
        Ok(())
    }

    fn add_choice(&mut self, instruction: Instruction, ip: usize) -> Result<()> {
        let condition = if instruction.has_flag(flags::CHOICE_HAS_CONDITION) {
            self.pop(ip)?.is_truthy()
        } else {
            true
        };
        let choice_only = if instruction.has_flag(flags::CHOICE_HAS_CHOICE_ONLY_CONTENT) {
            self.pop(ip)?.to_string()
        } else {
            String::new()
        };
        let start = if instruction.has_flag(flags::CHOICE_HAS_START_CONTENT) {
            self.pop(ip)?.to_string()
        } else {
            String::new()
        };
        let tags = self.state.tags.take_choice_tags();
        if !condition {
            return Ok(());
        }

        let target = instruction.payload as usize;
        if instruction.has_flag(flags::CHOICE_IS_ONCE_ONLY) {
            let visited = self
                .story
                .container_starting_at(target)
                .and_then(|id| self.state.visits.get(id as usize))
                .is_some_and(|count| *count > 0);
            if visited {
                return Ok(());
            }
        }

        let text = format!("{start}{choice_only}")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let choice = Choice {
            index: self.state.choices.len(),
            text,
            tags,
            target,
            frames: self.state.callstack.frames().to_vec(),
        };
        if instruction.has_flag(flags::CHOICE_IS_INVISIBLE_DEFAULT) {
            self.state.fallback_choice = Some(choice);
        } else {
            self.state.choices.push(choice);
        }
        Ok(())
    }

    // Variables

    fn read_variable(&self, name: &str) -> Result<Value> {
        match self.state.callstack.top().temp(name) {
            Some(Value::Pointer { name, frame }) => self.read_at(name, *frame),
            Some(value) => Ok(value.clone()),
            None => self.globals.get(name),
        }
    }

    /// Reads a temp of the given frame, or a global when `frame` is `None`.
    fn read_at(&self, name: &str, frame: Option<usize>) -> Result<Value> {
        match frame {
            Some(index) => self
                .state
                .callstack
                .frame(index)
                .and_then(|f| f.temp(name))
                .cloned()
                .ok_or_else(|| InkError::unknown_variable(name)),
            None => self.globals.get(name),
        }
    }

    /// Builds a reference for `ref` parameters. A temp that already holds a
    /// reference is passed on as that reference, so chains stay one hop.
    fn pointer_to(&self, name: String, flag: u8) -> Value {
        let callstack = &self.state.callstack;
        let frame = match flag {
            flags::POINTER_RESOLVE => {
                let top = callstack.depth() - 1;
                callstack.top().temp(&name).is_some().then_some(top)
            }
            flags::POINTER_GLOBAL => None,
            n => Some(n as usize - 2),
        };
        if let Some(pointer @ Value::Pointer { .. }) =
            frame.and_then(|index| callstack.frame(index)).and_then(|f| f.temp(&name))
        {
            return pointer.clone();
        }
        Value::Pointer { name, frame }
    }

    fn write_variable(&mut self, name: &str, value: Value) -> Result<()> {
        let top = self.state.callstack.depth() - 1;
        let (name, frame) = match self.state.callstack.top().temp(name) {
            Some(Value::Pointer { name, frame }) => (name.clone(), *frame),
            Some(_) => (name.to_string(), Some(top)),
            None => (name.to_string(), None),
        };
        if let Some(index) = frame {
            let slot = self
                .state
                .callstack
                .frame_mut(index)
                .ok_or_else(|| InkError::unknown_variable(&name))?;
            slot.set_temp(&name, value);
            return Ok(());
        }
        self.trace(DebugCategory::Variables, LogLevel::Debug, || format!("{name} = {value}"));
        match self.globals.set(&name, value) {
            Err(error) if error.is_callback() => {
                self.record_callback_error(error);
                Ok(())
            }
            result => result,
        }
    }

    fn divert_target(&self, variable: String, ip: usize) -> Result<usize> {
        match self.read_variable(&variable)? {
            Value::Divert(target) => Ok(target as usize),
            other => Err(InkError::runtime(
                ip,
                format!("variable '{variable}' holds {} instead of a divert", other.kind()),
            )),
        }
    }

    fn call_external(&mut self, name: &str, arguments: usize, ip: usize) -> Result<()> {
        if self.state.eval.len() < arguments {
            return Err(InkError::runtime(ip, format!("not enough arguments for '{name}'")));
        }
        let args = self.state.eval.split_off(self.state.eval.len() - arguments);

        let Some(function) = self.functions.get_mut(name) else {
            return match self.story.fallback_function(name) {
                Some(address) => {
                    self.trace(DebugCategory::Externals, LogLevel::Debug, || {
                        format!("'{name}' unbound, using story fallback")
                    });
                    self.state.eval.extend(args);
                    self.call(Command::Function, address, ip + 1);
                    Ok(())
                }
                None => Err(InkError::UnboundExternal {
                    name: name.to_string(),
                }),
            };
        };

        if let Some(expected) = function.expected_arity() {
            if expected != arguments {
                return Err(InkError::ExternalArity {
                    name: name.to_string(),
                    expected,
                    actual: arguments,
                });
            }
        }
        let returns_value = function.returns_value();
        let result = function.call(&args);
        self.trace(DebugCategory::Externals, LogLevel::Debug, || {
            format!("external '{name}'({} args) -> {result:?}", args.len())
        });
        match result {
            Ok(value) if returns_value && value.is_none() => Err(InkError::ExternalReturnMissing {
                name: name.to_string(),
            }),
            Ok(value) => {
                self.push(if returns_value { value } else { Value::None });
                Ok(())
            }
            Err(error) => {
                log::warn!("external '{name}' failed: {error:#}");
                self.record_callback_error(InkError::callback(name, error));
                self.push(Value::None);
                Ok(())
            }
        }
    }
}
