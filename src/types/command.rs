//! Bytecode instruction set
//!
//! Every instruction is a fixed record of command byte, flag byte and a
//! 32-bit payload. The payload is an index into the string table, a jump
//! address, a container id or an immediate value depending on the command.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    // Value pushes and output
    Str = 0,
    Int,
    Bool,
    Float,
    DivertValue,
    List,
    Newline,
    Glue,
    Void,
    Tag,

    // Control flow
    Divert,
    DivertToVariable,
    Tunnel,
    Function,
    Done,
    End,
    TunnelReturn,
    FunctionReturn,

    // Variables
    DefineTemp,
    SetVariable,

    // Evaluation
    StartEval,
    EndEval,
    Output,
    Pop,
    Duplicate,
    PushVariableValue,
    Visit,
    Turn,
    ReadCount,
    Sequence,
    Seed,
    StartStr,
    EndStr,
    StartTag,
    EndTag,
    Choice,

    // Ternary
    ListRange,

    // Binary operators
    Add,
    Subtract,
    Divide,
    Multiply,
    Mod,
    Random,
    IsEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEquals,
    LessThanOrEquals,
    NotEqual,
    And,
    Or,
    Min,
    Max,
    Has,
    Hasnt,
    Intersection,
    ListInt,

    // Unary operators
    Not,
    Negate,
    ListCount,
    ListMin,
    ListMax,
    ReadCountVar,
    Turns,
    ListRandom,
    Floor,
    Ceiling,
    IntCast,
    FloatCast,
    ListAll,
    ListInvert,
    ListValue,

    ChoiceCount,
    StartContainerMarker,
    EndContainerMarker,
    CallExternal,

    // Threads and references
    /// Runs the target on a forked call stack, then resumes after this
    /// instruction once the thread is done.
    Thread,
    /// Pushes a reference to the variable named by the payload. The flag is
    /// the variable's context plus one: 0 resolves at runtime, 1 is the
    /// global scope and `n + 2` the temporaries of call frame `n`.
    ValuePointer,
}

impl Command {
    const ALL: [Command; 78] = [
        Command::Str,
        Command::Int,
        Command::Bool,
        Command::Float,
        Command::DivertValue,
        Command::List,
        Command::Newline,
        Command::Glue,
        Command::Void,
        Command::Tag,
        Command::Divert,
        Command::DivertToVariable,
        Command::Tunnel,
        Command::Function,
        Command::Done,
        Command::End,
        Command::TunnelReturn,
        Command::FunctionReturn,
        Command::DefineTemp,
        Command::SetVariable,
        Command::StartEval,
        Command::EndEval,
        Command::Output,
        Command::Pop,
        Command::Duplicate,
        Command::PushVariableValue,
        Command::Visit,
        Command::Turn,
        Command::ReadCount,
        Command::Sequence,
        Command::Seed,
        Command::StartStr,
        Command::EndStr,
        Command::StartTag,
        Command::EndTag,
        Command::Choice,
        Command::ListRange,
        Command::Add,
        Command::Subtract,
        Command::Divide,
        Command::Multiply,
        Command::Mod,
        Command::Random,
        Command::IsEqual,
        Command::GreaterThan,
        Command::LessThan,
        Command::GreaterThanOrEquals,
        Command::LessThanOrEquals,
        Command::NotEqual,
        Command::And,
        Command::Or,
        Command::Min,
        Command::Max,
        Command::Has,
        Command::Hasnt,
        Command::Intersection,
        Command::ListInt,
        Command::Not,
        Command::Negate,
        Command::ListCount,
        Command::ListMin,
        Command::ListMax,
        Command::ReadCountVar,
        Command::Turns,
        Command::ListRandom,
        Command::Floor,
        Command::Ceiling,
        Command::IntCast,
        Command::FloatCast,
        Command::ListAll,
        Command::ListInvert,
        Command::ListValue,
        Command::ChoiceCount,
        Command::StartContainerMarker,
        Command::EndContainerMarker,
        Command::CallExternal,
        Command::Thread,
        Command::ValuePointer,
    ];

    const COUNT: u8 = Command::ValuePointer as u8 + 1;

    pub fn is_binary_operator(self) -> bool {
        (Command::Add as u8..=Command::ListInt as u8).contains(&(self as u8))
    }

    pub fn is_unary_operator(self) -> bool {
        (Command::Not as u8..=Command::ListValue as u8).contains(&(self as u8))
    }

    /// Commands whose payload is a jump address.
    pub fn has_address(self) -> bool {
        matches!(
            self,
            Command::Divert
                | Command::Tunnel
                | Command::Function
                | Command::Thread
                | Command::DivertValue
                | Command::Choice
        )
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        if byte < Command::COUNT {
            Ok(Command::ALL[byte as usize])
        } else {
            Err(byte)
        }
    }
}

/// Flag bits carried alongside a command.
pub mod flags {
    pub const CHOICE_HAS_CONDITION: u8 = 1 << 0;
    pub const CHOICE_HAS_START_CONTENT: u8 = 1 << 1;
    pub const CHOICE_HAS_CHOICE_ONLY_CONTENT: u8 = 1 << 2;
    pub const CHOICE_IS_INVISIBLE_DEFAULT: u8 = 1 << 3;
    pub const CHOICE_IS_ONCE_ONLY: u8 = 1 << 4;

    pub const DIVERT_HAS_CONDITION: u8 = 1 << 0;
    pub const DIVERT_IS_FALLTHROUGH: u8 = 1 << 1;

    /// Tunnel/function/thread target is read from the variable named by the payload.
    pub const TO_VARIABLE: u8 = 1 << 2;

    /// `ValuePointer` flag resolving the context when the pointer is pushed.
    pub const POINTER_RESOLVE: u8 = 0;
    /// `ValuePointer` flag addressing a global.
    pub const POINTER_GLOBAL: u8 = 1;
    // Any larger flag addresses the temps of call frame `flag - 2`.

    pub const ASSIGNMENT_IS_REDEFINE: u8 = 1 << 0;

    pub const SEQUENCE_SHUFFLE: u8 = 1 << 0;
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub command: Command,
    pub flag: u8,
    pub payload: u32,
}

impl Instruction {
    pub const ENCODED_LEN: usize = 6;

    pub fn new(command: Command, flag: u8, payload: u32) -> Self {
        Self {
            command,
            flag,
            payload,
        }
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flag & flag != 0
    }
}
