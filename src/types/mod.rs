//! Core data types shared across the runtime

pub mod choice;
pub mod command;
pub mod list;
pub mod tags;
pub mod value;

pub use choice::Choice;
pub use command::{Command, Instruction};
pub use list::{Flag, ListDefinition, ListDefinitions, ListItemId, ListValue};
pub use tags::{AllTags, TagScope};
pub use value::{Value, ValueKind};
