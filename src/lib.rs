//! # inkvm
//!
//! A runtime for compiled interactive-fiction stories. A [`Story`] is loaded
//! once from its binary form; any number of [`Runner`]s execute it, sharing a
//! [`Globals`] store. Runners produce text a line at a time, expose tags and
//! choices, call host functions bound by name and can be captured into a
//! [`Snapshot`] and restored later.
//!
//! ## Quick Start
//!
//! ```rust
//! use inkvm::{ExternalFunction, StoryBuilder, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = StoryBuilder::new();
//! builder
//!     .global_int("gold", 10)
//!     .line("You enter the shop.")
//!     .start_eval()
//!     .get_var("gold")
//!     .call_external("price", 1)
//!     .output()
//!     .end_eval()
//!     .newline()
//!     .choice_text("Buy", &[], "buy")
//!     .done()
//!     .begin_knot("buy")
//!     .line("Sold!")
//!     .end()
//!     .end_container();
//! let story = builder.story()?;
//!
//! let mut runner = story.new_runner(None)?;
//! runner.bind(
//!     "price",
//!     ExternalFunction::returning(|args| Ok(Value::Int(args[0].as_int().unwrap_or(0) / 2))),
//! );
//!
//! while runner.can_continue() {
//!     print!("{}", runner.getline()?);
//! }
//! for choice in runner.choices() {
//!     println!("{}: {}", choice.index(), choice.text());
//! }
//! runner.choose(0)?;
//! assert_eq!(runner.getall()?, "Sold!\n");
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! Execution traces go through the `log` facade under `inkvm::<category>`
//! targets. They are off unless `INKVM_DEBUG` is set or the runner's
//! [`RunnerConfig`] enables them.

pub mod config;
pub mod error;
pub mod functions;
pub mod globals;
pub mod runtime;
pub mod storage;
pub mod story;
pub mod types;

pub use config::RunnerConfig;
pub use error::{InkError, Result};
pub use functions::ExternalFunction;
pub use globals::{Globals, ObserverId};
pub use runtime::debug::{DebugCategory, DebugConfig, LogLevel};
pub use runtime::{Runner, RunnerStatus};
pub use storage::{Snapshot, SnapshotKind};
pub use story::{ContainerInfo, Story, StoryBuilder};
pub use types::{AllTags, Choice, ListValue, TagScope, Value, ValueKind};
