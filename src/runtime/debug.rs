//! Debug logging for story execution
//!
//! Messages are grouped by category and forwarded to the `log` facade with
//! an `inkvm::<category>` target, so hosts choose the logger.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Debug log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Every executed instruction
    Trace,
    /// Development debugging information
    Debug,
    /// Important state changes
    Info,
    /// Potential issues
    Warn,
    /// Error situations
    Error,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Debug log category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebugCategory {
    /// Jumps, calls and returns
    Flow,
    /// Finished lines and choices
    Output,
    /// Global and temporary variable writes
    Variables,
    /// External function dispatch
    Externals,
    /// Lookahead checkpoints
    Lookahead,
    /// Snapshot capture and restore
    Snapshot,
}

impl DebugCategory {
    pub fn target(self) -> &'static str {
        match self {
            DebugCategory::Flow => "inkvm::flow",
            DebugCategory::Output => "inkvm::output",
            DebugCategory::Variables => "inkvm::variables",
            DebugCategory::Externals => "inkvm::externals",
            DebugCategory::Lookahead => "inkvm::lookahead",
            DebugCategory::Snapshot => "inkvm::snapshot",
        }
    }
}

/// Debug configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Enable debug logging
    pub enabled: bool,
    /// Minimum log level
    pub level: LogLevel,
    /// Enabled categories
    pub categories: HashSet<DebugCategory>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        let mut categories = HashSet::new();
        categories.insert(DebugCategory::Flow);
        categories.insert(DebugCategory::Output);
        categories.insert(DebugCategory::Externals);

        Self {
            enabled: std::env::var("INKVM_DEBUG").is_ok(),
            level: LogLevel::Debug,
            categories,
        }
    }
}

impl DebugConfig {
    pub fn is_enabled(&self, category: DebugCategory, level: LogLevel) -> bool {
        self.enabled && level >= self.level && self.categories.contains(&category)
    }
}

/// Log a debug message
pub fn log(config: &DebugConfig, category: DebugCategory, level: LogLevel, message: &str) {
    if !config.is_enabled(category, level) {
        return;
    }
    log::log!(target: category.target(), level.into(), "{message}");
}
