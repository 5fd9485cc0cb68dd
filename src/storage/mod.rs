//! Snapshots of runner and globals state
//!
//! A snapshot is a short binary header followed by a JSON body:
//!
//! ```text
//! "INKS" | u32 version | u8 kind | [u8; 16] structure hash | u32 body length | body
//! ```
//!
//! The structure hash covers the story's declared globals and list
//! definitions, so a snapshot is rejected by a story it cannot describe.

pub(crate) mod state;

use crate::config::RunnerConfig;
use crate::error::{InkError, Result};
use crate::globals::Globals;
use crate::runtime::Runner;
use crate::runtime::debug::{self, DebugCategory, LogLevel};
use crate::story::Story;
use serde::{Deserialize, Serialize};
use state::{SavedGlobals, SavedRunner};

pub const MAGIC: &[u8; 4] = b"INKS";
pub const SNAPSHOT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 1 + 16 + 4;

/// What a snapshot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    GlobalsOnly,
    GlobalsAndRunners,
    RunnersOnly,
}

impl SnapshotKind {
    fn to_byte(self) -> u8 {
        match self {
            SnapshotKind::GlobalsOnly => 0,
            SnapshotKind::GlobalsAndRunners => 1,
            SnapshotKind::RunnersOnly => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(SnapshotKind::GlobalsOnly),
            1 => Ok(SnapshotKind::GlobalsAndRunners),
            2 => Ok(SnapshotKind::RunnersOnly),
            other => Err(InkError::snapshot_corrupt(format!(
                "unknown snapshot kind {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Body {
    globals: Option<SavedGlobals>,
    runners: Vec<SavedRunner>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    kind: SnapshotKind,
    structure_hash: [u8; 16],
    body: Body,
}

impl Snapshot {
    /// Captures one runner, optionally with its globals store.
    pub fn capture(runner: &Runner, include_globals: bool) -> Result<Snapshot> {
        Self::capture_many(&[runner], include_globals)
    }

    /// Captures several runners sharing one globals store.
    pub fn capture_many(runners: &[&Runner], include_globals: bool) -> Result<Snapshot> {
        let Some(first) = runners.first() else {
            return Err(InkError::invalid_state("no runners to capture"));
        };
        for runner in runners {
            runner.ensure_usable()?;
            if include_globals && !runner.globals().ptr_eq(first.globals()) {
                return Err(InkError::invalid_state(
                    "runners captured with globals must share one store",
                ));
            }
            if !runner.story().same_structure(first.story()) {
                return Err(InkError::snapshot_mismatch(
                    "runners belong to different stories",
                ));
            }
        }

        let saved: Vec<SavedRunner> = runners
            .iter()
            .map(|runner| SavedRunner::capture(runner.exec_state()))
            .collect();
        debug::log(
            &first.config().debug,
            DebugCategory::Snapshot,
            LogLevel::Info,
            &format!("captured {} runner(s), globals: {include_globals}", saved.len()),
        );
        Ok(Snapshot {
            kind: if include_globals {
                SnapshotKind::GlobalsAndRunners
            } else {
                SnapshotKind::RunnersOnly
            },
            structure_hash: first.story().structure_hash(),
            body: Body {
                globals: include_globals.then(|| first.globals().save()),
                runners: saved,
            },
        })
    }

    /// Captures a globals store without any runner.
    pub fn of_globals(globals: &Globals) -> Snapshot {
        Snapshot {
            kind: SnapshotKind::GlobalsOnly,
            structure_hash: globals.story().structure_hash(),
            body: Body {
                globals: Some(globals.save()),
                runners: Vec::new(),
            },
        }
    }

    pub fn kind(&self) -> SnapshotKind {
        self.kind
    }

    pub fn num_runners(&self) -> usize {
        self.body.runners.len()
    }

    pub fn has_globals(&self) -> bool {
        self.body.globals.is_some()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(&self.body)
            .map_err(|e| InkError::snapshot_corrupt(format!("cannot encode body: {e}")))?;
        let length = u32::try_from(body.len())
            .map_err(|_| InkError::snapshot_corrupt("snapshot body too large"))?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        bytes.push(self.kind.to_byte());
        bytes.extend_from_slice(&self.structure_hash);
        bytes.extend_from_slice(&length.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Snapshot> {
        if bytes.len() < HEADER_LEN {
            return Err(InkError::snapshot_corrupt("truncated header"));
        }
        let (header, body) = bytes.split_at(HEADER_LEN);
        if &header[0..4] != MAGIC {
            return Err(InkError::snapshot_corrupt("bad magic"));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version == 0 || version > SNAPSHOT_VERSION {
            return Err(InkError::SnapshotVersionMismatch {
                found: version,
                supported: SNAPSHOT_VERSION,
            });
        }
        let kind = SnapshotKind::from_byte(header[8])?;
        let mut structure_hash = [0u8; 16];
        structure_hash.copy_from_slice(&header[9..25]);
        let length = u32::from_le_bytes([header[25], header[26], header[27], header[28]]) as usize;
        if body.len() != length {
            return Err(InkError::snapshot_corrupt(format!(
                "body is {} bytes, header says {length}",
                body.len()
            )));
        }
        let body: Body = serde_json::from_slice(body)
            .map_err(|e| InkError::snapshot_corrupt(format!("invalid body: {e}")))?;

        let consistent = match kind {
            SnapshotKind::GlobalsOnly => body.globals.is_some() && body.runners.is_empty(),
            SnapshotKind::GlobalsAndRunners => body.globals.is_some() && !body.runners.is_empty(),
            SnapshotKind::RunnersOnly => body.globals.is_none() && !body.runners.is_empty(),
        };
        if !consistent {
            return Err(InkError::snapshot_corrupt(format!(
                "body does not match kind {kind:?}"
            )));
        }
        Ok(Snapshot {
            kind,
            structure_hash,
            body,
        })
    }

    fn check_story(&self, story: &Story) -> Result<()> {
        if self.structure_hash != story.structure_hash() {
            return Err(InkError::snapshot_mismatch(
                "snapshot was taken from a structurally different story",
            ));
        }
        Ok(())
    }

    pub(crate) fn restore_globals(&self, story: &Story) -> Result<Globals> {
        self.check_story(story)?;
        let saved = self
            .body
            .globals
            .as_ref()
            .ok_or_else(|| InkError::invalid_state("snapshot holds no globals"))?;
        Globals::restore(story, saved)
    }

    pub(crate) fn restore_runner(
        &self,
        story: &Story,
        globals: Option<Globals>,
        index: usize,
        config: RunnerConfig,
    ) -> Result<Runner> {
        self.check_story(story)?;
        let saved = self.body.runners.get(index).ok_or_else(|| {
            InkError::invalid_state(format!(
                "snapshot holds {} runner(s), requested {index}",
                self.num_runners()
            ))
        })?;
        let globals = match (globals, &self.body.globals) {
            (Some(globals), _) => story.bind_globals(Some(globals))?,
            (None, Some(saved)) => Globals::restore(story, saved)?,
            (None, None) => story.new_globals(),
        };
        let state = saved.restore(story)?;
        debug::log(
            &config.debug,
            DebugCategory::Snapshot,
            LogLevel::Info,
            &format!("restored runner {index} at {:?}", state.ip),
        );
        Ok(Runner::from_state(story.clone(), globals, config, state))
    }
}

impl Runner {
    /// Shorthand for [`Snapshot::capture`].
    pub fn create_snapshot(&self, include_globals: bool) -> Result<Snapshot> {
        Snapshot::capture(self, include_globals)
    }
}
