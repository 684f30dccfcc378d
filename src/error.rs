//! Typed errors for the probe core
//!
//! Library code returns these; the CLI wraps them with `anyhow` context.

use thiserror::Error;

/// Failures reported by the instrumentation host when attaching a probe
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Routine at {address:#x} cannot be patched")]
    NotPatchable { address: u64 },

    #[error("Image '{0}' is not instrumentable")]
    ImageRejected(String),

    #[error("Argument slot {slot} out of range (max {max})")]
    SlotOutOfRange { slot: usize, max: usize },
}

/// Failures while capturing an argument value out of target memory
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Null pointer in argument slot")]
    NullPointer,

    #[error("Address {addr:#x} is not readable: {reason}")]
    Unreadable { addr: u64, reason: String },

    #[error("Read 0 bytes at {0:#x}")]
    Empty(u64),

    #[error("Argument slot {0} was not delivered")]
    MissingSlot(usize),
}

/// Failures while loading a match-rule table
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Failed to parse rule table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Duplicate rule name '{0}'")]
    DuplicateName(String),

    #[error("Rule '{0}' has an empty pattern")]
    EmptyPattern(String),

    #[error("Rule '{name}' captures topics but does not deliver slot {slot}")]
    MissingTopicSlot { name: String, slot: usize },

    #[error("Rule '{name}' uses slot {slot}, hosts deliver at most {max}")]
    SlotOutOfRange { name: String, slot: usize, max: usize },
}
