//! Shared modelrun data model types.
//!
//! This crate holds the plain serde data exchanged between the engine, the
//! recorder's archive manifest and the CLI. It performs no I/O.

#![warn(clippy::pedantic)]

pub mod namelist;
pub mod record;
pub mod stage;
pub mod uri;

pub use namelist::{NamelistDocument, NamelistScalar, NamelistSection, NamelistValue};
pub use record::{ClassConfig, FileEntry, StageCommand, StageRecord};
pub use stage::StageState;
