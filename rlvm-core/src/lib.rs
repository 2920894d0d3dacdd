//! This crate implements the core of the rlvm engine
//!
//! This mostly includes the SEEN.TXT container and scenario codec, the
//! bytecode and expression model, the memory banks and opcode dispatch.

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod error;
pub mod expr;
pub mod format;
pub mod memory;
pub mod vm;

pub use config::LoaderConfig;
pub use error::{Error, Result};
pub use format::archive::Archive;
pub use format::gameexe::Gameexe;
pub use format::scenario::instruction::{Instruction, OpcodeKey};
pub use format::scenario::Scenario;
pub use memory::{Memory, MemoryAddress, MemoryProvider};
pub use vm::{Dispatcher, Host, Interpreter, Registration, Step};
