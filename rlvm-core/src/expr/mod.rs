//! The bytecode expression language: boundary scanning, parsing into
//! [`ExpressionNode`] trees and evaluation against a [`MemoryProvider`].
//!
//! [`MemoryProvider`]: crate::memory::MemoryProvider

mod cursor;
mod eval;
mod node;
mod parser;
pub mod tokenize;

pub use cursor::ByteCursor;
pub use eval::{Place, Value};
pub use node::{AssignOperator, BinaryOperator, ExpressionNode, UnaryOperator, ValueKind};
pub use parser::{parse_assignment, parse_data, parse_expression};
