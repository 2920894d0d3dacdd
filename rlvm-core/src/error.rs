use thiserror::Error;

use crate::format::scenario::instruction::OpcodeKey;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid memory address: {0}")]
    InvalidAddress(String),

    #[error("corrupt scenario{}: {reason}", .scenario.map(|n| format!(" {:04}", n)).unwrap_or_default())]
    CorruptScenario { scenario: Option<u16>, reason: String },

    #[error("malformed expression{} at +0x{offset:X}: {reason}", .scenario.map(|n| format!(" in scenario {:04}", n)).unwrap_or_default())]
    MalformedExpression {
        scenario: Option<u16>,
        offset: usize,
        reason: String,
    },

    #[error("unknown opcode {opcode} at 0x{offset:X}")]
    UnknownOpcode { opcode: OpcodeKey, offset: usize },

    #[error("type mismatch in parameter {slot} of {opcode} at 0x{offset:X}")]
    TypeMismatch {
        slot: usize,
        opcode: OpcodeKey,
        offset: usize,
    },

    #[error("memory fault: {0}")]
    MemoryFault(String),

    #[error("arithmetic fault: {lhs} {op} {rhs}")]
    ArithmeticFault { op: &'static str, lhs: i32, rhs: i32 },

    #[error("bad configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Error::CorruptScenario {
            scenario: None,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Error::MalformedExpression {
            scenario: None,
            offset,
            reason: reason.into(),
        }
    }

    /// Attach the scenario number to a load failure.
    pub(crate) fn in_scenario(self, number: u16) -> Self {
        match self {
            Error::CorruptScenario { reason, .. } => Error::CorruptScenario {
                scenario: Some(number),
                reason,
            },
            Error::MalformedExpression { offset, reason, .. } => Error::MalformedExpression {
                scenario: Some(number),
                offset,
                reason,
            },
            other => other,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn load_failures_name_their_scenario() {
        let e = Error::malformed(0x2a, "expression nested too deeply").in_scenario(7);
        assert!(matches!(
            e,
            Error::MalformedExpression {
                scenario: Some(7),
                offset: 0x2a,
                ..
            }
        ));
        assert_eq!(
            e.to_string(),
            "malformed expression in scenario 0007 at +0x2A: expression nested too deeply"
        );

        let e = Error::corrupt("bad header").in_scenario(12);
        assert_eq!(e.to_string(), "corrupt scenario 0012: bad header");

        let e = Error::MemoryFault("A[9000]".into()).in_scenario(1);
        assert!(matches!(e, Error::MemoryFault(_)));
    }
}
