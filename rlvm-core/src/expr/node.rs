use std::fmt;

use itertools::Itertools;
use num_derive::FromPrimitive;

use crate::memory::BankRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum UnaryOperator {
    Negate = 0x01,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum BinaryOperator {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Mod = 4,
    BitAnd = 5,
    BitOr = 6,
    BitXor = 7,
    Shl = 8,
    Shr = 9,
    Eq = 40,
    Ne = 41,
    Le = 42,
    Lt = 43,
    Ge = 44,
    Gt = 45,
    And = 60,
    Or = 61,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::BitXor => "^",
            BinaryOperator::Shl => "<<",
            BinaryOperator::Shr => ">>",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Le => "<=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Ge => ">=",
            BinaryOperator::Gt => ">",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
        }
    }
}

/// `=` and the compound assignments. The bytecode value is the arithmetic
/// operator's plus 20.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum AssignOperator {
    AddAssign = 20,
    SubAssign = 21,
    MulAssign = 22,
    DivAssign = 23,
    ModAssign = 24,
    AndAssign = 25,
    OrAssign = 26,
    XorAssign = 27,
    ShlAssign = 28,
    ShrAssign = 29,
    Assign = 30,
}

impl AssignOperator {
    /// The operator combined with the old value, `None` for plain `=`.
    pub fn arithmetic(self) -> Option<BinaryOperator> {
        use BinaryOperator::*;
        Some(match self {
            AssignOperator::AddAssign => Add,
            AssignOperator::SubAssign => Sub,
            AssignOperator::MulAssign => Mul,
            AssignOperator::DivAssign => Div,
            AssignOperator::ModAssign => Mod,
            AssignOperator::AndAssign => BitAnd,
            AssignOperator::OrAssign => BitOr,
            AssignOperator::XorAssign => BitXor,
            AssignOperator::ShlAssign => Shl,
            AssignOperator::ShrAssign => Shr,
            AssignOperator::Assign => return None,
        })
    }
}

impl fmt::Display for AssignOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arithmetic() {
            Some(op) => write!(f, "{}=", op.symbol()),
            None => f.write_str("="),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Str,
    /// a `Complex` or `Special` bundle
    Compound,
}

/// One node of a parsed parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionNode {
    /// The implicit accumulator register.
    StoreRegister,
    IntConstant(i32),
    StringConstant(String),
    /// A cell of `bank`, indexed by the inner expression.
    MemoryRef(BankRef, Box<ExpressionNode>),
    UnaryOp(UnaryOperator, Box<ExpressionNode>),
    BinaryOp(BinaryOperator, Box<ExpressionNode>, Box<ExpressionNode>),
    AssignOp(AssignOperator, Box<ExpressionNode>, Box<ExpressionNode>),
    Complex(Vec<ExpressionNode>),
    Special(i32, Vec<ExpressionNode>),
}

impl ExpressionNode {
    pub fn memory(bank: BankRef, index: ExpressionNode) -> Self {
        ExpressionNode::MemoryRef(bank, Box::new(index))
    }

    pub fn binary(op: BinaryOperator, lhs: ExpressionNode, rhs: ExpressionNode) -> Self {
        ExpressionNode::BinaryOp(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn assign(op: AssignOperator, lhs: ExpressionNode, rhs: ExpressionNode) -> Self {
        ExpressionNode::AssignOp(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            ExpressionNode::StringConstant(_) => ValueKind::Str,
            ExpressionNode::MemoryRef(bank, _) if bank.is_string() => ValueKind::Str,
            ExpressionNode::AssignOp(_, lhs, _) => lhs.value_kind(),
            ExpressionNode::Complex(_) | ExpressionNode::Special(..) => ValueKind::Compound,
            _ => ValueKind::Int,
        }
    }

    /// Whether the node names a writable location.
    pub fn is_memory_reference(&self) -> bool {
        matches!(
            self,
            ExpressionNode::MemoryRef(..) | ExpressionNode::StoreRegister
        )
    }

    /// Children of a `Complex` or `Special` bundle.
    pub fn contained(&self) -> Option<&[ExpressionNode]> {
        match self {
            ExpressionNode::Complex(items) | ExpressionNode::Special(_, items) => Some(items),
            _ => None,
        }
    }

    pub fn special_tag(&self) -> Option<i32> {
        match self {
            ExpressionNode::Special(tag, _) => Some(*tag),
            _ => None,
        }
    }
}

impl fmt::Display for ExpressionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionNode::StoreRegister => f.write_str("<store>"),
            ExpressionNode::IntConstant(v) => write!(f, "{}", v),
            ExpressionNode::StringConstant(s) => write!(f, "{:?}", s),
            ExpressionNode::MemoryRef(bank, index) => write!(f, "{}[{}]", bank, index),
            ExpressionNode::UnaryOp(UnaryOperator::Negate, inner) => write!(f, "-{}", inner),
            ExpressionNode::BinaryOp(op, lhs, rhs) => {
                write!(f, "{} {} {}", lhs, op.symbol(), rhs)
            }
            ExpressionNode::AssignOp(op, lhs, rhs) => write!(f, "{} {} {}", lhs, op, rhs),
            ExpressionNode::Complex(items) => write!(f, "({})", items.iter().join(", ")),
            ExpressionNode::Special(tag, items) => {
                write!(f, "a{:02x}({})", tag, items.iter().join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Bank, Width};
    use pretty_assertions::assert_eq;

    fn int_a() -> BankRef {
        BankRef {
            bank: Bank::A,
            width: Width::Full,
        }
    }

    #[test]
    fn kinds() {
        let s = BankRef {
            bank: Bank::S,
            width: Width::Full,
        };
        let str_ref = ExpressionNode::memory(s, ExpressionNode::IntConstant(0));
        assert_eq!(str_ref.value_kind(), ValueKind::Str);
        assert!(str_ref.is_memory_reference());

        let sum = ExpressionNode::binary(
            BinaryOperator::Add,
            ExpressionNode::IntConstant(1),
            ExpressionNode::StoreRegister,
        );
        assert_eq!(sum.value_kind(), ValueKind::Int);
        assert!(!sum.is_memory_reference());
        assert_eq!(
            ExpressionNode::Complex(vec![]).value_kind(),
            ValueKind::Compound
        );
    }

    #[test]
    fn debug_strings() {
        let node = ExpressionNode::assign(
            AssignOperator::AddAssign,
            ExpressionNode::memory(int_a(), ExpressionNode::IntConstant(0)),
            ExpressionNode::IntConstant(5),
        );
        assert_eq!(node.to_string(), "intA[0] += 5");

        let node = ExpressionNode::Special(
            3,
            vec![
                ExpressionNode::StringConstant("bg".into()),
                ExpressionNode::StoreRegister,
            ],
        );
        assert_eq!(node.to_string(), "a03(\"bg\", <store>)");
    }
}
