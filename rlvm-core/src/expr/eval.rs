use std::fmt;

use itertools::Itertools;

use super::node::{AssignOperator, BinaryOperator, ExpressionNode, UnaryOperator};
use crate::error::{Error, Result};
use crate::memory::{MemoryAddress, MemoryProvider};

/// Result of evaluating an [`ExpressionNode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Str(String),
    Complex(Vec<Value>),
    Special(i32, Vec<Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Items of a bundle. A scalar is treated as a bundle of one.
    pub fn items(&self) -> &[Value] {
        match self {
            Value::Complex(items) | Value::Special(_, items) => items,
            scalar => std::slice::from_ref(scalar),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Complex(items) => write!(f, "({})", items.iter().join(", ")),
            Value::Special(tag, items) => write!(f, "a{:02x}({})", tag, items.iter().join(", ")),
        }
    }
}

/// A writable location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Place {
    Store,
    Cell(MemoryAddress),
}

fn arithmetic_fault(op: BinaryOperator, lhs: i32, rhs: i32) -> Error {
    Error::ArithmeticFault {
        op: op.symbol(),
        lhs,
        rhs,
    }
}

pub(crate) fn apply_binary(op: BinaryOperator, lhs: i32, rhs: i32) -> Result<i32> {
    use BinaryOperator::*;
    let shift = |f: fn(i32, u32) -> i32| {
        u32::try_from(rhs)
            .ok()
            .filter(|s| *s < 32)
            .map(|s| f(lhs, s))
            .ok_or_else(|| arithmetic_fault(op, lhs, rhs))
    };
    Ok(match op {
        Add => lhs.wrapping_add(rhs),
        Sub => lhs.wrapping_sub(rhs),
        Mul => lhs.wrapping_mul(rhs),
        Div => lhs
            .checked_div(rhs)
            .ok_or_else(|| arithmetic_fault(op, lhs, rhs))?,
        Mod => lhs
            .checked_rem(rhs)
            .ok_or_else(|| arithmetic_fault(op, lhs, rhs))?,
        BitAnd => lhs & rhs,
        BitOr => lhs | rhs,
        BitXor => lhs ^ rhs,
        Shl => shift(|l, s| l << s)?,
        Shr => shift(|l, s| l >> s)?,
        Eq => (lhs == rhs) as i32,
        Ne => (lhs != rhs) as i32,
        Le => (lhs <= rhs) as i32,
        Lt => (lhs < rhs) as i32,
        Ge => (lhs >= rhs) as i32,
        Gt => (lhs > rhs) as i32,
        And => (lhs != 0 && rhs != 0) as i32,
        Or => (lhs != 0 || rhs != 0) as i32,
    })
}

impl ExpressionNode {
    /// Evaluates the node. Sub-expressions run left to right; an
    /// assignment anywhere in the tree writes to `mem` as it is reached.
    pub fn eval<M: MemoryProvider + ?Sized>(&self, mem: &mut M) -> Result<Value> {
        match self {
            ExpressionNode::StringConstant(s) => Ok(Value::Str(s.clone())),
            ExpressionNode::MemoryRef(bank, _) if bank.is_string() => {
                Ok(Value::Str(self.eval_str(mem)?))
            }
            ExpressionNode::AssignOp(_, lhs, _) if lhs.value_kind() == super::ValueKind::Str => {
                self.eval_assign_str(mem).map(Value::Str)
            }
            ExpressionNode::Complex(items) => Ok(Value::Complex(eval_all(items, mem)?)),
            ExpressionNode::Special(tag, items) => Ok(Value::Special(*tag, eval_all(items, mem)?)),
            _ => self.eval_int(mem).map(Value::Int),
        }
    }

    pub fn eval_int<M: MemoryProvider + ?Sized>(&self, mem: &mut M) -> Result<i32> {
        match self {
            ExpressionNode::IntConstant(v) => Ok(*v),
            ExpressionNode::StoreRegister => Ok(mem.get_accumulator()),
            ExpressionNode::MemoryRef(..) => match self.resolve(mem)? {
                Place::Cell(addr) if !addr.is_string() => mem.get_int(addr),
                _ => Err(kind_error(self, "integer")),
            },
            ExpressionNode::UnaryOp(UnaryOperator::Negate, inner) => {
                Ok(inner.eval_int(mem)?.wrapping_neg())
            }
            ExpressionNode::BinaryOp(op, lhs, rhs) => {
                let l = lhs.eval_int(mem)?;
                let r = rhs.eval_int(mem)?;
                apply_binary(*op, l, r)
            }
            ExpressionNode::AssignOp(op, lhs, rhs) => {
                let value = rhs.eval_int(mem)?;
                let place = lhs.resolve(mem)?;
                let result = match op.arithmetic() {
                    Some(arith) => apply_binary(arith, read_int(mem, place)?, value)?,
                    None => value,
                };
                write_int(mem, place, result)?;
                Ok(result)
            }
            // a one-element bundle stands for its item
            ExpressionNode::Complex(items) | ExpressionNode::Special(_, items)
                if items.len() == 1 =>
            {
                items[0].eval_int(mem)
            }
            _ => Err(kind_error(self, "integer")),
        }
    }

    pub fn eval_str<M: MemoryProvider + ?Sized>(&self, mem: &mut M) -> Result<String> {
        match self {
            ExpressionNode::StringConstant(s) => Ok(s.clone()),
            ExpressionNode::MemoryRef(bank, _) if bank.is_string() => match self.resolve(mem)? {
                Place::Cell(addr) => mem.get_str(addr).map(str::to_owned),
                Place::Store => Err(kind_error(self, "string")),
            },
            ExpressionNode::AssignOp(AssignOperator::Assign, ..) => self.eval_assign_str(mem),
            ExpressionNode::Complex(items) | ExpressionNode::Special(_, items)
                if items.len() == 1 =>
            {
                items[0].eval_str(mem)
            }
            _ => Err(kind_error(self, "string")),
        }
    }

    fn eval_assign_str<M: MemoryProvider + ?Sized>(&self, mem: &mut M) -> Result<String> {
        match self {
            ExpressionNode::AssignOp(AssignOperator::Assign, lhs, rhs) => {
                let value = rhs.eval_str(mem)?;
                lhs.assign_str(mem, &value)?;
                Ok(value)
            }
            _ => Err(kind_error(self, "string assignment")),
        }
    }

    /// Evaluates the index of a memory reference and returns the location
    /// it names.
    pub fn resolve<M: MemoryProvider + ?Sized>(&self, mem: &mut M) -> Result<Place> {
        match self {
            ExpressionNode::StoreRegister => Ok(Place::Store),
            ExpressionNode::MemoryRef(bank, index) => {
                let i = index.eval_int(mem)?;
                let i = u32::try_from(i)
                    .map_err(|_| Error::MemoryFault(format!("negative index {} into {}", i, bank)))?;
                Ok(Place::Cell(bank.at(i)))
            }
            other => Err(Error::MemoryFault(format!("{} is not a memory reference", other))),
        }
    }

    /// Writes `value` to the location this reference names.
    pub fn assign_int<M: MemoryProvider + ?Sized>(&self, mem: &mut M, value: i32) -> Result<()> {
        let place = self.resolve(mem)?;
        write_int(mem, place, value)
    }

    pub fn assign_str<M: MemoryProvider + ?Sized>(&self, mem: &mut M, value: &str) -> Result<()> {
        match self.resolve(mem)? {
            Place::Cell(addr) if addr.is_string() => mem.set_str(addr, value),
            _ => Err(Error::MemoryFault(format!("{} does not hold a string", self))),
        }
    }
}

fn eval_all<M: MemoryProvider + ?Sized>(items: &[ExpressionNode], mem: &mut M) -> Result<Vec<Value>> {
    items.iter().map(|item| item.eval(mem)).collect()
}

fn read_int<M: MemoryProvider + ?Sized>(mem: &M, place: Place) -> Result<i32> {
    match place {
        Place::Store => Ok(mem.get_accumulator()),
        Place::Cell(addr) => mem.get_int(addr),
    }
}

fn write_int<M: MemoryProvider + ?Sized>(mem: &mut M, place: Place, value: i32) -> Result<()> {
    match place {
        Place::Store => {
            mem.set_accumulator(value);
            Ok(())
        }
        Place::Cell(addr) => mem.set_int(addr, value),
    }
}

fn kind_error(node: &ExpressionNode, wanted: &str) -> Error {
    Error::MemoryFault(format!("{} does not evaluate to a {}", node, wanted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Bank, BankRef, Memory, Width};
    use pretty_assertions::assert_eq;
    use ExpressionNode::*;

    fn bank(bank: Bank) -> BankRef {
        BankRef {
            bank,
            width: Width::Full,
        }
    }

    fn a(index: i32) -> ExpressionNode {
        ExpressionNode::memory(bank(Bank::A), IntConstant(index))
    }

    fn addr(s: &str) -> MemoryAddress {
        s.parse().unwrap()
    }

    #[test]
    fn compound_assignment_yields_written_value() {
        let mut mem = Memory::new();
        mem.set_int(addr("A[0]"), 10).unwrap();

        let node = ExpressionNode::assign(AssignOperator::AddAssign, a(0), IntConstant(5));
        assert_eq!(node.eval(&mut mem).unwrap(), Value::Int(15));
        assert_eq!(mem.get_int(addr("A[0]")).unwrap(), 15);
    }

    #[test]
    fn division_by_zero_faults() {
        let mut mem = Memory::new();
        let before = mem.clone();
        let node = ExpressionNode::binary(BinaryOperator::Div, IntConstant(1), IntConstant(0));
        assert!(matches!(
            node.eval(&mut mem),
            Err(Error::ArithmeticFault { op: "/", .. })
        ));
        assert_eq!(format!("{:?}", mem), format!("{:?}", before));
    }

    #[test]
    fn faulting_compound_assignment_leaves_memory() {
        let mut mem = Memory::new();
        mem.set_int(addr("A[1]"), 7).unwrap();
        let node = ExpressionNode::assign(AssignOperator::ModAssign, a(1), IntConstant(0));
        assert!(node.eval(&mut mem).is_err());
        assert_eq!(mem.get_int(addr("A[1]")).unwrap(), 7);
    }

    #[test]
    fn arithmetic_edges() {
        assert_eq!(apply_binary(BinaryOperator::Add, i32::MAX, 1).unwrap(), i32::MIN);
        assert!(apply_binary(BinaryOperator::Div, i32::MIN, -1).is_err());
        assert!(apply_binary(BinaryOperator::Shl, 1, 32).is_err());
        assert!(apply_binary(BinaryOperator::Shr, 1, -1).is_err());
        assert_eq!(apply_binary(BinaryOperator::Shr, -8, 1).unwrap(), -4);
        assert_eq!(apply_binary(BinaryOperator::Le, 3, 3).unwrap(), 1);
        assert_eq!(apply_binary(BinaryOperator::Or, 0, 5).unwrap(), 1);
    }

    #[test]
    fn computed_index_and_store() {
        let mut mem = Memory::new();
        mem.set_accumulator(3);
        mem.set_int(addr("B[3]"), 42).unwrap();
        let node = ExpressionNode::memory(bank(Bank::B), StoreRegister);
        assert_eq!(node.eval_int(&mut mem).unwrap(), 42);

        // store = store * 2 evaluates through the register
        let double = ExpressionNode::assign(AssignOperator::MulAssign, StoreRegister, IntConstant(2));
        assert_eq!(double.eval_int(&mut mem).unwrap(), 6);
        assert_eq!(mem.get_accumulator(), 6);
    }

    #[test]
    fn out_of_range_index() {
        let mut mem = Memory::new();
        assert!(matches!(a(2000).eval(&mut mem), Err(Error::MemoryFault(_))));
        let negative = ExpressionNode::memory(
            bank(Bank::A),
            UnaryOp(UnaryOperator::Negate, Box::new(IntConstant(1))),
        );
        assert!(matches!(negative.eval(&mut mem), Err(Error::MemoryFault(_))));
    }

    #[test]
    fn string_assignment() {
        let mut mem = Memory::new();
        let s0 = ExpressionNode::memory(bank(Bank::S), IntConstant(0));
        let node = ExpressionNode::assign(
            AssignOperator::Assign,
            s0.clone(),
            StringConstant("hello".into()),
        );
        assert_eq!(node.eval(&mut mem).unwrap(), Value::Str("hello".into()));
        assert_eq!(s0.eval_str(&mut mem).unwrap(), "hello");
    }

    #[test]
    fn assignments_run_left_to_right() {
        let mut mem = Memory::new();
        // (A[0] = 1, A[0] += 1)
        let bundle = Complex(vec![
            ExpressionNode::assign(AssignOperator::Assign, a(0), IntConstant(1)),
            ExpressionNode::assign(AssignOperator::AddAssign, a(0), IntConstant(1)),
        ]);
        assert_eq!(
            bundle.eval(&mut mem).unwrap(),
            Value::Complex(vec![Value::Int(1), Value::Int(2)])
        );
        // evaluating again is not idempotent
        assert_eq!(bundle.eval(&mut mem).unwrap().items()[1], Value::Int(2));
        let counter = ExpressionNode::assign(AssignOperator::AddAssign, a(5), IntConstant(1));
        counter.eval(&mut mem).unwrap();
        counter.eval(&mut mem).unwrap();
        assert_eq!(mem.get_int(addr("A[5]")).unwrap(), 2);
    }

    #[test]
    fn special_keeps_tag() {
        let mut mem = Memory::new();
        let node = Special(4, vec![IntConstant(1), StringConstant("x".into())]);
        let value = node.eval(&mut mem).unwrap();
        assert_eq!(value.to_string(), "a04(1, \"x\")");
        assert_eq!(value.items().len(), 2);
    }
}
