//! Parameter contracts a handler declares and the checks run against
//! parsed parameters before the handler is called.

use crate::expr::{ExpressionNode, ValueKind};

/// Contract for a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// anything that evaluates to an integer
    IntConstant,
    /// an assignable integer location
    IntReference,
    StrConstant,
    StrReference,
}

impl ParamType {
    pub fn accepts(self, node: &ExpressionNode) -> bool {
        match self {
            ParamType::IntConstant => node.value_kind() == ValueKind::Int,
            ParamType::IntReference => {
                node.value_kind() == ValueKind::Int && node.is_memory_reference()
            }
            ParamType::StrConstant => node.value_kind() == ValueKind::Str,
            ParamType::StrReference => {
                node.value_kind() == ValueKind::Str && node.is_memory_reference()
            }
        }
    }
}

/// Contract for one parameter slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamShape {
    Single(ParamType),
    /// A bundle with one contract per item. A lone scalar counts as a
    /// bundle of one.
    Complex(Vec<ParamType>),
    /// A tagged bundle; the tag picks which item contracts apply.
    Special(Vec<(i32, Vec<ParamType>)>),
    /// Any number of trailing parameters, each matching the inner shape.
    /// A single `Complex` parameter is matched item by item.
    Multi(Box<ParamShape>),
}

impl ParamShape {
    pub fn multi(inner: ParamShape) -> Self {
        ParamShape::Multi(Box::new(inner))
    }

    pub fn accepts(&self, node: &ExpressionNode) -> bool {
        match self {
            ParamShape::Single(ty) => ty.accepts(node),
            ParamShape::Complex(types) => match node {
                ExpressionNode::Complex(items) => all_accept(types, items),
                scalar => types.len() == 1 && types[0].accepts(scalar),
            },
            ParamShape::Special(overloads) => match node {
                ExpressionNode::Special(tag, items) => overloads
                    .iter()
                    .any(|(t, types)| t == tag && all_accept(types, items)),
                _ => false,
            },
            ParamShape::Multi(inner) => inner.accepts(node),
        }
    }
}

fn all_accept(types: &[ParamType], items: &[ExpressionNode]) -> bool {
    types.len() == items.len() && types.iter().zip(items).all(|(ty, item)| ty.accepts(item))
}

/// Checks `params` against `shapes`, returning the first failing slot.
pub fn check(shapes: &[ParamShape], params: &[ExpressionNode]) -> Result<(), usize> {
    for (slot, shape) in shapes.iter().enumerate() {
        if let ParamShape::Multi(inner) = shape {
            let rest = params.get(slot..).unwrap_or_default();
            return match (rest, inner.as_ref()) {
                ([ExpressionNode::Complex(items)], ParamShape::Single(ty)) => {
                    if items.iter().all(|item| ty.accepts(item)) {
                        Ok(())
                    } else {
                        Err(slot)
                    }
                }
                _ => match rest.iter().position(|node| !inner.accepts(node)) {
                    Some(i) => Err(slot + i),
                    None => Ok(()),
                },
            };
        }
        match params.get(slot) {
            Some(node) if shape.accepts(node) => {}
            _ => return Err(slot),
        }
    }
    if params.len() > shapes.len() {
        return Err(shapes.len());
    }
    Ok(())
}
