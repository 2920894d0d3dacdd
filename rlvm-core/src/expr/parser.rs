//! Recursive-descent parser for bytecode expressions.
//!
//! Precedence, loosest first: `||` (`\=`), `&&` (`\<`), comparisons
//! (`\(` .. `\-`), additive (`\0`, `\1`), multiplicative and bitwise
//! (`\2` .. `\9`), then terms. Every level is left-associative.

use num_traits::FromPrimitive;
use rlvm_nls::{Decoder, TextDecoder};

use super::cursor::ByteCursor;
use super::node::{AssignOperator, BinaryOperator, ExpressionNode, UnaryOperator, ValueKind};
use super::tokenize::{self, Unmeasurable};
use crate::error::Result;
use crate::memory::BankRef;

const INT_CONSTANT: u8 = 0xff;
const STORE_REGISTER: u8 = 0xc8;

fn require_int(c: &ByteCursor, node: &ExpressionNode) -> Result<()> {
    if node.value_kind() != ValueKind::Int {
        return Err(c.error(format!("integer operand expected, found {}", node)));
    }
    Ok(())
}

fn binary(
    c: &ByteCursor,
    op: BinaryOperator,
    lhs: ExpressionNode,
    rhs: ExpressionNode,
) -> Result<ExpressionNode> {
    require_int(c, &lhs)?;
    require_int(c, &rhs)?;
    Ok(ExpressionNode::binary(op, lhs, rhs))
}

/// Runs `f` one nesting level down.
fn nested<'a, T>(
    c: &mut ByteCursor<'a>,
    f: impl FnOnce(&mut ByteCursor<'a>) -> Result<T>,
) -> Result<T> {
    c.descend()?;
    let out = f(c);
    c.ascend();
    out
}

/// Parses what follows a `$`.
fn parse_token(c: &mut ByteCursor) -> Result<ExpressionNode> {
    match c.peek() {
        Some(INT_CONSTANT) => {
            c.skip(1)?;
            Ok(ExpressionNode::IntConstant(c.read_i32()?))
        }
        Some(STORE_REGISTER) => {
            c.skip(1)?;
            Ok(ExpressionNode::StoreRegister)
        }
        Some(t) if c.peek_at(1) == Some(b'[') => {
            let bank = BankRef::decode_compact(t as i32)
                .map_err(|_| c.error(format!("unknown memory bank type 0x{:02x}", t)))?;
            c.skip(2)?;
            let index = nested(c, parse_expression)?;
            require_int(c, &index)?;
            c.expect(b']')?;
            Ok(ExpressionNode::memory(bank, index))
        }
        Some(t) => Err(c.error(format!("unknown token type 0x{:02x}", t))),
        None => Err(c.error("unexpected end of buffer in token")),
    }
}

fn parse_term(c: &mut ByteCursor) -> Result<ExpressionNode> {
    match (c.peek(), c.peek_at(1)) {
        (Some(b'$'), _) => {
            c.skip(1)?;
            parse_token(c)
        }
        // unary plus
        (Some(b'\\'), Some(0x00)) => {
            c.skip(2)?;
            nested(c, parse_term)
        }
        (Some(b'\\'), Some(0x01)) => {
            c.skip(2)?;
            let inner = nested(c, parse_term)?;
            require_int(c, &inner)?;
            Ok(ExpressionNode::UnaryOp(UnaryOperator::Negate, Box::new(inner)))
        }
        (Some(b'('), _) => {
            c.skip(1)?;
            let inner = nested(c, parse_expression)?;
            c.expect(b')')?;
            Ok(inner)
        }
        (Some(t), _) => Err(c.error(format!("unknown term type 0x{:02x}", t))),
        (None, _) => Err(c.error("unexpected end of buffer in term")),
    }
}

/// Returns the operator byte if the cursor sits on `\op` with `op` in `range`.
fn peek_operator(c: &ByteCursor, range: std::ops::RangeInclusive<u8>) -> Option<u8> {
    match (c.peek(), c.peek_at(1)) {
        (Some(b'\\'), Some(op)) if range.contains(&op) => Some(op),
        _ => None,
    }
}

fn operator(c: &ByteCursor, op: u8) -> Result<BinaryOperator> {
    BinaryOperator::from_u8(op).ok_or_else(|| c.error(format!("invalid operator {}", op)))
}

fn parse_multiplicative(c: &mut ByteCursor, mut node: ExpressionNode) -> Result<ExpressionNode> {
    while let Some(op) = peek_operator(c, 0x02..=0x09) {
        c.skip(2)?;
        let rhs = parse_term(c)?;
        node = binary(c, operator(c, op)?, node, rhs)?;
    }
    Ok(node)
}

fn parse_arithmetic(c: &mut ByteCursor) -> Result<ExpressionNode> {
    let first = parse_term(c)?;
    let mut node = parse_multiplicative(c, first)?;
    while let Some(op) = peek_operator(c, 0x00..=0x01) {
        c.skip(2)?;
        let term = parse_term(c)?;
        let rhs = parse_multiplicative(c, term)?;
        node = binary(c, operator(c, op)?, node, rhs)?;
    }
    Ok(node)
}

fn parse_condition(c: &mut ByteCursor) -> Result<ExpressionNode> {
    let mut node = parse_arithmetic(c)?;
    while let Some(op) = peek_operator(c, 0x28..=0x2d) {
        c.skip(2)?;
        let rhs = parse_arithmetic(c)?;
        node = binary(c, operator(c, op)?, node, rhs)?;
    }
    Ok(node)
}

fn parse_and(c: &mut ByteCursor) -> Result<ExpressionNode> {
    let mut node = parse_condition(c)?;
    while peek_operator(c, b'<'..=b'<').is_some() {
        c.skip(2)?;
        let rhs = parse_condition(c)?;
        node = binary(c, BinaryOperator::And, node, rhs)?;
    }
    Ok(node)
}

/// Parses one full expression.
pub fn parse_expression(c: &mut ByteCursor) -> Result<ExpressionNode> {
    let mut node = parse_and(c)?;
    while peek_operator(c, b'='..=b'=').is_some() {
        c.skip(2)?;
        let rhs = parse_and(c)?;
        node = binary(c, BinaryOperator::Or, node, rhs)?;
    }
    Ok(node)
}

/// Parses an assignment statement: `term \op expression`.
pub fn parse_assignment(c: &mut ByteCursor) -> Result<ExpressionNode> {
    let lhs = parse_term(c)?;
    c.expect(b'\\')?;
    let raw_op = c.next_u8()?;
    let op = AssignOperator::from_u8(raw_op)
        .ok_or_else(|| c.error(format!("undefined assignment operator {}", raw_op)))?;
    let rhs = parse_expression(c)?;

    if !lhs.is_memory_reference() {
        return Err(c.error(format!("cannot assign to {}", lhs)));
    }
    match lhs.value_kind() {
        ValueKind::Str if op == AssignOperator::Assign && rhs.value_kind() == ValueKind::Str => {}
        ValueKind::Int if rhs.value_kind() == ValueKind::Int => {}
        _ => {
            return Err(c.error(format!(
                "mismatched assignment {} {} {}",
                lhs, op, rhs
            )))
        }
    }
    Ok(ExpressionNode::assign(op, lhs, rhs))
}

fn parse_string(c: &mut ByteCursor) -> Result<ExpressionNode> {
    let len = tokenize::next_string(c.rest()).map_err(|e| match e {
        Unmeasurable::Truncated => c.error("unterminated string"),
        Unmeasurable::TooDeep => c.error("string escapes nested too deeply"),
    })?;
    let raw = c.take(len)?;
    let body = match raw {
        [b'"', inner @ .., b'"'] => inner,
        _ => raw,
    };

    let mut unescaped = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'\\' && body.get(i + 1) == Some(&b'"') {
            i += 1;
        }
        unescaped.push(body[i]);
        i += 1;
    }

    let text = Decoder::new(c.encoding()).decode(&unescaped).into_owned();
    Ok(ExpressionNode::StringConstant(text))
}

fn skip_separators(c: &mut ByteCursor) -> Result<()> {
    loop {
        match c.peek() {
            Some(b',') => c.skip(1)?,
            Some(b'\n') => c.skip(3)?,
            _ => return Ok(()),
        }
    }
}

/// Parses data items up to and including the closing `)`.
fn parse_bundle(c: &mut ByteCursor) -> Result<Vec<ExpressionNode>> {
    let mut items = vec![];
    loop {
        skip_separators(c)?;
        match c.peek() {
            Some(b')') => {
                c.skip(1)?;
                return Ok(items);
            }
            None => return Err(c.error("unterminated parameter bundle")),
            _ => items.push(parse_data(c)?),
        }
    }
}

/// Parses one function parameter. Unlike [`parse_expression`] this also
/// accepts strings, `Complex` bundles and `Special` tagged bundles.
pub fn parse_data(c: &mut ByteCursor) -> Result<ExpressionNode> {
    skip_separators(c)?;
    if tokenize::starts_string(c.rest()) {
        return parse_string(c);
    }

    match c.peek() {
        Some(b'a') => {
            c.skip(1)?;
            let mut tag = c.next_u8()? as i32;
            if c.peek() == Some(b'a') {
                c.skip(1)?;
                let second = c.next_u8()? as i32;
                tag |= second << 16;
            }
            if c.peek() != Some(b'(') {
                let item = nested(c, parse_data)?;
                return Ok(ExpressionNode::Special(tag, vec![item]));
            }
            c.skip(1)?;
            Ok(ExpressionNode::Special(tag, nested(c, parse_bundle)?))
        }
        Some(b'(') => {
            let start = c.position();
            c.skip(1)?;
            match nested(c, parse_bundle) {
                Ok(mut items) if c.peek() != Some(b'\\') => Ok(match items.len() {
                    1 => items.remove(0),
                    _ => ExpressionNode::Complex(items),
                }),
                // a parenthesised operand of a larger expression
                _ => {
                    c.set_position(start);
                    parse_expression(c)
                }
            }
        }
        _ => parse_expression(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::memory::{Bank, Width};
    use pretty_assertions::assert_eq;
    use rlvm_nls::Encoding;
    use ExpressionNode::*;

    fn int(v: i32) -> Vec<u8> {
        let mut out = vec![b'$', 0xff];
        out.extend_from_slice(&v.to_le_bytes());
        out
    }

    fn mem(bank: u8, index: &[u8]) -> Vec<u8> {
        let mut out = vec![b'$', bank, b'['];
        out.extend_from_slice(index);
        out.push(b']');
        out
    }

    fn cat(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    fn parse_with(f: fn(&mut ByteCursor) -> Result<ExpressionNode>, src: &[u8]) -> ExpressionNode {
        let mut c = ByteCursor::new(src, Encoding::Sjis);
        let node = f(&mut c).unwrap();
        assert!(c.is_empty(), "trailing bytes after {}", node);
        node
    }

    fn a(index: ExpressionNode) -> ExpressionNode {
        ExpressionNode::memory(
            BankRef {
                bank: Bank::A,
                width: Width::Full,
            },
            index,
        )
    }

    #[test]
    fn precedence() {
        // 1 + 2 * 3 == 7
        let src = cat(&[
            &int(1),
            b"\\\x00",
            &int(2),
            b"\\\x02",
            &int(3),
            b"\\\x28",
            &int(7),
        ]);
        let node = parse_with(parse_expression, &src);
        assert_eq!(node.to_string(), "1 + 2 * 3 == 7");
        let BinaryOp(BinaryOperator::Eq, lhs, _) = node else {
            panic!("expected a comparison at the root");
        };
        assert!(matches!(*lhs, BinaryOp(BinaryOperator::Add, ..)));
    }

    #[test]
    fn logical_levels() {
        // 1 || 0 && 0
        let src = cat(&[&int(1), b"\\=", &int(0), b"\\<", &int(0)]);
        let node = parse_with(parse_expression, &src);
        assert!(matches!(node, BinaryOp(BinaryOperator::Or, ..)));
    }

    #[test]
    fn memory_and_unary() {
        // -intA[store]
        let src = cat(&[b"\\\x01", &mem(0, b"$\xc8")]);
        let node = parse_with(parse_expression, &src);
        assert_eq!(
            node,
            UnaryOp(UnaryOperator::Negate, Box::new(a(StoreRegister)))
        );
    }

    #[test]
    fn compound_assignment() {
        let src = cat(&[&mem(0, &int(0)), b"\\\x14", &int(5)]);
        let node = parse_with(parse_assignment, &src);
        assert_eq!(
            node,
            ExpressionNode::assign(AssignOperator::AddAssign, a(IntConstant(0)), IntConstant(5))
        );
    }

    #[test]
    fn assignment_rejects_constants_and_strings() {
        let src = cat(&[&int(1), b"\\\x1e", &int(5)]);
        let mut c = ByteCursor::new(&src, Encoding::Sjis);
        assert!(matches!(
            parse_assignment(&mut c),
            Err(Error::MalformedExpression { .. })
        ));

        // strS[0] += 1
        let src = cat(&[&mem(0x12, &int(0)), b"\\\x14", &int(1)]);
        let mut c = ByteCursor::new(&src, Encoding::Sjis);
        assert!(parse_assignment(&mut c).is_err());
    }

    #[test]
    fn strings() {
        assert_eq!(
            parse_with(parse_data, b"\"say \\\"hi\\\"\""),
            StringConstant("say \"hi\"".into())
        );
        assert_eq!(
            parse_with(parse_data, b"\x82\xa0"),
            StringConstant("あ".into())
        );
    }

    #[test]
    fn bundles() {
        let src = cat(&[b"(", &int(1), b",", &int(2), b")"]);
        assert_eq!(
            parse_with(parse_data, &src),
            Complex(vec![IntConstant(1), IntConstant(2)])
        );

        let src = cat(&[b"a\x05(", &int(1), b"\"x\")"]);
        assert_eq!(
            parse_with(parse_data, &src),
            Special(5, vec![IntConstant(1), StringConstant("x".into())])
        );

        let src = cat(&[b"a\x01a\x02", &int(9)]);
        assert_eq!(
            parse_with(parse_data, &src),
            Special(0x0002_0001, vec![IntConstant(9)])
        );
    }

    #[test]
    fn parenthesised_operand() {
        // (1 + 2) * 3 starts like a bundle
        let src = cat(&[b"(", &int(1), b"\\\x00", &int(2), b")\\\x02", &int(3)]);
        let node = parse_with(parse_data, &src);
        assert!(matches!(node, BinaryOp(BinaryOperator::Mul, ..)));
    }

    #[test]
    fn truncated_input() {
        let src = &int(1)[..4];
        let mut c = ByteCursor::with_base(src, 0x40, Encoding::Sjis);
        match parse_expression(&mut c) {
            Err(Error::MalformedExpression { offset, .. }) => assert!(offset >= 0x40),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_bank() {
        let src = mem(7, &int(0));
        let mut c = ByteCursor::new(&src, Encoding::Sjis);
        assert!(parse_expression(&mut c).is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let mut src = vec![b'('; 200_000];
        src.extend_from_slice(&int(1));
        let mut c = ByteCursor::new(&src, Encoding::Sjis);
        assert!(matches!(
            parse_expression(&mut c),
            Err(Error::MalformedExpression { .. })
        ));
        let mut c = ByteCursor::new(&src, Encoding::Sjis);
        assert!(matches!(
            parse_data(&mut c),
            Err(Error::MalformedExpression { .. })
        ));

        // -(-(-(...))) counts as nesting too
        let src = [b"\\\x01".repeat(300), int(1)].concat();
        let mut c = ByteCursor::new(&src, Encoding::Sjis);
        assert!(parse_expression(&mut c).is_err());

        let depth = 100;
        let src = [vec![b'('; depth], int(4), vec![b')'; depth]].concat();
        assert_eq!(parse_with(parse_expression, &src), IntConstant(4));
    }
}
