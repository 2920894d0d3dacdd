//! Boundary scanning for expression data.
//!
//! These functions only measure how many bytes a construct occupies so the
//! scenario reader can split elements without parsing them.

use rlvm_nls::Encoding;

/// Deepest nesting of parentheses, indices and bundles accepted.
pub const MAX_DEPTH: usize = 256;

/// Why a construct could not be measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmeasurable {
    /// the construct runs past the end of the input
    Truncated,
    /// nested deeper than [`MAX_DEPTH`]
    TooDeep,
}

pub type Measured = Result<usize, Unmeasurable>;

#[inline]
fn at(src: &[u8], i: usize) -> u8 {
    src.get(i).copied().unwrap_or(0)
}

#[inline]
fn tail(src: &[u8], i: usize) -> &[u8] {
    src.get(i..).unwrap_or(&[])
}

fn bounded(src: &[u8], len: usize) -> Measured {
    if len <= src.len() {
        Ok(len)
    } else {
        Err(Unmeasurable::Truncated)
    }
}

fn nested(depth: usize) -> Result<usize, Unmeasurable> {
    if depth < MAX_DEPTH {
        Ok(depth + 1)
    } else {
        Err(Unmeasurable::TooDeep)
    }
}

fn token_at(src: &[u8], depth: usize) -> Measured {
    if at(src, 0) != b'$' {
        return Ok(0);
    }
    if at(src, 1) == 0xff {
        return bounded(src, 6);
    }
    if at(src, 2) != b'[' {
        return bounded(src, 2);
    }
    bounded(src, 4 + expression_at(tail(src, 3), nested(depth)?)?)
}

fn term_at(src: &[u8], depth: usize) -> Measured {
    match at(src, 0) {
        b'(' => bounded(src, 2 + expression_at(tail(src, 1), nested(depth)?)?),
        b'\\' => bounded(src, 2 + term_at(tail(src, 2), nested(depth)?)?),
        _ => token_at(src, depth),
    }
}

/// Any operator continues the chain; precedence is the parser's concern.
fn arithmetic_at(src: &[u8], depth: usize) -> Measured {
    let mut end = term_at(src, depth)?;
    while at(src, end) == b'\\' {
        end += 2;
        end += term_at(tail(src, end), depth)?;
    }
    bounded(src, end)
}

fn condition_at(src: &[u8], depth: usize) -> Measured {
    let mut end = arithmetic_at(src, depth)?;
    while at(src, end) == b'\\' && (0x28..=0x2d).contains(&at(src, end + 1)) {
        end += 2;
        end += arithmetic_at(tail(src, end), depth)?;
    }
    bounded(src, end)
}

fn logical_at(src: &[u8], depth: usize) -> Measured {
    let mut end = condition_at(src, depth)?;
    while at(src, end) == b'\\' && matches!(at(src, end + 1), b'<' | b'=') {
        end += 2;
        end += condition_at(tail(src, end), depth)?;
    }
    bounded(src, end)
}

fn expression_at(src: &[u8], depth: usize) -> Measured {
    logical_at(src, depth)
}

pub fn next_token(src: &[u8]) -> Measured {
    token_at(src, 0)
}

pub fn next_expression(src: &[u8]) -> Measured {
    expression_at(src, 0)
}

/// Length of an assignment statement: `term \op expression`.
pub fn next_assignment(src: &[u8]) -> Measured {
    let lhs = term_at(src, 0)?;
    if at(src, lhs) != b'\\' {
        return bounded(src, lhs);
    }
    bounded(src, lhs + 2 + expression_at(tail(src, lhs + 2), 0)?)
}

pub(crate) const PRINT_PREFIX: &[u8] = b"###PRINT(";

/// Characters that may appear in an unquoted string.
fn is_string_char(c: u8) -> bool {
    Encoding::is_lead_byte(c)
        || c.is_ascii_alphanumeric()
        || matches!(c, b' ' | b'?' | b'_' | b'"' | b'\\')
}

/// Characters that start a string datum.
pub(crate) fn starts_string(src: &[u8]) -> bool {
    let c = at(src, 0);
    Encoding::is_lead_byte(c)
        || c.is_ascii_uppercase()
        || c.is_ascii_digit()
        || matches!(c, b' ' | b'?' | b'_' | b'"')
        || src.starts_with(PRINT_PREFIX)
}

fn is_unescaped_quote(src: &[u8], i: usize) -> bool {
    at(src, i) == b'"' && (i == 0 || at(src, i - 1) != b'\\')
}

fn string_at(src: &[u8], depth: usize) -> Measured {
    let mut quoted = false;
    let mut end = 0;
    while end < src.len() {
        if quoted {
            if is_unescaped_quote(src, end) {
                return Ok(end + 1);
            }
        } else {
            quoted = is_unescaped_quote(src, end);
            if tail(src, end).starts_with(PRINT_PREFIX) {
                end += PRINT_PREFIX.len();
                end += 1 + expression_at(tail(src, end), nested(depth)?)?;
                continue;
            }
            if !is_string_char(src[end]) {
                break;
            }
        }
        end += if Encoding::is_lead_byte(src[end]) { 2 } else { 1 };
    }
    if quoted {
        // unterminated quote
        return Err(Unmeasurable::Truncated);
    }
    bounded(src, end)
}

/// Length of a string datum: a run of unquoted characters, optionally ending
/// in a quoted section, with `###PRINT(expr)` escapes allowed in between.
pub fn next_string(src: &[u8]) -> Measured {
    string_at(src, 0)
}

fn data_at(src: &[u8], depth: usize) -> Measured {
    let mut start = 0;
    loop {
        match at(src, start) {
            b',' => start += 1,
            b'\n' => start += 3,
            _ => break,
        }
    }
    let item = tail(src, start);
    bounded(src, start + datum_at(item, depth)?)
}

fn datum_at(src: &[u8], depth: usize) -> Measured {
    if starts_string(src) {
        return string_at(src, depth);
    }
    match at(src, 0) {
        b'a' | b'(' => {
            let inner = nested(depth)?;
            let mut end = 0;
            if at(src, 0) == b'a' {
                end = 2;
                // some specials carry a second tag
                if at(src, end) == b'a' {
                    end += 2;
                }
                if at(src, end) != b'(' {
                    return bounded(src, end + data_at(tail(src, end), inner)?);
                }
            }
            end += 1;
            while at(src, end) != b')' {
                if end >= src.len() {
                    return Err(Unmeasurable::Truncated);
                }
                let step = data_at(tail(src, end), inner)?;
                if step == 0 {
                    return Err(Unmeasurable::Truncated);
                }
                end += step;
            }
            end += 1;
            if at(src, end) == b'\\' {
                end += expression_at(tail(src, end), depth)?;
            }
            bounded(src, end)
        }
        _ => expression_at(src, depth),
    }
}

/// Length of one parameter, including any leading commas and line markers.
pub fn next_data(src: &[u8]) -> Measured {
    data_at(src, 0)
}
