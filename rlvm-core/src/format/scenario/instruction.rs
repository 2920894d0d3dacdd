use std::fmt;
use std::ops::Range;

use bytes::Bytes;
use itertools::Itertools;
use once_cell::sync::OnceCell;
use rlvm_nls::{Decoder, Encoding, TextDecoder};

use crate::error::Result;
use crate::expr::{self, ByteCursor, ExpressionNode};

/// Identifies a command: `op<modtype:module:opcode, overload>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpcodeKey {
    pub modtype: u8,
    pub module: u8,
    pub opcode: u16,
    pub overload: u8,
}

impl OpcodeKey {
    pub const fn new(modtype: u8, module: u8, opcode: u16, overload: u8) -> Self {
        Self {
            modtype,
            module,
            opcode,
            overload,
        }
    }

    /// `0xTTMMOOOO`, the form used to recognise control-flow commands.
    pub fn packed(&self) -> u32 {
        (self.modtype as u32) << 24 | (self.module as u32) << 16 | self.opcode as u32
    }
}

impl fmt::Display for OpcodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "op<{}:{:03}:{:05}, {}>",
            self.modtype, self.module, self.opcode, self.overload
        )
    }
}

/// How the bytes after a command header are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandForm {
    Function,
    Goto,
    GotoIf,
    GotoOn,
    GotoCase,
    GosubWith,
    Select,
}

impl CommandForm {
    pub fn for_opcode(packed: u32) -> Self {
        match packed {
            0x00010000 | 0x00010005 | 0x00050001 | 0x00050005 | 0x00060001 | 0x00060005 => {
                CommandForm::Goto
            }
            0x00010001 | 0x00010002 | 0x00010006 | 0x00010007 | 0x00050002 | 0x00050006
            | 0x00050007 | 0x00060000 | 0x00060002 | 0x00060006 | 0x00060007 => {
                CommandForm::GotoIf
            }
            0x00010003 | 0x00010008 | 0x00050003 | 0x00050008 | 0x00060003 | 0x00060008 => {
                CommandForm::GotoOn
            }
            0x00010004 | 0x00010009 | 0x00050004 | 0x00050009 | 0x00060004 | 0x00060009 => {
                CommandForm::GotoCase
            }
            0x00010010 | 0x00060010 => CommandForm::GosubWith,
            0x00020000 | 0x00020001 | 0x00020002 | 0x00020003 | 0x00020010 => CommandForm::Select,
            _ => CommandForm::Function,
        }
    }
}

/// One condition attached to a selection option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectCondition {
    pub condition: Option<Range<usize>>,
    pub effect: u8,
    pub argument: Option<Range<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub conditions: Vec<SelectCondition>,
    pub text: Range<usize>,
    pub line: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectLayout {
    pub window: Option<Range<usize>>,
    pub first_line: i16,
    pub options: Vec<SelectOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub key: OpcodeKey,
    pub argc: u16,
    pub form: CommandForm,
    /// jump destinations as instruction indices
    pub targets: Vec<usize>,
    /// `GotoCase` case expressions, `None` for the default case
    pub cases: Vec<Option<Range<usize>>>,
    pub select: Option<SelectLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Comma,
    Line(i16),
    Kidoku(i16),
    Entrypoint(i32),
    /// a `$` assignment statement
    Expression,
    Textout,
    Command(Command),
}

impl ElementKind {
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Comma => "comma",
            ElementKind::Line(_) => "line",
            ElementKind::Kidoku(_) => "kidoku",
            ElementKind::Entrypoint(_) => "entrypoint",
            ElementKind::Expression => "expression",
            ElementKind::Textout => "textout",
            ElementKind::Command(_) => "command",
        }
    }
}

/// Grammar used to parse one parameter's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSyntax {
    Data,
    Expression,
    Assignment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpan {
    pub range: Range<usize>,
    pub syntax: ParamSyntax,
}

impl ParamSpan {
    pub fn new(range: Range<usize>, syntax: ParamSyntax) -> Self {
        Self { range, syntax }
    }
}

#[cfg(test)]
thread_local! {
    pub(crate) static PARSE_COUNT: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// One element of a scenario's instruction stream.
///
/// Parameters are kept as raw bytes and parsed on first access; the parsed
/// trees are cached for the lifetime of the instruction.
#[derive(Debug)]
pub struct Instruction {
    offset: usize,
    kind: ElementKind,
    raw: Bytes,
    params: Vec<ParamSpan>,
    encoding: Encoding,
    parsed: OnceCell<Vec<ExpressionNode>>,
}

impl Instruction {
    pub fn new(
        offset: usize,
        kind: ElementKind,
        raw: Bytes,
        params: Vec<ParamSpan>,
        encoding: Encoding,
    ) -> Self {
        Self {
            offset,
            kind,
            raw,
            params,
            encoding,
            parsed: OnceCell::new(),
        }
    }

    /// Byte offset in the decompressed stream.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut ElementKind {
        &mut self.kind
    }

    pub fn command(&self) -> Option<&Command> {
        match &self.kind {
            ElementKind::Command(c) => Some(c),
            _ => None,
        }
    }

    /// The element's bytes as stored.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Raw bytes of parameter `i`.
    pub fn param_bytes(&self, i: usize) -> Option<&[u8]> {
        self.params.get(i).and_then(|p| self.raw.get(p.range.clone()))
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed.get().is_some()
    }

    /// Parsed parameters. The first call parses; later and concurrent
    /// callers see the same cached trees.
    pub fn parameters(&self) -> Result<&[ExpressionNode]> {
        self.parsed
            .get_or_try_init(|| {
                #[cfg(test)]
                PARSE_COUNT.with(|c| c.set(c.get() + 1));
                self.params.iter().map(|p| self.parse_span(p)).collect()
            })
            .map(Vec::as_slice)
    }

    fn parse_span(&self, span: &ParamSpan) -> Result<ExpressionNode> {
        self.parse_range(span.range.clone(), span.syntax)
    }

    fn parse_range(&self, range: Range<usize>, syntax: ParamSyntax) -> Result<ExpressionNode> {
        let base = self.offset + range.start;
        let bytes = self
            .raw
            .get(range)
            .ok_or_else(|| crate::error::Error::malformed(base, "parameter outside of element"))?;
        if bytes.is_empty() && syntax == ParamSyntax::Data {
            return Ok(ExpressionNode::StringConstant(String::new()));
        }

        let mut cursor = ByteCursor::with_base(bytes, base, self.encoding);
        let node = match syntax {
            ParamSyntax::Data => expr::parse_data(&mut cursor)?,
            ParamSyntax::Expression => expr::parse_expression(&mut cursor)?,
            ParamSyntax::Assignment => expr::parse_assignment(&mut cursor)?,
        };
        if !cursor.is_empty() {
            return Err(cursor.error("trailing bytes after parameter"));
        }
        Ok(node)
    }

    /// `GotoCase` case `i`. `Ok(None)` is the default case.
    pub fn case_expression(&self, i: usize) -> Result<Option<ExpressionNode>> {
        match self.command().and_then(|c| c.cases.get(i)) {
            Some(Some(range)) => self
                .parse_range(range.clone(), ParamSyntax::Expression)
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Window expression of a `Select`, if it names one.
    pub fn select_window(&self) -> Result<Option<ExpressionNode>> {
        match self
            .command()
            .and_then(|c| c.select.as_ref())
            .and_then(|s| s.window.clone())
        {
            Some(range) => self.parse_range(range, ParamSyntax::Expression).map(Some),
            None => Ok(None),
        }
    }

    /// Condition and argument expressions of option `i` of a `Select`.
    pub fn select_conditions(
        &self,
        i: usize,
    ) -> Result<Vec<(Option<ExpressionNode>, u8, Option<ExpressionNode>)>> {
        let Some(option) = self
            .command()
            .and_then(|c| c.select.as_ref())
            .and_then(|s| s.options.get(i))
        else {
            return Ok(vec![]);
        };
        option
            .conditions
            .iter()
            .map(|c| {
                let parse = |r: &Option<Range<usize>>| {
                    r.clone()
                        .map(|r| self.parse_range(r, ParamSyntax::Expression))
                        .transpose()
                };
                Ok((parse(&c.condition)?, c.effect, parse(&c.argument)?))
            })
            .collect()
    }

    /// Display text of a `Textout` element, with quoting removed.
    pub fn text(&self) -> Option<String> {
        if self.kind != ElementKind::Textout {
            return None;
        }
        let mut out = Vec::with_capacity(self.raw.len());
        let mut quoted = false;
        let mut i = 0;
        let raw = &self.raw[..];
        while i < raw.len() {
            match raw[i] {
                b'"' => {
                    quoted = !quoted;
                    i += 1;
                }
                b'\\' if quoted => {
                    if raw.get(i + 1) == Some(&b'"') {
                        out.push(b'"');
                        i += 2;
                    } else {
                        out.push(b'\\');
                        i += 1;
                    }
                }
                c => {
                    let n = if Encoding::is_lead_byte(c) { 2 } else { 1 };
                    out.extend_from_slice(raw.get(i..i + n).unwrap_or(&raw[i..]));
                    i += n;
                }
            }
        }
        Some(Decoder::new(self.encoding).decode(&out).into_owned())
    }

    /// Debug rendering of the parameter list. Unparseable parameters show
    /// their raw bytes.
    pub fn render_parameters(&self) -> String {
        let rendered = match self.parameters() {
            Ok(nodes) => nodes.iter().map(|n| n.to_string()).collect_vec(),
            Err(_) => (0..self.param_count())
                .map(|i| {
                    let raw = self.param_bytes(i).unwrap_or_default();
                    match self.parse_span(&self.params[i]) {
                        Ok(node) => node.to_string(),
                        Err(_) => format!("{{RAW : {}}}", printable(raw)),
                    }
                })
                .collect_vec(),
        };
        format!("({})", rendered.join(", "))
    }
}

/// Hex-escapes everything outside printable ASCII.
fn printable(raw: &[u8]) -> String {
    raw.iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                (b as char).to_string()
            } else {
                format!("\\x{:02x}", b)
            }
        })
        .collect()
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ElementKind::Comma => f.write_str("<comma>"),
            ElementKind::Line(n) => write!(f, "#line {}", n),
            ElementKind::Kidoku(n) => write!(f, "{{- Kidoku {} -}}", n),
            ElementKind::Entrypoint(n) => write!(f, "#entrypoint {}", n),
            ElementKind::Expression => match self.parameters() {
                Ok([node]) => write!(f, "{}", node),
                _ => write!(f, "{{RAW : {}}}", printable(&self.raw)),
            },
            ElementKind::Textout => write!(f, "{:?}", self.text().unwrap_or_default()),
            ElementKind::Command(c) => write!(f, "{}{}", c.key, self.render_parameters()),
        }
    }
}
