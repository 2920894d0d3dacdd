//! Splits a decompressed instruction stream into elements.

use std::ops::Range;

use bytes::Bytes;
use rlvm_nls::Encoding;
use tracing::trace;

use super::header::ENTRYPOINT_BASE;
use super::instruction::{
    Command, CommandForm, ElementKind, Instruction, OpcodeKey, ParamSpan, ParamSyntax,
    SelectCondition, SelectLayout, SelectOption,
};
use crate::error::{Error, Result};
use crate::expr::tokenize::{self, Measured, Unmeasurable};

/// Size of a command header: `#`, modtype, module, opcode, argc, overload.
pub const COMMAND_SIZE: usize = 8;

/// An element whose jump targets are still byte offsets.
pub(crate) struct PendingElement {
    pub instruction: Instruction,
    pub target_offsets: Vec<i32>,
}

pub(crate) struct ElementReader<'a> {
    data: &'a Bytes,
    kidoku_table: &'a [i32],
    encoding: Encoding,
    pos: usize,
    entrypoint_marker: u8,
}

/// Cursor over one element, reporting failures against the element start.
struct Scan<'a> {
    data: &'a [u8],
    start: usize,
    pos: usize,
}

impl<'a> Scan<'a> {
    fn at(&self, i: usize) -> u8 {
        self.data.get(self.pos + i).copied().unwrap_or(0)
    }

    fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or(&[])
    }

    fn fail(&self, reason: impl std::fmt::Display) -> Error {
        Error::corrupt(format!(
            "{} (element at 0x{:x}, byte 0x{:x})",
            reason, self.start, self.pos
        ))
    }

    fn expect(&mut self, want: u8) -> Result<()> {
        if self.at(0) != want || self.pos >= self.data.len() {
            return Err(self.fail(format!("expected {:?}", want as char)));
        }
        self.pos += 1;
        Ok(())
    }

    fn i16(&mut self) -> Result<i16> {
        let b = self
            .data
            .get(self.pos..self.pos + 2)
            .ok_or_else(|| self.fail("truncated 16-bit value"))?;
        self.pos += 2;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| self.fail("truncated 32-bit value"))?;
        self.pos += 4;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Advances over a construct measured by `f`, returning its range
    /// relative to the element start.
    fn measure(&mut self, f: fn(&[u8]) -> Measured, what: &str) -> Result<Range<usize>> {
        let len = f(self.rest()).map_err(|e| match e {
            Unmeasurable::Truncated => self.fail(format!("truncated {}", what)),
            Unmeasurable::TooDeep => Error::malformed(
                self.pos,
                format!("{} nested deeper than {} levels", what, tokenize::MAX_DEPTH),
            ),
        })?;
        let range = self.pos - self.start..self.pos - self.start + len;
        self.pos += len;
        Ok(range)
    }
}

impl<'a> ElementReader<'a> {
    pub fn new(data: &'a Bytes, kidoku_table: &'a [i32], encoding: Encoding) -> Self {
        Self {
            data,
            kidoku_table,
            encoding,
            pos: 0,
            entrypoint_marker: b'@',
        }
    }

    pub fn read_all(mut self) -> Result<Vec<PendingElement>> {
        let mut out = vec![];
        while self.pos < self.data.len() {
            let element = self.read_element()?;
            self.pos += element.instruction.len().max(1);
            out.push(element);
        }
        Ok(out)
    }

    fn scan(&self) -> Scan<'a> {
        Scan {
            data: self.data.as_ref(),
            start: self.pos,
            pos: self.pos,
        }
    }

    fn finish(
        &self,
        end: usize,
        kind: ElementKind,
        params: Vec<ParamSpan>,
        target_offsets: Vec<i32>,
    ) -> Result<PendingElement> {
        let end = end.max(self.pos + 1);
        if end > self.data.len() {
            return Err(Error::corrupt(format!(
                "element at 0x{:x} runs past the end of the stream",
                self.pos
            )));
        }
        let raw = self.data.slice(self.pos..end);
        Ok(PendingElement {
            instruction: Instruction::new(self.pos, kind, raw, params, self.encoding),
            target_offsets,
        })
    }

    fn read_element(&mut self) -> Result<PendingElement> {
        let c = self.data[self.pos];
        if c == b'!' {
            self.entrypoint_marker = b'!';
        }
        match c {
            0 | b',' => self.finish(self.pos + 1, ElementKind::Comma, vec![], vec![]),
            b'\n' => {
                let mut s = self.scan();
                s.pos += 1;
                let line = s.i16()?;
                self.finish(s.pos, ElementKind::Line(line), vec![], vec![])
            }
            b'@' | b'!' => self.read_kidoku(),
            b'$' => {
                let mut s = self.scan();
                let range = s.measure(tokenize::next_assignment, "expression")?;
                let params = vec![ParamSpan::new(range, ParamSyntax::Assignment)];
                self.finish(s.pos, ElementKind::Expression, params, vec![])
            }
            b'#' => self.read_command(),
            _ => self.read_textout(),
        }
    }

    fn read_kidoku(&mut self) -> Result<PendingElement> {
        let mut s = self.scan();
        s.pos += 1;
        let value = s.i16()?;
        let entry = usize::try_from(value)
            .ok()
            .and_then(|i| self.kidoku_table.get(i))
            .ok_or_else(|| s.fail(format!("kidoku marker {} outside of table", value)))?;
        let kind = if *entry >= ENTRYPOINT_BASE {
            ElementKind::Entrypoint(*entry - ENTRYPOINT_BASE)
        } else {
            ElementKind::Kidoku(value)
        };
        self.finish(s.pos, kind, vec![], vec![])
    }

    fn read_textout(&mut self) -> Result<PendingElement> {
        let data = &self.data[..];
        let mut end = self.pos;
        let mut quoted = false;
        while end < data.len() {
            let mut c = data[end];
            if quoted {
                quoted = c != b'"';
                if c == b'\\' && data.get(end + 1) == Some(&b'"') {
                    end += 1;
                    c = data[end];
                }
            } else {
                if c == b',' {
                    end += 1;
                    c = data.get(end).copied().unwrap_or(0);
                }
                quoted = c == b'"';
                if matches!(c, 0 | b'#' | b'$' | b'\n' | b'@') || c == self.entrypoint_marker {
                    break;
                }
            }
            end += if Encoding::is_lead_byte(c) { 2 } else { 1 };
        }
        let end = end.min(data.len());
        self.finish(end, ElementKind::Textout, vec![], vec![])
    }

    fn read_command(&mut self) -> Result<PendingElement> {
        let mut s = self.scan();
        let header = s
            .data
            .get(s.pos..s.pos + COMMAND_SIZE)
            .ok_or_else(|| s.fail("truncated command header"))?;
        let key = OpcodeKey::new(
            header[1],
            header[2],
            u16::from_le_bytes([header[3], header[4]]),
            header[7],
        );
        let argc = u16::from_le_bytes([header[5], header[6]]);
        let form = CommandForm::for_opcode(key.packed());
        s.pos += COMMAND_SIZE;

        let mut command = Command {
            key,
            argc,
            form,
            targets: vec![],
            cases: vec![],
            select: None,
        };
        let mut params = vec![];
        let mut target_offsets = vec![];

        match form {
            CommandForm::Function => {
                params = read_data_list(&mut s)?;
                // a trailing source-line marker is not a parameter
                if let Some(last) = params.last() {
                    if last.range.len() == 3 && s.data[s.start + last.range.start] == b'\n' {
                        params.pop();
                    }
                }
            }
            CommandForm::Goto => target_offsets.push(s.i32()?),
            CommandForm::GotoIf => {
                if s.at(0) == b'(' {
                    s.pos += 1;
                    let range = s.measure(tokenize::next_expression, "condition")?;
                    params.push(ParamSpan::new(range, ParamSyntax::Expression));
                    s.expect(b')')?;
                }
                target_offsets.push(s.i32()?);
            }
            CommandForm::GotoOn => {
                let range = s.measure(tokenize::next_expression, "condition")?;
                params.push(ParamSpan::new(range, ParamSyntax::Expression));
                s.expect(b'{')?;
                for _ in 0..argc {
                    target_offsets.push(s.i32()?);
                }
                s.expect(b'}')?;
            }
            CommandForm::GotoCase => {
                let range = s.measure(tokenize::next_expression, "condition")?;
                params.push(ParamSpan::new(range, ParamSyntax::Expression));
                s.expect(b'{')?;
                for _ in 0..argc {
                    s.expect(b'(')?;
                    if s.at(0) == b')' {
                        command.cases.push(None);
                    } else {
                        command
                            .cases
                            .push(Some(s.measure(tokenize::next_expression, "case")?));
                    }
                    s.expect(b')')?;
                    target_offsets.push(s.i32()?);
                }
                s.expect(b'}')?;
            }
            CommandForm::GosubWith => {
                params = read_data_list(&mut s)?;
                target_offsets.push(s.i32()?);
            }
            CommandForm::Select => {
                let (layout, texts) = read_select(&mut s, argc)?;
                params = texts;
                command.select = Some(layout);
            }
        }

        trace!(offset = s.start, %key, ?form, "command");
        self.finish(s.pos, ElementKind::Command(command), params, target_offsets)
    }
}

/// Reads an optional `( data* )` list.
fn read_data_list(s: &mut Scan) -> Result<Vec<ParamSpan>> {
    let mut params = vec![];
    if s.at(0) != b'(' {
        return Ok(params);
    }
    s.pos += 1;
    while s.at(0) != b')' {
        if s.pos >= s.data.len() {
            return Err(s.fail("unterminated parameter list"));
        }
        let range = s.measure(tokenize::next_data, "parameter")?;
        if range.is_empty() {
            return Err(s.fail("unparseable parameter"));
        }
        params.push(ParamSpan::new(range, ParamSyntax::Data));
    }
    s.expect(b')')?;
    Ok(params)
}

fn read_select(s: &mut Scan, argc: u16) -> Result<(SelectLayout, Vec<ParamSpan>)> {
    let mut layout = SelectLayout::default();
    if s.at(0) == b'(' {
        // the window number, bracketed
        s.pos += 1;
        layout.window = Some(s.measure(tokenize::next_expression, "window")?);
        s.expect(b')')?;
    }
    s.expect(b'{')?;
    if s.at(0) == b'\n' {
        s.pos += 1;
        layout.first_line = s.i16()?;
    }

    let mut texts = vec![];
    for _ in 0..argc {
        while s.at(0) == b',' && s.pos < s.data.len() {
            s.pos += 1;
        }
        let mut conditions = vec![];
        if s.at(0) == b'(' {
            s.pos += 1;
            while s.at(0) != b')' {
                if s.pos >= s.data.len() {
                    return Err(s.fail("unterminated option condition"));
                }
                let condition = if s.at(0) == b'(' {
                    Some(s.measure(tokenize::next_expression, "option condition")?)
                } else {
                    None
                };
                let effect = s.at(0);
                s.pos += 1;
                let seek_argument = effect != b'2' && effect != b'3';
                let argument = if seek_argument && s.at(0) != b')' && !s.at(0).is_ascii_digit() {
                    Some(s.measure(tokenize::next_expression, "option argument")?)
                } else {
                    None
                };
                conditions.push(SelectCondition {
                    condition,
                    effect,
                    argument,
                });
            }
            s.expect(b')')?;
        }
        let text = s.measure(tokenize::next_string, "option text")?;
        texts.push(ParamSpan::new(text.clone(), ParamSyntax::Data));
        s.expect(b'\n')?;
        let line = s.i16()?;
        layout.options.push(SelectOption {
            conditions,
            text,
            line,
        });
    }

    // stray line markers before the closing brace
    while s.at(0) == b'\n' && s.pos < s.data.len() {
        s.pos += 3;
    }
    s.expect(b'}')?;
    Ok((layout, texts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn read(stream: &[u8], kidoku: &[i32]) -> Vec<PendingElement> {
        let data = Bytes::copy_from_slice(stream);
        ElementReader::new(&data, kidoku, Encoding::Sjis)
            .read_all()
            .unwrap()
    }

    fn kinds(elements: &[PendingElement]) -> Vec<&'static str> {
        elements.iter().map(|e| e.instruction.kind().name()).collect()
    }

    #[test]
    fn simple_elements() {
        let stream = b"\n\x01\x00@\x00\x00,\x00!\x01\x00Hello\x00";
        let elements = read(stream, &[5, 1_000_002]);
        assert_eq!(
            kinds(&elements),
            ["line", "kidoku", "comma", "comma", "entrypoint", "textout", "comma"]
        );
        assert_eq!(elements[4].instruction.kind(), &ElementKind::Entrypoint(2));
        assert_eq!(elements[5].instruction.text().unwrap(), "Hello");
    }

    #[test]
    fn entrypoint_marker_switch() {
        // once `!` is seen, `!` ends a textout
        let stream = b"!\x00\x00ab!\x00\x00";
        let elements = read(stream, &[0]);
        assert_eq!(kinds(&elements), ["kidoku", "textout", "kidoku"]);
        assert_eq!(elements[1].instruction.raw(), b"ab");
    }

    #[test]
    fn kidoku_outside_table() {
        let data = Bytes::from_static(b"@\x09\x00");
        assert!(ElementReader::new(&data, &[0], Encoding::Sjis)
            .read_all()
            .is_err());
    }

    #[test]
    fn function_with_line_marker_parameter() {
        let stream = b"#\x01\x0a\x05\x00\x02\x00\x00($\xff\x01\x00\x00\x00\n\x07\x00)";
        let elements = read(stream, &[]);
        assert_eq!(elements.len(), 1);
        let inst = &elements[0].instruction;
        assert_eq!(inst.len(), stream.len());
        assert_eq!(inst.param_count(), 1);
        assert_eq!(inst.to_string(), "op<1:010:00005, 0>(1)");
    }

    #[test]
    fn goto_forms() {
        // goto_if (store) @0x0
        let stream = b"#\x00\x01\x01\x00\x00\x00\x00($\xc8)\x00\x00\x00\x00";
        let elements = read(stream, &[]);
        let cmd = elements[0].instruction.command().unwrap();
        assert_eq!(cmd.form, CommandForm::GotoIf);
        assert_eq!(elements[0].target_offsets, vec![0]);
        assert_eq!(elements[0].instruction.len(), stream.len());

        // goto_case store { (1) @0, () @0 }
        let stream =
            b"#\x00\x01\x04\x00\x02\x00\x00$\xc8{($\xff\x01\x00\x00\x00)\x00\x00\x00\x00()\x00\x00\x00\x00}";
        let elements = read(stream, &[]);
        let inst = &elements[0].instruction;
        assert_eq!(inst.len(), stream.len());
        assert_eq!(elements[0].target_offsets.len(), 2);
        assert_eq!(
            inst.case_expression(0).unwrap(),
            Some(crate::expr::ExpressionNode::IntConstant(1))
        );
        assert_eq!(inst.case_expression(1).unwrap(), None);
    }

    #[test]
    fn select() {
        let stream = b"#\x00\x02\x01\x00\x02\x00\x00{\n\x03\x00\
            \"Yes\"\n\x04\x00\
            ,(($\xc8)2)\"No\"\n\x05\x00\
            \n\x06\x00}";
        let elements = read(stream, &[]);
        assert_eq!(elements.len(), 1);
        let inst = &elements[0].instruction;
        assert_eq!(inst.len(), stream.len());
        let layout = inst.command().unwrap().select.as_ref().unwrap();
        assert_eq!(layout.first_line, 3);
        assert_eq!(layout.options.len(), 2);
        assert_eq!(layout.options[1].line, 5);
        assert_eq!(layout.options[1].conditions[0].effect, b'2');
        assert_eq!(inst.render_parameters(), "(\"Yes\", \"No\")");
        let conditions = inst.select_conditions(1).unwrap();
        assert_eq!(
            conditions[0].0,
            Some(crate::expr::ExpressionNode::StoreRegister)
        );
    }

    #[test]
    fn assignment_statement() {
        let stream = b"$\x00[$\xff\x00\x00\x00\x00]\\\x14$\xff\x05\x00\x00\x00\n\x01\x00";
        let elements = read(stream, &[]);
        assert_eq!(kinds(&elements), ["expression", "line"]);
        assert_eq!(elements[0].instruction.to_string(), "intA[0] += 5");
    }
}
