//! `Gameexe.ini`, the per-game configuration file.
//!
//! Each meaningful line looks like `#KEY = value, value, ...`. Values are
//! integers or double-quoted strings; anything else between them is
//! punctuation. Strings are kept as raw bytes since they are in the game's
//! encoding.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameexeValue {
    Int(i32),
    Str(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct Gameexe {
    entries: HashMap<String, Vec<GameexeValue>>,
}

fn is_num(c: u8) -> bool {
    c == b'-' || c.is_ascii_digit()
}

fn tokenize(value: &[u8]) -> Vec<GameexeValue> {
    let mut out = vec![];
    let mut i = 0;
    while i < value.len() {
        let c = value[i];
        if c == b'"' {
            let start = i + 1;
            let end = value[start..]
                .iter()
                .position(|&b| b == b'"')
                .map_or(value.len(), |p| start + p);
            out.push(GameexeValue::Str(value[start..end].to_vec()));
            i = end + 1;
        } else if is_num(c) {
            let mut token = String::new();
            let mut last = 0u8;
            while i < value.len() && is_num(value[i]) {
                // a dash after a digit separates a range
                if value[i] == b'-' && last.is_ascii_digit() {
                    i += 1;
                    break;
                }
                token.push(value[i] as char);
                last = value[i];
                i += 1;
            }
            if token != "-" {
                out.push(GameexeValue::Int(token.parse().unwrap_or_else(|_| {
                    warn!("cannot read {:?} as an integer", token);
                    0
                })));
            }
        } else {
            i += 1;
        }
    }
    out
}

impl Gameexe {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::parse(&std::fs::read(path)?))
    }

    pub fn parse(data: &[u8]) -> Self {
        let mut entries = HashMap::new();
        for line in data.split(|&b| b == b'\n') {
            let Some(hash) = line.iter().position(|&b| b == b'#') else {
                continue;
            };
            let line = &line[hash + 1..];
            let (key, value) = match line.iter().position(|&b| b == b'=') {
                Some(eq) => (&line[..eq], &line[eq + 1..]),
                None => (line, &[][..]),
            };
            let key = String::from_utf8_lossy(key).trim().to_string();
            entries.entry(key).or_insert_with(|| tokenize(value));
        }
        Self { entries }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&[GameexeValue]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// First value of `key`, if it is an integer.
    pub fn int(&self, key: &str) -> Option<i32> {
        match self.get(key)?.first()? {
            GameexeValue::Int(v) => Some(*v),
            GameexeValue::Str(_) => None,
        }
    }

    /// All integer values of `key`.
    pub fn ints(&self, key: &str) -> Vec<i32> {
        self.get(key)
            .unwrap_or_default()
            .iter()
            .filter_map(|v| match v {
                GameexeValue::Int(i) => Some(*i),
                GameexeValue::Str(_) => None,
            })
            .collect()
    }

    /// First string value of `key`.
    pub fn string(&self, key: &str) -> Option<&[u8]> {
        self.get(key)?.iter().find_map(|v| match v {
            GameexeValue::Str(s) => Some(s.as_slice()),
            GameexeValue::Int(_) => None,
        })
    }

    /// The registry name that selects the game's key table.
    pub fn regname(&self) -> Option<&[u8]> {
        self.string("REGNAME")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &[u8] = b"\
#CAPTION = \"\x83N\x83\x89\x83i\x83h\"\r
#REGNAME = \"KEY\\CLANNAD_FV\"\r
#SEEN_START = 0001\r
#WINDOW.000.MOJI_CNT=023,003\r
#SCREENSIZE_MOD=999.-1\r
#RANGE = 100-200\r
#NEGATIVE = -5,-6\r
#SEEN_START = 9999\r
; comment\r
";

    #[test]
    fn values() {
        let g = Gameexe::parse(SAMPLE);
        assert_eq!(g.regname(), Some(&b"KEY\\CLANNAD_FV"[..]));
        assert_eq!(g.string("CAPTION").map(<[u8]>::len), Some(8));
        assert_eq!(g.int("SEEN_START"), Some(1));
        assert_eq!(g.ints("WINDOW.000.MOJI_CNT"), vec![23, 3]);
        assert_eq!(g.ints("SCREENSIZE_MOD"), vec![999, -1]);
        assert_eq!(g.ints("RANGE"), vec![100, 200]);
        assert_eq!(g.ints("NEGATIVE"), vec![-5, -6]);
        assert_eq!(g.len(), 7);
    }

    #[test]
    fn missing_keys() {
        let g = Gameexe::parse(b"#FLAG\n");
        assert!(g.contains("FLAG"));
        assert_eq!(g.get("FLAG"), Some(&[][..]));
        assert_eq!(g.int("NOPE"), None);
        assert!(g.ints("NOPE").is_empty());
        assert_eq!(g.regname(), None);
    }
}
