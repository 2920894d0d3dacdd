use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use glob::MatchOptions;
use once_cell::sync::OnceCell;
use rlvm_nls::Encoding;
use tracing::{debug, warn};

use super::compression::XorKeyTable;
use super::scenario::header::ScenarioHeader;
use super::scenario::Scenario;
use super::FileRegion;
use crate::error::{Error, Result};

/// Number of slots in the table of contents.
pub const TOC_ENTRIES: usize = 10000;
const TOC_ENTRY_SIZE: usize = 8;
pub const TOC_SIZE: usize = TOC_ENTRIES * TOC_ENTRY_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Container(FileRegion),
    /// a loose `SEENnnnn.TXT` next to the container
    Override(PathBuf),
}

/// All scenarios of one game.
///
/// The table of contents is read when the archive is opened; scenarios are
/// decoded on first access and cached.
#[derive(Debug)]
pub struct Archive {
    data: Bytes,
    toc: BTreeMap<u16, Source>,
    cache: HashMap<u16, OnceCell<Scenario>>,
    regname: Vec<u8>,
    xor_key: Option<&'static XorKeyTable>,
}

impl Archive {
    /// Opens `SEEN.TXT` and picks up override files in the same directory.
    /// `regname` selects the per-game key table.
    pub fn open(path: impl AsRef<Path>, regname: &[u8]) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let mut archive = Self::from_bytes(Bytes::from(data), regname)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        for (number, file) in find_overrides(dir)? {
            debug!(number, file = %file.display(), "scenario override");
            archive.toc.insert(number, Source::Override(file));
            archive.cache.entry(number).or_default();
        }
        Ok(archive)
    }

    /// Builds an archive over an in-memory container.
    pub fn from_bytes(data: Bytes, regname: &[u8]) -> Result<Self> {
        let toc = read_toc(&data)?;
        let cache = toc.keys().map(|&n| (n, OnceCell::new())).collect();
        let xor_key = XorKeyTable::for_registry(regname);
        debug!(
            scenarios = toc.len(),
            regname = %String::from_utf8_lossy(regname),
            key = xor_key.is_some(),
            "opened archive"
        );
        Ok(Self {
            data,
            toc,
            cache,
            regname: regname.to_vec(),
            xor_key,
        })
    }

    pub fn regname(&self) -> &[u8] {
        &self.regname
    }

    pub fn xor_key(&self) -> Option<&'static XorKeyTable> {
        self.xor_key
    }

    /// Scenario numbers in table-of-contents order.
    pub fn scenario_numbers(&self) -> impl Iterator<Item = u16> + '_ {
        self.toc.keys().copied()
    }

    pub fn contains(&self, number: u16) -> bool {
        self.toc.contains_key(&number)
    }

    pub fn len(&self) -> usize {
        self.toc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toc.is_empty()
    }

    /// Returns scenario `number`, decoding it on first access.
    ///
    /// `Ok(None)` means the table of contents has no such entry. A decoding
    /// failure is reported for this scenario only and is not cached.
    pub fn scenario(&self, number: u16) -> Result<Option<&Scenario>> {
        let (Some(source), Some(cell)) = (self.toc.get(&number), self.cache.get(&number)) else {
            return Ok(None);
        };
        cell.get_or_try_init(|| {
            let bytes = self.scenario_bytes(source)?;
            Scenario::from_bytes(number, &bytes, self.xor_key)
        })
        .map(Some)
    }

    fn scenario_bytes(&self, source: &Source) -> Result<Bytes> {
        match source {
            Source::Container(region) => {
                region.slice(&self.data)?;
                Ok(self
                    .data
                    .slice(region.offset..region.offset + region.length))
            }
            Source::Override(path) => Ok(Bytes::from(std::fs::read(path)?)),
        }
    }

    /// Text encoding of the first scenario that declares a non-default one.
    ///
    /// Only headers are read; unreadable scenarios are skipped.
    pub fn probable_encoding(&self) -> Encoding {
        for (number, source) in &self.toc {
            let header = self
                .scenario_bytes(source)
                .and_then(|bytes| ScenarioHeader::parse(&bytes));
            match header {
                Ok(header) if header.encoding() != Encoding::default() => {
                    debug!(number, encoding = %header.encoding(), "probable encoding");
                    return header.encoding();
                }
                Ok(_) => {}
                Err(e) => debug!(number, "skipping scenario while probing encoding: {}", e),
            }
        }
        Encoding::default()
    }
}

fn read_toc(data: &[u8]) -> Result<BTreeMap<u16, Source>> {
    if data.len() < TOC_SIZE {
        return Err(Error::corrupt(format!(
            "0x{:x} bytes is too short for the table of contents",
            data.len()
        )));
    }

    let mut toc = BTreeMap::new();
    for (number, entry) in data[..TOC_SIZE].chunks_exact(TOC_ENTRY_SIZE).enumerate() {
        let offset = i32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
        let length = i32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
        if offset == 0 {
            continue;
        }
        let (Ok(offset), Ok(length)) = (usize::try_from(offset), usize::try_from(length)) else {
            return Err(Error::corrupt(format!(
                "scenario {:04} has a negative region {}+{}",
                number, offset, length
            )));
        };
        toc.insert(number as u16, Source::Container(FileRegion::new(offset, length)));
    }
    Ok(toc)
}

/// Finds `SEENnnnn.TXT` files in `dir`, case-insensitively.
fn find_overrides(dir: &Path) -> Result<Vec<(u16, PathBuf)>> {
    let pattern = format!("{}/seen*.txt", glob::Pattern::escape(&dir.to_string_lossy()));
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    let paths = glob::glob_with(&pattern, options).map_err(|e| Error::Config(e.to_string()))?;

    let mut out = vec![];
    for path in paths.flatten() {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        // SEEN.TXT itself
        if name.eq_ignore_ascii_case("seen.txt") {
            continue;
        }
        match override_number(&name) {
            Some(number) => out.push((number, path)),
            None => warn!("ignoring oddly named scenario file {}", name),
        }
    }
    Ok(out)
}

fn override_number(name: &str) -> Option<u16> {
    if name.len() != 12 || !name.is_char_boundary(4) || !name.is_char_boundary(8) {
        return None;
    }
    let digits = &name[4..8];
    if !name[..4].eq_ignore_ascii_case("seen")
        || !name[8..].eq_ignore_ascii_case(".txt")
        || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::test_util::{build_container, ScenarioBuilder};
    use pretty_assertions::assert_eq;

    #[test]
    fn corrupt_entry_is_isolated() {
        let valid = ScenarioBuilder::new(b"Hello").build();
        let mut truncated = ScenarioBuilder::new(b"World").build();
        truncated.truncate(0x40);
        let data = build_container(&[(1, truncated), (2, valid)]);
        let archive = Archive::from_bytes(Bytes::from(data), b"").unwrap();

        assert!(matches!(
            archive.scenario(1),
            Err(Error::CorruptScenario {
                scenario: Some(1),
                ..
            })
        ));
        let scenario = archive.scenario(2).unwrap().unwrap();
        assert_eq!(scenario.len(), 1);
        assert!(archive.scenario(3).unwrap().is_none());
    }

    #[test]
    fn scenarios_are_cached() {
        let data = build_container(&[(5, ScenarioBuilder::new(b",,").build())]);
        let archive = Archive::from_bytes(Bytes::from(data), b"").unwrap();
        let a = archive.scenario(5).unwrap().unwrap();
        let b = archive.scenario(5).unwrap().unwrap();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn probable_encoding_scans_in_order() {
        let data = build_container(&[
            (1, ScenarioBuilder::new(b",").build()),
            (2, vec![0; 4]),
            (3, ScenarioBuilder::new(b",").metadata(b"RLdev", 3).build()),
            (4, ScenarioBuilder::new(b",").metadata(b"RLdev", 1).build()),
        ]);
        let archive = Archive::from_bytes(Bytes::from(data), b"").unwrap();
        assert_eq!(archive.probable_encoding(), Encoding::Euckr);
        // nothing was decoded
        assert!(archive.cache.values().all(|c| c.get().is_none()));
    }

    #[test]
    fn short_toc() {
        assert!(matches!(
            Archive::from_bytes(Bytes::from_static(&[0; 16]), b""),
            Err(Error::CorruptScenario { .. })
        ));
    }

    #[test]
    fn override_names() {
        assert_eq!(override_number("SEEN0042.TXT"), Some(42));
        assert_eq!(override_number("seen9999.txt"), Some(9999));
        assert_eq!(override_number("SEEN42.TXT"), None);
        assert_eq!(override_number("SEENabcd.TXT"), None);
    }
}
