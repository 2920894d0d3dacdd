use std::io::Cursor;

use binrw::BinRead;
use rlvm_nls::Encoding;
use tracing::debug;

use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 0x1d0;

/// Kidoku values at or above this mark an entrypoint.
pub const ENTRYPOINT_BASE: i32 = 1_000_000;

/// The fixed-size part of a scenario, as stored.
#[derive(BinRead, Debug, Clone)]
#[br(little)]
pub struct RawHeader {
    pub header_size: u32,
    pub compiler_version: i32,
    pub kidoku_offset: u32,
    pub kidoku_count: u32,
    pub unknown: i32,
    pub dramatis_offset: u32,
    pub dramatis_count: u32,
    pub dramatis_size: u32,
    pub data_offset: u32,
    pub uncompressed_length: u32,
    pub compressed_length: u32,
    pub z_minus_one: i32,
    pub z_minus_two: i32,
    pub entrypoints: [i32; 100],
    pub savepoint_message: i32,
    pub savepoint_selcom: i32,
    pub savepoint_seentop: i32,
}

impl RawHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corrupt(format!(
                "0x{:x} bytes is too short for a scenario header",
                data.len()
            )));
        }
        RawHeader::read(&mut Cursor::new(data)).map_err(|e| Error::corrupt(e.to_string()))
    }
}

/// Per-scenario override of a game-wide save-point setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Savepoint {
    #[default]
    GameDefault,
    Enabled,
    Disabled,
}

impl Savepoint {
    fn from_raw(v: i32) -> Self {
        match v {
            1 => Savepoint::Enabled,
            2 => Savepoint::Disabled,
            0 => Savepoint::GameDefault,
            other => {
                debug!("unexpected savepoint flag {}", other);
                Savepoint::GameDefault
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SavepointPolicy {
    /// save before each message
    pub message: Savepoint,
    /// save before each selection
    pub selcom: Savepoint,
    /// save at the top of the scenario
    pub seentop: Savepoint,
}

/// Metadata block the RLdev compiler appends after the character names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerMetadata {
    pub compiler_id: String,
    pub encoding: Encoding,
}

impl CompilerMetadata {
    fn parse(input: &[u8]) -> Option<Self> {
        let meta_len = read_i32(input, 0).ok()?;
        let id_len = read_i32(input, 4).ok()?.checked_add(1)?;
        if id_len <= 0 || (meta_len as i64) < id_len as i64 + 17 {
            debug!(meta_len, id_len, "ignoring malformed compiler metadata");
            return None;
        }
        let id_len = id_len as usize;
        let encoding = *input.get(id_len + 16)?;
        let id = input.get(8..8 + id_len - 1)?;
        Some(Self {
            compiler_id: String::from_utf8_lossy(id).into_owned(),
            encoding: Encoding::from_header_id(encoding),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioHeader {
    pub(crate) raw: RawHeader,
    use_second_layer: bool,
    kidoku_table: Vec<i32>,
    dramatis_personae: Vec<Vec<u8>>,
    metadata: Option<CompilerMetadata>,
}

impl ScenarioHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let raw = RawHeader::parse(data)?;

        let use_second_layer = match raw.compiler_version {
            10002 => false,
            110002 | 1110002 => true,
            other => {
                return Err(Error::corrupt(format!(
                    "unsupported compiler version {}",
                    other
                )))
            }
        };
        if raw.header_size as usize != HEADER_SIZE {
            return Err(Error::corrupt(format!(
                "unsupported header size 0x{:x}",
                raw.header_size
            )));
        }

        let kidoku_table = (0..raw.kidoku_count as usize)
            .map(|i| read_i32(data, raw.kidoku_offset as usize + i * 4))
            .collect::<Result<Vec<_>>>()?;

        // each name takes at least its 4-byte length prefix
        let names_room = data.len().saturating_sub(raw.dramatis_offset as usize) / 4;
        if raw.dramatis_count as usize > names_room {
            return Err(Error::corrupt(format!(
                "{} character names do not fit in the scenario",
                raw.dramatis_count
            )));
        }
        let mut dramatis_personae = Vec::with_capacity(raw.dramatis_count as usize);
        let mut offs = raw.dramatis_offset as usize;
        for _ in 0..raw.dramatis_count {
            let len = read_i32(data, offs)?;
            let name = len
                .checked_sub(1)
                .and_then(|n| usize::try_from(n).ok())
                .and_then(|n| data.get(offs + 4..offs + 4 + n))
                .ok_or_else(|| Error::corrupt("character name runs past the scenario"))?;
            dramatis_personae.push(name.to_vec());
            offs += len as usize + 4;
        }

        let meta_offs = raw.dramatis_offset as usize + raw.dramatis_size as usize;
        let metadata = if meta_offs != raw.data_offset as usize {
            data.get(meta_offs..).and_then(CompilerMetadata::parse)
        } else {
            None
        };

        Ok(Self {
            raw,
            use_second_layer,
            kidoku_table,
            dramatis_personae,
            metadata,
        })
    }

    pub fn compiler_version(&self) -> i32 {
        self.raw.compiler_version
    }

    pub fn use_second_layer(&self) -> bool {
        self.use_second_layer
    }

    pub fn kidoku_table(&self) -> &[i32] {
        &self.kidoku_table
    }

    /// Character names, still in the scenario's encoding.
    pub fn dramatis_personae(&self) -> &[Vec<u8>] {
        &self.dramatis_personae
    }

    pub fn metadata(&self) -> Option<&CompilerMetadata> {
        self.metadata.as_ref()
    }

    /// Text encoding; scenarios without compiler metadata are Shift-JIS.
    pub fn encoding(&self) -> Encoding {
        self.metadata
            .as_ref()
            .map(|m| m.encoding)
            .unwrap_or_default()
    }

    pub fn savepoint_policy(&self) -> SavepointPolicy {
        SavepointPolicy {
            message: Savepoint::from_raw(self.raw.savepoint_message),
            selcom: Savepoint::from_raw(self.raw.savepoint_selcom),
            seentop: Savepoint::from_raw(self.raw.savepoint_seentop),
        }
    }

    /// Debug entrypoints used by the "Z-1" and "Z-2" jumps.
    pub fn z_minus(&self) -> (i32, i32) {
        (self.raw.z_minus_one, self.raw.z_minus_two)
    }
}

pub(crate) fn read_i32(data: &[u8], offset: usize) -> Result<i32> {
    data.get(offset..offset + 4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::corrupt(format!("read past the end at 0x{:x}", offset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::test_util::ScenarioBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_header() {
        let data = ScenarioBuilder::new(b",")
            .kidoku(vec![0, 1_000_003])
            .dramatis(&[b"Nagisa", b"Tomoya"])
            .savepoints([1, 2, 0])
            .build();
        let header = ScenarioHeader::parse(&data).unwrap();

        assert!(!header.use_second_layer());
        assert_eq!(header.kidoku_table(), &[0, 1_000_003]);
        assert_eq!(
            header.dramatis_personae(),
            &[b"Nagisa".to_vec(), b"Tomoya".to_vec()]
        );
        assert_eq!(header.metadata(), None);
        assert_eq!(header.encoding(), Encoding::Sjis);
        assert_eq!(
            header.savepoint_policy(),
            SavepointPolicy {
                message: Savepoint::Enabled,
                selcom: Savepoint::Disabled,
                seentop: Savepoint::GameDefault,
            }
        );
    }

    #[test]
    fn compiler_metadata() {
        let data = ScenarioBuilder::new(b",")
            .dramatis(&[b"A"])
            .metadata(b"RLdev", 2)
            .build();
        let header = ScenarioHeader::parse(&data).unwrap();
        let meta = header.metadata().unwrap();
        assert_eq!(meta.compiler_id, "RLdev");
        assert_eq!(header.encoding(), Encoding::Cp1252);
    }

    #[test]
    fn rejects_unknown_compiler() {
        let data = ScenarioBuilder::new(b",").version(12345).build();
        assert!(matches!(
            ScenarioHeader::parse(&data),
            Err(Error::CorruptScenario { .. })
        ));
    }

    #[test]
    fn rejects_oversized_dramatis_count() {
        let mut data = ScenarioBuilder::new(b",").dramatis(&[b"A"]).build();
        data[0x18..0x1c].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            ScenarioHeader::parse(&data),
            Err(Error::CorruptScenario { .. })
        ));
    }

    #[test]
    fn rejects_short_input() {
        assert!(ScenarioHeader::parse(&[0u8; 0x100]).is_err());
    }

    #[test]
    fn second_layer_versions() {
        for v in [110002, 1110002] {
            let data = ScenarioBuilder::new(b",").version(v).build();
            assert!(ScenarioHeader::parse(&data).unwrap().use_second_layer());
        }
    }
}
