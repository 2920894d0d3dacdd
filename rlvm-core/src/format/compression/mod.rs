//! Turns a stored scenario into its raw instruction stream.

mod keys;
mod lzss;

pub use keys::{apply_base_mask, XorKeyTable, XorSubkey};
pub use lzss::decompress;

use tracing::trace;

use super::scenario::header::RawHeader;
use super::FileRegion;
use crate::error::{Error, Result};

/// Size of the header in front of the compressed stream.
const PAYLOAD_HEADER_SIZE: usize = 8;

/// Extracts `region` from `container`, removes both XOR layers from its
/// payload and expands it to the length its header declares.
pub fn load_scenario_bytes(
    container: &[u8],
    region: FileRegion,
    xor_key: Option<&XorKeyTable>,
    use_second_layer: bool,
) -> Result<Vec<u8>> {
    let data = region.slice(container)?;
    let header = RawHeader::parse(data)?;

    let start = header.data_offset as usize;
    let payload = start
        .checked_add(header.compressed_length as usize)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            Error::corrupt(format!(
                "payload 0x{:x}+0x{:x} outside of 0x{:x}-byte scenario",
                header.data_offset,
                header.compressed_length,
                data.len()
            ))
        })?;

    let mut payload = payload.to_vec();
    apply_base_mask(&mut payload);
    if use_second_layer {
        if let Some(key) = xor_key {
            key.apply(&mut payload);
        }
    }

    let stream = payload
        .get(PAYLOAD_HEADER_SIZE..)
        .ok_or_else(|| Error::corrupt("compressed payload shorter than its header"))?;
    trace!(
        compressed = stream.len(),
        declared = header.uncompressed_length,
        "expanding scenario payload"
    );
    decompress(stream, header.uncompressed_length as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::test_util::ScenarioBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn deterministic() {
        let key = XorKeyTable::for_registry(b"KEY\\CLANNAD_FV").unwrap();
        let built = ScenarioBuilder::new(b"\n\x01\x00,,abc")
            .second_layer(key)
            .build();
        let region = FileRegion::new(0, built.len());

        let a = load_scenario_bytes(&built, region, Some(key), true).unwrap();
        let b = load_scenario_bytes(&built, region, Some(key), true).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, b"\n\x01\x00,,abc");
    }

    #[test]
    fn missing_second_layer_garbles_long_payloads() {
        let key = XorKeyTable::for_registry(b"KEY\\CLANNAD_FV").unwrap();
        let body = vec![b','; 0x300];
        let built = ScenarioBuilder::new(&body).second_layer(key).build();
        let region = FileRegion::new(0, built.len());

        let result = load_scenario_bytes(&built, region, None, true);
        assert!(result.map(|out| out != body).unwrap_or(true));
    }

    #[test]
    fn truncated_region() {
        let built = ScenarioBuilder::new(b"abc").build();
        let region = FileRegion::new(0, built.len() - 4);
        assert!(matches!(
            load_scenario_bytes(&built, region, None, false),
            Err(Error::CorruptScenario { .. })
        ));
    }
}
