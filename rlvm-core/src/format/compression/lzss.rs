//! Back-reference expansion of the scenario payload.
//!
//! The stream is a sequence of groups. Each group is one flag byte followed by
//! up to eight items, read least significant flag bit first. A set bit is one
//! literal byte. A clear bit is a little-endian `u16`: the top twelve bits are
//! the distance back into the output, the low four bits the run length minus
//! two.

use crate::error::{Error, Result};

pub fn decompress(src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    let mut pos = 0;

    'outer: while out.len() < expected_len {
        let Some(&flags) = src.get(pos) else {
            break;
        };
        pos += 1;

        for bit in 0..8 {
            if out.len() >= expected_len {
                break 'outer;
            }
            if flags & (1 << bit) != 0 {
                let Some(&b) = src.get(pos) else {
                    break 'outer;
                };
                out.push(b);
                pos += 1;
            } else {
                let Some(pair) = src.get(pos..pos + 2) else {
                    break 'outer;
                };
                pos += 2;
                let v = u16::from_le_bytes([pair[0], pair[1]]) as usize;
                let distance = v >> 4;
                let count = (v & 0xf) + 2;

                if distance == 0 || distance > out.len() {
                    return Err(Error::corrupt(format!(
                        "back-reference distance {} at output 0x{:x}",
                        distance,
                        out.len()
                    )));
                }
                if out.len() + count > expected_len {
                    return Err(Error::corrupt(format!(
                        "back-reference overruns declared length 0x{:x}",
                        expected_len
                    )));
                }
                let start = out.len() - distance;
                // runs may overlap their own output
                for i in 0..count {
                    out.push(out[start + i]);
                }
            }
        }
    }

    if out.len() != expected_len {
        return Err(Error::corrupt(format!(
            "decompressed 0x{:x} bytes, header declares 0x{:x}",
            out.len(),
            expected_len
        )));
    }
    Ok(out)
}
