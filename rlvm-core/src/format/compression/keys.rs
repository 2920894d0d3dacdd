//! Per-game XOR key tables.

/// One second-layer XOR range: `key` repeats over `[offset, offset + length)`
/// of the compressed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XorSubkey {
    pub key: [u8; 16],
    pub offset: i32,
    pub length: i32,
}

impl XorSubkey {
    pub const SENTINEL: XorSubkey = XorSubkey {
        key: [0; 16],
        offset: -1,
        length: 0,
    };

    pub fn is_sentinel(&self) -> bool {
        self.offset == -1
    }
}

/// Ordered list of second-layer XOR ranges. Iteration stops at the first
/// sentinel entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorKeyTable {
    name: &'static [u8],
    entries: std::borrow::Cow<'static, [XorSubkey]>,
}

impl XorKeyTable {
    pub fn new(entries: Vec<XorSubkey>) -> Self {
        Self {
            name: b"",
            entries: entries.into(),
        }
    }

    /// Looks up the compiled-in table for a game by its `#REGNAME`.
    pub fn for_registry(regname: &[u8]) -> Option<&'static XorKeyTable> {
        KNOWN_GAMES.iter().find(|t| t.name == regname)
    }

    pub fn registry_name(&self) -> &[u8] {
        self.name
    }

    pub fn subkeys(&self) -> impl Iterator<Item = &XorSubkey> {
        self.entries.iter().take_while(|k| !k.is_sentinel())
    }

    /// XORs every range of the table into `buf`. Ranges are clipped to the
    /// buffer; bytes outside every range are left alone.
    pub fn apply(&self, buf: &mut [u8]) {
        for subkey in self.subkeys() {
            let start = subkey.offset.max(0) as usize;
            let end = start
                .saturating_add(subkey.length.max(0) as usize)
                .min(buf.len());
            if start >= end {
                continue;
            }
            for (j, b) in buf[start..end].iter_mut().enumerate() {
                *b ^= subkey.key[j % 16];
            }
        }
    }
}

/// XORs the always-present first layer over `buf`.
pub fn apply_base_mask(buf: &mut [u8]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b ^= XOR_MASK[i & 0xff];
    }
}

macro_rules! game_key {
    ($name:expr, [$($k:expr),* $(,)?]) => {
        XorKeyTable {
            name: $name,
            entries: std::borrow::Cow::Borrowed(&[
                XorSubkey {
                    key: [$($k),*],
                    offset: 256,
                    length: 257,
                },
                XorSubkey::SENTINEL,
            ]),
        }
    };
}

static KNOWN_GAMES: [XorKeyTable; 4] = [
    game_key!(
        b"KEY\\CLANNAD_FV",
        [0xaf, 0x2f, 0xfb, 0x6b, 0xaf, 0x30, 0x77, 0x17, 0x87, 0x48, 0xfe, 0x2c, 0x68, 0x1a, 0xb9, 0xf0]
    ),
    // KEY\リトルバスターズ！
    game_key!(
        b"\x4b\x45\x59\x5c\x83\x8a\x83\x67\x83\x8b\x83\x6f\x83\x58\x83\x5e\x81\x5b\x83\x59\x81\x49",
        [0xa8, 0x28, 0xfd, 0x66, 0xa0, 0x23, 0x77, 0x69, 0xf9, 0x45, 0xf8, 0x2c, 0x7c, 0x00, 0xad, 0xf4]
    ),
    // KEY\リトルバスターズ！ＥＸ
    game_key!(
        b"\x4b\x45\x59\x5c\x83\x8a\x83\x67\x83\x8b\x83\x6f\x83\x58\x83\x5e\x81\x5b\x83\x59\x81\x49\x82\x64\x82\x77",
        [0xa8, 0x28, 0xfd, 0x66, 0xa0, 0x23, 0x77, 0x69, 0xf9, 0x45, 0xf8, 0x2c, 0x7c, 0x00, 0xad, 0xf4]
    ),
    game_key!(
        b"StudioMebius\\SNOWSE",
        [0x7b, 0x41, 0x1f, 0x07, 0x14, 0x7f, 0x35, 0x8d, 0x79, 0x4a, 0x64, 0x24, 0x56, 0x3a, 0x1c, 0xd8]
    ),
];

#[rustfmt::skip]
static XOR_MASK: [u8; 256] = [
    0x8b, 0xe5, 0x5d, 0xc3, 0xa1, 0xe0, 0x30, 0x44, 0x00, 0x85, 0xc0, 0x74, 0x09, 0x5f, 0x5e, 0x33,
    0xc0, 0x5b, 0x8b, 0xe5, 0x5d, 0xc3, 0x8b, 0x45, 0x0c, 0x85, 0xc0, 0x75, 0x14, 0x8b, 0x55, 0xec,
    0x83, 0xc2, 0x20, 0x52, 0x6a, 0x00, 0xe8, 0xf5, 0x28, 0x01, 0x00, 0x83, 0xc4, 0x08, 0x89, 0x45,
    0x0c, 0x8b, 0x45, 0xe4, 0x6a, 0x00, 0x6a, 0x00, 0x50, 0x53, 0xff, 0x15, 0x34, 0xb1, 0x43, 0x00,
    0x8b, 0x45, 0x10, 0x85, 0xc0, 0x74, 0x05, 0x8b, 0x4d, 0xec, 0x89, 0x08, 0x8a, 0x45, 0xf0, 0x84,
    0xc0, 0x75, 0x78, 0xa1, 0xe0, 0x30, 0x44, 0x00, 0x8b, 0x7d, 0xe8, 0x8b, 0x75, 0x0c, 0x85, 0xc0,
    0x75, 0x44, 0x8b, 0x1d, 0xd0, 0xb0, 0x43, 0x00, 0x85, 0xff, 0x76, 0x37, 0x81, 0xff, 0x00, 0x00,
    0x04, 0x00, 0x6a, 0x00, 0x76, 0x43, 0x8b, 0x45, 0xf8, 0x8d, 0x55, 0xfc, 0x52, 0x68, 0x00, 0x00,
    0x04, 0x00, 0x56, 0x50, 0xff, 0x15, 0x2c, 0xb1, 0x43, 0x00, 0x6a, 0x05, 0xff, 0xd3, 0xa1, 0xe0,
    0x30, 0x44, 0x00, 0x81, 0xef, 0x00, 0x00, 0x04, 0x00, 0x81, 0xc6, 0x00, 0x00, 0x04, 0x00, 0x85,
    0xc0, 0x74, 0xc5, 0x8b, 0x5d, 0xf8, 0x53, 0xe8, 0xf4, 0xfb, 0xff, 0xff, 0x8b, 0x45, 0x0c, 0x83,
    0xc4, 0x04, 0x5f, 0x5e, 0x5b, 0x8b, 0xe5, 0x5d, 0xc3, 0x8b, 0x55, 0xf8, 0x8d, 0x4d, 0xfc, 0x51,
    0x57, 0x56, 0x52, 0xff, 0x15, 0x2c, 0xb1, 0x43, 0x00, 0xeb, 0xd8, 0x8b, 0x45, 0xe8, 0x83, 0xc0,
    0x20, 0x50, 0x6a, 0x00, 0xe8, 0x47, 0x28, 0x01, 0x00, 0x8b, 0x7d, 0xe8, 0x89, 0x45, 0xf4, 0x8b,
    0xf0, 0xa1, 0xe0, 0x30, 0x44, 0x00, 0x83, 0xc4, 0x08, 0x85, 0xc0, 0x75, 0x56, 0x8b, 0x1d, 0xd0,
    0xb0, 0x43, 0x00, 0x85, 0xff, 0x76, 0x49, 0x81, 0xff, 0x00, 0x00, 0x04, 0x00, 0x6a, 0x00, 0x76,
];
