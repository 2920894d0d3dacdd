use encoding_rs::{Encoding as RsEncoding, EUC_KR, GBK, SHIFT_JIS, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use strum::{Display, EnumString};

pub trait TextDecoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str>;
}

/// Text encodings a scenario header can declare.
///
/// The discriminant is the id stored in the compiler metadata block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// cp932
    #[default]
    #[strum(to_string = "sjis", serialize = "cp932")]
    #[serde(alias = "cp932")]
    Sjis = 0,
    /// cp936
    #[strum(to_string = "gbk", serialize = "cp936")]
    #[serde(alias = "cp936")]
    Gbk = 1,
    /// cp1252, used by western fan translations.
    #[strum(to_string = "cp1252", serialize = "western")]
    Cp1252 = 2,
    /// cp949
    #[strum(to_string = "euckr", serialize = "cp949")]
    #[serde(alias = "cp949")]
    Euckr = 3,
}

impl Encoding {
    /// Maps a header encoding id. Unknown ids fall back to Shift-JIS.
    pub fn from_header_id(id: u8) -> Self {
        match id {
            0 => Encoding::Sjis,
            1 => Encoding::Gbk,
            2 => Encoding::Cp1252,
            3 => Encoding::Euckr,
            other => {
                tracing::warn!("unknown encoding id {}, assuming Shift-JIS", other);
                Encoding::Sjis
            }
        }
    }

    #[inline]
    pub fn header_id(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn as_encoding_rs(self) -> &'static RsEncoding {
        match self {
            Encoding::Sjis => SHIFT_JIS,
            Encoding::Gbk => GBK,
            Encoding::Cp1252 => WINDOWS_1252,
            Encoding::Euckr => EUC_KR,
        }
    }

    /// Whether `byte` starts a two-byte character in the bytecode.
    ///
    /// The bytecode tokenizer always uses the cp932 lead-byte ranges, whatever
    /// the declared encoding is.
    #[inline]
    pub fn is_lead_byte(byte: u8) -> bool {
        (0x81..=0x9f).contains(&byte) || (0xe0..=0xef).contains(&byte)
    }
}

/// A simple decoder bound to one encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    enc: Encoding,
}

impl Decoder {
    #[inline]
    pub fn new(enc: Encoding) -> Self {
        Self { enc }
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.enc
    }
}

impl TextDecoder for Decoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        let (cow, _had_errors, _) = self.enc.as_encoding_rs().decode(bytes);
        cow
    }
}
