//! Integer and string memory banks, and the addresses that name their cells.
//!
//! Bytecode refers to a bank with a single type byte (the "compact" form):
//! `bank = code % 26` and `width = code / 26`. Scripts and debug output use
//! the textual form instead, a bank letter followed by an optional width
//! suffix (`A`, `A4b`, `Z8b`, `S`).

mod store;

pub use store::Memory;

use std::fmt;
use std::str::FromStr;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use strum::{Display, EnumString};

use crate::error::{Error, Result};

/// Compact bank code of the Z bank.
const Z_CODE: u8 = 25;
/// Compact bank code of the L bank.
const L_CODE: u8 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Bank {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    Z,
    L,
    K,
    M,
    S,
}

impl Bank {
    pub const INT_BANKS: [Bank; 9] = [
        Bank::A,
        Bank::B,
        Bank::C,
        Bank::D,
        Bank::E,
        Bank::F,
        Bank::G,
        Bank::Z,
        Bank::L,
    ];

    pub const STR_BANKS: [Bank; 3] = [Bank::K, Bank::M, Bank::S];

    pub fn is_string(self) -> bool {
        matches!(self, Bank::K | Bank::M | Bank::S)
    }

    /// Bank part of the compact encoding.
    pub fn code(self) -> u8 {
        match self {
            Bank::A => 0,
            Bank::B => 1,
            Bank::C => 2,
            Bank::D => 3,
            Bank::E => 4,
            Bank::F => 5,
            Bank::G => 6,
            Bank::K => 0x0a,
            Bank::L => L_CODE,
            Bank::M => 0x0c,
            Bank::S => 0x12,
            Bank::Z => Z_CODE,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Bank::A,
            1 => Bank::B,
            2 => Bank::C,
            3 => Bank::D,
            4 => Bank::E,
            5 => Bank::F,
            6 => Bank::G,
            0x0a => Bank::K,
            L_CODE => Bank::L,
            0x0c => Bank::M,
            0x12 => Bank::S,
            Z_CODE => Bank::Z,
            _ => return None,
        })
    }
}

/// Access width of an integer cell.
///
/// `Full` addresses a whole `i32`; the others address 1, 2, 4 or 8-bit
/// slices packed into the same storage, least significant bits first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive)]
pub enum Width {
    #[default]
    Full = 0,
    Bit1 = 1,
    Bit2 = 2,
    Bit4 = 3,
    Bit8 = 4,
}

impl Width {
    pub const ALL: [Width; 5] = [
        Width::Full,
        Width::Bit1,
        Width::Bit2,
        Width::Bit4,
        Width::Bit8,
    ];

    pub fn bits(self) -> u32 {
        match self {
            Width::Full => 32,
            Width::Bit1 => 1,
            Width::Bit2 => 2,
            Width::Bit4 => 4,
            Width::Bit8 => 8,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Width::Full => "",
            Width::Bit1 => "b",
            Width::Bit2 => "2b",
            Width::Bit4 => "4b",
            Width::Bit8 => "8b",
        }
    }

    pub fn from_suffix(s: &str) -> Option<Self> {
        Width::ALL.into_iter().find(|w| w.suffix() == s)
    }
}

/// A bank together with its access width, without a cell index.
///
/// This is what a memory reference carries in the bytecode; the index is
/// an expression evaluated later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankRef {
    pub bank: Bank,
    pub width: Width,
}

impl BankRef {
    pub fn new(bank: Bank, width: Width) -> Result<Self> {
        if bank.is_string() && width != Width::Full {
            return Err(Error::InvalidAddress(format!(
                "string bank {} cannot be accessed as {}",
                bank,
                width.suffix()
            )));
        }
        Ok(Self { bank, width })
    }

    pub fn decode_compact(code: i32) -> Result<Self> {
        let invalid = || Error::InvalidAddress(format!("bad bank code 0x{:02x}", code));
        if code < 0 {
            return Err(invalid());
        }
        let bank = u8::try_from(code % 26)
            .ok()
            .and_then(Bank::from_code)
            .ok_or_else(invalid)?;
        let width = Width::from_i32(code / 26).ok_or_else(invalid)?;
        Self::new(bank, width)
    }

    pub fn encode_compact(self) -> i32 {
        self.width as i32 * 26 + self.bank.code() as i32
    }

    pub fn is_string(self) -> bool {
        self.bank.is_string()
    }

    pub fn at(self, index: u32) -> MemoryAddress {
        MemoryAddress {
            bank: self.bank,
            width: self.width,
            index,
        }
    }
}

impl fmt::Display for BankRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_string() { "str" } else { "int" };
        write!(f, "{}{}{}", kind, self.bank, self.width.suffix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAddress {
    pub bank: Bank,
    pub width: Width,
    pub index: u32,
}

impl MemoryAddress {
    pub fn decode_compact(code: i32, index: u32) -> Result<Self> {
        Ok(BankRef::decode_compact(code)?.at(index))
    }

    pub fn decode_textual(bank: char, width: &str, index: u32) -> Result<Self> {
        let bank = Bank::from_str(bank.encode_utf8(&mut [0; 4]))
            .map_err(|_| Error::InvalidAddress(format!("unknown bank letter {:?}", bank)))?;
        let width = Width::from_suffix(width)
            .ok_or_else(|| Error::InvalidAddress(format!("unknown width token {:?}", width)))?;
        Ok(BankRef::new(bank, width)?.at(index))
    }

    pub fn encode_compact(&self) -> i32 {
        self.bank_ref().encode_compact()
    }

    pub fn bank_ref(&self) -> BankRef {
        BankRef {
            bank: self.bank,
            width: self.width,
        }
    }

    pub fn is_string(&self) -> bool {
        self.bank.is_string()
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.bank_ref(), self.index)
    }
}

/// Parses `A[5]`, `Z8b[10]` and the `intA4b[3]` / `strS[0]` debug form.
impl FromStr for MemoryAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress(format!("cannot parse {:?}", s));
        let body = s
            .strip_prefix("int")
            .or_else(|| s.strip_prefix("str"))
            .unwrap_or(s);
        let (head, rest) = body.split_once('[').ok_or_else(invalid)?;
        let index = rest
            .strip_suffix(']')
            .and_then(|i| i.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let mut chars = head.chars();
        let bank = chars.next().ok_or_else(invalid)?;
        Self::decode_textual(bank, chars.as_str(), index)
    }
}

/// Read/write access to the machine's memory, as seen by expression
/// evaluation.
pub trait MemoryProvider {
    fn get_int(&self, addr: MemoryAddress) -> Result<i32>;
    fn set_int(&mut self, addr: MemoryAddress, value: i32) -> Result<()>;
    fn get_str(&self, addr: MemoryAddress) -> Result<&str>;
    fn set_str(&mut self, addr: MemoryAddress, value: &str) -> Result<()>;
    fn get_accumulator(&self) -> i32;
    fn set_accumulator(&mut self, value: i32);
}
