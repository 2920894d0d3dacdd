use super::{Bank, MemoryAddress, MemoryProvider, Width};
use crate::error::{Error, Result};

const SIZE_OF_MEM_BANK: usize = 2000;
const SIZE_OF_INT_PASSING_MEM: usize = 40;
const SIZE_OF_STR_K_BANK: usize = 3;

/// Reference in-memory implementation of the machine's banks.
#[derive(Debug, Clone)]
pub struct Memory {
    /// A..G then Z
    ints: [Vec<i32>; 8],
    /// call-frame locals
    int_l: Vec<i32>,
    str_k: Vec<String>,
    str_m: Vec<String>,
    str_s: Vec<String>,
    store: i32,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            ints: std::array::from_fn(|_| vec![0; SIZE_OF_MEM_BANK]),
            int_l: vec![0; SIZE_OF_INT_PASSING_MEM],
            str_k: vec![String::new(); SIZE_OF_STR_K_BANK],
            str_m: vec![String::new(); SIZE_OF_MEM_BANK],
            str_s: vec![String::new(); SIZE_OF_MEM_BANK],
            store: 0,
        }
    }

    fn int_bank(&self, bank: Bank) -> Option<&[i32]> {
        match bank {
            Bank::L => Some(&self.int_l),
            Bank::Z => Some(&self.ints[7]),
            b if !b.is_string() => Some(&self.ints[b.code() as usize]),
            _ => None,
        }
    }

    fn int_bank_mut(&mut self, bank: Bank) -> Option<&mut [i32]> {
        match bank {
            Bank::L => Some(&mut self.int_l),
            Bank::Z => Some(&mut self.ints[7]),
            b if !b.is_string() => Some(&mut self.ints[b.code() as usize]),
            _ => None,
        }
    }

    fn str_bank(&self, bank: Bank) -> Option<&[String]> {
        match bank {
            Bank::K => Some(&self.str_k),
            Bank::M => Some(&self.str_m),
            Bank::S => Some(&self.str_s),
            _ => None,
        }
    }

    fn str_bank_mut(&mut self, bank: Bank) -> Option<&mut [String]> {
        match bank {
            Bank::K => Some(&mut self.str_k),
            Bank::M => Some(&mut self.str_m),
            Bank::S => Some(&mut self.str_s),
            _ => None,
        }
    }
}

fn fault(addr: MemoryAddress) -> Error {
    Error::MemoryFault(addr.to_string())
}

/// Where a cell lives inside its backing `i32` slice: word index, bit shift
/// and mask.
fn locate(addr: MemoryAddress, bank_len: usize) -> Result<(usize, u32, u32)> {
    let index = addr.index as usize;
    match addr.width {
        Width::Full => {
            if index >= bank_len {
                return Err(fault(addr));
            }
            Ok((index, 0, u32::MAX))
        }
        w => {
            let bits = w.bits() as usize;
            let per_word = 32 / bits;
            if index >= bank_len * per_word {
                return Err(fault(addr));
            }
            let shift = ((index % per_word) * bits) as u32;
            Ok((index / per_word, shift, (1u32 << bits) - 1))
        }
    }
}

impl MemoryProvider for Memory {
    fn get_int(&self, addr: MemoryAddress) -> Result<i32> {
        let bank = self.int_bank(addr.bank).ok_or_else(|| fault(addr))?;
        let (word, shift, mask) = locate(addr, bank.len())?;
        Ok(((bank[word] as u32 >> shift) & mask) as i32)
    }

    fn set_int(&mut self, addr: MemoryAddress, value: i32) -> Result<()> {
        let bank = self.int_bank_mut(addr.bank).ok_or_else(|| fault(addr))?;
        let (word, shift, mask) = locate(addr, bank.len())?;
        let cell = bank[word] as u32;
        bank[word] = ((cell & !(mask << shift)) | ((value as u32 & mask) << shift)) as i32;
        Ok(())
    }

    fn get_str(&self, addr: MemoryAddress) -> Result<&str> {
        self.str_bank(addr.bank)
            .and_then(|b| b.get(addr.index as usize))
            .map(String::as_str)
            .ok_or_else(|| fault(addr))
    }

    fn set_str(&mut self, addr: MemoryAddress, value: &str) -> Result<()> {
        let cell = self
            .str_bank_mut(addr.bank)
            .and_then(|b| b.get_mut(addr.index as usize))
            .ok_or_else(|| fault(addr))?;
        cell.clear();
        cell.push_str(value);
        Ok(())
    }

    fn get_accumulator(&self) -> i32 {
        self.store
    }

    fn set_accumulator(&mut self, value: i32) {
        self.store = value;
    }
}
