pub mod archive;
pub mod compression;
pub mod gameexe;
pub mod scenario;

#[doc(hidden)]
pub mod test_util;

use crate::error::{Error, Result};

/// A byte range of the container holding one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRegion {
    pub offset: usize,
    pub length: usize,
}

impl FileRegion {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    pub fn slice(self, container: &[u8]) -> Result<&[u8]> {
        self.offset
            .checked_add(self.length)
            .and_then(|end| container.get(self.offset..end))
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "region 0x{:x}+0x{:x} outside of 0x{:x}-byte container",
                    self.offset,
                    self.length,
                    container.len()
                ))
            })
    }
}
