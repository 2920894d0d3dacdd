pub mod header;
pub mod instruction;
mod reader;

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use rlvm_nls::Encoding;
use tracing::debug;

use self::header::{SavepointPolicy, ScenarioHeader};
use self::instruction::{ElementKind, Instruction};
use self::reader::ElementReader;
use super::compression::{load_scenario_bytes, XorKeyTable};
use super::FileRegion;
use crate::error::{Error, Result};

pub use self::reader::COMMAND_SIZE;

/// Index of an instruction within its scenario.
pub type InstructionIndex = usize;

/// One compiled script unit: header, decoded instructions and the table of
/// entrypoints into them.
#[derive(Debug)]
pub struct Scenario {
    number: u16,
    header: ScenarioHeader,
    instructions: Vec<Instruction>,
    entrypoints: BTreeMap<i32, InstructionIndex>,
}

impl Scenario {
    /// Decodes a scenario from its stored bytes (header included).
    ///
    /// Fails with `CorruptScenario` if the header asks for the second XOR
    /// layer and no key table is available.
    pub fn from_bytes(number: u16, data: &[u8], xor_key: Option<&XorKeyTable>) -> Result<Self> {
        Self::decode(number, data, xor_key).map_err(|e| e.in_scenario(number))
    }

    fn decode(number: u16, data: &[u8], xor_key: Option<&XorKeyTable>) -> Result<Self> {
        let header = ScenarioHeader::parse(data)?;
        if header.use_second_layer() && xor_key.is_none() {
            return Err(Error::corrupt(format!(
                "compiler version {} needs a per-game key and none is known",
                header.compiler_version()
            )));
        }

        let stream = load_scenario_bytes(
            data,
            FileRegion::new(0, data.len()),
            xor_key,
            header.use_second_layer(),
        )?;
        let stream = Bytes::from(stream);

        let pending =
            ElementReader::new(&stream, header.kidoku_table(), header.encoding()).read_all()?;

        let by_offset: HashMap<usize, InstructionIndex> = pending
            .iter()
            .enumerate()
            .map(|(i, e)| (e.instruction.offset(), i))
            .collect();

        let mut instructions = Vec::with_capacity(pending.len());
        let mut entrypoints = BTreeMap::new();
        for (index, element) in pending.into_iter().enumerate() {
            let mut instruction = element.instruction;
            if let ElementKind::Command(command) = instruction.kind_mut() {
                command.targets = element
                    .target_offsets
                    .iter()
                    .map(|&t| {
                        usize::try_from(t)
                            .ok()
                            .and_then(|t| by_offset.get(&t).copied())
                            .ok_or_else(|| {
                                Error::corrupt(format!(
                                    "jump target 0x{:x} of {} is not an element",
                                    t, command.key
                                ))
                            })
                    })
                    .collect::<Result<_>>()?;
            }
            if let ElementKind::Entrypoint(n) = instruction.kind() {
                entrypoints.insert(*n, index);
            }
            instructions.push(instruction);
        }

        debug!(
            number,
            instructions = instructions.len(),
            entrypoints = entrypoints.len(),
            encoding = %header.encoding(),
            "decoded scenario"
        );

        Ok(Self {
            number,
            header,
            instructions,
            entrypoints,
        })
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn header(&self) -> &ScenarioHeader {
        &self.header
    }

    pub fn encoding(&self) -> Encoding {
        self.header.encoding()
    }

    pub fn savepoint_policy(&self) -> SavepointPolicy {
        self.header.savepoint_policy()
    }

    pub fn find_entrypoint(&self, entrypoint: i32) -> Option<InstructionIndex> {
        self.entrypoints.get(&entrypoint).copied()
    }

    pub fn entrypoints(&self) -> &BTreeMap<i32, InstructionIndex> {
        &self.entrypoints
    }

    pub fn get(&self, index: InstructionIndex) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl<'a> IntoIterator for &'a Scenario {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}
