pub mod contract;
pub mod dispatch;

use tracing::{instrument, trace};

pub use self::contract::{ParamShape, ParamType};
pub use self::dispatch::{Context, Dispatcher, Handler, Registration};
use crate::error::{Error, Result};
use crate::format::scenario::instruction::{ElementKind, Instruction};
use crate::format::scenario::{InstructionIndex, Scenario};
use crate::memory::{Memory, MemoryProvider};

/// The machine a scenario runs against.
///
/// Only memory access is required. The callbacks see the elements the
/// interpreter handles without a registered opcode.
pub trait Host: MemoryProvider {
    fn on_line(&mut self, _line: i16) {}

    fn on_kidoku(&mut self, _kidoku: i16) {}

    fn on_textout(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }
}

impl Host for Memory {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// the pointer is past the last instruction
    Halted,
}

/// Walks one scenario's instruction list.
pub struct Interpreter<'s, H> {
    scenario: &'s Scenario,
    pointer: InstructionIndex,
    dispatcher: Dispatcher<H>,
}

impl<'s, H: Host> Interpreter<'s, H> {
    pub fn new(scenario: &'s Scenario, dispatcher: Dispatcher<H>) -> Self {
        Self {
            scenario,
            pointer: 0,
            dispatcher,
        }
    }

    /// Starts at `entrypoint`, or `None` if the scenario does not have it.
    pub fn at_entrypoint(
        scenario: &'s Scenario,
        entrypoint: i32,
        dispatcher: Dispatcher<H>,
    ) -> Option<Self> {
        let pointer = scenario.find_entrypoint(entrypoint)?;
        Some(Self {
            scenario,
            pointer,
            dispatcher,
        })
    }

    pub fn scenario(&self) -> &'s Scenario {
        self.scenario
    }

    pub fn dispatcher(&self) -> &Dispatcher<H> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<H> {
        &mut self.dispatcher
    }

    pub fn current_instruction(&self) -> Option<&'s Instruction> {
        self.scenario.get(self.pointer)
    }

    pub fn instruction_pointer(&self) -> InstructionIndex {
        self.pointer
    }

    pub fn jump_to(&mut self, index: InstructionIndex) {
        self.pointer = index;
    }

    /// Runs the instruction under the pointer.
    ///
    /// On error the pointer stays on the failing instruction, except for
    /// unknown opcodes which are stepped over. The host decides whether to
    /// skip or stop.
    pub fn dispatch_current(&mut self, host: &mut H) -> Result<Step> {
        let Some(instruction) = self.current_instruction() else {
            return Ok(Step::Halted);
        };

        match instruction.kind() {
            ElementKind::Command(_) => {
                self.dispatcher
                    .dispatch(host, instruction, &mut self.pointer)?;
                return Ok(Step::Continue);
            }
            ElementKind::Line(line) => host.on_line(*line),
            ElementKind::Kidoku(kidoku) => host.on_kidoku(*kidoku),
            ElementKind::Textout => {
                host.on_textout(&instruction.text().unwrap_or_default())?;
            }
            ElementKind::Expression => {
                for statement in instruction.parameters()? {
                    trace!(offset = instruction.offset(), "{}", statement);
                    statement.eval(host)?;
                }
            }
            ElementKind::Comma | ElementKind::Entrypoint(_) => {}
        }
        self.pointer += 1;
        Ok(Step::Continue)
    }

    /// Runs until the end of the scenario. Unknown opcodes are skipped;
    /// any other fault stops the run.
    #[instrument(skip_all, fields(scenario = self.scenario.number()))]
    pub fn run(&mut self, host: &mut H) -> Result<()> {
        loop {
            match self.dispatch_current(host) {
                Ok(Step::Continue) | Err(Error::UnknownOpcode { .. }) => {}
                Ok(Step::Halted) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}
