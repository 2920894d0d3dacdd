use std::collections::{BTreeMap, HashMap};

use tracing::{trace, warn};

use super::contract::{self, ParamShape};
use crate::error::{Error, Result};
use crate::expr::ExpressionNode;
use crate::format::scenario::instruction::{Instruction, OpcodeKey};
use crate::format::scenario::InstructionIndex;
use crate::memory::MemoryProvider;

pub type Handler<H> = Box<dyn Fn(&mut Context<'_, H>) -> Result<()> + Send + Sync>;

/// What a handler sees: the host, the instruction being run, its validated
/// parameters and the instruction pointer.
pub struct Context<'a, H> {
    pub host: &'a mut H,
    instruction: &'a Instruction,
    params: &'a [ExpressionNode],
    pointer: &'a mut InstructionIndex,
}

impl<'a, H: MemoryProvider> Context<'a, H> {
    pub fn instruction(&self) -> &Instruction {
        self.instruction
    }

    pub fn params(&self) -> &[ExpressionNode] {
        self.params
    }

    fn param(&self, i: usize) -> Result<&'a ExpressionNode> {
        self.params.get(i).ok_or_else(|| {
            Error::malformed(self.instruction.offset(), format!("no parameter {}", i))
        })
    }

    pub fn int(&mut self, i: usize) -> Result<i32> {
        self.param(i)?.eval_int(self.host)
    }

    pub fn string(&mut self, i: usize) -> Result<String> {
        self.param(i)?.eval_str(self.host)
    }

    /// Writes through the reference in parameter `i`.
    pub fn set_int(&mut self, i: usize, value: i32) -> Result<()> {
        self.param(i)?.assign_int(self.host, value)
    }

    pub fn set_string(&mut self, i: usize, value: &str) -> Result<()> {
        self.param(i)?.assign_str(self.host, value)
    }

    pub fn instruction_pointer(&self) -> InstructionIndex {
        *self.pointer
    }

    /// Jump target `i` of a goto-like command.
    pub fn target(&self, i: usize) -> Option<InstructionIndex> {
        self.instruction.command()?.targets.get(i).copied()
    }

    pub fn jump_to(&mut self, index: InstructionIndex) {
        *self.pointer = index;
    }

    pub fn advance(&mut self) {
        *self.pointer += 1;
    }
}

pub struct Registration<H> {
    pub name: String,
    pub key: OpcodeKey,
    /// `None` matches any argument count.
    pub argc: Option<u16>,
    pub shapes: Vec<ParamShape>,
    /// The handler moves the instruction pointer itself.
    pub special_case: bool,
    handler: Handler<H>,
}

impl<H> Registration<H> {
    pub fn new<F>(name: impl Into<String>, key: OpcodeKey, shapes: Vec<ParamShape>, handler: F) -> Self
    where
        F: Fn(&mut Context<'_, H>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            key,
            argc: None,
            shapes,
            special_case: false,
            handler: Box::new(handler),
        }
    }

    pub fn with_argc(mut self, argc: u16) -> Self {
        self.argc = Some(argc);
        self
    }

    pub fn special_case(mut self) -> Self {
        self.special_case = true;
        self
    }
}

impl<H> std::fmt::Debug for Registration<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("argc", &self.argc)
            .field("shapes", &self.shapes)
            .field("special_case", &self.special_case)
            .finish()
    }
}

/// Routes commands to registered handlers after checking their parameters.
pub struct Dispatcher<H> {
    registry: HashMap<(OpcodeKey, Option<u16>), Registration<H>>,
    unknown: BTreeMap<OpcodeKey, usize>,
}

impl<H> Default for Dispatcher<H> {
    fn default() -> Self {
        Self {
            registry: HashMap::new(),
            unknown: BTreeMap::new(),
        }
    }
}

impl<H: MemoryProvider> Dispatcher<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler, replacing any earlier one for the same key and argc.
    pub fn register(&mut self, registration: Registration<H>) -> &mut Self {
        let slot = (registration.key, registration.argc);
        if let Some(old) = self.registry.insert(slot, registration) {
            warn!("{} replaced handler {}", old.key, old.name);
        }
        self
    }

    /// Exact argc first, then an any-argc registration.
    pub fn lookup(&self, key: OpcodeKey, argc: u16) -> Option<&Registration<H>> {
        self.registry
            .get(&(key, Some(argc)))
            .or_else(|| self.registry.get(&(key, None)))
    }

    /// How many times each unregistered opcode was hit.
    pub fn unknown_opcodes(&self) -> &BTreeMap<OpcodeKey, usize> {
        &self.unknown
    }

    /// Runs one instruction.
    ///
    /// Unknown opcodes advance the pointer and are reported. A contract
    /// violation leaves the pointer where it is and runs nothing. A failing
    /// handler has its jumps undone, so the pointer stays on the faulting
    /// instruction.
    pub fn dispatch(
        &mut self,
        host: &mut H,
        instruction: &Instruction,
        pointer: &mut InstructionIndex,
    ) -> Result<()> {
        let Some(command) = instruction.command() else {
            *pointer += 1;
            return Ok(());
        };
        let key = command.key;

        let Some(registration) = self.lookup(key, command.argc) else {
            *self.unknown.entry(key).or_default() += 1;
            warn!(offset = instruction.offset(), "unknown opcode {}", key);
            *pointer += 1;
            return Err(Error::UnknownOpcode {
                opcode: key,
                offset: instruction.offset(),
            });
        };

        let params = instruction.parameters()?;
        contract::check(&registration.shapes, params).map_err(|slot| Error::TypeMismatch {
            slot,
            opcode: key,
            offset: instruction.offset(),
        })?;

        trace!(
            offset = instruction.offset(),
            name = %registration.name,
            "{}{}",
            key,
            instruction.render_parameters()
        );
        let before = *pointer;
        let mut ctx = Context {
            host,
            instruction,
            params,
            pointer,
        };
        if let Err(e) = (registration.handler)(&mut ctx) {
            *ctx.pointer = before;
            return Err(e);
        }
        if !registration.special_case {
            *ctx.pointer = before + 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::scenario::instruction::{Command, CommandForm, ElementKind, ParamSpan, ParamSyntax};
    use crate::memory::{Memory, MemoryAddress};
    use crate::vm::contract::ParamType;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use rlvm_nls::Encoding;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const STRCPY: OpcodeKey = OpcodeKey::new(1, 10, 0, 0);

    fn command(key: OpcodeKey, params: &[&[u8]]) -> Instruction {
        let mut raw = vec![
            b'#',
            key.modtype,
            key.module,
            key.opcode as u8,
            (key.opcode >> 8) as u8,
            params.len() as u8,
            0,
            key.overload,
            b'(',
        ];
        let mut spans = vec![];
        for p in params {
            let start = raw.len();
            raw.extend_from_slice(p);
            spans.push(ParamSpan::new(start..raw.len(), ParamSyntax::Data));
        }
        raw.push(b')');
        let kind = ElementKind::Command(Command {
            key,
            argc: params.len() as u16,
            form: CommandForm::Function,
            targets: vec![],
            cases: vec![],
            select: None,
        });
        Instruction::new(0x100, kind, Bytes::from(raw), spans, Encoding::Sjis)
    }

    fn counting_strcpy(calls: Arc<AtomicUsize>) -> Registration<Memory> {
        Registration::new(
            "strcpy",
            STRCPY,
            vec![
                ParamShape::Single(ParamType::IntConstant),
                ParamShape::Single(ParamType::StrReference),
            ],
            move |ctx| {
                calls.fetch_add(1, Ordering::SeqCst);
                let n = ctx.int(0)?;
                ctx.set_string(1, &n.to_string())
            },
        )
        .with_argc(2)
    }

    #[test]
    fn type_mismatch_runs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(counting_strcpy(calls.clone()));

        let inst = command(STRCPY, &[b"$\xff\x01\x00\x00\x00", b"\"bg\""]);
        let mut mem = Memory::new();
        let mut ip = 4;
        match dispatcher.dispatch(&mut mem, &inst, &mut ip) {
            Err(Error::TypeMismatch { slot, opcode, offset }) => {
                assert_eq!((slot, opcode, offset), (1, STRCPY, 0x100));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ip, 4);
    }

    #[test]
    fn valid_call_advances() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(counting_strcpy(calls.clone()));

        // strcpy(7, strS[2])
        let inst = command(STRCPY, &[b"$\xff\x07\x00\x00\x00", b"$\x12[$\xff\x02\x00\x00\x00]"]);
        let mut mem = Memory::new();
        let mut ip = 4;
        dispatcher.dispatch(&mut mem, &inst, &mut ip).unwrap();
        assert_eq!(ip, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let s2: MemoryAddress = "S[2]".parse().unwrap();
        assert_eq!(mem.get_str(s2).unwrap(), "7");
    }

    #[test]
    fn unknown_opcode_is_counted() {
        let mut dispatcher = Dispatcher::<Memory>::new();
        let key = OpcodeKey::new(1, 99, 3, 1);
        let inst = command(key, &[]);
        let mut mem = Memory::new();
        let mut ip = 0;
        for _ in 0..2 {
            assert!(matches!(
                dispatcher.dispatch(&mut mem, &inst, &mut ip),
                Err(Error::UnknownOpcode { .. })
            ));
        }
        assert_eq!(ip, 2);
        assert_eq!(dispatcher.unknown_opcodes().get(&key), Some(&2));
    }

    #[test]
    fn special_case_keeps_pointer() {
        let key = OpcodeKey::new(0, 1, 0, 0);
        let mut dispatcher = Dispatcher::<Memory>::new();
        dispatcher.register(
            Registration::new(
                "jump",
                key,
                vec![ParamShape::Single(ParamType::IntConstant)],
                |ctx| {
                    let to = ctx.int(0)?;
                    ctx.jump_to(to as usize);
                    Ok(())
                },
            )
            .special_case(),
        );
        dispatcher.register(Registration::new("stay", OpcodeKey::new(0, 1, 1, 0), vec![], |_| Ok(())));

        let mut mem = Memory::new();
        let mut ip = 3;
        dispatcher
            .dispatch(&mut mem, &command(key, &[b"$\xff\x09\x00\x00\x00"]), &mut ip)
            .unwrap();
        assert_eq!(ip, 9);

        // a normal handler that jumps still ends up one past itself
        dispatcher
            .dispatch(&mut mem, &command(OpcodeKey::new(0, 1, 1, 0), &[]), &mut ip)
            .unwrap();
        assert_eq!(ip, 10);
    }

    #[test]
    fn failed_handler_keeps_pointer() {
        let key = OpcodeKey::new(0, 1, 2, 0);
        let mut dispatcher = Dispatcher::<Memory>::new();
        dispatcher.register(
            Registration::new(
                "jump_then_fail",
                key,
                vec![],
                |ctx: &mut Context<'_, Memory>| {
                    ctx.jump_to(40);
                    Err(Error::MemoryFault("intA[9000]".into()))
                },
            )
            .special_case(),
        );
        dispatcher.register(Registration::new(
            "advance_then_fail",
            OpcodeKey::new(0, 1, 3, 0),
            vec![],
            |ctx: &mut Context<'_, Memory>| {
                ctx.advance();
                Err(Error::MemoryFault("intB[9000]".into()))
            },
        ));

        let mut mem = Memory::new();
        let mut ip = 6;
        assert!(matches!(
            dispatcher.dispatch(&mut mem, &command(key, &[]), &mut ip),
            Err(Error::MemoryFault(_))
        ));
        assert_eq!(ip, 6);
        assert!(dispatcher
            .dispatch(&mut mem, &command(OpcodeKey::new(0, 1, 3, 0), &[]), &mut ip)
            .is_err());
        assert_eq!(ip, 6);
    }

    #[test]
    fn exact_argc_wins() {
        let mut dispatcher = Dispatcher::<Memory>::new();
        let key = OpcodeKey::new(1, 4, 2, 0);
        dispatcher.register(Registration::new("any", key, vec![], |_| Ok(())));
        dispatcher.register(Registration::new("two", key, vec![], |_| Ok(())).with_argc(2));
        assert_eq!(dispatcher.lookup(key, 2).unwrap().name, "two");
        assert_eq!(dispatcher.lookup(key, 5).unwrap().name, "any");
        assert!(dispatcher.lookup(OpcodeKey::new(1, 4, 3, 0), 0).is_none());
    }
}
