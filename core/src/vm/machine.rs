//! The execution engine: frames in, values out.
//!
//! A `Machine` is a cheap-to-clone handle (every field is shared) so stage
//! workers and native functions re-enter the same engine configuration.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam::channel;
use tracing::{debug, trace};

use crate::interop::Interop;
use crate::rt::{CancelSignal, WorkerPool};
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{Accessor, FunctionValue, ReferenceValue, Value};

use super::dispatch::pack_tags;
use super::fault::Fault;
use super::frame::Frame;
use super::instruction::{Addr, Instr, OpCode};
use super::link::{Code, Flow, LinkedProgram, Stage};

/// Output channels for native functions. Swappable so embedders and tests
/// capture program output.
pub struct MachineIo {
    out: Mutex<Box<dyn Write + Send>>,
    err: Mutex<Box<dyn Write + Send>>,
}

impl MachineIo {
    pub fn stdio() -> Arc<Self> {
        Self::from_writers(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    pub fn from_writers(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Arc<Self> {
        Arc::new(Self {
            out: Mutex::new(out),
            err: Mutex::new(err),
        })
    }

    pub fn out(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.out.lock().unwrap()
    }

    pub fn err(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.err.lock().unwrap()
    }
}

/// The value produced by one effect-flagged entity.
#[derive(Debug)]
pub struct EffectResult {
    pub name: Arc<str>,
    pub value: Value,
}

/// A self-recursive call about to reuse the current frame.
struct TailSig {
    function: FunctionValue,
    argument: Value,
}

enum Outcome {
    Done(Value),
    Tail(TailSig),
}

#[derive(Clone)]
pub struct Machine {
    pool: Arc<WorkerPool>,
    cancel: CancelSignal,
    io: Arc<MachineIo>,
    env: Option<Arc<FastHashMap<String, String>>>,
    assets: Arc<FastHashMap<String, Arc<[u8]>>>,
    parallel: bool,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(WorkerPool::with_default_size()),
            cancel: CancelSignal::default(),
            io: MachineIo::stdio(),
            env: None,
            assets: Arc::new(fast_hash_map_new()),
            parallel: true,
        }
    }

    /// Run every stage plan inline on the calling thread. Results must be
    /// identical to parallel execution.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_io(mut self, io: Arc<MachineIo>) -> Self {
        self.io = io;
        self
    }

    /// Override environment lookups. Unset keys fall back to the process
    /// environment.
    pub fn with_env(mut self, env: FastHashMap<String, String>) -> Self {
        self.env = Some(Arc::new(env));
        self
    }

    pub fn with_assets(mut self, assets: FastHashMap<String, Arc<[u8]>>) -> Self {
        self.assets = Arc::new(assets);
        self
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub(crate) fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub(crate) fn io(&self) -> &MachineIo {
        &self.io
    }

    pub(crate) fn env_var(&self, key: &str) -> Option<String> {
        if let Some(env) = &self.env {
            if let Some(value) = env.get(key) {
                return Some(value.clone());
            }
        }
        std::env::var(key).ok()
    }

    pub(crate) fn asset(&self, name: &str) -> Option<Arc<[u8]>> {
        self.assets.get(name).cloned()
    }

    /// Run every effect-flagged entity of a linked program, in program
    /// order, each applied to the unit value.
    pub fn execute(&self, program: &LinkedProgram) -> Result<Vec<EffectResult>, Fault> {
        let mut machine = self.clone();
        if !program.assets.is_empty() {
            machine.assets = Arc::new(program.assets.clone());
        }
        let mut results = Vec::new();
        for (i, slot) in program.effects() {
            let name = Arc::clone(&slot.entity().name);
            debug!(target: "rill::machine", name = %name, index = i, "running effect");
            let value = machine.call(&program.function(i), Value::unit())?;
            results.push(EffectResult { name, value });
        }
        Ok(results)
    }

    /// Apply a callable value to an argument. This is the single entry point
    /// for program-level calls, native re-entry, and reference application.
    pub fn call(&self, callee: &Value, argument: Value) -> Result<Value, Fault> {
        if self.cancel.is_cancelled() {
            return Err(Fault::cancelled());
        }
        match callee {
            Value::Function(f) => {
                let mut frame = Frame::new(f.clone(), argument);
                self.run_frame(&mut frame)
            }
            Value::Native(native) => {
                trace!(target: "rill::machine", name = native.name, "native call");
                let interop = Interop::new(self.clone());
                (native.f)(argument, &interop).map_err(|err| match err.downcast::<Fault>() {
                    Ok(fault) => fault,
                    Err(other) => Fault::native(other),
                })
            }
            Value::Reference(reference) => self.apply_reference(reference, argument),
            other => Err(Fault::panic(format!("cannot call a {}", other.type_name()))),
        }
    }

    /// References are called with a tuple: empty reads, one element writes.
    /// Both directions answer `(parent, value)`.
    fn apply_reference(&self, reference: &ReferenceValue, argument: Value) -> Result<Value, Fault> {
        let Value::Tuple(items) = argument else {
            return Err(Fault::panic(format!(
                "a reference takes a tuple argument, found a {}",
                argument.type_name()
            )));
        };
        let (parent, value) = match items.as_ref() {
            [] => reference.read()?,
            [replacement] => reference.write(replacement.clone())?,
            more => {
                return Err(Fault::panic(format!(
                    "a reference takes zero or one element, found {}",
                    more.len()
                )));
            }
        };
        Ok(Value::tuple(vec![parent, value]))
    }

    /// Tail-call trampoline: the frame is reused in place while the trunk
    /// keeps resolving to the same entity.
    fn run_frame(&self, frame: &mut Frame) -> Result<Value, Fault> {
        loop {
            let code = frame.function.entity().code.clone();
            match self.run_code(frame, &code, true)? {
                Outcome::Done(value) => return Ok(value),
                Outcome::Tail(sig) => {
                    frame.function = sig.function;
                    frame.argument = sig.argument;
                }
            }
        }
    }

    fn run_code(&self, frame: &mut Frame, code: &Code, may_tail: bool) -> Result<Outcome, Fault> {
        if let Some(stages) = &code.stages {
            for stage in stages.iter() {
                if self.cancel.is_cancelled() {
                    return Err(Fault::cancelled());
                }
                if stage.flows.len() == 1 || !self.parallel {
                    for flow in stage.flows.iter() {
                        let flow_may_tail = may_tail && flow.start == 0 && flow.end == code.instrs.len();
                        if let Some(sig) = self.run_flow(frame, code, *flow, flow_may_tail)? {
                            return Ok(Outcome::Tail(sig));
                        }
                    }
                } else {
                    self.run_stage_parallel(frame, code, stage)?;
                }
            }
        } else {
            let flow = Flow {
                start: 0,
                end: code.instrs.len(),
            };
            if let Some(sig) = self.run_flow(frame, code, flow, may_tail)? {
                return Ok(Outcome::Tail(sig));
            }
        }
        let value = match code.instrs.len() {
            0 => Value::unit(),
            len => frame.data[code.offset + len - 1].clone(),
        };
        Ok(Outcome::Done(value))
    }

    /// Fan one stage's flows out to the pool, wait for all of them (or the
    /// first failure), then merge each flow's slot range back into the
    /// parent frame. The stage contract guarantees the ranges are disjoint.
    fn run_stage_parallel(&self, frame: &mut Frame, code: &Code, stage: &Stage) -> Result<(), Fault> {
        let flows = &stage.flows;
        let (tx, rx) = channel::bounded(flows.len());
        for (index, flow) in flows.iter().enumerate() {
            let machine = self.clone();
            let code = code.clone();
            let flow = *flow;
            let tx = tx.clone();
            let mut scratch = Frame {
                function: frame.function.clone(),
                argument: frame.argument.clone(),
                data: frame.data.clone(),
            };
            self.pool.submit(move || {
                let result = machine.run_flow(&mut scratch, &code, flow, false).map(|_| {
                    let base = code.offset + flow.start;
                    scratch.data[base..code.offset + flow.end].to_vec()
                });
                let _ = tx.send((index, result));
            });
        }
        drop(tx);

        // Waiting must not block outright: every worker may itself be parked
        // here for a nested stage, leaving queued flows with no thread to run
        // them. Steal pool work between polls so the queue keeps draining.
        let mut results: Vec<Option<Vec<Value>>> = vec![None; flows.len()];
        let mut remaining = flows.len();
        while remaining > 0 {
            let report = match rx.try_recv() {
                Ok(report) => Some(report),
                Err(channel::TryRecvError::Empty) => {
                    if self.pool.run_pending() {
                        None
                    } else {
                        match rx.recv_timeout(Duration::from_millis(1)) {
                            Ok(report) => Some(report),
                            Err(channel::RecvTimeoutError::Timeout) => None,
                            Err(channel::RecvTimeoutError::Disconnected) => {
                                return Err(Fault::panic("a stage worker vanished without reporting"));
                            }
                        }
                    }
                }
                Err(channel::TryRecvError::Disconnected) => {
                    return Err(Fault::panic("a stage worker vanished without reporting"));
                }
            };
            if let Some((index, result)) = report {
                results[index] = Some(result?);
                remaining -= 1;
            }
        }
        for (flow, values) in flows.iter().zip(results) {
            let values = values.expect("every flow reported");
            let base = code.offset + flow.start;
            for (i, value) in values.into_iter().enumerate() {
                frame.data[base + i] = value;
            }
        }
        Ok(())
    }

    /// Execute one contiguous instruction range. Faults are annotated here,
    /// once per frame level, with the entity and the failing slot.
    fn run_flow(&self, frame: &mut Frame, code: &Code, flow: Flow, may_tail: bool) -> Result<Option<TailSig>, Fault> {
        let name = Arc::clone(&frame.function.entity().name);
        for i in flow.start..flow.end {
            let instr = code.instrs[i];
            let slot = code.offset + i;
            match self.exec_instr(frame, code, instr, may_tail && i + 1 == flow.end) {
                Ok(Step::Write(value)) => frame.data[slot] = value,
                Ok(Step::Tail(sig)) => return Ok(Some(sig)),
                Err(fault) => return Err(fault.at(&name, slot, code.source_map.get(i).copied())),
            }
        }
        Ok(None)
    }

    fn exec_instr(&self, frame: &mut Frame, code: &Code, instr: Instr, may_tail: bool) -> Result<Step, Fault> {
        let value = match instr.op {
            OpCode::Size => Value::Size(instr.small as usize),
            OpCode::Mov => self.read(frame, code, instr.src)?,
            OpCode::Union => Value::union(instr.small, self.read(frame, code, instr.src)?),
            OpCode::Tuple => Value::Tuple(self.read_vector(frame, instr.src)?.into()),
            OpCode::List => Value::List(self.read_vector(frame, instr.src)?.into()),
            OpCode::MapNew => {
                let items = self.read_vector(frame, instr.src)?;
                if items.len() % 2 != 0 {
                    return Err(Fault::panic(format!(
                        "map construction needs key/value pairs, found {} operands",
                        items.len()
                    )));
                }
                let mut pairs = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(key), Some(val)) = (iter.next(), iter.next()) {
                    pairs.push((key, val));
                }
                Value::Pairs(pairs.into())
            }
            OpCode::Field => {
                let parent = self.read(frame, code, instr.obj)?;
                let Value::Tuple(items) = &parent else {
                    return Err(Fault::panic(format!(
                        "field access on a {}, expected a tuple",
                        parent.type_name()
                    )));
                };
                items.get(instr.small as usize).cloned().ok_or_else(|| {
                    Fault::panic(format!("field {} out of range ({} fields)", instr.small, items.len()))
                })?
            }
            OpCode::Unwrap => {
                let parent = self.read(frame, code, instr.obj)?;
                let Some(u) = parent.as_union() else {
                    return Err(Fault::panic(format!(
                        "unwrap of a {}, expected a union",
                        parent.type_name()
                    )));
                };
                if u.tag != instr.small {
                    return Err(Fault::panic(format!(
                        "unwrap expects variant {}, found {}",
                        instr.small, u.tag
                    )));
                }
                u.payload.clone()
            }
            OpCode::Switch => {
                let scrutinee = self.read(frame, code, instr.obj)?;
                let Some(u) = scrutinee.as_union() else {
                    return Err(Fault::panic(format!(
                        "dispatch on a {}, expected a union",
                        scrutinee.type_name()
                    )));
                };
                let branch = code.tables[instr.table as usize]
                    .lookup(u.tag as u64)
                    .ok_or_else(|| Fault::panic(format!("no branch mapped for variant {}", u.tag)))?;
                self.run_branch(frame, code, branch)?
            }
            OpCode::Select => {
                let scrutinees = self.read_vector(frame, instr.src)?;
                let mut tags = Vec::with_capacity(scrutinees.len());
                for scrutinee in &scrutinees {
                    let Some(u) = scrutinee.as_union() else {
                        return Err(Fault::panic(format!(
                            "dispatch on a {}, expected a union",
                            scrutinee.type_name()
                        )));
                    };
                    tags.push(u.tag);
                }
                let key = pack_tags(&tags)
                    .ok_or_else(|| Fault::panic(format!("{} simultaneous scrutinees exceed the key width", tags.len())))?;
                let branch = code.tables[instr.table as usize]
                    .lookup(key)
                    .ok_or_else(|| Fault::panic(format!("no branch mapped for variants {:?}", tags)))?;
                self.run_branch(frame, code, branch)?
            }
            OpCode::Call => {
                let callee = self.read(frame, code, instr.obj)?;
                let argument = self.read(frame, code, instr.src)?;
                if may_tail {
                    if let Value::Function(f) = &callee {
                        if frame.function.same_entity(f) {
                            return Ok(Step::Tail(TailSig {
                                function: f.clone(),
                                argument,
                            }));
                        }
                    }
                }
                self.call(&callee, argument)?
            }
            OpCode::Cl => self.make_closure(frame, code, instr, false)?,
            OpCode::Clr => self.make_closure(frame, code, instr, true)?,
            OpCode::Br => {
                let parent = self.read(frame, code, instr.obj)?;
                Value::Reference(Arc::new(ReferenceValue::over_value(
                    parent,
                    Accessor::Branch(instr.small),
                )))
            }
            OpCode::Fr => {
                let parent = self.read(frame, code, instr.obj)?;
                Value::Reference(Arc::new(ReferenceValue::over_value(
                    parent,
                    Accessor::Field(instr.small),
                )))
            }
            OpCode::Brb => {
                let base = self.read_reference(frame, code, instr.obj)?;
                if !matches!(base.accessor(), Accessor::Branch(_)) {
                    return Err(Fault::panic("expected a branch reference as the base"));
                }
                Value::Reference(Arc::new(ReferenceValue::over_ref(base, Accessor::Branch(instr.small))))
            }
            OpCode::Brf => {
                let base = self.read_reference(frame, code, instr.obj)?;
                if !matches!(base.accessor(), Accessor::Field(_)) {
                    return Err(Fault::panic("expected a field reference as the base"));
                }
                Value::Reference(Arc::new(ReferenceValue::over_ref(base, Accessor::Branch(instr.small))))
            }
            OpCode::Frf => {
                let base = self.read_reference(frame, code, instr.obj)?;
                Value::Reference(Arc::new(ReferenceValue::over_ref(base, Accessor::Field(instr.small))))
            }
        };
        Ok(Step::Write(value))
    }

    fn run_branch(&self, frame: &mut Frame, code: &Code, branch: u16) -> Result<Value, Fault> {
        let branch = code
            .branches
            .get(branch as usize)
            .ok_or_else(|| Fault::panic(format!("dispatch table names missing branch {}", branch)))?;
        match self.run_code(frame, branch, false)? {
            Outcome::Done(value) => Ok(value),
            Outcome::Tail(_) => unreachable!("tail outside a trunk flow"),
        }
    }

    /// Snapshot-capture a context and wrap it with the target entity. The
    /// recursive variant reserves its own last context slot.
    fn make_closure(&self, frame: &mut Frame, code: &Code, instr: Instr, recursive: bool) -> Result<Value, Fault> {
        let target = self.read(frame, code, instr.obj)?;
        let Value::Function(f) = &target else {
            return Err(Fault::panic(format!(
                "closure over a {}, expected a function",
                target.type_name()
            )));
        };
        let mut context = self.read_vector(frame, instr.src)?;
        if recursive {
            context.push(Value::SelfRef);
        }
        let declared = f.entity().context_len as usize;
        if context.len() != declared {
            return Err(Fault::panic(format!(
                "captured {} context values, entity `{}` declares {}",
                context.len(),
                f.entity().name,
                declared
            )));
        }
        Ok(Value::Function(FunctionValue::with_context(
            Arc::clone(&f.slot),
            context.into(),
        )))
    }

    fn read(&self, frame: &Frame, code: &Code, addr: Addr) -> Result<Value, Fault> {
        match addr {
            Addr::Arg => Ok(frame.argument.clone()),
            Addr::Static(i) => Ok(code.statics[i as usize].clone()),
            Addr::Frame(i) => Ok(frame.data[i as usize].clone()),
            Addr::Ctx(i) => {
                let Some(context) = frame.context() else {
                    return Err(Fault::panic("function called without its captured context"));
                };
                match &context[i as usize] {
                    // The knot tied by the recursive closure form: the
                    // marker reads back as the executing closure itself.
                    Value::SelfRef => Ok(Value::Function(frame.function.clone())),
                    value => Ok(value.clone()),
                }
            }
        }
    }

    fn read_reference(&self, frame: &Frame, code: &Code, addr: Addr) -> Result<Arc<ReferenceValue>, Fault> {
        match self.read(frame, code, addr)? {
            Value::Reference(reference) => Ok(reference),
            other => Err(Fault::panic(format!(
                "expected a reference base, found a {}",
                other.type_name()
            ))),
        }
    }

    /// A vector operand: `src` names the frame slot holding the size marker,
    /// the operands sit in the slots directly after it.
    fn read_vector(&self, frame: &Frame, addr: Addr) -> Result<Vec<Value>, Fault> {
        let Addr::Frame(base) = addr else {
            return Err(Fault::panic("a vector operand must name a frame slot"));
        };
        let base = base as usize;
        let count = match frame.data[base] {
            Value::Size(count) => count,
            ref other => {
                return Err(Fault::panic(format!(
                    "expected a size marker at slot {}, found a {}",
                    base,
                    other.type_name()
                )));
            }
        };
        let end = base + count;
        if end >= frame.data.len() {
            return Err(Fault::panic(format!(
                "vector operand of {} values overruns the frame at slot {}",
                count, base
            )));
        }
        Ok(frame.data[base + 1..=end].to_vec())
    }
}

enum Step {
    Write(Value),
    Tail(TailSig),
}
