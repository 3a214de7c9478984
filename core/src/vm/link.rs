//! Two-phase linking: `FunctionSeed` graphs become sized, executable
//! `FunctionEntity` objects.
//!
//! All top-level entities live in an index-addressed arena of forward
//! handles. Empty slots are allocated first, bodies are filled in a second
//! pass, so static-value seeds referencing a function defined later resolve
//! by stable identity before its body exists.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail, ensure};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::util::fast_map::{FastHashMap, fast_hash_map_new, fast_hash_map_with_capacity};
use crate::val::{FunctionValue, Value};

use super::dispatch::DispatchTable;
use super::instruction::{Addr, Instr, OpCode, SourceLoc};
use super::seed::{BranchSeed, FunctionSeed, Program, StageSeed, StaticSeed};

/// Frame addresses are 16 bits wide; larger frames must be rejected before
/// execution.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize + 1;

/// Forward handle for a function entity, allocated before the body is built.
pub struct EntitySlot {
    cell: OnceCell<FunctionEntity>,
}

impl EntitySlot {
    fn empty() -> Arc<Self> {
        Arc::new(Self { cell: OnceCell::new() })
    }

    fn with(entity: FunctionEntity) -> Arc<Self> {
        Arc::new(Self {
            cell: OnceCell::with_value(entity),
        })
    }

    fn fill(&self, entity: FunctionEntity) -> Result<()> {
        self.cell
            .set(entity)
            .map_err(|e| anyhow!("function `{}` linked twice", e.name))
    }

    /// The linked entity. Linking fills every slot before any value escapes,
    /// so an empty slot here is an engine bug.
    #[inline]
    pub fn entity(&self) -> &FunctionEntity {
        self.cell.get().expect("function entity not linked")
    }

    pub(crate) fn try_entity(&self) -> Option<&FunctionEntity> {
        self.cell.get()
    }
}

/// The linked, sized, executable unit.
pub struct FunctionEntity {
    pub name: Arc<str>,
    pub code: Code,
    pub effect: bool,
    pub context_len: u16,
    /// Computed frame size: the maximum `offset + len(own instructions)`
    /// across the whole branch tree.
    pub frame_len: usize,
}

/// One executable body: a function trunk or a nested branch.
#[derive(Clone)]
pub struct Code {
    pub instrs: Arc<[Instr]>,
    /// Absolute frame address of this body's first instruction slot.
    pub offset: usize,
    pub statics: Arc<[Value]>,
    pub tables: Arc<[DispatchTable]>,
    pub branches: Arc<[Code]>,
    pub stages: Option<Arc<[Stage]>>,
    pub source_map: Arc<[SourceLoc]>,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub flows: Arc<[Flow]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    pub start: usize,
    pub end: usize,
}

/// The linked program: the entity arena plus execution metadata.
pub struct LinkedProgram {
    entities: Vec<Arc<EntitySlot>>,
    index: FastHashMap<Arc<str>, usize>,
    pub entry: Option<String>,
    pub assets: FastHashMap<String, Arc<[u8]>>,
}

impl LinkedProgram {
    pub fn entity(&self, index: usize) -> &FunctionEntity {
        self.entities[index].entity()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// A callable, context-free function value for the entity at `index`.
    pub fn function(&self, index: usize) -> Value {
        Value::Function(FunctionValue::plain(Arc::clone(&self.entities[index])))
    }

    pub fn by_name(&self, name: &str) -> Option<Value> {
        self.index.get(name).map(|&i| self.function(i))
    }

    /// The entity named by the front end's entry metadata, when present.
    pub fn entry_function(&self) -> Option<Value> {
        self.entry.as_deref().and_then(|name| self.by_name(name))
    }

    /// Effect-flagged entities in program order.
    pub fn effects(&self) -> impl Iterator<Item = (usize, &Arc<EntitySlot>)> {
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entity().effect)
    }
}

/// Convert a program into its executable form. Every structural defect,
/// from an unresolvable address to a malformed stage plan, is a
/// code-generator problem surfaced here, before execution.
pub fn link(program: &Program) -> Result<LinkedProgram> {
    let slots: Vec<Arc<EntitySlot>> = (0..program.functions.len()).map(|_| EntitySlot::empty()).collect();
    let mut index = fast_hash_map_with_capacity(program.functions.len());
    for (i, seed) in program.functions.iter().enumerate() {
        let entity = build_entity(seed, &slots).with_context(|| format!("linking function `{}`", seed.name))?;
        debug!(
            target: "rill::link",
            name = %entity.name,
            frame_len = entity.frame_len,
            effect = entity.effect,
            "linked"
        );
        ensure!(
            !index.contains_key(&entity.name),
            "duplicate function name `{}`",
            entity.name
        );
        index.insert(Arc::clone(&entity.name), i);
        slots[i].fill(entity)?;
    }
    let mut assets = fast_hash_map_new();
    for (name, bytes) in &program.assets {
        assets.insert(name.clone(), Arc::clone(bytes));
    }
    Ok(LinkedProgram {
        entities: slots,
        index,
        entry: program.entry.clone(),
        assets,
    })
}

fn build_entity(seed: &FunctionSeed, arena: &[Arc<EntitySlot>]) -> Result<FunctionEntity> {
    let mut statics = Vec::with_capacity(seed.statics.len());
    for (i, entry) in seed.statics.iter().enumerate() {
        let value = match entry {
            StaticSeed::Value(v) => v.clone(),
            StaticSeed::FunctionRef(target) => {
                let slot = arena
                    .get(*target)
                    .with_context(|| format!("static {} references function {} outside the program", i, target))?;
                Value::Function(FunctionValue::plain(Arc::clone(slot)))
            }
            StaticSeed::Closure(inner) => {
                let entity =
                    build_entity(inner, arena).with_context(|| format!("linking nested closure `{}`", inner.name))?;
                Value::Function(FunctionValue::plain(EntitySlot::with(entity)))
            }
        };
        statics.push(value);
    }
    let statics: Arc<[Value]> = statics.into();

    let mut frame_len = 0usize;
    let code = build_code(&seed.trunk, 0, &statics, seed.context_len, &mut frame_len)?;
    ensure!(
        frame_len <= MAX_FRAME_LEN,
        "frame length {} exceeds the addressable range of {}",
        frame_len,
        MAX_FRAME_LEN
    );
    Ok(FunctionEntity {
        name: Arc::clone(&seed.name),
        code,
        effect: seed.effect,
        context_len: seed.context_len,
        frame_len,
    })
}

fn build_code(
    branch: &BranchSeed,
    offset: usize,
    statics: &Arc<[Value]>,
    context_len: u16,
    frame_len: &mut usize,
) -> Result<Code> {
    // The addresses visible to this body: every slot written by itself or by
    // an ancestor up to the trunk.
    let required = offset + branch.instrs.len();
    *frame_len = (*frame_len).max(required);

    for (i, instr) in branch.instrs.iter().enumerate() {
        validate_instr(instr, required, statics.len(), context_len, branch.tables.len())
            .with_context(|| format!("instruction {} ({:?})", i, instr))?;
    }
    if !branch.source_map.is_empty() {
        ensure!(
            branch.source_map.len() == branch.instrs.len(),
            "source map has {} entries for {} instructions",
            branch.source_map.len(),
            branch.instrs.len()
        );
    }

    let stages = match &branch.stages {
        Some(seeds) => Some(build_stages(seeds, branch.instrs.len())?),
        None => None,
    };

    // Sibling branches each accumulate their own `required` independently,
    // all starting from the same shared prefix.
    let mut branches = Vec::with_capacity(branch.branches.len());
    for nested in &branch.branches {
        branches.push(build_code(nested, required, statics, context_len, frame_len)?);
    }

    Ok(Code {
        instrs: branch.instrs.clone().into(),
        offset,
        statics: Arc::clone(statics),
        tables: branch.tables.clone().into(),
        branches: branches.into(),
        stages,
        source_map: branch.source_map.clone().into(),
    })
}

fn validate_instr(instr: &Instr, required: usize, statics: usize, context_len: u16, tables: usize) -> Result<()> {
    validate_addr(instr.obj, required, statics, context_len)?;
    validate_addr(instr.src, required, statics, context_len)?;
    if matches!(instr.op, OpCode::Switch | OpCode::Select) {
        ensure!(
            (instr.table as usize) < tables,
            "dispatch table {} out of range ({} tables)",
            instr.table,
            tables
        );
    }
    Ok(())
}

fn validate_addr(addr: Addr, required: usize, statics: usize, context_len: u16) -> Result<()> {
    match addr {
        Addr::Static(i) => ensure!(
            (i as usize) < statics,
            "static address {} out of range ({} entries)",
            i,
            statics
        ),
        Addr::Frame(i) => ensure!(
            (i as usize) < required,
            "frame address {} outside the visible range of {}",
            i,
            required
        ),
        Addr::Ctx(i) => ensure!(
            i < context_len,
            "context address {} out of range (declared length {})",
            i,
            context_len
        ),
        Addr::Arg => {}
    }
    Ok(())
}

fn build_stages(seeds: &[StageSeed], len: usize) -> Result<Arc<[Stage]>> {
    let mut covered = vec![false; len];
    let mut stages = Vec::with_capacity(seeds.len());
    for (si, stage) in seeds.iter().enumerate() {
        ensure!(!stage.flows.is_empty(), "stage {} has no flows", si);
        let mut flows = Vec::with_capacity(stage.flows.len());
        for flow in &stage.flows {
            ensure!(
                flow.start < flow.end && flow.end <= len,
                "stage {} flow {}..{} outside instruction range 0..{}",
                si,
                flow.start,
                flow.end,
                len
            );
            for slot in covered.iter_mut().take(flow.end).skip(flow.start) {
                if *slot {
                    bail!("stage plan covers an instruction twice in stage {}", si);
                }
                *slot = true;
            }
            flows.push(Flow {
                start: flow.start,
                end: flow.end,
            });
        }
        stages.push(Stage { flows: flows.into() });
    }
    ensure!(
        covered.iter().all(|c| *c),
        "stage plan does not cover the whole instruction range"
    );
    Ok(stages.into())
}
