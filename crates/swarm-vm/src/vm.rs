//! The virtual machine.
//!
//! Executes a loaded instruction stream linearly, skipping over function
//! regions via the load-time skip index. Calls bind parameters (curried
//! partials expanded), enter a call scope, and run the callee region in a
//! nested loop until its `Return`; the returned value binds to the caller's
//! enclosing assignment. `While`/`Enumerate`/`With` invoke their callback
//! regions the same way. Deferred calls clone the VM into queue jobs;
//! `Drain` blocks until the pinned context's jobs finish and hands back the
//! return map.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use dashmap::DashMap;
use indexmap::IndexMap;
use tracing::{debug, warn};
use uuid::Uuid;

use swarm_core::types::{Primitive, Type};
use swarm_isa::{
    FunctionReference, Instruction, Instructions, Location, MappingValue, Reference,
    StreamReference,
};

use crate::config::VmConfig;
use crate::error::{RuntimeError, RuntimeExCode, VmError};
use crate::prologue;
use crate::queue::{run_job, ContextId, JobId, QueueState, QueuedCall, WorkerPool};
use crate::scope::ScopeFrame;
use crate::state::State;
use crate::storage::{LocalStorage, SharedStorage};

/// Cooperative streams shared by a VM and its job clones.
#[derive(Debug, Clone, Default)]
pub struct Streams {
    queues: Arc<DashMap<String, Vec<Reference>>>,
    /// Every push, rendered, in arrival order. Never consumed; this is the
    /// observable output of a run.
    log: Arc<Mutex<Vec<String>>>,
}

impl Streams {
    fn push(&self, id: &str, value: Reference) {
        self.log
            .lock()
            .expect("stream log poisoned")
            .push(prologue::format_reference(&value));
        self.queues.entry(id.to_string()).or_default().push(value);
    }

    fn pop(&self, id: &str) -> Option<Reference> {
        let mut entry = self.queues.entry(id.to_string()).or_default();
        if entry.is_empty() {
            None
        } else {
            Some(entry.remove(0))
        }
    }

    fn snapshot(&self) -> Vec<String> {
        self.log.lock().expect("stream log poisoned").clone()
    }
}

enum Flow {
    End,
    Return(Option<Reference>),
}

pub struct VirtualMachine {
    config: VmConfig,
    state: State,
    scope: ScopeFrame,
    local: LocalStorage,
    shared: SharedStorage,
    queue: Arc<QueueState>,
    context_stack: Vec<ContextId>,
    held_locks: Vec<Location>,
    streams: Streams,
    /// Lock-owner identity of this VM (jobs get their own).
    owner_id: String,
    /// Only the root VM owns the worker pool.
    pool: Option<WorkerPool>,
}

impl VirtualMachine {
    pub fn new(instrs: Instructions, config: VmConfig) -> Result<VirtualMachine, VmError> {
        let state = State::load(instrs)?;
        let mut vm = VirtualMachine {
            config,
            state,
            scope: ScopeFrame::root(),
            local: LocalStorage::new(),
            shared: SharedStorage::new(),
            queue: QueueState::new(),
            context_stack: vec![Uuid::new_v4().to_string()],
            held_locks: Vec::new(),
            streams: Streams::default(),
            owner_id: Uuid::new_v4().to_string(),
            pool: None,
        };
        vm.seed_streams()?;
        Ok(vm)
    }

    fn seed_streams(&mut self) -> Result<(), VmError> {
        for id in ["STDOUT", "STDERR"] {
            let stream = Reference::Stream(StreamReference {
                id: id.into(),
                inner: Type::string(),
            });
            self.local.store(&Location::local(id), stream.clone())?;
            self.shared.store(&Location::shared(id), stream)?;
        }
        Ok(())
    }

    /// Everything the run pushed to its streams, rendered, in order.
    pub fn io_log(&self) -> Vec<String> {
        self.streams.snapshot()
    }

    /// Push a value onto the named stream (e.g. "STDOUT"/"STDERR").
    pub fn push_stream(&mut self, id: &str, value: Reference) {
        self.streams.push(id, value);
    }

    /// Inspect the first local cell whose name starts with `l:<prefix>`.
    pub fn peek_local(&self, prefix: &str) -> Option<Reference> {
        self.local.find_by_prefix(&format!("l:{prefix}"))
    }

    /// Inspect the first shared cell whose name starts with `s:<prefix>`.
    pub fn peek_shared(&self, prefix: &str) -> Option<Reference> {
        self.shared.find_by_prefix(&format!("s:{prefix}"))
    }

    /// Run the top-level stream to completion, then wait for every
    /// outstanding queued job.
    pub fn execute(&mut self) -> Result<(), VmError> {
        if self.pool.is_none() && self.config.max_threads > 0 {
            self.pool = Some(WorkerPool::spawn(Arc::clone(&self.queue), &self.config));
        }
        let flow = self.run_from(0)?;
        if matches!(flow, Flow::Return(_)) {
            return Err(VmError::EmptyCallStack);
        }
        self.wait_for_all_jobs()
    }

    /// Queued work is not abandoned when the top-level stream ends: wait
    /// for every context, including popped ones.
    fn wait_for_all_jobs(&mut self) -> Result<(), VmError> {
        loop {
            if self.queue.total_outstanding() == 0 {
                break;
            }
            if self.pool.is_none() {
                if let Some(job) = self.queue.pop() {
                    run_job(&self.queue, job);
                    continue;
                }
            }
            thread::sleep(Duration::from_micros(self.config.queue_sleep_us));
        }
        if let Some((job_id, cause)) = self.queue.take_any_error() {
            return Err(VmError::QueueExecution { job_id, cause });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Execution loop
    // -----------------------------------------------------------------------

    fn run_from(&mut self, start: usize) -> Result<Flow, VmError> {
        let mut pc = start;
        while pc < self.state.len() {
            let instr = self
                .state
                .instruction(pc)
                .cloned()
                .ok_or_else(|| VmError::Internal(format!("pc out of range: {pc}")))?;
            match &instr {
                Instruction::BeginFunction { func, .. } => {
                    // Unexecuted regions are jumped over.
                    pc = self.state.skip_pc(&func.name).ok_or_else(|| {
                        VmError::Internal(format!("unclosed function region {}", func.name))
                    })?;
                    continue;
                }
                Instruction::Return0 => return Ok(Flow::Return(None)),
                Instruction::Return1(r) => {
                    let value = self.resolve(r)?;
                    return Ok(Flow::Return(Some(value)));
                }
                _ => {
                    if let Err(e) = self.exec(&instr) {
                        if let Some(p) = self.state.position_of(pc) {
                            debug!("[{}: {},{}] {e}", p.file, p.line, p.col);
                        }
                        return Err(e);
                    }
                }
            }
            pc += 1;
        }
        Ok(Flow::End)
    }

    fn exec(&mut self, instr: &Instruction) -> Result<(), VmError> {
        match instr {
            Instruction::AssignValue { dest, value } => {
                let v = self.resolve(value)?;
                self.store(dest, v)
            }
            Instruction::AssignEval { dest, eval } => match self.eval(eval)? {
                Some(v) => self.store(dest, v),
                None => Err(RuntimeError::new(
                    RuntimeExCode::InvalidAssignEval,
                    format!("{:?} produced no value", eval.tag()),
                )
                .into()),
            },
            Instruction::ScopeOf(l) => {
                self.scope.shadow(l);
                Ok(())
            }
            Instruction::Typify { loc, ty } => {
                let t = ty.as_type().ok_or_else(|| {
                    VmError::Internal("typify operand is not a type".into())
                })?;
                self.typify(loc, t);
                Ok(())
            }
            Instruction::Lock(l) => self.lock(l),
            Instruction::Unlock(l) => self.unlock(l),
            // Parameters were bound at call entry.
            Instruction::FunctionParam { .. } => Ok(()),
            Instruction::PositionAnnotation { .. } => Ok(()),
            other => {
                self.eval(other)?;
                Ok(())
            }
        }
    }

    fn eval(&mut self, instr: &Instruction) -> Result<Option<Reference>, VmError> {
        use Instruction::*;
        match instr {
            Plus(a, b) => Ok(Some(Reference::Number(self.num(a)? + self.num(b)?))),
            Minus(a, b) => Ok(Some(Reference::Number(self.num(a)? - self.num(b)?))),
            Times(a, b) => Ok(Some(Reference::Number(self.num(a)? * self.num(b)?))),
            Divide(a, b) => {
                let (x, y) = (self.num(a)?, self.num(b)?);
                if y == 0.0 {
                    return Err(
                        RuntimeError::new(RuntimeExCode::DivisionByZero, format!("{x} / 0"))
                            .into(),
                    );
                }
                Ok(Some(Reference::Number(x / y)))
            }
            Mod(a, b) => {
                let (x, y) = (self.num(a)?, self.num(b)?);
                if y == 0.0 {
                    return Err(
                        RuntimeError::new(RuntimeExCode::DivisionByZero, format!("{x} % 0"))
                            .into(),
                    );
                }
                Ok(Some(Reference::Number(x % y)))
            }
            Power(a, b) => Ok(Some(Reference::Number(self.num(a)?.powf(self.num(b)?)))),
            Negative(a) => Ok(Some(Reference::Number(-self.num(a)?))),
            GreaterThan(a, b) => Ok(Some(Reference::Boolean(self.num(a)? > self.num(b)?))),
            GreaterThanOrEqual(a, b) => {
                Ok(Some(Reference::Boolean(self.num(a)? >= self.num(b)?)))
            }
            LessThan(a, b) => Ok(Some(Reference::Boolean(self.num(a)? < self.num(b)?))),
            LessThanOrEqual(a, b) => Ok(Some(Reference::Boolean(self.num(a)? <= self.num(b)?))),
            And(a, b) => Ok(Some(Reference::Boolean(
                self.boolean(a)? && self.boolean(b)?,
            ))),
            Or(a, b) => Ok(Some(Reference::Boolean(
                self.boolean(a)? || self.boolean(b)?,
            ))),
            Not(a) => Ok(Some(Reference::Boolean(!self.boolean(a)?))),
            IsEqual(a, b) => {
                let (x, y) = (self.resolve(a)?, self.resolve(b)?);
                Ok(Some(Reference::Boolean(x == y)))
            }
            StringConcat(a, b) => {
                let mut s = self.string(a)?;
                s.push_str(&self.string(b)?);
                Ok(Some(Reference::String(s)))
            }

            MapInit(t) => {
                let inner = self.operand_type(t)?;
                Ok(Some(Reference::Mapping(MappingValue {
                    inner,
                    entries: IndexMap::new(),
                })))
            }
            MapGet(key, map) => {
                let key = self.string(key)?;
                let map = self.mapping(map)?;
                map.entries.get(&key).cloned().map(Some).ok_or_else(|| {
                    RuntimeError::new(RuntimeExCode::InvalidMapKey, key).into()
                })
            }
            MapSet(key, value, map) => {
                let key = self.string(key)?;
                let value = self.resolve(value)?;
                let loc = operand_location(map)?;
                let mut m = self.mapping(map)?;
                m.entries.insert(key, value);
                self.store(&loc, Reference::Mapping(m))?;
                Ok(None)
            }

            EnumInit(t) => {
                let inner = self.operand_type(t)?;
                Ok(Some(Reference::Enumeration(
                    swarm_isa::EnumerationValue {
                        inner,
                        items: Vec::new(),
                    },
                )))
            }
            EnumAppend(value, enumeration) => {
                let value = self.resolve(value)?;
                let loc = operand_location(enumeration)?;
                let mut e = self.enumeration(enumeration)?;
                if !value.type_of().is_assignable_to(&e.inner) {
                    return Err(RuntimeError::new(
                        RuntimeExCode::InvalidValueTypeForEnum,
                        format!("{} into enumerable of {}", value.type_of(), e.inner),
                    )
                    .into());
                }
                e.items.push(value);
                self.store(&loc, Reference::Enumeration(e))?;
                Ok(None)
            }
            EnumGet(enumeration, index) => {
                let e = self.enumeration(enumeration)?;
                let i = self.index(index, e.items.len())?;
                Ok(Some(e.items[i].clone()))
            }
            EnumSet(enumeration, index, value) => {
                let loc = operand_location(enumeration)?;
                let mut e = self.enumeration(enumeration)?;
                let i = self.index(index, e.items.len())?;
                e.items[i] = self.resolve(value)?;
                self.store(&loc, Reference::Enumeration(e))?;
                Ok(None)
            }
            EnumConcat(a, b) => {
                let mut left = self.enumeration(a)?;
                let right = self.enumeration(b)?;
                left.items.extend(right.items);
                Ok(Some(Reference::Enumeration(left)))
            }

            Curry(f, arg) => {
                let mut func = self.function(f)?;
                let arg = self.resolve(arg)?;
                func.partial.push(arg);
                func.ty = match func.ty {
                    Type::Lambda1 { returns, .. } => *returns,
                    other => other,
                };
                Ok(Some(Reference::Function(func)))
            }
            Call0(f) => self.call_operand(f, Vec::new()),
            Call1(f, a) => {
                let arg = self.resolve(a)?;
                self.call_operand(f, vec![arg])
            }
            CallIf0(cond, f) => {
                if self.boolean(cond)? {
                    self.call_operand(f, Vec::new())?;
                }
                Ok(None)
            }
            CallIf1(cond, f, a) => {
                if self.boolean(cond)? {
                    let arg = self.resolve(a)?;
                    self.call_operand(f, vec![arg])?;
                }
                Ok(None)
            }
            CallElse0(cond, f) => {
                if !self.boolean(cond)? {
                    self.call_operand(f, Vec::new())?;
                }
                Ok(None)
            }
            CallElse1(cond, f, a) => {
                if !self.boolean(cond)? {
                    let arg = self.resolve(a)?;
                    self.call_operand(f, vec![arg])?;
                }
                Ok(None)
            }
            PushCall0(f) => {
                let id = self.push_call(f, None)?;
                Ok(Some(Reference::Number(id as f64)))
            }
            PushCall1(f, a) => {
                let arg = self.resolve(a)?;
                let id = self.push_call(f, Some(arg))?;
                Ok(Some(Reference::Number(id as f64)))
            }

            While(cond, body) => {
                loop {
                    match self.call_operand(cond, Vec::new())? {
                        Some(Reference::Boolean(b)) => {
                            if !b {
                                break;
                            }
                        }
                        other => {
                            return Err(RuntimeError::new(
                                RuntimeExCode::WhileCallbackTypeInvalid,
                                format!("while condition returned {other:?}"),
                            )
                            .into())
                        }
                    }
                    self.call_operand(body, Vec::new())?;
                }
                Ok(None)
            }
            Enumerate(_elem_ty, source, body) => {
                let e = self.enumeration(source)?;
                for (i, item) in e.items.into_iter().enumerate() {
                    self.call_operand(body, vec![item, Reference::Number(i as f64)])?;
                }
                Ok(None)
            }
            With(resource, body) => {
                let yielded = match self.resolve(resource)? {
                    Reference::Resource(r) => *r.yields,
                    Reference::Stream(s) => Reference::Stream(s),
                    other => {
                        return Err(RuntimeError::new(
                            RuntimeExCode::WithCallbackTypeInvalid,
                            format!("with over non-resource {other}"),
                        )
                        .into())
                    }
                };
                self.call_operand(body, vec![yielded])?;
                Ok(None)
            }

            EnterContext => {
                self.context_stack.push(Uuid::new_v4().to_string());
                Ok(None)
            }
            PopContext => {
                if self.context_stack.len() <= 1 {
                    return Err(VmError::Internal(
                        "attempted to exit from the last queue context".into(),
                    ));
                }
                let ctx = self.context_stack.pop().expect("length checked");
                Ok(Some(Reference::String(ctx)))
            }
            ResumeContext(r) => {
                let ctx = self.string(r)?;
                self.context_stack.push(ctx);
                Ok(None)
            }
            Drain => Ok(Some(self.drain_current()?)),
            RetMapGet(map, jobid) => {
                let m = self.mapping(map)?;
                let key = prologue::format_number(self.num(jobid)?);
                m.entries.get(&key).cloned().map(Some).ok_or_else(|| {
                    RuntimeError::new(
                        RuntimeExCode::InvalidMapKey,
                        format!("no result recorded for job {key}"),
                    )
                    .into()
                })
            }

            ObjInit(t) => match self.operand_type(t)? {
                Type::Object(otype) => Ok(Some(Reference::ObjectValue(swarm_isa::ObjectValue {
                    otype,
                    properties: IndexMap::new(),
                    finalized: false,
                }))),
                other => Err(RuntimeError::new(
                    RuntimeExCode::TypeError,
                    format!("cannot instantiate non-object type {other}"),
                )
                .into()),
            },
            ObjSet(obj, prop, value) => {
                let loc = operand_location(obj)?;
                let mut o = self.object(obj)?;
                if o.finalized {
                    return Err(RuntimeError::new(
                        RuntimeExCode::TypeError,
                        "cannot assign property of finalized object",
                    )
                    .into());
                }
                let name = property_name(prop)?;
                let v = self.resolve(value)?;
                o.properties.insert(name, v);
                self.store(&loc, Reference::ObjectValue(o))?;
                Ok(None)
            }
            ObjGet(obj, prop) => {
                let o = self.object(obj)?;
                let name = property_name(prop)?;
                o.properties.get(&name).cloned().map(Some).ok_or_else(|| {
                    RuntimeError::new(
                        RuntimeExCode::TypeError,
                        format!("object #{} has no property {name}", o.otype.id()),
                    )
                    .into()
                })
            }
            ObjInstance(obj) => {
                let mut o = self.object(obj)?;
                o.finalized = true;
                Ok(Some(Reference::ObjectValue(o)))
            }

            OTypeInit => Ok(Some(Reference::ObjectType(
                swarm_core::types::ObjectTypeBuilder::new().finalize(),
            ))),
            OTypeProp(proto, prop, ty) => {
                let base = match self.resolve(proto)? {
                    Reference::ObjectType(o) => o,
                    other => {
                        return Err(RuntimeError::new(
                            RuntimeExCode::TypeError,
                            format!("otypeprop on non-object-type {other}"),
                        )
                        .into())
                    }
                };
                let name = property_name(prop)?;
                let t = self.operand_type(ty)?;
                let mut props = base.properties().clone();
                props.insert(name, t);
                Ok(Some(Reference::ObjectType(
                    swarm_core::types::ObjectType::from_parts(
                        base.id(),
                        base.parent().cloned(),
                        props,
                    ),
                )))
            }
            OTypeFinalize(proto) => {
                let v = self.resolve(proto)?;
                match v {
                    Reference::ObjectType(_) => Ok(Some(v)),
                    other => Err(RuntimeError::new(
                        RuntimeExCode::TypeError,
                        format!("otypefinalize on non-object-type {other}"),
                    )
                    .into()),
                }
            }

            StreamPush(stream, value) => {
                let s = self.stream(stream)?;
                let v = self.resolve(value)?;
                self.streams.push(&s.id, v);
                Ok(None)
            }
            StreamPop(stream) => {
                let s = self.stream(stream)?;
                self.streams.pop(&s.id).map(Some).ok_or_else(|| {
                    RuntimeError::new(RuntimeExCode::StreamEmpty, s.id.clone()).into()
                })
            }

            other => Err(VmError::Internal(format!(
                "instruction {:?} is not evaluable",
                other.tag()
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    fn call_operand(
        &mut self,
        f: &Reference,
        extra: Vec<Reference>,
    ) -> Result<Option<Reference>, VmError> {
        let func = self.function(f)?;
        self.call_function(&func, extra)
    }

    /// Invoke a function value: expand its curried partials, bind
    /// parameters, run the region to its return.
    pub fn call_function(
        &mut self,
        func: &FunctionReference,
        extra: Vec<Reference>,
    ) -> Result<Option<Reference>, VmError> {
        let mut args: Vec<Reference> = func.partial.clone();
        args.extend(extra);

        if prologue::is_builtin(&func.name) {
            return prologue::call(self, &func.name, &args);
        }

        let begin = self.state.function_pc(&func.name).ok_or_else(|| {
            RuntimeError::new(
                RuntimeExCode::TypeError,
                format!("unknown function {}", func.name),
            )
        })?;
        let params = self.state.function_params(begin);
        if args.len() > params.len() {
            return Err(RuntimeError::new(
                RuntimeExCode::InvalidArgumentType,
                format!(
                    "{} expects {} arguments, received {}",
                    func.name,
                    params.len(),
                    args.len()
                ),
            )
            .into());
        }
        if args.len() < params.len() {
            // Partial application: hand back the function with the supplied
            // arguments bound.
            let remaining: Vec<Type> = params[args.len()..].iter().map(|(t, _)| t.clone()).collect();
            let ret = self.state.function_return_type(begin);
            let mut partial = FunctionReference::new(&func.name, Type::lambda(remaining, ret));
            partial.partial = args;
            return Ok(Some(Reference::Function(partial)));
        }
        for ((ty, _), arg) in params.iter().zip(&args) {
            if ty.is_primitive(Primitive::This) {
                continue;
            }
            let actual = arg.type_of();
            if !actual.is_assignable_to(ty) {
                return Err(RuntimeError::new(
                    RuntimeExCode::InvalidArgumentType,
                    format!("argument {actual} is not assignable to {ty}"),
                )
                .into());
            }
        }

        // Enter the callee scope and bind parameters into it.
        let outer = std::mem::replace(&mut self.scope, ScopeFrame::root());
        self.scope = outer.new_call(&func.name);
        for ((_, loc), arg) in params.iter().zip(args) {
            self.scope.shadow(loc);
            let mapped = self.scope.map(loc);
            self.store_raw(&mapped, arg)?;
        }

        let flow = self.run_from(begin + 1);

        let inner = std::mem::replace(&mut self.scope, ScopeFrame::root());
        self.scope = inner
            .exit()
            .ok_or_else(|| VmError::Internal("call scope had no parent".into()))?;

        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::End => Err(VmError::Internal(format!(
                "function {} ran past the end of the program",
                func.name
            ))),
        }
    }

    /// Entry point for queue workers: run a queued call in this (cloned) VM.
    pub fn execute_queued_call(
        &mut self,
        call: &QueuedCall,
    ) -> Result<Option<Reference>, VmError> {
        let extra: Vec<Reference> = call.arg.clone().into_iter().collect();
        self.call_function(&call.func, extra)
    }

    fn push_call(&mut self, f: &Reference, arg: Option<Reference>) -> Result<JobId, VmError> {
        let func = self.function(f)?;
        let context = self
            .context_stack
            .last()
            .cloned()
            .ok_or_else(|| VmError::Internal("no queue context".into()))?;
        let clone = self.clone_for_job();
        let id = self
            .queue
            .push(context.clone(), QueuedCall { func, arg }, clone);
        debug!("pushed job {id} onto context {context}");
        Ok(id)
    }

    fn clone_for_job(&self) -> VirtualMachine {
        VirtualMachine {
            config: self.config.clone(),
            state: self.state.clone(),
            scope: self.scope.clone(),
            local: self.local.clone(),
            shared: self.shared.clone(),
            queue: Arc::clone(&self.queue),
            context_stack: self.context_stack.clone(),
            held_locks: Vec::new(),
            streams: self.streams.clone(),
            owner_id: Uuid::new_v4().to_string(),
            pool: None,
        }
    }

    fn wait_for_context(&mut self, ctx: &str) {
        loop {
            if self.queue.outstanding(ctx) == 0 {
                break;
            }
            // Without workers (zero threads, or inside a job clone), run
            // pending jobs inline instead of spinning.
            if self.pool.is_none() {
                if let Some(job) = self.queue.pop() {
                    run_job(&self.queue, job);
                    continue;
                }
            }
            thread::sleep(Duration::from_micros(self.config.queue_sleep_us));
        }
    }

    /// Block until the pinned context is empty, surface its failures, and
    /// return its job-id → result map.
    fn drain_current(&mut self) -> Result<Reference, VmError> {
        let ctx = self
            .context_stack
            .last()
            .cloned()
            .ok_or_else(|| VmError::Internal("no queue context".into()))?;
        self.wait_for_context(&ctx);

        if let Some((job_id, cause)) = self.queue.take_error(&ctx) {
            return Err(VmError::QueueExecution { job_id, cause });
        }

        let results = self.queue.take_results(&ctx);
        let mut ordered: Vec<(JobId, Reference)> = results.into_iter().collect();
        ordered.sort_by_key(|(id, _)| *id);
        let entries: IndexMap<String, Reference> = ordered
            .into_iter()
            .map(|(id, v)| (id.to_string(), v))
            .collect();
        Ok(Reference::Mapping(MappingValue {
            inner: Type::opaque(),
            entries,
        }))
    }

    // -----------------------------------------------------------------------
    // Locations, storage, locks
    // -----------------------------------------------------------------------

    fn resolve(&mut self, r: &Reference) -> Result<Reference, VmError> {
        match r {
            Reference::Location(l) => self.load(l),
            other => Ok(other.clone()),
        }
    }

    fn load(&mut self, loc: &Location) -> Result<Reference, VmError> {
        if loc.affinity == swarm_isa::Affinity::Function {
            return Ok(Reference::Function(self.resolve_function_name(&loc.name)?));
        }
        let mapped = self.scope.map(loc);
        let stored = match mapped.affinity {
            swarm_isa::Affinity::Shared => self.shared.load(&mapped),
            _ => self.local.load(&mapped),
        };
        stored.ok_or_else(|| {
            VmError::Internal(format!("attempted to load undefined location {mapped}"))
        })
    }

    /// Build a function value for a `$f:` location: a builtin by prologue
    /// name, or an inline region with its type read off the header.
    fn resolve_function_name(&self, name: &str) -> Result<FunctionReference, VmError> {
        if let Some(ty) = prologue::signature(name) {
            return Ok(FunctionReference::new(name, ty));
        }
        let begin = self.state.function_pc(name).ok_or_else(|| {
            VmError::Internal(format!("unknown function location $f:{name}"))
        })?;
        let params: Vec<Type> = self
            .state
            .function_params(begin)
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        let ret = self.state.function_return_type(begin);
        Ok(FunctionReference::new(name, Type::lambda(params, ret)))
    }

    fn store(&mut self, loc: &Location, value: Reference) -> Result<(), VmError> {
        let mapped = self.scope.map(loc);
        self.store_raw(&mapped, value)
    }

    fn store_raw(&mut self, mapped: &Location, value: Reference) -> Result<(), VmError> {
        match mapped.affinity {
            swarm_isa::Affinity::Shared => self.shared.store(mapped, value),
            swarm_isa::Affinity::Function => {
                // Function cells are resolved from the region index; a store
                // (the recursion self-assign) is a no-op.
                debug!("ignoring store to function location {mapped}");
                Ok(())
            }
            _ => self.local.store(mapped, value),
        }
    }

    fn typify(&mut self, loc: &Location, ty: Type) {
        let mapped = self.scope.map(loc);
        match mapped.affinity {
            swarm_isa::Affinity::Shared => self.shared.typify(&mapped, ty),
            _ => self.local.typify(&mapped, ty),
        }
    }

    fn lock(&mut self, loc: &Location) -> Result<(), VmError> {
        if self.held_locks.contains(loc) {
            // Explicit contract: re-locking is a warned no-op.
            warn!("attempted to acquire lock that is already held: {loc}");
            return Ok(());
        }
        if loc.affinity != swarm_isa::Affinity::Shared {
            self.held_locks.push(loc.clone());
            return Ok(());
        }
        let mapped = self.scope.map(loc);
        for _ in 0..self.config.lock_max_retries {
            if self.shared.acquire(&mapped, &self.owner_id) {
                self.held_locks.push(loc.clone());
                return Ok(());
            }
            thread::sleep(Duration::from_micros(self.config.lock_sleep_us));
        }
        Err(RuntimeError::new(
            RuntimeExCode::AcquireLockMaxAttemptsExceeded,
            mapped.fq_name(),
        )
        .into())
    }

    fn unlock(&mut self, loc: &Location) -> Result<(), VmError> {
        let Some(at) = self.held_locks.iter().position(|l| l == loc) else {
            warn!("attempted to release lock that is not held: {loc}");
            return Ok(());
        };
        self.held_locks.remove(at);
        if loc.affinity == swarm_isa::Affinity::Shared {
            let mapped = self.scope.map(loc);
            self.shared.release(&mapped, &self.owner_id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Operand coercion helpers
    // -----------------------------------------------------------------------

    fn num(&mut self, r: &Reference) -> Result<f64, VmError> {
        match self.resolve(r)? {
            Reference::Number(n) => Ok(n),
            other => Err(type_error("number", &other)),
        }
    }

    fn boolean(&mut self, r: &Reference) -> Result<bool, VmError> {
        match self.resolve(r)? {
            Reference::Boolean(b) => Ok(b),
            other => Err(type_error("boolean", &other)),
        }
    }

    fn string(&mut self, r: &Reference) -> Result<String, VmError> {
        match self.resolve(r)? {
            Reference::String(s) => Ok(s),
            other => Err(type_error("string", &other)),
        }
    }

    fn function(&mut self, r: &Reference) -> Result<FunctionReference, VmError> {
        match self.resolve(r)? {
            Reference::Function(f) => Ok(f),
            other => Err(type_error("function", &other)),
        }
    }

    fn mapping(&mut self, r: &Reference) -> Result<MappingValue, VmError> {
        match self.resolve(r)? {
            Reference::Mapping(m) => Ok(m),
            other => Err(type_error("map", &other)),
        }
    }

    fn enumeration(&mut self, r: &Reference) -> Result<swarm_isa::EnumerationValue, VmError> {
        match self.resolve(r)? {
            Reference::Enumeration(e) => Ok(e),
            other => Err(type_error("enumerable", &other)),
        }
    }

    fn object(&mut self, r: &Reference) -> Result<swarm_isa::ObjectValue, VmError> {
        match self.resolve(r)? {
            Reference::ObjectValue(o) => Ok(o),
            other => Err(type_error("object", &other)),
        }
    }

    fn stream(&mut self, r: &Reference) -> Result<StreamReference, VmError> {
        match self.resolve(r)? {
            Reference::Stream(s) => Ok(s),
            other => Err(RuntimeError::new(
                RuntimeExCode::StreamNotOpen,
                format!("{other} is not a stream"),
            )
            .into()),
        }
    }

    fn operand_type(&mut self, r: &Reference) -> Result<Type, VmError> {
        self.resolve(r)?
            .as_type()
            .ok_or_else(|| type_error("type reference", r))
    }

    fn index(&mut self, r: &Reference, len: usize) -> Result<usize, VmError> {
        let n = self.num(r)?;
        let i = n as usize;
        if n < 0.0 || n.fract() != 0.0 || i >= len {
            return Err(RuntimeError::new(
                RuntimeExCode::EnumIndexOutOfBounds,
                format!("index {n} out of bounds for length {len}"),
            )
            .into());
        }
        Ok(i)
    }
}

fn type_error(expected: &str, found: &Reference) -> VmError {
    RuntimeError::new(
        RuntimeExCode::TypeError,
        format!("expected {expected}, found {found}"),
    )
    .into()
}

fn operand_location(r: &Reference) -> Result<Location, VmError> {
    r.as_location().cloned().ok_or_else(|| {
        VmError::Internal(format!("operand {r} must be a location"))
    })
}

fn property_name(r: &Reference) -> Result<String, VmError> {
    match r {
        Reference::Location(l) => Ok(l.name.clone()),
        Reference::String(s) => Ok(s.clone()),
        other => Err(VmError::Internal(format!(
            "property operand {other} is neither a location nor a string"
        ))),
    }
}
