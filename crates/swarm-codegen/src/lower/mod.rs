//! AST → ISA lowering.
//!
//! A walker that flattens the analyzed AST into a linear instruction stream.
//! Every expression walker leaves its result bound by the **last**
//! `AssignValue`/`AssignEval` it emits; callers pick it up with
//! [`Lowering::last_loc`]. Structured control flow compiles to named inline
//! function regions plus a call site; early exits are preserved by boolean
//! control-flow-breaker sentinels that gate peeled-off subfunctions.
//! Closures are lifted to leading parameters plus a `Curry` chain at the
//! definition site. Deferred calls thread a (job-id, context-id) binding
//! through statement walking and materialize
//! `ResumeContext`/`Drain`/`RetMapGet`/`PopContext` at the first read.
//! Statements that reference the same shared location more than once get a
//! `Lock`/`Unlock` critical section.

pub mod deferred;
pub mod remap;
pub mod shared_locs;

use std::collections::VecDeque;

use indexmap::IndexMap;
use tracing::debug;

use swarm_core::ast::*;
use swarm_core::position::Position;
use swarm_core::symbol::{SymbolArena, SymbolId};
use swarm_core::types::{ObjectType, Primitive, Type};

use swarm_check::dead_code::{has_break, has_continue, has_return};

use swarm_isa::{Affinity, Instruction, Instructions, Location, Reference};

use crate::error::CodegenError;
use deferred::DeferredScopes;
use remap::RemapScopes;
use shared_locs::{symbol_location, SharedLocations};

const RETURN_LOCATION: &str = "retVal";
const FUNC_CFB: &str = "CFB";
const LOOP_CFB: &str = "CFBWhile";
const LOOP_BREAK: &str = "LoopBreak";
const WHILE_COND_LOCATION: &str = "whileCond";

/// Lowering options.
#[derive(Debug, Clone, Default)]
pub struct LowerOptions {
    /// Emit `PositionAnnotation` instructions ahead of every statement and
    /// compiled sub-expression.
    pub debug: bool,
}

/// Lower an analyzed program to a flat instruction stream.
pub fn lower(
    program: &Program,
    arena: &SymbolArena,
    options: &LowerOptions,
) -> Result<Instructions, CodegenError> {
    let mut walk = Lowering {
        arena,
        debug: options.debug,
        temp_counter: 0,
        depth: 0,
        loop_depth: 0,
        function_outer_scope: false,
        parent_call: false,
        deferred: DeferredScopes::new(),
        remap: RemapScopes::new(),
        shared: SharedLocations::default(),
        constructing: Vec::new(),
        constructor_locs: IndexMap::new(),
    };

    let mut instrs = Vec::new();
    for stmt in &program.body {
        walk.shared = SharedLocations::for_statement(stmt, arena);
        walk.emit_position(&mut instrs, stmt.pos());
        let lowered = walk.walk_statement(stmt)?;
        instrs.extend(lowered);
        walk.finish_statement(&mut instrs);
        debug_assert!(walk.shared.is_clear());
        debug!("{} finished lowering statement", stmt.pos());
    }
    Ok(instrs)
}

/// One lowered formal: type, affinity, location name, source symbol.
type IsaFormal = (Type, Affinity, String, Option<SymbolId>);

struct Lowering<'a> {
    arena: &'a SymbolArena,
    debug: bool,
    temp_counter: usize,
    /// Function-region nesting depth; drives `ScopeOf` emission.
    depth: usize,
    loop_depth: usize,
    /// Set while lowering a return in a function's outermost statement list
    /// (no CFB write needed there).
    function_outer_scope: bool,
    /// Set while lowering a parent constructor call (reuse the instance).
    parent_call: bool,
    deferred: DeferredScopes,
    remap: RemapScopes,
    shared: SharedLocations,
    /// Stack of (object type, member default-value locations) while inside
    /// type bodies.
    constructing: Vec<(ObjectType, IndexMap<String, Location>)>,
    /// Constructor region name → callable location (after capture currying).
    constructor_locs: IndexMap<String, Location>,
}

impl<'a> Lowering<'a> {
    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn next_counter(&mut self) -> usize {
        let n = self.temp_counter;
        self.temp_counter += 1;
        n
    }

    fn emit_position(&mut self, instrs: &mut Instructions, pos: &Position) {
        if self.debug {
            instrs.push(Instruction::PositionAnnotation {
                file: pos.file.clone(),
                line: pos.start_line,
                col: pos.start_col,
            });
        }
    }

    fn type_ref(&self, ty: &Type) -> Reference {
        match ty {
            Type::Object(o) => Reference::ObjectType(o.clone()),
            other => Reference::Type(other.clone()),
        }
    }

    fn last_loc(&self, instrs: &Instructions) -> Result<Location, CodegenError> {
        self.last_loc_at(instrs, 0)
    }

    fn last_loc_at(&self, instrs: &Instructions, offset: usize) -> Result<Location, CodegenError> {
        let idx = instrs
            .len()
            .checked_sub(1 + offset)
            .ok_or(CodegenError::NoResultLocation { at: 0 })?;
        instrs[idx]
            .assign_dest()
            .cloned()
            .ok_or(CodegenError::NoResultLocation { at: idx })
    }

    fn make_tmp(&mut self, instrs: Option<&mut Instructions>) -> Location {
        let name = format!("tmp{}", self.next_counter());
        self.make_location(Affinity::Local, name, instrs)
    }

    fn make_location(
        &mut self,
        affinity: Affinity,
        name: impl Into<String>,
        instrs: Option<&mut Instructions>,
    ) -> Location {
        let loc = Location::new(affinity, name);
        if self.depth > 0 {
            if let Some(instrs) = instrs {
                instrs.push(Instruction::ScopeOf(loc.clone()));
                self.deferred.remove(&loc);
            }
        }
        loc
    }

    fn loc_for_symbol(&self, sid: SymbolId) -> Location {
        self.remap
            .replace(sid)
            .unwrap_or_else(|| symbol_location(self.arena.get(sid)))
    }

    /// Append one instruction, materializing any deferred results it reads
    /// and acquiring locks for contended shared locations it touches.
    fn append(&mut self, instrs: &mut Instructions, instr: Instruction) {
        for loc in read_locations(&instr) {
            if self.deferred.contains(&loc) {
                let lock = self.shared.needs_lock(&loc);
                let (jobid, ctx) = self.deferred.drain(&loc).expect("binding just checked");
                debug!("materializing deferred result for {loc}");
                let ret_map = self.make_tmp(Some(&mut *instrs));
                self.append(instrs, Instruction::ResumeContext(Reference::Location(ctx)));
                self.assign_eval(instrs, ret_map.clone(), Instruction::Drain);
                if lock {
                    instrs.push(Instruction::Lock(loc.clone()));
                    self.shared.mark_locked(loc.clone());
                }
                self.assign_eval(
                    instrs,
                    loc.clone(),
                    Instruction::RetMapGet(
                        Reference::Location(ret_map),
                        Reference::Location(jobid),
                    ),
                );
                self.append(instrs, Instruction::PopContext);
            }
        }

        for loc in shared_locations_of(&instr) {
            if self.shared.needs_lock(&loc) {
                instrs.push(Instruction::Lock(loc.clone()));
                self.shared.mark_locked(loc);
            }
        }

        instrs.push(instr);
    }

    /// Release the statement's locks. If the release hides a result
    /// location, re-expose it with a trailing self-assignment.
    fn finish_statement(&mut self, instrs: &mut Instructions) {
        let locked = self.shared.take_locked();
        if locked.is_empty() {
            return;
        }
        let last_assign = instrs.last().and_then(|i| i.assign_dest().cloned());
        for loc in locked {
            instrs.push(Instruction::Unlock(loc));
        }
        if let Some(dest) = last_assign {
            instrs.push(Instruction::AssignValue {
                dest: dest.clone(),
                value: Reference::Location(dest),
            });
        }
    }

    fn assign_value(
        &mut self,
        instrs: &mut Instructions,
        dest: Location,
        value: Reference,
        selfassign: bool,
    ) {
        if selfassign {
            // Obligatory self-assigns must not force a deferred wait.
            instrs.push(Instruction::AssignValue { dest, value });
        } else {
            self.append(instrs, Instruction::AssignValue { dest: dest.clone(), value });
            self.deferred.remove(&dest);
        }
    }

    fn assign_eval(&mut self, instrs: &mut Instructions, dest: Location, eval: Instruction) {
        self.append(
            instrs,
            Instruction::AssignEval {
                dest: dest.clone(),
                eval: Box::new(eval),
            },
        );
        self.deferred.remove(&dest);
    }

    fn scan_constructing(&self, property: &str) -> Result<u64, CodegenError> {
        for (obj, _) in self.constructing.iter().rev() {
            if obj.get_property(property).is_some() {
                return Ok(obj.id());
            }
        }
        Err(CodegenError::MissingAnalysis(format!(
            "no type under construction has property {property}"
        )))
    }

    fn extract_formals(&self, formals: &[Formal]) -> Result<Vec<IsaFormal>, CodegenError> {
        formals
            .iter()
            .map(|p| {
                let sid = p.id.symbol.ok_or_else(|| {
                    CodegenError::MissingAnalysis(format!("symbol for formal {}", p.id.name))
                })?;
                let sym = self.arena.get(sid);
                let aff = if sym.shared {
                    Affinity::Shared
                } else {
                    Affinity::Local
                };
                Ok((
                    p.type_node.value.clone(),
                    aff,
                    format!("var_{}_{}", p.id.name, sym.uuid),
                    Some(sid),
                ))
            })
            .collect()
    }

    /// Free symbols that must be lifted into parameters: everything type
    /// analysis collected, minus the declared-name symbol (remapped to the
    /// region) and shared symbols (reachable through shared storage from any
    /// worker).
    fn captured_symbols(&self, func: &FunctionNode) -> Vec<SymbolId> {
        func.used_symbols
            .iter()
            .copied()
            .filter(|&sid| {
                if func.var_decld_to == Some(sid) {
                    return false;
                }
                !self.arena.get(sid).shared
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn walk_statement(&mut self, stmt: &Statement) -> Result<Instructions, CodegenError> {
        match stmt {
            Statement::Expression(s) => self.walk_expression(&s.expr),
            Statement::VariableDeclaration(decl) => self.walk_variable_declaration(decl),
            Statement::UninitializedVariableDeclaration(d) => Err(CodegenError::UnresolvedNode(
                format!("uninitialized declaration of {} outside a type body", d.id.name),
            )),
            Statement::Return(s) => self.walk_return(s),
            Statement::Continue { pos } => {
                let mut instrs = Vec::new();
                self.emit_position(&mut instrs, pos);
                self.assign_value(
                    &mut instrs,
                    Location::local(LOOP_CFB),
                    Reference::Boolean(true),
                    false,
                );
                Ok(instrs)
            }
            Statement::Break { pos } => {
                let mut instrs = Vec::new();
                self.emit_position(&mut instrs, pos);
                self.assign_value(
                    &mut instrs,
                    Location::local(LOOP_BREAK),
                    Reference::Boolean(true),
                    false,
                );
                self.assign_value(
                    &mut instrs,
                    Location::local(LOOP_CFB),
                    Reference::Boolean(true),
                    false,
                );
                Ok(instrs)
            }
            Statement::If(s) => self.walk_if(s),
            Statement::While(s) => self.walk_while(s),
            Statement::Enumerate(s) => self.walk_enumerate(s),
            Statement::With(s) => self.walk_with(s),
            Statement::Include(_) => Ok(Vec::new()),
        }
    }

    fn walk_variable_declaration(
        &mut self,
        decl: &VariableDeclaration,
    ) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();

        // Bring the variable into the enclosing function's scope before the
        // assignment writes it.
        if self.depth > 0 {
            let sid = decl.id.symbol.ok_or_else(|| {
                CodegenError::MissingAnalysis(format!("symbol for {}", decl.id.name))
            })?;
            let loc = symbol_location(self.arena.get(sid));
            self.append(&mut instrs, Instruction::ScopeOf(loc));
        }

        let assignment =
            self.walk_assignment(&decl.pos, &AssignDest::Identifier(&decl.id), &decl.value)?;
        instrs.extend(assignment);
        Ok(instrs)
    }

    fn walk_return(&mut self, stmt: &ReturnStatement) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, &stmt.pos);

        // Gate any peeled subfunctions of the enclosing function.
        if !self.function_outer_scope {
            self.assign_value(
                &mut instrs,
                Location::local(FUNC_CFB),
                Reference::Boolean(true),
                false,
            );
        }
        // Returning from inside a loop also breaks out of it.
        if self.loop_depth > 0 {
            self.assign_value(
                &mut instrs,
                Location::local(LOOP_CFB),
                Reference::Boolean(true),
                false,
            );
            self.assign_value(
                &mut instrs,
                Location::local(LOOP_BREAK),
                Reference::Boolean(true),
                false,
            );
        }

        if let Some(value) = &stmt.value {
            self.emit_position(&mut instrs, value.pos());
            let v = self.walk_expression(value)?;
            instrs.extend(v);
            let loc = self.last_loc(&instrs)?;
            self.assign_value(
                &mut instrs,
                Location::local(RETURN_LOCATION),
                Reference::Location(loc),
                false,
            );
        }
        Ok(instrs)
    }

    fn walk_if(&mut self, stmt: &IfStatement) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, stmt.condition.pos());
        let cond = self.walk_expression(&stmt.condition)?;
        instrs.extend(cond);
        let cond_loc = self.last_loc(&instrs)?;

        let name = format!("IFBODY_{}", self.next_counter());
        let body = self.make_function(&name, None, &Type::void(), &stmt.body, false, false, false)?;
        instrs.extend(body);

        self.emit_position(&mut instrs, &stmt.pos);
        self.append(
            &mut instrs,
            Instruction::CallIf0(
                Reference::Location(cond_loc),
                Reference::Location(Location::function(name)),
            ),
        );
        Ok(instrs)
    }

    fn walk_while(&mut self, stmt: &WhileStatement) -> Result<Instructions, CodegenError> {
        let tc = self.next_counter();
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, &stmt.pos);

        let outer_name = format!("WHILECOND_OUTER_{tc}");
        let has_brk = stmt.body.iter().any(has_break);
        let has_ret = stmt.body.iter().any(has_return);

        if has_brk || has_ret {
            // The break flag must win over the real condition, so the
            // condition is split: an inner function evaluates the raw
            // condition into a scratch cell, an outer function consults the
            // break flag first and only then calls the inner one.
            let cond_loc = Location::local(WHILE_COND_LOCATION);
            let brk = self.make_location(Affinity::Local, LOOP_BREAK, Some(&mut instrs));
            self.assign_value(&mut instrs, brk.clone(), Reference::Boolean(false), false);

            let inner_name = format!("WHILECOND_INNER_{tc}");
            self.append(
                &mut instrs,
                Instruction::BeginFunction {
                    func: Location::function(&inner_name),
                    return_type: self.type_ref(&Type::void()),
                },
            );
            self.emit_position(&mut instrs, stmt.condition.pos());
            let cond = self.walk_expression(&stmt.condition)?;
            instrs.extend(cond);
            let raw = self.last_loc(&instrs)?;
            self.assign_value(&mut instrs, cond_loc.clone(), Reference::Location(raw), false);
            self.append(&mut instrs, Instruction::Return0);

            self.append(
                &mut instrs,
                Instruction::BeginFunction {
                    func: Location::function(&outer_name),
                    return_type: self.type_ref(&Type::boolean()),
                },
            );
            self.append(&mut instrs, Instruction::ScopeOf(cond_loc.clone()));
            // A taken break skips the inner call; the scratch cell must
            // already read false.
            self.assign_value(&mut instrs, cond_loc.clone(), Reference::Boolean(false), false);
            self.append(
                &mut instrs,
                Instruction::CallElse0(
                    Reference::Location(brk),
                    Reference::Location(Location::function(&inner_name)),
                ),
            );
            self.append(&mut instrs, Instruction::Return1(Reference::Location(cond_loc)));
        } else {
            self.append(
                &mut instrs,
                Instruction::BeginFunction {
                    func: Location::function(&outer_name),
                    return_type: self.type_ref(&Type::boolean()),
                },
            );
            self.emit_position(&mut instrs, stmt.condition.pos());
            let cond = self.walk_expression(&stmt.condition)?;
            instrs.extend(cond);
            let raw = self.last_loc(&instrs)?;
            self.append(&mut instrs, Instruction::Return1(Reference::Location(raw)));
        }

        let body_name = format!("WHILE_{tc}");
        self.loop_depth += 1;
        let body =
            self.make_function(&body_name, None, &Type::void(), &stmt.body, true, false, false)?;
        self.loop_depth -= 1;
        instrs.extend(body);

        self.emit_position(&mut instrs, &stmt.pos);
        self.append(
            &mut instrs,
            Instruction::While(
                Reference::Location(Location::function(outer_name)),
                Reference::Location(Location::function(body_name)),
            ),
        );
        Ok(instrs)
    }

    fn walk_enumerate(&mut self, stmt: &EnumerateStatement) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, stmt.enumerable.pos());
        let source = self.walk_expression(&stmt.enumerable)?;
        instrs.extend(source);
        let enum_loc = self.last_loc(&instrs)?;

        let local_sid = stmt.local.symbol.ok_or_else(|| {
            CodegenError::MissingAnalysis(format!("symbol for {}", stmt.local.name))
        })?;
        let local_sym = self.arena.get(local_sid);
        let elem_ty = local_sym
            .ty
            .clone()
            .ok_or_else(|| CodegenError::MissingAnalysis("enumerate local type".into()))?;

        let mut formals: Vec<IsaFormal> = vec![(
            elem_ty.clone(),
            if stmt.shared { Affinity::Shared } else { Affinity::Local },
            format!("var_{}_{}", stmt.local.name, local_sym.uuid),
            Some(local_sid),
        )];
        match &stmt.index {
            Some(index) => {
                let isid = index.symbol.ok_or_else(|| {
                    CodegenError::MissingAnalysis(format!("symbol for {}", index.name))
                })?;
                let isym = self.arena.get(isid);
                formals.push((
                    Type::number(),
                    Affinity::Local,
                    format!("var_{}_{}", index.name, isym.uuid),
                    Some(isid),
                ));
            }
            None => formals.push((Type::number(), Affinity::Local, "index".into(), None)),
        }

        let name = format!("ENUM_{}", self.next_counter());
        let saved_loop = self.loop_depth;
        self.loop_depth = 0;
        let body =
            self.make_function(&name, Some(formals), &Type::void(), &stmt.body, false, false, false)?;
        self.loop_depth = saved_loop;
        instrs.extend(body);

        self.emit_position(&mut instrs, &stmt.pos);
        self.append(
            &mut instrs,
            Instruction::Enumerate(
                self.type_ref(&elem_ty),
                Reference::Location(enum_loc),
                Reference::Location(Location::function(name)),
            ),
        );
        Ok(instrs)
    }

    fn walk_with(&mut self, stmt: &WithStatement) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, stmt.resource.pos());
        let resource = self.walk_expression(&stmt.resource)?;
        instrs.extend(resource);
        let res_loc = self.last_loc(&instrs)?;

        let local_sid = stmt.local.symbol.ok_or_else(|| {
            CodegenError::MissingAnalysis(format!("symbol for {}", stmt.local.name))
        })?;
        let local_sym = self.arena.get(local_sid);
        let yield_ty = local_sym
            .ty
            .clone()
            .ok_or_else(|| CodegenError::MissingAnalysis("with local type".into()))?;

        let formals: Vec<IsaFormal> = vec![(
            yield_ty,
            if stmt.shared { Affinity::Shared } else { Affinity::Local },
            format!("var_{}_{}", stmt.local.name, local_sym.uuid),
            Some(local_sid),
        )];

        let name = format!("WITH_{}", self.next_counter());
        let body =
            self.make_function(&name, Some(formals), &Type::void(), &stmt.body, false, false, true)?;
        instrs.extend(body);

        self.emit_position(&mut instrs, &stmt.pos);
        self.append(
            &mut instrs,
            Instruction::With(
                Reference::Location(res_loc),
                Reference::Location(Location::function(name)),
            ),
        );
        Ok(instrs)
    }

    /// Lower a statement list, peeling the remainder into a `SUBFUNC_k`
    /// guarded by the control-flow breaker after the first statement whose
    /// subtree can divert control.
    fn walk_statement_list(
        &mut self,
        body: &[Statement],
        loop_: bool,
        new_scope: bool,
        with: bool,
    ) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        let mut i = 0;
        while i < body.len() {
            let stmt = &body[i];
            if new_scope && matches!(stmt, Statement::Return(_)) {
                self.function_outer_scope = true;
            }
            let saved = std::mem::replace(
                &mut self.shared,
                SharedLocations::for_statement(stmt, self.arena),
            );
            self.emit_position(&mut instrs, stmt.pos());
            let lowered = self.walk_statement(stmt)?;
            instrs.extend(lowered);
            self.finish_statement(&mut instrs);
            self.shared = saved;
            self.function_outer_scope = false;

            i += 1;
            let diverts = (loop_ && (has_continue(stmt) || has_break(stmt))) || has_return(stmt);
            if diverts {
                break;
            }
        }

        if i < body.len() {
            let name = format!("SUBFUNC_{}", self.next_counter());
            let func =
                self.make_function(&name, None, &Type::void(), &body[i..], loop_, false, with)?;
            instrs.extend(func);
            let cfb = if loop_ { LOOP_CFB } else { FUNC_CFB };
            self.append(
                &mut instrs,
                Instruction::CallElse0(
                    Reference::Location(Location::local(cfb)),
                    Reference::Location(Location::function(name)),
                ),
            );
        }
        Ok(instrs)
    }

    /// Emit a complete function region: header, formals, return-value and
    /// CFB scoping, body with subfunction peeling, and the final return.
    fn make_function(
        &mut self,
        name: &str,
        formals: Option<Vec<IsaFormal>>,
        ret: &Type,
        body: &[Statement],
        loop_: bool,
        new_scope: bool,
        with: bool,
    ) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        if !with {
            self.deferred.enter();
        }
        self.depth += 1;
        self.remap.enter();

        self.append(
            &mut instrs,
            Instruction::BeginFunction {
                func: Location::function(name),
                return_type: self.type_ref(ret),
            },
        );

        if let Some(formals) = formals {
            for (ty, aff, loc_name, sym) in formals {
                let loc = Location::new(aff, loc_name);
                if let Some(sid) = sym {
                    self.remap.register(sid, loc.clone());
                }
                let tr = self.type_ref(&ty);
                self.append(&mut instrs, Instruction::FunctionParam { ty: tr, loc: loc.clone() });
                self.deferred.remove(&loc);
            }
        }

        if !ret.is_primitive(Primitive::Void) {
            self.append(
                &mut instrs,
                Instruction::ScopeOf(Location::local(RETURN_LOCATION)),
            );
        }

        if loop_ {
            if body
                .iter()
                .any(|s| has_continue(s) || has_break(s) || has_return(s))
            {
                let cfb = self.make_location(Affinity::Local, LOOP_CFB, Some(&mut instrs));
                self.assign_value(&mut instrs, cfb, Reference::Boolean(false), false);
            }
        } else if new_scope {
            // Only needed when a return hides below a nested block.
            if body.iter().any(|s| s.is_block() && has_return(s)) {
                let cfb = self.make_location(Affinity::Local, FUNC_CFB, Some(&mut instrs));
                self.assign_value(&mut instrs, cfb, Reference::Boolean(false), false);
            }
        }

        let block = self.walk_statement_list(body, loop_, new_scope, with)?;
        instrs.extend(block);

        if ret.is_primitive(Primitive::Void) {
            self.append(&mut instrs, Instruction::Return0);
        } else {
            self.append(
                &mut instrs,
                Instruction::Return1(Reference::Location(Location::local(RETURN_LOCATION))),
            );
        }

        self.remap.leave();
        self.depth -= 1;
        if !with {
            self.deferred.leave();
        }
        Ok(instrs)
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn walk_expression(&mut self, expr: &Expression) -> Result<Instructions, CodegenError> {
        match expr {
            Expression::Identifier(id) => self.walk_identifier(id),
            Expression::NumberLiteral(n) => {
                let mut instrs = Vec::new();
                self.emit_position(&mut instrs, &n.pos);
                let dest = self.make_tmp(if self.depth > 0 { Some(&mut instrs) } else { None });
                self.assign_value(&mut instrs, dest, Reference::Number(n.value), false);
                Ok(instrs)
            }
            Expression::StringLiteral(s) => {
                let mut instrs = Vec::new();
                self.emit_position(&mut instrs, &s.pos);
                let dest = self.make_tmp(if self.depth > 0 { Some(&mut instrs) } else { None });
                self.assign_value(&mut instrs, dest, Reference::String(s.value.clone()), false);
                Ok(instrs)
            }
            Expression::BooleanLiteral(b) => {
                let mut instrs = Vec::new();
                self.emit_position(&mut instrs, &b.pos);
                let dest = self.make_tmp(if self.depth > 0 { Some(&mut instrs) } else { None });
                self.assign_value(&mut instrs, dest, Reference::Boolean(b.value), false);
                Ok(instrs)
            }
            Expression::TypeLiteral(lit) => {
                let mut instrs = Vec::new();
                self.emit_position(&mut instrs, &lit.pos);
                let value = self.type_ref(&lit.value);
                let dest = self.make_tmp(Some(&mut instrs));
                self.assign_value(&mut instrs, dest, value, false);
                Ok(instrs)
            }
            Expression::EnumerationLiteral(lit) => self.walk_enumeration_literal(lit),
            Expression::MapLiteral(lit) => self.walk_map_literal(lit),
            Expression::EnumerableAccess(a) => self.walk_enumerable_access(a),
            Expression::EnumerableAppend(a) => {
                let mut instrs = Vec::new();
                self.emit_position(&mut instrs, a.path.pos());
                instrs.extend(self.walk_expression(&a.path)?);
                Ok(instrs)
            }
            Expression::MapAccess(a) => self.walk_map_access(a),
            Expression::ClassAccess(a) => self.walk_class_access(a),
            Expression::Assign(a) => {
                let dest = AssignDest::from_expression(&a.dest)?;
                self.walk_assignment(&a.pos, &dest, &a.value)
            }
            Expression::Function(f) => self.walk_function_node(f),
            Expression::TypeBody(tb) => self.walk_type_body(tb),
            Expression::Call(call) => self.walk_call(call),
            Expression::DeferCall(d) => self.walk_defer_call(d),
            Expression::Binary(b) => self.walk_binary(b),
            Expression::Unary(u) => self.walk_unary(u),
        }
    }

    fn walk_identifier(&mut self, id: &Identifier) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, &id.pos);

        let sid = id
            .symbol
            .ok_or_else(|| CodegenError::MissingAnalysis(format!("symbol for {}", id.name)))?;
        let arena = self.arena;
        let sym = arena.get(sid);
        let loc = self.loc_for_symbol(sid);

        if sym.is_prologue() {
            let svi = sym.svi_name.clone().ok_or_else(|| {
                CodegenError::MissingAnalysis(format!("svi name for prologue {}", sym.name))
            })?;
            self.assign_value(
                &mut instrs,
                loc,
                Reference::Location(Location::function(svi)),
                false,
            );
        } else if sym.is_property() {
            // A bare identifier resolving to a property only occurs inside a
            // member function; read it off the in-scope instance parameter.
            self.append(&mut instrs, Instruction::ScopeOf(loc.clone()));
            let owner = self.scan_constructing(&sym.name)?;
            self.assign_eval(
                &mut instrs,
                loc,
                Instruction::ObjGet(
                    Reference::Location(Location::local(format!("instance_{owner}"))),
                    Reference::Location(Location::object_prop(&sym.name)),
                ),
            );
        } else {
            // Expose the location to `last_loc` consumers.
            self.assign_value(&mut instrs, loc.clone(), Reference::Location(loc), true);
        }
        Ok(instrs)
    }

    fn walk_enumeration_literal(
        &mut self,
        lit: &EnumerationLiteral,
    ) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, &lit.pos);

        let inner = match lit.ty.as_ref() {
            Some(Type::Enumerable(inner)) => (**inner).clone(),
            _ => return Err(CodegenError::MissingAnalysis("enumeration literal type".into())),
        };
        let enum_loc = self.make_tmp(Some(&mut instrs));
        let elem_ref = self.type_ref(&inner);
        self.assign_eval(&mut instrs, enum_loc.clone(), Instruction::EnumInit(elem_ref));

        for actual in &lit.actuals {
            self.emit_position(&mut instrs, actual.pos());
            instrs.extend(self.walk_expression(actual)?);
            let value = self.last_loc(&instrs)?;
            self.append(
                &mut instrs,
                Instruction::EnumAppend(
                    Reference::Location(value),
                    Reference::Location(enum_loc.clone()),
                ),
            );
        }

        // Re-expose the enumeration for `last_loc`.
        self.assign_value(
            &mut instrs,
            enum_loc.clone(),
            Reference::Location(enum_loc),
            true,
        );
        Ok(instrs)
    }

    fn walk_map_literal(&mut self, lit: &MapLiteral) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, &lit.pos);

        let inner = match lit.ty.as_ref() {
            Some(Type::Map(inner)) => (**inner).clone(),
            _ => return Err(CodegenError::MissingAnalysis("map literal type".into())),
        };
        let map_loc = self.make_tmp(Some(&mut instrs));
        let elem_ref = self.type_ref(&inner);
        self.assign_eval(&mut instrs, map_loc.clone(), Instruction::MapInit(elem_ref));

        for entry in &lit.entries {
            self.emit_position(&mut instrs, &entry.pos);
            instrs.extend(self.walk_expression(&entry.value)?);
            let value = self.last_loc(&instrs)?;
            self.append(
                &mut instrs,
                Instruction::MapSet(
                    Reference::String(format!("mkey_{}", entry.id.name)),
                    Reference::Location(value),
                    Reference::Location(map_loc.clone()),
                ),
            );
        }

        let dest = self.make_tmp(Some(&mut instrs));
        self.assign_value(&mut instrs, dest, Reference::Location(map_loc), false);
        Ok(instrs)
    }

    fn walk_enumerable_access(
        &mut self,
        a: &EnumerableAccess,
    ) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, a.path.pos());
        instrs.extend(self.walk_expression(&a.path)?);
        let enumeration = self.last_loc(&instrs)?;

        self.emit_position(&mut instrs, a.index.pos());
        instrs.extend(self.walk_expression(&a.index)?);
        let index = self.last_loc(&instrs)?;

        self.emit_position(&mut instrs, &a.pos);
        let dest = self.make_tmp(Some(&mut instrs));
        self.assign_eval(
            &mut instrs,
            dest,
            Instruction::EnumGet(Reference::Location(enumeration), Reference::Location(index)),
        );
        Ok(instrs)
    }

    fn walk_map_access(&mut self, a: &MapAccess) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, a.path.pos());
        instrs.extend(self.walk_expression(&a.path)?);
        let path = self.last_loc(&instrs)?;

        self.emit_position(&mut instrs, &a.pos);
        let dest = self.make_tmp(Some(&mut instrs));
        self.assign_eval(
            &mut instrs,
            dest,
            Instruction::MapGet(
                Reference::String(format!("mkey_{}", a.end.name)),
                Reference::Location(path),
            ),
        );
        Ok(instrs)
    }

    fn walk_class_access(&mut self, a: &ClassAccess) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, a.path.pos());
        instrs.extend(self.walk_expression(&a.path)?);
        let path = self.last_loc(&instrs)?;

        self.emit_position(&mut instrs, &a.pos);
        let dest = self.make_tmp(Some(&mut instrs));
        self.assign_eval(
            &mut instrs,
            dest,
            Instruction::ObjGet(
                Reference::Location(path),
                Reference::Location(Location::object_prop(&a.end.name)),
            ),
        );
        Ok(instrs)
    }

    fn walk_assignment(
        &mut self,
        pos: &Position,
        dest: &AssignDest<'_>,
        value: &Expression,
    ) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, value.pos());
        instrs.extend(self.walk_expression(value)?);
        let value_loc = self.last_loc(&instrs)?;

        match dest {
            AssignDest::Identifier(id) => {
                let sid = id.symbol.ok_or_else(|| {
                    CodegenError::MissingAnalysis(format!("symbol for {}", id.name))
                })?;
                let arena = self.arena;
                let sym = arena.get(sid);
                let loc = self.loc_for_symbol(sid);
                self.emit_position(&mut instrs, &id.pos);

                if matches!(value, Expression::DeferCall(_)) {
                    // The defer lowering ends with the job-id and context-id
                    // assignments (an interleaved ScopeOf appears inside
                    // function regions).
                    let offset = if instrs.len() >= 2
                        && matches!(instrs[instrs.len() - 2], Instruction::ScopeOf(_))
                    {
                        2
                    } else {
                        1
                    };
                    let jobid = self.last_loc_at(&instrs, offset)?;
                    debug!(
                        "{} marking {loc} as the return location of a deferred call",
                        id.pos
                    );
                    self.deferred.add(loc, jobid, value_loc);
                } else if sym.is_property() && !self.constructing.is_empty() {
                    self.emit_position(&mut instrs, pos);
                    let owner = self.scan_constructing(&sym.name)?;
                    self.append(
                        &mut instrs,
                        Instruction::ObjSet(
                            Reference::Location(Location::local(format!("instance_{owner}"))),
                            Reference::Location(Location::object_prop(&sym.name)),
                            Reference::Location(value_loc),
                        ),
                    );
                } else {
                    self.assign_value(&mut instrs, loc, Reference::Location(value_loc), false);
                }
            }
            AssignDest::EnumerableAccess(e) => {
                self.emit_position(&mut instrs, e.path.pos());
                instrs.extend(self.walk_expression(&e.path)?);
                let path = self.last_loc(&instrs)?;

                self.emit_position(&mut instrs, e.index.pos());
                instrs.extend(self.walk_expression(&e.index)?);
                let index = self.last_loc(&instrs)?;

                self.emit_position(&mut instrs, pos);
                self.append(
                    &mut instrs,
                    Instruction::EnumSet(
                        Reference::Location(path),
                        Reference::Location(index),
                        Reference::Location(value_loc),
                    ),
                );
            }
            AssignDest::EnumerableAppend(e) => {
                self.emit_position(&mut instrs, e.path.pos());
                instrs.extend(self.walk_expression(&e.path)?);
                let enumeration = self.last_loc(&instrs)?;

                self.emit_position(&mut instrs, pos);
                self.append(
                    &mut instrs,
                    Instruction::EnumAppend(
                        Reference::Location(value_loc),
                        Reference::Location(enumeration),
                    ),
                );
            }
            AssignDest::MapAccess(m) => {
                self.emit_position(&mut instrs, m.path.pos());
                instrs.extend(self.walk_expression(&m.path)?);
                let path = self.last_loc(&instrs)?;

                self.emit_position(&mut instrs, pos);
                self.append(
                    &mut instrs,
                    Instruction::MapSet(
                        Reference::String(format!("mkey_{}", m.end.name)),
                        Reference::Location(value_loc),
                        Reference::Location(path),
                    ),
                );
            }
            AssignDest::ClassAccess(c) => {
                self.emit_position(&mut instrs, c.path.pos());
                instrs.extend(self.walk_expression(&c.path)?);
                let path = self.last_loc(&instrs)?;

                self.emit_position(&mut instrs, pos);
                self.append(
                    &mut instrs,
                    Instruction::ObjSet(
                        Reference::Location(path),
                        Reference::Location(Location::object_prop(&c.end.name)),
                        Reference::Location(value_loc),
                    ),
                );
            }
        }
        Ok(instrs)
    }

    fn walk_function_node(&mut self, f: &FunctionNode) -> Result<Instructions, CodegenError> {
        let ret = f.return_type().clone();
        let name = format!("FUNC_{}", self.next_counter());
        let saved_loop = self.loop_depth;
        self.loop_depth = 0;

        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, &f.pos);

        // Lift captured symbols into leading parameters so the function
        // closes over nothing; the definition site curries the values back.
        let mut formals = self.extract_formals(&f.formals)?;
        let captured = self.captured_symbols(f);
        for &sid in captured.iter().rev() {
            let arena = self.arena;
            let sym = arena.get(sid);
            let nf: IsaFormal = if sym.is_property() {
                let owner = sym.property_of.as_ref().ok_or_else(|| {
                    CodegenError::MissingAnalysis(format!("owner of property {}", sym.name))
                })?;
                (
                    Type::Object(owner.clone()),
                    Affinity::Local,
                    format!("instance_{}", owner.id()),
                    Some(sid),
                )
            } else {
                (
                    sym.ty.clone().ok_or_else(|| {
                        CodegenError::MissingAnalysis(format!("type of {}", sym.name))
                    })?,
                    Affinity::Local,
                    format!("var_{}_{}", sym.name, sym.uuid),
                    Some(sid),
                )
            };
            formals.insert(0, nf);
        }

        self.remap.enter();
        if let Some(decl_sym) = f.var_decld_to {
            // Direct recursion goes straight to the region.
            self.remap.register(decl_sym, Location::function(&name));
        }
        let func = self.make_function(&name, Some(formals), &ret, &f.body, false, true, false)?;
        self.remap.leave();
        self.loop_depth = saved_loop;
        instrs.extend(func);

        let mut floc = Location::function(&name);
        for &sid in &captured {
            let arena = self.arena;
            let sym = arena.get(sid);
            let capture_loc = if sym.is_property() {
                Location::local(format!("instance_{}", self.scan_constructing(&sym.name)?))
            } else {
                symbol_location(sym)
            };
            let tmp = self.make_tmp(Some(&mut instrs));
            self.assign_eval(
                &mut instrs,
                tmp.clone(),
                Instruction::Curry(
                    Reference::Location(floc),
                    Reference::Location(capture_loc),
                ),
            );
            floc = tmp;
        }

        let dest = self.make_tmp(if self.depth > 0 { Some(&mut instrs) } else { None });
        self.assign_value(&mut instrs, dest, Reference::Location(floc), false);
        Ok(instrs)
    }

    fn walk_type_body(&mut self, tb: &TypeBodyNode) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, &tb.pos);

        let obj = tb
            .value
            .clone()
            .ok_or_else(|| CodegenError::MissingAnalysis("finalized object type".into()))?;
        self.constructing.push((obj.clone(), IndexMap::new()));

        for decl in &tb.declarations {
            let Statement::VariableDeclaration(d) = decl else {
                continue;
            };
            let vloc = if let Expression::Function(func) = &d.value {
                // Member functions take the instance as a leading parameter.
                let ret = func.return_type().clone();
                let mut formals: Vec<IsaFormal> = vec![(
                    Type::Object(obj.clone()),
                    Affinity::Local,
                    format!("instance_{}", obj.id()),
                    None,
                )];
                formals.extend(self.extract_formals(&func.formals)?);
                let fnname = format!("FUNC_{}", self.next_counter());
                let lowered =
                    self.make_function(&fnname, Some(formals), &ret, &func.body, false, true, false)?;
                instrs.extend(lowered);
                Location::function(fnname)
            } else {
                instrs.extend(self.walk_expression(&d.value)?);
                self.last_loc(&instrs)?
            };

            // Stash the default so every constructor can install it.
            let defloc = self.make_location(
                Affinity::Local,
                format!("deval_{}_{}", obj.id(), d.id.name),
                Some(&mut instrs),
            );
            self.assign_value(&mut instrs, defloc.clone(), Reference::Location(vloc), false);
            self.constructing
                .last_mut()
                .expect("constructing pushed above")
                .1
                .insert(d.id.name.clone(), defloc);
        }

        for c in &tb.constructors {
            let lowered = self.walk_constructor(c)?;
            instrs.extend(lowered);
        }
        self.constructing.pop();

        let type_ref = self.type_ref(&Type::Object(obj));
        let dest = self.make_tmp(Some(&mut instrs));
        self.assign_value(&mut instrs, dest, type_ref, false);
        Ok(instrs)
    }

    fn walk_constructor(&mut self, c: &ConstructorNode) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, &c.pos);

        let (obj, defaults) = self
            .constructing
            .last()
            .cloned()
            .ok_or_else(|| CodegenError::MissingAnalysis("constructor outside type body".into()))?;
        let inst_loc = Location::local(format!("instance_{}", obj.id()));

        self.depth += 1;
        self.deferred.enter();
        self.remap.enter();

        self.append(
            &mut instrs,
            Instruction::BeginFunction {
                func: Location::function(&c.name),
                return_type: self.type_ref(&Type::Object(obj.clone())),
            },
        );

        let mut formals = self.extract_formals(&c.func.formals)?;
        // Property references in the body go straight through the synthetic
        // instance parameter; they are not captures.
        let captured: Vec<SymbolId> = self
            .captured_symbols(&c.func)
            .into_iter()
            .filter(|&sid| !self.arena.get(sid).is_property())
            .collect();
        for &sid in captured.iter().rev() {
            let arena = self.arena;
            let sym = arena.get(sid);
            let nf: IsaFormal = (
                sym.ty.clone().ok_or_else(|| {
                    CodegenError::MissingAnalysis(format!("type of {}", sym.name))
                })?,
                Affinity::Local,
                format!("var_{}_{}", sym.name, sym.uuid),
                Some(sid),
            );
            formals.insert(0, nf);
        }
        for (ty, aff, loc_name, sym) in formals {
            let loc = Location::new(aff, loc_name);
            if let Some(sid) = sym {
                self.remap.register(sid, loc.clone());
            }
            let tr = self.type_ref(&ty);
            self.append(&mut instrs, Instruction::FunctionParam { ty: tr, loc: loc.clone() });
            self.deferred.remove(&loc);
        }
        // The instance arrives as a synthetic trailing parameter.
        let inst_ty = self.type_ref(&Type::Object(obj.clone()));
        self.append(
            &mut instrs,
            Instruction::FunctionParam {
                ty: inst_ty,
                loc: inst_loc.clone(),
            },
        );

        if c.func.body.iter().any(|s| s.is_block() && has_return(s)) {
            let cfb = self.make_location(Affinity::Local, FUNC_CFB, Some(&mut instrs));
            self.assign_value(&mut instrs, cfb, Reference::Boolean(false), false);
        }

        for parent in &c.parent_constructors {
            self.emit_position(&mut instrs, &parent.pos);
            self.parent_call = true;
            let call = self.walk_call(parent);
            self.parent_call = false;
            instrs.extend(call?);
        }

        // Install member defaults; function-typed members get the instance
        // curried in.
        for (prop, defloc) in &defaults {
            let mut src = defloc.clone();
            let is_callable = obj
                .get_property(prop)
                .map(|t| t.is_callable())
                .unwrap_or(false);
            if is_callable {
                let tmp = self.make_tmp(Some(&mut instrs));
                self.assign_eval(
                    &mut instrs,
                    tmp.clone(),
                    Instruction::Curry(
                        Reference::Location(defloc.clone()),
                        Reference::Location(inst_loc.clone()),
                    ),
                );
                src = tmp;
            }
            self.append(
                &mut instrs,
                Instruction::ObjSet(
                    Reference::Location(inst_loc.clone()),
                    Reference::Location(Location::object_prop(prop)),
                    Reference::Location(src),
                ),
            );
        }

        let body = self.walk_statement_list(&c.func.body, false, true, false)?;
        instrs.extend(body);
        self.append(
            &mut instrs,
            Instruction::Return1(Reference::Location(inst_loc)),
        );
        self.remap.leave();

        // Curry captures so the registered constructor is directly callable.
        let mut floc = Location::function(&c.name);
        for &sid in &captured {
            let arena = self.arena;
            let sym = arena.get(sid);
            let capture_loc = symbol_location(sym);
            let tmp = self.make_tmp(Some(&mut instrs));
            self.assign_eval(
                &mut instrs,
                tmp.clone(),
                Instruction::Curry(
                    Reference::Location(floc),
                    Reference::Location(capture_loc),
                ),
            );
            floc = tmp;
        }
        self.constructor_locs.insert(c.name.clone(), floc);

        self.depth -= 1;
        self.deferred.leave();
        Ok(instrs)
    }

    fn walk_call(&mut self, call: &CallExpression) -> Result<Instructions, CodegenError> {
        // log/err lower straight to stream pushes.
        if let Expression::Identifier(id) = call.func.as_ref() {
            if let Some(sid) = id.symbol {
                let arena = self.arena;
                let sym = arena.get(sid);
                if sym.is_prologue() && (sym.name == "log" || sym.name == "err") {
                    let stream = if sym.name == "log" { "STDOUT" } else { "STDERR" };
                    return self.call_to_stream_push(call, stream);
                }
            }
        }

        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, &call.pos);

        let mut func_loc = match &call.constructor {
            Some(ctor) => self
                .constructor_locs
                .get(&ctor.name)
                .cloned()
                .ok_or_else(|| {
                    CodegenError::MissingAnalysis(format!("constructor location {}", ctor.name))
                })?,
            None => {
                instrs.extend(self.walk_expression(&call.func)?);
                self.last_loc(&instrs)?
            }
        };

        let in_parent_call = self.parent_call;
        self.parent_call = false;

        let mut arg_locs: VecDeque<Location> = VecDeque::new();
        for arg in &call.args {
            self.emit_position(&mut instrs, arg.pos());
            if in_parent_call {
                if let Expression::Function(f) = arg {
                    // A function literal passed up to a parent constructor
                    // still binds this instance.
                    let (obj, _) = self
                        .constructing
                        .last()
                        .cloned()
                        .ok_or_else(|| {
                            CodegenError::MissingAnalysis("parent call outside type body".into())
                        })?;
                    let ret = f.return_type().clone();
                    let mut formals: Vec<IsaFormal> = vec![(
                        Type::Object(obj.clone()),
                        Affinity::Local,
                        format!("instance_{}", obj.id()),
                        None,
                    )];
                    formals.extend(self.extract_formals(&f.formals)?);
                    let fnname = format!("FUNC_{}", self.next_counter());
                    let lowered = self
                        .make_function(&fnname, Some(formals), &ret, &f.body, false, true, false)?;
                    instrs.extend(lowered);
                    let tmp = self.make_tmp(Some(&mut instrs));
                    self.assign_eval(
                        &mut instrs,
                        tmp,
                        Instruction::Curry(
                            Reference::Location(Location::function(fnname)),
                            Reference::Location(Location::local(format!(
                                "instance_{}",
                                obj.id()
                            ))),
                        ),
                    );
                    arg_locs.push_back(self.last_loc(&instrs)?);
                    continue;
                }
            }
            instrs.extend(self.walk_expression(arg)?);
            arg_locs.push_back(self.last_loc(&instrs)?);
        }

        let init_loc = if in_parent_call {
            let (obj, _) = self.constructing.last().cloned().ok_or_else(|| {
                CodegenError::MissingAnalysis("parent call outside type body".into())
            })?;
            Location::local(format!("instance_{}", obj.id()))
        } else {
            self.make_tmp(Some(&mut instrs))
        };
        if call.constructor.is_some() {
            arg_locs.push_back(init_loc.clone());
        }
        self.emit_position(&mut instrs, &call.pos);

        // Arity-N calls are N-1 curries plus a terminal call.
        while arg_locs.len() > 1 {
            let first = arg_locs.pop_front().expect("len checked");
            let curried = self.make_tmp(Some(&mut instrs));
            self.assign_eval(
                &mut instrs,
                curried.clone(),
                Instruction::Curry(Reference::Location(func_loc), Reference::Location(first)),
            );
            func_loc = curried;
        }
        self.parent_call = in_parent_call;

        let call_instr = match arg_locs.pop_front() {
            None => Instruction::Call0(Reference::Location(func_loc)),
            Some(a) => Instruction::Call1(Reference::Location(func_loc), Reference::Location(a)),
        };

        let is_void = call
            .ty
            .as_ref()
            .map(|t| t.is_primitive(Primitive::Void))
            .unwrap_or(false);
        if call.constructor.is_none() && is_void {
            self.append(&mut instrs, call_instr);
            return Ok(instrs);
        }

        if let Some(ctor) = &call.constructor {
            if self.parent_call {
                // Parent constructors run against the existing instance.
                self.assign_eval(&mut instrs, init_loc, call_instr);
                return Ok(instrs);
            }
            let otype = self.type_ref(&Type::Object(ctor.part_of.clone()));
            self.assign_eval(&mut instrs, init_loc.clone(), Instruction::ObjInit(otype));
            self.assign_eval(&mut instrs, init_loc.clone(), call_instr);
            self.assign_eval(
                &mut instrs,
                init_loc.clone(),
                Instruction::ObjInstance(Reference::Location(init_loc.clone())),
            );
            return Ok(instrs);
        }

        self.assign_eval(&mut instrs, init_loc, call_instr);
        Ok(instrs)
    }

    fn call_to_stream_push(
        &mut self,
        call: &CallExpression,
        stream: &str,
    ) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        let arg = call
            .args
            .first()
            .ok_or_else(|| CodegenError::MissingAnalysis("stream push argument".into()))?;
        self.emit_position(&mut instrs, arg.pos());
        instrs.extend(self.walk_expression(arg)?);
        let value = self.last_loc(&instrs)?;

        self.emit_position(&mut instrs, &call.pos);
        self.append(
            &mut instrs,
            Instruction::StreamPush(
                Reference::Location(Location::local(stream)),
                Reference::Location(value),
            ),
        );
        Ok(instrs)
    }

    fn walk_defer_call(&mut self, d: &DeferCall) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, &d.call.pos);
        instrs.extend(self.walk_call(&d.call)?);

        // A stream push has no call to enqueue; wrap it in a region first.
        if matches!(instrs.last(), Some(Instruction::StreamPush(..))) {
            let push = instrs.pop().expect("just matched");
            let fnname = format!("FUNC_{}", self.next_counter());
            self.append(
                &mut instrs,
                Instruction::BeginFunction {
                    func: Location::function(&fnname),
                    return_type: self.type_ref(&Type::void()),
                },
            );
            self.append(&mut instrs, push);
            self.append(&mut instrs, Instruction::Return0);
            self.append(
                &mut instrs,
                Instruction::Call0(Reference::Location(Location::function(fnname))),
            );
        }

        // Swap the inline call for a queued one.
        let last = instrs
            .pop()
            .ok_or(CodegenError::NoResultLocation { at: 0 })?;
        let (returns_value, call_instr) = match last {
            Instruction::AssignEval { eval, .. } => (true, *eval),
            other => (false, other),
        };

        self.emit_position(&mut instrs, &d.pos);
        self.append(&mut instrs, Instruction::EnterContext);
        let pushcall = match call_instr {
            Instruction::Call0(f) => Instruction::PushCall0(f),
            Instruction::Call1(f, a) => Instruction::PushCall1(f, a),
            other => {
                return Err(CodegenError::UnresolvedNode(format!(
                    "defer of non-call instruction {:?}",
                    other.tag()
                )))
            }
        };

        if returns_value {
            let job = self.make_tmp(Some(&mut instrs));
            self.assign_eval(&mut instrs, job, pushcall);
            let ctx = self.make_tmp(Some(&mut instrs));
            self.assign_eval(&mut instrs, ctx, Instruction::PopContext);
        } else {
            self.append(&mut instrs, pushcall);
            self.append(&mut instrs, Instruction::PopContext);
        }
        Ok(instrs)
    }

    fn walk_binary(&mut self, b: &BinaryExpression) -> Result<Instructions, CodegenError> {
        if b.op == BinaryOp::NthRoot {
            return self.walk_nth_root(b);
        }

        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, b.left.pos());
        instrs.extend(self.walk_expression(&b.left)?);
        let left = self.last_loc(&instrs)?;

        let right_instrs = self.walk_expression(&b.right)?;
        let right = self.last_loc(&right_instrs)?;
        self.emit_position(&mut instrs, b.right.pos());
        instrs.extend(right_instrs);

        let l = Reference::Location(left);
        let r = Reference::Location(right);
        let (eval, negate) = match b.op {
            BinaryOp::And => (Instruction::And(l, r), false),
            BinaryOp::Or => (Instruction::Or(l, r), false),
            BinaryOp::Equals => (Instruction::IsEqual(l, r), false),
            BinaryOp::NotEquals => (Instruction::IsEqual(l, r), true),
            BinaryOp::Add => {
                if b.concatenation {
                    (Instruction::StringConcat(l, r), false)
                } else {
                    (Instruction::Plus(l, r), false)
                }
            }
            BinaryOp::Subtract => (Instruction::Minus(l, r), false),
            BinaryOp::Multiply => (Instruction::Times(l, r), false),
            BinaryOp::Divide => (Instruction::Divide(l, r), false),
            BinaryOp::Modulus => (Instruction::Mod(l, r), false),
            BinaryOp::Power => (Instruction::Power(l, r), false),
            BinaryOp::EnumConcat => (Instruction::EnumConcat(l, r), false),
            BinaryOp::Comparison(cmp) => (
                match cmp {
                    ComparisonOp::GreaterThan => Instruction::GreaterThan(l, r),
                    ComparisonOp::GreaterThanOrEqual => Instruction::GreaterThanOrEqual(l, r),
                    ComparisonOp::LessThan => Instruction::LessThan(l, r),
                    ComparisonOp::LessThanOrEqual => Instruction::LessThanOrEqual(l, r),
                },
                false,
            ),
            BinaryOp::NthRoot => unreachable!("handled above"),
        };

        self.emit_position(&mut instrs, &b.pos);
        let dest = self.make_tmp(Some(&mut instrs));
        self.assign_eval(&mut instrs, dest.clone(), eval);
        if negate {
            self.assign_eval(
                &mut instrs,
                dest.clone(),
                Instruction::Not(Reference::Location(dest)),
            );
        }
        Ok(instrs)
    }

    fn walk_nth_root(&mut self, b: &BinaryExpression) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, b.left.pos());
        instrs.extend(self.walk_expression(&b.left)?);
        let n = self.last_loc(&instrs)?;

        self.emit_position(&mut instrs, b.right.pos());
        instrs.extend(self.walk_expression(&b.right)?);
        let radicand = self.last_loc(&instrs)?;

        self.emit_position(&mut instrs, &b.pos);
        let curried = self.make_tmp(Some(&mut instrs));
        self.assign_eval(
            &mut instrs,
            curried.clone(),
            Instruction::Curry(
                Reference::Location(Location::function("NTH_ROOT")),
                Reference::Location(n),
            ),
        );
        let dest = self.make_tmp(Some(&mut instrs));
        self.assign_eval(
            &mut instrs,
            dest,
            Instruction::Call1(Reference::Location(curried), Reference::Location(radicand)),
        );
        Ok(instrs)
    }

    fn walk_unary(&mut self, u: &UnaryExpression) -> Result<Instructions, CodegenError> {
        let mut instrs = Vec::new();
        self.emit_position(&mut instrs, u.exp.pos());
        instrs.extend(self.walk_expression(&u.exp)?);
        let exp = self.last_loc(&instrs)?;

        let eval = match u.op {
            UnaryOp::Not => Instruction::Not(Reference::Location(exp)),
            UnaryOp::Negative => Instruction::Negative(Reference::Location(exp)),
        };
        self.emit_position(&mut instrs, &u.pos);
        let dest = self.make_tmp(Some(&mut instrs));
        self.assign_eval(&mut instrs, dest, eval);
        Ok(instrs)
    }
}

/// A view of the supported assignment destinations.
enum AssignDest<'n> {
    Identifier(&'n Identifier),
    EnumerableAccess(&'n EnumerableAccess),
    EnumerableAppend(&'n EnumerableAppend),
    MapAccess(&'n MapAccess),
    ClassAccess(&'n ClassAccess),
}

impl<'n> AssignDest<'n> {
    fn from_expression(expr: &'n Expression) -> Result<AssignDest<'n>, CodegenError> {
        Ok(match expr {
            Expression::Identifier(id) => AssignDest::Identifier(id),
            Expression::EnumerableAccess(e) => AssignDest::EnumerableAccess(e),
            Expression::EnumerableAppend(e) => AssignDest::EnumerableAppend(e),
            Expression::MapAccess(m) => AssignDest::MapAccess(m),
            Expression::ClassAccess(c) => AssignDest::ClassAccess(c),
            other => {
                return Err(CodegenError::UnresolvedNode(format!(
                    "unsupported assignment destination at {}",
                    other.pos()
                )))
            }
        })
    }
}

/// Locations an instruction reads (assignment destinations excluded).
fn read_locations(instr: &Instruction) -> Vec<Location> {
    match instr {
        Instruction::AssignValue { value, .. } => ref_locations(std::slice::from_ref(value)),
        Instruction::AssignEval { eval, .. } => read_locations(eval),
        Instruction::BeginFunction { .. }
        | Instruction::FunctionParam { .. }
        | Instruction::ScopeOf(_)
        | Instruction::Typify { .. }
        | Instruction::Lock(_)
        | Instruction::Unlock(_) => Vec::new(),
        other => ref_locations(&other.operands()),
    }
}

/// All shared-affinity locations an instruction touches, destinations
/// included.
fn shared_locations_of(instr: &Instruction) -> Vec<Location> {
    let mut out = match instr {
        Instruction::AssignValue { dest, value } => {
            let mut v = ref_locations(std::slice::from_ref(value));
            v.push(dest.clone());
            v
        }
        Instruction::AssignEval { dest, eval } => {
            let mut v = shared_locations_of(eval);
            v.push(dest.clone());
            v
        }
        Instruction::BeginFunction { .. }
        | Instruction::FunctionParam { .. }
        | Instruction::ScopeOf(_)
        | Instruction::Typify { .. }
        | Instruction::Lock(_)
        | Instruction::Unlock(_) => Vec::new(),
        other => ref_locations(&other.operands()),
    };
    out.retain(|l| l.affinity == Affinity::Shared);
    out.dedup();
    out
}

fn ref_locations(refs: &[Reference]) -> Vec<Location> {
    refs.iter()
        .filter_map(|r| r.as_location().cloned())
        .collect()
}
