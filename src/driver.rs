//! Two-pass compile driver.
//!
//! Pass 1 walks the statement list with an explicit, mutable index (`ENDR`
//! rewinds it), emitting bytes through [`RenderCtx`] and recording a patch
//! for every value that can't be resolved yet. Pass 2 walks the recorded
//! patches once the symbol table is complete and pokes in the final bytes.

use std::path::PathBuf;

use crate::arena::{Arena, DefKind, NodeId, NodeKind};
use crate::encoder;
use crate::error::{AsmError, Diagnostics, Pos, Result};
use crate::eval::{eval, eval_to_int, EvalCtx};
use crate::lexer::parse_numeric;
use crate::render::RenderCtx;
use crate::symtab::{self, Symtab};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileMode {
    #[default]
    None,
    Globals,
    All,
}

/// One completed profile window: a region of code bracketed by labels or
/// explicit `PROFILE`/`ENDPROFILE` directives.
#[derive(Debug, Clone)]
pub struct ProfileWindow {
    pub name: String,
    pub start_pc: i64,
    pub end_pc: i64,
    pub bytes: u64,
    pub cycles: u64,
}

pub struct CompileOptions {
    /// `-Dkey[=value]` seeds; a bare `-Dkey` defines `key` as an empty string.
    pub defines: Vec<(String, Option<String>)>,
    pub include_paths: Vec<PathBuf>,
    pub profile_mode: ProfileMode,
    /// `--profile-data`: fold `DB`/`DM`/`DW`/`DS`/`INCBIN` byte counts into
    /// the active profile window (they never contribute cycles).
    pub profile_data: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { defines: Vec::new(), include_paths: Vec::new(), profile_mode: ProfileMode::None, profile_data: false }
    }
}

pub struct CompileOutput {
    pub render: RenderCtx,
    pub diagnostics: Diagnostics,
    pub profiles: Vec<ProfileWindow>,
}

struct ReptFrame {
    total: i64,
    counter: i64,
    start_index: usize,
    var: Option<String>,
    pos: Pos,
}

struct CondFrame {
    /// Whether this branch (and every enclosing branch) is active.
    value: bool,
    /// This IF's own condition, ignoring outer state — needed to flip on ELSE.
    own_cond: bool,
    outer_allow: bool,
    taken_else: bool,
    pos: Pos,
}

/// Links a recorded [`render::Patch`] back to the expression node (and, if
/// the patch was created inside a `REPT` body, the suffix that iteration's
/// labels were defined under) that pass 2 must re-evaluate.
struct PatchSource {
    node: NodeId,
    rept_suffix: Option<String>,
}

struct Driver<'o> {
    opts: &'o CompileOptions,
    symtab: Symtab,
    render: RenderCtx,
    diagnostics: Diagnostics,
    patch_sources: Vec<PatchSource>,
    current_global_label: Option<String>,
    rept_stack: Vec<ReptFrame>,
    condition_stack: Vec<CondFrame>,
    current_profile: Option<ProfileWindow>,
    profiles: Vec<ProfileWindow>,
    profile_counter: usize,
}

pub fn compile(arena: &mut Arena, stmts: &[NodeId], opts: &CompileOptions) -> Result<CompileOutput> {
    let mut driver = Driver {
        opts,
        symtab: Symtab::new(),
        render: RenderCtx::new(),
        diagnostics: Diagnostics::new(),
        patch_sources: Vec::new(),
        current_global_label: None,
        rept_stack: Vec::new(),
        condition_stack: Vec::new(),
        current_profile: None,
        profiles: Vec::new(),
        profile_counter: 0,
    };
    driver.seed_defines(arena);
    tracing::debug!(statements = stmts.len(), "pass 1 start");
    driver.pass1(arena, stmts)?;
    driver.finish_unterminated()?;
    driver.close_profile_at_eof();
    tracing::debug!(patches = driver.render.patches.len(), "pass 1 complete");
    driver.pass2(arena)?;
    tracing::debug!("pass 2 complete");

    Ok(CompileOutput { render: driver.render, diagnostics: driver.diagnostics, profiles: driver.profiles })
}

impl<'o> Driver<'o> {
    fn seed_defines(&mut self, arena: &mut Arena) {
        for (key, value) in &self.opts.defines {
            match value {
                Some(v) => match parse_numeric(v) {
                    Some(i) => self.symtab.define_integer(arena, key, i, Pos::default()),
                    None => {
                        let node = arena.alloc(NodeKind::StringLiteral(v.clone()), Pos::default());
                        self.symtab.define_overwrite(key, node);
                    }
                },
                None => {
                    let node = arena.alloc(NodeKind::StringLiteral(String::new()), Pos::default());
                    self.symtab.define_overwrite(key, node);
                }
            }
        }
    }

    fn condition_allow(&self) -> bool {
        self.condition_stack.last().map(|f| f.value).unwrap_or(true)
    }

    fn current_rept_suffix(&self) -> Option<String> {
        if self.rept_stack.is_empty() {
            None
        } else {
            let counters: Vec<u32> = self.rept_stack.iter().map(|f| f.counter as u32).collect();
            Some(symtab::rept_suffix(&counters))
        }
    }

    fn pc(&self) -> Result<i64> {
        self.render.section().curr_pc().ok_or_else(|| AsmError::NoActiveSection { pos: Pos::default() })
    }

    fn eval_ctx(&self, pc: i64) -> EvalCtx<'_> {
        EvalCtx::new(&self.symtab, pc)
    }

    fn pass1(&mut self, arena: &mut Arena, stmts: &[NodeId]) -> Result<()> {
        let mut index = 0usize;
        while index < stmts.len() {
            let id = stmts[index];
            let pos = arena.get(id).pos.clone();
            let kind = arena.get(id).kind.clone();

            if !self.condition_allow() && !matches!(kind, NodeKind::Else | NodeKind::Endif) {
                index += 1;
                continue;
            }

            match kind {
                NodeKind::Label(name) => self.do_label(arena, &name, &pos)?,
                NodeKind::Equ { name, value } => {
                    let mut ctx = self.eval_ctx(0);
                    ctx.dollar_is_pc = false;
                    ctx.rept_suffix = self.current_rept_suffix().as_deref();
                    let v = eval(&mut ctx, arena, value)?;
                    self.symtab.define(arena, &name, v, &pos)?;
                }
                NodeKind::Section { name, base, fill } => self.do_section(arena, &name, base, fill, &pos)?,
                NodeKind::Org(e) => {
                    let pc = self.pc().unwrap_or(0);
                    let mut ctx = self.eval_ctx(pc);
                    ctx.rept_suffix = self.current_rept_suffix().as_deref();
                    let v = eval_to_int(&mut ctx, arena, e, "ORG")?;
                    self.render.reorg(v, &pos)?;
                }
                NodeKind::Def { kind, items } => self.do_def(arena, kind, &items, &pos)?,
                NodeKind::Incbin { path } => self.do_incbin(&path, &pos)?,
                NodeKind::Instr { mnemonic, args } => self.do_instr(arena, &mnemonic, &args, &pos)?,
                NodeKind::Rept { count, var } => {
                    self.do_rept(arena, stmts, &mut index, count, var, &pos)?;
                    continue;
                }
                NodeKind::Endr => {
                    if self.do_endr(arena, &mut index)? {
                        continue;
                    }
                }
                NodeKind::If(cond) => self.do_if(arena, cond, &pos)?,
                NodeKind::Else => self.do_else(&pos)?,
                NodeKind::Endif => self.do_endif(&pos)?,
                NodeKind::Profile { name } => self.do_profile(arena, name, &pos)?,
                NodeKind::EndProfile => self.do_endprofile(&pos),
                NodeKind::End => break,
                NodeKind::IntLiteral(_)
                | NodeKind::StringLiteral(_)
                | NodeKind::Dollar
                | NodeKind::Ident(_)
                | NodeKind::Simple(_)
                | NodeKind::Unary(_, _)
                | NodeKind::Binary(_, _, _)
                | NodeKind::List(_) => {
                    // bare expression statements don't occur from the parser; ignore defensively
                }
            }
            index += 1;
        }
        Ok(())
    }

    fn finish_unterminated(&self) -> Result<()> {
        if let Some(frame) = self.rept_stack.last() {
            return Err(AsmError::UnterminatedBlock { pos: frame.pos.clone(), kind: "REPT" });
        }
        if let Some(frame) = self.condition_stack.last() {
            return Err(AsmError::UnterminatedBlock { pos: frame.pos.clone(), kind: "IF" });
        }
        Ok(())
    }

    fn do_label(&mut self, arena: &mut Arena, raw_name: &str, pos: &Pos) -> Result<()> {
        let pc = self.pc()?;
        let mut full_name = symtab::expand_local(raw_name, self.current_global_label.as_deref(), pos)?;
        if let Some(suffix) = self.current_rept_suffix() {
            full_name.push_str(&suffix);
        }
        let value = arena.alloc(NodeKind::IntLiteral(pc), pos.clone());
        self.symtab.define(arena, &full_name, value, pos)?;

        if !raw_name.starts_with('.') {
            self.current_global_label = Some(raw_name.to_string());
        }

        let triggers_profile = match self.opts.profile_mode {
            ProfileMode::None => false,
            ProfileMode::Globals => !raw_name.starts_with('.'),
            ProfileMode::All => true,
        };
        if triggers_profile {
            self.close_profile(pc);
            self.open_profile(full_name, pc);
        }
        Ok(())
    }

    fn do_section(
        &mut self,
        arena: &mut Arena,
        name: &str,
        base: Option<NodeId>,
        fill: Option<NodeId>,
        pos: &Pos,
    ) -> Result<()> {
        if self.render.sections.iter().any(|s| s.name == name) {
            return Err(AsmError::DuplicateSection { pos: pos.clone(), name: name.to_string() });
        }
        let pc = self.pc().ok();
        let base_val = match base {
            Some(e) => {
                let mut ctx = self.eval_ctx(pc.unwrap_or(0));
                ctx.rept_suffix = self.current_rept_suffix().as_deref();
                Some(eval_to_int(&mut ctx, arena, e, "SECTION base")?)
            }
            None => pc,
        };
        let fill_val = match fill {
            Some(e) => {
                let mut ctx = self.eval_ctx(pc.unwrap_or(0));
                ctx.rept_suffix = self.current_rept_suffix().as_deref();
                let v = eval_to_int(&mut ctx, arena, e, "SECTION fill")?;
                if !(0..=0xFF).contains(&v) {
                    self.diagnostics.warn(pos.clone(), format!("SECTION fill value {v} truncated to 8 bits"));
                }
                (v & 0xFF) as u8
            }
            None => 0,
        };
        self.render.switch_section(name, base_val, Some(fill_val));
        Ok(())
    }

    fn do_def(&mut self, arena: &mut Arena, kind: DefKind, items: &[NodeId], pos: &Pos) -> Result<()> {
        match kind {
            DefKind::Db | DefKind::Dm => {
                for &item in items {
                    if let NodeKind::StringLiteral(s) = &arena.get(item).kind {
                        if s.len() != 1 {
                            self.render.bytes(s.as_bytes());
                            self.account_profile_bytes(s.len() as u64);
                            continue;
                        }
                    }
                    self.emit_def_value(arena, item, 1, pos)?;
                }
            }
            DefKind::Dw => {
                for &item in items {
                    self.emit_def_value(arena, item, 2, pos)?;
                }
            }
            DefKind::Ds => {
                let count_node = items.first().copied().ok_or_else(|| AsmError::Directive {
                    pos: pos.clone(),
                    message: "DS requires a count".into(),
                })?;
                let pc = self.pc()?;
                let mut ctx = self.eval_ctx(pc);
                ctx.rept_suffix = self.current_rept_suffix().as_deref();
                let count = eval_to_int(&mut ctx, arena, count_node, "DS count")?;
                let fill_node = items.get(1).copied();
                for _ in 0..count.max(0) {
                    match fill_node {
                        Some(f) => self.emit_def_value(arena, f, 1, pos)?,
                        None => {
                            self.render.byte(0);
                            self.account_profile_bytes(1);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_def_value(&mut self, arena: &mut Arena, item: NodeId, width: u8, pos: &Pos) -> Result<()> {
        let pc = self.pc()?;
        let mut ctx = self.eval_ctx(pc);
        ctx.rept_suffix = self.current_rept_suffix().as_deref();
        let evaluated = eval(&mut ctx, arena, item)?;
        match arena.get(evaluated).kind {
            NodeKind::IntLiteral(v) => {
                if width == 1 {
                    self.render.byte((v & 0xFF) as u8);
                } else {
                    self.render.word(v);
                }
            }
            _ => {
                let mnemonic = if width == 1 { "DB" } else { "DW" };
                self.render.push_patch(width, false, pc, mnemonic, pos);
                self.patch_sources.push(PatchSource { node: item, rept_suffix: self.current_rept_suffix() });
            }
        }
        self.account_profile_bytes(width as u64);
        Ok(())
    }

    fn do_incbin(&mut self, path: &str, pos: &Pos) -> Result<()> {
        let data = self.read_include_file(path).map_err(|e| match e {
            AsmError::Io(io) => AsmError::Directive {
                pos: pos.clone(),
                message: format!("can't read INCBIN file `{path}`: {io}"),
            },
            other => other,
        })?;
        let len = data.len() as u64;
        self.render.bytes(&data);
        self.account_profile_bytes(len);
        Ok(())
    }

    fn read_include_file(&self, path: &str) -> Result<Vec<u8>> {
        crate::fs::read_include_file(path, &self.opts.include_paths)
    }

    fn do_instr(&mut self, arena: &mut Arena, mnemonic: &str, args: &[NodeId], pos: &Pos) -> Result<()> {
        let pc = self.pc()?;
        let rept_suffix = self.current_rept_suffix();
        let mut ctx = self.eval_ctx(pc);
        ctx.rept_suffix = rept_suffix.as_deref();
        let encoded = encoder::encode(&mut ctx, arena, pos, mnemonic, args, pc)?;
        if ctx.arithmetic_happened && args.iter().any(|&a| arg_has_ambiguous_parens(arena, a)) {
            self.diagnostics.warn(
                pos.clone(),
                format!("`{mnemonic}` argument mixes outer parentheses with arithmetic; reference vs. expression is ambiguous"),
            );
        }

        let section = self.render.active;
        let cursor_before = self.render.section().cursor();

        self.render.bytes(&encoded.bytes);
        for p in &encoded.patches {
            self.render.patches.push(crate::render::Patch {
                section,
                offset: cursor_before + p.local_offset,
                width: p.width,
                is_relative: p.is_relative,
                instr_pc: p.instr_pc,
                mnemonic: mnemonic.to_string(),
                pos: pos.clone(),
            });
            self.patch_sources.push(PatchSource { node: p.node, rept_suffix: rept_suffix.clone() });
        }

        if let Some(w) = &mut self.current_profile {
            w.bytes += encoded.bytes.len() as u64;
            w.cycles += encoded.cycles as u64;
        }
        Ok(())
    }

    fn do_rept(
        &mut self,
        arena: &mut Arena,
        stmts: &[NodeId],
        index: &mut usize,
        count: NodeId,
        var: Option<String>,
        pos: &Pos,
    ) -> Result<()> {
        let pc = self.pc().unwrap_or(0);
        let mut ctx = self.eval_ctx(pc);
        ctx.rept_suffix = self.current_rept_suffix().as_deref();
        let total = eval_to_int(&mut ctx, arena, count, "REPT count")?;

        if total <= 0 {
            *index = find_matching_endr(arena, stmts, *index)? + 1;
            return Ok(());
        }

        if let Some(name) = &var {
            self.symtab.define_integer(arena, name, 0, pos.clone());
        }
        self.rept_stack.push(ReptFrame { total, counter: 0, start_index: *index, var, pos: pos.clone() });
        *index += 1;
        Ok(())
    }

    /// Returns `true` if the loop rewound (caller should `continue` without
    /// advancing `index` again).
    fn do_endr(&mut self, arena: &mut Arena, index: &mut usize) -> Result<bool> {
        let frame = self.rept_stack.last_mut().ok_or_else(|| AsmError::Syntax {
            pos: Pos::default(),
            message: "ENDR without matching REPT".into(),
        })?;
        frame.counter += 1;
        if frame.counter < frame.total {
            let (name, counter, start_index) = (frame.var.clone(), frame.counter, frame.start_index);
            if let Some(name) = name {
                self.symtab.define_integer(arena, &name, counter, Pos::default());
            }
            *index = start_index + 1;
            Ok(true)
        } else {
            let var = frame.var.clone();
            self.rept_stack.pop();
            if let Some(name) = var {
                self.symtab.remove(&name);
            }
            *index += 1;
            Ok(false)
        }
    }

    fn do_if(&mut self, arena: &mut Arena, cond: NodeId, pos: &Pos) -> Result<()> {
        let outer_allow = self.condition_allow();
        let own_cond = if outer_allow {
            let pc = self.pc().unwrap_or(0);
            let mut ctx = self.eval_ctx(pc);
            ctx.rept_suffix = self.current_rept_suffix().as_deref();
            eval_to_int(&mut ctx, arena, cond, "IF")? != 0
        } else {
            false
        };
        self.condition_stack.push(CondFrame {
            value: outer_allow && own_cond,
            own_cond,
            outer_allow,
            taken_else: false,
            pos: pos.clone(),
        });
        Ok(())
    }

    fn do_else(&mut self, pos: &Pos) -> Result<()> {
        let frame = self.condition_stack.last_mut().ok_or_else(|| AsmError::Syntax {
            pos: pos.clone(),
            message: "ELSE without matching IF".into(),
        })?;
        if frame.taken_else {
            return Err(AsmError::DuplicateElse { pos: pos.clone() });
        }
        frame.taken_else = true;
        frame.value = frame.outer_allow && !frame.own_cond;
        Ok(())
    }

    fn do_endif(&mut self, pos: &Pos) -> Result<()> {
        if self.condition_stack.pop().is_none() {
            return Err(AsmError::Syntax { pos: pos.clone(), message: "ENDIF without matching IF".into() });
        }
        Ok(())
    }

    fn do_profile(&mut self, arena: &mut Arena, name: Option<NodeId>, pos: &Pos) -> Result<()> {
        if self.opts.profile_mode != ProfileMode::None {
            self.diagnostics.warn(pos.clone(), "PROFILE directive ignored: CLI profiling mode is already active");
            return Ok(());
        }
        if self.current_profile.is_some() {
            self.diagnostics.warn(pos.clone(), "nested PROFILE block; closing the previous one implicitly");
            let pc = self.pc().unwrap_or(0);
            self.close_profile(pc);
        }
        let pc = self.pc()?;
        let profile_name = match name {
            Some(n) => {
                let mut ctx = self.eval_ctx(pc);
                ctx.rept_suffix = self.current_rept_suffix().as_deref();
                let v = eval(&mut ctx, arena, n)?;
                match &arena.get(v).kind {
                    NodeKind::StringLiteral(s) => s.clone(),
                    NodeKind::IntLiteral(i) => i.to_string(),
                    _ => self.next_profile_name(),
                }
            }
            None => self.next_profile_name(),
        };
        self.open_profile(profile_name, pc);
        Ok(())
    }

    fn do_endprofile(&mut self, pos: &Pos) {
        if self.opts.profile_mode != ProfileMode::None {
            self.diagnostics.warn(pos.clone(), "ENDPROFILE directive ignored: CLI profiling mode is already active");
            return;
        }
        let pc = self.pc().unwrap_or(0);
        if self.current_profile.is_none() {
            self.diagnostics.warn(pos.clone(), "ENDPROFILE without matching PROFILE");
            return;
        }
        self.close_profile(pc);
    }

    fn next_profile_name(&mut self) -> String {
        self.profile_counter += 1;
        format!("profile{}", self.profile_counter)
    }

    fn open_profile(&mut self, name: String, pc: i64) {
        self.current_profile = Some(ProfileWindow { name, start_pc: pc, end_pc: pc, bytes: 0, cycles: 0 });
    }

    fn close_profile(&mut self, pc: i64) {
        if let Some(mut w) = self.current_profile.take() {
            w.end_pc = pc;
            self.profiles.push(w);
        }
    }

    fn close_profile_at_eof(&mut self) {
        let pc = self.pc().unwrap_or(0);
        self.close_profile(pc);
    }

    fn account_profile_bytes(&mut self, n: u64) {
        if !self.opts.profile_data {
            return;
        }
        if let Some(w) = &mut self.current_profile {
            w.bytes += n;
        }
    }

    fn pass2(&mut self, arena: &mut Arena) -> Result<()> {
        let patches = self.render.patches.clone();
        for (patch, source) in patches.iter().zip(self.patch_sources.iter()) {
            let mut ctx = EvalCtx::new(&self.symtab, patch.instr_pc);
            ctx.rept_suffix = source.rept_suffix.as_deref();
            let value = eval_to_int(&mut ctx, arena, source.node, &patch.mnemonic)?;
            tracing::trace!(mnemonic = %patch.mnemonic, pc = patch.instr_pc, value, "patch resolved");
            self.render.apply_patch(patch, value)?;
        }
        Ok(())
    }
}

/// `(expr)` where `expr` is itself a binary/unary operation — ambiguous
/// between "memory reference" and "just grouped arithmetic". `(ix+d)`/
/// `(iy+d)` are excluded: that shape is a legitimate, unambiguous addressing
/// mode of its own.
fn arg_has_ambiguous_parens(arena: &Arena, id: NodeId) -> bool {
    let data = arena.get(id);
    if !data.is_reference {
        return false;
    }
    let inner = match &data.kind {
        NodeKind::Simple(inner) => *inner,
        _ => return false,
    };
    match &arena.get(inner).kind {
        NodeKind::Unary(_, _) => true,
        NodeKind::Binary(_, lhs, _) => !matches!(
            &arena.get(*lhs).kind,
            NodeKind::Ident(name) if name.eq_ignore_ascii_case("ix") || name.eq_ignore_ascii_case("iy")
        ),
        _ => false,
    }
}

/// Scan forward from a `REPT` statement (not inclusive) to its matching
/// `ENDR`, accounting for nested `REPT`/`ENDR` pairs.
fn find_matching_endr(arena: &Arena, stmts: &[NodeId], start: usize) -> Result<usize> {
    let mut depth = 1usize;
    let mut i = start + 1;
    while i < stmts.len() {
        match &arena.get(stmts[i]).kind {
            NodeKind::Rept { .. } => depth += 1,
            NodeKind::Endr => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(AsmError::UnterminatedBlock { pos: arena.get(stmts[start]).pos.clone(), kind: "REPT" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use pretty_assertions::assert_eq;

    fn compile_source(src: &str, opts: &CompileOptions) -> CompileOutput {
        let mut arena = Arena::new();
        let stmts = crate::parser::parse_source(&mut arena, src, "t.asm").unwrap();
        compile(&mut arena, &stmts, opts).unwrap()
    }

    #[test]
    fn test_org_and_label_forward_reference() {
        let out = compile_source(
            "ORG 0x8000\nstart: JR next\nNOP\nnext: RET\n",
            &CompileOptions::default(),
        );
        let bytes = &out.render.section().bytes;
        assert_eq!(bytes[0], 0x18); // JR
        assert_eq!(bytes[1], 1); // displacement to `next`
        assert_eq!(bytes[2], 0x00); // NOP
        assert_eq!(bytes[3], 0xC9); // RET
    }

    #[test]
    fn test_rept_with_loop_variable() {
        let out = compile_source("ORG 0\nREPT 3,i\nDB i\nENDR\n", &CompileOptions::default());
        assert_eq!(out.render.section().bytes, vec![0, 1, 2]);
    }

    #[test]
    fn test_rept_zero_skips_body() {
        let out = compile_source("ORG 0\nREPT 0\nNOP\nENDR\nHALT\n", &CompileOptions::default());
        assert_eq!(out.render.section().bytes, vec![0x76]); // only HALT
    }

    #[test]
    fn test_if_else_endif() {
        let out = compile_source("ORG 0\nX EQU 0\nIF X\nNOP\nELSE\nHALT\nENDIF\n", &CompileOptions::default());
        assert_eq!(out.render.section().bytes, vec![0x76]);
    }

    #[test]
    fn test_ds_with_fill() {
        let out = compile_source("ORG 0\nDS 4,0xAA\n", &CompileOptions::default());
        assert_eq!(out.render.section().bytes, vec![0xAA; 4]);
    }

    #[test]
    fn test_section_base_and_switch() {
        let out = compile_source(
            "SECTION code, base=0x4000\nORG 0x4000\nNOP\nSECTION data, base=0x8000\nORG 0x8000\nDB 1\n",
            &CompileOptions::default(),
        );
        assert_eq!(out.render.sections.len(), 2);
        assert_eq!(out.render.sections[0].start, Some(0x4000));
        assert_eq!(out.render.sections[1].start, Some(0x8000));
    }

    #[test]
    fn test_duplicate_section_is_error() {
        let mut arena = Arena::new();
        let stmts = crate::parser::parse_source(&mut arena, "SECTION code\nSECTION code\n", "t.asm").unwrap();
        assert!(compile(&mut arena, &stmts, &CompileOptions::default()).is_err());
    }

    #[test]
    fn test_local_label_scoping() {
        let out = compile_source("ORG 0\nfoo: NOP\n.loop: JR .loop\n", &CompileOptions::default());
        let bytes = &out.render.section().bytes;
        assert_eq!(bytes[1], 0x18);
        assert_eq!(bytes[2] as i8, -2); // JR .loop jumps to itself
    }

    #[test]
    fn test_profile_globals_mode() {
        let opts = CompileOptions { profile_mode: ProfileMode::Globals, ..CompileOptions::default() };
        let out = compile_source("ORG 0\nfoo: NOP\nNOP\nbar: HALT\n", &opts);
        assert_eq!(out.profiles.len(), 2);
        assert_eq!(out.profiles[0].name, "foo");
        assert_eq!(out.profiles[0].bytes, 2);
        assert_eq!(out.profiles[1].name, "bar");
        assert_eq!(out.profiles[1].bytes, 1);
    }

    #[test]
    fn test_unterminated_rept_is_error() {
        let mut arena = Arena::new();
        let stmts = crate::parser::parse_source(&mut arena, "ORG 0\nREPT 3\nNOP\n", "t.asm").unwrap();
        assert!(compile(&mut arena, &stmts, &CompileOptions::default()).is_err());
    }

    #[test]
    fn test_cli_seeded_define_as_integer() {
        let opts = CompileOptions {
            defines: vec![("FOO".to_string(), Some("5".to_string()))],
            ..CompileOptions::default()
        };
        let out = compile_source("ORG 0\nDB FOO\n", &opts);
        assert_eq!(out.render.section().bytes, vec![5]);
    }

    #[test]
    fn test_incbin_searches_include_paths() {
        let dir = tempfile::tempdir().unwrap();
        let inc_dir = dir.path().join("inc");
        std::fs::create_dir(&inc_dir).unwrap();
        std::fs::write(inc_dir.join("tune.bin"), [0x11, 0x22, 0x33]).unwrap();

        let opts = CompileOptions { include_paths: vec![inc_dir], ..CompileOptions::default() };
        let out = compile_source("ORG 0\nINCBIN \"tune.bin\"\n", &opts);
        assert_eq!(out.render.section().bytes, vec![0x11, 0x22, 0x33]);
    }

    #[test]
    fn test_incbin_missing_file_is_directive_error() {
        let mut arena = Arena::new();
        let stmts = crate::parser::parse_source(&mut arena, "ORG 0\nINCBIN \"nope.bin\"\n", "t.asm").unwrap();
        let err = compile(&mut arena, &stmts, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, AsmError::Directive { .. }));
    }
}
