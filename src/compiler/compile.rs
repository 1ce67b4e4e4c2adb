//! Lowers an optimized AST into a [`Frame`] tree of bytecode. One `Frame`
//! is built per program root, function/lambda body, and class body;
//! nested constructs recurse into fresh frames linked into the parent's
//! `functions`/`classes` tables.

use std::rc::Rc;

use crate::common::ast::{
    Binder, Expr, ExprKind, InfixOp, Literal, Param, PrefixOp, Privilege, Stmt, StmtKind,
};
use crate::common::frame::Frame;
use crate::common::opcode::Opcode;
use crate::error::CompileError;

/// Per-loop bookkeeping so `break`/`continue` can patch their jump targets
/// once the loop's bounds are known. `break`/`continue` compile to real
/// jump opcodes rather than being rejected outside a loop at parse time,
/// matching how every other structured-jump construct (`if`, `while`) is
/// already opcode-based.
struct LoopScope {
    break_patches: Vec<u8>,
    continue_patches: Vec<u8>,
}

pub struct Compiler {
    synthetic_counter: usize,
}

impl Compiler {
    pub fn compile(program: &Stmt) -> Result<Frame, CompileError> {
        let mut compiler = Compiler { synthetic_counter: 0 };
        let mut frame = Frame::new();
        let stmts = match &program.kind {
            StmtKind::Program(stmts) => stmts,
            _ => std::slice::from_ref(program),
        };
        let mut loops = Vec::new();
        for stmt in stmts {
            compiler.stmt(&mut frame, stmt, &mut loops)?;
        }
        Ok(frame)
    }

    fn fresh_synthetic(&mut self) -> String {
        let name = format!("$call{}", self.synthetic_counter);
        self.synthetic_counter += 1;
        name
    }

    fn stmt(&mut self, frame: &mut Frame, stmt: &Stmt, loops: &mut Vec<LoopScope>) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Noop => Ok(()),
            StmtKind::Expr(expr) => {
                self.expr(frame, expr)?;
                frame.code.push(Opcode::Pop as u8);
                Ok(())
            }
            StmtKind::VarDecl { privilege, bindings } => {
                for (binder, init) in bindings {
                    match init {
                        Some(init) => self.expr(frame, init)?,
                        None => frame.code.push(Opcode::PushNil as u8),
                    }
                    self.bind(frame, binder, *privilege)?;
                }
                Ok(())
            }
            StmtKind::Return(expr) => {
                match expr {
                    Some(expr) => self.expr(frame, expr)?,
                    None => frame.code.push(Opcode::PushNil as u8),
                }
                frame.code.push(Opcode::Return as u8);
                Ok(())
            }
            StmtKind::If { cond, then, otherwise } => {
                self.expr(frame, cond)?;
                frame.code.push(Opcode::JumpIfFalse as u8);
                let else_slot = frame.reserve_jump_target();
                frame.code.push(else_slot);
                self.stmt(frame, then, loops)?;
                if let Some(otherwise) = otherwise {
                    frame.code.push(Opcode::Jump as u8);
                    let end_slot = frame.reserve_jump_target();
                    frame.code.push(end_slot);
                    frame.patch_jump_target(else_slot, frame.here());
                    self.stmt(frame, otherwise, loops)?;
                    frame.patch_jump_target(end_slot, frame.here());
                } else {
                    frame.patch_jump_target(else_slot, frame.here());
                }
                Ok(())
            }
            StmtKind::Block(stmts) => {
                frame.code.push(Opcode::EnterScope as u8);
                for stmt in stmts {
                    self.stmt(frame, stmt, loops)?;
                }
                frame.code.push(Opcode::ExitScope as u8);
                Ok(())
            }
            StmtKind::While { cond, body, increment } => {
                let loop_start = frame.here();
                self.expr(frame, cond)?;
                frame.code.push(Opcode::JumpIfFalse as u8);
                let end_slot = frame.reserve_jump_target();
                frame.code.push(end_slot);

                loops.push(LoopScope { break_patches: Vec::new(), continue_patches: Vec::new() });
                self.stmt(frame, body, loops)?;
                let loop_scope = loops.pop().expect("loop scope pushed above");

                let continue_target = frame.here();
                if let Some(increment) = increment {
                    self.stmt(frame, increment, loops)?;
                }
                frame.code.push(Opcode::Jump as u8);
                let back_slot = frame.reserve_jump_target();
                frame.patch_jump_target(back_slot, loop_start);
                frame.code.push(back_slot);

                frame.patch_jump_target(end_slot, frame.here());
                for patch in loop_scope.break_patches {
                    frame.patch_jump_target(patch, frame.here());
                }
                for patch in loop_scope.continue_patches {
                    frame.patch_jump_target(patch, continue_target);
                }
                Ok(())
            }
            StmtKind::Break => {
                let scope = loops
                    .last_mut()
                    .ok_or_else(|| CompileError::new(stmt.token.line, "'break' outside a loop"))?;
                frame.code.push(Opcode::Jump as u8);
                let slot = frame.reserve_jump_target();
                scope.break_patches.push(slot);
                frame.code.push(slot);
                Ok(())
            }
            StmtKind::Continue => {
                let scope = loops
                    .last_mut()
                    .ok_or_else(|| CompileError::new(stmt.token.line, "'continue' outside a loop"))?;
                frame.code.push(Opcode::Jump as u8);
                let slot = frame.reserve_jump_target();
                scope.continue_patches.push(slot);
                frame.code.push(slot);
                Ok(())
            }
            StmtKind::Enum { name, variants } => {
                // Desugars to a table literal mapping variant name to its
                // ordinal, bound immutably under the enum's own name.
                let entries: Vec<(Expr, Expr)> = variants
                    .iter()
                    .enumerate()
                    .map(|(i, variant)| {
                        (
                            Expr::new(ExprKind::Literal(Literal::Str(variant.clone())), stmt.token.clone()),
                            Expr::new(ExprKind::Literal(Literal::Int(i as i64)), stmt.token.clone()),
                        )
                    })
                    .collect();
                self.compile_dict(frame, &entries)?;
                frame.code.push(Opcode::DefineVar as u8);
                let idx = frame.add_string(name.clone());
                frame.code.push(idx);
                Ok(())
            }
            StmtKind::Function { name, params, body } => {
                let child = self.compile_function(params, body)?;
                frame.functions.insert(name.clone(), Rc::new(child));
                Ok(())
            }
            StmtKind::Class { name, parents, members, methods, constructors, enums } => {
                let child = self.compile_class(parents, members, methods, constructors, enums)?;
                frame.classes.insert(name.clone(), Rc::new(child));
                Ok(())
            }
            StmtKind::Module { name: _, body } => {
                // A module is a namespace-less grouping; its statements
                // compile directly into the surrounding frame and
                // introduce no runtime scope of their own.
                for stmt in body {
                    self.stmt(frame, stmt, loops)?;
                }
                Ok(())
            }
            StmtKind::Program(stmts) => {
                for stmt in stmts {
                    self.stmt(frame, stmt, loops)?;
                }
                Ok(())
            }
        }
    }

    fn bind(&mut self, frame: &mut Frame, binder: &Binder, privilege: Privilege) -> Result<(), CompileError> {
        match binder {
            Binder::Simple(descriptor) => {
                frame.code.push(Opcode::DefineVar as u8);
                let idx = frame.add_string(descriptor.name.clone());
                frame.code.push(idx);
                Ok(())
            }
            Binder::Destructure { elements, rest } => {
                // The initializer (an array) is on the stack. Each named
                // element is pulled out by plain indexing; the rest (if
                // named) is sliced out through a native call below.
                let synthetic = self.fresh_synthetic();
                frame.code.push(Opcode::DefineVar as u8);
                let idx = frame.add_string(synthetic.clone());
                frame.code.push(idx);

                for (i, descriptor) in elements.iter().enumerate() {
                    frame.code.push(Opcode::GetVar as u8);
                    let sidx = frame.add_string(synthetic.clone());
                    frame.code.push(sidx);
                    frame.code.push(Opcode::PushInt as u8);
                    let iidx = frame.add_int(i as i64);
                    frame.code.push(iidx);
                    frame.code.push(Opcode::GetIndex as u8);
                    frame.code.push(Opcode::DefineVar as u8);
                    let nidx = frame.add_string(descriptor.name.clone());
                    frame.code.push(nidx);
                }
                if let Some(rest) = rest {
                    // Slicing isn't expressible through plain indexing, so
                    // the tail is pulled out through the same native that
                    // backs variadic parameter collection (vm::vm's
                    // `DataStructure.rest`).
                    frame.code.push(Opcode::GetVar as u8);
                    let sidx = frame.add_string(synthetic);
                    frame.code.push(sidx);
                    frame.code.push(Opcode::PushInt as u8);
                    let iidx = frame.add_int(elements.len() as i64);
                    frame.code.push(iidx);
                    frame.code.push(Opcode::PushInt as u8);
                    let aidx = frame.add_int(2);
                    frame.code.push(aidx);
                    frame.code.push(Opcode::FunctionCall as u8);
                    let fidx = frame.add_string("DataStructure.rest");
                    frame.code.push(fidx);
                    frame.code.push(Opcode::DefineVar as u8);
                    let nidx = frame.add_string(rest.name.clone());
                    frame.code.push(nidx);
                }
                let _ = privilege; // destructured bindings are always mutable locals
                Ok(())
            }
        }
    }

    fn compile_function(&mut self, params: &[Param], body: &[Stmt]) -> Result<Frame, CompileError> {
        let mut child = Frame::new();
        child.params = params.to_vec();
        child.var_arg = params.last().map(|p| p.var_arg).unwrap_or(false);
        let mut loops = Vec::new();
        for stmt in body {
            self.stmt(&mut child, stmt, &mut loops)?;
        }
        child.code.push(Opcode::PushNil as u8);
        child.code.push(Opcode::Return as u8);
        Ok(child)
    }

    fn compile_class(
        &mut self,
        parents: &[String],
        members: &[Stmt],
        methods: &[Stmt],
        constructors: &[Stmt],
        enums: &[Stmt],
    ) -> Result<Frame, CompileError> {
        let mut child = Frame::new();
        child.parents = parents.to_vec();
        let mut loops = Vec::new();
        for stmt in enums.iter().chain(members.iter()) {
            self.stmt(&mut child, stmt, &mut loops)?;
        }
        for method in methods {
            if let StmtKind::Function { name, params, body } = &method.kind {
                let method_frame = self.compile_function(params, body)?;
                child.methods.insert(name.clone(), Rc::new(method_frame));
            }
        }
        if let Some(ctor) = constructors.first() {
            if let StmtKind::Function { params, body, .. } = &ctor.kind {
                let ctor_frame = self.compile_function(params, body)?;
                child.methods.insert("new".to_string(), Rc::new(ctor_frame));
            }
        }
        Ok(child)
    }

    fn expr(&mut self, frame: &mut Frame, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Literal(lit) => self.literal(frame, lit),
            ExprKind::Identifier(name) => {
                frame.code.push(Opcode::GetVar as u8);
                let idx = frame.add_string(name.clone());
                frame.code.push(idx);
                Ok(())
            }
            ExprKind::VarDescriptor(descriptor) => {
                frame.code.push(Opcode::GetVar as u8);
                let idx = frame.add_string(descriptor.name.clone());
                frame.code.push(idx);
                Ok(())
            }
            ExprKind::Prefix { op, right } => {
                self.expr(frame, right)?;
                frame.code.push(match op {
                    PrefixOp::Neg => Opcode::Neg,
                    PrefixOp::Not => Opcode::Not,
                    PrefixOp::BitNot => Opcode::BitNot,
                } as u8);
                Ok(())
            }
            ExprKind::Factorial { left } => {
                // No dedicated opcode for postfix `!`; lowers to a native
                // call so the VM's arithmetic loop stays table-driven.
                self.expr(frame, left)?;
                frame.code.push(Opcode::PushInt as u8);
                let idx = frame.add_int(1);
                frame.code.push(idx);
                frame.code.push(Opcode::FunctionCall as u8);
                let nidx = frame.add_string("Math.factorial");
                frame.code.push(nidx);
                Ok(())
            }
            ExprKind::Infix { op, left, right } => self.infix(frame, *op, left, right),
            ExprKind::Conditional { cond, then, otherwise } => {
                self.expr(frame, cond)?;
                frame.code.push(Opcode::JumpIfFalse as u8);
                let else_slot = frame.reserve_jump_target();
                frame.code.push(else_slot);
                self.expr(frame, then)?;
                frame.code.push(Opcode::Jump as u8);
                let end_slot = frame.reserve_jump_target();
                frame.code.push(end_slot);
                frame.patch_jump_target(else_slot, frame.here());
                self.expr(frame, otherwise)?;
                frame.patch_jump_target(end_slot, frame.here());
                Ok(())
            }
            ExprKind::Index { target, index } => {
                self.expr(frame, target)?;
                self.expr(frame, index)?;
                frame.code.push(Opcode::GetIndex as u8);
                Ok(())
            }
            ExprKind::Member { target, name } => {
                self.expr(frame, target)?;
                frame.code.push(Opcode::GetClass as u8);
                let idx = frame.add_string(name.clone());
                frame.code.push(idx);
                frame.code.push(Opcode::GetVar as u8);
                frame.code.push(idx);
                frame.code.push(Opcode::EndGetClass as u8);
                Ok(())
            }
            ExprKind::Call { callee, args } => self.call(frame, callee, args),
            ExprKind::Lambda { params, body } => {
                let child = self.compile_function(params, body)?;
                frame.code.push(Opcode::NewFunction as u8);
                let key = self.fresh_synthetic();
                frame.functions.insert(key.clone(), Rc::new(child));
                let idx = frame.add_string(key);
                frame.code.push(idx);
                Ok(())
            }
            ExprKind::Array(items) => {
                for item in items {
                    self.expr(frame, item)?;
                }
                frame.code.push(Opcode::NewArray as u8);
                let idx = frame.add_int(items.len() as i64);
                frame.code.push(idx);
                Ok(())
            }
            ExprKind::Dict(entries) => self.compile_dict(frame, entries),
            ExprKind::Group(inner) => self.expr(frame, inner),
            ExprKind::Ref(inner) => {
                match &inner.kind {
                    ExprKind::Identifier(name) => {
                        frame.code.push(Opcode::Ref as u8);
                        let idx = frame.add_string(name.clone());
                        frame.code.push(idx);
                        Ok(())
                    }
                    _ => Err(CompileError::new(expr.token.line, "'ref' requires a plain identifier")),
                }
            }
            ExprKind::NewCall { class_name, args } => {
                for arg in args {
                    self.expr(frame, arg)?;
                }
                frame.code.push(Opcode::PushInt as u8);
                let aidx = frame.add_int(args.len() as i64);
                frame.code.push(aidx);
                frame.code.push(Opcode::NewClass as u8);
                let idx = frame.add_string(class_name.clone());
                frame.code.push(idx);
                Ok(())
            }
            ExprKind::NewStruct { class_name, fields } => {
                // The freshly built instance is stashed in a synthetic local
                // so each field's value expression can be computed (and can
                // itself reference other locals) without disturbing the
                // instance's position on the stack.
                frame.code.push(Opcode::PushInt as u8);
                let aidx = frame.add_int(0);
                frame.code.push(aidx);
                frame.code.push(Opcode::NewClass as u8);
                let cidx = frame.add_string(class_name.clone());
                frame.code.push(cidx);

                let synthetic = self.fresh_synthetic();
                frame.code.push(Opcode::DefineVar as u8);
                let sidx = frame.add_string(synthetic);
                frame.code.push(sidx);

                for (name, value) in fields {
                    frame.code.push(Opcode::GetVar as u8);
                    frame.code.push(sidx);
                    frame.code.push(Opcode::GetClass as u8);
                    let nidx = frame.add_string(name.clone());
                    frame.code.push(nidx);
                    self.expr(frame, value)?;
                    frame.code.push(Opcode::SetVar as u8);
                    frame.code.push(nidx);
                    frame.code.push(Opcode::EndGetClass as u8);
                }

                frame.code.push(Opcode::GetVar as u8);
                frame.code.push(sidx);
                Ok(())
            }
            ExprKind::This => {
                frame.code.push(Opcode::GetVar as u8);
                let idx = frame.add_string("this");
                frame.code.push(idx);
                Ok(())
            }
            ExprKind::Base { name } => {
                frame.code.push(Opcode::GetVar as u8);
                let bidx = frame.add_string("base");
                frame.code.push(bidx);
                frame.code.push(Opcode::GetClass as u8);
                let nidx = frame.add_string(name.clone());
                frame.code.push(nidx);
                frame.code.push(Opcode::GetVar as u8);
                frame.code.push(nidx);
                frame.code.push(Opcode::EndGetClass as u8);
                Ok(())
            }
            ExprKind::Compound { stmts, tail } => {
                frame.code.push(Opcode::EnterScope as u8);
                let mut loops = Vec::new();
                for stmt in stmts {
                    self.stmt(frame, stmt, &mut loops)?;
                }
                self.expr(frame, tail)?;
                frame.code.push(Opcode::ExitScope as u8);
                Ok(())
            }
            ExprKind::StructLiteral(fields) => {
                let entries: Vec<(Expr, Expr)> = fields
                    .iter()
                    .map(|(name, value)| {
                        (Expr::new(ExprKind::Literal(Literal::Str(name.clone())), expr.token.clone()), value.clone())
                    })
                    .collect();
                self.compile_dict(frame, &entries)
            }
            ExprKind::VarArg(name) => {
                frame.code.push(Opcode::GetVar as u8);
                let idx = frame.add_string(name.clone());
                frame.code.push(idx);
                Ok(())
            }
        }
    }

    fn literal(&mut self, frame: &mut Frame, lit: &Literal) -> Result<(), CompileError> {
        match lit {
            Literal::Int(v) => {
                frame.code.push(Opcode::PushInt as u8);
                let idx = frame.add_int(*v);
                frame.code.push(idx);
            }
            Literal::Float(v) => {
                frame.code.push(Opcode::PushFloat as u8);
                let idx = frame.add_float(*v);
                frame.code.push(idx);
            }
            Literal::Bool(true) => frame.code.push(Opcode::PushTrue as u8),
            Literal::Bool(false) => frame.code.push(Opcode::PushFalse as u8),
            Literal::Str(s) => {
                frame.code.push(Opcode::PushStr as u8);
                let idx = frame.add_string(s.clone());
                frame.code.push(idx);
            }
            Literal::Nil => frame.code.push(Opcode::PushNil as u8),
        }
        Ok(())
    }

    fn compile_dict(&mut self, frame: &mut Frame, entries: &[(Expr, Expr)]) -> Result<(), CompileError> {
        for (key, value) in entries {
            self.expr(frame, key)?;
            self.expr(frame, value)?;
        }
        frame.code.push(Opcode::NewTable as u8);
        let idx = frame.add_int(entries.len() as i64);
        frame.code.push(idx);
        Ok(())
    }

    fn call(&mut self, frame: &mut Frame, callee: &Expr, args: &[Expr]) -> Result<(), CompileError> {
        for arg in args {
            self.expr(frame, arg)?;
        }
        frame.code.push(Opcode::PushInt as u8);
        let aidx = frame.add_int(args.len() as i64);
        frame.code.push(aidx);

        match &callee.kind {
            ExprKind::Identifier(name) => {
                frame.code.push(Opcode::FunctionCall as u8);
                let idx = frame.add_string(name.clone());
                frame.code.push(idx);
            }
            ExprKind::Member { target, name } => {
                self.expr(frame, target)?;
                frame.code.push(Opcode::GetClass as u8);
                let idx = frame.add_string(name.clone());
                frame.code.push(idx);
                frame.code.push(Opcode::FunctionCall as u8);
                frame.code.push(idx);
                frame.code.push(Opcode::EndGetClass as u8);
            }
            _ => {
                self.expr(frame, callee)?;
                let synthetic = self.fresh_synthetic();
                frame.code.push(Opcode::DefineVar as u8);
                let sidx = frame.add_string(synthetic.clone());
                frame.code.push(sidx);
                frame.code.push(Opcode::FunctionCall as u8);
                frame.code.push(sidx);
            }
        }
        Ok(())
    }

    fn infix(&mut self, frame: &mut Frame, op: InfixOp, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        if op.is_assign() {
            return self.assign(frame, op, left, right);
        }
        // The right operand is compiled (and its side effects evaluated)
        // before the left one; the corresponding VM binary-op handlers pop
        // the left operand first to match. See DESIGN.md.
        self.expr(frame, right)?;
        self.expr(frame, left)?;
        frame.code.push(infix_opcode(op) as u8);
        Ok(())
    }

    fn assign(&mut self, frame: &mut Frame, op: InfixOp, target: &Expr, right: &Expr) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Identifier(name) => {
                if let Some(underlying) = op.underlying() {
                    // Right operand compiled (and evaluated) before left,
                    // matching plain `infix`'s convention; see DESIGN.md.
                    self.expr(frame, right)?;
                    frame.code.push(Opcode::GetVar as u8);
                    let idx = frame.add_string(name.clone());
                    frame.code.push(idx);
                    frame.code.push(infix_opcode(underlying) as u8);
                } else {
                    self.expr(frame, right)?;
                }
                frame.code.push(Opcode::SetVar as u8);
                let idx = frame.add_string(name.clone());
                frame.code.push(idx);
                // Assignment is itself an expression; the compiler
                // convention throughout this file is "every expr leaves
                // exactly one value", so re-read the just-assigned value.
                frame.code.push(Opcode::GetVar as u8);
                frame.code.push(idx);
                Ok(())
            }
            ExprKind::Index { target: base, index } => {
                self.expr(frame, base)?;
                self.expr(frame, index)?;
                if let Some(underlying) = op.underlying() {
                    // Right operand evaluated before the current indexed
                    // value is re-read, matching plain `infix`'s left/right
                    // pop order; see DESIGN.md.
                    self.expr(frame, right)?;
                    self.expr(frame, base)?;
                    self.expr(frame, index)?;
                    frame.code.push(Opcode::GetIndex as u8);
                    frame.code.push(infix_opcode(underlying) as u8);
                } else {
                    self.expr(frame, right)?;
                }
                frame.code.push(Opcode::SetIndex as u8);
                Ok(())
            }
            ExprKind::Member { target: base, name } => {
                self.expr(frame, base)?;
                frame.code.push(Opcode::GetClass as u8);
                let idx = frame.add_string(name.clone());
                frame.code.push(idx);
                if let Some(underlying) = op.underlying() {
                    // Right operand evaluated before the current member
                    // value is re-read, matching plain `infix`'s left/right
                    // pop order; see DESIGN.md.
                    self.expr(frame, right)?;
                    frame.code.push(Opcode::GetVar as u8);
                    frame.code.push(idx);
                    frame.code.push(infix_opcode(underlying) as u8);
                } else {
                    self.expr(frame, right)?;
                }
                frame.code.push(Opcode::SetVar as u8);
                frame.code.push(idx);
                frame.code.push(Opcode::GetVar as u8);
                frame.code.push(idx);
                frame.code.push(Opcode::EndGetClass as u8);
                Ok(())
            }
            _ => Err(CompileError::new(target.token.line, "invalid assignment target")),
        }
    }
}

fn infix_opcode(op: InfixOp) -> Opcode {
    match op {
        InfixOp::Add => Opcode::Add,
        InfixOp::Sub => Opcode::Sub,
        InfixOp::Mul => Opcode::Mul,
        InfixOp::Div => Opcode::Div,
        InfixOp::Mod => Opcode::Mod,
        InfixOp::BitAnd => Opcode::BitAnd,
        InfixOp::BitOr => Opcode::BitOr,
        InfixOp::BitXor => Opcode::BitXor,
        InfixOp::Shl => Opcode::Shl,
        InfixOp::Shr => Opcode::Shr,
        InfixOp::Lt => Opcode::Lt,
        InfixOp::Le => Opcode::Le,
        InfixOp::Gt => Opcode::Gt,
        InfixOp::Ge => Opcode::Ge,
        InfixOp::Eq => Opcode::Eq,
        InfixOp::Ne => Opcode::Ne,
        // Non-short-circuiting: both operands are always fully evaluated
        // before `And`/`Or` runs.
        InfixOp::And => Opcode::And,
        InfixOp::Or => Opcode::Or,
        InfixOp::Assign
        | InfixOp::AddAssign
        | InfixOp::SubAssign
        | InfixOp::MulAssign
        | InfixOp::DivAssign
        | InfixOp::ModAssign
        | InfixOp::AndAssign
        | InfixOp::OrAssign
        | InfixOp::XorAssign
        | InfixOp::ShlAssign
        | InfixOp::ShrAssign => unreachable!("assignment ops are handled by Compiler::assign"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compiler::lex::Lexer;
    use crate::compiler::optimize::optimize;
    use crate::compiler::parse::Parser;

    fn compile_source(source: &str) -> Frame {
        let tokens = Lexer::lex(source).unwrap();
        let program = Parser::parse(tokens).unwrap();
        let program = optimize(program, true);
        Compiler::compile(&program).unwrap()
    }

    #[test]
    fn compiles_arithmetic_expression_statement() {
        let frame = compile_source("1 + 2;");
        assert!(frame.code.contains(&(Opcode::Add as u8)));
        assert!(frame.code.ends_with(&[Opcode::Pop as u8]));
    }

    #[test]
    fn compiles_var_decl() {
        let frame = compile_source("let x = 5;");
        assert!(frame.code.contains(&(Opcode::DefineVar as u8)));
        assert_eq!(frame.ints, vec![5]);
    }

    #[test]
    fn compiles_while_with_break() {
        let frame = compile_source("while(true) { break; }");
        assert!(frame.code.contains(&(Opcode::Jump as u8)));
    }

    #[test]
    fn rejects_break_outside_loop() {
        let tokens = Lexer::lex("break;").unwrap();
        let program = Parser::parse(tokens).unwrap();
        assert!(Compiler::compile(&program).is_err());
    }

    #[test]
    fn compiles_function_decl_into_functions_table() {
        let frame = compile_source("function add(a, b) { return a + b; }");
        assert!(frame.functions.contains_key("add"));
    }
}
