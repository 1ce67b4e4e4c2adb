//! The bytecode interpreter: a stack machine driven by a [`Frame`]'s code,
//! operating over the scope stack (`context`) and garbage-collected heap
//! (`gc`), with calls resolved across three tiers (bound values, sibling
//! frames, native libraries).
//!
//! A single `while` loop walks an instruction pointer through a byte
//! array, dispatching on the opcode and consuming one operand byte where
//! `Opcode::has_operand` says so. `Frame` carries no parent pointer (see
//! `common::frame`), so name lookup that isn't satisfied by the scope
//! stack falls back to a scan of `frame_stack`, the chain of frames
//! currently executing — documented further in DESIGN.md.

use std::collections::HashMap;
use std::rc::Rc;

use log::trace;

use crate::common::ast::Privilege;
use crate::common::frame::Frame;
use crate::common::opcode::Opcode;
use crate::common::value::{Handle, HeapData, Value};
use crate::error::RuntimeError;
use crate::vm::context::{Binding, Context, ScopeLayer, Scopes};
use crate::vm::gc::Gc;
use crate::vm::library::{Library, LibraryManager};

/// Hard ceiling on the operand stack depth; exceeding it is a recursion
/// (or runaway expression) bug rather than a recoverable condition.
pub const STACK_MAX: usize = 2048;

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Float(n) => Some(Num::Float(*n)),
        _ => None,
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(n) => n as f64,
        Num::Float(n) => n,
    }
}

fn overflow() -> RuntimeError {
    RuntimeError::new("integer overflow")
}

pub struct VM {
    stack: Vec<Value>,
    scopes: Scopes,
    gc: Gc,
    natives: LibraryManager,
    /// The chain of frames currently executing, innermost last. Doubles as
    /// both the call stack (for recursion depth) and the lookup path for a
    /// function/class name that isn't bound as a scope value.
    frame_stack: Vec<Rc<Frame>>,
    /// Values pulled off `stack` (or otherwise not yet reachable from
    /// `stack`/`scopes`) that a multi-step opcode or helper is still
    /// assembling into something — an array/table/instance being built, a
    /// call's argument list, a class's accumulated member bindings. Rooted
    /// alongside `stack`/`scopes` by `maybe_collect` so a collection
    /// triggered mid-assembly can't sweep them. `pin`/`unpin` bracket the
    /// window a value needs this; see DESIGN.md.
    pinned: Vec<Value>,
}

impl Default for VM {
    fn default() -> VM {
        VM::new()
    }
}

impl VM {
    pub fn new() -> VM {
        let mut natives = LibraryManager::new();
        natives.register(io_library());
        natives.register(data_structure_library());
        natives.register(math_library());
        VM { stack: Vec::new(), scopes: Scopes::new(), gc: Gc::new(), natives, frame_stack: Vec::new(), pinned: Vec::new() }
    }

    /// Pins `values` against collection and returns a mark to pass to
    /// [`VM::unpin`] once they're reachable some other way (pushed to the
    /// stack, bound in a scope, or folded into an already-pinned container).
    fn pin(&mut self, values: impl IntoIterator<Item = Value>) -> usize {
        let mark = self.pinned.len();
        self.pinned.extend(values);
        mark
    }

    fn unpin(&mut self, mark: usize) {
        self.pinned.truncate(mark);
    }

    /// Runs a program's root frame to completion, returning its final value
    /// (the value of a trailing `Return`, or `Nil` if execution falls off
    /// the end). The root frame's own scope persists across calls so a REPL
    /// can feed successive frames through the same `VM`.
    pub fn interpret(&mut self, root: Rc<Frame>) -> Result<Value, RuntimeError> {
        let depth = self.frame_stack.len();
        self.frame_stack.push(root.clone());
        let result = self.execute(&root);
        self.frame_stack.truncate(depth);
        result
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= STACK_MAX {
            return Err(RuntimeError::new("stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(|| RuntimeError::new("stack underflow"))
    }

    /// Collects if over threshold, rooting `self.pinned` alongside the
    /// operand stack and scope chain — see the field doc on `pinned`.
    fn maybe_collect(&mut self) {
        if self.gc.should_collect() {
            let owned_roots = self.scopes.gc_roots();
            let mut roots: Vec<&Value> = self.stack.iter().collect();
            roots.extend(owned_roots.iter());
            roots.extend(self.pinned.iter());
            self.gc.collect(&roots);
        }
    }

    pub fn alloc_str(&mut self, s: String) -> Handle {
        self.maybe_collect();
        self.gc.alloc_str(s)
    }

    pub fn alloc_array(&mut self, items: Vec<Value>) -> Handle {
        let mark = self.pin(items.iter().cloned());
        self.maybe_collect();
        self.unpin(mark);
        self.gc.alloc_array(items)
    }

    pub fn alloc_table(&mut self, entries: Vec<(Value, Value)>) -> Handle {
        let mark = self.pin(entries.iter().flat_map(|(k, v)| [k.clone(), v.clone()]));
        self.maybe_collect();
        self.unpin(mark);
        self.gc.alloc_table(entries)
    }

    fn alloc_instance(&mut self, fields: HashMap<String, Binding>) -> Handle {
        let mark = self.pin(fields.values().map(|b| b.value.clone()));
        self.maybe_collect();
        self.unpin(mark);
        self.gc.alloc_instance(fields)
    }

    pub fn str_contents(&self, handle: Handle) -> String {
        match self.gc.get(handle) {
            HeapData::Str(s) => s.clone(),
            _ => String::new(),
        }
    }

    pub fn gc(&self) -> &Gc {
        &self.gc
    }

    /// Structural equality used by `GetIndex`/`SetIndex` table lookups and
    /// `Eq`/`Ne`. Strings compare by content, everything heap-addressed
    /// otherwise compares by handle identity.
    fn value_eq(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Nil, Value::Nil) => true,
            (Value::Str(x), Value::Str(y)) => {
                x == y || self.str_contents(*x) == self.str_contents(*y)
            }
            (Value::Array(x), Value::Array(y)) => x == y,
            (Value::Table(x), Value::Table(y)) => x == y,
            (Value::Instance(x), Value::Instance(y)) => x == y,
            _ => false,
        }
    }

    pub fn display_value(&self, value: &Value) -> String {
        match value {
            Value::Int(n) => n.to_string(),
            Value::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{n:.1}")
                } else {
                    n.to_string()
                }
            }
            Value::Bool(b) => b.to_string(),
            Value::Nil => "nil".to_string(),
            Value::Str(h) => self.str_contents(*h),
            Value::Array(h) => match self.gc.get(*h) {
                HeapData::Array(items) => {
                    let parts: Vec<String> = items.iter().map(|v| self.display_value(v)).collect();
                    format!("[{}]", parts.join(", "))
                }
                _ => "[]".to_string(),
            },
            Value::Table(h) => match self.gc.get(*h) {
                HeapData::Table(entries) => {
                    let parts: Vec<String> =
                        entries.iter().map(|(k, v)| format!("{}: {}", self.display_value(k), self.display_value(v))).collect();
                    format!("{{{}}}", parts.join(", "))
                }
                _ => "{}".to_string(),
            },
            Value::Instance(_) => "<instance>".to_string(),
            Value::Reference(name) => format!("&{name}"),
            Value::Function(_) => "<function>".to_string(),
            Value::NativeFunction { name, .. } => format!("<native {name}>"),
        }
    }

    fn resolve_function_frame(&self, name: &str) -> Option<Rc<Frame>> {
        self.frame_stack.iter().rev().find_map(|frame| frame.functions.get(name).cloned())
    }

    fn resolve_class_frame(&self, name: &str) -> Option<Rc<Frame>> {
        self.frame_stack.iter().rev().find_map(|frame| frame.classes.get(name).cloned())
    }

    /// Dereferences `name`, following a `Value::Reference` chain to its
    /// ultimate binding so references read transparently. Falls back to
    /// instantiating a no-argument class when `name` names a
    /// class rather than a bound value, matching `new ClassName` without
    /// parentheses being accepted anywhere a bare identifier is.
    fn resolve_var(&mut self, name: &str) -> Result<Value, RuntimeError> {
        if let Some(mut value) = self.scopes.get(name, &self.gc) {
            let mut hops = 0;
            while let Value::Reference(target) = value {
                hops += 1;
                if hops > 64 {
                    return Err(RuntimeError::new("reference cycle"));
                }
                value = self
                    .scopes
                    .get(&target, &self.gc)
                    .ok_or_else(|| RuntimeError::new(format!("undefined variable '{target}'")))?;
            }
            return Ok(value);
        }
        if self.resolve_class_frame(name).is_some() {
            return self.new_class(name, Vec::new());
        }
        Err(RuntimeError::new(format!("undefined variable '{name}'")))
    }

    /// Instantiates `class_name`: flattens each parent's own flattened
    /// member set into the new instance's bindings (the first parent is
    /// additionally bound under `"base"`), adds this class's own methods,
    /// allocates the instance, then runs its constructor (if any) with
    /// `this` bound to it.
    ///
    /// An instance never chains to an enclosing scope, it just owns a flat
    /// member map.
    fn new_class(&mut self, class_name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let frame = self
            .resolve_class_frame(class_name)
            .ok_or_else(|| RuntimeError::new(format!("undefined class '{class_name}'")))?;

        // `args`, each parent's flattened fields, and the member-init
        // results all live only in local `Vec`/`HashMap`s until they land
        // in the instance `alloc_instance` produces — none of that is
        // reachable from `stack`/`scopes` yet, so it has to stay pinned for
        // this whole call (a member initializer or the constructor body can
        // allocate and trigger a collection at any point in between).
        // `unpin` runs unconditionally below (not via `?`) so an error
        // partway through `construct_class` can't leak a permanent pin.
        let pin_mark = self.pin(args.iter().cloned());
        let result = self.construct_class(frame, class_name, args);
        self.unpin(pin_mark);
        result
    }

    fn construct_class(&mut self, frame: Rc<Frame>, class_name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let mut bindings: HashMap<String, Binding> = HashMap::new();
        for (i, parent_name) in frame.parents.iter().enumerate() {
            let parent_value = self.new_class(parent_name, Vec::new())?;
            self.pinned.push(parent_value.clone());
            if let Value::Instance(parent_handle) = &parent_value {
                if let HeapData::Instance(parent_fields) = self.gc.get(*parent_handle) {
                    let parent_fields = parent_fields.clone();
                    for (k, v) in parent_fields {
                        self.pinned.push(v.clone());
                        bindings.insert(k, v);
                    }
                }
            }
            if i == 0 {
                bindings.insert("base".to_string(), Binding { privilege: Privilege::Immutable, value: parent_value });
            }
        }

        self.scopes.push_lexical(Context::new())?;
        let depth = self.frame_stack.len();
        self.frame_stack.push(frame.clone());
        let exec_result = self.execute(&frame);
        self.frame_stack.truncate(depth);
        let member_layer = self.scopes.pop();
        exec_result?;

        if let Some(ScopeLayer::Lexical(ctx)) = member_layer {
            for (name, binding) in ctx.iter() {
                self.pinned.push(binding.value.clone());
                bindings.insert(name.clone(), binding.clone());
            }
        }
        for (name, method_frame) in &frame.methods {
            if name != "new" {
                bindings.insert(
                    name.clone(),
                    Binding { privilege: Privilege::Immutable, value: Value::Function(method_frame.clone()) },
                );
            }
        }

        let handle = self.alloc_instance(bindings);
        let instance = Value::Instance(handle);
        self.pinned.push(instance.clone());

        match frame.methods.get("new") {
            Some(ctor) => {
                self.call_frame(ctor.clone(), args, Some(handle))?;
            }
            None if !args.is_empty() => {
                return Err(RuntimeError::new(format!("class '{class_name}' takes no constructor arguments")));
            }
            None => {}
        }

        Ok(instance)
    }

    fn call_value(&mut self, value: Value, args: Vec<Value>, this_handle: Option<Handle>) -> Result<Value, RuntimeError> {
        match value {
            Value::Function(f) => self.call_frame(f, args, this_handle),
            Value::NativeFunction { func, .. } => (func)(self, &args),
            other => Err(RuntimeError::new(format!("cannot call a {}", other.type_name()))),
        }
    }

    /// Binds `args` (and `this`, if given) into a fresh [`Context`] for
    /// `frame`. Pinned by the caller for this call's duration: `args` lives
    /// only in this local `ctx` until `push_lexical` makes it
    /// scope-reachable, and the var-arg branch allocates (`alloc_array`)
    /// before that happens.
    fn bind_call_context(&mut self, frame: &Frame, args: &[Value], this_handle: Option<Handle>) -> Result<Context, RuntimeError> {
        let mut ctx = Context::new();
        if let Some(handle) = this_handle {
            ctx.force_define("this", Privilege::Immutable, Value::Instance(handle));
        }

        let positional = if frame.var_arg { frame.params.len().saturating_sub(1) } else { frame.params.len() };
        if !frame.var_arg && args.len() != frame.params.len() {
            return Err(RuntimeError::new(format!("expected {} argument(s), found {}", frame.params.len(), args.len())));
        }
        if frame.var_arg && args.len() < positional {
            return Err(RuntimeError::new(format!("expected at least {} argument(s), found {}", positional, args.len())));
        }
        for (param, value) in frame.params.iter().take(positional).zip(args.iter()) {
            ctx.define(&param.descriptor.name, Privilege::Mutable, value.clone())
                .map_err(|_| RuntimeError::new(format!("duplicate parameter name '{}'", param.descriptor.name)))?;
        }
        if frame.var_arg {
            let rest_name = frame.params.last().expect("var_arg frame has a var-arg parameter").descriptor.name.clone();
            let rest_items: Vec<Value> = args[positional..].to_vec();
            let handle = self.alloc_array(rest_items);
            ctx.define(&rest_name, Privilege::Mutable, Value::Array(handle))
                .map_err(|_| RuntimeError::new(format!("duplicate parameter name '{rest_name}'")))?;
        }
        Ok(ctx)
    }

    fn call_frame(&mut self, frame: Rc<Frame>, args: Vec<Value>, this_handle: Option<Handle>) -> Result<Value, RuntimeError> {
        let mut pinned = args.clone();
        if let Some(handle) = this_handle {
            pinned.push(Value::Instance(handle));
        }
        let pin_mark = self.pin(pinned);
        let ctx = self.bind_call_context(&frame, &args, this_handle);
        self.unpin(pin_mark);
        let ctx = ctx?;

        self.scopes.push_lexical(ctx)?;
        let depth = self.frame_stack.len();
        self.frame_stack.push(frame.clone());
        let result = self.execute(&frame);
        self.frame_stack.truncate(depth);
        self.scopes.pop();
        result
    }

    /// Resolves and invokes `name` against an argument list already popped
    /// off the stack, trying (in order): a scope-bound value (covers
    /// lambdas and instance methods reached through `GetClass`), a sibling
    /// frame visible from the current call chain, then the native library
    /// registry.
    fn function_call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let this_handle = self.scopes.innermost_instance();
        if let Some(value) = self.scopes.get(name, &self.gc) {
            return self.call_value(value, args, this_handle);
        }
        if let Some(frame) = self.resolve_function_frame(name) {
            return self.call_frame(frame, args, this_handle);
        }
        if let Some(native) = self.natives.get(name) {
            return (native)(self, &args);
        }
        Err(RuntimeError::new(format!("undefined function '{name}'")))
    }

    fn get_index(&self, base: &Value, index: &Value) -> Result<Value, RuntimeError> {
        match base {
            Value::Array(h) => match self.gc.get(*h) {
                HeapData::Array(items) => {
                    let i = expect_int(index)?;
                    if i < 0 || i as usize >= items.len() {
                        return Err(RuntimeError::new(format!("array index {i} out of bounds (len {})", items.len())));
                    }
                    Ok(items[i as usize].clone())
                }
                _ => unreachable!("array handle does not point at array data"),
            },
            Value::Table(h) => match self.gc.get(*h) {
                HeapData::Table(entries) => {
                    Ok(entries.iter().find(|(k, _)| self.value_eq(k, index)).map(|(_, v)| v.clone()).unwrap_or(Value::Nil))
                }
                _ => unreachable!("table handle does not point at table data"),
            },
            other => Err(RuntimeError::new(format!("cannot index a {}", other.type_name()))),
        }
    }

    fn set_index(&mut self, base: &Value, index: Value, value: Value) -> Result<(), RuntimeError> {
        match base {
            Value::Array(h) => {
                let i = expect_int(&index)?;
                let HeapData::Array(items) = self.gc.get_mut(*h) else {
                    unreachable!("array handle does not point at array data")
                };
                if i < 0 || i as usize >= items.len() {
                    return Err(RuntimeError::new(format!("array index {i} out of bounds (len {})", items.len())));
                }
                items[i as usize] = value;
                Ok(())
            }
            Value::Table(h) => {
                let pos = match self.gc.get(*h) {
                    HeapData::Table(entries) => entries.iter().position(|(k, _)| self.value_eq(k, &index)),
                    _ => unreachable!("table handle does not point at table data"),
                };
                let HeapData::Table(entries) = self.gc.get_mut(*h) else {
                    unreachable!("table handle does not point at table data")
                };
                match pos {
                    Some(i) => entries[i].1 = value,
                    None => entries.push((index, value)),
                }
                Ok(())
            }
            other => Err(RuntimeError::new(format!("cannot index a {}", other.type_name()))),
        }
    }

    fn unary(&mut self, opcode: Opcode) -> Result<(), RuntimeError> {
        let v = self.pop()?;
        let result = match (opcode, &v) {
            (Opcode::Neg, Value::Int(n)) => Value::Int(n.checked_neg().ok_or_else(overflow)?),
            (Opcode::Neg, Value::Float(n)) => Value::Float(-n),
            (Opcode::Not, Value::Bool(b)) => Value::Bool(!b),
            (Opcode::BitNot, Value::Int(n)) => Value::Int(!n),
            _ => return Err(RuntimeError::new(format!("cannot apply {opcode:?} to a {}", v.type_name()))),
        };
        self.push(result)
    }

    /// `Add`/`Sub`/`Mul`/`Div`/`Mod`: numeric with int/float promotion, plus
    /// `Add` on two strings as concatenation. `Mod` is numeric (not
    /// integer-only) to match the optimizer's constant folding of float
    /// modulus (see DESIGN.md) — the optimizer-soundness property requires
    /// folded and unfolded programs to behave identically.
    ///
    /// `compile::infix` emits the right operand before the left one (see
    /// DESIGN.md), so the left operand is the one popped first here.
    fn numeric_binary(&mut self, opcode: Opcode) -> Result<(), RuntimeError> {
        let a = self.pop()?;
        let b = self.pop()?;
        if opcode == Opcode::Add {
            if let (Value::Str(x), Value::Str(y)) = (&a, &b) {
                let concatenated = format!("{}{}", self.str_contents(*x), self.str_contents(*y));
                let handle = self.alloc_str(concatenated);
                return self.push(Value::Str(handle));
            }
        }
        match (as_num(&a), as_num(&b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => {
                let result = match opcode {
                    Opcode::Add => x.checked_add(y).ok_or_else(overflow)?,
                    Opcode::Sub => x.checked_sub(y).ok_or_else(overflow)?,
                    Opcode::Mul => x.checked_mul(y).ok_or_else(overflow)?,
                    Opcode::Div => {
                        if y == 0 {
                            return Err(RuntimeError::new("division by zero"));
                        }
                        x.checked_div(y).ok_or_else(overflow)?
                    }
                    Opcode::Mod => {
                        if y == 0 {
                            return Err(RuntimeError::new("modulus by zero"));
                        }
                        x.checked_rem(y).ok_or_else(overflow)?
                    }
                    _ => unreachable!(),
                };
                self.push(Value::Int(result))
            }
            (Some(x), Some(y)) => {
                let (x, y) = (as_f64(x), as_f64(y));
                let result = match opcode {
                    Opcode::Add => x + y,
                    Opcode::Sub => x - y,
                    Opcode::Mul => x * y,
                    Opcode::Div => x / y,
                    Opcode::Mod => x % y,
                    _ => unreachable!(),
                };
                self.push(Value::Float(result))
            }
            _ => Err(RuntimeError::new(format!("cannot apply {opcode:?} to {} and {}", a.type_name(), b.type_name()))),
        }
    }

    fn bitwise_binary(&mut self, opcode: Opcode) -> Result<(), RuntimeError> {
        let a = self.pop()?;
        let b = self.pop()?;
        let (x, y) = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => (*x, *y),
            _ => return Err(RuntimeError::new(format!("{opcode:?} requires two integers, found {} and {}", a.type_name(), b.type_name()))),
        };
        let result = match opcode {
            Opcode::BitAnd => x & y,
            Opcode::BitOr => x | y,
            Opcode::BitXor => x ^ y,
            Opcode::Shl => x.checked_shl(y as u32).ok_or_else(overflow)?,
            Opcode::Shr => x.checked_shr(y as u32).ok_or_else(overflow)?,
            _ => unreachable!(),
        };
        self.push(Value::Int(result))
    }

    fn logical_binary(&mut self, opcode: Opcode) -> Result<(), RuntimeError> {
        let a = self.pop()?;
        let b = self.pop()?;
        let (x, y) = match (&a, &b) {
            (Value::Bool(x), Value::Bool(y)) => (*x, *y),
            _ => return Err(RuntimeError::new(format!("{opcode:?} requires two booleans, found {} and {}", a.type_name(), b.type_name()))),
        };
        let result = match opcode {
            Opcode::And => x && y,
            Opcode::Or => x || y,
            _ => unreachable!(),
        };
        self.push(Value::Bool(result))
    }

    fn compare(&mut self, opcode: Opcode) -> Result<(), RuntimeError> {
        let a = self.pop()?;
        let b = self.pop()?;
        let result = match opcode {
            Opcode::Eq => self.value_eq(&a, &b),
            Opcode::Ne => !self.value_eq(&a, &b),
            _ => {
                let ordering = match (as_num(&a), as_num(&b)) {
                    (Some(x), Some(y)) => as_f64(x).partial_cmp(&as_f64(y)),
                    _ => return Err(RuntimeError::new(format!("cannot order {} and {}", a.type_name(), b.type_name()))),
                }
                .ok_or_else(|| RuntimeError::new("cannot order NaN"))?;
                use std::cmp::Ordering::*;
                match opcode {
                    Opcode::Lt => ordering == Less,
                    Opcode::Le => ordering != Greater,
                    Opcode::Gt => ordering == Greater,
                    Opcode::Ge => ordering != Less,
                    _ => unreachable!(),
                }
            }
        };
        self.push(Value::Bool(result))
    }

    /// Runs `frame`'s bytecode from offset zero until a `Return` (which
    /// pops and yields the top of the operand stack) or the end of the
    /// instruction stream (which yields `Nil`).
    fn execute(&mut self, frame: &Frame) -> Result<Value, RuntimeError> {
        let mut ip = 0usize;
        loop {
            if ip >= frame.code.len() {
                return Ok(Value::Nil);
            }
            let opcode = Opcode::from_byte(frame.code[ip]).ok_or_else(|| RuntimeError::new("invalid opcode"))?;
            ip += 1;
            let operand = if opcode.has_operand() {
                let byte = *frame.code.get(ip).ok_or_else(|| RuntimeError::new("truncated instruction"))?;
                ip += 1;
                Some(byte)
            } else {
                None
            };
            trace!("ip={ip} op={opcode:?} operand={operand:?} stack_depth={}", self.stack.len());

            match opcode {
                Opcode::PushInt => self.push(Value::Int(frame.ints[operand.unwrap() as usize]))?,
                Opcode::PushFloat => self.push(Value::Float(frame.floats[operand.unwrap() as usize]))?,
                Opcode::PushStr => {
                    let s = frame.strings[operand.unwrap() as usize].clone();
                    let handle = self.alloc_str(s);
                    self.push(Value::Str(handle))?;
                }
                Opcode::PushTrue => self.push(Value::Bool(true))?,
                Opcode::PushFalse => self.push(Value::Bool(false))?,
                Opcode::PushNil => self.push(Value::Nil)?,
                Opcode::Pop => {
                    self.pop()?;
                }

                Opcode::NewArray => {
                    let n = frame.ints[operand.unwrap() as usize] as usize;
                    let mut items = Vec::with_capacity(n);
                    for _ in 0..n {
                        items.push(self.pop()?);
                    }
                    items.reverse();
                    let handle = self.alloc_array(items);
                    self.push(Value::Array(handle))?;
                }
                Opcode::NewTable => {
                    let n = frame.ints[operand.unwrap() as usize] as usize;
                    let mut pairs = Vec::with_capacity(n);
                    for _ in 0..n {
                        let value = self.pop()?;
                        let key = self.pop()?;
                        pairs.push((key, value));
                    }
                    pairs.reverse();
                    let handle = self.alloc_table(pairs);
                    self.push(Value::Table(handle))?;
                }
                Opcode::NewFunction => {
                    let key = frame.strings[operand.unwrap() as usize].clone();
                    let child = frame
                        .functions
                        .get(&key)
                        .cloned()
                        .ok_or_else(|| RuntimeError::new(format!("undefined function frame '{key}'")))?;
                    self.push(Value::Function(child))?;
                }
                Opcode::NewClass => {
                    let class_name = frame.strings[operand.unwrap() as usize].clone();
                    let argcount = expect_non_negative(self.pop()?)?;
                    let mut args = Vec::with_capacity(argcount);
                    for _ in 0..argcount {
                        args.push(self.pop()?);
                    }
                    args.reverse();
                    let instance = self.new_class(&class_name, args)?;
                    self.push(instance)?;
                }

                Opcode::Neg | Opcode::Not | Opcode::BitNot => self.unary(opcode)?,
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => self.numeric_binary(opcode)?,
                Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor | Opcode::Shl | Opcode::Shr => self.bitwise_binary(opcode)?,
                Opcode::Gt | Opcode::Lt | Opcode::Ge | Opcode::Le | Opcode::Eq | Opcode::Ne => self.compare(opcode)?,
                Opcode::And | Opcode::Or => self.logical_binary(opcode)?,

                Opcode::DefineVar => {
                    let name = frame.strings[operand.unwrap() as usize].clone();
                    let value = self.pop()?;
                    self.scopes.define(&name, Privilege::Mutable, value, &mut self.gc)?;
                }
                Opcode::DefineConst => {
                    let name = frame.strings[operand.unwrap() as usize].clone();
                    let value = self.pop()?;
                    self.scopes.define(&name, Privilege::Immutable, value, &mut self.gc)?;
                }
                Opcode::SetVar => {
                    let name = frame.strings[operand.unwrap() as usize].clone();
                    let value = self.pop()?;
                    self.scopes.set(&name, value, &mut self.gc)?;
                }
                Opcode::GetVar => {
                    let name = frame.strings[operand.unwrap() as usize].clone();
                    let value = self.resolve_var(&name)?;
                    self.push(value)?;
                }

                Opcode::GetIndex => {
                    let index = self.pop()?;
                    let base = self.pop()?;
                    let result = self.get_index(&base, &index)?;
                    self.push(result)?;
                }
                Opcode::SetIndex => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let base = self.pop()?;
                    self.set_index(&base, index, value.clone())?;
                    self.push(value)?;
                }

                Opcode::GetClass => {
                    let target = self.pop()?;
                    match target {
                        Value::Instance(handle) => self.scopes.push_instance(handle)?,
                        other => return Err(RuntimeError::new(format!("cannot access a member of a {}", other.type_name()))),
                    }
                }
                Opcode::EndGetClass => {
                    self.scopes.pop();
                }

                Opcode::EnterScope => self.scopes.push_lexical(Context::new())?,
                Opcode::ExitScope => {
                    self.scopes.pop();
                }

                Opcode::Jump => ip = frame.ints[operand.unwrap() as usize] as usize,
                Opcode::JumpIfFalse => {
                    let cond = self.pop()?;
                    if !cond.is_truthy() {
                        ip = frame.ints[operand.unwrap() as usize] as usize;
                    }
                }

                Opcode::FunctionCall => {
                    let name = frame.strings[operand.unwrap() as usize].clone();
                    let argcount = expect_non_negative(self.pop()?)?;
                    let mut args = Vec::with_capacity(argcount);
                    for _ in 0..argcount {
                        args.push(self.pop()?);
                    }
                    args.reverse();
                    let result = self.function_call(&name, args)?;
                    self.push(result)?;
                }
                Opcode::Condition => {
                    let cond = self.pop()?;
                    let then_val = self.pop()?;
                    let else_val = self.pop()?;
                    self.push(if cond.is_truthy() { then_val } else { else_val })?;
                }
                Opcode::Ref => {
                    let name = frame.strings[operand.unwrap() as usize].clone();
                    self.push(Value::Reference(name))?;
                }
                Opcode::Return => return self.pop(),

                Opcode::Break | Opcode::Continue => {
                    return Err(RuntimeError::new("internal error: break/continue reached the VM"));
                }
            }
        }
    }
}

fn expect_int(v: &Value) -> Result<i64, RuntimeError> {
    match v {
        Value::Int(n) => Ok(*n),
        other => Err(RuntimeError::new(format!("expected an integer index, found {}", other.type_name()))),
    }
}

fn expect_non_negative(v: Value) -> Result<usize, RuntimeError> {
    match v {
        Value::Int(n) if n >= 0 => Ok(n as usize),
        other => Err(RuntimeError::new(format!("expected a non-negative argument count, found {}", other.type_name()))),
    }
}

/// The `IO` library: `println(fmt, ...)` substitutes each `{}` in `fmt`
/// with the next argument's display form (an unfilled placeholder prints
/// `nil`).
fn io_library() -> Library {
    let mut lib = Library::new("IO");
    lib.add("println", |vm: &mut VM, args: &[Value]| {
        if args.is_empty() {
            println!();
            return Ok(Value::Nil);
        }
        let fmt = match &args[0] {
            Value::Str(h) => vm.str_contents(*h),
            other => return Err(RuntimeError::new(format!("println expects a format string, found {}", other.type_name()))),
        };
        let mut rest = args[1..].iter();
        let mut out = String::new();
        let mut chars = fmt.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '{' && chars.peek() == Some(&'}') {
                chars.next();
                let value = rest.next().cloned().unwrap_or(Value::Nil);
                out.push_str(&vm.display_value(&value));
            } else {
                out.push(c);
            }
        }
        println!("{out}");
        Ok(Value::Nil)
    });
    lib
}

/// The `DataStructure` library: `sizeof`, plus the internal `rest`-slicing
/// helper that backs destructuring's trailing `...rest` binder (see
/// `compiler::compile`).
fn data_structure_library() -> Library {
    let mut lib = Library::new("DataStructure");
    lib.add("sizeof", |vm: &mut VM, args: &[Value]| {
        let value = args.first().cloned().ok_or_else(|| RuntimeError::new("sizeof expects one argument"))?;
        let size = match value {
            Value::Str(h) => vm.str_contents(h).chars().count(),
            Value::Array(h) => match vm.gc().get(h) {
                HeapData::Array(items) => items.len(),
                _ => 0,
            },
            Value::Table(h) => match vm.gc().get(h) {
                HeapData::Table(entries) => entries.len(),
                _ => 0,
            },
            other => return Err(RuntimeError::new(format!("sizeof does not support {}", other.type_name()))),
        };
        Ok(Value::Int(size as i64))
    });
    lib.add("DataStructure.rest", |vm: &mut VM, args: &[Value]| {
        let (array, from) = match (args.first(), args.get(1)) {
            (Some(Value::Array(h)), Some(Value::Int(from))) => (*h, *from),
            _ => return Err(RuntimeError::new("DataStructure.rest expects (array, fromIndex)")),
        };
        let items = match vm.gc().get(array) {
            HeapData::Array(items) => items.clone(),
            _ => Vec::new(),
        };
        let from = from.max(0) as usize;
        let tail = if from < items.len() { items[from..].to_vec() } else { Vec::new() };
        let handle = vm.alloc_array(tail);
        Ok(Value::Array(handle))
    });
    lib
}

/// The `Math` library: `factorial`, the native backing the postfix `!`
/// operator for values the optimizer couldn't fold at compile time.
fn math_library() -> Library {
    let mut lib = Library::new("Math");
    lib.add("Math.factorial", |_vm: &mut VM, args: &[Value]| {
        let n = match args.first() {
            Some(Value::Int(n)) => *n,
            other => {
                return Err(RuntimeError::new(format!(
                    "factorial expects an integer, found {}",
                    other.map(Value::type_name).unwrap_or("nothing")
                )))
            }
        };
        if n < 0 {
            return Err(RuntimeError::new("factorial of a negative number is undefined"));
        }
        let mut acc: i64 = 1;
        for i in 2..=n {
            acc = acc.checked_mul(i).ok_or_else(overflow)?;
        }
        Ok(Value::Int(acc))
    });
    lib
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::ast::{Expr, ExprKind, Literal, Stmt, StmtKind};
    use crate::common::token::{Token, TokenKind};
    use crate::compiler::compile::Compiler;

    fn tok() -> Token {
        Token::new(TokenKind::End, "".to_string(), 1)
    }

    fn lit(lit: Literal) -> Expr {
        Expr::new(ExprKind::Literal(lit), tok())
    }

    fn program(stmts: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::Program(stmts), tok())
    }

    fn expect_int(result: Result<Value, RuntimeError>) -> i64 {
        match result.expect("interprets without error") {
            Value::Int(n) => n,
            other => panic!("expected an int, found {other:?}"),
        }
    }

    #[test]
    fn executes_arithmetic_expression() {
        let left = Expr::new(ExprKind::Infix { op: crate::common::ast::InfixOp::Mul, left: Box::new(lit(Literal::Int(2))), right: Box::new(lit(Literal::Int(3))) }, tok());
        let sum = Expr::new(ExprKind::Infix { op: crate::common::ast::InfixOp::Add, left: Box::new(lit(Literal::Int(1))), right: Box::new(left) }, tok());
        let ret = Stmt::new(StmtKind::Return(Some(sum)), tok());
        let ast = program(vec![ret]);
        let frame = Compiler::compile(&ast).expect("compiles");

        let mut vm = VM::new();
        let result = vm.interpret(std::rc::Rc::new(frame));
        assert_eq!(expect_int(result), 7);
    }

    #[test]
    fn defines_and_reads_a_variable() {
        use crate::common::ast::{Binder, VarDescriptor};
        let decl = Stmt::new(
            StmtKind::VarDecl {
                privilege: Privilege::Mutable,
                bindings: vec![(Binder::Simple(VarDescriptor { name: "x".into(), type_desc: None }), Some(lit(Literal::Int(7))))],
            },
            tok(),
        );
        let ident = Expr::new(ExprKind::Identifier("x".into()), tok());
        let ret = Stmt::new(StmtKind::Return(Some(ident)), tok());
        let ast = program(vec![decl, ret]);
        let frame = Compiler::compile(&ast).expect("compiles");

        let mut vm = VM::new();
        let result = vm.interpret(std::rc::Rc::new(frame));
        assert_eq!(expect_int(result), 7);
    }

    #[test]
    fn calls_a_native_function() {
        let call = Expr::new(
            ExprKind::Call { callee: Box::new(Expr::new(ExprKind::Identifier("Math.factorial".into()), tok())), args: vec![lit(Literal::Int(5))] },
            tok(),
        );
        let ret = Stmt::new(StmtKind::Return(Some(call)), tok());
        let ast = program(vec![ret]);
        let frame = Compiler::compile(&ast).expect("compiles");

        let mut vm = VM::new();
        let result = vm.interpret(std::rc::Rc::new(frame));
        assert_eq!(expect_int(result), 120);
    }
}
