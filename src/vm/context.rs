//! Lexical scope and class-instance member bindings.
//!
//! The VM owns one bounded `Vec<ScopeLayer>` (depth ≤ `SCOPE_STACK_MAX`)
//! instead of a linked list of heap-allocated scopes — see DESIGN.md for
//! why the fixed stack was chosen over `Rc`-linked contexts.
//!
//! A class instance's member set lives in the GC heap (`HeapData::Instance`,
//! see `common::value`), not as a scope-stack entry of its own: while a
//! member is being read or written, the stack instead holds a
//! [`ScopeLayer::Instance`] pointing at the instance's handle, and lookups
//! are served straight out of the heap. This lets a method recurse into the
//! same instance (`this.method()` calling itself) without losing writes the
//! way a clone-on-push/write-back-on-pop scheme would. Lookups stop once
//! they've searched an instance layer: member lookup never leaks into the
//! caller's own scope.

use std::collections::HashMap;

use crate::common::ast::Privilege;
use crate::common::value::{Handle, HeapData, Value};
use crate::error::RuntimeError;
use crate::vm::gc::Gc;

pub const SCOPE_STACK_MAX: usize = 1024;

#[derive(Debug, Clone)]
pub struct Binding {
    pub privilege: Privilege,
    pub value: Value,
}

/// A plain lexical block or function-call scope.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: HashMap<String, Binding>,
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    pub fn define(&mut self, name: &str, privilege: Privilege, value: Value) -> Result<(), RuntimeError> {
        if self.values.contains_key(name) {
            return Err(RuntimeError::new(format!("redefined variable '{name}'")));
        }
        self.values.insert(name.to_string(), Binding { privilege, value });
        Ok(())
    }

    /// Overwrites an existing binding or inserts a fresh one, used to seed
    /// the implicit `this` binding without tripping the redefinition check.
    pub fn force_define(&mut self, name: &str, privilege: Privilege, value: Value) {
        self.values.insert(name.to_string(), Binding { privilege, value });
    }

    pub fn get_local(&self, name: &str) -> Option<&Value> {
        self.values.get(name).map(|b| &b.value)
    }

    pub fn get_local_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.values.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Binding)> {
        self.values.iter()
    }
}

/// One level of the VM's scope stack.
pub enum ScopeLayer {
    Lexical(Context),
    /// `GetClass`'s target instance, checked out by handle for the
    /// duration of a member access or method call.
    Instance(Handle),
}

/// The VM's bounded scope stack.
pub struct Scopes {
    stack: Vec<ScopeLayer>,
}

impl Scopes {
    pub fn new() -> Scopes {
        Scopes { stack: vec![ScopeLayer::Lexical(Context::new())] }
    }

    pub fn push_lexical(&mut self, ctx: Context) -> Result<(), RuntimeError> {
        if self.stack.len() >= SCOPE_STACK_MAX {
            return Err(RuntimeError::new("scope stack overflow"));
        }
        self.stack.push(ScopeLayer::Lexical(ctx));
        Ok(())
    }

    pub fn push_instance(&mut self, handle: Handle) -> Result<(), RuntimeError> {
        if self.stack.len() >= SCOPE_STACK_MAX {
            return Err(RuntimeError::new("scope stack overflow"));
        }
        self.stack.push(ScopeLayer::Instance(handle));
        Ok(())
    }

    /// Never pops the root layer.
    pub fn pop(&mut self) -> Option<ScopeLayer> {
        if self.stack.len() <= 1 {
            return None;
        }
        self.stack.pop()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.stack.truncate(depth.max(1));
    }

    pub fn define(&mut self, name: &str, privilege: Privilege, value: Value, gc: &mut Gc) -> Result<(), RuntimeError> {
        match self.stack.last_mut().expect("scope stack never empty") {
            ScopeLayer::Lexical(ctx) => ctx.define(name, privilege, value),
            ScopeLayer::Instance(handle) => {
                let HeapData::Instance(values) = gc.get_mut(*handle) else {
                    panic!("instance handle does not point at instance data")
                };
                if values.contains_key(name) {
                    return Err(RuntimeError::new(format!("redefined variable '{name}'")));
                }
                values.insert(name.to_string(), Binding { privilege, value });
                Ok(())
            }
        }
    }

    /// Walks from the innermost layer down, stopping after (and including)
    /// the first instance layer.
    fn resolve_layer(&self, name: &str, gc: &Gc) -> Option<usize> {
        for (depth, layer) in self.stack.iter().enumerate().rev() {
            match layer {
                ScopeLayer::Lexical(ctx) => {
                    if ctx.get_local(name).is_some() {
                        return Some(depth);
                    }
                }
                ScopeLayer::Instance(handle) => {
                    if let HeapData::Instance(values) = gc.get(*handle) {
                        if values.contains_key(name) {
                            return Some(depth);
                        }
                    }
                    return None;
                }
            }
        }
        None
    }

    pub fn get(&self, name: &str, gc: &Gc) -> Option<Value> {
        let depth = self.resolve_layer(name, gc)?;
        match &self.stack[depth] {
            ScopeLayer::Lexical(ctx) => ctx.get_local(name).cloned(),
            ScopeLayer::Instance(handle) => match gc.get(*handle) {
                HeapData::Instance(values) => values.get(name).map(|b| b.value.clone()),
                _ => None,
            },
        }
    }

    /// Assigns `value` to `name`, following a `Value::Reference` chain held
    /// by `name` (if any) through to its ultimate target first, so `let r =
    /// &x; r = v;` writes `v` into `x` rather than overwriting `r` itself —
    /// the write-side half of transparent reference semantics
    /// (`VM::resolve_var` is the read-side half).
    pub fn set(&mut self, name: &str, value: Value, gc: &mut Gc) -> Result<(), RuntimeError> {
        let mut target = name.to_string();
        let mut hops = 0;
        loop {
            let depth = self
                .resolve_layer(&target, gc)
                .ok_or_else(|| RuntimeError::new(format!("undefined variable '{target}'")))?;
            let current = match &self.stack[depth] {
                ScopeLayer::Lexical(ctx) => ctx.get_local(&target).expect("resolved layer holds name").clone(),
                ScopeLayer::Instance(handle) => match gc.get(*handle) {
                    HeapData::Instance(values) => values.get(&target).expect("resolved layer holds name").value.clone(),
                    _ => panic!("instance handle does not point at instance data"),
                },
            };
            if let Value::Reference(next) = current {
                hops += 1;
                if hops > 64 {
                    return Err(RuntimeError::new("reference cycle"));
                }
                target = next;
                continue;
            }

            return match &mut self.stack[depth] {
                ScopeLayer::Lexical(ctx) => {
                    let binding = ctx.get_local_mut(&target).expect("resolved layer holds name");
                    if binding.privilege == Privilege::Immutable {
                        return Err(RuntimeError::new(format!("cannot assign to immutable variable '{target}'")));
                    }
                    binding.value = value;
                    Ok(())
                }
                ScopeLayer::Instance(handle) => {
                    let HeapData::Instance(values) = gc.get_mut(*handle) else {
                        panic!("instance handle does not point at instance data")
                    };
                    let binding = values.get_mut(&target).expect("resolved layer holds name");
                    if binding.privilege == Privilege::Immutable {
                        return Err(RuntimeError::new(format!("cannot assign to immutable variable '{target}'")));
                    }
                    binding.value = value;
                    Ok(())
                }
            };
        }
    }

    /// The instance a `GetClass` is currently checked out against, if any —
    /// `FunctionCall` uses this to resolve plain member-call dispatch and
    /// to bind an implicit `this`.
    pub fn innermost_instance(&self) -> Option<Handle> {
        match self.stack.last() {
            Some(ScopeLayer::Instance(handle)) => Some(*handle),
            _ => None,
        }
    }

    /// Every value directly reachable from the scope stack, for GC rooting.
    /// Instance layers root their handle directly since nothing else may
    /// currently reference it (e.g. a freshly constructed instance whose
    /// member-init code hasn't yet stashed it in a variable).
    pub fn gc_roots(&self) -> Vec<Value> {
        let mut roots = Vec::new();
        for layer in &self.stack {
            match layer {
                ScopeLayer::Lexical(ctx) => {
                    for (_, binding) in ctx.iter() {
                        roots.push(binding.value.clone());
                    }
                }
                ScopeLayer::Instance(handle) => roots.push(Value::Instance(*handle)),
            }
        }
        roots
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_writes_through_a_reference_to_its_target() {
        let mut gc = Gc::new();
        let mut scopes = Scopes::new();
        scopes.define("x", Privilege::Mutable, Value::Int(1), &mut gc).unwrap();
        scopes.define("r", Privilege::Mutable, Value::Reference("x".to_string()), &mut gc).unwrap();

        scopes.set("r", Value::Int(2), &mut gc).unwrap();

        assert!(matches!(scopes.get("x", &gc), Some(Value::Int(2))));
        assert!(matches!(scopes.get("r", &gc), Some(Value::Reference(name)) if name == "x"));
    }

    #[test]
    fn set_rejects_writes_to_immutable_bindings() {
        let mut gc = Gc::new();
        let mut scopes = Scopes::new();
        scopes.define("c", Privilege::Immutable, Value::Int(1), &mut gc).unwrap();

        assert!(scopes.set("c", Value::Int(2), &mut gc).is_err());
    }
}
