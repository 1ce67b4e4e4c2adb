//! A mark-and-sweep collector over a slab of heap values, indexed by
//! [`Handle`] rather than by raw pointer (see DESIGN.md for why). The
//! collection threshold is set once and never grown, so programs that
//! briefly spike in live-object count don't "learn" a permanently looser
//! collection schedule the way a doubling strategy would.

use std::collections::HashMap;

use log::debug;

use crate::common::value::{Handle, HeapData, Value};
use crate::vm::context::Binding;

pub const INIT_OBJ_NUM_MAX: usize = 2048;

struct Slot {
    data: HeapData,
    marked: bool,
}

pub struct Gc {
    slab: Vec<Option<Slot>>,
    free: Vec<usize>,
    threshold: usize,
}

impl Default for Gc {
    fn default() -> Gc {
        Gc::new()
    }
}

impl Gc {
    pub fn new() -> Gc {
        Gc { slab: Vec::new(), free: Vec::new(), threshold: INIT_OBJ_NUM_MAX }
    }

    pub fn live_count(&self) -> usize {
        self.slab.iter().filter(|s| s.is_some()).count()
    }

    pub fn should_collect(&self) -> bool {
        self.live_count() >= self.threshold
    }

    fn alloc(&mut self, data: HeapData) -> Handle {
        let slot = Some(Slot { data, marked: false });
        if let Some(idx) = self.free.pop() {
            self.slab[idx] = slot;
            Handle(idx)
        } else {
            self.slab.push(slot);
            Handle(self.slab.len() - 1)
        }
    }

    pub fn alloc_str(&mut self, s: String) -> Handle {
        self.alloc(HeapData::Str(s))
    }

    pub fn alloc_array(&mut self, items: Vec<Value>) -> Handle {
        self.alloc(HeapData::Array(items))
    }

    pub fn alloc_table(&mut self, entries: Vec<(Value, Value)>) -> Handle {
        self.alloc(HeapData::Table(entries))
    }

    pub fn alloc_instance(&mut self, values: HashMap<String, Binding>) -> Handle {
        self.alloc(HeapData::Instance(values))
    }

    pub fn get(&self, handle: Handle) -> &HeapData {
        &self.slab[handle.0].as_ref().expect("dangling handle").data
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut HeapData {
        &mut self.slab[handle.0].as_mut().expect("dangling handle").data
    }

    /// Marks every object reachable from `roots`, then frees everything
    /// unmarked. Self-referential instance members (an instance's `this`
    /// binding pointing back at itself) are handled naturally: marking is
    /// idempotent and guards against revisiting an already-marked slot.
    pub fn collect(&mut self, roots: &[&Value]) {
        for slot in self.slab.iter_mut().flatten() {
            slot.marked = false;
        }
        for root in roots {
            self.mark_value(root);
        }
        let mut freed = 0;
        for idx in 0..self.slab.len() {
            let marked = self.slab[idx].as_ref().map(|s| s.marked).unwrap_or(true);
            if !marked {
                self.slab[idx] = None;
                self.free.push(idx);
                freed += 1;
            }
        }
        debug!("gc: swept {freed} object(s), {} live", self.live_count());
    }

    fn mark_value(&mut self, value: &Value) {
        match value {
            Value::Str(h) | Value::Array(h) | Value::Table(h) | Value::Instance(h) => {
                self.mark_handle(*h)
            }
            _ => {}
        }
    }

    fn mark_handle(&mut self, handle: Handle) {
        let already_marked = match self.slab.get(handle.0).and_then(|s| s.as_ref()) {
            Some(slot) => slot.marked,
            None => return,
        };
        if already_marked {
            return;
        }
        self.slab[handle.0].as_mut().unwrap().marked = true;

        // Clone child values to mark; heap data of children is small
        // (values are cheap to clone, handles are `Copy`), so this avoids
        // holding an immutable borrow of `self.slab` across the recursive
        // mutable marking calls below.
        let children: Vec<Value> = match &self.slab[handle.0].as_ref().unwrap().data {
            HeapData::Str(_) => Vec::new(),
            HeapData::Array(items) => items.clone(),
            HeapData::Table(entries) => entries.iter().flat_map(|(k, v)| [k.clone(), v.clone()]).collect(),
            HeapData::Instance(values) => values.values().map(|b| b.value.clone()).collect(),
        };
        for child in &children {
            self.mark_value(child);
        }
    }
}
