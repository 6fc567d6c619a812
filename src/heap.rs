// File: src/heap.rs
//
// The object heap and its tri-colour mark-sweep collector. Objects live
// in an arena of slots addressed by handles; every live object is also
// threaded onto an intrusive all-objects list walked by the sweep phase.
// The string-intern table holds weak references that are dropped before
// sweep frees the strings themselves.

use log::debug;

use crate::object::{Obj, ObjBody, UpvalueState};
use crate::table::Table;
use crate::value::{hash_bits, hash_non_object, hash_str, ObjRef, Value};

const INITIAL_THRESHOLD: usize = 1024 * 1024;
const THRESHOLD_GROW_FACTOR: usize = 2;

pub struct Heap {
    slots: Vec<Option<Obj>>,
    free: Vec<u32>,
    /// Head of the intrusive all-objects list.
    head: Option<ObjRef>,
    pub bytes_allocated: usize,
    next_gc: usize,
    gray: Vec<ObjRef>,
    /// Root stack for fresh objects held across further allocations.
    pub temporaries: Vec<Value>,
    /// Weak string-intern table; keys are String objects, values nil.
    pub strings: Table,
    /// Collect on every allocation.
    pub stress: bool,
    /// Collection is deferred while the compiler runs; in-progress
    /// functions are not yet heap-reachable.
    pub gc_deferred: bool,
}

impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            bytes_allocated: 0,
            next_gc: INITIAL_THRESHOLD,
            gray: Vec::new(),
            temporaries: Vec::new(),
            strings: Table::new(),
            stress: false,
            gc_deferred: false,
        }
    }

    /// Registers a new object with the allocator. Collection decisions
    /// are made by the VM before calling this, so a fresh object is
    /// never collected before its creator can root it.
    pub fn allocate(&mut self, body: ObjBody) -> ObjRef {
        let mut obj = Obj::new(body);
        self.bytes_allocated += obj.heap_size();
        obj.header.next = self.head;

        let r = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(obj);
                ObjRef(index)
            }
            None => {
                self.slots.push(Some(obj));
                ObjRef((self.slots.len() - 1) as u32)
            }
        };

        self.head = Some(r);
        r
    }

    pub fn should_collect(&self) -> bool {
        !self.gc_deferred && (self.stress || self.bytes_allocated > self.next_gc)
    }

    pub fn get(&self, r: ObjRef) -> &Obj {
        self.slots[r.0 as usize].as_ref().expect("stale object handle")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.slots[r.0 as usize].as_mut().expect("stale object handle")
    }

    /// Number of live objects on the all-objects list.
    pub fn object_count(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head;
        while let Some(r) = cursor {
            count += 1;
            cursor = self.get(r).header.next;
        }
        count
    }

    // ---- strings ----------------------------------------------------

    pub fn str_value(&self, value: Value) -> &str {
        match &self.get(value.as_object()).body {
            ObjBody::Str(s) => &s.chars,
            _ => panic!("value is not a string"),
        }
    }

    pub fn is_string(&self, value: Value) -> bool {
        value.is_object() && matches!(self.get(value.as_object()).body, ObjBody::Str(_))
    }

    /// Interns `chars`: for any two byte-equal strings exactly one
    /// String object exists.
    pub fn intern(&mut self, chars: &str) -> Value {
        let hash = hash_str(chars);

        let slots = &self.slots;
        let found = self.strings.find_string(hash, |candidate| {
            match &slots[candidate.as_object().0 as usize]
                .as_ref()
                .expect("stale intern entry")
                .body
            {
                ObjBody::Str(s) => &*s.chars == chars,
                _ => false,
            }
        });
        if let Some(existing) = found {
            return existing;
        }

        let r = self.allocate(ObjBody::Str(crate::object::StrObj {
            chars: chars.into(),
            hash,
        }));
        let value = Value::object(r);
        self.strings.put(value, hash, Value::NIL);
        value
    }

    /// 32-bit hash for use as a table key.
    pub fn value_hash(&self, value: Value) -> u32 {
        if !value.is_object() {
            return hash_non_object(value);
        }

        match &self.get(value.as_object()).body {
            ObjBody::Str(s) => s.hash,
            _ => hash_bits(value.to_bits()),
        }
    }

    // ---- collection -------------------------------------------------

    pub fn mark_value(&mut self, value: Value) {
        if value.is_object() {
            self.mark_object(value.as_object());
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        let obj = self.get_mut(r);
        if obj.header.marked {
            return;
        }

        obj.header.marked = true;
        self.gray.push(r);
    }

    /// Pop-and-traverse the gray worklist until it drains.
    pub fn trace_references(&mut self) {
        while let Some(r) = self.gray.pop() {
            let children = self.children_of(r);
            for child in children {
                self.mark_value(child);
            }
        }
    }

    fn children_of(&self, r: ObjRef) -> Vec<Value> {
        let mut children = Vec::new();
        match &self.get(r).body {
            ObjBody::Str(_) | ObjBody::Native(_) | ObjBody::Range(_) => {}
            ObjBody::Function(f) => {
                children.push(f.name);
                children.push(f.module);
                children.extend(f.chunk.constants.iter().copied());
            }
            ObjBody::Upvalue(u) => match &u.state {
                // Keeping the owner alive keeps the open slot valid.
                UpvalueState::Open { owner, .. } => children.push(Value::object(*owner)),
                UpvalueState::Closed(value) => children.push(*value),
            },
            ObjBody::Closure(c) => {
                children.push(Value::object(c.function));
                children.extend(c.upvalues.iter().map(|u| Value::object(*u)));
            }
            ObjBody::Class(c) => {
                children.push(c.name);
                collect_table(&c.methods, &mut children);
                collect_table(&c.fields, &mut children);
                if let Some(meta) = c.metaclass {
                    children.push(Value::object(meta));
                }
            }
            ObjBody::Instance(i) => {
                children.push(Value::object(i.class));
                collect_table(&i.fields, &mut children);
            }
            ObjBody::BoundMethod(b) => {
                children.push(b.receiver);
                children.push(b.method);
            }
            ObjBody::List(l) => children.extend(l.elements.iter().copied()),
            ObjBody::Tuple(t) => children.extend(t.elements.iter().copied()),
            ObjBody::Map(m) => collect_table(&m.table, &mut children),
            ObjBody::Iterator(i) => {
                children.push(i.container);
                children.push(i.current);
            }
            ObjBody::Module(m) => {
                children.push(m.path);
                children.push(m.name);
                collect_table(&m.exports, &mut children);
            }
            ObjBody::Coroutine(c) => {
                children.push(Value::object(c.closure));
                children.extend(c.stack.iter().copied());
                children.extend(c.frames.iter().map(|f| Value::object(f.closure)));
                let mut upvalue = c.open_upvalues;
                while let Some(u) = upvalue {
                    children.push(Value::object(u));
                    upvalue = match &self.get(u).body {
                        ObjBody::Upvalue(up) => up.next,
                        _ => None,
                    };
                }
                if let Some(transfer) = c.transfer {
                    children.push(Value::object(transfer));
                }
            }
        }
        children
    }

    /// Drops unreachable intern entries so sweep can free the strings.
    pub fn remove_white_strings(&mut self) {
        let mut strings = std::mem::take(&mut self.strings);
        let slots = &self.slots;
        strings.remove_white(|key| {
            !slots[key.as_object().0 as usize]
                .as_ref()
                .map(|obj| obj.header.marked)
                .unwrap_or(false)
        });
        self.strings = strings;
    }

    /// Walks the all-objects list: frees unmarked objects, clears the
    /// mark on survivors, and resets the byte accounting from what is
    /// actually live.
    pub fn sweep(&mut self) {
        let before = self.bytes_allocated;

        let mut live_bytes = 0;
        let mut previous: Option<ObjRef> = None;
        let mut cursor = self.head;

        while let Some(r) = cursor {
            let next = self.get(r).header.next;
            if self.get(r).header.marked {
                let obj = self.get_mut(r);
                obj.header.marked = false;
                live_bytes += obj.heap_size();
                previous = Some(r);
            } else {
                match previous {
                    Some(p) => self.get_mut(p).header.next = next,
                    None => self.head = next,
                }
                self.slots[r.0 as usize] = None;
                self.free.push(r.0);
            }
            cursor = next;
        }

        self.bytes_allocated = live_bytes;
        self.next_gc = (live_bytes * THRESHOLD_GROW_FACTOR).max(INITIAL_THRESHOLD);

        debug!(
            "gc: collected {} bytes ({} -> {}), next at {}",
            before.saturating_sub(live_bytes),
            before,
            live_bytes,
            self.next_gc
        );
    }

    pub fn push_temporary(&mut self, value: Value) {
        self.temporaries.push(value);
    }

    pub fn pop_temporary(&mut self) -> Value {
        self.temporaries.pop().expect("unbalanced temporary roots")
    }
}

macro_rules! typed_accessors {
    ($ref_name:ident, $mut_name:ident, $variant:ident, $ty:ty, $what:literal) => {
        pub fn $ref_name(&self, r: ObjRef) -> &$ty {
            match &self.get(r).body {
                ObjBody::$variant(inner) => inner,
                _ => panic!(concat!("object is not ", $what)),
            }
        }

        pub fn $mut_name(&mut self, r: ObjRef) -> &mut $ty {
            match &mut self.get_mut(r).body {
                ObjBody::$variant(inner) => inner,
                _ => panic!(concat!("object is not ", $what)),
            }
        }
    };
}

/// Typed views over object slots. These panic on a type mismatch; the
/// VM only uses them where the tag was just checked.
impl Heap {
    typed_accessors!(function, function_mut, Function, crate::object::FunctionObj, "a function");
    typed_accessors!(closure, closure_mut, Closure, crate::object::ClosureObj, "a closure");
    typed_accessors!(upvalue, upvalue_mut, Upvalue, crate::object::UpvalueObj, "an upvalue");
    typed_accessors!(class, class_mut, Class, crate::object::ClassObj, "a class");
    typed_accessors!(instance, instance_mut, Instance, crate::object::InstanceObj, "an instance");
    typed_accessors!(list, list_mut, List, crate::object::ListObj, "a list");
    typed_accessors!(tuple, tuple_mut, Tuple, crate::object::TupleObj, "a tuple");
    typed_accessors!(map, map_mut, Map, crate::object::MapObj, "a map");
    typed_accessors!(range, range_mut, Range, crate::object::RangeObj, "a range");
    typed_accessors!(iterator, iterator_mut, Iterator, crate::object::IteratorObj, "an iterator");
    typed_accessors!(module, module_mut, Module, crate::object::ModuleObj, "a module");
    typed_accessors!(
        coroutine,
        coroutine_mut,
        Coroutine,
        crate::object::CoroutineObj,
        "a coroutine"
    );
}

fn collect_table(table: &Table, children: &mut Vec<Value>) {
    for (key, _, value) in table.iter() {
        children.push(key);
        children.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedupes_equal_contents() {
        let mut heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        let c = heap.intern("world");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.str_value(a), "hello");
    }

    #[test]
    fn unreachable_objects_are_swept_and_marks_cleared() {
        let mut heap = Heap::new();
        let kept = heap.intern("kept");
        let _dropped = heap.intern("dropped");
        assert_eq!(heap.object_count(), 2);

        heap.mark_value(kept);
        heap.trace_references();
        heap.remove_white_strings();
        heap.sweep();

        assert_eq!(heap.object_count(), 1);
        assert!(!heap.get(kept.as_object()).header.marked);
        assert_eq!(heap.str_value(kept), "kept");
        assert_eq!(heap.strings.len(), 1);

        // The interned copy survives and still dedupes.
        assert_eq!(heap.intern("kept"), kept);
        assert_eq!(heap.object_count(), 1);
    }

    #[test]
    fn slots_are_reused_after_sweep() {
        let mut heap = Heap::new();
        let doomed = heap.intern("gone");
        let doomed_slot = doomed.as_object();
        heap.remove_white_strings();
        heap.sweep();
        assert_eq!(heap.object_count(), 0);

        let replacement = heap.intern("fresh");
        assert_eq!(replacement.as_object(), doomed_slot);
    }
}
