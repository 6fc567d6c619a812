// File: src/object.rs
//
// Heap object representation. Every object is a header (GC mark plus the
// intrusive all-objects link) over a tagged body; the per-type operation
// table of the runtime is a central match over the body tag, dispatched
// from the heap and the VM.

use std::rc::Rc;

use crate::bytecode::Chunk;
use crate::table::Table;
use crate::value::{ObjRef, Value};

/// Result-style native signature: `base` indexes the first argument on
/// the current coroutine's stack; the receiver sits at `base - 1`. An
/// `Err` carries the runtime error message.
pub type NativeFn = fn(&mut crate::vm::Vm, base: usize) -> Result<Value, String>;

/// Common object header: the GC mark bit and the link threading every
/// live object into the allocator's intrusive list.
pub struct ObjHeader {
    pub marked: bool,
    pub next: Option<ObjRef>,
}

pub struct Obj {
    pub header: ObjHeader,
    pub body: ObjBody,
}

pub enum ObjBody {
    Str(StrObj),
    Function(FunctionObj),
    Upvalue(UpvalueObj),
    Closure(ClosureObj),
    Native(NativeObj),
    Class(ClassObj),
    Instance(InstanceObj),
    BoundMethod(BoundMethodObj),
    List(ListObj),
    Tuple(TupleObj),
    Map(MapObj),
    Range(RangeObj),
    Iterator(IteratorObj),
    Module(ModuleObj),
    Coroutine(CoroutineObj),
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match &self.body {
            ObjBody::Str(_) => "String",
            ObjBody::Function(_) => "Function",
            ObjBody::Upvalue(_) => "Upvalue",
            ObjBody::Closure(_) => "Function",
            ObjBody::Native(_) => "Function",
            ObjBody::Class(_) => "Class",
            ObjBody::Instance(_) => "Instance",
            ObjBody::BoundMethod(_) => "Function",
            ObjBody::List(_) => "List",
            ObjBody::Tuple(_) => "Tuple",
            ObjBody::Map(_) => "Map",
            ObjBody::Range(_) => "Range",
            ObjBody::Iterator(_) => "Iterator",
            ObjBody::Module(_) => "Module",
            ObjBody::Coroutine(_) => "Coroutine",
        }
    }
}

/// Interned immutable string with its cached FNV-1a hash.
pub struct StrObj {
    pub chars: Box<str>,
    pub hash: u32,
}

/// A compiled function: the bytecode chunk is immutable after
/// compilation and shared with the call frames executing it.
pub struct FunctionObj {
    pub arity: usize,
    pub upvalue_count: usize,
    /// Function name string, or nil for the top-level script.
    pub name: Value,
    /// Owning module, or nil.
    pub module: Value,
    pub chunk: Rc<Chunk>,
}

pub enum UpvalueState {
    /// Points at a live stack slot of `owner` (a coroutine).
    Open { owner: ObjRef, slot: usize },
    /// Owns the value after the captured slot left the stack.
    Closed(Value),
}

pub struct UpvalueObj {
    pub state: UpvalueState,
    /// Next entry of the owning coroutine's open-upvalue list, kept
    /// strictly descending by stack slot.
    pub next: Option<ObjRef>,
}

pub struct ClosureObj {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

pub struct NativeObj {
    pub name: &'static str,
    pub function: NativeFn,
    pub arity: usize,
}

/// A class. A class is itself an instance of its metaclass: static
/// methods live in the metaclass's method table, and the class carries
/// its own dynamic field table. Metaclasses have `metaclass == None`
/// and are named `"<name> meta"`.
pub struct ClassObj {
    pub name: Value,
    pub methods: Table,
    pub fields: Table,
    pub metaclass: Option<ObjRef>,
}

pub struct InstanceObj {
    pub class: ObjRef,
    pub fields: Table,
}

/// A receiver bound to a method; the method is a Closure or a Native.
pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: Value,
}

pub struct ListObj {
    pub elements: Vec<Value>,
}

pub struct TupleObj {
    pub elements: Box<[Value]>,
}

pub struct MapObj {
    pub table: Table,
}

pub struct RangeObj {
    pub begin: f64,
    pub end: f64,
    pub step: f64,
}

/// Iterator cursor. Lists and tuples advance an element index; ranges
/// advance a numeric cursor value.
pub struct IteratorObj {
    pub container: Value,
    pub index: usize,
    pub current: Value,
}

pub struct ModuleObj {
    pub path: Value,
    pub name: Value,
    pub imported: bool,
    pub exports: Table,
}

/// One function invocation: the executing closure, the instruction
/// offset into its chunk, and the stack index of slot 0 (the receiver
/// or the closure itself).
#[derive(Clone, Copy)]
pub struct CallFrame {
    pub closure: ObjRef,
    pub ip: usize,
    pub base: usize,
}

/// An independent execution context: its own value stack, frame stack
/// and open-upvalue list. `transfer` links back to the resumer while
/// the coroutine runs.
pub struct CoroutineObj {
    pub closure: ObjRef,
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub open_upvalues: Option<ObjRef>,
    pub transfer: Option<ObjRef>,
    pub started: bool,
    pub done: bool,
}

impl Obj {
    pub fn new(body: ObjBody) -> Obj {
        Obj { header: ObjHeader { marked: false, next: None }, body }
    }

    /// Approximate owned heap size, used for the collector's byte
    /// accounting. Recomputed at sweep time so growth between
    /// collections is folded back in.
    pub fn heap_size(&self) -> usize {
        let payload = match &self.body {
            ObjBody::Str(s) => s.chars.len(),
            ObjBody::Function(f) => {
                f.chunk.code.capacity()
                    + f.chunk.constants.capacity() * std::mem::size_of::<Value>()
                    + f.chunk.lines.capacity() * std::mem::size_of::<crate::bytecode::LineRun>()
            }
            ObjBody::Closure(c) => c.upvalues.capacity() * std::mem::size_of::<ObjRef>(),
            ObjBody::Class(c) => table_size(&c.methods) + table_size(&c.fields),
            ObjBody::Instance(i) => table_size(&i.fields),
            ObjBody::List(l) => l.elements.capacity() * std::mem::size_of::<Value>(),
            ObjBody::Tuple(t) => t.elements.len() * std::mem::size_of::<Value>(),
            ObjBody::Map(m) => table_size(&m.table),
            ObjBody::Module(m) => table_size(&m.exports),
            ObjBody::Coroutine(c) => {
                c.stack.capacity() * std::mem::size_of::<Value>()
                    + c.frames.capacity() * std::mem::size_of::<CallFrame>()
            }
            ObjBody::Upvalue(_)
            | ObjBody::Native(_)
            | ObjBody::BoundMethod(_)
            | ObjBody::Range(_)
            | ObjBody::Iterator(_) => 0,
        };

        std::mem::size_of::<Obj>() + payload
    }
}

fn table_size(table: &Table) -> usize {
    table.len() * (std::mem::size_of::<Value>() * 2 + std::mem::size_of::<u32>())
}
