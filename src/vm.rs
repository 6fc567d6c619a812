// File: src/vm.rs
//
// The Kestrel virtual machine: a stack-based interpreter over compiled
// bytecode, with per-coroutine value and frame stacks, method dispatch
// with inheritance, upvalue capture and closing, and cooperative
// coroutine switching. The instruction pointer and frame base live in
// locals inside the dispatch loop and are written back to the frame
// before anything that may allocate, call, switch or raise.

use std::rc::Rc;

use crate::builtins;
use crate::bytecode::{Chunk, OpCode};
use crate::compiler;
use crate::debug;
use crate::heap::Heap;
use crate::module;
use crate::object::{
    BoundMethodObj, CallFrame, ClassObj, ClosureObj, CoroutineObj, InstanceObj, IteratorObj,
    ListObj, MapObj, NativeFn, NativeObj, ObjBody, RangeObj, TupleObj, UpvalueObj, UpvalueState,
};
use crate::table::Table;
use crate::value::{values_equal, ObjRef, Value};

/// Call depth limit per coroutine.
pub const FRAMES_MAX: usize = 64;
/// Value stack limit per coroutine.
pub const STACK_MAX: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretStatus {
    Ok,
    CompileError,
    RuntimeError,
}

/// Where `print` output goes; tests capture instead of writing stdout.
pub enum Output {
    Stdout,
    Capture(Vec<String>),
}

pub struct Vm {
    pub heap: Heap,
    pub globals: Table,
    /// Module registry keyed by path string.
    pub modules: Table,
    pub last_module: Value,
    init_string: Value,
    current: Option<ObjRef>,
    root: Option<ObjRef>,
    pub output: Output,
    pub trace: bool,
    pub disassemble: bool,
}

impl Default for Vm {
    fn default() -> Vm {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Vm {
        let mut vm = Vm {
            heap: Heap::new(),
            globals: Table::new(),
            modules: Table::new(),
            last_module: Value::NIL,
            init_string: Value::NIL,
            current: None,
            root: None,
            output: Output::Stdout,
            trace: false,
            disassemble: false,
        };

        vm.init_string = vm.intern("init");
        builtins::install_globals(&mut vm);
        vm
    }

    pub fn set_gc_stress(&mut self, on: bool) {
        self.heap.stress = on;
    }

    /// Switches `print` into capture mode for tests.
    pub fn capture_output(&mut self) {
        self.output = Output::Capture(Vec::new());
    }

    pub fn take_output(&mut self) -> Vec<String> {
        match &mut self.output {
            Output::Capture(lines) => std::mem::take(lines),
            Output::Stdout => Vec::new(),
        }
    }

    pub fn print_line(&mut self, text: String) {
        match &mut self.output {
            Output::Stdout => println!("{}", text),
            Output::Capture(lines) => lines.push(text),
        }
    }

    // ---- allocation -------------------------------------------------

    /// All runtime allocations funnel through here so a collection can
    /// run first; a fresh object can then not be reclaimed before its
    /// creator roots it.
    pub fn alloc(&mut self, body: ObjBody) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.allocate(body)
    }

    pub fn intern(&mut self, chars: &str) -> Value {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.intern(chars)
    }

    pub fn define_native(&mut self, name: &'static str, function: NativeFn, arity: usize) {
        let name_value = self.intern(name);
        self.heap.push_temporary(name_value);
        let native = self.alloc(ObjBody::Native(NativeObj { name, function, arity }));
        let hash = self.heap.value_hash(name_value);
        self.globals.put(name_value, hash, Value::object(native));
        self.heap.pop_temporary();
    }

    fn collect_garbage(&mut self) {
        log::debug!("gc: begin ({} bytes)", self.heap.bytes_allocated);

        for index in 0..self.heap.temporaries.len() {
            let value = self.heap.temporaries[index];
            self.heap.mark_value(value);
        }
        for (key, _, value) in self.globals.iter() {
            self.heap.mark_value(key);
            self.heap.mark_value(value);
        }
        for (key, _, value) in self.modules.iter() {
            self.heap.mark_value(key);
            self.heap.mark_value(value);
        }
        self.heap.mark_value(self.last_module);
        self.heap.mark_value(self.init_string);
        if let Some(current) = self.current {
            self.heap.mark_object(current);
        }
        if let Some(root) = self.root {
            self.heap.mark_object(root);
        }

        self.heap.trace_references();
        self.heap.remove_white_strings();
        self.heap.sweep();
    }

    // ---- stacks -----------------------------------------------------

    fn cur(&self) -> ObjRef {
        self.current.expect("no running coroutine")
    }

    fn push(&mut self, value: Value) -> Result<(), String> {
        let co = self.heap.coroutine_mut(self.cur());
        if co.stack.len() >= STACK_MAX {
            return Err("Stack overflow.".to_string());
        }
        co.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.heap.coroutine_mut(self.cur()).stack.pop().expect("stack underflow")
    }

    fn top(&self) -> Value {
        *self.heap.coroutine(self.cur()).stack.last().expect("stack underflow")
    }

    fn set_top(&mut self, value: Value) {
        let co = self.heap.coroutine_mut(self.cur());
        *co.stack.last_mut().expect("stack underflow") = value;
    }

    fn peek(&self, distance: usize) -> Value {
        let stack = &self.heap.coroutine(self.cur()).stack;
        stack[stack.len() - 1 - distance]
    }

    fn stack_len(&self) -> usize {
        self.heap.coroutine(self.cur()).stack.len()
    }

    fn stack_get(&self, index: usize) -> Value {
        self.heap.coroutine(self.cur()).stack[index]
    }

    fn stack_set(&mut self, index: usize, value: Value) {
        self.heap.coroutine_mut(self.cur()).stack[index] = value;
    }

    fn truncate(&mut self, len: usize) {
        self.heap.coroutine_mut(self.cur()).stack.truncate(len);
    }

    /// Argument access for natives: `base` indexes the first argument.
    pub fn native_arg(&self, base: usize, index: usize) -> Value {
        self.stack_get(base + index)
    }

    /// The receiver (or callee) slot sits just below the arguments.
    pub fn native_receiver(&self, base: usize) -> Value {
        self.stack_get(base - 1)
    }

    /// Snapshot of the running coroutine's stack, for tracing.
    pub fn stack_slots(&self) -> Vec<Value> {
        match self.current {
            Some(current) => self.heap.coroutine(current).stack.clone(),
            None => Vec::new(),
        }
    }

    fn sync_ip(&mut self, ip: usize) {
        let co = self.heap.coroutine_mut(self.cur());
        if let Some(frame) = co.frames.last_mut() {
            frame.ip = ip;
        }
    }

    /// (closure, chunk, ip, base) of the innermost frame.
    fn frame_view(&self) -> (ObjRef, Rc<Chunk>, usize, usize) {
        let frame = *self.heap.coroutine(self.cur()).frames.last().expect("call frame");
        let function = self.heap.closure(frame.closure).function;
        (frame.closure, self.heap.function(function).chunk.clone(), frame.ip, frame.base)
    }

    // ---- errors -----------------------------------------------------

    fn frame_line(&self, frame: &CallFrame) -> usize {
        let function = self.heap.closure(frame.closure).function;
        self.heap.function(function).chunk.line_at(frame.ip.saturating_sub(1))
    }

    fn frame_name(&self, frame: &CallFrame) -> String {
        let function = self.heap.closure(frame.closure).function;
        let name = self.heap.function(function).name;
        self.heap.str_value(name).to_string()
    }

    pub fn runtime_error(&mut self, message: &str) -> InterpretStatus {
        let frames: Vec<CallFrame> =
            self.heap.coroutine(self.cur()).frames.iter().copied().collect();

        match frames.last() {
            Some(frame) => eprintln!("[Line {}] {}", self.frame_line(frame), message),
            None => eprintln!("{}", message),
        }

        for frame in frames.iter().rev() {
            eprintln!("[Line {}] in {}", self.frame_line(frame), self.frame_name(frame));
        }

        self.reset();
        InterpretStatus::RuntimeError
    }

    fn reset(&mut self) {
        if let Some(current) = self.current {
            let co = self.heap.coroutine_mut(current);
            co.stack.clear();
            co.frames.clear();
            co.open_upvalues = None;
        }
        if let Some(root) = self.root {
            let co = self.heap.coroutine_mut(root);
            co.stack.clear();
            co.frames.clear();
            co.open_upvalues = None;
            self.current = Some(root);
        }
    }

    // ---- entry ------------------------------------------------------

    pub fn interpret(&mut self, source: &str) -> InterpretStatus {
        let function = match compiler::compile(self, source, Value::NIL) {
            Some(function) => function,
            None => return InterpretStatus::CompileError,
        };

        if self.disassemble {
            debug::disassemble_function(self, function);
        }

        self.heap.push_temporary(Value::object(function));
        let closure =
            self.alloc(ObjBody::Closure(ClosureObj { function, upvalues: Vec::new() }));
        self.heap.push_temporary(Value::object(closure));
        let coroutine = self.new_coroutine(closure);
        self.heap.pop_temporary();
        self.heap.pop_temporary();

        self.root = Some(coroutine);
        self.current = Some(coroutine);

        self.run()
    }

    fn new_coroutine(&mut self, closure: ObjRef) -> ObjRef {
        let r = self.alloc(ObjBody::Coroutine(CoroutineObj {
            closure,
            stack: Vec::new(),
            frames: Vec::new(),
            open_upvalues: None,
            transfer: None,
            started: false,
            done: false,
        }));

        let arity = self.heap.function(self.heap.closure(closure).function).arity;
        let co = self.heap.coroutine_mut(r);
        co.stack.push(Value::object(r));
        // Parameter slots an entry closure expects are nil-filled.
        for _ in 0..arity {
            co.stack.push(Value::NIL);
        }
        co.frames.push(CallFrame { closure, ip: 0, base: 0 });
        r
    }

    // ---- dispatch loop ----------------------------------------------

    fn run(&mut self) -> InterpretStatus {
        let (mut closure, mut chunk, mut ip, mut base) = self.frame_view();

        macro_rules! read_byte {
            () => {{
                let byte = chunk.code[ip];
                ip += 1;
                byte
            }};
        }

        macro_rules! read_u16 {
            () => {{
                let operand = chunk.read_u16(ip) as usize;
                ip += 2;
                operand
            }};
        }

        macro_rules! read_constant {
            () => {{
                let index = read_byte!() as usize;
                chunk.constants[index]
            }};
        }

        macro_rules! rt {
            ($($arg:tt)*) => {{
                self.sync_ip(ip);
                return self.runtime_error(&format!($($arg)*));
            }};
        }

        macro_rules! push {
            ($value:expr) => {{
                let value = $value;
                if let Err(message) = self.push(value) {
                    rt!("{}", message);
                }
            }};
        }

        macro_rules! reload {
            () => {{
                let view = self.frame_view();
                closure = view.0;
                chunk = view.1;
                ip = view.2;
                base = view.3;
            }};
        }

        macro_rules! binary_number {
            ($op:tt) => {{
                if !self.peek(0).is_number() || !self.peek(1).is_number() {
                    rt!("Operands must be numbers");
                }
                let rhs = self.pop().as_number();
                let lhs = self.top().as_number();
                self.set_top(Value::number(lhs $op rhs));
            }};
        }

        macro_rules! binary_compare {
            ($op:tt) => {{
                if !self.peek(0).is_number() || !self.peek(1).is_number() {
                    rt!("Operands must be numbers");
                }
                let rhs = self.pop().as_number();
                let lhs = self.top().as_number();
                self.set_top(Value::boolean(lhs $op rhs));
            }};
        }

        macro_rules! binary_bits {
            ($op:tt) => {{
                if !self.peek(0).is_number() || !self.peek(1).is_number() {
                    rt!("Operands must be numbers");
                }
                let rhs = self.pop().as_number() as i64;
                let lhs = self.top().as_number() as i64;
                self.set_top(Value::number((lhs $op rhs) as f64));
            }};
        }

        loop {
            if self.trace {
                debug::trace_instruction(self, &chunk, ip, base);
            }

            let op = OpCode::from_byte(read_byte!());
            match op {
                OpCode::LoadConstant => {
                    push!(read_constant!());
                }
                OpCode::LoadTrue => push!(Value::TRUE),
                OpCode::LoadFalse => push!(Value::FALSE),
                OpCode::LoadNil => push!(Value::NIL),

                OpCode::NotEqual => {
                    let rhs = self.pop();
                    let lhs = self.top();
                    self.set_top(Value::boolean(!values_equal(lhs, rhs)));
                }
                OpCode::Equal => {
                    let rhs = self.pop();
                    let lhs = self.top();
                    self.set_top(Value::boolean(values_equal(lhs, rhs)));
                }
                OpCode::Greater => binary_compare!(>),
                OpCode::GreaterEqual => binary_compare!(>=),
                OpCode::Less => binary_compare!(<),
                OpCode::LessEqual => binary_compare!(<=),

                OpCode::Not => {
                    let value = self.top();
                    self.set_top(Value::boolean(value.is_falsey()));
                }
                OpCode::Negate => {
                    if !self.top().is_number() {
                        rt!("Operand must be a number.");
                    }
                    let value = self.top().as_number();
                    self.set_top(Value::number(-value));
                }
                OpCode::Inc => {
                    if !self.top().is_number() {
                        rt!("Operand must be a number.");
                    }
                    let value = self.top().as_number();
                    self.set_top(Value::number(value + 1.0));
                }
                OpCode::Dec => {
                    if !self.top().is_number() {
                        rt!("Operand must be a number.");
                    }
                    let value = self.top().as_number();
                    self.set_top(Value::number(value - 1.0));
                }
                OpCode::BitwiseNot => {
                    if !self.top().is_number() {
                        rt!("Operand must be a number.");
                    }
                    let value = self.top().as_number() as i64;
                    self.set_top(Value::number(!value as f64));
                }

                OpCode::Add => {
                    let rhs = self.peek(0);
                    let lhs = self.peek(1);
                    if self.heap.is_string(lhs) && self.heap.is_string(rhs) {
                        let mut text = self.heap.str_value(lhs).to_string();
                        text.push_str(self.heap.str_value(rhs));

                        self.sync_ip(ip);
                        let value = self.intern(&text);
                        self.pop();
                        self.set_top(value);
                    } else if lhs.is_number() && rhs.is_number() {
                        let rhs = self.pop().as_number();
                        let lhs = self.top().as_number();
                        self.set_top(Value::number(lhs + rhs));
                    } else {
                        rt!("Operands must be either numbers or strings.");
                    }
                }
                OpCode::Subtract => binary_number!(-),
                OpCode::Multiply => binary_number!(*),
                OpCode::Divide => binary_number!(/),
                OpCode::Modulo => binary_number!(%),
                OpCode::Power => {
                    if !self.peek(0).is_number() || !self.peek(1).is_number() {
                        rt!("Operands must be numbers");
                    }
                    let exponent = self.pop().as_number();
                    let lhs = self.top().as_number();
                    self.set_top(Value::number(lhs.powf(exponent)));
                }

                OpCode::BitwiseAnd => binary_bits!(&),
                OpCode::BitwiseOr => binary_bits!(|),
                OpCode::BitwiseXor => binary_bits!(^),
                OpCode::BitwiseLeftShift => {
                    if !self.peek(0).is_number() || !self.peek(1).is_number() {
                        rt!("Operands must be numbers");
                    }
                    let rhs = (self.pop().as_number() as i64 as u32) & 63;
                    let lhs = self.top().as_number() as i64;
                    self.set_top(Value::number((lhs << rhs) as f64));
                }
                OpCode::BitwiseRightShift => {
                    if !self.peek(0).is_number() || !self.peek(1).is_number() {
                        rt!("Operands must be numbers");
                    }
                    let rhs = (self.pop().as_number() as i64 as u32) & 63;
                    let lhs = self.top().as_number() as i64;
                    self.set_top(Value::number((lhs >> rhs) as f64));
                }

                OpCode::Print => {
                    let value = self.pop();
                    let text = self.display_value(value);
                    self.print_line(text);
                }

                OpCode::Loop => {
                    let offset = read_u16!();
                    ip -= offset;
                }
                OpCode::Jump => {
                    let offset = read_u16!();
                    ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = read_u16!();
                    if self.top().is_falsey() {
                        ip += offset;
                    }
                }
                OpCode::PopJumpIfFalse => {
                    let offset = read_u16!();
                    if self.pop().is_falsey() {
                        ip += offset;
                    }
                }
                OpCode::PopJumpIfEqual => {
                    let offset = read_u16!();
                    let case = self.pop();
                    if values_equal(case, self.top()) {
                        ip += offset;
                    }
                }
                OpCode::JumpIfNotNil => {
                    let offset = read_u16!();
                    if !self.top().is_nil() {
                        ip += offset;
                    }
                }
                OpCode::PopLoopIfTrue => {
                    let offset = read_u16!();
                    if !self.pop().is_falsey() {
                        ip -= offset;
                    }
                }

                OpCode::Pop => {
                    self.pop();
                }
                OpCode::Dup => {
                    push!(self.top());
                }
                OpCode::DupTwo => {
                    push!(self.peek(1));
                    push!(self.peek(1));
                }
                OpCode::Swap => {
                    let top = self.top();
                    let snd = self.peek(1);
                    self.set_top(snd);
                    let len = self.stack_len();
                    self.stack_set(len - 2, top);
                }
                OpCode::SwapThree => {
                    // [a, b, c] -> [c, a, b]
                    let len = self.stack_len();
                    let a = self.stack_get(len - 3);
                    let b = self.stack_get(len - 2);
                    let c = self.stack_get(len - 1);
                    self.stack_set(len - 3, c);
                    self.stack_set(len - 2, a);
                    self.stack_set(len - 1, b);
                }
                OpCode::SwapFour => {
                    // [a, b, c, d] -> [d, a, b, c]
                    let len = self.stack_len();
                    let a = self.stack_get(len - 4);
                    let b = self.stack_get(len - 3);
                    let c = self.stack_get(len - 2);
                    let d = self.stack_get(len - 1);
                    self.stack_set(len - 4, d);
                    self.stack_set(len - 3, a);
                    self.stack_set(len - 2, b);
                    self.stack_set(len - 1, c);
                }

                OpCode::DefineGlobal => {
                    let name = read_constant!();
                    let hash = self.heap.value_hash(name);
                    let value = self.top();
                    self.globals.put(name, hash, value);
                    self.pop();
                }
                OpCode::LoadGlobal => {
                    let name = read_constant!();
                    let hash = self.heap.value_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => push!(value),
                        None => rt!("Undefined variable '{}'.", self.heap.str_value(name)),
                    }
                }
                OpCode::StoreGlobal => {
                    let name = read_constant!();
                    let hash = self.heap.value_hash(name);
                    let value = self.top();
                    if self.globals.put(name, hash, value) {
                        self.globals.remove(name, hash);
                        rt!("Undefined variable '{}'.", self.heap.str_value(name));
                    }
                }

                OpCode::LoadLocal => {
                    let slot = read_byte!() as usize;
                    push!(self.stack_get(base + slot));
                }
                OpCode::StoreLocal => {
                    let slot = read_byte!() as usize;
                    let value = self.top();
                    self.stack_set(base + slot, value);
                }

                OpCode::LoadUpvalue => {
                    let slot = read_byte!() as usize;
                    let upvalue = self.heap.closure(closure).upvalues[slot];
                    push!(self.upvalue_get(upvalue));
                }
                OpCode::StoreUpvalue => {
                    let slot = read_byte!() as usize;
                    let upvalue = self.heap.closure(closure).upvalues[slot];
                    let value = self.top();
                    self.upvalue_set(upvalue, value);
                }

                OpCode::LoadProperty | OpCode::LoadPropertySafe => {
                    if op == OpCode::LoadPropertySafe && self.top().is_nil() {
                        ip += 1;
                    } else {
                        let name = read_constant!();
                        self.sync_ip(ip);
                        if let Err(message) = self.load_property(name) {
                            return self.runtime_error(&message);
                        }
                    }
                }
                OpCode::StoreProperty | OpCode::StorePropertySafe => {
                    if op == OpCode::StorePropertySafe && self.top().is_nil() {
                        ip += 1;
                        self.pop();
                        self.set_top(Value::NIL);
                    } else {
                        let name = read_constant!();
                        self.sync_ip(ip);
                        if let Err(message) = self.store_property(name) {
                            return self.runtime_error(&message);
                        }
                    }
                }

                OpCode::LoadSubscript | OpCode::LoadSubscriptSafe => {
                    if op == OpCode::LoadSubscriptSafe && self.peek(1).is_nil() {
                        self.pop();
                    } else {
                        let index = self.pop();
                        let object = self.top();
                        self.sync_ip(ip);
                        match self.get_subscript(object, index) {
                            Ok(value) => self.set_top(value),
                            Err(message) => return self.runtime_error(&message),
                        }
                    }
                }
                OpCode::StoreSubscript | OpCode::StoreSubscriptSafe => {
                    if op == OpCode::StoreSubscriptSafe && self.peek(1).is_nil() {
                        self.pop();
                        self.pop();
                        self.set_top(Value::NIL);
                    } else {
                        let index = self.pop();
                        let object = self.pop();
                        let value = self.top();
                        self.sync_ip(ip);
                        if let Err(message) = self.set_subscript(object, index, value) {
                            return self.runtime_error(&message);
                        }
                    }
                }

                OpCode::Closure => {
                    let function_value = read_constant!();
                    let function = function_value.as_object();
                    let upvalue_count = self.heap.function(function).upvalue_count;

                    self.sync_ip(ip);
                    let created = self.alloc(ObjBody::Closure(ClosureObj {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    push!(Value::object(created));

                    for _ in 0..upvalue_count {
                        let is_local = read_byte!() != 0;
                        let index = read_byte!() as usize;

                        let upvalue = if is_local {
                            self.sync_ip(ip);
                            self.capture_upvalue(base + index)
                        } else {
                            self.heap.closure(closure).upvalues[index]
                        };
                        self.heap.closure_mut(created).upvalues.push(upvalue);
                    }
                }
                OpCode::CloseUpvalue => {
                    let last = self.stack_len() - 1;
                    self.close_upvalues(self.cur(), last);
                    self.pop();
                }

                OpCode::Call => {
                    let argc = read_byte!() as usize;
                    self.sync_ip(ip);
                    let callee = self.peek(argc);
                    if let Err(message) = self.call_value(callee, argc) {
                        return self.runtime_error(&message);
                    }
                    reload!();
                }
                OpCode::Invoke | OpCode::InvokeSafe => {
                    let name = read_constant!();
                    let argc = read_byte!() as usize;
                    if op == OpCode::InvokeSafe && self.peek(argc).is_nil() {
                        for _ in 0..argc {
                            self.pop();
                        }
                    } else {
                        self.sync_ip(ip);
                        if let Err(message) = self.invoke(name, argc) {
                            return self.runtime_error(&message);
                        }
                        reload!();
                    }
                }
                OpCode::Return => {
                    let result = self.pop();
                    self.close_upvalues(self.cur(), base);

                    let co_ref = self.cur();
                    self.heap.coroutine_mut(co_ref).frames.pop();

                    if self.heap.coroutine(co_ref).frames.is_empty() {
                        match self.heap.coroutine(co_ref).transfer {
                            Some(transfer) => {
                                // A coroutine whose frames empty without
                                // yielding is done and yields nil.
                                let co = self.heap.coroutine_mut(co_ref);
                                co.done = true;
                                co.stack.clear();
                                self.current = Some(transfer);
                                self.set_top(Value::NIL);
                                reload!();
                            }
                            None => {
                                self.pop();
                                return InterpretStatus::Ok;
                            }
                        }
                    } else {
                        self.truncate(base);
                        push!(result);
                        reload!();
                    }
                }

                OpCode::Class => {
                    let name = read_constant!();
                    self.sync_ip(ip);
                    let class = self.new_class(name);
                    push!(Value::object(class));
                }
                OpCode::Method | OpCode::StaticMethod => {
                    let name = read_constant!();
                    let hash = self.heap.value_hash(name);
                    let method = self.top();
                    let class = self.peek(1).as_object();

                    let target = if op == OpCode::StaticMethod {
                        self.heap.class(class).metaclass.expect("metaclass")
                    } else {
                        class
                    };
                    self.heap.class_mut(target).methods.put(name, hash, method);
                    self.pop();
                }
                OpCode::Inherit => {
                    let superclass = self.peek(1);
                    if !self.is_class(superclass) {
                        rt!("Superclass must be a class.");
                    }

                    let subclass = self.top().as_object();
                    let methods: Vec<(Value, u32, Value)> =
                        self.heap.class(superclass.as_object()).methods.iter().collect();
                    for (name, hash, method) in methods {
                        self.heap.class_mut(subclass).methods.put(name, hash, method);
                    }
                    self.pop();
                }
                OpCode::GetSuper => {
                    let name = read_constant!();
                    let superclass = self.pop().as_object();
                    self.sync_ip(ip);
                    if let Err(message) = self.bind_method(superclass, name) {
                        return self.runtime_error(&message);
                    }
                }
                OpCode::SuperInvoke => {
                    let name = read_constant!();
                    let argc = read_byte!() as usize;
                    let superclass = self.pop().as_object();
                    self.sync_ip(ip);
                    if let Err(message) = self.invoke_from_class(superclass, name, argc) {
                        return self.runtime_error(&message);
                    }
                    reload!();
                }
                OpCode::EndClass => {
                    self.sync_ip(ip);
                    let class = self.top().as_object();
                    let metaclass = self.heap.class(class).metaclass.expect("metaclass");
                    let hash = self.heap.value_hash(self.init_string);
                    let initializer =
                        self.heap.class(metaclass).methods.get(self.init_string, hash);

                    if let Some(initializer) = initializer {
                        if let Err(message) = self.call_closure(initializer.as_object(), 0) {
                            return self.runtime_error(&message);
                        }
                        reload!();
                    }
                }

                OpCode::Coroutine => {
                    let callee = self.top();
                    if !self.is_closure(callee) {
                        rt!("Can only create coroutines from functions.");
                    }

                    self.sync_ip(ip);
                    let coroutine = self.new_coroutine(callee.as_object());
                    self.set_top(Value::object(coroutine));
                }
                OpCode::Yield => {
                    self.sync_ip(ip);

                    let co_ref = self.cur();
                    let transfer = match self.heap.coroutine(co_ref).transfer {
                        Some(transfer) => transfer,
                        None => rt!("Cannot yield outside of a coroutine."),
                    };

                    let value = self.pop();
                    self.current = Some(transfer);
                    self.set_top(value);
                    reload!();
                }

                OpCode::Iterator => {
                    let value = self.top();
                    self.sync_ip(ip);
                    match self.make_iterator(value) {
                        Ok(iterator) => self.set_top(iterator),
                        Err(message) => return self.runtime_error(&message),
                    }
                }
                OpCode::ForIterator => {
                    let offset = read_u16!();
                    let iterator = self.top().as_object();

                    if self.iterator_ended(iterator) {
                        // Loop exit; the hidden iterator slot is popped
                        // by the scope-ending pops that follow.
                        ip += offset;
                    } else {
                        let value = self.iterator_value(iterator);
                        self.iterator_advance(iterator);
                        push!(value);
                    }
                }

                OpCode::List => {
                    let count = read_byte!() as usize;
                    self.sync_ip(ip);

                    let start = self.stack_len() - count;
                    let elements: Vec<Value> =
                        (start..start + count).map(|i| self.stack_get(i)).collect();
                    let list = self.alloc(ObjBody::List(ListObj { elements }));
                    self.truncate(start);
                    push!(Value::object(list));
                }
                OpCode::Map => {
                    let count = read_byte!() as usize;
                    self.sync_ip(ip);

                    let start = self.stack_len() - count * 2;
                    let mut table = Table::new();
                    for pair in 0..count {
                        let key = self.stack_get(start + pair * 2);
                        let value = self.stack_get(start + pair * 2 + 1);
                        let hash = self.heap.value_hash(key);
                        table.put(key, hash, value);
                    }

                    let map = self.alloc(ObjBody::Map(MapObj { table }));
                    self.truncate(start);
                    push!(Value::object(map));
                }
                OpCode::Tuple => {
                    let count = read_byte!() as usize;
                    self.sync_ip(ip);

                    let start = self.stack_len() - count;
                    let elements: Vec<Value> =
                        (start..start + count).map(|i| self.stack_get(i)).collect();
                    let tuple =
                        self.alloc(ObjBody::Tuple(TupleObj { elements: elements.into() }));
                    self.truncate(start);
                    push!(Value::object(tuple));
                }
                OpCode::TupleUnpack => {
                    let count = read_byte!() as usize;
                    let value = self.top();
                    if !self.is_tuple(value) {
                        rt!("Can only unpack tuples.");
                    }

                    let elements: Vec<Value> =
                        self.heap.tuple(value.as_object()).elements.to_vec();
                    if elements.len() != count {
                        rt!(
                            "Expected a tuple of {} elements, but got {}.",
                            count,
                            elements.len()
                        );
                    }

                    self.pop();
                    for element in elements {
                        push!(element);
                    }
                }

                OpCode::Range => {
                    let step = self.pop();
                    let end = self.pop();
                    let begin = self.top();
                    if !begin.is_number() || !end.is_number() || !step.is_number() {
                        rt!("Range bounds must be numbers.");
                    }

                    self.sync_ip(ip);
                    let range = self.alloc(ObjBody::Range(RangeObj {
                        begin: begin.as_number(),
                        end: end.as_number(),
                        step: step.as_number(),
                    }));
                    self.set_top(Value::object(range));
                }
                OpCode::BuildString => {
                    let count = read_byte!() as usize;

                    let mut text = String::new();
                    for distance in (0..count).rev() {
                        let part = self.peek(distance);
                        text.push_str(&self.display_value(part));
                    }

                    self.sync_ip(ip);
                    let value = self.intern(&text);
                    for _ in 0..count {
                        self.pop();
                    }
                    push!(value);
                }

                OpCode::ImportModule => {
                    let path = self.top();
                    if !self.heap.is_string(path) {
                        rt!("Import path must be a string.");
                    }

                    self.sync_ip(ip);
                    let imported = module::import_module(self, path);
                    self.last_module = imported;
                    self.set_top(imported);
                }
                OpCode::SaveModule => {
                    self.last_module = self.pop();
                }
                OpCode::ImportAll => {
                    let module = self.last_module;
                    if self.is_module(module) {
                        let exports: Vec<(Value, u32, Value)> =
                            self.heap.module(module.as_object()).exports.iter().collect();
                        for (name, hash, value) in exports {
                            self.globals.put(name, hash, value);
                        }
                    }
                }
                OpCode::ImportByName => {
                    let name = read_constant!();
                    let hash = self.heap.value_hash(name);
                    let module = self.last_module;
                    let value = if self.is_module(module) {
                        self.heap
                            .module(module.as_object())
                            .exports
                            .get(name, hash)
                            .unwrap_or(Value::NIL)
                    } else {
                        Value::NIL
                    };
                    push!(value);
                }
            }
        }
    }

    // ---- type tests -------------------------------------------------

    fn is_class(&self, value: Value) -> bool {
        value.is_object() && matches!(self.heap.get(value.as_object()).body, ObjBody::Class(_))
    }

    fn is_closure(&self, value: Value) -> bool {
        value.is_object() && matches!(self.heap.get(value.as_object()).body, ObjBody::Closure(_))
    }

    fn is_tuple(&self, value: Value) -> bool {
        value.is_object() && matches!(self.heap.get(value.as_object()).body, ObjBody::Tuple(_))
    }

    fn is_module(&self, value: Value) -> bool {
        value.is_object() && matches!(self.heap.get(value.as_object()).body, ObjBody::Module(_))
    }

    pub fn type_name_of(&self, value: Value) -> &'static str {
        if value.is_number() {
            "Number"
        } else if value.is_bool() {
            "Boolean"
        } else if value.is_nil() {
            "Nil"
        } else if value.is_object() {
            self.heap.get(value.as_object()).type_name()
        } else {
            "Undefined"
        }
    }

    // ---- upvalues ---------------------------------------------------

    fn upvalue_get(&self, upvalue: ObjRef) -> Value {
        match &self.heap.upvalue(upvalue).state {
            UpvalueState::Closed(value) => *value,
            UpvalueState::Open { owner, slot } => self.heap.coroutine(*owner).stack[*slot],
        }
    }

    fn upvalue_set(&mut self, upvalue: ObjRef, value: Value) {
        match self.heap.upvalue(upvalue).state {
            UpvalueState::Closed(_) => {
                self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
            }
            UpvalueState::Open { owner, slot } => {
                self.heap.coroutine_mut(owner).stack[slot] = value;
            }
        }
    }

    fn open_slot(&self, upvalue: ObjRef) -> usize {
        match self.heap.upvalue(upvalue).state {
            UpvalueState::Open { slot, .. } => slot,
            UpvalueState::Closed(_) => unreachable!("closed upvalue on open list"),
        }
    }

    /// Finds or creates the upvalue for a live stack slot. The open
    /// list stays strictly descending by slot with one entry per slot.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let co_ref = self.cur();

        let mut previous: Option<ObjRef> = None;
        let mut cursor = self.heap.coroutine(co_ref).open_upvalues;
        while let Some(upvalue) = cursor {
            if self.open_slot(upvalue) <= slot {
                break;
            }
            previous = Some(upvalue);
            cursor = self.heap.upvalue(upvalue).next;
        }

        if let Some(upvalue) = cursor {
            if self.open_slot(upvalue) == slot {
                return upvalue;
            }
        }

        let created = self.alloc(ObjBody::Upvalue(UpvalueObj {
            state: UpvalueState::Open { owner: co_ref, slot },
            next: cursor,
        }));

        match previous {
            None => self.heap.coroutine_mut(co_ref).open_upvalues = Some(created),
            Some(previous) => self.heap.upvalue_mut(previous).next = Some(created),
        }

        created
    }

    /// Closes every open upvalue at or above `from_slot`, copying the
    /// stack value into the upvalue as its slot leaves the stack.
    fn close_upvalues(&mut self, co_ref: ObjRef, from_slot: usize) {
        loop {
            let head = match self.heap.coroutine(co_ref).open_upvalues {
                Some(head) if self.open_slot(head) >= from_slot => head,
                _ => return,
            };

            let slot = self.open_slot(head);
            let value = self.heap.coroutine(co_ref).stack[slot];

            let upvalue = self.heap.upvalue_mut(head);
            let next = upvalue.next;
            upvalue.state = UpvalueState::Closed(value);
            upvalue.next = None;

            self.heap.coroutine_mut(co_ref).open_upvalues = next;
        }
    }

    // ---- calls ------------------------------------------------------

    fn call_closure(&mut self, closure: ObjRef, argc: usize) -> Result<(), String> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity;
        if argc != arity {
            return Err(format!("Expected {} arguments but got {}", arity, argc));
        }

        let co = self.heap.coroutine(self.cur());
        if co.frames.len() == FRAMES_MAX {
            return Err("Stack overflow.".to_string());
        }

        let base = self.stack_len() - argc - 1;
        self.heap.coroutine_mut(self.cur()).frames.push(CallFrame { closure, ip: 0, base });
        Ok(())
    }

    fn call_native(&mut self, native: ObjRef, argc: usize) -> Result<(), String> {
        let (function, arity) = {
            let native = match &self.heap.get(native).body {
                ObjBody::Native(native) => native,
                _ => unreachable!("callee is not a native"),
            };
            (native.function, native.arity)
        };

        if argc != arity {
            return Err(format!("Expected {} arguments but got {}", arity, argc));
        }

        let base = self.stack_len() - argc;
        let result = function(self, base)?;
        self.truncate(base - 1);
        self.push(result)
    }

    fn call_coroutine(&mut self, coroutine: ObjRef, argc: usize) -> Result<(), String> {
        if argc > 1 {
            return Err(format!("Expected 0 or 1 argument but got {}.", argc));
        }

        if self.heap.coroutine(coroutine).done {
            return Err("Cannot resume coroutine that has already finished.".to_string());
        }

        let value = if argc == 1 { self.pop() } else { Value::NIL };

        let resumer = self.cur();
        let co = self.heap.coroutine_mut(coroutine);
        co.transfer = Some(resumer);

        // The resume argument surfaces as the value of the suspending
        // yield; the first resume has no suspended yield to feed.
        if co.started {
            if co.stack.len() >= STACK_MAX {
                return Err("Stack overflow.".to_string());
            }
            co.stack.push(value);
        }
        co.started = true;

        self.current = Some(coroutine);
        Ok(())
    }

    pub fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), String> {
        if !callee.is_object() {
            return Err("Can only call objects.".to_string());
        }

        let r = callee.as_object();
        match &self.heap.get(r).body {
            ObjBody::Closure(_) => self.call_closure(r, argc),
            ObjBody::Native(_) => self.call_native(r, argc),
            ObjBody::Coroutine(_) => self.call_coroutine(r, argc),
            ObjBody::Class(_) => {
                let instance =
                    self.alloc(ObjBody::Instance(InstanceObj { class: r, fields: Table::new() }));
                let slot = self.stack_len() - argc - 1;
                self.stack_set(slot, Value::object(instance));

                let hash = self.heap.value_hash(self.init_string);
                match self.heap.class(r).methods.get(self.init_string, hash) {
                    Some(initializer) => self.call_closure(initializer.as_object(), argc),
                    None if argc != 0 => {
                        Err(format!("Expected 0 arguments but got {}.", argc))
                    }
                    None => Ok(()),
                }
            }
            ObjBody::BoundMethod(_) => {
                let (receiver, method) = {
                    let bound = match &self.heap.get(r).body {
                        ObjBody::BoundMethod(bound) => bound,
                        _ => unreachable!(),
                    };
                    (bound.receiver, bound.method)
                };

                let slot = self.stack_len() - argc - 1;
                self.stack_set(slot, receiver);
                match &self.heap.get(method.as_object()).body {
                    ObjBody::Closure(_) => self.call_closure(method.as_object(), argc),
                    ObjBody::Native(_) => self.call_native(method.as_object(), argc),
                    _ => unreachable!("bound method is neither closure nor native"),
                }
            }
            _ => Err(format!(
                "Objects of type '{}' are not callable.",
                self.heap.get(r).type_name()
            )),
        }
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: Value,
        argc: usize,
    ) -> Result<(), String> {
        let hash = self.heap.value_hash(name);
        match self.heap.class(class).methods.get(name, hash) {
            Some(method) => self.call_closure(method.as_object(), argc),
            None => Err(format!("Undefined property '{}'.", self.heap.str_value(name))),
        }
    }

    fn invoke(&mut self, name: Value, argc: usize) -> Result<(), String> {
        let receiver = self.peek(argc);
        let hash = self.heap.value_hash(name);

        if receiver.is_object() {
            let r = receiver.as_object();
            match &self.heap.get(r).body {
                ObjBody::Instance(instance) => {
                    // A field holding a callable shadows the method.
                    if let Some(field) = instance.fields.get(name, hash) {
                        let slot = self.stack_len() - argc - 1;
                        self.stack_set(slot, field);
                        return self.call_value(field, argc);
                    }

                    let class = instance.class;
                    return self.invoke_from_class(class, name, argc);
                }
                ObjBody::Class(class) => {
                    if let Some(field) = class.fields.get(name, hash) {
                        let slot = self.stack_len() - argc - 1;
                        self.stack_set(slot, field);
                        return self.call_value(field, argc);
                    }

                    let metaclass = class.metaclass.expect("metaclass");
                    return self.invoke_from_class(metaclass, name, argc);
                }
                ObjBody::Module(module) => {
                    if let Some(export) = module.exports.get(name, hash) {
                        let slot = self.stack_len() - argc - 1;
                        self.stack_set(slot, export);
                        return self.call_value(export, argc);
                    }
                    return Err(format!(
                        "Undefined property '{}'.",
                        self.heap.str_value(name)
                    ));
                }
                _ => {}
            }
        }

        // Built-in type methods (strings, lists, maps, tuples, ...).
        let name_str = self.heap.str_value(name).to_string();
        match builtins::method_for(self, receiver, &name_str) {
            Some((_, function, arity)) => {
                if argc != arity {
                    return Err(format!("Expected {} arguments but got {}", arity, argc));
                }

                let base = self.stack_len() - argc;
                let result = function(self, base)?;
                self.truncate(base - 1);
                self.push(result)
            }
            None => Err(format!("Undefined property '{}'.", name_str)),
        }
    }

    // ---- properties and subscripts ----------------------------------

    fn bind_method(&mut self, class: ObjRef, name: Value) -> Result<(), String> {
        let hash = self.heap.value_hash(name);
        let method = match self.heap.class(class).methods.get(name, hash) {
            Some(method) => method,
            None => {
                return Err(format!("Undefined property '{}'.", self.heap.str_value(name)))
            }
        };

        let receiver = self.top();
        let bound = self.alloc(ObjBody::BoundMethod(BoundMethodObj { receiver, method }));
        self.set_top(Value::object(bound));
        Ok(())
    }

    fn load_property(&mut self, name: Value) -> Result<(), String> {
        let receiver = self.top();
        let hash = self.heap.value_hash(name);

        if receiver.is_object() {
            let r = receiver.as_object();
            match &self.heap.get(r).body {
                ObjBody::Instance(instance) => {
                    if let Some(field) = instance.fields.get(name, hash) {
                        self.set_top(field);
                        return Ok(());
                    }
                    let class = instance.class;
                    return self.bind_method(class, name);
                }
                ObjBody::Class(class) => {
                    if let Some(field) = class.fields.get(name, hash) {
                        self.set_top(field);
                        return Ok(());
                    }
                    let metaclass = class.metaclass.expect("metaclass");
                    return self.bind_method(metaclass, name);
                }
                ObjBody::Module(module) => {
                    return match module.exports.get(name, hash) {
                        Some(export) => {
                            self.set_top(export);
                            Ok(())
                        }
                        None => Err(format!(
                            "Undefined property '{}'.",
                            self.heap.str_value(name)
                        )),
                    };
                }
                _ => {}
            }

            // A built-in method read as a property binds over the
            // receiver.
            let name_str = self.heap.str_value(name).to_string();
            if let Some((native_name, function, arity)) =
                builtins::method_for(self, receiver, &name_str)
            {
                let native = self.alloc(ObjBody::Native(NativeObj {
                    name: native_name,
                    function,
                    arity,
                }));
                self.heap.push_temporary(Value::object(native));
                let bound = self.alloc(ObjBody::BoundMethod(BoundMethodObj {
                    receiver,
                    method: Value::object(native),
                }));
                self.heap.pop_temporary();
                self.set_top(Value::object(bound));
                return Ok(());
            }

            return Err(format!("Undefined property '{}'.", name_str));
        }

        Err("Can only access properties of class instances.".to_string())
    }

    fn store_property(&mut self, name: Value) -> Result<(), String> {
        let receiver = self.top();
        let value = self.peek(1);
        let hash = self.heap.value_hash(name);

        if receiver.is_object() {
            let r = receiver.as_object();
            match &mut self.heap.get_mut(r).body {
                ObjBody::Instance(instance) => {
                    instance.fields.put(name, hash, value);
                    self.pop();
                    return Ok(());
                }
                ObjBody::Class(class) => {
                    class.fields.put(name, hash, value);
                    self.pop();
                    return Ok(());
                }
                ObjBody::Module(module) => {
                    module.exports.put(name, hash, value);
                    self.pop();
                    return Ok(());
                }
                _ => {}
            }
        }

        Err("Can only set properties of class instances.".to_string())
    }

    fn element_index(length: usize, index: f64) -> Option<usize> {
        let index = index as i64;
        if index < 0 {
            let back = index.unsigned_abs() as usize;
            if back > length {
                return None;
            }
            Some(length - back)
        } else if (index as usize) < length {
            Some(index as usize)
        } else {
            None
        }
    }

    fn get_subscript(&mut self, object: Value, index: Value) -> Result<Value, String> {
        if object.is_object() {
            match &self.heap.get(object.as_object()).body {
                ObjBody::List(list) => {
                    if !index.is_number() {
                        return Err("Can only subscript lists with numbers.".to_string());
                    }
                    return Self::element_index(list.elements.len(), index.as_number())
                        .map(|i| list.elements[i])
                        .ok_or_else(|| "Index out of bounds.".to_string());
                }
                ObjBody::Tuple(tuple) => {
                    if !index.is_number() {
                        return Err("Can only subscript tuples with numbers.".to_string());
                    }
                    return Self::element_index(tuple.elements.len(), index.as_number())
                        .map(|i| tuple.elements[i])
                        .ok_or_else(|| "Index out of bounds.".to_string());
                }
                ObjBody::Map(_) => {
                    let hash = self.heap.value_hash(index);
                    return self
                        .heap
                        .map(object.as_object())
                        .table
                        .get(index, hash)
                        .ok_or_else(|| "Key not found.".to_string());
                }
                ObjBody::Range(range) => {
                    if !index.is_number() {
                        return Err("Can only subscript ranges with numbers.".to_string());
                    }

                    let total = ((range.end - range.begin) / range.step) as i64;
                    let n = index.as_number() as i64;
                    if n < -total || n >= total {
                        return Err("Range subscript out of range.".to_string());
                    }

                    let high = if n >= 0 { range.begin } else { range.end };
                    return Ok(Value::number(high + n as f64 * range.step));
                }
                _ => {}
            }
        }

        Err(format!(
            "Objects of type '{}' cannot be subscripted.",
            self.type_name_of(object)
        ))
    }

    fn set_subscript(&mut self, object: Value, index: Value, value: Value) -> Result<(), String> {
        if object.is_object() {
            let r = object.as_object();
            match &self.heap.get(r).body {
                ObjBody::List(list) => {
                    if !index.is_number() {
                        return Err("Can only subscript lists with numbers.".to_string());
                    }
                    let slot = Self::element_index(list.elements.len(), index.as_number())
                        .ok_or_else(|| "Index out of bounds.".to_string())?;
                    self.heap.list_mut(r).elements[slot] = value;
                    return Ok(());
                }
                ObjBody::Tuple(tuple) => {
                    if !index.is_number() {
                        return Err("Can only subscript tuples with numbers.".to_string());
                    }
                    let slot = Self::element_index(tuple.elements.len(), index.as_number())
                        .ok_or_else(|| "Index out of bounds.".to_string())?;
                    self.heap.tuple_mut(r).elements[slot] = value;
                    return Ok(());
                }
                ObjBody::Map(_) => {
                    let hash = self.heap.value_hash(index);
                    self.heap.map_mut(r).table.put(index, hash, value);
                    return Ok(());
                }
                _ => {}
            }
        }

        Err(format!(
            "Objects of type '{}' cannot be subscripted.",
            self.type_name_of(object)
        ))
    }

    // ---- iterators --------------------------------------------------

    fn make_iterator(&mut self, value: Value) -> Result<Value, String> {
        if value.is_object() {
            match &self.heap.get(value.as_object()).body {
                ObjBody::List(_) | ObjBody::Tuple(_) => {
                    let iterator = self.alloc(ObjBody::Iterator(IteratorObj {
                        container: value,
                        index: 0,
                        current: Value::NIL,
                    }));
                    return Ok(Value::object(iterator));
                }
                ObjBody::Range(range) => {
                    let begin = range.begin;
                    let iterator = self.alloc(ObjBody::Iterator(IteratorObj {
                        container: value,
                        index: 0,
                        current: Value::number(begin),
                    }));
                    return Ok(Value::object(iterator));
                }
                _ => {}
            }
        }

        Err(format!("Objects of type '{}' are not iterable.", self.type_name_of(value)))
    }

    fn iterator_ended(&self, iterator: ObjRef) -> bool {
        let it = self.heap.iterator(iterator);
        match &self.heap.get(it.container.as_object()).body {
            ObjBody::List(list) => it.index >= list.elements.len(),
            ObjBody::Tuple(tuple) => it.index >= tuple.elements.len(),
            ObjBody::Range(range) => {
                let current = it.current.as_number();
                if range.step > 0.0 {
                    current >= range.end
                } else {
                    current <= range.end
                }
            }
            _ => true,
        }
    }

    fn iterator_value(&self, iterator: ObjRef) -> Value {
        let it = self.heap.iterator(iterator);
        match &self.heap.get(it.container.as_object()).body {
            ObjBody::List(list) => list.elements[it.index],
            ObjBody::Tuple(tuple) => tuple.elements[it.index],
            ObjBody::Range(_) => it.current,
            _ => Value::NIL,
        }
    }

    fn iterator_advance(&mut self, iterator: ObjRef) {
        let container = self.heap.iterator(iterator).container;
        match &self.heap.get(container.as_object()).body {
            ObjBody::List(_) | ObjBody::Tuple(_) => {
                self.heap.iterator_mut(iterator).index += 1;
            }
            ObjBody::Range(range) => {
                let step = range.step;
                let it = self.heap.iterator_mut(iterator);
                it.current = Value::number(it.current.as_number() + step);
            }
            _ => {}
        }
    }

    // ---- classes ----------------------------------------------------

    /// Creates a class/metaclass pair; the metaclass carries the
    /// class's static methods and is named `"<name> meta"`.
    fn new_class(&mut self, name: Value) -> ObjRef {
        self.heap.push_temporary(name);
        let meta_name_text = format!("{} meta", self.heap.str_value(name));
        let meta_name = self.intern(&meta_name_text);
        self.heap.push_temporary(meta_name);

        let metaclass = self.alloc(ObjBody::Class(ClassObj {
            name: meta_name,
            methods: Table::new(),
            fields: Table::new(),
            metaclass: None,
        }));
        self.heap.push_temporary(Value::object(metaclass));

        let class = self.alloc(ObjBody::Class(ClassObj {
            name,
            methods: Table::new(),
            fields: Table::new(),
            metaclass: Some(metaclass),
        }));

        self.heap.pop_temporary();
        self.heap.pop_temporary();
        self.heap.pop_temporary();
        class
    }

    // ---- display ----------------------------------------------------

    pub fn display_value(&self, value: Value) -> String {
        if value.is_number() {
            return format_number(value.as_number());
        }
        if value.is_nil() {
            return "nil".to_string();
        }
        if value.is_undefined() {
            return "undefined".to_string();
        }
        if value.is_bool() {
            return if value.as_bool() { "true" } else { "false" }.to_string();
        }

        let r = value.as_object();
        match &self.heap.get(r).body {
            ObjBody::Str(s) => s.chars.to_string(),
            ObjBody::Function(f) => format!("<fn {}>", self.heap.str_value(f.name)),
            ObjBody::Closure(c) => {
                let name = self.heap.function(c.function).name;
                format!("<fn {}>", self.heap.str_value(name))
            }
            ObjBody::Native(n) => format!("<native fn {}>", n.name),
            ObjBody::Upvalue(_) => "upvalue".to_string(),
            ObjBody::Class(c) => self.heap.str_value(c.name).to_string(),
            ObjBody::Instance(i) => {
                let name = self.heap.class(i.class).name;
                format!("{} instance", self.heap.str_value(name))
            }
            ObjBody::BoundMethod(b) => self.display_value(b.method),
            ObjBody::List(l) => {
                let parts: Vec<String> =
                    l.elements.iter().map(|e| self.display_value(*e)).collect();
                format!("[{}]", parts.join(", "))
            }
            ObjBody::Tuple(t) => {
                let parts: Vec<String> =
                    t.elements.iter().map(|e| self.display_value(*e)).collect();
                format!("({})", parts.join(", "))
            }
            ObjBody::Map(_) => "<map>".to_string(),
            ObjBody::Range(range) => format!(
                "{}..{}:{}",
                format_number(range.begin),
                format_number(range.end),
                format_number(range.step)
            ),
            ObjBody::Iterator(_) => "<iterator>".to_string(),
            ObjBody::Module(m) => format!("<module '{}'>", self.heap.str_value(m.name)),
            ObjBody::Coroutine(c) => {
                let name = self.heap.function(self.heap.closure(c.closure).function).name;
                format!("<coroutine '{}'>", self.heap.str_value(name))
            }
        }
    }
}

/// %g-flavoured number formatting: integral values print without a
/// fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
