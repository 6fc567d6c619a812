// File: src/debug.rs
//
// Bytecode disassembler, used by --disassemble (whole chunks after
// compilation) and --trace (one instruction per dispatch with the
// current stack).

use crate::bytecode::{Chunk, OpCode};
use crate::object::ObjBody;
use crate::value::ObjRef;
use crate::vm::Vm;

fn op_name(op: OpCode) -> &'static str {
    match op {
        OpCode::LoadConstant => "LOAD_CONSTANT",
        OpCode::LoadTrue => "LOAD_TRUE",
        OpCode::LoadFalse => "LOAD_FALSE",
        OpCode::LoadNil => "LOAD_NIL",
        OpCode::NotEqual => "NOT_EQUAL",
        OpCode::Equal => "EQUAL",
        OpCode::Greater => "GREATER",
        OpCode::GreaterEqual => "GREATER_EQUAL",
        OpCode::Less => "LESS",
        OpCode::LessEqual => "LESS_EQUAL",
        OpCode::Not => "NOT",
        OpCode::Negate => "NEGATE",
        OpCode::Inc => "INC",
        OpCode::Dec => "DEC",
        OpCode::BitwiseNot => "BITWISE_NOT",
        OpCode::Add => "ADD",
        OpCode::Subtract => "SUBTRACT",
        OpCode::Multiply => "MULTIPLY",
        OpCode::Divide => "DIVIDE",
        OpCode::Modulo => "MODULO",
        OpCode::Power => "POWER",
        OpCode::BitwiseAnd => "BITWISE_AND",
        OpCode::BitwiseOr => "BITWISE_OR",
        OpCode::BitwiseXor => "BITWISE_XOR",
        OpCode::BitwiseLeftShift => "BITWISE_LEFT_SHIFT",
        OpCode::BitwiseRightShift => "BITWISE_RIGHT_SHIFT",
        OpCode::Print => "PRINT",
        OpCode::Loop => "LOOP",
        OpCode::Jump => "JUMP",
        OpCode::JumpIfFalse => "JUMP_IF_FALSE",
        OpCode::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
        OpCode::PopJumpIfEqual => "POP_JUMP_IF_EQUAL",
        OpCode::JumpIfNotNil => "JUMP_IF_NOT_NIL",
        OpCode::PopLoopIfTrue => "POP_LOOP_IF_TRUE",
        OpCode::Pop => "POP",
        OpCode::Dup => "DUP",
        OpCode::DupTwo => "DUP_TWO",
        OpCode::Swap => "SWAP",
        OpCode::SwapThree => "SWAP_THREE",
        OpCode::SwapFour => "SWAP_FOUR",
        OpCode::DefineGlobal => "DEFINE_GLOBAL",
        OpCode::LoadGlobal => "LOAD_GLOBAL",
        OpCode::StoreGlobal => "STORE_GLOBAL",
        OpCode::LoadLocal => "LOAD_LOCAL",
        OpCode::StoreLocal => "STORE_LOCAL",
        OpCode::LoadUpvalue => "LOAD_UPVALUE",
        OpCode::StoreUpvalue => "STORE_UPVALUE",
        OpCode::LoadProperty => "LOAD_PROPERTY",
        OpCode::StoreProperty => "STORE_PROPERTY",
        OpCode::LoadPropertySafe => "LOAD_PROPERTY_SAFE",
        OpCode::StorePropertySafe => "STORE_PROPERTY_SAFE",
        OpCode::LoadSubscript => "LOAD_SUBSCRIPT",
        OpCode::StoreSubscript => "STORE_SUBSCRIPT",
        OpCode::LoadSubscriptSafe => "LOAD_SUBSCRIPT_SAFE",
        OpCode::StoreSubscriptSafe => "STORE_SUBSCRIPT_SAFE",
        OpCode::Closure => "CLOSURE",
        OpCode::CloseUpvalue => "CLOSE_UPVALUE",
        OpCode::Call => "CALL",
        OpCode::Invoke => "INVOKE",
        OpCode::InvokeSafe => "INVOKE_SAFE",
        OpCode::Return => "RETURN",
        OpCode::Class => "CLASS",
        OpCode::Method => "METHOD",
        OpCode::StaticMethod => "STATIC_METHOD",
        OpCode::Inherit => "INHERIT",
        OpCode::GetSuper => "GET_SUPER",
        OpCode::SuperInvoke => "SUPER_INVOKE",
        OpCode::EndClass => "END_CLASS",
        OpCode::Coroutine => "COROUTINE",
        OpCode::Yield => "YIELD",
        OpCode::Iterator => "ITERATOR",
        OpCode::ForIterator => "FOR_ITERATOR",
        OpCode::List => "LIST",
        OpCode::Map => "MAP",
        OpCode::Tuple => "TUPLE",
        OpCode::TupleUnpack => "TUPLE_UNPACK",
        OpCode::Range => "RANGE",
        OpCode::BuildString => "BUILD_STRING",
        OpCode::ImportModule => "IMPORT_MODULE",
        OpCode::SaveModule => "SAVE_MODULE",
        OpCode::ImportAll => "IMPORT_ALL",
        OpCode::ImportByName => "IMPORT_BY_NAME",
    }
}

/// Prints a whole function chunk, then recurses into the functions in
/// its constant pool.
pub fn disassemble_function(vm: &Vm, function: ObjRef) {
    let name = vm.heap.str_value(vm.heap.function(function).name).to_string();
    let chunk = vm.heap.function(function).chunk.clone();

    println!("== {} ==", name);
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(vm, &chunk, offset);
    }

    for constant in &chunk.constants {
        if constant.is_object() {
            if let ObjBody::Function(_) = vm.heap.get(constant.as_object()).body {
                println!();
                disassemble_function(vm, constant.as_object());
            }
        }
    }
}

/// Prints the current stack and the instruction about to execute.
pub fn trace_instruction(vm: &Vm, chunk: &Chunk, offset: usize, base: usize) {
    print!("\t");
    for (index, slot) in vm.stack_slots().iter().enumerate() {
        if index == base {
            print!("|");
        }
        print!("[ {} ]", vm.display_value(*slot));
    }
    println!();

    disassemble_instruction(vm, chunk, offset);
}

pub fn disassemble_instruction(vm: &Vm, chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);

    let line = chunk.line_at(offset);
    if offset > 0 && line == chunk.line_at(offset - 1) {
        print!("   | ");
    } else {
        print!("{:4} ", line);
    }

    let op = OpCode::from_byte(chunk.code[offset]);
    match op {
        OpCode::LoadConstant
        | OpCode::DefineGlobal
        | OpCode::LoadGlobal
        | OpCode::StoreGlobal
        | OpCode::LoadProperty
        | OpCode::StoreProperty
        | OpCode::LoadPropertySafe
        | OpCode::StorePropertySafe
        | OpCode::Class
        | OpCode::Method
        | OpCode::StaticMethod
        | OpCode::GetSuper
        | OpCode::ImportByName => constant_instruction(vm, chunk, op, offset),
        OpCode::LoadLocal
        | OpCode::StoreLocal
        | OpCode::LoadUpvalue
        | OpCode::StoreUpvalue
        | OpCode::Call
        | OpCode::List
        | OpCode::Map
        | OpCode::Tuple
        | OpCode::TupleUnpack
        | OpCode::BuildString => byte_instruction(chunk, op, offset),
        OpCode::Jump
        | OpCode::JumpIfFalse
        | OpCode::PopJumpIfFalse
        | OpCode::PopJumpIfEqual
        | OpCode::JumpIfNotNil
        | OpCode::ForIterator => jump_instruction(chunk, op, offset, 1),
        OpCode::Loop | OpCode::PopLoopIfTrue => jump_instruction(chunk, op, offset, -1),
        OpCode::Invoke | OpCode::InvokeSafe | OpCode::SuperInvoke => {
            invoke_instruction(vm, chunk, op, offset)
        }
        OpCode::Closure => closure_instruction(vm, chunk, offset),
        _ => {
            println!("{}", op_name(op));
            offset + 1
        }
    }
}

fn constant_instruction(vm: &Vm, chunk: &Chunk, op: OpCode, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    let value = chunk.constants[index];
    println!("{:<20} {:4} '{}'", op_name(op), index, vm.display_value(value));
    offset + 2
}

fn byte_instruction(chunk: &Chunk, op: OpCode, offset: usize) -> usize {
    let operand = chunk.code[offset + 1];
    println!("{:<20} {:4}", op_name(op), operand);
    offset + 2
}

fn jump_instruction(chunk: &Chunk, op: OpCode, offset: usize, sign: i64) -> usize {
    let jump = chunk.read_u16(offset + 1) as i64;
    let target = offset as i64 + 3 + sign * jump;
    println!("{:<20} {:4} -> {}", op_name(op), offset, target);
    offset + 3
}

fn invoke_instruction(vm: &Vm, chunk: &Chunk, op: OpCode, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    let argc = chunk.code[offset + 2];
    let name = chunk.constants[index];
    println!("{:<20} ({} args) {:4} '{}'", op_name(op), argc, index, vm.display_value(name));
    offset + 3
}

fn closure_instruction(vm: &Vm, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    let value = chunk.constants[index];
    println!("{:<20} {:4} {}", "CLOSURE", index, vm.display_value(value));

    let function = value.as_object();
    let upvalue_count = vm.heap.function(function).upvalue_count;

    let mut offset = offset + 2;
    for _ in 0..upvalue_count {
        let is_local = chunk.code[offset] != 0;
        let slot = chunk.code[offset + 1];
        println!(
            "{:04}    |                     {} {}",
            offset,
            if is_local { "local" } else { "upvalue" },
            slot
        );
        offset += 2;
    }

    offset
}
