// File: src/compiler.rs
//
// Single-pass bytecode compiler for Kestrel. Walks the syntactic tree
// and emits bytecode while tracking lexical scopes, closure upvalues,
// loop control flow and class context. Nested functions compile on an
// explicit state stack (the `enclosing` chain); the tree is dropped as
// soon as compilation finishes.

use std::rc::Rc;

use crate::ast::*;
use crate::bytecode::{Chunk, OpCode};
use crate::lexer::{Token, TokenKind};
use crate::object::{FunctionObj, ObjBody};
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_CONSTANTS: usize = 256;
const MAX_JUMP: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Lambda,
    Method,
    StaticMethod,
    Initializer,
    StaticInitializer,
}

impl FunctionKind {
    fn is_initializer(self) -> bool {
        matches!(self, FunctionKind::Initializer | FunctionKind::StaticInitializer)
    }

    fn is_method(self) -> bool {
        matches!(
            self,
            FunctionKind::Method
                | FunctionKind::StaticMethod
                | FunctionKind::Initializer
                | FunctionKind::StaticInitializer
        )
    }
}

struct Local {
    name: String,
    /// -1 marks "declared but not yet initialised".
    depth: i32,
    captured: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct UpvalueRef {
    index: u8,
    is_local: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ControlKind {
    For,
    ForIn,
    While,
    DoWhile,
    When,
}

impl ControlKind {
    fn is_loop(self) -> bool {
        !matches!(self, ControlKind::When)
    }
}

struct ControlBlock {
    kind: ControlKind,
    start: usize,
    breaks: Vec<usize>,
}

/// Per-function compiler state; the stack of these forms the
/// `enclosing` chain.
struct FnState {
    kind: FunctionKind,
    name: String,
    arity: usize,
    chunk: Chunk,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueRef>,
    scope_depth: i32,
    blocks: Vec<ControlBlock>,
}

impl FnState {
    fn new(kind: FunctionKind, name: &str) -> FnState {
        let slot_zero = Local {
            name: if kind.is_method() { "this".to_string() } else { String::new() },
            depth: 0,
            captured: false,
        };

        FnState {
            kind,
            name: name.to_string(),
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![slot_zero],
            upvalues: Vec::new(),
            scope_depth: 0,
            blocks: Vec::new(),
        }
    }
}

struct ClassState {
    name: String,
    has_superclass: bool,
}

pub struct Compiler<'a> {
    vm: &'a mut Vm,
    states: Vec<FnState>,
    classes: Vec<ClassState>,
    module: Value,
    /// Current token, used for error positions and line numbers.
    token: Token,
    error: bool,
    panic: bool,
}

/// Compiles a source string into the top-level script function.
/// Returns `None` after reporting if parsing or compilation failed.
pub fn compile(vm: &mut Vm, source: &str, module: Value) -> Option<ObjRef> {
    let ast = crate::parser::parse(source)?;

    // In-progress functions are plain values until finished, so
    // collection is deferred for the duration of the compile.
    vm.heap.gc_deferred = true;

    let mut compiler = Compiler {
        vm,
        states: vec![FnState::new(FunctionKind::Script, "script")],
        classes: Vec::new(),
        module,
        token: Token::none(),
        error: false,
        panic: false,
    };

    for decl in &ast.body {
        compiler.compile_declaration(decl);
    }

    let function = compiler.finish_state();
    let had_error = compiler.error;
    vm.heap.gc_deferred = false;

    if had_error {
        None
    } else {
        Some(function)
    }
}

impl<'a> Compiler<'a> {
    // ---- errors -----------------------------------------------------

    fn error(&mut self, message: &str) {
        if self.panic {
            return;
        }

        eprint!("[Line {}] Error", self.token.line);
        match self.token.kind {
            TokenKind::Eof => eprint!(" at the end"),
            TokenKind::Error | TokenKind::None => {}
            _ => eprint!(" at '{}'", self.token.lexeme),
        }
        eprintln!(": {}", message);

        self.error = true;
        self.panic = true;
    }

    fn set_token(&mut self, token: &Token) {
        self.token = token.clone();
    }

    // ---- emission primitives ----------------------------------------

    fn state(&mut self) -> &mut FnState {
        self.states.last_mut().expect("compiler state")
    }

    fn current_offset(&mut self) -> usize {
        self.state().chunk.code.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.token.line;
        self.state().chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_op_byte(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.state().chunk.add_constant(value);
        if index >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }

        index as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op_byte(OpCode::LoadConstant, index);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let value = self.vm.intern(name);
        self.make_constant(value)
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xFF);
        self.emit_byte(0xFF);
        self.current_offset() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_offset() - offset - 2;
        if jump > MAX_JUMP {
            self.error("Too much code to jump over.");
        }

        self.state().chunk.code[offset] = (jump & 0xFF) as u8;
        self.state().chunk.code[offset + 1] = ((jump >> 8) & 0xFF) as u8;
    }

    fn emit_loop(&mut self, start: usize, op: OpCode) {
        self.emit_op(op);

        let offset = self.current_offset() - start + 2;
        if offset > MAX_JUMP {
            self.error("Loop body is too large.");
        }

        self.emit_byte((offset & 0xFF) as u8);
        self.emit_byte(((offset >> 8) & 0xFF) as u8);
    }

    fn emit_return(&mut self) {
        if self.state().kind.is_initializer() {
            self.emit_op_byte(OpCode::LoadLocal, 0);
        } else {
            self.emit_op(OpCode::LoadNil);
        }

        self.emit_op(OpCode::Return);
    }

    /// Seals the innermost function state into a Function object.
    fn finish_state(&mut self) -> ObjRef {
        self.emit_return();

        let state = self.states.pop().expect("compiler state");
        let name = self.vm.intern(&state.name);
        let function = FunctionObj {
            arity: state.arity,
            upvalue_count: state.upvalues.len(),
            name,
            module: self.module,
            chunk: Rc::new(state.chunk),
        };

        self.vm.heap.allocate(ObjBody::Function(function))
    }

    // ---- scopes and variables ---------------------------------------

    fn begin_scope(&mut self) {
        self.state().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.state().scope_depth -= 1;

        loop {
            let state = self.states.last_mut().expect("compiler state");
            let leaving = match state.locals.last() {
                Some(local) if local.depth > state.scope_depth => Some(local.captured),
                _ => None,
            };

            match leaving {
                Some(captured) => {
                    state.locals.pop();
                    if captured {
                        self.emit_op(OpCode::CloseUpvalue);
                    } else {
                        self.emit_op(OpCode::Pop);
                    }
                }
                None => break,
            }
        }
    }

    fn add_local(&mut self, name: &str) {
        if self.state().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }

        self.state().locals.push(Local { name: name.to_string(), depth: -1, captured: false });
    }

    fn initialize_local(&mut self) {
        if self.state().scope_depth != 0 {
            let depth = self.state().scope_depth;
            self.state().locals.last_mut().expect("local").depth = depth;
        }
    }

    fn initialize_local_relative(&mut self, back: usize) {
        if self.state().scope_depth != 0 {
            let depth = self.state().scope_depth;
            let state = self.state();
            let index = state.locals.len() - 1 - back;
            state.locals[index].depth = depth;
        }
    }

    fn declare_local_variable(&mut self, name: &str) {
        if self.state().scope_depth == 0 {
            return;
        }

        let state = self.states.last().expect("compiler state");
        for local in state.locals.iter().rev() {
            if local.depth != -1 && local.depth < state.scope_depth {
                break;
            }
            if local.name == name {
                self.error("Variable with this name already declared in this scope.");
                break;
            }
        }

        self.add_local(name);
    }

    /// Returns the global-name constant index at depth 0, otherwise
    /// declares a local and returns 0.
    fn declare_variable(&mut self, name: &str) -> u8 {
        if self.state().scope_depth == 0 {
            self.identifier_constant(name)
        } else {
            self.declare_local_variable(name);
            0
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.state().scope_depth == 0 {
            self.emit_op_byte(OpCode::DefineGlobal, global);
        } else {
            self.initialize_local();
        }
    }

    fn resolve_local_at(&mut self, state_index: usize, name: &str) -> Option<usize> {
        let mut uninitialised = false;
        let mut found = None;

        {
            let state = &self.states[state_index];
            for (index, local) in state.locals.iter().enumerate().rev() {
                if local.name == name {
                    if local.depth == -1 {
                        uninitialised = true;
                    }
                    found = Some(index);
                    break;
                }
            }
        }

        if uninitialised {
            self.error("Cannot read local variable in its own initializer.");
        }
        found
    }

    fn add_upvalue(&mut self, state_index: usize, index: u8, is_local: bool) -> usize {
        let new = UpvalueRef { index, is_local };
        if let Some(existing) =
            self.states[state_index].upvalues.iter().position(|up| *up == new)
        {
            return existing;
        }

        if self.states[state_index].upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }

        self.states[state_index].upvalues.push(new);
        self.states[state_index].upvalues.len() - 1
    }

    fn resolve_upvalue(&mut self, state_index: usize, name: &str) -> Option<usize> {
        if state_index == 0 {
            return None;
        }

        let enclosing = state_index - 1;
        if let Some(local) = self.resolve_local_at(enclosing, name) {
            self.states[enclosing].locals[local].captured = true;
            return Some(self.add_upvalue(state_index, local as u8, true));
        }

        if let Some(upvalue) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(state_index, upvalue as u8, false));
        }

        None
    }

    fn named_variable(&mut self, name: &str, context: ExprContext) {
        let current = self.states.len() - 1;

        let (op_load, op_store, operand) =
            if let Some(slot) = self.resolve_local_at(current, name) {
                (OpCode::LoadLocal, OpCode::StoreLocal, slot as u8)
            } else if let Some(slot) = self.resolve_upvalue(current, name) {
                (OpCode::LoadUpvalue, OpCode::StoreUpvalue, slot as u8)
            } else {
                let constant = self.identifier_constant(name);
                (OpCode::LoadGlobal, OpCode::StoreGlobal, constant)
            };

        let op = if context == ExprContext::Load { op_load } else { op_store };
        self.emit_op_byte(op, operand);
    }

    // ---- control blocks ---------------------------------------------

    fn enter_control_block(&mut self, kind: ControlKind, start: usize) {
        self.state().blocks.push(ControlBlock { kind, start, breaks: Vec::new() });
    }

    fn exit_control_block(&mut self) {
        let block = self.state().blocks.pop().expect("control block");
        for address in block.breaks {
            self.patch_jump(address);
        }
    }

    fn push_control_break(&mut self, address: usize) {
        if let Some(block) = self.state().blocks.last_mut() {
            block.breaks.push(address);
        }
    }

    fn closest_loop(&mut self) -> Option<usize> {
        self.state().blocks.iter().rposition(|block| block.kind.is_loop())
    }

    // ---- declarations -----------------------------------------------

    fn compile_declaration(&mut self, decl: &Decl) {
        self.panic = false;

        match decl {
            Decl::Import(import) => self.compile_import_decl(import),
            Decl::Class(class) => self.compile_class_decl(class),
            Decl::Function(function) => self.compile_function_decl(function),
            Decl::Variable(variable) => self.compile_variable_decl(variable),
            Decl::Statement(stmt) => self.compile_statement(stmt),
        }
    }

    fn compile_import_decl(&mut self, decl: &ImportDecl) {
        self.compile_expression(&decl.module_name);
        self.emit_op(OpCode::ImportModule);

        match &decl.kind {
            ImportKind::All => {
                self.emit_op(OpCode::Pop);
                self.emit_op(OpCode::ImportAll);
            }
            ImportKind::As(alias) => {
                self.set_token(alias);
                let global = self.declare_variable(&alias.lexeme);
                self.define_variable(global);
            }
            ImportKind::For(names) => {
                self.emit_op(OpCode::SaveModule);
                for name in names {
                    self.set_token(name);
                    let constant = self.identifier_constant(&name.lexeme);
                    self.emit_op_byte(OpCode::ImportByName, constant);

                    let global = self.declare_variable(&name.lexeme);
                    self.define_variable(global);
                }
            }
        }
    }

    fn compile_class_decl(&mut self, decl: &ClassDecl) {
        let identifier = decl.identifier.clone();
        self.set_token(&identifier);
        let name = self.identifier_constant(&identifier.lexeme);

        self.declare_local_variable(&identifier.lexeme);
        self.emit_op_byte(OpCode::Class, name);
        self.define_variable(name);

        self.classes
            .push(ClassState { name: identifier.lexeme.clone(), has_superclass: false });

        if let Some(superclass) = &decl.superclass {
            self.set_token(superclass);
            self.named_variable(&superclass.lexeme, ExprContext::Load);

            if identifier.lexeme == superclass.lexeme {
                self.error("A class cannot inherit from itself.");
            }

            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(&identifier.lexeme, ExprContext::Load);
            self.emit_op(OpCode::Inherit);

            self.classes.last_mut().expect("class state").has_superclass = true;
        }

        self.named_variable(&identifier.lexeme, ExprContext::Load);

        for method in &decl.methods {
            self.compile_method(method);
        }

        // A static initializer's return lands where the class sat; the
        // trailing pop balances both the with- and without-init paths.
        self.emit_op(OpCode::EndClass);
        self.emit_op(OpCode::Pop);

        if self.classes.last().expect("class state").has_superclass {
            self.end_scope();
        }

        self.classes.pop();
    }

    fn compile_method(&mut self, method: &Method) {
        let identifier = method.function.identifier.clone();
        self.set_token(&identifier);
        let name = self.identifier_constant(&identifier.lexeme);

        let kind = if identifier.lexeme == "init" {
            if method.is_static {
                FunctionKind::StaticInitializer
            } else {
                FunctionKind::Initializer
            }
        } else if method.is_static {
            FunctionKind::StaticMethod
        } else {
            FunctionKind::Method
        };

        self.compile_function(
            &method.function.function,
            kind,
            &identifier.lexeme,
            method.function.coroutine,
        );

        let op = if method.is_static { OpCode::StaticMethod } else { OpCode::Method };
        self.emit_op_byte(op, name);
    }

    fn compile_function_decl(&mut self, decl: &FunctionDecl) {
        let identifier = decl.function.identifier.clone();
        self.set_token(&identifier);
        let global = self.declare_variable(&identifier.lexeme);
        self.initialize_local();
        self.compile_function(
            &decl.function.function,
            FunctionKind::Function,
            &identifier.lexeme,
            decl.function.coroutine,
        );
        self.define_variable(global);
    }

    fn compile_function(
        &mut self,
        function: &FunctionLit,
        kind: FunctionKind,
        name: &str,
        coroutine: bool,
    ) {
        let state_name = match kind {
            FunctionKind::Lambda => "lambda",
            FunctionKind::Script => "script",
            _ => name,
        };
        self.states.push(FnState::new(kind, state_name));
        self.begin_scope();

        for parameter in &function.parameters {
            self.set_token(parameter);
            let index = self.declare_variable(&parameter.lexeme);
            self.define_variable(index);
        }
        self.state().arity = function.parameters.len();

        if kind == FunctionKind::StaticInitializer && !function.parameters.is_empty() {
            self.error("Static initializer cannot accept parameters.");
        }
        if coroutine && kind.is_initializer() {
            self.error("Initializer cannot be a coroutine.");
        }

        if coroutine {
            // The body moves into an inner closure (parameters reach it
            // as upvalues); each call of the declared function then
            // returns a fresh coroutine over that closure.
            self.compile_coroutine_body(function, state_name);
            self.emit_op(OpCode::Coroutine);
            self.emit_op(OpCode::Return);
        } else {
            self.compile_function_body(function, kind);
        }

        let upvalues: Vec<UpvalueRef> = self.state().upvalues.clone();
        let compiled = self.finish_state();
        let constant = self.make_constant(Value::object(compiled));
        self.emit_op_byte(OpCode::Closure, constant);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn compile_function_body(&mut self, function: &FunctionLit, kind: FunctionKind) {
        match &function.body {
            FunctionBody::Expression(expr) => {
                if kind.is_initializer() {
                    self.error("Initializer cannot be an expression.");
                }

                self.compile_expression(expr);
                self.emit_op(OpCode::Return);
            }
            FunctionBody::Block(body) => {
                self.begin_scope();
                for decl in body {
                    self.compile_declaration(decl);
                }
                self.end_scope();
            }
        }
    }

    /// Compiles the body of a `coroutine fun` as a parameterless inner
    /// function and emits the closure for it into the wrapper.
    fn compile_coroutine_body(&mut self, function: &FunctionLit, name: &str) {
        self.states.push(FnState::new(FunctionKind::Function, name));
        self.begin_scope();
        self.compile_function_body(function, FunctionKind::Function);

        let upvalues: Vec<UpvalueRef> = self.state().upvalues.clone();
        let compiled = self.finish_state();
        let constant = self.make_constant(Value::object(compiled));
        self.emit_op_byte(OpCode::Closure, constant);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn compile_variable_decl(&mut self, decl: &VariableDecl) {
        match &decl.target {
            VariableTarget::Single(identifier) => {
                let identifier = identifier.clone();
                self.set_token(&identifier);
                let global = self.declare_variable(&identifier.lexeme);

                match &decl.value {
                    Some(value) => self.compile_expression(value),
                    None => self.emit_op(OpCode::LoadNil),
                }

                self.define_variable(global);
            }
            VariableTarget::Unpack(identifiers) => {
                if identifiers.len() > 255 {
                    self.error("Cannot unpack into more than 255 variables.");
                }

                let mut globals = Vec::with_capacity(identifiers.len());
                for identifier in identifiers {
                    self.set_token(identifier);
                    globals.push(self.declare_variable(&identifier.lexeme));
                }

                match &decl.value {
                    Some(value) => {
                        self.compile_expression(value);
                        self.emit_op_byte(OpCode::TupleUnpack, identifiers.len() as u8);
                    }
                    None => {
                        for _ in identifiers {
                            self.emit_op(OpCode::LoadNil);
                        }
                    }
                }

                if self.state().scope_depth == 0 {
                    for global in globals.into_iter().rev() {
                        self.emit_op_byte(OpCode::DefineGlobal, global);
                    }
                } else {
                    for back in 0..identifiers.len() {
                        self.initialize_local_relative(back);
                    }
                }
            }
        }
    }

    // ---- statements -------------------------------------------------

    fn compile_statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::For { initializer, condition, increment, body } => {
                self.compile_for_stmt(initializer, condition, increment, body)
            }
            Stmt::ForIn { target, collection, body } => {
                self.compile_for_in_stmt(target, collection, body)
            }
            Stmt::While { condition, body } => self.compile_while_stmt(condition, body),
            Stmt::DoWhile { body, condition } => self.compile_do_while_stmt(body, condition),
            Stmt::Break(keyword) => self.compile_break_stmt(keyword),
            Stmt::Continue(keyword) => self.compile_continue_stmt(keyword),
            Stmt::When { control, entries, else_branch } => {
                self.compile_when_stmt(control, entries, else_branch)
            }
            Stmt::If { condition, then_branch, else_branch } => {
                self.compile_if_stmt(condition, then_branch, else_branch)
            }
            Stmt::Return { keyword, value } => self.compile_return_stmt(keyword, value),
            Stmt::Print(expr) => {
                self.compile_expression(expr);
                self.emit_op(OpCode::Print);
            }
            Stmt::Block(body) => {
                self.begin_scope();
                for decl in body {
                    self.compile_declaration(decl);
                }
                self.end_scope();
            }
            Stmt::Expression(expr) => {
                self.compile_expression(expr);
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn compile_for_stmt(
        &mut self,
        initializer: &Option<Box<Decl>>,
        condition: &Option<Expr>,
        increment: &Option<Expr>,
        body: &Stmt,
    ) {
        self.begin_scope();

        if let Some(initializer) = initializer {
            self.compile_declaration(initializer);
        }

        let mut loop_start = self.current_offset();
        let mut exit_jump = None;

        if let Some(condition) = condition {
            self.compile_expression(condition);
            exit_jump = Some(self.emit_jump(OpCode::PopJumpIfFalse));
        }

        // The increment textually precedes the body but runs after it:
        // jump over it on entry, and loop back to it from the body.
        if let Some(increment) = increment {
            let body_jump = self.emit_jump(OpCode::Jump);

            let increment_start = self.current_offset();
            self.compile_expression(increment);
            self.emit_op(OpCode::Pop);

            self.emit_loop(loop_start, OpCode::Loop);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.enter_control_block(ControlKind::For, loop_start);

        self.compile_statement(body);
        self.emit_loop(loop_start, OpCode::Loop);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
        }

        self.exit_control_block();
        self.end_scope();
    }

    fn compile_for_in_stmt(&mut self, target: &VariableTarget, collection: &Expr, body: &Stmt) {
        self.begin_scope();

        match target {
            VariableTarget::Single(identifier) => self.declare_for_in_variable(identifier),
            VariableTarget::Unpack(identifiers) => {
                for identifier in identifiers {
                    self.declare_for_in_variable(identifier);
                }
            }
        }

        self.compile_expression(collection);
        self.emit_op(OpCode::Iterator);
        self.add_local("");
        self.initialize_local();

        let loop_start = self.current_offset();
        let exit_jump = self.emit_jump(OpCode::ForIterator);

        match target {
            VariableTarget::Single(identifier) => {
                let name = identifier.lexeme.clone();
                self.named_variable(&name, ExprContext::Store);
                self.emit_op(OpCode::Pop);
            }
            VariableTarget::Unpack(identifiers) => {
                self.emit_op_byte(OpCode::TupleUnpack, identifiers.len() as u8);
                for identifier in identifiers.iter().rev() {
                    let name = identifier.lexeme.clone();
                    self.named_variable(&name, ExprContext::Store);
                    self.emit_op(OpCode::Pop);
                }
            }
        }

        self.enter_control_block(ControlKind::ForIn, loop_start);

        self.compile_statement(body);
        self.emit_loop(loop_start, OpCode::Loop);
        self.patch_jump(exit_jump);

        self.exit_control_block();

        // The hidden iterator slot is popped by normal scope exit, so
        // break and fall-through leave the same stack shape.
        self.end_scope();
    }

    fn declare_for_in_variable(&mut self, identifier: &Token) {
        self.set_token(identifier);
        self.emit_op(OpCode::LoadNil);
        self.declare_local_variable(&identifier.lexeme);
        self.initialize_local();
    }

    fn compile_while_stmt(&mut self, condition: &Expr, body: &Stmt) {
        let loop_start = self.current_offset();
        self.enter_control_block(ControlKind::While, loop_start);

        self.compile_expression(condition);
        let exit_jump = self.emit_jump(OpCode::PopJumpIfFalse);

        self.compile_statement(body);
        self.emit_loop(loop_start, OpCode::Loop);
        self.patch_jump(exit_jump);

        self.exit_control_block();
    }

    fn compile_do_while_stmt(&mut self, body: &Stmt, condition: &Expr) {
        let loop_start = self.current_offset();
        self.enter_control_block(ControlKind::DoWhile, loop_start);

        self.compile_statement(body);
        self.compile_expression(condition);
        self.emit_loop(loop_start, OpCode::PopLoopIfTrue);

        self.exit_control_block();
    }

    fn compile_break_stmt(&mut self, keyword: &Token) {
        self.set_token(keyword);

        match self.closest_loop() {
            None => self.error("Cannot use 'break' outside of a loop."),
            Some(block) => {
                let address = self.emit_jump(OpCode::Jump);
                self.state().blocks[block].breaks.push(address);
            }
        }
    }

    fn compile_continue_stmt(&mut self, keyword: &Token) {
        self.set_token(keyword);

        match self.closest_loop() {
            None => self.error("Cannot use 'continue' outside of a loop."),
            Some(block) => {
                let start = self.state().blocks[block].start;
                self.emit_loop(start, OpCode::Loop);
            }
        }
    }

    fn compile_when_stmt(
        &mut self,
        control: &Expr,
        entries: &[WhenEntry],
        else_branch: &Option<Box<Stmt>>,
    ) {
        let start = self.current_offset();
        self.enter_control_block(ControlKind::When, start);

        self.compile_expression(control);

        for entry in entries {
            self.compile_when_entry(entry);
        }

        // Either path still holds the control value here.
        self.emit_op(OpCode::Pop);
        if let Some(else_branch) = else_branch {
            self.compile_statement(else_branch);
        }

        self.exit_control_block();
    }

    fn compile_when_entry(&mut self, entry: &WhenEntry) {
        let mut case_jumps = Vec::new();
        for case in &entry.cases {
            self.compile_expression(case);
            case_jumps.push(self.emit_jump(OpCode::PopJumpIfEqual));
        }

        let next_entry = self.emit_jump(OpCode::Jump);

        for address in case_jumps {
            self.patch_jump(address);
        }
        self.emit_op(OpCode::Pop);
        self.compile_statement(&entry.body);

        let exit = self.emit_jump(OpCode::Jump);
        self.push_control_break(exit);

        self.patch_jump(next_entry);
    }

    fn compile_if_stmt(
        &mut self,
        condition: &Expr,
        then_branch: &Stmt,
        else_branch: &Option<Box<Stmt>>,
    ) {
        self.compile_expression(condition);

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);

        self.compile_statement(then_branch);
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if let Some(else_branch) = else_branch {
            self.compile_statement(else_branch);
        }

        self.patch_jump(else_jump);
    }

    fn compile_return_stmt(&mut self, keyword: &Token, value: &Option<Expr>) {
        self.set_token(keyword);

        if self.state().kind == FunctionKind::Script {
            self.error("Can only return from functions.");
        }

        match value {
            Some(value) => {
                if self.state().kind.is_initializer() {
                    self.error("Cannot return a value from an initializer.");
                }
                self.compile_expression(value);
                self.emit_op(OpCode::Return);
            }
            None => self.emit_return(),
        }
    }

    // ---- expressions ------------------------------------------------

    fn compile_expression(&mut self, expr: &Expr) {
        match expr {
            Expr::Call { callee, arguments } => self.compile_call_expr(callee, arguments),
            Expr::Property { object, name, context, safe } => {
                self.compile_property_expr(object, name, *context, *safe)
            }
            Expr::Subscript { object, index, context, safe } => {
                self.compile_subscript_expr(object, index, *context, *safe)
            }
            Expr::Super { keyword, method } => self.compile_super_expr(keyword, method),
            Expr::Assignment { target, value } => self.compile_assignment_expr(target, value),
            Expr::CompoundAssignment { target, op, value } => {
                self.compile_compound_assignment_expr(target, op, value)
            }
            Expr::Coroutine { keyword, inner } => {
                self.set_token(keyword);
                self.compile_expression(inner);
                self.emit_op(OpCode::Coroutine);
            }
            Expr::Yield { keyword, value } => self.compile_yield_expr(keyword, value),
            Expr::PrefixInc { op, target } => self.compile_prefix_inc_expr(op, target),
            Expr::PostfixInc { op, target } => self.compile_postfix_inc_expr(op, target),
            Expr::Logical { left, op, right } => self.compile_logical_expr(left, op, right),
            Expr::Conditional { condition, then_branch, else_branch } => {
                self.compile_conditional_expr(condition, then_branch, else_branch)
            }
            Expr::Elvis { left, right } => self.compile_elvis_expr(left, right),
            Expr::Binary { left, op, right } => self.compile_binary_expr(left, op, right),
            Expr::Unary { op, operand } => self.compile_unary_expr(op, operand),
            Expr::Literal(token) => self.compile_literal_expr(token),
            Expr::StringInterp { parts } => self.compile_string_interp_expr(parts),
            Expr::Range { begin, end, step } => self.compile_range_expr(begin, end, step),
            Expr::Lambda(function) => {
                self.compile_function(function, FunctionKind::Lambda, "", false)
            }
            Expr::List(elements) => {
                if elements.len() > 255 {
                    self.error("Cannot have more than 255 elements in a list expression.");
                }
                for element in elements {
                    self.compile_expression(element);
                }
                self.emit_op_byte(OpCode::List, elements.len() as u8);
            }
            Expr::Map(entries) => {
                if entries.len() > 255 {
                    self.error("Cannot have more than 255 entries in a map expression.");
                }
                for (key, value) in entries {
                    self.compile_expression(key);
                    self.compile_expression(value);
                }
                self.emit_op_byte(OpCode::Map, entries.len() as u8);
            }
            Expr::Tuple(elements) => {
                if elements.len() > 255 {
                    self.error("Cannot have more than 255 elements in a tuple expression.");
                }
                for element in elements {
                    self.compile_expression(element);
                }
                self.emit_op_byte(OpCode::Tuple, elements.len() as u8);
            }
            Expr::Identifier { name, context } => {
                let name = name.clone();
                self.set_token(&name);
                self.named_variable(&name.lexeme, *context);
            }
        }
    }

    fn compile_call_expr(&mut self, callee: &Expr, arguments: &[Expr]) {
        match callee {
            // obj.name(args) compiles to a direct invocation.
            Expr::Property { object, name, safe, .. } => {
                self.compile_expression(object);
                let count = self.compile_argument_list(arguments);

                let name = name.clone();
                self.set_token(&name);
                let constant = self.identifier_constant(&name.lexeme);

                let op = if *safe { OpCode::InvokeSafe } else { OpCode::Invoke };
                self.emit_op_byte(op, constant);
                self.emit_byte(count);
            }
            Expr::Super { keyword, method } => {
                self.compile_super_invocation(keyword, method, arguments)
            }
            _ => {
                self.compile_expression(callee);
                let count = self.compile_argument_list(arguments);
                self.emit_op_byte(OpCode::Call, count);
            }
        }
    }

    fn compile_argument_list(&mut self, arguments: &[Expr]) -> u8 {
        if arguments.len() > 255 {
            self.error("Cannot have more than 255 arguments.");
        }

        for argument in arguments {
            self.compile_expression(argument);
        }

        arguments.len() as u8
    }

    fn check_super_usage(&mut self) {
        if self.classes.is_empty() {
            self.error("Cannot use 'super' outside of a class.");
        } else if !self.classes.last().expect("class state").has_superclass {
            self.error("Cannot use 'super' in a class with no superclass.");
        } else if self.state().kind == FunctionKind::StaticMethod {
            self.error("Cannot use 'super' in a static method.");
        }
    }

    fn compile_super_expr(&mut self, keyword: &Token, method: &Token) {
        self.set_token(keyword);
        self.check_super_usage();

        let method = method.clone();
        self.set_token(&method);
        let name = self.identifier_constant(&method.lexeme);

        self.named_variable("this", ExprContext::Load);
        self.named_variable("super", ExprContext::Load);
        self.emit_op_byte(OpCode::GetSuper, name);
    }

    fn compile_super_invocation(&mut self, keyword: &Token, method: &Token, arguments: &[Expr]) {
        self.set_token(keyword);
        self.check_super_usage();

        let method = method.clone();
        self.set_token(&method);
        let name = self.identifier_constant(&method.lexeme);

        self.named_variable("this", ExprContext::Load);
        let count = self.compile_argument_list(arguments);
        self.named_variable("super", ExprContext::Load);
        self.emit_op_byte(OpCode::SuperInvoke, name);
        self.emit_byte(count);
    }

    fn compile_property_expr(
        &mut self,
        object: &Expr,
        name: &Token,
        context: ExprContext,
        safe: bool,
    ) {
        self.compile_expression(object);

        let name = name.clone();
        self.set_token(&name);
        let constant = self.identifier_constant(&name.lexeme);

        let op = match (context, safe) {
            (ExprContext::Load, false) => OpCode::LoadProperty,
            (ExprContext::Load, true) => OpCode::LoadPropertySafe,
            (ExprContext::Store, false) => OpCode::StoreProperty,
            (ExprContext::Store, true) => OpCode::StorePropertySafe,
        };
        self.emit_op_byte(op, constant);
    }

    fn compile_subscript_expr(
        &mut self,
        object: &Expr,
        index: &Expr,
        context: ExprContext,
        safe: bool,
    ) {
        self.compile_expression(object);
        self.compile_expression(index);

        let op = match (context, safe) {
            (ExprContext::Load, false) => OpCode::LoadSubscript,
            (ExprContext::Load, true) => OpCode::LoadSubscriptSafe,
            (ExprContext::Store, false) => OpCode::StoreSubscript,
            (ExprContext::Store, true) => OpCode::StoreSubscriptSafe,
        };
        self.emit_op(op);
    }

    fn compile_assignment_expr(&mut self, target: &AssignmentTarget, value: &Expr) {
        self.compile_expression(value);

        match target {
            AssignmentTarget::Single(target) => self.compile_expression(target),
            AssignmentTarget::Unpack(targets) => {
                self.emit_op(OpCode::Dup);
                self.emit_op_byte(OpCode::TupleUnpack, targets.len() as u8);

                for target in targets.iter().rev() {
                    self.compile_expression(target);
                    self.emit_op(OpCode::Pop);
                }
            }
        }
    }

    fn compound_opcode(&mut self, op: &Token) -> OpCode {
        match op.kind {
            TokenKind::PlusEqual => OpCode::Add,
            TokenKind::MinusEqual => OpCode::Subtract,
            TokenKind::StarEqual => OpCode::Multiply,
            TokenKind::SlashEqual => OpCode::Divide,
            TokenKind::PercentEqual => OpCode::Modulo,
            TokenKind::DoubleStarEqual => OpCode::Power,
            TokenKind::AmpersandEqual => OpCode::BitwiseAnd,
            TokenKind::PipeEqual => OpCode::BitwiseOr,
            TokenKind::CaretEqual => OpCode::BitwiseXor,
            TokenKind::LShiftEqual => OpCode::BitwiseLeftShift,
            TokenKind::RShiftEqual => OpCode::BitwiseRightShift,
            _ => {
                self.error("Invalid compound assignment operator.");
                OpCode::Add
            }
        }
    }

    fn compile_compound_assignment_expr(&mut self, target: &Expr, op: &Token, value: &Expr) {
        match target {
            Expr::Identifier { name, .. } => {
                let name = name.clone();
                self.set_token(&name);
                self.named_variable(&name.lexeme, ExprContext::Load);

                self.compile_expression(value);

                self.set_token(op);
                let opcode = self.compound_opcode(op);
                self.emit_op(opcode);

                self.named_variable(&name.lexeme, ExprContext::Store);
            }
            Expr::Property { object, name, safe, .. } => {
                self.compile_expression(object);
                self.emit_op(OpCode::Dup);

                let name = name.clone();
                self.set_token(&name);
                let constant = self.identifier_constant(&name.lexeme);
                let load =
                    if *safe { OpCode::LoadPropertySafe } else { OpCode::LoadProperty };
                self.emit_op_byte(load, constant);

                self.compile_expression(value);

                self.set_token(op);
                let opcode = self.compound_opcode(op);
                self.emit_op(opcode);

                self.emit_op(OpCode::Swap);
                let store =
                    if *safe { OpCode::StorePropertySafe } else { OpCode::StoreProperty };
                self.emit_op_byte(store, constant);
            }
            Expr::Subscript { object, index, safe, .. } => {
                self.compile_expression(object);
                self.compile_expression(index);
                self.emit_op(OpCode::DupTwo);

                let load =
                    if *safe { OpCode::LoadSubscriptSafe } else { OpCode::LoadSubscript };
                self.emit_op(load);

                self.compile_expression(value);

                self.set_token(op);
                let opcode = self.compound_opcode(op);
                self.emit_op(opcode);

                self.emit_op(OpCode::SwapThree);
                let store =
                    if *safe { OpCode::StoreSubscriptSafe } else { OpCode::StoreSubscript };
                self.emit_op(store);
            }
            _ => self.error("Invalid compound assignment target."),
        }
    }

    fn compile_yield_expr(&mut self, keyword: &Token, value: &Option<Box<Expr>>) {
        self.set_token(keyword);

        if self.state().kind == FunctionKind::Script || self.state().kind.is_initializer() {
            self.error("Can only yield from non-initializer functions.");
        }

        match value {
            Some(value) => self.compile_expression(value),
            None => self.emit_op(OpCode::LoadNil),
        }

        self.emit_op(OpCode::Yield);
    }

    fn increment_opcode(&mut self, op: &Token) -> OpCode {
        match op.kind {
            TokenKind::DoublePlus => OpCode::Inc,
            TokenKind::DoubleMinus => OpCode::Dec,
            _ => {
                self.error("Invalid increment operator.");
                OpCode::Inc
            }
        }
    }

    fn compile_prefix_inc_expr(&mut self, op: &Token, target: &Expr) {
        match target {
            Expr::Identifier { name, .. } => {
                let name = name.clone();
                self.set_token(&name);
                self.named_variable(&name.lexeme, ExprContext::Load);

                let opcode = self.increment_opcode(op);
                self.emit_op(opcode);

                self.named_variable(&name.lexeme, ExprContext::Store);
            }
            Expr::Property { object, name, .. } => {
                self.compile_expression(object);
                self.emit_op(OpCode::Dup);

                let name = name.clone();
                self.set_token(&name);
                let constant = self.identifier_constant(&name.lexeme);
                self.emit_op_byte(OpCode::LoadProperty, constant);

                let opcode = self.increment_opcode(op);
                self.emit_op(opcode);

                self.emit_op(OpCode::Swap);
                self.emit_op_byte(OpCode::StoreProperty, constant);
            }
            Expr::Subscript { object, index, .. } => {
                self.compile_expression(object);
                self.compile_expression(index);
                self.emit_op(OpCode::DupTwo);

                self.emit_op(OpCode::LoadSubscript);

                let opcode = self.increment_opcode(op);
                self.emit_op(opcode);

                self.emit_op(OpCode::SwapThree);
                self.emit_op(OpCode::StoreSubscript);
            }
            _ => self.error("Invalid assignment target."),
        }
    }

    fn compile_postfix_inc_expr(&mut self, op: &Token, target: &Expr) {
        match target {
            Expr::Identifier { name, .. } => {
                let name = name.clone();
                self.set_token(&name);
                self.named_variable(&name.lexeme, ExprContext::Load);
                self.emit_op(OpCode::Dup);

                self.set_token(op);
                let opcode = self.increment_opcode(op);
                self.emit_op(opcode);

                self.named_variable(&name.lexeme, ExprContext::Store);
                self.emit_op(OpCode::Pop);
            }
            Expr::Property { object, name, .. } => {
                self.compile_expression(object);
                self.emit_op(OpCode::Dup);

                let name = name.clone();
                self.set_token(&name);
                let constant = self.identifier_constant(&name.lexeme);
                self.emit_op_byte(OpCode::LoadProperty, constant);
                self.emit_op(OpCode::Dup);
                self.emit_op(OpCode::SwapThree);

                self.set_token(op);
                let opcode = self.increment_opcode(op);
                self.emit_op(opcode);

                self.emit_op(OpCode::Swap);
                self.emit_op_byte(OpCode::StoreProperty, constant);
                self.emit_op(OpCode::Pop);
            }
            Expr::Subscript { object, index, .. } => {
                self.compile_expression(object);
                self.compile_expression(index);
                self.emit_op(OpCode::DupTwo);

                self.emit_op(OpCode::LoadSubscript);
                self.emit_op(OpCode::Dup);
                self.emit_op(OpCode::SwapFour);

                self.set_token(op);
                let opcode = self.increment_opcode(op);
                self.emit_op(opcode);

                self.emit_op(OpCode::SwapThree);
                self.emit_op(OpCode::StoreSubscript);
                self.emit_op(OpCode::Pop);
            }
            _ => self.error("Invalid assignment target."),
        }
    }

    fn compile_logical_expr(&mut self, left: &Expr, op: &Token, right: &Expr) {
        match op.kind {
            TokenKind::And => {
                self.compile_expression(left);
                self.set_token(op);

                let end_jump = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);
                self.compile_expression(right);
                self.patch_jump(end_jump);
            }
            _ => {
                self.compile_expression(left);
                self.set_token(op);

                let else_jump = self.emit_jump(OpCode::JumpIfFalse);
                let end_jump = self.emit_jump(OpCode::Jump);

                self.patch_jump(else_jump);
                self.emit_op(OpCode::Pop);

                self.compile_expression(right);
                self.patch_jump(end_jump);
            }
        }
    }

    fn compile_conditional_expr(
        &mut self,
        condition: &Expr,
        then_branch: &Expr,
        else_branch: &Expr,
    ) {
        self.compile_expression(condition);

        let else_jump = self.emit_jump(OpCode::PopJumpIfFalse);
        self.compile_expression(then_branch);

        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);

        self.compile_expression(else_branch);
        self.patch_jump(end_jump);
    }

    fn compile_elvis_expr(&mut self, left: &Expr, right: &Expr) {
        self.compile_expression(left);

        let else_jump = self.emit_jump(OpCode::JumpIfNotNil);
        self.emit_op(OpCode::Pop);

        self.compile_expression(right);
        self.patch_jump(else_jump);
    }

    fn compile_binary_expr(&mut self, left: &Expr, op: &Token, right: &Expr) {
        self.compile_expression(left);
        self.compile_expression(right);

        self.set_token(op);
        let opcode = match op.kind {
            TokenKind::BangEqual => OpCode::NotEqual,
            TokenKind::EqualEqual => OpCode::Equal,
            TokenKind::Greater => OpCode::Greater,
            TokenKind::GreaterEqual => OpCode::GreaterEqual,
            TokenKind::Less => OpCode::Less,
            TokenKind::LessEqual => OpCode::LessEqual,
            TokenKind::Plus => OpCode::Add,
            TokenKind::Minus => OpCode::Subtract,
            TokenKind::Star => OpCode::Multiply,
            TokenKind::Slash => OpCode::Divide,
            TokenKind::Percent => OpCode::Modulo,
            TokenKind::DoubleStar => OpCode::Power,
            TokenKind::Ampersand => OpCode::BitwiseAnd,
            TokenKind::Pipe => OpCode::BitwiseOr,
            TokenKind::Caret => OpCode::BitwiseXor,
            TokenKind::LShift => OpCode::BitwiseLeftShift,
            TokenKind::RShift => OpCode::BitwiseRightShift,
            _ => {
                self.error("Invalid binary operator.");
                OpCode::Add
            }
        };
        self.emit_op(opcode);
    }

    fn compile_unary_expr(&mut self, op: &Token, operand: &Expr) {
        self.compile_expression(operand);

        self.set_token(op);
        match op.kind {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Tilde => self.emit_op(OpCode::BitwiseNot),
            _ => self.error("Invalid unary operator."),
        }
    }

    fn compile_literal_expr(&mut self, token: &Token) {
        let token = token.clone();
        self.set_token(&token);

        match token.kind {
            TokenKind::Number => {
                let number: f64 = token.lexeme.parse().unwrap_or(0.0);
                self.emit_constant(Value::number(number));
            }
            TokenKind::Str
            | TokenKind::StrInterpBegin
            | TokenKind::StrInterp
            | TokenKind::StrInterpEnd => {
                let value = self.vm.intern(&token.lexeme);
                self.emit_constant(value);
            }
            TokenKind::True => self.emit_op(OpCode::LoadTrue),
            TokenKind::False => self.emit_op(OpCode::LoadFalse),
            TokenKind::Nil => self.emit_op(OpCode::LoadNil),
            TokenKind::This => {
                if self.classes.is_empty() {
                    self.error("Cannot use 'this' outside of a class.");
                    return;
                }
                self.named_variable("this", ExprContext::Load);
            }
            _ => self.error("Invalid literal."),
        }
    }

    fn compile_string_interp_expr(&mut self, parts: &[Expr]) {
        if parts.len() > 255 {
            self.error("Cannot interpolate more than 255 strings.");
        }

        for part in parts {
            self.compile_expression(part);
        }

        self.emit_op_byte(OpCode::BuildString, parts.len() as u8);
    }

    fn compile_range_expr(&mut self, begin: &Expr, end: &Expr, step: &Option<Box<Expr>>) {
        self.compile_expression(begin);
        self.compile_expression(end);

        match step {
            Some(step) => self.compile_expression(step),
            None => self.emit_constant(Value::number(1.0)),
        }

        self.emit_op(OpCode::Range);
    }
}
