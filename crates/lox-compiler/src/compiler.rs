//! Single-pass Pratt-parsing compiler.
//!
//! There is no AST: every grammar rule emits bytecode directly into the
//! function currently being compiled, the way clox's `compiler.c` does.
//! A stack of [`FunctionFrame`] records — one per function, method, or
//! the top-level script currently under construction — replaces the
//! "enclosing compiler" linked list from the reference implementation;
//! resolving a name in an outer frame is an indexed walk backward
//! through this vector instead of a recursive call into a boxed parent.

use std::rc::Rc;

use lox_core::{Chunk, Interner, LoxFunction, LoxStr, OpCode, Value};

use crate::error::CompileError;
use crate::scanner::{Scanner, Token, TokenKind};

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_ARGS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn = fn(&mut Compiler, bool);

#[derive(Clone, Copy)]
struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

fn rule(kind: TokenKind) -> ParseRule {
    use TokenKind::*;
    let (prefix, infix, precedence): (Option<ParseFn>, Option<ParseFn>, Precedence) = match kind {
        LeftParen => (Some(grouping), Some(call), Precedence::Call),
        Dot => (None, Some(dot), Precedence::Call),
        Minus => (Some(unary), Some(binary), Precedence::Term),
        Plus => (None, Some(binary), Precedence::Term),
        Slash => (None, Some(binary), Precedence::Factor),
        Star => (None, Some(binary), Precedence::Factor),
        Bang => (Some(unary), None, Precedence::None),
        BangEqual => (None, Some(binary), Precedence::Equality),
        EqualEqual => (None, Some(binary), Precedence::Equality),
        Greater => (None, Some(binary), Precedence::Comparison),
        GreaterEqual => (None, Some(binary), Precedence::Comparison),
        Less => (None, Some(binary), Precedence::Comparison),
        LessEqual => (None, Some(binary), Precedence::Comparison),
        Identifier => (Some(variable), None, Precedence::None),
        TokenKind::String => (Some(string), None, Precedence::None),
        Number => (Some(number), None, Precedence::None),
        And => (None, Some(and_), Precedence::And),
        Or => (None, Some(or_), Precedence::Or),
        False | True | Nil => (Some(literal), None, Precedence::None),
        This => (Some(this_), None, Precedence::None),
        Super => (Some(super_), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local {
    name: Rc<str>,
    depth: i32, // -1 means "declared but not yet initialized"
    is_captured: bool,
}

struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct FunctionFrame {
    function: LoxFunction,
    kind: FunctionKind,
    locals: Vec<Local>,
    scope_depth: i32,
    upvalues: Vec<UpvalueDesc>,
}

impl FunctionFrame {
    fn new(kind: FunctionKind, name: Option<Rc<LoxStr>>) -> Self {
        let reserved_name: Rc<str> = match kind {
            FunctionKind::Method | FunctionKind::Initializer => Rc::from("this"),
            FunctionKind::Function | FunctionKind::Script => Rc::from(""),
        };
        FunctionFrame {
            function: LoxFunction::new(name),
            kind,
            locals: vec![Local {
                name: reserved_name,
                depth: 0,
                is_captured: false,
            }],
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }
}

struct ClassContext {
    has_superclass: bool,
}

pub struct Compiler<'src, 'pool> {
    scanner: Scanner<'src>,
    previous: Token,
    current: Token,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    frames: Vec<FunctionFrame>,
    classes: Vec<ClassContext>,
    pool: &'pool mut Interner,
}

/// Compiles `source` into a top-level script function. Returns every
/// diagnostic collected if compilation failed; the compiler never
/// partially hands back a function in that case.
pub fn compile(source: &str, pool: &mut Interner) -> Result<LoxFunction, Vec<CompileError>> {
    let mut compiler = Compiler {
        scanner: Scanner::new(source),
        previous: dummy_token(),
        current: dummy_token(),
        had_error: false,
        panic_mode: false,
        errors: Vec::new(),
        frames: vec![FunctionFrame::new(FunctionKind::Script, None)],
        classes: Vec::new(),
        pool,
    };
    compiler.advance();
    while !compiler.check(TokenKind::Eof) {
        compiler.declaration();
    }
    let (function, _upvalues) = compiler.finish_current();
    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(function)
    }
}

fn dummy_token() -> Token {
    Token {
        kind: TokenKind::Error,
        lexeme: Rc::from(""),
        line: 0,
        column: 0,
    }
}

impl<'src, 'pool> Compiler<'src, 'pool> {
    // ---- token stream plumbing -------------------------------------

    fn advance(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.current);
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    // ---- diagnostics --------------------------------------------------

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let at = if token.kind == TokenKind::Eof {
            "at end".to_string()
        } else if token.kind == TokenKind::Error {
            String::new()
        } else {
            format!("at '{}'", token.lexeme)
        };
        self.errors.push(CompileError {
            line: token.line,
            column: token.column,
            at,
            message: message.to_string(),
        });
    }

    /// Recovers to the next likely statement boundary after a parse
    /// error: past a semicolon, or just before a keyword that starts a
    /// new declaration or statement.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- bytecode emission --------------------------------------------

    fn current_frame(&mut self) -> &mut FunctionFrame {
        self.frames.last_mut().expect("at least the script frame")
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.current_frame().function.chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_two(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        if self.chunk().patch_jump(offset).is_err() {
            self.error("Too much code to jump over.");
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.chunk().add_constant(value) {
            Ok(index) => index,
            Err(()) => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_two(OpCode::Constant, index);
    }

    fn identifier_constant(&mut self, token: &Token) -> u8 {
        let text = token.lexeme.to_string();
        let interned = self.pool.intern(&text);
        self.make_constant(Value::Object(lox_core::Object::String(interned)))
    }

    fn emit_return(&mut self) {
        if self.current_frame().kind == FunctionKind::Initializer {
            self.emit_two(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn finish_current(&mut self) -> (LoxFunction, Vec<UpvalueDesc>) {
        self.emit_return();
        let frame = self.frames.pop().expect("frame to finish");
        (frame.function, frame.upvalues)
    }

    // ---- scopes and locals --------------------------------------------

    fn begin_scope(&mut self) {
        self.current_frame().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_frame().scope_depth -= 1;
        let depth = self.current_frame().scope_depth;
        while let Some(local) = self.current_frame().locals.last() {
            if local.depth <= depth {
                break;
            }
            let captured = local.is_captured;
            self.current_frame().locals.pop();
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn add_local(&mut self, name: Rc<str>) {
        if self.current_frame().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.current_frame().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.current_frame().scope_depth == 0 {
            return;
        }
        let name: Rc<str> = Rc::from(&*self.previous.lexeme);
        let depth = self.current_frame().scope_depth;
        let mut duplicate = false;
        for local in self.current_frame().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
            return;
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        let frame = self.current_frame();
        if frame.scope_depth == 0 {
            return;
        }
        let depth = frame.scope_depth;
        if let Some(local) = frame.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.current_frame().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(&self.previous.clone())
    }

    fn define_variable(&mut self, global: u8) {
        if self.current_frame().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_two(OpCode::DefineGlobal, global);
    }

    fn resolve_local(&self, frame_idx: usize, name: &str) -> Option<(u8, bool)> {
        let frame = &self.frames[frame_idx];
        for (i, local) in frame.locals.iter().enumerate().rev() {
            if &*local.name == name {
                if local.depth == -1 {
                    return Some((i as u8, true)); // uninitialized marker
                }
                return Some((i as u8, false));
            }
        }
        None
    }

    fn add_upvalue(&mut self, frame_idx: usize, index: u8, is_local: bool) -> u8 {
        for (i, up) in self.frames[frame_idx].upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        if self.frames[frame_idx].upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        let frame = &mut self.frames[frame_idx];
        frame.upvalues.push(UpvalueDesc { index, is_local });
        frame.function.upvalue_count = frame.upvalues.len() as u8;
        (frame.upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, frame_idx: usize, name: &str) -> Option<u8> {
        if frame_idx == 0 {
            return None;
        }
        let enclosing = frame_idx - 1;
        if let Some((slot, _uninit)) = self.resolve_local(enclosing, name) {
            self.frames[enclosing].locals[slot as usize].is_captured = true;
            return Some(self.add_upvalue(frame_idx, slot, true));
        }
        if let Some(slot) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(frame_idx, slot, false));
        }
        None
    }

    // ---- expressions ----------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            let infix = rule(self.previous.kind).infix.expect("infix rule");
            infix(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count >= MAX_ARGS {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    count += 1;
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    fn named_variable(&mut self, token: Token, can_assign: bool) {
        let frame_idx = self.frames.len() - 1;
        let (get_op, set_op, arg) = if let Some((slot, uninitialized)) =
            self.resolve_local(frame_idx, &token.lexeme)
        {
            if uninitialized {
                self.error("Can't read local variable in its own initializer.");
            }
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(frame_idx, &token.lexeme) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
        } else {
            let arg = self.identifier_constant(&token);
            (OpCode::GetGlobal, OpCode::SetGlobal, arg)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_two(set_op, arg);
        } else {
            self.emit_two(get_op, arg);
        }
    }

    // ---- statements -------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk().len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.frames.len() == 1 {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.current_frame().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name_token = self.previous.clone();
        let text = name_token.lexeme.to_string();
        let name = self.pool.intern(&text);
        self.frames.push(FunctionFrame::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let frame = self.current_frame();
                frame.function.arity += 1;
                if frame.function.arity > MAX_ARGS as u8 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.finish_current();
        let constant = self.make_constant(Value::Object(lox_core::Object::Function(Rc::new(
            function,
        ))));
        self.emit_two(OpCode::Closure, constant);
        for upvalue in &upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let name_token = self.previous.clone();
        let name_constant = self.identifier_constant(&name_token);
        self.declare_variable();

        self.emit_two(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassContext {
            has_superclass: false,
        });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let super_token = self.previous.clone();
            if super_token.lexeme == name_token.lexeme {
                self.error("A class can't inherit from itself.");
            }
            self.variable_from_token(super_token.clone(), false);

            self.begin_scope();
            self.add_local(Rc::from("super"));
            self.define_variable(0);

            self.variable_from_token(name_token.clone(), false);
            self.emit_op(OpCode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.variable_from_token(name_token.clone(), false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name_token = self.previous.clone();
        let constant = self.identifier_constant(&name_token);
        let kind = if &*name_token.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_two(OpCode::Method, constant);
    }

    fn variable_from_token(&mut self, token: Token, can_assign: bool) {
        self.named_variable(token, can_assign);
    }
}

// ---- prefix/infix rule implementations --------------------------------

fn grouping(c: &mut Compiler, _can_assign: bool) {
    c.expression();
    c.consume(TokenKind::RightParen, "Expect ')' after expression.");
}

fn unary(c: &mut Compiler, _can_assign: bool) {
    let op_kind = c.previous.kind;
    c.parse_precedence(Precedence::Unary);
    match op_kind {
        TokenKind::Minus => c.emit_op(OpCode::Negate),
        TokenKind::Bang => c.emit_op(OpCode::Not),
        _ => unreachable!(),
    }
}

fn binary(c: &mut Compiler, _can_assign: bool) {
    let op_kind = c.previous.kind;
    let next_precedence = rule(op_kind).precedence.next();
    c.parse_precedence(next_precedence);
    match op_kind {
        TokenKind::BangEqual => {
            c.emit_op(OpCode::Equal);
            c.emit_op(OpCode::Not);
        }
        TokenKind::EqualEqual => c.emit_op(OpCode::Equal),
        TokenKind::Greater => c.emit_op(OpCode::Greater),
        TokenKind::GreaterEqual => {
            c.emit_op(OpCode::Less);
            c.emit_op(OpCode::Not);
        }
        TokenKind::Less => c.emit_op(OpCode::Less),
        TokenKind::LessEqual => {
            c.emit_op(OpCode::Greater);
            c.emit_op(OpCode::Not);
        }
        TokenKind::Plus => c.emit_op(OpCode::Add),
        TokenKind::Minus => c.emit_op(OpCode::Subtract),
        TokenKind::Star => c.emit_op(OpCode::Multiply),
        TokenKind::Slash => c.emit_op(OpCode::Divide),
        _ => unreachable!(),
    }
}

fn call(c: &mut Compiler, _can_assign: bool) {
    let arg_count = c.argument_list();
    c.emit_two(OpCode::Call, arg_count);
}

fn dot(c: &mut Compiler, can_assign: bool) {
    c.consume(TokenKind::Identifier, "Expect property name after '.'.");
    let name_token = c.previous.clone();
    let name = c.identifier_constant(&name_token);

    if can_assign && c.match_token(TokenKind::Equal) {
        c.expression();
        c.emit_two(OpCode::SetProperty, name);
    } else if c.match_token(TokenKind::LeftParen) {
        let arg_count = c.argument_list();
        c.emit_two(OpCode::Invoke, name);
        c.emit_byte(arg_count);
    } else {
        c.emit_two(OpCode::GetProperty, name);
    }
}

fn literal(c: &mut Compiler, _can_assign: bool) {
    match c.previous.kind {
        TokenKind::False => c.emit_op(OpCode::False),
        TokenKind::Nil => c.emit_op(OpCode::Nil),
        TokenKind::True => c.emit_op(OpCode::True),
        _ => unreachable!(),
    }
}

fn number(c: &mut Compiler, _can_assign: bool) {
    let value: f64 = c.previous.lexeme.parse().unwrap_or(0.0);
    c.emit_constant(Value::Number(value));
}

fn string(c: &mut Compiler, _can_assign: bool) {
    let lexeme = c.previous.lexeme.clone();
    // Strip the surrounding quotes; no escape processing.
    let text = &lexeme[1..lexeme.len() - 1];
    let interned = c.pool.intern(text);
    c.emit_constant(Value::Object(lox_core::Object::String(interned)));
}

fn variable(c: &mut Compiler, can_assign: bool) {
    let token = c.previous.clone();
    c.named_variable(token, can_assign);
}

fn and_(c: &mut Compiler, _can_assign: bool) {
    let end_jump = c.emit_jump(OpCode::JumpIfFalse);
    c.emit_op(OpCode::Pop);
    c.parse_precedence(Precedence::And);
    c.patch_jump(end_jump);
}

fn or_(c: &mut Compiler, _can_assign: bool) {
    let else_jump = c.emit_jump(OpCode::JumpIfFalse);
    let end_jump = c.emit_jump(OpCode::Jump);
    c.patch_jump(else_jump);
    c.emit_op(OpCode::Pop);
    c.parse_precedence(Precedence::Or);
    c.patch_jump(end_jump);
}

fn this_(c: &mut Compiler, _can_assign: bool) {
    if c.classes.is_empty() {
        c.error("Can't use 'this' outside of a class.");
        return;
    }
    let token = c.previous.clone();
    c.named_variable(token, false);
}

fn super_(c: &mut Compiler, _can_assign: bool) {
    if c.classes.is_empty() {
        c.error("Can't use 'super' outside of a class.");
    } else if !c.classes.last().unwrap().has_superclass {
        c.error("Can't use 'super' in a class with no superclass.");
    }

    c.consume(TokenKind::Dot, "Expect '.' after 'super'.");
    c.consume(TokenKind::Identifier, "Expect superclass method name.");
    let method_token = c.previous.clone();
    let name = c.identifier_constant(&method_token);

    c.variable_from_token(this_token(), false);
    if c.match_token(TokenKind::LeftParen) {
        let arg_count = c.argument_list();
        c.variable_from_token(super_token(), false);
        c.emit_two(OpCode::SuperInvoke, name);
        c.emit_byte(arg_count);
    } else {
        c.variable_from_token(super_token(), false);
        c.emit_two(OpCode::GetSuper, name);
    }
}

fn this_token() -> Token {
    Token {
        kind: TokenKind::This,
        lexeme: Rc::from("this"),
        line: 0,
        column: 0,
    }
}

fn super_token() -> Token {
    Token {
        kind: TokenKind::Super,
        lexeme: Rc::from("super"),
        line: 0,
        column: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(source: &str) -> LoxFunction {
        let mut pool = Interner::new();
        compile(source, &mut pool).unwrap_or_else(|errors| {
            panic!("expected successful compile, got errors: {errors:?}")
        })
    }

    fn compile_err(source: &str) -> Vec<CompileError> {
        let mut pool = Interner::new();
        match compile(source, &mut pool) {
            Ok(_) => panic!("expected a compile error for: {source}"),
            Err(errors) => errors,
        }
    }

    #[test]
    fn top_level_function_has_zero_arity_and_ends_in_return() {
        let function = compile_ok("print 1 + 2;");
        assert_eq!(function.arity, 0);
        assert_eq!(*function.chunk.code.last().unwrap(), OpCode::Return as u8);
    }

    #[test]
    fn if_and_while_jumps_land_on_an_opcode_boundary() {
        let function = compile_ok(
            "var i = 0; while (i < 3) { if (i == 1) { print i; } i = i + 1; }",
        );
        // Walk the chunk decoding each instruction; every JUMP/JUMP_IF_FALSE/LOOP
        // target must itself be a byte this walk visits as an opcode, never a
        // byte skipped over as someone else's operand.
        let code = &function.chunk.code;
        let mut opcode_starts = std::collections::HashSet::new();
        let mut ip = 0;
        while ip < code.len() {
            opcode_starts.insert(ip);
            let op = OpCode::from_byte(code[ip]);
            ip += 1 + operand_width(op, code, ip);
        }
        ip = 0;
        while ip < code.len() {
            let op = OpCode::from_byte(code[ip]);
            match op {
                OpCode::Jump | OpCode::JumpIfFalse => {
                    let offset = ((code[ip + 1] as usize) << 8) | code[ip + 2] as usize;
                    let target = ip + 3 + offset;
                    assert!(opcode_starts.contains(&target), "forward jump lands mid-instruction");
                }
                OpCode::Loop => {
                    let offset = ((code[ip + 1] as usize) << 8) | code[ip + 2] as usize;
                    let target = ip + 3 - offset;
                    assert!(opcode_starts.contains(&target), "loop jump lands mid-instruction");
                }
                _ => {}
            }
            ip += 1 + operand_width(op, code, ip);
        }
    }

    fn operand_width(op: OpCode, code: &[u8], ip: usize) -> usize {
        match op {
            OpCode::Constant
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetGlobal
            | OpCode::DefineGlobal
            | OpCode::SetGlobal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::GetSuper
            | OpCode::Call
            | OpCode::Class
            | OpCode::Method => 1,
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop | OpCode::Invoke | OpCode::SuperInvoke => {
                if op == OpCode::Invoke || op == OpCode::SuperInvoke {
                    2
                } else {
                    2
                }
            }
            OpCode::Closure => {
                // 1 constant index byte plus 2 bytes per declared upvalue.
                let const_idx = code[ip + 1] as usize;
                // upvalue_count isn't recoverable from the byte stream alone
                // here without the function table, so this test only walks
                // chunks with no closures; closures are covered indirectly
                // by the interpreter-level upvalue tests in `lox_vm`.
                let _ = const_idx;
                1
            }
            _ => 0,
        }
    }

    #[test]
    fn reading_local_in_its_own_initializer_is_an_error() {
        let errors = compile_err("{ var a = a; }");
        assert!(errors.iter().any(|e| e
            .message
            .contains("Can't read local variable in its own initializer.")));
    }

    #[test]
    fn shadowing_a_local_in_the_same_scope_is_an_error() {
        let errors = compile_err("{ var a = 1; var a = 2; }");
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Already a variable with this name in this scope.")));
    }

    #[test]
    fn class_cannot_inherit_from_itself() {
        let errors = compile_err("class A < A {}");
        assert!(errors
            .iter()
            .any(|e| e.message.contains("A class can't inherit from itself.")));
    }

    #[test]
    fn this_outside_a_class_is_an_error() {
        let errors = compile_err("print this;");
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Can't use 'this' outside of a class.")));
    }

    #[test]
    fn super_outside_a_class_is_an_error() {
        let errors = compile_err("fun f() { super.foo(); }");
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Can't use 'super' outside of a class.")));
    }

    #[test]
    fn super_in_a_class_without_a_superclass_is_an_error() {
        let errors = compile_err("class A { foo() { super.foo(); } }");
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Can't use 'super' in a class with no superclass.")));
    }

    #[test]
    fn top_level_return_with_a_value_is_an_error() {
        let errors = compile_err("return 1;");
        assert!(errors.iter().any(|e| e.message.contains("Can't return from top-level code.")));
    }

    #[test]
    fn assigning_to_a_non_assignable_target_is_an_error() {
        let errors = compile_err("1 + 2 = 3;");
        assert!(errors.iter().any(|e| e.message.contains("Invalid assignment target.")));
    }

    #[test]
    fn panic_mode_recovers_at_the_next_statement() {
        // The first statement has a dangling `=` with no left-hand target;
        // synchronize() should still let the second `print` compile cleanly.
        let errors = compile_err("var; print 1;");
        assert_eq!(errors.len(), 1);
    }
}
