// File: src/parser.rs
//
// Parser for Kestrel: a Pratt expression parser driven by a rule table
// (prefix parselet, infix parselet, precedence, associativity) plus
// recursive-descent statements. On error it reports to stderr, enters
// panic mode, and re-synchronises at statement boundaries; a failed
// parse yields no tree.

use crate::ast::*;
use crate::lexer::{Lexer, Token, TokenKind};

/// Precedence levels, low to high. All binary operators are
/// left-associative except exponentiation and the assignment family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    None,
    Assignment,
    Range,
    Conditional,
    LogicalOr,
    LogicalAnd,
    BitwiseOr,
    BitwiseXor,
    BitwiseAnd,
    Equality,
    Relational,
    Shift,
    Additive,
    Multiplicative,
    Exponentiation,
    Unary,
    Postfix,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
}

type PrefixFn = fn(&mut Parser) -> Expr;
type InfixFn = fn(&mut Parser, Expr) -> Expr;

struct ParseRule {
    prefix: Option<PrefixFn>,
    infix: Option<InfixFn>,
    precedence: Prec,
    assoc: Assoc,
}

fn rule(
    prefix: Option<PrefixFn>,
    infix: Option<InfixFn>,
    precedence: Prec,
    assoc: Assoc,
) -> ParseRule {
    ParseRule { prefix, infix, precedence, assoc }
}

fn get_rule(kind: TokenKind) -> ParseRule {
    use TokenKind::*;

    match kind {
        LParen => rule(Some(grouping_expr), Some(call_expr), Prec::Postfix, Assoc::Left),
        AtLBrace => rule(Some(map_expr), Option::None, Prec::None, Assoc::Left),
        LBracket => rule(Some(list_expr), Some(subscript_expr), Prec::Postfix, Assoc::Left),
        Dot => rule(Option::None, Some(property_expr), Prec::Postfix, Assoc::Left),
        DotDot => rule(Option::None, Some(range_expr), Prec::Range, Assoc::Left),
        Question => rule(Option::None, Some(conditional_expr), Prec::Conditional, Assoc::Right),
        QuestionDot => rule(Option::None, Some(property_expr), Prec::Postfix, Assoc::Left),
        QuestionColon => rule(Option::None, Some(elvis_expr), Prec::Conditional, Assoc::Right),
        QuestionLBracket => rule(Option::None, Some(subscript_expr), Prec::Postfix, Assoc::Left),
        Backslash => rule(Some(lambda_expr), Option::None, Prec::None, Assoc::Left),
        Tilde => rule(Some(unary_expr), Option::None, Prec::None, Assoc::Left),
        Minus => rule(Some(unary_expr), Some(binary_expr), Prec::Additive, Assoc::Left),
        MinusEqual => {
            rule(Option::None, Some(compound_assignment_expr), Prec::Assignment, Assoc::Right)
        }
        DoubleMinus => {
            rule(Some(prefix_inc_expr), Some(postfix_inc_expr), Prec::Postfix, Assoc::Left)
        }
        Plus => rule(Option::None, Some(binary_expr), Prec::Additive, Assoc::Left),
        PlusEqual => rule(Option::None, Some(compound_assignment_expr), Prec::Assignment, Assoc::Right),
        DoublePlus => {
            rule(Some(prefix_inc_expr), Some(postfix_inc_expr), Prec::Postfix, Assoc::Left)
        }
        Star => rule(Option::None, Some(binary_expr), Prec::Multiplicative, Assoc::Left),
        StarEqual => rule(Option::None, Some(compound_assignment_expr), Prec::Assignment, Assoc::Right),
        DoubleStar => rule(Option::None, Some(binary_expr), Prec::Exponentiation, Assoc::Right),
        DoubleStarEqual => {
            rule(Option::None, Some(compound_assignment_expr), Prec::Assignment, Assoc::Right)
        }
        Slash => rule(Option::None, Some(binary_expr), Prec::Multiplicative, Assoc::Left),
        SlashEqual => rule(Option::None, Some(compound_assignment_expr), Prec::Assignment, Assoc::Right),
        Percent => rule(Option::None, Some(binary_expr), Prec::Multiplicative, Assoc::Left),
        PercentEqual => {
            rule(Option::None, Some(compound_assignment_expr), Prec::Assignment, Assoc::Right)
        }
        Ampersand => rule(Option::None, Some(binary_expr), Prec::BitwiseAnd, Assoc::Left),
        AmpersandEqual => {
            rule(Option::None, Some(compound_assignment_expr), Prec::Assignment, Assoc::Right)
        }
        Pipe => rule(Some(unpack_assignment_expr), Some(binary_expr), Prec::BitwiseOr, Assoc::Left),
        PipeEqual => rule(Option::None, Some(compound_assignment_expr), Prec::Assignment, Assoc::Right),
        Caret => rule(Option::None, Some(binary_expr), Prec::BitwiseXor, Assoc::Left),
        CaretEqual => rule(Option::None, Some(compound_assignment_expr), Prec::Assignment, Assoc::Right),
        LShift => rule(Option::None, Some(binary_expr), Prec::Shift, Assoc::Left),
        LShiftEqual => {
            rule(Option::None, Some(compound_assignment_expr), Prec::Assignment, Assoc::Right)
        }
        RShift => rule(Option::None, Some(binary_expr), Prec::Shift, Assoc::Left),
        RShiftEqual => {
            rule(Option::None, Some(compound_assignment_expr), Prec::Assignment, Assoc::Right)
        }
        Bang => rule(Some(unary_expr), Option::None, Prec::None, Assoc::Left),
        BangEqual => rule(Option::None, Some(binary_expr), Prec::Equality, Assoc::Left),
        Equal => rule(Option::None, Some(assignment_expr), Prec::Assignment, Assoc::Right),
        EqualEqual => rule(Option::None, Some(binary_expr), Prec::Equality, Assoc::Left),
        Greater => rule(Option::None, Some(binary_expr), Prec::Relational, Assoc::Left),
        GreaterEqual => rule(Option::None, Some(binary_expr), Prec::Relational, Assoc::Left),
        Less => rule(Option::None, Some(binary_expr), Prec::Relational, Assoc::Left),
        LessEqual => rule(Option::None, Some(binary_expr), Prec::Relational, Assoc::Left),
        And => rule(Option::None, Some(logical_expr), Prec::LogicalAnd, Assoc::Left),
        Or => rule(Option::None, Some(logical_expr), Prec::LogicalOr, Assoc::Left),
        Coroutine => rule(Some(coroutine_expr), Option::None, Prec::None, Assoc::Left),
        Yield => rule(Some(yield_expr), Option::None, Prec::None, Assoc::Left),
        Super => rule(Some(super_expr), Option::None, Prec::None, Assoc::Left),
        This | True | False | Nil | Number | Str => {
            rule(Some(literal_expr), Option::None, Prec::None, Assoc::Left)
        }
        StrInterpBegin => rule(Some(string_interp_expr), Option::None, Prec::None, Assoc::Left),
        Identifier => rule(Some(identifier_expr), Option::None, Prec::None, Assoc::Left),
        _ => rule(Option::None, Option::None, Prec::None, Assoc::Left),
    }
}

pub struct Parser {
    lexer: Lexer,
    previous: Token,
    current: Token,
    error: bool,
    panic: bool,
}

impl Parser {
    fn new(source: &str) -> Parser {
        Parser {
            lexer: Lexer::new(source),
            previous: Token::none(),
            current: Token::none(),
            error: false,
            panic: false,
        }
    }

    fn enter_error_mode(&mut self) {
        self.error = true;
        self.panic = true;
    }

    fn error_at(&mut self, at_current: bool, message: &str) {
        if self.panic {
            return;
        }

        let token = if at_current { &self.current } else { &self.previous };
        eprint!("[Line {}] Error", token.line);
        match token.kind {
            TokenKind::Eof => eprint!(" at the end"),
            TokenKind::Error => {}
            _ => eprint!(" at '{}'", token.lexeme),
        }
        eprintln!(": {}", message);

        self.enter_error_mode();
    }

    fn error(&mut self, message: &str) {
        self.error_at(false, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(true, message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn next_token(&mut self) -> bool {
        self.current = self.lexer.next_token();
        !self.check(TokenKind::Error)
    }

    fn advance(&mut self) {
        self.previous = std::mem::replace(&mut self.current, Token::none());

        while !self.next_token() {
            let message = self.current.lexeme.clone();
            self.error_at_current(&message);
        }
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn reached_end(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    fn synchronize(&mut self) {
        self.panic = false;
        self.lexer.clear_modes();

        while !self.reached_end() {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }

            match self.current.kind {
                TokenKind::Import
                | TokenKind::Class
                | TokenKind::Static
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::When
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Do
                | TokenKind::Print
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Return
                | TokenKind::Yield => return,
                _ => {}
            }

            self.advance();
        }
    }
}

/// An expression standing in for an unparsable one; the error flag is
/// already set when this is produced.
fn error_expr(parser: &Parser) -> Expr {
    Expr::Literal(Token {
        kind: TokenKind::Nil,
        lexeme: "nil".to_string(),
        line: parser.previous.line,
    })
}

fn parse_precedence(parser: &mut Parser, precedence: Prec) -> Expr {
    parser.advance();

    let prefix = match get_rule(parser.previous.kind).prefix {
        Some(prefix) => prefix,
        None => {
            parser.error("Expected an expression.");
            return error_expr(parser);
        }
    };

    let mut expr = prefix(parser);

    while precedence <= get_rule(parser.current.kind).precedence {
        parser.advance();
        let infix = get_rule(parser.previous.kind).infix.expect("infix rule");
        expr = infix(parser, expr);
    }

    expr
}

fn expression(parser: &mut Parser) -> Expr {
    parse_precedence(parser, Prec::Assignment)
}

// ---- declarations ---------------------------------------------------

fn declaration(parser: &mut Parser) -> Decl {
    if parser.panic {
        parser.synchronize();
    }

    match parser.current.kind {
        TokenKind::Coroutine => {
            parser.advance();
            finish_coroutine(parser)
        }
        TokenKind::Import => {
            parser.advance();
            import_decl(parser)
        }
        TokenKind::Class => {
            parser.advance();
            class_decl(parser)
        }
        TokenKind::Fun => {
            parser.advance();
            function_decl(parser, false)
        }
        TokenKind::Var => {
            parser.advance();
            variable_decl(parser)
        }
        _ => Decl::Statement(statement(parser)),
    }
}

fn finish_coroutine(parser: &mut Parser) -> Decl {
    if parser.matches(TokenKind::Fun) {
        return function_decl(parser, true);
    }

    let expr = coroutine_expr(parser);
    parser.consume(TokenKind::Semicolon, "Expected ';' at the end of statement.");
    Decl::Statement(Stmt::Expression(expr))
}

fn import_decl(parser: &mut Parser) -> Decl {
    let module_name = expression(parser);

    let kind = if parser.matches(TokenKind::As) {
        parser.consume(TokenKind::Identifier, "Expected alias in import.");
        ImportKind::As(parser.previous.clone())
    } else if parser.matches(TokenKind::For) {
        let mut names = Vec::new();
        loop {
            parser.consume(TokenKind::Identifier, "Expected imported name.");
            names.push(parser.previous.clone());
            if !parser.matches(TokenKind::Comma) {
                break;
            }
        }
        ImportKind::For(names)
    } else {
        ImportKind::All
    };

    parser.consume(TokenKind::Semicolon, "Expected ';' after import.");
    Decl::Import(ImportDecl { module_name, kind })
}

fn class_decl(parser: &mut Parser) -> Decl {
    parser.consume(TokenKind::Identifier, "Expected class name in declaration.");
    let identifier = parser.previous.clone();

    let superclass = if parser.matches(TokenKind::Less) {
        parser.consume(TokenKind::Identifier, "Expected superclass name in declaration.");
        Some(parser.previous.clone())
    } else {
        None
    };

    let mut methods = Vec::new();
    parser.consume(TokenKind::LBrace, "Expected '{' before class body in declaration.");
    while !parser.check(TokenKind::RBrace) && !parser.reached_end() {
        methods.push(method_rule(parser));
    }
    parser.consume(TokenKind::RBrace, "Expected '}' after class body in declaration.");

    Decl::Class(ClassDecl { identifier, superclass, methods })
}

fn function_decl(parser: &mut Parser, coroutine: bool) -> Decl {
    Decl::Function(FunctionDecl { function: named_function_rule(parser, coroutine) })
}

fn begin_variable_decl(parser: &mut Parser) -> VariableDecl {
    if parser.matches(TokenKind::Pipe) {
        let mut identifiers = Vec::new();
        loop {
            parser.consume(TokenKind::Identifier, "Expected variable name in declaration.");
            identifiers.push(parser.previous.clone());
            if !parser.matches(TokenKind::Comma) {
                break;
            }
        }
        parser.consume(TokenKind::Pipe, "Expected '|' at the end of unpacking declaration.");

        VariableDecl { target: VariableTarget::Unpack(identifiers), value: None }
    } else {
        parser.consume(TokenKind::Identifier, "Expected variable name in declaration.");
        VariableDecl { target: VariableTarget::Single(parser.previous.clone()), value: None }
    }
}

fn end_variable_decl(parser: &mut Parser, mut decl: VariableDecl) -> Decl {
    if parser.matches(TokenKind::Equal) {
        decl.value = Some(expression(parser));
    }

    parser.consume(TokenKind::Semicolon, "Expected ';' after variable declaration.");
    Decl::Variable(decl)
}

fn variable_decl(parser: &mut Parser) -> Decl {
    let decl = begin_variable_decl(parser);
    end_variable_decl(parser, decl)
}

// ---- statements -----------------------------------------------------

fn statement(parser: &mut Parser) -> Stmt {
    match parser.current.kind {
        TokenKind::For => {
            parser.advance();
            for_stmt(parser)
        }
        TokenKind::While => {
            parser.advance();
            while_stmt(parser)
        }
        TokenKind::Do => {
            parser.advance();
            do_while_stmt(parser)
        }
        TokenKind::Break => {
            parser.advance();
            let keyword = parser.previous.clone();
            parser.consume(TokenKind::Semicolon, "Expected ';' at the end of statement.");
            Stmt::Break(keyword)
        }
        TokenKind::Continue => {
            parser.advance();
            let keyword = parser.previous.clone();
            parser.consume(TokenKind::Semicolon, "Expected ';' at the end of statement.");
            Stmt::Continue(keyword)
        }
        TokenKind::When => {
            parser.advance();
            when_stmt(parser)
        }
        TokenKind::If => {
            parser.advance();
            if_stmt(parser)
        }
        TokenKind::Return => {
            parser.advance();
            return_stmt(parser)
        }
        TokenKind::Print => {
            parser.advance();
            let expr = expression(parser);
            parser.consume(TokenKind::Semicolon, "Expected ';' at the end of 'print'.");
            Stmt::Print(expr)
        }
        TokenKind::LBrace => {
            parser.advance();
            Stmt::Block(block_rule(parser))
        }
        _ => expression_stmt(parser),
    }
}

fn expression_stmt(parser: &mut Parser) -> Stmt {
    let expr = expression(parser);
    parser.consume(TokenKind::Semicolon, "Expected ';' at the end of statement.");
    Stmt::Expression(expr)
}

fn for_stmt(parser: &mut Parser) -> Stmt {
    parser.consume(TokenKind::LParen, "Expected '(' after 'for'.");

    let mut initializer = None;
    if parser.matches(TokenKind::Var) {
        let decl = begin_variable_decl(parser);

        // `for (var x in xs)` desugars to for-in.
        if parser.matches(TokenKind::In) {
            return for_in_stmt(parser, decl);
        }
        initializer = Some(Box::new(end_variable_decl(parser, decl)));
    } else if !parser.matches(TokenKind::Semicolon) {
        initializer = Some(Box::new(Decl::Statement(expression_stmt(parser))));
    }

    let mut condition = None;
    if !parser.matches(TokenKind::Semicolon) {
        condition = Some(expression(parser));
        parser.consume(TokenKind::Semicolon, "Expected ';' after condition in 'for'.");
    }

    let mut increment = None;
    if !parser.matches(TokenKind::RParen) {
        increment = Some(expression(parser));
        parser.consume(TokenKind::RParen, "Expected ')' after increment in 'for'.");
    }

    let body = Box::new(statement(parser));
    Stmt::For { initializer, condition, increment, body }
}

fn for_in_stmt(parser: &mut Parser, decl: VariableDecl) -> Stmt {
    if decl.value.is_some() {
        parser.error("Variable in 'for-in' cannot be assigned.");
    }

    let collection = expression(parser);
    parser.consume(TokenKind::RParen, "Expected ')' after collection in 'for-in'.");
    let body = Box::new(statement(parser));
    Stmt::ForIn { target: decl.target, collection, body }
}

fn while_stmt(parser: &mut Parser) -> Stmt {
    parser.consume(TokenKind::LParen, "Expected '(' before condition in 'while'.");
    let condition = expression(parser);
    parser.consume(TokenKind::RParen, "Expected ')' after condition in 'while'.");

    let body = Box::new(statement(parser));
    Stmt::While { condition, body }
}

fn do_while_stmt(parser: &mut Parser) -> Stmt {
    let body = Box::new(statement(parser));
    parser.consume(TokenKind::While, "Expected 'while' after 'do' body.");

    parser.consume(TokenKind::LParen, "Expected '(' before condition in 'while'.");
    let condition = expression(parser);
    parser.consume(TokenKind::RParen, "Expected ')' after condition in 'while'.");
    parser.consume(TokenKind::Semicolon, "Expected ';' after 'do-while' statement.");

    Stmt::DoWhile { body, condition }
}

fn when_stmt(parser: &mut Parser) -> Stmt {
    parser.consume(TokenKind::LParen, "Expected '(' before control expression in 'when'.");
    let control = expression(parser);
    parser.consume(TokenKind::RParen, "Expected ')' after control expression in 'when'.");

    parser.consume(TokenKind::LBrace, "Expected '{' before 'when' body.");

    let mut entries = Vec::new();
    while !parser.check(TokenKind::Else)
        && !parser.check(TokenKind::RBrace)
        && !parser.reached_end()
    {
        entries.push(when_entry_rule(parser));
    }

    let mut else_branch = None;
    if parser.matches(TokenKind::Else) {
        parser.consume(TokenKind::Arrow, "Expected '->' after 'else' in 'when'.");
        else_branch = Some(Box::new(statement(parser)));
    }

    parser.consume(TokenKind::RBrace, "Expected '}' after 'when' body.");

    Stmt::When { control, entries, else_branch }
}

fn when_entry_rule(parser: &mut Parser) -> WhenEntry {
    let mut cases = Vec::new();
    loop {
        cases.push(expression(parser));
        if !parser.matches(TokenKind::Comma) {
            break;
        }
    }

    parser.consume(TokenKind::Arrow, "Expected '->' after 'when' cases.");

    WhenEntry { cases, body: statement(parser) }
}

fn if_stmt(parser: &mut Parser) -> Stmt {
    parser.consume(TokenKind::LParen, "Expected '(' before condition in 'if'.");
    let condition = expression(parser);
    parser.consume(TokenKind::RParen, "Expected ')' after condition in 'if'.");

    let then_branch = Box::new(statement(parser));
    let mut else_branch = None;
    if parser.matches(TokenKind::Else) {
        else_branch = Some(Box::new(statement(parser)));
    }

    Stmt::If { condition, then_branch, else_branch }
}

fn return_stmt(parser: &mut Parser) -> Stmt {
    let keyword = parser.previous.clone();
    let mut value = None;
    if !parser.check(TokenKind::Semicolon) {
        value = Some(expression(parser));
    }

    parser.consume(TokenKind::Semicolon, "Expected ';' at the end of 'return'.");
    Stmt::Return { keyword, value }
}

fn block_rule(parser: &mut Parser) -> Vec<Decl> {
    let mut body = Vec::new();
    while !parser.check(TokenKind::RBrace) && !parser.reached_end() {
        body.push(declaration(parser));
    }
    parser.consume(TokenKind::RBrace, "Expected '}' after block.");
    body
}

// ---- expressions ----------------------------------------------------

fn literal_expr(parser: &mut Parser) -> Expr {
    Expr::Literal(parser.previous.clone())
}

fn identifier_expr(parser: &mut Parser) -> Expr {
    Expr::Identifier { name: parser.previous.clone(), context: ExprContext::Load }
}

fn string_interp_expr(parser: &mut Parser) -> Expr {
    let mut parts = Vec::new();
    if !parser.previous.lexeme.is_empty() {
        parts.push(Expr::Literal(parser.previous.clone()));
    }

    loop {
        parts.push(expression(parser));

        if parser.matches(TokenKind::StrInterp) {
            if !parser.previous.lexeme.is_empty() {
                parts.push(Expr::Literal(parser.previous.clone()));
            }
        } else if parser.matches(TokenKind::StrInterpEnd) {
            if !parser.previous.lexeme.is_empty() {
                parts.push(Expr::Literal(parser.previous.clone()));
            }
            break;
        } else {
            parser.error_at_current("Unexpected token in string interpolation.");
            break;
        }
    }

    Expr::StringInterp { parts }
}

fn grouping_expr(parser: &mut Parser) -> Expr {
    let expr = expression(parser);

    // Parentheses with at least one comma form a tuple literal.
    if parser.matches(TokenKind::Comma) {
        let mut elements = vec![expr];
        loop {
            elements.push(expression(parser));
            if !parser.matches(TokenKind::Comma) {
                break;
            }
        }

        parser.consume(TokenKind::RParen, "Expected ')' after tuple expression.");
        return Expr::Tuple(elements);
    }

    parser.consume(TokenKind::RParen, "Expected ')' after grouping expression.");
    expr
}

fn list_expr(parser: &mut Parser) -> Expr {
    let mut elements = Vec::new();
    if !parser.check(TokenKind::RBracket) {
        loop {
            elements.push(expression(parser));
            if !parser.matches(TokenKind::Comma) {
                break;
            }
        }
    }

    parser.consume(TokenKind::RBracket, "Expected ']' after list expression.");
    Expr::List(elements)
}

fn map_expr(parser: &mut Parser) -> Expr {
    let mut entries = Vec::new();
    if !parser.check(TokenKind::RBrace) {
        loop {
            let key = expression(parser);
            parser.consume(TokenKind::Colon, "Expected ':' after map key.");
            let value = expression(parser);
            entries.push((key, value));
            if !parser.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    parser.consume(TokenKind::RBrace, "Expected '}' after map.");

    Expr::Map(entries)
}

fn lambda_expr(parser: &mut Parser) -> Expr {
    let mut parameters = Vec::new();
    if !parser.check(TokenKind::Arrow) {
        loop {
            parser.consume(TokenKind::Identifier, "Expected parameter name.");
            parameters.push(parser.previous.clone());
            if !parser.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    parser.consume(TokenKind::Arrow, "Expected '->' after lambda parameters.");

    let body = if parser.matches(TokenKind::LBrace) {
        FunctionBody::Block(block_rule(parser))
    } else {
        FunctionBody::Expression(Box::new(expression(parser)))
    };

    Expr::Lambda(FunctionLit { parameters, body })
}

fn super_expr(parser: &mut Parser) -> Expr {
    let keyword = parser.previous.clone();
    parser.consume(TokenKind::Dot, "Expected '.' after 'super'.");
    parser.consume(TokenKind::Identifier, "Expected superclass method name in 'super'.");
    Expr::Super { keyword, method: parser.previous.clone() }
}

fn coroutine_expr(parser: &mut Parser) -> Expr {
    let keyword = parser.previous.clone();
    let inner = Box::new(expression(parser));
    Expr::Coroutine { keyword, inner }
}

fn yield_expr(parser: &mut Parser) -> Expr {
    let keyword = parser.previous.clone();
    let mut value = None;
    if !parser.check(TokenKind::Semicolon) {
        value = Some(Box::new(expression(parser)));
    }

    Expr::Yield { keyword, value }
}

fn set_assignment_context(parser: &mut Parser, expr: &mut Expr) {
    match expr {
        Expr::Identifier { context, .. } => *context = ExprContext::Store,
        Expr::Property { context, .. } => *context = ExprContext::Store,
        Expr::Subscript { context, .. } => *context = ExprContext::Store,
        _ => parser.error("Invalid assignment target."),
    }
}

fn unpack_assignment_expr(parser: &mut Parser) -> Expr {
    let mut targets = Vec::new();
    loop {
        let mut target = parse_precedence(parser, Prec::Postfix);
        set_assignment_context(parser, &mut target);
        targets.push(target);
        if !parser.matches(TokenKind::Comma) {
            break;
        }
    }

    parser.consume(TokenKind::Pipe, "Expected '|' at the end of unpacking assignment.");
    parser.consume(TokenKind::Equal, "Expected '=' in unpacking assignment.");

    let value = Box::new(expression(parser));
    Expr::Assignment { target: AssignmentTarget::Unpack(targets), value }
}

fn prefix_inc_expr(parser: &mut Parser) -> Expr {
    let op = parser.previous.clone();
    let mut target = parse_precedence(parser, Prec::Unary);
    set_assignment_context(parser, &mut target);
    Expr::PrefixInc { op, target: Box::new(target) }
}

fn unary_expr(parser: &mut Parser) -> Expr {
    let op = parser.previous.clone();
    let operand = Box::new(parse_precedence(parser, Prec::Unary));
    Expr::Unary { op, operand }
}

fn call_expr(parser: &mut Parser, callee: Expr) -> Expr {
    let mut arguments = Vec::new();
    if !parser.check(TokenKind::RParen) {
        loop {
            if arguments.len() == 255 {
                parser.error("Cannot have more than 255 arguments.");
            }
            arguments.push(expression(parser));
            if !parser.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    parser.consume(TokenKind::RParen, "Expected ')' after call arguments.");

    Expr::Call { callee: Box::new(callee), arguments }
}

fn range_expr(parser: &mut Parser, begin: Expr) -> Expr {
    let end = Box::new(parse_precedence(parser, Prec::Conditional));

    let mut step = None;
    if parser.matches(TokenKind::Colon) {
        step = Some(Box::new(parse_precedence(parser, Prec::Conditional)));
    }

    Expr::Range { begin: Box::new(begin), end, step }
}

fn property_expr(parser: &mut Parser, object: Expr) -> Expr {
    let safe = parser.previous.kind == TokenKind::QuestionDot;
    parser.consume(TokenKind::Identifier, "Expected property name.");
    Expr::Property {
        object: Box::new(object),
        name: parser.previous.clone(),
        context: ExprContext::Load,
        safe,
    }
}

fn subscript_expr(parser: &mut Parser, object: Expr) -> Expr {
    let safe = parser.previous.kind == TokenKind::QuestionLBracket;
    let index = Box::new(expression(parser));
    parser.consume(TokenKind::RBracket, "Expected ']' after subscript.");
    Expr::Subscript { object: Box::new(object), index, context: ExprContext::Load, safe }
}

fn postfix_inc_expr(parser: &mut Parser, target: Expr) -> Expr {
    let mut target = target;
    set_assignment_context(parser, &mut target);
    let op = parser.previous.clone();
    Expr::PostfixInc { op, target: Box::new(target) }
}

fn binary_expr(parser: &mut Parser, left: Expr) -> Expr {
    let op = parser.previous.clone();

    let rule = get_rule(op.kind);
    let precedence = if rule.assoc == Assoc::Right {
        rule.precedence
    } else {
        next_precedence(rule.precedence)
    };

    let right = Box::new(parse_precedence(parser, precedence));
    Expr::Binary { left: Box::new(left), op, right }
}

fn next_precedence(precedence: Prec) -> Prec {
    use Prec::*;
    match precedence {
        None => Assignment,
        Assignment => Range,
        Range => Conditional,
        Conditional => LogicalOr,
        LogicalOr => LogicalAnd,
        LogicalAnd => BitwiseOr,
        BitwiseOr => BitwiseXor,
        BitwiseXor => BitwiseAnd,
        BitwiseAnd => Equality,
        Equality => Relational,
        Relational => Shift,
        Shift => Additive,
        Additive => Multiplicative,
        Multiplicative => Exponentiation,
        Exponentiation => Unary,
        Unary => Postfix,
        Postfix => Postfix,
    }
}

fn assignment_expr(parser: &mut Parser, target: Expr) -> Expr {
    let mut target = target;
    set_assignment_context(parser, &mut target);

    let value = Box::new(parse_precedence(parser, Prec::Assignment));
    Expr::Assignment { target: AssignmentTarget::Single(Box::new(target)), value }
}

fn compound_assignment_expr(parser: &mut Parser, target: Expr) -> Expr {
    let mut target = target;
    set_assignment_context(parser, &mut target);

    let op = parser.previous.clone();
    let value = Box::new(parse_precedence(parser, Prec::Assignment));
    Expr::CompoundAssignment { target: Box::new(target), op, value }
}

fn logical_expr(parser: &mut Parser, left: Expr) -> Expr {
    let op = parser.previous.clone();
    let precedence = get_rule(op.kind).precedence;
    let right = Box::new(parse_precedence(parser, precedence));
    Expr::Logical { left: Box::new(left), op, right }
}

fn conditional_expr(parser: &mut Parser, condition: Expr) -> Expr {
    let then_branch = Box::new(expression(parser));
    parser.consume(TokenKind::Colon, "Expected ':' in conditional expression.");
    let else_branch = Box::new(parse_precedence(parser, Prec::Conditional));
    Expr::Conditional { condition: Box::new(condition), then_branch, else_branch }
}

fn elvis_expr(parser: &mut Parser, left: Expr) -> Expr {
    let right = Box::new(expression(parser));
    Expr::Elvis { left: Box::new(left), right }
}

// ---- functions and methods ------------------------------------------

fn named_function_rule(parser: &mut Parser, coroutine: bool) -> NamedFunction {
    parser.consume(TokenKind::Identifier, "Expected function name in declaration.");
    let identifier = parser.previous.clone();

    parser.consume(TokenKind::LParen, "Expected '(' after function name in declaration.");
    let mut parameters = Vec::new();
    if !parser.check(TokenKind::RParen) {
        loop {
            if parameters.len() == 255 {
                parser.error("Cannot have more than 255 parameters.");
            }
            parser.consume(TokenKind::Identifier, "Expected parameter name.");
            parameters.push(parser.previous.clone());
            if !parser.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    parser.consume(TokenKind::RParen, "Expected ')' after function parameters in declaration.");

    let body = if parser.matches(TokenKind::Equal) {
        let expr = expression(parser);
        parser.consume(TokenKind::Semicolon, "Expected ';' after expression function.");
        FunctionBody::Expression(Box::new(expr))
    } else {
        parser.consume(TokenKind::LBrace, "Expected '{' before function body in declaration.");
        FunctionBody::Block(block_rule(parser))
    };

    NamedFunction { identifier, function: FunctionLit { parameters, body }, coroutine }
}

fn method_rule(parser: &mut Parser) -> Method {
    let is_static = parser.matches(TokenKind::Static);
    let is_coroutine = parser.matches(TokenKind::Coroutine);
    Method { is_static, function: named_function_rule(parser, is_coroutine) }
}

/// Parses a whole source string. Reports to stderr; a failed parse
/// returns `None`.
pub fn parse(source: &str) -> Option<Ast> {
    let mut parser = Parser::new(source);
    parser.advance();

    let mut body = Vec::new();
    while !parser.matches(TokenKind::Eof) {
        body.push(declaration(&mut parser));
    }

    if parser.error {
        return None;
    }

    Some(Ast { body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_precedence_correctly() {
        let ast = parse("var x = 1 + 2 * 3;").unwrap();
        let Decl::Variable(decl) = &ast.body[0] else { panic!("expected variable") };
        let Some(Expr::Binary { op, right, .. }) = &decl.value else { panic!("expected binary") };
        assert_eq!(op.lexeme, "+");
        assert!(matches!(**right, Expr::Binary { .. }));
    }

    #[test]
    fn exponentiation_is_right_associative() {
        let ast = parse("var x = 2 ** 3 ** 2;").unwrap();
        let Decl::Variable(decl) = &ast.body[0] else { panic!("expected variable") };
        let Some(Expr::Binary { left, right, .. }) = &decl.value else { panic!("expected binary") };
        assert!(matches!(**left, Expr::Literal(_)));
        assert!(matches!(**right, Expr::Binary { .. }));
    }

    #[test]
    fn assignment_targets_get_store_context() {
        let ast = parse("a.b = 1; a[0] = 2; c = 3;").unwrap();
        for decl in &ast.body {
            let Decl::Statement(Stmt::Expression(Expr::Assignment { target, .. })) = decl else {
                panic!("expected assignment")
            };
            let AssignmentTarget::Single(expr) = target else { panic!("expected single target") };
            let context = match &**expr {
                Expr::Property { context, .. } => *context,
                Expr::Subscript { context, .. } => *context,
                Expr::Identifier { context, .. } => *context,
                _ => panic!("unexpected target"),
            };
            assert_eq!(context, ExprContext::Store);
        }
    }

    #[test]
    fn parses_for_in_desugar() {
        let ast = parse("for (var x in xs) print x;").unwrap();
        assert!(matches!(ast.body[0], Decl::Statement(Stmt::ForIn { .. })));
    }

    #[test]
    fn parses_when_with_multi_case_entries() {
        let ast = parse("when (x) { 1, 2 -> print 1; else -> print 2; }").unwrap();
        let Decl::Statement(Stmt::When { entries, else_branch, .. }) = &ast.body[0] else {
            panic!("expected when")
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].cases.len(), 2);
        assert!(else_branch.is_some());
    }

    #[test]
    fn parses_lambda_and_tuple() {
        let ast = parse("var f = \\x, y -> (y, x);").unwrap();
        let Decl::Variable(decl) = &ast.body[0] else { panic!("expected variable") };
        let Some(Expr::Lambda(function)) = &decl.value else { panic!("expected lambda") };
        assert_eq!(function.parameters.len(), 2);
        assert!(matches!(function.body, FunctionBody::Expression(_)));
    }

    #[test]
    fn parses_unpacking_assignment() {
        let ast = parse("| a, b | = (1, 2);").unwrap();
        let Decl::Statement(Stmt::Expression(Expr::Assignment { target, .. })) = &ast.body[0]
        else {
            panic!("expected assignment")
        };
        let AssignmentTarget::Unpack(targets) = target else { panic!("expected unpack") };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn reports_errors_and_returns_none() {
        assert!(parse("var = 3;").is_none());
        assert!(parse("print 1").is_none());
        assert!(parse("(1, 2").is_none());
    }

    #[test]
    fn recovers_to_later_statements() {
        // A parse error must not cascade past a synchronisation point.
        assert!(parse("var 1 = 2; var ok = 3;").is_none());
    }
}
