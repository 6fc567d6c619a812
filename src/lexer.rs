// File: src/lexer.rs
//
// Lexer for Kestrel source. Produces tokens on demand with line
// tracking; skips whitespace and both comment forms. Interpolated
// strings are emitted as segment tokens (`StrInterpBegin` /
// `StrInterp` / `StrInterpEnd`) with the splice's expression tokens in
// between; a plain string is a single `Str` token. Splices are
// `$identifier` or `${expression}`; `\$` escapes a literal dollar.

use ahash::AHashMap;
use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Brackets and punctuation.
    LParen,
    RParen,
    LBrace,
    RBrace,
    AtLBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    DotDot,
    Semicolon,
    Colon,
    Arrow,
    Backslash,
    Question,
    QuestionDot,
    QuestionColon,
    QuestionLBracket,
    Tilde,

    // Operators.
    Plus,
    PlusEqual,
    DoublePlus,
    Minus,
    MinusEqual,
    DoubleMinus,
    Star,
    StarEqual,
    DoubleStar,
    DoubleStarEqual,
    Slash,
    SlashEqual,
    Percent,
    PercentEqual,
    Ampersand,
    AmpersandEqual,
    Pipe,
    PipeEqual,
    Caret,
    CaretEqual,
    LShift,
    LShiftEqual,
    RShift,
    RShiftEqual,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Reserved words.
    And,
    As,
    Break,
    Case,
    Class,
    Continue,
    Coroutine,
    Default,
    Do,
    Else,
    False,
    For,
    Fun,
    If,
    Import,
    In,
    Nil,
    Or,
    Print,
    Return,
    Static,
    Super,
    This,
    True,
    Var,
    When,
    While,
    Yield,

    // Literals.
    Identifier,
    Number,
    Str,
    StrInterpBegin,
    StrInterp,
    StrInterpEnd,

    // Synthetic.
    Error,
    None,
    Eof,
}

/// A single token. For string tokens the lexeme holds the cooked
/// (escape-processed) contents; for error tokens it holds the message.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
}

impl Token {
    pub fn synthetic(kind: TokenKind, lexeme: &str) -> Token {
        Token { kind, lexeme: lexeme.to_string(), line: 0 }
    }

    pub fn none() -> Token {
        Token::synthetic(TokenKind::None, "")
    }
}

static KEYWORDS: Lazy<AHashMap<&'static str, TokenKind>> = Lazy::new(|| {
    let mut map = AHashMap::new();
    map.insert("and", TokenKind::And);
    map.insert("as", TokenKind::As);
    map.insert("break", TokenKind::Break);
    map.insert("case", TokenKind::Case);
    map.insert("class", TokenKind::Class);
    map.insert("continue", TokenKind::Continue);
    map.insert("coroutine", TokenKind::Coroutine);
    map.insert("default", TokenKind::Default);
    map.insert("do", TokenKind::Do);
    map.insert("else", TokenKind::Else);
    map.insert("false", TokenKind::False);
    map.insert("for", TokenKind::For);
    map.insert("fun", TokenKind::Fun);
    map.insert("if", TokenKind::If);
    map.insert("import", TokenKind::Import);
    map.insert("in", TokenKind::In);
    map.insert("nil", TokenKind::Nil);
    map.insert("or", TokenKind::Or);
    map.insert("print", TokenKind::Print);
    map.insert("return", TokenKind::Return);
    map.insert("static", TokenKind::Static);
    map.insert("super", TokenKind::Super);
    map.insert("this", TokenKind::This);
    map.insert("true", TokenKind::True);
    map.insert("var", TokenKind::Var);
    map.insert("when", TokenKind::When);
    map.insert("while", TokenKind::While);
    map.insert("yield", TokenKind::Yield);
    map
});

/// State of one in-progress interpolated string.
enum InterpMode {
    /// The next token is the single spliced identifier.
    Ident,
    /// Splice tokens flow until the brace depth returns to zero.
    Expr { braces: usize },
    /// The splice finished; continue scanning the string literal.
    Resume,
}

pub struct Lexer {
    source: Vec<char>,
    start: usize,
    current: usize,
    line: usize,
    interp: Vec<InterpMode>,
}

impl Lexer {
    pub fn new(source: &str) -> Lexer {
        Lexer { source: source.chars().collect(), start: 0, current: 0, line: 1, interp: Vec::new() }
    }

    /// Abandons any in-progress interpolation modes; used by the
    /// parser's panic-mode recovery.
    pub fn clear_modes(&mut self) {
        self.interp.clear();
    }

    fn reached_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn peek(&self) -> char {
        self.source.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.source.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let c = self.peek();
        self.current += 1;
        c
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        let lexeme: String = self.source[self.start..self.current].iter().collect();
        Token { kind, lexeme, line: self.line }
    }

    fn text_token(&self, kind: TokenKind, text: String) -> Token {
        Token { kind, lexeme: text, line: self.line }
    }

    fn error_token(&self, message: &str) -> Token {
        Token { kind: TokenKind::Error, lexeme: message.to_string(), line: self.line }
    }

    fn skip_whitespace(&mut self) -> Option<Token> {
        loop {
            match self.peek() {
                '\n' => {
                    self.line += 1;
                    self.advance();
                }
                c if c.is_whitespace() => {
                    self.advance();
                }
                '/' if self.peek_next() == '/' => {
                    while self.peek() != '\n' && !self.reached_end() {
                        self.advance();
                    }
                }
                '/' if self.peek_next() == '*' => {
                    self.advance();
                    self.advance();
                    loop {
                        if self.reached_end() {
                            return Some(self.error_token("Unterminated block comment."));
                        }
                        if self.peek() == '\n' {
                            self.line += 1;
                        }
                        if self.advance() == '*' && self.matches('/') {
                            break;
                        }
                    }
                }
                _ => return Option::None,
            }
        }
    }

    pub fn next_token(&mut self) -> Token {
        if matches!(self.interp.last(), Some(InterpMode::Ident)) {
            // The character after '$' was validated as alphabetic.
            self.start = self.current;
            let token = self.identifier();
            *self.interp.last_mut().unwrap() = InterpMode::Resume;
            return token;
        }
        if matches!(self.interp.last(), Some(InterpMode::Resume)) {
            return self.string(false);
        }

        if let Some(error) = self.skip_whitespace() {
            return error;
        }

        self.start = self.current;
        if self.reached_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();
        match c {
            '(' => self.make_token(TokenKind::LParen),
            ')' => self.make_token(TokenKind::RParen),
            '{' => {
                if let Some(InterpMode::Expr { braces }) = self.interp.last_mut() {
                    *braces += 1;
                }
                self.make_token(TokenKind::LBrace)
            }
            '}' => {
                // A balancing brace at depth zero ends a `${...}`
                // splice: it belongs to the string, which resumes.
                if matches!(self.interp.last(), Some(InterpMode::Expr { braces: 0 })) {
                    *self.interp.last_mut().unwrap() = InterpMode::Resume;
                    return self.string(false);
                }
                if let Some(InterpMode::Expr { braces }) = self.interp.last_mut() {
                    *braces -= 1;
                }
                self.make_token(TokenKind::RBrace)
            }
            '[' => self.make_token(TokenKind::LBracket),
            ']' => self.make_token(TokenKind::RBracket),
            '@' => {
                if self.matches('{') {
                    // The map brace nests like a plain one for splices.
                    if let Some(InterpMode::Expr { braces }) = self.interp.last_mut() {
                        *braces += 1;
                    }
                    self.make_token(TokenKind::AtLBrace)
                } else {
                    self.error_token("Unexpected character.")
                }
            }
            ';' => self.make_token(TokenKind::Semicolon),
            ',' => self.make_token(TokenKind::Comma),
            '.' => {
                if self.matches('.') {
                    self.make_token(TokenKind::DotDot)
                } else {
                    self.make_token(TokenKind::Dot)
                }
            }
            '?' => match self.peek() {
                '.' => {
                    self.advance();
                    self.make_token(TokenKind::QuestionDot)
                }
                ':' => {
                    self.advance();
                    self.make_token(TokenKind::QuestionColon)
                }
                '[' => {
                    self.advance();
                    self.make_token(TokenKind::QuestionLBracket)
                }
                _ => self.make_token(TokenKind::Question),
            },
            ':' => self.make_token(TokenKind::Colon),
            '\\' => self.make_token(TokenKind::Backslash),
            '~' => self.make_token(TokenKind::Tilde),
            '-' => match self.peek() {
                '=' => {
                    self.advance();
                    self.make_token(TokenKind::MinusEqual)
                }
                '-' => {
                    self.advance();
                    self.make_token(TokenKind::DoubleMinus)
                }
                '>' => {
                    self.advance();
                    self.make_token(TokenKind::Arrow)
                }
                _ => self.make_token(TokenKind::Minus),
            },
            '+' => match self.peek() {
                '=' => {
                    self.advance();
                    self.make_token(TokenKind::PlusEqual)
                }
                '+' => {
                    self.advance();
                    self.make_token(TokenKind::DoublePlus)
                }
                _ => self.make_token(TokenKind::Plus),
            },
            '/' => {
                if self.matches('=') {
                    self.make_token(TokenKind::SlashEqual)
                } else {
                    self.make_token(TokenKind::Slash)
                }
            }
            '*' => match self.peek() {
                '=' => {
                    self.advance();
                    self.make_token(TokenKind::StarEqual)
                }
                '*' => {
                    self.advance();
                    if self.matches('=') {
                        self.make_token(TokenKind::DoubleStarEqual)
                    } else {
                        self.make_token(TokenKind::DoubleStar)
                    }
                }
                _ => self.make_token(TokenKind::Star),
            },
            '%' => {
                if self.matches('=') {
                    self.make_token(TokenKind::PercentEqual)
                } else {
                    self.make_token(TokenKind::Percent)
                }
            }
            '!' => {
                if self.matches('=') {
                    self.make_token(TokenKind::BangEqual)
                } else {
                    self.make_token(TokenKind::Bang)
                }
            }
            '=' => {
                if self.matches('=') {
                    self.make_token(TokenKind::EqualEqual)
                } else {
                    self.make_token(TokenKind::Equal)
                }
            }
            '>' => match self.peek() {
                '=' => {
                    self.advance();
                    self.make_token(TokenKind::GreaterEqual)
                }
                '>' => {
                    self.advance();
                    if self.matches('=') {
                        self.make_token(TokenKind::RShiftEqual)
                    } else {
                        self.make_token(TokenKind::RShift)
                    }
                }
                _ => self.make_token(TokenKind::Greater),
            },
            '<' => match self.peek() {
                '=' => {
                    self.advance();
                    self.make_token(TokenKind::LessEqual)
                }
                '<' => {
                    self.advance();
                    if self.matches('=') {
                        self.make_token(TokenKind::LShiftEqual)
                    } else {
                        self.make_token(TokenKind::LShift)
                    }
                }
                _ => self.make_token(TokenKind::Less),
            },
            '&' => {
                if self.matches('=') {
                    self.make_token(TokenKind::AmpersandEqual)
                } else {
                    self.make_token(TokenKind::Ampersand)
                }
            }
            '|' => {
                if self.matches('=') {
                    self.make_token(TokenKind::PipeEqual)
                } else {
                    self.make_token(TokenKind::Pipe)
                }
            }
            '^' => {
                if self.matches('=') {
                    self.make_token(TokenKind::CaretEqual)
                } else {
                    self.make_token(TokenKind::Caret)
                }
            }
            '"' => self.string(true),
            c if is_alpha(c) => self.identifier(),
            c if c.is_ascii_digit() => self.number(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn identifier(&mut self) -> Token {
        while is_alpha_num(self.peek()) {
            self.advance();
        }

        let lexeme: String = self.source[self.start..self.current].iter().collect();
        let kind = KEYWORDS.get(lexeme.as_str()).copied().unwrap_or(TokenKind::Identifier);
        self.text_token(kind, lexeme)
    }

    fn number(&mut self) -> Token {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        self.make_token(TokenKind::Number)
    }

    /// Scans one string segment. `begin` marks the segment that opened
    /// at the quote; later segments belong to an interpolation frame on
    /// the mode stack.
    fn string(&mut self, begin: bool) -> Token {
        let mut text = String::new();

        loop {
            if self.reached_end() {
                if !begin {
                    self.interp.pop();
                }
                return self.error_token("Unterminated string.");
            }

            match self.advance() {
                '"' => {
                    return if begin {
                        self.text_token(TokenKind::Str, text)
                    } else {
                        self.interp.pop();
                        self.text_token(TokenKind::StrInterpEnd, text)
                    };
                }
                '\\' => match self.escape_sequence() {
                    Some(c) => text.push(c),
                    Option::None => {
                        if !begin {
                            self.interp.pop();
                        }
                        return self.error_token("Invalid escape sequence.");
                    }
                },
                '$' => {
                    let mode = if self.peek() == '{' {
                        self.advance();
                        InterpMode::Expr { braces: 0 }
                    } else if is_alpha(self.peek()) {
                        InterpMode::Ident
                    } else {
                        if !begin {
                            self.interp.pop();
                        }
                        return self
                            .error_token("Expected identifier or '{' after '$' in string.");
                    };

                    return if begin {
                        self.interp.push(mode);
                        self.text_token(TokenKind::StrInterpBegin, text)
                    } else {
                        *self.interp.last_mut().unwrap() = mode;
                        self.text_token(TokenKind::StrInterp, text)
                    };
                }
                '\n' => {
                    self.line += 1;
                    text.push('\n');
                }
                c => text.push(c),
            }
        }
    }

    fn escape_sequence(&mut self) -> Option<char> {
        let c = self.advance();
        match c {
            'a' => Some('\x07'),
            'b' => Some('\x08'),
            'f' => Some('\x0C'),
            'n' => Some('\n'),
            'r' => Some('\r'),
            't' => Some('\t'),
            'v' => Some('\x0B'),
            '\\' => Some('\\'),
            '\'' => Some('\''),
            '"' => Some('"'),
            '$' => Some('$'),
            _ => Option::None,
        }
    }
}

fn is_alpha(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_alpha_num(c: char) -> bool {
    is_alpha(c) || c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut kinds = Vec::new();
        loop {
            let token = lexer.next_token();
            let kind = token.kind;
            kinds.push(kind);
            if kind == TokenKind::Eof || kind == TokenKind::Error {
                return kinds;
            }
        }
    }

    #[test]
    fn punctuation_and_operators() {
        assert_eq!(
            kinds("a += b ** 2 << 1;"),
            vec![
                TokenKind::Identifier,
                TokenKind::PlusEqual,
                TokenKind::Identifier,
                TokenKind::DoubleStar,
                TokenKind::Number,
                TokenKind::LShift,
                TokenKind::Number,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_are_recognised() {
        assert_eq!(
            kinds("coroutine fun when do while"),
            vec![
                TokenKind::Coroutine,
                TokenKind::Fun,
                TokenKind::When,
                TokenKind::Do,
                TokenKind::While,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_lines_tracked() {
        let mut lexer = Lexer::new("// first\n/* block\nstill */ x");
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::Identifier);
        assert_eq!(token.line, 3);
    }

    #[test]
    fn plain_string_is_one_token() {
        let mut lexer = Lexer::new("\"a\\tb\\$c\"");
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::Str);
        assert_eq!(token.lexeme, "a\tb$c");
    }

    #[test]
    fn identifier_splice_segments() {
        assert_eq!(
            kinds("\"n=$n!\""),
            vec![
                TokenKind::StrInterpBegin,
                TokenKind::Identifier,
                TokenKind::StrInterpEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn expression_splice_with_nested_braces() {
        assert_eq!(
            kinds("\"v=${ @{ 1: 2 }.length() }\""),
            vec![
                TokenKind::StrInterpBegin,
                TokenKind::AtLBrace,
                TokenKind::Number,
                TokenKind::Colon,
                TokenKind::Number,
                TokenKind::RBrace,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::StrInterpEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn nested_interpolated_strings() {
        assert_eq!(
            kinds("\"a${\"b$c\"}d\""),
            vec![
                TokenKind::StrInterpBegin,
                TokenKind::StrInterpBegin,
                TokenKind::Identifier,
                TokenKind::StrInterpEnd,
                TokenKind::StrInterpEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let last = kinds("\"abc").pop().unwrap();
        assert_eq!(last, TokenKind::Error);
    }
}
