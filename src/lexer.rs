//! Lexer
//!
//! Turns raw UTF-8 source text for one file into a stream of `Token`s plus
//! an interned payload pool. Errors (unterminated literal/comment, invalid
//! numeric literal, stray character) are reported through a `DiagnosticSink`
//! and recovered from by skipping to the next plausible boundary instead of
//! aborting the whole file, per spec.md section 4.1.

use crate::diagnostics::DiagnosticSink;
use crate::token::{keyword_kind, Payload, SourceLocation, Token, TokenKind, TokenPool};

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    logical_line: u32,
    file_index: u32,
    pool: &'a mut TokenPool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file_index: u32, pool: &'a mut TokenPool) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            logical_line: 1,
            file_index,
            pool,
        }
    }

    fn loc(&self) -> SourceLocation {
        SourceLocation::new(self.file_index, self.line, self.column)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
            self.logical_line += 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consumes whitespace and comments. A backslash immediately followed
    /// by a newline is a line continuation: it is swallowed like
    /// whitespace but does *not* advance `logical_line`, so a directive
    /// split across physical lines is still one logical line.
    fn skip_trivia(&mut self, diags: &mut DiagnosticSink) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.bump();
                }
                Some(b'\\') if self.peek_at(1) == Some(b'\n') => {
                    self.pos += 2;
                    self.line += 1;
                    self.column = 1;
                    // logical_line deliberately not advanced
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.loc();
                    self.pos += 2;
                    self.column += 2;
                    let mut closed = false;
                    while self.peek().is_some() {
                        if self.peek() == Some(b'*') && self.peek_at(1) == Some(b'/') {
                            self.pos += 2;
                            self.column += 2;
                            closed = true;
                            break;
                        }
                        self.bump();
                    }
                    if !closed {
                        diags.error(start, "unterminated block comment");
                    }
                }
                _ => break,
            }
        }
    }

    pub fn tokenize(mut self, diags: &mut DiagnosticSink) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia(diags);
            let loc = self.loc();
            let ll = self.logical_line;
            let Some(c) = self.peek() else {
                tokens.push(Token::new(TokenKind::Eof, loc, ll));
                break;
            };

            let tok = if c == b'"' {
                Some(self.lex_string(diags, loc, ll))
            } else if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
                Some(self.lex_number(diags, loc, ll))
            } else if c.is_ascii_alphabetic() || c == b'_' {
                Some(self.lex_ident(loc, ll))
            } else {
                self.lex_punct(diags, loc, ll)
            };
            if let Some(tok) = tok {
                tokens.push(tok);
            }
        }
        tokens
    }

    fn lex_ident(&mut self, loc: SourceLocation, ll: u32) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        if text == "true" {
            return Token::new(TokenKind::BoolLit, loc, ll).with_payload(Payload::Bool(true));
        }
        if text == "false" {
            return Token::new(TokenKind::BoolLit, loc, ll).with_payload(Payload::Bool(false));
        }
        if let Some(kw) = keyword_kind(text) {
            return Token::new(kw, loc, ll);
        }
        let payload = self.pool.intern(text);
        Token::new(TokenKind::Ident, loc, ll).with_payload(payload)
    }

    fn lex_number(&mut self, diags: &mut DiagnosticSink, loc: SourceLocation, ll: u32) -> Token {
        let start = self.pos;
        let mut is_float = false;

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.bump();
            self.bump();
            let digits_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.bump();
            }
            if self.pos == digits_start {
                diags.error(loc, "invalid hexadecimal literal: no digits");
                return Token::new(TokenKind::Int32Lit, loc, ll).with_payload(Payload::Int32(0));
            }
            let text = std::str::from_utf8(&self.src[digits_start..self.pos]).unwrap();
            let value = i64::from_str_radix(text, 16).unwrap_or(0) as i32;
            return Token::new(TokenKind::Int32Lit, loc, ll).with_payload(Payload::Int32(value));
        }

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some(b'.') {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let save = self.pos;
            let mut probe = self.pos + 1;
            if matches!(self.src.get(probe), Some(b'+') | Some(b'-')) {
                probe += 1;
            }
            if matches!(self.src.get(probe), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                while self.pos < probe {
                    self.bump();
                }
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                let _ = save;
            }
        }

        let digits_text = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();

        if matches!(self.peek(), Some(b'f') | Some(b'F')) {
            self.bump();
            is_float = true;
        }

        if is_float {
            match digits_text.parse::<f64>() {
                Ok(v) => Token::new(TokenKind::Float32Lit, loc, ll).with_payload(Payload::Float64(v)),
                Err(_) => {
                    diags.error(loc, format!("invalid float literal `{digits_text}`"));
                    Token::new(TokenKind::Float32Lit, loc, ll).with_payload(Payload::Float64(0.0))
                }
            }
        } else if digits_text.starts_with('0') && digits_text.len() > 1 {
            match i64::from_str_radix(&digits_text, 8) {
                Ok(v) => Token::new(TokenKind::Int32Lit, loc, ll).with_payload(Payload::Int32(v as i32)),
                Err(_) => {
                    diags.error(loc, format!("invalid octal literal `{digits_text}`"));
                    Token::new(TokenKind::Int32Lit, loc, ll).with_payload(Payload::Int32(0))
                }
            }
        } else {
            match digits_text.parse::<i64>() {
                Ok(v) => Token::new(TokenKind::Int32Lit, loc, ll).with_payload(Payload::Int32(v as i32)),
                Err(_) => {
                    diags.error(loc, format!("invalid integer literal `{digits_text}`"));
                    Token::new(TokenKind::Int32Lit, loc, ll).with_payload(Payload::Int32(0))
                }
            }
        }
    }

    fn lex_string(&mut self, diags: &mut DiagnosticSink, loc: SourceLocation, ll: u32) -> Token {
        self.bump();
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    diags.error(loc, "unterminated string literal");
                    break;
                }
                Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(b'\\') => {
                    self.bump();
                    match self.bump() {
                        Some(b'n') => value.push('\n'),
                        Some(b't') => value.push('\t'),
                        Some(b'r') => value.push('\r'),
                        Some(b'0') => value.push('\0'),
                        Some(b'\\') => value.push('\\'),
                        Some(b'"') => value.push('"'),
                        Some(other) => value.push(other as char),
                        None => {
                            diags.error(loc, "unterminated string literal");
                            break;
                        }
                    }
                }
                Some(_) => {
                    let c = self.bump().unwrap();
                    value.push(c as char);
                }
            }
        }
        let payload = self.pool.intern(&value);
        Token::new(TokenKind::StrLit, loc, ll).with_payload(payload)
    }

    /// Returns `None` for a stray byte that matches no punctuation/operator:
    /// the byte is consumed and diagnosed, but no token is produced, so the
    /// caller's loop moves on to the next real token instead of treating the
    /// bad byte as end-of-input.
    fn lex_punct(&mut self, diags: &mut DiagnosticSink, loc: SourceLocation, ll: u32) -> Option<Token> {
        use TokenKind::*;
        macro_rules! t {
            ($kind:expr, $n:expr) => {{
                for _ in 0..$n {
                    self.bump();
                }
                Some(Token::new($kind, loc, ll))
            }};
        }
        let c0 = self.peek().unwrap();
        let c1 = self.peek_at(1);
        let c2 = self.peek_at(2);
        match (c0, c1, c2) {
            (b'<', Some(b'<'), Some(b'=')) => t!(OpLshEq, 3),
            (b'>', Some(b'>'), Some(b'=')) => t!(OpRshEq, 3),
            (b'<', Some(b'<'), _) => t!(OpLsh, 2),
            (b'>', Some(b'>'), _) => t!(OpRsh, 2),
            (b'=', Some(b'='), _) => t!(OpEq, 2),
            (b'!', Some(b'='), _) => t!(OpNEq, 2),
            (b'<', Some(b'='), _) => t!(OpLEq, 2),
            (b'>', Some(b'='), _) => t!(OpGEq, 2),
            (b'+', Some(b'='), _) => t!(OpAddEq, 2),
            (b'-', Some(b'='), _) => t!(OpSubEq, 2),
            (b'*', Some(b'='), _) => t!(OpMulEq, 2),
            (b'/', Some(b'='), _) => t!(OpDivEq, 2),
            (b'%', Some(b'='), _) => t!(OpModEq, 2),
            (b'&', Some(b'='), _) => t!(OpAndEq, 2),
            (b'|', Some(b'='), _) => t!(OpOrEq, 2),
            (b'^', Some(b'='), _) => t!(OpXorEq, 2),
            (b'&', Some(b'&'), _) => t!(OpLogicalAnd, 2),
            (b'|', Some(b'|'), _) => t!(OpLogicalOr, 2),
            (b'+', Some(b'+'), _) => t!(OpInc, 2),
            (b'-', Some(b'-'), _) => t!(OpDec, 2),
            (b'#', Some(b'#'), _) => t!(DoubleHash, 2),
            (b'(', _, _) => t!(LParen, 1),
            (b')', _, _) => t!(RParen, 1),
            (b'{', _, _) => t!(LBrace, 1),
            (b'}', _, _) => t!(RBrace, 1),
            (b'[', _, _) => t!(LBracket, 1),
            (b']', _, _) => t!(RBracket, 1),
            (b',', _, _) => t!(Comma, 1),
            (b';', _, _) => t!(Semicolon, 1),
            (b':', _, _) => t!(Colon, 1),
            (b'#', _, _) => t!(Hash, 1),
            (b'<', _, _) => t!(OpLess, 1),
            (b'>', _, _) => t!(OpGreater, 1),
            (b'=', _, _) => t!(OpAssign, 1),
            (b'+', _, _) => t!(OpAdd, 1),
            (b'-', _, _) => t!(OpSub, 1),
            (b'*', _, _) => t!(OpMul, 1),
            (b'/', _, _) => t!(OpDiv, 1),
            (b'%', _, _) => t!(OpMod, 1),
            (b'&', _, _) => t!(OpAnd, 1),
            (b'|', _, _) => t!(OpOr, 1),
            (b'^', _, _) => t!(OpXor, 1),
            (b'.', _, _) => t!(OpMember, 1),
            (b'!', _, _) => t!(OpNot, 1),
            (b'~', _, _) => t!(OpInv, 1),
            (b'?', _, _) => t!(OpTernary, 1),
            (other, _, _) => {
                diags.error(loc, format!("stray character `{}`", other as char));
                self.bump();
                None
            }
        }
    }
}

pub fn lex(src: &str, file_index: u32, pool: &mut TokenPool, diags: &mut DiagnosticSink) -> Vec<Token> {
    Lexer::new(src, file_index, pool).tokenize(diags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut pool = TokenPool::new();
        let mut diags = DiagnosticSink::new();
        let toks = lex(src, 0, &mut pool, &mut diags);
        assert!(!diags.has_errors(), "unexpected diagnostics: {:?}", diags.records());
        toks.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn punctuation_and_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("<<= >>= == != <= >= && ||"),
            vec![OpLshEq, OpRshEq, OpEq, OpNEq, OpLEq, OpGEq, OpLogicalAnd, OpLogicalOr, Eof]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        use TokenKind::*;
        assert_eq!(kinds("struct Foo uniform"), vec![KwStruct, Ident, KwUniform, Eof]);
    }

    #[test]
    fn integer_literal_forms() {
        let mut pool = TokenPool::new();
        let mut diags = DiagnosticSink::new();
        let toks = lex("0x1F 010 42", 0, &mut pool, &mut diags);
        assert!(!diags.has_errors());
        assert_eq!(toks[0].payload, Payload::Int32(31));
        assert_eq!(toks[1].payload, Payload::Int32(8));
        assert_eq!(toks[2].payload, Payload::Int32(42));
    }

    #[test]
    fn float_literal_with_suffix_and_exponent() {
        let mut pool = TokenPool::new();
        let mut diags = DiagnosticSink::new();
        let toks = lex("1.5f 2e3", 0, &mut pool, &mut diags);
        assert!(!diags.has_errors());
        assert_eq!(toks[0].kind, TokenKind::Float32Lit);
        assert_eq!(toks[0].payload, Payload::Float64(1.5));
        assert_eq!(toks[1].payload, Payload::Float64(2000.0));
    }

    #[test]
    fn string_literal_with_escapes() {
        let mut pool = TokenPool::new();
        let mut diags = DiagnosticSink::new();
        let toks = lex("\"a\\nb\"", 0, &mut pool, &mut diags);
        assert!(!diags.has_errors());
        assert_eq!(pool.get(toks[0].payload), "a\nb");
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 // comment\n+ /* block */ 2"),
            vec![TokenKind::Int32Lit, TokenKind::OpAdd, TokenKind::Int32Lit, TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_string_reports_error() {
        let mut pool = TokenPool::new();
        let mut diags = DiagnosticSink::new();
        let _ = lex("\"abc", 0, &mut pool, &mut diags);
        assert!(diags.has_errors());
    }

    #[test]
    fn line_continuation_does_not_advance_logical_line() {
        let mut pool = TokenPool::new();
        let mut diags = DiagnosticSink::new();
        let toks = lex("a \\\nb", 0, &mut pool, &mut diags);
        assert_eq!(toks[0].logical_line, toks[1].logical_line);
    }

    #[test]
    fn real_newline_advances_logical_line() {
        let mut pool = TokenPool::new();
        let mut diags = DiagnosticSink::new();
        let toks = lex("a\nb", 0, &mut pool, &mut diags);
        assert_eq!(toks[0].logical_line + 1, toks[1].logical_line);
    }

    #[test]
    fn stray_character_is_skipped_not_treated_as_eof() {
        let mut pool = TokenPool::new();
        let mut diags = DiagnosticSink::new();
        let toks = lex("a @ b", 0, &mut pool, &mut diags);
        assert!(diags.has_errors());
        let kinds: Vec<TokenKind> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Ident, TokenKind::Ident, TokenKind::Eof]);
        assert_eq!(toks.iter().filter(|t| t.kind == TokenKind::Eof).count(), 1);
    }
}
