//! Preprocessor
//!
//! Expands the lexed token stream in place: `#include`, `#define`/`#undef`,
//! conditional directives, `#error`, and `##` token pasting, with recursive
//! macro expansion guarded against self-reference. Macro storage mirrors the
//! original `PreprocMacroMap` (`hlslparser.hpp`): `HashMap<String, Macro>`
//! where `Macro { params, body, is_function_like }`.

use crate::diagnostics::DiagnosticSink;
use crate::token::{Payload, SourceLocation, Token, TokenKind, TokenPool};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct Macro {
    pub params: Vec<String>,
    pub body: Vec<Token>,
    pub is_function_like: bool,
}

/// A source file loaded during preprocessing, used both to resolve
/// `#include` paths and to assign stable file indices for diagnostics.
pub trait FileLoader {
    fn load(&mut self, path: &str, from_file_index: u32) -> Result<(u32, String), String>;
}

pub struct Preprocessor<'a> {
    pool: &'a mut TokenPool,
    macros: HashMap<String, Macro>,
    included_stack: Vec<u32>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(pool: &'a mut TokenPool, feature_macros: &[String]) -> Self {
        let mut macros = HashMap::new();
        for name in feature_macros {
            let loc = SourceLocation::BAD;
            macros.insert(
                name.clone(),
                Macro {
                    params: vec![],
                    body: vec![Token::new(TokenKind::Int32Lit, loc, 0).with_payload(Payload::Int32(1))],
                    is_function_like: false,
                },
            );
        }
        Preprocessor {
            pool,
            macros,
            included_stack: Vec::new(),
        }
    }

    fn ident_text(&self, tok: &Token) -> String {
        self.pool.get(tok.payload).to_string()
    }

    /// Runs the full directive-and-expansion pass over `tokens`, invoking
    /// `loader` to resolve `#include`. Returns the expanded, directive-free
    /// stream.
    pub fn process(
        &mut self,
        tokens: Vec<Token>,
        file_index: u32,
        loader: &mut dyn FileLoader,
        diags: &mut DiagnosticSink,
    ) -> Vec<Token> {
        self.included_stack.push(file_index);
        let mut out = Vec::new();
        let mut i = 0usize;
        // One bit of "active" state per level of conditional nesting.
        let mut cond_stack: Vec<CondState> = Vec::new();

        while i < tokens.len() {
            let tok = tokens[i];
            if tok.kind == TokenKind::Eof {
                break;
            }
            let is_line_start = i == 0 || tokens[i - 1].logical_line != tok.logical_line;
            if tok.kind == TokenKind::Hash && is_line_start {
                let (consumed, directive_out) =
                    self.handle_directive(&tokens, i, file_index, loader, diags, &mut cond_stack);
                out.extend(directive_out);
                i = consumed;
                continue;
            }

            let active = cond_stack.iter().all(|c| c.taking());
            if !active {
                i += 1;
                continue;
            }

            if tok.kind == TokenKind::Ident {
                let name = self.ident_text(&tok);
                if self.macros.contains_key(&name) {
                    let mut expanding = HashSet::new();
                    let (expanded, next_i) = self.expand_at(&tokens, i, &mut expanding, diags);
                    out.extend(expanded);
                    i = next_i;
                    continue;
                }
            }
            out.push(tok);
            i += 1;
        }

        if !cond_stack.is_empty() {
            diags.error(SourceLocation::BAD, "unterminated #if at end of file");
        }
        self.included_stack.pop();
        out
    }

    fn handle_directive(
        &mut self,
        tokens: &[Token],
        hash_pos: usize,
        file_index: u32,
        loader: &mut dyn FileLoader,
        diags: &mut DiagnosticSink,
        cond_stack: &mut Vec<CondState>,
    ) -> (usize, Vec<Token>) {
        let loc = tokens[hash_pos].loc;
        let logical_line = tokens[hash_pos].logical_line;
        let mut j = hash_pos + 1;
        let line_end = {
            let mut k = j;
            while k < tokens.len() && tokens[k].logical_line == logical_line && tokens[k].kind != TokenKind::Eof {
                k += 1;
            }
            k
        };

        if j >= line_end {
            return (line_end, Vec::new());
        }
        let directive = if tokens[j].kind == TokenKind::Ident {
            self.ident_text(&tokens[j])
        } else {
            diags.error(loc, "expected preprocessor directive name after `#`");
            return (line_end, Vec::new());
        };
        j += 1;

        let active = cond_stack.iter().all(|c| c.taking());

        match directive.as_str() {
            "include" => {
                if !active {
                    return (line_end, Vec::new());
                }
                if j >= line_end || tokens[j].kind != TokenKind::StrLit {
                    diags.error(loc, "expected \"path\" after #include");
                    return (line_end, Vec::new());
                }
                let path = self.pool.get(tokens[j].payload).to_string();
                if self.included_stack.contains(&file_index) && self.included_stack.len() > 64 {
                    diags.fatal(loc, format!("recursive #include of `{path}`"));
                    return (line_end, Vec::new());
                }
                match loader.load(&path, file_index) {
                    Ok((new_index, text)) => {
                        let mut sub_pool_tokens = crate::lexer::lex(&text, new_index, self.pool, diags);
                        if let Some(last) = sub_pool_tokens.last() {
                            if last.kind == TokenKind::Eof {
                                sub_pool_tokens.pop();
                            }
                        }
                        let expanded = self.process(sub_pool_tokens, new_index, loader, diags);
                        (line_end, expanded)
                    }
                    Err(e) => {
                        diags.error(loc, format!("cannot open include file `{path}`: {e}"));
                        (line_end, Vec::new())
                    }
                }
            }
            "define" => {
                if active {
                    self.handle_define(tokens, j, line_end, loc, diags);
                }
                (line_end, Vec::new())
            }
            "undef" => {
                if active {
                    if j < line_end && tokens[j].kind == TokenKind::Ident {
                        let name = self.ident_text(&tokens[j]);
                        self.macros.remove(&name);
                    } else {
                        diags.error(loc, "expected macro name after #undef");
                    }
                }
                (line_end, Vec::new())
            }
            "error" => {
                if active {
                    let text = self.stringify_range(tokens, j, line_end);
                    diags.error(loc, format!("#error {text}"));
                }
                (line_end, Vec::new())
            }
            "if" => {
                let value = if active { self.eval_const_expr(tokens, j, line_end, loc, diags) } else { 0 };
                cond_stack.push(CondState::new(active && value != 0));
                (line_end, Vec::new())
            }
            "ifdef" | "ifndef" => {
                let defined = j < line_end
                    && tokens[j].kind == TokenKind::Ident
                    && self.macros.contains_key(&self.ident_text(&tokens[j]));
                let want = directive == "ifdef";
                let taking = active && (defined == want);
                cond_stack.push(CondState::new(taking));
                (line_end, Vec::new())
            }
            "elif" => {
                if let Some(top) = cond_stack.last_mut() {
                    let parent_active = active; // active already excludes this level
                    let value = if parent_active && !top.any_taken { self.eval_const_expr(tokens, j, line_end, loc, diags) } else { 0 };
                    top.enter_elif(parent_active && value != 0);
                } else {
                    diags.error(loc, "#elif without matching #if");
                }
                (line_end, Vec::new())
            }
            "else" => {
                if let Some(top) = cond_stack.last_mut() {
                    top.enter_else();
                } else {
                    diags.error(loc, "#else without matching #if");
                }
                (line_end, Vec::new())
            }
            "endif" => {
                if cond_stack.pop().is_none() {
                    diags.error(loc, "#endif without matching #if");
                }
                (line_end, Vec::new())
            }
            other => {
                if active {
                    diags.error(loc, format!("unknown preprocessor directive `#{other}`"));
                }
                (line_end, Vec::new())
            }
        }
    }

    fn handle_define(&mut self, tokens: &[Token], mut j: usize, line_end: usize, loc: SourceLocation, diags: &mut DiagnosticSink) {
        if j >= line_end || tokens[j].kind != TokenKind::Ident {
            diags.error(loc, "expected macro name after #define");
            return;
        }
        let name = self.ident_text(&tokens[j]);
        let name_end_pos = tokens[j].loc.column as usize + name.len();
        let _ = name_end_pos;
        j += 1;

        // Function-like macro requires `(` with NO whitespace before it;
        // approximate via adjacent token positions (spec.md 4.2).
        let is_function_like = j < line_end
            && tokens[j].kind == TokenKind::LParen
            && tokens[j].loc.line == tokens[j - 1].loc.line
            && tokens[j].loc.column == tokens[j - 1].loc.column + 1;

        let mut params = Vec::new();
        if is_function_like {
            j += 1;
            while j < line_end && tokens[j].kind != TokenKind::RParen {
                if tokens[j].kind == TokenKind::Ident {
                    params.push(self.ident_text(&tokens[j]));
                    j += 1;
                    if j < line_end && tokens[j].kind == TokenKind::Comma {
                        j += 1;
                    }
                } else {
                    diags.error(tokens[j].loc, "expected parameter name in macro parameter list");
                    break;
                }
            }
            if j < line_end && tokens[j].kind == TokenKind::RParen {
                j += 1;
            } else {
                diags.error(loc, "unterminated macro parameter list");
            }
        }

        let body = tokens[j..line_end].to_vec();
        self.macros.insert(name, Macro { params, body, is_function_like });
    }

    fn stringify_range(&self, tokens: &[Token], from: usize, to: usize) -> String {
        tokens[from..to]
            .iter()
            .map(|t| self.token_text(t))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn token_text(&self, t: &Token) -> String {
        match t.kind {
            TokenKind::Ident | TokenKind::IdentNoReplace => self.pool.get(t.payload).to_string(),
            TokenKind::StrLit => format!("\"{}\"", self.pool.get(t.payload)),
            TokenKind::Int32Lit => match t.payload {
                Payload::Int32(v) => v.to_string(),
                _ => "0".to_string(),
            },
            TokenKind::Float32Lit => match t.payload {
                Payload::Float64(v) => v.to_string(),
                _ => "0".to_string(),
            },
            TokenKind::BoolLit => match t.payload {
                Payload::Bool(v) => v.to_string(),
                _ => "false".to_string(),
            },
            other => other.as_str().to_string(),
        }
    }

    /// Expands the macro invocation (or bare object-like macro) starting at
    /// `tokens[pos]`, returning the expanded tokens and the index just past
    /// the consumed invocation. `expanding` is the active-expansion guard;
    /// a macro name already in it is re-emitted unexpanded with a
    /// `no-replace` marker per spec.md 4.2 step 4.
    fn expand_at(&mut self, tokens: &[Token], pos: usize, expanding: &mut HashSet<String>, diags: &mut DiagnosticSink) -> (Vec<Token>, usize) {
        let tok = tokens[pos];
        let name = self.ident_text(&tok);

        if expanding.contains(&name) {
            let mut marked = tok;
            marked.kind = TokenKind::IdentNoReplace;
            return (vec![marked], pos + 1);
        }

        let mac = self.macros.get(&name).cloned().unwrap();
        let mut next = pos + 1;

        if mac.is_function_like {
            if next >= tokens.len() || tokens[next].kind != TokenKind::LParen {
                // step 1: not followed by `(`, leave unexpanded
                return (vec![tok], pos + 1);
            }
            next += 1;
            let mut args: Vec<Vec<Token>> = Vec::new();
            let mut current = Vec::new();
            let mut depth = 0i32;
            while next < tokens.len() {
                let t = tokens[next];
                if t.kind == TokenKind::LParen {
                    depth += 1;
                    current.push(t);
                    next += 1;
                } else if t.kind == TokenKind::RParen {
                    if depth == 0 {
                        next += 1;
                        break;
                    }
                    depth -= 1;
                    current.push(t);
                    next += 1;
                } else if t.kind == TokenKind::Comma && depth == 0 {
                    args.push(std::mem::take(&mut current));
                    next += 1;
                } else {
                    current.push(t);
                    next += 1;
                }
            }
            if !current.is_empty() || !args.is_empty() || !mac.params.is_empty() {
                args.push(current);
            }
            if args.len() != mac.params.len() && !(mac.params.is_empty() && args.len() == 1 && args[0].is_empty()) {
                diags.error(tok.loc, format!("macro `{name}` expects {} argument(s), got {}", mac.params.len(), args.len()));
                return (vec![], next);
            }

            let substituted = self.substitute(&mac, &args, diags);
            expanding.insert(name.clone());
            let rescanned = self.rescan(&substituted, expanding, diags);
            expanding.remove(&name);
            (rescanned, next)
        } else {
            expanding.insert(name.clone());
            let rescanned = self.rescan(&mac.body.clone(), expanding, diags);
            expanding.remove(&name);
            (rescanned, next)
        }
    }

    fn substitute(&mut self, mac: &Macro, args: &[Vec<Token>], diags: &mut DiagnosticSink) -> Vec<Token> {
        let mut out = Vec::new();
        let body = &mac.body;
        let mut i = 0;
        while i < body.len() {
            let t = body[i];

            if t.kind == TokenKind::DoubleHash {
                // `a ## b`: paste textual forms of neighboring tokens, re-lex.
                let left = out.pop();
                let mut right_tokens = Vec::new();
                if i + 1 < body.len() {
                    let (expanded_right, consumed) = self.substitute_one(body, i + 1, mac, args);
                    right_tokens.extend(expanded_right);
                    i = consumed;
                } else {
                    i += 1;
                }
                if let (Some(l), Some(r)) = (left, right_tokens.first().copied()) {
                    let pasted_text = format!("{}{}", self.token_text(&l), self.token_text(&r));
                    let mut pool = TokenPool::new();
                    let mut sub_diags = DiagnosticSink::new();
                    let mut lexed = crate::lexer::lex(&pasted_text, l.loc.file_index, &mut pool, &mut sub_diags);
                    if sub_diags.has_errors() {
                        diags.error(l.loc, format!("invalid token produced by `##`: `{pasted_text}`"));
                    }
                    if let Some(last) = lexed.last() {
                        if last.kind == TokenKind::Eof {
                            lexed.pop();
                        }
                    }
                    for mut lt in lexed {
                        if let TokenKind::Ident = lt.kind {
                            if let Payload::Range { .. } = lt.payload {
                                let text = pool.get(lt.payload);
                                lt.payload = self.pool.intern(text);
                            }
                        }
                        out.push(lt);
                    }
                    out.extend(right_tokens.into_iter().skip(1));
                } else {
                    if let Some(l) = left {
                        out.push(l);
                    }
                    out.extend(right_tokens);
                }
                continue;
            }

            let (expanded, consumed) = self.substitute_one(body, i, mac, args);
            out.extend(expanded);
            i = consumed;
        }
        out
    }

    fn substitute_one(&mut self, body: &[Token], i: usize, mac: &Macro, args: &[Vec<Token>]) -> (Vec<Token>, usize) {
        let t = body[i];
        if t.kind == TokenKind::Ident {
            let name = self.ident_text(&t);
            if let Some(param_idx) = mac.params.iter().position(|p| *p == name) {
                return (args[param_idx].clone(), i + 1);
            }
        }
        (vec![t], i + 1)
    }

    fn rescan(&mut self, tokens: &[Token], expanding: &mut HashSet<String>, diags: &mut DiagnosticSink) -> Vec<Token> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let t = tokens[i];
            if t.kind == TokenKind::Ident {
                let name = self.ident_text(&t);
                if self.macros.contains_key(&name) {
                    let (expanded, next) = self.expand_at(tokens, i, expanding, diags);
                    out.extend(expanded);
                    i = next;
                    continue;
                }
            }
            out.push(t);
            i += 1;
        }
        // no-replace markers revert once the substitution finishes rescanning
        for t in out.iter_mut() {
            if t.kind == TokenKind::IdentNoReplace {
                t.kind = TokenKind::Ident;
            }
        }
        out
    }

    /// Integer-only constant-expression evaluator for `#if`/`#elif`, per
    /// spec.md section 4.2: all arithmetic/bitwise/comparison/logical
    /// operators, `defined(X)`, undefined identifiers evaluate to 0,
    /// two's-complement 32-bit wrapping (spec.md Open Question i).
    fn eval_const_expr(&self, tokens: &[Token], from: usize, to: usize, loc: SourceLocation, diags: &mut DiagnosticSink) -> i32 {
        let resolved = self.resolve_defined(tokens, from, to);
        let mut parser = CondExprParser {
            tokens: &resolved,
            pos: 0,
            pp: self,
            diags,
            loc,
        };
        parser.parse_expr(0)
    }

    fn resolve_defined(&self, tokens: &[Token], from: usize, to: usize) -> Vec<Token> {
        let mut out = Vec::new();
        let mut i = from;
        while i < to {
            let t = tokens[i];
            if t.kind == TokenKind::Ident && self.ident_text(&t) == "defined" {
                let mut j = i + 1;
                let paren = j < to && tokens[j].kind == TokenKind::LParen;
                if paren {
                    j += 1;
                }
                if j < to && tokens[j].kind == TokenKind::Ident {
                    let target = self.ident_text(&tokens[j]);
                    let value = self.macros.contains_key(&target) as i32;
                    out.push(Token::new(TokenKind::Int32Lit, t.loc, t.logical_line).with_payload(Payload::Int32(value)));
                    j += 1;
                    if paren && j < to && tokens[j].kind == TokenKind::RParen {
                        j += 1;
                    }
                    i = j;
                    continue;
                }
            }
            out.push(t);
            i += 1;
        }
        out
    }
}

/// One `#if`/`#elif`/`#else` level's taken-ness. `parent_active` folds in
/// whether any enclosing level is itself inactive.
struct CondState {
    parent_active: bool,
    current_taking: bool,
    any_taken: bool,
}

impl CondState {
    fn new(taking: bool) -> Self {
        CondState {
            parent_active: true,
            current_taking: taking,
            any_taken: taking,
        }
    }

    fn taking(&self) -> bool {
        self.parent_active && self.current_taking
    }

    fn enter_elif(&mut self, taking: bool) {
        self.current_taking = taking && !self.any_taken;
        self.any_taken |= self.current_taking;
    }

    fn enter_else(&mut self) {
        self.current_taking = !self.any_taken;
        self.any_taken = true;
    }
}

/// Recursive-descent evaluator over the small integer-expression grammar
/// needed by `#if`. Operator precedence mirrors C: `|| && | ^ & ==/!=
/// relational shift additive multiplicative unary`.
struct CondExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    pp: &'a Preprocessor<'a>,
    diags: &'a mut DiagnosticSink,
    loc: SourceLocation,
}

impl<'a> CondExprParser<'a> {
    fn peek(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|t| t.kind)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).copied();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_expr(&mut self, min_prec: u8) -> i32 {
        let mut lhs = self.parse_unary();
        loop {
            let Some(kind) = self.peek() else { break };
            let Some((prec, _rassoc)) = binop_prec(kind) else { break };
            if prec < min_prec {
                break;
            }
            self.bump();
            let rhs = self.parse_expr(prec + 1);
            lhs = apply_binop(kind, lhs, rhs);
        }
        lhs
    }

    fn parse_unary(&mut self) -> i32 {
        match self.peek() {
            Some(TokenKind::OpSub) => {
                self.bump();
                self.parse_unary().wrapping_neg()
            }
            Some(TokenKind::OpNot) => {
                self.bump();
                if self.parse_unary() == 0 { 1 } else { 0 }
            }
            Some(TokenKind::OpInv) => {
                self.bump();
                !self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> i32 {
        match self.bump() {
            Some(t) if t.kind == TokenKind::Int32Lit => match t.payload {
                Payload::Int32(v) => v,
                _ => 0,
            },
            Some(t) if t.kind == TokenKind::LParen => {
                let v = self.parse_expr(0);
                if self.peek() == Some(TokenKind::RParen) {
                    self.bump();
                } else {
                    self.diags.error(self.loc, "expected `)` in #if expression");
                }
                v
            }
            Some(t) if t.kind == TokenKind::Ident => {
                // undefined identifiers evaluate to 0 (spec.md 4.2); `defined`
                // has already been resolved before this parser runs.
                let _ = self.pp.ident_text(&t);
                0
            }
            Some(_) | None => {
                self.diags.error(self.loc, "invalid token in #if expression");
                0
            }
        }
    }
}

fn binop_prec(kind: TokenKind) -> Option<(u8, bool)> {
    use TokenKind::*;
    Some(match kind {
        OpLogicalOr => (1, false),
        OpLogicalAnd => (2, false),
        OpOr => (3, false),
        OpXor => (4, false),
        OpAnd => (5, false),
        OpEq | OpNEq => (6, false),
        OpLess | OpGreater | OpLEq | OpGEq => (7, false),
        OpLsh | OpRsh => (8, false),
        OpAdd | OpSub => (9, false),
        OpMul | OpDiv | OpMod => (10, false),
        _ => return None,
    })
}

fn apply_binop(kind: TokenKind, a: i32, b: i32) -> i32 {
    use TokenKind::*;
    match kind {
        OpLogicalOr => ((a != 0) || (b != 0)) as i32,
        OpLogicalAnd => ((a != 0) && (b != 0)) as i32,
        OpOr => a | b,
        OpXor => a ^ b,
        OpAnd => a & b,
        OpEq => (a == b) as i32,
        OpNEq => (a != b) as i32,
        OpLess => (a < b) as i32,
        OpGreater => (a > b) as i32,
        OpLEq => (a <= b) as i32,
        OpGEq => (a >= b) as i32,
        OpLsh => a.wrapping_shl(b as u32 & 31),
        OpRsh => a.wrapping_shr(b as u32 & 31),
        OpAdd => a.wrapping_add(b),
        OpSub => a.wrapping_sub(b),
        OpMul => a.wrapping_mul(b),
        OpDiv => {
            if b == 0 {
                0
            } else {
                a.wrapping_div(b)
            }
        }
        OpMod => {
            if b == 0 {
                0
            } else {
                a.wrapping_rem(b)
            }
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoIncludes;
    impl FileLoader for NoIncludes {
        fn load(&mut self, path: &str, _from: u32) -> Result<(u32, String), String> {
            Err(format!("no such file: {path}"))
        }
    }

    fn run(src: &str) -> (Vec<Token>, TokenPool, DiagnosticSink) {
        let mut pool = TokenPool::new();
        let mut diags = DiagnosticSink::new();
        let mut toks = crate::lexer::lex(src, 0, &mut pool, &mut diags);
        if let Some(last) = toks.last() {
            if last.kind == TokenKind::Eof {
                toks.pop();
            }
        }
        let mut pp = Preprocessor::new(&mut pool, &[]);
        let mut loader = NoIncludes;
        let out = pp.process(toks, 0, &mut loader, &mut diags);
        (out, pool, diags)
    }

    #[test]
    fn object_like_macro_expands() {
        let (out, pool, diags) = run("#define N 42\nN");
        assert!(!diags.has_errors());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, Payload::Int32(42));
        let _ = pool;
    }

    #[test]
    fn function_like_macro_substitutes_args() {
        let (out, _pool, diags) = run("#define ADD(a,b) ((a)+(b))\nADD(1,2)");
        assert!(!diags.has_errors());
        let kinds: Vec<_> = out.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::LParen,
                TokenKind::LParen,
                TokenKind::Int32Lit,
                TokenKind::RParen,
                TokenKind::OpAdd,
                TokenKind::LParen,
                TokenKind::Int32Lit,
                TokenKind::RParen,
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn token_pasting_yields_single_token() {
        let (out, pool, diags) = run("#define CAT(a,b) a##b\nCAT(foo, 42)");
        assert!(!diags.has_errors());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, TokenKind::Ident);
        assert_eq!(pool.get(out[0].payload), "foo42");
    }

    #[test]
    fn conditional_skips_inactive_branch() {
        let (out, _pool, diags) = run("#if 0\nint a;\n#else\nint b;\n#endif");
        assert!(!diags.has_errors());
        assert_eq!(out.len(), 3); // `int`, `b`, `;`
    }

    #[test]
    fn ifdef_respects_defined_macro() {
        let (out, _pool, diags) = run("#define FOO 1\n#ifdef FOO\n1\n#endif\n#ifndef FOO\n2\n#endif");
        assert!(!diags.has_errors());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, Payload::Int32(1));
    }

    #[test]
    fn recursive_macro_does_not_loop() {
        let (out, pool, diags) = run("#define X X\nX");
        assert!(!diags.has_errors());
        assert_eq!(out.len(), 1);
        assert_eq!(pool.get(out[0].payload), "X");
    }

    #[test]
    fn elif_chain_picks_first_true_branch() {
        let (out, _pool, diags) = run("#if 0\n1\n#elif 1\n2\n#else\n3\n#endif");
        assert!(!diags.has_errors());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, Payload::Int32(2));
    }
}
