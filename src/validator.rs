//! Variable-access validator
//!
//! Per-access-point dataflow over a function body: every scalar component
//! of every local and `out` parameter gets a bit in a per-function write
//! set. Reads against an unset bit are "use of possibly uninitialized
//! variable"; branches merge by intersection (an access point counts as
//! written after an `if` only when both arms wrote it); a loop body may run
//! zero times, so a `while`/`for` never advances the set past the loop.
//! At function exit, every `out` parameter must be fully covered on every
//! path, and a non-`void` function must return on every path.

use crate::ast::{Ast, MemberRef, NodeData, NodeId, OpKind};
use crate::diagnostics::DiagnosticSink;
use crate::types::Type;

#[derive(Clone)]
struct WriteSet {
    bits: Vec<bool>,
}

impl WriteSet {
    fn new(len: usize) -> Self {
        WriteSet { bits: vec![false; len] }
    }

    fn set_range(&mut self, range: (u32, u32)) {
        for i in range.0..range.1 {
            self.bits[i as usize] = true;
        }
    }

    fn set_bit(&mut self, i: u32) {
        if (i as usize) < self.bits.len() {
            self.bits[i as usize] = true;
        }
    }

    fn any_unset(&self, range: (u32, u32)) -> bool {
        (range.0..range.1).any(|i| !self.bits[i as usize])
    }

    fn intersect(a: &WriteSet, b: &WriteSet) -> WriteSet {
        WriteSet {
            bits: a.bits.iter().zip(&b.bits).map(|(x, y)| *x && *y).collect(),
        }
    }
}

pub fn validate(ast: &mut Ast, diags: &mut DiagnosticSink) {
    for func in ast.function_list.clone() {
        validate_function(ast, func, diags);
    }
}

fn validate_function(ast: &mut Ast, func: NodeId, diags: &mut DiagnosticSink) {
    let (body, args, return_type) = match &ast.node(func).data {
        NodeData::Function(f) => (f.body, f.args.clone(), f.return_type),
        _ => return,
    };
    let Some(body) = body else { return };

    let mut local_decls = Vec::new();
    collect_var_decls(ast, body, &mut local_decls);

    let mut next_ap = 0u32;
    for a in &args {
        assign_ap_range(ast, *a, &mut next_ap);
    }
    for d in &local_decls {
        assign_ap_range(ast, *d, &mut next_ap);
    }

    let mut in_set = WriteSet::new(next_ap as usize);
    for a in &args {
        if let NodeData::VarDecl(vd) = &ast.node(*a).data {
            if !vd.flags.is_out || vd.flags.is_in {
                in_set.set_range(vd.ap_range);
            }
        }
    }

    let mut exit_sets = Vec::new();
    let fallthrough = walk_stmt(ast, body, in_set, diags, &mut exit_sets);
    exit_sets.push(fallthrough);

    if !matches!(ast.types.get(return_type), Type::Void) && !terminates(ast, body) {
        diags.error(ast.loc(func), "not every control-flow path returns a value");
    }

    for a in &args {
        if let NodeData::VarDecl(vd) = &ast.node(*a).data {
            if vd.flags.is_out && exit_sets.iter().any(|s| s.any_unset(vd.ap_range)) {
                diags.error(
                    ast.loc(*a),
                    format!("output parameter `{}` is not written on every control-flow path", vd.name),
                );
            }
        }
    }
}

fn assign_ap_range(ast: &mut Ast, decl: NodeId, next: &mut u32) {
    let ty = match &ast.node(decl).data {
        NodeData::VarDecl(vd) => vd.ty,
        _ => return,
    };
    let count = ast.types.total_access_point_count(ty);
    let start = *next;
    *next += count;
    if let NodeData::VarDecl(vd) = &mut ast.node_mut(decl).data {
        vd.ap_range = (start, start + count);
    }
}

fn collect_var_decls(ast: &Ast, stmt: NodeId, out: &mut Vec<NodeId>) {
    match &ast.node(stmt).data {
        NodeData::VarDeclStmt { decl } => out.push(*decl),
        NodeData::BlockStmt { .. } => {
            for c in ast.children(stmt) {
                collect_var_decls(ast, c, out);
            }
        }
        NodeData::IfElseStmt { then_branch, else_branch, .. } => {
            collect_var_decls(ast, *then_branch, out);
            if let Some(e) = else_branch {
                collect_var_decls(ast, *e, out);
            }
        }
        NodeData::WhileStmt { body, .. } | NodeData::DoWhileStmt { body, .. } => collect_var_decls(ast, *body, out),
        NodeData::ForStmt { init, body, .. } => {
            if let Some(i) = init {
                collect_var_decls(ast, *i, out);
            }
            collect_var_decls(ast, *body, out);
        }
        _ => {}
    }
}

/// True iff every path through `stmt` ends in `return`/`discard`.
fn terminates(ast: &Ast, stmt: NodeId) -> bool {
    match &ast.node(stmt).data {
        NodeData::ReturnStmt { .. } | NodeData::DiscardStmt => true,
        NodeData::BlockStmt { .. } => ast.children(stmt).into_iter().any(|c| terminates(ast, c)),
        NodeData::IfElseStmt { then_branch, else_branch, .. } => {
            else_branch.is_some_and(|e| terminates(ast, e)) && terminates(ast, *then_branch)
        }
        NodeData::DoWhileStmt { body, .. } => terminates(ast, *body),
        _ => false,
    }
}

fn walk_stmt(ast: &Ast, stmt: NodeId, mut set: WriteSet, diags: &mut DiagnosticSink, exit_sets: &mut Vec<WriteSet>) -> WriteSet {
    match ast.node(stmt).data.clone() {
        NodeData::BlockStmt { .. } => {
            for child in ast.children(stmt) {
                set = walk_stmt(ast, child, set, diags, exit_sets);
            }
            set
        }
        NodeData::ExprStmt { expr } => {
            walk_expr(ast, expr, &mut set, diags);
            set
        }
        NodeData::VarDeclStmt { decl } => {
            let (range, initializer) = match &ast.node(decl).data {
                NodeData::VarDecl(vd) => (vd.ap_range, vd.initializer),
                _ => ((0, 0), None),
            };
            if let Some(init) = initializer {
                walk_expr(ast, init, &mut set, diags);
                set.set_range(range);
            }
            set
        }
        NodeData::ReturnStmt { value, .. } => {
            if let Some(v) = value {
                walk_expr(ast, v, &mut set, diags);
            }
            exit_sets.push(set.clone());
            set
        }
        NodeData::DiscardStmt => {
            exit_sets.push(set.clone());
            set
        }
        NodeData::IfElseStmt { cond, then_branch, else_branch } => {
            walk_expr(ast, cond, &mut set, diags);
            let then_out = walk_stmt(ast, then_branch, set.clone(), diags, exit_sets);
            let else_out = match else_branch {
                Some(e) => walk_stmt(ast, e, set.clone(), diags, exit_sets),
                None => set.clone(),
            };
            WriteSet::intersect(&then_out, &else_out)
        }
        NodeData::WhileStmt { cond, body } => {
            let mut cond_set = set.clone();
            walk_expr(ast, cond, &mut cond_set, diags);
            walk_stmt(ast, body, cond_set, diags, exit_sets);
            set // the loop may run zero times; nothing it writes is guaranteed
        }
        NodeData::DoWhileStmt { cond, body } => {
            let mut body_out = walk_stmt(ast, body, set, diags, exit_sets);
            walk_expr(ast, cond, &mut body_out, diags);
            body_out // runs at least once
        }
        NodeData::ForStmt { init, cond, incr, body } => {
            if let Some(i) = init {
                set = walk_stmt(ast, i, set, diags, exit_sets);
            }
            let mut cond_set = set.clone();
            if let Some(c) = cond {
                walk_expr(ast, c, &mut cond_set, diags);
            }
            if let Some(inc) = incr {
                walk_expr(ast, inc, &mut cond_set.clone(), diags);
            }
            walk_stmt(ast, body, cond_set, diags, exit_sets);
            set // may run zero times
        }
        _ => set,
    }
}

fn walk_expr(ast: &Ast, expr: NodeId, set: &mut WriteSet, diags: &mut DiagnosticSink) {
    let loc = ast.loc(expr);
    match ast.node(expr).data.clone() {
        NodeData::DeclRefExpr { decl } => {
            let (range, name) = match &ast.node(decl).data {
                NodeData::VarDecl(vd) => (vd.ap_range, vd.name.clone()),
                _ => ((0, 0), String::new()),
            };
            if set.any_unset(range) {
                diags.error(loc, format!("use of possibly uninitialized variable `{name}`"));
            }
        }
        NodeData::BinaryOpExpr { op_kind: OpKind::Assign, lhs, rhs } => {
            walk_expr(ast, rhs, set, diags);
            mark_write(ast, lhs, set, diags);
        }
        NodeData::BinaryOpExpr { lhs, rhs, .. } => {
            walk_expr(ast, lhs, set, diags);
            walk_expr(ast, rhs, set, diags);
        }
        NodeData::UnaryOpExpr { operand, .. } => walk_expr(ast, operand, set, diags),
        NodeData::CastExpr { value, .. } => walk_expr(ast, value, set, diags),
        NodeData::InitListExpr { items } => {
            for it in items {
                walk_expr(ast, it, set, diags);
            }
        }
        NodeData::IncDecOpExpr { target, .. } => {
            walk_expr(ast, target, set, diags);
            mark_write(ast, target, set, diags);
        }
        NodeData::OpExpr { args, .. } => {
            for a in args {
                walk_expr(ast, a, set, diags);
            }
        }
        NodeData::TernaryOpExpr { cond, if_true, if_false } => {
            walk_expr(ast, cond, set, diags);
            let mut t = set.clone();
            walk_expr(ast, if_true, &mut t, diags);
            let mut f = set.clone();
            walk_expr(ast, if_false, &mut f, diags);
            *set = WriteSet::intersect(&t, &f);
        }
        NodeData::MemberExpr { base, .. } => walk_expr(ast, base, set, diags),
        NodeData::IndexExpr { base, index } => {
            walk_expr(ast, base, set, diags);
            walk_expr(ast, index, set, diags);
        }
        _ => {}
    }
}

/// Marks the access points an assignment's left-hand side covers. A whole
/// `DeclRefExpr` target covers its full range; a swizzle covers exactly its
/// named components; a dynamic index or a struct-field write is
/// conservatively not credited (spec.md section 7's dataflow only needs to
/// be sound, not complete).
fn mark_write(ast: &Ast, lvalue: NodeId, set: &mut WriteSet, diags: &mut DiagnosticSink) {
    match ast.node(lvalue).data.clone() {
        NodeData::DeclRefExpr { decl } => {
            let range = match &ast.node(decl).data {
                NodeData::VarDecl(vd) => vd.ap_range,
                _ => (0, 0),
            };
            set.set_range(range);
        }
        NodeData::MemberExpr { base, member: MemberRef::Swizzle { components, count } } => {
            if let NodeData::DeclRefExpr { decl } = ast.node(base).data {
                let base_range = match &ast.node(decl).data {
                    NodeData::VarDecl(vd) => vd.ap_range,
                    _ => (0, 0),
                };
                for c in components.iter().take(count as usize) {
                    set.set_bit(base_range.0 + *c as u32);
                }
            }
        }
        NodeData::IndexExpr { index, .. } => {
            walk_expr(ast, index, set, diags);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompilerConfig, OutputFormat, Stage};
    use crate::diagnostics::DiagnosticSink;
    use crate::parser::Parser;
    use crate::token::{SourceLocation, Token, TokenKind, TokenPool};

    fn check(src: &str, stage: Stage, entry: &str) -> Vec<String> {
        let mut pool = TokenPool::new();
        let mut lex_diags = DiagnosticSink::new();
        let mut toks = crate::lexer::lex(src, 0, &mut pool, &mut lex_diags);
        if let Some(last) = toks.last() {
            if last.kind == TokenKind::Eof {
                toks.pop();
            }
        }
        let mut pp = crate::preprocessor::Preprocessor::new(&mut pool, &[]);
        struct NoInc;
        impl crate::preprocessor::FileLoader for NoInc {
            fn load(&mut self, p: &str, _f: u32) -> Result<(u32, String), String> {
                Err(format!("no includes in test: {p}"))
            }
        }
        let mut expanded = pp.process(toks, 0, &mut NoInc, &mut lex_diags);
        expanded.push(Token::new(TokenKind::Eof, SourceLocation::BAD, 0));

        let config = CompilerConfig::new(entry, stage, OutputFormat::Glsl140);
        let mut parse_diags = DiagnosticSink::new();
        let mut ast = {
            let mut parser = Parser::new(expanded, &pool, &config, &mut parse_diags);
            parser.parse_program();
            parser.ast
        };
        assert!(!parse_diags.has_errors(), "unexpected parse errors: {:?}", parse_diags.records());

        let mut diags = DiagnosticSink::new();
        validate(&mut ast, &mut diags);
        diags.records().iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn reading_uninitialized_local_is_flagged() {
        let msgs = check(
            "float4 main() : SV_Target { float x; float y = x; return float4(y,y,y,y); }",
            Stage::Pixel,
            "main",
        );
        assert!(msgs.iter().any(|m| m.contains("uninitialized")), "{msgs:?}");
    }

    #[test]
    fn write_on_both_branches_clears_uninitialized() {
        let msgs = check(
            "float4 main(bool cond : TEXCOORD0) : SV_Target { float x; if (cond) { x = 1.0; } else { x = 2.0; } return float4(x,x,x,x); }",
            Stage::Pixel,
            "main",
        );
        assert!(msgs.is_empty(), "{msgs:?}");
    }

    #[test]
    fn write_on_one_branch_only_is_flagged() {
        let msgs = check(
            "float4 main(bool cond : TEXCOORD0) : SV_Target { float x; if (cond) { x = 1.0; } return float4(x,x,x,x); }",
            Stage::Pixel,
            "main",
        );
        assert!(msgs.iter().any(|m| m.contains("uninitialized")), "{msgs:?}");
    }

    #[test]
    fn missing_return_on_some_path_is_flagged() {
        let msgs = check(
            "float f(bool cond) { if (cond) { return 1.0; } } float4 main() : SV_Target { float x = f(true); return float4(x,x,x,x); }",
            Stage::Pixel,
            "main",
        );
        assert!(msgs.iter().any(|m| m.contains("control-flow path returns")), "{msgs:?}");
    }

    #[test]
    fn out_param_written_on_every_path_is_accepted() {
        let msgs = check(
            "void helper(out float o) { o = 1.0; } float4 main() : SV_Target { float x; helper(x); return float4(x,x,x,x); }",
            Stage::Pixel,
            "main",
        );
        assert!(msgs.is_empty(), "{msgs:?}");
    }

    #[test]
    fn out_param_missing_on_one_branch_is_flagged() {
        let msgs = check(
            "void helper(bool cond, out float o) { if (cond) { o = 1.0; } } float4 main() : SV_Target { float x; helper(true, x); return float4(x,x,x,x); }",
            Stage::Pixel,
            "main",
        );
        assert!(msgs.iter().any(|m| m.contains("is not written")), "{msgs:?}");
    }
}
