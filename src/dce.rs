//! Dead-code elimination
//!
//! Two sweeps, run in order: mark every function and global reachable from
//! the entry point, unlink the rest; then, within each surviving function,
//! mark every local variable that is read (directly, or whose initializer
//! has a side-effecting callee) and remove the locals that are not.
//! Removal always goes through `Ast::unlink`, never a raw vector edit, so
//! the type-use and return-statement lists stay consistent.

use crate::ast::{Ast, MemberRef, NodeData, NodeId, OpKind};
use std::collections::HashSet;

pub fn remove_unused_functions(ast: &mut Ast) {
    let Some(entry) = ast.entry_point else { return };
    let mut used_funcs: HashSet<NodeId> = HashSet::new();
    let mut used_globals: HashSet<NodeId> = HashSet::new();
    let mut stack = vec![entry];
    while let Some(f) = stack.pop() {
        if !used_funcs.insert(f) {
            continue;
        }
        let body = match &ast.node(f).data {
            NodeData::Function(func) => func.body,
            _ => None,
        };
        if let Some(body) = body {
            walk_for_refs(ast, body, &mut stack, &mut used_globals);
        }
    }

    for f in ast.function_list.clone() {
        if let NodeData::Function(func) = &mut ast.node_mut(f).data {
            func.used = used_funcs.contains(&f);
        }
    }

    let dead: Vec<NodeId> = ast.function_list.iter().copied().filter(|f| !used_funcs.contains(f)).collect();
    for f in dead {
        ast.unlink(f);
    }
    ast.function_list.retain(|f| used_funcs.contains(f));

    let dead_globals: Vec<NodeId> = ast.global_vars.iter().copied().filter(|g| !used_globals.contains(g)).collect();
    for g in dead_globals {
        ast.unlink(g);
    }
    ast.global_vars.retain(|g| used_globals.contains(g));
}

/// Collects call targets and `DeclRefExpr`s to global-scope declarations
/// reachable from `stmt`, feeding new function targets onto `stack`.
fn walk_for_refs(ast: &Ast, stmt: NodeId, stack: &mut Vec<NodeId>, globals: &mut HashSet<NodeId>) {
    match &ast.node(stmt).data {
        NodeData::BlockStmt { .. } => {
            for c in ast.children(stmt) {
                walk_for_refs(ast, c, stack, globals);
            }
        }
        NodeData::ExprStmt { expr } => walk_expr_for_refs(ast, *expr, stack, globals),
        NodeData::VarDeclStmt { decl } => {
            if let NodeData::VarDecl(vd) = &ast.node(*decl).data {
                if let Some(init) = vd.initializer {
                    walk_expr_for_refs(ast, init, stack, globals);
                }
            }
        }
        NodeData::ReturnStmt { value, .. } => {
            if let Some(v) = value {
                walk_expr_for_refs(ast, *v, stack, globals);
            }
        }
        NodeData::IfElseStmt { cond, then_branch, else_branch } => {
            walk_expr_for_refs(ast, *cond, stack, globals);
            walk_for_refs(ast, *then_branch, stack, globals);
            if let Some(e) = else_branch {
                walk_for_refs(ast, *e, stack, globals);
            }
        }
        NodeData::WhileStmt { cond, body } | NodeData::DoWhileStmt { cond, body } => {
            walk_expr_for_refs(ast, *cond, stack, globals);
            walk_for_refs(ast, *body, stack, globals);
        }
        NodeData::ForStmt { init, cond, incr, body } => {
            if let Some(i) = init {
                walk_for_refs(ast, *i, stack, globals);
            }
            if let Some(c) = cond {
                walk_expr_for_refs(ast, *c, stack, globals);
            }
            if let Some(inc) = incr {
                walk_expr_for_refs(ast, *inc, stack, globals);
            }
            walk_for_refs(ast, *body, stack, globals);
        }
        _ => {}
    }
}

fn walk_expr_for_refs(ast: &Ast, expr: NodeId, stack: &mut Vec<NodeId>, globals: &mut HashSet<NodeId>) {
    match &ast.node(expr).data {
        NodeData::DeclRefExpr { decl } => {
            if let NodeData::VarDecl(vd) = &ast.node(*decl).data {
                if vd.flags.is_global {
                    globals.insert(find_global_owner(ast, *decl));
                }
            }
        }
        NodeData::BinaryOpExpr { lhs, rhs, .. } => {
            walk_expr_for_refs(ast, *lhs, stack, globals);
            walk_expr_for_refs(ast, *rhs, stack, globals);
        }
        NodeData::UnaryOpExpr { operand, .. } => walk_expr_for_refs(ast, *operand, stack, globals),
        NodeData::CastExpr { value, .. } => walk_expr_for_refs(ast, *value, stack, globals),
        NodeData::InitListExpr { items } => {
            for it in items {
                walk_expr_for_refs(ast, *it, stack, globals);
            }
        }
        NodeData::IncDecOpExpr { target, .. } => walk_expr_for_refs(ast, *target, stack, globals),
        NodeData::TernaryOpExpr { cond, if_true, if_false } => {
            walk_expr_for_refs(ast, *cond, stack, globals);
            walk_expr_for_refs(ast, *if_true, stack, globals);
            walk_expr_for_refs(ast, *if_false, stack, globals);
        }
        NodeData::MemberExpr { base, .. } => walk_expr_for_refs(ast, *base, stack, globals),
        NodeData::IndexExpr { base, index } => {
            walk_expr_for_refs(ast, *base, stack, globals);
            walk_expr_for_refs(ast, *index, stack, globals);
        }
        NodeData::OpExpr { op_kind, resolved_func, args } => {
            if *op_kind == OpKind::FunctionCall {
                if let Some(callee) = resolved_func {
                    stack.push(*callee);
                }
            }
            for a in args {
                walk_expr_for_refs(ast, *a, stack, globals);
            }
        }
        _ => {}
    }
}

/// A cbuffer member's global-scope owner is the cbuffer itself, since only
/// the whole block is linked into `Ast::global_vars`.
fn find_global_owner(ast: &Ast, decl: NodeId) -> NodeId {
    match ast.node(decl).parent {
        Some(p) if matches!(ast.node(p).data, NodeData::CBufferDecl(_)) => p,
        _ => decl,
    }
}

/// Removes local variables that are never read and whose initializer (if
/// any) calls only side-effect-free functions. Must run after
/// [`remove_unused_functions`] so a callee's aliveness is already decided.
pub fn remove_unused_variables(ast: &mut Ast) {
    for f in ast.function_list.clone() {
        let body = match &ast.node(f).data {
            NodeData::Function(func) => func.body,
            _ => None,
        };
        let Some(body) = body else { continue };
        remove_unused_in_stmt(ast, body);
    }
}

fn remove_unused_in_stmt(ast: &mut Ast, stmt: NodeId) {
    match ast.node(stmt).data.clone() {
        NodeData::BlockStmt { .. } => {
            for child in ast.children(stmt) {
                remove_unused_in_stmt(ast, child);
            }
            // re-check after descendants may have unlinked themselves
            for child in ast.children(stmt) {
                if let NodeData::VarDeclStmt { decl } = &ast.node(child).data {
                    if should_remove_decl(ast, stmt, *decl) {
                        ast.unlink(child);
                    }
                }
            }
        }
        NodeData::IfElseStmt { then_branch, else_branch, .. } => {
            remove_unused_in_stmt(ast, then_branch);
            if let Some(e) = else_branch {
                remove_unused_in_stmt(ast, e);
            }
        }
        NodeData::WhileStmt { body, .. } | NodeData::DoWhileStmt { body, .. } => remove_unused_in_stmt(ast, body),
        NodeData::ForStmt { init, body, .. } => {
            if let Some(i) = init {
                remove_unused_in_stmt(ast, i);
            }
            remove_unused_in_stmt(ast, body);
        }
        _ => {}
    }
}

/// True iff `decl` is a plain local (not stage I/O, not `out`), is never
/// read anywhere in `scope`, and its initializer (if any) has no
/// observable side effect worth preserving.
fn should_remove_decl(ast: &Ast, scope: NodeId, decl: NodeId) -> bool {
    let vd = match &ast.node(decl).data {
        NodeData::VarDecl(vd) => vd,
        _ => return false,
    };
    if vd.flags.is_stage_io || vd.flags.is_out || vd.flags.is_global {
        return false;
    }
    if let Some(init) = vd.initializer {
        if has_call_to_used_function(ast, init) {
            return false;
        }
    }
    !is_read_anywhere(ast, scope, decl)
}

fn has_call_to_used_function(ast: &Ast, expr: NodeId) -> bool {
    match &ast.node(expr).data {
        NodeData::OpExpr { op_kind: OpKind::FunctionCall, resolved_func: Some(f), args } => {
            let used = matches!(&ast.node(*f).data, NodeData::Function(func) if func.used);
            used || args.iter().any(|a| has_call_to_used_function(ast, *a))
        }
        NodeData::OpExpr { args, .. } => args.iter().any(|a| has_call_to_used_function(ast, *a)),
        NodeData::BinaryOpExpr { lhs, rhs, .. } => has_call_to_used_function(ast, *lhs) || has_call_to_used_function(ast, *rhs),
        NodeData::UnaryOpExpr { operand, .. } => has_call_to_used_function(ast, *operand),
        NodeData::CastExpr { value, .. } => has_call_to_used_function(ast, *value),
        NodeData::InitListExpr { items } => items.iter().any(|i| has_call_to_used_function(ast, *i)),
        NodeData::TernaryOpExpr { cond, if_true, if_false } => {
            has_call_to_used_function(ast, *cond) || has_call_to_used_function(ast, *if_true) || has_call_to_used_function(ast, *if_false)
        }
        NodeData::MemberExpr { base, .. } => has_call_to_used_function(ast, *base),
        NodeData::IndexExpr { base, index } => has_call_to_used_function(ast, *base) || has_call_to_used_function(ast, *index),
        _ => false,
    }
}

fn is_read_anywhere(ast: &Ast, stmt: NodeId, decl: NodeId) -> bool {
    match &ast.node(stmt).data {
        NodeData::BlockStmt { .. } => ast.children(stmt).into_iter().any(|c| is_read_anywhere(ast, c, decl)),
        NodeData::ExprStmt { expr } => is_read_in_expr(ast, *expr, decl),
        NodeData::VarDeclStmt { decl: d } => {
            *d != decl
                && matches!(&ast.node(*d).data, NodeData::VarDecl(vd) if vd.initializer.is_some_and(|i| is_read_in_expr(ast, i, decl)))
        }
        NodeData::ReturnStmt { value: Some(v), .. } => is_read_in_expr(ast, *v, decl),
        NodeData::IfElseStmt { cond, then_branch, else_branch } => {
            is_read_in_expr(ast, *cond, decl)
                || is_read_anywhere(ast, *then_branch, decl)
                || else_branch.is_some_and(|e| is_read_anywhere(ast, e, decl))
        }
        NodeData::WhileStmt { cond, body } | NodeData::DoWhileStmt { cond, body } => {
            is_read_in_expr(ast, *cond, decl) || is_read_anywhere(ast, *body, decl)
        }
        NodeData::ForStmt { init, cond, incr, body } => {
            init.is_some_and(|i| is_read_anywhere(ast, i, decl))
                || cond.is_some_and(|c| is_read_in_expr(ast, c, decl))
                || incr.is_some_and(|i| is_read_in_expr(ast, i, decl))
                || is_read_anywhere(ast, *body, decl)
        }
        _ => false,
    }
}

fn is_read_in_expr(ast: &Ast, expr: NodeId, decl: NodeId) -> bool {
    match &ast.node(expr).data {
        NodeData::DeclRefExpr { decl: d } => *d == decl,
        NodeData::BinaryOpExpr { op_kind: OpKind::Assign, lhs, rhs } => {
            is_read_in_lvalue(ast, *lhs, decl) || is_read_in_expr(ast, *rhs, decl)
        }
        NodeData::BinaryOpExpr { lhs, rhs, .. } => is_read_in_expr(ast, *lhs, decl) || is_read_in_expr(ast, *rhs, decl),
        NodeData::UnaryOpExpr { operand, .. } => is_read_in_expr(ast, *operand, decl),
        NodeData::CastExpr { value, .. } => is_read_in_expr(ast, *value, decl),
        NodeData::InitListExpr { items } => items.iter().any(|i| is_read_in_expr(ast, *i, decl)),
        NodeData::IncDecOpExpr { target, .. } => is_read_in_lvalue(ast, *target, decl),
        NodeData::TernaryOpExpr { cond, if_true, if_false } => {
            is_read_in_expr(ast, *cond, decl) || is_read_in_expr(ast, *if_true, decl) || is_read_in_expr(ast, *if_false, decl)
        }
        NodeData::MemberExpr { base, .. } => is_read_in_expr(ast, *base, decl),
        NodeData::IndexExpr { base, index } => is_read_in_expr(ast, *base, decl) || is_read_in_expr(ast, *index, decl),
        NodeData::OpExpr { args, .. } => args.iter().any(|a| is_read_in_expr(ast, *a, decl)),
        _ => false,
    }
}

/// An assignment target only "reads" `decl` through a dynamic index or a
/// partial swizzle/field write (both need the prior value); a whole-target
/// write does not.
fn is_read_in_lvalue(ast: &Ast, lvalue: NodeId, decl: NodeId) -> bool {
    match &ast.node(lvalue).data {
        NodeData::DeclRefExpr { .. } => false,
        NodeData::MemberExpr { base, member: MemberRef::Swizzle { count, .. } } => {
            *count < 4 && matches!(&ast.node(*base).data, NodeData::DeclRefExpr { decl: d } if *d == decl)
        }
        NodeData::IndexExpr { index, .. } => is_read_in_expr(ast, *index, decl),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompilerConfig, OutputFormat, Stage};
    use crate::diagnostics::DiagnosticSink;
    use crate::parser::Parser;
    use crate::token::{SourceLocation, Token, TokenKind, TokenPool};

    fn build(src: &str) -> Ast {
        let mut pool = TokenPool::new();
        let mut diags = DiagnosticSink::new();
        let mut toks = crate::lexer::lex(src, 0, &mut pool, &mut diags);
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
        let mut expanded = pp.process(toks, 0, &mut NoInc, &mut diags);
        expanded.push(Token::new(TokenKind::Eof, SourceLocation::BAD, 0));

        let config = CompilerConfig::new("main", Stage::Pixel, OutputFormat::Glsl140);
        let mut parser = Parser::new(expanded, &pool, &config, &mut diags);
        parser.parse_program();
        let ast = parser.ast;
        assert!(!diags.has_errors(), "unexpected parse errors: {:?}", diags.records());
        ast
    }

    #[test]
    fn unreferenced_function_is_removed() {
        let mut ast = build("float helper() { return 1.0; } float4 main() : SV_Target { return float4(0,0,0,0); }");
        assert_eq!(ast.function_list.len(), 2);
        remove_unused_functions(&mut ast);
        assert_eq!(ast.function_list.len(), 1);
        assert_eq!(ast.function_list[0], ast.entry_point.unwrap());
    }

    #[test]
    fn called_function_survives() {
        let mut ast = build("float helper() { return 1.0; } float4 main() : SV_Target { float x = helper(); return float4(x,x,x,x); }");
        remove_unused_functions(&mut ast);
        assert_eq!(ast.function_list.len(), 2);
    }

    #[test]
    fn unread_local_is_removed() {
        let mut ast = build("float4 main() : SV_Target { float unused = 1.0; return float4(0,0,0,0); }");
        let body = match &ast.node(ast.entry_point.unwrap()).data {
            NodeData::Function(f) => f.body.unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(ast.children(body).len(), 2);
        remove_unused_functions(&mut ast);
        remove_unused_variables(&mut ast);
        assert_eq!(ast.children(body).len(), 1);
    }

    #[test]
    fn read_local_survives() {
        let mut ast = build("float4 main() : SV_Target { float x = 1.0; return float4(x,x,x,x); }");
        let body = match &ast.node(ast.entry_point.unwrap()).data {
            NodeData::Function(f) => f.body.unwrap(),
            _ => unreachable!(),
        };
        remove_unused_functions(&mut ast);
        remove_unused_variables(&mut ast);
        assert_eq!(ast.children(body).len(), 2);
    }
}
