//! Constant folding
//!
//! Post-order walk over every function body and every global/cbuffer
//! initializer: folds arithmetic, comparison, logical, bitwise, and unary
//! operators, casts, swizzles of a constant vector, and indexing into a
//! constant vector, whenever every operand is already a literal. Folding
//! replaces a node's `NodeData` in place (its `NodeId` and `return_type`
//! never change), so it is naturally idempotent — a second pass finds
//! nothing left to do. `OpKind::Assign` is never evaluated as an operator:
//! its right-hand side is folded, its left-hand side is a write target, not
//! a value.

use crate::ast::{Ast, MemberRef, NodeData, NodeId, OpKind};
use crate::types::{Scalar, Type, TypeId};

#[derive(Clone, Copy, Debug)]
enum Lit {
    Bool(bool),
    Int(i32),
    Float(f64),
}

fn lit_as_bool(l: Lit) -> bool {
    match l {
        Lit::Bool(b) => b,
        Lit::Int(i) => i != 0,
        Lit::Float(f) => f != 0.0,
    }
}

fn lit_as_i32(l: Lit) -> i32 {
    match l {
        Lit::Bool(b) => b as i32,
        Lit::Int(i) => i,
        Lit::Float(f) => f as i32,
    }
}

fn lit_as_f64(l: Lit) -> f64 {
    match l {
        Lit::Bool(b) => b as i32 as f64,
        Lit::Int(i) => i as f64,
        Lit::Float(f) => f,
    }
}

fn lit_to_data(scalar: Scalar, lit: Lit) -> NodeData {
    match scalar {
        Scalar::Bool => NodeData::BoolExpr(lit_as_bool(lit)),
        Scalar::Int32 | Scalar::UInt32 => NodeData::Int32Expr(lit_as_i32(lit)),
        Scalar::Float16 | Scalar::Float32 => NodeData::Float32Expr(lit_as_f64(lit)),
    }
}

fn as_lit(data: &NodeData) -> Option<Lit> {
    match data {
        NodeData::BoolExpr(b) => Some(Lit::Bool(*b)),
        NodeData::Int32Expr(i) => Some(Lit::Int(*i)),
        NodeData::Float32Expr(f) => Some(Lit::Float(*f)),
        _ => None,
    }
}

/// A literal scalar, or a fully-literal `InitListExpr`, read back out as a
/// flat component list. `None` if any component is not yet a literal.
fn as_lit_vec(ast: &Ast, id: NodeId) -> Option<Vec<Lit>> {
    match &ast.node(id).data {
        NodeData::InitListExpr { items } => items.iter().map(|it| as_lit(&ast.node(*it).data)).collect(),
        other => as_lit(other).map(|l| vec![l]),
    }
}

fn scalar_of(ast: &Ast, ty: TypeId) -> Option<Scalar> {
    match ast.types.get(ty) {
        Type::Scalar(s) => Some(*s),
        Type::Vector(sub, _) | Type::Matrix(sub, _, _) => scalar_of(ast, *sub),
        _ => None,
    }
}

fn target_width(ast: &Ast, ty: TypeId) -> usize {
    match ast.types.get(ty) {
        Type::Vector(_, w) => *w as usize,
        Type::Matrix(_, r, c) => *r as usize * *c as usize,
        _ => 1,
    }
}

/// Builds the result `NodeData` for a node whose scalar result is `scalar`
/// and whose per-component values are `out`, widened to match `node`'s own
/// width (`id`'s `return_type` decides whether the result is one literal or
/// an `InitListExpr` of freshly created literal nodes).
fn finish(ast: &mut Ast, id: NodeId, scalar: Scalar, out: Vec<Lit>) {
    if out.len() == 1 {
        ast.node_mut(id).data = lit_to_data(scalar, out[0]);
        return;
    }
    let loc = ast.loc(id);
    let comp_ty = ast.types.scalar(scalar);
    let items: Vec<NodeId> = out
        .into_iter()
        .map(|l| {
            let child = ast.create(loc, lit_to_data(scalar, l));
            ast.set_return_type(child, Some(comp_ty));
            child
        })
        .collect();
    ast.node_mut(id).data = NodeData::InitListExpr { items };
}

/// Pairs up two component lists for an elementwise op, broadcasting a
/// length-1 side. `None` if the lengths mismatch and neither is 1.
fn broadcast(a: &[Lit], b: &[Lit]) -> Option<Vec<(Lit, Lit)>> {
    let n = a.len().max(b.len());
    if (a.len() != 1 && a.len() != n) || (b.len() != 1 && b.len() != n) {
        return None;
    }
    Some((0..n).map(|i| (a[i % a.len()], b[i % b.len()])).collect())
}

pub fn propagate_constants(ast: &mut Ast) {
    for f in ast.function_list.clone() {
        if let NodeData::Function(func) = ast.node(f).data.clone() {
            if let Some(body) = func.body {
                fold_stmt(ast, body);
            }
        }
    }
    for g in ast.global_vars.clone() {
        fold_global(ast, g);
    }
}

fn fold_global(ast: &mut Ast, id: NodeId) {
    match ast.node(id).data.clone() {
        NodeData::VarDecl(vd) => {
            if let Some(init) = vd.initializer {
                fold_expr(ast, init);
            }
        }
        NodeData::CBufferDecl(_) => {
            for child in ast.children(id) {
                fold_global(ast, child);
            }
        }
        _ => {}
    }
}

fn fold_stmt(ast: &mut Ast, stmt: NodeId) {
    match ast.node(stmt).data.clone() {
        NodeData::BlockStmt { .. } => {
            for child in ast.children(stmt) {
                fold_stmt(ast, child);
            }
        }
        NodeData::ExprStmt { expr } => fold_expr(ast, expr),
        NodeData::VarDeclStmt { decl } => {
            if let NodeData::VarDecl(vd) = ast.node(decl).data.clone() {
                if let Some(init) = vd.initializer {
                    fold_expr(ast, init);
                }
            }
        }
        NodeData::ReturnStmt { value, .. } => {
            if let Some(v) = value {
                fold_expr(ast, v);
            }
        }
        NodeData::IfElseStmt { cond, then_branch, else_branch } => {
            fold_expr(ast, cond);
            fold_stmt(ast, then_branch);
            if let Some(e) = else_branch {
                fold_stmt(ast, e);
            }
        }
        NodeData::WhileStmt { cond, body } | NodeData::DoWhileStmt { cond, body } => {
            fold_expr(ast, cond);
            fold_stmt(ast, body);
        }
        NodeData::ForStmt { init, cond, incr, body } => {
            if let Some(i) = init {
                fold_stmt(ast, i);
            }
            if let Some(c) = cond {
                fold_expr(ast, c);
            }
            if let Some(inc) = incr {
                fold_expr(ast, inc);
            }
            fold_stmt(ast, body);
        }
        _ => {}
    }
}

fn fold_expr(ast: &mut Ast, id: NodeId) {
    match ast.node(id).data.clone() {
        NodeData::BinaryOpExpr { op_kind: OpKind::Assign, rhs, .. } => {
            fold_expr(ast, rhs);
        }
        NodeData::BinaryOpExpr { op_kind, lhs, rhs } => {
            fold_expr(ast, lhs);
            fold_expr(ast, rhs);
            fold_binary(ast, id, op_kind, lhs, rhs);
        }
        NodeData::UnaryOpExpr { op_kind, operand } => {
            fold_expr(ast, operand);
            fold_unary(ast, id, op_kind, operand);
        }
        NodeData::CastExpr { value, .. } => {
            fold_expr(ast, value);
            fold_cast(ast, id, value);
        }
        NodeData::InitListExpr { items } => {
            for it in items {
                fold_expr(ast, it);
            }
        }
        NodeData::TernaryOpExpr { cond, if_true, if_false } => {
            fold_expr(ast, cond);
            fold_expr(ast, if_true);
            fold_expr(ast, if_false);
            if let Some(Lit::Bool(b)) = as_lit(&ast.node(cond).data) {
                let chosen = if b { if_true } else { if_false };
                let data = ast.node(chosen).data.clone();
                ast.node_mut(id).data = data;
            }
        }
        NodeData::MemberExpr { base, member: MemberRef::Swizzle { components, count } } => {
            fold_expr(ast, base);
            if let Some(v) = as_lit_vec(ast, base) {
                if let Some(scalar) = scalar_of(ast, ast.node(id).return_type.unwrap_or(ast.types.void())) {
                    let out: Option<Vec<Lit>> = components.iter().take(count as usize).map(|c| v.get(*c as usize).copied()).collect();
                    if let Some(out) = out {
                        finish(ast, id, scalar, out);
                    }
                }
            }
        }
        NodeData::MemberExpr { base, .. } => fold_expr(ast, base),
        NodeData::IndexExpr { base, index } => {
            fold_expr(ast, base);
            fold_expr(ast, index);
            if let (Some(v), Some(Lit::Int(i))) = (as_lit_vec(ast, base), as_lit(&ast.node(index).data)) {
                if i >= 0 && (i as usize) < v.len() {
                    if let Some(scalar) = scalar_of(ast, ast.node(id).return_type.unwrap_or(ast.types.void())) {
                        finish(ast, id, scalar, vec![v[i as usize]]);
                    }
                }
            }
        }
        NodeData::IncDecOpExpr { target, .. } => fold_expr(ast, target),
        NodeData::OpExpr { args, .. } => {
            for a in args {
                fold_expr(ast, a);
            }
        }
        _ => {}
    }
}

fn fold_binary(ast: &mut Ast, id: NodeId, op: OpKind, lhs: NodeId, rhs: NodeId) {
    let Some(a) = as_lit_vec(ast, lhs) else { return };
    let Some(b) = as_lit_vec(ast, rhs) else { return };
    let rt = ast.node(id).return_type.unwrap_or(ast.types.void());
    let elem_scalar = scalar_of(ast, rt).unwrap_or(Scalar::Float32);

    let is_compare_or_logical = matches!(
        op,
        OpKind::Equal
            | OpKind::NotEqual
            | OpKind::Less
            | OpKind::LessEq
            | OpKind::Greater
            | OpKind::GreaterEq
            | OpKind::LogicalAnd
            | OpKind::LogicalOr
    );
    if is_compare_or_logical {
        if a.len() != 1 || b.len() != 1 {
            return;
        }
        let Some(result) = eval_scalar(op, a[0], b[0]) else { return };
        finish(ast, id, elem_scalar, vec![result]);
        return;
    }

    let Some(pairs) = broadcast(&a, &b) else { return };
    let mut out = Vec::with_capacity(pairs.len());
    for (x, y) in pairs {
        match eval_scalar(op, x, y) {
            Some(r) => out.push(r),
            None => return,
        }
    }
    finish(ast, id, elem_scalar, out);
}

/// Evaluates one component of a binary op. Returns `None` for an operation
/// that would panic at compile time (division/modulus by zero, an
/// out-of-range shift) rather than folding it unsoundly.
fn eval_scalar(op: OpKind, a: Lit, b: Lit) -> Option<Lit> {
    let is_float = matches!(a, Lit::Float(_)) || matches!(b, Lit::Float(_));
    Some(match op {
        OpKind::Add if is_float => Lit::Float(lit_as_f64(a) + lit_as_f64(b)),
        OpKind::Add => Lit::Int(lit_as_i32(a).wrapping_add(lit_as_i32(b))),
        OpKind::Subtract if is_float => Lit::Float(lit_as_f64(a) - lit_as_f64(b)),
        OpKind::Subtract => Lit::Int(lit_as_i32(a).wrapping_sub(lit_as_i32(b))),
        OpKind::Multiply if is_float => Lit::Float(lit_as_f64(a) * lit_as_f64(b)),
        OpKind::Multiply => Lit::Int(lit_as_i32(a).wrapping_mul(lit_as_i32(b))),
        OpKind::Divide if is_float => {
            let d = lit_as_f64(b);
            if d == 0.0 {
                return None;
            }
            Lit::Float(lit_as_f64(a) / d)
        }
        OpKind::Divide => {
            let d = lit_as_i32(b);
            if d == 0 {
                return None;
            }
            Lit::Int(lit_as_i32(a).wrapping_div(d))
        }
        OpKind::Modulus if is_float => {
            let d = lit_as_f64(b);
            if d == 0.0 {
                return None;
            }
            Lit::Float(lit_as_f64(a) % d)
        }
        OpKind::Modulus => {
            let d = lit_as_i32(b);
            if d == 0 {
                return None;
            }
            Lit::Int(lit_as_i32(a).wrapping_rem(d))
        }
        OpKind::BitAnd => Lit::Int(lit_as_i32(a) & lit_as_i32(b)),
        OpKind::BitOr => Lit::Int(lit_as_i32(a) | lit_as_i32(b)),
        OpKind::BitXor => Lit::Int(lit_as_i32(a) ^ lit_as_i32(b)),
        OpKind::Shl => {
            let shift = lit_as_i32(b);
            if !(0..32).contains(&shift) {
                return None;
            }
            Lit::Int(lit_as_i32(a).wrapping_shl(shift as u32))
        }
        OpKind::Shr => {
            let shift = lit_as_i32(b);
            if !(0..32).contains(&shift) {
                return None;
            }
            Lit::Int(lit_as_i32(a).wrapping_shr(shift as u32))
        }
        OpKind::LogicalAnd => Lit::Bool(lit_as_bool(a) && lit_as_bool(b)),
        OpKind::LogicalOr => Lit::Bool(lit_as_bool(a) || lit_as_bool(b)),
        OpKind::Equal => Lit::Bool(lit_as_f64(a) == lit_as_f64(b)),
        OpKind::NotEqual => Lit::Bool(lit_as_f64(a) != lit_as_f64(b)),
        OpKind::Less => Lit::Bool(lit_as_f64(a) < lit_as_f64(b)),
        OpKind::LessEq => Lit::Bool(lit_as_f64(a) <= lit_as_f64(b)),
        OpKind::Greater => Lit::Bool(lit_as_f64(a) > lit_as_f64(b)),
        OpKind::GreaterEq => Lit::Bool(lit_as_f64(a) >= lit_as_f64(b)),
        _ => return None,
    })
}

fn fold_unary(ast: &mut Ast, id: NodeId, op: OpKind, operand: NodeId) {
    let Some(v) = as_lit_vec(ast, operand) else { return };
    let rt = ast.node(id).return_type.unwrap_or(ast.types.void());
    let elem_scalar = scalar_of(ast, rt).unwrap_or(Scalar::Float32);
    let out: Vec<Lit> = match op {
        OpKind::Negate => v
            .into_iter()
            .map(|l| if elem_scalar.is_float() { Lit::Float(-lit_as_f64(l)) } else { Lit::Int(lit_as_i32(l).wrapping_neg()) })
            .collect(),
        OpKind::Not => v.into_iter().map(|l| Lit::Bool(!lit_as_bool(l))).collect(),
        OpKind::Invert => v.into_iter().map(|l| Lit::Int(!lit_as_i32(l))).collect(),
        _ => return,
    };
    finish(ast, id, elem_scalar, out);
}

fn fold_cast(ast: &mut Ast, id: NodeId, value: NodeId) {
    let Some(v) = as_lit_vec(ast, value) else { return };
    if v.is_empty() {
        return;
    }
    let rt = ast.node(id).return_type.unwrap_or(ast.types.void());
    let Some(elem_scalar) = scalar_of(ast, rt) else { return };
    let width = target_width(ast, rt);
    let out: Vec<Lit> = (0..width).map(|i| v[i % v.len()]).collect();
    finish(ast, id, elem_scalar, out);
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

    fn return_value_node(ast: &Ast) -> NodeId {
        let func = ast.entry_point.expect("entry point");
        let body = match &ast.node(func).data {
            NodeData::Function(f) => f.body.expect("body"),
            _ => unreachable!(),
        };
        let ret = *ast.children(body).last().expect("at least one statement");
        match &ast.node(ret).data {
            NodeData::ReturnStmt { value, .. } => value.expect("return value"),
            _ => panic!("last statement is not a return"),
        }
    }

    #[test]
    fn folds_scalar_arithmetic() {
        let mut ast = build("float main() : SV_Target { return 2.0 + 3.0 * 4.0; }");
        propagate_constants(&mut ast);
        let v = return_value_node(&ast);
        assert!(matches!(ast.node(v).data, NodeData::Float32Expr(x) if (x - 14.0).abs() < 1e-9));
    }

    #[test]
    fn folds_comparison_to_bool() {
        let mut ast = build("bool main() : SV_Target { return 3 < 5; }");
        propagate_constants(&mut ast);
        let v = return_value_node(&ast);
        assert!(matches!(ast.node(v).data, NodeData::BoolExpr(true)));
    }

    #[test]
    fn does_not_fold_division_by_zero() {
        let mut ast = build("int main() : SV_Target { return 1 / 0; }");
        propagate_constants(&mut ast);
        let v = return_value_node(&ast);
        assert!(matches!(ast.node(v).data, NodeData::BinaryOpExpr { .. }));
    }

    #[test]
    fn folds_swizzle_of_constant_vector() {
        let mut ast = build("float main() : SV_Target { return float3(1.0, 2.0, 3.0).y; }");
        propagate_constants(&mut ast);
        let v = return_value_node(&ast);
        assert!(matches!(ast.node(v).data, NodeData::Float32Expr(x) if (x - 2.0).abs() < 1e-9));
    }

    #[test]
    fn does_not_fold_assignment_node_itself() {
        let mut ast = build("float main() : SV_Target { float x; x = 2.0 + 3.0; return x; }");
        propagate_constants(&mut ast);
        let func = ast.entry_point.unwrap();
        let body = match &ast.node(func).data {
            NodeData::Function(f) => f.body.unwrap(),
            _ => unreachable!(),
        };
        let assign_stmt = ast.children(body)[1];
        let expr = match &ast.node(assign_stmt).data {
            NodeData::ExprStmt { expr } => *expr,
            _ => panic!("expected expr stmt"),
        };
        match &ast.node(expr).data {
            NodeData::BinaryOpExpr { op_kind: OpKind::Assign, rhs, .. } => {
                assert!(matches!(ast.node(*rhs).data, NodeData::Float32Expr(x) if (x - 5.0).abs() < 1e-9));
            }
            other => panic!("assignment was folded away: {other:?}"),
        }
    }
}
