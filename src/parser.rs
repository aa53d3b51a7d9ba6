//! Recursive-descent parser with integrated type checking
//!
//! Mirrors the original `Parser` (`hlslparser.hpp`): a single pass builds
//! the AST, resolves names and overloads, and inserts implicit casts as it
//! goes (spec.md section 4.4). The best-split expression scanner keeps the
//! original's `FindBestSplit`/`GetSplitScore` naming and
//! `SPLITSCORE_RTLASSOC` bias for right-associative operators.

use crate::ast::{ASTFunction, Ast, MemberRef, NodeData, NodeId, OpKind, VarDecl, VarFlags};
use crate::builtins::{match_factor, BuiltinTable};
use crate::config::{CompilerConfig, Stage};
use crate::diagnostics::DiagnosticSink;
use crate::token::{Payload, SourceLocation, Token, TokenKind, TokenPool};
use crate::types::{Scalar, TypeId};
use std::collections::HashMap;

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    pool: &'a TokenPool,
    pub ast: Ast,
    diags: &'a mut DiagnosticSink,
    builtins: BuiltinTable,
    config: &'a CompilerConfig,

    scope_vars: HashMap<String, NodeId>,
    scope_stack: Vec<Vec<String>>,
    functions: HashMap<String, Vec<NodeId>>,
    struct_types: HashMap<String, TypeId>,
    loop_depth: u32,
    current_function_return_type: Option<TypeId>,
    current_function_node: Option<NodeId>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, pool: &'a TokenPool, config: &'a CompilerConfig, diags: &'a mut DiagnosticSink) -> Self {
        let mut ast = Ast::new();
        let builtins = BuiltinTable::build(&mut ast.types);
        Parser {
            tokens,
            pos: 0,
            pool,
            ast,
            diags,
            builtins,
            config,
            scope_vars: HashMap::new(),
            scope_stack: vec![Vec::new()],
            functions: HashMap::new(),
            struct_types: HashMap::new(),
            loop_depth: 0,
            current_function_return_type: None,
            current_function_node: None,
        }
    }

    // ---- token cursor -----------------------------------------------

    fn cur(&self) -> Token {
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> TokenKind {
        self.cur().kind
    }

    fn loc(&self) -> SourceLocation {
        self.cur().loc
    }

    fn fwd(&mut self) -> Token {
        let t = self.cur();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn at_end(&self) -> bool {
        self.kind() == TokenKind::Eof
    }

    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.kind() == kind {
            self.fwd();
            true
        } else {
            self.diags
                .error(self.loc(), format!("expected {}, got {}", kind.as_str(), self.kind().as_str()));
            false
        }
    }

    fn ident_text(&self, tok: Token) -> String {
        self.pool.get(tok.payload).to_string()
    }

    /// Recovers a syntactic/semantic error to the next `;` or `}`, per
    /// spec.md section 7.
    fn recover_to_statement_boundary(&mut self) {
        while !self.at_end() {
            match self.kind() {
                TokenKind::Semicolon => {
                    self.fwd();
                    return;
                }
                TokenKind::RBrace => return,
                _ => {
                    self.fwd();
                }
            }
        }
    }

    // ---- scopes --------------------------------------------------------

    fn push_scope(&mut self) {
        self.scope_stack.push(Vec::new());
    }

    fn pop_scope(&mut self) {
        let names = self.scope_stack.pop().unwrap_or_default();
        for name in names.into_iter().rev() {
            if let Some(decl_id) = self.scope_vars.get(&name).copied() {
                let prev = match &self.ast.node(decl_id).data {
                    NodeData::VarDecl(vd) => vd.prev_scope_decl,
                    _ => None,
                };
                match prev {
                    Some(p) => {
                        self.scope_vars.insert(name, p);
                    }
                    None => {
                        self.scope_vars.remove(&name);
                    }
                }
            }
        }
    }

    fn declare_var(&mut self, name: &str, decl_id: NodeId) {
        let prev = self.scope_vars.get(name).copied();
        if let NodeData::VarDecl(vd) = &mut self.ast.node_mut(decl_id).data {
            vd.prev_scope_decl = prev;
        }
        self.scope_vars.insert(name.to_string(), decl_id);
        self.scope_stack.last_mut().unwrap().push(name.to_string());
    }

    fn lookup_var(&self, name: &str) -> Option<NodeId> {
        self.scope_vars.get(name).copied()
    }

    // ---- type names ------------------------------------------------

    fn try_parse_type_name(&mut self, name: &str) -> Option<TypeId> {
        if let Some(&id) = self.struct_types.get(name) {
            return Some(id);
        }
        let (base, rest) = split_leading_alpha(name);
        let scalar = match base {
            "void" => return Some(self.ast.types.void()),
            "bool" => Scalar::Bool,
            "int" => Scalar::Int32,
            "uint" => Scalar::UInt32,
            "half" => Scalar::Float16,
            "float" => Scalar::Float32,
            _ => return self.try_parse_sampler_name(name),
        };
        if rest.is_empty() {
            return Some(self.ast.types.scalar(scalar));
        }
        if let Some((w,)) = parse_vec_suffix(rest) {
            return Some(self.ast.types.get_vector_type(scalar, w));
        }
        if let Some((r, c)) = parse_mat_suffix(rest) {
            return Some(self.ast.types.get_matrix_type(scalar, r, c));
        }
        None
    }

    fn try_parse_sampler_name(&mut self, name: &str) -> Option<TypeId> {
        use crate::types::SamplerKind;
        let kind = match name {
            "sampler1D" => SamplerKind::Sampler1D,
            "sampler2D" => SamplerKind::Sampler2D,
            "sampler3D" => SamplerKind::Sampler3D,
            "samplerCUBE" => SamplerKind::SamplerCube,
            "sampler1DShadow" => SamplerKind::Sampler1DCmp,
            "sampler2DShadow" => SamplerKind::Sampler2DCmp,
            "samplerCUBEShadow" => SamplerKind::SamplerCubeCmp,
            _ => return None,
        };
        Some(self.ast.types.get_sampler_type(kind))
    }

    // ---- top level -------------------------------------------------

    pub fn parse_program(&mut self) {
        while !self.at_end() {
            self.parse_top_level_decl();
        }
        if self.ast.entry_point.is_none() {
            self.diags.error(SourceLocation::BAD, format!("no entry point named `{}`", self.config.entry_point_name));
        }
    }

    fn parse_top_level_decl(&mut self) {
        match self.kind() {
            TokenKind::KwStruct => self.parse_struct_decl(),
            TokenKind::KwCBuffer => self.parse_cbuffer_decl(),
            TokenKind::Semicolon => {
                self.fwd();
            }
            _ => self.parse_global_var_or_function(),
        }
    }

    fn parse_struct_decl(&mut self) {
        self.fwd(); // struct
        let name_tok = self.cur();
        if !self.expect_ident() {
            self.recover_to_statement_boundary();
            return;
        }
        let name = self.ident_text(name_tok);
        if !self.expect(TokenKind::LBrace) {
            self.recover_to_statement_boundary();
            return;
        }
        let mut members = Vec::new();
        while self.kind() != TokenKind::RBrace && !self.at_end() {
            let Some(ty) = self.parse_base_type() else {
                self.recover_to_statement_boundary();
                continue;
            };
            let member_name_tok = self.cur();
            if !self.expect_ident() {
                self.recover_to_statement_boundary();
                continue;
            }
            let member_name = self.ident_text(member_name_tok);
            let ty = self.parse_array_suffix(ty);
            let (semantic_name, semantic_index) = self.parse_optional_semantic();
            self.expect(TokenKind::Semicolon);
            members.push(crate::types::StructMember {
                name: member_name,
                ty,
                semantic_name,
                semantic_index,
            });
        }
        self.expect(TokenKind::RBrace);
        self.expect(TokenKind::Semicolon);
        let id = self.ast.types.create_struct_type(name.clone(), members);
        self.struct_types.insert(name, id);
    }

    fn parse_cbuffer_decl(&mut self) {
        self.fwd(); // cbuffer
        let name_tok = self.cur();
        self.expect_ident();
        let name = self.ident_text(name_tok);
        let register_id = self.parse_optional_register();
        if !self.expect(TokenKind::LBrace) {
            self.recover_to_statement_boundary();
            return;
        }
        let cbuf = self.ast.create(name_tok.loc, NodeData::CBufferDecl(crate::ast::CBufferDecl { name, register_id }));
        while self.kind() != TokenKind::RBrace && !self.at_end() {
            if let Some(decl) = self.parse_one_var_decl(VarFlags { is_uniform: true, is_global: true, ..Default::default() }) {
                self.ast.append_child(cbuf, decl);
            } else {
                self.recover_to_statement_boundary();
            }
        }
        self.expect(TokenKind::RBrace);
        self.expect(TokenKind::Semicolon);
        self.ast.global_vars.push(cbuf);
    }

    fn parse_global_var_or_function(&mut self) {
        let start_loc = self.loc();
        let mut flags = VarFlags { is_global: true, ..Default::default() };
        loop {
            match self.kind() {
                TokenKind::KwConst => {
                    flags.is_const = true;
                    self.fwd();
                }
                TokenKind::KwStatic => {
                    flags.is_static = true;
                    self.fwd();
                }
                TokenKind::KwUniform => {
                    flags.is_uniform = true;
                    self.fwd();
                }
                TokenKind::KwIn => {
                    flags.is_in = true;
                    self.fwd();
                }
                TokenKind::KwOut => {
                    flags.is_out = true;
                    self.fwd();
                }
                _ => break,
            }
        }

        let Some(ty) = self.parse_base_type() else {
            self.diags.error(start_loc, "expected type");
            self.recover_to_statement_boundary();
            return;
        };

        let name_tok = self.cur();
        if !self.expect_ident() {
            self.recover_to_statement_boundary();
            return;
        }
        let name = self.ident_text(name_tok);

        if self.kind() == TokenKind::LParen {
            self.parse_function(ty, name, name_tok.loc);
        } else {
            let ty = self.parse_array_suffix(ty);
            let (semantic_name, semantic_index) = self.parse_optional_semantic();
            let register_id = self.parse_optional_register();
            let initializer = if self.kind() == TokenKind::OpAssign {
                self.fwd();
                Some(self.parse_expr_with_cast(ty))
            } else {
                None
            };
            self.expect(TokenKind::Semicolon);
            if semantic_name.is_some() {
                flags.is_stage_io = true;
            }
            let decl = self.ast.create(
                name_tok.loc,
                NodeData::VarDecl(VarDecl {
                    name: name.clone(),
                    ty,
                    semantic_name,
                    semantic_index,
                    flags,
                    register_id,
                    prev_scope_decl: None,
                    ap_range: (0, 0),
                    initializer,
                }),
            );
            self.declare_var(&name, decl);
            self.ast.global_vars.push(decl);
        }
    }

    fn parse_function(&mut self, return_type: TypeId, name: String, loc: SourceLocation) {
        self.fwd(); // (
        self.push_scope();
        let mut args = Vec::new();
        if self.kind() != TokenKind::RParen {
            loop {
                let mut flags = VarFlags::default();
                loop {
                    match self.kind() {
                        TokenKind::KwIn => {
                            flags.is_in = true;
                            self.fwd();
                        }
                        TokenKind::KwOut => {
                            flags.is_out = true;
                            self.fwd();
                        }
                        TokenKind::KwInOut => {
                            flags.is_in = true;
                            flags.is_out = true;
                            self.fwd();
                        }
                        _ => break,
                    }
                }
                let Some(arg_ty) = self.parse_base_type() else {
                    self.diags.error(self.loc(), "expected parameter type");
                    break;
                };
                let arg_name_tok = self.cur();
                self.expect_ident();
                let arg_name = self.ident_text(arg_name_tok);
                let arg_ty = self.parse_array_suffix(arg_ty);
                let (semantic_name, semantic_index) = self.parse_optional_semantic();
                if !flags.is_out {
                    flags.is_in = true;
                }
                let decl = self.ast.create(
                    arg_name_tok.loc,
                    NodeData::VarDecl(VarDecl {
                        name: arg_name.clone(),
                        ty: arg_ty,
                        semantic_name,
                        semantic_index,
                        flags,
                        register_id: None,
                        prev_scope_decl: None,
                        ap_range: (0, 0),
                        initializer: None,
                    }),
                );
                self.declare_var(&arg_name, decl);
                args.push(decl);
                if self.kind() == TokenKind::Comma {
                    self.fwd();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen);
        let (return_semantic, _idx) = self.parse_optional_semantic();

        let is_entry = name == self.config.entry_point_name;
        let mangled_name = if is_entry { name.clone() } else { format!("{name}_{}", self.functions.get(&name).map(|v| v.len()).unwrap_or(0)) };

        let func_id = self.ast.create(
            loc,
            NodeData::Function(ASTFunction {
                name: name.clone(),
                mangled_name,
                return_type,
                return_semantic,
                args: args.clone(),
                body: None,
                first_ret_stmt: None,
                last_ret_stmt: None,
                used: is_entry,
            }),
        );
        for a in &args {
            self.ast.append_child(func_id, *a);
        }

        let prev_return = self.current_function_return_type.replace(return_type);
        let prev_func = self.current_function_node.replace(func_id);

        if self.kind() == TokenKind::LBrace {
            let body = self.parse_block_stmt();
            if let NodeData::Function(f) = &mut self.ast.node_mut(func_id).data {
                f.body = Some(body);
            }
            self.ast.append_child(func_id, body);
        } else {
            self.expect(TokenKind::Semicolon);
        }

        self.current_function_return_type = prev_return;
        self.current_function_node = prev_func;
        self.pop_scope();

        self.functions.entry(name.clone()).or_default().push(func_id);
        self.ast.function_list.push(func_id);

        if is_entry {
            if self.ast.entry_point.is_some() {
                self.diags.error(loc, format!("duplicate entry point `{name}`"));
            } else {
                self.ast.entry_point = Some(func_id);
            }
        }
    }

    // ---- type parsing helpers ---------------------------------------

    fn parse_base_type(&mut self) -> Option<TypeId> {
        if self.kind() != TokenKind::Ident {
            return None;
        }
        let tok = self.cur();
        let name = self.ident_text(tok);
        let ty = self.try_parse_type_name(&name)?;
        self.fwd();
        Some(ty)
    }

    fn parse_array_suffix(&mut self, base: TypeId) -> TypeId {
        if self.kind() == TokenKind::LBracket {
            self.fwd();
            let count = if self.kind() == TokenKind::Int32Lit {
                match self.fwd().payload {
                    Payload::Int32(v) => v.max(0) as u32,
                    _ => 0,
                }
            } else {
                0
            };
            self.expect(TokenKind::RBracket);
            return self.ast.types.get_array_type(base, count);
        }
        base
    }

    fn parse_optional_semantic(&mut self) -> (Option<String>, i32) {
        if self.kind() == TokenKind::Colon {
            self.fwd();
            let tok = self.cur();
            if self.expect_ident() {
                let full = self.ident_text(tok);
                let (base, digits) = split_trailing_digits(&full);
                let index = digits.parse::<i32>().unwrap_or(-1);
                return (Some(base.to_string()), index);
            }
        }
        (None, -1)
    }

    fn parse_optional_register(&mut self) -> Option<String> {
        if self.kind() == TokenKind::Colon {
            // lookahead: `: register(...)` or `: packoffset(...)`
            let save = self.pos;
            self.fwd();
            if matches!(self.kind(), TokenKind::KwRegister | TokenKind::KwPackOffset) {
                self.fwd();
                let mut text = String::new();
                if self.expect(TokenKind::LParen) {
                    while self.kind() != TokenKind::RParen && !self.at_end() {
                        text.push_str(self.fwd().kind.as_str());
                    }
                    self.expect(TokenKind::RParen);
                }
                return Some(text);
            }
            self.pos = save;
        }
        None
    }

    fn parse_one_var_decl(&mut self, flags: VarFlags) -> Option<NodeId> {
        let ty = self.parse_base_type()?;
        let name_tok = self.cur();
        if !self.expect_ident() {
            return None;
        }
        let name = self.ident_text(name_tok);
        let ty = self.parse_array_suffix(ty);
        let register_id = self.parse_optional_register();
        self.expect(TokenKind::Semicolon);
        let decl = self.ast.create(
            name_tok.loc,
            NodeData::VarDecl(VarDecl {
                name: name.clone(),
                ty,
                semantic_name: None,
                semantic_index: -1,
                flags,
                register_id,
                prev_scope_decl: None,
                ap_range: (0, 0),
                initializer: None,
            }),
        );
        self.declare_var(&name, decl);
        Some(decl)
    }

    fn expect_ident(&mut self) -> bool {
        if self.kind() == TokenKind::Ident {
            self.fwd();
            true
        } else {
            self.diags.error(self.loc(), format!("expected identifier, got {}", self.kind().as_str()));
            false
        }
    }

    // ---- statements --------------------------------------------------

    fn parse_block_stmt(&mut self) -> NodeId {
        let loc = self.loc();
        self.expect(TokenKind::LBrace);
        let block = self.ast.create(loc, NodeData::BlockStmt { statements: vec![] });
        self.push_scope();
        while self.kind() != TokenKind::RBrace && !self.at_end() {
            let stmt = self.parse_statement();
            self.ast.append_child(block, stmt);
        }
        self.expect(TokenKind::RBrace);
        self.pop_scope();
        block
    }

    fn parse_statement(&mut self) -> NodeId {
        let loc = self.loc();
        match self.kind() {
            TokenKind::LBrace => self.parse_block_stmt(),
            TokenKind::Semicolon => {
                self.fwd();
                self.ast.create(loc, NodeData::EmptyStmt)
            }
            TokenKind::KwIf => self.parse_if_stmt(),
            TokenKind::KwWhile => self.parse_while_stmt(),
            TokenKind::KwDo => self.parse_do_while_stmt(),
            TokenKind::KwFor => self.parse_for_stmt(),
            TokenKind::KwReturn => self.parse_return_stmt(),
            TokenKind::KwDiscard => {
                self.fwd();
                self.expect(TokenKind::Semicolon);
                if self.config.stage != Stage::Pixel {
                    self.diags.error(loc, "`discard` is only legal in the pixel stage");
                }
                self.ast.create(loc, NodeData::DiscardStmt)
            }
            TokenKind::KwBreak => {
                self.fwd();
                self.expect(TokenKind::Semicolon);
                if self.loop_depth == 0 {
                    self.diags.error(loc, "`break` outside a loop");
                }
                self.ast.create(loc, NodeData::BreakStmt)
            }
            TokenKind::KwContinue => {
                self.fwd();
                self.expect(TokenKind::Semicolon);
                if self.loop_depth == 0 {
                    self.diags.error(loc, "`continue` outside a loop");
                }
                self.ast.create(loc, NodeData::ContinueStmt)
            }
            _ => self.parse_expr_or_decl_stmt(),
        }
    }

    fn parse_if_stmt(&mut self) -> NodeId {
        let loc = self.loc();
        self.fwd();
        self.expect(TokenKind::LParen);
        let cond = self.parse_expr_to(TokenKind::RParen);
        self.expect(TokenKind::RParen);
        let then_branch = self.parse_statement();
        let else_branch = if self.kind() == TokenKind::KwElse {
            self.fwd();
            Some(self.parse_statement())
        } else {
            None
        };
        self.ast.create(
            loc,
            NodeData::IfElseStmt { cond, then_branch, else_branch },
        )
    }

    fn parse_while_stmt(&mut self) -> NodeId {
        let loc = self.loc();
        self.fwd();
        self.expect(TokenKind::LParen);
        let cond = self.parse_expr_to(TokenKind::RParen);
        self.expect(TokenKind::RParen);
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        self.ast.create(loc, NodeData::WhileStmt { cond, body })
    }

    fn parse_do_while_stmt(&mut self) -> NodeId {
        let loc = self.loc();
        self.fwd();
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        self.expect(TokenKind::KwWhile);
        self.expect(TokenKind::LParen);
        let cond = self.parse_expr_to(TokenKind::RParen);
        self.expect(TokenKind::RParen);
        self.expect(TokenKind::Semicolon);
        self.ast.create(loc, NodeData::DoWhileStmt { cond, body })
    }

    fn parse_for_stmt(&mut self) -> NodeId {
        let loc = self.loc();
        self.fwd();
        self.expect(TokenKind::LParen);
        self.push_scope();
        let init = if self.kind() == TokenKind::Semicolon {
            self.fwd();
            None
        } else {
            Some(self.parse_expr_or_decl_stmt())
        };
        let cond = if self.kind() == TokenKind::Semicolon {
            None
        } else {
            Some(self.parse_expr_to(TokenKind::Semicolon))
        };
        self.expect(TokenKind::Semicolon);
        let incr = if self.kind() == TokenKind::RParen {
            None
        } else {
            Some(self.parse_expr_to(TokenKind::RParen))
        };
        self.expect(TokenKind::RParen);
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        self.pop_scope();
        self.ast.create(loc, NodeData::ForStmt { init, cond, incr, body })
    }

    fn parse_return_stmt(&mut self) -> NodeId {
        let loc = self.loc();
        self.fwd();
        let ret_ty = self.current_function_return_type.unwrap_or(self.ast.types.void());
        let value = if self.kind() == TokenKind::Semicolon {
            None
        } else {
            Some(self.parse_expr_with_cast(ret_ty))
        };
        self.expect(TokenKind::Semicolon);
        let ret = self.ast.create(
            loc,
            NodeData::ReturnStmt {
                value,
                prev_ret_stmt: None,
                next_ret_stmt: None,
            },
        );
        if let Some(func) = self.current_function_node {
            self.ast.add_return_stmt(func, ret);
        }
        ret
    }

    /// A statement starting with a type name is a variable declaration;
    /// otherwise it is an expression statement (mirrors
    /// `ParseExprDeclStatement` in the original).
    fn parse_expr_or_decl_stmt(&mut self) -> NodeId {
        let loc = self.loc();
        let mut flags = VarFlags::default();
        let save = self.pos;
        loop {
            match self.kind() {
                TokenKind::KwConst => {
                    flags.is_const = true;
                    self.fwd();
                }
                TokenKind::KwStatic => {
                    flags.is_static = true;
                    self.fwd();
                }
                _ => break,
            }
        }
        if self.kind() == TokenKind::Ident {
            let name = self.ident_text(self.cur());
            if let Some(ty) = self.try_parse_type_name(&name) {
                self.fwd();
                let name_tok = self.cur();
                if self.expect_ident() {
                    let var_name = self.ident_text(name_tok);
                    let ty = self.parse_array_suffix(ty);
                    let initializer = if self.kind() == TokenKind::OpAssign {
                        self.fwd();
                        Some(self.parse_expr_with_cast(ty))
                    } else {
                        None
                    };
                    self.expect(TokenKind::Semicolon);
                    let decl = self.ast.create(
                        name_tok.loc,
                        NodeData::VarDecl(VarDecl {
                            name: var_name.clone(),
                            ty,
                            semantic_name: None,
                            semantic_index: -1,
                            flags,
                            register_id: None,
                            prev_scope_decl: None,
                            ap_range: (0, 0),
                            initializer,
                        }),
                    );
                    self.declare_var(&var_name, decl);
                    return self.ast.create(loc, NodeData::VarDeclStmt { decl });
                }
            }
        }
        self.pos = save;
        let expr = self.parse_expr_to(TokenKind::Semicolon);
        self.expect(TokenKind::Semicolon);
        self.ast.create(loc, NodeData::ExprStmt { expr })
    }

    // ---- expressions -----------------------------------------------

    fn parse_expr_to(&mut self, terminator: TokenKind) -> NodeId {
        let end = self.scan_to(terminator);
        self.parse_expr_range(self.pos, end)
    }

    fn parse_expr_with_cast(&mut self, target: TypeId) -> NodeId {
        let end = self.scan_to(TokenKind::Semicolon);
        let expr = self.parse_expr_range(self.pos, end);
        self.insert_cast_if_needed(expr, target)
    }

    /// Finds the index just before the first un-nested occurrence of
    /// `terminator`, used to bound one expression's token range.
    fn scan_to(&self, terminator: TokenKind) -> usize {
        let mut depth = 0i32;
        let mut i = self.pos;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => depth -= 1,
                k if k == terminator && depth <= 0 => return i,
                TokenKind::Eof => return i,
                _ => {}
            }
            i += 1;
        }
        i
    }

    fn parse_expr_range(&mut self, from: usize, to: usize) -> NodeId {
        self.pos = from;
        let node = self.parse_expr_span(from, to);
        self.pos = to;
        node
    }

    fn parse_expr_span(&mut self, from: usize, to: usize) -> NodeId {
        if from >= to {
            let loc = self.tokens.get(from).map(|t| t.loc).unwrap_or(SourceLocation::BAD);
            self.diags.error(loc, "expected expression");
            return self.make_const_error(loc);
        }

        if let Some(assign_pos) = find_top_level_assign(&self.tokens[from..to]) {
            let op_pos = assign_pos + from;
            let op_tok = self.tokens[op_pos];
            let lhs = self.parse_expr_span(from, op_pos);
            let rhs = self.parse_expr_span(op_pos + 1, to);
            return self.build_binary(op_tok, lhs, rhs);
        }

        if let Some((q_pos, colon_pos)) = find_top_level_ternary(&self.tokens[from..to]) {
            let q_pos = q_pos + from;
            let colon_pos = colon_pos + from;
            let cond = self.parse_expr_span(from, q_pos);
            let if_true = self.parse_expr_span(q_pos + 1, colon_pos);
            let if_false = self.parse_expr_span(colon_pos + 1, to);
            let loc = self.tokens[q_pos].loc;
            let result_ty = self.ast.node(if_true).return_type;
            let node = self.ast.create(loc, NodeData::TernaryOpExpr { cond, if_true, if_false });
            self.ast.set_return_type(node, result_ty);
            return node;
        }

        if let Some(split) = find_best_split(&self.tokens[from..to]) {
            let op_pos = split.pos + from;
            let op_tok = self.tokens[op_pos];
            let lhs = self.parse_expr_span(from, op_pos);
            let rhs = self.parse_expr_span(op_pos + 1, to);
            return self.build_binary(op_tok, lhs, rhs);
        }

        self.pos = from;
        let node = self.parse_primary(to);
        self.pos = to;
        node
    }

    fn make_const_error(&mut self, loc: SourceLocation) -> NodeId {
        let i32_ty = self.ast.types.scalar(Scalar::Int32);
        let node = self.ast.create(loc, NodeData::Int32Expr(0));
        self.ast.set_return_type(node, Some(i32_ty));
        node
    }

    fn build_binary(&mut self, op_tok: Token, lhs: NodeId, rhs: NodeId) -> NodeId {
        let loc = op_tok.loc;
        if op_tok.kind.is_assign() {
            let lhs_ty = self.ast.node(lhs).return_type;
            let rhs = match lhs_ty {
                Some(t) => self.insert_cast_if_needed(rhs, t),
                None => rhs,
            };
            let compound_op = assign_op_kind(op_tok.kind);
            let value = if let Some(op_kind) = compound_op {
                // compound assignment: a += b  =>  a = a OP b, modeled directly
                let bin = self.ast.create(loc, NodeData::BinaryOpExpr { op_kind, lhs, rhs });
                self.ast.set_return_type(bin, lhs_ty);
                bin
            } else {
                rhs
            };
            let node = self.ast.create(loc, NodeData::BinaryOpExpr { op_kind: OpKind::Assign, lhs, rhs: value });
            self.ast.set_return_type(node, lhs_ty);
            return node;
        }

        let op_kind = binary_op_kind(op_tok.kind);
        let lhs_ty = self.ast.node(lhs).return_type;
        let rhs_ty = self.ast.node(rhs).return_type;
        let result_ty = match (lhs_ty, rhs_ty) {
            (Some(a), Some(b)) => self.ast.types.promote(a, b),
            _ => None,
        };
        let result_ty = if op_tok.kind.is_compare() || matches!(op_tok.kind, TokenKind::OpLogicalAnd | TokenKind::OpLogicalOr) {
            Some(self.ast.types.scalar(Scalar::Bool))
        } else {
            result_ty
        };
        let node = self.ast.create(loc, NodeData::BinaryOpExpr { op_kind, lhs, rhs });
        self.ast.set_return_type(node, result_ty);
        node
    }

    /// Primary expressions, spec.md section 4.4 step 3: identifiers,
    /// literals, parenthesized subexpressions, constructor casts, calls,
    /// member/index/postfix, prefix ops.
    fn parse_primary(&mut self, limit: usize) -> NodeId {
        let loc = self.loc();
        match self.kind() {
            TokenKind::Int32Lit => {
                let v = match self.fwd().payload {
                    Payload::Int32(v) => v,
                    _ => 0,
                };
                let ty = self.ast.types.scalar(Scalar::Int32);
                let node = self.ast.create(loc, NodeData::Int32Expr(v));
                self.ast.set_return_type(node, Some(ty));
                self.parse_postfix(node, limit)
            }
            TokenKind::Float32Lit => {
                let v = match self.fwd().payload {
                    Payload::Float64(v) => v,
                    _ => 0.0,
                };
                let ty = self.ast.types.scalar(Scalar::Float32);
                let node = self.ast.create(loc, NodeData::Float32Expr(v));
                self.ast.set_return_type(node, Some(ty));
                self.parse_postfix(node, limit)
            }
            TokenKind::BoolLit => {
                let v = match self.fwd().payload {
                    Payload::Bool(v) => v,
                    _ => false,
                };
                let ty = self.ast.types.scalar(Scalar::Bool);
                let node = self.ast.create(loc, NodeData::BoolExpr(v));
                self.ast.set_return_type(node, Some(ty));
                self.parse_postfix(node, limit)
            }
            TokenKind::LParen => {
                self.fwd();
                let inner_end = self.scan_to(TokenKind::RParen);
                let inner = self.parse_expr_span(self.pos, inner_end);
                self.pos = inner_end;
                self.expect(TokenKind::RParen);
                self.parse_postfix(inner, limit)
            }
            TokenKind::OpSub | TokenKind::OpNot | TokenKind::OpInv => {
                let op_tok = self.fwd();
                let operand = self.parse_primary(limit);
                let op_kind = match op_tok.kind {
                    TokenKind::OpSub => OpKind::Negate,
                    TokenKind::OpNot => OpKind::Not,
                    _ => OpKind::Invert,
                };
                let ty = self.ast.node(operand).return_type;
                let node = self.ast.create(op_tok.loc, NodeData::UnaryOpExpr { op_kind, operand });
                self.ast.set_return_type(node, ty);
                node
            }
            TokenKind::OpInc | TokenKind::OpDec => {
                let op_tok = self.fwd();
                let target = self.parse_primary(limit);
                let ty = self.ast.node(target).return_type;
                let node = self.ast.create(
                    op_tok.loc,
                    NodeData::IncDecOpExpr {
                        target,
                        increment: op_tok.kind == TokenKind::OpInc,
                        prefix: true,
                    },
                );
                self.ast.set_return_type(node, ty);
                node
            }
            TokenKind::Ident => self.parse_ident_primary(limit),
            _ => {
                self.diags.error(loc, format!("unexpected token {} in expression", self.kind().as_str()));
                let node = self.make_const_error(loc);
                self.fwd();
                node
            }
        }
    }

    fn parse_ident_primary(&mut self, limit: usize) -> NodeId {
        let tok = self.fwd();
        let name = self.ident_text(tok);

        if self.kind() == TokenKind::LParen {
            // constructor cast `type(args...)`, function call, or intrinsic
            if let Some(ty) = self.try_parse_type_name(&name) {
                let args = self.parse_arg_list();
                return self.build_constructor(tok.loc, ty, args);
            }
            let args = self.parse_arg_list();
            let node = self.resolve_call(tok.loc, &name, args);
            return self.parse_postfix(node, limit);
        }

        let Some(decl) = self.lookup_var(&name) else {
            self.diags.error(tok.loc, format!("use of undeclared identifier `{name}`"));
            return self.make_const_error(tok.loc);
        };
        let ty = match &self.ast.node(decl).data {
            NodeData::VarDecl(vd) => Some(vd.ty),
            _ => None,
        };
        let node = self.ast.create(tok.loc, NodeData::DeclRefExpr { decl });
        self.ast.set_return_type(node, ty);
        self.parse_postfix(node, limit)
    }

    fn parse_arg_list(&mut self) -> Vec<NodeId> {
        self.fwd(); // (
        let mut args = Vec::new();
        if self.kind() != TokenKind::RParen {
            loop {
                let comma_or_close = self.scan_to_arg_boundary();
                let arg = self.parse_expr_span(self.pos, comma_or_close);
                args.push(arg);
                self.pos = comma_or_close;
                if self.kind() == TokenKind::Comma {
                    self.fwd();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen);
        args
    }

    fn scan_to_arg_boundary(&self) -> usize {
        let mut depth = 0i32;
        let mut i = self.pos;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => {
                    if depth == 0 {
                        return i;
                    }
                    depth -= 1;
                }
                TokenKind::Comma if depth == 0 => return i,
                TokenKind::Eof => return i,
                _ => {}
            }
            i += 1;
        }
        i
    }

    /// `type(args...)`: flattens each argument down to scalar components of
    /// `ty`'s element type and concatenates them, the way the original
    /// constructor folding does (a vector argument contributes one item per
    /// component, a scalar argument contributes one item), then checks the
    /// total against `ty`'s component count. Casting a whole argument to
    /// `ty` itself (as opposed to its element type) would silently broadcast
    /// every scalar argument up to the full target width instead of filling
    /// one slot each.
    fn build_constructor(&mut self, loc: SourceLocation, ty: TypeId, args: Vec<NodeId>) -> NodeId {
        use crate::types::Type;

        let ty_data = self.ast.types.get(ty).clone();
        let elem_scalar = match &ty_data {
            Type::Scalar(s) => *s,
            Type::Vector(sub, _) | Type::Matrix(sub, _, _) => match self.ast.types.get(*sub) {
                Type::Scalar(s) => *s,
                _ => Scalar::Float32,
            },
            _ => Scalar::Float32,
        };
        let elem_ty = self.ast.types.scalar(elem_scalar);
        let target_width = ty_data.element_count();

        let mut items = Vec::with_capacity(target_width as usize);
        for a in args {
            let a_ty = self.ast.node(a).return_type;
            let a_width = a_ty.map(|t| self.ast.types.get(t).element_count()).unwrap_or(1);
            let is_vector = a_ty.is_some_and(|t| matches!(self.ast.types.get(t), Type::Vector(..)));

            if a_width == 1 {
                items.push(self.insert_cast_if_needed(a, elem_ty));
            } else if is_vector {
                for i in 0..a_width {
                    let mut components = [0u8; 4];
                    components[0] = i as u8;
                    let comp = self.ast.create(
                        loc,
                        NodeData::MemberExpr { base: a, member: MemberRef::Swizzle { components, count: 1 } },
                    );
                    self.ast.set_return_type(comp, Some(elem_ty));
                    items.push(comp);
                }
            } else {
                self.diags.error(loc, "this constructor argument cannot be broken into scalar components");
                return self.make_const_error(loc);
            }
        }

        if items.len() as u32 != target_width {
            self.diags.error(loc, format!("constructor expects {target_width} component(s), found {}", items.len()));
            return self.make_const_error(loc);
        }

        let node = self.ast.create(loc, NodeData::InitListExpr { items });
        self.ast.set_return_type(node, Some(ty));
        node
    }

    /// Overload resolution against the built-in intrinsic table and user
    /// functions, spec.md section 4.4 "Overload resolution".
    fn resolve_call(&mut self, loc: SourceLocation, name: &str, args: Vec<NodeId>) -> NodeId {
        let arg_types: Vec<TypeId> = args
            .iter()
            .map(|a| self.ast.node(*a).return_type.unwrap_or(self.ast.types.void()))
            .collect();

        let mut candidates: Vec<(u32, TypeId, Option<OpKind>, Option<NodeId>, Vec<TypeId>)> = Vec::new();

        if let Some(sigs) = self.builtins.lookup(name) {
            for sig in sigs.to_vec() {
                if let Some(cost) = match_factor(&self.ast.types, &sig.params, &arg_types) {
                    candidates.push((cost, sig.return_type, Some(sig.op_kind), None, sig.params.clone()));
                }
            }
        }
        if let Some(overloads) = self.functions.get(name).cloned() {
            for func_id in overloads {
                let (ret_ty, param_types) = match &self.ast.node(func_id).data {
                    NodeData::Function(f) => {
                        let params: Vec<TypeId> = f
                            .args
                            .iter()
                            .map(|a| match &self.ast.node(*a).data {
                                NodeData::VarDecl(vd) => vd.ty,
                                _ => self.ast.types.void(),
                            })
                            .collect();
                        (f.return_type, params)
                    }
                    _ => continue,
                };
                if let Some(cost) = match_factor(&self.ast.types, &param_types, &arg_types) {
                    candidates.push((cost, ret_ty, None, Some(func_id), param_types));
                }
            }
        }

        if candidates.is_empty() {
            self.diags.error(loc, format!("no matching overload for call to `{name}`"));
            return self.make_const_error(loc);
        }
        let min_cost = candidates.iter().map(|c| c.0).min().unwrap();
        let winners: Vec<_> = candidates.iter().filter(|c| c.0 == min_cost).collect();
        if winners.len() > 1 {
            self.diags.error(loc, format!("ambiguous call to `{name}`"));
            return self.make_const_error(loc);
        }
        let (_, ret_ty, op_kind, resolved_func, params) = winners[0].clone();

        let casted_args: Vec<NodeId> = args
            .into_iter()
            .zip(params)
            .map(|(a, p)| self.insert_cast_if_needed(a, p))
            .collect();

        let node = self.ast.create(
            loc,
            NodeData::OpExpr {
                op_kind: op_kind.unwrap_or(OpKind::FunctionCall),
                resolved_func,
                args: casted_args,
            },
        );
        self.ast.set_return_type(node, Some(ret_ty));
        node
    }

    fn parse_postfix(&mut self, mut node: NodeId, limit: usize) -> NodeId {
        loop {
            match self.kind() {
                TokenKind::OpMember if self.pos < limit => {
                    let loc = self.loc();
                    self.fwd();
                    let member_tok = self.cur();
                    if !self.expect_ident() {
                        break;
                    }
                    let member_name = self.ident_text(member_tok);
                    node = self.build_member_access(loc, node, &member_name);
                }
                TokenKind::LBracket if self.pos < limit => {
                    let loc = self.loc();
                    self.fwd();
                    let end = self.scan_to(TokenKind::RBracket);
                    let index = self.parse_expr_span(self.pos, end);
                    self.pos = end;
                    self.expect(TokenKind::RBracket);
                    node = self.build_index(loc, node, index);
                }
                TokenKind::OpInc | TokenKind::OpDec if self.pos < limit => {
                    let op_tok = self.fwd();
                    let ty = self.ast.node(node).return_type;
                    let new_node = self.ast.create(
                        op_tok.loc,
                        NodeData::IncDecOpExpr {
                            target: node,
                            increment: op_tok.kind == TokenKind::OpInc,
                            prefix: false,
                        },
                    );
                    self.ast.set_return_type(new_node, ty);
                    node = new_node;
                }
                _ => break,
            }
        }
        node
    }

    /// Distinguishes a vector swizzle (letters drawn from one of `xyzw` /
    /// `rgba`, length 1..4) from a struct member, spec.md section 4.4 step
    /// 4.
    fn build_member_access(&mut self, loc: SourceLocation, base: NodeId, member: &str) -> NodeId {
        let base_ty = self.ast.node(base).return_type;
        let Some(base_ty) = base_ty else {
            self.diags.error(loc, "member access on expression with unknown type");
            return self.make_const_error(loc);
        };

        if let crate::types::Type::Vector(sub, width) = self.ast.types.get(base_ty).clone() {
            if let Some(components) = parse_swizzle(member, width) {
                let count = components.len() as u8;
                let mut arr = [0u8; 4];
                arr[..components.len()].copy_from_slice(&components);
                let result_ty = if count == 1 {
                    sub
                } else {
                    self.ast.types.get_vector_type(
                        match self.ast.types.get(sub) {
                            crate::types::Type::Scalar(s) => *s,
                            _ => Scalar::Float32,
                        },
                        count,
                    )
                };
                let node = self.ast.create(
                    loc,
                    NodeData::MemberExpr {
                        base,
                        member: MemberRef::Swizzle { components: arr, count },
                    },
                );
                self.ast.set_return_type(node, Some(result_ty));
                return node;
            }
            self.diags.error(loc, format!("swizzle `{member}` out of range for a {width}-component vector"));
            return self.make_const_error(loc);
        }

        if let crate::types::Type::Structure(_, members) = self.ast.types.get(base_ty).clone() {
            if let Some(idx) = members.iter().position(|m| m.name == member) {
                let node = self.ast.create(
                    loc,
                    NodeData::MemberExpr {
                        base,
                        member: MemberRef::StructField(idx as u32),
                    },
                );
                self.ast.set_return_type(node, Some(members[idx].ty));
                return node;
            }
        }
        self.diags.error(loc, format!("no member `{member}` on this type"));
        self.make_const_error(loc)
    }

    fn build_index(&mut self, loc: SourceLocation, base: NodeId, index: NodeId) -> NodeId {
        let base_ty = self.ast.node(base).return_type;
        let index_ty = self.ast.node(index).return_type;
        let elem_ty = match base_ty.map(|t| self.ast.types.get(t).clone()) {
            Some(crate::types::Type::Vector(sub, _)) => Some(sub),
            Some(crate::types::Type::Array(sub, _)) => Some(sub),
            Some(crate::types::Type::Matrix(sub, _, cols)) => Some(self.ast.types.get_vector_type(
                match self.ast.types.get(sub) {
                    crate::types::Type::Scalar(s) => *s,
                    _ => Scalar::Float32,
                },
                cols,
            )),
            _ => {
                self.diags.error(loc, "index into non-indexable type");
                None
            }
        };
        let is_integral = index_ty.is_some_and(|t| matches!(self.ast.types.get(t), crate::types::Type::Scalar(Scalar::Int32 | Scalar::UInt32)));
        if !is_integral {
            self.diags.error(loc, "index expression must be integral");
        }
        let node = self.ast.create(loc, NodeData::IndexExpr { base, index });
        self.ast.set_return_type(node, elem_ty);
        node
    }

    fn insert_cast_if_needed(&mut self, expr: NodeId, target: TypeId) -> NodeId {
        let from = self.ast.node(expr).return_type;
        match from {
            Some(f) if f == target => expr,
            Some(f) if self.ast.types.can_cast(f, target, false) => {
                let loc = self.ast.loc(expr);
                let node = self.ast.create(loc, NodeData::CastExpr { value: expr, explicit: false });
                self.ast.set_return_type(node, Some(target));
                node
            }
            Some(f) => {
                let loc = self.ast.loc(expr);
                self.diags.error(loc, format!("cannot convert `{}` to `{}`", self.ast.types.get(f), self.ast.types.get(target)));
                expr
            }
            None => expr,
        }
    }
}

fn split_leading_alpha(s: &str) -> (&str, &str) {
    let idx = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    (&s[..idx], &s[idx..])
}

fn split_trailing_digits(s: &str) -> (&str, &str) {
    let idx = s.rfind(|c: char| !c.is_ascii_digit()).map(|i| i + 1).unwrap_or(0);
    (&s[..idx], &s[idx..])
}

fn parse_vec_suffix(rest: &str) -> Option<(u8,)> {
    let w: u8 = rest.parse().ok()?;
    (1..=4).contains(&w).then_some((w,))
}

fn parse_mat_suffix(rest: &str) -> Option<(u8, u8)> {
    let (r, c) = rest.split_once('x')?;
    let r: u8 = r.parse().ok()?;
    let c: u8 = c.parse().ok()?;
    ((1..=4).contains(&r) && (1..=4).contains(&c)).then_some((r, c))
}

fn parse_swizzle(name: &str, width: u8) -> Option<Vec<u8>> {
    const XYZW: &[u8] = b"xyzw";
    const RGBA: &[u8] = b"rgba";
    if name.is_empty() || name.len() > 4 {
        return None;
    }
    let bytes = name.as_bytes();
    let set = if XYZW.contains(&bytes[0]) {
        XYZW
    } else if RGBA.contains(&bytes[0]) {
        RGBA
    } else {
        return None;
    };
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        let idx = set.iter().position(|&c| c == b)?;
        if idx as u8 >= width {
            return None;
        }
        out.push(idx as u8);
    }
    Some(out)
}

fn assign_op_kind(kind: TokenKind) -> Option<OpKind> {
    use TokenKind::*;
    Some(match kind {
        OpAddEq => OpKind::Add,
        OpSubEq => OpKind::Subtract,
        OpMulEq => OpKind::Multiply,
        OpDivEq => OpKind::Divide,
        OpModEq => OpKind::Modulus,
        OpAndEq => OpKind::BitAnd,
        OpOrEq => OpKind::BitOr,
        OpXorEq => OpKind::BitXor,
        OpLshEq => OpKind::Shl,
        OpRshEq => OpKind::Shr,
        OpAssign => return None,
        _ => return None,
    })
}

fn binary_op_kind(kind: TokenKind) -> OpKind {
    use TokenKind::*;
    match kind {
        OpAdd => OpKind::Add,
        OpSub => OpKind::Subtract,
        OpMul => OpKind::Multiply,
        OpDiv => OpKind::Divide,
        OpMod => OpKind::Modulus,
        OpAnd => OpKind::BitAnd,
        OpOr => OpKind::BitOr,
        OpXor => OpKind::BitXor,
        OpLsh => OpKind::Shl,
        OpRsh => OpKind::Shr,
        OpLogicalAnd => OpKind::LogicalAnd,
        OpLogicalOr => OpKind::LogicalOr,
        OpEq => OpKind::Equal,
        OpNEq => OpKind::NotEqual,
        OpLess => OpKind::Less,
        OpLEq => OpKind::LessEq,
        OpGreater => OpKind::Greater,
        OpGEq => OpKind::GreaterEq,
        _ => OpKind::Add,
    }
}

/// `GetSplitScore` equivalent: lower score binds looser. Assignment
/// operators are handled by the caller before this table is consulted.
fn split_score(kind: TokenKind) -> Option<i64> {
    use TokenKind::*;
    Some(match kind {
        OpLogicalOr => 1,
        OpLogicalAnd => 2,
        OpOr => 3,
        OpXor => 4,
        OpAnd => 5,
        OpEq | OpNEq => 6,
        OpLess | OpGreater | OpLEq | OpGEq => 7,
        OpLsh | OpRsh => 8,
        OpAdd | OpSub => 9,
        OpMul | OpDiv | OpMod => 10,
        _ => return None,
    })
}

struct Split {
    pos: usize,
}

/// Scans for an assignment operator at depth 0: lowest precedence of all,
/// right-associative, so on a chain (`a = b = c`) the rightmost occurrence
/// becomes the split root (`SPLITSCORE_RTLASSOC` bias) — `a = (b = c)`.
fn find_top_level_assign(tokens: &[Token]) -> Option<usize> {
    let mut depth = 0i32;
    let mut pos = None;
    for (i, t) in tokens.iter().enumerate() {
        match t.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => depth -= 1,
            k if depth == 0 && k.is_assign() && i != 0 => pos = Some(i),
            _ => {}
        }
    }
    pos
}

/// `GetSplitScore`/`FindBestSplit` for the remaining left-associative
/// binary operator table (assignment and ternary are resolved by the
/// caller first, since they bind looser than anything here).
fn find_best_split(tokens: &[Token]) -> Option<Split> {
    let mut depth = 0i32;
    let mut best: Option<(i64, usize)> = None;

    for (i, t) in tokens.iter().enumerate() {
        match t.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => depth -= 1,
            _ if depth != 0 => {}
            k => {
                if i == 0 {
                    continue; // leading unary operator, not a split point
                }
                if let Some(score) = split_score(k) {
                    // left-assoc: the rightmost occurrence at the lowest
                    // precedence wins, so the tree nests leftward
                    // (`a - b - c` -> `(a - b) - c`). A tie keeps the later
                    // position; only a strictly higher score is rejected.
                    match best {
                        Some((b, _)) if score > b => {}
                        _ => best = Some((score, i)),
                    }
                }
            }
        }
    }

    best.map(|(_, pos)| Split { pos })
}

/// Finds a top-level `?` and its matching `:`, accounting for nested
/// ternaries and parenthesis/bracket depth.
fn find_top_level_ternary(tokens: &[Token]) -> Option<(usize, usize)> {
    let mut depth = 0i32;
    let mut q_pos = None;
    let mut ternary_depth = 0i32;
    for (i, t) in tokens.iter().enumerate() {
        match t.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => depth -= 1,
            TokenKind::OpTernary if depth == 0 => {
                if q_pos.is_none() {
                    q_pos = Some(i);
                }
                ternary_depth += 1;
            }
            TokenKind::Colon if depth == 0 && ternary_depth > 0 => {
                ternary_depth -= 1;
                if ternary_depth == 0 {
                    return Some((q_pos.unwrap(), i));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;

    fn parse(src: &str, stage: Stage, entry: &str) -> (Ast, DiagnosticSink) {
        let mut pool = TokenPool::new();
        let mut diags = DiagnosticSink::new();
        let mut toks = crate::lexer::lex(src, 0, &mut pool, &mut diags);
        let mut pp = crate::preprocessor::Preprocessor::new(&mut pool, &[]);
        struct NoInc;
        impl crate::preprocessor::FileLoader for NoInc {
            fn load(&mut self, p: &str, _f: u32) -> Result<(u32, String), String> {
                Err(format!("no includes in test: {p}"))
            }
        }
        if let Some(last) = toks.last() {
            if last.kind == TokenKind::Eof {
                toks.pop();
            }
        }
        let mut expanded = pp.process(toks, 0, &mut NoInc, &mut diags);
        expanded.push(Token::new(TokenKind::Eof, SourceLocation::BAD, 0));

        let config = CompilerConfig::new(entry, stage, OutputFormat::Glsl140);
        let mut diags2 = DiagnosticSink::new();
        let ast = {
            let mut parser = Parser::new(expanded, &pool, &config, &mut diags2);
            parser.parse_program();
            parser.ast
        };
        (ast, diags2)
    }

    #[test]
    fn simple_entry_point_compiles_without_diagnostics() {
        let (ast, diags) = parse(
            "float4 main(float2 uv : TEXCOORD0) : SV_Target { return float4(uv, 0.0, 1.0); }",
            Stage::Pixel,
            "main",
        );
        assert!(!diags.has_errors(), "{:?}", diags.records());
        assert!(ast.entry_point.is_some());
    }

    #[test]
    fn missing_entry_point_is_diagnosed() {
        let (_ast, diags) = parse("float4 other() { return float4(0.0,0.0,0.0,0.0); }", Stage::Pixel, "main");
        assert!(diags.has_errors());
    }

    #[test]
    fn duplicate_entry_point_is_diagnosed() {
        let (_ast, diags) = parse(
            "float4 main() : SV_Target { return float4(0,0,0,0); } float4 main() : SV_Target { return float4(0,0,0,0); }",
            Stage::Pixel,
            "main",
        );
        assert!(diags.has_errors());
    }

    #[test]
    fn ambiguous_overload_is_diagnosed() {
        let (_ast, diags) = parse(
            "float f(float a, int b) { return a; } float f(int a, float b) { return b; } \
             float4 main() : SV_Target { float x = f(1,1); return float4(x,x,x,x); }",
            Stage::Pixel,
            "main",
        );
        assert!(diags.has_errors());
    }

    #[test]
    fn unambiguous_overload_resolves() {
        let (_ast, diags) = parse(
            "float f(float a, int b) { return a; } float f(int a, float b) { return b; } \
             float4 main() : SV_Target { float x = f(1.0,1); return float4(x,x,x,x); }",
            Stage::Pixel,
            "main",
        );
        assert!(!diags.has_errors(), "{:?}", diags.records());
    }

    #[test]
    fn undeclared_identifier_is_diagnosed() {
        let (_ast, diags) = parse("float4 main() : SV_Target { return float4(q,0,0,0); }", Stage::Pixel, "main");
        assert!(diags.has_errors());
    }

    #[test]
    fn swizzle_on_vector_resolves_component_type() {
        let (ast, diags) = parse(
            "float4 main(float4 v : TEXCOORD0) : SV_Target { float x = v.x; return float4(x,x,x,x); }",
            Stage::Pixel,
            "main",
        );
        assert!(!diags.has_errors(), "{:?}", diags.records());
        let _ = ast;
    }

    #[test]
    fn struct_member_access_resolves() {
        let (ast, diags) = parse(
            "struct S { float a; float b; }; \
             float main_helper(S s) { return s.b; } \
             float4 main() : SV_Target { S s; s.a = 1.0; s.b = 2.0; float r = main_helper(s); return float4(r,r,r,r); }",
            Stage::Pixel,
            "main",
        );
        assert!(!diags.has_errors(), "{:?}", diags.records());
        let _ = ast;
    }

    #[test]
    fn discard_outside_pixel_stage_is_diagnosed() {
        let (_ast, diags) = parse("void main() { discard; }", Stage::Vertex, "main");
        assert!(diags.has_errors());
    }

    #[test]
    fn find_best_split_keeps_left_associative_grouping() {
        // `10 - 3 - 2`: tying operators at the same precedence must split
        // at the rightmost `-`, so the left operand recurses into `10 - 3`
        // rather than the right operand recursing into `3 - 2`.
        let tok = |k: TokenKind| Token::new(k, SourceLocation::BAD, 0);
        let tokens = vec![
            tok(TokenKind::Int32Lit),
            tok(TokenKind::OpSub),
            tok(TokenKind::Int32Lit),
            tok(TokenKind::OpSub),
            tok(TokenKind::Int32Lit),
        ];
        let split = find_best_split(&tokens).expect("a split point");
        assert_eq!(split.pos, 3, "split must land on the rightmost `-`");
    }

    #[test]
    fn left_associative_subtraction_folds_to_correct_value() {
        let (mut ast, diags) = parse(
            "float4 main() : SV_Target { float x = 10.0 - 3.0 - 2.0; return float4(x,x,x,x); }",
            Stage::Pixel,
            "main",
        );
        assert!(!diags.has_errors(), "{:?}", diags.records());
        crate::constprop::propagate_constants(&mut ast);

        let entry = ast.entry_point.expect("entry point");
        let NodeData::Function(func) = &ast.node(entry).data else { unreachable!() };
        let body = func.body.expect("body");
        let NodeData::BlockStmt { .. } = &ast.node(body).data else { unreachable!() };
        let decl_stmt = ast.children(body).into_iter().next().expect("var decl stmt");
        let NodeData::VarDeclStmt { decl } = &ast.node(decl_stmt).data else { unreachable!() };
        let NodeData::VarDecl(vd) = &ast.node(*decl).data else { unreachable!() };
        let init = vd.initializer.expect("initializer");
        let NodeData::Float32Expr(value) = &ast.node(init).data else {
            panic!("expected a folded float literal, got {:?}", ast.node(init).data)
        };
        assert_eq!(*value, 5.0);
    }

    #[test]
    fn vector_constructor_from_scalars_has_one_component_per_argument() {
        let (ast, diags) = parse(
            "float4 main() : SV_Target { return float4(1.0, 2.0, 3.0, 4.0); }",
            Stage::Pixel,
            "main",
        );
        assert!(!diags.has_errors(), "{:?}", diags.records());
        let entry = ast.entry_point.unwrap();
        let NodeData::Function(func) = &ast.node(entry).data else { unreachable!() };
        let body = func.body.unwrap();
        let ret_stmt = ast.children(body).into_iter().next().unwrap();
        let NodeData::ReturnStmt { value: Some(ctor), .. } = &ast.node(ret_stmt).data else { unreachable!() };
        let NodeData::InitListExpr { items } = &ast.node(*ctor).data else {
            panic!("expected an InitListExpr, got {:?}", ast.node(*ctor).data)
        };
        assert_eq!(items.len(), 4, "one item per scalar argument, not one broadcast-to-vector item each");
    }

    #[test]
    fn vector_constructor_flattens_a_narrower_vector_argument() {
        let (ast, diags) = parse(
            "float4 main(float3 v : TEXCOORD0) : SV_Target { return float4(v, 1.0); }",
            Stage::Pixel,
            "main",
        );
        assert!(!diags.has_errors(), "{:?}", diags.records());
        let entry = ast.entry_point.unwrap();
        let NodeData::Function(func) = &ast.node(entry).data else { unreachable!() };
        let body = func.body.unwrap();
        let ret_stmt = ast.children(body).into_iter().next().unwrap();
        let NodeData::ReturnStmt { value: Some(ctor), .. } = &ast.node(ret_stmt).data else { unreachable!() };
        let NodeData::InitListExpr { items } = &ast.node(*ctor).data else {
            panic!("expected an InitListExpr, got {:?}", ast.node(*ctor).data)
        };
        assert_eq!(items.len(), 4, "a float3 argument contributes 3 components plus the trailing scalar");
    }

    #[test]
    fn constructor_with_wrong_component_count_is_diagnosed() {
        let (_ast, diags) = parse("float4 main() : SV_Target { return float4(1.0, 2.0); }", Stage::Pixel, "main");
        assert!(diags.has_errors());
    }
}
