//! Recursive-descent parser for Brim.
//!
//! The parser consumes the lexer's token stream and builds the AST directly.
//! Brim blocks are indentation-sensitive: a block opens with `:`, its
//! statements must sit on new lines at a strictly greater indent than the
//! enclosing context, and the first statement's indent becomes the block
//! indent that every sibling must match exactly. The parser keeps that
//! context as a stack of indents.
//!
//! Error policy is first-mismatch-fatal: every helper returns
//! `Result<_, Diagnostic>` and the first error aborts the parse.

pub(crate) mod expressions;
pub(crate) mod items;
pub(crate) mod types;

use brim_common::error::{Diagnostic, Result, Stage};
use brim_common::span::Pos;
use brim_common::token::{Token, TokenKind};

use crate::ast::*;

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Stack of enclosing block indents; the module level is indent 0.
    indents: Vec<u32>,
    /// True while parsing the body of a block-form `defer`; control-flow
    /// statements are rejected there, including in nested blocks.
    in_defer_block: bool,
}

/// Parse a whole module from a token stream.
pub(crate) fn parse_module(tokens: Vec<Token>) -> Result<Module> {
    let mut parser = Parser::new(tokens);
    let mut items = Vec::new();

    while parser.has_tok() {
        items.push(parser.parse_item()?);
    }

    Ok(Module { items })
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            indents: vec![0],
            in_defer_block: false,
        }
    }

    // ── Token access ───────────────────────────────────────────────────

    pub(crate) fn err(&self, message: impl Into<String>, pos: Pos) -> Diagnostic {
        Diagnostic::new(Stage::Parse, message, pos)
    }

    fn eof_pos(&self) -> Pos {
        self.tokens.last().map(|t| t.pos).unwrap_or(Pos::START)
    }

    pub(crate) fn has_tok(&self) -> bool {
        self.pos < self.tokens.len()
    }

    pub(crate) fn cur(&self) -> Result<&Token> {
        self.tokens
            .get(self.pos)
            .ok_or_else(|| self.err("unexpected `eof`", self.eof_pos()))
    }

    fn nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    pub(crate) fn cur_indent(&self) -> u32 {
        *self.indents.last().expect("indent stack is never empty")
    }

    pub(crate) fn bump(&mut self) -> Result<Token> {
        let tok = self.cur()?.clone();
        self.pos += 1;
        Ok(tok)
    }

    /// Does the current token match `kind`? A token that starts a new line
    /// only matches when `allow_on_new_line` is set.
    pub(crate) fn at(&self, kind: TokenKind, allow_on_new_line: bool) -> bool {
        match self.tokens.get(self.pos) {
            Some(tok) => tok.kind == kind && (allow_on_new_line || !tok.is_on_new_line),
            None => false,
        }
    }

    pub(crate) fn at_any(&self, kinds: &[TokenKind], allow_on_new_line: bool) -> bool {
        kinds.iter().any(|&k| self.at(k, allow_on_new_line))
    }

    pub(crate) fn expect(&mut self, kind: TokenKind, allow_on_new_line: bool) -> Result<Token> {
        let tok = self.cur()?;

        if tok.kind != kind {
            return Err(self.err(
                format!("expected `{}`, found `{}`", kind.as_str(), tok.kind.as_str()),
                tok.pos,
            ));
        }
        if !allow_on_new_line && tok.is_on_new_line {
            return Err(self.err("unexpected token to be on a new line", tok.pos));
        }

        self.bump()
    }

    pub(crate) fn eat(&mut self, kind: TokenKind, allow_on_new_line: bool) -> Option<Token> {
        if self.at(kind, allow_on_new_line) {
            Some(self.bump().expect("token matched"))
        } else {
            None
        }
    }

    /// `id :` lookahead, used to tell declarations and struct/union
    /// initialisers from plain expressions.
    pub(crate) fn at_id_colon(&self, allow_first_on_new_line: bool) -> bool {
        let Some(first) = self.nth(0) else { return false };
        let Some(second) = self.nth(1) else { return false };

        first.kind == TokenKind::Id
            && (allow_first_on_new_line || !first.is_on_new_line)
            && second.kind == TokenKind::Colon
            && !second.is_on_new_line
    }

    /// `id : <token on the same line>` lookahead for `try name: T = …`.
    fn at_try_var(&self) -> bool {
        self.at_id_colon(false)
            && self.nth(2).map(|t| !t.is_on_new_line).unwrap_or(false)
    }

    /// `.. :` lookahead for an absent `for` step.
    fn at_absent_step(&self) -> bool {
        self.at(TokenKind::DotDot, false)
            && self
                .nth(1)
                .map(|t| t.kind == TokenKind::Colon && !t.is_on_new_line)
                .unwrap_or(false)
    }

    pub(crate) fn ident(&mut self, tok: Token) -> Ident {
        Ident {
            name: tok.text,
            pos: tok.pos,
        }
    }

    pub(crate) fn expect_ident(&mut self, allow_on_new_line: bool) -> Result<Ident> {
        let tok = self.expect(TokenKind::Id, allow_on_new_line)?;
        Ok(self.ident(tok))
    }

    // ── Blocks ─────────────────────────────────────────────────────────

    pub(crate) fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        let mut block = Vec::new();
        self.expect(TokenKind::Colon, false)?;

        let first = self.cur()?;
        if !first.is_on_new_line {
            return Err(self.err("blocks cannot be inlined", first.pos));
        }
        if first.indent <= self.cur_indent() {
            return Err(self.err("invalid indent", first.pos));
        }

        let block_indent = first.indent;
        self.indents.push(block_indent);

        loop {
            let stmt = self.parse_stmt()?;

            if self.in_defer_block {
                self.reject_control_flow_in_defer(&stmt)?;
            }
            block.push(stmt);

            if self.has_tok() {
                let tok = self.cur()?;
                if !tok.is_on_new_line {
                    return Err(self.err(
                        format!("unexpected token `{}` at the end of a statement", tok.kind.as_str()),
                        tok.pos,
                    ));
                }
            }

            if !self.has_tok() || self.cur()?.indent < self.cur_indent() {
                break;
            }
            if self.cur()?.indent > self.cur_indent() {
                return Err(self.err("invalid indent", self.cur()?.pos));
            }
        }

        self.indents.pop();
        Ok(block)
    }

    fn reject_control_flow_in_defer(&self, stmt: &Stmt) -> Result<()> {
        if matches!(
            stmt.kind,
            StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue | StmtKind::Defer { .. }
        ) {
            return Err(self.err("this statement is not allowed here", stmt.pos));
        }
        Ok(())
    }

    /// A statement in inline position (a `for` step or an inline `defer`).
    fn parse_inline_stmt(&mut self) -> Result<Stmt> {
        let stmt = self.parse_stmt()?;

        if matches!(
            stmt.kind,
            StmtKind::Pass
                | StmtKind::If(_)
                | StmtKind::While { .. }
                | StmtKind::For { .. }
                | StmtKind::VarDecl(_)
                | StmtKind::Return(_)
                | StmtKind::Break
                | StmtKind::Continue
                | StmtKind::Defer { .. }
        ) {
            return Err(self.err("this statement is not allowed here", stmt.pos));
        }

        Ok(stmt)
    }

    // ── Statements ─────────────────────────────────────────────────────

    pub(crate) fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.cur()?.kind {
            TokenKind::KwPass => {
                let pos = self.bump()?.pos;
                Ok(Stmt { kind: StmtKind::Pass, pos })
            }
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwReturn => self.parse_return(),
            TokenKind::KwWhile => self.parse_while(),
            TokenKind::KwBreak => {
                let pos = self.bump()?.pos;
                Ok(Stmt { kind: StmtKind::Break, pos })
            }
            TokenKind::KwContinue => {
                let pos = self.bump()?.pos;
                Ok(Stmt { kind: StmtKind::Continue, pos })
            }
            TokenKind::KwFor => self.parse_for(),
            TokenKind::KwTry => self.parse_try(),
            TokenKind::KwDefer => self.parse_defer(),
            TokenKind::KwMatch => self.parse_match(),
            _ => self.parse_simple_stmt(),
        }
    }

    /// Variable declaration, assignment, discard, or expression statement.
    fn parse_simple_stmt(&mut self) -> Result<Stmt> {
        if self.at_id_colon(true) {
            let decl = self.parse_var_decl()?;
            let pos = decl.name.pos;
            return Ok(Stmt { kind: StmtKind::VarDecl(decl), pos });
        }

        let target = if self.at(TokenKind::DotDot, true) {
            let tok = self.bump()?;
            (AssignTarget::Discard, tok.pos)
        } else {
            let expr = self.parse_expr(true)?;
            let pos = expr.pos;
            (AssignTarget::Expr(expr), pos)
        };
        let (target, target_pos) = target;

        let op = if self.at(TokenKind::Eq, false) {
            Some(AssignOp::Assign)
        } else if self.at(TokenKind::PlusEq, false) {
            Some(AssignOp::AddAssign)
        } else if self.at(TokenKind::MinusEq, false) {
            Some(AssignOp::SubAssign)
        } else if self.at(TokenKind::StarEq, false) {
            Some(AssignOp::MulAssign)
        } else {
            None
        };

        match op {
            Some(op) => {
                let op_pos = self.bump()?.pos;
                let value = self.parse_expr(false)?;
                Ok(Stmt {
                    kind: StmtKind::Assign { target, op, value },
                    pos: op_pos,
                })
            }
            None => match target {
                AssignTarget::Expr(expr) => {
                    let pos = expr.pos;
                    Ok(Stmt { kind: StmtKind::Expr(expr), pos })
                }
                AssignTarget::Discard => {
                    Err(self.err("expected assignment operator after `..`", target_pos))
                }
            },
        }
    }

    pub(crate) fn parse_var_decl(&mut self) -> Result<VarDecl> {
        let name = self.expect_ident(true)?;
        self.expect(TokenKind::Colon, false)?;
        let ty = self.parse_type()?;
        self.expect(TokenKind::Eq, false)?;
        let init = self.parse_expr(false)?;

        Ok(VarDecl { name, ty, init })
    }

    fn parse_return(&mut self) -> Result<Stmt> {
        let pos = self.bump()?.pos;

        let expr = if self.has_tok() && !self.cur()?.is_on_new_line {
            Some(self.parse_expr(false)?)
        } else {
            None
        };

        Ok(Stmt { kind: StmtKind::Return(expr), pos })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let mut if_branch: Option<CondBranch> = None;
        let mut elif_branches = Vec::new();
        let mut else_body = None;

        while self.at_any(
            &[TokenKind::KwIf, TokenKind::KwElif, TokenKind::KwElse],
            true,
        ) {
            let tok = self.cur()?;
            if tok.indent > self.cur_indent() {
                return Err(self.err("invalid indent", tok.pos));
            }
            if tok.indent < self.cur_indent() {
                break;
            }

            let branch_tok = self.bump()?;
            match branch_tok.kind {
                TokenKind::KwIf => {
                    if if_branch.is_some() {
                        // A fresh `if` statement at the same indent.
                        self.pos -= 1;
                        break;
                    }
                    let cond = self.parse_expr(false)?;
                    let body = self.parse_block()?;
                    if_branch = Some(CondBranch { cond, body, pos: branch_tok.pos });
                }
                TokenKind::KwElif => {
                    let cond = self.parse_expr(false)?;
                    let body = self.parse_block()?;
                    elif_branches.push(CondBranch { cond, body, pos: branch_tok.pos });
                }
                TokenKind::KwElse => {
                    else_body = Some(self.parse_block()?);
                    break;
                }
                _ => unreachable!("at_any matched an if/elif/else token"),
            }
        }

        let if_branch = if_branch.expect("parse_if is entered on an `if` token");
        let pos = if_branch.pos;

        Ok(Stmt {
            kind: StmtKind::If(IfStmt { if_branch, elif_branches, else_body }),
            pos,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        let pos = self.bump()?.pos;
        let cond = self.parse_expr(false)?;
        let body = self.parse_block()?;

        Ok(Stmt { kind: StmtKind::While { cond, body }, pos })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let pos = self.bump()?.pos;

        let init = if self.eat(TokenKind::DotDot, false).is_some() {
            None
        } else {
            Some(Box::new(self.parse_var_decl()?))
        };
        self.expect(TokenKind::Comma, false)?;

        let cond = self.parse_expr(false)?;
        self.expect(TokenKind::Comma, false)?;

        let step = if self.at_absent_step() {
            self.bump()?;
            None
        } else {
            Some(Box::new(self.parse_inline_stmt()?))
        };

        let body = self.parse_block()?;

        Ok(Stmt {
            kind: StmtKind::For { init, cond, step, body },
            pos,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt> {
        let pos = self.bump()?.pos;

        let var = if self.at_try_var() {
            let name = self.expect_ident(false)?;
            self.expect(TokenKind::Colon, false)?;
            let ty = self.parse_type()?;
            self.expect(TokenKind::Eq, false)?;
            Some((name, ty))
        } else {
            None
        };

        let expr = self.parse_expr(false)?;
        let body = if self.at(TokenKind::Colon, false) {
            Some(self.parse_block()?)
        } else {
            None
        };

        if var.is_some() && body.is_none() {
            return Err(self.err("var is not allowed when the try statement has no block", pos));
        }

        Ok(Stmt { kind: StmtKind::Try { var, expr, body }, pos })
    }

    fn parse_defer(&mut self) -> Result<Stmt> {
        let pos = self.bump()?.pos;

        let (body, is_block) = if self.at(TokenKind::Colon, false) {
            let was_in_defer = std::mem::replace(&mut self.in_defer_block, true);
            let body = self.parse_block();
            self.in_defer_block = was_in_defer;
            (body?, true)
        } else {
            (vec![self.parse_inline_stmt()?], false)
        };

        Ok(Stmt { kind: StmtKind::Defer { body, is_block }, pos })
    }

    fn parse_case(&mut self) -> Result<(Option<CaseBranch>, Option<Vec<Stmt>>)> {
        if self.at(TokenKind::KwElse, true) {
            self.bump()?;
            let body = self.parse_block()?;
            return Ok((None, Some(body)));
        }

        let pos = self.expect(TokenKind::KwCase, true)?.pos;
        let mut exprs = Vec::new();

        loop {
            exprs.push(self.parse_expr(true)?);
            if self.eat(TokenKind::Comma, false).is_none() {
                break;
            }
        }

        let body = self.parse_block()?;
        Ok((Some(CaseBranch { exprs, body, pos }), None))
    }

    fn parse_match(&mut self) -> Result<Stmt> {
        let pos = self.bump()?.pos;
        let scrutinee = self.parse_expr(false)?;

        let mut cases = Vec::new();
        let mut else_body = None;

        self.expect(TokenKind::Colon, false)?;

        let first = self.cur()?;
        let (first_pos, first_indent, first_on_new_line) =
            (first.pos, first.indent, first.is_on_new_line);
        if !first_on_new_line {
            return Err(self.err("match cases cannot be inlined", first_pos));
        }
        if first_indent <= self.cur_indent() {
            return Err(self.err("invalid indent", first_pos));
        }

        self.indents.push(first_indent);

        loop {
            let (case, els) = self.parse_case()?;

            if let Some(els) = els {
                else_body = Some(els);
                break;
            }
            cases.push(case.expect("parse_case returns a case or an else body"));

            if !self.has_tok() || self.cur()?.indent < self.cur_indent() {
                break;
            }
            if self.cur()?.indent > self.cur_indent() {
                return Err(self.err("invalid indent", self.cur()?.pos));
            }
        }

        self.indents.pop();

        if cases.is_empty() {
            return Err(self.err("match must have at least one case branch", pos));
        }

        Ok(Stmt {
            kind: StmtKind::Match { scrutinee, cases, else_body },
            pos,
        })
    }
}
