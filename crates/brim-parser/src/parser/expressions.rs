//! Expression parsing: precedence climbing plus the postfix suffix loop.

use brim_common::span::Pos;
use brim_common::token::TokenKind;

use crate::ast::*;
use crate::parser::Parser;

use brim_common::error::Result;

impl Parser {
    /// Parse an expression, including the trailing inline-if form.
    ///
    /// `allow_left_on_new_line` permits the expression to start on a fresh
    /// line (argument lists, array elements); statements at block level pass
    /// `true` as well since their first token opens the line.
    pub(crate) fn parse_expr(&mut self, allow_left_on_new_line: bool) -> Result<Expr> {
        if !allow_left_on_new_line {
            let tok = self.cur()?;
            if tok.is_on_new_line {
                return Err(self.err("expression not allowed to be on a new line", tok.pos));
            }
        }

        let mut expr = self.parse_or()?;

        while self.at(TokenKind::KwIf, false) {
            expr = self.parse_inline_if(expr)?;
        }

        Ok(expr)
    }

    // ── Precedence ladder, lowest binding first ────────────────────────

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;

        while self.at(TokenKind::KwOr, false) {
            let pos = self.bump()?.pos;
            let right = self.parse_and()?;
            left = bin(BinOp::Or, left, right, pos);
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_cmp()?;

        while self.at(TokenKind::KwAnd, false) {
            let pos = self.bump()?.pos;
            let right = self.parse_cmp()?;
            left = bin(BinOp::And, left, right, pos);
        }

        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let mut left = self.parse_add()?;

        loop {
            let op = if self.at(TokenKind::EqEq, false) {
                BinOp::Eq
            } else if self.at(TokenKind::NotEq, false) {
                BinOp::Ne
            } else if self.at(TokenKind::Lt, false) {
                BinOp::Lt
            } else if self.at(TokenKind::Gt, false) {
                BinOp::Gt
            } else if self.at(TokenKind::LtEq, false) {
                BinOp::Le
            } else if self.at(TokenKind::GtEq, false) {
                BinOp::Ge
            } else {
                return Ok(left);
            };

            let pos = self.bump()?.pos;
            let right = self.parse_add()?;
            left = bin(op, left, right, pos);
        }
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut left = self.parse_mul()?;

        loop {
            let op = if self.at(TokenKind::Plus, false) {
                BinOp::Add
            } else if self.at(TokenKind::Minus, false) {
                BinOp::Sub
            } else {
                return Ok(left);
            };

            let pos = self.bump()?.pos;
            let right = self.parse_mul()?;
            left = bin(op, left, right, pos);
        }
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;

        loop {
            let op = if self.at(TokenKind::Star, false) {
                BinOp::Mul
            } else if self.at(TokenKind::Slash, false) {
                BinOp::Div
            } else if self.at(TokenKind::Percent, false) {
                BinOp::Rem
            } else {
                return Ok(left);
            };

            let pos = self.bump()?.pos;
            let right = self.parse_term()?;
            left = bin(op, left, right, pos);
        }
    }

    // ── Terms and postfix suffixes ─────────────────────────────────────

    fn parse_term(&mut self) -> Result<Expr> {
        let tok = self.bump()?;

        let mut term = match tok.kind {
            TokenKind::Num => Expr { kind: ExprKind::Num(tok.text), pos: tok.pos },
            TokenKind::FNum => Expr { kind: ExprKind::FNum(tok.text), pos: tok.pos },
            TokenKind::Str => Expr { kind: ExprKind::Str(tok.text), pos: tok.pos },
            TokenKind::Chr => {
                let c = tok.text.chars().next().expect("lexer guarantees one char");
                Expr { kind: ExprKind::Chr(c), pos: tok.pos }
            }
            TokenKind::Id => Expr { kind: ExprKind::Id(tok.text), pos: tok.pos },
            TokenKind::KwTrue => Expr { kind: ExprKind::True, pos: tok.pos },
            TokenKind::KwFalse => Expr { kind: ExprKind::False, pos: tok.pos },
            TokenKind::KwNone => Expr { kind: ExprKind::NoneLit, pos: tok.pos },
            TokenKind::KwUndefined => Expr { kind: ExprKind::Undefined, pos: tok.pos },

            TokenKind::Dot => {
                let id = self.expect_ident(false)?;
                Expr { kind: ExprKind::EnumLit(id), pos: tok.pos }
            }

            TokenKind::LBracket => {
                if self.at_id_colon(true) {
                    self.parse_struct_init(tok.pos, true)?
                } else {
                    self.parse_array_init(tok.pos)?
                }
            }

            TokenKind::KwCast => self.parse_cast(None, tok.pos, false)?,

            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::KwNot
            | TokenKind::KwRef
            | TokenKind::KwMut
            | TokenKind::Star => {
                let op = unary_op(tok.kind);
                let expr = self.parse_term()?;
                Expr {
                    kind: ExprKind::Unary { op, expr: Box::new(expr), chained: false },
                    pos: tok.pos,
                }
            }

            TokenKind::LParen => {
                if self.at_id_colon(true) {
                    self.parse_struct_init(tok.pos, false)?
                } else {
                    let inner = self.parse_expr(true)?;
                    self.expect(TokenKind::RParen, true)?;
                    inner
                }
            }

            _ => return Err(self.err("invalid term in expression", tok.pos)),
        };

        // Postfix suffixes never cross a newline.
        while self.has_tok()
            && !self.cur()?.is_on_new_line
            && self.at_any(
                &[TokenKind::Dot, TokenKind::LBracket, TokenKind::LParen, TokenKind::Bang],
                true,
            )
        {
            let kind = self.cur()?.kind;

            if kind == TokenKind::LBracket {
                let pos = self.bump()?.pos;
                let index = self.parse_expr(false)?;
                self.expect(TokenKind::RBracket, false)?;
                term = Expr {
                    kind: ExprKind::Index { base: Box::new(term), index: Box::new(index) },
                    pos,
                };
                continue;
            }

            if kind == TokenKind::Bang || kind == TokenKind::LParen {
                if !matches!(term.kind, ExprKind::Id(_) | ExprKind::Dot { .. }) {
                    return Err(
                        self.err("expected id, to invoke pointers use `Invoke!()`", term.pos)
                    );
                }
                let internal = self.eat(TokenKind::Bang, false).is_some();
                term = self.parse_call(term, internal)?;
                continue;
            }

            let dot = self.bump()?;

            if self.at_any(
                &[TokenKind::KwMut, TokenKind::KwRef, TokenKind::Star, TokenKind::KwCast],
                false,
            ) {
                let op_tok = self.bump()?;
                term = if op_tok.kind == TokenKind::KwCast {
                    self.parse_cast(Some(term), op_tok.pos, true)?
                } else {
                    Expr {
                        kind: ExprKind::Unary {
                            op: unary_op(op_tok.kind),
                            expr: Box::new(term),
                            chained: true,
                        },
                        pos: dot.pos,
                    }
                };
                continue;
            }

            let field = self.expect_ident(false)?;
            term = Expr {
                kind: ExprKind::Dot { base: Box::new(term), field },
                pos: dot.pos,
            };
        }

        // A chained form must actually chain; as a final term the prefix
        // spelling is required.
        if let ExprKind::Unary { op, chained: true, .. } = &term.kind {
            return Err(self.err(
                format!(
                    "please use `{} expr` instead, `expr.{}` is reserved for chaining",
                    op.as_str(),
                    op.as_str()
                ),
                term.pos,
            ));
        }
        if let ExprKind::Cast { chained: true, .. } = &term.kind {
            return Err(self.err(
                "please use `cast expr` instead, `expr.cast` is reserved for chaining",
                term.pos,
            ));
        }

        Ok(term)
    }

    fn parse_cast(&mut self, term: Option<Expr>, pos: Pos, chained: bool) -> Result<Expr> {
        self.expect(TokenKind::LParen, false)?;
        let ty = self.parse_type()?;
        self.expect(TokenKind::RParen, false)?;

        let expr = match term {
            Some(term) => term,
            None => self.parse_term()?,
        };

        Ok(Expr {
            kind: ExprKind::Cast { expr: Box::new(expr), ty, chained },
            pos,
        })
    }

    fn parse_inline_if(&mut self, then_expr: Expr) -> Result<Expr> {
        let pos = self.bump()?.pos;
        let cond = self.parse_expr(false)?;
        self.expect(TokenKind::KwElse, false)?;
        let else_expr = self.parse_expr(false)?;

        Ok(Expr {
            kind: ExprKind::InlineIf {
                then_expr: Box::new(then_expr),
                cond: Box::new(cond),
                else_expr: Box::new(else_expr),
            },
            pos,
        })
    }

    fn parse_call(&mut self, callee: Expr, internal: bool) -> Result<Expr> {
        let pos = self.expect(TokenKind::LParen, false)?.pos;
        let generics = self.parse_generic_args_piped()?;
        let mut args = Vec::new();

        loop {
            if args.is_empty() && self.at(TokenKind::RParen, true) {
                break;
            }

            if self.at(TokenKind::KwOut, true) {
                args.push(self.parse_out_param()?);
            } else {
                args.push(CallArg::Expr(self.parse_expr(true)?));
            }

            if self.eat(TokenKind::Comma, false).is_none() {
                break;
            }
        }

        self.expect(TokenKind::RParen, true)?;

        // `a.f(x)` is a call of `f` with `a` prepended to the arguments.
        let name = match callee.kind {
            ExprKind::Id(name) => Ident { name, pos: callee.pos },
            ExprKind::Dot { base, field } => {
                args.insert(0, CallArg::Expr(*base));
                field
            }
            _ => unreachable!("caller checked the callee shape"),
        };

        Ok(Expr {
            kind: ExprKind::Call(CallExpr { name, generics, args, internal }),
            pos,
        })
    }

    fn parse_out_param(&mut self) -> Result<CallArg> {
        let pos = self.bump()?.pos;
        let name = self.expect_ident(false)?;
        self.expect(TokenKind::Colon, false)?;
        let ty = self.parse_type()?;

        Ok(CallArg::Out { name, ty, pos })
    }

    fn parse_array_init(&mut self, pos: Pos) -> Result<Expr> {
        let mut items = Vec::new();

        loop {
            items.push(self.parse_expr(true)?);
            if self.eat(TokenKind::Comma, false).is_none() {
                break;
            }
        }

        self.expect(TokenKind::RBracket, true)?;
        Ok(Expr { kind: ExprKind::ArrayInit(items), pos })
    }

    pub(crate) fn parse_struct_init(&mut self, pos: Pos, is_union: bool) -> Result<Expr> {
        let mut fields = Vec::new();

        loop {
            let name = self.expect_ident(true)?;
            self.expect(TokenKind::Colon, false)?;
            let value = self.parse_expr(false)?;
            fields.push(FieldInit { name, value });

            if self.eat(TokenKind::Comma, false).is_none() {
                break;
            }
        }

        let closer = if is_union { TokenKind::RBracket } else { TokenKind::RParen };
        self.expect(closer, true)?;

        if is_union {
            if fields.len() > 1 {
                return Err(self.err("union initializer can only contain one field assignment", pos));
            }
            let field = fields.into_iter().next().expect("loop pushes at least one field");
            Ok(Expr { kind: ExprKind::UnionInit(Box::new(field)), pos })
        } else {
            Ok(Expr { kind: ExprKind::StructInit(fields), pos })
        }
    }
}

fn bin(op: BinOp, lhs: Expr, rhs: Expr, pos: Pos) -> Expr {
    Expr {
        kind: ExprKind::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
        pos,
    }
}

fn unary_op(kind: TokenKind) -> UnaryOp {
    match kind {
        TokenKind::Plus => UnaryOp::Plus,
        TokenKind::Minus => UnaryOp::Neg,
        TokenKind::KwNot => UnaryOp::Not,
        TokenKind::KwRef => UnaryOp::Ref { is_mut: false },
        TokenKind::KwMut => UnaryOp::Ref { is_mut: true },
        TokenKind::Star => UnaryOp::Deref,
        _ => unreachable!("caller matched a unary operator token"),
    }
}
