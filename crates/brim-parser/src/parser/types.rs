//! Type expression parsing, generic parameter lists, and function argument
//! lists (shared between declarations and `fn` type forms).

use brim_common::error::Result;
use brim_common::token::TokenKind;

use crate::ast::*;
use crate::parser::Parser;

impl Parser {
    pub(crate) fn parse_type(&mut self) -> Result<TypeExpr> {
        if self.at(TokenKind::KwFn, false) {
            let pos = self.bump()?.pos;
            let args = self.parse_fn_type_args()?;
            let ret = self.parse_ret_type()?;
            return Ok(TypeExpr {
                kind: TypeExprKind::Fn { args, ret: Box::new(ret) },
                pos,
            });
        }

        if self.at(TokenKind::Star, false) {
            let pos = self.bump()?.pos;
            let is_mut = self.eat(TokenKind::KwMut, false).is_some();
            let target = self.parse_type()?;
            return Ok(TypeExpr {
                kind: TypeExprKind::Ptr { is_mut, target: Box::new(target) },
                pos,
            });
        }

        if self.at_any(&[TokenKind::LBracket, TokenKind::Lt], false) {
            let opener = self.bump()?;
            let pos = opener.pos;

            if opener.kind == TokenKind::LBracket && self.at_id_colon(true) {
                let fields = self.parse_field_decls(TokenKind::RBracket)?;
                return Ok(TypeExpr { kind: TypeExprKind::Union(fields), pos });
            }

            let len = self.parse_expr(false)?;
            let x = self.expect_ident(false)?;
            if x.name != "x" {
                return Err(self.err("expected token `x`", x.pos));
            }
            let elem = self.parse_type()?;

            let closer = if opener.kind == TokenKind::LBracket {
                TokenKind::RBracket
            } else {
                TokenKind::Gt
            };
            self.expect(closer, false)?;

            let kind = if opener.kind == TokenKind::LBracket {
                TypeExprKind::Array { len: Box::new(len), elem: Box::new(elem) }
            } else {
                TypeExprKind::Vector { len: Box::new(len), elem: Box::new(elem) }
            };
            return Ok(TypeExpr { kind, pos });
        }

        if self.at(TokenKind::LParen, false) {
            let pos = self.bump()?.pos;

            // `(field: T, …)` is a struct; `(T)` just groups a type.
            if self.at_id_colon(true) {
                let fields = self.parse_field_decls(TokenKind::RParen)?;
                return Ok(TypeExpr { kind: TypeExprKind::Struct(fields), pos });
            }

            let inner = self.parse_type()?;
            self.expect(TokenKind::RParen, false)?;
            return Ok(inner);
        }

        let name_tok = self.expect(TokenKind::Id, false)?;
        let name = self.ident(name_tok);

        if self.at(TokenKind::LBracket, false) {
            let pos = self.cur()?.pos;
            let args = self.parse_generic_args_bracketed()?;
            return Ok(TypeExpr { kind: TypeExprKind::Generic { name, args }, pos });
        }

        Ok(TypeExpr {
            kind: TypeExprKind::Named(name.name),
            pos: name.pos,
        })
    }

    /// `name: T, …` field lists of struct and union type forms.
    fn parse_field_decls(&mut self, closer: TokenKind) -> Result<Vec<FieldDecl>> {
        let mut fields = Vec::new();

        loop {
            let name = self.expect_ident(true)?;
            self.expect(TokenKind::Colon, false)?;
            let ty = self.parse_type()?;
            fields.push(FieldDecl { name, ty });

            if self.eat(TokenKind::Comma, false).is_none() {
                break;
            }
        }

        self.expect(closer, true)?;
        Ok(fields)
    }

    /// Generic parameter names in declaration position: `|T, U|` on
    /// functions, `[T, U]` on type declarations. Absent list is empty.
    pub(crate) fn parse_generic_params(&mut self, piped: bool) -> Result<Vec<Ident>> {
        let (open, close) = if piped {
            (TokenKind::Pipe, TokenKind::Pipe)
        } else {
            (TokenKind::LBracket, TokenKind::RBracket)
        };

        if !self.at(open, false) {
            return Ok(Vec::new());
        }
        self.bump()?;

        let mut params = Vec::new();
        loop {
            params.push(self.expect_ident(false)?);
            if self.eat(TokenKind::Comma, false).is_none() {
                break;
            }
        }

        self.expect(close, false)?;
        Ok(params)
    }

    /// Concrete generic arguments at call sites: `|T, …|`.
    pub(crate) fn parse_generic_args_piped(&mut self) -> Result<Vec<TypeExpr>> {
        if !self.at(TokenKind::Pipe, true) {
            return Ok(Vec::new());
        }
        self.expect(TokenKind::Pipe, true)?;

        let mut args = Vec::new();
        loop {
            args.push(self.parse_type()?);
            if self.eat(TokenKind::Comma, false).is_none() {
                break;
            }
        }

        self.expect(TokenKind::Pipe, false)?;
        Ok(args)
    }

    /// Concrete generic arguments on named types: `name[T, …]`.
    fn parse_generic_args_bracketed(&mut self) -> Result<Vec<TypeExpr>> {
        self.expect(TokenKind::LBracket, false)?;

        let mut args = Vec::new();
        loop {
            args.push(self.parse_type()?);
            if self.eat(TokenKind::Comma, false).is_none() {
                break;
            }
        }

        self.expect(TokenKind::RBracket, false)?;
        Ok(args)
    }

    /// Argument list of a function declaration, with optional leading
    /// generic parameters: `(|T| a: T, b: u8)`.
    pub(crate) fn parse_fn_args(&mut self) -> Result<(Vec<FnArg>, Vec<Ident>)> {
        self.expect(TokenKind::LParen, false)?;
        let generics = self.parse_generic_params(true)?;
        let mut args = Vec::new();

        loop {
            if args.is_empty() && self.at(TokenKind::RParen, true) {
                break;
            }

            let name = self.expect_ident(true)?;
            self.expect(TokenKind::Colon, false)?;
            let ty = self.parse_type()?;
            args.push(FnArg { name, ty });

            if self.eat(TokenKind::Comma, false).is_none() {
                break;
            }
        }

        self.expect(TokenKind::RParen, true)?;
        Ok((args, generics))
    }

    /// Argument types of an `fn(T, …)` type form.
    fn parse_fn_type_args(&mut self) -> Result<Vec<TypeExpr>> {
        self.expect(TokenKind::LParen, false)?;
        let mut args = Vec::new();

        loop {
            if args.is_empty() && self.at(TokenKind::RParen, true) {
                break;
            }

            args.push(self.parse_type()?);

            if self.eat(TokenKind::Comma, false).is_none() {
                break;
            }
        }

        self.expect(TokenKind::RParen, true)?;
        Ok(args)
    }

    pub(crate) fn parse_ret_type(&mut self) -> Result<TypeExpr> {
        self.expect(TokenKind::Arrow, false)?;
        self.parse_type()
    }
}
