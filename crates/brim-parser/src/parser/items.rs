//! Top-level declarations: functions, type declarations, imports, globals,
//! and test blocks.

use brim_common::error::Result;
use brim_common::token::TokenKind;

use crate::ast::*;
use crate::parser::Parser;

impl Parser {
    pub(crate) fn parse_item(&mut self) -> Result<Item> {
        let tok = self.cur()?;

        if !tok.is_on_new_line {
            return Err(self.err("global must be on a new line", tok.pos));
        }
        if tok.indent != 0 {
            return Err(self.err("global has bad indent", tok.pos));
        }

        match tok.kind {
            TokenKind::KwFn => self.parse_fn_decl().map(Item::Fn),
            TokenKind::KwType => self.parse_type_decl().map(Item::TypeDecl),
            TokenKind::KwFrom => self.parse_import().map(Item::Import),
            TokenKind::Id => self.parse_var_decl().map(Item::Global),
            TokenKind::KwTest => self.parse_test().map(Item::Test),
            kind => Err(self.err(format!("unexpected token `{}` here", kind.as_str()), tok.pos)),
        }
    }

    fn parse_fn_decl(&mut self) -> Result<FnDecl> {
        self.bump()?;

        let name = self.expect_ident(false)?;
        let (args, generics) = self.parse_fn_args()?;
        let ret_type = self.parse_ret_type()?;
        let body = self.parse_block()?;
        let pos = name.pos;

        Ok(FnDecl { name, generics, args, ret_type, body, pos })
    }

    fn parse_type_decl(&mut self) -> Result<TypeDecl> {
        let pos = self.bump()?.pos;

        let name = self.expect_ident(false)?;
        let generics = self.parse_generic_params(false)?;
        self.expect(TokenKind::Eq, false)?;
        let ty = self.parse_type()?;

        Ok(TypeDecl { name, generics, ty, pos })
    }

    fn parse_import(&mut self) -> Result<ImportDecl> {
        let pos = self.bump()?.pos;

        let path_tok = self.expect(TokenKind::Str, false)?;
        self.expect(TokenKind::KwImport, false)?;

        let items = if self.eat(TokenKind::Star, false).is_some() {
            ImportItems::All
        } else {
            self.expect(TokenKind::LBracket, false)?;
            let mut ids = Vec::new();

            loop {
                if ids.is_empty() && self.at(TokenKind::RBracket, true) {
                    break;
                }

                let name = self.expect_ident(true)?;
                let alias = if self.eat(TokenKind::Arrow, false).is_some() {
                    self.expect_ident(false)?
                } else {
                    name.clone()
                };
                ids.push(ImportId { name, alias });

                if self.eat(TokenKind::Comma, false).is_none() {
                    break;
                }
            }

            self.expect(TokenKind::RBracket, true)?;
            ImportItems::List(ids)
        };

        Ok(ImportDecl {
            path: path_tok.text,
            path_pos: path_tok.pos,
            items,
            pos,
        })
    }

    fn parse_test(&mut self) -> Result<TestDecl> {
        let pos = self.bump()?.pos;
        let desc_tok = self.expect(TokenKind::Str, false)?;
        let body = self.parse_block()?;

        Ok(TestDecl { desc: desc_tok.text, body, pos })
    }
}
