//! The Brim abstract syntax tree.
//!
//! Every node family is a closed enum; every node carries the source
//! position of its first token. The `Display` implementations form a
//! pretty-printer whose output re-parses to a structurally equal tree,
//! which the parser test suite relies on.

use std::fmt;

use brim_common::span::Pos;

// ── Common ───────────────────────────────────────────────────────────────

/// An identifier with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub pos: Pos,
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub items: Vec<Item>,
}

// ── Items ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Fn(FnDecl),
    TypeDecl(TypeDecl),
    Import(ImportDecl),
    Global(VarDecl),
    Test(TestDecl),
}

impl Item {
    pub fn pos(&self) -> Pos {
        match self {
            Item::Fn(f) => f.pos,
            Item::TypeDecl(t) => t.pos,
            Item::Import(i) => i.pos,
            Item::Global(g) => g.name.pos,
            Item::Test(t) => t.pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: Ident,
    pub generics: Vec<Ident>,
    pub args: Vec<FnArg>,
    pub ret_type: TypeExpr,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnArg {
    pub name: Ident,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name: Ident,
    pub generics: Vec<Ident>,
    pub ty: TypeExpr,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub path: String,
    pub path_pos: Pos,
    pub items: ImportItems,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportItems {
    All,
    List(Vec<ImportId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportId {
    pub name: Ident,
    pub alias: Ident,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestDecl {
    pub desc: String,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

/// `name : T = expr`, used both for locals and for module globals.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: Ident,
    pub ty: TypeExpr,
    pub init: Expr,
}

// ── Types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExprKind {
    /// A named (builtin or declared) type.
    Named(String),
    /// `name[T, …]` instantiation of a generic named type.
    Generic { name: Ident, args: Vec<TypeExpr> },
    /// `*T` / `*mut T`.
    Ptr { is_mut: bool, target: Box<TypeExpr> },
    /// `[len x T]`.
    Array { len: Box<Expr>, elem: Box<TypeExpr> },
    /// `<len x T>`.
    Vector { len: Box<Expr>, elem: Box<TypeExpr> },
    /// `(field: T, …)`.
    Struct(Vec<FieldDecl>),
    /// `[field: T, …]`.
    Union(Vec<FieldDecl>),
    /// `fn(T, …) -> R`.
    Fn { args: Vec<TypeExpr>, ret: Box<TypeExpr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: Ident,
    pub ty: TypeExpr,
}

// ── Expressions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Num(String),
    FNum(String),
    Str(String),
    Chr(char),
    Id(String),
    True,
    False,
    NoneLit,
    Undefined,
    /// `.name` enum literal.
    EnumLit(Ident),
    Bin {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
        /// True when written in the postfix chained form (`expr.ref`,
        /// `expr.mut`, `expr.*`).
        chained: bool,
    },
    /// `expr.cast(T)` / `cast(T) expr`.
    Cast {
        expr: Box<Expr>,
        ty: TypeExpr,
        chained: bool,
    },
    /// `then if cond else other`.
    InlineIf {
        then_expr: Box<Expr>,
        cond: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Call(CallExpr),
    Dot {
        base: Box<Expr>,
        field: Ident,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// `[a, b, …]`.
    ArrayInit(Vec<Expr>),
    /// `(f: v, …)`.
    StructInit(Vec<FieldInit>),
    /// `[f: v]`.
    UnionInit(Box<FieldInit>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Unary `+` (a no-op on numeric operands).
    Plus,
    Neg,
    Not,
    Ref { is_mut: bool },
    Deref,
}

impl UnaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
            UnaryOp::Ref { is_mut: false } => "ref",
            UnaryOp::Ref { is_mut: true } => "mut",
            UnaryOp::Deref => "*",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub name: Ident,
    pub generics: Vec<TypeExpr>,
    pub args: Vec<CallArg>,
    pub internal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Expr(Expr),
    /// `out name: T` output parameter.
    Out { name: Ident, ty: TypeExpr, pos: Pos },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInit {
    pub name: Ident,
    pub value: Expr,
}

// ── Statements ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Pass,
    If(IfStmt),
    Return(Option<Expr>),
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        init: Option<Box<VarDecl>>,
        cond: Expr,
        step: Option<Box<Stmt>>,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Try {
        var: Option<(Ident, TypeExpr)>,
        expr: Expr,
        body: Option<Vec<Stmt>>,
    },
    Defer {
        body: Vec<Stmt>,
        is_block: bool,
    },
    Match {
        scrutinee: Expr,
        cases: Vec<CaseBranch>,
        else_body: Option<Vec<Stmt>>,
    },
    VarDecl(VarDecl),
    Assign {
        target: AssignTarget,
        op: AssignOp,
        value: Expr,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub if_branch: CondBranch,
    pub elif_branches: Vec<CondBranch>,
    pub else_body: Option<Vec<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CondBranch {
    pub cond: Expr,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseBranch {
    pub exprs: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    /// `.. = expr` discards the value.
    Discard,
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
}

impl AssignOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::AddAssign => "+=",
            AssignOp::SubAssign => "-=",
            AssignOp::MulAssign => "*=",
        }
    }
}

// ── Pretty-printer ───────────────────────────────────────────────────────

fn escape_str(value: &str) -> String {
    let mut out = String::new();
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            '\'' => out.push_str("\\'"),
            '`' => out.push_str("\\`"),
            c => out.push(c),
        }
    }
    out
}

/// True when the expression can stand directly before a postfix suffix
/// (`.f`, `[i]`) without changing how it re-parses.
fn is_postfix_atom(expr: &Expr) -> bool {
    !matches!(
        expr.kind,
        ExprKind::Bin { .. }
            | ExprKind::Unary { .. }
            | ExprKind::Cast { .. }
            | ExprKind::InlineIf { .. }
    )
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Num(s) | ExprKind::FNum(s) => f.write_str(s),
            ExprKind::Str(s) => write!(f, "'{}'", escape_str(s)),
            ExprKind::Chr(c) => write!(f, "`{}`", escape_str(&c.to_string())),
            ExprKind::Id(name) => f.write_str(name),
            ExprKind::True => f.write_str("True"),
            ExprKind::False => f.write_str("False"),
            ExprKind::NoneLit => f.write_str("None"),
            ExprKind::Undefined => f.write_str("Undefined"),
            ExprKind::EnumLit(id) => write!(f, ".{id}"),
            ExprKind::Bin { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.as_str()),
            ExprKind::Unary { op, expr, .. } => match op {
                UnaryOp::Deref => write!(f, "*{}", Grouped(expr)),
                op => write!(f, "{} {}", op.as_str(), Grouped(expr)),
            },
            ExprKind::Cast { expr, ty, .. } => write!(f, "cast({ty}) {}", Grouped(expr)),
            ExprKind::InlineIf { then_expr, cond, else_expr } => {
                write!(f, "({then_expr} if {cond} else {else_expr})")
            }
            ExprKind::Call(call) => {
                write!(f, "{}", call.name)?;
                if call.internal {
                    f.write_str("!")?;
                }
                f.write_str("(")?;
                if !call.generics.is_empty() {
                    f.write_str("|")?;
                    write_comma_sep(f, &call.generics)?;
                    f.write_str("| ")?;
                }
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match arg {
                        CallArg::Expr(e) => write!(f, "{e}")?,
                        CallArg::Out { name, ty, .. } => write!(f, "out {name}: {ty}")?,
                    }
                }
                f.write_str(")")
            }
            ExprKind::Dot { base, field } => {
                if is_postfix_atom(base) {
                    write!(f, "{base}.{field}")
                } else {
                    write!(f, "({base}).{field}")
                }
            }
            ExprKind::Index { base, index } => {
                if is_postfix_atom(base) {
                    write!(f, "{base}[{index}]")
                } else {
                    write!(f, "({base})[{index}]")
                }
            }
            ExprKind::ArrayInit(items) => {
                f.write_str("[")?;
                write_comma_sep(f, items)?;
                f.write_str("]")
            }
            ExprKind::StructInit(fields) => {
                f.write_str("(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.value)?;
                }
                f.write_str(")")
            }
            ExprKind::UnionInit(field) => write!(f, "[{}: {}]", field.name, field.value),
        }
    }
}

/// Wraps an expression in parentheses when it is not a bare term, so that a
/// prefix operator printed before it keeps the same operand.
struct Grouped<'a>(&'a Expr);

impl fmt::Display for Grouped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_postfix_atom(self.0) {
            write!(f, "{}", self.0)
        } else {
            write!(f, "({})", self.0)
        }
    }
}

fn write_comma_sep<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeExprKind::Named(name) => f.write_str(name),
            TypeExprKind::Generic { name, args } => {
                write!(f, "{name}[")?;
                write_comma_sep(f, args)?;
                f.write_str("]")
            }
            TypeExprKind::Ptr { is_mut, target } => {
                if *is_mut {
                    write!(f, "*mut {target}")
                } else {
                    write!(f, "*{target}")
                }
            }
            TypeExprKind::Array { len, elem } => write!(f, "[{len} x {elem}]"),
            TypeExprKind::Vector { len, elem } => write!(f, "<{len} x {elem}>"),
            TypeExprKind::Struct(fields) => {
                f.write_str("(")?;
                write_field_decls(f, fields)?;
                f.write_str(")")
            }
            TypeExprKind::Union(fields) => {
                f.write_str("[")?;
                write_field_decls(f, fields)?;
                f.write_str("]")
            }
            TypeExprKind::Fn { args, ret } => {
                f.write_str("fn(")?;
                write_comma_sep(f, args)?;
                write!(f, ") -> {ret}")
            }
        }
    }
}

fn write_field_decls(f: &mut fmt::Formatter<'_>, fields: &[FieldDecl]) -> fmt::Result {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}: {}", field.name, field.ty)?;
    }
    Ok(())
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

fn write_block(out: &mut String, body: &[Stmt], level: usize) {
    out.push_str(":\n");
    for stmt in body {
        write_stmt(out, stmt, level);
    }
}

fn write_var_decl(out: &mut String, decl: &VarDecl) {
    out.push_str(&format!("{}: {} = {}", decl.name, decl.ty, decl.init));
}

fn write_stmt(out: &mut String, stmt: &Stmt, level: usize) {
    indent(out, level);

    match &stmt.kind {
        StmtKind::Pass => out.push_str("pass\n"),
        StmtKind::Break => out.push_str("break\n"),
        StmtKind::Continue => out.push_str("continue\n"),
        StmtKind::Return(None) => out.push_str("return\n"),
        StmtKind::Return(Some(e)) => out.push_str(&format!("return {e}\n")),
        StmtKind::Expr(e) => out.push_str(&format!("{e}\n")),
        StmtKind::VarDecl(decl) => {
            write_var_decl(out, decl);
            out.push('\n');
        }
        StmtKind::Assign { target, op, value } => {
            match target {
                AssignTarget::Discard => out.push_str(".."),
                AssignTarget::Expr(e) => out.push_str(&e.to_string()),
            }
            out.push_str(&format!(" {} {value}\n", op.as_str()));
        }
        StmtKind::If(if_stmt) => {
            out.push_str(&format!("if {}", if_stmt.if_branch.cond));
            write_block(out, &if_stmt.if_branch.body, level + 1);
            for elif in &if_stmt.elif_branches {
                indent(out, level);
                out.push_str(&format!("elif {}", elif.cond));
                write_block(out, &elif.body, level + 1);
            }
            if let Some(else_body) = &if_stmt.else_body {
                indent(out, level);
                out.push_str("else");
                write_block(out, else_body, level + 1);
            }
        }
        StmtKind::While { cond, body } => {
            out.push_str(&format!("while {cond}"));
            write_block(out, body, level + 1);
        }
        StmtKind::For { init, cond, step, body } => {
            out.push_str("for ");
            match init {
                Some(decl) => write_var_decl(out, decl),
                None => out.push_str(".."),
            }
            out.push_str(&format!(", {cond}, "));
            match step {
                Some(step) => {
                    let mut inline = String::new();
                    write_stmt(&mut inline, step, 0);
                    out.push_str(inline.trim_end());
                }
                None => out.push_str(".."),
            }
            write_block(out, body, level + 1);
        }
        StmtKind::Try { var, expr, body } => {
            out.push_str("try ");
            if let Some((name, ty)) = var {
                out.push_str(&format!("{name}: {ty} = "));
            }
            out.push_str(&expr.to_string());
            match body {
                Some(body) => write_block(out, body, level + 1),
                None => out.push('\n'),
            }
        }
        StmtKind::Defer { body, is_block } => {
            if *is_block {
                out.push_str("defer");
                write_block(out, body, level + 1);
            } else {
                out.push_str("defer ");
                let mut inline = String::new();
                write_stmt(&mut inline, &body[0], 0);
                out.push_str(inline.trim_start());
            }
        }
        StmtKind::Match { scrutinee, cases, else_body } => {
            out.push_str(&format!("match {scrutinee}:\n"));
            for case in cases {
                indent(out, level + 1);
                out.push_str("case ");
                let exprs: Vec<String> = case.exprs.iter().map(|e| e.to_string()).collect();
                out.push_str(&exprs.join(", "));
                write_block(out, &case.body, level + 2);
            }
            if let Some(else_body) = else_body {
                indent(out, level + 1);
                out.push_str("else");
                write_block(out, else_body, level + 2);
            }
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();

        for item in &self.items {
            match item {
                Item::Fn(decl) => {
                    out.push_str(&format!("fn {}(", decl.name));
                    if !decl.generics.is_empty() {
                        out.push('|');
                        let names: Vec<&str> =
                            decl.generics.iter().map(|g| g.name.as_str()).collect();
                        out.push_str(&names.join(", "));
                        out.push_str("| ");
                    }
                    for (i, arg) in decl.args.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&format!("{}: {}", arg.name, arg.ty));
                    }
                    out.push_str(&format!(") -> {}", decl.ret_type));
                    write_block(&mut out, &decl.body, 1);
                }
                Item::TypeDecl(decl) => {
                    out.push_str(&format!("type {}", decl.name));
                    if !decl.generics.is_empty() {
                        out.push('[');
                        let names: Vec<&str> =
                            decl.generics.iter().map(|g| g.name.as_str()).collect();
                        out.push_str(&names.join(", "));
                        out.push(']');
                    }
                    out.push_str(&format!(" = {}\n", decl.ty));
                }
                Item::Import(decl) => {
                    out.push_str(&format!("from '{}' import ", escape_str(&decl.path)));
                    match &decl.items {
                        ImportItems::All => out.push_str("*\n"),
                        ImportItems::List(ids) => {
                            out.push('[');
                            for (i, id) in ids.iter().enumerate() {
                                if i > 0 {
                                    out.push_str(", ");
                                }
                                if id.alias.name == id.name.name {
                                    out.push_str(&id.name.name);
                                } else {
                                    out.push_str(&format!("{} -> {}", id.name, id.alias));
                                }
                            }
                            out.push_str("]\n");
                        }
                    }
                }
                Item::Global(decl) => {
                    write_var_decl(&mut out, decl);
                    out.push('\n');
                }
                Item::Test(decl) => {
                    out.push_str(&format!("test '{}'", escape_str(&decl.desc)));
                    write_block(&mut out, &decl.body, 1);
                }
            }
        }

        f.write_str(&out)
    }
}
