//! Precedence splitting parser.
//!
//! A token range is split at its weakest top-level binary operator, scanning from the
//! right so that operators of equal strength associate to the left. Ranges without a
//! top-level operator are operands: literals, parenthesized expressions, unary operators,
//! intrinsics, field reads and struct offsets.

use std::ops::Range;

use strata_data_type::IntType;

use crate::{
    ast::{BinaryOp, UnaryOp},
    lex::{Token, TokenKind},
    query::{Filters, LiteralCondition, Query},
    CompileError, Diagnostics, Expr,
};

/// Maximum bracket nesting depth.
const MAX_NESTING: usize = 32;

/// Maximum number of binary operators in one expression.
///
/// A chain of operators compiles to a tree as deep as the chain is long, and both
/// compiling and evaluating recurse once per level.
const MAX_OPERATORS: usize = 256;

pub(crate) struct Compiler<'d> {
    tokens: Vec<Token>,
    end_pos: usize,
    diagnostics: &'d mut Diagnostics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bracket {
    Paren,
    Square,
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::Amp => BinaryOp::And,
        TokenKind::Pipe => BinaryOp::Or,
        TokenKind::Caret => BinaryOp::Xor,
        TokenKind::Shl => BinaryOp::Shl,
        TokenKind::Shr => BinaryOp::Shr,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::Ne => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Ge => BinaryOp::Ge,
        _ => return None,
    })
}

impl<'d> Compiler<'d> {
    pub(crate) fn new(tokens: Vec<Token>, end_pos: usize, diagnostics: &'d mut Diagnostics) -> Self {
        Compiler {
            tokens,
            end_pos,
            diagnostics,
        }
    }

    pub(crate) fn compile(mut self) -> Expr {
        let all = 0..self.tokens.len();
        if let Some(at) = self.too_many_operators(all.clone()) {
            self.diagnostics
                .push(CompileError::NestingTooDeep { pos: self.pos(at) });
            return Expr::Error;
        }
        self.expr(all, 0)
    }

    /// The first binary operator past [MAX_OPERATORS], counting inside brackets too.
    fn too_many_operators(&self, r: Range<usize>) -> Option<usize> {
        let start = r.start;
        r.filter(|&at| binary_op(self.kind(at)).is_some() && self.is_binary_position(start, at))
            .nth(MAX_OPERATORS)
    }

    fn kind(&self, at: usize) -> &TokenKind {
        &self.tokens[at].kind
    }

    fn pos(&self, at: usize) -> usize {
        self.tokens.get(at).map(|token| token.pos).unwrap_or(self.end_pos)
    }

    fn report<T>(&mut self, result: Result<T, CompileError>, fallback: T) -> T {
        match result {
            Ok(value) => value,
            Err(error) => {
                self.diagnostics.push(error);
                fallback
            }
        }
    }

    fn expr(&mut self, r: Range<usize>, depth: usize) -> Expr {
        let result = self.try_expr(r, depth);
        self.report(result, Expr::Error)
    }

    fn try_expr(&mut self, r: Range<usize>, depth: usize) -> Result<Expr, CompileError> {
        if depth > MAX_NESTING {
            return Err(CompileError::NestingTooDeep {
                pos: self.pos(r.start),
            });
        }
        if r.is_empty() {
            return Err(CompileError::EmptyExpr {
                pos: self.pos(r.start),
            });
        }
        if r.len() == 1 {
            if let TokenKind::Int(value) = *self.kind(r.start) {
                return Ok(Expr::Constant(value));
            }
        }
        if *self.kind(r.start) == TokenKind::LParen
            && self.matching_close(r.start, r.end) == Some(r.end - 1)
        {
            return Ok(self.expr(r.start + 1..r.end - 1, depth + 1));
        }

        match self.find_last_weakest_op(r.clone())? {
            Some((at, op)) => {
                let a = self.expr(r.start..at, depth);
                let b = self.expr(at + 1..r.end, depth);
                Ok(Expr::Binary(op, Box::new(a), Box::new(b)))
            }
            None => self.operand(r, depth),
        }
    }

    fn operand(&mut self, r: Range<usize>, depth: usize) -> Result<Expr, CompileError> {
        match self.kind(r.start) {
            TokenKind::Minus => {
                let a = self.expr(r.start + 1..r.end, depth + 1);
                return Ok(Expr::Unary(UnaryOp::Negate, Box::new(a)));
            }
            TokenKind::Tilde => {
                let a = self.expr(r.start + 1..r.end, depth + 1);
                return Ok(Expr::Unary(UnaryOp::Invert, Box::new(a)));
            }
            TokenKind::Dollar => return self.intrinsic(r, depth),
            _ => {}
        }

        if let TokenKind::Name(_) = self.kind(r.end - 1) {
            let (query, name, is_offset) = self.field_ref(r, depth)?;
            return Ok(Expr::MemberField {
                query,
                name,
                index: None,
                is_offset,
            });
        }

        if *self.kind(r.start) == TokenKind::At {
            let query = self.query(r.start + 1..r.end, depth + 1);
            return Ok(Expr::StructOffset(Box::new(query)));
        }

        Err(CompileError::CannotParse {
            pos: self.pos(r.start),
        })
    }

    /// Parse `[@] [query .] name`.
    fn field_ref(
        &mut self,
        r: Range<usize>,
        depth: usize,
    ) -> Result<(Option<Box<Query>>, String, bool), CompileError> {
        let name = match r.clone().last().map(|at| self.kind(at)) {
            Some(TokenKind::Name(name)) => name.clone(),
            _ => {
                return Err(CompileError::CannotParse {
                    pos: self.pos(r.start),
                })
            }
        };
        let is_offset = *self.kind(r.start) == TokenKind::At;
        let start = if is_offset { r.start + 1 } else { r.start };
        let prefix = start..r.end - 1;

        if prefix.is_empty() {
            return Ok((None, name, is_offset));
        }
        if *self.kind(prefix.end - 1) != TokenKind::Dot {
            return Err(CompileError::BadQuery {
                pos: self.pos(prefix.end - 1),
                message: "expected `.` before field name",
            });
        }
        let query = self.query(prefix.start..prefix.end - 1, depth + 1);
        Ok((Some(Box::new(query)), name, is_offset))
    }

    fn intrinsic(&mut self, r: Range<usize>, depth: usize) -> Result<Expr, CompileError> {
        let pos = self.pos(r.start);
        let name = match r.clone().nth(1).map(|at| self.kind(at)) {
            Some(TokenKind::Name(name)) => name.clone(),
            _ => return Err(CompileError::CannotParse { pos }),
        };
        let rest = r.start + 2..r.end;

        if let Ok(int_type) = name.parse::<IntType>() {
            let offset = self.expr(rest, depth + 1);
            return Ok(Expr::RawRead(int_type, Box::new(offset)));
        }

        let bad_args = || CompileError::BadIntrinsicArgs {
            pos,
            name: name.clone(),
        };
        match name.as_str() {
            "fpeqs" | "fpnes" => {
                let args = self.call_args(rest).map_err(|_| bad_args())?;
                if args.len() != 2 || *self.kind(args[0].start) == TokenKind::At {
                    return Err(bad_args());
                }
                let (query, field, _) = self.field_ref(args[0].clone(), depth + 1)?;
                let text = self.text_arg(args[1].clone()).ok_or_else(bad_args)?;
                Ok(Expr::FieldPreviewEqualsString {
                    query,
                    name: field,
                    text,
                    invert: name == "fpnes",
                })
            }
            "arr" => {
                let args = self.call_args(rest).map_err(|_| bad_args())?;
                if args.len() != 2 {
                    return Err(bad_args());
                }
                let (query, field, is_offset) = self.field_ref(args[0].clone(), depth + 1)?;
                let index = self.expr(args[1].clone(), depth + 1);
                Ok(Expr::MemberField {
                    query,
                    name: field,
                    index: Some(Box::new(index)),
                    is_offset,
                })
            }
            "iid" => {
                let args = self.call_args(rest).map_err(|_| bad_args())?;
                match args.len() {
                    0 => Ok(Expr::InstanceId(None)),
                    1 => {
                        let query = self.query(args[0].clone(), depth + 1);
                        Ok(Expr::InstanceId(Some(Box::new(query))))
                    }
                    _ => Err(bad_args()),
                }
            }
            _ => Err(CompileError::UnknownIntrinsic { pos, name }),
        }
    }

    /// Split `( a, b, ... )` into argument ranges.
    fn call_args(&self, r: Range<usize>) -> Result<Vec<Range<usize>>, CompileError> {
        if r.is_empty()
            || *self.kind(r.start) != TokenKind::LParen
            || self.matching_close(r.start, r.end) != Some(r.end - 1)
        {
            return Err(CompileError::CannotParse {
                pos: self.pos(r.start),
            });
        }
        let inner = r.start + 1..r.end - 1;
        if inner.is_empty() {
            return Ok(Vec::new());
        }
        self.split_top_level(inner, &TokenKind::Comma)
    }

    /// A quoted or bare name, or an integer literal, as text.
    fn text_arg(&self, r: Range<usize>) -> Option<String> {
        if r.is_empty() {
            return None;
        }
        match (r.len(), self.kind(r.start)) {
            (1, TokenKind::Name(text)) => Some(text.clone()),
            (1, TokenKind::Int(value)) => Some(value.to_string()),
            (2, TokenKind::Minus) => match self.kind(r.start + 1) {
                TokenKind::Int(value) => Some(value.wrapping_neg().to_string()),
                _ => None,
            },
            _ => None,
        }
    }

    fn query(&mut self, r: Range<usize>, depth: usize) -> Query {
        let result = self.try_query(r, depth);
        self.report(result, Query::Error)
    }

    fn try_query(&mut self, r: Range<usize>, depth: usize) -> Result<Query, CompileError> {
        if depth > MAX_NESTING {
            return Err(CompileError::NestingTooDeep {
                pos: self.pos(r.start),
            });
        }
        if r.is_empty() {
            return Err(CompileError::BadQuery {
                pos: self.pos(r.start),
                message: "empty query",
            });
        }

        let last_dot = self.last_top_level(r.clone(), &TokenKind::Dot)?;
        let segment = last_dot.map_or(r.start, |at| at + 1)..r.end;
        if segment.is_empty() {
            return Err(CompileError::BadQuery {
                pos: self.pos(segment.start),
                message: "expected a name after `.`",
            });
        }

        let filters = if segment.len() > 1 {
            self.filters(segment.start + 1..segment.end, depth)?
        } else {
            Filters::default()
        };

        match self.kind(segment.start).clone() {
            TokenKind::Name(field) => {
                let parent = match last_dot {
                    Some(at) => Some(Box::new(self.query(r.start..at, depth + 1))),
                    None => None,
                };
                Ok(Query::Sub {
                    parent,
                    field,
                    filters,
                })
            }
            TokenKind::StructName { name, global } => {
                if last_dot.is_some() {
                    return Err(CompileError::BadQuery {
                        pos: self.pos(segment.start),
                        message: "struct name after start of query",
                    });
                }
                Ok(Query::Root {
                    type_name: name,
                    global,
                    filters,
                })
            }
            _ => Err(CompileError::BadQuery {
                pos: self.pos(segment.start),
                message: "expected a field or struct name",
            }),
        }
    }

    /// Parse `[filter, filter, ...]`.
    fn filters(&mut self, r: Range<usize>, depth: usize) -> Result<Filters, CompileError> {
        if *self.kind(r.start) != TokenKind::LBracket
            || self.matching_close(r.start, r.end) != Some(r.end - 1)
        {
            return Err(CompileError::BadQuery {
                pos: self.pos(r.start),
                message: "expected `[` filters `]`",
            });
        }
        let mut filters = Filters::default();
        let inner = r.start + 1..r.end - 1;
        if inner.is_empty() {
            return Ok(filters);
        }

        for part in self.split_top_level(inner, &TokenKind::Comma)? {
            let bad_filter = CompileError::BadFilter {
                pos: self.pos(part.start),
            };
            if part.len() < 3 || *self.kind(part.start + 1) != TokenKind::Assign {
                return Err(bad_filter);
            }
            let value = part.start + 2..part.end;
            match self.kind(part.start).clone() {
                TokenKind::Hash => {
                    let selector = self.expr(value, depth + 1);
                    filters.selector = Some(Box::new(selector));
                }
                TokenKind::StructName {
                    name,
                    global: false,
                } => {
                    let expr = self.expr(value, depth + 1);
                    filters.expr_conditions.push((name, expr));
                }
                TokenKind::Name(field) => {
                    let value = self.text_arg(value).ok_or(bad_filter)?;
                    filters.conditions.push(LiteralCondition { field, value });
                }
                _ => return Err(bad_filter),
            }
        }
        Ok(filters)
    }

    /// Find the weakest top-level binary operator, preferring the rightmost on ties.
    fn find_last_weakest_op(
        &self,
        r: Range<usize>,
    ) -> Result<Option<(usize, BinaryOp)>, CompileError> {
        let mut weakest: Option<(usize, BinaryOp)> = None;
        self.scan_top_level(r.clone(), |at| {
            let op = match binary_op(self.kind(at)) {
                Some(op) => op,
                None => return,
            };
            if !self.is_binary_position(r.start, at) {
                return;
            }
            if weakest.map_or(true, |(_, best)| op.score() <= best.score()) {
                weakest = Some((at, op));
            }
        })?;
        Ok(weakest)
    }

    /// An operator is binary only if it directly follows an operand.
    ///
    /// The operand of an intrinsic like `$i32` starts in prefix position.
    fn is_binary_position(&self, start: usize, at: usize) -> bool {
        if at == start {
            return false;
        }
        let prev = self.kind(at - 1);
        let ends_operand = matches!(
            prev,
            TokenKind::Int(_)
                | TokenKind::Name(_)
                | TokenKind::StructName { .. }
                | TokenKind::RParen
                | TokenKind::RBracket
        );
        let intrinsic_name = at >= start + 2
            && *self.kind(at - 2) == TokenKind::Dollar
            && matches!(prev, TokenKind::Name(_));
        ends_operand && !intrinsic_name
    }

    /// Call `visit` on each token outside of brackets, checking bracket balance.
    fn scan_top_level(
        &self,
        r: Range<usize>,
        mut visit: impl FnMut(usize),
    ) -> Result<(), CompileError> {
        let mut stack: Vec<(Bracket, usize)> = Vec::new();
        for at in r {
            let opened = match self.kind(at) {
                TokenKind::LParen => Some(Bracket::Paren),
                TokenKind::LBracket => Some(Bracket::Square),
                _ => None,
            };
            if let Some(bracket) = opened {
                if stack.len() >= MAX_NESTING {
                    return Err(CompileError::NestingTooDeep { pos: self.pos(at) });
                }
                stack.push((bracket, at));
                continue;
            }
            let closed = match self.kind(at) {
                TokenKind::RParen => Some(Bracket::Paren),
                TokenKind::RBracket => Some(Bracket::Square),
                _ => None,
            };
            if let Some(bracket) = closed {
                match stack.pop() {
                    Some((open, _)) if open == bracket => continue,
                    _ => return Err(CompileError::UnbalancedBrackets { pos: self.pos(at) }),
                }
            }
            if stack.is_empty() {
                visit(at);
            }
        }
        match stack.last() {
            Some(&(_, at)) => Err(CompileError::UnbalancedBrackets { pos: self.pos(at) }),
            None => Ok(()),
        }
    }

    /// Split a range at each top-level `separator`.
    fn split_top_level(
        &self,
        r: Range<usize>,
        separator: &TokenKind,
    ) -> Result<Vec<Range<usize>>, CompileError> {
        let mut parts = Vec::new();
        let mut start = r.start;
        let end = r.end;
        self.scan_top_level(r, |at| {
            if self.kind(at) == separator {
                parts.push(start..at);
                start = at + 1;
            }
        })?;
        parts.push(start..end);
        Ok(parts)
    }

    fn last_top_level(
        &self,
        r: Range<usize>,
        kind: &TokenKind,
    ) -> Result<Option<usize>, CompileError> {
        let mut last = None;
        self.scan_top_level(r, |at| {
            if self.kind(at) == kind {
                last = Some(at);
            }
        })?;
        Ok(last)
    }

    /// The index of the bracket closing the one at `open`, if it is before `end`.
    fn matching_close(&self, open: usize, end: usize) -> Option<usize> {
        let mut depth = 0usize;
        for at in open..end {
            match self.kind(at) {
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(at);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn compile(source: &str) -> (Expr, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let expr = Expr::compile_with(source, &mut diagnostics);
        (expr, diagnostics)
    }

    fn member(query: Option<Query>, name: &str) -> Expr {
        Expr::MemberField {
            query: query.map(Box::new),
            name: name.to_string(),
            index: None,
            is_offset: false,
        }
    }

    #[test]
    fn test_precedence_and_associativity() {
        let (expr, diagnostics) = compile("a - b - c * 2");
        assert!(diagnostics.is_empty());
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Sub,
                Box::new(Expr::Binary(
                    BinaryOp::Sub,
                    Box::new(member(None, "a")),
                    Box::new(member(None, "b")),
                )),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(member(None, "c")),
                    Box::new(Expr::Constant(2)),
                )),
            )
        );
    }

    #[test]
    fn test_queries() {
        let (expr, diagnostics) = compile("@#Entry[kind=3, #id=x + 1, #=n].data.value");
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        let Expr::MemberField {
            query: Some(query),
            name,
            is_offset: true,
            ..
        } = expr
        else {
            panic!("expected a member field");
        };
        assert_eq!(name, "value");
        let Query::Sub {
            parent: Some(parent),
            field,
            filters,
        } = *query
        else {
            panic!("expected a sub query");
        };
        assert_eq!(field, "data");
        assert!(filters.is_empty());
        let Query::Root {
            type_name,
            global: false,
            filters,
        } = *parent
        else {
            panic!("expected a root query");
        };
        assert_eq!(type_name, "Entry");
        assert_eq!(
            filters.conditions,
            vec![LiteralCondition {
                field: "kind".to_string(),
                value: "3".to_string()
            }]
        );
        assert_eq!(filters.expr_conditions.len(), 1);
        assert_eq!(filters.expr_conditions[0].0, "id");
        assert_eq!(filters.selector.as_deref(), Some(&member(None, "n")));
    }

    #[test]
    fn test_struct_offset_and_intrinsics() {
        let (expr, diagnostics) = compile("@##Table[#=1]");
        assert!(diagnostics.is_empty());
        assert!(matches!(
            expr,
            Expr::StructOffset(query) if matches!(*query, Query::Root { global: true, .. })
        ));

        let (expr, diagnostics) = compile("$arr(@items.v, i + 1)");
        assert!(diagnostics.is_empty());
        assert!(matches!(
            expr,
            Expr::MemberField {
                is_offset: true,
                index: Some(_),
                query: Some(_),
                ..
            }
        ));

        let (expr, _) = compile("$fpnes(#Hdr.magic, \"RIFF\")");
        assert!(matches!(
            expr,
            Expr::FieldPreviewEqualsString { invert: true, ref text, .. } if text == "RIFF"
        ));

        let (expr, _) = compile("$iid(entries[#=0])");
        assert!(matches!(expr, Expr::InstanceId(Some(_))));
    }

    #[test]
    fn test_errors_are_reported() {
        let (expr, diagnostics) = compile("(((");
        assert!(expr.is_error());
        assert_eq!(diagnostics.len(), 1);

        let (_, diagnostics) = compile("#A.#B.x");
        assert!(matches!(
            diagnostics.iter().next(),
            Some(CompileError::BadQuery { .. })
        ));

        let (_, diagnostics) = compile("$fpeqs(x)");
        assert!(matches!(
            diagnostics.iter().next(),
            Some(CompileError::BadIntrinsicArgs { .. })
        ));

        let (_, diagnostics) = compile("#T[a=b=c].x");
        assert!(!diagnostics.is_empty());

        let deep = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        let (expr, diagnostics) = compile(&deep);
        assert!(expr.is_error());
        assert!(matches!(
            diagnostics.iter().next(),
            Some(CompileError::NestingTooDeep { .. })
        ));

        let shallow = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(compile(&shallow).0, Expr::Constant(1));
    }

    #[test]
    fn test_long_operator_chains() {
        let (expr, diagnostics) = compile(&vec!["1"; 50_000].join("+"));
        assert!(expr.is_error());
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            diagnostics.iter().next(),
            Some(CompileError::NestingTooDeep { .. })
        ));

        let (expr, diagnostics) = compile(&vec!["1"; 200].join(" + "));
        assert!(diagnostics.is_empty());
        assert_eq!(expr.evaluate(&crate::MapVariableSource::new()), 200);
    }
}
