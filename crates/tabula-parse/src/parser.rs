//! Formula parser: tokens -> AST, plus the AST transforms the engine
//! needs (canonical re-rendering, reference shifting, sheet renames).

use std::error::Error;
use std::fmt::{self, Display};

use once_cell::sync::Lazy;
use tabula_common::value::parse_number;
use tabula_common::{
    letters_to_column, CellError, CellErrorKind, CellValue, Coord, MAX_COL, MAX_ROW,
};

use crate::tokenizer::{Token, TokenSubType, TokenType, Tokenizer, TokenizerError};

/// A failure while parsing a formula.
#[derive(Debug)]
pub struct ParserError {
    pub message: String,
    pub position: Option<usize>,
}

impl Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pos) = self.position {
            write!(f, "ParserError at token {}: {}", pos, self.message)
        } else {
            write!(f, "ParserError: {}", self.message)
        }
    }
}

impl Error for ParserError {}

impl From<TokenizerError> for ParserError {
    fn from(err: TokenizerError) -> Self {
        ParserError {
            message: err.message,
            position: Some(err.pos),
        }
    }
}

// Column rendering lookup for the common A..ZZ band.
static COLUMN_LOOKUP: Lazy<Vec<String>> = Lazy::new(|| {
    let mut cols = Vec::with_capacity(702);
    for c in b'A'..=b'Z' {
        cols.push(String::from(c as char));
    }
    for c1 in b'A'..=b'Z' {
        for c2 in b'A'..=b'Z' {
            cols.push(format!("{}{}", c1 as char, c2 as char));
        }
    }
    cols
});

fn render_column(col: u32) -> String {
    if col >= 1 && col <= 702 {
        return COLUMN_LOOKUP[(col - 1) as usize].clone();
    }
    tabula_common::column_to_letters(col)
}

/// One corner of a reference: 1-based column/row plus `$` anchors.
///
/// The fields may exceed the grid limits — such references are
/// syntactically valid and evaluate to `#REF!`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub col: u32,
    pub row: u32,
    pub col_abs: bool,
    pub row_abs: bool,
}

impl CellRef {
    pub fn new(col: u32, row: u32, col_abs: bool, row_abs: bool) -> Self {
        Self {
            col,
            row,
            col_abs,
            row_abs,
        }
    }

    /// Parse `$AB$12`-style text. Rejects leading-zero rows; overflowing
    /// columns/rows saturate so they stay representable (and out of grid).
    pub fn parse(s: &str) -> Option<CellRef> {
        let bytes = s.as_bytes();
        let mut i = 0;

        let col_abs = bytes.first() == Some(&b'$');
        if col_abs {
            i += 1;
        }

        let col_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        if i == col_start {
            return None;
        }
        let col = letters_to_column(&s[col_start..i])?;

        let row_abs = bytes.get(i) == Some(&b'$');
        if row_abs {
            i += 1;
        }

        let row_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == row_start || i != bytes.len() {
            return None;
        }
        if bytes[row_start] == b'0' {
            return None;
        }
        let row = s[row_start..i].parse::<u32>().unwrap_or(u32::MAX);

        Some(CellRef::new(col, row, col_abs, row_abs))
    }

    pub fn in_bounds(&self) -> bool {
        (1..=MAX_COL).contains(&self.col) && (1..=MAX_ROW).contains(&self.row)
    }

    pub fn coord(&self) -> Option<Coord> {
        Coord::from_one_based(self.col, self.row).ok()
    }

    /// Move the relative components by a delta; anchored components stay.
    /// Returns `None` when the result leaves the grid.
    pub fn shifted(&self, dcol: i64, drow: i64) -> Option<CellRef> {
        let col = if self.col_abs {
            self.col as i64
        } else {
            self.col as i64 + dcol
        };
        let row = if self.row_abs {
            self.row as i64
        } else {
            self.row as i64 + drow
        };
        if col < 1 || col > MAX_COL as i64 || row < 1 || row > MAX_ROW as i64 {
            return None;
        }
        Some(CellRef::new(
            col as u32,
            row as u32,
            self.col_abs,
            self.row_abs,
        ))
    }
}

impl Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.col_abs {
            write!(f, "$")?;
        }
        write!(f, "{}", render_column(self.col))?;
        if self.row_abs {
            write!(f, "$")?;
        }
        write!(f, "{}", self.row)
    }
}

/// True when a sheet name can appear unquoted in a formula.
pub fn is_unquoted_sheet_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_sheet_prefix(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if is_unquoted_sheet_name(name) {
        write!(f, "{name}!")
    } else {
        write!(f, "'{name}'!")
    }
}

/// A reference to one cell or a rectangular range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    Cell {
        sheet: Option<String>,
        cell: CellRef,
    },
    Range {
        sheet: Option<String>,
        start: CellRef,
        end: CellRef,
    },
}

impl ReferenceType {
    /// Parse a reference string: `A1`, `$B$2`, `Sheet!C3`, `'A b'!D4:E9`.
    pub fn from_string(reference: &str) -> Result<Self, ParserError> {
        let (sheet, ref_part) = Self::extract_sheet_name(reference)?;

        if let Some(colon) = ref_part.find(':') {
            let start = CellRef::parse(&ref_part[..colon]);
            let end = CellRef::parse(&ref_part[colon + 1..]);
            match (start, end) {
                (Some(start), Some(end)) => Ok(ReferenceType::Range { sheet, start, end }),
                _ => Err(ParserError {
                    message: format!("invalid range reference '{reference}'"),
                    position: None,
                }),
            }
        } else {
            match CellRef::parse(&ref_part) {
                Some(cell) => Ok(ReferenceType::Cell { sheet, cell }),
                None => Err(ParserError {
                    message: format!("invalid cell reference '{reference}'"),
                    position: None,
                }),
            }
        }
    }

    fn extract_sheet_name(reference: &str) -> Result<(Option<String>, String), ParserError> {
        let bytes = reference.as_bytes();
        if bytes.first() == Some(&b'\'') {
            // Quoted name: everything up to the closing quote, which must
            // be followed by '!'.
            let rest = &reference[1..];
            if let Some(close) = rest.find('\'') {
                if rest.as_bytes().get(close + 1) == Some(&b'!') {
                    let name = &rest[..close];
                    if name.is_empty() {
                        return Err(ParserError {
                            message: "empty quoted sheet name".to_string(),
                            position: None,
                        });
                    }
                    return Ok((Some(name.to_string()), rest[close + 2..].to_string()));
                }
            }
            return Err(ParserError {
                message: format!("malformed quoted sheet name in '{reference}'"),
                position: None,
            });
        }

        if let Some(bang) = reference.find('!') {
            let name = &reference[..bang];
            if !is_unquoted_sheet_name(name) {
                return Err(ParserError {
                    message: format!("invalid unquoted sheet name '{name}'"),
                    position: None,
                });
            }
            return Ok((Some(name.to_string()), reference[bang + 1..].to_string()));
        }

        Ok((None, reference.to_string()))
    }

    pub fn sheet(&self) -> Option<&str> {
        match self {
            ReferenceType::Cell { sheet, .. } | ReferenceType::Range { sheet, .. } => {
                sheet.as_deref()
            }
        }
    }

    /// Corner coordinates normalised so the first is the coordinate-wise
    /// minimum. `None` when either corner is out of grid.
    pub fn normalized_corners(start: &CellRef, end: &CellRef) -> Option<(Coord, Coord)> {
        if !start.in_bounds() || !end.in_bounds() {
            return None;
        }
        let (c1, c2) = (start.col.min(end.col), start.col.max(end.col));
        let (r1, r2) = (start.row.min(end.row), start.row.max(end.row));
        Some((
            Coord::from_one_based(c1, r1).ok()?,
            Coord::from_one_based(c2, r2).ok()?,
        ))
    }
}

impl Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceType::Cell { sheet, cell } => {
                if let Some(name) = sheet {
                    write_sheet_prefix(f, name)?;
                }
                write!(f, "{cell}")
            }
            ReferenceType::Range { sheet, start, end } => {
                if let Some(name) = sheet {
                    write_sheet_prefix(f, name)?;
                }
                write!(f, "{start}:{end}")
            }
        }
    }
}

/// A parsed formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ASTNode {
    Literal(CellValue),
    Reference(ReferenceType),
    UnaryOp {
        op: String,
        expr: Box<ASTNode>,
    },
    BinaryOp {
        op: String,
        left: Box<ASTNode>,
        right: Box<ASTNode>,
    },
    Function {
        name: String,
        args: Vec<ASTNode>,
    },
}

const UNARY_PRECEDENCE: u8 = 5;

impl ASTNode {
    /// Render canonical formula text including the leading `=`.
    pub fn to_formula(&self) -> String {
        let mut out = String::with_capacity(32);
        out.push('=');
        self.write_expr(&mut out, 0, false);
        out
    }

    fn write_expr(&self, out: &mut String, parent_prec: u8, right_side: bool) {
        match self {
            ASTNode::Literal(v) => write_literal(out, v),
            ASTNode::Reference(r) => out.push_str(&r.to_string()),
            ASTNode::UnaryOp { op, expr } => {
                out.push_str(op);
                let needs_parens =
                    matches!(expr.as_ref(), ASTNode::BinaryOp { op, .. } if Token::precedence(op).unwrap_or(0) < UNARY_PRECEDENCE);
                if needs_parens {
                    out.push('(');
                    expr.write_expr(out, 0, false);
                    out.push(')');
                } else {
                    expr.write_expr(out, UNARY_PRECEDENCE, false);
                }
            }
            ASTNode::BinaryOp { op, left, right } => {
                let prec = Token::precedence(op).unwrap_or(0);
                let wrap = prec < parent_prec || (prec == parent_prec && right_side);
                if wrap {
                    out.push('(');
                }
                left.write_expr(out, prec, false);
                out.push_str(op);
                right.write_expr(out, prec, true);
                if wrap {
                    out.push(')');
                }
            }
            ASTNode::Function { name, args } => {
                out.push_str(name);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    arg.write_expr(out, 0, false);
                }
                out.push(')');
            }
        }
    }

    /// True when any reference carries a sheet qualifier equal to `name`
    /// (case-insensitively).
    pub fn references_sheet(&self, name: &str) -> bool {
        match self {
            ASTNode::Reference(r) => r
                .sheet()
                .map(|s| s.eq_ignore_ascii_case(name))
                .unwrap_or(false),
            ASTNode::Literal(_) => false,
            ASTNode::UnaryOp { expr, .. } => expr.references_sheet(name),
            ASTNode::BinaryOp { left, right, .. } => {
                left.references_sheet(name) || right.references_sheet(name)
            }
            ASTNode::Function { args, .. } => args.iter().any(|a| a.references_sheet(name)),
        }
    }

    /// Re-qualify every reference to sheet `old` with `new`.
    pub fn with_renamed_sheet(&self, old: &str, new: &str) -> ASTNode {
        let rename = |sheet: &Option<String>| -> Option<String> {
            match sheet {
                Some(s) if s.eq_ignore_ascii_case(old) => Some(new.to_string()),
                other => other.clone(),
            }
        };
        match self {
            ASTNode::Reference(ReferenceType::Cell { sheet, cell }) => {
                ASTNode::Reference(ReferenceType::Cell {
                    sheet: rename(sheet),
                    cell: *cell,
                })
            }
            ASTNode::Reference(ReferenceType::Range { sheet, start, end }) => {
                ASTNode::Reference(ReferenceType::Range {
                    sheet: rename(sheet),
                    start: *start,
                    end: *end,
                })
            }
            ASTNode::Literal(v) => ASTNode::Literal(v.clone()),
            ASTNode::UnaryOp { op, expr } => ASTNode::UnaryOp {
                op: op.clone(),
                expr: Box::new(expr.with_renamed_sheet(old, new)),
            },
            ASTNode::BinaryOp { op, left, right } => ASTNode::BinaryOp {
                op: op.clone(),
                left: Box::new(left.with_renamed_sheet(old, new)),
                right: Box::new(right.with_renamed_sheet(old, new)),
            },
            ASTNode::Function { name, args } => ASTNode::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.with_renamed_sheet(old, new)).collect(),
            },
        }
    }

    /// Shift every relative reference component by the given deltas.
    /// A reference pushed outside the grid becomes the `#REF!` literal.
    pub fn shifted(&self, dcol: i64, drow: i64) -> ASTNode {
        let bad_ref = || ASTNode::Literal(CellValue::Error(CellError::new(CellErrorKind::Ref)));
        match self {
            ASTNode::Reference(ReferenceType::Cell { sheet, cell }) => {
                match cell.shifted(dcol, drow) {
                    Some(cell) => ASTNode::Reference(ReferenceType::Cell {
                        sheet: sheet.clone(),
                        cell,
                    }),
                    None => bad_ref(),
                }
            }
            ASTNode::Reference(ReferenceType::Range { sheet, start, end }) => {
                match (start.shifted(dcol, drow), end.shifted(dcol, drow)) {
                    (Some(start), Some(end)) => ASTNode::Reference(ReferenceType::Range {
                        sheet: sheet.clone(),
                        start,
                        end,
                    }),
                    _ => bad_ref(),
                }
            }
            ASTNode::Literal(v) => ASTNode::Literal(v.clone()),
            ASTNode::UnaryOp { op, expr } => ASTNode::UnaryOp {
                op: op.clone(),
                expr: Box::new(expr.shifted(dcol, drow)),
            },
            ASTNode::BinaryOp { op, left, right } => ASTNode::BinaryOp {
                op: op.clone(),
                left: Box::new(left.shifted(dcol, drow)),
                right: Box::new(right.shifted(dcol, drow)),
            },
            ASTNode::Function { name, args } => ASTNode::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.shifted(dcol, drow)).collect(),
            },
        }
    }
}

fn write_literal(out: &mut String, v: &CellValue) {
    match v {
        CellValue::Number(n) => out.push_str(&n.to_string()),
        CellValue::Text(s) => {
            out.push('"');
            out.push_str(&s.replace('"', "\"\""));
            out.push('"');
        }
        CellValue::Boolean(b) => out.push_str(if *b { "TRUE" } else { "FALSE" }),
        CellValue::Error(e) => out.push_str(&e.kind.to_string()),
        CellValue::Empty => {}
    }
}

/// Precedence-climbing parser over a token stream.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        let filtered = tokens
            .into_iter()
            .filter(|t| t.token_type != TokenType::Whitespace)
            .collect();
        Parser {
            tokens: filtered,
            position: 0,
        }
    }

    pub fn parse(&mut self) -> Result<ASTNode, ParserError> {
        if self.tokens.is_empty() {
            return Err(ParserError {
                message: "no tokens to parse".to_string(),
                position: None,
            });
        }
        let ast = self.parse_expression()?;
        if self.position < self.tokens.len() {
            return Err(ParserError {
                message: format!("unexpected token {}", self.tokens[self.position]),
                position: Some(self.position),
            });
        }
        validate_range_placement(&ast, false)?;
        Ok(ast)
    }

    fn parse_expression(&mut self) -> Result<ASTNode, ParserError> {
        self.parse_binary_op(0)
    }

    fn parse_binary_op(&mut self, min_precedence: u8) -> Result<ASTNode, ParserError> {
        let mut left = self.parse_unary_op()?;

        while self.position < self.tokens.len() {
            let token = &self.tokens[self.position];
            if token.token_type != TokenType::OpInfix {
                break;
            }
            let precedence = Token::precedence(&token.value).unwrap_or(0);
            if precedence < min_precedence {
                break;
            }

            let op = self.tokens[self.position].value.clone();
            self.position += 1;

            // Left-associative: the right operand binds one level tighter.
            let right = self.parse_binary_op(precedence + 1)?;
            left = ASTNode::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary_op(&mut self) -> Result<ASTNode, ParserError> {
        if self.position < self.tokens.len()
            && self.tokens[self.position].token_type == TokenType::OpPrefix
        {
            let op = self.tokens[self.position].value.clone();
            self.position += 1;
            let expr = self.parse_unary_op()?;
            return Ok(ASTNode::UnaryOp {
                op,
                expr: Box::new(expr),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ASTNode, ParserError> {
        let token = self
            .tokens
            .get(self.position)
            .ok_or_else(|| ParserError {
                message: "unexpected end of formula".to_string(),
                position: Some(self.position),
            })?
            .clone();

        match token.token_type {
            TokenType::Operand => {
                self.position += 1;
                self.parse_operand(token)
            }
            TokenType::Func if token.subtype == TokenSubType::Open => {
                self.position += 1;
                self.parse_function(token)
            }
            TokenType::Paren if token.subtype == TokenSubType::Open => {
                self.position += 1;
                let expr = self.parse_expression()?;
                let close = self.tokens.get(self.position);
                let ok = matches!(
                    close,
                    Some(t) if t.token_type == TokenType::Paren && t.subtype == TokenSubType::Close
                );
                if !ok {
                    return Err(ParserError {
                        message: "expected closing parenthesis".to_string(),
                        position: Some(self.position),
                    });
                }
                self.position += 1;
                Ok(expr)
            }
            _ => Err(ParserError {
                message: format!("unexpected token {token}"),
                position: Some(self.position),
            }),
        }
    }

    fn parse_operand(&mut self, token: Token) -> Result<ASTNode, ParserError> {
        match token.subtype {
            TokenSubType::Number => {
                let value = parse_number(&token.value).ok_or_else(|| ParserError {
                    message: format!("invalid number '{}'", token.value),
                    position: Some(self.position),
                })?;
                Ok(ASTNode::Literal(CellValue::Number(value)))
            }
            TokenSubType::Text => {
                let inner = &token.value[1..token.value.len() - 1];
                Ok(ASTNode::Literal(CellValue::Text(
                    inner.replace("\"\"", "\""),
                )))
            }
            TokenSubType::Logical => Ok(ASTNode::Literal(CellValue::Boolean(
                token.value.eq_ignore_ascii_case("TRUE"),
            ))),
            TokenSubType::Error => {
                let kind = CellErrorKind::parse(&token.value).ok_or_else(|| ParserError {
                    message: format!("invalid error literal '{}'", token.value),
                    position: Some(self.position),
                })?;
                Ok(ASTNode::Literal(CellValue::Error(CellError::new(kind))))
            }
            TokenSubType::Range => {
                let reference = ReferenceType::from_string(&token.value)?;
                Ok(ASTNode::Reference(reference))
            }
            _ => Err(ParserError {
                message: format!("unexpected operand {token}"),
                position: Some(self.position),
            }),
        }
    }

    fn parse_function(&mut self, func_token: Token) -> Result<ASTNode, ParserError> {
        let name = func_token.value[..func_token.value.len() - 1].to_string();
        let args = self.parse_function_arguments()?;
        Ok(ASTNode::Function { name, args })
    }

    fn parse_function_arguments(&mut self) -> Result<Vec<ASTNode>, ParserError> {
        let mut args = Vec::new();

        if self.at_func_close() {
            self.position += 1;
            return Ok(args);
        }

        args.push(self.parse_expression()?);

        while self.position < self.tokens.len() {
            let token = &self.tokens[self.position];
            if token.token_type == TokenType::Sep {
                self.position += 1;
                args.push(self.parse_expression()?);
            } else if self.at_func_close() {
                self.position += 1;
                return Ok(args);
            } else {
                return Err(ParserError {
                    message: format!("expected ',' or ')' in argument list, got {token}"),
                    position: Some(self.position),
                });
            }
        }

        Err(ParserError {
            message: "unterminated argument list".to_string(),
            position: Some(self.position),
        })
    }

    fn at_func_close(&self) -> bool {
        matches!(
            self.tokens.get(self.position),
            Some(t) if t.token_type == TokenType::Func && t.subtype == TokenSubType::Close
        )
    }
}

/// Ranges are only legal as direct function arguments.
fn validate_range_placement(node: &ASTNode, range_ok: bool) -> Result<(), ParserError> {
    match node {
        ASTNode::Reference(ReferenceType::Range { .. }) => {
            if range_ok {
                Ok(())
            } else {
                Err(ParserError {
                    message: "cell range used outside a function argument".to_string(),
                    position: None,
                })
            }
        }
        ASTNode::Reference(_) | ASTNode::Literal(_) => Ok(()),
        ASTNode::UnaryOp { expr, .. } => validate_range_placement(expr, false),
        ASTNode::BinaryOp { left, right, .. } => {
            validate_range_placement(left, false)?;
            validate_range_placement(right, false)
        }
        ASTNode::Function { args, .. } => {
            for arg in args {
                validate_range_placement(arg, true)?;
            }
            Ok(())
        }
    }
}

/// Parse `= …` contents into an AST.
pub fn parse_formula(formula: &str) -> Result<ASTNode, ParserError> {
    if !formula.starts_with('=') {
        return Err(ParserError {
            message: "formulas must start with '='".to_string(),
            position: None,
        });
    }
    let tokens = Tokenizer::new(formula)?.items;
    Parser::new(tokens).parse()
}

/// Parse text as a single (optionally sheet-qualified) cell reference.
pub fn parse_cell_reference(text: &str) -> Option<(Option<String>, CellRef)> {
    match ReferenceType::from_string(text.trim()) {
        Ok(ReferenceType::Cell { sheet, cell }) => Some((sheet, cell)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(formula: &str) -> ASTNode {
        parse_formula(formula).unwrap()
    }

    #[test]
    fn cell_ref_parse_and_anchors() {
        assert_eq!(
            CellRef::parse("$AB$12"),
            Some(CellRef::new(28, 12, true, true))
        );
        assert_eq!(CellRef::parse("c3"), Some(CellRef::new(3, 3, false, false)));
        assert_eq!(CellRef::parse("A0"), None);
        assert_eq!(CellRef::parse("A01"), None);
        assert_eq!(CellRef::parse("1A"), None);
        assert_eq!(CellRef::parse("A1B"), None);
    }

    #[test]
    fn out_of_grid_refs_are_syntactically_valid() {
        let r = CellRef::parse("ZZZZZ1").unwrap();
        assert!(!r.in_bounds());
        let r = CellRef::parse("A99999999").unwrap();
        assert!(!r.in_bounds());
    }

    #[test]
    fn shifted_respects_anchors() {
        let r = CellRef::parse("$B3").unwrap();
        let s = r.shifted(2, 2).unwrap();
        assert_eq!(s.to_string(), "$B5");
        let r = CellRef::parse("B$3").unwrap();
        let s = r.shifted(2, 2).unwrap();
        assert_eq!(s.to_string(), "D$3");
    }

    #[test]
    fn shifted_out_of_grid_is_none() {
        let r = CellRef::parse("A1").unwrap();
        assert!(r.shifted(-1, 0).is_none());
        assert!(r.shifted(0, -1).is_none());
    }

    #[test]
    fn precedence_shapes_the_tree() {
        let ast = parse("=1+2*3");
        match ast {
            ASTNode::BinaryOp { op, right, .. } => {
                assert_eq!(op, "+");
                assert!(matches!(*right, ASTNode::BinaryOp { ref op, .. } if op == "*"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comparison_binds_loosest() {
        let ast = parse("=1+2<3&\"x\"");
        match ast {
            ASTNode::BinaryOp { op, .. } => assert_eq!(op, "<"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn concat_binds_between_comparison_and_additive() {
        // & tighter than <, looser than +: (1+2) & (3) parsed under <
        let ast = parse("=\"a\"&1+2");
        match ast {
            ASTNode::BinaryOp { op, right, .. } => {
                assert_eq!(op, "&");
                assert!(matches!(*right, ASTNode::BinaryOp { ref op, .. } if op == "+"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn left_associativity() {
        let ast = parse("=1-2-3");
        match ast {
            ASTNode::BinaryOp { op, left, .. } => {
                assert_eq!(op, "-");
                assert!(matches!(*left, ASTNode::BinaryOp { ref op, .. } if op == "-"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn function_call_with_range() {
        let ast = parse("=SUM(A1:B2, 3)");
        match ast {
            ASTNode::Function { name, args } => {
                assert_eq!(name, "SUM");
                assert_eq!(args.len(), 2);
                assert!(matches!(
                    args[0],
                    ASTNode::Reference(ReferenceType::Range { .. })
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn range_outside_function_is_rejected() {
        assert!(parse_formula("=A1:B2").is_err());
        assert!(parse_formula("=A1:B2+1").is_err());
        assert!(parse_formula("=SUM(A1:B2)+1").is_ok());
    }

    #[test]
    fn sheet_qualified_references() {
        let ast = parse("='My Sheet'!A1+Data!B2");
        match ast {
            ASTNode::BinaryOp { left, right, .. } => {
                match *left {
                    ASTNode::Reference(ReferenceType::Cell { ref sheet, .. }) => {
                        assert_eq!(sheet.as_deref(), Some("My Sheet"));
                    }
                    ref other => panic!("unexpected {other:?}"),
                }
                match *right {
                    ASTNode::Reference(ReferenceType::Cell { ref sheet, .. }) => {
                        assert_eq!(sheet.as_deref(), Some("Data"));
                    }
                    ref other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_unquoted_sheet_name_fails() {
        assert!(parse_formula("=9Sheet!A1").is_err());
    }

    #[test]
    fn rendering_preserves_semantics() {
        for f in [
            "=1+2*3",
            "=(1+2)*3",
            "=1-(2-3)",
            "=-(1+2)",
            "=SUM(A1:B2, 3)",
            "=\"a\"\"b\"&C1",
            "='My Sheet'!$A$1<>Data!B2",
            "=IF(A1>2, \"big\", \"small\")",
        ] {
            let ast = parse(f);
            let rendered = ast.to_formula();
            let reparsed = parse_formula(&rendered).unwrap();
            assert_eq!(ast, reparsed, "{f} -> {rendered}");
        }
    }

    #[test]
    fn rename_sheet_rewrites_only_matching_qualifiers() {
        let ast = parse("=S1!A1 & \"S1!A1\" & Other!B2");
        let renamed = ast.with_renamed_sheet("s1", "My Sheet");
        let text = renamed.to_formula();
        assert_eq!(text, "='My Sheet'!A1&\"S1!A1\"&Other!B2");
    }

    #[test]
    fn rename_drops_unneeded_quotes() {
        let ast = parse("='Old Name'!A1");
        let renamed = ast.with_renamed_sheet("Old Name", "Plain");
        assert_eq!(renamed.to_formula(), "=Plain!A1");
    }

    #[test]
    fn shift_rewrites_relative_components() {
        let ast = parse("=A1+$A1+A$1+$A$1");
        let shifted = ast.shifted(3, 3);
        assert_eq!(shifted.to_formula(), "=D4+$A4+D$1+$A$1");
    }

    #[test]
    fn shift_out_of_grid_becomes_ref_literal() {
        let ast = parse("=A1+B2");
        let shifted = ast.shifted(-1, 0);
        assert_eq!(shifted.to_formula(), "=#REF!+A2");
    }

    #[test]
    fn shift_range_corner_out_of_grid_poisons_whole_range() {
        let ast = parse("=SUM(A1:B2)");
        let shifted = ast.shifted(0, -1);
        assert_eq!(shifted.to_formula(), "=SUM(#REF!)");
    }

    #[test]
    fn parse_error_cases() {
        for f in ["=", "=1+", "=SUM(", "=SUM(1,)", "=)", "=1 2", "=A1 B2"] {
            assert!(parse_formula(f).is_err(), "{f} should fail");
        }
    }

    #[test]
    fn normalized_corners_orders_min_first() {
        let start = CellRef::parse("B5").unwrap();
        let end = CellRef::parse("A2").unwrap();
        let (tl, br) = ReferenceType::normalized_corners(&start, &end).unwrap();
        assert_eq!(tl.to_a1(), "A2");
        assert_eq!(br.to_a1(), "B5");
    }

    #[test]
    fn indirect_style_reference_parsing() {
        let (sheet, cell) = parse_cell_reference("'My Sheet'!$B$2").unwrap();
        assert_eq!(sheet.as_deref(), Some("My Sheet"));
        assert_eq!(cell, CellRef::new(2, 2, true, true));
        assert!(parse_cell_reference("A1:B2").is_none());
        assert!(parse_cell_reference("nope!").is_none());
    }
}
