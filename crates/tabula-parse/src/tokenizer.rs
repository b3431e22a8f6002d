//! Byte-driven formula tokenizer.
//!
//! Splits `= …` contents into operand / operator / paren / separator
//! tokens. Classification of operands (number, text, logical, error,
//! reference) happens here so the parser proper never re-scans text.

use std::error::Error;
use std::fmt::{self, Display};

use tabula_common::value::parse_number;

const TOKEN_ENDERS: &str = ",) +-*/&=><";

const fn build_token_enders() -> [bool; 256] {
    let mut tbl = [false; 256];
    let bytes = TOKEN_ENDERS.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        tbl[bytes[i] as usize] = true;
        i += 1;
    }
    tbl
}
static TOKEN_ENDERS_TABLE: [bool; 256] = build_token_enders();

#[inline(always)]
fn is_token_ender(c: u8) -> bool {
    TOKEN_ENDERS_TABLE[c as usize]
}

static ERROR_CODES: &[&str] = &[
    "#ERROR!",
    "#CIRCREF!",
    "#REF!",
    "#NAME?",
    "#VALUE!",
    "#DIV/0!",
];

/// A failure while tokenizing a formula.
#[derive(Debug)]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenizerError: {} (at byte {})", self.message, self.pos)
    }
}

impl Error for TokenizerError {}

/// The type of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Literal,
    Operand,
    Func,
    Paren,
    Sep,
    OpPrefix,
    OpInfix,
    Whitespace,
}

/// The subtype of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenSubType {
    None,
    Text,
    Number,
    Logical,
    Error,
    Range,
    Open,
    Close,
    Arg,
}

/// A single formula token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub value: String,
    pub token_type: TokenType,
    pub subtype: TokenSubType,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{:?} subtype: {:?} value: {}>",
            self.token_type, self.subtype, self.value
        )
    }
}

impl Token {
    pub fn new(value: String, token_type: TokenType, subtype: TokenSubType) -> Self {
        Token {
            value,
            token_type,
            subtype,
        }
    }

    /// Classify and build an operand token.
    pub fn make_operand(value: String) -> Self {
        let subtype = if value.starts_with('"') {
            TokenSubType::Text
        } else if value.starts_with('#') {
            TokenSubType::Error
        } else if value.eq_ignore_ascii_case("TRUE") || value.eq_ignore_ascii_case("FALSE") {
            TokenSubType::Logical
        } else if parse_number(&value).is_some() {
            TokenSubType::Number
        } else {
            TokenSubType::Range
        };
        Token::new(value, TokenType::Operand, subtype)
    }

    pub fn is_operator(&self) -> bool {
        matches!(self.token_type, TokenType::OpPrefix | TokenType::OpInfix)
    }

    /// Binding power of an infix operator, or of `u` for the unary prefix.
    /// All infix operators are left-associative.
    pub fn precedence(op: &str) -> Option<u8> {
        match op {
            "u" => Some(5),
            "*" | "/" => Some(4),
            "+" | "-" => Some(3),
            "&" => Some(2),
            "=" | "==" | "<>" | "!=" | "<" | ">" | "<=" | ">=" => Some(1),
            _ => None,
        }
    }
}

/// Tokenizer for worksheet formulas.
pub struct Tokenizer {
    formula: String,
    pub items: Vec<Token>,
    paren_depth: usize,
    /// For each open group, whether it was a function call (affects the
    /// token type of the matching closer).
    group_kinds: Vec<bool>,
    offset: usize,
    token_start: usize,
    token_end: usize,
}

impl Tokenizer {
    /// Tokenize a formula string eagerly.
    pub fn new(formula: &str) -> Result<Self, TokenizerError> {
        let mut tokenizer = Tokenizer {
            formula: formula.to_string(),
            items: Vec::with_capacity(formula.len() / 2),
            paren_depth: 0,
            group_kinds: Vec::with_capacity(8),
            offset: 0,
            token_start: 0,
            token_end: 0,
        };
        tokenizer.parse()?;
        Ok(tokenizer)
    }

    #[inline]
    fn byte_at(&self, i: usize) -> Option<u8> {
        self.formula.as_bytes().get(i).copied()
    }

    #[inline]
    fn has_token(&self) -> bool {
        self.token_end > self.token_start
    }

    #[inline]
    fn start_token(&mut self) {
        self.token_start = self.offset;
        self.token_end = self.offset;
    }

    #[inline]
    fn extend_token(&mut self) {
        self.token_end = self.offset;
    }

    fn parse(&mut self) -> Result<(), TokenizerError> {
        if self.formula.is_empty() {
            return Ok(());
        }

        // Contents without a leading '=' are a single literal.
        if self.formula.as_bytes()[0] != b'=' {
            self.items.push(Token::new(
                self.formula.clone(),
                TokenType::Literal,
                TokenSubType::None,
            ));
            return Ok(());
        }

        self.offset = 1;
        self.start_token();

        while self.offset < self.formula.len() {
            if self.check_scientific_notation() {
                continue;
            }

            let curr = self.formula.as_bytes()[self.offset];

            if is_token_ender(curr) && self.has_token() {
                self.save_token();
                self.start_token();
            }

            match curr {
                b'"' | b'\'' => self.parse_string()?,
                b'#' => self.parse_error_literal()?,
                b' ' | b'\t' | b'\n' | b'\r' => self.parse_whitespace(),
                b'!' if self.byte_at(self.offset + 1) == Some(b'=') => self.parse_operator(),
                b'+' | b'-' | b'*' | b'/' | b'&' | b'=' | b'>' | b'<' => self.parse_operator(),
                b'(' => self.parse_opener(),
                b')' => self.parse_closer()?,
                b',' => self.parse_separator(),
                _ => {
                    if !self.has_token() {
                        self.start_token();
                    }
                    self.offset += 1;
                    self.extend_token();
                }
            }
        }

        if self.has_token() {
            self.save_token();
        }

        if self.paren_depth != 0 {
            return Err(TokenizerError {
                message: "unmatched opening parenthesis".to_string(),
                pos: self.offset,
            });
        }

        Ok(())
    }

    /// Consume a '+' or '-' that continues a scientific-notation number.
    fn check_scientific_notation(&mut self) -> bool {
        if let Some(curr) = self.byte_at(self.offset) {
            if (curr == b'+' || curr == b'-') && self.is_scientific_notation_base() {
                self.offset += 1;
                self.extend_token();
                return true;
            }
        }
        false
    }

    fn is_scientific_notation_base(&self) -> bool {
        if !self.has_token() {
            return false;
        }
        let token = &self.formula.as_bytes()[self.token_start..self.token_end];
        if token.len() < 2 {
            return false;
        }
        let last = token[token.len() - 1];
        if !(last == b'E' || last == b'e') {
            return false;
        }
        if !token[0].is_ascii_digit() {
            return false;
        }
        let mut dot_seen = false;
        for &ch in &token[1..token.len() - 1] {
            match ch {
                b'0'..=b'9' => {}
                b'.' if !dot_seen => dot_seen = true,
                _ => return false,
            }
        }
        true
    }

    fn save_token(&mut self) {
        if self.has_token() {
            let value = self.formula[self.token_start..self.token_end].to_string();
            self.items.push(Token::make_operand(value));
        }
    }

    /// Double-quoted text becomes an operand; a single-quoted chunk (sheet
    /// name) folds into the token being accumulated.
    fn parse_string(&mut self) -> Result<(), TokenizerError> {
        let delim = self.formula.as_bytes()[self.offset];

        if delim == b'"' && self.has_token() {
            self.save_token();
            self.start_token();
        }
        if !self.has_token() {
            self.start_token();
        }

        self.offset += 1;
        while self.offset < self.formula.len() {
            if self.formula.as_bytes()[self.offset] == delim {
                self.offset += 1;
                // A doubled delimiter escapes itself inside double quotes.
                if delim == b'"' && self.byte_at(self.offset) == Some(delim) {
                    self.offset += 1;
                    continue;
                }
                if delim == b'"' {
                    let value = self.formula[self.token_start..self.offset].to_string();
                    self.items
                        .push(Token::new(value, TokenType::Operand, TokenSubType::Text));
                    self.start_token();
                } else {
                    self.extend_token();
                }
                return Ok(());
            }
            self.offset += 1;
        }

        Err(TokenizerError {
            message: "reached end of formula while parsing string".to_string(),
            pos: self.offset,
        })
    }

    fn parse_error_literal(&mut self) -> Result<(), TokenizerError> {
        if self.has_token() {
            self.save_token();
            self.start_token();
        }

        let rest = &self.formula.as_bytes()[self.offset..];
        for &code in ERROR_CODES {
            let code_bytes = code.as_bytes();
            if rest.len() >= code_bytes.len()
                && rest[..code_bytes.len()].eq_ignore_ascii_case(code_bytes)
            {
                // Canonicalise case so downstream matching is exact.
                self.items.push(Token::new(
                    code.to_string(),
                    TokenType::Operand,
                    TokenSubType::Error,
                ));
                self.offset += code_bytes.len();
                self.start_token();
                return Ok(());
            }
        }

        Err(TokenizerError {
            message: format!("invalid error literal at position {}", self.offset),
            pos: self.offset,
        })
    }

    fn parse_whitespace(&mut self) {
        self.save_token();
        let ws_start = self.offset;
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.byte_at(self.offset) {
            self.offset += 1;
        }
        self.items.push(Token::new(
            self.formula[ws_start..self.offset].to_string(),
            TokenType::Whitespace,
            TokenSubType::None,
        ));
        self.start_token();
    }

    fn parse_operator(&mut self) {
        self.save_token();

        if self.offset + 1 < self.formula.len() {
            let two = &self.formula[self.offset..self.offset + 2];
            if matches!(two, ">=" | "<=" | "<>" | "==" | "!=") {
                self.items.push(Token::new(
                    two.to_string(),
                    TokenType::OpInfix,
                    TokenSubType::None,
                ));
                self.offset += 2;
                self.start_token();
                return;
            }
        }

        let curr = self.formula.as_bytes()[self.offset];
        let token_type = match curr {
            b'+' | b'-' => {
                let prev = self
                    .items
                    .iter()
                    .rev()
                    .find(|t| t.token_type != TokenType::Whitespace);
                match prev {
                    Some(p)
                        if p.subtype == TokenSubType::Close
                            || p.token_type == TokenType::Operand =>
                    {
                        TokenType::OpInfix
                    }
                    _ => TokenType::OpPrefix,
                }
            }
            _ => TokenType::OpInfix,
        };

        self.items.push(Token::new(
            (curr as char).to_string(),
            token_type,
            TokenSubType::None,
        ));
        self.offset += 1;
        self.start_token();
    }

    fn parse_opener(&mut self) {
        let token = if self.has_token() {
            // NAME( — a function call opener.
            let value = self.formula[self.token_start..self.offset + 1].to_string();
            Token::new(value, TokenType::Func, TokenSubType::Open)
        } else {
            Token::new("(".to_string(), TokenType::Paren, TokenSubType::Open)
        };
        let is_func = token.token_type == TokenType::Func;
        self.items.push(token);
        self.paren_depth += 1;
        // Remember what kind of group we opened so the closer matches.
        self.group_kinds.push(is_func);
        self.offset += 1;
        self.start_token();
    }

    fn parse_closer(&mut self) -> Result<(), TokenizerError> {
        self.save_token();
        if self.paren_depth == 0 {
            return Err(TokenizerError {
                message: format!("no matching opener for ')' at position {}", self.offset),
                pos: self.offset,
            });
        }
        self.paren_depth -= 1;
        let was_func = self.group_kinds.pop().unwrap_or(false);
        self.items.push(Token::new(
            ")".to_string(),
            if was_func {
                TokenType::Func
            } else {
                TokenType::Paren
            },
            TokenSubType::Close,
        ));
        self.offset += 1;
        self.start_token();
        Ok(())
    }

    fn parse_separator(&mut self) {
        self.save_token();
        self.items.push(Token::new(
            ",".to_string(),
            TokenType::Sep,
            TokenSubType::Arg,
        ));
        self.offset += 1;
        self.start_token();
    }

    /// Reconstruct the formula from its tokens.
    pub fn render(&self) -> String {
        if self.items.is_empty() {
            String::new()
        } else if self.items[0].token_type == TokenType::Literal {
            self.items[0].value.clone()
        } else {
            let concatenated: String = self.items.iter().map(|t| t.value.as_str()).collect();
            format!("={concatenated}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(formula: &str) -> Vec<(TokenType, String)> {
        Tokenizer::new(formula)
            .unwrap()
            .items
            .into_iter()
            .filter(|t| t.token_type != TokenType::Whitespace)
            .map(|t| (t.token_type, t.value))
            .collect()
    }

    #[test]
    fn plain_literal_is_one_token() {
        let toks = kinds("hello world");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].0, TokenType::Literal);
    }

    #[test]
    fn splits_arithmetic() {
        let toks = kinds("=1+2*3");
        let values: Vec<&str> = toks.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(values, ["1", "+", "2", "*", "3"]);
    }

    #[test]
    fn classifies_operands() {
        let tz = Tokenizer::new("=A1&\"x\"&TRUE&#REF!&1.5").unwrap();
        let subs: Vec<TokenSubType> = tz
            .items
            .iter()
            .filter(|t| t.token_type == TokenType::Operand)
            .map(|t| t.subtype)
            .collect();
        assert_eq!(
            subs,
            [
                TokenSubType::Range,
                TokenSubType::Text,
                TokenSubType::Logical,
                TokenSubType::Error,
                TokenSubType::Number,
            ]
        );
    }

    #[test]
    fn sheet_qualified_reference_is_one_operand() {
        let toks = kinds("='My Sheet'!A1+Other!B2");
        let values: Vec<&str> = toks.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(values, ["'My Sheet'!A1", "+", "Other!B2"]);
    }

    #[test]
    fn bang_equals_is_an_operator() {
        let toks = kinds("=A1!=B1");
        let values: Vec<&str> = toks.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(values, ["A1", "!=", "B1"]);
    }

    #[test]
    fn double_equals_is_one_operator() {
        let toks = kinds("=A1==B1");
        let values: Vec<&str> = toks.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(values, ["A1", "==", "B1"]);
    }

    #[test]
    fn function_call_tokens() {
        let toks = kinds("=SUM(A1:B2,3)");
        assert_eq!(toks[0], (TokenType::Func, "SUM(".to_string()));
        assert_eq!(toks[1], (TokenType::Operand, "A1:B2".to_string()));
        assert_eq!(toks[2], (TokenType::Sep, ",".to_string()));
        assert_eq!(toks[3], (TokenType::Operand, "3".to_string()));
        assert_eq!(toks[4], (TokenType::Func, ")".to_string()));
    }

    #[test]
    fn escaped_quotes_inside_text() {
        let tz = Tokenizer::new(r#"="a""b""#).unwrap();
        let text: Vec<&Token> = tz
            .items
            .iter()
            .filter(|t| t.subtype == TokenSubType::Text)
            .collect();
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].value, r#""a""b""#);
    }

    #[test]
    fn error_literals_are_case_insensitive() {
        let tz = Tokenizer::new("=#div/0!").unwrap();
        assert_eq!(tz.items[0].value, "#DIV/0!");
        assert_eq!(tz.items[0].subtype, TokenSubType::Error);
    }

    #[test]
    fn scientific_notation_absorbs_sign() {
        let toks = kinds("=1.5e+3+2");
        let values: Vec<&str> = toks.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(values, ["1.5e+3", "+", "2"]);
    }

    #[test]
    fn unary_versus_infix_minus() {
        let toks = kinds("=-1- -2");
        let types: Vec<TokenType> = toks.iter().map(|(t, _)| *t).collect();
        assert_eq!(
            types,
            [
                TokenType::OpPrefix,
                TokenType::Operand,
                TokenType::OpInfix,
                TokenType::OpPrefix,
                TokenType::Operand,
            ]
        );
    }

    #[test]
    fn unbalanced_parens_error() {
        assert!(Tokenizer::new("=(1+2").is_err());
        assert!(Tokenizer::new("=1+2)").is_err());
    }

    #[test]
    fn unterminated_string_errors() {
        assert!(Tokenizer::new("=\"abc").is_err());
    }

    #[test]
    fn render_roundtrip() {
        let tz = Tokenizer::new("=SUM(A1:B2, 3) + 'My Sheet'!C4").unwrap();
        assert_eq!(tz.render(), "=SUM(A1:B2, 3) + 'My Sheet'!C4");
    }
}
