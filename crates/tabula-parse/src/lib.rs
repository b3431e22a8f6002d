pub mod parser;
pub mod tokenizer;

pub use parser::{
    is_unquoted_sheet_name, parse_cell_reference, parse_formula, ASTNode, CellRef, ParserError,
    ReferenceType,
};
pub use tokenizer::{Token, TokenSubType, TokenType, Tokenizer, TokenizerError};
