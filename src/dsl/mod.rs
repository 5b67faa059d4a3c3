//! Chain description language.
//!
//! A SPICE-flavoured, line-oriented text format listing the stages of a
//! processing chain in signal order, with reusable parameter sets.
//!
//! # Grammar Overview
//!
//! ```text
//! chain       = { line }
//! line        = comment | model | stage | empty
//! comment     = ('#' | ';') { any_char }
//! model       = ".model" name kind '(' { param } ')'
//! stage       = kind name [model_ref] { param }
//! param       = key '=' (number | identifier)
//!
//! kind        = "diode" | "bjt" | "cmos" | "cmos_table" | "jfet"
//!             | "shaper" | "opamp" | "triode"
//! number      = ['-'] digit+ ['.' digit+] [('e'|'E') ['-'|'+'] digit+] [unit_suffix]
//! unit_suffix = 'p' | 'n' | 'u' | 'µ' | 'm' | 'k' | 'K' | 'M' | 'G'
//! identifier  = (letter | '_') { letter | digit | '_' }
//! ```
//!
//! Stage parameters override the referenced model's parameters, which
//! override the stage's defaults. A `cmos_table` stage takes `cmos` models.
//!
//! # Example
//!
//! ```text
//! # germanium fuzz into a tube
//! .model GE diode (c=50n re=500 is=5u)
//!
//! bjt    Q1 bf=120
//! diode  D1 GE side=up
//! triode V1 rk=1.5k
//! ```

mod ast;
mod lexer;
mod parser;

pub use ast::*;
pub use lexer::{parse_value, Lexer, Token, TokenKind};
pub use parser::Parser;

use crate::error::Result;

/// Parse a chain description string into an AST.
pub fn parse(input: &str) -> Result<ChainAst> {
    let lexer = Lexer::new(input);
    let mut parser = Parser::new(lexer)?;
    parser.parse()
}

/// Parse a chain description file.
#[cfg(feature = "cli")]
pub fn parse_file(path: &std::path::Path) -> Result<ChainAst> {
    let content =
        std::fs::read_to_string(path).map_err(|e| crate::error::StageError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
    parse(&content)
}
