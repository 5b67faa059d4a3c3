//! Lexer (tokenizer) for the chain description language.

use crate::error::{Result, StageError};

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The token's text
    pub text: String,
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
}

/// Token types in the language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// An identifier (stage kind, stage name, parameter key, etc.)
    Identifier,
    /// A number (integer or floating point, possibly with suffix)
    Number,
    /// A directive (starts with '.')
    Directive,
    /// Open parenthesis '('
    OpenParen,
    /// Close parenthesis ')'
    CloseParen,
    /// Equals sign '='
    Equals,
    /// Newline
    Newline,
    /// End of file
    Eof,
}

/// Characters accepted as an SI multiplier after a number.
const UNIT_SUFFIXES: [char; 9] = ['p', 'n', 'u', 'µ', 'm', 'k', 'K', 'M', 'G'];

/// Lexer for tokenizing chain descriptions.
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();

        let line = self.line;
        let column = self.column;
        let make = |kind, text: String| Token {
            kind,
            text,
            line,
            column,
        };

        let ch = match self.chars.peek().copied() {
            Some(ch) => ch,
            None => return Ok(make(TokenKind::Eof, String::new())),
        };

        let token = match ch {
            '\n' => {
                self.advance();
                make(TokenKind::Newline, "\n".to_string())
            }
            '.' => {
                self.advance();
                let text = self.read_identifier();
                make(TokenKind::Directive, format!(".{}", text))
            }
            '(' => {
                self.advance();
                make(TokenKind::OpenParen, "(".to_string())
            }
            ')' => {
                self.advance();
                make(TokenKind::CloseParen, ")".to_string())
            }
            '=' => {
                self.advance();
                make(TokenKind::Equals, "=".to_string())
            }
            '-' | '+' | '0'..='9' => make(TokenKind::Number, self.read_number()),
            _ if ch.is_alphabetic() || ch == '_' => {
                make(TokenKind::Identifier, self.read_identifier())
            }
            _ => {
                return Err(StageError::lexer(
                    line,
                    column,
                    format!("unexpected character '{}'", ch),
                ));
            }
        };

        Ok(token)
    }

    /// Tokenize the whole input, ending with [`TokenKind::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn advance_while(&mut self, text: &mut String, pred: impl Fn(char) -> bool) {
        while let Some(&ch) = self.chars.peek() {
            if !pred(ch) {
                break;
            }
            text.push(ch);
            self.advance();
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&ch) = self.chars.peek() {
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
            } else if ch == '#' || ch == ';' {
                // runs to end of line; the newline itself is a token
                while let Some(&c) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut text = String::new();
        self.advance_while(&mut text, |ch| ch.is_alphanumeric() || ch == '_');
        text
    }

    fn read_number(&mut self) -> String {
        let mut text = String::new();

        if let Some(&ch) = self.chars.peek() {
            if ch == '-' || ch == '+' {
                text.push(ch);
                self.advance();
            }
        }

        self.advance_while(&mut text, |ch| ch.is_ascii_digit());

        if let Some(&'.') = self.chars.peek() {
            text.push('.');
            self.advance();
            self.advance_while(&mut text, |ch| ch.is_ascii_digit());
        }

        if let Some(&ch) = self.chars.peek() {
            if ch == 'e' || ch == 'E' {
                text.push(ch);
                self.advance();
                if let Some(&sign) = self.chars.peek() {
                    if sign == '-' || sign == '+' {
                        text.push(sign);
                        self.advance();
                    }
                }
                self.advance_while(&mut text, |ch| ch.is_ascii_digit());
            }
        }

        if let Some(&ch) = self.chars.peek() {
            if UNIT_SUFFIXES.contains(&ch) {
                text.push(ch);
                self.advance();
            }
        }

        text
    }
}

/// Parse a number string with optional unit suffix.
pub fn parse_value(text: &str) -> Option<f64> {
    let text = text.trim();
    let last = text.chars().last()?;

    let multiplier = match last {
        'p' => 1e-12,
        'n' => 1e-9,
        'u' | 'µ' => 1e-6,
        'm' => 1e-3,
        'k' | 'K' => 1e3,
        'M' => 1e6,
        'G' => 1e9,
        _ => 1.0,
    };
    let num_str = if UNIT_SUFFIXES.contains(&last) {
        &text[..text.len() - last.len_utf8()]
    } else {
        text
    };

    num_str
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_parse_value() {
        assert_relative_eq!(parse_value("10k").unwrap(), 10_000.0);
        assert_relative_eq!(parse_value("100n").unwrap(), 100e-9);
        assert_relative_eq!(parse_value("4.7u").unwrap(), 4.7e-6);
        assert_relative_eq!(parse_value("4.7µ").unwrap(), 4.7e-6);
        assert_relative_eq!(parse_value("25.85m").unwrap(), 0.02585);
        assert_relative_eq!(parse_value("1M").unwrap(), 1_000_000.0);
        assert_relative_eq!(parse_value("2.2").unwrap(), 2.2);
        assert_relative_eq!(parse_value("1e-9").unwrap(), 1e-9);
        assert_relative_eq!(parse_value("-0.5").unwrap(), -0.5);
        assert_eq!(parse_value("k"), None);
        assert_eq!(parse_value(""), None);
        assert_eq!(parse_value("inf"), None);
    }

    #[test]
    fn test_lexer_stage_line() {
        let mut lexer = Lexer::new("diode D1 GE side=up c=10n");

        let tok = lexer.next_token().unwrap();
        assert_eq!(tok.kind, TokenKind::Identifier);
        assert_eq!(tok.text, "diode");

        let tok = lexer.next_token().unwrap();
        assert_eq!(tok.text, "D1");
        assert_eq!(tok.column, 7);

        assert_eq!(
            kinds("side=up c=10n"),
            vec![
                TokenKind::Identifier,
                TokenKind::Equals,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Equals,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_directive() {
        let mut lexer = Lexer::new(".model GE diode (is=5u)");

        let tok = lexer.next_token().unwrap();
        assert_eq!(tok.kind, TokenKind::Directive);
        assert_eq!(tok.text, ".model");
    }

    #[test]
    fn test_comments_and_lines() {
        let tokens = Lexer::new("# header\nbjt Q1 ; trailing\n  opamp OP1")
            .tokenize()
            .unwrap();
        let opamp = tokens.iter().find(|t| t.text == "opamp").unwrap();
        assert_eq!(opamp.line, 3);
        assert_eq!(opamp.column, 3);
        assert_eq!(
            tokens.iter().filter(|t| t.kind == TokenKind::Newline).count(),
            2
        );
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("bjt Q1 vp@9").tokenize().unwrap_err();
        match err {
            StageError::LexerError { line, column, .. } => {
                assert_eq!(line, 1);
                assert_eq!(column, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
