//! Parser for the chain description language.

use super::ast::*;
use super::lexer::{parse_value, Lexer, Token, TokenKind};
use crate::error::{Result, StageError};

/// Parser for chain descriptions.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    /// Create a new parser with the given lexer.
    pub fn new(mut lexer: Lexer<'a>) -> Result<Self> {
        let current = lexer.next_token()?;
        Ok(Self { lexer, current })
    }

    /// Parse the entire chain description.
    pub fn parse(&mut self) -> Result<ChainAst> {
        let mut ast = ChainAst::new();

        while self.current.kind != TokenKind::Eof {
            match self.current.kind {
                TokenKind::Newline => {
                    self.advance()?;
                    continue;
                }
                TokenKind::Directive => self.parse_directive(&mut ast)?,
                TokenKind::Identifier => {
                    let stage = self.parse_stage()?;
                    ast.stages.push(stage);
                }
                _ => {
                    return Err(StageError::parse(
                        self.current.line,
                        format!("unexpected token: {:?}", self.current.text),
                    ));
                }
            }

            match self.current.kind {
                TokenKind::Newline => self.advance()?,
                TokenKind::Eof => {}
                _ => {
                    return Err(StageError::parse(
                        self.current.line,
                        format!("unexpected {:?} at end of line", self.current.text),
                    ));
                }
            }
        }

        Ok(ast)
    }

    fn advance(&mut self) -> Result<()> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.current.kind == kind {
            let tok = self.current.clone();
            self.advance()?;
            Ok(tok)
        } else {
            Err(StageError::parse(
                self.current.line,
                format!("expected {:?}, got {:?}", kind, self.current.kind),
            ))
        }
    }

    fn at_line_end(&self) -> bool {
        matches!(self.current.kind, TokenKind::Newline | TokenKind::Eof)
    }

    fn parse_directive(&mut self, ast: &mut ChainAst) -> Result<()> {
        let directive = self.current.text.clone();
        let line = self.current.line;
        self.advance()?;

        match directive.to_lowercase().as_str() {
            ".model" => {
                let model = self.parse_model_def(line)?;
                if ast.models.contains_key(&model.name) {
                    return Err(StageError::DuplicateModel { name: model.name });
                }
                ast.models.insert(model.name.clone(), model);
            }
            _ => {
                return Err(StageError::parse(
                    line,
                    format!("unknown directive: {}", directive),
                ));
            }
        }

        Ok(())
    }

    fn parse_kind(&mut self) -> Result<StageKind> {
        let tok = self.expect(TokenKind::Identifier)?;
        StageKind::from_keyword(&tok.text).ok_or(StageError::UnknownStageKind {
            kind: tok.text,
            line: tok.line,
        })
    }

    /// `.model <name> <kind> (<key=value>...)`
    fn parse_model_def(&mut self, line: usize) -> Result<ModelDef> {
        let name = self.expect(TokenKind::Identifier)?.text;
        let kind = self.parse_kind()?.model_kind();
        let mut params = Vec::new();

        if self.current.kind == TokenKind::OpenParen {
            self.advance()?;
            while self.current.kind != TokenKind::CloseParen {
                if self.at_line_end() {
                    return Err(StageError::parse(line, "unclosed parameter list"));
                }
                params.push(self.parse_param()?);
            }
            self.advance()?;
        }

        Ok(ModelDef {
            name,
            kind,
            params,
            line,
        })
    }

    /// `<kind> <name> [model] {key=value}`
    fn parse_stage(&mut self) -> Result<StageDef> {
        let line = self.current.line;
        let kind = self.parse_kind()?;
        let name = self.expect(TokenKind::Identifier)?.text;
        let mut model_ref = None;
        let mut params = Vec::new();

        while !self.at_line_end() {
            if self.current.kind != TokenKind::Identifier {
                return Err(StageError::parse(
                    line,
                    format!("unexpected {:?} in stage '{}'", self.current.text, name),
                ));
            }
            let word = self.current.text.clone();
            self.advance()?;

            if self.current.kind == TokenKind::Equals {
                self.advance()?;
                let value = self.parse_param_value(line)?;
                params.push((word.to_lowercase(), value));
            } else if model_ref.is_none() && params.is_empty() {
                model_ref = Some(word);
            } else {
                return Err(StageError::parse(
                    line,
                    format!("expected key=value after '{}', got '{}'", name, word),
                ));
            }
        }

        Ok(StageDef {
            kind,
            name,
            model_ref,
            params,
            line,
        })
    }

    fn parse_param(&mut self) -> Result<(String, ParamValue)> {
        let line = self.current.line;
        let key = self.expect(TokenKind::Identifier)?.text;
        self.expect(TokenKind::Equals)?;
        let value = self.parse_param_value(line)?;
        Ok((key.to_lowercase(), value))
    }

    fn parse_param_value(&mut self, line: usize) -> Result<ParamValue> {
        let text = self.current.text.clone();
        let value = match self.current.kind {
            TokenKind::Number => ParamValue::Number(
                parse_value(&text)
                    .ok_or_else(|| StageError::parse(line, format!("invalid number: {}", text)))?,
            ),
            TokenKind::Identifier => ParamValue::Ident(text.to_lowercase()),
            _ => return Err(StageError::parse(line, "expected parameter value")),
        };
        self.advance()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_stage() {
        let ast = parse("bjt Q1 vp=12 bf=120").unwrap();
        assert_eq!(ast.stages.len(), 1);
        let q = &ast.stages[0];
        assert_eq!(q.kind, StageKind::Bjt);
        assert_eq!(q.name, "Q1");
        assert_eq!(q.model_ref, None);
        assert_eq!(q.params[0], ("vp".to_string(), ParamValue::Number(12.0)));
        assert_eq!(q.params[1], ("bf".to_string(), ParamValue::Number(120.0)));
    }

    #[test]
    fn test_parse_model_and_reference() {
        let input = ".model GE diode (c=50n re=500 is=5u)\ndiode D1 GE side=Up\n";
        let ast = parse(input).unwrap();

        let model = &ast.models["GE"];
        assert_eq!(model.kind, StageKind::Diode);
        assert_eq!(model.params.len(), 3);
        assert_relative_eq!(model.params[0].1.as_number().unwrap(), 50e-9);

        let d = &ast.stages[0];
        assert_eq!(d.model_ref.as_deref(), Some("GE"));
        assert_eq!(d.line, 2);
        assert_eq!(d.params[0].1, ParamValue::Ident("up".to_string()));
    }

    #[test]
    fn test_table_model_is_cmos() {
        let ast = parse(".model HOT cmos_table (vdd=12)").unwrap();
        assert_eq!(ast.models["HOT"].kind, StageKind::Cmos);
    }

    #[test]
    fn test_stage_order_preserved() {
        let input = "# fuzz\ndiode D1\n\ncmos U1 ; inverter\nopamp OP1\ntriode V1 rk=1.5k\n";
        let ast = parse(input).unwrap();
        let names: Vec<_> = ast.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["D1", "U1", "OP1", "V1"]);
        assert_relative_eq!(ast.stages[3].params[0].1.as_number().unwrap(), 1500.0);
    }

    #[test]
    fn test_unknown_kind() {
        let err = parse("diode D1\nfuzzface F1\n").unwrap_err();
        match err {
            StageError::UnknownStageKind { kind, line } => {
                assert_eq!(kind, "fuzzface");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_model() {
        let err = parse(".model A bjt (bf=100)\n.model A bjt (bf=200)").unwrap_err();
        assert!(matches!(err, StageError::DuplicateModel { name } if name == "A"));
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(
            parse("bjt Q1 9").unwrap_err(),
            StageError::ParseError { line: 1, .. }
        ));
        assert!(matches!(
            parse("bjt Q1 vp=").unwrap_err(),
            StageError::ParseError { .. }
        ));
        assert!(matches!(
            parse("bjt Q1 A B").unwrap_err(),
            StageError::ParseError { .. }
        ));
        assert!(matches!(
            parse(".model A bjt (bf=100\nbjt Q1").unwrap_err(),
            StageError::ParseError { .. }
        ));
        assert!(matches!(
            parse(".input in").unwrap_err(),
            StageError::ParseError { .. }
        ));
    }
}
