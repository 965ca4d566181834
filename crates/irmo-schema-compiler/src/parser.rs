//! A hand-written lexer/parser for the small C-like interface description
//! language (SPEC_FULL.md §6, "Schema compiler CLI"). The grammar is tiny
//! enough that pulling in a parser-combinator crate would be more machinery
//! than the job needs.

use irmo_common::value::ValueType;
use irmo_common::Interface;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self { line, message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokKind {
    Word(String),
    Colon,
    LBrace,
    RBrace,
    Semicolon,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokKind,
    line: usize,
}

/// Strips `//` line comments and splits the remaining text into tokens,
/// tracking the 1-based source line of each one.
fn lex(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for (idx, raw_line) in source.lines().enumerate() {
        let line = idx + 1;
        let code = match raw_line.find("//") {
            Some(at) => &raw_line[..at],
            None => raw_line,
        };
        let mut word = String::new();
        let flush = |word: &mut String, tokens: &mut Vec<Token>| {
            if !word.is_empty() {
                tokens.push(Token { kind: TokKind::Word(std::mem::take(word)), line });
            }
        };
        for ch in code.chars() {
            match ch {
                '{' | '}' | ':' | ';' => {
                    flush(&mut word, &mut tokens);
                    let kind = match ch {
                        '{' => TokKind::LBrace,
                        '}' => TokKind::RBrace,
                        ':' => TokKind::Colon,
                        ';' => TokKind::Semicolon,
                        _ => unreachable!(),
                    };
                    tokens.push(Token { kind, line });
                }
                c if c.is_whitespace() => flush(&mut word, &mut tokens),
                c => word.push(c),
            }
        }
        flush(&mut word, &mut tokens);
    }
    tokens
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect_word(&mut self) -> Result<(String, usize), ParseError> {
        match self.next() {
            Some(Token { kind: TokKind::Word(w), line }) => Ok((w, line)),
            Some(tok) => Err(ParseError::new(tok.line, format!("expected a name, found {:?}", tok.kind))),
            None => Err(ParseError::new(self.line(), "unexpected end of file, expected a name")),
        }
    }

    fn expect(&mut self, expected: TokKind, what: &str) -> Result<(), ParseError> {
        match self.next() {
            Some(tok) if tok.kind == expected => Ok(()),
            Some(tok) => Err(ParseError::new(tok.line, format!("expected {what}, found {:?}", tok.kind))),
            None => Err(ParseError::new(self.line(), format!("unexpected end of file, expected {what}"))),
        }
    }

    fn parse_type(name: &str, line: usize) -> Result<ValueType, ParseError> {
        match name {
            "int8" => Ok(ValueType::Int8),
            "int16" => Ok(ValueType::Int16),
            "int32" => Ok(ValueType::Int32),
            "string" => Ok(ValueType::String),
            other => Err(ParseError::new(line, format!("unknown type {other:?}"))),
        }
    }
}

/// Parses a complete interface description, building an [`Interface`] as it
/// goes so that duplicate-name/too-many-X errors from the schema itself
/// surface with the line number of the declaration that caused them.
pub fn parse(source: &str) -> Result<Interface, ParseError> {
    let mut parser = Parser { tokens: lex(source), pos: 0 };
    let mut iface = Interface::new();

    while let Some(tok) = parser.peek() {
        let line = tok.line;
        let (keyword, _) = parser.expect_word()?;
        match keyword.as_str() {
            "class" => parse_class(&mut parser, &mut iface, line)?,
            "method" => parse_method(&mut parser, &mut iface, line)?,
            other => return Err(ParseError::new(line, format!("expected 'class' or 'method', found {other:?}"))),
        }
    }

    Ok(iface)
}

fn parse_class(parser: &mut Parser, iface: &mut Interface, line: usize) -> Result<(), ParseError> {
    let (name, _) = parser.expect_word()?;
    let parent = if matches!(parser.peek().map(|t| &t.kind), Some(TokKind::Colon)) {
        parser.next();
        let (parent_name, _) = parser.expect_word()?;
        Some(parent_name)
    } else {
        None
    };
    parser.expect(TokKind::LBrace, "'{'")?;

    iface
        .new_class(&name, parent.as_deref())
        .map_err(|e| ParseError::new(line, e.to_string()))?;

    loop {
        match parser.peek().map(|t| t.kind.clone()) {
            Some(TokKind::RBrace) => {
                parser.next();
                break;
            }
            Some(TokKind::Word(_)) => {
                let (ty_name, ty_line) = parser.expect_word()?;
                let ty = Parser::parse_type(&ty_name, ty_line)?;
                let (var_name, var_line) = parser.expect_word()?;
                parser.expect(TokKind::Semicolon, "';'")?;
                iface
                    .new_variable(&name, &var_name, ty)
                    .map_err(|e| ParseError::new(var_line, e.to_string()))?;
            }
            Some(_) => {
                let tok = parser.next().unwrap();
                return Err(ParseError::new(tok.line, format!("expected a field or '}}', found {:?}", tok.kind)));
            }
            None => return Err(ParseError::new(parser.line(), "unexpected end of file inside class body")),
        }
    }

    parser.expect(TokKind::Semicolon, "';' after class body")?;
    Ok(())
}

fn parse_method(parser: &mut Parser, iface: &mut Interface, line: usize) -> Result<(), ParseError> {
    let (name, _) = parser.expect_word()?;
    parser.expect(TokKind::LBrace, "'{'")?;

    iface.new_method(&name).map_err(|e| ParseError::new(line, e.to_string()))?;

    loop {
        match parser.peek().map(|t| t.kind.clone()) {
            Some(TokKind::RBrace) => {
                parser.next();
                break;
            }
            Some(TokKind::Word(_)) => {
                let (ty_name, ty_line) = parser.expect_word()?;
                let ty = Parser::parse_type(&ty_name, ty_line)?;
                let (arg_name, arg_line) = parser.expect_word()?;
                parser.expect(TokKind::Semicolon, "';'")?;
                iface
                    .new_argument(&name, &arg_name, ty)
                    .map_err(|e| ParseError::new(arg_line, e.to_string()))?;
            }
            Some(_) => {
                let tok = parser.next().unwrap();
                return Err(ParseError::new(tok.line, format!("expected an argument or '}}', found {:?}", tok.kind)));
            }
            None => return Err(ParseError::new(parser.line(), "unexpected end of file inside method body")),
        }
    }

    parser.expect(TokKind::Semicolon, "';' after method body")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inheritance_and_methods() {
        let source = r#"
            class Player {
                int16 x;
                int16 y;
                string name;
            };

            // Ghosts only have a transparency value of their own.
            class Ghost : Player {
                int8 alpha;
            };

            method Shout {
                string message;
            };
        "#;
        let iface = parse(source).unwrap();
        assert_eq!(iface.num_classes(), 2);
        let ghost = iface.class_by_name("Ghost").unwrap();
        assert_eq!(ghost.num_variables(), 4);
        assert_eq!(iface.num_methods(), 1);
        assert_eq!(iface.method_by_name("Shout").unwrap().num_arguments(), 1);
    }

    #[test]
    fn reports_one_based_line_number_on_unknown_type() {
        let source = "class Player {\n    intXX x;\n};\n";
        let err = parse(source).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("intXX"), "{}", err.message);
    }

    #[test]
    fn reports_unknown_parent_from_the_schema_layer() {
        let source = "class Ghost : Player {\n    int8 alpha;\n};\n";
        let err = parse(source).unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn rejects_duplicate_class_names() {
        let source = "class Player { int8 a; };\nclass Player { int8 b; };\n";
        let err = parse(source).unwrap_err();
        assert_eq!(err.line, 2);
    }
}
