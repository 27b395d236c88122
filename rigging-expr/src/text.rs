use nom::{
    branch::alt,
    bytes::complete::{is_a, is_not},
    character::complete::{alpha1, alphanumeric1},
    combinator::recognize,
    multi::many0,
    sequence::pair,
    IResult,
};

use crate::Expr;

mod error;
pub use error::ParseError;


/// Parses a single configuration expression into an [`Expr`] tree.
///
/// `current_dir` is the directory of the file the expression came from and
/// becomes the value of any `CurrentDir()` node. The whole of `text` must
/// be consumed; trailing content is an error.
pub fn parse_expression<'t>(text: &'t str, current_dir: &str) -> Result<Expr, ParseError<'t>> {
    ExprParser {
        text,
        rest: text,
        current_dir,
    }
    .parse()
}

/// Characters that may legally follow a completed token
const TOKEN_END: [char; 5] = [',', ')', ']', ':', '}'];

fn identifier(s: &str) -> IResult<&str, &str> {
    recognize(pair(alpha1, many0(alt((alphanumeric1, is_a("._"))))))(s)
}

/// A numeric token runs to the next whitespace or delimiter; anything
/// swept up on the way (such as a stray bracket) fails the number parse
fn numeric_token(s: &str) -> IResult<&str, &str> {
    is_not(" \t\r\n,()]:}")(s)
}

struct ExprParser<'t, 'd> {
    text: &'t str,
    rest: &'t str,
    current_dir: &'d str,
}

impl<'t> ExprParser<'t, '_> {
    fn parse(mut self) -> Result<Expr, ParseError<'t>> {
        self.skip_whitespace();
        if self.rest.is_empty() {
            return self.fail(self.rest, "Expression is empty");
        }
        let expr = self.expression(true)?;
        self.skip_whitespace();
        if let Some(c) = self.peek() {
            return self.fail(self.rest, format!("Unexpected '{c}' after expression"));
        }
        Ok(expr)
    }

    fn fail<T>(&self, span: &'t str, message: impl Into<String>) -> Result<T, ParseError<'t>> {
        Err(ParseError::new(message.into(), self.text, span))
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn advance(&mut self, bytes: usize) {
        self.rest = &self.rest[bytes..];
    }

    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    /// One expression, starting at the current position. `Library` and
    /// `Class` forms are only accepted when `is_root` is set.
    fn expression(&mut self, is_root: bool) -> Result<Expr, ParseError<'t>> {
        self.skip_whitespace();
        let start = self.rest;
        match self.peek() {
            None => self.fail(start, "Unexpected end of expression"),
            Some('"') => self.quoted(),
            Some('[') => {
                self.advance(1);
                self.bracket_list(start)
            }
            Some('{') => {
                self.advance(1);
                self.map_entries(start)
            }
            Some(c) if c.is_ascii_alphabetic() => self.word(is_root),
            Some(':') => self.fail(start, "Invalid token ':', only used for maps"),
            Some(c @ (')' | ']' | '}' | ',')) => self.fail(start, format!("Unexpected '{c}'")),
            Some(_) => self.numeric(),
        }
    }

    /// A quoted string: no escape sequences, content preserved verbatim.
    /// What follows must end the token; a parameter list is rejected.
    fn quoted(&mut self) -> Result<Expr, ParseError<'t>> {
        let start = self.rest;
        self.advance(1);
        let Some(end) = self.rest.find('"') else {
            return self.fail(start, "Unmatched quotes");
        };
        let content = &self.rest[..end];
        self.advance(end + 1);
        self.skip_whitespace();
        match self.peek() {
            None => Ok(Expr::Str(content.to_owned())),
            Some(c) if TOKEN_END.contains(&c) => Ok(Expr::Str(content.to_owned())),
            Some('(') => self.fail(self.rest, "A quoted string cannot take a parameter list"),
            Some(c) => self.fail(
                self.rest,
                format!("Unexpected character '{c}' after quoted string"),
            ),
        }
    }

    /// An integer or real literal, decided by the presence of a `.`
    fn numeric(&mut self) -> Result<Expr, ParseError<'t>> {
        let start = self.rest;
        let (rest, token) = match numeric_token(self.rest) {
            Ok(parsed) => parsed,
            Err(_) => return self.fail(start, "Unexpected empty token"),
        };
        self.rest = rest;
        let value = if token.contains('.') {
            token.parse::<f64>().ok().map(Expr::Real)
        } else {
            token.parse::<i64>().ok().map(Expr::Int)
        };
        let Some(value) = value else {
            return self.fail(start, format!("{token} is not a valid token"));
        };
        self.skip_whitespace();
        if self.peek() == Some('(') {
            return self.fail(self.rest, format!("{token} - unexpected '('"));
        }
        Ok(value)
    }

    /// An identifier: a function-like head if followed by `(`, otherwise a
    /// literal keyword or a variable
    fn word(&mut self, is_root: bool) -> Result<Expr, ParseError<'t>> {
        let start = self.rest;
        let (rest, name) = match identifier(self.rest) {
            Ok(parsed) => parsed,
            Err(_) => return self.fail(start, "Invalid identifier"),
        };
        self.rest = rest;
        self.skip_whitespace();
        if self.peek() == Some('(') {
            self.advance(1);
            let mut args = self.call_args(start, name)?;
            return match name {
                "Library" => {
                    if !is_root {
                        self.fail(
                            start,
                            "Libraries must be declared as a main expression and cannot be embedded",
                        )
                    } else if args.len() != 1 {
                        self.fail(start, "A Library must have exactly one parameter (path)")
                    } else {
                        Ok(Expr::Library(Box::new(args.remove(0))))
                    }
                }
                "Class" => {
                    if !is_root {
                        self.fail(
                            start,
                            "Classes must be declared as a main expression and cannot be embedded",
                        )
                    } else if args.len() != 2 {
                        self.fail(
                            start,
                            "A Class must have exactly two parameters (library, symbol)",
                        )
                    } else {
                        let symbol = Box::new(args.remove(1));
                        match args.remove(0) {
                            Expr::Variable(library) => Ok(Expr::Class { library, symbol }),
                            _ => self.fail(
                                start,
                                "The first parameter of a Class must be a variable naming a library",
                            ),
                        }
                    }
                }
                "Concat" => Ok(Expr::Concat(args)),
                "CurrentDir" => {
                    if args.is_empty() {
                        Ok(Expr::Str(self.current_dir.to_owned()))
                    } else {
                        self.fail(start, "CurrentDir cannot take parameters")
                    }
                }
                "List" => Ok(Expr::List(args)),
                _ => Ok(Expr::Object {
                    class: name.to_owned(),
                    args,
                }),
            };
        }
        let expr = match name {
            "true" => Expr::Bool(true),
            "false" => Expr::Bool(false),
            "tab" => Expr::Str("\t".to_owned()),
            "newline" => Expr::Str("\n".to_owned()),
            "quote" => Expr::Str("\"".to_owned()),
            _ => Expr::Variable(name.to_owned()),
        };
        match self.peek() {
            None => Ok(expr),
            Some(c) if TOKEN_END.contains(&c) => Ok(expr),
            Some(c) => self.fail(self.rest, format!("Unexpected character '{c}'")),
        }
    }

    /// The parameters of a function-like form, up to and including the `)`
    fn call_args(&mut self, start: &'t str, head: &str) -> Result<Vec<Expr>, ParseError<'t>> {
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.advance(1);
            return Ok(Vec::new());
        }
        let mut args = Vec::new();
        loop {
            args.push(self.expression(false)?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance(1);
                    self.skip_whitespace();
                    if self.peek() == Some(')') {
                        return self
                            .fail(self.rest, format!("Unexpected empty expression found in {head}"));
                    }
                }
                Some(')') => {
                    self.advance(1);
                    return Ok(args);
                }
                None => return self.fail(start, format!("Missing ')' for {head}")),
                Some(c) => {
                    return self.fail(
                        self.rest,
                        format!("Unexpected character '{c}', expected ',' or ')' in {head}"),
                    )
                }
            }
        }
    }

    /// The elements of a `[`-opened list, which must close with `]`
    fn bracket_list(&mut self, start: &'t str) -> Result<Expr, ParseError<'t>> {
        self.skip_whitespace();
        if self.peek() == Some(']') {
            self.advance(1);
            return Ok(Expr::List(Vec::new()));
        }
        let mut items = Vec::new();
        loop {
            items.push(self.expression(false)?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance(1);
                    self.skip_whitespace();
                    if self.peek() == Some(']') {
                        return self.fail(self.rest, "Unexpected empty expression found in list");
                    }
                }
                Some(']') => {
                    self.advance(1);
                    return Ok(Expr::List(items));
                }
                Some(')') => return self.fail(self.rest, "Invalid syntax ')' in list"),
                None => return self.fail(start, "Unmatched '['"),
                Some(c) => {
                    return self.fail(
                        self.rest,
                        format!("Unexpected character '{c}', expected ',' or ']'"),
                    )
                }
            }
        }
    }

    /// The `key: value` entries of a `{}` map
    fn map_entries(&mut self, start: &'t str) -> Result<Expr, ParseError<'t>> {
        self.skip_whitespace();
        if self.peek() == Some('}') {
            self.advance(1);
            return Ok(Expr::Map(Vec::new()));
        }
        let mut entries = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(',') {
                return self.fail(self.rest, "A map element requires a key");
            }
            let key = self.expression(false)?;
            self.skip_whitespace();
            match self.peek() {
                Some(':') => self.advance(1),
                Some(',') => return self.fail(self.rest, "A map element requires a key"),
                Some('}') => return self.fail(self.rest, "Syntax error '}' in map"),
                Some(')') => return self.fail(self.rest, "Invalid token ')'"),
                None => return self.fail(start, "Unmatched '{'"),
                Some(c) => {
                    return self
                        .fail(self.rest, format!("Unexpected character '{c}', expected ':'"))
                }
            }
            let value = self.expression(false)?;
            entries.push((key, value));
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance(1);
                    self.skip_whitespace();
                    if self.peek() == Some('}') {
                        return self.fail(self.rest, "Unexpected empty expression found in map");
                    }
                }
                Some('}') => {
                    self.advance(1);
                    return Ok(Expr::Map(entries));
                }
                Some(':') => return self.fail(self.rest, "Invalid token ':', only used for maps"),
                Some(')') => return self.fail(self.rest, "Invalid token ')'"),
                None => return self.fail(start, "Unmatched '{'"),
                Some(c) => {
                    return self.fail(
                        self.rest,
                        format!("Unexpected character '{c}', expected ',' or '}}'"),
                    )
                }
            }
        }
    }
}
