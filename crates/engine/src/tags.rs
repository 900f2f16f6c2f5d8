//! Boolean tag expressions used to select tests
//!
//! Accepted forms:
//! - `@smoke and not @regression`
//! - `smoke,!regression` (`,` and `&` mean *and*, `|` means *or*, `!` means *not*)
//! - `(smoke or crud) and not slow`
//!
//! An empty expression selects everything. A leading `@` on a tag is optional.

use std::fmt;

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    All,
    Tag(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        match self {
            Expr::All => true,
            Expr::Tag(t) => tags.iter().any(|s| s.as_ref() == t),
            Expr::Not(e) => !e.eval(tags),
            Expr::And(a, b) => a.eval(tags) && b.eval(tags),
            Expr::Or(a, b) => a.eval(tags) || b.eval(tags),
        }
    }
}

/// A parsed tag expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagExpression {
    source: String,
    expr: Expr,
}

impl Default for TagExpression {
    fn default() -> Self {
        Self::all()
    }
}

impl TagExpression {
    /// Expression that matches every test
    pub fn all() -> Self {
        Self {
            source: String::new(),
            expr: Expr::All,
        }
    }

    /// Require every `include` tag and reject any `exclude` tag
    pub fn include_exclude<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut parts = Vec::new();
        let mut expr = Expr::All;
        for tag in include {
            let tag = normalize_tag(tag.as_ref());
            parts.push(format!("@{}", tag));
            expr = and(expr, Expr::Tag(tag));
        }
        for tag in exclude {
            let tag = normalize_tag(tag.as_ref());
            parts.push(format!("not @{}", tag));
            expr = and(expr, Expr::Not(Box::new(Expr::Tag(tag))));
        }
        Self {
            source: parts.join(" and "),
            expr,
        }
    }

    /// Parse an expression string
    pub fn parse(source: &str) -> E2eResult<Self> {
        let tokens = tokenize(source).map_err(|reason| E2eError::TagExpression {
            expression: source.to_string(),
            reason,
        })?;
        if tokens.is_empty() {
            return Ok(Self::all());
        }

        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let expr = parser
            .parse_or()
            .and_then(|expr| match parser.peek() {
                None => Ok(expr),
                Some(tok) => Err(format!("unexpected token '{}'", tok)),
            })
            .map_err(|reason| E2eError::TagExpression {
                expression: source.to_string(),
                reason,
            })?;

        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    /// Whether a test carrying `tags` is selected
    pub fn matches<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        self.expr.eval(tags)
    }

    pub fn is_all(&self) -> bool {
        self.expr == Expr::All
    }
}

impl fmt::Display for TagExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            f.write_str("<all>")
        } else {
            f.write_str(&self.source)
        }
    }
}

impl std::str::FromStr for TagExpression {
    type Err = E2eError;

    fn from_str(s: &str) -> E2eResult<Self> {
        Self::parse(s)
    }
}

/// Strip a leading `@` from a tag
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('@').to_string()
}

fn and(a: Expr, b: Expr) -> Expr {
    match a {
        Expr::All => b,
        a => Expr::And(Box::new(a), Box::new(b)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Not,
    Open,
    Close,
    Tag(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::And => f.write_str("and"),
            Token::Or => f.write_str("or"),
            Token::Not => f.write_str("not"),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
            Token::Tag(t) => write!(f, "@{}", t),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '&' | ',' => {
                chars.next();
                tokens.push(Token::And);
            }
            '|' => {
                chars.next();
                tokens.push(Token::Or);
            }
            c if c == '@' || is_tag_char(c) => {
                let mut word = String::new();
                if c == '@' {
                    chars.next();
                }
                while let Some(&c) = chars.peek() {
                    if !is_tag_char(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                if word.is_empty() {
                    return Err("'@' must be followed by a tag name".to_string());
                }
                let token = match word.to_ascii_lowercase().as_str() {
                    "and" if c != '@' => Token::And,
                    "or" if c != '@' => Token::Or,
                    "not" if c != '@' => Token::Not,
                    _ => Token::Tag(word),
                };
                tokens.push(token);
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '/')
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Not) => Ok(Expr::Not(Box::new(self.parse_unary()?))),
            Some(Token::Open) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(Token::Tag(t)) => Ok(Expr::Tag(t.clone())),
            Some(tok) => Err(format!("expected a tag, found '{}'", tok)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
