//! Lexer and expression parser for calc declarations

use logos::Logos;

/// Raw token from logos
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_']*", |lex| lex.slice().to_string())]
    Ident(String),

    #[token("=")]
    Eq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
}

/// Strip the quotes from a string literal and resolve escapes.
/// Returns `None` for an unknown escape, which logos reports as a lex error.
fn unescape(literal: &str) -> Option<String> {
    let inner = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            _ => return None,
        }
    }
    Some(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    fn precedence(self) -> u8 {
        match self {
            BinOp::Add | BinOp::Sub => 1,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 2,
        }
    }

    fn from_token(token: &Token) -> Option<Self> {
        match token {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Sub),
            Token::Star => Some(BinOp::Mul),
            Token::Slash => Some(BinOp::Div),
            Token::Percent => Some(BinOp::Rem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Str(String),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Builtin call; the callee is not a variable
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Identifiers read by this expression, first occurrence first
    pub fn free_vars(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<String>) {
        match self {
            Expr::Int(_) | Expr::Str(_) => {}
            Expr::Var(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Neg(inner) => inner.collect_vars(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
            Expr::Call(_, args) => {
                for arg in args {
                    arg.collect_vars(out);
                }
            }
        }
    }
}

/// A top-level item: `name = expr` or a bare expression
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub name: Option<String>,
    pub expr: Expr,
}

/// Parse one declaration's text
pub fn parse_item(text: &str) -> Result<Item, String> {
    let mut tokens = Vec::new();
    for (token, span) in Token::lexer(text).spanned() {
        match token {
            Ok(token) => tokens.push(token),
            Err(()) => return Err(format!("unexpected input '{}'", &text[span])),
        }
    }

    let mut parser = ExprParser { tokens, pos: 0 };
    let name = match (parser.tokens.first(), parser.tokens.get(1)) {
        (Some(Token::Ident(name)), Some(Token::Eq)) => {
            let name = name.clone();
            parser.pos = 2;
            Some(name)
        }
        _ => None,
    };

    let expr = parser.expr(0)?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected {} after expression", describe(token)));
    }
    Ok(Item { name, expr })
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(format!(
                "expected {}, found {}",
                describe(expected),
                describe(&token)
            )),
            None => Err(format!("expected {}, found end of input", describe(expected))),
        }
    }

    /// Precedence climbing over left-associative binary operators
    fn expr(&mut self, min_prec: u8) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek().and_then(BinOp::from_token) {
            let prec = op.precedence();
            if prec <= min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.expr(prec)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Int(value)) => Ok(Expr::Int(value)),
            Some(Token::Str(value)) => Ok(Expr::Str(value)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.args()?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.expr(0)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(format!("unexpected {}", describe(&token))),
            None => Err("unexpected end of input".to_string()),
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr(0)?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(token) => return Err(format!("expected ',' or ')', found {}", describe(&token))),
                None => return Err("expected ')', found end of input".to_string()),
            }
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Int(value) => format!("number {}", value),
        Token::Str(_) => "string literal".to_string(),
        Token::Ident(name) => format!("identifier '{}'", name),
        Token::Eq => "'='".to_string(),
        Token::Plus => "'+'".to_string(),
        Token::Minus => "'-'".to_string(),
        Token::Star => "'*'".to_string(),
        Token::Slash => "'/'".to_string(),
        Token::Percent => "'%'".to_string(),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::Comma => "','".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Var(name.to_string()))
    }

    #[test]
    fn test_binding_item() {
        let item = parse_item("y = x + 1").unwrap();
        assert_eq!(item.name.as_deref(), Some("y"));
        assert_eq!(
            item.expr,
            Expr::Binary(BinOp::Add, var("x"), Box::new(Expr::Int(1)))
        );
    }

    #[test]
    fn test_bare_expression_item() {
        let item = parse_item("a * b").unwrap();
        assert!(item.name.is_none());
        assert_eq!(item.expr.free_vars(), vec!["a", "b"]);
    }

    #[test]
    fn test_precedence_and_associativity() {
        let item = parse_item("1 - 2 - 3 * 4").unwrap();
        assert_eq!(
            item.expr,
            Expr::Binary(
                BinOp::Sub,
                Box::new(Expr::Binary(
                    BinOp::Sub,
                    Box::new(Expr::Int(1)),
                    Box::new(Expr::Int(2))
                )),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::Int(3)),
                    Box::new(Expr::Int(4))
                )),
            )
        );
    }

    #[test]
    fn test_call_name_is_not_free() {
        let item = parse_item("z = sleep(n) + len(s) + n").unwrap();
        assert_eq!(item.expr.free_vars(), vec!["n", "s"]);
    }

    #[test]
    fn test_string_escapes() {
        let item = parse_item(r#"s = "a\"b\\c\n""#).unwrap();
        assert_eq!(item.expr, Expr::Str("a\"b\\c\n".to_string()));
    }

    #[test]
    fn test_multiline_item() {
        let item = parse_item("total =\n  1 +\n  2").unwrap();
        assert_eq!(item.name.as_deref(), Some("total"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_item("x = (1 +").unwrap_err(),
            "unexpected end of input"
        );
        assert_eq!(
            parse_item("x = 1 2").unwrap_err(),
            "unexpected number 2 after expression"
        );
        assert!(parse_item("x = 1 $").unwrap_err().contains("unexpected input '$'"));
        assert!(parse_item("f(1 2)").unwrap_err().contains("expected ',' or ')'"));
    }
}
