//! `calculate`: arithmetic over `+ - * / % ^`, parentheses, unary minus, and
//! decimals.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{CALCULATE, Tool};

/// Longest expression the tool accepts, in characters.
pub const MAX_EXPRESSION_CHARS: usize = 4096;
/// Deepest parenthesis or unary-sign nesting the parser descends into.
const MAX_NESTING: usize = 256;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        CALCULATE
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Args: {\"expression\": \"2 * (3 + 4)\"}"
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let expression = args
            .get("expression")
            .and_then(Value::as_str)
            .or_else(|| args.as_str())
            .ok_or_else(|| anyhow!("missing string argument 'expression'"))?;
        let chars = expression.chars().count();
        if chars > MAX_EXPRESSION_CHARS {
            bail!("expression has {chars} characters, limit is {MAX_EXPRESSION_CHARS}");
        }
        let result = evaluate(expression)?;
        Ok(json!({ "expression": expression, "result": result }))
    }
}

/// Evaluate `expression`.
pub fn evaluate(expression: &str) -> Result<f64> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        bail!("empty expression");
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        bail!("unexpected {token:?} at token {}", parser.pos);
    }
    if !value.is_finite() {
        bail!("result is not a finite number");
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let token = match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' | '×' => Token::Star,
            '/' | '÷' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Caret,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && matches!(chars[i], '0'..='9' | '.' | '_' | ',') {
                    i += 1;
                }
                // Digit group separators: `1,000` and `1_000`.
                let literal: String = chars[start..i]
                    .iter()
                    .filter(|c| !matches!(**c, '_' | ','))
                    .collect();
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| anyhow!("invalid number '{literal}'"))?;
                tokens.push(Token::Num(number));
                continue;
            }
            other => bail!("unexpected character '{other}'"),
        };
        tokens.push(token);
        i += 1;
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    /// Run `f` one nesting level deeper.
    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<f64>) -> Result<f64> {
        if self.depth >= MAX_NESTING {
            bail!("expression nested too deeply (limit {MAX_NESTING})");
        }
        self.depth += 1;
        let value = f(self);
        self.depth -= 1;
        value
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::Percent)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                Token::Star => value * rhs,
                _ if rhs == 0.0 => bail!("division by zero"),
                Token::Slash => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    // unary := '-' unary | '+' unary | power
    fn unary(&mut self) -> Result<f64> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.nested(Self::unary)?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            _ => self.power(),
        }
    }

    // power := atom ('^' unary)?   (right-associative)
    fn power(&mut self) -> Result<f64> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Caret) {
            self.pos += 1;
            let exponent = self.nested(Self::unary)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64> {
        match self.next() {
            Some(Token::Num(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.nested(Self::expr)?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => bail!("missing closing parenthesis"),
                }
            }
            Some(token) => bail!("unexpected {token:?}"),
            None => bail!("unexpected end of expression"),
        }
    }
}
