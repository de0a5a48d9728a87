//! Calculator 工具：安全的四则运算求值
//!
//! 支持 + - * / % **、括号、一元正负号与小数；不执行任意代码。结果统一为浮点数。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::ToolError;
use crate::tools::schema::{parameters_schema_for, parse_args};
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
struct CalculatorArgs {
    /// The mathematical expression to evaluate.
    expression: String,
}

/// Calculator 工具
#[derive(Debug, Default)]
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluates a simple mathematical expression."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<CalculatorArgs>()
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let args: CalculatorArgs = parse_args(args)?;
        let result = evaluate(&args.expression).map_err(|e| {
            ToolError::Failed(format!("Error evaluating expression: {e}"))
        })?;
        tracing::debug!(expression = %args.expression, result, "calculator");
        Ok(Value::from(result))
    }
}

/// 对表达式求值
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("unexpected token at position {}", parser.pos));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_string());
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
    Pow,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => {}
            '+' => tokens.push(Token::Plus),
            '-' => tokens.push(Token::Minus),
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '*' => tokens.push(Token::Star),
            '/' => tokens.push(Token::Slash),
            '%' => tokens.push(Token::Percent),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Num(n));
                continue;
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
        i += 1;
    }
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    Ok(tokens)
}

/// 递归下降：expr := term (+|- term)*；term := unary (*|/|% unary)*；
/// unary := (+|-) unary | power；power := primary (** unary)?
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

/// 括号与一元运算符的最大嵌套层数
const MAX_DEPTH: usize = 256;

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("expression nested too deeply".to_string());
        }
        Ok(())
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::Percent)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                Token::Star => value * rhs,
                _ if rhs == 0.0 => return Err("division by zero".to_string()),
                Token::Slash => value / rhs,
                // 与 Python 一致：结果符号跟随除数
                _ => value - rhs * (value / rhs).floor(),
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, String> {
        self.descend()?;
        let value = self.unary_inner();
        self.depth -= 1;
        value
    }

    fn unary_inner(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if self.peek() == Some(Token::Pow) {
            self.pos += 1;
            let exp = self.unary()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(t) => Err(format!("unexpected token {t:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precedence_and_parens() {
        assert_eq!(evaluate("2+2").unwrap(), 4.0);
        assert_eq!(evaluate("3+3").unwrap(), 6.0);
        assert_eq!(evaluate("2+3*4").unwrap(), 14.0);
        assert_eq!(evaluate("(2+3)*4").unwrap(), 20.0);
        assert_eq!(evaluate("2**3**2").unwrap(), 512.0);
        assert_eq!(evaluate("-2**2").unwrap(), -4.0);
        assert_eq!(evaluate("7 % 3").unwrap(), 1.0);
        assert_eq!(evaluate("-7 % 3").unwrap(), 2.0);
        assert_eq!(evaluate("1.5 * 2").unwrap(), 3.0);
    }

    #[test]
    fn test_errors() {
        assert!(evaluate("").is_err());
        assert!(evaluate("1/0").is_err());
        assert!(evaluate("(1+2").is_err());
        assert!(evaluate("1+").is_err());
        assert!(evaluate("import os").is_err());
        assert!(evaluate("1 2").is_err());
    }

    #[test]
    fn test_deep_nesting_is_an_error_not_a_crash() {
        let deep = format!("{}1", "(".repeat(200_000));
        assert_eq!(evaluate(&deep).unwrap_err(), "expression nested too deeply");
        let minus = format!("{}1", "-".repeat(200_000));
        assert_eq!(evaluate(&minus).unwrap_err(), "expression nested too deeply");

        let ok = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&ok).unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_tool_returns_float_rendered_with_decimal() {
        let args = json!({"expression": "2+2"}).as_object().cloned().unwrap();
        let out = CalculatorTool.execute(args).await.unwrap();
        assert_eq!(out.to_string(), "4.0");
    }

    #[tokio::test]
    async fn test_tool_rejects_missing_expression() {
        let err = CalculatorTool.execute(Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
