//! Tree-walking evaluator for calc declarations

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::lang::{EvalError, Evaluated, Evaluator};

use super::syntax::{BinOp, Expr};
use super::CalcDecl;

/// Runtime value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    /// Form shown in declaration output: strings are quoted
    pub fn render(&self) -> String {
        match self {
            Value::Int(value) => value.to_string(),
            Value::Str(value) => format!("{:?}", value),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "string",
        }
    }

    fn as_int(&self, context: &str) -> Result<i64, EvalError> {
        match self {
            Value::Int(value) => Ok(*value),
            other => Err(EvalError::new(format!(
                "{} expects an int, got {}",
                context,
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{}", value),
            Value::Str(value) => f.write_str(value),
        }
    }
}

/// Variables visible to a declaration
pub type CalcEnv = BTreeMap<String, Value>;

/// Evaluator for the calc language
#[derive(Debug, Clone, Default)]
pub struct CalcEvaluator;

impl CalcEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn eval(&self, expr: &Expr, env: &CalcEnv) -> Result<Value, EvalError> {
        match expr {
            Expr::Int(value) => Ok(Value::Int(*value)),
            Expr::Str(value) => Ok(Value::Str(value.clone())),
            Expr::Var(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::new(format!("unbound variable '{}'", name))),
            Expr::Neg(inner) => {
                let value = self.eval(inner, env)?.as_int("negation")?;
                value
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EvalError::new("integer overflow"))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, env)?;
                let rhs = self.eval(rhs, env)?;
                binary(*op, lhs, rhs)
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, env))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, args)
            }
        }
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    if op == BinOp::Add {
        if let (Value::Str(_), _) | (_, Value::Str(_)) = (&lhs, &rhs) {
            return Ok(Value::Str(format!("{}{}", lhs, rhs)));
        }
    }

    let symbol = match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
    };
    let context = format!("operator '{}'", symbol);
    let a = lhs.as_int(&context)?;
    let b = rhs.as_int(&context)?;

    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div | BinOp::Rem if b == 0 => return Err(EvalError::new("division by zero")),
        BinOp::Div => a.checked_div(b),
        BinOp::Rem => a.checked_rem(b),
    };
    result
        .map(Value::Int)
        .ok_or_else(|| EvalError::new("integer overflow"))
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(EvalError::new(format!(
                "{}() takes {} argument(s), got {}",
                name,
                expected,
                args.len()
            )))
        }
    };

    match name {
        "sleep" => {
            arity(1)?;
            let ms = args[0].as_int("sleep()")?;
            let ms = u64::try_from(ms)
                .map_err(|_| EvalError::new("sleep() expects a non-negative duration"))?;
            std::thread::sleep(Duration::from_millis(ms));
            Ok(Value::Int(ms as i64))
        }
        "fail" => {
            arity(1)?;
            Err(EvalError::new(args[0].to_string()))
        }
        "len" => {
            arity(1)?;
            match &args[0] {
                Value::Str(value) => Ok(Value::Int(value.chars().count() as i64)),
                other => Err(EvalError::new(format!(
                    "len() expects a string, got {}",
                    other.type_name()
                ))),
            }
        }
        "str" => {
            arity(1)?;
            Ok(Value::Str(args[0].to_string()))
        }
        _ => Err(EvalError::new(format!("unknown function '{}'", name))),
    }
}

impl Evaluator<CalcDecl> for CalcEvaluator {
    type Env = CalcEnv;

    fn base_env(&self) -> CalcEnv {
        CalcEnv::new()
    }

    fn merge(&self, mut acc: CalcEnv, other: &CalcEnv) -> CalcEnv {
        acc.extend(other.iter().map(|(name, value)| (name.clone(), value.clone())));
        acc
    }

    fn fallback_env(&self) -> CalcEnv {
        CalcEnv::new()
    }

    /// The returned environment holds only the declaration's own binding
    fn evaluate(&self, decl: &CalcDecl, env: CalcEnv) -> Result<Evaluated<CalcEnv>, EvalError> {
        let value = self.eval(&decl.item.expr, &env)?;
        let mut own = CalcEnv::new();
        let output = match &decl.item.name {
            Some(name) => {
                let output = format!("{} = {}", name, value.render());
                own.insert(name.clone(), value);
                output
            }
            None => value.render(),
        };
        Ok(Evaluated { output, env: own })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::calc::CalcParser;
    use crate::lang::{Parsed, Parser};

    fn decl(text: &str) -> CalcDecl {
        match CalcParser::new().parse(text).pop() {
            Some(Parsed::Decl(decl)) => decl,
            other => panic!("expected a declaration, got {:?}", other),
        }
    }

    fn env(pairs: &[(&str, Value)]) -> CalcEnv {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_binding_exports_only_itself() {
        let evaluator = CalcEvaluator::new();
        let result = evaluator
            .evaluate(&decl("y = x * 2 + 1"), env(&[("x", Value::Int(20))]))
            .unwrap();
        assert_eq!(result.output, "y = 41");
        assert_eq!(result.env, env(&[("y", Value::Int(41))]));
    }

    #[test]
    fn test_bare_expression_exports_nothing() {
        let evaluator = CalcEvaluator::new();
        let result = evaluator
            .evaluate(&decl(r#""n=" + n"#), env(&[("n", Value::Int(3))]))
            .unwrap();
        assert_eq!(result.output, r#""n=3""#);
        assert!(result.env.is_empty());
    }

    #[test]
    fn test_errors() {
        let evaluator = CalcEvaluator::new();
        let cases = [
            ("a = missing", "unbound variable 'missing'"),
            ("a = 1 / 0", "division by zero"),
            ("a = 9223372036854775807 + 1", "integer overflow"),
            (r#"a = "s" * 2"#, "operator '*' expects an int, got string"),
            (r#"a = fail("nope")"#, "nope"),
            ("a = nothing(1)", "unknown function 'nothing'"),
            ("a = len(1, 2)", "len() takes 1 argument(s), got 2"),
        ];
        for (text, message) in cases {
            let err = evaluator.evaluate(&decl(text), CalcEnv::new()).unwrap_err();
            assert_eq!(err.message, message, "for {}", text);
        }
    }

    #[test]
    fn test_builtins() {
        let evaluator = CalcEvaluator::new();
        let result = evaluator
            .evaluate(&decl(r#"n = len("héllo") + sleep(1)"#), CalcEnv::new())
            .unwrap();
        assert_eq!(result.output, "n = 6");

        let result = evaluator
            .evaluate(&decl("s = str(12)"), CalcEnv::new())
            .unwrap();
        assert_eq!(result.output, r#"s = "12""#);
    }

    #[test]
    fn test_merge_later_environment_wins() {
        let evaluator = CalcEvaluator::new();
        let merged = evaluator.merge(
            env(&[("a", Value::Int(1)), ("b", Value::Int(1))]),
            &env(&[("b", Value::Int(2))]),
        );
        assert_eq!(merged, env(&[("a", Value::Int(1)), ("b", Value::Int(2))]));
    }
}
