//! Integer arithmetic over variable references
//!
//! `{"op": "+", "args": [1, {"var": "n", "default": 0}]}` style trees, used by
//! the `math` condition and the `arithmetic` effect.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{DialogueError, Result};
use crate::vars::{IntOrVar, RawIntOrVar, VarContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ExprOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Rem,
    #[serde(rename = "min")]
    Min,
    #[serde(rename = "max")]
    Max,
    #[serde(rename = "abs")]
    Abs,
    #[serde(rename = "neg")]
    Neg,
}

impl ExprOp {
    /// Accepted argument counts (min, max)
    fn arity(&self) -> (usize, usize) {
        match self {
            ExprOp::Abs | ExprOp::Neg => (1, 1),
            ExprOp::Sub | ExprOp::Div | ExprOp::Rem => (2, 2),
            ExprOp::Add | ExprOp::Mul | ExprOp::Min | ExprOp::Max => (1, usize::MAX),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawOp {
    op: ExprOp,
    args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Value(IntOrVar),
    Op { op: ExprOp, args: Vec<Expr> },
}

impl Expr {
    pub fn from_json(json: &Value) -> Result<Self> {
        if json.get("op").is_some() {
            let raw: RawOp = serde_json::from_value(json.clone())
                .map_err(|e| DialogueError::content("expression", e.to_string()))?;
            let (lo, hi) = raw.op.arity();
            if raw.args.len() < lo || raw.args.len() > hi {
                return Err(DialogueError::content(
                    "expression",
                    format!("{:?} takes {} argument(s), got {}", raw.op, lo, raw.args.len()),
                ));
            }
            let args = raw
                .args
                .iter()
                .map(Expr::from_json)
                .collect::<Result<Vec<_>>>()?;
            return Ok(Expr::Op { op: raw.op, args });
        }
        let raw: RawIntOrVar = serde_json::from_value(json.clone())
            .map_err(|e| DialogueError::content("expression", e.to_string()))?;
        Ok(Expr::Value(IntOrVar::from_raw(&raw)?))
    }

    pub fn evaluate(&self, ctx: &impl VarContext) -> Result<i64> {
        let (op, args) = match self {
            Expr::Value(v) => return v.evaluate(ctx),
            Expr::Op { op, args } => (op, args),
        };
        let values = args
            .iter()
            .map(|a| a.evaluate(ctx))
            .collect::<Result<Vec<i64>>>()?;
        let first = values[0];
        Ok(match op {
            ExprOp::Add => values.iter().fold(0i64, |acc, v| acc.saturating_add(*v)),
            ExprOp::Mul => values.iter().fold(1i64, |acc, v| acc.saturating_mul(*v)),
            ExprOp::Sub => first.saturating_sub(values[1]),
            ExprOp::Div => {
                if values[1] == 0 {
                    return Err(DialogueError::DivisionByZero);
                }
                first.wrapping_div(values[1])
            }
            ExprOp::Rem => {
                if values[1] == 0 {
                    return Err(DialogueError::DivisionByZero);
                }
                first.wrapping_rem(values[1])
            }
            ExprOp::Min => values.iter().copied().min().unwrap_or(first),
            ExprOp::Max => values.iter().copied().max().unwrap_or(first),
            ExprOp::Abs => first.saturating_abs(),
            ExprOp::Neg => first.saturating_neg(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::value::tests::MapContext;
    use crate::vars::VarScope;
    use serde_json::json;

    fn eval(json: Value, ctx: &MapContext) -> Result<i64> {
        Expr::from_json(&json)?.evaluate(ctx)
    }

    #[test]
    fn test_nested_arithmetic() {
        let ctx = MapContext::new(0).with(VarScope::Global, "n", "6");
        let v = eval(
            json!({"op": "*", "args": [
                {"op": "+", "args": [1, {"var": "n", "scope": "global", "default": 0}]},
                {"op": "neg", "args": [2]}
            ]}),
            &ctx,
        )
        .unwrap();
        assert_eq!(v, -14);
        assert_eq!(eval(json!({"op": "max", "args": [3, 9, -1]}), &ctx).unwrap(), 9);
        assert_eq!(eval(json!({"op": "%", "args": [7, 4]}), &ctx).unwrap(), 3);
    }

    #[test]
    fn test_division_by_zero() {
        let ctx = MapContext::new(0);
        assert!(matches!(
            eval(json!({"op": "/", "args": [5, {"var": "z", "default": 0}]}), &ctx),
            Err(DialogueError::DivisionByZero)
        ));
        assert!(matches!(
            eval(json!({"op": "%", "args": [5, 0]}), &ctx),
            Err(DialogueError::DivisionByZero)
        ));
    }

    #[test]
    fn test_arity_checked_at_load() {
        assert!(Expr::from_json(&json!({"op": "abs", "args": [1, 2]})).is_err());
        assert!(Expr::from_json(&json!({"op": "-", "args": [1]})).is_err());
        assert!(Expr::from_json(&json!({"op": "pow", "args": [1, 2]})).is_err());
    }
}
