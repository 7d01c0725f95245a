//! Evaluation of free-form SQL expressions over in-memory columns.
//!
//! The local backend owns this; the engine only ships the text through.
//! The supported surface matches what the workflow model promises:
//! column references, literals, arithmetic, comparisons, boolean logic,
//! CASE, aggregate calls and a few scalar functions. Anything else is
//! rejected with a readable message on the query's future.

use std::collections::HashMap;

use serde_json::Value as Json;
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, UnaryOperator,
    Value as SqlValue,
};

use crate::computation::{ComputationError, ComputationResult};
use crate::model::sql::parse_sql_expr;

use super::stat;
use super::value::{as_f64, compare, from_f64, is_truthy, values_equal};

/// Column-oriented view of the working row set.
pub(crate) type Frame = HashMap<String, Vec<Json>>;

enum Evaluated {
    Scalar(Json),
    Column(Vec<Json>),
}

impl Evaluated {
    fn into_column(self, len: usize) -> Vec<Json> {
        match self {
            Evaluated::Scalar(v) => vec![v; len],
            Evaluated::Column(col) => col,
        }
    }

    fn at(&self, i: usize) -> Json {
        match self {
            Evaluated::Scalar(v) => v.clone(),
            Evaluated::Column(col) => col.get(i).cloned().unwrap_or(Json::Null),
        }
    }
}

/// Evaluate a SQL expression into one value per row.
pub(crate) fn evaluate(sql: &str, frame: &Frame, len: usize) -> ComputationResult<Vec<Json>> {
    let expr =
        parse_sql_expr(sql).map_err(|e| ComputationError::Expression(e.to_string()))?;
    Ok(eval(&expr, frame, len, None)?.into_column(len))
}

fn unsupported(what: impl std::fmt::Display) -> ComputationError {
    ComputationError::Expression(format!("unsupported construct: {}", what))
}

fn eval(
    expr: &Expr,
    frame: &Frame,
    len: usize,
    row: Option<usize>,
) -> ComputationResult<Evaluated> {
    match expr {
        Expr::Identifier(ident) => column(&ident.value, frame, row),
        Expr::CompoundIdentifier(parts) => {
            let name = parts
                .iter()
                .map(|p| p.value.as_str())
                .collect::<Vec<_>>()
                .join(".");
            column(&name, frame, row)
        }
        Expr::Value(value) => Ok(Evaluated::Scalar(literal(value)?)),
        Expr::Nested(inner) => eval(inner, frame, len, row),
        Expr::IsNull(inner) => {
            let evaluated = eval(inner, frame, len, row)?;
            Ok(map_unary(evaluated, |v| Json::Bool(v.is_null())))
        }
        Expr::IsNotNull(inner) => {
            let evaluated = eval(inner, frame, len, row)?;
            Ok(map_unary(evaluated, |v| Json::Bool(!v.is_null())))
        }
        Expr::UnaryOp { op, expr: inner } => {
            let evaluated = eval(inner, frame, len, row)?;
            match op {
                UnaryOperator::Plus => Ok(map_unary(evaluated, |v| {
                    as_f64(v).map(from_f64).unwrap_or(Json::Null)
                })),
                UnaryOperator::Minus => Ok(map_unary(evaluated, |v| {
                    as_f64(v).map(|f| from_f64(-f)).unwrap_or(Json::Null)
                })),
                UnaryOperator::Not => Ok(map_unary(evaluated, |v| Json::Bool(!is_truthy(v)))),
                other => Err(unsupported(format!("unary {}", other))),
            }
        }
        Expr::BinaryOp { left, op, right } => {
            let a = eval(left, frame, len, row)?;
            let b = eval(right, frame, len, row)?;
            binary(op, a, b)
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(r) = row {
                for (condition, result) in conditions.iter().zip(results) {
                    let holds = match operand {
                        Some(op) => {
                            let subject = eval(op, frame, len, row)?.at(r);
                            let candidate = eval(condition, frame, len, row)?.at(r);
                            values_equal(&subject, &candidate)
                        }
                        None => is_truthy(&eval(condition, frame, len, row)?.at(r)),
                    };
                    if holds {
                        return Ok(Evaluated::Scalar(eval(result, frame, len, row)?.at(r)));
                    }
                }
                return Ok(Evaluated::Scalar(match else_result {
                    Some(e) => eval(e, frame, len, row)?.at(r),
                    None => Json::Null,
                }));
            }
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                out.push(eval(expr, frame, len, Some(i))?.at(i));
            }
            Ok(Evaluated::Column(out))
        }
        Expr::Function(func) => {
            let name = func
                .name
                .0
                .last()
                .map(|i| i.value.to_lowercase())
                .unwrap_or_default();
            call(&name, func, frame, len, row)
        }
        other => Err(unsupported(other)),
    }
}

fn column(name: &str, frame: &Frame, row: Option<usize>) -> ComputationResult<Evaluated> {
    let col = frame.get(name).ok_or_else(|| {
        ComputationError::Expression(format!("there is no field named {}", name))
    })?;
    Ok(match row {
        Some(i) => Evaluated::Scalar(col.get(i).cloned().unwrap_or(Json::Null)),
        None => Evaluated::Column(col.clone()),
    })
}

fn literal(value: &SqlValue) -> ComputationResult<Json> {
    Ok(match value {
        SqlValue::Number(text, _) => {
            if let Ok(i) = text.parse::<i64>() {
                Json::from(i)
            } else {
                text.parse::<f64>()
                    .map(from_f64)
                    .map_err(|_| ComputationError::Expression(format!("bad number {}", text)))?
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => Json::from(s.clone()),
        SqlValue::Boolean(b) => Json::Bool(*b),
        SqlValue::Null => Json::Null,
        other => return Err(unsupported(other)),
    })
}

fn map_unary(evaluated: Evaluated, f: impl Fn(&Json) -> Json) -> Evaluated {
    match evaluated {
        Evaluated::Scalar(v) => Evaluated::Scalar(f(&v)),
        Evaluated::Column(col) => Evaluated::Column(col.iter().map(|v| f(v)).collect()),
    }
}

fn broadcast(a: Evaluated, b: Evaluated, f: impl Fn(&Json, &Json) -> Json) -> Evaluated {
    match (a, b) {
        (Evaluated::Scalar(x), Evaluated::Scalar(y)) => Evaluated::Scalar(f(&x, &y)),
        (Evaluated::Column(xs), Evaluated::Scalar(y)) => {
            Evaluated::Column(xs.iter().map(|x| f(x, &y)).collect())
        }
        (Evaluated::Scalar(x), Evaluated::Column(ys)) => {
            Evaluated::Column(ys.iter().map(|y| f(&x, y)).collect())
        }
        (Evaluated::Column(xs), Evaluated::Column(ys)) => Evaluated::Column(
            xs.iter()
                .zip(ys.iter())
                .map(|(x, y)| f(x, y))
                .collect(),
        ),
    }
}

fn numeric_op(f: impl Fn(f64, f64) -> f64 + Copy) -> impl Fn(&Json, &Json) -> Json + Copy {
    move |a, b| match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => from_f64(f(x, y)),
        _ => Json::Null,
    }
}

fn binary(op: &BinaryOperator, a: Evaluated, b: Evaluated) -> ComputationResult<Evaluated> {
    use std::cmp::Ordering;
    Ok(match op {
        BinaryOperator::Plus => broadcast(a, b, numeric_op(|x, y| x + y)),
        BinaryOperator::Minus => broadcast(a, b, numeric_op(|x, y| x - y)),
        BinaryOperator::Multiply => broadcast(a, b, numeric_op(|x, y| x * y)),
        BinaryOperator::Divide => broadcast(a, b, numeric_op(|x, y| x / y)),
        BinaryOperator::Modulo => broadcast(a, b, numeric_op(|x, y| x % y)),
        BinaryOperator::Eq => broadcast(a, b, |x, y| Json::Bool(values_equal(x, y))),
        BinaryOperator::NotEq => broadcast(a, b, |x, y| Json::Bool(!values_equal(x, y))),
        BinaryOperator::Gt => broadcast(a, b, |x, y| Json::Bool(compare(x, y) == Ordering::Greater)),
        BinaryOperator::Lt => broadcast(a, b, |x, y| Json::Bool(compare(x, y) == Ordering::Less)),
        BinaryOperator::GtEq => broadcast(a, b, |x, y| Json::Bool(compare(x, y) != Ordering::Less)),
        BinaryOperator::LtEq => {
            broadcast(a, b, |x, y| Json::Bool(compare(x, y) != Ordering::Greater))
        }
        BinaryOperator::And => broadcast(a, b, |x, y| Json::Bool(is_truthy(x) && is_truthy(y))),
        BinaryOperator::Or => broadcast(a, b, |x, y| Json::Bool(is_truthy(x) || is_truthy(y))),
        other => return Err(unsupported(other)),
    })
}

fn call(
    name: &str,
    func: &sqlparser::ast::Function,
    frame: &Frame,
    len: usize,
    row: Option<usize>,
) -> ComputationResult<Evaluated> {
    let args: Vec<&FunctionArg> = match &func.args {
        FunctionArguments::List(list) => list.args.iter().collect(),
        FunctionArguments::None => Vec::new(),
        other => return Err(unsupported(other)),
    };

    // count(*) counts the rows of the frame.
    if name == "count"
        && args
            .first()
            .map(|a| matches!(a, FunctionArg::Unnamed(FunctionArgExpr::Wildcard)))
            .unwrap_or(false)
    {
        return Ok(Evaluated::Scalar(Json::from(len as i64)));
    }

    let arg_expr = |i: usize| -> ComputationResult<&Expr> {
        match args.get(i) {
            Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(e))) => Ok(e),
            _ => Err(ComputationError::Expression(format!(
                "function {} is missing argument {}",
                name,
                i + 1
            ))),
        }
    };

    let aggregate = |reduce: &dyn Fn(&[f64]) -> Option<f64>| -> ComputationResult<Evaluated> {
        // Aggregates always read the whole column, even inside a
        // row-wise CASE.
        let col = eval(arg_expr(0)?, frame, len, None)?.into_column(len);
        let nums: Vec<f64> = col.iter().filter_map(as_f64).collect();
        Ok(Evaluated::Scalar(
            reduce(&nums).map(from_f64).unwrap_or(Json::Null),
        ))
    };

    match name {
        "sum" => aggregate(&|nums| Some(stat::sum(nums))),
        "mean" | "avg" => aggregate(&stat::mean),
        "median" => aggregate(&stat::median),
        "stdev" | "stddev" => aggregate(&stat::stdev),
        "variance" => aggregate(&stat::variance),
        "max" => aggregate(&stat::max),
        "min" => aggregate(&stat::min),
        "count" => {
            // count over a column counts non-empty values.
            let col = eval(arg_expr(0)?, frame, len, None)?.into_column(len);
            let n = col
                .iter()
                .filter(|v| !v.is_null() && v.as_str() != Some(""))
                .count();
            Ok(Evaluated::Scalar(Json::from(n as i64)))
        }
        "abs" => scalar_fn(arg_expr(0)?, frame, len, row, |f| Some(f.abs())),
        "round" => scalar_fn(arg_expr(0)?, frame, len, row, |f| Some(f.round())),
        "sqrt" => scalar_fn(arg_expr(0)?, frame, len, row, |f| {
            (f >= 0.0).then(|| f.sqrt())
        }),
        "ln" => scalar_fn(arg_expr(0)?, frame, len, row, |f| {
            (f > 0.0).then(|| f.ln())
        }),
        "log10" => scalar_fn(arg_expr(0)?, frame, len, row, |f| {
            (f > 0.0).then(|| f.log10())
        }),
        "log2" => scalar_fn(arg_expr(0)?, frame, len, row, |f| {
            (f > 0.0).then(|| f.log2())
        }),
        "power" | "pow" => {
            let a = eval(arg_expr(0)?, frame, len, row)?;
            let b = eval(arg_expr(1)?, frame, len, row)?;
            Ok(broadcast(a, b, numeric_op(f64::powf)))
        }
        "upper" => string_fn(arg_expr(0)?, frame, len, row, |s| s.to_uppercase()),
        "lower" => string_fn(arg_expr(0)?, frame, len, row, |s| s.to_lowercase()),
        "length" => {
            let evaluated = eval(arg_expr(0)?, frame, len, row)?;
            Ok(map_unary(evaluated, |v| match v {
                Json::String(s) => Json::from(s.chars().count() as i64),
                Json::Null => Json::Null,
                other => Json::from(other.to_string().chars().count() as i64),
            }))
        }
        _ => Err(ComputationError::Expression(format!(
            "unsupported function {}",
            name
        ))),
    }
}

fn scalar_fn(
    arg: &Expr,
    frame: &Frame,
    len: usize,
    row: Option<usize>,
    f: impl Fn(f64) -> Option<f64>,
) -> ComputationResult<Evaluated> {
    let evaluated = eval(arg, frame, len, row)?;
    Ok(map_unary(evaluated, |v| {
        as_f64(v).and_then(&f).map(from_f64).unwrap_or(Json::Null)
    }))
}

fn string_fn(
    arg: &Expr,
    frame: &Frame,
    len: usize,
    row: Option<usize>,
    f: impl Fn(&str) -> String,
) -> ComputationResult<Evaluated> {
    let evaluated = eval(arg, frame, len, row)?;
    Ok(map_unary(evaluated, |v| match v {
        Json::String(s) => Json::from(f(s)),
        Json::Null => Json::Null,
        other => Json::from(f(&other.to_string())),
    }))
}
