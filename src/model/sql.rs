//! Client-side handling of free-form SQL expressions.
//!
//! The engine never executes these expressions itself; it only checks that
//! the text parses as a single scalar expression, extracts the column
//! identifiers it mentions, and substitutes display names with stable
//! field ids before the text is shipped to a backend.

use sqlparser::ast::{Expr, FunctionArg, FunctionArgExpr, FunctionArguments};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::workflow::{CompileError, CompileResult};

/// Parse a scalar SQL expression.
pub fn parse_sql_expr(sql: &str) -> CompileResult<Expr> {
    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(sql)
        .map_err(|e| CompileError::MalformedSql {
            sql: sql.to_string(),
            message: e.to_string(),
        })?;
    parser.parse_expr().map_err(|e| CompileError::MalformedSql {
        sql: sql.to_string(),
        message: e.to_string(),
    })
}

/// Collect the column identifiers referenced by a SQL expression.
pub fn referenced_fields(sql: &str) -> CompileResult<Vec<String>> {
    let expr = parse_sql_expr(sql)?;
    let mut found = Vec::new();
    collect_idents(&expr, &mut found);
    found.dedup();
    Ok(found)
}

/// Rewrite identifiers through `rename`, returning the regenerated SQL
/// text. Identifiers for which `rename` returns `None` are left as-is.
pub fn rename_fields(
    sql: &str,
    rename: &dyn Fn(&str) -> Option<String>,
) -> CompileResult<String> {
    let mut expr = parse_sql_expr(sql)?;
    map_idents(&mut expr, rename);
    Ok(expr.to_string())
}

fn collect_idents(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Identifier(ident) => {
            if !out.contains(&ident.value) {
                out.push(ident.value.clone());
            }
        }
        Expr::CompoundIdentifier(parts) => {
            let name = parts
                .iter()
                .map(|p| p.value.as_str())
                .collect::<Vec<_>>()
                .join(".");
            if !out.contains(&name) {
                out.push(name);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_idents(left, out);
            collect_idents(right, out);
        }
        Expr::UnaryOp { expr, .. } => collect_idents(expr, out),
        Expr::Nested(inner) => collect_idents(inner, out),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => collect_idents(inner, out),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(op) = operand {
                collect_idents(op, out);
            }
            for c in conditions {
                collect_idents(c, out);
            }
            for r in results {
                collect_idents(r, out);
            }
            if let Some(e) = else_result {
                collect_idents(e, out);
            }
        }
        Expr::Function(func) => {
            if let FunctionArguments::List(list) = &func.args {
                for arg in &list.args {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) = arg {
                        collect_idents(e, out);
                    }
                }
            }
        }
        _ => {}
    }
}

fn map_idents(expr: &mut Expr, rename: &dyn Fn(&str) -> Option<String>) {
    match expr {
        Expr::Identifier(ident) => {
            if let Some(next) = rename(&ident.value) {
                ident.value = next;
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            map_idents(left, rename);
            map_idents(right, rename);
        }
        Expr::UnaryOp { expr, .. } => map_idents(expr, rename),
        Expr::Nested(inner) => map_idents(inner, rename),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => map_idents(inner, rename),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(op) = operand {
                map_idents(op, rename);
            }
            for c in conditions {
                map_idents(c, rename);
            }
            for r in results {
                map_idents(r, rename);
            }
            if let Some(e) = else_result {
                map_idents(e, rename);
            }
        }
        Expr::Function(func) => {
            if let FunctionArguments::List(list) = &mut func.args {
                for arg in &mut list.args {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) = arg {
                        map_idents(e, rename);
                    }
                }
            }
        }
        _ => {}
    }
}
