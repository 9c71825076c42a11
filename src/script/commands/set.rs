//! [`SetCommand`] assigns a variable.
//!
//! Script syntax:
//! - `- set: name = "literal ${x}"` quoted text, with substitution
//! - `- set: ports = [gi0/1, gi0/2]` a list
//! - `- set: count = count + 1` arithmetic on a defined variable
//! - `- set: mode = ${other}` anything else; numeric results become numbers

use super::variable_name;
use crate::error::ScriptParseError;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::parser::StepFields;
use crate::script::value::{Value, parse_numeric};
use crate::script::{Step, StepKind};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

pub struct SetCommand;

impl SetCommand {
    pub const NAME: &'static str = "set";
}

#[allow(clippy::expect_used)]
static ARITHMETIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\$\{\s*[A-Za-z_][\w.-]*\s*\}|[A-Za-z_][\w.-]*)\s*([+\-*/])\s*(-?[\d.]+|\$\{\s*[A-Za-z_][\w.-]*\s*\}|[A-Za-z_][\w.-]*)$")
        .expect("constant regex pattern is valid")
});

fn unquote(text: &str) -> Option<&str> {
    let text = text.trim();
    ['"', '\'']
        .iter()
        .find_map(|q| text.strip_prefix(*q).and_then(|t| t.strip_suffix(*q)))
        .filter(|_| text.len() >= 2)
}

fn operand(token: &str, ctx: &ScriptContext) -> Option<f64> {
    parse_numeric(token).or_else(|| ctx.get(variable_name(token)).map(Value::as_number))
}

fn arithmetic(expr: &str, ctx: &ScriptContext) -> Option<Value> {
    let caps = ARITHMETIC.captures(expr)?;
    let lhs = ctx.get(variable_name(&caps[1]))?.as_number();
    let rhs = operand(&caps[3], ctx)?;
    let result = match &caps[2] {
        "+" => lhs + rhs,
        "-" => lhs - rhs,
        "*" => lhs * rhs,
        _ if rhs == 0.0 => 0.0,
        _ => lhs / rhs,
    };
    Some(Value::Number(result))
}

/// Evaluate the right-hand side of an assignment.
fn evaluate(expr: &str, ctx: &ScriptContext) -> Value {
    let expr = expr.trim();
    if let Some(text) = unquote(expr) {
        return Value::Scalar(ctx.substitute(text));
    }
    if let Some(items) = expr.strip_prefix('[').and_then(|e| e.strip_suffix(']')) {
        return Value::List(
            items
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| ctx.substitute(unquote(item).unwrap_or(item)))
                .collect(),
        );
    }
    if let Some(value) = arithmetic(expr, ctx) {
        return value;
    }
    let text = ctx.substitute(expr);
    if let Some(n) = parse_numeric(&text) {
        return Value::Number(n);
    }
    ctx.get(&text).cloned().unwrap_or(Value::Scalar(text))
}

#[async_trait]
impl StepHandler for SetCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        Ok(StepKind::Set {
            assignment: fields.scalar_or(&["assignment"]).unwrap_or_default(),
        })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        _executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::Set { assignment } = &step.kind else {
            return CommandResult::failed("not a set step");
        };
        let Some((name, expr)) = assignment.split_once('=') else {
            return CommandResult::failed(format!("expected `name = expression`, got `{assignment}`"));
        };
        let name = variable_name(name);
        if name.is_empty() {
            return CommandResult::failed("variable name is empty");
        }

        let value = evaluate(expr, ctx);
        let before = ctx.get(name).map(Value::to_string);
        ctx.debug(|| match before {
            Some(before) => format!("set {name}: `{before}` -> `{value}`"),
            None => format!("set {name} = `{value}`"),
        });
        ctx.set(name, value);
        CommandResult::ok()
    }
}
