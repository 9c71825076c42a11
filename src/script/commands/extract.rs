//! [`ExtractCommand`] pulls regex captures out of a variable.
//!
//! Script syntax:
//! ```yaml
//! - extract:
//!     from: v
//!     pattern: 'Version (\S+)'
//!     into: [ver]
//!     match: last        # first (default), last, all, or a zero-based index
//! ```
//!
//! Each capture group fills the matching `into` variable; a pattern without
//! groups fills the first variable with the whole match. With `match: all`
//! every variable becomes a list. Variables with nothing to hold are set to
//! the empty string.

use super::variable_name;
use crate::error::ScriptParseError;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::parser::StepFields;
use crate::script::value::Value;
use crate::script::{MatchSelector, Step, StepKind};
use async_trait::async_trait;
use regex::{Captures, RegexBuilder};

pub struct ExtractCommand;

impl ExtractCommand {
    pub const NAME: &'static str = "extract";
}

fn parse_selector(fields: &StepFields<'_>) -> Result<MatchSelector, ScriptParseError> {
    let Some(text) = fields.string("match") else {
        return Ok(MatchSelector::First);
    };
    match text.trim().to_lowercase().as_str() {
        "first" => Ok(MatchSelector::First),
        "last" => Ok(MatchSelector::Last),
        "all" => Ok(MatchSelector::All),
        other => other
            .parse()
            .map(MatchSelector::Index)
            .map_err(|_| fields.error(format!("`match` must be first, last, all or an index, got `{text}`"))),
    }
}

/// The values a match contributes: its groups, or the whole match.
fn groups(caps: &Captures<'_>) -> Vec<String> {
    let text = |i: usize| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();
    if caps.len() == 1 {
        vec![text(0)]
    } else {
        (1..caps.len()).map(text).collect()
    }
}

#[async_trait]
impl StepHandler for ExtractCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        Ok(StepKind::Extract {
            from: fields.scalar_or(&["from", "source"]).unwrap_or_default(),
            pattern: fields
                .string("pattern")
                .or_else(|| fields.string("regex"))
                .unwrap_or_default(),
            into: fields.string_list("into")?,
            selector: parse_selector(fields)?,
        })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        _executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::Extract { from, pattern, into, selector } = &step.kind else {
            return CommandResult::failed("not an extract step");
        };
        let pattern = ctx.substitute(pattern);
        let re = match RegexBuilder::new(&pattern).multi_line(true).build() {
            Ok(re) => re,
            Err(e) => return CommandResult::failed(format!("invalid pattern `{pattern}`: {e}")),
        };

        let source = ctx
            .get(variable_name(from))
            .map(Value::as_string)
            .unwrap_or_default();
        let matches: Vec<Vec<String>> = re.captures_iter(&source).map(|caps| groups(&caps)).collect();
        ctx.debug(|| format!("extract `{pattern}` from {from}: {} matches", matches.len()));

        if matches.is_empty() {
            for name in into {
                ctx.set(name, "");
            }
            return CommandResult::ok();
        }

        if *selector == MatchSelector::All {
            for (i, name) in into.iter().enumerate() {
                let column = matches
                    .iter()
                    .map(|groups| groups.get(i).cloned().unwrap_or_default())
                    .collect::<Vec<_>>();
                ctx.set(name, column);
            }
            return CommandResult::ok();
        }

        let chosen = match selector {
            MatchSelector::Last => matches.last(),
            MatchSelector::Index(i) => matches.get(*i),
            _ => matches.first(),
        };
        for (i, name) in into.iter().enumerate() {
            let value = chosen.and_then(|groups| groups.get(i)).cloned().unwrap_or_default();
            ctx.set(name, value);
        }
        CommandResult::ok()
    }
}
