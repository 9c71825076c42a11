//! [`ReadFileCommand`] loads a text file's lines into a list variable.
//!
//! Script syntax:
//! ```yaml
//! - readfile:
//!     path: hosts-${site}.txt
//!     into: targets
//!     encoding: utf-8      # utf-8 (default), ascii, utf-16
//!     skip_empty: true     # default true
//!     trim: true           # default true
//!     max_lines: 100
//! ```

use crate::error::ScriptParseError;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::parser::StepFields;
use crate::script::{FileEncoding, Step, StepKind};
use async_trait::async_trait;

pub struct ReadFileCommand;

impl ReadFileCommand {
    pub const NAME: &'static str = "readfile";
}

fn parse_encoding(fields: &StepFields<'_>) -> Result<FileEncoding, ScriptParseError> {
    let Some(name) = fields.string("encoding") else {
        return Ok(FileEncoding::Utf8);
    };
    match name.trim().to_lowercase().replace(['-', '_'], "").as_str() {
        "utf8" => Ok(FileEncoding::Utf8),
        "ascii" => Ok(FileEncoding::Ascii),
        "utf16" | "unicode" => Ok(FileEncoding::Utf16),
        _ => Err(fields.error(format!("unsupported encoding `{name}`"))),
    }
}

/// Decode file bytes; undecodable input is replaced, never rejected.
fn decode(bytes: &[u8], encoding: FileEncoding) -> String {
    match encoding {
        FileEncoding::Utf8 => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            String::from_utf8_lossy(bytes).into_owned()
        }
        FileEncoding::Ascii => bytes
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '?' })
            .collect(),
        FileEncoding::Utf16 => {
            let (bytes, big_endian) = if let Some(rest) = bytes.strip_prefix(b"\xFE\xFF") {
                (rest, true)
            } else {
                (bytes.strip_prefix(b"\xFF\xFE").unwrap_or(bytes), false)
            };
            let units = bytes.chunks_exact(2).map(|pair| {
                let pair = [pair[0], pair[1]];
                if big_endian { u16::from_be_bytes(pair) } else { u16::from_le_bytes(pair) }
            });
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        }
    }
}

fn split_lines(text: &str, trim: bool, skip_empty: bool, max_lines: Option<usize>) -> Vec<String> {
    text.lines()
        .map(|line| if trim { line.trim() } else { line.trim_end_matches('\r') })
        .filter(|line| !(skip_empty && line.trim().is_empty()))
        .take(max_lines.unwrap_or(usize::MAX))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl StepHandler for ReadFileCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        Ok(StepKind::ReadFile {
            path: fields.scalar_or(&["path", "file"]).unwrap_or_default(),
            into: fields
                .string("into")
                .or_else(|| fields.string("variable"))
                .unwrap_or_default(),
            encoding: parse_encoding(fields)?,
            skip_empty: fields.bool("skip_empty")?.unwrap_or(true),
            trim: fields.bool("trim")?.unwrap_or(true),
            max_lines: fields.usize("max_lines")?,
        })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        _executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::ReadFile { path, into, encoding, skip_empty, trim, max_lines } = &step.kind
        else {
            return CommandResult::failed("not a readfile step");
        };
        let path = ctx.substitute(path);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => return CommandResult::failed(format!("cannot read `{path}`: {e}")),
        };
        let lines = split_lines(&decode(&bytes, *encoding), *trim, *skip_empty, *max_lines);
        ctx.debug(|| format!("readfile {path}: {} lines into {into}", lines.len()));
        ctx.set(into, lines);
        CommandResult::ok()
    }
}
