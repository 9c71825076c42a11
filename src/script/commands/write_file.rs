//! [`WriteFileCommand`] writes or appends text to a file.
//!
//! Script syntax:
//! ```yaml
//! - writefile:
//!     path: reports/${host}.txt
//!     content: "${host}: ${ver}"
//!     append: true
//! ```
//!
//! Missing parent directories are created. Appends add a trailing newline.

use crate::error::ScriptParseError;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::parser::StepFields;
use crate::script::{Step, StepKind};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;

pub struct WriteFileCommand;

impl WriteFileCommand {
    pub const NAME: &'static str = "writefile";
}

async fn write(path: &Path, content: &str, append: bool) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    if !append {
        return tokio::fs::write(path, content).await;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

#[async_trait]
impl StepHandler for WriteFileCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        Ok(StepKind::WriteFile {
            path: fields.scalar_or(&["path", "file"]).unwrap_or_default(),
            content: fields.string("content").unwrap_or_default(),
            append: fields.bool("append")?.unwrap_or(false),
        })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        _executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::WriteFile { path, content, append } = &step.kind else {
            return CommandResult::failed("not a writefile step");
        };
        let path = ctx.substitute(path);
        if path.trim().is_empty() {
            return CommandResult::failed("missing path");
        }
        let content = ctx.substitute(content);
        if let Err(e) = write(Path::new(&path), &content, *append).await {
            return CommandResult::failed(format!("cannot write `{path}`: {e}"));
        }
        ctx.debug(|| {
            let verb = if *append { "appended" } else { "wrote" };
            format!("writefile {path}: {verb} {} bytes", content.len())
        });
        CommandResult::ok()
    }
}

#[cfg(test)]
mod tests {
    use crate::script::testing::{FakeTarget, run_yaml};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_write_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out").join("report.txt");
        let yaml = format!(
            r#"
vars:
  host: r1
steps:
  - writefile:
      path: '{path}'
      content: "header"
  - writefile:
      path: '{path}'
      content: "${{host}} ok"
      append: true
"#,
            path = file.display()
        );
        let (outcome, _) = run_yaml(&yaml, Arc::new(FakeTarget::new())).await;
        assert!(outcome.success);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "headerr1 ok\n");
    }
}
