//! Operator input for `input` steps.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// A question for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRequest {
    pub host_id: String,
    pub prompt: String,
    pub default: Option<String>,
}

/// Answers `input` steps.
///
/// `None` means the operator dismissed the question. An empty answer means
/// "use the default".
#[async_trait]
pub trait InputProvider: Send + Sync {
    async fn request_input(&self, request: InputRequest) -> Option<String>;
}

/// Prompts on stderr and reads a line from stdin.
///
/// Runs on several hosts ask one at a time.
pub struct TerminalInput {
    stdin: Mutex<BufReader<Stdin>>,
}

impl TerminalInput {
    pub fn new() -> Self {
        Self {
            stdin: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

impl Default for TerminalInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InputProvider for TerminalInput {
    async fn request_input(&self, request: InputRequest) -> Option<String> {
        let mut stdin = self.stdin.lock().await;
        let question = match &request.default {
            Some(default) => format!("[{}] {} [{default}]: ", request.host_id, request.prompt),
            None => format!("[{}] {}: ", request.host_id, request.prompt),
        };
        let mut stderr = tokio::io::stderr();
        stderr.write_all(question.as_bytes()).await.ok()?;
        stderr.flush().await.ok()?;

        let mut line = String::new();
        match stdin.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}
