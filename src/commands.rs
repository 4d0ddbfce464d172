/// Operator console: a [`DecisionMaker`] driven by a human typing tool calls.
///
/// One command per line, `<tool_name> [json-args]`, using the same tool names
/// a tool-calling model would use:
///
/// ```text
/// move_pointer {"x": 120, "y": 1500}
/// click_pointer
/// pause_loop {"seconds": 5, "explanation": "page loading"}
/// finish_task {"summary": "sent"}
/// ```
///
/// End of input cancels the session.
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

use crate::agent_engine::decision::{parse_tool_call, DecisionContext, DecisionMaker};
use crate::agent_engine::state::Decision;
use crate::errors::{PhoneClawError, PhoneClawResult};

fn command_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-z_]+)(?:\s+(.+))?$").expect("static regex"))
}

/// Parse one console line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> PhoneClawResult<Option<Decision>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let caps = command_re()
        .captures(line)
        .ok_or_else(|| PhoneClawError::Decision(format!("cannot parse command: {line}")))?;
    let name = &caps[1];
    let args = match caps.get(2) {
        Some(raw) => serde_json::from_str(raw.as_str())
            .map_err(|e| PhoneClawError::Decision(format!("{name}: arguments are not valid JSON: {e}")))?,
        None => serde_json::Value::Object(Default::default()),
    };
    parse_tool_call(name, &args).map(Some)
}

pub struct OperatorConsole<R, W> {
    lines: Lines<BufReader<R>>,
    out: W,
}

impl OperatorConsole<tokio::io::Stdin, tokio::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> OperatorConsole<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, out: W) -> Self {
        Self {
            lines: BufReader::new(input).lines(),
            out,
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    async fn say(&mut self, text: &str) -> PhoneClawResult<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> DecisionMaker for OperatorConsole<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn decide(&mut self, ctx: DecisionContext<'_>) -> PhoneClawResult<Decision> {
        let last = match ctx.last_result {
            Some(r) => serde_json::to_string(r)?,
            None => "-".into(),
        };
        let prompt = format!(
            "\n== goal: {}\n== observation #{} ({}x{}), retries {}\n{}\n== last result: {}\n== tools: {}\n> ",
            ctx.goal,
            ctx.observation.id,
            ctx.observation.resolution.0,
            ctx.observation.resolution.1,
            ctx.retry_count,
            ctx.observation.describe_targets(),
            last,
            ctx.tools.join(", "),
        );
        self.say(&prompt).await?;

        loop {
            let Some(line) = self.lines.next_line().await? else {
                tracing::info!("operator input closed");
                return Err(PhoneClawError::Cancelled);
            };
            match parse_command(&line) {
                Ok(Some(decision)) => return Ok(decision),
                Ok(None) => self.say("> ").await?,
                Err(e) => {
                    tracing::debug!(error = %e, "rejected console command");
                    self.say(&format!("error: {e}\n> ")).await?;
                }
            }
        }
    }
}
