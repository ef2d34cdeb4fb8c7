use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::StageError;

const TAIL_LINES: usize = 20;

/// One invocation of an external collaborator.
#[derive(Clone, Debug)]
pub struct ExternalCommand {
    pub tool: String,
    pub program: String,
    pub args: Vec<String>,
    /// Passed to the child only; never logged.
    pub envs: Vec<(String, String)>,
}

impl ExternalCommand {
    pub fn new(tool: &str, program: &str) -> Self {
        Self {
            tool: tool.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Hydra-style `key=value` override.
    pub fn kv(self, key: &str, value: impl fmt::Display) -> Self {
        self.arg(format!("{key}={value}"))
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

/// Seam between stages and process execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs to completion, writing all output to `log_path`. A non-zero
    /// exit becomes `StageError::External`.
    async fn run(&self, cmd: &ExternalCommand, log_path: &Path) -> Result<()>;
}

/// Spawns real subprocesses. No timeout: a hung tool hangs the stage.
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: &ExternalCommand, log_path: &Path) -> Result<()> {
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut log = tokio::fs::File::create(log_path)
            .await
            .with_context(|| format!("failed to create log {}", log_path.display()))?;
        log.write_all(format!("$ {cmd}\n").as_bytes()).await?;

        info!(tool = %cmd.tool, command = %cmd, log = %log_path.display(), "spawning external tool");

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .envs(cmd.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {} ({})", cmd.tool, cmd.program))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "", tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "[stderr] ", tx.clone()));
        }
        drop(tx);

        let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
        while let Some(line) = rx.recv().await {
            debug!(tool = %cmd.tool, "{line}");
            log.write_all(line.as_bytes()).await?;
            log.write_all(b"\n").await?;
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        log.flush().await?;

        let status = child.wait().await?;
        if status.success() {
            info!(tool = %cmd.tool, "external tool finished");
            return Ok(());
        }

        let tail = if tail.is_empty() {
            String::new()
        } else {
            format!("\n{}", Vec::from(tail).join("\n"))
        };
        Err(StageError::External {
            tool: cmd.tool.clone(),
            status: status.to_string(),
            log: log_path.to_path_buf(),
            tail,
        }
        .into())
    }
}

/// Drains a pipe line by line until EOF. Bytes are decoded lossily so the
/// pipe is never closed while the child still writes to it.
async fn forward_lines<R>(pipe: R, prefix: &'static str, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut open = true;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("pipe read failed: {e}");
                break;
            }
        }
        if !open {
            continue;
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        let line = format!("{prefix}{}", String::from_utf8_lossy(&buf));
        // receiver gone: keep draining so the child never sees a closed pipe
        open = tx.send(line).is_ok();
    }
}
