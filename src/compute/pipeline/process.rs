//! Local script execution and result-file access.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::compute::evolution::{CancelToken, EvaluationError};

use super::{LineSink, OutputStream, ResultReader, ScriptOutput, ScriptRunner};

/// How often a running process checks for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Resolves once cancellation has been requested.
async fn cancelled(cancel: &CancelToken) {
    while !cancel.is_cancelled() {
        tokio::time::sleep(CANCEL_POLL).await;
    }
}

/// Runs simulation commands as local child processes.
///
/// The child is killed when it times out or the evaluation is cancelled.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(command: &[String], work_dir: &Path) -> Result<Command, EvaluationError> {
        let (program, args) = command.split_first().ok_or_else(|| {
            EvaluationError::Spawn(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty simulation command",
            ))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(1800))
    }
}

/// Forward each line to `on_line` and collect the whole stream.
///
/// Lines are decoded lossily, matching [`ProcessRunner::execute`].
async fn read_lines<R>(
    reader: Option<R>,
    stream: OutputStream,
    on_line: &LineSink<'_>,
) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(reader) = reader else {
        return Ok(collected);
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let bytes = buf.strip_suffix(b"\n").unwrap_or(&buf);
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        let line = String::from_utf8_lossy(bytes);
        on_line(stream, &*line);
        collected.push_str(&line);
        collected.push('\n');
    }
    Ok(collected)
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    async fn execute(
        &self,
        command: &[String],
        work_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<ScriptOutput, EvaluationError> {
        cancel.check()?;
        let child = Self::command(command, work_dir)?
            .spawn()
            .map_err(EvaluationError::Spawn)?;

        let output = tokio::select! {
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(output) => output.map_err(EvaluationError::Output)?,
                Err(_) => return Err(EvaluationError::Timeout(self.timeout)),
            },
            _ = cancelled(cancel) => return Err(EvaluationError::Cancelled),
        };

        Ok(ScriptOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn execute_streaming(
        &self,
        command: &[String],
        work_dir: &Path,
        cancel: &CancelToken,
        on_line: &LineSink<'_>,
    ) -> Result<ScriptOutput, EvaluationError> {
        cancel.check()?;
        let mut child = Self::command(command, work_dir)?
            .spawn()
            .map_err(EvaluationError::Spawn)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            let (stdout, stderr) = tokio::join!(
                read_lines(stdout, OutputStream::Stdout, on_line),
                read_lines(stderr, OutputStream::Stderr, on_line),
            );
            let status = child.wait().await?;
            Ok::<_, io::Error>(ScriptOutput {
                exit_code: status.code(),
                stdout: stdout?,
                stderr: stderr?,
            })
        };

        tokio::select! {
            result = tokio::time::timeout(self.timeout, run) => match result {
                Ok(output) => output.map_err(EvaluationError::Output),
                Err(_) => Err(EvaluationError::Timeout(self.timeout)),
            },
            _ = cancelled(cancel) => Err(EvaluationError::Cancelled),
        }
    }
}

/// Reads result files from the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResultReader;

#[async_trait]
impl ResultReader for LocalResultReader {
    async fn read_file(&self, dir: &Path, relative: &str) -> Result<Vec<u8>, EvaluationError> {
        let path = dir.join(relative);
        tokio::fs::read(&path)
            .await
            .map_err(|source| EvaluationError::ResultFile {
                path: path.display().to_string(),
                source,
            })
    }
}
