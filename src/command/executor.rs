//! Command executor - runs command lines in a shell subprocess

use crate::config::ShellConfig;
use async_trait::async_trait;
use impish_shared::{wire::CHUNK_PAYLOAD_SIZE, ExecutionResult};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

const COMMAND_NOT_EXECUTABLE: i32 = 126;
const COMMAND_NOT_FOUND: i32 = 127;

/// Errors that prevent a command from producing a result
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write command to shell: {0}")]
    Stdin(#[source] io::Error),

    #[error("Failed to read {stream}: {source}")]
    Read {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to wait for shell: {0}")]
    Wait(#[source] io::Error),
}

/// Something that can run a command line to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, line: &[u8]) -> Result<ExecutionResult, ExecError>;
}

/// Runs command lines by piping them into a shell's stdin
///
/// stdout and stderr are captured separately. Blocks the calling task for
/// the command's full runtime; no timeout is applied.
pub struct ShellExecutor {
    shell: ShellConfig,
}

impl ShellExecutor {
    pub fn new(shell: ShellConfig) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl CommandRunner for ShellExecutor {
    async fn run(&self, line: &[u8]) -> Result<ExecutionResult, ExecError> {
        let mut child = Command::new(&self.shell.program)
            .args(&self.shell.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Launch {
                program: self.shell.program.clone(),
                source,
            })?;

        debug!("Spawned {} (pid={:?})", self.shell.program, child.id());

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.shell.max_capture_bytes;

        let feed = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(line).await {
                    // The shell may exit before reading everything
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(ExecError::Stdin(e)),
                    Ok(()) => {}
                }
                // stdin is dropped here so the shell sees end-of-script
            }
            Ok(())
        };

        let (_, stdout, stderr) = tokio::try_join!(
            feed,
            drain("stdout", stdout, limit),
            drain("stderr", stderr, limit),
        )?;

        let status = child.wait().await.map_err(ExecError::Wait)?;
        let code = exit_code(status);

        if is_launch_failure(code) {
            warn!(
                "Shell could not launch command (exit={}): {}",
                code,
                String::from_utf8_lossy(&stderr).trim_end()
            );
            return Ok(ExecutionResult::not_launched(code));
        }

        Ok(ExecutionResult::completed(code, stdout, stderr))
    }
}

/// Read a pipe to end-of-data in chunk-sized reads, keeping at most `limit` bytes
async fn drain<R>(stream: &'static str, pipe: Option<R>, limit: usize) -> Result<Vec<u8>, ExecError>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(Vec::new());
    };

    let mut captured = Vec::new();
    let mut buf = [0u8; CHUNK_PAYLOAD_SIZE];
    let mut discarded = 0usize;

    loop {
        let n = pipe
            .read(&mut buf)
            .await
            .map_err(|source| ExecError::Read { stream, source })?;
        if n == 0 {
            break;
        }

        let keep = n.min(limit.saturating_sub(captured.len()));
        captured.extend_from_slice(&buf[..keep]);
        discarded += n - keep;
    }

    if discarded > 0 {
        warn!("Discarded {} bytes of {} beyond capture limit", discarded, stream);
    }

    Ok(captured)
}

/// Shell exit codes for "command not found" and "found but not executable"
fn is_launch_failure(code: i32) -> bool {
    matches!(code, COMMAND_NOT_EXECUTABLE | COMMAND_NOT_FOUND)
}

/// Exit code of the shell, or 128 + signal number if it was killed
fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => impish_shared::wire::NO_EXIT_CODE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impish_shared::Status;

    fn sh() -> ShellExecutor {
        ShellExecutor::new(ShellConfig {
            program: "/bin/sh".into(),
            args: vec!["-s".into()],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_echo_hi() {
        let result = sh().run(b"echo hi").await.expect("run failed");

        assert_eq!(result.status, Status::AckOk);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, b"hi\n");
        assert!(result.stderr.is_empty());
        assert_eq!(&result.frame()[..], b"ack-ok\n0\nstdout\nhi\n\nstderr\n\n");
    }

    #[tokio::test]
    async fn test_stdout_and_stderr_kept_apart() {
        let result = sh()
            .run(b"echo out; echo err 1>&2; echo out2")
            .await
            .expect("run failed");

        assert_eq!(result.stdout, b"out\nout2\n");
        assert_eq!(result.stderr, b"err\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_still_launched() {
        let result = sh().run(b"exit 3").await.expect("run failed");
        assert!(result.launched());
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_missing_program_is_not_launched() {
        let result = sh()
            .run(b"definitely-not-a-real-program-xyz")
            .await
            .expect("run failed");

        assert_eq!(result.status, Status::Error);
        assert_eq!(result.exit_code, 127);
        assert!(result.stdout.is_empty() && result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_non_executable_program_is_not_launched() {
        let result = sh().run(b"/dev/null").await.expect("run failed");

        assert_eq!(result.status, Status::Error);
        assert_eq!(result.exit_code, 126);
    }

    #[tokio::test]
    async fn test_shell_syntax_works() {
        let result = sh()
            .run(b"for i in 1 2 3; do printf \"$i\"; done | tr 1 x")
            .await
            .expect("run failed");
        assert_eq!(result.stdout, b"x23");
    }

    #[tokio::test]
    async fn test_large_output_spans_reads() {
        let result = sh()
            .run(b"i=0; while [ $i -lt 500 ]; do echo 0123456789; i=$((i+1)); done")
            .await
            .expect("run failed");
        assert_eq!(result.stdout.len(), 500 * 11);
    }

    #[tokio::test]
    async fn test_capture_limit() {
        let executor = ShellExecutor::new(ShellConfig {
            program: "/bin/sh".into(),
            args: vec!["-s".into()],
            max_capture_bytes: 10,
        });
        let result = executor
            .run(b"echo 0123456789abcdef")
            .await
            .expect("run failed");
        assert_eq!(result.stdout, b"0123456789");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_killed_by_signal() {
        let result = sh().run(b"kill -9 $$").await.expect("run failed");
        assert_eq!(result.exit_code, 128 + 9);
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let executor = ShellExecutor::new(ShellConfig {
            program: "/nonexistent/shell".into(),
            ..Default::default()
        });
        let err = executor.run(b"echo hi").await.unwrap_err();
        assert!(matches!(err, ExecError::Launch { .. }));
    }
}
