use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{DeviceBridgeError, DeviceResult};

pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(20);

static LINKER_WARNING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^WARNING: linker.+$").expect("linker warning regex"));

#[derive(Clone, Debug, Default)]
pub struct ExecOptions {
    pub timeout: Option<Duration>,
    /// Waits for every in-flight run to finish and holds off new ones until done.
    pub exclusive: bool,
}

impl ExecOptions {
    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[async_trait]
pub trait ShellExecutor: Send + Sync {
    async fn exec(&self, program: &str, args: &[String], opts: &ExecOptions)
        -> DeviceResult<ExecOutput>;
}

/// Runs real processes through `tokio::process`.
pub struct ProcessShell {
    gate: RwLock<()>,
    default_timeout: Duration,
}

impl Default for ProcessShell {
    fn default() -> Self {
        Self::new(DEFAULT_EXEC_TIMEOUT)
    }
}

impl ProcessShell {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            gate: RwLock::new(()),
            default_timeout,
        }
    }
}

#[async_trait]
impl ShellExecutor for ProcessShell {
    async fn exec(
        &self,
        program: &str,
        args: &[String],
        opts: &ExecOptions,
    ) -> DeviceResult<ExecOutput> {
        let command_line = render_command(program, args);
        let timeout = opts.timeout.unwrap_or(self.default_timeout);

        let _shared;
        let _exclusive;
        if opts.exclusive {
            debug!(command = %command_line, "waiting for other commands before exclusive run");
            _exclusive = self.gate.write().await;
        } else {
            _shared = self.gate.read().await;
        }

        debug!(command = %command_line, "running");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DeviceBridgeError::Spawn {
                command: command_line.clone(),
                source,
            })?;
        let stdout_pipe = Capture::spawn(child.stdout.take());
        let stderr_pipe = Capture::spawn(child.stderr.take());

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        let status = match waited {
            Ok(result) => result.map_err(|source| DeviceBridgeError::Spawn {
                command: command_line.clone(),
                source,
            })?,
            Err(_) => {
                if let Err(err) = child.kill().await {
                    debug!(command = %command_line, %err, "unable to kill timed out process");
                }
                return Err(DeviceBridgeError::Timeout {
                    command: command_line,
                    timeout_ms: timeout.as_millis() as u64,
                    stdout: clean_stdout(&stdout_pipe.finish().await),
                    stderr: stderr_pipe.finish().await.trim().to_string(),
                });
            }
        };

        let stdout = clean_stdout(&stdout_pipe.finish().await);
        let stderr = stderr_pipe.finish().await.trim().to_string();
        let exit_code = status.code();
        if !status.success() {
            let cause = match exit_code {
                Some(code) => format!("Command exited with code {code}"),
                None => "Command was terminated by a signal".to_string(),
            };
            return Err(DeviceBridgeError::Exec {
                command: command_line,
                cause,
                output: pick_output(&stderr, &stdout),
            });
        }
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

/// How long a pipe may keep producing output after its process is gone.
/// Daemons forked by the child can hold the pipe open indefinitely.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Collects a child pipe chunk by chunk so partial output survives a kill.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl Capture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = pipe.map(|mut pipe| {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buffer.lock().extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buffer, reader }
    }

    async fn finish(self) -> String {
        if let Some(mut reader) = self.reader {
            if tokio::time::timeout(PIPE_DRAIN_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
        }
        let bytes = std::mem::take(&mut *self.buffer.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn clean_stdout(raw: &str) -> String {
    LINKER_WARNING_RE.replace_all(raw, "").trim().to_string()
}

/// stderr, else stdout, else a placeholder.
pub fn pick_output(stderr: &str, stdout: &str) -> String {
    if !stderr.trim().is_empty() {
        stderr.to_string()
    } else if !stdout.trim().is_empty() {
        stdout.to_string()
    } else {
        "<empty>".to_string()
    }
}

/// Human readable command line; arguments with whitespace are quoted.
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        if arg.chars().any(char::is_whitespace) {
            rendered.push('\'');
            rendered.push_str(&arg.replace('\'', "'\\''"));
            rendered.push('\'');
        } else {
            rendered.push_str(arg);
        }
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn renders_quoted_arguments() {
        assert_eq!(
            render_command("adb", &args(&["-s", "emulator-5554", "shell", "echo hi"])),
            "adb -s emulator-5554 shell 'echo hi'"
        );
    }

    #[test]
    fn output_preference() {
        assert_eq!(pick_output("bad", "good"), "bad");
        assert_eq!(pick_output("", "good"), "good");
        assert_eq!(pick_output(" ", ""), "<empty>");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_output_and_strips_linker_warnings() {
        let shell = ProcessShell::default();
        let out = shell
            .exec(
                "sh",
                &args(&["-c", "echo 'WARNING: linker: noise'; echo ready"]),
                &ExecOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "ready");
        assert_eq!(out.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_carries_stderr() {
        let shell = ProcessShell::default();
        let err = shell
            .exec(
                "sh",
                &args(&["-c", "echo out; echo 'device offline' 1>&2; exit 3"]),
                &ExecOptions::default(),
            )
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("device offline"), "{message}");
        assert!(message.contains("code 3"), "{message}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let shell = ProcessShell::default();
        let err = shell
            .exec(
                "sh",
                &args(&["-c", "sleep 5"]),
                &ExecOptions::default().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceBridgeError::Timeout { timeout_ms: 100, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_keeps_output_printed_before_it() {
        let shell = ProcessShell::default();
        let err = shell
            .exec(
                "sh",
                &args(&["-c", "echo installing; echo 'waiting for device' 1>&2; exec sleep 5"]),
                &ExecOptions::default().with_timeout(Duration::from_millis(300)),
            )
            .await
            .unwrap_err();
        match &err {
            DeviceBridgeError::Timeout { stdout, stderr, .. } => {
                assert_eq!(stdout, "installing");
                assert_eq!(stderr, "waiting for device");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.detail(), "waiting for device");
        assert!(err.to_string().contains("waiting for device"));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exclusive_run_blocks_later_commands() {
        let shell = std::sync::Arc::new(ProcessShell::default());
        let started = std::time::Instant::now();
        let exclusive = {
            let shell = shell.clone();
            tokio::spawn(async move {
                shell
                    .exec("sh", &args(&["-c", "sleep 0.3"]), &ExecOptions::exclusive())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        shell
            .exec("sh", &args(&["-c", "true"]), &ExecOptions::default())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        exclusive.await.unwrap().unwrap();
    }
}
