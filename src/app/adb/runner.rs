use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::error::AppError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Trimmed stderr, falling back to stdout, for error messages.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Seam for every external-process call made by drivers and batch actions.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        run_command_with_timeout(program, args, timeout, trace_id)
    }
}

/// After the child exits, how long to keep reading pipes a grandchild may
/// still hold open.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A pipe read to EOF on a helper thread. The buffer is shared so output read
/// so far survives a reader that never reaches EOF.
struct Drain {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

impl Drain {
    fn collect(self, limit: Duration) -> Vec<u8> {
        let _ = self.done.recv_timeout(limit);
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buffer)
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Drain {
    let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
    let (done_tx, done) = mpsc::channel();
    let shared = Arc::clone(&buffer);
    std::thread::spawn(move || {
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => shared
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&temp[..count]),
                Err(_) => break,
            }
        }
        let _ = done_tx.send(());
    });
    Drain { buffer, done }
}

/// Runs `program` and kills it after `timeout`. The call itself never blocks
/// much past `timeout`: drain threads still held open by grandchildren are
/// left behind instead of joined.
pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    debug!(trace_id = %trace_id, program = %program, args = ?args, "spawning command");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AppError::not_configured(format!("Executable not found: {program}"), trace_id)
            } else {
                AppError::system(format!("Failed to spawn {program}: {err}"), trace_id)
            }
        })?;

    // Drain both pipes while waiting; a chatty child blocks once the pipe buffer fills.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stdout_drain = drain(stdout);
    let stderr_drain = drain(stderr);

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!(
                        trace_id = %trace_id,
                        program = %program,
                        timeout_ms = timeout.as_millis() as u64,
                        "command timed out; killed"
                    );
                    return Err(AppError::timeout(
                        format!("{program} timed out after {}s", timeout.as_secs()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                let _ = child.kill();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_drain.collect(DRAIN_GRACE);
    let stderr_bytes = stderr_drain.collect(DRAIN_GRACE);

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn sh(script: &str) -> (String, Vec<String>) {
        ("sh".to_string(), vec!["-c".to_string(), script.to_string()])
    }

    #[cfg(unix)]
    #[test]
    fn does_not_deadlock_on_large_stdout() {
        let (program, args) =
            sh("i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done");

        let output = run_command_with_timeout(&program, &args, Duration::from_secs(10), "t")
            .expect("expected large-output command to complete without timing out");

        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.len() >= 1_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn hung_command_surfaces_timeout_kind() {
        let (program, args) = sh("sleep 5");
        let err = run_command_with_timeout(&program, &args, Duration::from_millis(200), "t-9")
            .expect_err("expected timeout");
        assert_eq!(err.code, "ERR_TIMEOUT");
        assert_eq!(err.trace_id, "t-9");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_is_bounded_when_a_grandchild_holds_the_pipes() {
        let (program, args) = sh("sleep 4 & sleep 30");
        let started = Instant::now();
        let err = run_command_with_timeout(&program, &args, Duration::from_millis(200), "t")
            .expect_err("expected timeout");
        assert_eq!(err.code, "ERR_TIMEOUT");
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "timeout took {:?}",
            started.elapsed()
        );
    }

    #[cfg(unix)]
    #[test]
    fn exited_parent_returns_output_despite_background_grandchild() {
        let (program, args) = sh("echo ready; sleep 5 &");
        let started = Instant::now();
        let output = run_command_with_timeout(&program, &args, Duration::from_secs(10), "t")
            .expect("parent exits immediately");
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.trim(), "ready");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn missing_executable_is_not_configured() {
        let err = SystemRunner
            .run(
                "/this/path/should/not/exist/ldconsole",
                &[],
                Duration::from_secs(1),
                "t",
            )
            .expect_err("missing");
        assert_eq!(err.code, "ERR_NOT_CONFIGURED");
    }

    #[test]
    fn failure_detail_prefers_stderr() {
        let output = CommandOutput {
            stdout: "out".to_string(),
            stderr: " err \n".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(output.failure_detail(), "err");
        let output = CommandOutput {
            exit_code: Some(3),
            ..CommandOutput::default()
        };
        assert_eq!(output.failure_detail(), "exit code 3");
    }
}
