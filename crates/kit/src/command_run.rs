use std::io::{Read, Seek};
use std::process::{Command, ExitStatus};

use crate::error::{Result, RunError};

/// Helpers intended for [`std::process::Command`].
pub trait CommandRun {
    /// Execute the child process, capturing stderr so that a failure carries
    /// the tail of what the child printed.
    fn run(&mut self) -> Result<()>;

    /// Execute the child process with whatever stdio the caller configured,
    /// e.g. inherited streams for an interactive console.
    fn run_attached(&mut self) -> Result<()>;

    /// Render the command line, shell-quoted, for logs and error messages.
    fn to_shell_string(&self) -> String;
}

/// Helpers intended for [`std::process::ExitStatus`].
pub trait ExitStatusExt {
    /// If the exit status signals it was not successful, return an error.
    fn check_status(&self, command: String, stderr: Option<std::fs::File>) -> Result<()>;
}

impl ExitStatusExt for ExitStatus {
    fn check_status(&self, command: String, stderr: Option<std::fs::File>) -> Result<()> {
        if self.success() {
            return Ok(());
        }
        let stderr = stderr
            .map(last_utf8_content_from_file)
            .filter(|s| !s.trim().is_empty())
            .map(|s| format!("\n{}", s.trim_end()))
            .unwrap_or_default();
        Err(RunError::Subprocess {
            command,
            status: self.to_string(),
            stderr,
        })
    }
}

fn last_utf8_content_from_file(mut f: std::fs::File) -> String {
    // u16 since we truncate to just the trailing bytes here
    // to avoid pathological error messages
    const MAX_STDERR_BYTES: u16 = 1024;
    let size = f
        .metadata()
        .map_err(|e| {
            tracing::warn!("failed to fstat: {e}");
        })
        .map(|m| m.len().try_into().unwrap_or(u16::MAX))
        .unwrap_or(0);
    let size = size.min(MAX_STDERR_BYTES);
    let seek_offset = -i64::from(size);
    let mut stderr_buf = Vec::with_capacity(size.into());
    match f
        .seek(std::io::SeekFrom::End(seek_offset))
        .and_then(|_| f.read_to_end(&mut stderr_buf))
    {
        Ok(_) => String::from_utf8_lossy(&stderr_buf).into_owned(),
        Err(e) => {
            tracing::warn!("failed seek+read: {e}");
            "<failed to read stderr>".into()
        }
    }
}

fn spawn_error(command: String, e: std::io::Error) -> RunError {
    RunError::Subprocess {
        command,
        status: format!("failed to launch: {e}"),
        stderr: String::new(),
    }
}

impl CommandRun for Command {
    fn run(&mut self) -> Result<()> {
        let stderr = tempfile::tempfile()?;
        self.stderr(stderr.try_clone()?);
        let command = self.to_shell_string();
        tracing::debug!("exec: {command}");
        let status = self.status().map_err(|e| spawn_error(command.clone(), e))?;
        status.check_status(command, Some(stderr))
    }

    fn run_attached(&mut self) -> Result<()> {
        let command = self.to_shell_string();
        tracing::debug!("exec: {command}");
        let status = self.status().map_err(|e| spawn_error(command.clone(), e))?;
        status.check_status(command, None)
    }

    fn to_shell_string(&self) -> String {
        let words: Vec<String> = std::iter::once(self.get_program())
            .chain(self.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect();
        shlex::try_join(words.iter().map(String::as_str)).unwrap_or_else(|_| words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        Command::new("true").run().unwrap();
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = Command::new("sh")
            .args(["-c", "echo oops >&2; exit 3"])
            .run()
            .unwrap_err();
        match err {
            RunError::Subprocess {
                command, stderr, ..
            } => {
                assert!(command.starts_with("sh -c"), "{command}");
                assert_eq!(stderr, "\noops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_run_attached_missing_binary() {
        let err = Command::new("/nonexistent/lkrun-test-binary")
            .run_attached()
            .unwrap_err();
        assert!(matches!(err, RunError::Subprocess { .. }));
        assert!(err.to_string().contains("failed to launch"));
    }

    #[test]
    fn test_to_shell_string_quotes() {
        let mut cmd = Command::new("qemu-system-x86_64");
        cmd.args(["-append", "console=ttyS0 console=tty0"]);
        assert_eq!(
            cmd.to_shell_string(),
            "qemu-system-x86_64 -append 'console=ttyS0 console=tty0'"
        );
    }
}
