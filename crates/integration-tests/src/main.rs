//! Integration tests for lkrun

use camino::Utf8Path;
use std::process::Output;

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};
use serde_json::Value;
use xshell::{cmd, Shell};

pub(crate) use integration_tests::{integration_test, INTEGRATION_TESTS};

mod tests {
    pub mod run_qemu;
}

/// Get the path to the lkrun binary, checking LKRUN_PATH env var first, then falling back to "lkrun"
pub(crate) fn get_lkrun_command() -> Result<String> {
    if let Ok(path) = std::env::var("LKRUN_PATH") {
        return Ok(path);
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = ["target/debug/lkrun", "target/release/lkrun"]
        .into_iter()
        .find(|p| Utf8Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set LKRUN_PATH={path} to run using this binary"
        ));
    }
    Ok("lkrun".to_owned())
}

/// Captured output from a command with decoded stdout/stderr strings
pub(crate) struct CapturedOutput {
    pub output: Output,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn new(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Self {
            output,
            stdout,
            stderr,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.output.status.code()
    }

    pub fn success(&self) -> bool {
        self.output.status.success()
    }
}

/// Run `lkrun run qemu --dry-run` with the given arguments in `sh`'s
/// current directory and parse the printed plan.
///
/// `sh` is used as the container runtime so that a plan can be produced on
/// hosts without QEMU or a container engine.
pub(crate) fn dry_run_plan(sh: &Shell, args: &[&str]) -> Result<Value> {
    let lkrun = get_lkrun_command()?;
    let output = cmd!(
        sh,
        "{lkrun} run qemu --dry-run --container-runtime sh {args...}"
    )
    .ignore_status()
    .output()?;
    let output = CapturedOutput::new(output);
    if !output.success() {
        return Err(eyre!(
            "lkrun run qemu --dry-run {args:?} failed: {}",
            output.stderr
        ));
    }
    serde_json::from_str(&output.stdout)
        .with_context(|| format!("Failed to parse plan: {}", output.stdout))
}

/// Run `lkrun run qemu` expecting it to fail before launching anything.
pub(crate) fn expect_rejected(sh: &Shell, args: &[&str]) -> Result<CapturedOutput> {
    let lkrun = get_lkrun_command()?;
    let output = cmd!(
        sh,
        "{lkrun} run qemu --dry-run --container-runtime sh {args...}"
    )
    .ignore_status()
    .output()?;
    let output = CapturedOutput::new(output);
    if output.success() {
        return Err(eyre!(
            "lkrun run qemu {args:?} unexpectedly succeeded: {}",
            output.stdout
        ));
    }
    Ok(output)
}

fn main() {
    // Integration tests are only supported on Linux
    if std::env::consts::OS != "linux" {
        eprintln!(
            "Integration tests are only supported on Linux (current OS: {})",
            std::env::consts::OS
        );
        eprintln!("Skipping all integration tests.");
        std::process::exit(0);
    }

    let args = Arguments::from_args();

    let tests: Vec<Trial> = INTEGRATION_TESTS
        .iter()
        .map(|test| {
            let name = test.name;
            let f = test.f;
            Trial::test(name, move || f().map_err(|e| format!("{:?}", e).into()))
        })
        .collect();

    libtest_mimic::run(&args, tests).exit();
}
