//! Error types for the `run qemu` flow.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::portspec::PortSpecError;

/// Failures that abort a VM run.
///
/// Everything here is fatal; the two recoverable conditions (missing native
/// tools, missing kernel cmdline file) are handled where they occur and never
/// produce one of these.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    PortSpec(#[from] PortSpecError),

    #[error("File [{0}] does not exist, please ensure OVMF is installed")]
    FirmwareMissing(Utf8PathBuf),

    #[error("Error creating disk [{path}]: {reason}")]
    DiskCreationFailed { path: Utf8PathBuf, reason: String },

    #[error("Unable to find {0} in the $PATH")]
    RuntimeNotFound(String),

    #[error("GUI mode is only supported when running locally, not in a container")]
    GuiUnsupported,

    #[error("Subprocess failed: {command}: {status}{stderr}")]
    Subprocess {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Both --iso and --uefi have been used; choose one boot mode")]
    ConflictingBootModes,

    #[error("File [{0}] does not exist")]
    ImageFileMissing(Utf8PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = RunError> = std::result::Result<T, E>;
