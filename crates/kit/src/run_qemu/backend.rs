//! Decide whether QEMU runs natively or inside a container.

use camino::Utf8PathBuf;
use tracing::{debug, info};

use super::RunConfig;

pub(crate) const QEMU_IMG: &str = "qemu-img";

/// Absolute paths of the native tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTools {
    pub qemu: Utf8PathBuf,
    pub qemu_img: Utf8PathBuf,
}

/// Where the hypervisor runs for this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Local(LocalTools),
    Container,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Local(_) => "local",
            Backend::Container => "container",
        }
    }
}

fn lookup(binary: &str) -> Option<Utf8PathBuf> {
    let path = which::which(binary).ok()?;
    match Utf8PathBuf::from_path_buf(path) {
        Ok(p) => Some(p),
        Err(p) => {
            debug!("Ignoring non UTF-8 path for {binary}: {}", p.display());
            None
        }
    }
}

/// Resolve the backend from what is installed on `$PATH`.
///
/// Both `qemu-system-<arch>` and `qemu-img` must be present to run locally;
/// a single missing tool moves the whole run into a container.
pub(crate) fn detect(qemu_binary: &str) -> Backend {
    let Some(qemu) = lookup(qemu_binary) else {
        info!("Unable to find {qemu_binary} within the $PATH. Using a container");
        return Backend::Container;
    };
    let Some(qemu_img) = lookup(QEMU_IMG) else {
        info!("Unable to find {QEMU_IMG} within the $PATH. Using a container");
        return Backend::Container;
    };
    debug!("Using local {qemu} and {qemu_img}");
    Backend::Local(LocalTools { qemu, qemu_img })
}

/// Record the backend decision on the configuration. Never fails: missing
/// native tools simply select the container fallback.
pub(crate) fn discover(config: RunConfig) -> RunConfig {
    let backend = detect(&config.resources.qemu_binary());
    RunConfig { backend, ..config }
}
