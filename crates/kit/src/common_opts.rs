//! Common CLI options shared across commands

use clap::Parser;
use std::fmt;

pub const DEFAULT_ARCH: &str = "x86_64";
pub const DEFAULT_CPUS: &str = "1";
pub const DEFAULT_MEMORY_MB: &str = "1024";

/// Guest architecture and sizing, passed through to QEMU verbatim.
#[derive(Parser, Debug, Clone)]
pub struct ResourceOpts {
    #[clap(
        long,
        default_value = DEFAULT_ARCH,
        help = "Type of architecture to use, e.g. x86_64, aarch64"
    )]
    pub arch: String,

    #[clap(long, default_value = DEFAULT_CPUS, help = "Number of CPUs")]
    pub cpus: String,

    #[clap(long, default_value = DEFAULT_MEMORY_MB, help = "Amount of memory in MB")]
    pub mem: String,
}

impl Default for ResourceOpts {
    fn default() -> Self {
        Self {
            arch: DEFAULT_ARCH.to_owned(),
            cpus: DEFAULT_CPUS.to_owned(),
            mem: DEFAULT_MEMORY_MB.to_owned(),
        }
    }
}

impl ResourceOpts {
    /// Name of the QEMU system emulator for this architecture.
    pub fn qemu_binary(&self) -> String {
        format!("qemu-system-{}", self.arch)
    }
}

impl fmt::Display for ResourceOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} vCPU, {}M)", self.arch, self.cpus, self.mem)
    }
}
