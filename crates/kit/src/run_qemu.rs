//! Boot a linuxkit image set with QEMU.
//!
//! # Image layout
//!
//! All artifacts of one VM share a path prefix:
//!
//! ```text
//! <prefix>.iso          legacy BIOS boot medium (--iso)
//! <prefix>-efi.iso      UEFI boot medium (--uefi, together with --fw)
//! <prefix>-kernel       \
//! <prefix>-initrd.img    } direct kernel boot (default)
//! <prefix>-cmdline      /  optional; a console default is used when absent
//! ```
//!
//! # Execution flow
//!
//! 1. The CLI options are folded into a [`RunConfig`], choosing a single
//!    [`BootMode`] up front.
//! 2. [`backend::discover`] looks for `qemu-system-<arch>` and `qemu-img` on
//!    `$PATH`. If either is missing the whole run moves into a container.
//! 3. [`cmdline`] synthesizes the QEMU arguments.
//! 4. [`local`] or [`container`] turns those into a [`RunPlan`]: an optional
//!    `qemu-img create` step followed by the VM invocation itself.
//! 5. The plan is executed synchronously, or printed with `--dry-run`.

use std::process::{Command, Stdio};

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use crate::command_run::CommandRun;
use crate::common_opts::ResourceOpts;
use crate::error::{Result, RunError};

pub(crate) mod backend;
pub(crate) mod cmdline;
pub(crate) mod container;
pub(crate) mod disk;
pub(crate) mod local;

pub(crate) use backend::{Backend, LocalTools};

/// OVMF firmware location on most distributions.
pub const DEFAULT_FIRMWARE: &str = "/usr/share/ovmf/bios.bin";

/// Image providing `qemu-system-*` and `qemu-img` when they are not installed.
pub const QEMU_CONTAINER_IMAGE: &str =
    "linuxkit/aarch64/qemu:47d8f0e7191e1b5bbb366fb80e9a0ee9ab2bd01d";

pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";

/// Hypervisor runners understood by `run`.
#[derive(Debug, Subcommand)]
pub enum RunCommands {
    /// Boot an image set with QEMU
    Qemu(RunQemuOpts),
}

/// Boot media selection flags.
#[derive(Parser, Debug, Clone)]
pub struct BootOpts {
    #[clap(long, help = "Set UEFI boot from 'prefix'-efi.iso")]
    pub uefi: bool,

    #[clap(long, help = "Set Legacy BIOS boot from 'prefix'.iso")]
    pub iso: bool,

    #[clap(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Set boot using 'prefix'-kernel/-initrd/-cmdline"
    )]
    pub kernel: bool,
}

/// How the guest is booted. Exactly one is chosen per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    /// `<prefix>-kernel` + `<prefix>-initrd.img` + cmdline
    Kernel,
    /// Legacy BIOS from `<prefix>.iso`
    Iso,
    /// OVMF firmware + `<prefix>-efi.iso`
    Uefi,
    /// No boot media; firmware boots whatever disk is attached
    Disk,
}

impl BootOpts {
    /// ISO and UEFI each replace the default kernel boot, and they exclude
    /// one another.
    pub fn boot_mode(&self) -> Result<BootMode> {
        match (self.iso, self.uefi, self.kernel) {
            (true, true, _) => Err(RunError::ConflictingBootModes),
            (true, false, _) => Ok(BootMode::Iso),
            (false, true, _) => Ok(BootMode::Uefi),
            (false, false, true) => Ok(BootMode::Kernel),
            (false, false, false) => Ok(BootMode::Disk),
        }
    }
}

/// Container runtime settings, used only when native QEMU is unavailable.
#[derive(Parser, Debug, Clone)]
pub struct ContainerOpts {
    #[clap(
        long = "container-runtime",
        default_value = DEFAULT_CONTAINER_RUNTIME,
        help = "Container runtime used when QEMU is not installed locally"
    )]
    pub runtime: String,

    #[clap(
        long = "container-image",
        default_value = QEMU_CONTAINER_IMAGE,
        help = "Image providing qemu-system-* and qemu-img"
    )]
    pub image: String,
}

impl Default for ContainerOpts {
    fn default() -> Self {
        Self {
            runtime: DEFAULT_CONTAINER_RUNTIME.to_owned(),
            image: QEMU_CONTAINER_IMAGE.to_owned(),
        }
    }
}

/// Options for `run qemu`
#[derive(Parser, Debug, Clone)]
pub struct RunQemuOpts {
    /// Path prefix of the VM image set
    #[clap(value_name = "PREFIX")]
    pub prefix: Option<Utf8PathBuf>,

    #[clap(long, help = "Set qemu to use video output instead of stdio")]
    pub gui: bool,

    #[clap(flatten)]
    pub boot: BootOpts,

    #[clap(long, help = "Path to disk image to use")]
    pub disk: Option<Utf8PathBuf>,

    #[clap(
        long = "disk-size",
        help = "Size of disk to create, only created if it doesn't exist"
    )]
    pub disk_size: Option<String>,

    #[clap(
        long = "fw",
        default_value = DEFAULT_FIRMWARE,
        help = "Path to OVMF firmware for UEFI boot"
    )]
    pub firmware: Utf8PathBuf,

    #[clap(flatten)]
    pub resources: ResourceOpts,

    #[clap(
        long = "publish",
        value_name = "HOST:GUEST[/PROTO]",
        help = "Publish a vm's port(s) to the host"
    )]
    pub publish: Vec<String>,

    #[clap(flatten)]
    pub container: ContainerOpts,

    #[clap(
        long,
        help = "Print the planned invocations as JSON instead of running them"
    )]
    pub dry_run: bool,
}

/// Disk attached as the first QCOW2 drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskConfig {
    pub path: Utf8PathBuf,
    /// Size passed to `qemu-img create` when the disk does not exist yet
    pub size: Option<String>,
}

/// Everything a run needs, assembled once from the command line.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub prefix: Utf8PathBuf,
    pub boot: BootMode,
    pub disk: Option<DiskConfig>,
    pub firmware: Utf8PathBuf,
    pub resources: ResourceOpts,
    pub gui: bool,
    /// Raw `host:guest[/proto]` specs, in the order given
    pub published_ports: Vec<String>,
    pub container: ContainerOpts,
    /// Starts out as [`Backend::Container`]; [`backend::discover`] switches
    /// it to [`Backend::Local`] when both native tools are found.
    pub backend: Backend,
}

impl RunConfig {
    /// A kernel-boot configuration with default settings for `prefix`.
    pub fn new(prefix: impl Into<Utf8PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            boot: BootMode::Kernel,
            disk: None,
            firmware: DEFAULT_FIRMWARE.into(),
            resources: ResourceOpts::default(),
            gui: false,
            published_ports: Vec::new(),
            container: ContainerOpts::default(),
            backend: Backend::Container,
        }
    }

    pub fn is_containerized(&self) -> bool {
        matches!(self.backend, Backend::Container)
    }
}

impl RunQemuOpts {
    /// Fold the options into a [`RunConfig`] for the given image prefix.
    pub fn into_config(self, prefix: Utf8PathBuf) -> Result<RunConfig> {
        let boot = self.boot.boot_mode()?;
        let disk = self.disk.filter(|p| !p.as_str().is_empty()).map(|path| DiskConfig {
            path,
            size: self.disk_size.filter(|s| !s.trim().is_empty()),
        });
        Ok(RunConfig {
            prefix,
            boot,
            disk,
            firmware: self.firmware,
            resources: self.resources,
            gui: self.gui,
            published_ports: self.publish,
            container: self.container,
            backend: Backend::Container,
        })
    }
}

/// Whether the child shares our terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Console {
    /// stdin/stdout/stderr inherited, so the serial console is interactive
    Attached,
    /// All streams connected to the null device; a display window is used
    Detached,
}

/// A single process to launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub console: Console,
}

impl Invocation {
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        match self.console {
            Console::Attached => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
            Console::Detached => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
            }
        }
        cmd
    }
}

/// `qemu-img create` step for a disk that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskCreation {
    pub path: Utf8PathBuf,
    pub invocation: Invocation,
}

/// The processes one run launches, in order.
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub backend: &'static str,
    pub boot: BootMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_create: Option<DiskCreation>,
    pub vm: Invocation,
}

impl RunPlan {
    /// Run the plan to completion. No retries: the first failure ends the run.
    pub fn execute(self) -> Result<()> {
        if let Some(create) = self.disk_create {
            info!("Creating new qemu disk [{}]", create.path);
            create
                .invocation
                .command()
                .run()
                .map_err(|e| RunError::DiskCreationFailed {
                    path: create.path.clone(),
                    reason: e.to_string(),
                })?;
        }

        let mut cmd = self.vm.command();
        debug!("Launching VM ({} backend, {} boot)", self.backend, self.boot);
        cmd.run_attached()
    }
}

/// Entry point for `run qemu` once the prefix is known.
pub fn run(config: RunConfig, dry_run: bool) -> color_eyre::Result<()> {
    use color_eyre::eyre::Context as _;

    debug!("Booting {} ({}) with {}", config.prefix, config.boot, config.resources);
    let config = backend::discover(config);

    if dry_run {
        let plan = match &config.backend {
            Backend::Local(tools) => local::plan_local(&config, tools)?,
            Backend::Container => container::plan_container(&config)?,
        };
        let json = serde_json::to_string_pretty(&plan)?;
        println!("{json}");
        return Ok(());
    }

    match &config.backend {
        Backend::Local(tools) => local::run_local(&config, tools)
            .with_context(|| format!("Running {}", tools.qemu))?,
        Backend::Container => container::run_container(&config)
            .with_context(|| format!("Running QEMU in {}", config.container.runtime))?,
    }
    Ok(())
}
