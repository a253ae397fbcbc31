//! QEMU command line synthesis.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use super::{BootMode, RunConfig};
use crate::error::{Result, RunError};
use crate::portspec::{parse_port_specs, PortSpecError};

/// Used when `<prefix>-cmdline` cannot be read.
pub const DEFAULT_KERNEL_CMDLINE: &str = "console=ttyS0 console=tty0 page_poison=1";

pub(crate) const KVM_DEVICE: &str = "/dev/kvm";

/// Hardware acceleration available on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accel {
    Kvm,
    /// Plain emulation
    None,
}

impl Accel {
    pub fn detect() -> Self {
        if Utf8Path::new(KVM_DEVICE).exists() {
            Accel::Kvm
        } else {
            Accel::None
        }
    }
}

/// Arguments for `qemu-system-<arch>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QemuCmdline {
    pub args: Vec<String>,
    /// KVM was enabled; a containerized run must pass the device through.
    pub kvm: bool,
}

/// Build the QEMU arguments for `config`, probing the host for KVM.
///
/// `image_prefix` is the prefix as QEMU will see it. It differs from
/// `config.prefix` when QEMU runs in a container with the image directory
/// mounted elsewhere; host-side reads always use `config.prefix`.
pub(crate) fn build_qemu_cmdline(config: &RunConfig, image_prefix: &Utf8Path) -> Result<QemuCmdline> {
    build_with_accel(config, image_prefix, Accel::detect())
}

pub(crate) fn build_with_accel(
    config: &RunConfig,
    image_prefix: &Utf8Path,
    accel: Accel,
) -> Result<QemuCmdline> {
    let mut args: Vec<String> = Vec::new();
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    push(&["-device", "virtio-rng-pci"]);
    push(&["-smp", config.resources.cpus.as_str()]);
    push(&["-m", config.resources.mem.as_str()]);

    let kvm = accel == Accel::Kvm;
    if kvm {
        push(&["-enable-kvm"]);
    }
    push(&["-machine", "virt"]);

    if let Some(disk) = &config.disk {
        let drive = format!("file={},format=qcow2,index=0,media=disk", disk.path);
        push(&["-drive", drive.as_str()]);
    }

    let image = |suffix: &str| image_path(&config.prefix, image_prefix, suffix);
    match config.boot {
        BootMode::Iso => {
            let iso = image(".iso")?;
            push(&["-cdrom", iso.as_str()]);
        }
        BootMode::Uefi => {
            let iso = image("-efi.iso")?;
            push(&["-pflash", config.firmware.as_str()]);
            push(&["-cdrom", iso.as_str()]);
            push(&["-boot", "d"]);
        }
        BootMode::Kernel => {
            let kernel = image("-kernel")?;
            let initrd = image("-initrd.img")?;
            let cmdline = kernel_cmdline(&config.prefix);
            push(&["-kernel", kernel.as_str()]);
            push(&["-initrd", initrd.as_str()]);
            push(&["-append", cmdline.as_str()]);
        }
        BootMode::Disk => {
            debug!("No boot media requested; booting from disk");
        }
    }

    if !config.published_ports.is_empty() {
        let forwardings = qemu_forwardings(&config.published_ports, config.is_containerized())?;
        push(&["-net", forwardings.as_str()]);
        push(&["-net", "nic"]);
    }

    if !config.gui {
        push(&["-nographic"]);
    }

    Ok(QemuCmdline { args, kvm })
}

/// `<image_prefix><suffix>`, after checking that the host copy exists when
/// its location is absolute.
fn image_path(host_prefix: &Utf8Path, image_prefix: &Utf8Path, suffix: &str) -> Result<Utf8PathBuf> {
    let host = Utf8PathBuf::from(format!("{host_prefix}{suffix}"));
    if host.is_absolute() && !host.exists() {
        return Err(RunError::ImageFileMissing(host));
    }
    Ok(format!("{image_prefix}{suffix}").into())
}

fn kernel_cmdline(host_prefix: &Utf8Path) -> String {
    let path = format!("{host_prefix}-cmdline");
    match std::fs::read_to_string(&path) {
        Ok(s) => s.trim_end().to_owned(),
        Err(e) => {
            info!("{path}: {e}; defaulting to console output");
            DEFAULT_KERNEL_CMDLINE.to_owned()
        }
    }
}

/// The `-net user,...` value carrying one `hostfwd` rule per published port.
///
/// When containerized, the runtime already maps host to guest port at the
/// container boundary, so QEMU only listens on the guest port.
pub(crate) fn qemu_forwardings<S: AsRef<str>>(
    published: &[S],
    containerized: bool,
) -> std::result::Result<String, PortSpecError> {
    let mut forwardings = String::from("user");
    for p in parse_port_specs(published)? {
        let host_port = if containerized { p.guest_port } else { p.host_port };
        forwardings.push_str(&format!(
            ",hostfwd={}::{}-:{}",
            p.protocol, host_port, p.guest_port
        ));
    }
    Ok(forwardings)
}
