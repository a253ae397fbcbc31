//! Run QEMU inside a container when it is not installed on the host.
//!
//! The directory holding the images is mounted at [`CONTAINER_WORKDIR`] and
//! used as the container's working directory, so QEMU refers to the images
//! by their base name. Port publishing happens twice: the runtime maps
//! `host -> guest` at the container boundary (`-p`), and QEMU's user-mode
//! network forwards the guest port inside the container.
//!
//! A disk below the image directory is addressed through the same mount. A
//! disk anywhere else has its directory mounted at the identical path, so
//! `qemu-img` and QEMU agree on where it lives.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tracing::debug;

use super::backend::QEMU_IMG;
use super::cmdline::{build_with_accel, Accel, KVM_DEVICE};
use super::{disk, Console, DiskConfig, DiskCreation, Invocation, RunConfig, RunPlan};
use crate::error::{Result, RunError};
use crate::portspec::parse_port_specs;

/// Where the image directory is mounted inside the container.
pub const CONTAINER_WORKDIR: &str = "/tmp";

/// Host directory to mount and the image prefix relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Layout {
    pub workdir: Utf8PathBuf,
    pub prefix: Utf8PathBuf,
}

fn current_dir() -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir()?;
    Utf8PathBuf::try_from(cwd).map_err(|e| RunError::Io(e.into_io_error()))
}

/// Split an absolute prefix into its directory and base name; a relative
/// prefix stays as is and the caller's working directory is mounted.
pub(crate) fn layout(prefix: &Utf8Path) -> Result<Layout> {
    if !prefix.is_absolute() {
        return Ok(Layout {
            workdir: current_dir()?,
            prefix: prefix.to_owned(),
        });
    }
    match (prefix.parent(), prefix.file_name()) {
        (Some(dir), Some(name)) => Ok(Layout {
            workdir: dir.to_owned(),
            prefix: name.into(),
        }),
        _ => Err(RunError::ImageFileMissing(prefix.to_owned())),
    }
}

/// A disk as the host sees it and as QEMU sees it inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DiskPaths {
    pub host: Utf8PathBuf,
    pub guest: Utf8PathBuf,
    /// Host directory to bind-mount at the same path, when the disk is not
    /// below the working directory
    pub mount: Option<Utf8PathBuf>,
}

/// Map `disk` into the container. A disk below the working directory is
/// reached through [`CONTAINER_WORKDIR`]; any other disk gets its directory
/// mounted at the same absolute path.
pub(crate) fn disk_paths(disk: &Utf8Path, layout: &Layout) -> Result<DiskPaths> {
    let host = if disk.is_absolute() {
        disk.to_owned()
    } else {
        current_dir()?.join(disk)
    };
    if let Ok(rel) = host.strip_prefix(&layout.workdir) {
        if rel.components().all(|c| matches!(c, Utf8Component::Normal(_))) {
            let guest = Utf8Path::new(CONTAINER_WORKDIR).join(rel);
            return Ok(DiskPaths {
                host,
                guest,
                mount: None,
            });
        }
    }
    Ok(DiskPaths {
        guest: host.clone(),
        mount: host.parent().map(Utf8Path::to_owned),
        host,
    })
}

fn volume(host: &Utf8Path, guest: &str) -> [String; 2] {
    ["-v".to_owned(), format!("{host}:{guest}")]
}

/// Plan a containerized run. Checks preconditions but launches nothing.
pub(crate) fn plan_container(config: &RunConfig) -> Result<RunPlan> {
    plan_with_accel(config, Accel::detect())
}

pub(crate) fn plan_with_accel(config: &RunConfig, accel: Accel) -> Result<RunPlan> {
    if config.gui {
        return Err(RunError::GuiUnsupported);
    }

    let layout = layout(&config.prefix)?;
    debug!("Mounting {} with prefix {}", layout.workdir, layout.prefix);

    let mapped = config
        .disk
        .as_ref()
        .map(|d| disk_paths(&d.path, &layout))
        .transpose()?;

    let mut guest_config = config.clone();
    if let (Some(d), Some(paths)) = (guest_config.disk.as_mut(), &mapped) {
        d.path = paths.guest.clone();
    }
    let cmdline = build_with_accel(&guest_config, &layout.prefix, accel)?;

    let mut base_args: Vec<String> = ["run", "-i", "--rm"].map(String::from).into();
    base_args.extend(volume(&layout.workdir, CONTAINER_WORKDIR));
    base_args.extend(["-w".to_owned(), CONTAINER_WORKDIR.to_owned()]);
    if let Some(dir) = mapped.as_ref().and_then(|d| d.mount.as_ref()) {
        base_args.extend(volume(dir, dir.as_str()));
    }

    let mut vm_args = base_args.clone();
    if cmdline.kvm {
        vm_args.extend(["--device".to_owned(), KVM_DEVICE.to_owned()]);
    }
    for mapping in parse_port_specs(&config.published_ports)? {
        vm_args.extend(["-p".to_owned(), mapping.to_string()]);
    }

    let runtime = which::which(&config.container.runtime)
        .map_err(|_| RunError::RuntimeNotFound(config.container.runtime.clone()))?;
    let runtime = runtime.to_string_lossy().into_owned();
    let image = &config.container.image;

    let disk_create = match (&config.disk, &mapped) {
        (Some(d), Some(paths)) => {
            let host = DiskConfig {
                path: paths.host.clone(),
                size: d.size.clone(),
            };
            if disk::needs_create(&host)? {
                let mut args = base_args;
                args.extend([image.clone(), QEMU_IMG.to_owned()]);
                args.extend(disk::qemu_img_create_args(&host, &paths.guest));
                Some(DiskCreation {
                    path: paths.host.clone(),
                    invocation: Invocation {
                        program: runtime.clone(),
                        args,
                        console: Console::Detached,
                    },
                })
            } else {
                None
            }
        }
        _ => None,
    };

    vm_args.extend([image.clone(), config.resources.qemu_binary()]);
    vm_args.extend(cmdline.args);

    Ok(RunPlan {
        backend: config.backend.name(),
        boot: config.boot,
        disk_create,
        vm: Invocation {
            program: runtime,
            args: vm_args,
            console: Console::Attached,
        },
    })
}

/// Boot the VM through the container runtime.
pub(crate) fn run_container(config: &RunConfig) -> Result<()> {
    plan_container(config)?.execute()
}
