//! Run QEMU directly on the host.

use tracing::debug;

use super::cmdline::build_qemu_cmdline;
use super::{disk, BootMode, Console, DiskCreation, Invocation, LocalTools, RunConfig, RunPlan};
use crate::error::{Result, RunError};

/// Plan a local run. Checks preconditions but launches nothing.
pub(crate) fn plan_local(config: &RunConfig, tools: &LocalTools) -> Result<RunPlan> {
    let cmdline = build_qemu_cmdline(config, &config.prefix)?;

    if config.boot == BootMode::Uefi && !config.firmware.try_exists()? {
        return Err(RunError::FirmwareMissing(config.firmware.clone()));
    }

    let disk_create = match &config.disk {
        Some(d) if disk::needs_create(d)? => Some(DiskCreation {
            path: d.path.clone(),
            invocation: Invocation {
                program: tools.qemu_img.to_string(),
                args: disk::qemu_img_create_args(d, &d.path),
                console: Console::Detached,
            },
        }),
        _ => None,
    };

    // Without a display window the serial console is the only way in
    let console = if config.gui {
        Console::Detached
    } else {
        Console::Attached
    };

    let plan = RunPlan {
        backend: config.backend.name(),
        boot: config.boot,
        disk_create,
        vm: Invocation {
            program: tools.qemu.to_string(),
            args: cmdline.args,
            console,
        },
    };
    debug!("Local plan: {plan:?}");
    Ok(plan)
}

/// Boot the VM with the host's QEMU, creating the disk first if needed.
pub(crate) fn run_local(config: &RunConfig, tools: &LocalTools) -> Result<()> {
    plan_local(config, tools)?.execute()
}
