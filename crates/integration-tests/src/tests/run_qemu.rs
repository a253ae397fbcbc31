//! Integration tests for `lkrun run qemu`
//!
//! Everything here goes through `--dry-run`, so no VM is started. The
//! backend depends on whether the host has QEMU installed; tests accept
//! either plan and check the parts that differ accordingly.

use color_eyre::eyre::{ensure, eyre};
use color_eyre::Result;
use serde_json::Value;
use xshell::{cmd, Shell};

use crate::{dry_run_plan, expect_rejected, get_lkrun_command, integration_test, CapturedOutput};

fn string_args(invocation: &Value) -> Result<Vec<String>> {
    let args = invocation["args"]
        .as_array()
        .ok_or_else(|| eyre!("Expected args array in {invocation}"))?;
    Ok(args
        .iter()
        .filter_map(|a| a.as_str().map(str::to_owned))
        .collect())
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn backend(plan: &Value) -> Result<&str> {
    match plan["backend"].as_str() {
        Some(b @ ("local" | "container")) => Ok(b),
        other => Err(eyre!("Unexpected backend {other:?}")),
    }
}

fn test_run_qemu_missing_prefix() -> Result<()> {
    let sh = Shell::new()?;
    let lkrun = get_lkrun_command()?;

    let output = CapturedOutput::new(cmd!(sh, "{lkrun} run qemu").ignore_status().output()?);
    ensure!(
        output.exit_code() == Some(1),
        "Expected exit code 1, got {:?}",
        output.exit_code()
    );
    ensure!(
        output
            .stdout
            .contains("Please specify the prefix to the image to boot"),
        "Missing usage message: {}",
        output.stdout
    );
    Ok(())
}
integration_test!(test_run_qemu_missing_prefix);

fn test_run_qemu_dry_run_kernel_boot() -> Result<()> {
    let sh = Shell::new()?;
    let plan = dry_run_plan(&sh, &["linuxkit"])?;

    backend(&plan)?;
    ensure!(plan["boot"] == "kernel", "Unexpected boot mode in {plan}");
    ensure!(plan.get("disk_create").is_none(), "No disk requested: {plan}");
    ensure!(plan["vm"]["console"] == "attached", "Expected attached console");

    let args = string_args(&plan["vm"])?;
    ensure!(value_after(&args, "-kernel") == Some("linuxkit-kernel"));
    ensure!(value_after(&args, "-initrd") == Some("linuxkit-initrd.img"));
    ensure!(value_after(&args, "-smp") == Some("1"));
    ensure!(value_after(&args, "-m") == Some("1024"));
    ensure!(args.iter().any(|a| a == "-nographic"));
    Ok(())
}
integration_test!(test_run_qemu_dry_run_kernel_boot);

fn test_run_qemu_dry_run_publish() -> Result<()> {
    let sh = Shell::new()?;
    let plan = dry_run_plan(&sh, &["--publish", "2222:22", "--publish", "5353:53/udp", "linuxkit"])?;

    let args = string_args(&plan["vm"])?;
    match backend(&plan)? {
        "local" => {
            ensure!(
                value_after(&args, "-net")
                    == Some("user,hostfwd=tcp::2222-:22,hostfwd=udp::5353-:53"),
                "Unexpected forwarding in {args:?}"
            );
        }
        _ => {
            // The runtime maps the host port, QEMU only sees the guest port
            ensure!(
                value_after(&args, "-net") == Some("user,hostfwd=tcp::22-:22,hostfwd=udp::53-:53"),
                "Unexpected forwarding in {args:?}"
            );
            ensure!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222:22/tcp"));
            ensure!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "5353:53/udp"));
        }
    }
    ensure!(args.iter().any(|a| a == "nic"), "Missing NIC in {args:?}");
    Ok(())
}
integration_test!(test_run_qemu_dry_run_publish);

fn test_run_qemu_dry_run_creates_disk() -> Result<()> {
    let td = tempfile::tempdir()?;
    let sh = Shell::new()?;
    sh.change_dir(td.path());

    let plan = dry_run_plan(
        &sh,
        &["--disk", "disk.qcow2", "--disk-size", "1G", "--kernel=false", "linuxkit"],
    )?;
    ensure!(plan["boot"] == "disk", "Unexpected boot mode in {plan}");

    let create = &plan["disk_create"];
    let path = create["path"]
        .as_str()
        .ok_or_else(|| eyre!("Expected a planned disk creation in {plan}"))?;
    ensure!(path.ends_with("disk.qcow2"), "Unexpected disk path {path}");

    let args = string_args(&create["invocation"])?;
    ensure!(value_after(&args, "create") == Some("-f"));
    ensure!(value_after(&args, "-f") == Some("qcow2"));
    ensure!(args.last().map(String::as_str) == Some("1G"));

    let vm_args = string_args(&plan["vm"])?;
    let drive = value_after(&vm_args, "-drive").ok_or_else(|| eyre!("Missing -drive"))?;
    ensure!(drive.ends_with("disk.qcow2,format=qcow2,index=0,media=disk"));
    if backend(&plan)? == "container" {
        // The disk sits in the working directory, which is mounted at /tmp
        ensure!(
            drive.starts_with("file=/tmp/disk.qcow2,"),
            "Disk not reachable in the container: {drive}"
        );
        ensure!(args.iter().any(|a| a == "/tmp/disk.qcow2"), "{args:?}");
    }
    ensure!(!vm_args.iter().any(|a| a == "-kernel"));

    // Nothing ran, so the disk must still be absent
    ensure!(!td.path().join("disk.qcow2").exists());
    Ok(())
}
integration_test!(test_run_qemu_dry_run_creates_disk);

fn test_run_qemu_rejects_bad_port() -> Result<()> {
    let sh = Shell::new()?;
    for spec in ["8080", "80:8080/sctp", "70000:80"] {
        let output = expect_rejected(&sh, &["--publish", spec, "linuxkit"])?;
        ensure!(output.stdout.is_empty(), "No plan expected for {spec}");
    }
    Ok(())
}
integration_test!(test_run_qemu_rejects_bad_port);

fn test_run_qemu_rejects_iso_and_uefi() -> Result<()> {
    let sh = Shell::new()?;
    expect_rejected(&sh, &["--iso", "--uefi", "linuxkit"])?;
    Ok(())
}
integration_test!(test_run_qemu_rejects_iso_and_uefi);

fn test_run_qemu_disk_size_passed_through() -> Result<()> {
    let td = tempfile::tempdir()?;
    let sh = Shell::new()?;
    sh.change_dir(td.path());

    let plan = dry_run_plan(&sh, &["--disk", "disk.qcow2", "--disk-size", "1.5G", "linuxkit"])?;
    let args = string_args(&plan["disk_create"]["invocation"])?;
    ensure!(
        args.last().map(String::as_str) == Some("1.5G"),
        "Size not passed to qemu-img: {args:?}"
    );
    Ok(())
}
integration_test!(test_run_qemu_disk_size_passed_through);

fn test_run_qemu_missing_absolute_image() -> Result<()> {
    let td = tempfile::tempdir()?;
    let sh = Shell::new()?;
    let prefix = td.path().join("linuxkit");
    let prefix = prefix
        .to_str()
        .ok_or_else(|| eyre!("Non-UTF-8 tempdir"))?;

    let output = expect_rejected(&sh, &[prefix])?;
    ensure!(
        output.stderr.contains("linuxkit-kernel"),
        "Expected the missing kernel to be named: {}",
        output.stderr
    );
    Ok(())
}
integration_test!(test_run_qemu_missing_absolute_image);
