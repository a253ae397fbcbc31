//! QCOW2 disk handling shared by both backends.

use camino::Utf8Path;
use tracing::info;

use super::DiskConfig;
use crate::error::Result;

/// Whether the configured disk needs to be created before boot.
pub(crate) fn needs_create(disk: &DiskConfig) -> Result<bool> {
    match std::fs::metadata(&disk.path) {
        Ok(_) => {
            info!("Using existing disk [{}]", disk.path);
            Ok(false)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// Arguments for `qemu-img` creating `path` as QCOW2.
///
/// The size goes through verbatim; `qemu-img` owns its grammar and rejects
/// what it cannot parse, as it does a missing size.
pub(crate) fn qemu_img_create_args(disk: &DiskConfig, path: &Utf8Path) -> Vec<String> {
    let mut args: Vec<String> = ["create", "-f", "qcow2", path.as_str()]
        .into_iter()
        .map(String::from)
        .collect();
    if let Some(size) = &disk.size {
        args.push(size.trim().to_owned());
    }
    args
}
