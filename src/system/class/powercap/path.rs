//! Where things live in the powercap tree.
//!
//! Nothing here touches the filesystem.
use std::{
    fmt::Write,
    os::unix::ffi::OsStrExt,
    path::PathBuf,
};

use super::{
    file::{ConstraintFile, ControlTypeFile, FileKind, ZoneFile},
    Powercap,
    Result,
};
use crate::{
    error::{text::*, PowercapError},
    util::{MAX_PATH, MAX_ZONE_DEPTH},
};

/// Control type names must be a single, simple, path component.
///
/// Looking outside the powercap directory is not allowed.
pub(crate) fn check_control_type(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['.', '/']) {
        return Err(PowercapError::InvalidArgument(format!(
            "{}: `{}`",
            CONTROL_TYPE, name
        )));
    }
    Ok(())
}

fn check_depth(zones: &[u32]) -> Result<()> {
    if zones.len() > MAX_ZONE_DEPTH {
        return Err(PowercapError::InvalidArgument(format!(
            "{}: {} > {}",
            DEPTH,
            zones.len(),
            MAX_ZONE_DEPTH
        )));
    }
    Ok(())
}

fn check_len(path: PathBuf) -> Result<PathBuf> {
    // Room for the terminator
    let len = path.as_os_str().as_bytes().len();
    if len >= MAX_PATH {
        return Err(PowercapError::PathTooLong(len));
    }
    Ok(path)
}

/// Directory name of the zone at `zones`, like `intel-rapl:0:1`.
///
/// Indices are always written in decimal. The kernel names zone
/// directories with hex indices, so the two only agree below index `10`. A
/// zone at index `10` or above resolves to a directory the kernel never
/// creates, like `intel-rapl:10` where the kernel has `intel-rapl:a`.
pub(crate) fn zone_dir(control_type: &str, zones: &[u32]) -> String {
    let mut name = String::from(control_type);
    for zone in zones {
        // Writing to a String can't fail
        let _ = write!(name, ":{}", zone);
    }
    name
}

// Public
impl Powercap {
    /// Directory of the zone at `zones` in `control_type`.
    ///
    /// Each level of `zones` is another directory, nested in the previous
    /// one. An empty `zones` is the control type directory itself.
    ///
    /// # Example
    ///
    /// `intel-rapl`, `[0, 1]` is
    /// `/sys/class/powercap/intel-rapl/intel-rapl:0/intel-rapl:0:1`
    ///
    /// # Errors
    ///
    /// - [`PowercapError::InvalidArgument`] if `control_type` is empty or
    ///   contains `.` or `/`, or `zones` is too deep.
    /// - [`PowercapError::PathTooLong`] if the result would exceed `PATH_MAX`
    pub fn zone_path(&self, control_type: &str, zones: &[u32]) -> Result<PathBuf> {
        check_control_type(control_type)?;
        check_depth(zones)?;
        let mut path = self.root().join(control_type);
        for depth in 1..=zones.len() {
            path.push(zone_dir(control_type, &zones[..depth]));
        }
        check_len(path)
    }

    /// Path of `file` in the zone at `zones`.
    ///
    /// # Errors
    ///
    /// Same as [`Powercap::zone_path`], and [`PowercapError::InvalidArgument`]
    /// for a [`FileKind::ControlType`] with a non-empty `zones`.
    pub fn resolve(&self, control_type: &str, zones: &[u32], file: FileKind) -> Result<PathBuf> {
        if matches!(file, FileKind::ControlType(_)) && !zones.is_empty() {
            return Err(PowercapError::InvalidArgument(format!(
                "{} is a control type file",
                file.file_name()
            )));
        }
        let mut path = self.zone_path(control_type, zones)?;
        path.push(file.file_name());
        check_len(path)
    }

    /// Path of a control type file.
    pub fn control_type_file_path(
        &self,
        control_type: &str,
        file: ControlTypeFile,
    ) -> Result<PathBuf> {
        self.resolve(control_type, &[], file.into())
    }

    /// Path of a zone file.
    pub fn zone_file_path(
        &self,
        control_type: &str,
        zones: &[u32],
        file: ZoneFile,
    ) -> Result<PathBuf> {
        self.resolve(control_type, zones, file.into())
    }

    /// Path of a file for constraint number `constraint`.
    pub fn constraint_file_path(
        &self,
        control_type: &str,
        zones: &[u32],
        constraint: u32,
        file: ConstraintFile,
    ) -> Result<PathBuf> {
        self.resolve(control_type, zones, FileKind::Constraint(constraint, file))
    }
}
