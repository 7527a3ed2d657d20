//! Existence checks, enumeration, and one-shot file access.
//!
//! Everything here opens, uses, and closes a file within the call. Use
//! [`Zone`] and [`Constraint`] to keep files open instead.
//!
//! [`Zone`]: super::Zone
//! [`Constraint`]: super::Constraint
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::Path,
};

use walkdir::WalkDir;

use super::{
    file::{ConstraintFile, ControlTypeFile, ZoneFile},
    path::{check_control_type, zone_dir},
    Powercap,
    Result,
};
use crate::{
    error::{text::*, PowercapError},
    extensions::FileExt,
    util::{MAX_NAME_SIZE, MAX_ZONE_DEPTH},
};

/// Like [`File::open`], but errors say which file, and what went wrong.
fn open_one(path: &Path, write: bool) -> Result<File> {
    OpenOptions::new()
        .read(!write)
        .write(write)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => PowercapError::NotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => PowercapError::PermissionDenied {
                path: path.display().to_string(),
                source: e,
            },
            _ => PowercapError::Io(e),
        })
}

fn is_dir(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

fn is_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

// Existence and enumeration
impl Powercap {
    /// Whether the control type `control_type` exists.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::InvalidArgument`] for an invalid `control_type`
    pub fn control_type_exists(&self, control_type: &str) -> Result<bool> {
        self.zone_exists(control_type, &[])
    }

    /// Whether the zone at `zones` exists, as a directory.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::InvalidArgument`] for an invalid `control_type` or
    ///   `zones`
    pub fn zone_exists(&self, control_type: &str, zones: &[u32]) -> Result<bool> {
        Ok(is_dir(&self.zone_path(control_type, zones)?))
    }

    /// Whether constraint number `constraint` exists on the zone at `zones`.
    ///
    /// A constraint exists if its [`ConstraintFile::PowerLimitUw`] file does,
    /// other files are optional.
    pub fn constraint_exists(
        &self,
        control_type: &str,
        zones: &[u32],
        constraint: u32,
    ) -> Result<bool> {
        let path = self.constraint_file_path(
            control_type,
            zones,
            constraint,
            ConstraintFile::PowerLimitUw,
        )?;
        Ok(is_file(&path))
    }

    /// Number of zones directly under the zone at `parent`.
    ///
    /// # Implementation
    ///
    /// Zones are probed with [`Powercap::zone_exists`] at index 0, 1, 2, ...
    /// until one doesn't exist.
    pub fn zone_count(&self, control_type: &str, parent: &[u32]) -> Result<u32> {
        if parent.len() >= MAX_ZONE_DEPTH {
            return Err(PowercapError::InvalidArgument(DEPTH.into()));
        }
        let mut zones = parent.to_vec();
        zones.push(0);
        let last = zones.len() - 1;
        let mut n = 0;
        loop {
            zones[last] = n;
            if !self.zone_exists(control_type, &zones)? {
                return Ok(n);
            }
            n += 1;
        }
    }

    /// Number of constraints on the zone at `zones`.
    ///
    /// Probed the same way as [`Powercap::zone_count`].
    pub fn constraint_count(&self, control_type: &str, zones: &[u32]) -> Result<u32> {
        let mut n = 0;
        while self.constraint_exists(control_type, zones, n)? {
            n += 1;
        }
        Ok(n)
    }

    /// Indices of the zones directly under `parent`, by listing its
    /// directory, sorted.
    ///
    /// Unlike [`Powercap::zone_count`] this will see zones after a gap in
    /// the numbering, so the two disagree on such a tree.
    ///
    /// Returns an empty list if `parent` doesn't exist.
    pub fn scan_zone_indices(&self, control_type: &str, parent: &[u32]) -> Result<Vec<u32>> {
        let dir = self.zone_path(control_type, parent)?;
        if !is_dir(&dir) {
            return Ok(Vec::new());
        }
        let prefix = zone_dir(control_type, parent) + ":";
        let mut v = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).follow_links(true) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let index = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
                .and_then(|i| i.parse::<u32>().ok());
            if let Some(i) = index {
                v.push(i);
            }
        }
        v.sort_unstable();
        Ok(v)
    }

    /// Names of every control type, sorted.
    ///
    /// The class tree also links every zone at the top level, like
    /// `intel-rapl:0`, those are skipped.
    pub fn control_types(&self) -> Result<Vec<String>> {
        let mut v = Vec::new();
        for entry in WalkDir::new(self.root())
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
        {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = match entry.file_name().to_str() {
                Some(name) => name,
                None => continue,
            };
            if name.contains(':') || check_control_type(name).is_err() {
                continue;
            }
            v.push(name.to_owned());
        }
        v.sort_unstable();
        Ok(v)
    }
}

// One-shot access
impl Powercap {
    /// Read control type `file` as a number.
    pub fn read_control_type_u64(&self, control_type: &str, file: ControlTypeFile) -> Result<u64> {
        let path = self.control_type_file_path(control_type, file)?;
        open_one(&path, false)?.read_u64()
    }

    /// Whether power capping is enabled for `control_type`.
    pub fn control_type_enabled(&self, control_type: &str) -> Result<bool> {
        Ok(self.read_control_type_u64(control_type, ControlTypeFile::Enabled)? != 0)
    }

    /// Enable or disable power capping for `control_type`.
    pub fn set_control_type_enabled(&self, control_type: &str, enabled: bool) -> Result<()> {
        let path = self.control_type_file_path(control_type, ControlTypeFile::Enabled)?;
        open_one(&path, true)?.write_u64(enabled.into())
    }

    /// Read zone `file` as a number.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::NotFound`] if the file doesn't exist.
    /// - [`PowercapError::EmptyOrMalformed`] if it contains no number.
    pub fn read_zone_u64(&self, control_type: &str, zones: &[u32], file: ZoneFile) -> Result<u64> {
        let path = self.zone_file_path(control_type, zones, file)?;
        open_one(&path, false)?.read_u64()
    }

    /// Write zone `file`.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::InvalidArgument`] if `file` can never be written,
    ///   only [`ZoneFile::EnergyUj`] and [`ZoneFile::Enabled`] can.
    pub fn write_zone_u64(
        &self,
        control_type: &str,
        zones: &[u32],
        file: ZoneFile,
        val: u64,
    ) -> Result<()> {
        if !file.is_mutable() {
            return Err(PowercapError::InvalidArgument(format!("{}: {}", ZONE_FILE, file)));
        }
        let path = self.zone_file_path(control_type, zones, file)?;
        open_one(&path, true)?.write_u64(val)
    }

    /// Name of the zone at `zones`.
    pub fn zone_name(&self, control_type: &str, zones: &[u32]) -> Result<String> {
        let path = self.zone_file_path(control_type, zones, ZoneFile::Name)?;
        open_one(&path, false)?.read_string(MAX_NAME_SIZE)
    }

    pub fn zone_enabled(&self, control_type: &str, zones: &[u32]) -> Result<bool> {
        Ok(self.read_zone_u64(control_type, zones, ZoneFile::Enabled)? != 0)
    }

    pub fn set_zone_enabled(&self, control_type: &str, zones: &[u32], enabled: bool) -> Result<()> {
        self.write_zone_u64(control_type, zones, ZoneFile::Enabled, enabled.into())
    }

    /// Reset the energy counter of the zone at `zones`.
    pub fn reset_zone_energy(&self, control_type: &str, zones: &[u32]) -> Result<()> {
        self.write_zone_u64(control_type, zones, ZoneFile::EnergyUj, 0)
    }

    /// Read constraint `file` as a number.
    pub fn read_constraint_u64(
        &self,
        control_type: &str,
        zones: &[u32],
        constraint: u32,
        file: ConstraintFile,
    ) -> Result<u64> {
        let path = self.constraint_file_path(control_type, zones, constraint, file)?;
        open_one(&path, false)?.read_u64()
    }

    /// Write constraint `file`.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::InvalidArgument`] if `file` can never be written,
    ///   only [`ConstraintFile::PowerLimitUw`] and
    ///   [`ConstraintFile::TimeWindowUs`] can.
    pub fn write_constraint_u64(
        &self,
        control_type: &str,
        zones: &[u32],
        constraint: u32,
        file: ConstraintFile,
        val: u64,
    ) -> Result<()> {
        if !file.is_mutable() {
            return Err(PowercapError::InvalidArgument(format!(
                "{}: {}",
                CONSTRAINT_FILE, file
            )));
        }
        let path = self.constraint_file_path(control_type, zones, constraint, file)?;
        open_one(&path, true)?.write_u64(val)
    }

    /// Name of constraint number `constraint`.
    pub fn constraint_name(
        &self,
        control_type: &str,
        zones: &[u32],
        constraint: u32,
    ) -> Result<String> {
        let path =
            self.constraint_file_path(control_type, zones, constraint, ConstraintFile::Name)?;
        open_one(&path, false)?.read_string(MAX_NAME_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::class::powercap::tests::FakeTree;
    use anyhow::Result;

    const CT: &str = "pkg0";

    #[test]
    fn exists() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.full_zone(CT, &[0], "package-0", &["long_term", "short_term"])?;
        tree.full_zone(CT, &[0, 0], "core", &["long_term"])?;
        let pc = tree.powercap();

        assert!(pc.control_type_exists(CT)?);
        assert!(!pc.control_type_exists("intel-rapl")?);
        assert!(pc.zone_exists(CT, &[0])?);
        assert!(pc.zone_exists(CT, &[0, 0])?);
        assert!(!pc.zone_exists(CT, &[1])?);
        assert!(!pc.zone_exists(CT, &[0, 1])?);
        assert!(pc.constraint_exists(CT, &[0], 1)?);
        assert!(!pc.constraint_exists(CT, &[0], 2)?);
        assert!(!pc.constraint_exists(CT, &[0, 0], 1)?);
        Ok(())
    }

    #[test]
    fn exists_wants_the_right_type() -> Result<()> {
        let tree = FakeTree::new()?;
        // A file where a zone directory should be
        tree.file(CT, &[], "pkg0:0", "")?;
        // A directory where the power limit file should be
        tree.zone(CT, &[1])?;
        std::fs::create_dir(tree.zone(CT, &[1])?.join("constraint_0_power_limit_uw"))?;
        let pc = tree.powercap();
        assert!(!pc.zone_exists(CT, &[0])?);
        assert!(pc.zone_exists(CT, &[1])?);
        assert!(!pc.constraint_exists(CT, &[1], 0)?);
        Ok(())
    }

    #[test]
    fn invalid_control_type() {
        let pc = Powercap::with_root("/nonexistent");
        for name in ["", ".", "a/b"] {
            assert!(matches!(
                pc.control_type_exists(name),
                Err(PowercapError::InvalidArgument(_))
            ));
            assert!(matches!(
                pc.zone_exists(name, &[0]),
                Err(PowercapError::InvalidArgument(_))
            ));
            assert!(matches!(
                pc.constraint_exists(name, &[0], 0),
                Err(PowercapError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn counting() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.full_zone(CT, &[0], "package-0", &["long_term", "short_term"])?;
        tree.full_zone(CT, &[1], "package-1", &["long_term"])?;
        tree.full_zone(CT, &[0, 0], "core", &[])?;
        tree.full_zone(CT, &[0, 1], "uncore", &[])?;
        tree.full_zone(CT, &[0, 2], "dram", &[])?;
        let pc = tree.powercap();

        assert_eq!(pc.zone_count(CT, &[])?, 2);
        assert_eq!(pc.zone_count(CT, &[0])?, 3);
        assert_eq!(pc.zone_count(CT, &[1])?, 0);
        assert_eq!(pc.zone_count(CT, &[7])?, 0);
        assert_eq!(pc.constraint_count(CT, &[0])?, 2);
        assert_eq!(pc.constraint_count(CT, &[1])?, 1);
        assert_eq!(pc.constraint_count(CT, &[0, 0])?, 0);
        assert_eq!(pc.zone_count("intel-rapl", &[])?, 0);
        Ok(())
    }

    #[test]
    fn constraint_count_stops_at_gap() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.full_zone(CT, &[0], "package-0", &["long_term", "short_term", "peak_power"])?;
        std::fs::remove_file(tree.zone(CT, &[0])?.join("constraint_2_power_limit_uw"))?;
        let pc = tree.powercap();
        assert!(!pc.constraint_exists(CT, &[0], 2)?);
        assert_eq!(pc.constraint_count(CT, &[0])?, 2);
        Ok(())
    }

    #[test]
    fn scan_agrees_with_probing() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.full_zone(CT, &[0], "package-0", &["long_term"])?;
        tree.full_zone(CT, &[1], "package-1", &["long_term"])?;
        tree.full_zone(CT, &[0, 0], "core", &[])?;
        tree.full_zone(CT, &[0, 1], "dram", &[])?;
        let pc = tree.powercap();

        let parents: [&[u32]; 4] = [&[], &[0], &[1], &[5]];
        for parent in parents {
            let probed: Vec<u32> = (0..pc.zone_count(CT, parent)?).collect();
            assert_eq!(pc.scan_zone_indices(CT, parent)?, probed);
        }

        // A gap in the numbering is where they disagree
        tree.full_zone(CT, &[3], "package-3", &["long_term"])?;
        assert_eq!(pc.zone_count(CT, &[])?, 2);
        assert_eq!(pc.scan_zone_indices(CT, &[])?, [0, 1, 3]);
        Ok(())
    }

    #[test]
    fn lists_control_types() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.full_zone("intel-rapl", &[0], "package-0", &["long_term"])?;
        tree.file("dtpm", &[], "enabled", "0\n")?;
        // The class tree links zones at the top, too
        std::fs::create_dir(tree.dir.path().join("intel-rapl:0"))?;
        std::fs::write(tree.dir.path().join("stray"), "")?;
        let pc = tree.powercap();
        assert_eq!(pc.control_types()?, ["dtpm", "intel-rapl"]);
        Ok(())
    }

    #[test]
    fn one_shot() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.file(CT, &[], "enabled", "1\n")?;
        tree.full_zone(CT, &[0], "package-0", &["long_term", "short_term"])?;
        let pc = tree.powercap();

        assert!(pc.control_type_enabled(CT)?);
        assert_eq!(pc.read_control_type_u64(CT, ControlTypeFile::Enabled)?, 1);
        pc.set_control_type_enabled(CT, false)?;
        assert!(!pc.control_type_enabled(CT)?);

        assert_eq!(pc.zone_name(CT, &[0])?, "package-0");
        assert_eq!(pc.read_zone_u64(CT, &[0], ZoneFile::PowerUw)?, 15000000);
        assert!(pc.zone_enabled(CT, &[0])?);
        pc.set_zone_enabled(CT, &[0], false)?;
        assert!(!pc.zone_enabled(CT, &[0])?);
        pc.reset_zone_energy(CT, &[0])?;
        assert_eq!(pc.read_zone_u64(CT, &[0], ZoneFile::EnergyUj)?, 0);

        assert_eq!(pc.constraint_name(CT, &[0], 1)?, "short_term");
        pc.write_constraint_u64(CT, &[0], 1, ConstraintFile::PowerLimitUw, 42)?;
        assert_eq!(
            pc.read_constraint_u64(CT, &[0], 1, ConstraintFile::PowerLimitUw)?,
            42
        );
        assert_eq!(
            pc.read_constraint_u64(CT, &[0], 0, ConstraintFile::PowerLimitUw)?,
            15000000
        );
        Ok(())
    }

    #[test]
    fn one_shot_errors() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.file(CT, &[0], "name", "package-0\n")?;
        tree.file(CT, &[0], "power_uw", "\n")?;
        let pc = tree.powercap();

        assert!(matches!(
            pc.read_zone_u64(CT, &[0], ZoneFile::EnergyUj),
            Err(PowercapError::NotFound(_))
        ));
        assert!(matches!(
            pc.read_zone_u64(CT, &[0], ZoneFile::PowerUw),
            Err(PowercapError::EmptyOrMalformed(_))
        ));
        assert!(matches!(
            pc.write_zone_u64(CT, &[0], ZoneFile::Name, 1),
            Err(PowercapError::InvalidArgument(_))
        ));
        assert!(matches!(
            pc.write_constraint_u64(CT, &[0], 0, ConstraintFile::MaxPowerUw, 1),
            Err(PowercapError::InvalidArgument(_))
        ));
        assert!(matches!(
            pc.constraint_name(CT, &[0], 0),
            Err(PowercapError::NotFound(_))
        ));
        Ok(())
    }
}
