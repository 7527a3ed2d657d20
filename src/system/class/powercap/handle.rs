//! Long-lived handles to zone and constraint files.
//!
//! Opening a handle opens every file it knows about once, and all later
//! reads and writes reuse those descriptors.
use std::{
    fs::{File, OpenOptions},
    io,
    mem,
    os::unix::io::IntoRawFd,
    path::{Path, PathBuf},
};

use nix::unistd::close;

use super::{
    file::{ConstraintFile, ControlTypeFile, FileKind, ZoneFile},
    Powercap,
    Result,
};
use crate::{
    error::{text::READ_ONLY, PowercapError},
    extensions::FileExt,
    util::MAX_NAME_SIZE,
};

/// How an open [`Descriptor`] was opened
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Opened for reading and writing.
    ReadWrite,

    /// Opened read-only, as requested or because the file is never writable.
    ReadOnly,

    /// Writing was requested but denied, so it was reopened read-only.
    ///
    /// Only happens for [`ZoneFile::EnergyUj`], which is writable to reset the
    /// counter on some control types and not others.
    ReadOnlyFallback,
}

/// An open file in the powercap tree
#[derive(Debug)]
pub struct OpenFile {
    file: File,
    path: PathBuf,
    mode: Mode,
}

/// One file slot of a handle.
#[derive(Debug)]
pub enum Descriptor {
    /// The file does not exist. This is permanent, and not an error.
    Absent,

    /// The file is open.
    Open(OpenFile),
}

impl Descriptor {
    /// Whether the file exists.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// How the file was opened, if it exists.
    pub fn mode(&self) -> Option<Mode> {
        match self {
            Self::Absent => None,
            Self::Open(f) => Some(f.mode),
        }
    }

    /// Path of the file, if it exists.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Absent => None,
            Self::Open(f) => Some(&f.path),
        }
    }

    fn file(&self) -> Result<&OpenFile> {
        match self {
            Self::Absent => Err(PowercapError::Unsupported),
            Self::Open(f) => Ok(f),
        }
    }

    pub(crate) fn read_u64(&self) -> Result<u64> {
        self.file()?.file.read_u64()
    }

    pub(crate) fn read_string(&self, size: usize) -> Result<String> {
        self.file()?.file.read_string(size)
    }

    pub(crate) fn write_u64(&self, val: u64) -> Result<()> {
        let f = self.file()?;
        if f.mode != Mode::ReadWrite {
            return Err(PowercapError::PermissionDenied {
                path: f.path.display().to_string(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, READ_ONLY),
            });
        }
        f.file.write_u64(val)
    }

    /// Close the file, leaving the slot [`Descriptor::Absent`].
    ///
    /// Closing an absent slot does nothing.
    pub(crate) fn close(&mut self) -> Result<()> {
        match mem::replace(self, Self::Absent) {
            Self::Absent => Ok(()),
            Self::Open(f) => Ok(close(f.file.into_raw_fd()).map_err(io::Error::from)?),
        }
    }
}

/// Close every descriptor, returning the first failure.
fn close_all<'a>(fds: impl IntoIterator<Item = &'a mut Descriptor>) -> Result<()> {
    let mut ret = Ok(());
    for fd in fds {
        if let Err(e) = fd.close() {
            if ret.is_ok() {
                ret = Err(e);
            }
        }
    }
    ret
}

fn open_mode(path: &Path, write: bool) -> io::Result<File> {
    OpenOptions::new().read(true).write(write).open(path)
}

// Private
impl Powercap {
    /// Open `kind`, treating a missing file as [`Descriptor::Absent`].
    ///
    /// `write` is whether read-write access is wanted. If that is denied for
    /// [`ZoneFile::EnergyUj`], it is retried read-only.
    fn open_descriptor(
        &self,
        control_type: &str,
        zones: &[u32],
        kind: FileKind,
        write: bool,
    ) -> Result<Descriptor> {
        let path = self.resolve(control_type, zones, kind)?;
        let log = self.logger();
        let (file, mode) = match open_mode(&path, write) {
            Ok(file) => (file, if write { Mode::ReadWrite } else { Mode::ReadOnly }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log.debug(format_args!("open: {}: {}", path.display(), e));
                return Ok(Descriptor::Absent);
            }
            Err(e)
                if e.kind() == io::ErrorKind::PermissionDenied
                    && write
                    && kind == FileKind::Zone(ZoneFile::EnergyUj) =>
            {
                match open_mode(&path, false) {
                    Ok(file) => (file, Mode::ReadOnlyFallback),
                    Err(e) => {
                        log.error(format_args!("open (RO): {}: {}", path.display(), e));
                        return Err(open_error(&path, e));
                    }
                }
            }
            Err(e) => {
                log.error(format_args!("open: {}: {}", path.display(), e));
                return Err(open_error(&path, e));
            }
        };
        Ok(Descriptor::Open(OpenFile { file, path, mode }))
    }
}

fn open_error(path: &Path, e: io::Error) -> PowercapError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => PowercapError::PermissionDenied {
            path: path.display().to_string(),
            source: e,
        },
        _ => PowercapError::Io(e),
    }
}

/// A control type, like `intel-rapl`
#[derive(Debug)]
pub struct ControlType {
    name: String,
    enabled: Descriptor,
}

impl ControlType {
    /// Open the control type `name`.
    ///
    /// `read_only` avoids needing write access, and thus elevated
    /// privileges.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::InvalidArgument`] for an invalid `name`
    /// - If opening an existing file fails
    pub fn open(pc: &Powercap, name: &str, read_only: bool) -> Result<Self> {
        let enabled = pc.open_descriptor(name, &[], ControlTypeFile::Enabled.into(), !read_only)?;
        Ok(Self {
            name: name.to_owned(),
            enabled,
        })
    }

    /// Name of the control type
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor for `file`
    pub fn descriptor(&self, file: ControlTypeFile) -> &Descriptor {
        match file {
            ControlTypeFile::Enabled => &self.enabled,
        }
    }

    /// Whether power capping is enabled for the control type.
    pub fn enabled(&self) -> Result<bool> {
        Ok(self.enabled.read_u64()? != 0)
    }

    /// Enable or disable power capping for the control type.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.enabled.write_u64(enabled.into())
    }

    /// Close all files.
    ///
    /// Closing more than once does nothing.
    pub fn close(&mut self) -> Result<()> {
        self.enabled.close()
    }
}

/// A power zone
///
/// See [`ZoneFile`] for the files a zone can have.
#[derive(Debug)]
pub struct Zone {
    zones: Vec<u32>,
    max_energy_range_uj: Descriptor,
    energy_uj: Descriptor,
    max_power_range_uw: Descriptor,
    power_uw: Descriptor,
    enabled: Descriptor,
    name: Descriptor,
}

// Public
impl Zone {
    /// Open the zone at `zones` in `control_type`.
    ///
    /// Files that don't exist are [`Descriptor::Absent`].
    ///
    /// Unless `read_only`, [`ZoneFile::Enabled`] and [`ZoneFile::EnergyUj`]
    /// are opened for writing, which generally requires elevated privileges.
    /// If writing [`ZoneFile::EnergyUj`] is denied, it is opened read-only
    /// instead.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::InvalidArgument`] for an invalid `control_type` or
    ///   `zones`
    /// - [`PowercapError::PermissionDenied`] if any file can't be opened with
    ///   the required access
    /// - [`PowercapError::Io`] if opening any existing file otherwise fails
    ///
    /// Nothing is left open on failure.
    pub fn open(pc: &Powercap, control_type: &str, zones: &[u32], read_only: bool) -> Result<Self> {
        let open = |f: ZoneFile| {
            pc.open_descriptor(control_type, zones, f.into(), !read_only && f.is_mutable())
        };
        Ok(Self {
            zones: zones.to_vec(),
            max_energy_range_uj: open(ZoneFile::MaxEnergyRangeUj)?,
            energy_uj: open(ZoneFile::EnergyUj)?,
            max_power_range_uw: open(ZoneFile::MaxPowerRangeUw)?,
            power_uw: open(ZoneFile::PowerUw)?,
            enabled: open(ZoneFile::Enabled)?,
            name: open(ZoneFile::Name)?,
        })
    }

    /// Zone path this was opened from.
    pub fn zones(&self) -> &[u32] {
        &self.zones
    }

    /// Descriptor for `file`
    pub fn descriptor(&self, file: ZoneFile) -> &Descriptor {
        match file {
            ZoneFile::MaxEnergyRangeUj => &self.max_energy_range_uj,
            ZoneFile::EnergyUj => &self.energy_uj,
            ZoneFile::MaxPowerRangeUw => &self.max_power_range_uw,
            ZoneFile::PowerUw => &self.power_uw,
            ZoneFile::Enabled => &self.enabled,
            ZoneFile::Name => &self.name,
        }
    }

    /// Whether this zone has `file`.
    pub fn is_supported(&self, file: ZoneFile) -> bool {
        self.descriptor(file).is_supported()
    }

    /// Read `file` as a number.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::Unsupported`] if the zone doesn't have `file`.
    pub fn read(&self, file: ZoneFile) -> Result<u64> {
        self.descriptor(file).read_u64()
    }

    pub fn max_energy_range_uj(&self) -> Result<u64> {
        self.max_energy_range_uj.read_u64()
    }

    pub fn energy_uj(&self) -> Result<u64> {
        self.energy_uj.read_u64()
    }

    /// Reset the energy counter to zero.
    ///
    /// Not all control types support this.
    pub fn reset_energy_uj(&self) -> Result<()> {
        self.energy_uj.write_u64(0)
    }

    pub fn max_power_range_uw(&self) -> Result<u64> {
        self.max_power_range_uw.read_u64()
    }

    pub fn power_uw(&self) -> Result<u64> {
        self.power_uw.read_u64()
    }

    pub fn enabled(&self) -> Result<bool> {
        Ok(self.enabled.read_u64()? != 0)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.enabled.write_u64(enabled.into())
    }

    /// Name of the zone, like `package-0` or `dram`.
    pub fn name(&self) -> Result<String> {
        self.name.read_string(MAX_NAME_SIZE)
    }

    /// Close all files.
    ///
    /// Every file is closed even if some fail, the first failure is
    /// returned. Closing more than once does nothing.
    pub fn close(&mut self) -> Result<()> {
        close_all([
            &mut self.max_energy_range_uj,
            &mut self.energy_uj,
            &mut self.max_power_range_uw,
            &mut self.power_uw,
            &mut self.enabled,
            &mut self.name,
        ])
    }
}

/// A constraint on a power zone
///
/// See [`ConstraintFile`] for the files a constraint can have.
#[derive(Debug)]
pub struct Constraint {
    index: u32,
    power_limit_uw: Descriptor,
    time_window_us: Descriptor,
    max_power_uw: Descriptor,
    min_power_uw: Descriptor,
    max_time_window_us: Descriptor,
    min_time_window_us: Descriptor,
    name: Descriptor,
}

// Public
impl Constraint {
    /// Open constraint number `constraint` of the zone at `zones`.
    ///
    /// Files that don't exist are [`Descriptor::Absent`].
    ///
    /// Unless `read_only`, [`ConstraintFile::PowerLimitUw`] and
    /// [`ConstraintFile::TimeWindowUs`] are opened for writing.
    ///
    /// # Errors
    ///
    /// Same as [`Zone::open`]. There is no read-only fallback.
    ///
    /// Nothing is left open on failure.
    pub fn open(
        pc: &Powercap,
        control_type: &str,
        zones: &[u32],
        constraint: u32,
        read_only: bool,
    ) -> Result<Self> {
        let open = |f: ConstraintFile| {
            pc.open_descriptor(
                control_type,
                zones,
                FileKind::Constraint(constraint, f),
                !read_only && f.is_mutable(),
            )
        };
        Ok(Self {
            index: constraint,
            power_limit_uw: open(ConstraintFile::PowerLimitUw)?,
            time_window_us: open(ConstraintFile::TimeWindowUs)?,
            max_power_uw: open(ConstraintFile::MaxPowerUw)?,
            min_power_uw: open(ConstraintFile::MinPowerUw)?,
            max_time_window_us: open(ConstraintFile::MaxTimeWindowUs)?,
            min_time_window_us: open(ConstraintFile::MinTimeWindowUs)?,
            name: open(ConstraintFile::Name)?,
        })
    }

    /// On-disk constraint number.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Descriptor for `file`
    pub fn descriptor(&self, file: ConstraintFile) -> &Descriptor {
        match file {
            ConstraintFile::PowerLimitUw => &self.power_limit_uw,
            ConstraintFile::TimeWindowUs => &self.time_window_us,
            ConstraintFile::MaxPowerUw => &self.max_power_uw,
            ConstraintFile::MinPowerUw => &self.min_power_uw,
            ConstraintFile::MaxTimeWindowUs => &self.max_time_window_us,
            ConstraintFile::MinTimeWindowUs => &self.min_time_window_us,
            ConstraintFile::Name => &self.name,
        }
    }

    /// Whether this constraint has `file`.
    pub fn is_supported(&self, file: ConstraintFile) -> bool {
        self.descriptor(file).is_supported()
    }

    /// Read `file` as a number.
    pub fn read(&self, file: ConstraintFile) -> Result<u64> {
        self.descriptor(file).read_u64()
    }

    pub fn power_limit_uw(&self) -> Result<u64> {
        self.power_limit_uw.read_u64()
    }

    /// Set the power limit.
    ///
    /// The kernel may silently clamp or ignore the value, read it back to
    /// be sure.
    pub fn set_power_limit_uw(&self, val: u64) -> Result<()> {
        self.power_limit_uw.write_u64(val)
    }

    pub fn time_window_us(&self) -> Result<u64> {
        self.time_window_us.read_u64()
    }

    pub fn set_time_window_us(&self, val: u64) -> Result<()> {
        self.time_window_us.write_u64(val)
    }

    pub fn max_power_uw(&self) -> Result<u64> {
        self.max_power_uw.read_u64()
    }

    pub fn min_power_uw(&self) -> Result<u64> {
        self.min_power_uw.read_u64()
    }

    pub fn max_time_window_us(&self) -> Result<u64> {
        self.max_time_window_us.read_u64()
    }

    pub fn min_time_window_us(&self) -> Result<u64> {
        self.min_time_window_us.read_u64()
    }

    /// Name of the constraint, like `long_term`.
    pub fn name(&self) -> Result<String> {
        self.name.read_string(MAX_NAME_SIZE)
    }

    /// Close all files.
    ///
    /// Every file is closed even if some fail, the first failure is
    /// returned. Closing more than once does nothing.
    pub fn close(&mut self) -> Result<()> {
        close_all([
            &mut self.power_limit_uw,
            &mut self.time_window_us,
            &mut self.max_power_uw,
            &mut self.min_power_uw,
            &mut self.max_time_window_us,
            &mut self.min_time_window_us,
            &mut self.name,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::class::powercap::tests::FakeTree;
    use anyhow::Result;
    use std::{fs, os::unix::fs::PermissionsExt};

    const CT: &str = "pkg0";

    fn is_root() -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[test]
    fn control_type_enabled() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.file(CT, &[], "enabled", "1\n")?;
        let pc = tree.powercap();
        let mut ct = ControlType::open(&pc, CT, false)?;
        assert_eq!(ct.name(), CT);
        assert!(ct.enabled()?);
        ct.set_enabled(false)?;
        assert!(!ct.enabled()?);
        ct.close()?;
        ct.close()?;
        Ok(())
    }

    #[test]
    fn zone_all_files() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.full_zone(CT, &[0], "package-0", &["long_term"])?;
        let pc = tree.powercap();
        let zone = Zone::open(&pc, CT, &[0], false)?;
        assert_eq!(zone.zones(), [0]);
        for f in ZoneFile::ALL {
            assert!(zone.is_supported(f), "{}", f);
        }
        assert_eq!(zone.max_energy_range_uj()?, 262143328850);
        assert_eq!(zone.energy_uj()?, 1234);
        assert_eq!(zone.max_power_range_uw()?, 300000000);
        assert_eq!(zone.power_uw()?, 15000000);
        assert_eq!(zone.read(ZoneFile::PowerUw)?, 15000000);
        assert!(zone.enabled()?);
        assert_eq!(zone.name()?, "package-0");
        assert_eq!(zone.descriptor(ZoneFile::Enabled).mode(), Some(Mode::ReadWrite));
        assert_eq!(zone.descriptor(ZoneFile::PowerUw).mode(), Some(Mode::ReadOnly));
        assert_eq!(
            zone.descriptor(ZoneFile::Name).path(),
            Some(tree.zone(CT, &[0])?.join("name").as_path())
        );

        zone.reset_energy_uj()?;
        assert_eq!(zone.energy_uj()?, 0);
        zone.set_enabled(false)?;
        assert!(!zone.enabled()?);
        Ok(())
    }

    #[test]
    fn absent_is_not_error() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.file(CT, &[0], "energy_uj", "5\n")?;
        tree.file(CT, &[0], "name", "package-0\n")?;
        let pc = tree.powercap();
        let zone = Zone::open(&pc, CT, &[0], false)?;
        assert!(!zone.is_supported(ZoneFile::MaxPowerRangeUw));
        assert!(zone.descriptor(ZoneFile::MaxPowerRangeUw).mode().is_none());
        assert!(matches!(
            zone.max_power_range_uw(),
            Err(PowercapError::Unsupported)
        ));
        assert!(matches!(
            zone.set_enabled(true),
            Err(PowercapError::Unsupported)
        ));
        assert_eq!(zone.energy_uj()?, 5);

        // An entire constraint can be absent
        let c = Constraint::open(&pc, CT, &[0], 3, false)?;
        for f in ConstraintFile::ALL {
            assert!(!c.is_supported(f));
        }
        assert!(matches!(c.power_limit_uw(), Err(PowercapError::Unsupported)));
        Ok(())
    }

    #[test]
    fn read_only() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.full_zone(CT, &[0], "package-0", &["long_term"])?;
        let pc = tree.powercap();
        let zone = Zone::open(&pc, CT, &[0], true)?;
        assert_eq!(zone.descriptor(ZoneFile::Enabled).mode(), Some(Mode::ReadOnly));
        assert!(matches!(
            zone.set_enabled(false),
            Err(PowercapError::PermissionDenied { .. })
        ));
        assert!(zone.enabled()?);

        let c = Constraint::open(&pc, CT, &[0], 0, true)?;
        assert!(matches!(
            c.set_power_limit_uw(1),
            Err(PowercapError::PermissionDenied { .. })
        ));
        Ok(())
    }

    #[test]
    fn energy_read_only_fallback() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.full_zone(CT, &[0], "package-0", &["long_term"])?;
        let energy = tree.zone(CT, &[0])?.join("energy_uj");
        fs::set_permissions(&energy, fs::Permissions::from_mode(0o444))?;
        let pc = tree.powercap();
        let zone = Zone::open(&pc, CT, &[0], false)?;
        assert_eq!(zone.energy_uj()?, 1234);
        if !is_root() {
            assert_eq!(
                zone.descriptor(ZoneFile::EnergyUj).mode(),
                Some(Mode::ReadOnlyFallback)
            );
            assert!(matches!(
                zone.reset_energy_uj(),
                Err(PowercapError::PermissionDenied { .. })
            ));
        }
        Ok(())
    }

    #[test]
    fn permission_denied_is_fatal() -> Result<()> {
        if is_root() {
            return Ok(());
        }
        let tree = FakeTree::new()?;
        tree.full_zone(CT, &[0], "package-0", &["long_term"])?;
        let enabled = tree.zone(CT, &[0])?.join("enabled");
        fs::set_permissions(&enabled, fs::Permissions::from_mode(0o444))?;
        let pc = tree.powercap();
        assert!(matches!(
            Zone::open(&pc, CT, &[0], false),
            Err(PowercapError::PermissionDenied { .. })
        ));
        // Fine when not writing
        assert!(Zone::open(&pc, CT, &[0], true).is_ok());
        Ok(())
    }

    #[test]
    fn open_failure_aborts() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.full_zone(CT, &[0], "package-0", &["long_term"])?;
        // A directory can't be opened for writing, even by root.
        let limit = tree.zone(CT, &[0])?.join("constraint_0_time_window_us");
        fs::remove_file(&limit)?;
        fs::create_dir(&limit)?;
        let pc = tree.powercap();
        assert!(matches!(
            Constraint::open(&pc, CT, &[0], 0, false),
            Err(PowercapError::Io(_))
        ));
        assert_eq!(tree.open_fds()?, 0);

        let enabled = tree.zone(CT, &[0])?.join("enabled");
        fs::remove_file(&enabled)?;
        fs::create_dir(&enabled)?;
        assert!(matches!(
            Zone::open(&pc, CT, &[0], false),
            Err(PowercapError::Io(_))
        ));
        assert_eq!(tree.open_fds()?, 0);
        Ok(())
    }

    #[test]
    fn constraint_round_trip() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.full_zone(CT, &[0], "package-0", &["long_term", "short_term"])?;
        let pc = tree.powercap();
        let c = Constraint::open(&pc, CT, &[0], 1, false)?;
        assert_eq!(c.index(), 1);
        assert_eq!(c.name()?, "short_term");
        assert_eq!(c.max_time_window_us()?, 16);
        assert_eq!(c.min_time_window_us()?, 976);
        assert_eq!(c.max_power_uw()?, 15000000);
        assert_eq!(c.min_power_uw()?, 0);
        assert_eq!(c.read(ConstraintFile::TimeWindowUs)?, 27983872);

        c.set_power_limit_uw(25000000)?;
        assert_eq!(c.power_limit_uw()?, 25000000);
        c.set_power_limit_uw(5)?;
        assert_eq!(c.power_limit_uw()?, 5);
        c.set_time_window_us(976)?;
        assert_eq!(c.time_window_us()?, 976);
        Ok(())
    }

    #[test]
    fn idempotent_close() -> Result<()> {
        let tree = FakeTree::new()?;
        tree.full_zone(CT, &[0], "package-0", &["long_term"])?;
        let pc = tree.powercap();
        let mut zone = Zone::open(&pc, CT, &[0], false)?;
        let mut c = Constraint::open(&pc, CT, &[0], 0, false)?;
        assert_eq!(tree.open_fds()?, 6 + 7);
        zone.close()?;
        assert_eq!(tree.open_fds()?, 7);
        zone.close()?;
        assert_eq!(tree.open_fds()?, 7);
        c.close()?;
        assert_eq!(tree.open_fds()?, 0);
        c.close()?;
        assert_eq!(tree.open_fds()?, 0);
        assert!(!zone.is_supported(ZoneFile::Name));
        assert!(matches!(zone.energy_uj(), Err(PowercapError::Unsupported)));
        Ok(())
    }

    #[test]
    fn invalid_control_type() -> Result<()> {
        let tree = FakeTree::new()?;
        let pc = tree.powercap();
        for name in ["", ".", "a/b"] {
            assert!(matches!(
                Zone::open(&pc, name, &[0], true),
                Err(PowercapError::InvalidArgument(_))
            ));
            assert!(matches!(
                ControlType::open(&pc, name, true),
                Err(PowercapError::InvalidArgument(_))
            ));
        }
        Ok(())
    }
}
