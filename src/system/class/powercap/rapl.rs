//! Intel RAPL, the Running Average Power Limit control type.
//!
//! Each CPU package is a top-level zone, with subordinate zones for the
//! cores, uncore (usually an integrated GPU), and DRAM. Some platforms also
//! have a `psys` zone for the whole SoC.
//!
//! Every RAPL zone has a long term constraint, and optionally a short term
//! one.
//!
//! See the [kernel docs][1] for details.
//!
//! [1]: https://www.kernel.org/doc/html/latest/power/powercap/powercap.html
use std::mem;

use bitflags::bitflags;

use super::{
    file::{closed_enum, ConstraintFile, ZoneFile},
    handle::{Constraint, Zone},
    path::zone_dir,
    Powercap,
    Result,
};
use crate::error::{
    text::{CONSTRAINT_KIND, ZONE_KIND},
    PowercapError,
};

/// Control type name
pub const CONTROL_TYPE: &str = "intel-rapl";

/// Kinds of RAPL zone
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    /// A whole CPU package, `package-N`.
    Package,

    /// The CPU cores.
    Core,

    /// Everything in the package that isn't a core.
    Uncore,

    /// Memory attached to the package.
    Dram,

    /// The whole platform.
    Psys,
}

impl ZoneKind {
    pub const ALL: [Self; 5] = [Self::Package, Self::Core, Self::Uncore, Self::Dram, Self::Psys];

    /// Zone name, or for [`ZoneKind::Package`] its prefix.
    pub fn name(self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Core => "core",
            Self::Uncore => "uncore",
            Self::Dram => "dram",
            Self::Psys => "psys",
        }
    }

    /// Kind of a zone from its `name` file, if it's one we know.
    pub fn classify(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| name.starts_with(k.name()))
    }

    fn flag(self) -> Zones {
        match self {
            Self::Package => Zones::PACKAGE,
            Self::Core => Zones::CORE,
            Self::Uncore => Zones::UNCORE,
            Self::Dram => Zones::DRAM,
            Self::Psys => Zones::PSYS,
        }
    }
}

/// Kinds of RAPL constraint
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// `long_term`, constraint `0`.
    LongTerm,

    /// `short_term`, constraint `1`.
    ShortTerm,
}

impl ConstraintKind {
    pub const ALL: [Self; 2] = [Self::LongTerm, Self::ShortTerm];

    /// Expected constraint name.
    pub fn name(self) -> &'static str {
        match self {
            Self::LongTerm => "long_term",
            Self::ShortTerm => "short_term",
        }
    }

    /// Constraint number this is normally found at.
    pub fn index(self) -> u32 {
        match self {
            Self::LongTerm => 0,
            Self::ShortTerm => 1,
        }
    }
}

closed_enum!(ZoneKind, name, ZONE_KIND);
closed_enum!(ConstraintKind, name, CONSTRAINT_KIND);

bitflags! {
    /// Set of [`ZoneKind`]s present in a [`Package`].
    pub struct Zones: u8 {
        const PACKAGE = 1 << 0;
        const CORE = 1 << 1;
        const UNCORE = 1 << 2;
        const DRAM = 1 << 3;
        const PSYS = 1 << 4;
    }
}

/// A RAPL zone, with its long and short term constraints.
#[derive(Debug)]
pub struct ZoneFiles {
    zone: Zone,
    long_term: Constraint,
    short_term: Constraint,
}

/// A constraint is wrong only if it has a name, and it isn't `expected`.
fn is_wrong_constraint(c: &Constraint, expected: ConstraintKind) -> bool {
    match c.name() {
        Ok(name) => name != expected.name(),
        Err(_) => false,
    }
}

impl ZoneFiles {
    /// Open the RAPL zone at `zones`.
    ///
    /// # Implementation
    ///
    /// If both constraints have the other's name, they are swapped so
    /// [`ConstraintKind::LongTerm`] really is the long term constraint.
    fn open(pc: &Powercap, zones: &[u32], read_only: bool) -> Result<Self> {
        let zone = Zone::open(pc, CONTROL_TYPE, zones, read_only)?;
        let open = |kind: ConstraintKind| {
            Constraint::open(pc, CONTROL_TYPE, zones, kind.index(), read_only)
        };
        let mut long_term = open(ConstraintKind::LongTerm)?;
        let mut short_term = open(ConstraintKind::ShortTerm)?;
        if is_wrong_constraint(&long_term, ConstraintKind::LongTerm)
            && is_wrong_constraint(&short_term, ConstraintKind::ShortTerm)
        {
            pc.logger().warn(format_args!(
                "long and short term constraints are out of order for zone {}",
                zone_dir(CONTROL_TYPE, zones)
            ));
            mem::swap(&mut long_term, &mut short_term);
        }
        Ok(Self {
            zone,
            long_term,
            short_term,
        })
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn constraint(&self, kind: ConstraintKind) -> &Constraint {
        match kind {
            ConstraintKind::LongTerm => &self.long_term,
            ConstraintKind::ShortTerm => &self.short_term,
        }
    }

    /// Close all files, returning the first failure.
    pub fn close(&mut self) -> Result<()> {
        let zone = self.zone.close();
        let long = self.long_term.close();
        let short = self.short_term.close();
        zone.and(long).and(short)
    }
}

/// The RAPL control type
#[derive(Debug, Clone, Copy)]
pub struct Rapl<'a> {
    pc: &'a Powercap,
}

impl<'a> Rapl<'a> {
    pub fn new(pc: &'a Powercap) -> Self {
        Self { pc }
    }

    /// Whether the RAPL control type exists.
    pub fn is_supported(&self) -> Result<bool> {
        self.pc.control_type_exists(CONTROL_TYPE)
    }

    /// Number of packages, top-level RAPL zones.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::NotFound`] if there are none.
    pub fn package_count(&self) -> Result<u32> {
        let n = self.pc.zone_count(CONTROL_TYPE, &[])?;
        if n == 0 {
            self.pc.logger().error(format_args!(
                "no top-level zones found, is the intel_rapl kernel module loaded?"
            ));
            return Err(PowercapError::NotFound(format!("{} zones", CONTROL_TYPE)));
        }
        Ok(n)
    }

    /// Whether RAPL power capping is enabled.
    pub fn enabled(&self) -> Result<bool> {
        self.pc.control_type_enabled(CONTROL_TYPE)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.pc.set_control_type_enabled(CONTROL_TYPE, enabled)
    }

    /// Open package `id` and every zone in it.
    ///
    /// See [`Package::open`]
    pub fn open(&self, id: u32, read_only: bool) -> Result<Package> {
        Package::open(self.pc, id, read_only)
    }
}

/// One RAPL package and its subordinate zones
///
/// Zones the hardware doesn't have are [`None`], and any access to them is
/// [`PowercapError::Unsupported`].
#[derive(Debug)]
pub struct Package {
    id: u32,
    package: Option<ZoneFiles>,
    core: Option<ZoneFiles>,
    uncore: Option<ZoneFiles>,
    dram: Option<ZoneFiles>,
    psys: Option<ZoneFiles>,
}

// Private
impl Package {
    fn slot(&mut self, kind: ZoneKind) -> &mut Option<ZoneFiles> {
        match kind {
            ZoneKind::Package => &mut self.package,
            ZoneKind::Core => &mut self.core,
            ZoneKind::Uncore => &mut self.uncore,
            ZoneKind::Dram => &mut self.dram,
            ZoneKind::Psys => &mut self.psys,
        }
    }

    fn classify(pc: &Powercap, zones: &[u32]) -> Result<ZoneKind> {
        let name = pc.zone_name(CONTROL_TYPE, zones)?;
        ZoneKind::classify(&name).ok_or_else(|| {
            pc.logger().error(format_args!(
                "unrecognized zone name `{}` at {}",
                name,
                zone_dir(CONTROL_TYPE, zones)
            ));
            PowercapError::UnrecognizedZoneKind(name)
        })
    }
}

// Public
impl Package {
    /// Open package `id` and every zone in it.
    ///
    /// The top-level zone and each subordinate zone are identified by their
    /// names, so a top-level `psys` zone is [`ZoneKind::Psys`].
    ///
    /// # Errors
    ///
    /// - [`PowercapError::NotFound`] if the package doesn't exist.
    /// - [`PowercapError::UnrecognizedZoneKind`] if any zone has a name we
    ///   don't know.
    /// - [`PowercapError::DuplicateZoneKind`] if two zones are the same kind.
    /// - If opening any zone fails, see [`Zone::open`].
    ///
    /// Nothing is left open on failure.
    pub fn open(pc: &Powercap, id: u32, read_only: bool) -> Result<Self> {
        let mut pkg = Self {
            id,
            package: None,
            core: None,
            uncore: None,
            dram: None,
            psys: None,
        };
        let kind = Self::classify(pc, &[id])?;
        *pkg.slot(kind) = Some(ZoneFiles::open(pc, &[id], read_only)?);

        for index in 0..pc.zone_count(CONTROL_TYPE, &[id])? {
            let zones = [id, index];
            let kind = Self::classify(pc, &zones)?;
            let slot = pkg.slot(kind);
            if slot.is_some() {
                pc.logger().error(format_args!(
                    "duplicate {} zone detected at {}:{}",
                    kind, id, index
                ));
                return Err(PowercapError::DuplicateZoneKind {
                    kind: kind.to_string(),
                    id,
                    index,
                });
            }
            *slot = Some(ZoneFiles::open(pc, &zones, read_only)?);
        }
        Ok(pkg)
    }

    /// Package index, the top-level zone number.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Which kinds of zone this package has.
    pub fn zones(&self) -> Zones {
        ZoneKind::ALL
            .iter()
            .filter(|&&k| self.files(k).is_ok())
            .fold(Zones::empty(), |acc, k| acc | k.flag())
    }

    /// Files for zone `kind`
    ///
    /// # Errors
    ///
    /// - [`PowercapError::Unsupported`] if the package has no such zone.
    pub fn files(&self, kind: ZoneKind) -> Result<&ZoneFiles> {
        let files = match kind {
            ZoneKind::Package => &self.package,
            ZoneKind::Core => &self.core,
            ZoneKind::Uncore => &self.uncore,
            ZoneKind::Dram => &self.dram,
            ZoneKind::Psys => &self.psys,
        };
        files.as_ref().ok_or(PowercapError::Unsupported)
    }

    pub fn zone(&self, kind: ZoneKind) -> Result<&Zone> {
        Ok(self.files(kind)?.zone())
    }

    pub fn constraint(&self, kind: ZoneKind, constraint: ConstraintKind) -> Result<&Constraint> {
        Ok(self.files(kind)?.constraint(constraint))
    }

    /// Whether zone `kind` is usable.
    ///
    /// That is, it has a long term constraint.
    pub fn is_zone_supported(&self, kind: ZoneKind) -> bool {
        self.is_constraint_supported(kind, ConstraintKind::LongTerm)
    }

    /// Whether zone `kind` has the constraint `constraint`.
    ///
    /// That is, it has a power limit.
    pub fn is_constraint_supported(&self, kind: ZoneKind, constraint: ConstraintKind) -> bool {
        self.is_constraint_file_supported(kind, constraint, ConstraintFile::PowerLimitUw)
    }

    pub fn is_zone_file_supported(&self, kind: ZoneKind, file: ZoneFile) -> bool {
        self.zone(kind).map(|z| z.is_supported(file)).unwrap_or(false)
    }

    pub fn is_constraint_file_supported(
        &self,
        kind: ZoneKind,
        constraint: ConstraintKind,
        file: ConstraintFile,
    ) -> bool {
        self.constraint(kind, constraint)
            .map(|c| c.is_supported(file))
            .unwrap_or(false)
    }

    /// Read zone `file` of zone `kind` as a number.
    pub fn read_zone(&self, kind: ZoneKind, file: ZoneFile) -> Result<u64> {
        self.zone(kind)?.read(file)
    }

    /// Read `file` of `constraint` on zone `kind` as a number.
    pub fn read_constraint(
        &self,
        kind: ZoneKind,
        constraint: ConstraintKind,
        file: ConstraintFile,
    ) -> Result<u64> {
        self.constraint(kind, constraint)?.read(file)
    }

    /// Name of zone `kind`, like `package-0`.
    pub fn name(&self, kind: ZoneKind) -> Result<String> {
        self.zone(kind)?.name()
    }

    pub fn enabled(&self, kind: ZoneKind) -> Result<bool> {
        self.zone(kind)?.enabled()
    }

    pub fn set_enabled(&self, kind: ZoneKind, enabled: bool) -> Result<()> {
        self.zone(kind)?.set_enabled(enabled)
    }

    pub fn energy_uj(&self, kind: ZoneKind) -> Result<u64> {
        self.zone(kind)?.energy_uj()
    }

    /// Reset the energy counter.
    ///
    /// RAPL usually doesn't allow this.
    pub fn reset_energy_uj(&self, kind: ZoneKind) -> Result<()> {
        self.zone(kind)?.reset_energy_uj()
    }

    pub fn max_energy_range_uj(&self, kind: ZoneKind) -> Result<u64> {
        self.zone(kind)?.max_energy_range_uj()
    }

    pub fn power_uw(&self, kind: ZoneKind) -> Result<u64> {
        self.zone(kind)?.power_uw()
    }

    pub fn max_power_range_uw(&self, kind: ZoneKind) -> Result<u64> {
        self.zone(kind)?.max_power_range_uw()
    }

    pub fn power_limit_uw(&self, kind: ZoneKind, constraint: ConstraintKind) -> Result<u64> {
        self.constraint(kind, constraint)?.power_limit_uw()
    }

    pub fn set_power_limit_uw(
        &self,
        kind: ZoneKind,
        constraint: ConstraintKind,
        val: u64,
    ) -> Result<()> {
        self.constraint(kind, constraint)?.set_power_limit_uw(val)
    }

    pub fn time_window_us(&self, kind: ZoneKind, constraint: ConstraintKind) -> Result<u64> {
        self.constraint(kind, constraint)?.time_window_us()
    }

    pub fn set_time_window_us(
        &self,
        kind: ZoneKind,
        constraint: ConstraintKind,
        val: u64,
    ) -> Result<()> {
        self.constraint(kind, constraint)?.set_time_window_us(val)
    }

    pub fn max_power_uw(&self, kind: ZoneKind, constraint: ConstraintKind) -> Result<u64> {
        self.constraint(kind, constraint)?.max_power_uw()
    }

    pub fn min_power_uw(&self, kind: ZoneKind, constraint: ConstraintKind) -> Result<u64> {
        self.constraint(kind, constraint)?.min_power_uw()
    }

    pub fn max_time_window_us(&self, kind: ZoneKind, constraint: ConstraintKind) -> Result<u64> {
        self.constraint(kind, constraint)?.max_time_window_us()
    }

    pub fn min_time_window_us(&self, kind: ZoneKind, constraint: ConstraintKind) -> Result<u64> {
        self.constraint(kind, constraint)?.min_time_window_us()
    }

    pub fn constraint_name(&self, kind: ZoneKind, constraint: ConstraintKind) -> Result<String> {
        self.constraint(kind, constraint)?.name()
    }

    /// Close every file of every zone.
    ///
    /// Every file is closed even if some fail, the first failure is
    /// returned. Closing more than once does nothing.
    pub fn close(&mut self) -> Result<()> {
        let mut ret = Ok(());
        for kind in ZoneKind::ALL {
            if let Some(files) = self.slot(kind) {
                let r = files.close();
                if ret.is_ok() {
                    ret = r;
                }
            }
        }
        ret
    }
}
