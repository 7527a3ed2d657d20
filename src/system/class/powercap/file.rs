//! The fixed set of files in the powercap tree.
use crate::error::text::*;

/// Files belonging to a control type directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ControlTypeFile {
    /// `enabled`, whether power capping is enabled for the whole control
    /// type.
    Enabled,
}

impl ControlTypeFile {
    pub const ALL: [Self; 1] = [Self::Enabled];

    /// On-disk file name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
        }
    }
}

/// Files belonging to a zone directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ZoneFile {
    /// `max_energy_range_uj`, range of the energy counter in micro-joules.
    MaxEnergyRangeUj,

    /// `energy_uj`, current energy counter in micro-joules.
    ///
    /// Some control types allow writing `0` to reset the counter.
    EnergyUj,

    /// `max_power_range_uw`, range of the power counter in micro-watts.
    MaxPowerRangeUw,

    /// `power_uw`, current power in micro-watts.
    PowerUw,

    /// `enabled`, whether power capping is enabled for this zone.
    Enabled,

    /// `name`, the zone name.
    Name,
}

impl ZoneFile {
    pub const ALL: [Self; 6] = [
        Self::MaxEnergyRangeUj,
        Self::EnergyUj,
        Self::MaxPowerRangeUw,
        Self::PowerUw,
        Self::Enabled,
        Self::Name,
    ];

    /// On-disk file name.
    pub fn name(self) -> &'static str {
        match self {
            Self::MaxEnergyRangeUj => "max_energy_range_uj",
            Self::EnergyUj => "energy_uj",
            Self::MaxPowerRangeUw => "max_power_range_uw",
            Self::PowerUw => "power_uw",
            Self::Enabled => "enabled",
            Self::Name => "name",
        }
    }

    /// Whether the file may be opened for writing.
    pub(crate) fn is_mutable(self) -> bool {
        matches!(self, Self::EnergyUj | Self::Enabled)
    }
}

/// Files belonging to a constraint, inside its zone directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConstraintFile {
    /// `constraint_N_power_limit_uw`, the power limit in micro-watts.
    ///
    /// The presence of this file is what makes a constraint exist.
    PowerLimitUw,

    /// `constraint_N_time_window_us`, the averaging window in
    /// micro-seconds.
    TimeWindowUs,

    /// `constraint_N_max_power_uw`
    MaxPowerUw,

    /// `constraint_N_min_power_uw`
    MinPowerUw,

    /// `constraint_N_max_time_window_us`
    MaxTimeWindowUs,

    /// `constraint_N_min_time_window_us`
    MinTimeWindowUs,

    /// `constraint_N_name`
    Name,
}

impl ConstraintFile {
    pub const ALL: [Self; 7] = [
        Self::PowerLimitUw,
        Self::TimeWindowUs,
        Self::MaxPowerUw,
        Self::MinPowerUw,
        Self::MaxTimeWindowUs,
        Self::MinTimeWindowUs,
        Self::Name,
    ];

    /// File name suffix, after `constraint_N_`.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::PowerLimitUw => "power_limit_uw",
            Self::TimeWindowUs => "time_window_us",
            Self::MaxPowerUw => "max_power_uw",
            Self::MinPowerUw => "min_power_uw",
            Self::MaxTimeWindowUs => "max_time_window_us",
            Self::MinTimeWindowUs => "min_time_window_us",
            Self::Name => "name",
        }
    }

    /// On-disk file name for constraint number `constraint`.
    ///
    /// # Example
    ///
    /// `constraint_0_power_limit_uw`
    pub fn file_name(self, constraint: u32) -> String {
        format!("constraint_{}_{}", constraint, self.suffix())
    }

    pub(crate) fn is_mutable(self) -> bool {
        matches!(self, Self::PowerLimitUw | Self::TimeWindowUs)
    }
}

/// Any file in the powercap tree, relative to a zone path.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// A control type file. Only meaningful with an empty zone path.
    ControlType(ControlTypeFile),

    /// A zone file.
    Zone(ZoneFile),

    /// A file of constraint number `.0`.
    Constraint(u32, ConstraintFile),
}

impl FileKind {
    /// On-disk file name.
    pub fn file_name(self) -> String {
        match self {
            Self::ControlType(f) => f.name().to_owned(),
            Self::Zone(f) => f.name().to_owned(),
            Self::Constraint(i, f) => f.file_name(i),
        }
    }
}

impl From<ControlTypeFile> for FileKind {
    fn from(f: ControlTypeFile) -> Self {
        Self::ControlType(f)
    }
}

impl From<ZoneFile> for FileKind {
    fn from(f: ZoneFile) -> Self {
        Self::Zone(f)
    }
}

/// `TryFrom<u32>`, `FromStr` and `Display` for a closed enum with an `ALL`
/// table. Unknown values are `InvalidArgument`.
macro_rules! closed_enum {
    ($ty:ident, $name:ident, $err:expr) => {
        impl ::std::convert::TryFrom<u32> for $ty {
            type Error = $crate::error::PowercapError;

            fn try_from(i: u32) -> ::std::result::Result<Self, Self::Error> {
                $ty::ALL.get(i as usize).copied().ok_or_else(|| {
                    $crate::error::PowercapError::InvalidArgument(format!("{}: {}", $err, i))
                })
            }
        }

        impl ::std::str::FromStr for $ty {
            type Err = $crate::error::PowercapError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                $ty::ALL.iter().copied().find(|f| f.$name() == s).ok_or_else(|| {
                    $crate::error::PowercapError::InvalidArgument(format!("{}: `{}`", $err, s))
                })
            }
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.$name())
            }
        }
    };
}
pub(crate) use closed_enum;

closed_enum!(ControlTypeFile, name, CONTROL_TYPE_FILE);
closed_enum!(ZoneFile, name, ZONE_FILE);
closed_enum!(ConstraintFile, suffix, CONSTRAINT_FILE);
