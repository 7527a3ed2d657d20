//! Interface to the Linux power capping framework.
//!
//! The kernel exposes power capping "control types", like `intel-rapl`, as a
//! tree of zones under `/sys/class/powercap`. Each zone has energy and power
//! counters, and may have any number of constraints, each with a power limit
//! and a time window.
//!
//! ```text
//! /sys/class/powercap/intel-rapl/enabled
//! /sys/class/powercap/intel-rapl/intel-rapl:0/energy_uj
//! /sys/class/powercap/intel-rapl/intel-rapl:0/constraint_0_power_limit_uw
//! /sys/class/powercap/intel-rapl/intel-rapl:0/intel-rapl:0:1/name
//! ```
//!
//! # Examples
//!
//! Print the energy counter of every RAPL package
//!
//! ```rust,no_run
//! # use powercap::system::class::powercap::*;
//! let pc = Powercap::new();
//! let rapl = Rapl::new(&pc);
//!
//! for id in 0..rapl.package_count().unwrap() {
//!     let pkg = rapl.open(id, true).unwrap();
//!     println!("{}: {}uJ", id, pkg.energy_uj(ZoneKind::Package).unwrap());
//! }
//! ```
//!
//! # Implementation
//!
//! See the [kernel docs][1] and the [sysfs ABI][2]
//!
//! Files that don't exist for a given zone are not an error, many are
//! optional depending on the kernel and hardware. Reading them gives
//! [`PowercapError::Unsupported`].
//!
//! [1]: https://www.kernel.org/doc/html/latest/power/powercap/powercap.html
//! [2]: https://www.kernel.org/doc/Documentation/ABI/testing/sysfs-class-powercap
use std::path::{Path, PathBuf};

use crate::util::{POWERCAP_CLASS_PATH, POWERCAP_VIRTUAL_PATH, SYSFS_PATH};

pub use self::{
    file::{ConstraintFile, ControlTypeFile, FileKind, ZoneFile},
    handle::{Constraint, ControlType, Descriptor, Mode, OpenFile, Zone},
    logger::Logger,
    rapl::{ConstraintKind, Package, Rapl, ZoneFiles, ZoneKind, Zones},
};
pub use crate::error::PowercapError;

mod file;
mod handle;
mod logger;
mod path;
mod rapl;
mod sysfs;

pub type Result<T, E = PowercapError> = std::result::Result<T, E>;

/// Where the powercap tree lives, and who hears about it.
///
/// Everything in this module goes through a [`Powercap`], there is no global
/// state.
#[derive(Debug, Clone)]
pub struct Powercap {
    /// Root of the powercap tree, containing control type directories.
    root: PathBuf,

    /// Diagnostics sink.
    logger: Logger,
}

// Public
impl Powercap {
    /// Use the class tree, `/sys/class/powercap`.
    pub fn new() -> Self {
        Self::with_root(Path::new(SYSFS_PATH).join(POWERCAP_CLASS_PATH))
    }

    /// Use the virtual device tree, `/sys/devices/virtual/powercap`.
    ///
    /// The class tree is symlinks into here, so this is only useful if the
    /// class tree is unavailable.
    pub fn virtual_devices() -> Self {
        Self::with_root(Path::new(SYSFS_PATH).join(POWERCAP_VIRTUAL_PATH))
    }

    /// Use an arbitrary directory as the powercap root.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            logger: Logger::default(),
        }
    }

    /// Replace the [`Logger`].
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Root of the powercap tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The [`Logger`] in use.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

impl Default for Powercap {
    fn default() -> Self {
        Self::new()
    }
}
