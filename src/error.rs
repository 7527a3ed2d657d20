//! Error handling stuff
use displaydoc::Display;
use std::io;
use thiserror::Error;

/// Error type for [`crate::system::class::powercap`]
#[derive(Debug, Display, Error)]
pub enum PowercapError {
    /// Invalid argument: {0}
    InvalidArgument(String),

    /// Not found: {0}
    NotFound(String),

    /// Resolved path is too long, {0} bytes
    PathTooLong(usize),

    /// Permission denied for {path}: {source}
    PermissionDenied {
        /// Path that could not be opened
        path: String,

        /// Underlying OS error
        source: io::Error,
    },

    /// No data available from {0}
    EmptyOrMalformed(String),

    /// File is not supported by this zone or constraint
    Unsupported,

    /// IO Failed
    Io(#[from] io::Error),

    /// Unrecognized zone name `{0}`
    UnrecognizedZoneKind(String),

    /// Duplicate {kind} zone detected at {id}:{index}
    DuplicateZoneKind {
        /// Kind of the zone that was seen twice
        kind: String,

        /// Top-level zone index
        id: u32,

        /// Subordinate zone index of the duplicate
        index: u32,
    },
}

/// Error text.
pub(crate) mod text {
    pub const CONTROL_TYPE: &str = "invalid control type name";

    pub const DEPTH: &str = "zone path is too deep";

    pub const NAME_SIZE: &str = "name buffer size must not be zero";

    pub const ZONE_FILE: &str = "unknown zone file";

    pub const CONSTRAINT_FILE: &str = "unknown constraint file";

    pub const CONTROL_TYPE_FILE: &str = "unknown control type file";

    pub const ZONE_KIND: &str = "unknown zone kind";

    pub const CONSTRAINT_KIND: &str = "unknown constraint kind";

    pub const READ_ONLY: &str = "opened read-only";
}
