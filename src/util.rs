//! Utility functions

/// Technically Linux requires sysfs to be at `/sys`, calling it a system
/// configuration error otherwise.
///
/// But our upcoming distro is planning to experiment with filesystem layout
/// changes, including of `/sys`, so do this to allow easily changing it.
pub const SYSFS_PATH: &str = "/sys";

/// Powercap class location, relative to [`SYSFS_PATH`].
pub const POWERCAP_CLASS_PATH: &str = "class/powercap";

/// Powercap virtual device location, relative to [`SYSFS_PATH`].
///
/// The class directory only contains symlinks into here.
pub const POWERCAP_VIRTUAL_PATH: &str = "devices/virtual/powercap";

/// Longest path we will resolve, including the terminator.
pub const MAX_PATH: usize = libc::PATH_MAX as usize;

/// Deepest zone path accepted.
pub const MAX_ZONE_DEPTH: usize = 16;

/// Largest name read from a `name` file, including the terminator.
pub const MAX_NAME_SIZE: usize = 64;

/// Size of the buffer used for reading and writing `u64` values.
pub const MAX_U64_SIZE: usize = 24;

/// Parse an unsigned integer like `strtoull(3)` with base `0`.
///
/// Leading whitespace and a `+` are skipped, then the base is detected from
/// the prefix: `0x`/`0X` is hex, a leading `0` is octal, decimal otherwise.
/// Parsing stops at the first invalid digit.
///
/// Returns [`None`] if no digits were consumed or the value overflows.
pub fn parse_u64_auto(s: &str) -> Option<u64> {
    let s = s.trim_start();
    let s = s.strip_prefix('+').unwrap_or(s);
    let b = s.as_bytes();

    let (radix, digits) = match b {
        [b'0', b'x' | b'X', d, ..] if d.is_ascii_hexdigit() => (16, &s[2..]),
        [b'0', ..] => (8, s),
        _ => (10, s),
    };

    let len = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if len == 0 {
        return None;
    }
    u64::from_str_radix(&digits[..len], radix).ok()
}
