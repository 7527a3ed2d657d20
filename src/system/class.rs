//! Abstractions for handling certain classes of device
//!
//! A "class" is a specific kernel subsystem, exposed under `/sys/class`.
//!
//! See the [sysfs rules][1] for details
//!
//! [1]: https://www.kernel.org/doc/html/latest/admin-guide/sysfs-rules.html
pub mod powercap;
