//! High level bindings to the Linux powercap interface
//!
//! # Implementation details
//!
//! The powercap framework is exposed by the kernel through files in `/sys`,
//! so this library requires them to exist.
//!
//! Parts of this interface are only loosely documented, and some files may
//! exist or not depending on the kernel version and the hardware.
//!
//! This crate attempts to correctly document these interfaces, and provide
//! kernel documentation sources where possible.
//! This is done on a best effort basis.
#![doc(html_root_url = "https://docs.rs/powercap/0.3.0")]

pub mod error;
pub mod extensions;

pub mod system;
mod util;
