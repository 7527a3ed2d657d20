//! This module provides ways to get information about, and configure, a
//! running Linux system
pub mod class;
