// src/packages/mod.rs

//! Host package manager integration
//!
//! The build pipeline talks to the native package manager through the
//! [`NativePackageManager`] trait; pacman is the one backend provided.

pub mod pacman;

pub use pacman::{InstallOptions, NativeConfig, NativePackageManager, Pacman};
