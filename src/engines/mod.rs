//! Speech synthesis engines.
//!
//! # Available Engines
//!
//! Enable engines via Cargo features:
//! - `voxcpm` - VoxCPM 1.5 (inference daemon, optional Kazakh LoRA)

#[cfg(feature = "voxcpm")]
pub mod voxcpm;
