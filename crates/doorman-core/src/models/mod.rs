//! Wire models for the systems API.
//!
//! Shapes are tolerant: everything the display layer doesn't strictly need
//! is optional with defaults, because the provider adds fields without
//! versioning.

pub mod cloud_node;
pub mod device;

pub use cloud_node::{CloudNode, ConnectionStatus};
pub use device::Device;
