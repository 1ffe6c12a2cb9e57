//! Media source implementations

pub mod synthetic;

pub use synthetic::{DeviceInventory, DeviceStatus, PermissionPolicy, SyntheticMediaSource};
