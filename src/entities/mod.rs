//! Entity and device snapshots with partial-update semantics.
//!
//! Snapshots are values: applying a patch returns a new snapshot, and
//! `diff` describes the change between two snapshots as a patch.

mod patch;

pub use patch::{apply_device_patch, apply_patch, diff, diff_devices, DevicePatch, EntityPatch};
