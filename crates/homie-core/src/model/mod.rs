// ── Domain model ──
//
// Device → Node → Property, each level held behind an `Arc` so the tree
// can share unchanged subtrees between snapshots.

pub mod description;
pub mod device;
pub mod path;
pub mod property;
pub mod value;

pub use description::{DeviceDescription, NodeDescription, PropertyDescription};
pub use device::{Device, DeviceState, Node};
pub use path::{InvalidPropertyPath, PropertyPath};
pub use property::Property;
pub use value::{Datatype, PropertyFormat, TypedValue, ValueError};
