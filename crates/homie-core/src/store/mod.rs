// ── Device tree store ──
//
// Immutable, structurally shared snapshots plus the reducer that folds
// decoded events into them.

mod reduce;
mod tree;

pub use tree::DeviceTree;
