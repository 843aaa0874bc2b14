// homie-core: Homie v5 protocol-to-state pipeline between the MQTT broker and
// consumers (CLI).

pub mod config;
pub mod error;
pub mod event;
pub mod manager;
pub mod model;
pub mod registry;
pub mod store;
pub mod stream;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{EnvironmentConfig, ReconnectConfig};
pub use error::CoreError;
pub use event::{HomieEvent, decode};
pub use manager::{
    ConnectionState, DeviceReady, DeviceSubscription, EnvironmentManager, ListenerHandle,
};
pub use registry::EnvironmentRegistry;
pub use store::DeviceTree;
pub use stream::{DeviceTreeStream, DeviceTreeWatchStream};
pub use transport::{
    Connector, MqttConnector, Transport, TransportEvent, TransportLink, TransportStatus,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Datatype, Device, DeviceDescription, DeviceState, InvalidPropertyPath, Node, NodeDescription,
    Property, PropertyDescription, PropertyFormat, PropertyPath, TypedValue, ValueError,
};
