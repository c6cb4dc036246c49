//! MQTT control of the purifier
//!
//! # Module Layout
//!
//! - [`protocol`]   -- topics, fan modes and the two message formats
//! - [`session`]    -- custom-authorizer WebSocket session over `rumqttc`
//! - [`controller`] -- [`ControlSurface`] bound to one device
//! - [`fake`]       -- in-process [`CommandPublisher`] for tests

pub mod controller;
pub mod fake;
pub mod protocol;
pub mod session;

pub use controller::{spawn_control_listener, ControlOp, ControlRequest, ControlSurface, DeviceController};
pub use protocol::{reported_power, ControlCommand, FanMode};
pub use session::{
    CommandPublisher, ControlSession, GrantSource, MqttConnectionGrant, SessionEvent, SessionHandle,
};
