pub mod client;
pub mod discovery;
pub mod publisher;
pub mod topics;

pub use client::MqttTransport;
pub use publisher::{MessageSink, PresencePublisher};
