use crate::mqtt_config::MqttConfig;

/// Error of [`MqttWrapper::disconnect`] when queued messages never left the
/// client before the connection closed.
#[derive(Debug, thiserror::Error)]
#[error("{0} queued message(s) were not sent before the connection closed")]
pub struct Unsent(pub usize);

#[derive(Clone, Copy)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

pub trait MqttWrapper {
    // This trait provides an interface that decouples library code from an
    // implementation of the MQTT client. On library calling code, one needs to
    // wrap the MQTT implementation, i.e. the client, in a new type that in
    // turn implements this trait.

    fn publish<S, V>(&mut self, topic: S, qos: QoS, retain: bool, payload: V) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>;

    /// Flushes queued messages and closes the connection.
    fn disconnect(&mut self) -> anyhow::Result<()>;

    fn new(config: &MqttConfig, suffix: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}
