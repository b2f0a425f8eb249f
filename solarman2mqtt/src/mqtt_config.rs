use std::fmt;

use serde::Deserialize;

/// Broker connection and topic prefix of one installation.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub tls: Option<bool>,
}

impl MqttConfig {
    /// Username/password pair handed to the broker, if any.
    ///
    /// A password without a username is ignored.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (None, _) => None,
            (Some(username), None) => Some((username.clone(), "".into())),
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
        }
    }
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("broker", &self.broker)
            .field("port", &self.port)
            .field("topic", &self.topic)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .field("tls", &self.tls)
            .finish()
    }
}
