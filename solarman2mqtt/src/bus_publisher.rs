use crate::{
    metric_collector::MetricCollector,
    mqtt_config::MqttConfig,
    mqtt_wrapper::{MqttWrapper, QoS, Unsent},
    publication::Publication,
};

use log::{debug, warn};

/// Publishes decided readings onto one installation's broker.
///
/// Messages are not retained: a reading that stops being published must not
/// linger on the broker as the current value.
pub struct BusPublisher<MQTT: MqttWrapper> {
    client: MQTT,
}

impl<MQTT: MqttWrapper> BusPublisher<MQTT> {
    pub fn new(config: &MqttConfig, installation: &str) -> anyhow::Result<Self> {
        let client = MQTT::new(config, &format!("-{}", client_suffix(installation)))?;
        Ok(Self { client })
    }

    pub fn from_client(client: MQTT) -> Self {
        Self { client }
    }
}

/// Installation name reduced to characters safe inside an MQTT client id.
fn client_suffix(installation: &str) -> String {
    installation
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl<MQTT: MqttWrapper> MetricCollector for BusPublisher<MQTT> {
    fn publish(&mut self, publications: &[Publication]) -> usize {
        let mut failed = 0;
        for publication in publications {
            debug!("Send {} to {}", publication.payload, publication.topic);
            if let Err(e) = self.client.publish(
                publication.topic.as_str(),
                QoS::AtMostOnce,
                false,
                publication.payload.as_str(),
            ) {
                warn!("Failed to send message to topic {}: {e:?}", publication.topic);
                failed += 1;
            }
        }
        failed
    }

    fn close(&mut self) -> usize {
        let Err(e) = self.client.disconnect() else {
            return 0;
        };
        match e.downcast_ref::<Unsent>() {
            Some(Unsent(count)) => {
                warn!("{e}");
                *count
            }
            None => {
                warn!("mqtt disconnect failed: {e:?}");
                0
            }
        }
    }
}
