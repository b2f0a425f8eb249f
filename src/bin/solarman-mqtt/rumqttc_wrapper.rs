use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context};
use log::{debug, warn};
use rumqttc::{
    tokio_rustls::{self, rustls::ClientConfig},
    Client, Event, MqttOptions, Outgoing, Transport,
};
use solarman2mqtt::{
    mqtt_config::MqttConfig,
    mqtt_wrapper::{self, Unsent},
};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct RumqttcWrapper {
    client: Client,
    closing: Arc<AtomicBool>,
    connection: Option<JoinHandle<()>>,
    queued: usize,
    sent: Arc<AtomicUsize>,
}

fn match_qos(qos: mqtt_wrapper::QoS) -> rumqttc::QoS {
    match qos {
        mqtt_wrapper::QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        mqtt_wrapper::QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        mqtt_wrapper::QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn tls_transport() -> anyhow::Result<Transport> {
    // Use rustls-native-certs to load root certificates from the operating system.
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in native.errors {
        warn!("could not load platform certificate: {e}");
    }
    for cert in native.certs {
        roots.add(cert).context("invalid platform certificate")?;
    }

    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Transport::tls_with_config(client_config.into()))
}

impl mqtt_wrapper::MqttWrapper for RumqttcWrapper {
    fn publish<S, V>(
        &mut self,
        topic: S,
        qos: mqtt_wrapper::QoS,
        retain: bool,
        payload: V,
    ) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>,
    {
        self.publish_with_retries(topic, match_qos(qos), retain, payload)?;
        self.queued += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        self.closing.store(true, Ordering::SeqCst);
        let requested = self.client.disconnect();
        connection
            .join()
            .map_err(|_| anyhow!("mqtt event loop panicked"))?;
        let unsent = self.queued.saturating_sub(self.sent.load(Ordering::SeqCst));
        if unsent > 0 {
            return Err(Unsent(unsent).into());
        }
        Ok(requested?)
    }

    fn new(config: &MqttConfig, suffix: &str) -> anyhow::Result<Self> {
        let use_tls = config.tls.is_some_and(|tls| tls);
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| "solarman-mqtt".to_string())
            + suffix;

        let mut mqttoptions = MqttOptions::new(client_id, &config.broker, config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if use_tls {
            mqttoptions.set_transport(tls_transport()?);
        }
        if let Some((username, password)) = config.credentials() {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut connection) = Client::new(mqttoptions, 512);
        let closing = Arc::new(AtomicBool::new(false));
        let sent = Arc::new(AtomicUsize::new(0));

        let event_loop_closing = closing.clone();
        let event_loop_sent = sent.clone();
        let handle = thread::spawn(move || {
            // keep polling the event loop to make sure outgoing messages get sent;
            // it ends once the disconnect went out, or on the first error after
            // a disconnect was requested
            for notification in connection.iter() {
                match notification {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                        event_loop_sent.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(event) => debug!("mqtt event: {event:?}"),
                    Err(e) if event_loop_closing.load(Ordering::SeqCst) => {
                        warn!("mqtt connection closed before queue was flushed: {e}");
                        break;
                    }
                    Err(e) => {
                        warn!("mqtt connection error: {e}");
                        thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
        });

        Ok(Self {
            client,
            closing,
            connection: Some(handle),
            queued: 0,
            sent,
        })
    }
}

impl RumqttcWrapper {
    // try publishing up to three times
    fn publish_with_retries(
        &self,
        topic: impl Clone + Into<String>,
        qos: rumqttc::QoS,
        retain: bool,
        payload: impl Clone + Into<Vec<u8>>,
    ) -> Result<(), rumqttc::ClientError> {
        if self
            .client
            .try_publish(topic.clone(), qos, retain, payload.clone())
            .is_ok()
        {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(100));
        if self
            .client
            .try_publish(topic.clone(), qos, retain, payload.clone())
            .is_ok()
        {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(100));
        self.client.try_publish(topic, qos, retain, payload)
    }
}

impl Drop for RumqttcWrapper {
    fn drop(&mut self) {
        if let Err(e) = mqtt_wrapper::MqttWrapper::disconnect(self) {
            debug!("mqtt disconnect on drop: {e}");
        }
    }
}
