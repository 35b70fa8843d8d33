//! MQTT notifier - publishes alert records for downstream consumers
//!
//! Alerts go to the configured topic at QoS 1 (at-least-once). The rumqttc
//! event loop runs on its own task and reconnects on error.

use crate::domain::alert::AlertRecord;
use crate::infra::config::Config;
use crate::services::alert_worker::AlertSink;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct MqttNotifier {
    client: AsyncClient,
    topic: String,
}

impl MqttNotifier {
    /// Connect to the configured broker; must be called inside a runtime
    pub fn new(config: &Config) -> Self {
        let client_id = format!("sentinel-{}-{}", config.site_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_notifier_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!(pkid = %ack.pkid, "mqtt_notifier_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_notifier_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(
            host = %config.mqtt_host(),
            port = %config.mqtt_port(),
            topic = %config.mqtt_topic(),
            "mqtt_notifier_started"
        );
        Self { client, topic: config.mqtt_topic().to_string() }
    }
}

#[async_trait]
impl AlertSink for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn deliver(&self, alert: &AlertRecord) -> anyhow::Result<()> {
        let json = alert.to_json()?;
        self.client.publish(&self.topic, QoS::AtLeastOnce, false, json.into_bytes()).await?;
        Ok(())
    }
}
