use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{MqttOptions, QoS, SubscribeFilter};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::alerts::AlertEvent;
use crate::codec::{self, SensorReading};
use crate::messages::{ConnectionState, ControlMessage, ProximityState};
use crate::settings::{DeviceSettings, SettingsPatch};
use crate::config;

/// MQTT client doubling as the notification sink (alerts) and the
/// presentation sink (state snapshots). All publishes are fire-and-forget: a
/// failed delivery is logged and dropped, never queued.
#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    publisher_id: String,
    topic_path: String,
}

#[derive(Debug, Serialize)]
struct AlertMessage {
    kind: &'static str,
    title: &'static str,
    body: &'static str,
}

#[derive(Debug, Serialize)]
struct ReadingMessage {
    temperature: String,
    threshold: String,
    weight_detected: bool,
    raw_valid: bool,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .as_ref()
            .unwrap_or(&"guardian-rs".to_string())
            .to_string();

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                publisher_id,
                topic_path: config.topic_path.clone().unwrap_or("guardian".to_string()),
            },
            eventloop,
        )
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .subscribe_many(vec![
                SubscribeFilter::new(format!("{}/control/scan", self.topic_path), QoS::AtMostOnce),
                SubscribeFilter::new(
                    format!("{}/control/disconnect", self.topic_path),
                    QoS::AtMostOnce,
                ),
                SubscribeFilter::new(format!("{}/settings/set", self.topic_path), QoS::AtMostOnce),
            ])
            .await?;

        Ok(())
    }

    /// Drive the rumqttc event loop, translating inbound publishes into
    /// [`ControlMessage`]s for the supervisor.
    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: broadcast::Sender<ControlMessage>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        let payload = p.payload;
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, payload);

                        let message = match p.topic {
                            t if t.ends_with("/control/scan") => Some(ControlMessage::ScanRequest),
                            t if t.ends_with("/control/disconnect") => {
                                Some(ControlMessage::Disconnect)
                            }
                            t if t.ends_with("/settings/set") => {
                                match serde_json::from_slice::<SettingsPatch>(&payload) {
                                    Ok(patch) => Some(ControlMessage::SettingsUpdate(patch)),
                                    Err(err) => {
                                        warn!("Ignoring malformed settings update: {:?}", err);
                                        None
                                    }
                                }
                            }
                            t => {
                                debug!("Ignoring message on unexpected topic {}", t);
                                None
                            }
                        };

                        if let Some(message) = message {
                            if let Err(err) = tx.send(message) {
                                error!("Error announcing control message: {:?}", err);
                            }
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                        if let Err(err) = self.subscribe().await {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                }
            }
        }
    }

    /// Deliver a user-facing alert. No confirmation, no retry.
    pub async fn notify(&self, alert: &AlertEvent) {
        info!("Alert: {} ({})", alert.title(), alert.kind());
        let message = AlertMessage {
            kind: alert.kind(),
            title: alert.title(),
            body: alert.body(),
        };
        self.publish(&format!("alert/{}", alert.kind()), &message)
            .await;
    }

    /// Persistent advisory condition (radio off, retryable connect errors).
    pub async fn publish_advisory(&self, message: &str) {
        warn!("Advisory: {}", message);
        self.publish("advisory", &serde_json::json!({ "message": message }))
            .await;
    }

    pub async fn publish_connection(&self, state: ConnectionState) {
        self.publish(
            "state/connection",
            &serde_json::json!({ "state": state.label() }),
        )
        .await;
    }

    pub async fn publish_region(&self, in_region: bool) {
        self.publish(
            "state/region",
            &serde_json::json!({ "in_region": in_region }),
        )
        .await;
    }

    pub async fn publish_proximity(&self, proximity: ProximityState) {
        self.publish(
            "state/proximity",
            &serde_json::json!({ "proximity": proximity.label() }),
        )
        .await;
    }

    pub async fn publish_reading(&self, reading: &SensorReading, settings: &DeviceSettings) {
        let message = ReadingMessage {
            temperature: reading.display_temperature(settings),
            threshold: codec::display_threshold(settings),
            weight_detected: reading.weight_detected,
            raw_valid: reading.raw_valid,
        };
        self.publish("state/reading", &message).await;
    }

    async fn publish<T: Serialize>(&self, channel: &str, message: &T) {
        let topic = format!(
            "{}/{}/{}",
            self.topic_path,
            sanitize_name(&self.publisher_id),
            channel
        );
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Error serializing message for {}: {:?}", topic, err);
                return;
            }
        };
        if let Err(err) = self
            .client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
        {
            // accepted limitation: dropped, not retried
            error!("Error publishing MQTT message: {:?}", err);
        }
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

fn sanitize_name(name: &str) -> String {
    // Remove any non-alphanumeric characters and replace spaces with underscores
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}
