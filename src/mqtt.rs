//! MQTT transport backed by `rumqttc`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Url;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};

use crate::{
    broker::{InboundMessage, Link, LinkClient, LinkEvents, Qos, SessionOptions, Transport},
    error::ConnectionError,
};

const DEFAULT_MQTT_PORT: u16 = 1883;
const REQUEST_CHANNEL_CAPACITY: usize = 64;
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

impl From<Qos> for QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => QoS::AtMostOnce,
            Qos::AtLeastOnce => QoS::AtLeastOnce,
            Qos::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Split `tcp://host:port` (scheme optional) into host and port.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16), ConnectionError> {
    let raw = endpoint.trim();
    let normalized = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("tcp://{raw}")
    };
    let invalid = |reason: String| ConnectionError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let url = Url::parse(&normalized).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "tcp" | "mqtt" => {}
        other => return Err(invalid(format!("unsupported scheme `{other}`"))),
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host".to_string()))?;
    Ok((host.to_string(), url.port().unwrap_or(DEFAULT_MQTT_PORT)))
}

pub fn mqtt_options(options: &SessionOptions) -> Result<MqttOptions, ConnectionError> {
    let (host, port) = parse_endpoint(&options.endpoint)?;
    let mut mqtt = MqttOptions::new(options.client_id.clone(), host, port);
    mqtt.set_clean_session(options.clean_session);
    mqtt.set_keep_alive(options.keep_alive.max(MIN_KEEP_ALIVE));
    if let Some((username, password)) = &options.credentials {
        mqtt.set_credentials(username.clone(), password.clone());
    }
    Ok(mqtt)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MqttTransport;

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, options: &SessionOptions) -> Result<Link, ConnectionError> {
        let mqtt = mqtt_options(options)?;
        let (client, mut eventloop) = AsyncClient::new(mqtt, REQUEST_CHANNEL_CAPACITY);

        // The event loop performs the network connect on its first poll.
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    tracing::debug!(
                        target = "notify_relay::mqtt",
                        session_present = ack.session_present,
                        "connack received"
                    );
                    break;
                }
                Ok(_) => {}
                Err(error) => return Err(ConnectionError::Refused(error.to_string())),
            }
        }

        Ok(Link {
            client: Arc::new(MqttClient { client }),
            events: Box::new(MqttEvents { eventloop }),
        })
    }
}

struct MqttClient {
    client: AsyncClient,
}

#[async_trait]
impl LinkClient for MqttClient {
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), ConnectionError> {
        self.client
            .subscribe(topic, qos.into())
            .await
            .map_err(|e| ConnectionError::Client(e.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
        retained: bool,
    ) -> Result<(), ConnectionError> {
        self.client
            .publish(topic, qos.into(), retained, payload)
            .await
            .map_err(|e| ConnectionError::Client(e.to_string()))
    }

    async fn disconnect(&self) {
        if let Err(error) = self.client.try_disconnect() {
            tracing::debug!(target = "notify_relay::mqtt", error = %error, "disconnect request dropped");
        }
    }
}

struct MqttEvents {
    eventloop: EventLoop,
}

#[async_trait]
impl LinkEvents for MqttEvents {
    async fn next_message(&mut self) -> Result<InboundMessage, ConnectionError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(_) => {}
                Err(error) => return Err(ConnectionError::Lost(error.to_string())),
            }
        }
    }

    async fn flush(&mut self) {
        let sent = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                    Ok(_) => {}
                    Err(_) => return false,
                }
            }
        })
        .await;
        if !matches!(sent, Ok(true)) {
            tracing::debug!(target = "notify_relay::mqtt", "disconnect not confirmed before link drop");
        }
    }
}
