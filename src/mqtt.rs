//! MQTT publish sink.
//!
//! Wraps rumqttc's async client. A background task drives the protocol
//! event loop, retrying after transport errors, while the gateway loop
//! hands finished payloads to [`PublishSink::publish`]. A publish failure
//! is reported to the caller and never retried here; delivery is
//! at-most-once from the gateway's point of view.

use crate::config::{AuthType, MqttConfig};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS, TlsConfiguration, Transport};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How long the broker gets to acknowledge the initial connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised by the publish sink.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("broker did not acknowledge the connection within {0:?}")]
    ConnectTimeout(Duration),
    #[error("mtls auth requires root_ca_path, cert_path and key_path")]
    MissingTlsMaterial,
    #[error("failed to read {what} '{path}': {source}")]
    Tls {
        what: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for finished payloads.
///
/// The gateway loop only talks to this trait, so tests can swap in a
/// recording sink.
#[async_trait]
pub trait PublishSink: Send {
    /// Hand one UTF-8 payload to the transport.
    ///
    /// Failure means this payload is lost; the caller counts and logs it
    /// and moves on to the next one.
    async fn publish(&mut self, payload: String) -> Result<(), PublishError>;
}

/// MQTT-backed publish sink.
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    qos: QoS,
    poller: JoinHandle<()>,
    cancel: CancellationToken,
}

impl MqttPublisher {
    /// Connect to the broker described by `cfg`.
    ///
    /// Spawns the event-loop task and waits for the broker's ConnAck.
    ///
    /// # Errors
    /// Returns an error when TLS material cannot be read or the broker
    /// does not acknowledge within [`CONNECT_TIMEOUT`].
    pub async fn connect(cfg: &MqttConfig) -> Result<Self, PublishError> {
        let options = build_options(cfg)?;
        info!(
            "connecting to MQTT broker {}:{} as '{}'",
            cfg.broker, cfg.port, cfg.client_id
        );

        let (client, mut eventloop) = AsyncClient::new(options, 50);
        let (connected_tx, mut connected_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let poller_cancel = cancel.clone();
        let broker = format!("{}:{}", cfg.broker, cfg.port);
        let poller = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = poller_cancel.cancelled() => break,
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                            info!("connected to MQTT broker {broker} ({:?})", ack.code);
                            let _ = connected_tx.send(true);
                        }
                        Ok(event) => trace!(?event, "MQTT event"),
                        Err(e) => {
                            let _ = connected_tx.send(false);
                            warn!("MQTT poll error: {e} (retrying)");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        });

        let acknowledged =
            tokio::time::timeout(CONNECT_TIMEOUT, connected_rx.wait_for(|up| *up)).await;
        if !matches!(acknowledged, Ok(Ok(_))) {
            cancel.cancel();
            let _ = poller.await;
            return Err(PublishError::ConnectTimeout(CONNECT_TIMEOUT));
        }

        Ok(Self {
            client,
            topic: cfg.topic.clone(),
            qos: qos_level(cfg.qos),
            poller,
            cancel,
        })
    }

    /// Disconnect from the broker and stop the event-loop task.
    pub async fn disconnect(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect request failed: {e}");
        }
        self.cancel.cancel();
        let _ = self.poller.await;
    }
}

#[async_trait]
impl PublishSink for MqttPublisher {
    async fn publish(&mut self, payload: String) -> Result<(), PublishError> {
        self.client
            .publish(self.topic.as_str(), self.qos, false, payload)
            .await?;
        Ok(())
    }
}

/// Translate the connection settings into rumqttc options.
fn build_options(cfg: &MqttConfig) -> Result<MqttOptions, PublishError> {
    let mut options = MqttOptions::new(&cfg.client_id, &cfg.broker, cfg.port);
    options.set_keep_alive(Duration::from_secs(cfg.keepalive));
    options.set_clean_session(true);

    match cfg.auth_type {
        AuthType::Mtls => {
            let (Some(ca_path), Some(cert_path), Some(key_path)) =
                (&cfg.root_ca_path, &cfg.cert_path, &cfg.key_path)
            else {
                return Err(PublishError::MissingTlsMaterial);
            };
            let ca = read_pem(ca_path, "CA certificate")?;
            let cert = read_pem(cert_path, "client certificate")?;
            let key = read_pem(key_path, "client key")?;
            options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: Some((cert, key)),
            }));
        }
        AuthType::Userpass => {
            if let Some(credentials) = &cfg.credentials {
                options.set_credentials(
                    credentials.username.clone(),
                    credentials.password.clone().unwrap_or_default(),
                );
            }
            if let Some(ca_path) = &cfg.root_ca_path {
                let ca = read_pem(ca_path, "CA certificate")?;
                options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: None,
                }));
            }
        }
        AuthType::None => {
            info!("connecting without MQTT authentication");
        }
    }

    Ok(options)
}

fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

fn read_pem(path: &Path, what: &'static str) -> Result<Vec<u8>, PublishError> {
    std::fs::read(path).map_err(|source| PublishError::Tls {
        what,
        path: path.display().to_string(),
        source,
    })
}
