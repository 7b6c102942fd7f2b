//! MQTT delivery channel.
//!
//! The pipeline talks to the broker through [`DeliveryChannel`], which only
//! exposes connect / is-connected / publish. [`MqttChannel`] implements it on
//! top of `rumqttc`:
//!
//! - `connect` performs one handshake and waits for CONNACK within a timeout.
//!   It never retries; the caller decides when to try again.
//! - after CONNACK the event loop is handed to a background task that only
//!   tracks connectivity and reports outgoing publishes and PUBACKs. It does
//!   not reconnect.
//! - `publish` uses QoS 1 and succeeds only once the broker acknowledged that
//!   very message within the publish timeout. Late acks of earlier publishes
//!   that timed out are ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::payload::PayloadError;

/// Capacity of the request channel between `AsyncClient` and its event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Publish progress reported by the event loop task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEvent {
    /// The `seq`-th publish request of the session went out with packet id `pkid`
    Sent { seq: u64, pkid: u16 },

    /// The broker acknowledged packet id `pkid`
    Acked(u16),
}

/// Errors that can occur on the delivery channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelError {
    /// No live broker connection
    NotConnected,

    /// Network-level failure while connecting
    ConnectFailed(String),

    /// Broker refused the connection (bad credentials, client id, ...)
    Refused(String),

    /// Broker did not answer in time
    Timeout,

    /// The MQTT client rejected the request
    Client(String),

    /// Payload could not be encoded
    Encode(String),

    /// Payload does not fit in the transport buffer
    PayloadTooLarge { size: usize, max: usize },
}

impl ChannelError {
    /// Whether retrying the same payload later can succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            ChannelError::Encode(_) | ChannelError::PayloadTooLarge { .. }
        )
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::NotConnected => write!(f, "Not connected to broker"),
            ChannelError::ConnectFailed(e) => write!(f, "Failed to connect to broker: {}", e),
            ChannelError::Refused(code) => write!(f, "Broker refused connection: {}", code),
            ChannelError::Timeout => write!(f, "Broker did not answer in time"),
            ChannelError::Client(e) => write!(f, "MQTT client error: {}", e),
            ChannelError::Encode(e) => write!(f, "Failed to encode payload: {}", e),
            ChannelError::PayloadTooLarge { size, max } => {
                write!(f, "Payload of {} bytes exceeds maximum of {} bytes", size, max)
            }
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<PayloadError> for ChannelError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::TooLarge { size, max } => ChannelError::PayloadTooLarge { size, max },
            PayloadError::Serialize(e) => ChannelError::Encode(e.to_string()),
        }
    }
}

/// Fixed identity presented to the broker on every connect.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Publish capability towards a message broker.
#[async_trait]
pub trait DeliveryChannel: Send {
    /// Attempt a single connection handshake.
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), ChannelError>;

    /// Whether the last known connection state is up.
    fn is_connected(&self) -> bool;

    /// Publish one message on `topic`.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ChannelError>;
}

/// Broker endpoint and transport limits for [`MqttChannel`].
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub max_packet_bytes: usize,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

impl MqttSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            keep_alive: config.keep_alive,
            // Fixed header and topic come on top of the JSON document.
            max_packet_bytes: config.max_payload_bytes + 1024,
            connect_timeout: config.connect_timeout,
            publish_timeout: config.publish_timeout,
        }
    }
}

/// `rumqttc`-backed delivery channel.
pub struct MqttChannel {
    settings: MqttSettings,

    /// Client of the current session, if a handshake ever succeeded
    client: Option<AsyncClient>,

    /// Flipped by the event loop task when the session ends
    connected: Arc<AtomicBool>,

    /// Outgoing publishes and acks of the current session
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,

    /// Number of publish requests queued in the current session
    queued: u64,

    /// Background task polling the event loop of the current session
    driver: Option<JoinHandle<()>>,
}

impl MqttChannel {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            events: None,
            queued: 0,
            driver: None,
        }
    }

    /// Broker address as `host:port`.
    pub fn broker(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    fn options(&self, credentials: &Credentials) -> MqttOptions {
        let mut options = MqttOptions::new(
            credentials.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options
            .set_keep_alive(self.settings.keep_alive)
            .set_clean_session(true)
            .set_max_packet_size(self.settings.max_packet_bytes, self.settings.max_packet_bytes);

        if let Some(username) = credentials.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(username, credentials.password.clone().unwrap_or_default());
        }

        options
    }

    fn teardown(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.client = None;
        self.events = None;
        self.queued = 0;
    }
}

impl Drop for MqttChannel {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Poll a fresh event loop until the broker answers the CONNECT.
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ChannelError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(ChannelError::Refused(format!("{:?}", ack.code)))
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(ChannelError::ConnectFailed(e.to_string())),
        }
    }
}

/// Keep an established session alive until it fails, reporting publishes and PUBACKs.
///
/// Returns instead of polling again after an error: polling would make
/// `rumqttc` reconnect on its own.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    // Requests leave the event loop in the order they were queued.
    let mut sent: u64 = 0;

    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                sent += 1;
                let _ = events.send(SessionEvent::Sent { seq: sent, pkid });
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!(pkid = ack.pkid, "PUBACK received");
                let _ = events.send(SessionEvent::Acked(ack.pkid));
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the session");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection lost");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

/// Wait until the `seq`-th publish of the session is acknowledged.
///
/// Acks of other packet ids belong to earlier publishes that already timed
/// out and never count for this one.
async fn wait_for_puback(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    seq: u64,
) -> Result<u16, ChannelError> {
    let pkid = loop {
        match events.recv().await {
            Some(SessionEvent::Sent { seq: sent, pkid }) if sent == seq => break pkid,
            Some(_) => continue,
            None => return Err(ChannelError::NotConnected),
        }
    };

    loop {
        match events.recv().await {
            Some(SessionEvent::Acked(acked)) if acked == pkid => return Ok(pkid),
            Some(SessionEvent::Acked(stale)) => {
                debug!(pkid = stale, expected = pkid, "Ignoring late PUBACK");
            }
            Some(SessionEvent::Sent { .. }) => continue,
            None => return Err(ChannelError::NotConnected),
        }
    }
}

#[async_trait]
impl DeliveryChannel for MqttChannel {
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), ChannelError> {
        self.teardown();

        let (client, mut eventloop) =
            AsyncClient::new(self.options(credentials), REQUEST_CHANNEL_CAPACITY);

        match timeout(self.settings.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ChannelError::Timeout),
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        self.driver = Some(tokio::spawn(drive_event_loop(
            eventloop,
            connected.clone(),
            event_tx,
        )));
        self.connected = connected;
        self.client = Some(client);
        self.events = Some(event_rx);

        info!(
            broker = %self.broker(),
            client_id = %credentials.client_id,
            "MQTT connected"
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }

        let client = self.client.as_ref().ok_or(ChannelError::NotConnected)?;
        let events = self.events.as_mut().ok_or(ChannelError::NotConnected)?;

        client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| ChannelError::Client(e.to_string()))?;
        self.queued += 1;

        let acked = wait_for_puback(events, self.queued);
        match timeout(self.settings.publish_timeout, acked).await {
            Ok(Ok(pkid)) => {
                debug!(topic = topic, pkid = pkid, bytes = payload.len(), "Message acknowledged");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ChannelError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(port: u16) -> MqttSettings {
        MqttSettings {
            host: "127.0.0.1".to_string(),
            port,
            keep_alive: Duration::from_secs(15),
            max_packet_bytes: 17_407,
            connect_timeout: Duration::from_secs(2),
            publish_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_channel_error_display() {
        assert_eq!(format!("{}", ChannelError::NotConnected), "Not connected to broker");
        assert!(format!("{}", ChannelError::Refused("BadUserNamePassword".into()))
            .contains("BadUserNamePassword"));
        assert_eq!(
            format!("{}", ChannelError::PayloadTooLarge { size: 10, max: 5 }),
            "Payload of 10 bytes exceeds maximum of 5 bytes"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(ChannelError::NotConnected.is_transient());
        assert!(ChannelError::Timeout.is_transient());
        assert!(ChannelError::ConnectFailed("refused".into()).is_transient());
        assert!(!ChannelError::PayloadTooLarge { size: 10, max: 5 }.is_transient());
    }

    #[test]
    fn test_payload_error_conversion() {
        let err: ChannelError = PayloadError::TooLarge { size: 9, max: 4 }.into();
        assert_eq!(err, ChannelError::PayloadTooLarge { size: 9, max: 4 });
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials::new("device-1").with_login("user", "secret");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("device-1"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_options_from_settings() {
        let channel = MqttChannel::new(settings(1883));
        let options = channel.options(&Credentials::new("device-1"));

        assert_eq!(options.client_id(), "device-1");
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert_eq!(channel.broker(), "127.0.0.1:1883");
    }

    #[tokio::test]
    async fn test_late_puback_of_earlier_publish_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Publish 1 timed out; its ack arrives while publish 2 is pending.
        tx.send(SessionEvent::Sent { seq: 1, pkid: 1 }).unwrap();
        tx.send(SessionEvent::Sent { seq: 2, pkid: 2 }).unwrap();
        tx.send(SessionEvent::Acked(1)).unwrap();

        let pending =
            tokio::time::timeout(Duration::from_millis(50), wait_for_puback(&mut rx, 2)).await;
        assert!(pending.is_err());

        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(SessionEvent::Sent { seq: 1, pkid: 1 }).unwrap();
        tx.send(SessionEvent::Sent { seq: 2, pkid: 2 }).unwrap();
        tx.send(SessionEvent::Acked(1)).unwrap();
        tx.send(SessionEvent::Acked(2)).unwrap();

        assert_eq!(wait_for_puback(&mut rx, 2).await, Ok(2));
    }

    #[tokio::test]
    async fn test_ack_before_send_does_not_count() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // A stale ack reusing the id shows up before this publish went out.
        tx.send(SessionEvent::Acked(3)).unwrap();
        tx.send(SessionEvent::Sent { seq: 1, pkid: 3 }).unwrap();

        let pending =
            tokio::time::timeout(Duration::from_millis(50), wait_for_puback(&mut rx, 1)).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_session_end_while_waiting_for_ack() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(SessionEvent::Sent { seq: 1, pkid: 7 }).unwrap();
        drop(tx);

        assert_eq!(wait_for_puback(&mut rx, 1).await, Err(ChannelError::NotConnected));
    }

    #[tokio::test]
    async fn test_publish_without_connection() {
        let mut channel = MqttChannel::new(settings(1883));
        assert!(!channel.is_connected());

        let result = channel.publish("topic", b"{}").await;
        assert_eq!(result, Err(ChannelError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Bind then drop a listener to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut channel = MqttChannel::new(settings(port));

        let result = channel.connect(&Credentials::new("device-1")).await;

        assert!(matches!(
            result,
            Err(ChannelError::ConnectFailed(_)) | Err(ChannelError::Timeout)
        ));
        assert!(!channel.is_connected());
    }
}
