//! Test doubles for the sensor, clock, channel and indicator seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::channel::{ChannelError, Credentials, DeliveryChannel};
use crate::clock::Clock;
use crate::indicator::Indicator;
use crate::reading::Sample;
use crate::sensor::{SensorError, SensorReader};

/// Sensor replaying a script; the last entry repeats once the script runs out.
pub struct ScriptedSensor {
    script: VecDeque<Result<Sample, SensorError>>,
    last: Result<Sample, SensorError>,
    pub reads: Arc<AtomicUsize>,
}

impl ScriptedSensor {
    pub fn new(script: Vec<Result<Sample, SensorError>>) -> Self {
        Self {
            script: script.into(),
            last: Err(SensorError::NotAvailable),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn samples(samples: &[(f32, f32)]) -> Self {
        Self::new(samples.iter().map(|&(t, h)| Ok(Sample::new(t, h))).collect())
    }
}

#[async_trait]
impl SensorReader for ScriptedSensor {
    async fn read(&mut self) -> Result<Sample, SensorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last.clone()
    }
}

/// Clock whose time is set by the test through a shared handle.
#[derive(Clone, Default)]
pub struct ManualClock {
    pub now: Arc<AtomicU64>,
    pub updates: Arc<AtomicUsize>,
}

impl ManualClock {
    pub fn at(now: u64) -> Self {
        let clock = Self::default();
        clock.set(now);
        clock
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    async fn update(&mut self) -> bool {
        self.updates.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn epoch_time(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// One publish attempt seen by [`MockChannel`].
#[derive(Debug, Clone)]
pub struct Attempt {
    pub topic: String,
    pub payload: Vec<u8>,
    pub accepted: bool,
}

impl Attempt {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).expect("payload is JSON")
    }
}

#[derive(Debug)]
pub struct ChannelState {
    pub connected: bool,

    /// Scripted connect answers; `accept_connect` applies once exhausted
    pub connect_script: VecDeque<bool>,
    pub accept_connect: bool,

    /// Scripted publish answers; `accept_publish` applies once exhausted
    pub publish_script: VecDeque<bool>,
    pub accept_publish: bool,

    pub connect_attempts: usize,
    pub attempts: Vec<Attempt>,
    pub last_credentials: Option<Credentials>,
}

impl ChannelState {
    /// Attempts the broker accepted, in order.
    pub fn delivered(&self) -> Vec<&Attempt> {
        self.attempts.iter().filter(|a| a.accepted).collect()
    }

    pub fn delivered_on(&self, topic: &str) -> Vec<&Attempt> {
        self.delivered().into_iter().filter(|a| a.topic == topic).collect()
    }
}

/// In-memory broker connection with scripted outcomes.
#[derive(Clone)]
pub struct MockChannel {
    pub state: Arc<Mutex<ChannelState>>,
}

impl MockChannel {
    /// Channel that is already connected and accepts everything.
    pub fn connected() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                connected: true,
                connect_script: VecDeque::new(),
                accept_connect: true,
                publish_script: VecDeque::new(),
                accept_publish: true,
                connect_attempts: 0,
                attempts: Vec::new(),
                last_credentials: None,
            })),
        }
    }

    /// Channel that starts disconnected.
    pub fn disconnected() -> Self {
        let channel = Self::connected();
        channel.state().connected = false;
        channel
    }

    /// Script the next publish answers.
    pub fn with_publish_script(self, script: &[bool]) -> Self {
        self.state().publish_script = script.iter().copied().collect();
        self
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state.lock().expect("channel state poisoned")
    }
}

#[async_trait]
impl DeliveryChannel for MockChannel {
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), ChannelError> {
        let mut state = self.state();
        state.connect_attempts += 1;
        state.last_credentials = Some(credentials.clone());
        let accept = state.connect_script.pop_front().unwrap_or(state.accept_connect);
        state.connected = accept;
        if accept {
            Ok(())
        } else {
            Err(ChannelError::ConnectFailed("connection refused".into()))
        }
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ChannelError> {
        let mut state = self.state();
        let accepted = if state.connected {
            state.publish_script.pop_front().unwrap_or(state.accept_publish)
        } else {
            false
        };
        state.attempts.push(Attempt {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            accepted,
        });

        if !state.connected {
            Err(ChannelError::NotConnected)
        } else if accepted {
            Ok(())
        } else {
            Err(ChannelError::Timeout)
        }
    }
}

/// Indicator recording every state it was set to.
#[derive(Clone, Default)]
pub struct RecordingIndicator {
    pub states: Arc<Mutex<Vec<bool>>>,
}

impl RecordingIndicator {
    pub fn history(&self) -> Vec<bool> {
        self.states.lock().expect("indicator poisoned").clone()
    }
}

impl Indicator for RecordingIndicator {
    fn set(&mut self, on: bool) {
        self.states.lock().expect("indicator poisoned").push(on);
    }
}
