//! Transport abstraction.
//!
//! The relay is an opaque byte channel: the engine hands it sealed envelopes
//! and receives sealed envelopes back on an mpsc channel. Nothing the relay
//! sees is plaintext.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receiving half of a connection: encoded envelopes from other devices.
pub type Inbound = mpsc::UnboundedReceiver<Vec<u8>>;

/// Acknowledgement that the relay has durably accepted a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Relay-assigned sequence number.
    pub seq: u64,
}

/// Outbound side of the relay connection.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends one encoded envelope. `Ok` means the relay acknowledged it;
    /// anything else leaves the entry queued.
    async fn send(&self, bytes: Vec<u8>) -> SyncResult<Ack>;
}

/// Both halves of a device's relay connection.
pub struct Channel {
    pub transport: Arc<dyn SyncTransport>,
    pub inbound: Inbound,
}

impl Channel {
    pub fn new(transport: Arc<dyn SyncTransport>, inbound: Inbound) -> Self {
        Self { transport, inbound }
    }
}

/// In-process relay for testing.
pub mod memory {
    use super::*;
    use ledgersync_types::DeviceId;
    use std::sync::{Mutex, MutexGuard};
    use std::time::Duration;
    use tracing::debug;

    #[derive(Default)]
    struct RelayState {
        peers: Vec<(DeviceId, mpsc::UnboundedSender<Vec<u8>>)>,
        /// Every accepted message, in relay order.
        log: Vec<(DeviceId, Vec<u8>)>,
        fail_next: u32,
        offline: bool,
        delay: Option<Duration>,
        next_seq: u64,
    }

    /// Fans each accepted message out to every other connected device.
    ///
    /// Failures can be injected: [`fail_next`](Self::fail_next) rejects the
    /// next N sends, [`set_offline`](Self::set_offline) rejects all sends,
    /// and [`set_delay`](Self::set_delay) makes sends slow enough to time out.
    #[derive(Clone, Default)]
    pub struct MemoryRelay {
        state: Arc<Mutex<RelayState>>,
    }

    impl MemoryRelay {
        pub fn new() -> Self {
            Self::default()
        }

        /// Connects a device and returns its channel.
        pub fn connect(&self, device: DeviceId) -> Channel {
            let (tx, rx) = mpsc::unbounded_channel();
            self.lock().peers.push((device.clone(), tx));
            let link = RelayLink {
                device,
                relay: self.clone(),
            };
            Channel::new(Arc::new(link), rx)
        }

        /// Rejects the next `n` sends.
        pub fn fail_next(&self, n: u32) {
            self.lock().fail_next = n;
        }

        /// Rejects every send while `offline` is true.
        pub fn set_offline(&self, offline: bool) {
            self.lock().offline = offline;
        }

        /// Delays each send by `delay` before it is accepted.
        pub fn set_delay(&self, delay: Option<Duration>) {
            self.lock().delay = delay;
        }

        /// Every accepted message, with its sender, in relay order.
        pub fn sent(&self) -> Vec<(DeviceId, Vec<u8>)> {
            self.lock().log.clone()
        }

        /// Number of accepted messages.
        pub fn sent_count(&self) -> usize {
            self.lock().log.len()
        }

        /// Delivers every logged message to `device` again, in order.
        pub fn redeliver_all(&self, device: &DeviceId) -> usize {
            let state = self.lock();
            let Some((_, tx)) = state.peers.iter().find(|(d, _)| d == device) else {
                return 0;
            };
            let replay: Vec<_> = state
                .log
                .iter()
                .filter(|(sender, _)| sender != device)
                .map(|(_, bytes)| bytes.clone())
                .collect();
            let count = replay.len();
            for bytes in replay {
                let _ = tx.send(bytes);
            }
            count
        }

        fn lock(&self) -> MutexGuard<'_, RelayState> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn accept(&self, from: &DeviceId, bytes: Vec<u8>) -> SyncResult<Ack> {
            let mut state = self.lock();
            if state.offline {
                return Err(SyncError::TransportFailure("relay unreachable".into()));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(SyncError::TransportFailure("injected failure".into()));
            }

            state.next_seq += 1;
            let seq = state.next_seq;
            state.peers.retain(|(_, tx)| !tx.is_closed());
            for (device, tx) in &state.peers {
                if device != from {
                    let _ = tx.send(bytes.clone());
                }
            }
            state.log.push((from.clone(), bytes));
            debug!("relay accepted message {} from {}", seq, from);
            Ok(Ack { seq })
        }
    }

    /// One device's outbound connection to a [`MemoryRelay`].
    pub struct RelayLink {
        device: DeviceId,
        relay: MemoryRelay,
    }

    #[async_trait]
    impl SyncTransport for RelayLink {
        async fn send(&self, bytes: Vec<u8>) -> SyncResult<Ack> {
            let delay = self.relay.lock().delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.relay.accept(&self.device, bytes)
        }
    }
}
