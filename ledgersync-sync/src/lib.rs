//! Offline-tolerant, end-to-end encrypted sync engine for LedgerSync.
//!
//! Every device holds a full replica of the ledger. Local changes are
//! committed immediately and queued; whenever the relay is reachable they
//! are sealed and sent, and whatever other devices sent is opened and merged.
//! The relay only ever handles ciphertext.
//!
//! # Components
//!
//! - **Store**: [`EntityStore`] adapter over the application's database
//! - **Queue**: durable outbox of unsent changes ([`OutboundQueue`])
//! - **Audit**: append-only trail of accepted changes ([`AuditLog`])
//! - **Protocol**: the sealed [`WireEnvelope`]
//! - **Transport**: [`SyncTransport`] to the relay, plus an in-process
//!   [`MemoryRelay`](transport::memory::MemoryRelay)
//! - **Rate limiting**: [`RateLimiter`] for key derivation and encryption
//! - **Engine**: [`SyncEngine`] tying it together
//!
//! # Sync cycle
//!
//! 1. **Push**: send queued changes, oldest first, until acknowledged
//! 2. **Pull**: decrypt inbound envelopes and resolve them against the store
//! 3. **Reconcile**: refresh queued changes that a merge has moved forward
//!
//! # Example
//!
//! ```
//! use ledgersync_sync::{SyncConfig, SyncDb, SyncEngine, MemoryEntityStore};
//! use ledgersync_sync::transport::memory::MemoryRelay;
//! use ledgersync_crypto::KeySession;
//! use ledgersync_types::DeviceId;
//! use std::sync::Arc;
//!
//! let relay = MemoryRelay::new();
//! let device = DeviceId::new();
//! let engine = SyncEngine::new(
//!     device.clone(),
//!     SyncConfig::default(),
//!     SyncDb::open_in_memory().unwrap(),
//!     Arc::new(MemoryEntityStore::new()),
//!     Arc::new(KeySession::new()),
//!     relay.connect(device),
//! );
//! ```

mod audit;
mod config;
mod db;
mod engine;
mod error;
mod locks;
pub mod protocol;
mod queue;
mod rate_limit;
mod store;
pub mod transport;
mod validator;

pub use audit::{AuditEntry, AuditKind, AuditLog, AuditOrigin};
pub use config::{RateLimitConfig, RetryConfig, SyncConfig};
pub use db::SyncDb;
pub use engine::{CycleReport, InboundOutcome, SyncEngine, SyncPhase, SyncStats};
pub use error::{Disposition, SyncError, SyncResult};
pub use locks::EntityLocks;
pub use protocol::{WireEnvelope, SCHEMA_VERSION};
pub use queue::{OutboundEntry, OutboundQueue};
pub use rate_limit::{OperationClass, RateLimiter};
pub use store::{EntityStore, MemoryEntityStore};
pub use transport::{Ack, Channel, Inbound, SyncTransport};
pub use validator::{AcceptAll, MutationValidator};
