#![allow(dead_code)]

use ledgersync_crypto::{DerivedKey, KeySession};
use ledgersync_model::{Entity, EntityMutation};
use ledgersync_sync::transport::memory::MemoryRelay;
use ledgersync_sync::{
    MemoryEntityStore, RateLimitConfig, RetryConfig, SyncConfig, SyncDb, SyncEngine,
};
use ledgersync_types::{DeviceId, EntityId, Timestamp};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub struct Device {
    pub id: DeviceId,
    pub engine: Arc<SyncEngine>,
    pub store: Arc<MemoryEntityStore>,
    pub session: Arc<KeySession>,
}

/// Fast retries, no idle lock, generous batch limits.
pub fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_idle_lock(None)
        .with_timeout(Duration::from_secs(5))
        .with_retry(
            RetryConfig::default()
                .with_max_attempts(3)
                .with_initial_delay(Duration::from_millis(5))
                .with_max_delay(Duration::from_millis(20))
                .with_jitter(false),
        )
        .with_rate_limits(RateLimitConfig::default().with_batch_encryption(10_000))
}

pub fn device(relay: &MemoryRelay, name: &str, key: &DerivedKey) -> Device {
    device_with(relay, name, key, test_config(), SyncDb::open_in_memory().unwrap())
}

/// Installs a log subscriber once; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn device_with(
    relay: &MemoryRelay,
    name: &str,
    key: &DerivedKey,
    config: SyncConfig,
    db: SyncDb,
) -> Device {
    init_tracing();
    let id = DeviceId::from(name);
    let store = Arc::new(MemoryEntityStore::new());
    let session = Arc::new(KeySession::new());
    session.install(key.clone());
    let engine = SyncEngine::new(
        id.clone(),
        config,
        db,
        store.clone(),
        session.clone(),
        relay.connect(id.clone()),
    );
    Device {
        id,
        engine: Arc::new(engine),
        store,
        session,
    }
}

pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

pub fn create(entity_type: &str, value: Value) -> EntityMutation {
    EntityMutation::create(entity_type, fields(value))
}

pub fn make_entity(device: &str, value: Value) -> Entity {
    create("account", value)
        .apply(None, &DeviceId::from(device), Timestamp::now())
        .unwrap()
}

pub fn get(device: &Device, id: &EntityId) -> Option<Entity> {
    use ledgersync_sync::EntityStore;
    device.store.get(id).unwrap()
}
