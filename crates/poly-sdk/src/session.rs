use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use poly_crypto::SigningKey;
use poly_log::{encode_servers, EventLog};
use poly_query::QueryManager;
use poly_registry::{MetaStore, StoreRegistry};
use poly_sync::{Connector, SyncReport, SyncScope, Synchronizer};
use poly_types::{
    ranges, CancelToken, ContentType, Delete, LwwElement, Pointer, Process, PublicKey, Range,
    SignedEvent,
};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{SdkError, SdkResult};
use crate::identity::LocalIdentity;

/// Everything bound to one local identity's store: authoring, sync and
/// live queries.
pub struct Session {
    key: SigningKey,
    process: Process,
    version: u32,
    registry: Arc<StoreRegistry>,
    log: Arc<EventLog>,
    sync: Synchronizer,
    queries: QueryManager,
}

impl Session {
    pub(crate) fn new(
        identity: LocalIdentity,
        log: Arc<EventLog>,
        registry: Arc<StoreRegistry>,
        connector: Arc<dyn Connector>,
        config: &EngineConfig,
    ) -> Self {
        let sync = Synchronizer::new(Arc::clone(&log), connector, config.sync.clone());
        let queries = QueryManager::new(Arc::clone(&log), &config.query);
        Self {
            key: identity.signing_key(),
            process: identity.process,
            version: config.schema_version,
            registry,
            log,
            sync,
            queries,
        }
    }

    pub fn system(&self) -> PublicKey {
        self.key.system()
    }

    pub fn process(&self) -> Process {
        self.process
    }

    /// Copy of the secret key, for importing this identity on another device.
    pub fn export_key(&self) -> SigningKey {
        SigningKey::from_bytes(*self.key.as_bytes())
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn sync(&self) -> &Synchronizer {
        &self.sync
    }

    pub fn queries(&self) -> &QueryManager {
        &self.queries
    }

    async fn author(
        &self,
        content_type: ContentType,
        content: Vec<u8>,
        lww: Option<LwwElement>,
    ) -> SdkResult<SignedEvent> {
        Ok(self
            .log
            .author(&self.key, &self.process, content_type, content, lww)
            .await?)
    }

    pub async fn post(&self, content: impl Into<Vec<u8>>) -> SdkResult<Pointer> {
        let signed = self.author(ContentType::POST, content.into(), None).await?;
        pointer_of(&signed)
    }

    /// Set an LWW field of this identity.
    ///
    /// The timestamp is the wall clock, bumped past the current item so two
    /// writes in the same millisecond still replace each other.
    pub async fn set_field(
        &self,
        content_type: ContentType,
        value: impl Into<Vec<u8>>,
    ) -> SdkResult<Pointer> {
        let value = value.into();
        let current = self.queries.crdt().current(&self.system(), content_type).await?;
        let at = wall_clock_ms().max(current.map_or(0, |item| item.unix_milliseconds + 1));
        let lww = LwwElement::new(value.clone(), at);
        let signed = self.author(content_type, value, Some(lww)).await?;
        debug!(%content_type, at, "set field");
        pointer_of(&signed)
    }

    pub async fn set_username(&self, name: &str) -> SdkResult<Pointer> {
        self.set_field(ContentType::USERNAME, encode_text(name)?)
            .await
    }

    pub async fn username(&self) -> SdkResult<Option<String>> {
        let item = self
            .queries
            .crdt()
            .current(&self.system(), ContentType::USERNAME)
            .await?;
        Ok(item.and_then(|item| decode_text(&item.value)))
    }

    /// Record the relays this identity publishes to and backfills from.
    pub async fn set_servers(&self, servers: &[String]) -> SdkResult<Pointer> {
        self.set_field(ContentType::SERVER, encode_servers(servers)?)
            .await
    }

    /// Tombstone one of this identity's events.
    pub async fn delete(&self, target: &Pointer) -> SdkResult<Pointer> {
        if target.system != self.system() {
            return Err(SdkError::InvalidOperation(format!(
                "{target} belongs to another identity"
            )));
        }
        let signed = self
            .log
            .load_event(target)
            .await?
            .ok_or_else(|| SdkError::InvalidOperation(format!("{target} is not stored")))?;
        let event = signed
            .decode_event()
            .map_err(|e| SdkError::Internal(e.to_string()))?;
        if event.content_type == ContentType::DELETE {
            return Err(SdkError::InvalidOperation(format!("{target} is a delete")));
        }
        let delete = Delete {
            process: event.process,
            logical_clock: event.logical_clock,
            content_type: event.content_type,
            indices: event.indices,
            unix_milliseconds: event.lww_element.map(|lww| lww.unix_milliseconds),
        };
        let content = delete
            .encode()
            .map_err(|e| SdkError::Internal(e.to_string()))?;
        let signed = self.author(ContentType::DELETE, content, None).await?;
        info!(%target, "deleted event");
        pointer_of(&signed)
    }

    /// Split `data` into blob sections of at most `chunk_size` bytes and
    /// author one event per section. The returned ranges reassemble it
    /// through [`poly_query::QueryBlob::query`].
    pub async fn publish_blob(
        &self,
        data: &[u8],
        chunk_size: usize,
    ) -> SdkResult<(Process, Vec<Range>)> {
        if data.is_empty() {
            return Err(SdkError::InvalidOperation("empty blob".into()));
        }
        let mut clocks = Vec::new();
        for chunk in data.chunks(chunk_size.max(1)) {
            let signed = self
                .author(ContentType::BLOB_SECTION, chunk.to_vec(), None)
                .await?;
            let pointer = pointer_of(&signed)?;
            ranges::insert(&mut clocks, pointer.logical_clock);
        }
        Ok((self.process, clocks))
    }

    /// Pull `system`'s events from its servers. A complete backfill of this
    /// identity marks its store ready.
    pub async fn backfill(
        &self,
        system: &PublicKey,
        cancel: &CancelToken,
    ) -> SdkResult<SyncReport> {
        let report = self.sync.backfill(system, &SyncScope::All, cancel).await?;
        if *system == self.system() && report.complete {
            self.mark_ready().await?;
        }
        Ok(report)
    }

    /// Push this identity's events to its servers.
    pub async fn publish(&self, cancel: &CancelToken) -> SdkResult<SyncReport> {
        Ok(self.sync.publish(&self.system(), cancel).await?)
    }

    pub async fn mark_ready(&self) -> SdkResult<()> {
        self.registry
            .set_store_ready(&self.system(), self.version)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("system", &self.system())
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

/// Encoding of text fields such as usernames and descriptions.
pub fn encode_text(text: &str) -> SdkResult<Vec<u8>> {
    bincode::serialize(text).map_err(|e| SdkError::Internal(format!("text field: {e}")))
}

pub fn decode_text(bytes: &[u8]) -> Option<String> {
    bincode::deserialize(bytes).ok()
}

fn pointer_of(signed: &SignedEvent) -> SdkResult<Pointer> {
    signed
        .decode_event()
        .map(|event| event.pointer())
        .map_err(|e| SdkError::Internal(e.to_string()))
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
