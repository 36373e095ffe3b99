use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use poly_log::{EventLog, IngestReport};
use poly_protocol::Events;
use poly_types::{ranges, CancelToken, PublicKey, SignedEvent};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::negotiation::NegotiationEngine;
use crate::transport::{Connector, RelayTransport};
use crate::types::{FeedPage, HeadReport, ServerOutcome, ServerStatus, SyncReport, SyncScope};

/// Feed endpoints served page by page.
#[derive(Clone, Debug)]
enum FeedQuery {
    Explore,
    Search(String),
    Notifications(PublicKey),
}

/// Client side of the relay protocol for one identity store.
///
/// Every network answer goes through [`EventLog::save_batch`], so relays
/// never get to write anything that fails verification. Each server is
/// handled on its own: a relay that errors is recorded as failed in the
/// report and the remaining relays are still tried. Cancellation is checked
/// after every await and before every write.
pub struct Synchronizer {
    log: Arc<EventLog>,
    connector: Arc<dyn Connector>,
    config: SyncConfig,
}

impl Synchronizer {
    pub fn new(log: Arc<EventLog>, connector: Arc<dyn Connector>, config: SyncConfig) -> Self {
        Self {
            log,
            connector,
            config,
        }
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Servers recorded by `system`, or the configured defaults.
    pub async fn servers(&self, system: &PublicKey) -> SyncResult<Vec<String>> {
        let recorded = self.log.servers(system).await?;
        if recorded.is_empty() {
            Ok(self.config.default_servers.clone())
        } else {
            Ok(recorded)
        }
    }

    /// Persist a relay answer: related events first, so references from
    /// the results resolve as soon as the results land.
    pub async fn save_events(&self, events: &Events) -> SyncResult<IngestReport> {
        let mut report = self.log.save_batch(&events.related_events).await?;
        report.merge(self.log.save_batch(&events.result_events).await?);
        if report.rejected > 0 {
            warn!(rejected = report.rejected, "relay sent events that failed verification");
        }
        Ok(report)
    }

    /// Pull every event of `system` within `scope` that a server holds and
    /// the local log lacks.
    pub async fn backfill(
        &self,
        system: &PublicKey,
        scope: &SyncScope,
        cancel: &CancelToken,
    ) -> SyncResult<SyncReport> {
        cancel.ensure_active()?;
        let servers = self.servers(system).await?;
        cancel.ensure_active()?;

        let mut report = SyncReport::default();
        for url in servers {
            match self.backfill_from(system, &url, scope, cancel).await {
                Ok((ingested, rounds)) => {
                    report.ingested += ingested;
                    report.servers.push(ServerOutcome {
                        url,
                        status: ServerStatus::Synced { ingested, rounds },
                    });
                }
                Err(e) if e.is_remote() => {
                    warn!(server = %url, %system, error = %e, "backfill failed");
                    report.servers.push(ServerOutcome::failed(&url, e));
                }
                Err(e) => return Err(e),
            }
        }

        report.complete = self.feed_complete(system, cancel).await?;
        info!(
            %system,
            ingested = report.ingested,
            complete = report.complete,
            "backfill finished"
        );
        Ok(report)
    }

    async fn backfill_from(
        &self,
        system: &PublicKey,
        url: &str,
        scope: &SyncScope,
        cancel: &CancelToken,
    ) -> SyncResult<(usize, u32)> {
        let transport = self.connector.connect(url)?;
        let remote = transport.ranges_for_system(system).await?;
        cancel.ensure_active()?;

        let mut ingested = 0;
        let mut rounds = 0;
        while rounds < self.config.max_rounds {
            let local = self.log.ranges_for_system(system).await?;
            cancel.ensure_active()?;
            let wants = NegotiationEngine::compute_wants(
                &local,
                &remote,
                scope,
                u64::from(self.config.batch_size.max(1)),
            );
            if wants.is_empty() {
                break;
            }

            let events = transport.events_by_ranges(system, wants).await?;
            cancel.ensure_active()?;
            rounds += 1;

            let saved = self.save_events(&events).await?;
            debug!(server = %url, round = rounds, ingested = saved.ingested, "backfill round");
            if saved.ingested == 0 {
                break;
            }
            ingested += saved.ingested;
        }
        Ok((ingested, rounds))
    }

    /// Fetch every server's latest events for `system`, store them, and
    /// report the highest clock seen per process.
    pub async fn load_server_head(
        &self,
        system: &PublicKey,
        cancel: &CancelToken,
    ) -> SyncResult<HeadReport> {
        cancel.ensure_active()?;
        let servers = self.servers(system).await?;
        let mut report = HeadReport::default();

        for url in servers {
            cancel.ensure_active()?;
            let fetched = match self.connector.connect(&url) {
                Ok(transport) => transport.head(system).await,
                Err(e) => Err(e),
            };
            cancel.ensure_active()?;
            let events = match fetched {
                Ok(events) => events,
                Err(e) if e.is_remote() => {
                    warn!(server = %url, %system, error = %e, "head request failed");
                    report.servers.push(ServerOutcome::failed(&url, e));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let saved = self.save_events(&events).await?;
            for signed in &events.result_events {
                let Ok(event) = signed.decode_event() else {
                    continue;
                };
                if event.system != *system {
                    continue;
                }
                let head = report.heads.entry(event.process).or_insert(0);
                *head = (*head).max(event.logical_clock);
            }
            report.servers.push(ServerOutcome {
                url,
                status: ServerStatus::Synced {
                    ingested: saved.ingested,
                    rounds: 1,
                },
            });
        }
        Ok(report)
    }

    /// `true` when the local log holds every clock from zero up to each
    /// server-reported head. `false` when no server answered.
    pub async fn is_feed_complete(&self, system: &PublicKey) -> SyncResult<bool> {
        self.feed_complete(system, &CancelToken::never()).await
    }

    async fn feed_complete(&self, system: &PublicKey, cancel: &CancelToken) -> SyncResult<bool> {
        let head = self.load_server_head(system, cancel).await?;
        if head.servers.is_empty() || head.all_failed() {
            return Ok(false);
        }
        for (process, clock) in &head.heads {
            let held = self
                .log
                .load_process_state(system, process)
                .await?
                .map(|state| state.ranges)
                .unwrap_or_default();
            if !ranges::covers(&held, 0, *clock) {
                debug!(%system, %process, head = clock, "feed incomplete");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Recent events across the default servers, newest first.
    pub async fn explore(
        &self,
        cursors: &BTreeMap<String, u64>,
        limit: u32,
        cancel: &CancelToken,
    ) -> SyncResult<FeedPage> {
        let servers = self.config.default_servers.clone();
        self.feed(servers, &FeedQuery::Explore, cursors, limit, cancel)
            .await
    }

    pub async fn search(
        &self,
        query: &str,
        cursors: &BTreeMap<String, u64>,
        limit: u32,
        cancel: &CancelToken,
    ) -> SyncResult<FeedPage> {
        let servers = self.config.default_servers.clone();
        let query = FeedQuery::Search(query.to_string());
        self.feed(servers, &query, cursors, limit, cancel).await
    }

    /// Events from other identities that mention `system`, fetched from the
    /// servers `system` uses.
    pub async fn notifications(
        &self,
        system: &PublicKey,
        cursors: &BTreeMap<String, u64>,
        limit: u32,
        cancel: &CancelToken,
    ) -> SyncResult<FeedPage> {
        cancel.ensure_active()?;
        let servers = self.servers(system).await?;
        let query = FeedQuery::Notifications(*system);
        self.feed(servers, &query, cursors, limit, cancel).await
    }

    async fn feed(
        &self,
        servers: Vec<String>,
        query: &FeedQuery,
        cursors: &BTreeMap<String, u64>,
        limit: u32,
        cancel: &CancelToken,
    ) -> SyncResult<FeedPage> {
        let mut page = FeedPage::default();
        let mut seen = BTreeSet::new();

        for url in servers {
            cancel.ensure_active()?;
            let cursor = cursors.get(&url).copied();
            let fetched = match self.connector.connect(&url) {
                Ok(transport) => fetch_page(transport.as_ref(), query, cursor, limit).await,
                Err(e) => Err(e),
            };
            cancel.ensure_active()?;
            let events = match fetched {
                Ok(events) => events,
                Err(e) if e.is_remote() => {
                    warn!(server = %url, error = %e, "feed request failed");
                    page.servers.push(ServerOutcome::failed(&url, e));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let saved = self.save_events(&events).await?;
            for signed in &events.result_events {
                let Ok(event) = signed.decode_event() else {
                    continue;
                };
                let pointer = event.pointer();
                if !seen.insert(pointer) {
                    continue;
                }
                // The stored copy exists only if the event verified and is
                // not tombstoned.
                if let Some(stored) = self.log.load_event(&pointer).await? {
                    page.events.push(stored);
                }
            }
            if let Some(next) = events.largest_index {
                page.cursors.insert(url.clone(), next);
            }
            page.servers.push(ServerOutcome {
                url,
                status: ServerStatus::Synced {
                    ingested: saved.ingested,
                    rounds: 1,
                },
            });
        }
        Ok(page)
    }

    /// Push the events of `system` that the server at `url` lacks, in
    /// chunks of `batch_size`. Returns how many the server accepted.
    pub async fn backfill_server(
        &self,
        system: &PublicKey,
        url: &str,
        cancel: &CancelToken,
    ) -> SyncResult<usize> {
        cancel.ensure_active()?;
        let transport = self.connector.connect(url)?;
        let remote = transport.ranges_for_system(system).await?;
        cancel.ensure_active()?;
        let local = self.log.ranges_for_system(system).await?;
        let haves = NegotiationEngine::compute_haves(&local, &remote, u64::MAX);

        let mut outgoing: Vec<SignedEvent> = Vec::new();
        for process_ranges in &haves {
            for range in &process_ranges.ranges {
                outgoing.extend(
                    self.log
                        .load_range(system, &process_ranges.process, *range)
                        .await?,
                );
            }
        }

        let mut accepted = 0usize;
        for chunk in outgoing.chunks(self.config.batch_size.max(1) as usize) {
            cancel.ensure_active()?;
            accepted += transport.post_events(chunk.to_vec()).await? as usize;
        }
        info!(server = %url, %system, offered = outgoing.len(), accepted, "pushed events");
        Ok(accepted)
    }

    /// [`Synchronizer::backfill_server`] against every server of `system`.
    pub async fn publish(&self, system: &PublicKey, cancel: &CancelToken) -> SyncResult<SyncReport> {
        cancel.ensure_active()?;
        let mut report = SyncReport::default();
        for url in self.servers(system).await? {
            match self.backfill_server(system, &url, cancel).await {
                Ok(accepted) => {
                    report.ingested += accepted;
                    report.servers.push(ServerOutcome {
                        url,
                        status: ServerStatus::Synced {
                            ingested: accepted,
                            rounds: 1,
                        },
                    });
                }
                Err(e) if e.is_remote() => {
                    warn!(server = %url, %system, error = %e, "push failed");
                    report.servers.push(ServerOutcome::failed(&url, e));
                }
                Err(e) => return Err(e),
            }
        }
        report.complete = report.servers.iter().all(|s| !s.is_failed());
        Ok(report)
    }
}

async fn fetch_page(
    transport: &dyn RelayTransport,
    query: &FeedQuery,
    cursor: Option<u64>,
    limit: u32,
) -> SyncResult<Events> {
    match query {
        FeedQuery::Explore => transport.explore(cursor, limit).await,
        FeedQuery::Search(text) => transport.search(text, cursor, limit).await,
        FeedQuery::Notifications(system) => transport.notifications(system, cursor, limit).await,
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use poly_crypto::{sign_event, SigningKey};
    use poly_log::encode_servers;
    use poly_store::InMemoryKeyValueStore;
    use poly_types::{CancelContext, ContentType, Delete, Event, LwwElement, Process, Range};

    use super::*;
    use crate::memory::{MemoryNetwork, MemoryRelay};

    fn signed(key: &SigningKey, process: Process, clock: u64, content: &[u8]) -> SignedEvent {
        let event = Event {
            system: key.system(),
            process,
            logical_clock: clock,
            content_type: ContentType::POST,
            content: content.to_vec(),
            lww_element: None,
            indices: vec![],
        };
        sign_event(key, &event).unwrap()
    }

    fn pointer_of(signed: &SignedEvent) -> poly_types::Pointer {
        signed.decode_event().unwrap().pointer()
    }

    fn local_log() -> Arc<EventLog> {
        Arc::new(EventLog::new(Arc::new(InMemoryKeyValueStore::new("local"))))
    }

    fn config(servers: &[&str], batch_size: u32) -> SyncConfig {
        SyncConfig {
            default_servers: servers.iter().map(|s| s.to_string()).collect(),
            batch_size,
            ..SyncConfig::offline()
        }
    }

    fn synchronizer(network: MemoryNetwork, config: SyncConfig) -> Synchronizer {
        Synchronizer::new(local_log(), Arc::new(network), config)
    }

    #[tokio::test]
    async fn backfill_pages_until_caught_up() {
        let relay = Arc::new(MemoryRelay::new("mem://a"));
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let events: Vec<_> = (0..10).map(|c| signed(&key, process, c, b"post")).collect();
        relay.publish(&events).await.unwrap();

        let sync = synchronizer(
            MemoryNetwork::new().with_relay(relay),
            config(&["mem://a"], 4),
        );
        let report = sync
            .backfill(&key.system(), &SyncScope::All, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(report.ingested, 10);
        assert!(report.complete);
        assert_eq!(
            report.servers[0].status,
            ServerStatus::Synced { ingested: 10, rounds: 3 }
        );
        let held = sync.log().ranges_for_system(&key.system()).await.unwrap();
        assert_eq!(held[0].ranges, vec![Range::new(0, 9)]);
    }

    #[tokio::test]
    async fn relay_page_limit_needs_more_rounds() {
        let relay = Arc::new(MemoryRelay::new("mem://a"));
        relay.set_page_limit(3);
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let events: Vec<_> = (0..7).map(|c| signed(&key, process, c, b"post")).collect();
        relay.publish(&events).await.unwrap();

        let sync = synchronizer(
            MemoryNetwork::new().with_relay(relay),
            config(&["mem://a"], 100),
        );
        let report = sync
            .backfill(&key.system(), &SyncScope::All, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(report.ingested, 7);
        assert_eq!(
            report.servers[0].status,
            ServerStatus::Synced { ingested: 7, rounds: 3 }
        );
    }

    #[tokio::test]
    async fn related_events_land_with_results() {
        let relay = Arc::new(MemoryRelay::new("mem://a"));
        let alice = SigningKey::generate();
        let bob = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let original = signed(&bob, process, 0, b"original");
        let reply = signed(&alice, process, 0, b"reply");
        relay.publish(&[original.clone(), reply.clone()]).await.unwrap();
        relay.link(pointer_of(&reply), pointer_of(&original)).await;

        let sync = synchronizer(
            MemoryNetwork::new().with_relay(relay),
            config(&["mem://a"], 10),
        );
        let report = sync
            .backfill(&alice.system(), &SyncScope::All, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(report.ingested, 2);
        let stored = sync.log().load_event(&pointer_of(&original)).await.unwrap();
        assert_eq!(stored, Some(original));
    }

    #[tokio::test]
    async fn failing_server_does_not_stop_the_others() {
        let down = Arc::new(MemoryRelay::new("mem://down"));
        down.set_offline(true);
        let up = Arc::new(MemoryRelay::new("mem://up"));
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        up.publish(&[signed(&key, process, 0, b"hi")]).await.unwrap();

        let sync = synchronizer(
            MemoryNetwork::new().with_relay(down).with_relay(up),
            config(&["mem://down", "mem://missing", "mem://up"], 10),
        );
        let report = sync
            .backfill(&key.system(), &SyncScope::All, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.ingested, 1);
        assert!(report.complete);
    }

    #[tokio::test]
    async fn cancelled_backfill_writes_nothing() {
        let relay = Arc::new(MemoryRelay::new("mem://a"));
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        relay.publish(&[signed(&key, process, 0, b"hi")]).await.unwrap();

        let sync = synchronizer(
            MemoryNetwork::new().with_relay(Arc::clone(&relay)),
            config(&["mem://a"], 10),
        );
        let ctx = CancelContext::new();
        ctx.cancel();
        let err = sync
            .backfill(&key.system(), &SyncScope::All, &ctx.token())
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(relay.request_count(), 0);
        assert!(sync.log().ranges_for_system(&key.system()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scoped_backfill_pulls_one_process() {
        let relay = Arc::new(MemoryRelay::new("mem://a"));
        let key = SigningKey::generate();
        let phone = Process::from_bytes([1; 16]);
        let laptop = Process::from_bytes([2; 16]);
        let events: Vec<_> = (0..4)
            .map(|c| signed(&key, phone, c, b"p"))
            .chain((0..4).map(|c| signed(&key, laptop, c, b"l")))
            .collect();
        relay.publish(&events).await.unwrap();

        let sync = synchronizer(
            MemoryNetwork::new().with_relay(relay),
            config(&["mem://a"], 10),
        );
        let scope = SyncScope::Process {
            process: laptop,
            range: Some(Range::new(1, 2)),
        };
        let report = sync
            .backfill(&key.system(), &scope, &CancelToken::never())
            .await
            .unwrap();

        // Head events fetched for the completeness check are not counted.
        assert_eq!(report.ingested, 2);
        assert!(!report.complete);
        let laptop_state = sync
            .log()
            .load_process_state(&key.system(), &laptop)
            .await
            .unwrap()
            .unwrap();
        assert!(ranges::covers(&laptop_state.ranges, 1, 2));
        assert!(!ranges::contains(&laptop_state.ranges, 0));
    }

    #[tokio::test]
    async fn feed_completeness_tracks_server_head() {
        let relay = Arc::new(MemoryRelay::new("mem://a"));
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let events: Vec<_> = (0..3).map(|c| signed(&key, process, c, b"x")).collect();
        relay.publish(&events).await.unwrap();

        let sync = synchronizer(
            MemoryNetwork::new().with_relay(Arc::clone(&relay)),
            config(&["mem://a"], 10),
        );
        assert!(!sync.is_feed_complete(&key.system()).await.unwrap());

        sync.backfill(&key.system(), &SyncScope::All, &CancelToken::never())
            .await
            .unwrap();
        assert!(sync.is_feed_complete(&key.system()).await.unwrap());

        relay.set_offline(true);
        assert!(!sync.is_feed_complete(&key.system()).await.unwrap());
    }

    #[tokio::test]
    async fn head_reports_highest_clock_per_process() {
        let a = Arc::new(MemoryRelay::new("mem://a"));
        let b = Arc::new(MemoryRelay::new("mem://b"));
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let events: Vec<_> = (0..5).map(|c| signed(&key, process, c, b"x")).collect();
        a.publish(&events[..2]).await.unwrap();
        b.publish(&events).await.unwrap();

        let sync = synchronizer(
            MemoryNetwork::new().with_relay(a).with_relay(b),
            config(&["mem://a", "mem://b"], 10),
        );
        let head = sync
            .load_server_head(&key.system(), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(head.heads.get(&process), Some(&4));
        assert_eq!(head.servers.len(), 2);
    }

    #[tokio::test]
    async fn recorded_servers_override_defaults() {
        let key = SigningKey::generate();
        let sync = synchronizer(MemoryNetwork::new(), config(&["mem://default"], 10));
        assert_eq!(sync.servers(&key.system()).await.unwrap(), vec!["mem://default"]);

        let servers = vec!["mem://own".to_string()];
        let value = encode_servers(&servers).unwrap();
        sync.log()
            .author(
                &key,
                &Process::from_bytes([1; 16]),
                ContentType::SERVER,
                value.clone(),
                Some(LwwElement::new(value, 10)),
            )
            .await
            .unwrap();
        assert_eq!(sync.servers(&key.system()).await.unwrap(), servers);
    }

    #[tokio::test]
    async fn explore_dedupes_across_servers() {
        let a = Arc::new(MemoryRelay::new("mem://a"));
        let b = Arc::new(MemoryRelay::new("mem://b"));
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let shared = signed(&key, process, 0, b"shared");
        let only_b = signed(&key, process, 1, b"only b");
        a.publish(&[shared.clone()]).await.unwrap();
        b.publish(&[shared.clone(), only_b.clone()]).await.unwrap();

        let sync = synchronizer(
            MemoryNetwork::new().with_relay(a).with_relay(b),
            config(&["mem://a", "mem://b"], 10),
        );
        let page = sync
            .explore(&BTreeMap::new(), 10, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.cursors.get("mem://b"), Some(&0));
        assert!(page.servers.iter().all(|s| !s.is_failed()));

        let next = sync
            .explore(&page.cursors, 10, &CancelToken::never())
            .await
            .unwrap();
        assert!(next.events.is_empty());
    }

    #[tokio::test]
    async fn feeds_hide_deleted_events() {
        let relay = Arc::new(MemoryRelay::new("mem://a"));
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let post = signed(&key, process, 0, b"regret");
        let target = post.decode_event().unwrap();
        let delete = Delete {
            process,
            logical_clock: 0,
            content_type: ContentType::POST,
            indices: vec![],
            unix_milliseconds: None,
        };
        let tombstone = sign_event(
            &key,
            &Event {
                system: key.system(),
                process,
                logical_clock: 1,
                content_type: ContentType::DELETE,
                content: delete.encode().unwrap(),
                lww_element: None,
                indices: vec![],
            },
        )
        .unwrap();
        relay.publish(&[post]).await.unwrap();

        let sync = synchronizer(
            MemoryNetwork::new().with_relay(relay),
            config(&["mem://a"], 10),
        );
        sync.log().save(&tombstone).await.unwrap();

        let page = sync
            .search("regret", &BTreeMap::new(), 10, &CancelToken::never())
            .await
            .unwrap();
        assert!(page.events.is_empty());
        assert!(sync.log().is_deleted(&target.pointer()).await.unwrap());
    }

    #[tokio::test]
    async fn notifications_use_identity_servers() {
        let relay = Arc::new(MemoryRelay::new("mem://a"));
        let alice = SigningKey::generate();
        let bob = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        relay
            .publish(&[signed(&bob, process, 0, alice.system().as_bytes())])
            .await
            .unwrap();

        let sync = synchronizer(
            MemoryNetwork::new().with_relay(relay),
            config(&["mem://a"], 10),
        );
        let page = sync
            .notifications(&alice.system(), &BTreeMap::new(), 10, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.cursors.get("mem://a"), Some(&0));
    }

    #[tokio::test]
    async fn push_sends_only_what_the_server_lacks() {
        let relay = Arc::new(MemoryRelay::new("mem://a"));
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let sync = synchronizer(
            MemoryNetwork::new().with_relay(Arc::clone(&relay)),
            config(&["mem://a"], 2),
        );
        let mut authored = Vec::new();
        for n in 0..5u8 {
            authored.push(
                sync.log()
                    .author(&key, &process, ContentType::POST, vec![n], None)
                    .await
                    .unwrap(),
            );
        }
        relay.publish(&authored[..2]).await.unwrap();

        let accepted = sync
            .backfill_server(&key.system(), "mem://a", &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(accepted, 3);
        let held = relay.log().ranges_for_system(&key.system()).await.unwrap();
        assert_eq!(held[0].ranges, vec![Range::new(0, 4)]);

        let again = sync
            .publish(&key.system(), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(again.ingested, 0);
        assert!(again.complete);
    }

    /// Relay whose ranges answer contains an inverted range.
    struct InvertedRanges;

    #[async_trait::async_trait]
    impl RelayTransport for InvertedRanges {
        fn url(&self) -> &str {
            "mem://inverted"
        }

        async fn request(
            &self,
            request: poly_protocol::RelayRequest,
        ) -> SyncResult<poly_protocol::RelayResponse> {
            match request {
                poly_protocol::RelayRequest::RangesForSystem { .. } => {
                    Ok(poly_protocol::RelayResponse::Ranges {
                        ranges: vec![poly_types::ProcessRanges {
                            process: Process::from_bytes([9; 16]),
                            ranges: vec![Range { low: 5, high: 2 }],
                        }],
                    })
                }
                _ => Ok(poly_protocol::RelayResponse::Events(Events::default())),
            }
        }
    }

    struct WithInverted(MemoryNetwork);

    impl Connector for WithInverted {
        fn connect(&self, url: &str) -> SyncResult<Arc<dyn RelayTransport>> {
            if url == "mem://inverted" {
                Ok(Arc::new(InvertedRanges))
            } else {
                self.0.connect(url)
            }
        }
    }

    #[tokio::test]
    async fn inverted_ranges_fail_only_that_server() {
        let relay = Arc::new(MemoryRelay::new("mem://a"));
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        relay
            .publish(&[signed(&key, process, 0, b"post")])
            .await
            .unwrap();

        let sync = Synchronizer::new(
            local_log(),
            Arc::new(WithInverted(MemoryNetwork::new().with_relay(relay))),
            config(&["mem://inverted", "mem://a"], 8),
        );
        let report = sync
            .backfill(&key.system(), &SyncScope::All, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(report.ingested, 1);
        let failed: Vec<_> = report.failures().map(|s| s.url.as_str()).collect();
        assert_eq!(failed, vec!["mem://inverted"]);
        assert!(matches!(
            report.servers[1].status,
            ServerStatus::Synced { ingested: 1, .. }
        ));

        let pushed = sync
            .backfill_server(&key.system(), "mem://inverted", &CancelToken::never())
            .await;
        assert!(matches!(pushed, Err(e) if e.is_remote()));
    }
}
