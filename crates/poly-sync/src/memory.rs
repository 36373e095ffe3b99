use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use poly_log::{EventLog, LogResult};
use poly_protocol::{Events, RelayRequest, RelayResponse};
use poly_store::InMemoryKeyValueStore;
use poly_types::{Pointer, ProcessRanges, PublicKey, SignedEvent};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::transport::{Connector, RelayTransport};

/// In-process relay.
///
/// Holds its events in its own [`EventLog`], so it verifies and
/// deduplicates exactly like a client does. Arrival order backs the paged
/// feed endpoints. Links attach related events to results, the way a real
/// relay returns the posts a reply references.
pub struct MemoryRelay {
    url: String,
    log: EventLog,
    arrivals: Mutex<Vec<Pointer>>,
    links: Mutex<HashMap<Pointer, Vec<Pointer>>>,
    offline: AtomicBool,
    page_limit: AtomicU32,
    requests: AtomicUsize,
}

impl MemoryRelay {
    pub fn new(url: &str) -> Self {
        let store = Arc::new(InMemoryKeyValueStore::new(format!("relay:{url}")));
        Self {
            url: url.to_string(),
            log: EventLog::new(store),
            arrivals: Mutex::new(Vec::new()),
            links: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            page_limit: AtomicU32::new(u32::MAX),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// While offline every request fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Cap on events returned by one `EventsByRanges` answer.
    pub fn set_page_limit(&self, limit: u32) {
        self.page_limit.store(limit.max(1), Ordering::SeqCst);
    }

    /// Requests served through the transport so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Return `related` alongside `result` whenever `result` is served.
    pub async fn link(&self, result: Pointer, related: Pointer) {
        self.links.lock().await.entry(result).or_default().push(related);
    }

    /// Store events as if clients had posted them. Returns how many were new.
    pub async fn publish(&self, events: &[SignedEvent]) -> LogResult<usize> {
        let report = self.log.save_batch(events).await?;
        self.arrivals.lock().await.extend(report.pointers);
        Ok(report.ingested)
    }

    /// Answer one request. Failures become [`RelayResponse::Error`].
    pub async fn handle(&self, request: RelayRequest) -> RelayResponse {
        match self.answer(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(relay = %self.url, error = %e, "relay request failed");
                RelayResponse::error(500, e.to_string())
            }
        }
    }

    async fn answer(&self, request: RelayRequest) -> LogResult<RelayResponse> {
        Ok(match request {
            RelayRequest::RangesForSystem { system } => RelayResponse::Ranges {
                ranges: self.log.ranges_for_system(&system).await?,
            },
            RelayRequest::EventsByRanges { system, ranges } => {
                RelayResponse::Events(self.events_by_ranges(&system, &ranges).await?)
            }
            RelayRequest::Head { system } => RelayResponse::Events(self.head(&system).await?),
            RelayRequest::Explore { cursor, limit } => {
                RelayResponse::Events(self.page_back(cursor, limit, |_| true).await?)
            }
            RelayRequest::Search {
                query,
                cursor,
                limit,
            } => RelayResponse::Events(
                self.page_back(cursor, limit, |event| {
                    String::from_utf8_lossy(&event.content).contains(query.as_str())
                })
                .await?,
            ),
            RelayRequest::Notifications {
                system,
                after,
                limit,
            } => RelayResponse::Events(self.notifications(&system, after, limit).await?),
            RelayRequest::PostEvents { events } => {
                let ingested = self.publish(&events).await?;
                RelayResponse::Accepted {
                    count: u32::try_from(ingested).unwrap_or(u32::MAX),
                }
            }
        })
    }

    async fn events_by_ranges(
        &self,
        system: &PublicKey,
        wanted: &[ProcessRanges],
    ) -> LogResult<Events> {
        let limit = self.page_limit.load(Ordering::SeqCst) as usize;
        let mut results = Vec::new();
        'outer: for process_ranges in wanted {
            for range in &process_ranges.ranges {
                let events = self
                    .log
                    .load_range(system, &process_ranges.process, *range)
                    .await?;
                for event in events {
                    if results.len() >= limit {
                        break 'outer;
                    }
                    results.push(event);
                }
            }
        }
        self.with_related(results, None).await
    }

    async fn head(&self, system: &PublicKey) -> LogResult<Events> {
        let mut results = Vec::new();
        for process_ranges in self.log.ranges_for_system(system).await? {
            let Some(last) = process_ranges.ranges.last() else {
                continue;
            };
            let pointer = Pointer::new(*system, process_ranges.process, last.high);
            if let Some(event) = self.log.load_event(&pointer).await? {
                results.push(event);
            }
        }
        self.with_related(results, None).await
    }

    /// Newest-first page of arrivals older than `cursor` that pass `filter`.
    async fn page_back(
        &self,
        cursor: Option<u64>,
        limit: u32,
        filter: impl Fn(&poly_types::Event) -> bool,
    ) -> LogResult<Events> {
        let arrivals = self.arrivals.lock().await.clone();
        let end = cursor.map_or(arrivals.len(), |c| (c as usize).min(arrivals.len()));
        let mut results = Vec::new();
        let mut oldest = None;
        for index in (0..end).rev() {
            if results.len() >= limit as usize {
                break;
            }
            let Some(signed) = self.log.load_event(&arrivals[index]).await? else {
                continue;
            };
            let Ok(event) = signed.decode_event() else {
                continue;
            };
            if filter(&event) {
                results.push(signed);
                oldest = Some(index as u64);
            }
        }
        self.with_related(results, oldest).await
    }

    /// Events by other identities whose content mentions `system`, oldest
    /// first, after arrival index `after`.
    async fn notifications(
        &self,
        system: &PublicKey,
        after: Option<u64>,
        limit: u32,
    ) -> LogResult<Events> {
        let arrivals = self.arrivals.lock().await.clone();
        let start = after.map_or(0, |a| a as usize + 1);
        let needle = system.as_bytes();
        let mut results = Vec::new();
        let mut newest = None;
        for (index, pointer) in arrivals.iter().enumerate().skip(start) {
            if results.len() >= limit as usize {
                break;
            }
            if pointer.system == *system {
                continue;
            }
            let Some(signed) = self.log.load_event(pointer).await? else {
                continue;
            };
            let Ok(event) = signed.decode_event() else {
                continue;
            };
            if event.content.windows(needle.len()).any(|w| w == needle) {
                results.push(signed);
                newest = Some(index as u64);
            }
        }
        self.with_related(results, newest).await
    }

    async fn with_related(
        &self,
        result_events: Vec<SignedEvent>,
        largest_index: Option<u64>,
    ) -> LogResult<Events> {
        let links = self.links.lock().await.clone();
        let mut served = BTreeSet::new();
        let mut linked = Vec::new();
        for signed in &result_events {
            if let Ok(event) = signed.decode_event() {
                let pointer = event.pointer();
                served.insert(pointer);
                linked.extend(links.get(&pointer).into_iter().flatten().copied());
            }
        }

        let mut related_events = Vec::new();
        for pointer in linked {
            if !served.insert(pointer) {
                continue;
            }
            if let Some(event) = self.log.load_event(&pointer).await? {
                related_events.push(event);
            }
        }

        Ok(Events {
            related_events,
            result_events,
            largest_index,
        })
    }
}

#[async_trait]
impl RelayTransport for MemoryRelay {
    fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, request: RelayRequest) -> SyncResult<RelayResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Network(format!("{} is unreachable", self.url)));
        }
        debug!(relay = %self.url, kind = poly_protocol::Frame::type_name(&request), "memory relay request");
        Ok(self.handle(request).await)
    }
}

impl std::fmt::Debug for MemoryRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRelay")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Connector resolving URLs to [`MemoryRelay`]s.
#[derive(Debug, Default, Clone)]
pub struct MemoryNetwork {
    relays: HashMap<String, Arc<MemoryRelay>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relay(mut self, relay: Arc<MemoryRelay>) -> Self {
        self.relays.insert(relay.url.clone(), relay);
        self
    }

    pub fn relay(&self, url: &str) -> Option<Arc<MemoryRelay>> {
        self.relays.get(url).cloned()
    }
}

impl Connector for MemoryNetwork {
    fn connect(&self, url: &str) -> SyncResult<Arc<dyn RelayTransport>> {
        match self.relays.get(url) {
            Some(relay) => Ok(Arc::clone(relay) as Arc<dyn RelayTransport>),
            None => Err(SyncError::Network(format!("no route to {url}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use poly_crypto::{sign_event, SigningKey};
    use poly_types::{ContentType, Event, Process, Range};

    use super::*;

    fn post(key: &SigningKey, process: Process, clock: u64, content: &[u8]) -> SignedEvent {
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

    #[tokio::test]
    async fn explore_pages_newest_first() {
        let relay = MemoryRelay::new("mem://a");
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let events: Vec<_> = (0..5).map(|c| post(&key, process, c, b"x")).collect();
        relay.publish(&events).await.unwrap();

        let first = relay.explore(None, 2).await.unwrap();
        assert_eq!(first.result_events, vec![events[4].clone(), events[3].clone()]);
        assert_eq!(first.largest_index, Some(3));

        let second = relay.explore(first.largest_index, 10).await.unwrap();
        assert_eq!(second.result_events.len(), 3);
        assert_eq!(second.result_events[0], events[2]);
    }

    #[tokio::test]
    async fn search_matches_content() {
        let relay = MemoryRelay::new("mem://a");
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        relay
            .publish(&[post(&key, process, 0, b"rust crabs"), post(&key, process, 1, b"go gophers")])
            .await
            .unwrap();
        let found = relay.search("crab", None, 10).await.unwrap();
        assert_eq!(found.result_events.len(), 1);
    }

    #[tokio::test]
    async fn notifications_skip_own_events() {
        let relay = MemoryRelay::new("mem://a");
        let alice = SigningKey::generate();
        let bob = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let mention = alice.system().as_bytes().to_vec();
        relay
            .publish(&[
                post(&alice, process, 0, &mention),
                post(&bob, process, 0, &mention),
                post(&bob, process, 1, b"unrelated"),
            ])
            .await
            .unwrap();
        let found = relay.notifications(&alice.system(), None, 10).await.unwrap();
        assert_eq!(found.result_events.len(), 1);
        assert_eq!(found.largest_index, Some(1));
        let later = relay
            .notifications(&alice.system(), found.largest_index, 10)
            .await
            .unwrap();
        assert!(later.result_events.is_empty());
    }

    #[tokio::test]
    async fn linked_events_come_back_as_related() {
        let relay = MemoryRelay::new("mem://a");
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let original = post(&key, process, 0, b"original");
        let reply = post(&key, process, 1, b"reply");
        relay.publish(&[original.clone(), reply.clone()]).await.unwrap();
        let reply_pointer = reply.decode_event().unwrap().pointer();
        let original_pointer = original.decode_event().unwrap().pointer();
        relay.link(reply_pointer, original_pointer).await;

        let events = relay
            .events_by_ranges(
                &key.system(),
                &vec![ProcessRanges {
                    process,
                    ranges: vec![Range::single(1)],
                }],
            )
            .await
            .unwrap();
        assert_eq!(events.result_events, vec![reply]);
        assert_eq!(events.related_events, vec![original]);
    }

    #[tokio::test]
    async fn page_limit_caps_range_answers() {
        let relay = MemoryRelay::new("mem://a");
        relay.set_page_limit(2);
        let key = SigningKey::generate();
        let process = Process::from_bytes([1; 16]);
        let events: Vec<_> = (0..5).map(|c| post(&key, process, c, b"x")).collect();
        relay.publish(&events).await.unwrap();
        let page = relay
            .events_by_ranges(
                &key.system(),
                &vec![ProcessRanges {
                    process,
                    ranges: vec![Range::new(0, 4)],
                }],
            )
            .await
            .unwrap();
        assert_eq!(page.result_events.len(), 2);
    }

    #[tokio::test]
    async fn offline_relay_fails_requests() {
        let relay = Arc::new(MemoryRelay::new("mem://a"));
        relay.set_offline(true);
        let network = MemoryNetwork::new().with_relay(Arc::clone(&relay));
        let transport = network.connect("mem://a").unwrap();
        let err = transport.head(&SigningKey::generate().system()).await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
        assert_eq!(relay.request_count(), 1);
        assert!(network.connect("mem://missing").is_err());
    }
}
