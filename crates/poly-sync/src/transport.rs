use std::sync::Arc;

use async_trait::async_trait;
use poly_protocol::{Events, RelayRequest, RelayResponse};
use poly_types::{ProcessRanges, PublicKey, SignedEvent};

use crate::error::SyncResult;

/// Connection to one relay.
///
/// Implementations provide [`RelayTransport::request`]; the typed calls are
/// built on top of it. Relays are untrusted, so every event that comes back
/// is verified by the event log before it is stored.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Base URL identifying the relay.
    fn url(&self) -> &str;

    async fn request(&self, request: RelayRequest) -> SyncResult<RelayResponse>;

    async fn ranges_for_system(&self, system: &PublicKey) -> SyncResult<Vec<ProcessRanges>> {
        let response = self
            .request(RelayRequest::RangesForSystem { system: *system })
            .await?;
        Ok(response.into_ranges()?)
    }

    async fn events_by_ranges(
        &self,
        system: &PublicKey,
        ranges: Vec<ProcessRanges>,
    ) -> SyncResult<Events> {
        let response = self
            .request(RelayRequest::EventsByRanges {
                system: *system,
                ranges,
            })
            .await?;
        Ok(response.into_events()?)
    }

    async fn head(&self, system: &PublicKey) -> SyncResult<Events> {
        let response = self.request(RelayRequest::Head { system: *system }).await?;
        Ok(response.into_events()?)
    }

    async fn explore(&self, cursor: Option<u64>, limit: u32) -> SyncResult<Events> {
        let response = self.request(RelayRequest::Explore { cursor, limit }).await?;
        Ok(response.into_events()?)
    }

    async fn search(&self, query: &str, cursor: Option<u64>, limit: u32) -> SyncResult<Events> {
        let response = self
            .request(RelayRequest::Search {
                query: query.to_string(),
                cursor,
                limit,
            })
            .await?;
        Ok(response.into_events()?)
    }

    async fn notifications(
        &self,
        system: &PublicKey,
        after: Option<u64>,
        limit: u32,
    ) -> SyncResult<Events> {
        let response = self
            .request(RelayRequest::Notifications {
                system: *system,
                after,
                limit,
            })
            .await?;
        Ok(response.into_events()?)
    }

    /// Push events to the relay. Returns how many it accepted as new.
    async fn post_events(&self, events: Vec<SignedEvent>) -> SyncResult<u32> {
        let response = self.request(RelayRequest::PostEvents { events }).await?;
        Ok(response.into_accepted()?)
    }
}

/// Opens transports by server URL.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> SyncResult<Arc<dyn RelayTransport>>;
}
