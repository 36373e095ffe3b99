use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use poly_types::{ranges, ProcessRanges, PublicKey, SignedEvent};

use crate::endpoint::endpoints;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Events returned by a relay.
///
/// `result_events` answer the request directly; `related_events` are the
/// context they reference and must be persisted first. `largest_index` is a
/// relay-side cursor for paged endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Events {
    pub related_events: Vec<SignedEvent>,
    pub result_events: Vec<SignedEvent>,
    pub largest_index: Option<u64>,
}

impl Events {
    pub fn results(result_events: Vec<SignedEvent>) -> Self {
        Self {
            result_events,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.related_events.len() + self.result_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.related_events.is_empty() && self.result_events.is_empty()
    }
}

/// Requests a client sends to a relay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayRequest {
    /// Clocks the relay holds, per process of `system`.
    RangesForSystem { system: PublicKey },
    /// The events of `system` at the given clocks.
    EventsByRanges {
        system: PublicKey,
        ranges: Vec<ProcessRanges>,
    },
    /// The latest event of every process of `system`.
    Head { system: PublicKey },
    /// Recent events across all systems, newest first, older than `cursor`.
    Explore { cursor: Option<u64>, limit: u32 },
    Search {
        query: String,
        cursor: Option<u64>,
        limit: u32,
    },
    /// Events that mention `system`, after `after`.
    Notifications {
        system: PublicKey,
        after: Option<u64>,
        limit: u32,
    },
    /// Events pushed from the client.
    PostEvents { events: Vec<SignedEvent> },
}

/// Responses a relay sends back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayResponse {
    Ranges { ranges: Vec<ProcessRanges> },
    Events(Events),
    Accepted { count: u32 },
    Error { code: u32, message: String },
}

/// A message that travels in a frame.
pub trait Frame: Serialize + DeserializeOwned {
    fn type_tag(&self) -> u8;
    fn type_name(&self) -> &'static str;
}

impl RelayRequest {
    /// HTTP path that serves this request.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::RangesForSystem { .. } => endpoints::RANGES,
            Self::EventsByRanges { .. } => endpoints::EVENTS,
            Self::Head { .. } => endpoints::HEAD,
            Self::Explore { .. } => endpoints::EXPLORE,
            Self::Search { .. } => endpoints::SEARCH,
            Self::Notifications { .. } => endpoints::NOTIFICATIONS,
            Self::PostEvents { .. } => endpoints::POST_EVENTS,
        }
    }
}

impl Frame for RelayRequest {
    fn type_tag(&self) -> u8 {
        match self {
            Self::RangesForSystem { .. } => 1,
            Self::EventsByRanges { .. } => 2,
            Self::Head { .. } => 3,
            Self::Explore { .. } => 4,
            Self::Search { .. } => 5,
            Self::Notifications { .. } => 6,
            Self::PostEvents { .. } => 7,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::RangesForSystem { .. } => "RangesForSystem",
            Self::EventsByRanges { .. } => "EventsByRanges",
            Self::Head { .. } => "Head",
            Self::Explore { .. } => "Explore",
            Self::Search { .. } => "Search",
            Self::Notifications { .. } => "Notifications",
            Self::PostEvents { .. } => "PostEvents",
        }
    }
}

impl Frame for RelayResponse {
    fn type_tag(&self) -> u8 {
        match self {
            Self::Ranges { .. } => 64,
            Self::Events(_) => 65,
            Self::Accepted { .. } => 66,
            Self::Error { .. } => 255,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Ranges { .. } => "Ranges",
            Self::Events(_) => "Events",
            Self::Accepted { .. } => "Accepted",
            Self::Error { .. } => "Error",
        }
    }
}

impl RelayResponse {
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// The ranges of a `Ranges` answer, normalized: one entry per process,
    /// each sorted and coalesced. An inverted range rejects the answer.
    pub fn into_ranges(self) -> crate::ProtocolResult<Vec<ProcessRanges>> {
        match self {
            Self::Ranges { ranges } => normalize_process_ranges(ranges),
            other => Err(other.unexpected("Ranges")),
        }
    }

    pub fn into_events(self) -> crate::ProtocolResult<Events> {
        match self {
            Self::Events(events) => Ok(events),
            other => Err(other.unexpected("Events")),
        }
    }

    pub fn into_accepted(self) -> crate::ProtocolResult<u32> {
        match self {
            Self::Accepted { count } => Ok(count),
            other => Err(other.unexpected("Accepted")),
        }
    }

    fn unexpected(self, expected: &'static str) -> crate::ProtocolError {
        match self {
            Self::Error { code, message } => crate::ProtocolError::RemoteError { code, message },
            other => crate::ProtocolError::UnexpectedResponse {
                expected,
                got: other.type_name(),
            },
        }
    }
}

fn normalize_process_ranges(
    raw: Vec<ProcessRanges>,
) -> crate::ProtocolResult<Vec<ProcessRanges>> {
    let mut merged: Vec<ProcessRanges> = Vec::with_capacity(raw.len());
    for entry in raw {
        match merged.iter_mut().find(|p| p.process == entry.process) {
            Some(existing) => existing.ranges.extend(entry.ranges),
            None => merged.push(entry),
        }
    }
    for entry in &mut merged {
        let ranges = std::mem::take(&mut entry.ranges);
        entry.ranges = ranges::normalize(ranges).ok_or_else(|| {
            crate::ProtocolError::MalformedResponse(format!(
                "inverted range for process {}",
                entry.process
            ))
        })?;
    }
    merged.retain(|p| !p.ranges.is_empty());
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use poly_types::{Process, Range};

    use super::*;
    use crate::ProtocolError;

    #[test]
    fn error_response_surfaces_as_remote_error() {
        let err = RelayResponse::error(503, "overloaded").into_events().unwrap_err();
        assert_eq!(
            err,
            ProtocolError::RemoteError {
                code: 503,
                message: "overloaded".into()
            }
        );
    }

    #[test]
    fn ranges_answer_is_normalized() {
        let process = Process::from_bytes([3; 16]);
        let answer = RelayResponse::Ranges {
            ranges: vec![
                ProcessRanges {
                    process,
                    ranges: vec![Range::new(4, 6), Range::new(0, 1)],
                },
                ProcessRanges {
                    process,
                    ranges: vec![Range::new(2, 3)],
                },
            ],
        };
        assert_eq!(
            answer.into_ranges().unwrap(),
            vec![ProcessRanges {
                process,
                ranges: vec![Range::new(0, 6)],
            }]
        );
    }

    #[test]
    fn inverted_range_is_malformed() {
        let answer = RelayResponse::Ranges {
            ranges: vec![ProcessRanges {
                process: Process::from_bytes([3; 16]),
                ranges: vec![Range { low: 5, high: 2 }],
            }],
        };
        assert!(matches!(
            answer.into_ranges().unwrap_err(),
            ProtocolError::MalformedResponse(_)
        ));
    }

    #[test]
    fn wrong_kind_is_unexpected() {
        let err = RelayResponse::Accepted { count: 1 }.into_ranges().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnexpectedResponse {
                expected: "Ranges",
                got: "Accepted"
            }
        ));
    }

    #[test]
    fn events_len_counts_both_lists() {
        let signed = SignedEvent::new(vec![1], vec![2]);
        let events = Events {
            related_events: vec![signed.clone()],
            result_events: vec![signed.clone(), signed],
            largest_index: Some(4),
        };
        assert_eq!(events.len(), 3);
        assert!(!events.is_empty());
        assert!(Events::default().is_empty());
    }

    #[test]
    fn request_endpoints_follow_kind() {
        let system = PublicKey::from_bytes([1; 32]);
        assert_eq!(RelayRequest::Head { system }.endpoint(), endpoints::HEAD);
        assert_eq!(
            RelayRequest::PostEvents { events: vec![] }.endpoint(),
            endpoints::POST_EVENTS
        );
    }
}
