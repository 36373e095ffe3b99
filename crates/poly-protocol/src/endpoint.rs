/// HTTP endpoint paths served by a relay. Every endpoint takes a POST whose
/// body is an encoded [`RelayRequest`](crate::RelayRequest) and answers with
/// an encoded [`RelayResponse`](crate::RelayResponse).
pub mod endpoints {
    pub const RANGES: &str = "/v1/ranges";
    pub const EVENTS: &str = "/v1/events";
    pub const HEAD: &str = "/v1/head";
    pub const EXPLORE: &str = "/v1/explore";
    pub const SEARCH: &str = "/v1/search";
    pub const NOTIFICATIONS: &str = "/v1/notifications";
    pub const POST_EVENTS: &str = "/v1/post";
}

/// Content type used for encoded request and response bodies.
pub const BODY_CONTENT_TYPE: &str = "application/octet-stream";
