//! Protocol constants shared by the HTTP backend and channel sockets.

/// Header names sent with backend requests.
pub struct Headers;

impl Headers {
    /// Legitimacy marker the backend requires on identity calls.
    pub const REQUESTED_WITH: &'static str = "X-Requested-With";

    /// Value paired with [`Headers::REQUESTED_WITH`].
    pub const REQUESTED_WITH_VALUE: &'static str = "XMLHttpRequest";
}

/// Channel liveness frames. These travel outside the envelope format.
pub struct Liveness;

impl Liveness {
    pub const PING: &'static str = "ping";
    pub const PONG: &'static str = "pong";
}

/// Query parameter carrying the bearer token on channel URLs.
pub const TOKEN_QUERY_PARAM: &str = "token";
