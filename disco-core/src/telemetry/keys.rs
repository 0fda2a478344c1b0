/// Span names and field keys for HTTP calls and event streams.
/// Keep these stable; log filters and dashboards match on them.
pub const SPAN_HTTP_REQUEST: &str = "http.request";
pub const SPAN_STREAM_SESSION: &str = "stream.session";

pub const KEY_HTTP_METHOD: &str = "http.method";
pub const KEY_HTTP_URL: &str = "http.url";
pub const KEY_HTTP_STATUS: &str = "http.status";

pub const KEY_STREAM_URL: &str = "stream.url";
pub const KEY_STREAM_EVENT: &str = "stream.event";
pub const KEY_STREAM_ATTEMPT: &str = "stream.attempt";

pub const KEY_ERROR_MESSAGE: &str = "error.message";
