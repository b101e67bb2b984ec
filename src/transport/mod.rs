mod http_transport;
mod retry_policy;

pub use http_transport::{cancellable, read_json, upstream_error_message, HttpTransport};
