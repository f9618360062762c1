//! Transfer timing collected by transports.

use std::time::{Duration, SystemTime};

use crate::request::Request;
use crate::response::Response;

/// Where a transaction's response came from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchType {
    /// Not reported.
    #[default]
    Unknown,
    /// Loaded over the network.
    NetworkLoad,
    /// Pushed by the server.
    ServerPush,
    /// Served from a local cache.
    LocalCache,
}

/// Timing of one request/response exchange within a transfer.
///
/// A transfer which follows redirects has one transaction per hop.
#[derive(Debug, Clone, Default)]
pub struct TransactionMetrics {
    /// The request sent.
    pub request: Option<Request>,
    /// The response received.
    pub response: Option<Response>,
    /// When the fetch started.
    pub fetch_start: Option<SystemTime>,
    /// When name resolution started.
    pub domain_lookup_start: Option<SystemTime>,
    /// When name resolution finished.
    pub domain_lookup_end: Option<SystemTime>,
    /// When the connection attempt started.
    pub connect_start: Option<SystemTime>,
    /// When the TLS handshake started.
    pub secure_connection_start: Option<SystemTime>,
    /// When the TLS handshake finished.
    pub secure_connection_end: Option<SystemTime>,
    /// When the connection was established.
    pub connect_end: Option<SystemTime>,
    /// When the first request byte was sent.
    pub request_start: Option<SystemTime>,
    /// When the last request byte was sent.
    pub request_end: Option<SystemTime>,
    /// When the first response byte arrived.
    pub response_start: Option<SystemTime>,
    /// When the last response byte arrived.
    pub response_end: Option<SystemTime>,
    /// Negotiated protocol, such as `h2` or `http/1.1`.
    pub network_protocol_name: Option<String>,
    /// Whether the transaction went through a proxy.
    pub is_proxy_connection: bool,
    /// Whether an existing connection was reused.
    pub is_reused_connection: bool,
    /// Where the response came from.
    pub fetch_type: FetchType,
}

impl TransactionMetrics {
    /// Time from the start of the fetch to the last response byte.
    pub fn duration(&self) -> Option<Duration> {
        let start = self.fetch_start?;
        self.response_end?.duration_since(start).ok()
    }
}

/// Metrics for a whole transfer.
#[derive(Debug, Clone, Default)]
pub struct TaskMetrics {
    /// One entry per transaction, in order.
    pub transactions: Vec<TransactionMetrics>,
    /// When the transfer started.
    pub task_start: Option<SystemTime>,
    /// How long the transfer took.
    pub task_interval: Duration,
    /// Number of redirects followed.
    pub redirect_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_duration() {
        let start = SystemTime::UNIX_EPOCH;
        let metrics = TransactionMetrics {
            fetch_start: Some(start),
            response_end: Some(start + Duration::from_millis(250)),
            ..Default::default()
        };
        assert_eq!(metrics.duration(), Some(Duration::from_millis(250)));
        assert_eq!(TransactionMetrics::default().duration(), None);
    }
}
