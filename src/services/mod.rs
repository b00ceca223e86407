/// Server endpoint abstraction and error classification.
pub mod api;
/// Reconnect delays and failure thresholds.
pub mod backoff;
/// Push channel lifecycle and reconnect policy.
pub mod connection;
/// Events reported by background components.
pub mod events;
/// HTTP implementation of the server API.
pub mod http_api;
/// Periodic authoritative status checks.
pub mod polling;
/// Advisory leader election between tabs.
pub mod tab_arbiter;
/// Cancellable recurring tasks.
pub mod task;
#[cfg(test)]
pub mod testing;
/// Push channel transport and its WebSocket implementation.
pub mod transport;
