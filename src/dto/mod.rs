/// Registration and token validation payloads.
pub mod auth;
/// Level content, submissions and activity payloads.
pub mod gameplay;
/// Push channel envelope and decoding.
pub mod push;
/// Authoritative session status payloads.
pub mod status;
