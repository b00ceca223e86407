/// Whole-record persistence of the player's credential.
pub mod credential;
/// Directory-backed storage domain.
pub mod file;
/// In-process storage domain shared between tabs.
pub mod memory;
/// Persisted record definitions.
pub mod models;
/// Identity-scoped progress snapshots.
pub mod progress;
/// Storage domain abstraction and JSON helpers.
pub mod storage;
