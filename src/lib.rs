//! Session-continuity runtime for the Quest Arena game client.
//!
//! A tab arbitrates leadership over a shared storage domain, keeps in sync
//! with the server over a push channel and a poll loop, and resumes the
//! player's exact progress after reloads and reconnects.

pub mod clock;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;
