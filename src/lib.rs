//! Meeting-room session core.
//!
//! A client joins a room identified by a `123-456-789` style code, controls
//! its own camera, microphone and screen share, records locally, and keeps a
//! live roster of the other participants through a shared document store.

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod global;
pub mod media;
pub mod presence;
pub mod recorder;
pub mod room;
pub mod session;
