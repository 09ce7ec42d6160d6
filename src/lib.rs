#![forbid(unsafe_code)]

//! Server-side and local-state core of the reelfront browsing UI.

pub mod config;
pub mod logging;
pub mod media;
pub mod sync;
pub mod upstream;
pub mod views;
pub mod watch_state;
