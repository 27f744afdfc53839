//! Core of a multi-guild voice music bot.
//!
//! Each voice session gets a [`player::Client`] driving a single-task
//! event loop that owns the queue, feeds encoded audio frames from an
//! ffmpeg-backed producer into a caller-provided sink, and reacts to
//! queue edits mid-stream. Tracks come from an extensible
//! [`extractor::Registry`] (YouTube scraping, Spotify matching, and a
//! youtube-dl fallback by default).

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod extractor;
pub mod player;
pub mod util;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use events::EventHooks;
pub use extractor::{builtin_registry, Registry, Track};
pub use player::{spawn, Client, Command, Queue};
