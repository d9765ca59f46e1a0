//! # tgvc-music
//!
//! Voice-chat music playback core for Telegram group bots: per-chat
//! queues, call sessions, decode workers, vote-skip, idle reaping and
//! cached per-chat settings.
//!
//! ## Modules
//!
//! - [`audio`]: queue, call sessions, decode workers, idle machinery and
//!   the [`audio::player::PlaybackController`] that ties them together
//! - [`settings`] / [`cache`]: per-chat settings behind a TTL cache
//! - [`storage`]: JSON persistence for settings and play history
//! - [`sources`]: media extraction through `yt-dlp`
//! - [`bot`] / [`ui`]: the local command layer and its replies
//! - [`lease`]: single-instance guard

pub mod audio;
pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod lease;
pub mod permissions;
pub mod settings;
pub mod sources;
pub mod storage;
pub mod types;
pub mod ui;
