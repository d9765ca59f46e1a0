//! # Audio Module
//!
//! Playback machinery for group voice chats.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Store
//! - One ordered queue per chat; the head is the track playing now
//! - Cap/duplicate checks live in the controller, force mode replaces the queue
//!
//! ### [`call`] - Call Sessions
//! - At most one [`call::CallSession`] per chat
//! - Settle delay after joining and bounded retries on "start media"
//!
//! ### [`drivers`] - Call Backends
//! - [`drivers::DryRunDriver`] for local runs
//! - [`drivers::BridgeDriver`] talking JSON lines to a sidecar process
//!
//! ### [`stream`] - Decode Workers
//! - Optional `ffmpeg` process per chat writing raw PCM to the cache dir
//!
//! ### [`idle`] - Inactivity
//! - Per-chat one-shot timers plus a global jittered sweep
//!
//! ### [`player`] - Playback Controller
//! - `request_play`, `advance`, `vote_skip`, `stop`, `pause`, `resume`
//! - Loop modes, autoplay, drain mode and operator tooling
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! # async fn example(controller: tgvc_music::audio::player::PlaybackController) {
//! use tgvc_music::types::{ChatId, UserId};
//!
//! let chat = ChatId(-1001234567890);
//! let user = UserId(42);
//!
//! controller.play_query(chat, user, "never gonna give you up", false, false).await.ok();
//! controller.vote_skip(chat, user).await.ok();
//! controller.stop(chat).await;
//! # }
//! ```

pub mod call;
pub mod drivers;
pub mod idle;
pub mod player;
pub mod queue;
pub mod stream;
