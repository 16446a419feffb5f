//! Fluffel: behavior controller for an animated desktop companion.
//!
//! The companion idles, gets bored, talks when clicked and plays music.
//! Everything it does is decided here and expressed as presentation
//! commands for whatever renders it.
//!
//! # Architecture
//!
//! - **Scene** ([`scene::CompanionScene`]): synchronous core owning the
//!   entity, activity clock, boredom detector, speech arbiter, music player
//!   and timer queue
//! - **Runtime** ([`controller::CompanionRuntime`]): tokio actor serializing
//!   commands, ticks, timer deadlines and async completions into the scene
//! - **Audio**: `symphonia` decoding and `cpal` output streams, `reqwest`
//!   fetch of remote resources
//! - **Voice**: optional cloud speech synthesis for spoken lines
//! - **Host**: versioned JSON envelopes over stdin/stdout for native shells

pub mod activity;
pub mod audio;
pub mod boredom;
pub mod config;
pub mod controller;
pub mod dialogue;
pub mod entity;
pub mod error;
pub mod host;
pub mod music;
pub mod runtime;
pub mod scene;
pub mod speech;
pub mod startup;
pub mod test_utils;
pub mod timer;
pub mod voice;

pub use config::CompanionConfig;
pub use controller::{CompanionHandle, CompanionRuntime, RuntimeParts};
pub use entity::{Avatar, AvatarCommand, EntityMode, MovementDirection, Point};
pub use error::{CompanionError, Result};
pub use music::AudioResource;
pub use runtime::{CompanionEvent, EventBus};
pub use scene::{CompanionScene, CompanionStatus, PointerButton, ScenePorts};
