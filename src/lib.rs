//! OneVoice - video dubbing client
//!
//! Submits a video (an MP4 upload or a YouTube URL) to the OneVoice dubbing
//! service, tracks the multi-stage backend job through speech-to-text,
//! translation and speech synthesis, then retrieves the dubbed video and
//! collects a rating.

pub mod cli;
pub mod client;
pub mod config;
pub mod display;
pub mod error;
pub mod feedback;
pub mod progress;
pub mod retry;
pub mod submission;
pub mod task;
pub mod tracker;
pub mod workflow;
