//! shotsub: review-media submission for a production-tracking service.
//!
//! The engine turns image sequences (or movies) into review movies by
//! driving an external ffmpeg binary and scraping its progress output; the
//! tracking module wraps the remote service behind a small port so the
//! submission workflow stays testable offline.

pub mod config;
pub mod engine;
pub mod tracking;
