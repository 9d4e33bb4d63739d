//! Signaling server and detection service
//!
//! ```text
//!   phone ──WebSocket──► SignalingServer ──► SignalingRelay ◄── DetectionService
//!          {"join":..}     (role: sender)      session "s1"      (role: receiver)
//!          {"offer":..} ─────────────────────────────────────►  PeerSession
//!          {"answer":..} ◄─────────────────────────────────────   │
//!                                                                 ▼
//!   phone ◄══ side channel: {"seq":n,"detections":[..]} ══  FramePipeline
//! ```

pub mod config;
pub mod listener;
pub mod service;

pub use config::ServerConfig;
pub use listener::SignalingServer;
pub use service::DetectionService;
