//! Connection registry
//!
//! Process-wide table of live peer connections. The registry owns every
//! [`PeerConnection`](crate::peer::PeerConnection); drivers and the service
//! only hold `Arc` clones handed out by it.
//!
//! # Architecture
//!
//! ```text
//!                 Arc<ConnectionRegistry>
//!             ┌──────────────────────────────┐
//!             │ connections: HashMap<Id,     │
//!             │   Arc<PeerConnection>        │
//!             │ >                            │
//!             └──────────────┬───────────────┘
//!                            │
//!        ┌───────────────────┼────────────────────┐
//!        ▼                   ▼                    ▼
//!   register()         unregister(id)          all()
//!   (first offer)      close: negotiation,     (bulk shutdown)
//!                      pipeline, transport
//! ```
//!
//! # Teardown
//!
//! `unregister` closes the connection before it returns. Closing detaches the
//! pipeline under the connection's own lock, the same lock under which the
//! pipeline is attached, so no detection result is pushed after `unregister`
//! completes.

pub mod error;
pub mod id;
pub mod store;

pub use error::RegistryError;
pub use id::ConnectionId;
pub use store::ConnectionRegistry;
