//! Cross-process object bridge over a single duplex byte stream.
//!
//! One process hosts objects; a peer process invokes methods on them through
//! small integer handles, passes objects of its own back, and receives thrown
//! exceptions as first-class values. Calls are synchronous and nest to any
//! depth by reentrant dispatch.
//!
//! # Crate Structure
//!
//! - [`wire`] — Tagged value model, message catalog, and the byte codec
//! - [`channel`] — Sessions: reference table, dispatch loop, TCP transport

/// Re-export wire types.
pub mod wire {
    pub use objlink_wire::*;
}

/// Re-export channel types.
pub mod channel {
    pub use objlink_channel::*;
}
