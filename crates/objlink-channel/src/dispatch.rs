//! Handler seams: what the application plugs into a session.
//!
//! `Dispatch` is the shape of an exposed object; `SpecialDispatch` covers
//! out-of-band operations addressed by a small id instead of a method name.
//! Handlers receive the live `Endpoint` so they can call back into the peer
//! while their own call is still on the stack.

use std::sync::Arc;

use objlink_wire::{ModuleRequest, Value};

use crate::endpoint::Endpoint;

/// Conventional special-dispatch id for property reads.
pub const GET_PROPERTY: u8 = 2;

/// Conventional special-dispatch id for property writes.
pub const SET_PROPERTY: u8 = 3;

/// What a handler produced: a value, or something it threw.
pub type Outcome = std::result::Result<Value, Thrown>;

/// An exception raised by a local handler, before bridging.
pub enum Thrown {
    /// A plain message; crosses the wire as a string.
    Message(String),
    /// A value that already has a wire form, typically an exception object
    /// received from the peer earlier and rethrown unchanged.
    Foreign(Value),
    /// A local exception object the peer may inspect. The table pins it for
    /// the rest of the session, since the thrower no longer holds it.
    Object(Arc<dyn Dispatch>),
}

impl From<String> for Thrown {
    fn from(message: String) -> Self {
        Thrown::Message(message)
    }
}

impl From<&str> for Thrown {
    fn from(message: &str) -> Self {
        Thrown::Message(message.to_owned())
    }
}

impl std::fmt::Debug for Thrown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Thrown::Message(m) => f.debug_tuple("Message").field(m).finish(),
            Thrown::Foreign(v) => f.debug_tuple("Foreign").field(v).finish(),
            Thrown::Object(_) => f.write_str("Object(..)"),
        }
    }
}

/// An object this endpoint exposes to its peer.
///
/// `method` is the name the peer asked for; `args` are already decoded.
/// Implementations may call `channel.invoke(..)` reentrantly.
pub trait Dispatch: Send + Sync {
    fn invoke(&self, channel: &mut Endpoint, method: &str, args: &[Value]) -> Outcome;
}

/// An out-of-band operation addressed by dispatch id.
pub trait SpecialDispatch: Send + Sync {
    fn dispatch(&self, channel: &mut Endpoint, args: &[Value]) -> Outcome;
}

impl<F> SpecialDispatch for F
where
    F: Fn(&mut Endpoint, &[Value]) -> Outcome + Send + Sync,
{
    fn dispatch(&self, channel: &mut Endpoint, args: &[Value]) -> Outcome {
        self(channel, args)
    }
}

/// Decides whether a session's module request is served.
///
/// The host consults this between version negotiation and the readiness ack;
/// a rejection is relayed to the peer as an exception `Return` and the
/// session never reaches `Ready`.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, request: &ModuleRequest) -> std::result::Result<(), String>;
}

/// Loader that serves every module request.
pub struct AcceptAllModules;

impl ModuleLoader for AcceptAllModules {
    fn load(&self, _request: &ModuleRequest) -> std::result::Result<(), String> {
        Ok(())
    }
}
