//! The session: one endpoint of the half-duplex dispatch loop.
//!
//! Both sides run the same state machine; only the handshake and the
//! `Origin` role differ. Synchronous calls nest by recursion: while an
//! outbound call awaits its `Return`, inbound calls are serviced on the same
//! thread, so the distributed call stack is literally the local call stack.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use objlink_wire::{
    Message, MessageType, ObjectRef, Origin, Value, WireConfig, WireReader, WireWriter,
    ROOT_HANDLE,
};

use crate::dispatch::{Dispatch, Outcome, SpecialDispatch, Thrown, GET_PROPERTY, SET_PROPERTY};
use crate::error::{BridgedException, ChannelError, Result};
use crate::table::{ExportTable, PeerHandles};

/// Default quiet-time limit while a call is awaiting its return.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables for a session endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Maximum time to sit with an outstanding call and no inbound traffic
    /// before the session is declared dead. `None` waits forever. Only
    /// effective when the underlying stream has a read timeout, as the
    /// listener and connector arrange.
    pub call_timeout: Option<Duration>,
    /// Decoder limits, shared with the wire layer.
    pub wire: WireConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
            wire: WireConfig::default(),
        }
    }
}

impl EndpointConfig {
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_wire(mut self, wire: WireConfig) -> Self {
        self.wire = wire;
        self
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport is up, no handshake traffic yet.
    Connecting,
    /// Handshake sent or received, waiting for version selection.
    AwaitingVersion,
    /// Version agreed, waiting for the module exchange to finish.
    AwaitingLoadModule,
    /// Steady state: either side may start a call.
    Ready,
    /// An outbound call is on the wire; inbound calls are still serviced.
    AwaitingReturn,
    /// Session is over; no further traffic is possible.
    Closed,
}

/// One side of an object-bridge session.
pub struct Endpoint {
    reader: WireReader<Box<dyn Read + Send>>,
    writer: WireWriter<Box<dyn Write + Send>>,
    role: Origin,
    state: SessionState,
    version: Option<i32>,
    call_depth: u32,
    exports: ExportTable,
    peer_handles: PeerHandles,
    specials: HashMap<u8, Arc<dyn SpecialDispatch>>,
    script_sink: Option<Box<dyn FnMut(String) + Send>>,
    config: EndpointConfig,
}

impl Endpoint {
    /// Build an endpoint over separate read and write halves of one duplex
    /// stream. The session starts in `Connecting`; run `accept_session` or
    /// `connect_session` before anything else.
    pub fn from_parts<R, W>(role: Origin, reader: R, writer: W, config: EndpointConfig) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let wire = config.wire.clone();
        Self {
            reader: WireReader::with_config(Box::new(reader), wire.clone()),
            writer: WireWriter::with_config(Box::new(writer), wire),
            role,
            state: SessionState::Connecting,
            version: None,
            call_depth: 0,
            exports: ExportTable::new(),
            peer_handles: PeerHandles::new(role.opposite()),
            specials: HashMap::new(),
            script_sink: None,
            config,
        }
    }

    pub fn role(&self) -> Origin {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Protocol version agreed during the handshake, once there is one.
    pub fn version(&self) -> Option<i32> {
        self.version
    }

    /// Depth of in-flight nested calls on this endpoint.
    pub fn call_depth(&self) -> u32 {
        self.call_depth
    }

    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    /// Bookkeeping for peer-origin handles seen on this session.
    pub fn peer_handles(&self) -> &PeerHandles {
        &self.peer_handles
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Install the root object the peer addresses with a `Null` target.
    pub fn set_root(&mut self, root: Arc<dyn Dispatch>) {
        self.exports.set_root(root);
    }

    /// Expose an object to the peer and get back the reference to marshal.
    /// The caller keeps the `Arc`; dropping the last one queues the handle
    /// for the next `Free` batch.
    pub fn export(&mut self, obj: &Arc<dyn Dispatch>) -> ObjectRef {
        ObjectRef::new(self.role, self.exports.insert(obj))
    }

    /// `export`, as a marshalable value.
    pub fn export_value(&mut self, obj: &Arc<dyn Dispatch>) -> Value {
        Value::Object(self.export(obj))
    }

    /// Register a handler for an `InvokeSpecial` dispatch id.
    pub fn register_special(&mut self, dispatch_id: u8, handler: Arc<dyn SpecialDispatch>) {
        self.specials.insert(dispatch_id, handler);
    }

    /// Install the sink that receives inbound `LoadScript` payloads.
    pub fn set_script_sink<F>(&mut self, sink: F)
    where
        F: FnMut(String) + Send + 'static,
    {
        self.script_sink = Some(Box::new(sink));
    }

    /// Call a method on a peer object and block until its `Return`.
    ///
    /// `target` is `Null` for the peer's root, or a peer-origin reference.
    /// Inbound calls arriving while this one is outstanding are dispatched
    /// reentrantly, which is how nested synchronous calls work.
    pub fn invoke(&mut self, target: Value, method: &str, args: Vec<Value>) -> Result<Value> {
        self.ensure_open()?;
        self.check_outbound_target(&target)?;
        self.flush_retired_exports()?;
        tracing::debug!(method, depth = self.call_depth, "invoke");
        Message::Invoke {
            method: method.to_owned(),
            target,
            args,
        }
        .send(&mut self.writer)?;
        let (is_exception, value) = self.await_return()?;
        if is_exception {
            Err(BridgedException::new(value).into())
        } else {
            Ok(value)
        }
    }

    /// Run an out-of-band operation on the peer, addressed by dispatch id.
    pub fn invoke_special(&mut self, dispatch_id: u8, args: Vec<Value>) -> Result<Value> {
        self.ensure_open()?;
        self.flush_retired_exports()?;
        tracing::debug!(dispatch_id, depth = self.call_depth, "invoke special");
        Message::InvokeSpecial { dispatch_id, args }.send(&mut self.writer)?;
        let (is_exception, value) = self.await_return()?;
        if is_exception {
            Err(BridgedException::new(value).into())
        } else {
            Ok(value)
        }
    }

    /// Read a property of a peer object through the conventional special id.
    pub fn get_property(&mut self, target: Value, name: &str) -> Result<Value> {
        self.invoke_special(GET_PROPERTY, vec![target, Value::Str(name.to_owned())])
    }

    /// Write a property of a peer object through the conventional special id.
    pub fn set_property(&mut self, target: Value, name: &str, value: Value) -> Result<Value> {
        self.invoke_special(
            SET_PROPERTY,
            vec![target, Value::Str(name.to_owned()), value],
        )
    }

    /// Push a script to the peer's sink. One-way, no reply.
    pub fn load_script(&mut self, source: &str) -> Result<()> {
        self.ensure_open()?;
        Message::LoadScript {
            source: source.to_owned(),
        }
        .send(&mut self.writer)?;
        Ok(())
    }

    /// Service inbound traffic until the peer quits or the stream dies.
    ///
    /// This is the steady-state loop for a side with no call of its own to
    /// make; hosts typically run it right after `accept_session`.
    pub fn serve(&mut self) -> Result<()> {
        self.ensure_open()?;
        let outcome = self.serve_loop();
        if outcome.is_err() {
            self.state = SessionState::Closed;
        }
        outcome
    }

    fn serve_loop(&mut self) -> Result<()> {
        loop {
            let message = self.read_message(None)?;
            match message {
                Message::Invoke {
                    method,
                    target,
                    args,
                } => self.handle_invoke(method, target, args)?,
                Message::InvokeSpecial { dispatch_id, args } => {
                    self.handle_invoke_special(dispatch_id, args)?
                }
                Message::Free { handles } => self.peer_handles.free_all(&handles),
                Message::LoadScript { source } => self.run_script_sink(source),
                Message::Quit => {
                    tracing::info!("peer ended the session");
                    self.state = SessionState::Closed;
                    return Ok(());
                }
                Message::FatalError { message } => {
                    // The peer already closed; replying would go nowhere.
                    tracing::warn!(%message, "peer reported a fatal error");
                    return Err(ChannelError::PeerFatal(message));
                }
                other => {
                    return Err(self.fatal(format!(
                        "unexpected {:?} outside of a call",
                        other.message_type()
                    )))
                }
            }
        }
    }

    /// End the session politely. Idempotent.
    pub fn quit(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        Message::Quit.send(&mut self.writer)?;
        self.state = SessionState::Closed;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Ready | SessionState::AwaitingReturn => Ok(()),
            SessionState::Closed => Err(ChannelError::Closed),
            other => Err(ChannelError::Protocol(format!(
                "session not ready (state {other:?})"
            ))),
        }
    }

    /// Refuse calls through references we can already tell are bad, before
    /// they reach the peer.
    fn check_outbound_target(&self, target: &Value) -> Result<()> {
        match target {
            Value::Null => Ok(()),
            Value::Object(r) | Value::Function(r) => {
                // Own exports must still be live; peer handles are refused
                // only once the owner has freed them, anything else is the
                // owner's to validate.
                let bad = if r.origin == self.role {
                    !self.exports.is_live(r.handle)
                } else {
                    self.peer_handles.is_freed(r.handle)
                };
                if bad {
                    Err(ChannelError::UnknownHandle(r.handle))
                } else {
                    Ok(())
                }
            }
            other => Err(ChannelError::Protocol(format!(
                "invoke target must be an object reference or Null, got {other}"
            ))),
        }
    }

    fn await_return(&mut self) -> Result<(bool, Value)> {
        let prev = self.state;
        self.state = SessionState::AwaitingReturn;
        self.call_depth += 1;
        let outcome = self.react_until_return();
        self.call_depth -= 1;
        match outcome {
            Ok(ret) => {
                self.state = prev;
                Ok(ret)
            }
            Err(err) => {
                self.state = SessionState::Closed;
                Err(err)
            }
        }
    }

    fn react_until_return(&mut self) -> Result<(bool, Value)> {
        loop {
            // Progress of any kind resets the clock; the timeout bounds
            // quiet time, not total call duration, so long nested exchanges
            // are not cut short.
            let message = self.read_message(self.config.call_timeout)?;
            match message {
                Message::Return {
                    is_exception,
                    value,
                } => return Ok((is_exception, value)),
                Message::Invoke {
                    method,
                    target,
                    args,
                } => self.handle_invoke(method, target, args)?,
                Message::InvokeSpecial { dispatch_id, args } => {
                    self.handle_invoke_special(dispatch_id, args)?
                }
                Message::Free { handles } => self.peer_handles.free_all(&handles),
                Message::LoadScript { source } => self.run_script_sink(source),
                Message::Quit => {
                    return Err(ChannelError::Protocol(
                        "peer quit while a call was pending".into(),
                    ))
                }
                Message::FatalError { message } => {
                    tracing::warn!(%message, "peer reported a fatal error");
                    return Err(ChannelError::PeerFatal(message));
                }
                other => {
                    return Err(self.fatal(format!(
                        "unexpected {:?} while awaiting a return",
                        other.message_type()
                    )))
                }
            }
        }
    }

    fn handle_invoke(&mut self, method: String, target: Value, args: Vec<Value>) -> Result<()> {
        let handler = self.resolve_local_target(&target)?;
        tracing::debug!(method = %method, depth = self.call_depth, "dispatching inbound invoke");
        let outcome = handler.invoke(self, &method, &args);
        self.send_return(outcome)
    }

    fn handle_invoke_special(&mut self, dispatch_id: u8, args: Vec<Value>) -> Result<()> {
        let Some(handler) = self.specials.get(&dispatch_id).map(Arc::clone) else {
            let _ = Message::FatalError {
                message: format!("no dispatcher for id {dispatch_id}"),
            }
            .send(&mut self.writer);
            self.state = SessionState::Closed;
            return Err(ChannelError::UnknownDispatchId(dispatch_id));
        };
        let outcome = handler.dispatch(self, &args);
        self.send_return(outcome)
    }

    fn resolve_local_target(&mut self, target: &Value) -> Result<Arc<dyn Dispatch>> {
        let handle = match target {
            Value::Null => ROOT_HANDLE,
            Value::Object(r) | Value::Function(r) if r.origin == self.role => r.handle,
            other => {
                return Err(self.fatal(format!("invoke target {other} does not name a local object")))
            }
        };
        match self.exports.resolve(handle) {
            Some(obj) => Ok(obj),
            None => {
                let _ = Message::FatalError {
                    message: format!("unknown handle {handle}"),
                }
                .send(&mut self.writer);
                self.state = SessionState::Closed;
                Err(ChannelError::UnknownHandle(handle))
            }
        }
    }

    fn send_return(&mut self, outcome: Outcome) -> Result<()> {
        let (is_exception, value) = match outcome {
            Ok(value) => (false, value),
            Err(thrown) => (true, self.bridge_thrown(thrown)),
        };
        self.flush_retired_exports()?;
        Message::Return {
            is_exception,
            value,
        }
        .send(&mut self.writer)?;
        Ok(())
    }

    /// Give a local exception a wire form. A rethrown foreign value crosses
    /// back verbatim, so its origin side can recover the original object.
    fn bridge_thrown(&mut self, thrown: Thrown) -> Value {
        match thrown {
            Thrown::Message(message) => Value::Str(message),
            Thrown::Foreign(value) => value,
            Thrown::Object(obj) => {
                Value::Object(ObjectRef::new(self.role, self.exports.insert_pinned(&obj)))
            }
        }
    }

    fn run_script_sink(&mut self, source: String) {
        match self.script_sink.as_mut() {
            Some(sink) => sink(source),
            None => tracing::debug!(len = source.len(), "load-script with no sink installed"),
        }
    }

    /// Notify the peer of handles whose objects have been dropped. Runs
    /// right before each outbound `Invoke`/`Return`, never between a request
    /// and its reply.
    fn flush_retired_exports(&mut self) -> Result<()> {
        let handles = self.exports.drain_pending_frees();
        if !handles.is_empty() {
            tracing::debug!(count = handles.len(), "retiring dropped exports");
            Message::Free { handles }.send(&mut self.writer)?;
        }
        Ok(())
    }

    /// Best-effort `FatalError` to the peer, then close.
    pub(crate) fn fatal(&mut self, message: String) -> ChannelError {
        let _ = Message::FatalError {
            message: message.clone(),
        }
        .send(&mut self.writer);
        self.state = SessionState::Closed;
        ChannelError::Protocol(message)
    }

    /// Read one whole message, applying `timeout` as a quiet-time bound at
    /// the message boundary. Also records any peer-origin references the
    /// message carries.
    pub(crate) fn read_message(&mut self, timeout: Option<Duration>) -> Result<Message> {
        let deadline = timeout.map(|t| (Instant::now() + t, t));
        let tag = loop {
            match self.reader.poll_u8()? {
                Some(tag) => break tag,
                None => {
                    if let Some((at, limit)) = deadline {
                        if Instant::now() >= at {
                            self.state = SessionState::Closed;
                            return Err(ChannelError::Timeout(limit));
                        }
                    }
                }
            }
        };
        let message_type = MessageType::from_tag(tag)?;
        let message = Message::receive(message_type, &mut self.reader)?;
        self.note_inbound(&message);
        Ok(message)
    }

    pub(crate) fn send_message(&mut self, message: &Message) -> Result<()> {
        message.send(&mut self.writer)?;
        Ok(())
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub(crate) fn set_version(&mut self, version: i32) {
        self.version = Some(version);
    }

    fn note_inbound(&mut self, message: &Message) {
        let mut note = |value: &Value| {
            if let Some(reference) = value.object_ref() {
                self.peer_handles.track(&reference);
            }
        };
        match message {
            Message::Invoke { target, args, .. } => {
                note(target);
                args.iter().for_each(&mut note);
            }
            Message::InvokeSpecial { args, .. } => args.iter().for_each(&mut note),
            Message::Return { value, .. } => note(value),
            _ => {}
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("version", &self.version)
            .field("call_depth", &self.call_depth)
            .finish_non_exhaustive()
    }
}
