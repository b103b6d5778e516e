//! Remote reference table: handles for locally exposed objects.
//!
//! Liveness authority stays with the owning side. The table holds `Weak`
//! refs; the application keeps the `Arc`s, and once the last one drops the
//! next `drain_pending_frees` picks the handle up for a `Free` notification.
//! The peer never retires this side's handles.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use objlink_wire::{Handle, ObjectRef, Origin, ROOT_HANDLE};

use crate::dispatch::Dispatch;

enum Binding {
    Weak(Weak<dyn Dispatch>),
    /// Strong ref held by the table itself; used for thrown exception
    /// objects, which the application cannot keep alive. Retired only when
    /// the session drops.
    Pinned(Arc<dyn Dispatch>),
}

impl Binding {
    fn upgrade(&self) -> Option<Arc<dyn Dispatch>> {
        match self {
            Binding::Weak(weak) => weak.upgrade(),
            Binding::Pinned(strong) => Some(Arc::clone(strong)),
        }
    }

    fn is_dead(&self) -> bool {
        match self {
            Binding::Weak(weak) => weak.strong_count() == 0,
            Binding::Pinned(_) => false,
        }
    }
}

struct Entry {
    binding: Binding,
    identity: usize,
}

struct Inner {
    next: Handle,
    entries: HashMap<Handle, Entry>,
    // identity -> handle, for dedup; identities are raw vtable-erased
    // pointers, valid only while the binding is live.
    by_identity: HashMap<usize, Handle>,
    root: Option<Arc<dyn Dispatch>>,
}

/// Objects this endpoint exposes to its peer, keyed by handle.
///
/// Handle 0 is the root object; ordinary handles count up from 1 and are
/// never reused, so a stale handle can only ever miss.
pub struct ExportTable {
    inner: Mutex<Inner>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next: 1,
                entries: HashMap::new(),
                by_identity: HashMap::new(),
                root: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicked session thread poisons nothing we cannot still read.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the root object (handle 0).
    pub fn set_root(&self, root: Arc<dyn Dispatch>) {
        self.lock().root = Some(root);
    }

    /// Bind `obj` and return its handle, reusing the existing binding when
    /// the same object is already live in the table.
    pub fn insert(&self, obj: &Arc<dyn Dispatch>) -> Handle {
        self.bind(obj, false)
    }

    /// Bind `obj` with the table holding the strong ref.
    pub fn insert_pinned(&self, obj: &Arc<dyn Dispatch>) -> Handle {
        self.bind(obj, true)
    }

    fn bind(&self, obj: &Arc<dyn Dispatch>, pinned: bool) -> Handle {
        let identity = Arc::as_ptr(obj) as *const () as usize;
        let mut inner = self.lock();
        if let Some(&existing) = inner.by_identity.get(&identity) {
            let live = inner
                .entries
                .get(&existing)
                .is_some_and(|entry| !entry.binding.is_dead());
            if live {
                if pinned {
                    if let Some(entry) = inner.entries.get_mut(&existing) {
                        entry.binding = Binding::Pinned(Arc::clone(obj));
                    }
                }
                return existing;
            }
            // The identity was reallocated to a new object after the old
            // binding died but before a drain ran; evict the stale record.
            inner.entries.remove(&existing);
            inner.by_identity.remove(&identity);
        }

        let handle = inner.next;
        inner.next += 1;
        let binding = if pinned {
            Binding::Pinned(Arc::clone(obj))
        } else {
            Binding::Weak(Arc::downgrade(obj))
        };
        inner.entries.insert(handle, Entry { binding, identity });
        inner.by_identity.insert(identity, handle);
        tracing::trace!(handle, pinned, "exported object");
        handle
    }

    /// Upgrade a handle to its object. Handle 0 resolves to the root.
    pub fn resolve(&self, handle: Handle) -> Option<Arc<dyn Dispatch>> {
        let inner = self.lock();
        if handle == ROOT_HANDLE {
            return inner.root.clone();
        }
        inner.entries.get(&handle).and_then(|e| e.binding.upgrade())
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.resolve(handle).is_some()
    }

    /// Remove every binding whose object has been dropped and return the
    /// freed handles, ready for a `Free` batch. Atomic under the lock, so a
    /// handle is either still resolvable or already in a returned batch,
    /// never both.
    pub fn drain_pending_frees(&self) -> Vec<Handle> {
        let mut inner = self.lock();
        let dead: Vec<Handle> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.binding.is_dead())
            .map(|(&handle, _)| handle)
            .collect();
        for handle in &dead {
            if let Some(entry) = inner.entries.remove(handle) {
                if inner.by_identity.get(&entry.identity) == Some(handle) {
                    inner.by_identity.remove(&entry.identity);
                }
            }
        }
        dead
    }

    /// Number of non-root bindings, dead-but-undrained entries included;
    /// the count only shrinks through `drain_pending_frees`.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ExportTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Peer-origin handles this endpoint has seen in decoded messages.
///
/// Pure bookkeeping: the peer owns those objects, so the only transitions
/// are `track` on decode and `free_all` when the owner says they are gone.
pub struct PeerHandles {
    peer_origin: Origin,
    state: Mutex<PeerState>,
}

#[derive(Default)]
struct PeerState {
    known: HashSet<Handle>,
    freed: HashSet<Handle>,
}

impl PeerHandles {
    pub fn new(peer_origin: Origin) -> Self {
        let mut state = PeerState::default();
        // The peer's root is addressable from the start.
        state.known.insert(ROOT_HANDLE);
        Self {
            peer_origin,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a reference if it belongs to the peer; locally-origin refs are
    /// ignored here.
    pub fn track(&self, reference: &ObjectRef) {
        if reference.origin == self.peer_origin {
            self.lock().known.insert(reference.handle);
        }
    }

    /// Drop bookkeeping for handles the owner has retired. Unknown handles
    /// are a tolerated no-op. Handles never come back: the owner's counter
    /// does not reuse numbers.
    pub fn free_all(&self, handles: &[Handle]) {
        let mut state = self.lock();
        for &handle in handles {
            if !state.known.remove(&handle) {
                tracing::debug!(handle, "free for untracked peer handle");
            }
            state.freed.insert(handle);
        }
    }

    pub fn is_known(&self, handle: Handle) -> bool {
        self.lock().known.contains(&handle)
    }

    /// True once the owner has sent a `Free` for this handle. Calls through
    /// a freed handle are refused locally; a handle this side merely has not
    /// seen yet is left for the owner to validate.
    pub fn is_freed(&self, handle: Handle) -> bool {
        self.lock().freed.contains(&handle)
    }
}

#[cfg(test)]
mod tests {
    use objlink_wire::Value;

    use super::*;
    use crate::dispatch::Outcome;
    use crate::endpoint::Endpoint;

    struct Inert;

    impl Dispatch for Inert {
        fn invoke(&self, _: &mut Endpoint, _: &str, _: &[Value]) -> Outcome {
            Ok(Value::Undefined)
        }
    }

    fn obj() -> Arc<dyn Dispatch> {
        Arc::new(Inert)
    }

    #[test]
    fn handles_are_monotonic_and_never_reused() {
        let table = ExportTable::new();
        let a = obj();
        let first = table.insert(&a);
        drop(a);
        assert_eq!(table.drain_pending_frees(), vec![first]);

        let b = obj();
        let second = table.insert(&b);
        assert!(second > first);
    }

    #[test]
    fn inserting_the_same_object_twice_dedups() {
        let table = ExportTable::new();
        let a = obj();
        assert_eq!(table.insert(&a), table.insert(&a));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn root_resolves_through_handle_zero() {
        let table = ExportTable::new();
        assert!(table.resolve(ROOT_HANDLE).is_none());
        table.set_root(obj());
        assert!(table.resolve(ROOT_HANDLE).is_some());
        assert!(table.is_live(ROOT_HANDLE));
    }

    #[test]
    fn dropped_object_is_dead_until_drained() {
        let table = ExportTable::new();
        let a = obj();
        let handle = table.insert(&a);
        assert!(table.is_live(handle));
        drop(a);
        assert!(!table.is_live(handle));
        // A dead binding still counts until a drain retires it.
        assert_eq!(table.len(), 1);
        assert_eq!(table.drain_pending_frees(), vec![handle]);
        assert!(table.drain_pending_frees().is_empty());
        assert!(table.resolve(handle).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn pinned_binding_survives_the_callers_drop() {
        let table = ExportTable::new();
        let a = obj();
        let handle = table.insert_pinned(&a);
        drop(a);
        assert!(table.is_live(handle));
        assert!(table.drain_pending_frees().is_empty());
    }

    #[test]
    fn reallocated_identity_gets_a_fresh_handle() {
        let table = ExportTable::new();
        let a = obj();
        let first = table.insert(&a);
        drop(a);

        // The allocator may hand the next object the same address; a dead
        // binding under a matching identity must be evicted, not reused.
        let b = obj();
        let second = table.insert(&b);
        assert_ne!(first, second);
        assert!(table.is_live(second));
        assert!(!table.is_live(first));
    }

    #[test]
    fn peer_handles_track_only_peer_origin() {
        let peers = PeerHandles::new(Origin::Remote);
        peers.track(&ObjectRef::new(Origin::Remote, 4));
        peers.track(&ObjectRef::new(Origin::Host, 5));
        assert!(peers.is_known(4));
        assert!(!peers.is_known(5));
        assert!(peers.is_known(ROOT_HANDLE));
    }

    #[test]
    fn freeing_unknown_peer_handles_is_a_noop() {
        let peers = PeerHandles::new(Origin::Host);
        peers.track(&ObjectRef::new(Origin::Host, 9));
        peers.free_all(&[9, 77]);
        assert!(!peers.is_known(9));
        assert!(peers.is_freed(9));
        assert!(peers.is_freed(77));
        assert!(!peers.is_freed(8));
        peers.free_all(&[9]);
    }
}
