//! Named-object registry and rename-safe references.
//!
//! Objects such as `receive`, `table` or `delwrite~` publish themselves under a
//! `(kind, name)` key. Other objects find them by name, either on demand
//! ([`NamedObjectStore::find_all`], used by `send`) or through a [`Reference`]
//! that keeps tracking the name as objects come, go and get renamed.
//!
//! Every mutation of the store is announced to subscribed listeners as a
//! [`NameEvent`]. A rename is announced twice, [`NameEvent::PreRename`] before
//! the store changes and [`NameEvent::PostRename`] after, always in that order.

use std::any::Any;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::error::PatchError;
use crate::node::NodeKey;

/// Kind under which `receive` objects listen for named messages.
pub const RECEIVE: &str = "receive";
/// Kind of named sample arrays. Names are unique.
pub const ARRAY: &str = "array";
/// Kind of named delay lines. Names are unique.
pub const DELAY_LINE: &str = "delay-line";

/// Shared data attached to a registration (array storage, delay lines, ...).
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Listener callback for [`NameEvent`]s.
pub type Listener = Box<dyn FnMut(&NameEvent) + Send>;

/// One object registered under a name.
#[derive(Clone)]
pub struct NamedEntry {
    pub node: NodeKey,
    pub payload: Option<Payload>,
}

/// Store mutation notifications.
#[derive(Clone, Debug, PartialEq)]
pub enum NameEvent {
    Registered { kind: String, name: String, node: NodeKey },
    PreRename { kind: String, old: String, new: String, node: NodeKey },
    PostRename { kind: String, old: String, new: String, node: NodeKey },
    Unregistered { kind: String, name: String, node: NodeKey },
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ListenerId(u32);

/// Dynamic, rename-safe binding to a named object of one kind.
///
/// Cheap to copy; the binding state lives in the store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Reference(u32);

impl Reference {
    /// Point the reference at `name`. See [`NamedObjectStore::set_reference`].
    pub fn set(self, store: &mut NamedObjectStore, name: &str) {
        store.set_reference(self, name);
    }

    /// The object currently bound, if any.
    pub fn resolved(self, store: &NamedObjectStore) -> Option<NodeKey> {
        store.resolved(self)
    }
}

#[derive(Debug)]
struct Binding {
    kind: String,
    holder: Option<NodeKey>,
    name: Option<String>,
    resolved: Option<NodeKey>,
}

type Key = (String, String);

/// Mapping `(kind, name)` → ordered list of registered objects.
#[derive(Default)]
pub struct NamedObjectStore {
    entries: HashMap<Key, Vec<NamedEntry>>,
    unique_kinds: HashSet<String>,
    listeners: Vec<(ListenerId, Listener)>,
    bindings: HashMap<Reference, Binding>,
    /// References whose resolution changed, with their holder.
    changed: Vec<(Reference, NodeKey)>,
    next_listener: u32,
    next_reference: u32,
}

impl NamedObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject a second registration under an occupied name for `kind`.
    pub fn set_unique(&mut self, kind: &str) {
        self.unique_kinds.insert(kind.to_owned());
    }

    #[inline]
    pub fn name_is_unique(&self, kind: &str) -> bool {
        self.unique_kinds.contains(kind)
    }

    pub fn register(
        &mut self,
        kind: &str,
        name: &str,
        node: NodeKey,
        payload: Option<Payload>,
    ) -> Result<(), PatchError> {
        let key = (kind.to_owned(), name.to_owned());
        let list = self.entries.entry(key).or_default();
        if self.unique_kinds.contains(kind) && !list.is_empty() {
            return Err(PatchError::NameCollision { kind: kind.to_owned(), name: name.to_owned() });
        }
        list.push(NamedEntry { node, payload });
        tracing::debug!(kind, name, ?node, "registered named object");

        self.bind_waiting(kind, name);
        self.emit(NameEvent::Registered { kind: kind.to_owned(), name: name.to_owned(), node });
        Ok(())
    }

    /// Remove one registration. Returns whether it existed.
    pub fn unregister(&mut self, kind: &str, name: &str, node: NodeKey) -> bool {
        let key = (kind.to_owned(), name.to_owned());
        let removed = match self.entries.get_mut(&key) {
            Some(list) => {
                let before = list.len();
                list.retain(|e| e.node != node);
                before != list.len()
            }
            None => false,
        };
        if !removed {
            return false;
        }
        if self.entries.get(&key).map_or(false, Vec::is_empty) {
            self.entries.remove(&key);
        }

        self.unbind_node(kind, node);
        self.bind_waiting(kind, name);
        self.emit(NameEvent::Unregistered { kind: kind.to_owned(), name: name.to_owned(), node });
        true
    }

    /// Remove every registration held by `node`.
    pub fn unregister_node(&mut self, node: NodeKey) {
        for (kind, name) in self.names_of(node) {
            self.unregister(&kind, &name, node);
        }
    }

    /// Move `node`'s registration from `old` to `new`.
    pub fn rename(&mut self, kind: &str, old: &str, new: &str, node: NodeKey) -> Result<(), PatchError> {
        if old == new {
            return Ok(());
        }
        let old_key = (kind.to_owned(), old.to_owned());
        let pos = self
            .entries
            .get(&old_key)
            .and_then(|list| list.iter().position(|e| e.node == node))
            .ok_or_else(|| PatchError::InvalidArgument(format!("'{}' is not registered as '{}'", old, kind)))?;
        let occupied = self.entries.get(&(kind.to_owned(), new.to_owned())).map_or(false, |l| !l.is_empty());
        if self.unique_kinds.contains(kind) && occupied {
            return Err(PatchError::NameCollision { kind: kind.to_owned(), name: new.to_owned() });
        }

        // references watching this object let go before anything changes
        self.unbind_node(kind, node);
        self.emit(NameEvent::PreRename {
            kind: kind.to_owned(),
            old: old.to_owned(),
            new: new.to_owned(),
            node,
        });

        let entry = match self.entries.get_mut(&old_key) {
            Some(list) => list.remove(pos),
            None => unreachable!("position was found above"),
        };
        if self.entries.get(&old_key).map_or(false, Vec::is_empty) {
            self.entries.remove(&old_key);
        }
        self.entries.entry((kind.to_owned(), new.to_owned())).or_default().push(entry);

        self.bind_waiting(kind, old);
        self.bind_waiting(kind, new);
        self.emit(NameEvent::PostRename {
            kind: kind.to_owned(),
            old: old.to_owned(),
            new: new.to_owned(),
            node,
        });
        Ok(())
    }

    /// First object registered under `(kind, name)`.
    pub fn find(&self, kind: &str, name: &str) -> Option<&NamedEntry> {
        self.find_all(kind, name).first()
    }

    /// Every object registered under `(kind, name)`, in registration order.
    pub fn find_all(&self, kind: &str, name: &str) -> &[NamedEntry] {
        self.entries
            .get(&(kind.to_owned(), name.to_owned()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `(kind, name)` pairs `node` is registered under.
    pub fn names_of(&self, node: NodeKey) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|(_, list)| list.iter().any(|e| e.node == node))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn subscribe(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        before != self.listeners.len()
    }

    /// Create an unset reference to objects of `kind`.
    ///
    /// When `holder` is given, every change of the resolution is queued for it
    /// (see [`take_changed`](Self::take_changed)).
    pub fn create_reference(&mut self, kind: &str, holder: Option<NodeKey>) -> Reference {
        let reference = Reference(self.next_reference);
        self.next_reference += 1;
        self.bindings.insert(
            reference,
            Binding { kind: kind.to_owned(), holder, name: None, resolved: None },
        );
        reference
    }

    /// Look `name` up now; if nothing is registered under it yet, bind the
    /// first object of the reference's kind that later registers (or is
    /// renamed) to it. Replaces whatever the reference was set to before.
    ///
    /// A bound reference drops its object as soon as the object is about to
    /// be renamed; it does not follow the object to its new name.
    pub fn set_reference(&mut self, reference: Reference, name: &str) {
        let kind = match self.bindings.get_mut(&reference) {
            Some(binding) => {
                binding.name = Some(name.to_owned());
                binding.kind.clone()
            }
            None => return,
        };
        let found = self.find(&kind, name).map(|e| e.node);
        self.update_binding(reference, found);
    }

    pub fn resolved(&self, reference: Reference) -> Option<NodeKey> {
        self.bindings.get(&reference).and_then(|b| b.resolved)
    }

    /// Payload of the bound registration.
    pub fn resolved_payload(&self, reference: Reference) -> Option<Payload> {
        let binding = self.bindings.get(&reference)?;
        let (node, name) = (binding.resolved?, binding.name.as_deref()?);
        self.find_all(&binding.kind, name)
            .iter()
            .find(|e| e.node == node)
            .and_then(|e| e.payload.clone())
    }

    pub fn drop_reference(&mut self, reference: Reference) {
        self.bindings.remove(&reference);
        self.changed.retain(|(r, _)| *r != reference);
    }

    /// Drop every reference held by `holder`.
    pub fn drop_references_of(&mut self, holder: NodeKey) {
        self.bindings.retain(|_, b| b.holder != Some(holder));
        self.changed.retain(|(_, h)| *h != holder);
    }

    /// Drain the queue of `(reference, holder)` pairs whose resolution changed.
    pub fn take_changed(&mut self) -> Vec<(Reference, NodeKey)> {
        core::mem::take(&mut self.changed)
    }

    fn emit(&mut self, event: NameEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(&event);
        }
    }

    fn unbind_node(&mut self, kind: &str, node: NodeKey) {
        let bound: Vec<Reference> = self
            .bindings
            .iter()
            .filter(|(_, b)| b.kind == kind && b.resolved == Some(node))
            .map(|(r, _)| *r)
            .collect();
        for reference in bound {
            self.update_binding(reference, None);
        }
    }

    fn bind_waiting(&mut self, kind: &str, name: &str) {
        let first = match self.find(kind, name) {
            Some(entry) => entry.node,
            None => return,
        };
        let waiting: Vec<Reference> = self
            .bindings
            .iter()
            .filter(|(_, b)| b.kind == kind && b.resolved.is_none() && b.name.as_deref() == Some(name))
            .map(|(r, _)| *r)
            .collect();
        for reference in waiting {
            self.update_binding(reference, Some(first));
        }
    }

    fn update_binding(&mut self, reference: Reference, resolved: Option<NodeKey>) {
        let binding = match self.bindings.get_mut(&reference) {
            Some(binding) => binding,
            None => return,
        };
        if binding.resolved == resolved {
            return;
        }
        binding.resolved = resolved;
        tracing::trace!(?reference, ?resolved, "reference re-resolved");
        if let Some(holder) = binding.holder {
            self.changed.push((reference, holder));
        }
    }
}
