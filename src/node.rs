//! Core object trait and the context handed to its hooks.

use crate::clock::{Clock, EventHandle};
use crate::error::PatchError;
use crate::graph::{Control, DspGraph, DspUnit};
use crate::message::{Atom, Message};
use crate::names::{NamedObjectStore, Payload, Reference};
use crate::portlet::{PortletRef, PortletSpec};
use crate::settings::Settings;

/// Runtime-wide identifier of a node (object or patch).
///
/// Keys are never reused, so a stale key simply stops resolving once its node
/// is removed. The container-scoped numeric id of a node is a separate value,
/// see [`Runtime::node_id`](crate::Runtime::node_id).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeKey(pub(crate) u32);

/// Behaviour of one object in a patch.
///
/// Every hook receives a [`Context`] giving access to the object's outlets,
/// the clock, the named-object store and the DSP graph. Hooks never call into
/// other objects directly: outputs are queued on the context and delivered
/// depth-first, in emission order, as soon as the hook returns.
///
/// ```
/// use patchbay::{Context, Message, MessageKind, Object};
///
/// /// Outputs the number of bangs received so far.
/// struct Counter(f64);
///
/// impl Object for Counter {
///     fn message(&mut self, _inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
///         if let MessageKind::Bang = msg.kind() {
///             self.0 += 1.0;
///             ctx.out(0, vec![self.0.into()]);
///         }
///     }
/// }
/// ```
#[allow(unused_variables)]
pub trait Object: Send + 'static {
    /// Called once after the node is inserted in its patch, before it is
    /// connected to anything. Failing aborts the creation.
    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), PatchError> {
        Ok(())
    }

    /// Called when the runtime starts, before any portlet is activated.
    /// DSP objects install their [`DspUnit`] here.
    fn start(&mut self, ctx: &mut Context<'_>) {}

    /// Called when the runtime stops, after the portlets were deactivated.
    fn stop(&mut self, ctx: &mut Context<'_>) {}

    /// Called right before the node is removed from its patch.
    fn destroy(&mut self, ctx: &mut Context<'_>) {}

    /// A message arrived on `inlet`.
    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {}

    /// A message sent by name to a `receive` registration this object holds.
    fn received(&mut self, msg: &Message, ctx: &mut Context<'_>) {}

    /// A clock event scheduled with [`Context::schedule`] is due.
    fn timeout(&mut self, token: u32, ctx: &mut Context<'_>) {}

    /// A reference held by this object now resolves to something else.
    fn reference_changed(&mut self, reference: Reference, ctx: &mut Context<'_>) {}

    /// `own` was connected to `peer`.
    fn connected(&mut self, own: PortletRef, peer: PortletRef, ctx: &mut Context<'_>) {}

    /// `own` was disconnected from `peer`.
    fn disconnected(&mut self, own: PortletRef, peer: PortletRef, ctx: &mut Context<'_>) {}
}

/// What an object factory produces: the behaviour plus its portlet layout.
pub struct Instance {
    pub object: Box<dyn Object>,
    pub inlets: Vec<PortletSpec>,
    pub outlets: Vec<PortletSpec>,
}

impl Instance {
    pub fn new(object: impl Object) -> Self {
        Self {
            object: Box::new(object),
            inlets: Vec::new(),
            outlets: Vec::new(),
        }
    }

    pub fn inlets(mut self, inlets: impl IntoIterator<Item = PortletSpec>) -> Self {
        self.inlets = inlets.into_iter().collect();
        self
    }

    pub fn outlets(mut self, outlets: impl IntoIterator<Item = PortletSpec>) -> Self {
        self.outlets = outlets.into_iter().collect();
        self
    }
}

/// Clock payload: which node to wake, and the token it scheduled with.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Timeout {
    pub node: NodeKey,
    pub token: u32,
}

/// Output queued by a hook.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Emission {
    Outlet(usize, Message),
    Named(String, Message),
}

/// Access to the runtime from inside an object's hook.
pub struct Context<'a> {
    pub(crate) node: NodeKey,
    pub(crate) time_tag: f64,
    pub(crate) running: bool,
    pub(crate) settings: &'a Settings,
    pub(crate) clock: &'a mut Clock<Timeout>,
    pub(crate) names: &'a mut NamedObjectStore,
    pub(crate) dsp: &'a mut DspGraph,
    pub(crate) emissions: &'a mut Vec<Emission>,
}

impl Context<'_> {
    /// The node whose hook is running.
    #[inline]
    pub fn node(&self) -> NodeKey {
        self.node
    }

    /// Logical time of the current activation: the tag of the message being
    /// handled, or the deadline of the clock event being fired.
    #[inline]
    pub fn time_tag(&self) -> f64 {
        self.time_tag
    }

    /// Start of the current block, in ms.
    #[inline]
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        self.settings
    }

    /// Send `atoms` out of `outlet`, stamped with the current time tag.
    pub fn out(&mut self, outlet: usize, atoms: Vec<Atom>) {
        let msg = Message { atoms, time_tag: self.time_tag };
        self.emissions.push(Emission::Outlet(outlet, msg));
    }

    /// Send `atoms` to every `receive` registered under `name`.
    pub fn send_named(&mut self, name: &str, atoms: Vec<Atom>) {
        let msg = Message { atoms, time_tag: self.time_tag };
        self.emissions.push(Emission::Named(name.to_owned(), msg));
    }

    /// Wake this object at `deadline` (absolute ms), and then every `repeat`
    /// ms if given. `token` is passed back to [`Object::timeout`].
    pub fn schedule(&mut self, token: u32, deadline: f64, repeat: Option<f64>) -> EventHandle {
        let timeout = Timeout { node: self.node, token };
        tracing::trace!(node = ?self.node, token, deadline, ?repeat, "schedule");
        self.clock.schedule(timeout, deadline, repeat)
    }

    pub fn unschedule(&mut self, handle: EventHandle) -> bool {
        self.clock.unschedule(handle)
    }

    /// Publish this object under `(kind, name)`.
    pub fn register_name(&mut self, kind: &str, name: &str, payload: Option<Payload>) -> Result<(), PatchError> {
        self.names.register(kind, name, self.node, payload)
    }

    pub fn unregister_name(&mut self, kind: &str, name: &str) -> bool {
        self.names.unregister(kind, name, self.node)
    }

    pub fn rename_name(&mut self, kind: &str, old: &str, new: &str) -> Result<(), PatchError> {
        self.names.rename(kind, old, new, self.node)
    }

    /// Create a reference to objects of `kind`, held by this object.
    pub fn reference(&mut self, kind: &str) -> Reference {
        self.names.create_reference(kind, Some(self.node))
    }

    pub fn set_reference(&mut self, reference: Reference, name: &str) {
        self.names.set_reference(reference, name)
    }

    pub fn resolved(&self, reference: Reference) -> Option<NodeKey> {
        self.names.resolved(reference)
    }

    pub fn resolved_payload(&self, reference: Reference) -> Option<Payload> {
        self.names.resolved_payload(reference)
    }

    /// Install (or swap) this object's audio unit. Existing wires are kept.
    pub fn install_dsp(&mut self, unit: Box<dyn DspUnit>) {
        if self.dsp.install(self.node, unit) {
            tracing::debug!(node = ?self.node, "DSP unit replaced");
        }
    }

    /// Queue a parameter change for this object's audio unit, applied at the
    /// current time tag. Dropped when no unit is installed.
    pub fn control(&mut self, slot: usize, values: Vec<f64>) {
        let control = Control { slot, values, time_tag: self.time_tag };
        self.dsp.push_control(self.node, control);
    }

    /// Number of wires currently in the DSP graph.
    pub fn dsp_wire_count(&self) -> usize {
        self.dsp.wire_count()
    }
}
