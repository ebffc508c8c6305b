//! The runtime: node arena, patches, clock, named objects and DSP graph.

use std::rc::Rc;

use dasp_graph::Buffer;
use hashbrown::HashMap;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::clock::Clock;
use crate::error::PatchError;
use crate::graph::{BlockContext, DspGraph};
use crate::library::{ObjectLibrary, Role};
use crate::message::{Atom, Message};
use crate::names::{self, NamedObjectStore};
use crate::node::{Context, Emission, Instance, NodeKey, Object, Timeout};
use crate::patch::{Body, IdAllocator, NodeSlot, Patch, FIRST_PATCH_ID};
use crate::portlet::{Direction, Portlet, PortletKind, PortletRef};
use crate::resolve::resolve;
use crate::settings::Settings;

/// Deepest synchronous message chain before delivery is cut off.
pub const MAX_DEPTH: usize = 1000;

type ControlMessage = (String, Vec<Atom>);

/// A hook invocation waiting on the dispatch stack.
enum Delivery {
    Inlet(NodeKey, usize, Rc<Message>),
    Receive(NodeKey, Rc<Message>),
}

/// Posts named messages into a [`Runtime`] from another thread.
///
/// Messages are buffered in a lock-free ring buffer and delivered at the start
/// of the next block, stamped with that block's start time.
///
/// ```
/// use patchbay::{Atom, ObjectLibrary, Runtime, Settings};
///
/// let mut runtime = Runtime::new(Settings::default(), ObjectLibrary::default());
/// let mut sender = runtime.control_queue(64);
///
/// std::thread::spawn(move || {
///     sender.send("volume", vec![Atom::Float(0.5)]).ok();
/// })
/// .join()
/// .unwrap();
/// ```
pub struct ControlSender {
    producer: Producer<ControlMessage>,
}

impl ControlSender {
    /// Queue `atoms` for every `receive` named `receiver`.
    ///
    /// Returns the atoms back if the queue is full.
    pub fn send(&mut self, receiver: &str, atoms: Vec<Atom>) -> Result<(), Vec<Atom>> {
        self.producer
            .push((receiver.to_owned(), atoms))
            .map_err(|rtrb::PushError::Full((_, atoms))| atoms)
    }
}

/// Owns every patch and drives them block by block.
///
/// # Building
///
/// Patches are either built by hand with [`create_patch`](Self::create_patch),
/// [`create_object`](Self::create_object) and [`connect`](Self::connect), or
/// loaded from a [`PatchDescription`](crate::PatchDescription) with
/// [`load_patch`](Self::load_patch):
///
/// ```
/// use patchbay::{Atom, ObjectLibrary, Runtime, Settings};
///
/// let mut runtime = Runtime::new(Settings::default(), ObjectLibrary::default());
/// let patch = runtime.create_patch(vec![]);
/// let osc = runtime.create_object(patch, "osc~", vec![Atom::Float(440.0)]).unwrap();
/// let dac = runtime.create_object(patch, "dac~", vec![]).unwrap();
///
/// let from = runtime.outlet(osc, 0).unwrap();
/// let to = runtime.inlet(dac, 0).unwrap();
/// assert!(runtime.connect(from, to).unwrap());
/// ```
///
/// # Running
///
/// [`start`](Self::start) starts every object, then activates every portlet.
/// Each call to [`process_block`](Self::process_block) fires the clock events
/// due before the end of the block, then pulls the DSP endpoints:
///
/// ```
/// # use patchbay::{Atom, ObjectLibrary, Runtime, Settings};
/// # let mut runtime = Runtime::new(Settings::default(), ObjectLibrary::default());
/// # let patch = runtime.create_patch(vec![]);
/// # let sig = runtime.create_object(patch, "sig~", vec![Atom::Float(0.25)]).unwrap();
/// # let dac = runtime.create_object(patch, "dac~", vec![]).unwrap();
/// # runtime.connect(runtime.outlet(sig, 0).unwrap(), runtime.inlet(dac, 0).unwrap()).unwrap();
/// runtime.start();
/// let output = runtime.process_block();
/// assert_eq!(output[0][0], 0.25);
/// ```
pub struct Runtime {
    settings: Settings,
    library: ObjectLibrary,
    /// Live nodes. Removed nodes free their slot; keys keep counting up.
    nodes: HashMap<NodeKey, NodeSlot>,
    next_key: u32,
    roots: Vec<NodeKey>,
    root_ids: IdAllocator,
    next_patch_id: u32,
    clock: Clock<Timeout>,
    names: NamedObjectStore,
    dsp: DspGraph,
    running: bool,
    frame: u64,
    output: Vec<Buffer>,
    controls: Vec<Consumer<ControlMessage>>,
    depth: usize,
    /// Abstractions being populated, outermost first.
    instantiating: Vec<String>,
}

impl Runtime {
    pub fn new(settings: Settings, library: ObjectLibrary) -> Self {
        let mut names = NamedObjectStore::new();
        names.set_unique(names::ARRAY);
        names.set_unique(names::DELAY_LINE);

        Self {
            clock: Clock::new(settings.block_duration()),
            output: vec![Buffer::SILENT; settings.channel_count],
            settings,
            library,
            nodes: HashMap::new(),
            next_key: 0,
            roots: Vec::new(),
            root_ids: IdAllocator::default(),
            next_patch_id: FIRST_PATCH_ID,
            names,
            dsp: DspGraph::new(),
            running: false,
            frame: 0,
            controls: Vec::new(),
            depth: 0,
            instantiating: Vec::new(),
        }
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.settings.sample_rate
    }

    #[inline]
    pub fn library(&self) -> &ObjectLibrary {
        &self.library
    }

    #[inline]
    pub fn library_mut(&mut self) -> &mut ObjectLibrary {
        &mut self.library
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start time (ms) of the next block to be processed.
    #[inline]
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Number of blocks processed so far.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// The named-object store, e.g. to subscribe to its events.
    #[inline]
    pub fn names(&self) -> &NamedObjectStore {
        &self.names
    }

    #[inline]
    pub fn names_mut(&mut self) -> &mut NamedObjectStore {
        &mut self.names
    }

    /// Output bus of the last processed block, one buffer per channel.
    #[inline]
    pub fn output(&self) -> &[Buffer] {
        &self.output
    }

    #[inline]
    pub fn dsp_wire_count(&self) -> usize {
        self.dsp.wire_count()
    }

    /// Root patches, in creation order.
    #[inline]
    pub fn roots(&self) -> &[NodeKey] {
        &self.roots
    }

    #[inline]
    pub fn contains(&self, node: NodeKey) -> bool {
        self.slot(node).is_ok()
    }

    /// Container-scoped id of `node`.
    pub fn node_id(&self, node: NodeKey) -> Option<u32> {
        self.slot(node).ok().map(|slot| slot.id)
    }

    /// Container of `node`, `None` for root patches.
    pub fn parent(&self, node: NodeKey) -> Option<NodeKey> {
        self.slot(node).ok().and_then(|slot| slot.parent)
    }

    pub fn type_name(&self, node: NodeKey) -> Option<&str> {
        self.slot(node).ok().map(|slot| slot.type_name.as_str())
    }

    /// Resolved creation arguments of `node`.
    pub fn args(&self, node: NodeKey) -> Option<&[Atom]> {
        self.slot(node).ok().map(|slot| slot.args.as_slice())
    }

    pub fn is_patch(&self, node: NodeKey) -> bool {
        self.slot(node).map_or(false, |slot| slot.patch().is_some())
    }

    /// `patch_id` of a root patch or abstraction instance.
    pub fn patch_id(&self, patch: NodeKey) -> Option<u32> {
        self.slot(patch).ok()?.patch()?.patch_id
    }

    /// Objects of `patch`, in creation order.
    pub fn objects(&self, patch: NodeKey) -> &[NodeKey] {
        self.slot(patch)
            .ok()
            .and_then(NodeSlot::patch)
            .map(|p| p.objects.as_slice())
            .unwrap_or(&[])
    }

    pub fn end_points(&self, patch: NodeKey) -> &[NodeKey] {
        self.slot(patch)
            .ok()
            .and_then(NodeSlot::patch)
            .map(|p| p.end_points.as_slice())
            .unwrap_or(&[])
    }

    /// Inlet `index` of `node`. For a patch, the outer inlet of its
    /// `index`th boundary `inlet`/`inlet~` object.
    pub fn inlet(&self, node: NodeKey, index: usize) -> Result<PortletRef, PatchError> {
        self.portlet_ref(node, Direction::Inlet, index)
    }

    /// Outlet `index` of `node`. For a patch, the outer outlet of its
    /// `index`th boundary `outlet`/`outlet~` object.
    pub fn outlet(&self, node: NodeKey, index: usize) -> Result<PortletRef, PatchError> {
        self.portlet_ref(node, Direction::Outlet, index)
    }

    pub fn inlet_count(&self, node: NodeKey) -> usize {
        match self.slot(node) {
            Ok(slot) => slot.patch().map_or(slot.inlets.len(), |p| p.inlets.len()),
            Err(_) => 0,
        }
    }

    pub fn outlet_count(&self, node: NodeKey) -> usize {
        match self.slot(node) {
            Ok(slot) => slot.patch().map_or(slot.outlets.len(), |p| p.outlets.len()),
            Err(_) => 0,
        }
    }

    /// Ordered peers of a portlet.
    pub fn peers(&self, portlet: PortletRef) -> Result<&[PortletRef], PatchError> {
        self.portlet(portlet).map(|p| p.peers.as_slice())
    }

    /// Create an empty root patch with a fresh `patch_id`.
    pub fn create_patch(&mut self, args: Vec<Atom>) -> NodeKey {
        let patch_id = self.allocate_patch_id();
        let id = self.root_ids.next();
        let key = self.insert(NodeSlot {
            id,
            parent: None,
            type_name: "patch".into(),
            args,
            inlets: Vec::new(),
            outlets: Vec::new(),
            body: Body::Patch(Patch::new(Some(patch_id))),
        });
        self.roots.push(key);
        tracing::debug!(?key, patch_id, "created root patch");
        key
    }

    /// Create an object, subpatch (`pd`) or abstraction instance in `patch`.
    ///
    /// If the runtime is running, the new node is started right away.
    pub fn create_object(&mut self, patch: NodeKey, type_name: &str, args: Vec<Atom>) -> Result<NodeKey, PatchError> {
        self.container(patch)?;

        if type_name == ObjectLibrary::SUBPATCH {
            let args = self.resolve_args(patch, &args)?;
            return self.add_patch(patch, type_name, args, None);
        }
        if let Some(description) = self.library.abstraction(type_name) {
            if self.instantiating.iter().any(|name| name == type_name) {
                return Err(PatchError::InvalidArgument(format!("recursive abstraction '{}'", type_name)));
            }
            let args = self.resolve_args(patch, &args)?;
            let patch_id = self.allocate_patch_id();
            let key = self.add_patch(patch, type_name, args, Some(patch_id))?;

            self.instantiating.push(type_name.to_owned());
            let populated = self.populate(key, &description);
            self.instantiating.pop();
            if let Err(e) = populated {
                self.remove_object(key)?;
                return Err(e.into());
            }
            return Ok(key);
        }

        let object_type = self
            .library
            .get(type_name)
            .cloned()
            .ok_or_else(|| PatchError::UnknownObject(type_name.to_owned()))?;
        let args = match object_type.resolves_args {
            true => self.resolve_args(patch, &args)?,
            false => args,
        };
        let Instance { object, inlets, outlets } = (object_type.factory)(&args)?;

        let key = NodeKey(self.next_key);
        let container = self.container(patch)?;
        let id = container.ids.next();
        container.objects.push(key);
        match object_type.role {
            Role::Plain => {}
            Role::EndPoint => container.end_points.push(key),
            Role::Inlet => container.inlets.push(PortletRef::inlet(key, 0)),
            Role::Outlet => container.outlets.push(PortletRef::outlet(key, 0)),
        }
        self.insert(NodeSlot {
            id,
            parent: Some(patch),
            type_name: type_name.to_owned(),
            args,
            inlets: inlets.into_iter().map(Portlet::new).collect(),
            outlets: outlets.into_iter().map(Portlet::new).collect(),
            body: Body::Object(object),
        });

        let now = self.clock.now();
        if let Some(Err(e)) = self.call(key, now, |object, ctx| object.init(ctx)) {
            self.remove_object(key)?;
            return Err(e);
        }
        if self.running {
            self.call(key, now, |object, ctx| object.start(ctx));
            self.activate(key);
        }

        tracing::debug!(?key, ?patch, type_name, "created object");
        Ok(key)
    }

    /// Resolve `args` against the root of `patch`: the nearest enclosing root
    /// patch or abstraction instance. The context is `[patch_id, ...args]`.
    pub fn resolve_args(&self, patch: NodeKey, args: &[Atom]) -> Result<Vec<Atom>, PatchError> {
        let root = self.slot(self.root_of(patch)?)?;
        let patch_id = root.patch().and_then(|p| p.patch_id).unwrap_or(0);

        let mut context = Vec::with_capacity(root.args.len() + 1);
        context.push(Atom::Float(patch_id as f64));
        context.extend(root.args.iter().cloned());
        resolve(args, &context)
    }

    /// Connect an outlet and an inlet, given in either order.
    ///
    /// Returns `Ok(false)` if they were already connected.
    pub fn connect(&mut self, a: PortletRef, b: PortletRef) -> Result<bool, PatchError> {
        let (outlet, inlet) = order(a, b)?;
        let out_spec = self.portlet(outlet)?.spec;
        let in_spec = self.portlet(inlet)?.spec;

        if out_spec.kind == PortletKind::Dsp && in_spec.kind == PortletKind::Message {
            return Err(PatchError::InvalidPortlet(format!(
                "signal outlet of '{}' cannot feed message inlet of '{}'",
                self.type_name(outlet.node).unwrap_or("?"),
                self.type_name(inlet.node).unwrap_or("?"),
            )));
        }
        if self.parent(outlet.node) != self.parent(inlet.node) && !out_spec.cross_patch && !in_spec.cross_patch {
            return Err(PatchError::CrossPatchConnection);
        }
        if self.portlet(outlet)?.has_peer(&inlet) {
            return Ok(false);
        }

        self.portlet_mut(outlet)?.peers.push(inlet);
        self.portlet_mut(inlet)?.peers.push(outlet);
        tracing::debug!(?outlet, ?inlet, "connected");

        let both_dsp = out_spec.kind == PortletKind::Dsp && in_spec.kind == PortletKind::Dsp;
        if self.running && both_dsp {
            self.dsp.wire(outlet.node, outlet.index, inlet.node, inlet.index);
        }

        let now = self.clock.now();
        self.call(outlet.node, now, |object, ctx| object.connected(outlet, inlet, ctx));
        self.call(inlet.node, now, |object, ctx| object.connected(inlet, outlet, ctx));
        Ok(true)
    }

    /// Remove the edge between two portlets. Returns whether it existed.
    pub fn disconnect(&mut self, a: PortletRef, b: PortletRef) -> Result<bool, PatchError> {
        let (outlet, inlet) = order(a, b)?;
        let both_dsp = self.portlet(outlet)?.is_dsp() && self.portlet(inlet)?.is_dsp();

        let removed = self.portlet_mut(outlet)?.remove_peer(&inlet);
        let removed = self.portlet_mut(inlet)?.remove_peer(&outlet) || removed;
        if !removed {
            return Ok(false);
        }
        tracing::debug!(?outlet, ?inlet, "disconnected");

        if self.running && both_dsp {
            self.dsp.unwire(outlet.node, outlet.index, inlet.node, inlet.index);
        }

        let now = self.clock.now();
        self.call(outlet.node, now, |object, ctx| object.disconnected(outlet, inlet, ctx));
        self.call(inlet.node, now, |object, ctx| object.disconnected(inlet, outlet, ctx));
        Ok(true)
    }

    /// Start every object of every root patch, then activate every portlet.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;

        let roots = self.roots.clone();
        for &root in &roots {
            self.start_objects(root);
        }
        for &root in &roots {
            self.start_portlets(root);
        }
        tracing::debug!(wires = self.dsp.wire_count(), "runtime started");
    }

    /// Deactivate every portlet, then stop every object.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        let roots = self.roots.clone();
        for &root in &roots {
            self.stop_portlets(root);
        }
        for &root in &roots {
            self.stop_objects(root);
        }
        self.running = false;
        tracing::debug!("runtime stopped");
    }

    /// Remove a node from its container, tearing down everything it holds:
    /// edges, DSP unit, names, references and clock events. Patches are
    /// emptied depth-first first.
    pub fn remove_object(&mut self, node: NodeKey) -> Result<(), PatchError> {
        let slot = self.slot(node)?;
        let parent = slot.parent;
        let now = self.clock.now();

        match slot.patch() {
            Some(patch) => {
                for child in patch.objects.clone().into_iter().rev() {
                    self.remove_object(child)?;
                }
            }
            None => {
                for (own, peer) in slot.edges(node) {
                    self.disconnect(own, peer)?;
                }
                if self.running {
                    self.deactivate(node);
                    self.call(node, now, |object, ctx| object.stop(ctx));
                }
                self.call(node, now, |object, ctx| object.destroy(ctx));
                self.dsp.uninstall(node);
            }
        }

        self.names.unregister_node(node);
        self.names.drop_references_of(node);
        self.clock.cancel_where(|timeout| timeout.node == node);
        match parent {
            Some(parent) => {
                if let Ok(Some(container)) = self.slot_mut(parent).map(NodeSlot::patch_mut) {
                    container.remove(node);
                }
            }
            None => self.roots.retain(|root| *root != node),
        }
        self.nodes.remove(&node);
        tracing::debug!(?node, "removed node");

        self.notify_references();
        Ok(())
    }

    /// Destroy a patch (root or nested) and everything in it.
    pub fn destroy_patch(&mut self, patch: NodeKey) -> Result<(), PatchError> {
        self.container(patch)?;
        self.remove_object(patch)
    }

    /// Move `node`'s `kind` registration to `new_name`. References bound to
    /// it let go; references waiting for `new_name` bind to it.
    pub fn rename_object(&mut self, node: NodeKey, kind: &str, new_name: &str) -> Result<(), PatchError> {
        self.slot(node)?;
        let old = self
            .names
            .names_of(node)
            .into_iter()
            .find(|(k, _)| k == kind)
            .map(|(_, name)| name)
            .ok_or_else(|| PatchError::InvalidArgument(format!("node is not registered as a '{}'", kind)))?;

        self.names.rename(kind, &old, new_name, node)?;
        self.notify_references();
        Ok(())
    }

    /// Deliver `atoms` to an inlet, stamped with the current block time.
    pub fn send(&mut self, inlet: PortletRef, atoms: Vec<Atom>) -> Result<(), PatchError> {
        if inlet.direction != Direction::Inlet {
            return Err(PatchError::InvalidPortlet(format!("cannot send to {} {}", inlet.direction, inlet.index)));
        }
        self.portlet(inlet)?;

        let msg = Rc::new(Message { atoms, time_tag: self.clock.now() });
        self.run(vec![Delivery::Inlet(inlet.node, inlet.index, msg)]);
        Ok(())
    }

    /// Deliver `atoms` to every `receive` named `name`, stamped with the
    /// current block time.
    pub fn send_named(&mut self, name: &str, atoms: Vec<Atom>) {
        let msg = Message { atoms, time_tag: self.clock.now() };
        let mut deliveries = Vec::new();
        self.push_receivers(name, msg, &mut deliveries);
        deliveries.reverse();
        self.run(deliveries);
    }

    /// Create a lock-free queue for posting named messages from another
    /// thread. See [`ControlSender`].
    pub fn control_queue(&mut self, capacity: usize) -> ControlSender {
        let (producer, consumer) = RingBuffer::new(capacity);
        self.controls.push(consumer);
        ControlSender { producer }
    }

    /// Render one block and return the output bus.
    ///
    /// Queued control messages are delivered first, then every clock event
    /// due before the end of the block fires, then the DSP endpoints are
    /// pulled, then any unit they did not reach. A stopped runtime outputs
    /// silence and does not advance.
    pub fn process_block(&mut self) -> &[Buffer] {
        let _span = tracing::trace_span!("block", frame = self.frame).entered();
        for bus in self.output.iter_mut() {
            *bus = Buffer::SILENT;
        }
        if !self.running {
            return &self.output;
        }

        self.drain_controls();
        self.tick();

        let ctx = BlockContext {
            sample_rate: self.settings.sample_rate,
            block_start: self.clock.now(),
            frame: self.frame,
        };
        let mut end_points = Vec::new();
        for &root in &self.roots {
            self.collect_end_points(root, &mut end_points);
        }
        for end_point in end_points {
            let outputs = match self.dsp.pull(end_point, &ctx) {
                Some(outputs) => outputs,
                None => continue,
            };
            for (bus, channel) in self.output.iter_mut().zip(outputs) {
                for (b, s) in bus.iter_mut().zip(channel.iter()) {
                    *b += *s;
                }
            }
        }
        self.dsp.finish_block(&ctx);

        self.frame += 1;
        self.clock.set_now(self.frame as f64 * self.settings.block_duration());
        &self.output
    }

    fn tick(&mut self) {
        while let Some(due) = self.clock.pop_due() {
            let Timeout { node, token } = due.payload;
            tracing::trace!(?node, token, deadline = due.deadline, "timeout");
            self.call(node, due.deadline, |object, ctx| object.timeout(token, ctx));
            if self.contains(node) {
                self.clock.finish(due);
            }
        }
    }

    fn drain_controls(&mut self) {
        let mut pending = Vec::new();
        for consumer in self.controls.iter_mut() {
            while let Ok(message) = consumer.pop() {
                pending.push(message);
            }
        }
        self.controls.retain(|consumer| !consumer.is_abandoned());

        for (name, atoms) in pending {
            self.send_named(&name, atoms);
        }
    }

    fn collect_end_points(&self, node: NodeKey, out: &mut Vec<NodeKey>) {
        if let Some(patch) = self.slot(node).ok().and_then(NodeSlot::patch) {
            out.extend_from_slice(&patch.end_points);
            for &child in &patch.objects {
                self.collect_end_points(child, out);
            }
        }
    }

    fn start_objects(&mut self, node: NodeKey) {
        match self.children(node) {
            Some(children) => children.into_iter().for_each(|child| self.start_objects(child)),
            None => {
                let now = self.clock.now();
                self.call(node, now, |object, ctx| object.start(ctx));
            }
        }
    }

    fn start_portlets(&mut self, node: NodeKey) {
        match self.children(node) {
            Some(children) => children.into_iter().for_each(|child| self.start_portlets(child)),
            None => self.activate(node),
        }
    }

    fn stop_portlets(&mut self, node: NodeKey) {
        match self.children(node) {
            Some(children) => children.into_iter().for_each(|child| self.stop_portlets(child)),
            None => self.deactivate(node),
        }
    }

    fn stop_objects(&mut self, node: NodeKey) {
        match self.children(node) {
            Some(children) => children.into_iter().for_each(|child| self.stop_objects(child)),
            None => {
                let now = self.clock.now();
                self.call(node, now, |object, ctx| object.stop(ctx));
                self.dsp.uninstall(node);
            }
        }
    }

    /// Wire every DSP outlet of `node` to its DSP peers.
    fn activate(&mut self, node: NodeKey) {
        let wires: Vec<(usize, PortletRef)> = match self.slot(node) {
            Ok(slot) => slot
                .outlets
                .iter()
                .enumerate()
                .filter(|(_, portlet)| portlet.is_dsp())
                .flat_map(|(index, portlet)| portlet.peers.iter().map(move |peer| (index, *peer)))
                .collect(),
            Err(_) => return,
        };
        for (outlet, peer) in wires {
            if self.portlet(peer).map_or(false, Portlet::is_dsp) {
                self.dsp.wire(node, outlet, peer.node, peer.index);
            }
        }
    }

    fn deactivate(&mut self, node: NodeKey) {
        let outlets: Vec<usize> = match self.slot(node) {
            Ok(slot) => slot
                .outlets
                .iter()
                .enumerate()
                .filter(|(_, portlet)| portlet.is_dsp())
                .map(|(index, _)| index)
                .collect(),
            Err(_) => return,
        };
        for outlet in outlets {
            self.dsp.unwire_outlet(node, outlet);
        }
    }

    /// Run one hook of an object, then deliver what it emitted.
    ///
    /// Returns `None` if `node` is not a live object.
    fn call<R>(
        &mut self,
        node: NodeKey,
        time_tag: f64,
        hook: impl FnOnce(&mut dyn Object, &mut Context<'_>) -> R,
    ) -> Option<R> {
        let (result, emissions) = self.invoke(node, time_tag, hook)?;
        let deliveries = self.deliveries(node, emissions);
        self.run(deliveries);
        Some(result)
    }

    /// Run one hook of an object and collect its emissions.
    fn invoke<R>(
        &mut self,
        node: NodeKey,
        time_tag: f64,
        hook: impl FnOnce(&mut dyn Object, &mut Context<'_>) -> R,
    ) -> Option<(R, Vec<Emission>)> {
        let mut emissions = Vec::new();
        let Runtime { nodes, settings, clock, names, dsp, running, .. } = self;
        let object = match nodes.get_mut(&node).map(|slot| &mut slot.body) {
            Some(Body::Object(object)) => object,
            _ => return None,
        };
        let mut ctx = Context {
            node,
            time_tag,
            running: *running,
            settings: &*settings,
            clock,
            names,
            dsp,
            emissions: &mut emissions,
        };
        let result = hook(object.as_mut(), &mut ctx);
        Some((result, emissions))
    }

    /// Deliver `deliveries` (in reverse order) and everything they trigger,
    /// depth-first.
    ///
    /// Each level of the stack holds what one hook emitted; a level is
    /// finished before the next delivery of the level below it starts.
    /// Chains deeper than [`MAX_DEPTH`] are cut off.
    fn run(&mut self, deliveries: Vec<Delivery>) {
        let mut stack = vec![deliveries];
        loop {
            let delivery = match stack.last_mut() {
                Some(level) => level.pop(),
                None => break,
            };
            let delivery = match delivery {
                Some(delivery) => delivery,
                None => {
                    stack.pop();
                    self.depth += stack.len();
                    self.notify_references();
                    self.depth -= stack.len();
                    continue;
                }
            };

            let (node, invoked) = match delivery {
                Delivery::Inlet(node, inlet, msg) => {
                    (node, self.invoke(node, msg.time_tag, |object, ctx| object.message(inlet, &msg, ctx)))
                }
                Delivery::Receive(node, msg) => {
                    (node, self.invoke(node, msg.time_tag, |object, ctx| object.received(&msg, ctx)))
                }
            };
            let emissions = match invoked {
                Some(((), emissions)) => emissions,
                None => continue,
            };

            if self.depth + stack.len() >= MAX_DEPTH {
                if !emissions.is_empty() {
                    tracing::warn!(?node, depth = MAX_DEPTH, "stack overflow, messages dropped");
                }
                stack.push(Vec::new());
            } else {
                let next = self.deliveries(node, emissions);
                stack.push(next);
            }
        }
    }

    /// Expand what `source` emitted into deliveries, last one first.
    fn deliveries(&self, source: NodeKey, emissions: Vec<Emission>) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for emission in emissions {
            match emission {
                Emission::Outlet(outlet, msg) => {
                    let peers = match self.slot(source).ok().and_then(|slot| slot.outlets.get(outlet)) {
                        Some(portlet) if !portlet.is_dsp() => &portlet.peers,
                        Some(_) => {
                            tracing::warn!(node = ?source, outlet, "message sent out of a signal outlet");
                            continue;
                        }
                        None => {
                            tracing::warn!(node = ?source, outlet, "message sent out of a missing outlet");
                            continue;
                        }
                    };
                    let msg = Rc::new(msg);
                    deliveries.extend(peers.iter().map(|peer| Delivery::Inlet(peer.node, peer.index, msg.clone())));
                }
                Emission::Named(name, msg) => self.push_receivers(&name, msg, &mut deliveries),
            }
        }
        deliveries.reverse();
        deliveries
    }

    fn push_receivers(&self, name: &str, msg: Message, deliveries: &mut Vec<Delivery>) {
        let receivers = self.names.find_all(names::RECEIVE, name);
        if receivers.is_empty() {
            tracing::debug!(name, %msg, "no receiver");
            return;
        }
        let msg = Rc::new(msg);
        deliveries.extend(receivers.iter().map(|entry| Delivery::Receive(entry.node, msg.clone())));
    }

    fn notify_references(&mut self) {
        loop {
            let changed = self.names.take_changed();
            if changed.is_empty() {
                break;
            }
            let now = self.clock.now();
            for (reference, holder) in changed {
                self.call(holder, now, |object, ctx| object.reference_changed(reference, ctx));
            }
        }
    }

    /// Insert a nested patch in `parent`.
    pub(crate) fn add_patch(
        &mut self,
        parent: NodeKey,
        type_name: &str,
        args: Vec<Atom>,
        patch_id: Option<u32>,
    ) -> Result<NodeKey, PatchError> {
        let key = NodeKey(self.next_key);
        let container = self.container(parent)?;
        let id = container.ids.next();
        container.objects.push(key);

        self.insert(NodeSlot {
            id,
            parent: Some(parent),
            type_name: type_name.to_owned(),
            args,
            inlets: Vec::new(),
            outlets: Vec::new(),
            body: Body::Patch(Patch::new(patch_id)),
        });
        tracing::debug!(?key, ?parent, type_name, ?patch_id, "created patch");
        Ok(key)
    }

    fn allocate_patch_id(&mut self) -> u32 {
        let id = self.next_patch_id;
        self.next_patch_id += 1;
        id
    }

    fn insert(&mut self, slot: NodeSlot) -> NodeKey {
        let key = NodeKey(self.next_key);
        self.next_key += 1;
        self.nodes.insert(key, slot);
        key
    }

    fn root_of(&self, mut node: NodeKey) -> Result<NodeKey, PatchError> {
        loop {
            let slot = self.slot(node)?;
            if slot.patch().map_or(false, |p| p.patch_id.is_some()) {
                return Ok(node);
            }
            match slot.parent {
                Some(parent) => node = parent,
                None => return Ok(node),
            }
        }
    }

    fn children(&self, node: NodeKey) -> Option<Vec<NodeKey>> {
        self.slot(node).ok()?.patch().map(|p| p.objects.clone())
    }

    fn slot(&self, node: NodeKey) -> Result<&NodeSlot, PatchError> {
        self.nodes.get(&node).ok_or(PatchError::UnknownNode)
    }

    fn slot_mut(&mut self, node: NodeKey) -> Result<&mut NodeSlot, PatchError> {
        self.nodes.get_mut(&node).ok_or(PatchError::UnknownNode)
    }

    fn container(&mut self, patch: NodeKey) -> Result<&mut Patch, PatchError> {
        self.slot_mut(patch)?
            .patch_mut()
            .ok_or_else(|| PatchError::InvalidArgument("node is not a patch".into()))
    }

    fn portlet_ref(&self, node: NodeKey, direction: Direction, index: usize) -> Result<PortletRef, PatchError> {
        let slot = self.slot(node)?;
        let portlet = PortletRef { node, direction, index };
        let found = match (slot.patch(), direction) {
            (Some(patch), Direction::Inlet) => patch.inlets.get(index).copied(),
            (Some(patch), Direction::Outlet) => patch.outlets.get(index).copied(),
            (None, _) => self.portlet(portlet).ok().map(|_| portlet),
        };
        found.ok_or_else(|| missing_portlet(slot, portlet))
    }

    fn portlet(&self, portlet: PortletRef) -> Result<&Portlet, PatchError> {
        let slot = self.slot(portlet.node)?;
        let list = match portlet.direction {
            Direction::Inlet => &slot.inlets,
            Direction::Outlet => &slot.outlets,
        };
        list.get(portlet.index).ok_or_else(|| missing_portlet(slot, portlet))
    }

    fn portlet_mut(&mut self, portlet: PortletRef) -> Result<&mut Portlet, PatchError> {
        let slot = self.slot_mut(portlet.node)?;
        let type_name = slot.type_name.clone();
        let list = match portlet.direction {
            Direction::Inlet => &mut slot.inlets,
            Direction::Outlet => &mut slot.outlets,
        };
        list.get_mut(portlet.index).ok_or_else(|| {
            PatchError::InvalidPortlet(format!("'{}' has no {} {}", type_name, portlet.direction, portlet.index))
        })
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
        for root in self.roots.clone() {
            if let Err(e) = self.remove_object(root) {
                tracing::warn!(?root, error = %e, "failed to tear down patch");
            }
        }
    }
}

fn order(a: PortletRef, b: PortletRef) -> Result<(PortletRef, PortletRef), PatchError> {
    match (a.direction, b.direction) {
        (Direction::Outlet, Direction::Inlet) => Ok((a, b)),
        (Direction::Inlet, Direction::Outlet) => Ok((b, a)),
        (direction, _) => Err(PatchError::InvalidPortlet(format!("cannot connect two {}s", direction))),
    }
}

fn missing_portlet(slot: &NodeSlot, portlet: PortletRef) -> PatchError {
    PatchError::InvalidPortlet(format!("'{}' has no {} {}", slot.type_name, portlet.direction, portlet.index))
}
