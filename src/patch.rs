//! Patch containers and the node arena slots they point into.

use crate::message::Atom;
use crate::node::{NodeKey, Object};
use crate::portlet::{Portlet, PortletRef};

/// First `patch_id` handed out. Root patches and abstraction instances
/// count up from here, runtime-wide.
pub const FIRST_PATCH_ID: u32 = 1000;

/// Per-container monotonic id counter. Ids are never reused.
#[derive(Clone, Debug, Default)]
pub(crate) struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn next(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// A node that also contains other nodes.
#[derive(Default)]
pub(crate) struct Patch {
    pub objects: Vec<NodeKey>,
    /// Objects pulled every block (`dac~`, `delwrite~`, ...).
    pub end_points: Vec<NodeKey>,
    /// Outer portlets of this patch's boundary objects, in creation order.
    pub inlets: Vec<PortletRef>,
    pub outlets: Vec<PortletRef>,
    /// Set for root patches and abstraction instances only.
    pub patch_id: Option<u32>,
    pub ids: IdAllocator,
}

impl Patch {
    pub fn new(patch_id: Option<u32>) -> Self {
        Self { patch_id, ..Self::default() }
    }

    /// Forget `node`; its mirrored portlets disappear with it.
    pub fn remove(&mut self, node: NodeKey) {
        self.objects.retain(|n| *n != node);
        self.end_points.retain(|n| *n != node);
        self.inlets.retain(|p| p.node != node);
        self.outlets.retain(|p| p.node != node);
    }
}

pub(crate) enum Body {
    Object(Box<dyn Object>),
    Patch(Patch),
}

/// Everything the runtime stores about one node.
pub(crate) struct NodeSlot {
    /// Container-scoped id.
    pub id: u32,
    /// Owning container, `None` for root patches.
    pub parent: Option<NodeKey>,
    pub type_name: String,
    /// Creation arguments after resolution.
    pub args: Vec<Atom>,
    pub inlets: Vec<Portlet>,
    pub outlets: Vec<Portlet>,
    pub body: Body,
}

impl NodeSlot {
    pub fn patch(&self) -> Option<&Patch> {
        match &self.body {
            Body::Patch(patch) => Some(patch),
            Body::Object(_) => None,
        }
    }

    pub fn patch_mut(&mut self) -> Option<&mut Patch> {
        match &mut self.body {
            Body::Patch(patch) => Some(patch),
            Body::Object(_) => None,
        }
    }

    /// Every edge touching this node, as `(own, peer)` pairs.
    pub fn edges(&self, key: NodeKey) -> Vec<(PortletRef, PortletRef)> {
        let inlets = self.inlets.iter().enumerate().flat_map(move |(index, portlet)| {
            portlet.peers.iter().map(move |peer| (PortletRef::inlet(key, index), *peer))
        });
        let outlets = self.outlets.iter().enumerate().flat_map(move |(index, portlet)| {
            portlet.peers.iter().map(move |peer| (PortletRef::outlet(key, index), *peer))
        });
        inlets.chain(outlets).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let mut ids = IdAllocator::default();
        assert_eq!((ids.next(), ids.next(), ids.next()), (0, 1, 2));
    }

    #[test]
    fn removing_a_boundary_object_drops_its_mirror() {
        let mut patch = Patch::new(None);
        let (a, b) = (NodeKey(1), NodeKey(2));
        patch.objects.extend([a, b]);
        patch.inlets.push(PortletRef::inlet(a, 0));
        patch.inlets.push(PortletRef::inlet(b, 0));

        patch.remove(a);
        assert_eq!(patch.objects, vec![b]);
        assert_eq!(patch.inlets, vec![PortletRef::inlet(b, 0)]);
    }
}
