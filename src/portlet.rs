//! Connection endpoints.

use core::fmt;

use crate::node::NodeKey;

/// Inlet or outlet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    Inlet,
    Outlet,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inlet => f.write_str("inlet"),
            Direction::Outlet => f.write_str("outlet"),
        }
    }
}

/// What travels through a portlet.
///
/// DSP inlets also accept control messages, like in Pd.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PortletKind {
    Message,
    Dsp,
}

/// Static declaration of one portlet, produced by an object factory.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PortletSpec {
    pub kind: PortletKind,
    /// May be connected to portlets of another patch (boundary objects).
    pub cross_patch: bool,
}

impl PortletSpec {
    pub const MESSAGE: Self = Self { kind: PortletKind::Message, cross_patch: false };
    pub const DSP: Self = Self { kind: PortletKind::Dsp, cross_patch: false };

    pub fn crossing(mut self) -> Self {
        self.cross_patch = true;
        self
    }
}

/// Address of a portlet: owning node, direction and index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PortletRef {
    pub node: NodeKey,
    pub direction: Direction,
    pub index: usize,
}

impl PortletRef {
    #[inline]
    pub fn inlet(node: NodeKey, index: usize) -> Self {
        Self { node, direction: Direction::Inlet, index }
    }

    #[inline]
    pub fn outlet(node: NodeKey, index: usize) -> Self {
        Self { node, direction: Direction::Outlet, index }
    }
}

/// A live portlet: its declaration plus the ordered peer list.
#[derive(Clone, Debug)]
pub(crate) struct Portlet {
    pub(crate) spec: PortletSpec,
    pub(crate) peers: Vec<PortletRef>,
}

impl Portlet {
    pub(crate) fn new(spec: PortletSpec) -> Self {
        Self { spec, peers: Vec::new() }
    }

    #[inline]
    pub(crate) fn is_dsp(&self) -> bool {
        self.spec.kind == PortletKind::Dsp
    }

    #[inline]
    pub(crate) fn has_peer(&self, peer: &PortletRef) -> bool {
        self.peers.contains(peer)
    }

    pub(crate) fn remove_peer(&mut self, peer: &PortletRef) -> bool {
        match self.peers.iter().position(|p| p == peer) {
            Some(pos) => {
                self.peers.remove(pos);
                true
            }
            None => false,
        }
    }
}
