//! DSP graph - installed audio units and the wires between them
//!
//! Objects with signal portlets install a [`DspUnit`] when they start. Wires
//! are added by DSP outlets when their portlets activate (or when a connection
//! is made while running) and removed again when they deactivate. Rendering is
//! pull-based: the runtime pulls each endpoint once per block, every vertex
//! pulls its sources first, and outputs are cached per frame so a signal
//! fanned out to several sinks is only computed once. Units no endpoint
//! reached are rendered last, so every unit consumes its controls and keeps
//! time whether or not anything listens.

use dasp_graph::Buffer;
use hashbrown::HashMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction as Flow;

use crate::node::NodeKey;

/// Information available while rendering one block.
///
/// Passed to every [`DspUnit::process`] call.
#[derive(Clone, Copy, Debug)]
pub struct BlockContext {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Virtual time (ms) of the first sample of the block
    pub block_start: f64,
    /// Index of the block being rendered
    pub frame: u64,
}

impl BlockContext {
    /// Fractional sample position of `time_tag` relative to the block start.
    ///
    /// Negative for tags in the past, `>= Buffer::LEN` for tags after this
    /// block.
    #[inline]
    pub fn sample_offset(&self, time_tag: f64) -> f64 {
        (time_tag - self.block_start) * self.sample_rate as f64 / 1000.0
    }

    /// Duration of one sample in ms.
    #[inline]
    pub fn sample_duration(&self) -> f64 {
        1000.0 / self.sample_rate as f64
    }
}

/// A time-tagged parameter change for a unit, sent by its owning object.
#[derive(Clone, Debug, PartialEq)]
pub struct Control {
    /// Unit-defined parameter slot (usually the inlet index).
    pub slot: usize,
    pub values: Vec<f64>,
    /// Absolute time (ms) the change applies at.
    pub time_tag: f64,
}

/// The audio half of an object.
///
/// Units never see control messages directly. Their owner translates
/// messages into [`Control`]s, which are handed over at the start of the next
/// rendered block:
///
/// ```
/// use dasp_graph::Buffer;
/// use patchbay::{BlockContext, Control, DspUnit};
///
/// struct Constant {
///     value: f32,
/// }
///
/// impl DspUnit for Constant {
///     fn process(
///         &mut self,
///         _ctx: &BlockContext,
///         controls: &[Control],
///         _inputs: &[Buffer],
///         outputs: &mut [Buffer],
///     ) {
///         if let Some(v) = controls.last().and_then(|c| c.values.first()) {
///             self.value = *v as f32;
///         }
///         outputs[0].iter_mut().for_each(|s| *s = self.value);
///     }
/// }
/// ```
pub trait DspUnit: Send + 'static {
    /// Render one block.
    ///
    /// `inputs` holds one summed buffer per DSP inlet, `outputs` one buffer
    /// per DSP outlet.
    fn process(
        &mut self,
        ctx: &BlockContext,
        controls: &[Control],
        inputs: &[Buffer],
        outputs: &mut [Buffer],
    );

    /// Number of signal inputs.
    fn num_inputs(&self) -> usize { 0 }

    /// Number of signal outputs.
    fn num_outputs(&self) -> usize { 1 }
}

/// A DSP graph edge.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Wire {
    pub outlet: usize,
    pub inlet: usize,
}

struct DspVertex {
    node: NodeKey,
    unit: Box<dyn DspUnit>,
    outputs: Vec<Buffer>,
    controls: Vec<Control>,
    rendered: Option<u64>,
    visiting: bool,
}

type InnerGraph = StableGraph<DspVertex, Wire>;

pub(crate) struct DspGraph {
    graph: InnerGraph,
    vertices: HashMap<NodeKey, NodeIndex>,
}

impl DspGraph {
    pub fn new() -> Self {
        Self {
            graph: InnerGraph::with_capacity(64, 64),
            vertices: HashMap::new(),
        }
    }

    /// Install `unit` for `node`.
    ///
    /// If the node already has a unit, it is swapped in place: wires and
    /// pending controls stay attached to the vertex. Returns whether a unit
    /// was replaced.
    pub fn install(&mut self, node: NodeKey, unit: Box<dyn DspUnit>) -> bool {
        let outputs = vec![Buffer::SILENT; unit.num_outputs()];

        if let Some(&idx) = self.vertices.get(&node) {
            let vertex = &mut self.graph[idx];
            vertex.unit = unit;
            vertex.outputs = outputs;
            vertex.rendered = None;
            return true;
        }

        let idx = self.graph.add_node(DspVertex {
            node,
            unit,
            outputs,
            controls: Vec::new(),
            rendered: None,
            visiting: false,
        });
        self.vertices.insert(node, idx);
        false
    }

    /// Remove the node's unit and every wire touching it.
    pub fn uninstall(&mut self, node: NodeKey) -> bool {
        match self.vertices.remove(&node) {
            Some(idx) => self.graph.remove_node(idx).is_some(),
            None => false,
        }
    }

    /// Add a wire; both units must be installed. Returns whether a wire was added.
    pub fn wire(&mut self, from: NodeKey, outlet: usize, to: NodeKey, inlet: usize) -> bool {
        let (a, b) = match (self.vertices.get(&from), self.vertices.get(&to)) {
            (Some(&a), Some(&b)) => (a, b),
            _ => return false,
        };
        let wire = Wire { outlet, inlet };
        if self.find_wire(a, b, wire).is_some() {
            return false;
        }
        self.graph.add_edge(a, b, wire);
        true
    }

    /// Remove exactly one wire. Returns whether it existed.
    pub fn unwire(&mut self, from: NodeKey, outlet: usize, to: NodeKey, inlet: usize) -> bool {
        let (a, b) = match (self.vertices.get(&from), self.vertices.get(&to)) {
            (Some(&a), Some(&b)) => (a, b),
            _ => return false,
        };
        match self.find_wire(a, b, Wire { outlet, inlet }) {
            Some(edge) => self.graph.remove_edge(edge).is_some(),
            None => false,
        }
    }

    /// Remove every wire leaving one outlet of `from`.
    pub fn unwire_outlet(&mut self, from: NodeKey, outlet: usize) {
        let a = match self.vertices.get(&from) {
            Some(&a) => a,
            None => return,
        };
        let edges: Vec<_> = self
            .graph
            .edges_directed(a, Flow::Outgoing)
            .filter(|e| e.weight().outlet == outlet)
            .map(|e| e.id())
            .collect();
        for edge in edges {
            self.graph.remove_edge(edge);
        }
    }

    #[inline]
    pub fn wire_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[cfg(test)]
    pub fn unit_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Queue a control for the node's unit. Dropped if no unit is installed.
    pub fn push_control(&mut self, node: NodeKey, control: Control) -> bool {
        match self.vertices.get(&node) {
            Some(&idx) => {
                self.graph[idx].controls.push(control);
                true
            }
            None => false,
        }
    }

    /// Render `node` (and everything upstream of it) for the block described
    /// by `ctx`, returning its outputs.
    pub fn pull(&mut self, node: NodeKey, ctx: &BlockContext) -> Option<&[Buffer]> {
        let idx = *self.vertices.get(&node)?;
        self.render(idx, ctx);
        Some(&self.graph[idx].outputs)
    }

    /// Render every unit not yet rendered for `ctx.frame`.
    pub fn finish_block(&mut self, ctx: &BlockContext) {
        let pending: Vec<NodeIndex> = self
            .vertices
            .values()
            .copied()
            .filter(|&idx| self.graph[idx].rendered != Some(ctx.frame))
            .collect();
        for idx in pending {
            self.render(idx, ctx);
        }
    }

    fn render(&mut self, idx: NodeIndex, ctx: &BlockContext) {
        {
            let vertex = &mut self.graph[idx];
            if vertex.rendered == Some(ctx.frame) {
                return;
            }
            if vertex.visiting {
                // feedback: the caller reads what this vertex rendered last block
                tracing::warn!(node = ?vertex.node, "DSP loop detected");
                return;
            }
            vertex.visiting = true;
        }

        let sources: Vec<(NodeIndex, Wire)> = self
            .graph
            .edges_directed(idx, Flow::Incoming)
            .map(|e| (e.source(), *e.weight()))
            .collect();
        for (source, _) in &sources {
            self.render(*source, ctx);
        }

        let mut inputs = vec![Buffer::SILENT; self.graph[idx].unit.num_inputs()];
        for (source, wire) in sources {
            let (input, output) = match (inputs.get_mut(wire.inlet), self.graph[source].outputs.get(wire.outlet)) {
                (Some(input), Some(output)) => (input, output),
                _ => continue,
            };
            for (i, o) in input.iter_mut().zip(output.iter()) {
                *i += *o;
            }
        }

        let DspVertex { unit, outputs, controls, rendered, visiting, .. } = &mut self.graph[idx];
        unit.process(ctx, controls, &inputs, outputs);
        controls.clear();
        *rendered = Some(ctx.frame);
        *visiting = false;
    }

    fn find_wire(&self, a: NodeIndex, b: NodeIndex, wire: Wire) -> Option<petgraph::stable_graph::EdgeIndex> {
        self.graph
            .edges_directed(a, Flow::Outgoing)
            .find(|e| e.target() == b && *e.weight() == wire)
            .map(|e| e.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ones;

    impl DspUnit for Ones {
        fn process(&mut self, _: &BlockContext, _: &[Control], _: &[Buffer], outputs: &mut [Buffer]) {
            outputs[0].iter_mut().for_each(|s| *s = 1.0);
        }
    }

    /// Sums its two inputs and counts how often it ran.
    struct Adder {
        runs: usize,
    }

    impl DspUnit for Adder {
        fn process(&mut self, _: &BlockContext, _: &[Control], inputs: &[Buffer], outputs: &mut [Buffer]) {
            self.runs += 1;
            for (i, out) in outputs[0].iter_mut().enumerate() {
                *out = inputs[0][i] + 10.0 * inputs[1][i] + self.runs as f32 * 100.0;
            }
        }

        fn num_inputs(&self) -> usize { 2 }
    }

    /// Records how many controls each block handed it.
    struct Tally {
        seen: std::sync::Arc<std::sync::Mutex<Vec<usize>>>,
    }

    impl DspUnit for Tally {
        fn process(&mut self, _: &BlockContext, controls: &[Control], _: &[Buffer], _: &mut [Buffer]) {
            self.seen.lock().unwrap().push(controls.len());
        }
    }

    fn ctx(frame: u64) -> BlockContext {
        BlockContext { sample_rate: 48000, block_start: 0.0, frame }
    }

    #[test]
    fn sums_wires_per_inlet_and_caches_per_frame() {
        let (src, sum) = (NodeKey(0), NodeKey(1));
        let mut graph = DspGraph::new();
        graph.install(src, Box::new(Ones));
        graph.install(sum, Box::new(Adder { runs: 0 }));

        assert!(graph.wire(src, 0, sum, 0));
        assert!(graph.wire(src, 0, sum, 1));
        assert!(!graph.wire(src, 0, sum, 1));
        assert_eq!(graph.wire_count(), 2);

        assert_eq!(graph.pull(sum, &ctx(0)).unwrap()[0][0], 111.0);
        // same frame: cached
        assert_eq!(graph.pull(sum, &ctx(0)).unwrap()[0][0], 111.0);
        assert_eq!(graph.pull(sum, &ctx(1)).unwrap()[0][0], 211.0);
    }

    #[test]
    fn reinstalling_keeps_wires() {
        let (src, sum) = (NodeKey(0), NodeKey(1));
        let mut graph = DspGraph::new();
        graph.install(src, Box::new(Ones));
        graph.install(sum, Box::new(Adder { runs: 0 }));
        graph.wire(src, 0, sum, 1);

        assert!(graph.install(sum, Box::new(Adder { runs: 5 })));
        assert_eq!(graph.wire_count(), 1);
        assert_eq!(graph.pull(sum, &ctx(0)).unwrap()[0][0], 610.0);

        assert!(graph.unwire(src, 0, sum, 1));
        assert!(!graph.unwire(src, 0, sum, 1));
        assert!(graph.uninstall(src));
        assert_eq!(graph.unit_count(), 1);
    }

    #[test]
    fn sample_offsets_are_fractional() {
        let ctx = BlockContext { sample_rate: 1000, block_start: 10.0, frame: 0 };
        assert_eq!(ctx.sample_offset(10.0), 0.0);
        assert_eq!(ctx.sample_offset(12.5), 2.5);
        assert!(ctx.sample_offset(9.0) < 0.0);
    }

    #[test]
    fn unpulled_units_consume_their_controls() {
        let (src, sum, idle) = (NodeKey(0), NodeKey(1), NodeKey(2));
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut graph = DspGraph::new();
        graph.install(src, Box::new(Ones));
        graph.install(sum, Box::new(Adder { runs: 0 }));
        graph.install(idle, Box::new(Tally { seen: seen.clone() }));
        graph.wire(src, 0, sum, 0);

        for frame in 0..100 {
            let control = Control { slot: 0, values: vec![frame as f64], time_tag: 0.0 };
            assert!(graph.push_control(idle, control));
            graph.pull(sum, &ctx(frame));
            graph.finish_block(&ctx(frame));
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 100);
        assert!(seen.iter().all(|n| *n == 1));
        assert!(graph.vertices.values().all(|&idx| graph.graph[idx].controls.is_empty()));

        // already rendered units are not run twice
        assert_eq!(graph.pull(sum, &ctx(99)).unwrap()[0][0], 10001.0);
    }
}
