#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use dasp_graph::Buffer;
use patchbay::{
    Atom, BlockContext, Context, Control, DspUnit, Instance, Message, NodeKey, Object, ObjectLibrary, ObjectType,
    PortletSpec, Runtime, Settings,
};

/// Everything a `probe` saw: (inlet, atoms, time tag).
pub type Log = Arc<Mutex<Vec<(usize, Vec<Atom>, f64)>>>;

struct Probe {
    log: Log,
}

impl Object for Probe {
    fn message(&mut self, inlet: usize, msg: &Message, _ctx: &mut Context<'_>) {
        self.log.lock().unwrap().push((inlet, msg.atoms.clone(), msg.time_tag));
    }
}

/// Default library plus a two-inlet `probe` object logging every message.
pub fn library_with_probe() -> (ObjectLibrary, Log) {
    let log = Log::default();
    let mut library = ObjectLibrary::default();
    let shared = log.clone();
    library.register(
        "probe",
        ObjectType::new(move |_| Ok(Instance::new(Probe { log: shared.clone() }).inlets([PortletSpec::MESSAGE; 2]))),
    );
    (library, log)
}

pub fn runtime() -> (Runtime, Log) {
    init_tracing();
    let (library, log) = library_with_probe();
    (Runtime::new(Settings::default(), library), log)
}

/// Runtime at 64 kHz: one block is exactly 1 ms.
pub fn runtime_64k() -> (Runtime, Log) {
    init_tracing();
    let (library, log) = library_with_probe();
    (Runtime::new(Settings::default().with_sample_rate(64000), library), log)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn link(runtime: &mut Runtime, from: NodeKey, outlet: usize, to: NodeKey, inlet: usize) {
    let outlet = runtime.outlet(from, outlet).unwrap();
    let inlet = runtime.inlet(to, inlet).unwrap();
    runtime.connect(outlet, inlet).unwrap();
}

pub fn float(v: f64) -> Vec<Atom> {
    vec![Atom::Float(v)]
}

pub fn bang() -> Vec<Atom> {
    vec![Atom::symbol("bang")]
}

pub fn logged(log: &Log) -> Vec<(usize, Vec<Atom>)> {
    log.lock().unwrap().iter().map(|(inlet, atoms, _)| (*inlet, atoms.clone())).collect()
}

pub fn time_tags(log: &Log) -> Vec<f64> {
    log.lock().unwrap().iter().map(|(_, _, t)| *t).collect()
}

/// Copies its input through.
pub struct Through;

impl DspUnit for Through {
    fn process(&mut self, _ctx: &BlockContext, _controls: &[Control], inputs: &[Buffer], outputs: &mut [Buffer]) {
        outputs[0] = inputs[0].clone();
    }

    fn num_inputs(&self) -> usize {
        1
    }
}
