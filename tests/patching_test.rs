mod common;

use std::sync::{Arc, Mutex};

use common::{float, link, logged, runtime, Through};
use patchbay::{
    Atom, Context, Instance, NodeKey, Object, ObjectLibrary, ObjectType, PatchDescription, PatchError, PortletSpec,
    Runtime, Settings,
};

#[test]
fn connections_are_symmetric_and_idempotent() {
    let (mut runtime, _) = runtime();
    let patch = runtime.create_patch(vec![]);
    let a = runtime.create_object(patch, "float", vec![]).unwrap();
    let b = runtime.create_object(patch, "float", vec![]).unwrap();

    let outlet = runtime.outlet(a, 0).unwrap();
    let inlet = runtime.inlet(b, 0).unwrap();
    assert_eq!(runtime.connect(outlet, inlet), Ok(true));
    assert_eq!(runtime.peers(outlet).unwrap(), &[inlet]);
    assert_eq!(runtime.peers(inlet).unwrap(), &[outlet]);

    assert_eq!(runtime.connect(outlet, inlet), Ok(false));
    assert_eq!(runtime.connect(inlet, outlet), Ok(false));
    assert_eq!(runtime.peers(outlet).unwrap().len(), 1);

    assert_eq!(runtime.disconnect(inlet, outlet), Ok(true));
    assert!(runtime.peers(outlet).unwrap().is_empty());
    assert!(runtime.peers(inlet).unwrap().is_empty());
    assert_eq!(runtime.disconnect(outlet, inlet), Ok(false));
}

#[test]
fn rejects_connections_across_patches() {
    let (mut runtime, _) = runtime();
    let patch = runtime.create_patch(vec![]);
    let sub = runtime.create_object(patch, "pd", vec![]).unwrap();
    let outer = runtime.create_object(patch, "float", vec![]).unwrap();
    let inner = runtime.create_object(sub, "float", vec![]).unwrap();

    let outer_out = runtime.outlet(outer, 0).unwrap();
    let inner_in = runtime.inlet(inner, 0).unwrap();
    assert_eq!(runtime.connect(outer_out, inner_in), Err(PatchError::CrossPatchConnection));
    assert_eq!(runtime.connect(inner_in, outer_out), Err(PatchError::CrossPatchConnection));

    let inner_out = runtime.outlet(inner, 0).unwrap();
    let outer_in = runtime.inlet(outer, 0).unwrap();
    assert_eq!(runtime.connect(inner_out, outer_in), Err(PatchError::CrossPatchConnection));
    assert_eq!(runtime.connect(outer_in, inner_out), Err(PatchError::CrossPatchConnection));
}

#[test]
fn rejects_signal_into_message_inlet() {
    let (mut runtime, _) = runtime();
    let patch = runtime.create_patch(vec![]);
    let osc = runtime.create_object(patch, "osc~", vec![]).unwrap();
    let f = runtime.create_object(patch, "float", vec![]).unwrap();

    let result = runtime.connect(runtime.outlet(osc, 0).unwrap(), runtime.inlet(f, 0).unwrap());
    assert!(matches!(result, Err(PatchError::InvalidPortlet(_))));
    assert!(matches!(runtime.inlet(f, 5), Err(PatchError::InvalidPortlet(_))));
}

#[test]
fn messages_cross_subpatch_boundaries() {
    let (mut runtime, log) = runtime();
    let patch = runtime.create_patch(vec![]);
    let sub = runtime.create_object(patch, "pd", vec![]).unwrap();
    let inlet = runtime.create_object(sub, "inlet", vec![]).unwrap();
    let add = runtime.create_object(sub, "+", vec![Atom::Float(1.0)]).unwrap();
    let outlet = runtime.create_object(sub, "outlet", vec![]).unwrap();
    let probe = runtime.create_object(patch, "probe", vec![]).unwrap();
    link(&mut runtime, inlet, 0, add, 0);
    link(&mut runtime, add, 0, outlet, 0);
    link(&mut runtime, sub, 0, probe, 0);

    assert_eq!(runtime.inlet_count(sub), 1);
    assert_eq!(runtime.outlet_count(sub), 1);

    runtime.send(runtime.inlet(sub, 0).unwrap(), float(1.0)).unwrap();
    assert_eq!(logged(&log), vec![(0, float(2.0))]);
}

#[test]
fn dollar_zero_in_subpatch_is_the_root_id() {
    let (mut runtime, _) = runtime();
    let patch = runtime.create_patch(vec![Atom::Float(7.0)]);
    let sub = runtime.create_object(patch, "pd", vec![]).unwrap();
    let f = runtime.create_object(sub, "float", vec![Atom::symbol("$0")]).unwrap();
    let g = runtime.create_object(sub, "float", vec![Atom::symbol("$1")]).unwrap();

    let root_id = runtime.patch_id(patch).unwrap() as f64;
    assert_eq!(runtime.patch_id(sub), None);
    assert_eq!(runtime.args(f).unwrap(), &[Atom::Float(root_id)]);
    assert_eq!(runtime.args(g).unwrap(), &[Atom::Float(7.0)]);

    let missing = runtime.create_object(sub, "float", vec![Atom::symbol("$2")]);
    assert_eq!(missing, Err(PatchError::ArgumentOutOfRange { index: 2, len: 2 }));
}

#[test]
fn abstraction_instances_get_their_own_dollar_zero() {
    let (mut library, _) = common::library_with_probe();
    library.register_abstraction(
        "counter",
        PatchDescription::new()
            .node("in", "inlet", vec![])
            .node("state", "float", vec![Atom::symbol("$0")])
            .node("step", "float", vec![Atom::symbol("$1")])
            .connect("in", 0, "state", 0),
    );
    let mut runtime = Runtime::new(Settings::default(), library);
    let patch = runtime.create_patch(vec![]);
    let first = runtime.create_object(patch, "counter", vec![Atom::Float(1.0)]).unwrap();
    let second = runtime.create_object(patch, "counter", vec![Atom::Float(2.0)]).unwrap();

    let state = |runtime: &Runtime, instance: NodeKey| runtime.args(runtime.objects(instance)[1]).unwrap().to_vec();
    let first_id = runtime.patch_id(first).unwrap();
    let second_id = runtime.patch_id(second).unwrap();
    assert_ne!(first_id, second_id);
    assert_ne!(first_id, runtime.patch_id(patch).unwrap());
    assert_eq!(state(&runtime, first), vec![Atom::Float(first_id as f64)]);
    assert_eq!(state(&runtime, second), vec![Atom::Float(second_id as f64)]);

    let step = runtime.objects(second)[2];
    assert_eq!(runtime.args(step).unwrap(), &[Atom::Float(2.0)]);
    assert_eq!(runtime.inlet_count(first), 1);
}

#[test]
fn load_aggregates_every_failure() {
    let (mut runtime, _) = runtime();
    let description = PatchDescription::new()
        .node("a", "float", vec![])
        .node("b", "float", vec![])
        .node("x", "no-such-object", vec![])
        .node("y", "neither-this", vec![])
        .connect("a", 0, "b", 7)
        .connect("x", 0, "a", 0)
        .connect("a", 0, "y", 0);

    let error = runtime.load_patch(&description).unwrap_err();
    let failures = match error {
        PatchError::PatchLoad(e) => e.failures,
        other => panic!("expected a load error, got {other}"),
    };
    assert_eq!(failures.len(), 3);
    assert!(matches!(failures[0].cause, PatchError::UnknownObject(ref name) if name == "no-such-object"));
    assert!(matches!(failures[1].cause, PatchError::UnknownObject(_)));
    assert!(matches!(failures[2].cause, PatchError::InvalidPortlet(_)));

    // nothing is left behind
    assert!(runtime.roots().is_empty());
}

#[test]
fn load_reports_unknown_endpoints_and_nested_failures() {
    let (mut runtime, _) = runtime();
    let description = PatchDescription::new()
        .node("a", "float", vec![])
        .subpatch("sub", PatchDescription::new().node("bad", "nope", vec![]))
        .connect("a", 0, "ghost", 0);

    let failures = match runtime.load_patch(&description) {
        Err(PatchError::PatchLoad(e)) => e.failures,
        other => panic!("expected a load error, got {other:?}"),
    };
    assert_eq!(failures.len(), 2);
    assert!(failures[0].message.contains("sub/bad"));
    assert_eq!(failures[1].cause, PatchError::UnknownEndpoint("ghost".into()));
}

#[test]
fn loads_json_patches() {
    let (mut runtime, log) = runtime();
    let description = PatchDescription::from_json(
        r#"{
            "nodes": [
                { "id": "r", "type": "receive", "args": ["in"] },
                { "id": "mul", "type": "*", "args": [3] },
                { "id": "p", "type": "probe" }
            ],
            "connections": [
                { "source": { "id": "r", "port": 0 }, "sink": { "id": "mul", "port": 0 } },
                { "source": { "id": "mul", "port": 0 }, "sink": { "id": "p", "port": 0 } }
            ]
        }"#,
    )
    .unwrap();
    let patch = runtime.load_patch(&description).unwrap();
    assert_eq!(runtime.objects(patch).len(), 3);

    runtime.send_named("in", float(2.0));
    assert_eq!(logged(&log), vec![(0, float(6.0))]);
}

struct StartProbe {
    wires_at_start: Arc<Mutex<Vec<usize>>>,
}

impl Object for StartProbe {
    fn start(&mut self, ctx: &mut Context<'_>) {
        self.wires_at_start.lock().unwrap().push(ctx.dsp_wire_count());
        ctx.install_dsp(Box::new(Through));
    }
}

fn staging_runtime() -> (Runtime, Arc<Mutex<Vec<usize>>>) {
    let wires_at_start = Arc::new(Mutex::new(Vec::new()));
    let mut library = ObjectLibrary::default();
    let shared = wires_at_start.clone();
    library.register(
        "stage~",
        ObjectType::new(move |_| {
            Ok(Instance::new(StartProbe { wires_at_start: shared.clone() })
                .inlets([PortletSpec::DSP])
                .outlets([PortletSpec::DSP]))
        }),
    );
    (Runtime::new(Settings::default(), library), wires_at_start)
}

#[test]
fn every_object_starts_before_any_wire_exists() {
    let (mut runtime, wires_at_start) = staging_runtime();
    let patch = runtime.create_patch(vec![]);
    let stages: Vec<NodeKey> = (0..4).map(|_| runtime.create_object(patch, "stage~", vec![]).unwrap()).collect();
    for pair in stages.windows(2) {
        link(&mut runtime, pair[0], 0, pair[1], 0);
    }
    assert_eq!(runtime.dsp_wire_count(), 0);

    runtime.start();
    assert_eq!(*wires_at_start.lock().unwrap(), vec![0, 0, 0, 0]);
    assert_eq!(runtime.dsp_wire_count(), 3);

    runtime.stop();
    assert_eq!(runtime.dsp_wire_count(), 0);
}

#[test]
fn nested_patches_start_every_object_before_wiring() {
    let (mut runtime, wires_at_start) = staging_runtime();
    let patch = runtime.create_patch(vec![]);
    let first = runtime.create_object(patch, "stage~", vec![]).unwrap();
    let sub = runtime.create_object(patch, "pd", vec![]).unwrap();
    let last = runtime.create_object(patch, "stage~", vec![]).unwrap();

    let sub_in = runtime.create_object(sub, "inlet~", vec![]).unwrap();
    let middle = runtime.create_object(sub, "stage~", vec![]).unwrap();
    let deeper = runtime.create_object(sub, "pd", vec![]).unwrap();
    let sub_out = runtime.create_object(sub, "outlet~", vec![]).unwrap();

    let deeper_in = runtime.create_object(deeper, "inlet~", vec![]).unwrap();
    let innermost = runtime.create_object(deeper, "stage~", vec![]).unwrap();
    let deeper_out = runtime.create_object(deeper, "outlet~", vec![]).unwrap();

    link(&mut runtime, first, 0, sub, 0);
    link(&mut runtime, sub, 0, last, 0);
    link(&mut runtime, sub_in, 0, middle, 0);
    link(&mut runtime, middle, 0, deeper, 0);
    link(&mut runtime, deeper, 0, sub_out, 0);
    link(&mut runtime, deeper_in, 0, innermost, 0);
    link(&mut runtime, innermost, 0, deeper_out, 0);
    assert_eq!(runtime.dsp_wire_count(), 0);

    runtime.start();
    assert_eq!(*wires_at_start.lock().unwrap(), vec![0, 0, 0, 0]);
    assert_eq!(runtime.dsp_wire_count(), 7);

    runtime.stop();
    assert_eq!(runtime.dsp_wire_count(), 0);
}

#[test]
fn editing_a_running_patch_updates_wires() {
    let (mut runtime, _) = runtime();
    let patch = runtime.create_patch(vec![]);
    let sig = runtime.create_object(patch, "sig~", vec![Atom::Float(0.5)]).unwrap();
    let dac = runtime.create_object(patch, "dac~", vec![]).unwrap();
    runtime.start();

    link(&mut runtime, sig, 0, dac, 1);
    assert_eq!(runtime.dsp_wire_count(), 1);
    assert_eq!(runtime.process_block()[1][10], 0.5);

    runtime.remove_object(sig).unwrap();
    assert!(!runtime.contains(sig));
    assert_eq!(runtime.dsp_wire_count(), 0);
    assert_eq!(runtime.process_block()[1][10], 0.0);
}

#[test]
fn destroying_a_patch_removes_everything_inside() {
    let (mut runtime, _) = runtime();
    let patch = runtime.create_patch(vec![]);
    let sub = runtime.create_object(patch, "pd", vec![]).unwrap();
    let r = runtime.create_object(sub, "receive", vec![Atom::symbol("gone")]).unwrap();
    assert_eq!(runtime.names().find_all(patchbay::RECEIVE, "gone").len(), 1);

    runtime.destroy_patch(sub).unwrap();
    assert!(!runtime.contains(sub));
    assert!(!runtime.contains(r));
    assert!(runtime.objects(patch).is_empty());
    assert!(runtime.names().find_all(patchbay::RECEIVE, "gone").is_empty());

    runtime.destroy_patch(patch).unwrap();
    assert!(runtime.roots().is_empty());
    assert_eq!(runtime.destroy_patch(patch), Err(PatchError::UnknownNode));
}

#[test]
fn failed_init_leaves_no_trace() {
    let (mut runtime, _) = runtime();
    let patch = runtime.create_patch(vec![]);
    runtime.create_object(patch, "table", vec![Atom::symbol("t")]).unwrap();

    let duplicate = runtime.create_object(patch, "table", vec![Atom::symbol("t")]);
    assert!(matches!(duplicate, Err(PatchError::NameCollision { .. })));
    assert_eq!(runtime.objects(patch).len(), 1);
    assert_eq!(
        runtime.create_object(patch, "nope", vec![]),
        Err(PatchError::UnknownObject("nope".into()))
    );
}

#[test]
fn recursive_abstractions_are_rejected() {
    let (mut library, _) = common::library_with_probe();
    library.register_abstraction("loop", PatchDescription::new().node("self", "loop", vec![]));
    library.register_abstraction("ping", PatchDescription::new().node("inner", "pong", vec![]));
    library.register_abstraction("pong", PatchDescription::new().node("inner", "ping", vec![]));
    library.register_abstraction("leaf", PatchDescription::new().node("f", "float", vec![]));
    library.register_abstraction(
        "pair",
        PatchDescription::new().node("a", "leaf", vec![]).node("b", "leaf", vec![]),
    );
    let mut runtime = Runtime::new(Settings::default(), library);
    let patch = runtime.create_patch(vec![]);

    let failures = match runtime.create_object(patch, "loop", vec![]) {
        Err(PatchError::PatchLoad(e)) => e.failures,
        other => panic!("expected a load error, got {other:?}"),
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].cause, PatchError::InvalidArgument("recursive abstraction 'loop'".into()));

    assert!(matches!(runtime.create_object(patch, "ping", vec![]), Err(PatchError::PatchLoad(_))));
    assert!(runtime.objects(patch).is_empty());

    // the same abstraction twice side by side is not recursion
    let pair = runtime.create_object(patch, "pair", vec![]).unwrap();
    assert_eq!(runtime.objects(pair).len(), 2);
}
