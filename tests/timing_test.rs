mod common;

use common::{bang, float, link, logged, runtime, runtime_64k, time_tags};
use patchbay::{Atom, PatchDescription, ARRAY, MAX_DEPTH};

#[test]
fn delayed_sig_change_lands_on_the_right_sample() {
    let (mut runtime, _) = runtime_64k();
    let patch = runtime
        .load_patch(
            &PatchDescription::new()
                .node("load", "loadbang", vec![])
                .node("wait", "delay", vec![Atom::Float(10.5)])
                .node("one", "msg", vec![Atom::Float(1.0)])
                .node("sig", "sig~", vec![])
                .node("out", "dac~", vec![])
                .connect("load", 0, "wait", 0)
                .connect("wait", 0, "one", 0)
                .connect("one", 0, "sig", 0)
                .connect("sig", 0, "out", 0),
        )
        .unwrap();
    assert_eq!(runtime.objects(patch).len(), 5);
    runtime.start();

    for _ in 0..10 {
        assert!(runtime.process_block()[0].iter().all(|s| *s == 0.0));
    }
    // block 10 covers 10ms..11ms; 10.5ms is sample 32
    let block = runtime.process_block()[0].clone();
    assert!(block[..32].iter().all(|s| *s == 0.0));
    assert!(block[32..].iter().all(|s| *s == 1.0));
    assert!(runtime.process_block()[0].iter().all(|s| *s == 1.0));
}

#[test]
fn clock_advances_by_whole_blocks() {
    let (mut runtime, _) = runtime_64k();
    runtime.create_patch(vec![]);

    // stopped: no time passes
    runtime.process_block();
    assert_eq!(runtime.frame(), 0);

    runtime.start();
    for _ in 0..1000 {
        runtime.process_block();
    }
    assert_eq!(runtime.frame(), 1000);
    assert_eq!(runtime.now(), 1000.0);
}

#[test]
fn metro_ticks_without_drift() {
    let (mut runtime, log) = runtime_64k();
    let patch = runtime.create_patch(vec![]);
    let load = runtime.create_object(patch, "loadbang", vec![]).unwrap();
    let metro = runtime.create_object(patch, "metro", vec![Atom::Float(2.0)]).unwrap();
    let probe = runtime.create_object(patch, "probe", vec![]).unwrap();
    link(&mut runtime, load, 0, metro, 0);
    link(&mut runtime, metro, 0, probe, 0);
    runtime.start();

    for _ in 0..5 {
        runtime.process_block();
    }
    assert_eq!(time_tags(&log), vec![0.0, 2.0, 4.0]);

    runtime.send(runtime.inlet(metro, 0).unwrap(), vec![Atom::symbol("stop")]).unwrap();
    for _ in 0..5 {
        runtime.process_block();
    }
    assert_eq!(time_tags(&log).len(), 3);
}

#[test]
fn delay_rearms_and_stops() {
    let (mut runtime, log) = runtime_64k();
    let patch = runtime.create_patch(vec![]);
    let delay = runtime.create_object(patch, "delay", vec![Atom::Float(3.0)]).unwrap();
    let probe = runtime.create_object(patch, "probe", vec![]).unwrap();
    link(&mut runtime, delay, 0, probe, 0);
    runtime.start();

    let inlet = runtime.inlet(delay, 0).unwrap();
    runtime.send(inlet, bang()).unwrap();
    runtime.process_block();
    // re-arming at 1ms pushes the bang to 4ms
    runtime.send(inlet, bang()).unwrap();
    for _ in 0..5 {
        runtime.process_block();
    }
    assert_eq!(logged(&log), vec![(0, bang())]);
    assert_eq!(time_tags(&log), vec![4.0]);

    runtime.send(inlet, bang()).unwrap();
    runtime.send(inlet, vec![Atom::symbol("stop")]).unwrap();
    for _ in 0..5 {
        runtime.process_block();
    }
    assert_eq!(time_tags(&log).len(), 1);
}

#[test]
fn send_reaches_every_receive() {
    let (mut runtime, log) = runtime();
    let patch = runtime.create_patch(vec![]);
    let send = runtime.create_object(patch, "s", vec![Atom::symbol("bus")]).unwrap();
    let left = runtime.create_object(patch, "r", vec![Atom::symbol("bus")]).unwrap();
    let right = runtime.create_object(patch, "receive", vec![Atom::symbol("bus")]).unwrap();
    let probe = runtime.create_object(patch, "probe", vec![]).unwrap();
    link(&mut runtime, left, 0, probe, 0);
    link(&mut runtime, right, 0, probe, 1);

    runtime.send(runtime.inlet(send, 0).unwrap(), float(3.0)).unwrap();
    assert_eq!(logged(&log), vec![(0, float(3.0)), (1, float(3.0))]);

    runtime.remove_object(left).unwrap();
    runtime.send_named("bus", float(4.0));
    assert_eq!(logged(&log).last(), Some(&(1, float(4.0))));
    assert_eq!(logged(&log).len(), 3);
}

#[test]
fn message_boxes_expand_arguments_and_send() {
    let (mut runtime, log) = runtime();
    let patch = runtime.create_patch(vec![]);
    let content = vec![
        Atom::symbol("$1"),
        Atom::symbol("foo"),
        Atom::symbol(","),
        Atom::Float(7.0),
        Atom::symbol(";"),
        Atom::symbol("elsewhere"),
        Atom::symbol("$2"),
    ];
    let msg = runtime.create_object(patch, "msg", content).unwrap();
    let elsewhere = runtime.create_object(patch, "r", vec![Atom::symbol("elsewhere")]).unwrap();
    let probe = runtime.create_object(patch, "probe", vec![]).unwrap();
    link(&mut runtime, msg, 0, probe, 0);
    link(&mut runtime, elsewhere, 0, probe, 1);

    runtime.send(runtime.inlet(msg, 0).unwrap(), vec![Atom::Float(3.0), Atom::Float(9.0)]).unwrap();
    assert_eq!(
        logged(&log),
        vec![
            (0, vec![Atom::Float(3.0), Atom::symbol("foo")]),
            (0, float(7.0)),
            (1, float(9.0)),
        ]
    );
}

#[test]
fn trigger_fires_right_to_left() {
    let (mut runtime, log) = runtime();
    let patch = runtime.create_patch(vec![]);
    let t = runtime
        .create_object(patch, "t", vec![Atom::symbol("b"), Atom::symbol("f")])
        .unwrap();
    let probe = runtime.create_object(patch, "probe", vec![]).unwrap();
    link(&mut runtime, t, 0, probe, 0);
    link(&mut runtime, t, 1, probe, 1);

    runtime.send(runtime.inlet(t, 0).unwrap(), float(5.0)).unwrap();
    assert_eq!(logged(&log), vec![(1, float(5.0)), (0, bang())]);
}

#[test]
fn control_queue_delivers_at_block_start() {
    let (mut runtime, log) = runtime_64k();
    let patch = runtime.create_patch(vec![]);
    let r = runtime.create_object(patch, "r", vec![Atom::symbol("remote")]).unwrap();
    let probe = runtime.create_object(patch, "probe", vec![]).unwrap();
    link(&mut runtime, r, 0, probe, 0);
    let mut sender = runtime.control_queue(4);
    runtime.start();
    runtime.process_block();

    std::thread::spawn(move || sender.send("remote", float(1.0)).unwrap())
        .join()
        .unwrap();
    assert!(logged(&log).is_empty());

    runtime.process_block();
    assert_eq!(logged(&log), vec![(0, float(1.0))]);
    assert_eq!(time_tags(&log), vec![1.0]);
}

#[test]
fn tabread_follows_its_table() {
    let (mut runtime, _) = runtime();
    let patch = runtime.create_patch(vec![]);
    let index = runtime.create_object(patch, "sig~", vec![Atom::Float(2.0)]).unwrap();
    let read = runtime.create_object(patch, "tabread~", vec![Atom::symbol("wave")]).unwrap();
    let dac = runtime.create_object(patch, "dac~", vec![]).unwrap();
    link(&mut runtime, index, 0, read, 0);
    link(&mut runtime, read, 0, dac, 0);
    runtime.start();

    // nothing to read yet
    assert_eq!(runtime.process_block()[0][0], 0.0);

    let table = runtime
        .create_object(patch, "table", vec![Atom::symbol("wave"), Atom::Float(4.0)])
        .unwrap();
    // onset 0, then the samples
    let values = [0.0, 0.0, 0.1, 0.2, 0.3].map(Atom::Float).to_vec();
    runtime.send_named("wave", values);
    assert_eq!(runtime.process_block()[0][0], 0.2);

    // renamed away: the reader lets go
    runtime.rename_object(table, ARRAY, "other").unwrap();
    assert_eq!(runtime.process_block()[0][0], 0.0);

    runtime.rename_object(table, ARRAY, "wave").unwrap();
    assert_eq!(runtime.process_block()[0][0], 0.2);
}

#[test]
fn delread_reads_what_delwrite_wrote() {
    let (mut runtime, _) = runtime_64k();
    let patch = runtime.create_patch(vec![]);
    let sig = runtime.create_object(patch, "sig~", vec![Atom::Float(1.0)]).unwrap();
    let write = runtime
        .create_object(patch, "delwrite~", vec![Atom::symbol("echo"), Atom::Float(100.0)])
        .unwrap();
    let read = runtime
        .create_object(patch, "delread~", vec![Atom::symbol("echo"), Atom::Float(2.0)])
        .unwrap();
    let dac = runtime.create_object(patch, "dac~", vec![]).unwrap();
    link(&mut runtime, sig, 0, write, 0);
    link(&mut runtime, read, 0, dac, 0);
    runtime.start();

    // 2ms is two blocks at 64kHz
    assert_eq!(runtime.process_block()[0][63], 0.0);
    assert_eq!(runtime.process_block()[0][63], 0.0);
    assert_eq!(runtime.process_block()[0][0], 1.0);
}

#[test]
fn line_ramps_to_its_target() {
    let (mut runtime, _) = runtime_64k();
    let patch = runtime.create_patch(vec![]);
    let line = runtime.create_object(patch, "line~", vec![]).unwrap();
    let dac = runtime.create_object(patch, "dac~", vec![]).unwrap();
    link(&mut runtime, line, 0, dac, 0);
    runtime.start();

    // ramp to 1 over 2 blocks
    runtime.send(runtime.inlet(line, 0).unwrap(), vec![Atom::Float(1.0), Atom::Float(2.0)]).unwrap();
    let first = runtime.process_block()[0].clone();
    assert!(first[0] > 0.0 && first[63] < 0.51);
    assert!(first.windows(2).all(|w| w[1] > w[0]));
    assert_eq!(runtime.process_block()[0][63], 1.0);
    assert_eq!(runtime.process_block()[0][0], 1.0);
}

#[test]
fn unconnected_units_keep_time() {
    let (mut runtime, _) = runtime_64k();
    let patch = runtime.create_patch(vec![]);
    let line = runtime.create_object(patch, "line~", vec![]).unwrap();
    let dac = runtime.create_object(patch, "dac~", vec![]).unwrap();
    runtime.start();

    // a 4 block ramp that nothing listens to
    runtime.send(runtime.inlet(line, 0).unwrap(), vec![Atom::Float(1.0), Atom::Float(4.0)]).unwrap();
    for _ in 0..8 {
        runtime.process_block();
    }

    link(&mut runtime, line, 0, dac, 0);
    assert!(runtime.process_block()[0].iter().all(|s| *s == 1.0));
}

#[test]
fn feedback_loops_stop_at_max_depth() {
    let (mut runtime, log) = runtime();
    let patch = runtime.create_patch(vec![]);
    let add = runtime.create_object(patch, "+", vec![Atom::Float(1.0)]).unwrap();
    let probe = runtime.create_object(patch, "probe", vec![]).unwrap();
    link(&mut runtime, add, 0, probe, 0);
    link(&mut runtime, add, 0, add, 0);

    runtime.send(runtime.inlet(add, 0).unwrap(), float(0.0)).unwrap();
    let counts = logged(&log);
    assert_eq!(counts.len(), MAX_DEPTH - 1);
    assert_eq!(counts[0], (0, float(1.0)));
    assert_eq!(counts.last(), Some(&(0, float((MAX_DEPTH - 1) as f64))));

    // still usable once the loop is cut
    runtime.disconnect(runtime.outlet(add, 0).unwrap(), runtime.inlet(add, 0).unwrap()).unwrap();
    runtime.send(runtime.inlet(add, 0).unwrap(), float(10.0)).unwrap();
    assert_eq!(logged(&log).last(), Some(&(0, float(11.0))));
    assert_eq!(logged(&log).len(), MAX_DEPTH);
}
