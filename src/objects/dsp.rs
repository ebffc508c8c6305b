//! Signal objects: `dac~`, `osc~`, `sig~`, `+~`, `*~` and `line~`.
//!
//! Each object keeps its parameters itself and installs a fresh unit built
//! from them on start; while running, parameter changes travel to the unit as
//! time-tagged controls and take effect on the right sample.

use dasp_graph::Buffer;

use crate::error::PatchError;
use crate::library::{ObjectLibrary, ObjectType, Role};
use crate::message::{Atom, Message, MessageKind};
use crate::node::{Context, Instance, Object};
use crate::portlet::PortletSpec;
use crate::graph::{BlockContext, Control, DspUnit};

use super::{float_arg, unhandled, Timeline};

pub(super) fn register(library: &mut ObjectLibrary) {
    library.register("dac~", ObjectType::new(Dac::instance).with_role(Role::EndPoint));
    library.register("osc~", ObjectType::new(|args| Ok(Osc::instance(args))));
    library.register("sig~", ObjectType::new(|args| Ok(Sig::instance(args))));
    library.register("+~", ObjectType::new(|args| Ok(Arith::instance(ArithOp::Add, args))));
    library.register("*~", ObjectType::new(|args| Ok(Arith::instance(ArithOp::Mul, args))));
    library.register("line~", ObjectType::new(|_| Ok(Line::instance())));
}

/// Highest channel number `dac~` accepts.
const MAX_DAC_CHANNEL: f64 = 256.0;

/// Audio output. Arguments are 1-based output channels, `1 2` by default.
struct Dac {
    channels: Vec<usize>,
}

impl Dac {
    fn instance(args: &[Atom]) -> Result<Instance, PatchError> {
        let mut channels = Vec::new();
        for channel in args.iter().filter_map(Atom::as_float).filter(|c| *c >= 1.0) {
            if channel > MAX_DAC_CHANNEL {
                return Err(PatchError::InvalidArgument(format!(
                    "dac~ channel {} out of range (1 to {})",
                    channel, MAX_DAC_CHANNEL
                )));
            }
            channels.push(channel as usize - 1);
        }
        if channels.is_empty() {
            channels = vec![0, 1];
        }
        let inlets = vec![PortletSpec::DSP; channels.len()];
        Ok(Instance::new(Self { channels }).inlets(inlets))
    }
}

impl Object for Dac {
    fn start(&mut self, ctx: &mut Context<'_>) {
        ctx.install_dsp(Box::new(DacUnit { channels: self.channels.clone() }));
    }
}

/// Routes inlet `i` to output channel `channels[i]`.
struct DacUnit {
    channels: Vec<usize>,
}

impl DspUnit for DacUnit {
    fn process(&mut self, _ctx: &BlockContext, _controls: &[Control], inputs: &[Buffer], outputs: &mut [Buffer]) {
        outputs.iter_mut().for_each(|out| *out = Buffer::SILENT);
        for (input, &channel) in inputs.iter().zip(&self.channels) {
            for (o, i) in outputs[channel].iter_mut().zip(input.iter()) {
                *o += *i;
            }
        }
    }

    fn num_inputs(&self) -> usize {
        self.channels.len()
    }

    fn num_outputs(&self) -> usize {
        self.channels.iter().max().map_or(0, |c| c + 1)
    }
}

/// Cosine oscillator. Left: frequency (signal or float), right: phase reset.
struct Osc {
    frequency: f64,
}

impl Osc {
    fn instance(args: &[Atom]) -> Instance {
        Instance::new(Self { frequency: float_arg(args, 0).unwrap_or(0.0) })
            .inlets([PortletSpec::DSP, PortletSpec::MESSAGE])
            .outlets([PortletSpec::DSP])
    }
}

impl Object for Osc {
    fn start(&mut self, ctx: &mut Context<'_>) {
        let unit = OscUnit { frequency: self.frequency, phase: 0.0, timeline: Timeline::default() };
        ctx.install_dsp(Box::new(unit));
    }

    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        match (inlet, msg.kind()) {
            (0, MessageKind::Float(frequency)) => {
                self.frequency = frequency;
                ctx.control(0, vec![frequency]);
            }
            (1, MessageKind::Float(phase)) => ctx.control(1, vec![phase]),
            _ => unhandled("osc~", inlet, msg),
        }
    }
}

struct OscUnit {
    frequency: f64,
    phase: f64,
    timeline: Timeline,
}

impl DspUnit for OscUnit {
    fn process(&mut self, ctx: &BlockContext, controls: &[Control], inputs: &[Buffer], outputs: &mut [Buffer]) {
        self.timeline.extend(controls);
        let sample_rate = ctx.sample_rate as f64;

        for (i, out) in outputs[0].iter_mut().enumerate() {
            while let Some(control) = self.timeline.pop_due(ctx, i) {
                match (control.slot, control.values.first()) {
                    (0, Some(frequency)) => self.frequency = *frequency,
                    (1, Some(phase)) => self.phase = phase.rem_euclid(1.0),
                    _ => {}
                }
            }
            *out = (self.phase * core::f64::consts::TAU).cos() as f32;

            let frequency = self.frequency + inputs[0][i] as f64;
            self.phase = (self.phase + frequency / sample_rate).rem_euclid(1.0);
        }
    }

    fn num_inputs(&self) -> usize { 1 }
}

/// Converts floats into a constant signal.
struct Sig {
    value: f64,
}

impl Sig {
    fn instance(args: &[Atom]) -> Instance {
        Instance::new(Self { value: float_arg(args, 0).unwrap_or(0.0) })
            .inlets([PortletSpec::MESSAGE])
            .outlets([PortletSpec::DSP])
    }
}

impl Object for Sig {
    fn start(&mut self, ctx: &mut Context<'_>) {
        ctx.install_dsp(Box::new(SigUnit { value: self.value, timeline: Timeline::default() }));
    }

    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        match msg.kind() {
            MessageKind::Float(value) => {
                self.value = value;
                ctx.control(0, vec![value]);
            }
            _ => unhandled("sig~", inlet, msg),
        }
    }
}

struct SigUnit {
    value: f64,
    timeline: Timeline,
}

impl DspUnit for SigUnit {
    fn process(&mut self, ctx: &BlockContext, controls: &[Control], _inputs: &[Buffer], outputs: &mut [Buffer]) {
        self.timeline.extend(controls);
        for (i, out) in outputs[0].iter_mut().enumerate() {
            while let Some(control) = self.timeline.pop_due(ctx, i) {
                if let Some(value) = control.values.first() {
                    self.value = *value;
                }
            }
            *out = self.value as f32;
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ArithOp {
    Add,
    Mul,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "+~",
            ArithOp::Mul => "*~",
        }
    }
}

/// Signal arithmetic. With a creation argument the right inlet takes
/// floats only; without, it takes a signal. Floats sent to a signal inlet
/// are added to whatever signal arrives there.
struct Arith {
    op: ArithOp,
    scalars: [f64; 2],
}

impl Arith {
    fn instance(op: ArithOp, args: &[Atom]) -> Instance {
        let (right_inlet, right) = match float_arg(args, 0) {
            Some(value) => (PortletSpec::MESSAGE, value),
            None => (PortletSpec::DSP, 0.0),
        };
        Instance::new(Self { op, scalars: [0.0, right] })
            .inlets([PortletSpec::DSP, right_inlet])
            .outlets([PortletSpec::DSP])
    }
}

impl Object for Arith {
    fn start(&mut self, ctx: &mut Context<'_>) {
        let unit = ArithUnit { op: self.op, scalars: self.scalars, timeline: Timeline::default() };
        ctx.install_dsp(Box::new(unit));
    }

    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        match (inlet, msg.kind()) {
            (0 | 1, MessageKind::Float(value)) => {
                self.scalars[inlet] = value;
                ctx.control(inlet, vec![value]);
            }
            _ => unhandled(self.op.name(), inlet, msg),
        }
    }
}

struct ArithUnit {
    op: ArithOp,
    scalars: [f64; 2],
    timeline: Timeline,
}

impl DspUnit for ArithUnit {
    fn process(&mut self, ctx: &BlockContext, controls: &[Control], inputs: &[Buffer], outputs: &mut [Buffer]) {
        self.timeline.extend(controls);
        for (i, out) in outputs[0].iter_mut().enumerate() {
            while let Some(control) = self.timeline.pop_due(ctx, i) {
                if let (Some(scalar), Some(value)) = (self.scalars.get_mut(control.slot), control.values.first()) {
                    *scalar = *value;
                }
            }
            let left = inputs[0][i] + self.scalars[0] as f32;
            let right = inputs[1][i] + self.scalars[1] as f32;
            *out = match self.op {
                ArithOp::Add => left + right,
                ArithOp::Mul => left * right,
            };
        }
    }

    fn num_inputs(&self) -> usize { 2 }
}

/// Linear ramp generator.
///
/// `TARGET TIME` (or `TARGET` after setting `TIME` on the right inlet) ramps
/// to `TARGET` over `TIME` ms; without a time it jumps. `stop` freezes the
/// ramp where it is.
struct Line {
    ramp_time: f64,
}

impl Line {
    fn instance() -> Instance {
        Instance::new(Self { ramp_time: 0.0 })
            .inlets([PortletSpec::MESSAGE; 2])
            .outlets([PortletSpec::DSP])
    }
}

impl Object for Line {
    fn start(&mut self, ctx: &mut Context<'_>) {
        let unit = LineUnit { current: 0.0, increment: 0.0, target: 0.0, remaining: 0, timeline: Timeline::default() };
        ctx.install_dsp(Box::new(unit));
    }

    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        match (inlet, msg.kind()) {
            (0, MessageKind::Float(target)) => {
                ctx.control(0, vec![target, self.ramp_time]);
                self.ramp_time = 0.0;
            }
            (0, MessageKind::List([Atom::Float(target), Atom::Float(time), ..])) => {
                ctx.control(0, vec![*target, *time]);
                self.ramp_time = 0.0;
            }
            (0, MessageKind::Anything("stop", _)) => ctx.control(1, Vec::new()),
            (1, MessageKind::Float(time)) => self.ramp_time = time,
            _ => unhandled("line~", inlet, msg),
        }
    }
}

struct LineUnit {
    current: f64,
    increment: f64,
    target: f64,
    remaining: usize,
    timeline: Timeline,
}

impl LineUnit {
    fn apply(&mut self, ctx: &BlockContext, control: &Control) {
        match (control.slot, control.values.as_slice()) {
            (0, [target, time, ..]) => {
                let samples = (time * ctx.sample_rate as f64 / 1000.0).round();
                if samples < 1.0 {
                    self.current = *target;
                    self.remaining = 0;
                } else {
                    self.target = *target;
                    self.remaining = samples as usize;
                    self.increment = (self.target - self.current) / samples;
                }
            }
            (1, _) => self.remaining = 0,
            _ => {}
        }
    }
}

impl DspUnit for LineUnit {
    fn process(&mut self, ctx: &BlockContext, controls: &[Control], _inputs: &[Buffer], outputs: &mut [Buffer]) {
        self.timeline.extend(controls);
        for (i, out) in outputs[0].iter_mut().enumerate() {
            while let Some(control) = self.timeline.pop_due(ctx, i) {
                self.apply(ctx, &control);
            }
            if self.remaining > 0 {
                self.remaining -= 1;
                self.current = match self.remaining {
                    0 => self.target,
                    _ => self.current + self.increment,
                };
            }
            *out = self.current as f32;
        }
    }
}
