//! Signal objects bound to named storage: `tabread~`, `delwrite~` and
//! `delread~`.
//!
//! Readers hold a [`Reference`] to the storage by name. When it re-resolves
//! (the storage appears, vanishes or is renamed away), the reader swaps in a
//! unit pointing at the new storage; the DSP graph keeps its wires.

use std::sync::{Arc, RwLock};

use dasp_graph::Buffer;

use crate::error::PatchError;
use crate::graph::{BlockContext, Control, DspUnit};
use crate::library::{ObjectLibrary, ObjectType, Role};
use crate::message::{Atom, Message, MessageKind};
use crate::names::{self, Payload, Reference};
use crate::node::{Context, Instance, Object};
use crate::portlet::PortletSpec;

use super::{float_arg, symbol_arg, unhandled, SharedArray, Timeline};

type SharedDelayLine = Arc<RwLock<DelayLine>>;

const DEFAULT_DELAY_TIME: f64 = 1000.0;

pub(super) fn register(library: &mut ObjectLibrary) {
    library.register("tabread~", ObjectType::new(|args| Ok(TabRead::instance(args))));
    library.register("delwrite~", ObjectType::new(DelWrite::instance).with_role(Role::EndPoint));
    library.register("delread~", ObjectType::new(|args| Ok(DelRead::instance(args))));
}

/// Non-interpolating table lookup; the input signal is the index.
struct TabRead {
    name: Option<String>,
    reference: Option<Reference>,
    started: bool,
}

impl TabRead {
    fn instance(args: &[Atom]) -> Instance {
        let name = symbol_arg(args, 0).map(str::to_owned);
        Instance::new(Self { name, reference: None, started: false })
            .inlets([PortletSpec::DSP])
            .outlets([PortletSpec::DSP])
    }

    fn install(&self, ctx: &mut Context<'_>) {
        let array = self
            .reference
            .and_then(|r| ctx.resolved_payload(r))
            .and_then(|payload| payload.downcast::<RwLock<Vec<f32>>>().ok());
        ctx.install_dsp(Box::new(TabReadUnit { array }));
    }
}

impl Object for TabRead {
    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), PatchError> {
        let reference = ctx.reference(names::ARRAY);
        if let Some(name) = &self.name {
            ctx.set_reference(reference, name);
        }
        self.reference = Some(reference);
        Ok(())
    }

    fn start(&mut self, ctx: &mut Context<'_>) {
        self.started = true;
        self.install(ctx);
    }

    fn stop(&mut self, _ctx: &mut Context<'_>) {
        self.started = false;
    }

    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        match (msg.kind(), self.reference) {
            (MessageKind::Anything("set", [Atom::Symbol(name), ..]), Some(reference)) => {
                self.name = Some(name.clone());
                ctx.set_reference(reference, name);
            }
            _ => unhandled("tabread~", inlet, msg),
        }
    }

    fn reference_changed(&mut self, _reference: Reference, ctx: &mut Context<'_>) {
        if self.started {
            self.install(ctx);
        }
    }
}

struct TabReadUnit {
    array: Option<SharedArray>,
}

impl DspUnit for TabReadUnit {
    fn process(&mut self, _ctx: &BlockContext, _controls: &[Control], inputs: &[Buffer], outputs: &mut [Buffer]) {
        let array = match self.array.as_ref().map(|a| a.read()) {
            Some(Ok(array)) if !array.is_empty() => array,
            _ => {
                outputs[0] = Buffer::SILENT;
                return;
            }
        };
        let last = array.len() - 1;
        for (out, index) in outputs[0].iter_mut().zip(inputs[0].iter()) {
            let index = (index.max(0.0) as usize).min(last);
            *out = array[index];
        }
    }

    fn num_inputs(&self) -> usize { 1 }
}

/// Ring buffer shared by a `delwrite~` and its readers.
pub(crate) struct DelayLine {
    buffer: Vec<f32>,
    /// Position right after the last written sample.
    head: usize,
}

impl DelayLine {
    fn new(len: usize) -> Self {
        Self { buffer: vec![0.0; len.max(Buffer::LEN)], head: 0 }
    }

    fn write(&mut self, block: &[f32]) {
        let len = self.buffer.len();
        for (i, sample) in block.iter().enumerate() {
            self.buffer[(self.head + i) % len] = *sample;
        }
        self.head = (self.head + block.len()) % len;
    }

    /// Sample `delay` samples before sample `i` of the last written block.
    fn read(&self, i: usize, delay: usize) -> f32 {
        let len = self.buffer.len();
        let delay = delay.min(len - Buffer::LEN);
        self.buffer[(self.head + len + i - Buffer::LEN - delay) % len]
    }
}

/// Writes its input into a named delay line.
struct DelWrite {
    name: String,
    time: f64,
    line: Option<SharedDelayLine>,
}

impl DelWrite {
    fn instance(args: &[Atom]) -> Result<Instance, PatchError> {
        let name = symbol_arg(args, 0)
            .ok_or_else(|| PatchError::InvalidArgument("delwrite~ needs a name".into()))?
            .to_owned();
        let time = float_arg(args, 1).unwrap_or(DEFAULT_DELAY_TIME).max(0.0);
        Ok(Instance::new(Self { name, time, line: None }).inlets([PortletSpec::DSP]))
    }
}

impl Object for DelWrite {
    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), PatchError> {
        let samples = (self.time * ctx.settings().sample_rate as f64 / 1000.0).ceil() as usize;
        let line = Arc::new(RwLock::new(DelayLine::new(samples + Buffer::LEN)));
        let payload: Payload = line.clone();
        ctx.register_name(names::DELAY_LINE, &self.name, Some(payload))?;
        self.line = Some(line);
        Ok(())
    }

    fn start(&mut self, ctx: &mut Context<'_>) {
        if let Some(line) = &self.line {
            ctx.install_dsp(Box::new(DelWriteUnit { line: line.clone() }));
        }
    }
}

struct DelWriteUnit {
    line: SharedDelayLine,
}

impl DspUnit for DelWriteUnit {
    fn process(&mut self, _ctx: &BlockContext, _controls: &[Control], inputs: &[Buffer], _outputs: &mut [Buffer]) {
        if let Ok(mut line) = self.line.write() {
            line.write(&inputs[0]);
        }
    }

    fn num_inputs(&self) -> usize { 1 }

    fn num_outputs(&self) -> usize { 0 }
}

/// Reads a named delay line. The inlet sets the delay time in ms.
struct DelRead {
    name: Option<String>,
    delay: f64,
    reference: Option<Reference>,
    started: bool,
}

impl DelRead {
    fn instance(args: &[Atom]) -> Instance {
        let name = symbol_arg(args, 0).map(str::to_owned);
        let delay = float_arg(args, 1).unwrap_or(0.0).max(0.0);
        Instance::new(Self { name, delay, reference: None, started: false })
            .inlets([PortletSpec::MESSAGE])
            .outlets([PortletSpec::DSP])
    }

    fn install(&self, ctx: &mut Context<'_>) {
        let line = self
            .reference
            .and_then(|r| ctx.resolved_payload(r))
            .and_then(|payload| payload.downcast::<RwLock<DelayLine>>().ok());
        let unit = DelReadUnit { line, delay: self.delay, timeline: Timeline::default() };
        ctx.install_dsp(Box::new(unit));
    }
}

impl Object for DelRead {
    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), PatchError> {
        let reference = ctx.reference(names::DELAY_LINE);
        if let Some(name) = &self.name {
            ctx.set_reference(reference, name);
        }
        self.reference = Some(reference);
        Ok(())
    }

    fn start(&mut self, ctx: &mut Context<'_>) {
        self.started = true;
        self.install(ctx);
    }

    fn stop(&mut self, _ctx: &mut Context<'_>) {
        self.started = false;
    }

    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        match (msg.kind(), self.reference) {
            (MessageKind::Float(delay), _) => {
                self.delay = delay.max(0.0);
                ctx.control(0, vec![self.delay]);
            }
            (MessageKind::Anything("set", [Atom::Symbol(name), ..]), Some(reference)) => {
                self.name = Some(name.clone());
                ctx.set_reference(reference, name);
            }
            _ => unhandled("delread~", inlet, msg),
        }
    }

    fn reference_changed(&mut self, _reference: Reference, ctx: &mut Context<'_>) {
        if self.started {
            self.install(ctx);
        }
    }
}

struct DelReadUnit {
    line: Option<SharedDelayLine>,
    /// Delay in ms.
    delay: f64,
    timeline: Timeline,
}

impl DspUnit for DelReadUnit {
    fn process(&mut self, ctx: &BlockContext, controls: &[Control], _inputs: &[Buffer], outputs: &mut [Buffer]) {
        self.timeline.extend(controls);
        let line = match self.line.as_ref().map(|l| l.read()) {
            Some(Ok(line)) => line,
            _ => {
                outputs[0] = Buffer::SILENT;
                return;
            }
        };
        for (i, out) in outputs[0].iter_mut().enumerate() {
            while let Some(control) = self.timeline.pop_due(ctx, i) {
                if let Some(delay) = control.values.first() {
                    self.delay = *delay;
                }
            }
            let delay = (self.delay * ctx.sample_rate as f64 / 1000.0).round() as usize;
            *out = line.read(i, delay);
        }
    }
}
