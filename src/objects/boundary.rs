//! `inlet`, `outlet`, `inlet~` and `outlet~`: the portlets of a patch.

use dasp_graph::Buffer;

use crate::graph::{BlockContext, Control, DspUnit};
use crate::library::{ObjectLibrary, ObjectType, Role};
use crate::message::Message;
use crate::node::{Context, Instance, Object};
use crate::portlet::PortletSpec;

pub(super) fn register(library: &mut ObjectLibrary) {
    library.register(
        "inlet",
        ObjectType::new(|_| {
            Ok(Instance::new(Forward)
                .inlets([PortletSpec::MESSAGE.crossing()])
                .outlets([PortletSpec::MESSAGE]))
        })
        .with_role(Role::Inlet),
    );
    library.register(
        "outlet",
        ObjectType::new(|_| {
            Ok(Instance::new(Forward)
                .inlets([PortletSpec::MESSAGE])
                .outlets([PortletSpec::MESSAGE.crossing()]))
        })
        .with_role(Role::Outlet),
    );
    library.register(
        "inlet~",
        ObjectType::new(|_| {
            Ok(Instance::new(SignalInlet)
                .inlets([PortletSpec::DSP.crossing()])
                .outlets([PortletSpec::DSP, PortletSpec::MESSAGE]))
        })
        .with_role(Role::Inlet),
    );
    library.register(
        "outlet~",
        ObjectType::new(|_| {
            Ok(Instance::new(SignalOutlet)
                .inlets([PortletSpec::DSP])
                .outlets([PortletSpec::DSP.crossing()]))
        })
        .with_role(Role::Outlet),
    );
}

/// Passes messages through unchanged.
struct Forward;

impl Object for Forward {
    fn message(&mut self, _inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        ctx.out(0, msg.atoms.clone());
    }
}

/// Signal through outlet 0, messages through outlet 1.
struct SignalInlet;

impl Object for SignalInlet {
    fn start(&mut self, ctx: &mut Context<'_>) {
        ctx.install_dsp(Box::new(Passthrough));
    }

    fn message(&mut self, _inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        ctx.out(1, msg.atoms.clone());
    }
}

struct SignalOutlet;

impl Object for SignalOutlet {
    fn start(&mut self, ctx: &mut Context<'_>) {
        ctx.install_dsp(Box::new(Passthrough));
    }
}

struct Passthrough;

impl DspUnit for Passthrough {
    fn process(&mut self, _ctx: &BlockContext, _controls: &[Control], inputs: &[Buffer], outputs: &mut [Buffer]) {
        outputs[0] = inputs[0].clone();
    }

    fn num_inputs(&self) -> usize { 1 }
}
