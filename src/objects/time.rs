//! Timers: `delay` and `metro`.
//!
//! Both schedule relative to the time tag of the message that armed them, so
//! a chain of timers stays sample accurate no matter how late in a block the
//! triggering message was handled.

use crate::clock::EventHandle;
use crate::library::{ObjectLibrary, ObjectType};
use crate::message::{Atom, Message, MessageKind};
use crate::node::{Context, Instance, Object};
use crate::portlet::PortletSpec;

use super::{bang, float_arg, unhandled};

pub(super) fn register(library: &mut ObjectLibrary) {
    library.register("delay", ObjectType::new(|args| Ok(Delay::instance(args))));
    library.alias("del", "delay");
    library.register("metro", ObjectType::new(|args| Ok(Metro::instance(args))));
}

/// Bangs once, `delay` ms after being banged. Re-arming cancels the
/// pending bang.
struct Delay {
    delay: f64,
    pending: Option<EventHandle>,
}

impl Delay {
    fn instance(args: &[Atom]) -> Instance {
        let delay = float_arg(args, 0).unwrap_or(0.0).max(0.0);
        Instance::new(Self { delay, pending: None })
            .inlets([PortletSpec::MESSAGE; 2])
            .outlets([PortletSpec::MESSAGE])
    }

    fn cancel(&mut self, ctx: &mut Context<'_>) {
        if let Some(handle) = self.pending.take() {
            ctx.unschedule(handle);
        }
    }

    fn arm(&mut self, ctx: &mut Context<'_>) {
        self.cancel(ctx);
        let deadline = ctx.time_tag() + self.delay;
        self.pending = Some(ctx.schedule(0, deadline, None));
    }
}

impl Object for Delay {
    fn stop(&mut self, ctx: &mut Context<'_>) {
        self.cancel(ctx);
    }

    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        match (inlet, msg.kind()) {
            (0, MessageKind::Bang) => self.arm(ctx),
            (0, MessageKind::Float(delay)) => {
                self.delay = delay.max(0.0);
                self.arm(ctx);
            }
            (0, MessageKind::Anything("stop", _)) => self.cancel(ctx),
            (1, MessageKind::Float(delay)) => self.delay = delay.max(0.0),
            _ => unhandled("delay", inlet, msg),
        }
    }

    fn timeout(&mut self, _token: u32, ctx: &mut Context<'_>) {
        self.pending = None;
        ctx.out(0, bang());
    }
}

/// Bangs every `period` ms while on.
struct Metro {
    period: f64,
    running: Option<EventHandle>,
    /// Time tag of the last bang.
    last: f64,
}

impl Metro {
    fn instance(args: &[Atom]) -> Instance {
        let period = float_arg(args, 0).unwrap_or(1.0);
        Instance::new(Self { period, running: None, last: 0.0 })
            .inlets([PortletSpec::MESSAGE; 2])
            .outlets([PortletSpec::MESSAGE])
    }

    fn turn_on(&mut self, ctx: &mut Context<'_>) {
        self.turn_off(ctx);
        self.last = ctx.time_tag();
        ctx.out(0, bang());
        self.running = Some(ctx.schedule(0, self.last + self.period, Some(self.period)));
    }

    fn turn_off(&mut self, ctx: &mut Context<'_>) {
        if let Some(handle) = self.running.take() {
            ctx.unschedule(handle);
        }
    }
}

impl Object for Metro {
    fn stop(&mut self, ctx: &mut Context<'_>) {
        self.turn_off(ctx);
    }

    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        match (inlet, msg.kind()) {
            (0, MessageKind::Bang) => self.turn_on(ctx),
            (0, MessageKind::Float(v)) if v != 0.0 => self.turn_on(ctx),
            (0, MessageKind::Float(_)) | (0, MessageKind::Anything("stop", _)) => self.turn_off(ctx),
            (1, MessageKind::Float(period)) => {
                self.period = period;
                // keep the phase of the running metro, change the rate
                if let Some(handle) = self.running.take() {
                    ctx.unschedule(handle);
                    self.running = Some(ctx.schedule(0, self.last + self.period, Some(self.period)));
                }
            }
            _ => unhandled("metro", inlet, msg),
        }
    }

    fn timeout(&mut self, _token: u32, ctx: &mut Context<'_>) {
        self.last = ctx.time_tag();
        ctx.out(0, bang());
    }
}
