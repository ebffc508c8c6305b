//! Built-in objects.
//!
//! Enough of the Pd vocabulary to build and test real patches: boundary
//! objects, a handful of control objects, named send/receive and arrays,
//! timers, and simple DSP units. Malformed messages are logged and dropped.

mod boundary;
mod control;
mod dsp;
mod named;
mod tables;
mod time;

use std::collections::VecDeque;

pub use named::SharedArray;

use crate::graph::{BlockContext, Control};
use crate::library::ObjectLibrary;
use crate::message::{Atom, Message};

pub(crate) fn register_builtins(library: &mut ObjectLibrary) {
    boundary::register(library);
    control::register(library);
    named::register(library);
    time::register(library);
    dsp::register(library);
    tables::register(library);
}

fn float_arg(args: &[Atom], index: usize) -> Option<f64> {
    args.get(index).and_then(Atom::as_float)
}

fn symbol_arg(args: &[Atom], index: usize) -> Option<&str> {
    args.get(index).and_then(Atom::as_symbol)
}

fn bang() -> Vec<Atom> {
    vec![Atom::symbol("bang")]
}

fn unhandled(object: &str, inlet: usize, msg: &Message) {
    tracing::warn!(object, inlet, %msg, "unhandled message");
}

/// Controls waiting for the sample they apply at.
///
/// A control applies at `ceil(offset)` where `offset` is its fractional
/// sample position in the block; controls from the past apply at sample 0
/// and controls past the end of the block wait for a later block.
#[derive(Default)]
pub(crate) struct Timeline {
    pending: VecDeque<Control>,
}

impl Timeline {
    pub fn extend(&mut self, controls: &[Control]) {
        for control in controls {
            let pos = self.pending.partition_point(|c| c.time_tag <= control.time_tag);
            self.pending.insert(pos, control.clone());
        }
    }

    /// Pop the next control due at or before `sample`.
    pub fn pop_due(&mut self, ctx: &BlockContext, sample: usize) -> Option<Control> {
        let due = ctx.sample_offset(self.pending.front()?.time_tag).ceil() <= sample as f64;
        match due {
            true => self.pending.pop_front(),
            false => None,
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(time_tag: f64, value: f64) -> Control {
        Control { slot: 0, values: vec![value], time_tag }
    }

    #[test]
    fn timeline_places_controls_on_samples() {
        // 1 sample per ms
        let ctx = BlockContext { sample_rate: 1000, block_start: 100.0, frame: 0 };
        let mut timeline = Timeline::default();
        timeline.extend(&[control(102.5, 1.0), control(90.0, 0.0), control(400.0, 2.0)]);

        assert_eq!(timeline.pop_due(&ctx, 0).map(|c| c.values[0]), Some(0.0));
        assert!(timeline.pop_due(&ctx, 0).is_none());
        assert!(timeline.pop_due(&ctx, 2).is_none());
        assert_eq!(timeline.pop_due(&ctx, 3).map(|c| c.values[0]), Some(1.0));
        assert!(timeline.pop_due(&ctx, 63).is_none());
        assert!(!timeline.is_empty());
    }
}
