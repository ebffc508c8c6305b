//! Objects addressed by name: `send`, `receive` and `table`.

use std::sync::{Arc, RwLock};

use crate::error::PatchError;
use crate::library::{ObjectLibrary, ObjectType};
use crate::message::{Atom, Message, MessageKind};
use crate::names::{self, Payload};
use crate::node::{Context, Instance, Object};
use crate::portlet::PortletSpec;

use super::{float_arg, symbol_arg, unhandled};

/// Sample storage shared between a `table` and its readers.
pub type SharedArray = Arc<RwLock<Vec<f32>>>;

const DEFAULT_TABLE_SIZE: usize = 100;

pub(super) fn register(library: &mut ObjectLibrary) {
    library.register("send", ObjectType::new(|args| Ok(SendNamed::instance(args))));
    library.alias("s", "send");
    library.register("receive", ObjectType::new(Receive::instance));
    library.alias("r", "receive");
    library.register("table", ObjectType::new(Table::instance));
}

/// Forwards messages to every `receive` of its name.
///
/// Without a name argument it gets a second inlet taking the name.
struct SendNamed {
    name: Option<String>,
}

impl SendNamed {
    fn instance(args: &[Atom]) -> Instance {
        let name = symbol_arg(args, 0).map(str::to_owned);
        let inlets = match name {
            Some(_) => vec![PortletSpec::MESSAGE],
            None => vec![PortletSpec::MESSAGE; 2],
        };
        Instance::new(Self { name }).inlets(inlets)
    }
}

impl Object for SendNamed {
    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        match (inlet, &self.name) {
            (0, Some(name)) => ctx.send_named(name, msg.atoms.clone()),
            (0, None) => tracing::warn!(%msg, "send has no receiver name"),
            (_, _) => match msg.kind() {
                MessageKind::Symbol(name) => self.name = Some(name.to_owned()),
                _ => unhandled("send", inlet, msg),
            },
        }
    }
}

/// Outputs everything sent to its name.
struct Receive {
    name: String,
}

impl Receive {
    fn instance(args: &[Atom]) -> Result<Instance, PatchError> {
        let name = symbol_arg(args, 0)
            .ok_or_else(|| PatchError::InvalidArgument("receive needs a name".into()))?
            .to_owned();
        Ok(Instance::new(Self { name }).outlets([PortletSpec::MESSAGE]))
    }
}

impl Object for Receive {
    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), PatchError> {
        ctx.register_name(names::RECEIVE, &self.name, None)
    }

    fn received(&mut self, msg: &Message, ctx: &mut Context<'_>) {
        ctx.out(0, msg.atoms.clone());
    }
}

/// A named array of samples.
///
/// Also listens under its name for `resize N`, `const V` and
/// `INDEX V0 V1 ...` (write values starting at `INDEX`).
struct Table {
    name: String,
    array: SharedArray,
}

impl Table {
    fn instance(args: &[Atom]) -> Result<Instance, PatchError> {
        let name = symbol_arg(args, 0)
            .ok_or_else(|| PatchError::InvalidArgument("table needs a name".into()))?
            .to_owned();
        let size = match float_arg(args, 1) {
            Some(size) if size >= 1.0 => size as usize,
            Some(size) => return Err(PatchError::InvalidArgument(format!("invalid table size {}", size))),
            None => DEFAULT_TABLE_SIZE,
        };
        let array = Arc::new(RwLock::new(vec![0.0; size]));
        Ok(Instance::new(Self { name, array }))
    }
}

impl Object for Table {
    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), PatchError> {
        let payload: Payload = self.array.clone();
        ctx.register_name(names::ARRAY, &self.name, Some(payload))?;
        ctx.register_name(names::RECEIVE, &self.name, None)
    }

    fn received(&mut self, msg: &Message, _ctx: &mut Context<'_>) {
        let mut array = match self.array.write() {
            Ok(array) => array,
            Err(_) => {
                tracing::warn!(table = %self.name, "array lock poisoned");
                return;
            }
        };
        match msg.kind() {
            MessageKind::Anything("resize", [Atom::Float(size), ..]) if *size >= 1.0 => {
                array.resize(*size as usize, 0.0);
            }
            MessageKind::Anything("const", [Atom::Float(value), ..]) => {
                array.iter_mut().for_each(|s| *s = *value as f32);
            }
            MessageKind::List([Atom::Float(onset), values @ ..]) => {
                let onset = onset.max(0.0) as usize;
                let values = values.iter().filter_map(Atom::as_float);
                for (sample, value) in array.iter_mut().skip(onset).zip(values) {
                    *sample = value as f32;
                }
            }
            _ => tracing::warn!(table = %self.name, %msg, "unhandled message"),
        }
    }
}
