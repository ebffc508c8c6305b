//! A Pure Data style patch runtime.
//!
//! Objects live in patches and talk over connections between their inlets
//! and outlets. Message connections carry [`Atom`] lists delivered
//! synchronously, depth first; DSP connections become wires in a block-based
//! audio graph that the [`Runtime`] pulls once per block. Objects can also
//! find each other by name through the [`NamedObjectStore`], and schedule
//! work on the runtime's [`Clock`] with sub-block precision.
//!
//! # Quick start
//!
//! ```
//! use patchbay::{Atom, ObjectLibrary, PatchDescription, Runtime, Settings};
//!
//! let description = PatchDescription::new()
//!     .node("sig", "sig~", vec![Atom::Float(0.5)])
//!     .node("gain", "*~", vec![Atom::Float(0.5)])
//!     .node("out", "dac~", vec![])
//!     .connect("sig", 0, "gain", 0)
//!     .connect("gain", 0, "out", 0)
//!     .connect("gain", 0, "out", 1);
//!
//! let mut runtime = Runtime::new(Settings::default(), ObjectLibrary::default());
//! runtime.load_patch(&description).unwrap();
//! runtime.start();
//!
//! let output = runtime.process_block();
//! assert_eq!(output[0][0], 0.25);
//! assert_eq!(output[1][63], 0.25);
//! ```
//!
//! # Custom objects
//!
//! Implement [`Object`] (and [`DspUnit`] for signal processing), then
//! register a factory with the [`ObjectLibrary`]:
//!
//! ```
//! use patchbay::{Atom, Context, Instance, Message, Object, ObjectLibrary, ObjectType, PortletSpec};
//!
//! struct Double;
//!
//! impl Object for Double {
//!     fn message(&mut self, _inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
//!         if let Some(v) = msg.atoms.first().and_then(Atom::as_float) {
//!             ctx.out(0, vec![Atom::Float(v * 2.0)]);
//!         }
//!     }
//! }
//!
//! let mut library = ObjectLibrary::default();
//! library.register(
//!     "double",
//!     ObjectType::new(|_| {
//!         Ok(Instance::new(Double)
//!             .inlets([PortletSpec::MESSAGE])
//!             .outlets([PortletSpec::MESSAGE]))
//!     }),
//! );
//! ```

mod clock;
mod device;
mod error;
mod graph;
mod library;
mod loader;
mod message;
mod names;
mod node;
mod objects;
mod patch;
mod portlet;
mod resolve;
mod runtime;
mod settings;

pub use clock::{Clock, DueEvent, EventHandle, MIN_PERIOD};
#[cfg(feature = "cpal_sink")]
pub use device::{DeviceError, Playback};
pub use device::{BlockInterleaver, CpalDevice};
pub use error::{LoadFailure, PatchError, PatchLoadError};
pub use graph::{BlockContext, Control, DspUnit};
pub use library::{Factory, ObjectLibrary, ObjectType, Role};
pub use loader::{ConnectionDescription, NodeDescription, PatchDescription, PortDescription};
pub use message::{Atom, Message, MessageKind};
pub use names::{
    Listener, ListenerId, NameEvent, NamedEntry, NamedObjectStore, Payload, Reference, ARRAY, DELAY_LINE, RECEIVE,
};
pub use node::{Context, Instance, NodeKey, Object};
pub use objects::SharedArray;
pub use patch::FIRST_PATCH_ID;
pub use portlet::{Direction, PortletKind, PortletRef, PortletSpec};
pub use resolve::{resolve, ArgResolver};
pub use runtime::{ControlSender, Runtime, MAX_DEPTH};
pub use settings::Settings;
