//! Message payloads passed between object inlets and outlets.
//!
//! A [`Message`] is an ordered list of [`Atom`]s stamped with an absolute
//! `time_tag` (milliseconds of virtual time). Handlers never inspect the raw
//! atoms to guess what they were sent; they match on [`Message::kind`]:
//!
//! ```
//! use patchbay::{Atom, Message, MessageKind};
//!
//! let msg = Message::new(vec![Atom::symbol("set"), Atom::Float(3.0)]);
//! match msg.kind() {
//!     MessageKind::Anything("set", args) => assert_eq!(args, &[Atom::Float(3.0)]),
//!     _ => unreachable!(),
//! }
//! ```

use core::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// A single message element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Atom {
    Float(f64),
    Symbol(String),
}

impl Atom {
    pub fn symbol(s: impl Into<String>) -> Self {
        Atom::Symbol(s.into())
    }

    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Atom::Float(v) => Some(*v),
            Atom::Symbol(_) => None,
        }
    }

    #[inline]
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Atom::Symbol(s) => Some(s),
            Atom::Float(_) => None,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // integral floats print without a fractional part, like Pd does
            Atom::Float(v) if v.fract() == 0.0 && v.abs() < 1e15 => write!(f, "{}", *v as i64),
            Atom::Float(v) => write!(f, "{}", v),
            Atom::Symbol(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Atom {
    fn from(v: f64) -> Self {
        Atom::Float(v)
    }
}

impl From<f32> for Atom {
    fn from(v: f32) -> Self {
        Atom::Float(v as f64)
    }
}

impl From<i32> for Atom {
    fn from(v: i32) -> Self {
        Atom::Float(v as f64)
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Atom::Symbol(s.to_owned())
    }
}

impl From<String> for Atom {
    fn from(s: String) -> Self {
        Atom::Symbol(s)
    }
}

/// Classified view of a message, the way an object's handler sees it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MessageKind<'a> {
    Bang,
    Float(f64),
    Symbol(&'a str),
    /// A list of two or more atoms (or a `list` selector message).
    List(&'a [Atom]),
    /// Any other selector, with its arguments.
    Anything(&'a str, &'a [Atom]),
}

/// A discrete control message.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub atoms: Vec<Atom>,
    /// Absolute virtual time (ms) at which the message takes effect.
    pub time_tag: f64,
}

impl Message {
    pub fn new(atoms: Vec<Atom>) -> Self {
        Self { atoms, time_tag: 0.0 }
    }

    pub fn bang() -> Self {
        Self::new(vec![Atom::symbol("bang")])
    }

    pub fn float(v: f64) -> Self {
        Self::new(vec![Atom::Float(v)])
    }

    pub fn symbol(s: impl Into<String>) -> Self {
        Self::new(vec![Atom::symbol("symbol"), Atom::Symbol(s.into())])
    }

    /// Builder-style time tag.
    pub fn with_time_tag(mut self, time_tag: f64) -> Self {
        self.time_tag = time_tag;
        self
    }

    pub fn kind(&self) -> MessageKind<'_> {
        let (head, rest) = match self.atoms.split_first() {
            Some(split) => split,
            None => return MessageKind::Bang,
        };

        match head {
            Atom::Float(v) if rest.is_empty() => MessageKind::Float(*v),
            Atom::Float(_) => MessageKind::List(&self.atoms),
            Atom::Symbol(selector) => match selector.as_str() {
                "bang" => MessageKind::Bang,
                "float" => MessageKind::Float(rest.first().and_then(Atom::as_float).unwrap_or(0.0)),
                "symbol" => MessageKind::Symbol(rest.first().and_then(Atom::as_symbol).unwrap_or("")),
                "list" => match rest {
                    [] => MessageKind::Bang,
                    [Atom::Float(v)] => MessageKind::Float(*v),
                    [Atom::Symbol(s)] => MessageKind::Symbol(s),
                    _ => MessageKind::List(rest),
                },
                _ => MessageKind::Anything(selector, rest),
            },
        }
    }

    /// Atoms following the selector of a message (or all atoms when the
    /// message starts with a float).
    pub fn args(&self) -> &[Atom] {
        match self.atoms.first() {
            Some(Atom::Symbol(_)) => &self.atoms[1..],
            _ => &self.atoms,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.atoms.iter().join(" "))
    }
}
