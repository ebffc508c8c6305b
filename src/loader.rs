//! Declarative patch descriptions and the loader that instantiates them.
//!
//! A [`PatchDescription`] lists nodes (with a description-local string id)
//! and the connections between their ports. Loading happens in two passes:
//! every node is created first, recursing into subpatch bodies, then every
//! connection is attempted. Failures do not stop either pass; they are
//! collected and reported together as one [`PatchError::PatchLoad`].
//!
//! ```
//! use patchbay::{ObjectLibrary, PatchDescription, Runtime, Settings};
//!
//! let description = PatchDescription::from_json(r#"{
//!     "nodes": [
//!         { "id": "osc", "type": "osc~", "args": [220] },
//!         { "id": "out", "type": "dac~" }
//!     ],
//!     "connections": [
//!         { "source": { "id": "osc", "port": 0 }, "sink": { "id": "out", "port": 0 } },
//!         { "source": { "id": "osc", "port": 0 }, "sink": { "id": "out", "port": 1 } }
//!     ]
//! }"#).unwrap();
//!
//! let mut runtime = Runtime::new(Settings::default(), ObjectLibrary::default());
//! let patch = runtime.load_patch(&description).unwrap();
//! assert_eq!(runtime.objects(patch).len(), 2);
//! ```

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::{LoadFailure, PatchError, PatchLoadError};
use crate::library::ObjectLibrary;
use crate::message::Atom;
use crate::node::NodeKey;
use crate::runtime::Runtime;

/// A patch: its default arguments, nodes and connections.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchDescription {
    /// Arguments of the root patch when loaded with [`Runtime::load_patch`].
    pub args: Vec<Atom>,
    pub nodes: Vec<NodeDescription>,
    pub connections: Vec<ConnectionDescription>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub args: Vec<Atom>,
    /// Contents of a `pd` subpatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<PatchDescription>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescription {
    pub source: PortDescription,
    pub sink: PortDescription,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortDescription {
    pub id: String,
    pub port: usize,
}

impl PatchDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_args(mut self, args: Vec<Atom>) -> Self {
        self.args = args;
        self
    }

    /// Add a node.
    pub fn node(mut self, id: &str, type_name: &str, args: Vec<Atom>) -> Self {
        self.nodes.push(NodeDescription {
            id: id.to_owned(),
            type_name: type_name.to_owned(),
            args,
            body: None,
        });
        self
    }

    /// Add a `pd` subpatch node.
    pub fn subpatch(mut self, id: &str, body: PatchDescription) -> Self {
        self.nodes.push(NodeDescription {
            id: id.to_owned(),
            type_name: ObjectLibrary::SUBPATCH.to_owned(),
            args: Vec::new(),
            body: Some(body),
        });
        self
    }

    /// Connect outlet `source_port` of `source` to inlet `sink_port` of `sink`.
    pub fn connect(mut self, source: &str, source_port: usize, sink: &str, sink_port: usize) -> Self {
        self.connections.push(ConnectionDescription {
            source: PortDescription { id: source.to_owned(), port: source_port },
            sink: PortDescription { id: sink.to_owned(), port: sink_port },
        });
        self
    }
}

impl Runtime {
    /// Build a new root patch from `description`.
    ///
    /// On failure nothing is left behind: the partial patch is destroyed and
    /// every recorded failure is returned in one [`PatchError::PatchLoad`].
    pub fn load_patch(&mut self, description: &PatchDescription) -> Result<NodeKey, PatchError> {
        let patch = self.create_patch(description.args.clone());
        match self.populate(patch, description) {
            Ok(()) => {
                tracing::debug!(?patch, nodes = description.nodes.len(), "patch loaded");
                Ok(patch)
            }
            Err(e) => {
                tracing::warn!(errors = e.len(), "patch failed to load");
                self.destroy_patch(patch)?;
                Err(e.into())
            }
        }
    }

    /// Create the nodes and connections of `description` inside `patch`.
    pub(crate) fn populate(&mut self, patch: NodeKey, description: &PatchDescription) -> Result<(), PatchLoadError> {
        let mut failures = Vec::new();
        self.build(patch, description, "", &mut failures);
        match failures.is_empty() {
            true => Ok(()),
            false => Err(PatchLoadError { failures }),
        }
    }

    fn build(&mut self, patch: NodeKey, description: &PatchDescription, path: &str, failures: &mut Vec<LoadFailure>) {
        // None marks nodes that failed; their connections are skipped silently
        let mut created: HashMap<&str, Option<NodeKey>> = HashMap::new();

        for node in &description.nodes {
            let label = format!("{}{}", path, node.id);
            match self.create_object(patch, &node.type_name, node.args.clone()) {
                Ok(key) => {
                    match &node.body {
                        Some(body) if node.type_name == ObjectLibrary::SUBPATCH => {
                            self.build(key, body, &format!("{}/", label), failures);
                        }
                        Some(_) => tracing::warn!(node = %label, "ignoring body of non-subpatch node"),
                        None => {}
                    }
                    created.insert(node.id.as_str(), Some(key));
                }
                Err(cause) => {
                    failures.push(LoadFailure {
                        message: format!("could not create '{}' ({})", label, node.type_name),
                        cause,
                    });
                    created.insert(node.id.as_str(), None);
                }
            }
        }

        for connection in &description.connections {
            let (source, sink) = (&connection.source, &connection.sink);
            let message = format!(
                "could not connect {}{}:{} to {}{}:{}",
                path, source.id, source.port, path, sink.id, sink.port
            );
            let endpoints = match (created.get(source.id.as_str()), created.get(sink.id.as_str())) {
                (Some(None), _) | (_, Some(None)) => continue,
                (Some(Some(a)), Some(Some(b))) => Ok((*a, *b)),
                (None, _) => Err(PatchError::UnknownEndpoint(source.id.clone())),
                (_, None) => Err(PatchError::UnknownEndpoint(sink.id.clone())),
            };
            let result = endpoints.and_then(|(a, b)| self.connect_ports(a, source.port, b, sink.port));
            if let Err(cause) = result {
                failures.push(LoadFailure { message, cause });
            }
        }
    }

    fn connect_ports(&mut self, source: NodeKey, outlet: usize, sink: NodeKey, inlet: usize) -> Result<bool, PatchError> {
        let outlet = self.outlet(source, outlet)?;
        let inlet = self.inlet(sink, inlet)?;
        self.connect(outlet, inlet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_descriptions() {
        let description = PatchDescription::from_json(
            r#"{
                "args": [1, "two"],
                "nodes": [
                    { "id": "a", "type": "float", "args": [3] },
                    { "id": "sub", "type": "pd", "body": { "nodes": [{ "id": "x", "type": "inlet" }] } }
                ],
                "connections": [{ "source": { "id": "a", "port": 0 }, "sink": { "id": "sub", "port": 0 } }]
            }"#,
        )
        .unwrap();

        let expected = PatchDescription::new()
            .with_args(vec![Atom::Float(1.0), Atom::symbol("two")])
            .node("a", "float", vec![Atom::Float(3.0)])
            .subpatch("sub", PatchDescription::new().node("x", "inlet", vec![]))
            .connect("a", 0, "sub", 0);
        assert_eq!(description, expected);
    }
}
