//! Error types for graph construction and patch loading.

use itertools::Itertools;
use thiserror::Error;

/// Errors raised while building or editing a patch.
///
/// Runtime message handling never produces these: malformed payloads reaching
/// an object are logged and dropped so delivery to the remaining sinks of a
/// fan-out is not interrupted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    /// No factory or abstraction is registered under this type name.
    #[error("unknown object type '{0}'")]
    UnknownObject(String),

    /// A portlet index is out of range, or the two portlets cannot form an edge.
    #[error("invalid portlet: {0}")]
    InvalidPortlet(String),

    /// A `$N` token referenced an argument that does not exist.
    #[error("argument ${index} out of range (have {len} arguments)")]
    ArgumentOutOfRange { index: usize, len: usize },

    /// A unique name is already taken.
    #[error("a '{kind}' named '{name}' already exists")]
    NameCollision { kind: String, name: String },

    /// The portlets live in different patches and neither allows crossing.
    #[error("cannot connect portlets of different patches")]
    CrossPatchConnection,

    /// A connection references a node id that the description never declared.
    #[error("unknown connection endpoint '{0}'")]
    UnknownEndpoint(String),

    /// The node key does not (or no longer) refers to a live node.
    #[error("node does not exist")]
    UnknownNode,

    /// Creation arguments were well formed but unusable for this type.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// One or more failures while loading a whole patch.
    #[error("{0}")]
    PatchLoad(PatchLoadError),
}

/// A single recorded failure of a patch load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    pub message: String,
    pub cause: PatchError,
}

/// Aggregate of every failure recorded while loading a patch.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("patch failed to load ({} errors): {}", .failures.len(), summary(.failures))]
pub struct PatchLoadError {
    pub failures: Vec<LoadFailure>,
}

fn summary(failures: &[LoadFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{}: {}", failure.message, failure.cause))
        .join("; ")
}

impl PatchLoadError {
    #[inline]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl From<PatchLoadError> for PatchError {
    fn from(e: PatchLoadError) -> Self {
        PatchError::PatchLoad(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_errors_list_every_failure() {
        let error = PatchLoadError {
            failures: vec![
                LoadFailure { message: "could not create 'x' (nope)".into(), cause: PatchError::UnknownObject("nope".into()) },
                LoadFailure { message: "could not connect a:0 to b:7".into(), cause: PatchError::CrossPatchConnection },
            ],
        };
        assert_eq!(
            PatchError::from(error).to_string(),
            "patch failed to load (2 errors): could not create 'x' (nope): unknown object type 'nope'; \
             could not connect a:0 to b:7: cannot connect portlets of different patches"
        );
    }
}
