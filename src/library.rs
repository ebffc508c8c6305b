//! Object type registry.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::error::PatchError;
use crate::loader::PatchDescription;
use crate::message::Atom;
use crate::node::Instance;

/// Builds an [`Instance`] from resolved creation arguments.
pub type Factory = Arc<dyn Fn(&[Atom]) -> Result<Instance, PatchError> + Send + Sync>;

/// How a patch treats objects of a type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Plain,
    /// Pulled by the runtime every block.
    EndPoint,
    /// Its inlet 0 becomes an inlet of the enclosing patch.
    Inlet,
    /// Its outlet 0 becomes an outlet of the enclosing patch.
    Outlet,
}

/// Declaration of one object type.
#[derive(Clone)]
pub struct ObjectType {
    pub factory: Factory,
    /// Whether creation arguments go through `$`/abbreviation resolution.
    pub resolves_args: bool,
    pub role: Role,
}

impl ObjectType {
    pub fn new(factory: impl Fn(&[Atom]) -> Result<Instance, PatchError> + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            resolves_args: true,
            role: Role::Plain,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Pass creation arguments to the factory untouched.
    pub fn raw_args(mut self) -> Self {
        self.resolves_args = false;
        self
    }
}

/// Maps type names to factories, plus registered abstractions.
///
/// [`ObjectLibrary::default`] contains the built-in objects; start from
/// [`ObjectLibrary::new`] for an empty one.
///
/// ```
/// use patchbay::{Instance, Object, ObjectLibrary, ObjectType, PortletSpec};
///
/// struct Nop;
/// impl Object for Nop {}
///
/// let mut library = ObjectLibrary::default();
/// library.register("nop", ObjectType::new(|_| Ok(Instance::new(Nop).inlets([PortletSpec::MESSAGE]))));
/// assert!(library.contains("nop"));
/// assert!(library.contains("osc~"));
/// ```
#[derive(Clone)]
pub struct ObjectLibrary {
    types: HashMap<String, ObjectType>,
    abstractions: HashMap<String, Arc<PatchDescription>>,
}

impl Default for ObjectLibrary {
    fn default() -> Self {
        let mut library = Self::new();
        crate::objects::register_builtins(&mut library);
        library
    }
}

impl ObjectLibrary {
    /// Type name of subpatches.
    pub const SUBPATCH: &'static str = "pd";

    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
            abstractions: HashMap::new(),
        }
    }

    /// Register (or replace) an object type.
    pub fn register(&mut self, name: &str, object_type: ObjectType) {
        self.types.insert(name.to_owned(), object_type);
    }

    /// Make `alias` create the same objects as `name`.
    pub fn alias(&mut self, alias: &str, name: &str) {
        if let Some(object_type) = self.types.get(name).cloned() {
            self.types.insert(alias.to_owned(), object_type);
        }
    }

    /// Register a patch that can be instantiated by name.
    pub fn register_abstraction(&mut self, name: &str, description: PatchDescription) {
        self.abstractions.insert(name.to_owned(), Arc::new(description));
    }

    pub fn get(&self, name: &str) -> Option<&ObjectType> {
        self.types.get(name)
    }

    pub fn abstraction(&self, name: &str) -> Option<Arc<PatchDescription>> {
        self.abstractions.get(name).cloned()
    }

    /// Whether `name` can be created (object, abstraction or subpatch).
    pub fn contains(&self, name: &str) -> bool {
        name == Self::SUBPATCH || self.types.contains_key(name) || self.abstractions.contains_key(name)
    }
}
