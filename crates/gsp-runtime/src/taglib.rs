//! Tag libraries and tag lookup.

use crate::body::TagBody;
use crate::context::RenderContext;
use crate::error::TagError;
use crate::stack::CodecSettings;
use crate::value::Value;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Attributes passed to a tag, in source order.
pub type Attributes = IndexMap<SmolStr, Value>;

/// Result of a tag implementation.
pub type TagResult = Result<Value, TagError>;

type NoArgsFn = dyn Fn(&mut RenderContext<'_>) -> TagResult + Send + Sync;
type AttrsFn = dyn Fn(&Attributes, &mut RenderContext<'_>) -> TagResult + Send + Sync;
type BodyFn =
    dyn Fn(&Attributes, &TagBody<'_>, &mut RenderContext<'_>) -> TagResult + Send + Sync;

/// A tag implementation, by the arguments it accepts.
#[derive(Clone)]
pub enum TagCallable {
    /// Takes no arguments. A body is rendered after the call.
    NoArgs(Arc<NoArgsFn>),
    /// Takes the attributes. A body is rendered after the call.
    Attrs(Arc<AttrsFn>),
    /// Takes the attributes and the body.
    AttrsAndBody(Arc<BodyFn>),
}

impl TagCallable {
    /// Wraps a tag taking no arguments.
    pub fn no_args(
        f: impl Fn(&mut RenderContext<'_>) -> TagResult + Send + Sync + 'static,
    ) -> Self {
        TagCallable::NoArgs(Arc::new(f))
    }

    /// Wraps a tag taking the attributes.
    pub fn attrs(
        f: impl Fn(&Attributes, &mut RenderContext<'_>) -> TagResult + Send + Sync + 'static,
    ) -> Self {
        TagCallable::Attrs(Arc::new(f))
    }

    /// Wraps a tag taking the attributes and the body.
    pub fn with_body(
        f: impl Fn(&Attributes, &TagBody<'_>, &mut RenderContext<'_>) -> TagResult
            + Send
            + Sync
            + 'static,
    ) -> Self {
        TagCallable::AttrsAndBody(Arc::new(f))
    }

    /// Number of arguments the tag accepts.
    pub fn arity(&self) -> usize {
        match self {
            TagCallable::NoArgs(_) => 0,
            TagCallable::Attrs(_) => 1,
            TagCallable::AttrsAndBody(_) => 2,
        }
    }
}

impl fmt::Debug for TagCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagCallable(arity {})", self.arity())
    }
}

/// A tag provided by a library.
#[derive(Debug, Clone)]
pub struct TagDescriptor {
    name: SmolStr,
    callable: TagCallable,
    returns_value: bool,
    encode_as: CodecSettings,
}

impl TagDescriptor {
    /// Creates a tag that writes its output.
    pub fn new(name: &str, callable: TagCallable) -> Self {
        Self {
            name: SmolStr::new(name),
            callable,
            returns_value: false,
            encode_as: CodecSettings::default(),
        }
    }

    /// Marks the tag as returning its result instead of writing it.
    pub fn returns_value(mut self) -> Self {
        self.returns_value = true;
        self
    }

    /// Sets the codecs the tag applies by default.
    pub fn encode_as(mut self, settings: CodecSettings) -> Self {
        self.encode_as = settings;
        self
    }

    /// Name of the tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The implementation.
    pub fn callable(&self) -> &TagCallable {
        &self.callable
    }
}

/// A named set of tags in one namespace.
#[derive(Debug, Clone)]
pub struct TagLibrary {
    namespace: SmolStr,
    name: SmolStr,
    default_encode_as: CodecSettings,
    tags: IndexMap<SmolStr, TagDescriptor>,
}

impl TagLibrary {
    /// Creates an empty library.
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: SmolStr::new(namespace),
            name: SmolStr::new(name),
            default_encode_as: CodecSettings::default(),
            tags: IndexMap::new(),
        }
    }

    /// Sets the codecs applied to every tag of the library.
    pub fn default_encode_as(mut self, settings: CodecSettings) -> Self {
        self.default_encode_as = settings;
        self
    }

    /// Adds a tag.
    pub fn tag(mut self, descriptor: TagDescriptor) -> Self {
        self.add_tag(descriptor);
        self
    }

    /// Adds a tag, replacing one with the same name.
    pub fn add_tag(&mut self, descriptor: TagDescriptor) {
        self.tags.insert(descriptor.name.clone(), descriptor);
    }

    /// Namespace of the library.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the library.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Iterates over the tags.
    pub fn tags(&self) -> impl Iterator<Item = &TagDescriptor> {
        self.tags.values()
    }
}

/// A tag as resolved from a lookup.
#[derive(Debug, Clone)]
pub struct ResolvedTag {
    /// The tag.
    pub descriptor: TagDescriptor,
    /// Name of the library providing the tag.
    pub library: SmolStr,
    /// Tag codecs merged over the library's defaults.
    pub codecs: CodecSettings,
}

impl ResolvedTag {
    /// Whether the tag returns its result.
    pub fn returns_value(&self) -> bool {
        self.descriptor.returns_value
    }
}

/// An immutable index of tags by namespace and name.
#[derive(Debug, Default)]
pub struct TagLibraryLookup {
    libraries: Vec<TagLibrary>,
    tags: FxHashMap<SmolStr, FxHashMap<SmolStr, ResolvedTag>>,
}

impl TagLibraryLookup {
    /// Builds a lookup. Later libraries override tags of earlier ones.
    pub fn new(libraries: Vec<TagLibrary>) -> Self {
        let mut tags: FxHashMap<SmolStr, FxHashMap<SmolStr, ResolvedTag>> =
            FxHashMap::default();
        for library in &libraries {
            let namespace = tags.entry(library.namespace.clone()).or_default();
            for descriptor in library.tags.values() {
                let resolved = ResolvedTag {
                    descriptor: descriptor.clone(),
                    library: library.name.clone(),
                    codecs: descriptor
                        .encode_as
                        .clone()
                        .merged_over(&library.default_encode_as),
                };
                if let Some(previous) = namespace.insert(descriptor.name.clone(), resolved) {
                    log::debug!(
                        target: "gsp.runtime",
                        "tag {}:{} from {} overrides {}",
                        library.namespace,
                        descriptor.name,
                        library.name,
                        previous.library
                    );
                }
            }
        }
        Self { libraries, tags }
    }

    /// Finds a tag.
    pub fn lookup(&self, namespace: &str, name: &str) -> Option<&ResolvedTag> {
        self.tags.get(namespace)?.get(name)
    }

    /// Returns `true` if any library uses `namespace`.
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.tags.contains_key(namespace)
    }

    /// Whether the named tag returns its result. Unknown tags do not.
    pub fn returns_value(&self, namespace: &str, name: &str) -> bool {
        self.lookup(namespace, name)
            .is_some_and(ResolvedTag::returns_value)
    }

    /// The libraries in registration order.
    pub fn libraries(&self) -> &[TagLibrary] {
        &self.libraries
    }
}

/// Shared, reloadable tag libraries.
///
/// Renders take a snapshot when they start; registering or reloading
/// libraries swaps in a new snapshot without affecting renders in flight.
#[derive(Debug, Default)]
pub struct TagLibraryRegistry {
    current: RwLock<Arc<TagLibraryLookup>>,
}

impl TagLibraryRegistry {
    /// Creates a registry without libraries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the given libraries.
    pub fn with_libraries(libraries: Vec<TagLibrary>) -> Self {
        Self {
            current: RwLock::new(Arc::new(TagLibraryLookup::new(libraries))),
        }
    }

    /// Returns the current lookup.
    pub fn snapshot(&self) -> Arc<TagLibraryLookup> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Adds a library.
    pub fn register(&self, library: TagLibrary) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        log::debug!(
            target: "gsp.runtime",
            "registering tag library {} ({})",
            library.name,
            library.namespace
        );
        let mut libraries = current.libraries.clone();
        libraries.push(library);
        *current = Arc::new(TagLibraryLookup::new(libraries));
    }

    /// Replaces all libraries.
    pub fn reload(&self, libraries: Vec<TagLibrary>) {
        let lookup = Arc::new(TagLibraryLookup::new(libraries));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = lookup;
    }
}
