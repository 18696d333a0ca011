use serde::{Deserialize, Serialize};
use std::{
    borrow::Borrow,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

/// Stream identity as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl StreamDescriptor {
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(str::to_string),
        }
    }
}

/// Map key for everything tracked per stream during an attempt.
///
/// Cheap to clone: both parts are reference counted. An empty name marks the
/// unnamed key that LEGACY checkpoints are accounted under; it is tracked and
/// summed into totals but never reported as a stream of its own.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    name: Arc<str>,
    namespace: Option<Arc<str>>,
}

impl StreamKey {
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            name: Arc::from(name.into()),
            namespace: namespace.map(Arc::from),
        }
    }

    pub fn unnamed() -> Self {
        Self {
            name: Arc::from(""),
            namespace: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn is_named(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Borrowed name and namespace of a stream, used to look up a [`StreamKey`]
/// in a map without building one.
pub trait StreamKeyView {
    fn view_name(&self) -> &str;
    fn view_namespace(&self) -> Option<&str>;
}

impl StreamKeyView for StreamKey {
    fn view_name(&self) -> &str {
        self.name()
    }

    fn view_namespace(&self) -> Option<&str> {
        self.namespace()
    }
}

impl StreamKeyView for (&str, Option<&str>) {
    fn view_name(&self) -> &str {
        self.0
    }

    fn view_namespace(&self) -> Option<&str> {
        self.1
    }
}

impl<'a> Borrow<dyn StreamKeyView + 'a> for StreamKey {
    fn borrow(&self) -> &(dyn StreamKeyView + 'a) {
        self
    }
}

impl Hash for dyn StreamKeyView + '_ {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.view_name().hash(state);
        self.view_namespace().hash(state);
    }
}

impl PartialEq for dyn StreamKeyView + '_ {
    fn eq(&self, other: &Self) -> bool {
        self.view_name() == other.view_name() && self.view_namespace() == other.view_namespace()
    }
}

impl Eq for dyn StreamKeyView + '_ {}

// Must hash exactly like `dyn StreamKeyView` for borrowed lookups to work.
impl Hash for StreamKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self as &dyn StreamKeyView).hash(state);
    }
}

impl From<&StreamDescriptor> for StreamKey {
    fn from(descriptor: &StreamDescriptor) -> Self {
        Self::new(descriptor.name.clone(), descriptor.namespace.as_deref())
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}:{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
