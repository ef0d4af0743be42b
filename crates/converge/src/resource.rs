//! Resource descriptors for declarative provisioning
//!
//! A [`ResourceDescriptor`] is the desired state of one piece of
//! infrastructure. Its properties may contain [`CellRef`]s pointing at
//! outputs of other resources that are only known once those resources
//! have been provisioned.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Stage name whose resources are retained on removal by default
pub const PRODUCTION_STAGE: &str = "production";

/// Reference to a named output of another resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub resource: String,
    pub output: String,
}

impl CellRef {
    pub fn new(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.output)
    }
}

/// The closed set of resource kinds the engine reconciles
///
/// Each kind carries its own property schema, the outputs it produces
/// and whether the provider can change it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Secret,
    TailnetKey,
    Network,
    Volume,
    Container,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secret => "secret",
            Self::TailnetKey => "tailnet_key",
            Self::Network => "network",
            Self::Volume => "volume",
            Self::Container => "container",
        }
    }

    /// Outputs produced when a resource of this kind is provisioned
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            Self::Secret => &["value"],
            Self::TailnetKey => &["id", "key"],
            Self::Network | Self::Volume => &["id", "name"],
            Self::Container => &["id", "name", "host"],
        }
    }

    pub fn declares_output(&self, output: &str) -> bool {
        self.outputs().contains(&output)
    }

    /// Property keys that must be present
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Secret | Self::TailnetKey => &[],
            Self::Network | Self::Volume => &["name"],
            Self::Container => &["name", "image"],
        }
    }

    /// Every property key this kind accepts
    pub fn allowed_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Secret => &["description"],
            Self::TailnetKey => &["reusable", "ephemeral", "preauthorized", "expiry", "tags"],
            Self::Network => &["name", "driver", "internal", "labels"],
            Self::Volume => &["name", "driver", "labels"],
            Self::Container => &[
                "name",
                "image",
                "hostname",
                "restart",
                "mounts",
                "volumes",
                "capabilities",
                "envs",
                "network_mode",
                "networks",
                "ports",
                "healthcheck",
                "log_driver",
                "log_opts",
                "command",
                "entrypoint",
                "labels",
            ],
        }
    }

    /// Whether a property change can be applied without replacement
    pub fn supports_update(&self) -> bool {
        matches!(self, Self::Secret)
    }

    /// Whether outputs of this kind hold credentials
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Self::Secret | Self::TailnetKey)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the live resource when it leaves the desired state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePolicy {
    /// Never destroy; removal only forgets about it
    Retain,
    /// Destroy on removal or replacement
    Destroy,
}

impl LifecyclePolicy {
    /// Default policy for a stage: production retains, everything else is removed
    pub fn for_stage(stage: &str) -> Self {
        if stage == PRODUCTION_STAGE {
            Self::Retain
        } else {
            Self::Destroy
        }
    }
}

impl fmt::Display for LifecyclePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retain => f.write_str("retain"),
            Self::Destroy => f.write_str("destroy"),
        }
    }
}

/// A property value that may not be known until apply time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    /// A concrete value
    Literal(Value),
    /// An output of another resource
    Ref(CellRef),
    /// Parts joined into a single string once resolved
    Interpolate(Vec<Property>),
    List(Vec<Property>),
    Map(BTreeMap<String, Property>),
    /// The resolved subtree serialized as one JSON string
    Encoded(Box<Property>),
}

impl Property {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn interpolate<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Property>,
    {
        Self::Interpolate(parts.into_iter().map(Into::into).collect())
    }

    pub fn list<I, P>(items: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Property>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<Property>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn encoded(inner: impl Into<Property>) -> Self {
        Self::Encoded(Box::new(inner.into()))
    }

    /// Collect every cell reference in this value, depth first
    pub fn collect_refs<'a>(&'a self, out: &mut Vec<&'a CellRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(cell) => out.push(cell),
            Self::Interpolate(parts) | Self::List(parts) => {
                for part in parts {
                    part.collect_refs(out);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.collect_refs(out);
                }
            }
            Self::Encoded(inner) => inner.collect_refs(out),
        }
    }
}

impl From<CellRef> for Property {
    fn from(cell: CellRef) -> Self {
        Self::Ref(cell)
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<bool> for Property {
    fn from(value: bool) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<i64> for Property {
    fn from(value: i64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<u16> for Property {
    fn from(value: u16) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<Value> for Property {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

/// Desired state of a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Logical name, unique within a stack
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
    /// Explicit ordering hints, by logical name
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Overrides the stack default when set
    #[serde(default)]
    pub lifecycle: Option<LifecyclePolicy>,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            lifecycle: None,
        }
    }

    pub fn secret(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Secret)
    }

    pub fn container(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Container)
    }

    pub fn network(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Network)
    }

    pub fn volume(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Volume)
    }

    /// Set a property
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Property>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add an explicit dependency
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.insert(name.into());
        self
    }

    pub fn lifecycle(mut self, policy: LifecyclePolicy) -> Self {
        self.lifecycle = Some(policy);
        self
    }

    /// Reference one of this resource's outputs
    pub fn output(&self, output: &str) -> CellRef {
        CellRef::new(self.name.clone(), output)
    }

    /// Every cell reference in the properties, paired with its top-level key
    pub fn references(&self) -> Vec<(&str, &CellRef)> {
        let mut found = Vec::new();
        for (key, value) in &self.properties {
            let mut refs = Vec::new();
            value.collect_refs(&mut refs);
            found.extend(refs.into_iter().map(|cell| (key.as_str(), cell)));
        }
        found
    }
}

/// Global metadata of a stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackMetadata {
    pub name: String,
    pub stage: String,
    pub default_policy: LifecyclePolicy,
}

impl StackMetadata {
    /// Metadata with the removal policy derived from the stage
    pub fn new(name: impl Into<String>, stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self {
            name: name.into(),
            default_policy: LifecyclePolicy::for_stage(&stage),
            stage,
        }
    }
}

/// A full desired state: metadata plus every resource descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    pub metadata: StackMetadata,
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
}

impl Stack {
    pub fn new(metadata: StackMetadata) -> Self {
        Self {
            metadata,
            resources: Vec::new(),
        }
    }

    pub fn push(&mut self, descriptor: ResourceDescriptor) {
        self.resources.push(descriptor);
    }

    pub fn with(mut self, descriptor: ResourceDescriptor) -> Self {
        self.resources.push(descriptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ResourceDescriptor> {
        self.resources.iter_mut().find(|r| r.name == name)
    }
}
