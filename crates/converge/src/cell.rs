//! Value cells - single-assignment slots for values produced during apply
//!
//! Every output a resource kind declares gets one cell per run. The cell
//! is written exactly once by the scheduling step of the resource that
//! owns it, and read by the resources that reference it. Scheduling order
//! guarantees readers only run after the writer finished, so reading an
//! unresolved cell or writing a resolved one is a bug and panics.

use crate::graph::Graph;
use crate::resource::{CellRef, Property, ResourceKind};
use crate::types::{Outputs, ResolvedProperties};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique cell identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(u64);

impl CellId {
    fn next() -> Self {
        Self(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Observable state of a cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellState<'a> {
    Unresolved,
    Resolved(&'a Value),
    Failed(&'a str),
}

/// A deferred value
#[derive(Debug)]
pub struct ValueCell {
    id: CellId,
    key: CellRef,
    subscribers: BTreeSet<String>,
    slot: OnceLock<Result<Value, String>>,
}

impl ValueCell {
    pub fn new(key: CellRef, subscribers: BTreeSet<String>) -> Self {
        Self {
            id: CellId::next(),
            key,
            subscribers,
            slot: OnceLock::new(),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn key(&self) -> &CellRef {
        &self.key
    }

    /// Resources waiting on this value
    pub fn subscribers(&self) -> &BTreeSet<String> {
        &self.subscribers
    }

    pub fn state(&self) -> CellState<'_> {
        match self.slot.get() {
            None => CellState::Unresolved,
            Some(Ok(value)) => CellState::Resolved(value),
            Some(Err(error)) => CellState::Failed(error),
        }
    }

    pub fn resolve(&self, value: Value) {
        self.write(Ok(value));
    }

    pub fn fail(&self, error: impl Into<String>) {
        self.write(Err(error.into()));
    }

    fn write(&self, outcome: Result<Value, String>) {
        if self.slot.set(outcome).is_err() {
            panic!("value cell {} ({}) written twice", self.id, self.key);
        }
    }

    /// Read the value; panics if the owning resource has not finished yet
    pub fn read(&self) -> Result<&Value, &str> {
        match self.slot.get() {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(error),
            None => panic!(
                "value cell {} ({}) read before its resource finished",
                self.id, self.key
            ),
        }
    }
}

/// A property could not be resolved because a referenced cell failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocked {
    pub cell: CellRef,
    pub error: String,
}

/// All cells of one run, keyed by reference
#[derive(Debug, Default)]
pub struct CellTable {
    cells: HashMap<CellRef, ValueCell>,
}

impl CellTable {
    /// Create an unresolved cell for every declared output in the graph
    pub fn for_graph(graph: &Graph) -> Self {
        let mut cells = HashMap::new();
        for node in graph.nodes() {
            for output in node.descriptor.kind.outputs() {
                let key = CellRef::new(node.name(), *output);
                let subscribers = graph.subscribers(&key);
                cells.insert(key.clone(), ValueCell::new(key, subscribers));
            }
        }
        Self { cells }
    }

    pub fn get(&self, key: &CellRef) -> Option<&ValueCell> {
        self.cells.get(key)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Resolve a resource's cells from provider outputs
    ///
    /// Declared outputs missing from `outputs` fail their cell; their
    /// names are returned as the error.
    pub fn resolve_outputs(
        &self,
        resource: &str,
        kind: ResourceKind,
        outputs: &Outputs,
    ) -> Result<(), Vec<String>> {
        let mut missing = Vec::new();
        for output in kind.outputs() {
            let Some(cell) = self.cells.get(&CellRef::new(resource, *output)) else {
                continue;
            };
            match outputs.get(*output) {
                Some(value) => cell.resolve(value.clone()),
                None => {
                    cell.fail(format!("{resource} did not report output '{output}'"));
                    missing.push((*output).to_string());
                }
            }
        }
        if missing.is_empty() { Ok(()) } else { Err(missing) }
    }

    /// Fail every cell owned by a resource
    pub fn fail_outputs(&self, resource: &str, kind: ResourceKind, error: &str) {
        for output in kind.outputs() {
            if let Some(cell) = self.cells.get(&CellRef::new(resource, *output)) {
                cell.fail(error);
            }
        }
    }

    /// Substitute every reference in a property map with its resolved value
    pub fn resolve_properties(
        &self,
        properties: &BTreeMap<String, Property>,
    ) -> Result<ResolvedProperties, Blocked> {
        properties
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.resolve(value)?)))
            .collect()
    }

    fn resolve(&self, property: &Property) -> Result<Value, Blocked> {
        match property {
            Property::Literal(value) => Ok(value.clone()),
            Property::Ref(key) => {
                let Some(cell) = self.cells.get(key) else {
                    return Err(Blocked {
                        cell: key.clone(),
                        error: format!("no value cell for {key}"),
                    });
                };
                cell.read().cloned().map_err(|error| Blocked {
                    cell: key.clone(),
                    error: error.to_string(),
                })
            }
            Property::Interpolate(parts) => {
                let mut joined = String::new();
                for part in parts {
                    match self.resolve(part)? {
                        Value::String(s) => joined.push_str(&s),
                        Value::Null => {}
                        other => joined.push_str(&other.to_string()),
                    }
                }
                Ok(Value::String(joined))
            }
            Property::List(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Property::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve(v)?)))
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
            Property::Encoded(inner) => Ok(Value::String(self.resolve(inner)?.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build;
    use crate::resource::{ResourceDescriptor, Stack, StackMetadata};
    use serde_json::json;

    fn table() -> CellTable {
        let stack = Stack::new(StackMetadata::new("test", "dev"))
            .with(ResourceDescriptor::secret("user"))
            .with(ResourceDescriptor::secret("pass"))
            .with(
                ResourceDescriptor::container("db")
                    .with("name", "db")
                    .with("image", "postgres:14")
                    .with("envs", Property::list([CellRef::new("user", "value")])),
            );
        CellTable::for_graph(&build(&stack).unwrap())
    }

    #[test]
    fn test_cells_per_declared_output() {
        let cells = table();
        assert_eq!(cells.len(), 5);
        let user = cells.get(&CellRef::new("user", "value")).unwrap();
        assert_eq!(user.subscribers(), &BTreeSet::from(["db".to_string()]));
        assert_eq!(user.state(), CellState::Unresolved);
        assert_ne!(
            user.id(),
            cells.get(&CellRef::new("pass", "value")).unwrap().id()
        );
    }

    #[test]
    fn test_resolve_nested_properties() {
        let cells = table();
        let outputs = Outputs::from([("value".to_string(), json!("kemal"))]);
        cells
            .resolve_outputs("user", ResourceKind::Secret, &outputs)
            .unwrap();
        cells
            .resolve_outputs(
                "db",
                ResourceKind::Container,
                &Outputs::from([
                    ("id".to_string(), json!("c0ffee")),
                    ("name".to_string(), json!("db")),
                    ("host".to_string(), json!("invidious-db")),
                ]),
            )
            .unwrap();

        let props = BTreeMap::from([
            (
                "envs".to_string(),
                Property::list([Property::interpolate([
                    Property::from("USER="),
                    CellRef::new("user", "value").into(),
                ])]),
            ),
            (
                "config".to_string(),
                Property::encoded(Property::map([
                    ("host", Property::from(CellRef::new("db", "host"))),
                    ("port", Property::from(5432_i64)),
                ])),
            ),
        ]);

        let resolved = cells.resolve_properties(&props).unwrap();
        assert_eq!(resolved["envs"], json!(["USER=kemal"]));
        assert_eq!(
            resolved["config"],
            json!(r#"{"host":"invidious-db","port":5432}"#)
        );
    }

    #[test]
    fn test_failed_cell_blocks_resolution() {
        let cells = table();
        cells.fail_outputs("user", ResourceKind::Secret, "secret backend unavailable");

        let props = BTreeMap::from([(
            "envs".to_string(),
            Property::list([CellRef::new("user", "value")]),
        )]);
        let blocked = cells.resolve_properties(&props).unwrap_err();
        assert_eq!(blocked.cell, CellRef::new("user", "value"));
        assert_eq!(blocked.error, "secret backend unavailable");
    }

    #[test]
    fn test_missing_output_fails_cell() {
        let cells = table();
        let missing = cells
            .resolve_outputs(
                "db",
                ResourceKind::Container,
                &Outputs::from([("id".to_string(), json!("c0ffee"))]),
            )
            .unwrap_err();
        assert_eq!(missing, vec!["name".to_string(), "host".to_string()]);
        assert!(matches!(
            cells.get(&CellRef::new("db", "host")).unwrap().state(),
            CellState::Failed(_)
        ));
    }

    #[test]
    #[should_panic(expected = "written twice")]
    fn test_second_write_panics() {
        let cells = table();
        let cell = cells.get(&CellRef::new("user", "value")).unwrap();
        cell.resolve(json!("a"));
        cell.resolve(json!("b"));
    }

    #[test]
    #[should_panic(expected = "read before")]
    fn test_read_before_resolution_panics() {
        let cells = table();
        let _ = cells.get(&CellRef::new("user", "value")).unwrap().read();
    }
}
