//! Dependency graph construction
//!
//! Turns a [`Stack`] into an acyclic graph of resources. Edges come from
//! explicit `depends_on` hints and from every [`CellRef`] found in a
//! resource's properties, which covers secret injection, network
//! namespace sharing (`network_mode = "service:${sidecar.name}"`) and
//! volume mounts alike.

use crate::error::GraphError;
use crate::resource::{CellRef, LifecyclePolicy, ResourceDescriptor, Stack, StackMetadata};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Why an edge exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeReason {
    /// Listed in `depends_on`
    Explicit,
    /// A property references one of the predecessor's outputs
    Reference { property: String, output: String },
}

/// An incoming edge of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub reason: EdgeReason,
}

/// A resource together with its position in the graph
#[derive(Debug, Clone)]
pub struct Node {
    pub descriptor: ResourceDescriptor,
    /// Effective lifecycle policy (descriptor override or stack default)
    pub policy: LifecyclePolicy,
    /// Resources that must reach a terminal state first
    pub predecessors: BTreeSet<String>,
    /// Resources waiting on this one
    pub successors: BTreeSet<String>,
    pub edges: Vec<Edge>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// An acyclic, fully-resolved resource graph
#[derive(Debug, Clone)]
pub struct Graph {
    metadata: StackMetadata,
    nodes: BTreeMap<String, Node>,
    order: Vec<String>,
}

impl Graph {
    pub fn metadata(&self) -> &StackMetadata {
        &self.metadata
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Logical names in topological order (declaration order breaks ties)
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Nodes in topological order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Logical names of every resource that references `cell`
    pub fn subscribers(&self, cell: &CellRef) -> BTreeSet<String> {
        self.nodes()
            .filter(|node| {
                node.descriptor
                    .references()
                    .iter()
                    .any(|(_, found)| *found == cell)
            })
            .map(|node| node.name().to_string())
            .collect()
    }
}

/// Build the dependency graph of a stack
///
/// Pure function of its input: validates names and property schemas,
/// collects explicit and implicit edges, rejects dangling references
/// and cycles, then computes a topological order.
pub fn build(stack: &Stack) -> Result<Graph, GraphError> {
    let mut nodes: BTreeMap<String, Node> = BTreeMap::new();
    let mut declared: HashMap<&str, usize> = HashMap::new();

    for (index, descriptor) in stack.resources.iter().enumerate() {
        validate_name(&descriptor.name)?;
        if declared.insert(descriptor.name.as_str(), index).is_some() {
            return Err(GraphError::DuplicateResource {
                name: descriptor.name.clone(),
            });
        }
        validate_properties(descriptor)?;
    }

    for descriptor in &stack.resources {
        let edges = collect_edges(descriptor, stack)?;
        let predecessors = edges.iter().map(|e| e.from.clone()).collect();
        nodes.insert(
            descriptor.name.clone(),
            Node {
                descriptor: descriptor.clone(),
                policy: descriptor
                    .lifecycle
                    .unwrap_or(stack.metadata.default_policy),
                predecessors,
                successors: BTreeSet::new(),
                edges,
            },
        );
    }

    let links: Vec<(String, String)> = nodes
        .values()
        .flat_map(|node| {
            node.predecessors
                .iter()
                .map(move |pred| (pred.clone(), node.name().to_string()))
        })
        .collect();
    for (pred, succ) in links {
        if let Some(node) = nodes.get_mut(&pred) {
            node.successors.insert(succ);
        }
    }

    if let Some(cycle) = find_cycle(&nodes) {
        return Err(GraphError::CyclicDependency { cycle });
    }

    let order = topological_order(&nodes, &declared);
    log::debug!(
        "Built graph for stack '{}' with {} resources: {}",
        stack.metadata.name,
        order.len(),
        order.join(", ")
    );

    Ok(Graph {
        metadata: stack.metadata.clone(),
        nodes,
        order,
    })
}

fn validate_name(name: &str) -> Result<(), GraphError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(GraphError::InvalidName {
            name: name.to_string(),
        })
    }
}

fn validate_properties(descriptor: &ResourceDescriptor) -> Result<(), GraphError> {
    let kind = descriptor.kind;
    for key in kind.required_keys() {
        if !descriptor.properties.contains_key(*key) {
            return Err(GraphError::InvalidProperty {
                resource: descriptor.name.clone(),
                message: format!("{kind} requires property '{key}'"),
            });
        }
    }
    for key in descriptor.properties.keys() {
        if !kind.allowed_keys().contains(&key.as_str()) {
            return Err(GraphError::InvalidProperty {
                resource: descriptor.name.clone(),
                message: format!("{kind} does not accept property '{key}'"),
            });
        }
    }
    Ok(())
}

fn collect_edges(descriptor: &ResourceDescriptor, stack: &Stack) -> Result<Vec<Edge>, GraphError> {
    let mut edges = Vec::new();

    for dep in &descriptor.depends_on {
        if stack.get(dep).is_none() {
            return Err(GraphError::UnknownResource {
                from: descriptor.name.clone(),
                missing: dep.clone(),
            });
        }
        edges.push(Edge {
            from: dep.clone(),
            reason: EdgeReason::Explicit,
        });
    }

    for (property, cell) in descriptor.references() {
        let Some(target) = stack.get(&cell.resource) else {
            return Err(GraphError::UnknownResource {
                from: descriptor.name.clone(),
                missing: cell.resource.clone(),
            });
        };
        if !target.kind.declares_output(&cell.output) {
            return Err(GraphError::UnknownOutput {
                from: descriptor.name.clone(),
                resource: target.name.clone(),
                kind: target.kind,
                output: cell.output.clone(),
            });
        }
        edges.push(Edge {
            from: cell.resource.clone(),
            reason: EdgeReason::Reference {
                property: property.to_string(),
                output: cell.output.clone(),
            },
        });
    }

    Ok(edges)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Three-colour depth-first search along successor edges
///
/// Returns the first cycle found as `[a, b, ..., a]`.
fn find_cycle(nodes: &BTreeMap<String, Node>) -> Option<Vec<String>> {
    let mut marks: HashMap<&str, Mark> = nodes.keys().map(|k| (k.as_str(), Mark::White)).collect();
    let mut path: Vec<&str> = Vec::new();

    for start in nodes.keys() {
        if marks[start.as_str()] == Mark::White
            && let Some(cycle) = visit(start, nodes, &mut marks, &mut path)
        {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    name: &'a str,
    nodes: &'a BTreeMap<String, Node>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    marks.insert(name, Mark::Gray);
    path.push(name);

    if let Some(node) = nodes.get(name) {
        for next in &node.successors {
            match marks.get(next.as_str()).copied().unwrap_or(Mark::Black) {
                Mark::Gray => {
                    let start = path.iter().position(|n| *n == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| (*n).to_string()).collect();
                    cycle.push(next.clone());
                    return Some(cycle);
                }
                Mark::White => {
                    if let Some(cycle) = visit(next, nodes, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Black => {}
            }
        }
    }

    path.pop();
    marks.insert(name, Mark::Black);
    None
}

/// Kahn's algorithm; among ready nodes the earliest declared goes first
fn topological_order(
    nodes: &BTreeMap<String, Node>,
    declared: &HashMap<&str, usize>,
) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = nodes
        .iter()
        .map(|(name, node)| (name.as_str(), node.predecessors.len()))
        .collect();
    let mut ready: BTreeSet<(usize, &str)> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| (declared[name], *name))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some((_, name)) = ready.pop_first() {
        order.push(name.to_string());
        for succ in &nodes[name].successors {
            if let Some(degree) = in_degree.get_mut(succ.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert((declared[succ.as_str()], succ.as_str()));
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Property, ResourceDescriptor, ResourceKind};

    fn stack(resources: Vec<ResourceDescriptor>) -> Stack {
        let mut stack = Stack::new(StackMetadata::new("test", "dev"));
        stack.resources = resources;
        stack
    }

    fn position(graph: &Graph, name: &str) -> usize {
        graph.order().iter().position(|n| n == name).unwrap()
    }

    fn example_stack() -> Stack {
        stack(vec![
            ResourceDescriptor::container("app")
                .with("name", "app")
                .with("image", "app:1")
                .with(
                    "envs",
                    Property::list([Property::interpolate([
                        Property::from("DB_HOST="),
                        CellRef::new("db", "host").into(),
                    ])]),
                )
                .depends_on("db"),
            ResourceDescriptor::container("db")
                .with("name", "db")
                .with("image", "postgres:14")
                .with("networks", Property::list([CellRef::new("net", "name")]))
                .with(
                    "envs",
                    Property::list([
                        Property::interpolate([
                            Property::from("POSTGRES_USER="),
                            CellRef::new("dbUser", "value").into(),
                        ]),
                        Property::interpolate([
                            Property::from("POSTGRES_PASSWORD="),
                            CellRef::new("dbPass", "value").into(),
                        ]),
                    ]),
                ),
            ResourceDescriptor::secret("dbUser"),
            ResourceDescriptor::secret("dbPass"),
            ResourceDescriptor::network("net").with("name", "net"),
        ])
    }

    #[test]
    fn test_order_respects_every_edge() {
        let graph = build(&example_stack()).unwrap();
        assert_eq!(graph.len(), 5);

        for node in graph.nodes() {
            for pred in &node.predecessors {
                assert!(
                    position(&graph, pred) < position(&graph, node.name()),
                    "{pred} must come before {}",
                    node.name()
                );
            }
        }
        assert_eq!(graph.order().last().map(String::as_str), Some("app"));
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let graph = build(&stack(vec![
            ResourceDescriptor::secret("b"),
            ResourceDescriptor::secret("a"),
            ResourceDescriptor::secret("c"),
        ]))
        .unwrap();
        assert_eq!(graph.order(), &["b", "a", "c"]);
    }

    #[test]
    fn test_implicit_and_explicit_edges() {
        let graph = build(&example_stack()).unwrap();
        let app = graph.node("app").unwrap();
        assert_eq!(app.predecessors, BTreeSet::from(["db".to_string()]));
        assert!(app.edges.contains(&Edge {
            from: "db".into(),
            reason: EdgeReason::Explicit
        }));
        assert!(app.edges.contains(&Edge {
            from: "db".into(),
            reason: EdgeReason::Reference {
                property: "envs".into(),
                output: "host".into()
            }
        }));

        let db = graph.node("db").unwrap();
        assert_eq!(
            db.predecessors,
            BTreeSet::from(["dbPass".to_string(), "dbUser".to_string(), "net".to_string()])
        );
        assert_eq!(
            graph.node("net").unwrap().successors,
            BTreeSet::from(["db".to_string()])
        );
        assert_eq!(
            graph.subscribers(&CellRef::new("dbUser", "value")),
            BTreeSet::from(["db".to_string()])
        );
    }

    #[test]
    fn test_namespace_sharing_is_an_edge() {
        let graph = build(&stack(vec![
            ResourceDescriptor::container("db")
                .with("name", "db")
                .with("image", "postgres:14")
                .with(
                    "network_mode",
                    Property::interpolate([
                        Property::from("service:"),
                        CellRef::new("sidecar", "name").into(),
                    ]),
                ),
            ResourceDescriptor::container("sidecar")
                .with("name", "sidecar")
                .with("image", "tailscale/tailscale:latest"),
        ]))
        .unwrap();
        assert_eq!(graph.order(), &["sidecar", "db"]);
    }

    #[test]
    fn test_cycle_reports_witness() {
        let err = build(&stack(vec![
            ResourceDescriptor::secret("a").depends_on("c"),
            ResourceDescriptor::secret("b").depends_on("a"),
            ResourceDescriptor::secret("c").depends_on("b"),
            ResourceDescriptor::secret("d"),
        ]))
        .unwrap_err();

        let GraphError::CyclicDependency { cycle } = err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        // every consecutive pair must be a real edge: x is depended on by the next
        let deps = [("a", "c"), ("b", "a"), ("c", "b")];
        for pair in cycle.windows(2) {
            assert!(deps.contains(&(pair[1].as_str(), pair[0].as_str())));
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let err = build(&stack(vec![
            ResourceDescriptor::network("net").with("name", CellRef::new("net", "id")),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                cycle: vec!["net".into(), "net".into()]
            }
        );
    }

    #[test]
    fn test_unknown_resource() {
        let err =
            build(&stack(vec![ResourceDescriptor::secret("a").depends_on("ghost")])).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownResource {
                from: "a".into(),
                missing: "ghost".into()
            }
        );

        let err = build(&stack(vec![
            ResourceDescriptor::network("net").with("name", CellRef::new("ghost", "value")),
        ]))
        .unwrap_err();
        assert!(matches!(err, GraphError::UnknownResource { missing, .. } if missing == "ghost"));
    }

    #[test]
    fn test_unknown_output() {
        let err = build(&stack(vec![
            ResourceDescriptor::secret("s"),
            ResourceDescriptor::network("net").with("name", CellRef::new("s", "host")),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownOutput {
                from: "net".into(),
                resource: "s".into(),
                kind: ResourceKind::Secret,
                output: "host".into()
            }
        );
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let err = build(&stack(vec![
            ResourceDescriptor::secret("a"),
            ResourceDescriptor::secret("a"),
        ]))
        .unwrap_err();
        assert_eq!(err, GraphError::DuplicateResource { name: "a".into() });

        let err = build(&stack(vec![ResourceDescriptor::secret("1bad")])).unwrap_err();
        assert!(matches!(err, GraphError::InvalidName { .. }));
        let err = build(&stack(vec![ResourceDescriptor::secret("has space")])).unwrap_err();
        assert!(matches!(err, GraphError::InvalidName { .. }));
    }

    #[test]
    fn test_property_schema() {
        let container = ResourceDescriptor::container("c").with("name", "c");
        let err = build(&stack(vec![container])).unwrap_err();
        assert!(
            matches!(err, GraphError::InvalidProperty { message, .. } if message.contains("image"))
        );

        let volume = ResourceDescriptor::volume("v")
            .with("name", "v")
            .with("size", "1G");
        let err = build(&stack(vec![volume])).unwrap_err();
        assert!(
            matches!(err, GraphError::InvalidProperty { message, .. } if message.contains("size"))
        );
    }

    #[test]
    fn test_effective_policy() {
        let mut s = stack(vec![
            ResourceDescriptor::secret("kept").lifecycle(LifecyclePolicy::Retain),
            ResourceDescriptor::secret("plain"),
        ]);
        let graph = build(&s).unwrap();
        assert_eq!(graph.node("kept").unwrap().policy, LifecyclePolicy::Retain);
        assert_eq!(graph.node("plain").unwrap().policy, LifecyclePolicy::Destroy);

        s.metadata = StackMetadata::new("test", "production");
        let graph = build(&s).unwrap();
        assert_eq!(graph.node("plain").unwrap().policy, LifecyclePolicy::Retain);
    }
}
