//! Resolution of the project's module dependency graph.
//!
//! Nodes are modules, an edge `A → B` records that `A` depends on `B` and `B`
//! must be built before `A`. Construction validates that every dependency
//! names a sibling module and that the graph is acyclic; cycles are detected
//! with a tri-colour DFS and reported as the full `→`-joined chain.
//!
//! Scheduling is Kahn's algorithm on the dependency orientation: a module's
//! in-degree is its number of in-project dependencies, layer 0 is every
//! module with in-degree zero, and each later layer holds the modules whose
//! remaining in-degree reaches zero once the previous layers are removed.
//! Modules within a layer carry no ordering constraint and build in parallel.

use crate::{
    config::ModuleConfig,
    error::{ForgeError, Result},
};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
};

/// A node in the module graph.
#[derive(Clone, Debug)]
pub struct Node {
    pub module: ModuleConfig,
    /// Indices of the modules this node depends on.
    dependencies: Vec<usize>,
    /// Indices of the modules that depend on this node.
    dependents: Vec<usize>,
}

/// Represents a fully-resolved module dependency graph.
#[derive(Clone, Debug)]
pub struct ModuleGraph {
    nodes: Vec<Node>,
    /// module name to node index, for fast lookup
    indices: HashMap<String, usize>,
}

impl ModuleGraph {
    /// Builds and validates the graph over the given modules.
    pub fn resolve(modules: &[ModuleConfig]) -> Result<Self> {
        let mut indices = HashMap::with_capacity(modules.len());
        for (idx, module) in modules.iter().enumerate() {
            indices.insert(module.name.clone(), idx);
        }

        let mut nodes: Vec<Node> = modules
            .iter()
            .map(|module| Node {
                module: module.clone(),
                dependencies: Vec::new(),
                dependents: Vec::new(),
            })
            .collect();

        for (idx, module) in modules.iter().enumerate() {
            for dep in &module.dependencies {
                let Some(&dep_idx) = indices.get(dep) else {
                    return Err(ForgeError::Graph(format!(
                        "module `{}` depends on `{dep}`, which is not defined in this project",
                        module.name
                    )));
                };
                nodes[idx].dependencies.push(dep_idx);
                nodes[dep_idx].dependents.push(idx);
            }
        }

        let graph = Self { nodes, indices };
        graph.check_cycles()?;
        trace!(modules = graph.len(), "resolved module graph");
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// The module config for `name`, if it is part of the graph.
    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.indices.get(name).map(|&idx| &self.nodes[idx].module)
    }

    /// Iterates over all modules in declaration order.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleConfig> {
        self.nodes.iter().map(|node| &node.module)
    }

    /// Direct dependencies of `name`.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.indices
            .get(name)
            .map(|&idx| {
                self.nodes[idx]
                    .dependencies
                    .iter()
                    .map(|&dep| self.nodes[dep].module.name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct dependents of `name`.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.indices
            .get(name)
            .map(|&idx| {
                self.nodes[idx]
                    .dependents
                    .iter()
                    .map(|&dep| self.nodes[dep].module.name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of in-project dependencies of `name`; the Kahn in-degree.
    pub fn in_degree(&self, name: &str) -> usize {
        self.indices.get(name).map(|&idx| self.nodes[idx].dependencies.len()).unwrap_or(0)
    }

    /// All transitive dependencies of `name`, not including `name` itself.
    pub fn transitive_dependencies(&self, name: &str) -> HashSet<&str> {
        let mut out = HashSet::new();
        let Some(&start) = self.indices.get(name) else { return out };
        let mut queue = VecDeque::from([start]);
        let mut visited = HashSet::from([start]);
        while let Some(idx) = queue.pop_front() {
            for &dep in &self.nodes[idx].dependencies {
                if visited.insert(dep) {
                    out.insert(self.nodes[dep].module.name.as_str());
                    queue.push_back(dep);
                }
            }
        }
        out
    }

    /// Restricts the graph to `target` and its transitive dependencies.
    pub fn restrict_to(&self, target: &str) -> Result<Self> {
        if !self.contains(target) {
            return Err(ForgeError::Graph(format!(
                "target module `{target}` is not defined in this project"
            )));
        }
        let mut keep: HashSet<String> =
            self.transitive_dependencies(target).iter().map(|s| s.to_string()).collect();
        keep.insert(target.to_string());
        let modules: Vec<ModuleConfig> = self
            .nodes
            .iter()
            .filter(|node| keep.contains(&node.module.name))
            .map(|node| node.module.clone())
            .collect();
        Self::resolve(&modules)
    }

    /// Layers the graph with Kahn's algorithm.
    pub fn schedule(&self) -> Result<BuildSchedule> {
        let mut remaining: Vec<usize> =
            self.nodes.iter().map(|node| node.dependencies.len()).collect();
        let mut placed = 0usize;
        let mut current: Vec<usize> = (0..self.nodes.len()).filter(|&i| remaining[i] == 0).collect();
        let mut layers = Vec::new();

        while !current.is_empty() {
            placed += current.len();
            let mut next = Vec::new();
            for &idx in &current {
                for &dependent in &self.nodes[idx].dependents {
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            let mut layer: Vec<String> =
                current.iter().map(|&idx| self.nodes[idx].module.name.clone()).collect();
            layer.sort();
            layers.push(layer);
            current = next;
        }

        // cycle detection happens at construction, reaching this is a bug
        if placed != self.nodes.len() {
            let stuck: Vec<_> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(idx, _)| remaining[*idx] > 0)
                .map(|(_, node)| node.module.name.as_str())
                .collect();
            return Err(ForgeError::Graph(format!(
                "scheduling made no progress, unresolved modules: {}",
                stuck.join(", ")
            )));
        }

        Ok(BuildSchedule { layers })
    }

    /// Tri-colour DFS cycle check: white = unvisited, grey = on the current
    /// path, black = done. Descending into a grey node closes a cycle.
    fn check_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Colour {
            White,
            Grey,
            Black,
        }

        fn visit(
            graph: &ModuleGraph,
            idx: usize,
            colours: &mut [Colour],
            path: &mut Vec<usize>,
        ) -> Result<()> {
            colours[idx] = Colour::Grey;
            path.push(idx);
            for &dep in &graph.nodes[idx].dependencies {
                match colours[dep] {
                    Colour::Grey => {
                        let start = path.iter().position(|&p| p == dep).unwrap_or(0);
                        let mut chain: Vec<&str> = path[start..]
                            .iter()
                            .map(|&p| graph.nodes[p].module.name.as_str())
                            .collect();
                        chain.push(graph.nodes[dep].module.name.as_str());
                        return Err(ForgeError::Graph(format!(
                            "dependency cycle detected: {}",
                            chain.join(" → ")
                        )));
                    }
                    Colour::White => visit(graph, dep, colours, path)?,
                    Colour::Black => {}
                }
            }
            path.pop();
            colours[idx] = Colour::Black;
            Ok(())
        }

        let mut colours = vec![Colour::White; self.nodes.len()];
        let mut path = Vec::new();
        for idx in 0..self.nodes.len() {
            if colours[idx] == Colour::White {
                visit(self, idx, &mut colours, &mut path)?;
            }
        }
        Ok(())
    }
}

/// The layered build order: every module's dependencies live in earlier
/// layers, modules within one layer may build concurrently.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildSchedule {
    layers: Vec<Vec<String>>,
}

impl BuildSchedule {
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Total module count across all layers.
    pub fn module_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    /// Flattened schedule, dependencies before dependents.
    pub fn flatten(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().flatten().map(String::as_str)
    }
}

impl fmt::Display for BuildSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, layer) in self.layers.iter().enumerate() {
            writeln!(f, "layer {idx}: {}", layer.join(", "))?;
        }
        Ok(())
    }
}
