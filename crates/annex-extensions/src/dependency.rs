//! Dependency resolution using topological sort with DFS
//!
//! Resolution runs over one loading batch. A dependency outside the batch is
//! an error unless the caller supplies it as already satisfied.

use annex_core::Manifest;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Batch-level resolution failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("missing dependency: {dependency} required by {required_by}")]
    MissingDependency {
        dependency: String,
        required_by: String,
    },

    #[error("circular dependency: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },
}

impl ResolveError {
    /// Identifiers taking part in the failure
    pub fn involved(&self) -> Vec<String> {
        match self {
            Self::MissingDependency { required_by, .. } => vec![required_by.clone()],
            Self::CircularDependency { path } => {
                let mut ids = path.clone();
                ids.pop();
                ids
            }
        }
    }
}

/// Graph node for one manifest
#[derive(Debug, Clone)]
struct DependencyNode {
    dependencies: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

/// Dependency resolver using DFS-based topological sort
pub struct DependencyResolver {
    order: Vec<String>,
    nodes: HashMap<String, DependencyNode>,
    satisfied: HashSet<String>,
}

impl DependencyResolver {
    /// Build the graph from a batch of manifests
    pub fn new(manifests: &[Manifest]) -> Self {
        let mut order = Vec::with_capacity(manifests.len());
        let mut nodes = HashMap::with_capacity(manifests.len());
        for manifest in manifests {
            if nodes.contains_key(&manifest.id) {
                continue;
            }
            order.push(manifest.id.clone());
            nodes.insert(
                manifest.id.clone(),
                DependencyNode {
                    dependencies: manifest.dependencies.clone(),
                },
            );
        }
        Self {
            order,
            nodes,
            satisfied: HashSet::new(),
        }
    }

    /// Treat these ids as already available (e.g. registered earlier)
    pub fn with_satisfied<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.satisfied.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Resolve the whole batch in dependency-first order
    ///
    /// Ties are broken by batch order, so independent manifests keep the
    /// order they were supplied in.
    pub fn resolve(&self) -> Result<Vec<String>, ResolveError> {
        let mut resolved = Vec::with_capacity(self.order.len());
        let mut marks = HashMap::new();
        let mut path = Vec::new();

        for id in &self.order {
            self.visit(id, &mut resolved, &mut marks, &mut path)?;
        }
        Ok(resolved)
    }

    /// Resolve a single extension and its transitive dependencies
    pub fn resolve_one(&self, extension: &str) -> Result<Vec<String>, ResolveError> {
        let mut resolved = Vec::new();
        let mut marks = HashMap::new();
        let mut path = Vec::new();

        self.visit(extension, &mut resolved, &mut marks, &mut path)?;
        Ok(resolved)
    }

    /// Group the resolved order into levels
    ///
    /// Every member of a level depends only on members of earlier levels, so
    /// a level can be activated concurrently.
    pub fn levels(&self) -> Result<Vec<Vec<String>>, ResolveError> {
        let order = self.resolve()?;
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        for id in &order {
            let level = self
                .nodes
                .get(id)
                .map(|node| {
                    node.dependencies
                        .iter()
                        .filter_map(|d| depth.get(d.as_str()).map(|l| l + 1))
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            depth.insert(id, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id.clone());
        }
        Ok(levels)
    }

    /// Dependencies of `extension` that are neither in `installed` nor satisfied
    pub fn check_dependencies(&self, extension: &str, installed: &HashSet<String>) -> Vec<String> {
        self.nodes
            .get(extension)
            .map(|node| {
                node.dependencies
                    .iter()
                    .filter(|d| !installed.contains(*d) && !self.satisfied.contains(*d))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn visit(
        &self,
        ext: &str,
        resolved: &mut Vec<String>,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Result<(), ResolveError> {
        match marks.get(ext) {
            Some(Mark::Visited) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|p| p == ext).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(ext.to_string());
                return Err(ResolveError::CircularDependency { path: cycle });
            }
            None => {}
        }

        let Some(node) = self.nodes.get(ext) else {
            // Only reachable for the root of resolve_one
            return Err(ResolveError::MissingDependency {
                dependency: ext.to_string(),
                required_by: path.last().cloned().unwrap_or_else(|| ext.to_string()),
            });
        };

        marks.insert(ext.to_string(), Mark::Visiting);
        path.push(ext.to_string());

        for dep in &node.dependencies {
            if self.nodes.contains_key(dep) {
                self.visit(dep, resolved, marks, path)?;
            } else if !self.satisfied.contains(dep) {
                return Err(ResolveError::MissingDependency {
                    dependency: dep.clone(),
                    required_by: ext.to_string(),
                });
            }
        }

        path.pop();
        marks.insert(ext.to_string(), Mark::Visited);
        resolved.push(ext.to_string());
        Ok(())
    }
}
