//! Build ordering across images.
//!
//! Images built `fromImage` another image depend on it. The requested images
//! plus all their ancestors form a DAG which is split into waves: every image
//! in a wave depends only on images of earlier waves, so a wave can be built
//! concurrently.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use super::ConveyorError;
use crate::config::ProjectConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
  /// Image names grouped by wave, in declaration order within a wave.
  pub waves: Vec<Vec<String>>,
}

impl BuildPlan {
  /// All planned images, parents before children.
  pub fn order(&self) -> impl Iterator<Item = &String> {
    self.waves.iter().flatten()
  }

  pub fn len(&self) -> usize {
    self.waves.iter().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.waves.is_empty()
  }
}

/// Plan the build of `requested` (every image when empty).
///
/// Unknown names are reported together, before anything else happens.
pub fn plan(config: &ProjectConfig, requested: &[String]) -> Result<BuildPlan, ConveyorError> {
  let unknown = config.unknown_images(requested);
  if !unknown.is_empty() {
    return Err(ConveyorError::UnknownImages(unknown));
  }

  let roots: Vec<String> = if requested.is_empty() {
    config.image_names()
  } else {
    requested.to_vec()
  };

  // Close over fromImage parents.
  let mut included: HashSet<&str> = HashSet::new();
  let mut pending: Vec<&str> = roots.iter().map(String::as_str).collect();
  while let Some(name) = pending.pop() {
    if !included.insert(name) {
      continue;
    }
    if let Some(parent) = config.image(name).and_then(|i| i.parent_image()) {
      pending.push(parent);
    }
  }

  let mut graph: DiGraph<&str, ()> = DiGraph::new();
  let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
  for image in config.images.iter().filter(|i| included.contains(i.name.as_str())) {
    nodes.insert(&image.name, graph.add_node(&image.name));
  }
  for image in config.images.iter().filter(|i| included.contains(i.name.as_str())) {
    if let Some(parent) = image.parent_image()
      && let Some(&parent_idx) = nodes.get(parent)
    {
      graph.add_edge(parent_idx, nodes[image.name.as_str()], ());
    }
  }

  let mut in_degree: HashMap<NodeIndex, usize> = graph
    .node_indices()
    .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
    .collect();
  // Node indices follow declaration order, which keeps waves deterministic.
  let mut remaining: Vec<NodeIndex> = graph.node_indices().collect();
  let mut waves: Vec<Vec<String>> = Vec::new();

  while !remaining.is_empty() {
    let (ready, rest): (Vec<NodeIndex>, Vec<NodeIndex>) = remaining.into_iter().partition(|idx| in_degree[idx] == 0);
    if ready.is_empty() {
      return Err(ConveyorError::Cycle(rest.iter().map(|idx| graph[*idx].to_string()).collect()));
    }

    for &idx in &ready {
      for child in graph.neighbors_directed(idx, Direction::Outgoing) {
        if let Some(deg) = in_degree.get_mut(&child) {
          *deg = deg.saturating_sub(1);
        }
      }
    }

    waves.push(ready.iter().map(|idx| graph[*idx].to_string()).collect());
    remaining = rest;
  }

  Ok(BuildPlan { waves })
}
