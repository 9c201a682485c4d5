use std::collections::{BTreeSet, HashMap};

use crate::edge::Edge;
use crate::topic::Topic;

/// Topic-level view of a compiled edge list, for traversal and analysis.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: topic -> downstream topics.
  adjacency: HashMap<Topic, Vec<Topic>>,
  /// Reverse adjacency: topic -> upstream topics.
  reverse_adjacency: HashMap<Topic, Vec<Topic>>,
  /// Topics that are read but never written by any edge.
  entry_points: Vec<Topic>,
}

impl Graph {
  /// Build a graph from compiled edges.
  pub fn new(edges: &[Edge]) -> Self {
    let mut adjacency: HashMap<Topic, Vec<Topic>> = HashMap::new();
    let mut reverse_adjacency: HashMap<Topic, Vec<Topic>> = HashMap::new();

    for edge in edges {
      adjacency
        .entry(edge.from.clone())
        .or_default()
        .push(edge.to.clone());
      adjacency.entry(edge.to.clone()).or_default();
      reverse_adjacency
        .entry(edge.to.clone())
        .or_default()
        .push(edge.from.clone());
      reverse_adjacency.entry(edge.from.clone()).or_default();
    }

    // Sorted so that entry points come out in a stable order.
    let entry_points: Vec<Topic> = reverse_adjacency
      .iter()
      .filter(|(_, incoming)| incoming.is_empty())
      .map(|(topic, _)| topic.clone())
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
    }
  }

  /// Topics no edge publishes to.
  pub fn entry_points(&self) -> &[Topic] {
    &self.entry_points
  }

  /// Entry points that are not `init` topics: nothing will ever feed them.
  pub fn dangling(&self) -> Vec<&Topic> {
    self.entry_points.iter().filter(|t| !t.is_init()).collect()
  }

  /// Topics fed by the given topic.
  pub fn downstream(&self, topic: &Topic) -> &[Topic] {
    self
      .adjacency
      .get(topic)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Topics feeding the given topic.
  pub fn upstream(&self, topic: &Topic) -> &[Topic] {
    self
      .reverse_adjacency
      .get(topic)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Check if more than one edge reads this topic (a fan-out point).
  pub fn is_fan_out(&self, topic: &Topic) -> bool {
    self.downstream(topic).len() > 1
  }
}
