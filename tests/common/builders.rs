//! Test builders for graphs and options

use itemflow::pipeline::{EventBridge, ItemGraph, ItemOptions, ItemRegistry};
use std::time::Duration;

/// Builder for graphs with fast pacing
pub struct GraphBuilder {
    idle_interval: Duration,
    source_period: Duration,
    capacity: usize,
    registry: ItemRegistry,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            idle_interval: Duration::from_millis(1),
            source_period: Duration::from_millis(1),
            capacity: 1024,
            registry: ItemRegistry::with_builtins(),
        }
    }

    pub fn idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn source_period(mut self, period: Duration) -> Self {
        self.source_period = period;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn registry(mut self, registry: ItemRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn options(&self) -> ItemOptions {
        ItemOptions {
            idle_interval: self.idle_interval,
            source_period: self.source_period,
            thread_name_prefix: "it".to_string(),
        }
    }

    pub fn build(self) -> (ItemGraph, EventBridge) {
        let options = self.options();
        ItemGraph::new(self.registry, options, self.capacity)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_builder() {
        let (graph, bridge) = GraphBuilder::new()
            .idle_interval(Duration::from_millis(2))
            .event_capacity(8)
            .build();
        assert!(graph.is_empty());
        assert!(bridge.try_recv().is_none());
    }
}
