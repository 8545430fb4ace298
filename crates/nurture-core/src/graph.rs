//! Edit-time operations on a flow graph.
//!
//! Every operation keeps the graph structurally sound: node ids stay unique
//! and every edge references nodes that exist. Anything beyond that (trigger
//! cardinality, connectivity, split totals) is reported by validation.

use crate::models::{
    FlowDefinition, FlowEdge, FlowNode, NodeConfig, NodeType, SplitVariant, variant_handle,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node already exists: {0}")]
    DuplicateNode(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Edge already exists: {0}")]
    DuplicateEdge(String),

    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    #[error("Edge cannot connect node {0} to itself")]
    SelfLoop(String),

    #[error("Node {0} is not a split")]
    NotASplit(String),

    #[error("Split {node_id} has no variant {variant_id}")]
    VariantNotFound { node_id: String, variant_id: String },

    #[error("Split {0} must keep at least one variant")]
    LastVariant(String),
}

impl FlowDefinition {
    pub fn add_node(&mut self, node: FlowNode) -> Result<(), GraphError> {
        if self.has_node(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Place a node of the given type with its default config and a fresh id.
    pub fn add_node_of_type(&mut self, node_type: NodeType, label: impl Into<String>) -> String {
        let id = format!("{}-{}", node_type.as_str(), uuid::Uuid::new_v4().simple());
        self.nodes.push(FlowNode::new(
            id.clone(),
            label,
            NodeConfig::default_for(node_type),
        ));
        id
    }

    pub fn update_node_config(&mut self, node_id: &str, config: NodeConfig) -> Result<(), GraphError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|node| node.id == node_id)
            .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;
        node.config = config;
        Ok(())
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, node_id: &str) -> Result<FlowNode, GraphError> {
        let index = self
            .nodes
            .iter()
            .position(|node| node.id == node_id)
            .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;
        self.edges
            .retain(|edge| edge.source != node_id && edge.target != node_id);
        Ok(self.nodes.remove(index))
    }

    pub fn add_edge(&mut self, edge: FlowEdge) -> Result<(), GraphError> {
        if edge.source == edge.target {
            return Err(GraphError::SelfLoop(edge.source));
        }
        for end in [&edge.source, &edge.target] {
            if !self.has_node(end) {
                return Err(GraphError::NodeNotFound(end.clone()));
            }
        }
        if self.edges.iter().any(|existing| existing.id == edge.id) {
            return Err(GraphError::DuplicateEdge(edge.id));
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Connect two nodes, optionally through a named handle.
    pub fn connect(&mut self, source: &str, target: &str, handle: Option<&str>) -> Result<(), GraphError> {
        let edge = FlowEdge::new(source, target);
        let edge = match handle {
            Some(handle) => edge.with_handle(handle),
            None => edge,
        };
        self.add_edge(edge)
    }

    pub fn remove_edge(&mut self, edge_id: &str) -> Result<FlowEdge, GraphError> {
        let index = self
            .edges
            .iter()
            .position(|edge| edge.id == edge_id)
            .ok_or_else(|| GraphError::EdgeNotFound(edge_id.to_string()))?;
        Ok(self.edges.remove(index))
    }

    /// Append a variant to a split and spread 100% evenly across all variants.
    pub fn add_split_variant(&mut self, node_id: &str, label: impl Into<String>) -> Result<String, GraphError> {
        let split = self.split_mut(node_id)?;

        let mut index = split.variants.len();
        let id = loop {
            let candidate = variant_id_for(index);
            if split.variants.iter().all(|variant| variant.id != candidate) {
                break candidate;
            }
            index += 1;
        };

        split.variants.push(SplitVariant {
            id: id.clone(),
            label: label.into(),
            percentage: 0,
        });
        split.rebalance();
        Ok(id)
    }

    /// Drop a variant, rebalance the rest and remove the edges of its handle.
    pub fn remove_split_variant(&mut self, node_id: &str, variant_id: &str) -> Result<(), GraphError> {
        let split = self.split_mut(node_id)?;
        let index = split
            .variants
            .iter()
            .position(|variant| variant.id == variant_id)
            .ok_or_else(|| GraphError::VariantNotFound {
                node_id: node_id.to_string(),
                variant_id: variant_id.to_string(),
            })?;
        if split.variants.len() == 1 {
            return Err(GraphError::LastVariant(node_id.to_string()));
        }
        split.variants.remove(index);
        split.rebalance();

        let handle = variant_handle(variant_id);
        self.edges.retain(|edge| {
            !(edge.source == node_id && edge.source_handle.as_deref() == Some(handle.as_str()))
        });
        Ok(())
    }

    fn split_mut(&mut self, node_id: &str) -> Result<&mut crate::models::SplitConfig, GraphError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|node| node.id == node_id)
            .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;
        match &mut node.config {
            NodeConfig::Split(split) => Ok(split),
            _ => Err(GraphError::NotASplit(node_id.to_string())),
        }
    }
}

/// a, b, ..., z, v26, v27, ...
fn variant_id_for(index: usize) -> String {
    if index < 26 {
        ((b'a' + index as u8) as char).to_string()
    } else {
        format!("v{index}")
    }
}
