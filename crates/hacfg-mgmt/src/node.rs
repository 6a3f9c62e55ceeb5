//! Cluster node addressing.

use serde::{Deserialize, Serialize};

/// Addresses of one cluster node. Remote calls go to `ring0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddresses {
    pub ring0: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ring1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl NodeAddresses {
    pub fn new(ring0: impl Into<String>) -> Self {
        Self {
            ring0: ring0.into(),
            ring1: None,
            name: None,
            id: None,
        }
    }

    pub fn with_ring1(mut self, ring1: impl Into<String>) -> Self {
        self.ring1 = Some(ring1.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Name used in reports: the node name if known, otherwise ring0.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.ring0)
    }
}

/// Ordered list of cluster nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddressesList(Vec<NodeAddresses>);

impl NodeAddressesList {
    pub fn new(nodes: Vec<NodeAddresses>) -> Self {
        Self(nodes)
    }

    pub fn push(&mut self, node: NodeAddresses) {
        self.0.push(node);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeAddresses> {
        self.0.iter()
    }

    pub fn find_by_label(&self, label: &str) -> Option<&NodeAddresses> {
        self.0.iter().find(|n| n.label() == label)
    }

    pub fn labels(&self) -> Vec<String> {
        self.0.iter().map(|n| n.label().to_string()).collect()
    }
}

impl FromIterator<NodeAddresses> for NodeAddressesList {
    fn from_iter<I: IntoIterator<Item = NodeAddresses>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a NodeAddressesList {
    type Item = &'a NodeAddresses;
    type IntoIter = std::slice::Iter<'a, NodeAddresses>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
