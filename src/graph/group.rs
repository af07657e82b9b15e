//! Node groups and signal groups.

use serde::{Deserialize, Serialize};

use crate::types::{GroupId, NodeId, SignalGroupId};

/// Role of a node group for downstream tooling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GroupType {
    /// Plain naming scope.
    #[default]
    Scope,
    /// Synthesis boundary, becomes its own entity.
    Entity,
    /// Logical area, may be turned into a partition.
    Area,
}

/// A hierarchical naming and partitioning scope.
#[derive(Clone, Debug)]
pub struct NodeGroup {
    pub(crate) name: String,
    pub(crate) comment: Option<String>,
    pub(crate) group_type: GroupType,
    pub(crate) parent: Option<GroupId>,
    pub(crate) children: Vec<GroupId>,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) partition: bool,
}

impl NodeGroup {
    pub(crate) fn new(name: String, group_type: GroupType, parent: Option<GroupId>) -> Self {
        Self {
            name,
            comment: None,
            group_type,
            parent,
            children: Vec::new(),
            nodes: Vec::new(),
            partition: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn group_type(&self) -> GroupType {
        self.group_type
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    pub fn children(&self) -> &[GroupId] {
        &self.children
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn is_partition(&self) -> bool {
        self.partition
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.nodes.is_empty()
    }
}

/// Groups user-visible signals, independent of the node group tree.
///
/// Membership is a plain reference: destroying a signal group never deletes
/// the nodes it lists.
#[derive(Clone, Debug)]
pub struct SignalGroup {
    pub(crate) name: String,
    pub(crate) parent: Option<SignalGroupId>,
    pub(crate) children: Vec<SignalGroupId>,
    pub(crate) members: Vec<NodeId>,
}

impl SignalGroup {
    pub(crate) fn new(name: String, parent: Option<SignalGroupId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<SignalGroupId> {
        self.parent
    }

    pub fn children(&self) -> &[SignalGroupId] {
        &self.children
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }
}
