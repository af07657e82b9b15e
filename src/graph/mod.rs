//! Netlist graph: nodes, typed connections, groups and clocks.
//!
//! The [`Circuit`] owns every graph entity. Nodes live in a generation-checked
//! arena and refer to each other by [`NodeId`], so register feedback loops
//! need no special ownership handling.
//!
//! Liveness follows reachability: a node stays alive while it holds an
//! external owning handle ([`Circuit::retain`]) or drives, directly or
//! through other nodes, an input of a live node. When an edge disappears the
//! former driver's upstream region is checked and everything in it that no
//! longer reaches a live consumer is removed, including unreferenced cycles.

pub mod arena;
pub mod group;
pub mod node;
pub mod topo;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::{ClockTree, EdgeConfig, ResetConfig, TriggerEvent};
use crate::config::ConfigTree;
use crate::error::GraphError;
use crate::types::{ClockId, ClockRational, GroupId, NodeId, SignalGroupId};

use arena::Arena;
pub use group::{GroupType, NodeGroup, SignalGroup};
pub use node::{
    ArithmeticOp, CompareOp, ConnectionType, Interpretation, LogicOp, Node, NodeKind, NodePort,
    PinDirection,
};
pub use topo::ClockCrossingReport;

/// The design: netlist, group hierarchies and clock tree.
#[derive(Debug)]
pub struct Circuit {
    pub(crate) nodes: Arena<Node>,
    groups: Arena<NodeGroup>,
    signal_groups: Arena<SignalGroup>,
    root: GroupId,
    clocks: ClockTree,
    active_runs: Arc<AtomicUsize>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl Circuit {
    /// Creates an empty circuit with a root group named `top`.
    pub fn new() -> Self {
        let mut groups = Arena::new();
        let root = groups.insert(NodeGroup::new("top".to_string(), GroupType::Entity, None));
        Self {
            nodes: Arena::new(),
            groups,
            signal_groups: Arena::new(),
            root,
            clocks: ClockTree::new(),
            active_runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn root_group(&self) -> GroupId {
        self.root
    }

    // ------------------------------------------------------------------
    // freezing
    // ------------------------------------------------------------------

    /// Whether a simulator currently runs on this circuit.
    pub fn is_frozen(&self) -> bool {
        self.active_runs.load(Ordering::Acquire) > 0
    }

    /// Marks the circuit as in use by a run until the guard is dropped.
    pub(crate) fn freeze(&self) -> FreezeGuard {
        self.active_runs.fetch_add(1, Ordering::AcqRel);
        FreezeGuard {
            counter: Arc::clone(&self.active_runs),
        }
    }

    fn check_mutable(&self) -> Result<(), GraphError> {
        if self.is_frozen() {
            return Err(GraphError::GraphFrozen);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // nodes
    // ------------------------------------------------------------------

    /// Creates a node in `group`. The returned handle owns one reference.
    pub fn create_node(&mut self, kind: NodeKind, group: GroupId) -> Result<NodeId, GraphError> {
        self.check_mutable()?;
        let slot = self
            .groups
            .get(group)
            .ok_or(GraphError::InvalidGroup(group))?
            .nodes
            .len();
        let type_name = kind.type_name();
        let id: NodeId = self.nodes.insert(Node::new(kind, group, slot));
        if let Some(g) = self.groups.get_mut(group) {
            g.nodes.push(id);
        }
        debug!(node = %id, kind = type_name, %group, "created node");
        Ok(id)
    }

    /// Creates a node and gives it a name.
    pub fn create_named_node(
        &mut self,
        kind: NodeKind,
        group: GroupId,
        name: impl Into<String>,
    ) -> Result<NodeId, GraphError> {
        let id = self.create_node(kind, group)?;
        self.node_mut(id)?.name = Some(name.into());
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(id).ok_or(GraphError::InvalidNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes.get_mut(id).ok_or(GraphError::InvalidNode(id))
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Live nodes in ascending slot order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes.iter()
    }

    pub fn set_node_name(&mut self, id: NodeId, name: impl Into<String>) -> Result<(), GraphError> {
        self.check_mutable()?;
        self.node_mut(id)?.name = Some(name.into());
        Ok(())
    }

    pub fn set_node_comment(
        &mut self,
        id: NodeId,
        comment: impl Into<String>,
    ) -> Result<(), GraphError> {
        self.check_mutable()?;
        self.node_mut(id)?.comment = Some(comment.into());
        Ok(())
    }

    /// Finds a pin by name.
    pub fn find_pin(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find_map(|(id, node)| match &node.kind {
            NodeKind::Pin { name: pin, .. } if pin == name => Some(id),
            _ => None,
        })
    }

    /// Adds an external owning handle to a node.
    pub fn retain(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.check_mutable()?;
        self.node_mut(id)?.external_refs += 1;
        Ok(())
    }

    /// Drops an external owning handle.
    ///
    /// Returns true if the node was removed as a consequence. Releasing a
    /// stale handle or a node without external handles is a no-op.
    pub fn release(&mut self, id: NodeId) -> Result<bool, GraphError> {
        self.check_mutable()?;
        let Some(node) = self.nodes.get_mut(id) else {
            return Ok(false);
        };
        if node.external_refs == 0 {
            return Ok(false);
        }
        node.external_refs -= 1;
        self.reclaim(id);
        Ok(!self.nodes.contains(id))
    }

    /// Connects input `port` of `node` to `source`.
    ///
    /// Connecting to the slot right after the last one grows nodes with
    /// dynamic arity. The previous driver, if any, is reclaimed when nothing
    /// else keeps it alive.
    pub fn connect_input(
        &mut self,
        node: NodeId,
        port: usize,
        source: NodePort,
    ) -> Result<(), GraphError> {
        self.check_mutable()?;
        let target = self.node(node)?;
        let driver = self.node(source.node)?;

        let actual = driver
            .kind
            .output_type(source.port)
            .ok_or(GraphError::PortOutOfRange {
                node: source.node,
                port: source.port,
                arity: driver.kind.num_outputs(),
            })?;

        let arity = target.kind.num_inputs();
        let mut kind = None;
        if port >= arity {
            let mut grown = target.kind.clone();
            if port != arity || !grown.grow_inputs() {
                return Err(GraphError::PortOutOfRange { node, port, arity });
            }
            kind = Some(grown);
        }
        let expected = kind
            .as_ref()
            .unwrap_or(&target.kind)
            .input_type(port)
            .ok_or(GraphError::PortOutOfRange { node, port, arity })?;
        if !actual.is_compatible(&expected) {
            return Err(GraphError::TypeMismatch {
                node,
                port,
                expected,
                actual,
            });
        }

        let target = self.node_mut(node)?;
        if let Some(grown) = kind {
            target.kind = grown;
            target.inputs.push(None);
            target.floating_allowed.push(false);
        }
        let previous = target.inputs[port].replace(source);
        let slot = NodePort::new(node, port);
        if let Some(prev) = previous {
            self.unlink_consumer(prev, slot);
        }
        if let Some(driver) = self.nodes.get_mut(source.node) {
            driver.consumers[source.port].push(slot);
        }
        if let Some(prev) = previous {
            if prev.node != source.node {
                self.reclaim(prev.node);
            }
        }
        Ok(())
    }

    /// Removes the driver of input `port`, reclaiming it if it became unreachable.
    pub fn disconnect_input(&mut self, node: NodeId, port: usize) -> Result<(), GraphError> {
        self.check_mutable()?;
        let target = self.node_mut(node)?;
        let arity = target.inputs.len();
        let previous = target
            .inputs
            .get_mut(port)
            .ok_or(GraphError::PortOutOfRange { node, port, arity })?
            .take();
        if let Some(prev) = previous {
            self.unlink_consumer(prev, NodePort::new(node, port));
            self.reclaim(prev.node);
        }
        Ok(())
    }

    /// Marks an input as intentionally unconnected.
    pub fn allow_floating(&mut self, node: NodeId, port: usize, allowed: bool) -> Result<(), GraphError> {
        self.check_mutable()?;
        let target = self.node_mut(node)?;
        let arity = target.floating_allowed.len();
        *target
            .floating_allowed
            .get_mut(port)
            .ok_or(GraphError::PortOutOfRange { node, port, arity })? = allowed;
        Ok(())
    }

    /// Duplicates a node without its connections, in the same group.
    pub fn clone_node(&mut self, id: NodeId) -> Result<NodeId, GraphError> {
        let source = self.node(id)?;
        let kind = source.kind.clone();
        let group = source.group;
        let name = source.name.clone();
        let comment = source.comment.clone();
        let clock = source.clock;
        let floating = source.floating_allowed.clone();

        let copy = self.create_node(kind, group)?;
        let node = self.node_mut(copy)?;
        node.name = name;
        node.comment = comment;
        node.clock = clock;
        node.floating_allowed = floating;
        Ok(copy)
    }

    /// Attaches a stateful node to a clock, replacing any previous one.
    pub fn attach_clock(&mut self, node: NodeId, clock: ClockId) -> Result<(), GraphError> {
        self.check_mutable()?;
        if !self.clocks.contains(clock) {
            return Err(GraphError::InvalidClock(clock));
        }
        self.node_mut(node)?.clock = Some(clock);
        Ok(())
    }

    pub fn detach_clock(&mut self, node: NodeId) -> Result<Option<ClockId>, GraphError> {
        self.check_mutable()?;
        Ok(self.node_mut(node)?.clock.take())
    }

    /// Overrides the reset behavior of a single register.
    pub fn set_register_reset(
        &mut self,
        node: NodeId,
        reset: Option<ResetConfig>,
    ) -> Result<(), GraphError> {
        self.check_mutable()?;
        match &mut self.node_mut(node)?.kind {
            NodeKind::Register { reset: local, .. } => {
                *local = reset;
                Ok(())
            }
            _ => Err(GraphError::Structural(
                crate::error::StructuralError::MalformedNode {
                    node,
                    reason: "reset override on a node that is not a register".to_string(),
                },
            )),
        }
    }

    fn unlink_consumer(&mut self, driver: NodePort, slot: NodePort) {
        if let Some(node) = self.nodes.get_mut(driver.node) {
            if let Some(list) = node.consumers.get_mut(driver.port) {
                if let Some(pos) = list.iter().position(|c| *c == slot) {
                    list.swap_remove(pos);
                }
            }
        }
    }

    /// Removes `candidate` and everything upstream of it that no longer
    /// reaches a live consumer.
    fn reclaim(&mut self, candidate: NodeId) {
        match self.nodes.get(candidate) {
            Some(node) if node.external_refs == 0 => {}
            _ => return,
        }

        // upstream region, bounded by externally held nodes
        let mut region = HashSet::new();
        let mut stack = vec![candidate];
        while let Some(id) = stack.pop() {
            if !region.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            for driver in node.inputs.iter().flatten() {
                let held = self
                    .nodes
                    .get(driver.node)
                    .map_or(true, |d| d.external_refs > 0);
                if !held && !region.contains(&driver.node) {
                    stack.push(driver.node);
                }
            }
        }

        // nodes consumed from outside the region are alive, and so is
        // everything feeding them
        let mut live = HashSet::new();
        let mut stack: Vec<NodeId> = region
            .iter()
            .copied()
            .filter(|id| {
                self.nodes.get(*id).is_some_and(|node| {
                    node.consumers
                        .iter()
                        .flatten()
                        .any(|c| !region.contains(&c.node))
                })
            })
            .collect();
        while let Some(id) = stack.pop() {
            if !live.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                for driver in node.inputs.iter().flatten() {
                    if region.contains(&driver.node) && !live.contains(&driver.node) {
                        stack.push(driver.node);
                    }
                }
            }
        }

        let mut dead: Vec<NodeId> = region.difference(&live).copied().collect();
        dead.sort();
        self.remove_nodes(&dead);
    }

    fn remove_nodes(&mut self, dead: &[NodeId]) {
        for &id in dead {
            let inputs = match self.nodes.get_mut(id) {
                Some(node) => std::mem::take(&mut node.inputs),
                None => continue,
            };
            for (port, driver) in inputs.into_iter().enumerate() {
                if let Some(driver) = driver {
                    self.unlink_consumer(driver, NodePort::new(id, port));
                }
            }
        }
        for &id in dead {
            let Some(node) = self.nodes.remove(id) else {
                continue;
            };
            self.detach_from_group(id, node.group, node.group_slot);
            if let Some(sg) = node.signal_group {
                if let Some(signal_group) = self.signal_groups.get_mut(sg) {
                    signal_group.members.retain(|m| *m != id);
                }
            }
            debug!(node = %id, kind = node.kind.type_name(), "removed node");
        }
    }

    /// Removes every node not reachable from an externally held node.
    ///
    /// Edge removal already reclaims unreachable regions; this full sweep is
    /// a consistency pass and returns the number of nodes removed.
    pub fn collect_garbage(&mut self) -> Result<usize, GraphError> {
        self.check_mutable()?;
        let mut live = HashSet::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.external_refs > 0)
            .map(|(id, _)| id)
            .collect();
        while let Some(id) = stack.pop() {
            if !live.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.inputs.iter().flatten().map(|d| d.node));
            }
        }
        let dead: Vec<NodeId> = self
            .nodes
            .iter::<NodeId>()
            .map(|(id, _)| id)
            .filter(|id| !live.contains(id))
            .collect();
        self.remove_nodes(&dead);
        Ok(dead.len())
    }

    // ------------------------------------------------------------------
    // node groups
    // ------------------------------------------------------------------

    pub fn group(&self, id: GroupId) -> Result<&NodeGroup, GraphError> {
        self.groups.get(id).ok_or(GraphError::InvalidGroup(id))
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut NodeGroup, GraphError> {
        self.groups.get_mut(id).ok_or(GraphError::InvalidGroup(id))
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn create_group(
        &mut self,
        parent: GroupId,
        name: impl Into<String>,
        group_type: GroupType,
    ) -> Result<GroupId, GraphError> {
        self.check_mutable()?;
        self.group(parent)?;
        let id = self
            .groups
            .insert(NodeGroup::new(name.into(), group_type, Some(parent)));
        self.group_mut(parent)?.children.push(id);
        Ok(id)
    }

    pub fn set_group_comment(
        &mut self,
        id: GroupId,
        comment: impl Into<String>,
    ) -> Result<(), GraphError> {
        self.check_mutable()?;
        self.group_mut(id)?.comment = Some(comment.into());
        Ok(())
    }

    pub fn set_partition(&mut self, id: GroupId, partition: bool) -> Result<(), GraphError> {
        self.check_mutable()?;
        self.group_mut(id)?.partition = partition;
        Ok(())
    }

    /// Child group of `parent` with the given name.
    pub fn find_child_group(&self, parent: GroupId, name: &str) -> Option<GroupId> {
        let group = self.groups.get(parent)?;
        group
            .children
            .iter()
            .copied()
            .find(|child| self.groups.get(*child).is_some_and(|g| g.name == name))
    }

    /// Slash separated names from the root down to `id`, root excluded.
    pub fn instance_path(&self, id: GroupId) -> Result<String, GraphError> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(gid) = current {
            let group = self.group(gid)?;
            if group.parent.is_some() {
                names.push(group.name.as_str());
            }
            current = group.parent;
        }
        names.reverse();
        Ok(names.join("/"))
    }

    /// Moves a node into another group. Connectivity is untouched.
    pub fn move_to_group(&mut self, node: NodeId, group: GroupId) -> Result<(), GraphError> {
        self.check_mutable()?;
        let new_slot = self.group(group)?.nodes.len();
        let current = self.node(node)?;
        let (old_group, old_slot) = (current.group, current.group_slot);
        if old_group == group {
            return Ok(());
        }
        self.detach_from_group(node, old_group, old_slot);
        self.group_mut(group)?.nodes.push(node);
        let n = self.node_mut(node)?;
        n.group = group;
        n.group_slot = new_slot;
        Ok(())
    }

    fn detach_from_group(&mut self, node: NodeId, group: GroupId, slot: usize) {
        let Some(g) = self.groups.get_mut(group) else {
            return;
        };
        if g.nodes.get(slot) != Some(&node) {
            return;
        }
        g.nodes.swap_remove(slot);
        if let Some(&moved) = g.nodes.get(slot) {
            if let Some(n) = self.nodes.get_mut(moved) {
                n.group_slot = slot;
            }
        }
    }

    /// Moves a group below a new parent, keeping the hierarchy a tree.
    pub fn move_group(&mut self, id: GroupId, parent: GroupId) -> Result<(), GraphError> {
        self.check_mutable()?;
        if id == self.root {
            return Err(GraphError::RootGroup);
        }
        self.group(parent)?;
        let old_parent = self.group(id)?.parent;

        let mut ancestor = Some(parent);
        while let Some(gid) = ancestor {
            if gid == id {
                return Err(GraphError::CyclicGroup { group: id, parent });
            }
            ancestor = self.group(gid)?.parent;
        }

        if let Some(old) = old_parent {
            self.group_mut(old)?.children.retain(|c| *c != id);
        }
        self.group_mut(parent)?.children.push(id);
        self.group_mut(id)?.parent = Some(parent);
        Ok(())
    }

    /// Removes an empty group.
    pub fn remove_group(&mut self, id: GroupId) -> Result<(), GraphError> {
        self.check_mutable()?;
        if id == self.root {
            return Err(GraphError::RootGroup);
        }
        if !self.group(id)?.is_empty() {
            return Err(GraphError::GroupNotEmpty(id));
        }
        if let Some(group) = self.groups.remove(id) {
            if let Some(parent) = group.parent.and_then(|p| self.groups.get_mut(p)) {
                parent.children.retain(|c| *c != id);
            }
        }
        Ok(())
    }

    /// Applies the `partition` leaves of a config tree to the group hierarchy.
    ///
    /// Paths are resolved from the root group by child name. Returns the number
    /// of groups updated.
    pub fn apply_partition_config(&mut self, tree: &ConfigTree) -> Result<usize, GraphError> {
        self.check_mutable()?;
        let mut applied = 0;
        for (path, partition) in tree.partition_entries() {
            let mut group = Some(self.root);
            for segment in &path {
                group = group.and_then(|g| self.find_child_group(g, segment));
            }
            match group {
                Some(gid) => {
                    self.group_mut(gid)?.partition = partition;
                    applied += 1;
                }
                None => warn!(path = %path.join("/"), "partition config names no group"),
            }
        }
        Ok(applied)
    }

    // ------------------------------------------------------------------
    // signal groups
    // ------------------------------------------------------------------

    pub fn signal_group(&self, id: SignalGroupId) -> Result<&SignalGroup, GraphError> {
        self.signal_groups
            .get(id)
            .ok_or(GraphError::InvalidSignalGroup(id))
    }

    pub fn create_signal_group(
        &mut self,
        parent: Option<SignalGroupId>,
        name: impl Into<String>,
    ) -> Result<SignalGroupId, GraphError> {
        self.check_mutable()?;
        if let Some(p) = parent {
            self.signal_group(p)?;
        }
        let id = self
            .signal_groups
            .insert(SignalGroup::new(name.into(), parent));
        if let Some(p) = parent.and_then(|p| self.signal_groups.get_mut(p)) {
            p.children.push(id);
        }
        Ok(id)
    }

    /// Puts a node into a signal group, leaving any previous one.
    pub fn add_to_signal_group(&mut self, node: NodeId, group: SignalGroupId) -> Result<(), GraphError> {
        self.check_mutable()?;
        self.signal_group(group)?;
        self.remove_from_signal_group(node)?;
        self.node_mut(node)?.signal_group = Some(group);
        if let Some(sg) = self.signal_groups.get_mut(group) {
            sg.members.push(node);
        }
        Ok(())
    }

    /// Detaches a node from its signal group. The node itself is untouched.
    pub fn remove_from_signal_group(&mut self, node: NodeId) -> Result<(), GraphError> {
        self.check_mutable()?;
        if let Some(sg) = self.node_mut(node)?.signal_group.take() {
            if let Some(group) = self.signal_groups.get_mut(sg) {
                group.members.retain(|m| *m != node);
            }
        }
        Ok(())
    }

    /// Destroys a signal group and its children. Member nodes survive.
    pub fn destroy_signal_group(&mut self, id: SignalGroupId) -> Result<(), GraphError> {
        self.check_mutable()?;
        let parent = self.signal_group(id)?.parent;
        if let Some(p) = parent.and_then(|p| self.signal_groups.get_mut(p)) {
            p.children.retain(|c| *c != id);
        }
        let mut stack = vec![id];
        while let Some(sg) = stack.pop() {
            let Some(group) = self.signal_groups.remove(sg) else {
                continue;
            };
            for member in group.members {
                if let Some(node) = self.nodes.get_mut(member) {
                    node.signal_group = None;
                }
            }
            stack.extend(group.children);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // clocks
    // ------------------------------------------------------------------

    pub fn clocks(&self) -> &ClockTree {
        &self.clocks
    }

    pub fn create_clock(
        &mut self,
        name: impl Into<String>,
        frequency: ClockRational,
    ) -> Result<ClockId, GraphError> {
        self.check_mutable()?;
        self.clocks.create_root(name, frequency)
    }

    pub fn derive_clock(
        &mut self,
        parent: ClockId,
        ratio: ClockRational,
        edge: EdgeConfig,
    ) -> Result<ClockId, GraphError> {
        self.check_mutable()?;
        self.clocks.derive_clock(parent, ratio, edge)
    }

    pub fn set_clock_reset(&mut self, clock: ClockId, reset: ResetConfig) -> Result<(), GraphError> {
        self.check_mutable()?;
        self.clocks.set_reset(clock, reset)
    }

    pub fn set_clock_trigger(
        &mut self,
        clock: ClockId,
        trigger: TriggerEvent,
    ) -> Result<(), GraphError> {
        self.check_mutable()?;
        self.clocks.set_trigger(clock, trigger)
    }

    /// Circuit summary for logs and reports.
    pub fn export_stats(&self) -> serde_json::Value {
        let stateful = self
            .nodes
            .iter::<NodeId>()
            .filter(|(_, n)| n.kind.is_stateful())
            .count();
        serde_json::json!({
            "nodes": self.nodes.len(),
            "stateful_nodes": stateful,
            "groups": self.groups.len(),
            "signal_groups": self.signal_groups.len(),
            "clocks": self.clocks.len(),
        })
    }
}

/// Keeps a circuit frozen while alive.
#[derive(Debug)]
pub(crate) struct FreezeGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for FreezeGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
