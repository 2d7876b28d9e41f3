//! Logical device nodes and the modifications reported for them.
use std::collections::BTreeMap;
use std::fmt;

use entity_ownership::Entity;
use uuid::Uuid;

use crate::key::DeviceKey;

/// Logical identifier of a device node, e.g. `hwvtep://uuid/<global-uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    /// scheme prefix of every device node id
    pub const PREFIX: &'static str = "hwvtep://";

    /// wraps an existing id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// id derived from the uuid of the device's global row
    pub fn from_global_uuid(uuid: Uuid) -> Self {
        Self(format!("{}uuid/{uuid}", Self::PREFIX))
    }

    /// id as a str
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// the ownership entity for this node
    pub fn to_entity(&self, entity_type: &str) -> Entity {
        Entity::new(entity_type, self.0.as_str())
    }
}

impl From<&Entity> for NodeId {
    fn from(entity: &Entity) -> Self {
        Self::new(entity.id())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Data marking a node as driven through a device connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAugmentation {
    /// connection the device is reached through
    pub device_key: DeviceKey,
    /// free-form device attributes (management ips, description, ...)
    pub attributes: BTreeMap<String, String>,
}

impl DeviceAugmentation {
    /// augmentation with no attributes
    pub fn new(device_key: DeviceKey) -> Self {
        Self {
            device_key,
            attributes: BTreeMap::new(),
        }
    }
}

/// A node as seen in the data tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    /// node identifier
    pub node_id: NodeId,
    /// present when the node is driven through a device connection
    pub augmentation: Option<DeviceAugmentation>,
}

impl DeviceNode {
    /// node with the device augmentation
    pub fn device(node_id: NodeId, device_key: DeviceKey) -> Self {
        Self {
            node_id,
            augmentation: Some(DeviceAugmentation::new(device_key)),
        }
    }
}

/// How a node changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationKind {
    /// node written as a whole (created or replaced)
    Write,
    /// some child of the node changed
    SubtreeModified,
    /// node removed
    Delete,
}

/// One node change with its before/after snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeModification {
    /// the changed node
    pub node_id: NodeId,
    /// kind of change
    pub kind: ModificationKind,
    /// snapshot before the change
    pub before: Option<DeviceNode>,
    /// snapshot after the change
    pub after: Option<DeviceNode>,
}

impl NodeModification {
    /// `after` written over `before`
    pub fn write(before: Option<DeviceNode>, after: DeviceNode) -> Self {
        Self {
            node_id: after.node_id.clone(),
            kind: ModificationKind::Write,
            before,
            after: Some(after),
        }
    }

    /// `before` changed in place into `after`
    pub fn subtree_modified(before: DeviceNode, after: DeviceNode) -> Self {
        Self {
            node_id: after.node_id.clone(),
            kind: ModificationKind::SubtreeModified,
            before: Some(before),
            after: Some(after),
        }
    }

    /// `before` removed
    pub fn delete(before: DeviceNode) -> Self {
        Self {
            node_id: before.node_id.clone(),
            kind: ModificationKind::Delete,
            before: Some(before),
            after: None,
        }
    }

    /// The new node, if this is a write with no prior node.
    pub fn created(&self) -> Option<&DeviceNode> {
        match (self.kind, &self.before) {
            (ModificationKind::Write, None) => self.after.as_ref(),
            _ => None,
        }
    }

    /// The prior node, if this is a delete.
    pub fn removed(&self) -> Option<&DeviceNode> {
        match self.kind {
            ModificationKind::Delete => self.before.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> DeviceNode {
        DeviceNode::device(NodeId::new(name), "10.0.0.5:6640".parse::<std::net::SocketAddr>().unwrap().into())
    }

    #[test]
    fn test_created_and_removed() {
        let created = NodeModification::write(None, node("hwvtep://a"));
        assert_eq!(created.created(), Some(&node("hwvtep://a")));
        assert!(created.removed().is_none());

        let replaced = NodeModification::write(Some(node("hwvtep://a")), node("hwvtep://a"));
        assert!(replaced.created().is_none());

        let modified = NodeModification::subtree_modified(node("hwvtep://a"), node("hwvtep://a"));
        assert!(modified.created().is_none() && modified.removed().is_none());

        let deleted = NodeModification::delete(node("hwvtep://a"));
        assert_eq!(deleted.removed().map(|n| &n.node_id), Some(&NodeId::new("hwvtep://a")));
        assert!(deleted.created().is_none());
    }

    #[test]
    fn test_entity_round_trip() {
        let uuid = Uuid::new_v4();
        let node_id = NodeId::from_global_uuid(uuid);
        assert_eq!(node_id.as_str(), format!("hwvtep://uuid/{uuid}"));

        let entity = node_id.to_entity("hwvtep");
        assert_eq!(entity.entity_type(), "hwvtep");
        assert_eq!(NodeId::from(&entity), node_id);
    }
}
