//! Replaying configuration to newly owned devices.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::instance::ConnectionInstance;
use crate::key::DeviceKey;
use crate::node::{DeviceNode, NodeId, NodeModification};

/// Receives the decisions of a [`ReconciliationTrigger`].
pub trait ConfigurationReconciler: Send + Sync {
    /// live instance for the device at `key`
    fn connection(&self, key: DeviceKey) -> Option<Arc<ConnectionInstance>>;

    /// replay the full configuration of `node` through `connection`
    fn reconcile_configuration(&self, connection: Arc<ConnectionInstance>, node: &DeviceNode);

    /// cancel any replay for `node_id`
    fn stop_configuration_reconciliation(&self, node_id: &NodeId);
}

/// Turns node modifications into reconcile and stop requests.
///
/// A created node carrying the device augmentation, whose connection is live
/// and owned here, is reconciled. A deleted node whose prior snapshot carried
/// the augmentation has its reconciliation stopped.
#[derive(Debug)]
pub struct ReconciliationTrigger<R> {
    reconciler: Arc<R>,
}

impl<R: ConfigurationReconciler + 'static> ReconciliationTrigger<R> {
    /// trigger forwarding to `reconciler`
    pub fn new(reconciler: Arc<R>) -> Self {
        Self { reconciler }
    }

    /// handles one batch of modifications
    pub fn on_data_tree_changed(&self, changes: &[NodeModification]) {
        self.process_connected(changes);
        self.process_disconnected(changes);
    }

    fn process_connected(&self, changes: &[NodeModification]) {
        for node in changes.iter().filter_map(NodeModification::created) {
            let Some(augmentation) = &node.augmentation else {
                continue;
            };
            let Some(connection) = self.reconciler.connection(augmentation.device_key) else {
                trace!(node_id = %node.node_id, "no connection for created node");
                continue;
            };
            if !connection.has_ownership() {
                trace!(node_id = %node.node_id, "created node is owned elsewhere");
                continue;
            }
            debug!(node_id = %node.node_id, key = %connection.key(), "reconcile config for node");
            self.reconciler.reconcile_configuration(connection, node);
        }
    }

    fn process_disconnected(&self, changes: &[NodeModification]) {
        for node in changes.iter().filter_map(NodeModification::removed) {
            if node.augmentation.is_some() {
                debug!(node_id = %node.node_id, "cancel config reconciliation for node");
                self.reconciler.stop_configuration_reconciliation(&node.node_id);
            }
        }
    }

    /// Handles batches from `rx` until it closes or `token` is cancelled.
    pub fn spawn(
        self,
        mut rx: mpsc::Receiver<Vec<NodeModification>>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changes = rx.recv() => match changes {
                        Some(changes) => self.on_data_tree_changed(&changes),
                        None => break,
                    },
                }
            }
            debug!("reconciliation trigger stopped");
        })
    }
}

/// In-flight replays, at most one per node.
#[derive(Debug, Default)]
pub struct ReplayTasks {
    tasks: DashMap<NodeId, (u64, CancellationToken)>,
    generation: AtomicU64,
}

impl ReplayTasks {
    /// no replays
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a replay for `node_id`, cancelling the previous one.
    /// Returns the replay's generation and cancellation token.
    pub fn start(&self, node_id: NodeId) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some((previous, old)) = self.tasks.insert(node_id.clone(), (generation, token.clone())) {
            debug!(%node_id, previous, "superseding in-flight replay");
            old.cancel();
        }
        (generation, token)
    }

    /// Stops tracking the replay `generation` of `node_id` if it is still current.
    pub fn finish(&self, node_id: &NodeId, generation: u64) {
        self.tasks.remove_if(node_id, |_, (current, _)| *current == generation);
    }

    /// Cancels the replay of `node_id`. Returns whether one was running.
    pub fn cancel(&self, node_id: &NodeId) -> bool {
        match self.tasks.remove(node_id) {
            Some((_, (_, token))) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// cancels every replay
    pub fn cancel_all(&self) {
        self.tasks.retain(|_, (_, token)| {
            token.cancel();
            false
        });
    }

    /// whether a replay for `node_id` is running
    pub fn is_running(&self, node_id: &NodeId) -> bool {
        self.tasks.contains_key(node_id)
    }

    /// number of running replays
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// nothing running
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        connections: Mutex<Vec<Arc<ConnectionInstance>>>,
        reconciled: Mutex<Vec<NodeId>>,
        stopped: Mutex<Vec<NodeId>>,
    }

    impl ConfigurationReconciler for Recorder {
        fn connection(&self, key: DeviceKey) -> Option<Arc<ConnectionInstance>> {
            self.connections.lock().iter().find(|c| c.key() == key).cloned()
        }

        fn reconcile_configuration(&self, _connection: Arc<ConnectionInstance>, node: &DeviceNode) {
            self.reconciled.lock().push(node.node_id.clone());
        }

        fn stop_configuration_reconciliation(&self, node_id: &NodeId) {
            self.stopped.lock().push(node_id.clone());
        }
    }

    fn key() -> DeviceKey {
        "192.0.2.10:6640".parse::<SocketAddr>().unwrap().into()
    }

    #[test]
    fn test_delete_with_augmentation_stops() {
        let recorder = Arc::new(Recorder::default());
        let trigger = ReconciliationTrigger::new(recorder.clone());
        let plain = DeviceNode {
            node_id: NodeId::new("hwvtep://plain"),
            augmentation: None,
        };
        trigger.on_data_tree_changed(&[
            NodeModification::delete(DeviceNode::device(NodeId::new("hwvtep://a"), key())),
            NodeModification::delete(plain.clone()),
            NodeModification::subtree_modified(plain.clone(), plain),
        ]);
        assert_eq!(*recorder.stopped.lock(), [NodeId::new("hwvtep://a")]);
        assert!(recorder.reconciled.lock().is_empty());
    }

    #[test]
    fn test_created_without_connection_is_ignored() {
        let recorder = Arc::new(Recorder::default());
        let trigger = ReconciliationTrigger::new(recorder.clone());
        trigger.on_data_tree_changed(&[NodeModification::write(
            None,
            DeviceNode::device(NodeId::new("hwvtep://a"), key()),
        )]);
        assert!(recorder.reconciled.lock().is_empty());
        assert!(recorder.stopped.lock().is_empty());
    }

    #[test]
    fn test_replay_generations() {
        let tasks = ReplayTasks::new();
        let node = NodeId::new("hwvtep://a");
        let (first, first_token) = tasks.start(node.clone());
        let (second, second_token) = tasks.start(node.clone());
        assert!(first_token.is_cancelled());
        assert!(!second_token.is_cancelled());

        // a superseded replay finishing does not untrack the current one
        tasks.finish(&node, first);
        assert!(tasks.is_running(&node));
        tasks.finish(&node, second);
        assert!(tasks.is_empty());

        let (_, token) = tasks.start(node.clone());
        assert!(tasks.cancel(&node));
        assert!(token.is_cancelled());
        assert!(!tasks.cancel(&node));

        let (_, a) = tasks.start(NodeId::new("hwvtep://a"));
        let (_, b) = tasks.start(NodeId::new("hwvtep://b"));
        tasks.cancel_all();
        assert!(a.is_cancelled() && b.is_cancelled());
        assert_eq!(tasks.len(), 0);
    }
}
