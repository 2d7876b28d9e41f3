mod common;

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use common::{FakeDevice, Harness, eventually};
use hwvtep_core::{
    DeviceManager,
    config::DeviceSettings,
    entity_ownership::{LocalCluster, OwnershipChange, OwnershipService},
    instance::OwnershipPhase,
    key::DeviceKey,
    node::NodeId,
    operational::OperationalState,
    ovsdb_ops::Value,
    ownership::{CommandRegistration, OwnershipOutcome},
    prelude::*,
};
use tokio::{sync::Semaphore, time::timeout};
use tracing_test::traced_test;
use uuid::Uuid;

#[tokio::test]
#[traced_test]
/// first controller to connect to a device becomes its owner and registers
/// its callbacks exactly once
async fn test_first_connect_becomes_owner() {
    let h = Harness::new("a").started();
    let (device, client) = FakeDevice::new("10.0.0.1:6640", "10.0.0.100:40000").into_client();

    let instance = h.manager.connected(client).await;
    assert_eq!(instance.node_id(), Some(device.node_id()));
    assert!(eventually(|| instance.has_ownership()).await);
    assert!(eventually(|| h.registration.count() == 1).await);
    assert!(eventually(|| device.monitors() == 1).await);

    let key = DeviceKey::from(common::addr("10.0.0.1:6640"));
    let registered = h.manager.connection(key).unwrap();
    assert!(Arc::ptr_eq(&registered, &instance));
    assert_eq!(instance.phase(), OwnershipPhase::Owner);
    assert_eq!(h.cluster.owner(&device.entity()).as_deref(), Some("a"));
    // only the identification query was sent
    assert_eq!(device.batches().len(), 1);
    assert!(logs_contain("node id generated for device connection"));
}

#[tokio::test]
/// a device already owned by another controller is cached without
/// issuing commands, and is taken over once the owner withdraws
async fn test_owned_elsewhere() {
    let h = Harness::new("a").started();
    let (device, client) = FakeDevice::new("10.0.0.2:6640", "10.0.0.100:40001").into_client();
    let other = h.cluster.member("b");
    let held = other.register_candidate(&device.entity()).await.unwrap();

    let instance = h.manager.connected(client).await;
    assert_eq!(instance.phase(), OwnershipPhase::NotOwner);
    assert!(!instance.has_ownership());
    assert!(h.manager.connection(instance.key()).is_some());
    assert_eq!(h.registration.count(), 0);
    assert_eq!(device.batches().len(), 1);
    assert_eq!(h.cluster.candidates(&device.entity()), ["b", "a"]);

    held.close();
    assert!(eventually(|| instance.has_ownership()).await);
    assert!(eventually(|| h.registration.count() == 1).await);
}

#[tokio::test]
/// disconnecting the owned device removes it everywhere and the ownerless
/// entity is cleaned up twice
async fn test_disconnect_releases_candidacy() {
    let h = Harness::new("a").started();
    let (device, client) = FakeDevice::new("10.0.0.3:6640", "10.0.0.100:40002").into_client();
    let instance = h.manager.connected(client.clone()).await;
    assert!(eventually(|| instance.has_ownership()).await);

    h.manager.disconnected(&client);
    let entity = device.entity();
    assert!(h.manager.connection(instance.key()).is_none());
    assert!(h.manager.entities().get(&entity).is_none());
    assert_eq!(instance.phase(), OwnershipPhase::Closed);
    assert!(!instance.has_registration());
    assert!(h.cluster.candidates(&entity).is_empty());

    assert!(eventually(|| h.store.cleanups().len() == 2).await);
    assert!(h.store.cleanups().iter().all(|(e, _)| *e == entity));
}

#[tokio::test]
/// an ownerless change for an unknown entity cleans up once for the lost
/// owner and once more for the entity, leaving the same state both times
async fn test_unresolved_cleanup() {
    let h = Harness::new("a");
    let node_id = NodeId::from_global_uuid(Uuid::new_v4());
    let entity = node_id.to_entity("hwvtep");
    h.store.inner.update(&node_id, |state: &mut OperationalState| {
        state.put_row(
            "Physical_Switch",
            Uuid::new_v4(),
            [("name".to_owned(), Value::from("tor-1"))].into(),
        );
    });
    h.store
        .inner
        .update(&NodeId::new("hwvtep://other"), |state: &mut OperationalState| {
            state.put_row("Physical_Switch", Uuid::new_v4(), Default::default());
        });

    let outcome = h
        .manager
        .arbiter()
        .on_ownership_changed(OwnershipChange::new(entity.clone(), true, false, false))
        .await;
    assert_eq!(outcome, OwnershipOutcome::Unresolved { cleanups: 2 });
    assert_eq!(h.store.cleanups(), [(entity.clone(), 1), (entity.clone(), 1)]);

    let outcome = h
        .manager
        .arbiter()
        .on_ownership_changed(OwnershipChange::new(entity.clone(), false, false, false))
        .await;
    assert_eq!(outcome, OwnershipOutcome::Unresolved { cleanups: 1 });

    // somebody still owns it; nothing to clean
    let outcome = h
        .manager
        .arbiter()
        .on_ownership_changed(OwnershipChange::new(entity, false, false, true))
        .await;
    assert_eq!(outcome, OwnershipOutcome::Unresolved { cleanups: 0 });
    assert_eq!(h.store.cleanups().len(), 3);
}

#[tokio::test]
#[traced_test]
/// a new session for a known device replaces the old one, whose candidacy
/// is gone before the new one registers
async fn test_replacing_client() {
    let h = Harness::new("a").started();
    let (first, old_client) = FakeDevice::new("10.0.0.4:6640", "10.0.0.100:40003").into_client();
    let old = h.manager.connected(old_client.clone()).await;
    assert!(eventually(|| old.has_ownership()).await);

    let (second, new_client) = first.reconnect("10.0.0.100:40004").into_client();
    let new = h.manager.connected(new_client).await;
    assert!(!Arc::ptr_eq(&old, &new));
    assert!(!first.is_connected());
    assert_eq!(first.disconnects(), 1);
    assert_eq!(old.phase(), OwnershipPhase::Closed);
    // node id was known, so the new session skipped the identification query
    assert!(second.batches().is_empty());
    assert_eq!(new.node_id(), old.node_id());

    let entity = second.entity();
    assert_eq!(h.cluster.candidates(&entity), ["a"]);
    assert!(eventually(|| new.has_ownership()).await);
    let current = h.manager.entities().get(&entity).unwrap();
    assert!(Arc::ptr_eq(&current, &new));
    assert!(eventually(|| h
        .manager
        .connection(new.key())
        .is_some_and(|c| Arc::ptr_eq(&c, &new)))
    .await);

    // the stale session closing later leaves the new one alone
    h.manager.disconnected(&old_client);
    assert!(logs_contain("disconnect did not find a current connection instance"));
    assert!(Arc::ptr_eq(&h.manager.connection(new.key()).unwrap(), &new));
    assert_eq!(h.cluster.candidates(&entity), ["a"]);
}

#[tokio::test]
/// re-delivering the same session changes nothing
async fn test_same_client_is_reused() {
    let h = Harness::new("a").started();
    let (device, client) = FakeDevice::new("10.0.0.5:6640", "10.0.0.100:40005").into_client();
    let first = h.manager.connected(client.clone()).await;
    assert!(eventually(|| first.has_ownership()).await);
    assert!(eventually(|| h.registration.count() == 1).await);

    let again = h.manager.connected(client).await;
    assert!(Arc::ptr_eq(&first, &again));
    assert!(again.has_ownership());
    assert_eq!(device.disconnects(), 0);
    assert_eq!(device.batches().len(), 1);
    assert_eq!(h.cluster.candidates(&device.entity()), ["a"]);
    assert_eq!(h.registration.count(), 1);
}

#[tokio::test]
/// the ownership flag follows notifications in delivery order
async fn test_notifications_applied_in_order() {
    // not started: notifications are fed by hand
    let h = Harness::new("a");
    let (device, client) = FakeDevice::new("10.0.0.6:6640", "10.0.0.100:40006").into_client();
    let instance = h.manager.connected(client).await;
    assert_eq!(instance.phase(), OwnershipPhase::Candidate);
    let entity = device.entity();
    let arbiter = h.manager.arbiter();

    let granted = OwnershipChange::new(entity.clone(), false, true, true);
    assert_eq!(arbiter.on_ownership_changed(granted.clone()).await, OwnershipOutcome::Granted);
    assert_eq!(arbiter.on_ownership_changed(granted).await, OwnershipOutcome::Unchanged);
    assert!(instance.has_ownership());
    assert!(eventually(|| h.registration.count() == 1).await);

    let revoked = OwnershipChange::new(entity, true, false, true);
    assert_eq!(arbiter.on_ownership_changed(revoked).await, OwnershipOutcome::Revoked);
    assert!(!instance.has_ownership());
    assert_eq!(instance.phase(), OwnershipPhase::NotOwner);
    // revocation does not unregister anything
    assert_eq!(h.registration.count(), 1);
    assert!(h.manager.connection(instance.key()).is_some());
}

#[tokio::test]
#[traced_test]
/// a device that cannot be identified is neither registered nor cached
async fn test_unidentified_device_is_skipped() {
    let h = Harness::new("a").started();
    let (empty, client) = FakeDevice::without_global_row("10.0.0.7:6640", "10.0.0.100:40007").into_client();
    let instance = h.manager.connected(client).await;
    assert_eq!(instance.phase(), OwnershipPhase::Unregistered);
    assert!(instance.node_id().is_none());
    assert!(h.manager.connection(instance.key()).is_none());
    assert!(h.manager.entities().is_empty());
    assert_eq!(empty.batches().len(), 1);
    assert!(logs_contain("unable to derive entity"));

    let failing = FakeDevice::new("10.0.0.8:6640", "10.0.0.100:40008");
    failing.fail(true);
    let (failing, client) = failing.into_client();
    let instance = h.manager.connected(client).await;
    assert_eq!(instance.phase(), OwnershipPhase::Unregistered);
    assert!(h.manager.entities().is_empty());
    assert!(h.cluster.candidates(&failing.entity()).is_empty());
}

#[tokio::test]
/// ownership moves to the surviving controller when the owner's session ends
async fn test_failover_between_controllers() {
    let cluster = LocalCluster::new();
    let a = Harness::with_cluster(cluster.clone(), "a", Vec::new()).started();
    let b = Harness::with_cluster(cluster.clone(), "b", Vec::new()).started();
    let (to_a, client_a) = FakeDevice::new("10.0.0.9:6640", "10.0.0.100:40009").into_client();
    let (_to_b, client_b) = to_a.reconnect("10.0.0.101:40009").into_client();

    let on_a = a.manager.connected(client_a.clone()).await;
    assert!(eventually(|| on_a.has_ownership()).await);
    let on_b = b.manager.connected(client_b).await;
    assert_eq!(on_b.phase(), OwnershipPhase::NotOwner);
    assert_eq!(cluster.candidates(&to_a.entity()), ["a", "b"]);

    a.manager.disconnected(&client_a);
    assert!(eventually(|| on_b.has_ownership()).await);
    assert_eq!(cluster.owner(&to_a.entity()).as_deref(), Some("b"));
    assert!(eventually(|| b.registration.count() == 1).await);
    assert!(eventually(|| a.registration.count() == 1).await);
    // someone still owns it, so nothing is cleaned up
    assert!(a.store.cleanups().is_empty());
}

#[tokio::test]
/// closing the manager disconnects every device and withdraws every candidacy
async fn test_close_disconnects_everything() {
    let h = Harness::new("a").started();
    let (one, c1) = FakeDevice::new("10.0.0.10:6640", "10.0.0.100:40010").into_client();
    let (two, c2) = FakeDevice::new("10.0.0.11:6640", "10.0.0.100:40011").into_client();
    let i1 = h.manager.connected(c1).await;
    let i2 = h.manager.connected(c2).await;
    assert!(eventually(|| i1.has_ownership() && i2.has_ownership()).await);
    assert_eq!(h.manager.registry().len(), 2);

    h.manager.close().await;
    assert!(!one.is_connected() && !two.is_connected());
    assert!(h.manager.registry().is_empty());
    assert!(h.manager.entities().is_empty());
    assert!(h.cluster.candidates(&one.entity()).is_empty());
    assert!(h.cluster.candidates(&two.entity()).is_empty());
    assert_eq!(i1.phase(), OwnershipPhase::Closed);
}

#[tokio::test]
/// candidates that never heard back from the cluster are closed as well
async fn test_close_reaches_pending_candidates() {
    // not started: no notification ever arrives
    let h = Harness::new("a");
    let (device, client) = FakeDevice::new("10.0.0.12:6640", "10.0.0.100:40012").into_client();
    let instance = h.manager.connected(client).await;
    assert_eq!(instance.phase(), OwnershipPhase::Candidate);
    assert!(h.manager.registry().is_empty());
    assert_eq!(h.cluster.candidates(&device.entity()), ["a"]);

    h.manager.close().await;
    assert!(!device.is_connected());
    assert_eq!(device.disconnects(), 1);
    assert_eq!(instance.phase(), OwnershipPhase::Closed);
    assert!(!instance.has_registration());
    assert!(h.manager.entities().is_empty());
    assert!(h.cluster.candidates(&device.entity()).is_empty());
}

/// Holds every registration until permits are added.
#[derive(Debug)]
struct GatedRegistration {
    gate: Semaphore,
    done: AtomicUsize,
}

#[async_trait]
impl CommandRegistration for GatedRegistration {
    async fn register(&self, _instance: &Arc<ConnectionInstance>) -> Result<()> {
        let _permit = self.gate.acquire().await?;
        self.done.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
/// a device stuck registering callbacks does not hold up the next notification
async fn test_slow_registration_does_not_stall_notifications() {
    let cluster = LocalCluster::new();
    let registration = Arc::new(GatedRegistration {
        gate: Semaphore::new(0),
        done: AtomicUsize::new(0),
    });
    let settings = DeviceSettings {
        member: "a".to_owned(),
        ..DeviceSettings::default()
    };
    let manager = DeviceManager::builder(settings, Arc::new(cluster.member("a")))
        .command_registration(registration.clone())
        .build();
    let (one, c1) = FakeDevice::new("10.0.0.13:6640", "10.0.0.100:40013").into_client();
    let (two, c2) = FakeDevice::new("10.0.0.14:6640", "10.0.0.100:40014").into_client();
    let i1 = manager.connected(c1).await;
    let i2 = manager.connected(c2).await;

    for device in [&one, &two] {
        let granted = OwnershipChange::new(device.entity(), false, true, true);
        let outcome = timeout(
            Duration::from_secs(1),
            manager.arbiter().on_ownership_changed(granted),
        )
        .await
        .unwrap();
        assert_eq!(outcome, OwnershipOutcome::Granted);
    }
    assert!(i1.has_ownership() && i2.has_ownership());
    assert_eq!(registration.done.load(Ordering::SeqCst), 0);

    registration.gate.add_permits(2);
    assert!(eventually(|| registration.done.load(Ordering::SeqCst) == 2).await);
}
