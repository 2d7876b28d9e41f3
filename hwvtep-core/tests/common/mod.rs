#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use hwvtep_core::{
    DeviceManager,
    config::DeviceSettings,
    entity_ownership::{Entity, LocalCluster},
    operational::MemoryOperationalStore,
    ovsdb_ops::{
        AtomicType, ColumnSchema, ColumnType, ConstructionError, DatabaseSchema, Insert,
        Operation, OperationResult, Row, TableSchema, TransactionBuilder, TransportError,
        UUID_COLUMN, Value,
    },
    ownership::CommandRegistration,
    prelude::*,
};
use parking_lot::Mutex;
use uuid::Uuid;

pub const LOGICAL_SWITCH: &str = "Logical_Switch";

pub fn vtep_schema() -> DatabaseSchema {
    DatabaseSchema::new(
        "hardware_vtep",
        "1.3.0",
        [
            TableSchema::new(
                "Global",
                [
                    ColumnSchema::new("switches", ColumnType::set(AtomicType::Uuid)),
                    ColumnSchema::new("other_config", ColumnType::map(AtomicType::String, AtomicType::String)),
                ],
            ),
            TableSchema::new(
                "Physical_Switch",
                [
                    ColumnSchema::new("name", ColumnType::scalar(AtomicType::String)),
                    ColumnSchema::new("tunnel_ips", ColumnType::set(AtomicType::String)),
                ],
            ),
            TableSchema::new(
                LOGICAL_SWITCH,
                [
                    ColumnSchema::new("name", ColumnType::scalar(AtomicType::String)),
                    ColumnSchema::new("tunnel_key", ColumnType::optional(AtomicType::Integer)),
                ],
            ),
        ],
    )
}

/// A device session answering from memory.
#[derive(Debug)]
pub struct FakeDevice {
    info: ConnectionInfo,
    global: Option<Uuid>,
    delay: Option<Duration>,
    connected: AtomicBool,
    failing: AtomicBool,
    monitors: AtomicUsize,
    disconnects: AtomicUsize,
    batches: Mutex<Vec<Vec<Operation>>>,
}

impl FakeDevice {
    pub fn new(remote: &str, local: &str) -> Self {
        Self::build(remote, local, Some(Uuid::new_v4()))
    }

    /// a device whose global table is empty
    pub fn without_global_row(remote: &str, local: &str) -> Self {
        Self::build(remote, local, None)
    }

    fn build(remote: &str, local: &str, global: Option<Uuid>) -> Self {
        Self {
            info: ConnectionInfo::new(addr(remote), addr(local)),
            global,
            delay: None,
            connected: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            monitors: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// answers every transaction after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// same device identity, answered by a fresh session
    pub fn reconnect(&self, local: &str) -> Self {
        let mut device = Self::build(&self.info.remote.to_string(), local, self.global);
        device.delay = self.delay;
        device
    }

    pub fn into_client(self) -> (Arc<FakeDevice>, Client) {
        let device = Arc::new(self);
        let client: Client = device.clone();
        (device, client)
    }

    pub fn global_uuid(&self) -> Option<Uuid> {
        self.global
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::from_global_uuid(self.global.unwrap_or_default())
    }

    pub fn entity(&self) -> Entity {
        self.node_id().to_entity(&DeviceSettings::default().entity_type)
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn monitors(&self) -> usize {
        self.monitors.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// every batch applied so far
    pub fn batches(&self) -> Vec<Vec<Operation>> {
        self.batches.lock().clone()
    }

    /// applied inserts into `table`
    pub fn inserts(&self, table: &str) -> usize {
        self.batches
            .lock()
            .iter()
            .flatten()
            .filter(|op| matches!(op, Operation::Insert(_)) && op.table() == Some(table))
            .count()
    }

    fn check(&self) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionLost(self.info.remote.to_string()));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("device unavailable".to_owned()));
        }
        Ok(())
    }

    fn answer(&self, op: &Operation) -> OperationResult {
        match op {
            Operation::Select(_) if op.table() == Some("Global") => OperationResult::Rows(
                self.global
                    .into_iter()
                    .map(|uuid| Row::from([(UUID_COLUMN.to_owned(), Value::from(uuid))]))
                    .collect(),
            ),
            Operation::Select(_) => OperationResult::Rows(Vec::new()),
            Operation::Insert(_) => OperationResult::Uuid(Uuid::new_v4()),
            Operation::Comment(_) => OperationResult::Empty,
            _ => OperationResult::Count(1),
        }
    }
}

#[async_trait]
impl DeviceClient for FakeDevice {
    fn connection_info(&self) -> ConnectionInfo {
        self.info
    }

    async fn schema(&self, database: &str) -> Result<DatabaseSchema, TransportError> {
        self.check()?;
        match database {
            "hardware_vtep" => Ok(vtep_schema()),
            other => Err(TransportError::Rejected(format!("unknown database {other}"))),
        }
    }

    async fn transact(
        &self,
        _schema: &DatabaseSchema,
        operations: Vec<Operation>,
    ) -> Result<Vec<OperationResult>, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        let results = operations.iter().map(|op| self.answer(op)).collect();
        self.batches.lock().push(operations);
        Ok(results)
    }

    async fn monitor(&self, _database: &str) -> Result<(), TransportError> {
        self.check()?;
        self.monitors.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// Counts callback registrations per instance.
#[derive(Debug, Default)]
pub struct CountingRegistration {
    registered: Mutex<Vec<Arc<ConnectionInstance>>>,
}

impl CountingRegistration {
    pub fn count(&self) -> usize {
        self.registered.lock().len()
    }
}

#[async_trait]
impl CommandRegistration for CountingRegistration {
    async fn register(&self, instance: &Arc<ConnectionInstance>) -> Result<()> {
        self.registered.lock().push(instance.clone());
        instance.register_callbacks().await?;
        Ok(())
    }
}

/// Records cleanups and the store contents after each one.
#[derive(Debug, Default)]
pub struct CountingStore {
    pub inner: MemoryOperationalStore,
    cleanups: Mutex<Vec<(Entity, usize)>>,
}

impl CountingStore {
    pub fn cleanups(&self) -> Vec<(Entity, usize)> {
        self.cleanups.lock().clone()
    }
}

#[async_trait]
impl OperationalStore for CountingStore {
    async fn cleanup(&self, entity: &Entity) -> Result<()> {
        self.inner.cleanup(entity).await?;
        self.cleanups
            .lock()
            .push((entity.clone(), self.inner.len()));
        Ok(())
    }

    async fn snapshot(&self, node_id: &NodeId) -> Result<OperationalState> {
        self.inner.snapshot(node_id).await
    }
}

/// Creates a logical switch unless the device already has it.
#[derive(Debug)]
pub struct EnsureLogicalSwitch {
    pub name: String,
}

impl EnsureLogicalSwitch {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into() })
    }
}

impl TransactCommand for EnsureLogicalSwitch {
    fn execute(
        &self,
        tx: &mut TransactionBuilder,
        state: &OperationalState,
        events: &[NodeModification],
    ) -> Result<(), ConstructionError> {
        if events.is_empty() || state.find(LOGICAL_SWITCH, "name", &self.name).is_some() {
            return Ok(());
        }
        let insert = Insert::new(tx.schema().table(LOGICAL_SWITCH)?).value("name", self.name.as_str())?;
        tx.add(insert);
        Ok(())
    }
}

pub struct Harness {
    pub cluster: LocalCluster,
    pub manager: Arc<DeviceManager>,
    pub registration: Arc<CountingRegistration>,
    pub store: Arc<CountingStore>,
}

impl Harness {
    /// manager for member `member` of a fresh cluster, not yet started
    pub fn new(member: &str) -> Self {
        Self::with_cluster(LocalCluster::new(), member, Vec::new())
    }

    pub fn with_cluster(
        cluster: LocalCluster,
        member: &str,
        commands: Vec<Arc<dyn TransactCommand>>,
    ) -> Self {
        let settings = DeviceSettings {
            member: member.to_owned(),
            ..DeviceSettings::default()
        };
        let registration = Arc::new(CountingRegistration::default());
        let store = Arc::new(CountingStore::default());
        let mut builder = DeviceManager::builder(settings, Arc::new(cluster.member(member)))
            .store(store.clone())
            .command_registration(registration.clone());
        for command in commands {
            builder = builder.reconciliation_command(command);
        }
        Self {
            cluster,
            manager: Arc::new(builder.build()),
            registration,
            store,
        }
    }

    pub fn started(self) -> Self {
        self.manager.start().unwrap();
        self
    }
}

/// Polls `cond` until it holds or about a second has passed.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
