//! The table fixture: an ephemeral Gridstore table provisioned around a
//! test and torn down afterwards.

use std::time::Duration;

use gridstore_client::{Client, ConnectionConfig, Error as ClientError, TableClient};
use gridstore_types::{Item, TableDefinition, TableStatus};
use tracing::{debug, info};

use crate::emulator::EmulatorHandle;
use crate::error::{FixtureError, Result};
use crate::reconcile::{self, RetryPolicy};
use crate::steps::{FCustom, Step, StepTest};

/// How long table state polls sleep between rounds.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which backend a [`TableFixture`] provisions against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The process-shared local emulator.
    Mocked,
    /// The live service.
    Live,
}

/// An ephemeral table for one test.
///
/// In [`Mode::Mocked`] the fixture holds a handle on the process-shared
/// emulator; in [`Mode::Live`] it points at the real service. Either way
/// the table gets a fresh `test-<project>-<hex>` name so concurrent
/// fixtures never collide, and the same lifecycle calls work against both
/// backends.
#[derive(Debug)]
pub struct TableFixture {
    mode: Mode,
    table_name: String,
    definition: TableDefinition,
    config: ConnectionConfig,
    client: Client,
    table: TableClient,
    retry_policy: RetryPolicy,
    running: bool,
    emulator: Option<EmulatorHandle>,
}

impl TableFixture {
    /// A fixture backed by the process-shared local emulator.
    ///
    /// The emulator itself is not touched until [`start`](Self::start),
    /// which acquires a handle on it and spawns it if no other fixture
    /// holds one.
    pub fn mocked(project: &str, definition: TableDefinition) -> Result<Self> {
        let config = ConnectionConfig::local(gridstore_emulator::DEFAULT_PORT)?;
        Ok(Self::new(Mode::Mocked, project, definition, config))
    }

    /// A fixture against the live service in `region`.
    pub fn live(project: &str, definition: TableDefinition, region: &str) -> Result<Self> {
        let config = ConnectionConfig::live(region)?;
        Ok(Self::new(Mode::Live, project, definition, config))
    }

    fn new(
        mode: Mode,
        project: &str,
        definition: TableDefinition,
        config: ConnectionConfig,
    ) -> Self {
        let table_name = crate::ephemeral_table_name(project);
        let definition = definition.rename(&table_name);
        let client = Client::new(config.clone());
        let table = client.table(&table_name);
        Self {
            mode,
            table_name,
            definition,
            config,
            client,
            table,
            retry_policy: RetryPolicy::default(),
            running: false,
            emulator: None,
        }
    }

    /// Use `table_name` verbatim instead of the generated one.
    ///
    /// Fixed names let a test share a table with code outside the fixture,
    /// at the cost of colliding if two suites pick the same name. Only
    /// meaningful before [`start`](Self::start).
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self.definition = self.definition.rename(&self.table_name);
        self.table = self.client.table(&self.table_name);
        self
    }

    /// Point the fixture at a different endpoint, keeping everything else.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        self.config = self.config.clone().with_endpoint(endpoint)?;
        self.rebuild_clients();
        Ok(self)
    }

    /// Send this `Bearer` token with every request.
    pub fn with_auth_token(mut self, auth_token: &str) -> Self {
        self.config = self.config.clone().with_auth_token(auth_token);
        self.rebuild_clients();
        self
    }

    /// Replace the unprocessed-entry retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn rebuild_clients(&mut self) {
        self.client = Client::new(self.config.clone());
        self.table = self.client.table(&self.table_name);
    }

    /// Which backend this fixture provisions against.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The fixture's table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// The table definition, renamed to the fixture's table name.
    pub fn table_def(&self) -> &TableDefinition {
        &self.definition
    }

    /// The connection the fixture's clients are built from.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Admin handle on the fixture's endpoint.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Item handle on the fixture's table.
    pub fn table(&self) -> &TableClient {
        &self.table
    }

    /// Whether [`start`](Self::start) has run and the table is up.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The shared-emulator handle, for mocked fixtures.
    pub fn emulator(&self) -> Option<&EmulatorHandle> {
        self.emulator.as_ref()
    }

    /// Create the table and wait until it reports active.
    ///
    /// In mocked mode this first ensures the shared emulator is up. Does
    /// nothing if this fixture already started the table. A create
    /// rejection (a fixed name already taken, say) is fatal rather than
    /// retried.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            debug!(table_name = %self.table_name, "table already running");
            return Ok(());
        }

        if self.mode == Mode::Mocked && self.emulator.is_none() {
            self.emulator = Some(EmulatorHandle::acquire().await?);
        }

        info!(table_name = %self.table_name, mode = ?self.mode, "creating table");
        self.client.create_table(&self.definition).await?;
        self.wait_until("active", |status| status == Some(TableStatus::Active))
            .await?;
        self.running = true;
        Ok(())
    }

    /// Delete the table and wait until it is gone.
    ///
    /// Does nothing if the table is not running.
    pub async fn delete(&mut self) -> Result<()> {
        if !self.running {
            debug!(table_name = %self.table_name, "table not running");
            return Ok(());
        }

        info!(table_name = %self.table_name, "deleting table");
        match self.client.delete_table(&self.table_name).await {
            Ok(()) | Err(ClientError::TableNotFound { .. }) => {}
            Err(error) => return Err(error.into()),
        }
        self.wait_until("deleted", |status| status.is_none()).await?;
        self.running = false;
        Ok(())
    }

    /// Bring the table to zero rows, creating it first if needed.
    ///
    /// Against the emulator the cheapest route is dropping and recreating
    /// the table. Against the live service the table is scanned and every
    /// key batch-deleted, so other tables and capacity stay untouched.
    pub async fn empty(&mut self) -> Result<()> {
        self.start().await?;
        info!(table_name = %self.table_name, "emptying table");
        match self.mode {
            Mode::Mocked => {
                self.delete().await?;
                self.start().await
            }
            Mode::Live => {
                reconcile::delete_all(&self.table, &self.definition, &self.retry_policy).await
            }
        }
    }

    /// Load fixture items into the table, creating it first if needed.
    ///
    /// Items go out in service-size batches with bounded concurrency, and
    /// unprocessed residue is resubmitted per the fixture's retry policy.
    pub async fn load(&mut self, items: Vec<Item>) -> Result<()> {
        self.start().await?;
        info!(table_name = %self.table_name, count = items.len(), "loading fixture items");
        reconcile::put_all(&self.table, items, &self.retry_policy).await
    }

    /// Run `body` as a named test: empty the table, load `fixtures` (when
    /// non-empty), run the body, and empty the table again.
    ///
    /// Step failures panic so they surface through the host test.
    pub async fn run_test(&mut self, name: &str, fixtures: Vec<Item>, body: FCustom) {
        let mut steps = vec![Step::Empty];
        if !fixtures.is_empty() {
            steps.push(Step::Load(fixtures));
        }
        steps.push(Step::Custom(body));
        steps.push(Step::Empty);

        info!(table_name = %self.table_name, "running test {name:?}");
        StepTest::new(self, steps).run().await;
    }

    /// Tear the fixture down: delete the table and release its hold on the
    /// shared emulator, stopping the emulator when this was the last
    /// holder.
    ///
    /// Live fixtures have nothing to stop and refuse the call.
    pub async fn close(&mut self) -> Result<()> {
        if self.mode == Mode::Live {
            return Err(FixtureError::CloseInLiveMode);
        }

        self.delete().await?;
        if let Some(emulator) = self.emulator.take() {
            emulator.close().await;
        }
        Ok(())
    }

    /// Poll the table description until `done` accepts its status, with
    /// `None` standing for a missing table.
    async fn wait_until(
        &self,
        waiting_for: &'static str,
        done: impl Fn(Option<TableStatus>) -> bool + Send,
    ) -> Result<()> {
        // Provisioning on the live service can take minutes; the emulator
        // transitions instantly.
        let timeout = match self.mode {
            Mode::Mocked => Duration::from_secs(10),
            Mode::Live => Duration::from_secs(300),
        };
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let status = match self.client.describe_table(&self.table_name).await {
                Ok(description) => Some(description.status),
                Err(ClientError::TableNotFound { .. }) => None,
                Err(error) => return Err(error.into()),
            };
            if done(status) {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(FixtureError::WaitTimeout {
                    table_name: self.table_name.clone(),
                    waiting_for,
                    after: timeout,
                });
            }
            debug!(table_name = %self.table_name, ?status, waiting_for, "table not ready yet");
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}
