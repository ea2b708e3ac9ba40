//! Table lifecycle operations as composable, named test steps.

use std::fmt;

use futures::future::BoxFuture;
use gridstore_client::{Client, TableClient};
use gridstore_types::Item;
use tracing::info;

use crate::fixture::TableFixture;

/// Function that can be used to run a custom [`Step`].
pub type FCustom = Box<dyn for<'b> FnOnce(&'b mut StepTestState<'_>) -> BoxFuture<'b, ()> + Send>;

/// Possible test steps.
pub enum Step {
    /// Create the fixture's table and wait for it to be active.
    Create,

    /// Delete the fixture's table and wait for it to be gone.
    Delete,

    /// Bring the fixture's table to zero rows.
    Empty,

    /// Load the given fixture items into the table.
    Load(Vec<Item>),

    /// Tear the fixture down, releasing the shared emulator.
    Close,

    /// Run a custom function with access to the fixture.
    Custom(FCustom),
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Delete => write!(f, "Delete"),
            Self::Empty => write!(f, "Empty"),
            Self::Load(items) => write!(f, "Load({} items)", items.len()),
            Self::Close => write!(f, "Close"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// State passed to custom steps.
#[derive(Debug)]
pub struct StepTestState<'a> {
    fixture: &'a mut TableFixture,
}

impl StepTestState<'_> {
    /// The fixture under test.
    pub fn fixture(&mut self) -> &mut TableFixture {
        self.fixture
    }

    /// Admin handle on the fixture's endpoint.
    pub fn client(&self) -> &Client {
        self.fixture.client()
    }

    /// Item handle on the fixture's table.
    pub fn table(&self) -> &TableClient {
        self.fixture.table()
    }
}

/// Runs a sequence of [`Step`]s against a [`TableFixture`], logging each
/// one.
///
/// Step failures panic so they surface through the host test.
#[derive(Debug)]
pub struct StepTest<'a> {
    fixture: &'a mut TableFixture,
    steps: Vec<Step>,
}

impl<'a> StepTest<'a> {
    pub fn new(fixture: &'a mut TableFixture, steps: Vec<Step>) -> Self {
        Self { fixture, steps }
    }

    /// Run the steps in order.
    pub async fn run(self) {
        let Self { fixture, steps } = self;
        let num_steps = steps.len();
        let mut state = StepTestState { fixture };

        for (i, step) in steps.into_iter().enumerate() {
            info!("**** Running step {} / {}: {:?} ****", i + 1, num_steps, step);
            match step {
                Step::Create => state
                    .fixture
                    .start()
                    .await
                    .expect("create step should succeed"),
                Step::Delete => state
                    .fixture
                    .delete()
                    .await
                    .expect("delete step should succeed"),
                Step::Empty => state
                    .fixture
                    .empty()
                    .await
                    .expect("empty step should succeed"),
                Step::Load(items) => state
                    .fixture
                    .load(items)
                    .await
                    .expect("load step should succeed"),
                Step::Close => state
                    .fixture
                    .close()
                    .await
                    .expect("close step should succeed"),
                Step::Custom(f) => f(&mut state).await,
            }
        }
    }
}
