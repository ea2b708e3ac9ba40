use std::time::Duration;

/// Errors a [`TableFixture`](crate::TableFixture) can produce.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error(transparent)]
    Client(#[from] gridstore_client::Error),

    #[error(transparent)]
    Emulator(#[from] gridstore_emulator::Error),

    #[error(transparent)]
    MissingKeyAttribute(#[from] gridstore_types::MissingKeyAttribute),

    #[error("timed out after {after:?} waiting for table '{table_name}' to be {waiting_for}")]
    WaitTimeout {
        table_name: String,
        waiting_for: &'static str,
        after: Duration,
    },

    #[error("{remaining} entries still unprocessed after {attempts} retry rounds")]
    RetriesExhausted { remaining: usize, attempts: u32 },

    #[error("close only applies to fixtures backed by the shared emulator")]
    CloseInLiveMode,
}

pub type Result<T, E = FixtureError> = std::result::Result<T, E>;
