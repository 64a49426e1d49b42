use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::ControlStoreError;
use crate::model::RunControlState;

/// Storage for run control records, written by whatever reacts to operator
/// actions and read by the completion poller.
#[async_trait::async_trait]
pub trait RunControlStore: Send + Sync {
    /// Reads the current record, `None` when the run is unknown to the store.
    async fn read_run_status(
        &self,
        run_id: uuid::Uuid,
    ) -> Result<Option<RunControlState>, ControlStoreError>;

    async fn write_run_status(
        &self,
        run_id: uuid::Uuid,
        state: RunControlState,
    ) -> Result<(), ControlStoreError>;
}

/// Whether the store currently asks `run_id` to stop.
///
/// Read failures count as "no stop requested"; the next stop check retries.
pub(crate) async fn stop_requested(store: &dyn RunControlStore, run_id: uuid::Uuid) -> bool {
    match store.read_run_status(run_id).await {
        Ok(Some(state)) => state.is_stop_request(),
        Ok(None) => false,
        Err(err) => {
            tracing::warn!(run_id = %run_id, error = %err, "failed to read run control state");
            false
        }
    }
}

/// Process-local control store.
#[derive(Default)]
pub struct MemoryControlStore {
    states: RwLock<HashMap<uuid::Uuid, RunControlState>>,
}

impl MemoryControlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `run_id` as stopped by the operator.
    pub fn request_stop(&self, run_id: uuid::Uuid) -> Result<(), ControlStoreError> {
        self.put(run_id, RunControlState::stopped_by_user())
    }

    pub fn put(&self, run_id: uuid::Uuid, state: RunControlState) -> Result<(), ControlStoreError> {
        self.states
            .write()
            .map_err(|_| ControlStoreError("control store lock poisoned".into()))?
            .insert(run_id, state);
        Ok(())
    }

    pub fn get(&self, run_id: uuid::Uuid) -> Option<RunControlState> {
        self.states
            .read()
            .ok()
            .and_then(|states| states.get(&run_id).cloned())
    }
}

#[async_trait::async_trait]
impl RunControlStore for MemoryControlStore {
    async fn read_run_status(
        &self,
        run_id: uuid::Uuid,
    ) -> Result<Option<RunControlState>, ControlStoreError> {
        let states = self
            .states
            .read()
            .map_err(|_| ControlStoreError("control store lock poisoned".into()))?;
        Ok(states.get(&run_id).cloned())
    }

    async fn write_run_status(
        &self,
        run_id: uuid::Uuid,
        state: RunControlState,
    ) -> Result<(), ControlStoreError> {
        self.put(run_id, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;

    #[tokio::test]
    async fn stop_requested_follows_sentinel() {
        let store = MemoryControlStore::new();
        let run_id = uuid::Uuid::new_v4();
        assert!(!stop_requested(&store, run_id).await);

        store
            .put(run_id, RunControlState::new(RunStatus::Running))
            .expect("put running");
        assert!(!stop_requested(&store, run_id).await);

        store.request_stop(run_id).expect("request stop");
        assert!(stop_requested(&store, run_id).await);
    }
}
