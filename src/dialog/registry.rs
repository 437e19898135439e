//! Process-wide dialog cache.
//!
//! One [`Dialog`] per participant, created on first lookup and kept for the
//! lifetime of the process (no eviction). Each entry sits behind its own
//! async mutex, so reconcile, transition and persist of one participant
//! never interleave while different participants proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::Error;

use super::machine::{Dialog, DialogDeps};

pub type SharedDialog = Arc<tokio::sync::Mutex<Dialog>>;

pub struct DialogRegistry {
    deps: Arc<DialogDeps>,
    dialogs: Mutex<HashMap<String, SharedDialog>>,
}

impl DialogRegistry {
    pub fn new(deps: Arc<DialogDeps>) -> Self {
        Self {
            deps,
            dialogs: Mutex::new(HashMap::new()),
        }
    }

    pub fn deps(&self) -> &Arc<DialogDeps> {
        &self.deps
    }

    /// Dialog of a known participant, recording the visit.
    ///
    /// Returns `None` when the participant has no stored record.
    pub async fn get(&self, participant_id: &str) -> Result<Option<SharedDialog>, Error> {
        let Some(participant) = self.deps.db.get_participant(participant_id).await? else {
            return Ok(None);
        };
        self.deps.db.touch_participant(participant_id).await?;

        let mut dialogs = self.dialogs.lock().unwrap_or_else(|e| e.into_inner());
        let dialog = dialogs
            .entry(participant_id.to_string())
            .or_insert_with(|| {
                debug!(participant = %participant_id, "Caching new dialog");
                Arc::new(tokio::sync::Mutex::new(Dialog::new(self.deps.clone(), participant)))
            })
            .clone();
        Ok(Some(dialog))
    }

    /// Number of cached dialogs.
    pub fn len(&self) -> usize {
        self.dialogs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
