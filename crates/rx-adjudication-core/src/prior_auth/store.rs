//! Storage for prior authorization records.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::PaRecord;

use super::{PriorAuthError, PriorAuthResult};

/// Record storage keyed by request id.
///
/// `update` must run the closure and persist its result as one step per
/// request id, so two decisions on the same request both land in history.
pub trait PaStore: Send + Sync {
    fn insert(&self, record: &PaRecord) -> PriorAuthResult<()>;

    fn get(&self, request_id: &str) -> PriorAuthResult<Option<PaRecord>>;

    fn update(
        &self,
        request_id: &str,
        apply: &mut dyn FnMut(&mut PaRecord) -> PriorAuthResult<()>,
    ) -> PriorAuthResult<PaRecord>;

    fn records_for_member(&self, member_id: &str) -> PriorAuthResult<Vec<PaRecord>>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryPaStore {
    records: Mutex<HashMap<String, PaRecord>>,
}

impl InMemoryPaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PaStore for InMemoryPaStore {
    fn insert(&self, record: &PaRecord) -> PriorAuthResult<()> {
        let mut records = self.records.lock()?;
        if records.contains_key(record.request_id()) {
            return Err(PriorAuthError::InvalidRequest(format!(
                "duplicate request id {}",
                record.request_id()
            )));
        }
        records.insert(record.request_id().to_string(), record.clone());
        Ok(())
    }

    fn get(&self, request_id: &str) -> PriorAuthResult<Option<PaRecord>> {
        let records = self.records.lock()?;
        Ok(records.get(request_id).cloned())
    }

    fn update(
        &self,
        request_id: &str,
        apply: &mut dyn FnMut(&mut PaRecord) -> PriorAuthResult<()>,
    ) -> PriorAuthResult<PaRecord> {
        let mut records = self.records.lock()?;
        let record = records
            .get_mut(request_id)
            .ok_or_else(|| PriorAuthError::NotFound(request_id.to_string()))?;
        // work on a copy so a failed closure leaves the stored record intact
        let mut updated = record.clone();
        apply(&mut updated)?;
        *record = updated.clone();
        Ok(updated)
    }

    fn records_for_member(&self, member_id: &str) -> PriorAuthResult<Vec<PaRecord>> {
        let records = self.records.lock()?;
        let mut found: Vec<PaRecord> = records
            .values()
            .filter(|r| r.request.member_id == member_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.request.submitted_at.cmp(&b.request.submitted_at));
        Ok(found)
    }
}
