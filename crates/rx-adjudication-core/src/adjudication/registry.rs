//! Per-member locking for concurrent adjudication.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::models::Member;

use super::{AdjudicationError, AdjudicationResult};

/// Members keyed by id, each behind its own lock.
///
/// Claims for one member serialize on that member's mutex; claims for
/// different members never contend beyond the brief map lookup.
#[derive(Debug, Default)]
pub struct MemberRegistry {
    members: RwLock<HashMap<String, Arc<Mutex<Member>>>>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a member.
    pub fn register(&self, member: Member) -> AdjudicationResult<Arc<Mutex<Member>>> {
        let id = member.member_id.clone();
        let handle = Arc::new(Mutex::new(member));
        self.members.write()?.insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn get(&self, member_id: &str) -> AdjudicationResult<Option<Arc<Mutex<Member>>>> {
        let members = self.members.read()?;
        Ok(members.get(member_id).cloned())
    }

    /// Copy of the member's current state.
    pub fn snapshot(&self, member_id: &str) -> AdjudicationResult<Option<Member>> {
        match self.get(member_id)? {
            Some(handle) => Ok(Some(handle.lock()?.clone())),
            None => Ok(None),
        }
    }

    /// Run `f` while holding the member's lock.
    pub fn with_member<R>(
        &self,
        member_id: &str,
        f: impl FnOnce(&mut Member) -> AdjudicationResult<R>,
    ) -> AdjudicationResult<R> {
        let handle = self
            .get(member_id)?
            .ok_or_else(|| AdjudicationError::MemberNotRegistered(member_id.to_string()))?;
        let mut member = handle.lock()?;
        f(&mut member)
    }

    pub fn len(&self) -> usize {
        self.members.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
