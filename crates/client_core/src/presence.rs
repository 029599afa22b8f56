use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{MemberId, MemberStatus},
    protocol::Member,
};
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct PresenceStore {
    members: HashMap<MemberId, Member>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_full_roster(&mut self, members: impl IntoIterator<Item = Member>) {
        self.members = members
            .into_iter()
            .map(|member| {
                let member = normalize(member);
                (member.id.clone(), member)
            })
            .collect();
    }

    pub fn apply_join(&mut self, member: Member) {
        let member = normalize(member);
        self.members.insert(member.id.clone(), member);
    }

    /// Marks a member offline. Unknown ids are stale events and are ignored.
    pub fn apply_leave(&mut self, id: &MemberId, now: DateTime<Utc>) {
        let Some(member) = self.members.get_mut(id) else {
            debug!(member = %id, "presence: leave for unknown member ignored");
            return;
        };
        member.status = MemberStatus::Offline;
        member.socket_id = None;
        member.last_seen = Some(now);
    }

    pub fn remove(&mut self, id: &MemberId) -> Option<Member> {
        self.members.remove(id)
    }

    pub fn get(&self, id: &MemberId) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn find_by_username(&self, username: &str) -> Option<&Member> {
        self.list().into_iter().find(|member| member.username == username)
    }

    pub fn list(&self) -> Vec<&Member> {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by(|a, b| a.username.cmp(&b.username).then_with(|| a.id.cmp(&b.id)));
        members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}

// An online member must carry a connection session id.
fn normalize(mut member: Member) -> Member {
    if member.status == MemberStatus::Online && member.socket_id.is_none() {
        debug!(member = %member.id, "presence: online without session id, marking offline");
        member.status = MemberStatus::Offline;
    }
    member
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
