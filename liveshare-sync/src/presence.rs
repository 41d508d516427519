//! Membership and cursor awareness.
//!
//! ```text
//! userJoined / sessionJoined ──► PresenceRoom::join (palette colour fixed here)
//! cursorUpdate               ──► PresenceRoom::update_cursor
//! activeFileChange           ──► PresenceRoom::set_active_document
//!                                      │
//!                                      ▼
//!                            PresenceSnapshot ──► EditorHost::render_presence
//!
//! local caret move ──► CursorThrottle ──► cursorUpdate (at most one per interval,
//!                                          trailing update kept)
//! ```
//!
//! Membership only changes in response to relay messages. Cursor and
//! active-document updates for users the room does not know are dropped.

use std::time::Duration;
use tokio::time::Instant;

use liveshare_core::{CursorColor, DocumentKey, Position, TextRange, User, UserId};

// ───────────────────────────────────────────────────────────────────
// Room
// ───────────────────────────────────────────────────────────────────

/// Members of the current session, local user included, in join order.
#[derive(Debug, Clone)]
pub struct PresenceRoom {
    local: UserId,
    members: Vec<User>,
}

impl PresenceRoom {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            members: Vec::new(),
        }
    }

    pub fn local_id(&self) -> &UserId {
        &self.local
    }

    /// Add a member, or refresh the name of a known one. A member's colour
    /// is picked once, from the member count at the time they joined.
    ///
    /// Returns true if the member is new.
    pub fn join(&mut self, id: UserId, display_name: &str) -> bool {
        if let Some(existing) = self.members.iter_mut().find(|m| m.id == id) {
            existing.display_name = display_name.to_string();
            return false;
        }
        let color = CursorColor::for_member_count(self.members.len());
        self.members.push(User::new(id, display_name, color));
        true
    }

    pub fn leave(&mut self, id: &UserId) -> Option<User> {
        let index = self.members.iter().position(|m| &m.id == id)?;
        Some(self.members.remove(index))
    }

    /// Replace the membership with an authoritative list. Members already
    /// present keep their colour; the local user is always kept.
    pub fn replace_members(&mut self, listed: Vec<(UserId, String, Option<DocumentKey>)>) {
        let local = self.local.clone();
        self.members
            .retain(|m| m.id == local || listed.iter().any(|(id, _, _)| id == &m.id));
        for (id, name, active) in listed {
            self.join(id.clone(), &name);
            if active.is_some() {
                self.set_active_document(&id, active);
            }
        }
    }

    pub fn update_cursor(
        &mut self,
        id: &UserId,
        document: &DocumentKey,
        cursor: Option<Position>,
        selection: Option<TextRange>,
    ) -> bool {
        let Some(member) = self.member_mut(id) else {
            log::debug!("Cursor update for unknown member {id}");
            return false;
        };
        member.cursor = cursor;
        member.selection = selection;
        member.active_document = Some(document.clone());
        true
    }

    pub fn set_active_document(&mut self, id: &UserId, document: Option<DocumentKey>) -> bool {
        let Some(member) = self.member_mut(id) else {
            log::debug!("Active document change for unknown member {id}");
            return false;
        };
        if member.active_document != document {
            member.cursor = None;
            member.selection = None;
        }
        member.active_document = document;
        true
    }

    /// Mark exactly one member (or none) as followed.
    pub fn set_following(&mut self, target: Option<&UserId>) {
        for member in &mut self.members {
            member.following = Some(&member.id) == target;
        }
    }

    /// The relay assigned the local user a different id.
    pub fn rekey_local(&mut self, id: UserId) {
        let old = std::mem::replace(&mut self.local, id.clone());
        if let Some(member) = self.member_mut(&old) {
            member.id = id;
        }
    }

    pub fn member(&self, id: &UserId) -> Option<&User> {
        self.members.iter().find(|m| &m.id == id)
    }

    pub fn members(&self) -> &[User] {
        &self.members
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.member(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of members other than the local user.
    pub fn peer_count(&self) -> usize {
        self.members.iter().filter(|m| m.id != self.local).count()
    }

    pub fn display_name(&self, id: &UserId) -> Option<&str> {
        self.member(id).map(|m| m.display_name.as_str())
    }

    /// Remote members, ready for rendering.
    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            users: self
                .members
                .iter()
                .filter(|m| m.id != self.local)
                .cloned()
                .collect(),
        }
    }

    fn member_mut(&mut self, id: &UserId) -> Option<&mut User> {
        self.members.iter_mut().find(|m| &m.id == id)
    }
}

/// What the editor should draw for remote participants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSnapshot {
    pub users: Vec<User>,
}

impl PresenceSnapshot {
    /// Remote users currently looking at `document`.
    pub fn in_document<'a>(&'a self, document: &'a DocumentKey) -> impl Iterator<Item = &'a User> {
        self.users
            .iter()
            .filter(move |u| u.active_document.as_ref() == Some(document))
    }

    pub fn followed(&self) -> Option<&User> {
        self.users.iter().find(|u| u.following)
    }
}

// ───────────────────────────────────────────────────────────────────
// Outgoing cursor rate limit
// ───────────────────────────────────────────────────────────────────

/// Sends at most one update per interval. An update that arrives too soon
/// is held and sent when the interval expires, so the last position
/// always gets out.
#[derive(Debug)]
pub struct CursorThrottle<T> {
    interval: Duration,
    last_sent: Option<Instant>,
    pending: Option<T>,
}

impl<T> CursorThrottle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            pending: None,
        }
    }

    /// Offer an update. Returns it if it may be sent now; otherwise it
    /// replaces any held update.
    pub fn offer(&mut self, now: Instant, update: T) -> Option<T> {
        match self.last_sent {
            Some(last) if now < last + self.interval => {
                self.pending = Some(update);
                None
            }
            _ => {
                self.last_sent = Some(now);
                self.pending = None;
                Some(update)
            }
        }
    }

    /// When a held update becomes sendable.
    pub fn deadline(&self) -> Option<Instant> {
        match (&self.pending, self.last_sent) {
            (Some(_), Some(last)) => Some(last + self.interval),
            _ => None,
        }
    }

    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.last_sent = Some(now);
        self.pending.take()
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
        self.pending = None;
    }
}
