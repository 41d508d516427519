//! Follow mode: the local view tracks another participant's active document.
//!
//! ```text
//!            follow(target)
//!   Idle ───────────────────► Following(target)
//!    ▲                              │
//!    └──── stop / target left / ────┘
//!          local (non-follow) switch
//! ```

use liveshare_core::{DocumentKey, UserId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FollowState {
    #[default]
    Idle,
    Following(UserId),
}

#[derive(Debug, Clone, Default)]
pub struct FollowMode {
    state: FollowState,
}

impl FollowMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start following `target`. Returns the document to jump to, if the
    /// target currently has one open.
    pub fn follow(&mut self, target: UserId, current: Option<DocumentKey>) -> Option<DocumentKey> {
        log::info!("Following {target}");
        self.state = FollowState::Following(target);
        current
    }

    /// Stop following. Returns who was being followed.
    pub fn stop(&mut self) -> Option<UserId> {
        match std::mem::take(&mut self.state) {
            FollowState::Following(target) => Some(target),
            FollowState::Idle => None,
        }
    }

    /// A member left. Returns true if it was the followed user.
    pub fn on_member_left(&mut self, member: &UserId) -> bool {
        if self.target() == Some(member) {
            self.state = FollowState::Idle;
            return true;
        }
        false
    }

    /// The local user switched documents on their own.
    pub fn on_local_switch(&mut self) -> Option<UserId> {
        self.stop()
    }

    /// Where to navigate when `member` changes their active document.
    pub fn on_remote_switch(&self, member: &UserId, document: &DocumentKey) -> Option<DocumentKey> {
        (self.target() == Some(member)).then(|| document.clone())
    }

    pub fn target(&self) -> Option<&UserId> {
        match &self.state {
            FollowState::Following(target) => Some(target),
            FollowState::Idle => None,
        }
    }

    pub fn state(&self) -> &FollowState {
        &self.state
    }

    pub fn is_following(&self) -> bool {
        self.target().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::new(s)
    }

    #[test]
    fn test_follow_jumps_to_current_document() {
        let mut follow = FollowMode::new();
        let jump = follow.follow(uid("b"), Some(DocumentKey::new("x.py")));
        assert_eq!(jump, Some(DocumentKey::new("x.py")));
        assert_eq!(follow.state(), &FollowState::Following(uid("b")));
    }

    #[test]
    fn test_remote_switch_only_for_target() {
        let mut follow = FollowMode::new();
        follow.follow(uid("b"), None);
        let y = DocumentKey::new("y.py");
        assert_eq!(follow.on_remote_switch(&uid("b"), &y), Some(y.clone()));
        assert_eq!(follow.on_remote_switch(&uid("c"), &y), None);
    }

    #[test]
    fn test_local_switch_cancels() {
        let mut follow = FollowMode::new();
        follow.follow(uid("b"), None);
        assert_eq!(follow.on_local_switch(), Some(uid("b")));
        assert!(!follow.is_following());
        assert_eq!(follow.on_local_switch(), None);
    }

    #[test]
    fn test_target_leaving_cancels() {
        let mut follow = FollowMode::new();
        follow.follow(uid("b"), None);
        assert!(!follow.on_member_left(&uid("c")));
        assert!(follow.is_following());
        assert!(follow.on_member_left(&uid("b")));
        assert_eq!(follow.state(), &FollowState::Idle);
    }

    #[test]
    fn test_follow_replaces_previous_target() {
        let mut follow = FollowMode::new();
        follow.follow(uid("b"), None);
        follow.follow(uid("c"), None);
        assert_eq!(follow.target(), Some(&uid("c")));
        assert_eq!(follow.stop(), Some(uid("c")));
    }
}
