//! The per-conversation cache and its reconciliation rules.
//!
//! A [`ConversationView`] is one client's ordered view of one
//! conversation.  Entries are a tagged variant: an optimistic
//! [`ChatEntry::Pending`] carries a client-local [`TempId`], a
//! [`ChatEntry::Confirmed`] carries the server-assigned canonical record.
//! The two identifier namespaces never mix, so a pushed message can never
//! be mistaken for another party's placeholder.
//!
//! All operations are synchronous and total: the view can absorb the
//! response to its own send, pushed messages from the relay, and a
//! background refetch in any interleaving.  Merging is an idempotent
//! upsert keyed by canonical identifier, which makes the races safe by
//! construction.

use std::time::{Duration, Instant};

use parley_shared::{ConversationKey, Message, MessageDraft, MessageId, TempId, UserId};

/// One slot in the ordered view.
#[derive(Debug, Clone)]
pub enum ChatEntry {
    /// Locally issued, not yet acknowledged by the server.  Shown
    /// immediately, marked unconfirmed.
    Pending {
        temp_id: TempId,
        draft: MessageDraft,
        queued_at: Instant,
    },
    /// The server-confirmed canonical record.
    Confirmed(Message),
}

impl ChatEntry {
    pub fn is_pending(&self) -> bool {
        matches!(self, ChatEntry::Pending { .. })
    }

    /// The canonical identifier, for confirmed entries only.
    pub fn canonical_id(&self) -> Option<MessageId> {
        match self {
            ChatEntry::Pending { .. } => None,
            ChatEntry::Confirmed(message) => Some(message.id),
        }
    }
}

/// Result of merging a pushed or fetched canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The record was new and is now part of the view.
    Inserted,
    /// A record with that canonical identifier was already present;
    /// the merge was a no-op.
    Duplicate,
    /// The record belongs to a different conversation and was ignored.
    OtherConversation,
}

/// One client's ordered view of one conversation.
#[derive(Debug)]
pub struct ConversationView {
    self_id: UserId,
    partner: UserId,
    entries: Vec<ChatEntry>,
}

impl ConversationView {
    pub fn new(self_id: UserId, partner: UserId) -> Self {
        Self {
            self_id,
            partner,
            entries: Vec::new(),
        }
    }

    pub fn partner(&self) -> UserId {
        self.partner
    }

    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(self.self_id, self.partner)
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical identifiers currently in the view, in display order.
    pub fn canonical_ids(&self) -> Vec<MessageId> {
        self.entries
            .iter()
            .filter_map(ChatEntry::canonical_id)
            .collect()
    }

    fn contains_canonical(&self, id: MessageId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.canonical_id() == Some(id))
    }

    // ------------------------------------------------------------------
    // Own sends: Pending -> Confirmed | Failed
    // ------------------------------------------------------------------

    /// Insert an optimistic entry at the tail of the view and return its
    /// temporary identifier.
    pub fn begin_send(&mut self, draft: MessageDraft) -> TempId {
        let temp_id = TempId::new();
        self.entries.push(ChatEntry::Pending {
            temp_id,
            draft,
            queued_at: Instant::now(),
        });
        temp_id
    }

    /// The commit succeeded: replace the Pending entry in place with the
    /// canonical record, preserving its position.  Returns `false` when
    /// no entry carries that temporary identifier (already rolled back
    /// or expired).
    pub fn confirm_send(&mut self, temp_id: TempId, message: Message) -> bool {
        // The canonical record may already have arrived through a fetch;
        // dropping the placeholder keeps the no-duplication invariant.
        if self.contains_canonical(message.id) {
            return self.remove_pending(temp_id);
        }

        match self.position_of_pending(temp_id) {
            Some(index) => {
                self.entries[index] = ChatEntry::Confirmed(message);
                true
            }
            None => false,
        }
    }

    /// The commit failed: remove the Pending entry entirely, restoring
    /// the view to its pre-send state.  A true rollback, not a
    /// tombstone.
    pub fn fail_send(&mut self, temp_id: TempId) -> bool {
        self.remove_pending(temp_id)
    }

    /// Remove Pending entries older than `ttl` and report them.  The
    /// bounded timeout-then-Failed policy for sends whose response never
    /// arrives.
    pub fn expire_pending(&mut self, ttl: Duration) -> Vec<TempId> {
        let mut expired = Vec::new();
        self.entries.retain(|entry| match entry {
            ChatEntry::Pending {
                temp_id, queued_at, ..
            } if queued_at.elapsed() >= ttl => {
                expired.push(*temp_id);
                false
            }
            _ => true,
        });
        expired
    }

    // ------------------------------------------------------------------
    // Canonical records from outside: push and refetch
    // ------------------------------------------------------------------

    /// Idempotent upsert of a canonical record, keyed by canonical
    /// identifier.
    ///
    /// Records for other conversations are ignored.  A record already
    /// present (arrived via a background fetch before the push, or via a
    /// repeated push) leaves the view untouched.  New records are placed
    /// in timestamp order among the confirmed entries; optimistic
    /// entries keep their tail position.
    pub fn merge_confirmed(&mut self, message: Message) -> MergeOutcome {
        if message.conversation_key() != self.conversation_key() {
            return MergeOutcome::OtherConversation;
        }
        if self.contains_canonical(message.id) {
            return MergeOutcome::Duplicate;
        }

        let index = self
            .entries
            .iter()
            .position(|entry| match entry {
                ChatEntry::Pending { .. } => true,
                ChatEntry::Confirmed(existing) => existing.created_at > message.created_at,
            })
            .unwrap_or(self.entries.len());

        self.entries.insert(index, ChatEntry::Confirmed(message));
        MergeOutcome::Inserted
    }

    /// Replace the confirmed section with the result of a fetch, keeping
    /// any still-outstanding optimistic entries at the tail.
    pub fn reload(&mut self, messages: Vec<Message>) {
        let pending: Vec<ChatEntry> = self
            .entries
            .drain(..)
            .filter(ChatEntry::is_pending)
            .collect();

        self.entries = messages
            .into_iter()
            .filter(|m| m.conversation_key() == self.conversation_key())
            .map(ChatEntry::Confirmed)
            .collect();
        self.entries.extend(pending);
    }

    // ------------------------------------------------------------------
    // View changes
    // ------------------------------------------------------------------

    /// Point the view at a new chat partner.
    ///
    /// Optimistic entries belong to the previous conversation key and
    /// never leak across the switch; the whole view resets and is
    /// repopulated by the caller's next fetch.
    pub fn switch_partner(&mut self, partner: UserId) {
        self.partner = partner;
        self.entries.clear();
    }

    fn position_of_pending(&self, temp_id: TempId) -> Option<usize> {
        self.entries.iter().position(|entry| {
            matches!(entry, ChatEntry::Pending { temp_id: t, .. } if *t == temp_id)
        })
    }

    fn remove_pending(&mut self, temp_id: TempId) -> bool {
        match self.position_of_pending(temp_id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: MessageId, from: UserId, to: UserId, text: &str) -> Message {
        Message {
            id,
            sender_id: from,
            receiver_id: to,
            text: Some(text.to_string()),
            image: None,
            created_at: Utc::now(),
        }
    }

    fn view() -> (ConversationView, UserId, UserId) {
        let me = UserId::new();
        let partner = UserId::new();
        (ConversationView::new(me, partner), me, partner)
    }

    #[test]
    fn send_transitions_pending_to_confirmed_in_place() {
        let (mut view, me, partner) = view();

        let earlier = message(MessageId::new(), partner, me, "before");
        view.merge_confirmed(earlier.clone());

        let temp_id = view.begin_send(MessageDraft::text("hi"));
        assert!(view.entries()[1].is_pending());

        let canonical = message(MessageId::new(), me, partner, "hi");
        assert!(view.confirm_send(temp_id, canonical.clone()));

        // Position preserved, placeholder gone.
        assert_eq!(view.canonical_ids(), vec![earlier.id, canonical.id]);
        assert!(!view.entries().iter().any(ChatEntry::is_pending));
    }

    #[test]
    fn failed_send_rolls_back_to_pre_send_state() {
        let (mut view, me, partner) = view();

        view.merge_confirmed(message(MessageId::new(), partner, me, "a"));
        view.merge_confirmed(message(MessageId::new(), me, partner, "b"));
        let before = view.canonical_ids();

        let temp_id = view.begin_send(MessageDraft::text("doomed"));
        assert_eq!(view.len(), 3);

        assert!(view.fail_send(temp_id));
        assert_eq!(view.canonical_ids(), before);
        assert_eq!(view.len(), 2);

        // Rolling back twice is harmless.
        assert!(!view.fail_send(temp_id));
    }

    #[test]
    fn merge_is_idempotent() {
        let (mut view, me, partner) = view();
        let msg = message(MessageId::new(), partner, me, "hello");

        assert_eq!(view.merge_confirmed(msg.clone()), MergeOutcome::Inserted);
        assert_eq!(view.merge_confirmed(msg.clone()), MergeOutcome::Duplicate);

        // Delivering twice leaves the view identical to delivering once.
        assert_eq!(view.canonical_ids(), vec![msg.id]);
    }

    #[test]
    fn merge_ignores_other_conversations() {
        let (mut view, me, _partner) = view();
        let stranger = UserId::new();

        let msg = message(MessageId::new(), stranger, me, "psst");
        assert_eq!(view.merge_confirmed(msg), MergeOutcome::OtherConversation);
        assert!(view.is_empty());
    }

    #[test]
    fn merge_keeps_timestamp_order_with_pending_at_tail() {
        let (mut view, me, partner) = view();

        let mut first = message(MessageId::new(), partner, me, "first");
        let mut last = message(MessageId::new(), partner, me, "last");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        last.created_at = Utc::now() + chrono::Duration::seconds(10);

        view.merge_confirmed(last.clone());
        let temp_id = view.begin_send(MessageDraft::text("draft"));
        view.merge_confirmed(first.clone());

        assert_eq!(view.canonical_ids(), vec![first.id, last.id]);
        match &view.entries()[2] {
            ChatEntry::Pending { temp_id: t, .. } => assert_eq!(*t, temp_id),
            other => panic!("expected pending at tail, got {other:?}"),
        }
    }

    #[test]
    fn confirm_after_fetch_already_delivered_drops_placeholder() {
        let (mut view, me, partner) = view();

        let temp_id = view.begin_send(MessageDraft::text("hi"));
        let canonical = message(MessageId::new(), me, partner, "hi");

        // A background refetch beat the send response to the canonical
        // record.
        assert_eq!(
            view.merge_confirmed(canonical.clone()),
            MergeOutcome::Inserted
        );
        assert!(view.confirm_send(temp_id, canonical.clone()));

        // Exactly one copy survives.
        assert_eq!(view.canonical_ids(), vec![canonical.id]);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn reload_replaces_confirmed_but_keeps_pending() {
        let (mut view, me, partner) = view();

        view.merge_confirmed(message(MessageId::new(), partner, me, "stale"));
        let temp_id = view.begin_send(MessageDraft::text("draft"));

        let fresh_a = message(MessageId::new(), partner, me, "a");
        let fresh_b = message(MessageId::new(), me, partner, "b");
        view.reload(vec![fresh_a.clone(), fresh_b.clone()]);

        assert_eq!(view.canonical_ids(), vec![fresh_a.id, fresh_b.id]);
        match view.entries().last() {
            Some(ChatEntry::Pending { temp_id: t, .. }) => assert_eq!(*t, temp_id),
            other => panic!("expected pending at tail, got {other:?}"),
        }
    }

    #[test]
    fn switch_partner_never_leaks_optimistic_entries() {
        let (mut view, me, partner) = view();

        view.merge_confirmed(message(MessageId::new(), partner, me, "old"));
        view.begin_send(MessageDraft::text("unsent"));

        let new_partner = UserId::new();
        view.switch_partner(new_partner);

        assert!(view.is_empty());
        assert_eq!(view.partner(), new_partner);
        assert_eq!(
            view.conversation_key(),
            ConversationKey::new(me, new_partner)
        );
    }

    #[test]
    fn expired_pending_entries_are_removed_and_reported() {
        let (mut view, _me, _partner) = view();

        let doomed = view.begin_send(MessageDraft::text("never confirmed"));
        let expired = view.expire_pending(Duration::ZERO);

        assert_eq!(expired, vec![doomed]);
        assert!(view.is_empty());

        // Fresh entries survive a generous TTL.
        view.begin_send(MessageDraft::text("young"));
        assert!(view.expire_pending(Duration::from_secs(60)).is_empty());
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn full_exchange_between_two_clients() {
        // User A (u1) and user B (u2) share no prior messages.  A sends
        // "hi" to B while B is connected.
        let u1 = UserId::new();
        let u2 = UserId::new();
        let mut a_view = ConversationView::new(u1, u2);
        let mut b_view = ConversationView::new(u2, u1);

        // A: optimistic insert, then commit confirms with canonical m1.
        let temp = a_view.begin_send(MessageDraft::text("hi"));
        let m1 = message(MessageId::new(), u1, u2, "hi");
        assert!(a_view.confirm_send(temp, m1.clone()));

        // B: push arrives and is appended.
        assert_eq!(b_view.merge_confirmed(m1.clone()), MergeOutcome::Inserted);

        // Both views hold exactly one entry with m1's canonical id.
        assert_eq!(a_view.canonical_ids(), vec![m1.id]);
        assert_eq!(b_view.canonical_ids(), vec![m1.id]);

        // B also fetches in the background; the second delivery is a
        // no-op.
        assert_eq!(b_view.merge_confirmed(m1.clone()), MergeOutcome::Duplicate);
        assert_eq!(b_view.canonical_ids(), vec![m1.id]);
    }
}
