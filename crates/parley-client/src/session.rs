//! The per-login service object.
//!
//! A [`ChatSession`] is created by [`ChatSession::login`] /
//! [`ChatSession::signup`] and consumed by [`ChatSession::logout`]: it
//! owns the REST client, the push-channel bridge, the online-user set,
//! and the active [`ConversationView`].  There is no ambient global
//! state; whatever needs the session gets a reference to it.
//!
//! Push frames arrive through [`ChatSession::next_event`]; applying one
//! with [`ChatSession::apply`] (or the individual `on_*` handlers)
//! mutates the cache and returns a [`ViewDiff`] describing what changed,
//! so a rendering layer can react without inspecting internals -- and so
//! the whole module can be tested without one.

use std::collections::HashSet;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tracing::{debug, info, warn};

use parley_shared::{Message, MessageDraft, ServerEvent, TempId, UserId, UserProfile};

use crate::api::ApiClient;
use crate::error::ClientError;
use crate::sync::{ConversationView, MergeOutcome};

/// How long a Pending entry may wait for its send response before it is
/// rolled back.
const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(30);

/// Events surfaced by the push bridge.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A canonical message relayed by the server.
    Message(Message),
    /// The full online-user list after a presence change.
    Presence(Vec<UserId>),
    /// The push connection closed (logout elsewhere, server restart,
    /// network loss).
    Disconnected,
}

/// What applying an event or send result changed in the local state.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewDiff {
    /// A pushed message was merged into the active conversation.
    MessageMerged(Message),
    /// An optimistic entry was replaced by its canonical record.
    SendConfirmed { temp_id: TempId, message: Message },
    /// An optimistic entry was rolled back after a failed commit.
    SendRolledBack { temp_id: TempId },
    /// The online-user set changed.
    PresenceChanged(Vec<UserId>),
    /// Something happened in a conversation other than the active one;
    /// the partner list may be stale.
    PartnerListStale,
    /// The push connection is gone.
    ConnectionLost,
    /// Nothing observable changed (e.g. a duplicate push).
    NoChange,
}

pub struct ChatSession {
    api: ApiClient,
    profile: UserProfile,
    online: HashSet<UserId>,
    view: Option<ConversationView>,
    push_rx: mpsc::Receiver<PushEvent>,
    bridge: JoinHandle<()>,
    pending_ttl: Duration,
}

impl ChatSession {
    /// Authenticate and open the push connection.
    pub async fn login(
        base_url: impl Into<String>,
        email: &str,
        password: &str,
    ) -> Result<Self, ClientError> {
        let mut api = ApiClient::new(base_url);
        let auth = api.login(email, password).await?;
        Self::start(api, auth.user)
    }

    /// Create an account, then behave exactly like [`login`].
    ///
    /// [`login`]: ChatSession::login
    pub async fn signup(
        base_url: impl Into<String>,
        display_name: &str,
        email: &str,
        password: &str,
    ) -> Result<Self, ClientError> {
        let mut api = ApiClient::new(base_url);
        let auth = api.signup(display_name, email, password).await?;
        Self::start(api, auth.user)
    }

    fn start(api: ApiClient, profile: UserProfile) -> Result<Self, ClientError> {
        let token = api
            .token()
            .ok_or_else(|| ClientError::Push("no session token".into()))?;
        let ws_url = format!("{}?token={}", api.push_url(), token);
        let (push_rx, bridge) = spawn_push_bridge(ws_url);

        info!(user = %profile.id, "session started");

        Ok(Self {
            api,
            profile,
            online: HashSet::new(),
            view: None,
            push_rx,
            bridge,
            pending_ttl: DEFAULT_PENDING_TTL,
        })
    }

    /// Revoke the session and tear down the push connection.
    pub async fn logout(mut self) -> Result<(), ClientError> {
        info!(user = %self.profile.id, "session ending");
        let result = self.api.logout().await;
        self.bridge.abort();
        result
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn view(&self) -> Option<&ConversationView> {
        self.view.as_ref()
    }

    pub fn online_users(&self) -> &HashSet<UserId> {
        &self.online
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.online.contains(&user)
    }

    // ------------------------------------------------------------------
    // Conversation lifecycle
    // ------------------------------------------------------------------

    /// Point the cache at a conversation partner without fetching.
    ///
    /// Optimistic entries of the previous conversation are dropped; push
    /// frames for it stop being merged from here on.
    pub fn open_conversation(&mut self, partner: UserId) {
        match self.view.as_mut() {
            Some(view) => view.switch_partner(partner),
            None => self.view = Some(ConversationView::new(self.profile.id, partner)),
        }
    }

    /// Switch to `partner` and load the conversation history.
    pub async fn select_partner(&mut self, partner: UserId) -> Result<(), ClientError> {
        self.open_conversation(partner);
        self.refresh().await
    }

    /// Background refetch of the active conversation, reconciled into
    /// the view.  Outstanding optimistic entries survive.
    pub async fn refresh(&mut self) -> Result<(), ClientError> {
        let partner = self
            .view
            .as_ref()
            .ok_or(ClientError::NoConversation)?
            .partner();

        let messages = self.api.conversation(partner).await?;

        // The user may have switched conversations while the fetch was
        // in flight; a stale response must not repopulate the new view.
        if let Some(view) = self.view.as_mut() {
            if view.partner() == partner {
                view.reload(messages);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Optimistically insert the draft, request the commit, and
    /// reconcile the outcome.
    pub async fn send(&mut self, draft: MessageDraft) -> Result<ViewDiff, ClientError> {
        let (partner, temp_id) = {
            let view = self.view.as_mut().ok_or(ClientError::NoConversation)?;
            (view.partner(), view.begin_send(draft.clone()))
        };

        let result = self.api.send_message(partner, &draft).await;
        Ok(self.on_send_result(temp_id, result))
    }

    /// Reconcile the response to an own send request.
    pub fn on_send_result(
        &mut self,
        temp_id: TempId,
        result: Result<Message, ClientError>,
    ) -> ViewDiff {
        let Some(view) = self.view.as_mut() else {
            return ViewDiff::NoChange;
        };

        match result {
            Ok(message) => {
                if view.confirm_send(temp_id, message.clone()) {
                    ViewDiff::SendConfirmed { temp_id, message }
                } else {
                    ViewDiff::NoChange
                }
            }
            Err(error) => {
                warn!(%temp_id, error = %error, "send failed, rolling back");
                view.fail_send(temp_id);
                ViewDiff::SendRolledBack { temp_id }
            }
        }
    }

    /// Roll back Pending entries whose response never arrived.
    pub fn expire_stale_sends(&mut self) -> Vec<TempId> {
        match self.view.as_mut() {
            Some(view) => view.expire_pending(self.pending_ttl),
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Push events
    // ------------------------------------------------------------------

    /// Next event from the push bridge.  `None` once the bridge task has
    /// exited.
    pub async fn next_event(&mut self) -> Option<PushEvent> {
        self.push_rx.recv().await
    }

    /// Apply one push event to the local state.
    pub fn apply(&mut self, event: PushEvent) -> ViewDiff {
        match event {
            PushEvent::Message(message) => self.on_push(message),
            PushEvent::Presence(user_ids) => self.on_presence_change(user_ids),
            PushEvent::Disconnected => ViewDiff::ConnectionLost,
        }
    }

    /// A canonical message arrived over the push channel.
    pub fn on_push(&mut self, message: Message) -> ViewDiff {
        match self.view.as_mut() {
            Some(view) => match view.merge_confirmed(message.clone()) {
                MergeOutcome::Inserted => ViewDiff::MessageMerged(message),
                MergeOutcome::Duplicate => ViewDiff::NoChange,
                MergeOutcome::OtherConversation => ViewDiff::PartnerListStale,
            },
            // No conversation open; the chats listing gained an entry.
            None => ViewDiff::PartnerListStale,
        }
    }

    /// The server broadcast a fresh online-user list.
    pub fn on_presence_change(&mut self, user_ids: Vec<UserId>) -> ViewDiff {
        self.online = user_ids.iter().copied().collect();
        ViewDiff::PresenceChanged(user_ids)
    }
}

/// Spawn the push bridge: a task that reads server frames off the
/// WebSocket and forwards them as [`PushEvent`]s.  The session never
/// writes application frames; the channel is receive-only by contract.
fn spawn_push_bridge(ws_url: String) -> (mpsc::Receiver<PushEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);

    let handle = tokio::spawn(async move {
        let stream = match connect_async(&ws_url).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(error = %e, "push connection failed");
                let _ = tx.send(PushEvent::Disconnected).await;
                return;
            }
        };

        debug!("push connection established");
        let (_write, mut read) = stream.split();

        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsFrame::Text(text)) => match ServerEvent::from_json(&text) {
                    Ok(ServerEvent::NewMessage { message }) => {
                        if tx.send(PushEvent::Message(message)).await.is_err() {
                            return;
                        }
                    }
                    Ok(ServerEvent::OnlineUsers { user_ids }) => {
                        if tx.send(PushEvent::Presence(user_ids)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "undecodable push frame, skipping");
                    }
                },
                Ok(WsFrame::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }

        debug!("push connection closed");
        let _ = tx.send(PushEvent::Disconnected).await;
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_shared::MessageId;

    fn test_profile() -> UserProfile {
        UserProfile {
            id: UserId::new(),
            display_name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            avatar: None,
            created_at: Utc::now(),
        }
    }

    fn test_session() -> ChatSession {
        let (_tx, push_rx) = mpsc::channel(1);
        ChatSession {
            api: ApiClient::new("http://localhost:0"),
            profile: test_profile(),
            online: HashSet::new(),
            view: None,
            push_rx,
            bridge: tokio::spawn(async {}),
            pending_ttl: DEFAULT_PENDING_TTL,
        }
    }

    fn message_to(session: &ChatSession, from: UserId, text: &str) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: from,
            receiver_id: session.profile.id,
            text: Some(text.to_string()),
            image: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn push_for_active_conversation_is_merged() {
        let mut session = test_session();
        let partner = UserId::new();
        session.open_conversation(partner);

        let message = message_to(&session, partner, "hi");
        let diff = session.on_push(message.clone());

        assert_eq!(diff, ViewDiff::MessageMerged(message.clone()));
        assert_eq!(session.view().unwrap().canonical_ids(), vec![message.id]);

        // The same frame again (push racing a fetch) changes nothing.
        assert_eq!(session.on_push(message.clone()), ViewDiff::NoChange);
        assert_eq!(session.view().unwrap().canonical_ids(), vec![message.id]);
    }

    #[tokio::test]
    async fn push_for_other_conversation_flags_partner_list() {
        let mut session = test_session();
        session.open_conversation(UserId::new());

        let stranger = UserId::new();
        let message = message_to(&session, stranger, "yo");
        assert_eq!(session.on_push(message), ViewDiff::PartnerListStale);
        assert!(session.view().unwrap().is_empty());
    }

    #[tokio::test]
    async fn presence_change_replaces_online_set() {
        let mut session = test_session();
        let alice = UserId::new();
        let bob = UserId::new();

        session.on_presence_change(vec![alice, bob]);
        assert!(session.is_online(alice));
        assert!(session.is_online(bob));

        // Bob's last connection dropped.
        session.on_presence_change(vec![alice]);
        assert!(session.is_online(alice));
        assert!(!session.is_online(bob));
    }

    #[tokio::test]
    async fn failed_send_result_rolls_back() {
        let mut session = test_session();
        let partner = UserId::new();
        session.open_conversation(partner);

        let temp_id = {
            let view = session.view.as_mut().unwrap();
            view.begin_send(MessageDraft::text("doomed"))
        };

        let diff = session.on_send_result(
            temp_id,
            Err(ClientError::Api {
                status: 500,
                message: "boom".into(),
            }),
        );
        assert_eq!(diff, ViewDiff::SendRolledBack { temp_id });
        assert!(session.view().unwrap().is_empty());
    }

    #[tokio::test]
    async fn switching_conversation_stops_merging_old_pushes() {
        let mut session = test_session();
        let first = UserId::new();
        let second = UserId::new();

        session.open_conversation(first);
        let old_push = message_to(&session, first, "old");
        session.open_conversation(second);

        // The connection stays open, but frames for the previous key no
        // longer land in the view.
        assert_eq!(session.on_push(old_push), ViewDiff::PartnerListStale);
        assert!(session.view().unwrap().is_empty());
    }
}
