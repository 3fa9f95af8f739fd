//! Typed REST client for the parley server.
//!
//! Thin wrapper over reqwest: one method per endpoint, bearer-token
//! auth, and uniform decoding of the server's `{"error": ...}` bodies
//! into [`ClientError::Api`].

use serde::de::DeserializeOwned;
use serde::Deserialize;

use parley_shared::{Message, MessageDraft, UserId, UserProfile};

use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

/// Profile plus session token, as returned by signup and login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SignupRequest<'a> {
    display_name: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(serde::Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar: Option<&'a str>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            token: None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// WebSocket endpoint derived from the REST base URL.
    pub fn push_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{ws_base}/ws")
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    // ------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------

    pub async fn signup(
        &mut self,
        display_name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ClientError> {
        let resp = self
            .http
            .post(self.url("/auth/signup"))
            .json(&SignupRequest {
                display_name,
                email,
                password,
            })
            .send()
            .await?;

        let auth: AuthResponse = expect_json(resp).await?;
        self.token = Some(auth.token.clone());
        Ok(auth)
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let auth: AuthResponse = expect_json(resp).await?;
        self.token = Some(auth.token.clone());
        Ok(auth)
    }

    /// Revoke the session credential.  The local token is cleared even
    /// when the request fails; the server side expires on its own.
    pub async fn logout(&mut self) -> Result<(), ClientError> {
        let req = self.with_auth(self.http.post(self.url("/auth/logout")));
        self.token = None;

        let resp = req.send().await?;
        expect_json::<serde_json::Value>(resp).await?;
        Ok(())
    }

    pub async fn check(&self) -> Result<UserProfile, ClientError> {
        let resp = self
            .with_auth(self.http.get(self.url("/auth/check")))
            .send()
            .await?;
        expect_json(resp).await
    }

    pub async fn update_profile(
        &self,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<UserProfile, ClientError> {
        let resp = self
            .with_auth(self.http.put(self.url("/auth/update-profile")))
            .json(&UpdateProfileRequest {
                display_name,
                avatar,
            })
            .send()
            .await?;
        expect_json(resp).await
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn contacts(&self) -> Result<Vec<UserProfile>, ClientError> {
        let resp = self
            .with_auth(self.http.get(self.url("/messages/contacts")))
            .send()
            .await?;
        expect_json(resp).await
    }

    pub async fn chat_partners(&self) -> Result<Vec<UserProfile>, ClientError> {
        let resp = self
            .with_auth(self.http.get(self.url("/messages/chats")))
            .send()
            .await?;
        expect_json(resp).await
    }

    pub async fn conversation(&self, partner: UserId) -> Result<Vec<Message>, ClientError> {
        let resp = self
            .with_auth(self.http.get(self.url(&format!("/messages/{partner}"))))
            .send()
            .await?;
        expect_json(resp).await
    }

    pub async fn send_message(
        &self,
        receiver: UserId,
        draft: &MessageDraft,
    ) -> Result<Message, ClientError> {
        let resp = self
            .with_auth(
                self.http
                    .post(self.url(&format!("/messages/send/{receiver}"))),
            )
            .json(draft)
            .send()
            .await?;
        expect_json(resp).await
    }
}

/// Decode a success body, or surface the server's error message.
async fn expect_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    };

    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
