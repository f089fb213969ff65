// src/auth.rs
//
// Session ownership and token freshness. The store decides *whether* a
// refresh is needed; the scheduler decides how often to retry one that
// fails. A refresh swaps the whole session value at once, so an observer
// can never see a new token paired with an old expiry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::GameApi;
use crate::error::Error;

/// A bearer token and its assumed expiry. Mutated only by a successful
/// refresh, and only as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    pub fn is_fresh(&self, margin: Duration) -> bool {
        Utc::now() < self.expires_at - margin
    }

    /// Seconds until expiry; negative once stale.
    pub fn expires_in_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }
}

/// Identity of the account being played, extracted from the Telegram
/// init data blob: a URL-encoded query string whose `user` field carries
/// JSON with the numeric account id.
#[derive(Debug, Clone)]
pub struct AccountIdentity {
    pub user_id: i64,
    pub init_data_raw: String,
}

impl AccountIdentity {
    pub fn from_init_data(raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        let user_field = raw
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "user")
            .map(|(_, value)| value)
            .ok_or_else(|| Error::Parse("init data has no user field".into()))?;

        let decoded = urlencoding::decode(user_field)
            .map_err(|e| Error::Parse(format!("init data user field: {e}")))?;
        let user: serde_json::Value = serde_json::from_str(&decoded)
            .map_err(|e| Error::Parse(format!("init data user JSON: {e}")))?;
        let user_id = user
            .get("id")
            .and_then(|id| id.as_i64())
            .ok_or_else(|| Error::Parse("init data user JSON has no numeric id".into()))?;

        Ok(Self {
            user_id,
            init_data_raw: raw.to_string(),
        })
    }
}

/// Where refreshed sessions get persisted between runs. Implemented over a
/// plain JSON file by the server crate; the core only sees this trait.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>, Error>;
    fn save(&self, session: &Session) -> Result<(), Error>;
}

pub struct CredentialStore {
    client: Arc<dyn GameApi>,
    account: AccountIdentity,
    session: Option<Session>,
    safety_margin: Duration,
    force_refresh: bool,
    store: Option<Box<dyn TokenStore>>,
}

impl CredentialStore {
    pub fn new(
        client: Arc<dyn GameApi>,
        account: AccountIdentity,
        safety_margin: Duration,
        store: Option<Box<dyn TokenStore>>,
    ) -> Self {
        let session = match store.as_ref().map(|s| s.load()) {
            Some(Ok(Some(session))) => {
                info!("loaded persisted token (expires in {}s)", session.expires_in_secs());
                Some(session)
            }
            Some(Err(e)) => {
                warn!("could not load persisted token: {e}");
                None
            }
            _ => None,
        };
        Self {
            client,
            account,
            session,
            safety_margin,
            force_refresh: false,
            store,
        }
    }

    pub fn account(&self) -> &AccountIdentity {
        &self.account
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Force the next `get_valid_token` to refresh, regardless of expiry.
    /// Used when the server rejects a token mid-session.
    pub fn invalidate(&mut self) {
        debug!("credential invalidated; next use will refresh");
        self.force_refresh = true;
    }

    /// Return a token that is still inside its freshness window, refreshing
    /// through the API when it is not. A stale token is never handed out.
    pub async fn get_valid_token(&mut self) -> Result<String, Error> {
        if !self.force_refresh {
            if let Some(session) = &self.session {
                if session.is_fresh(self.safety_margin) {
                    return Ok(session.token.clone());
                }
            }
        }

        let fresh = self
            .client
            .refresh_token(&self.account.init_data_raw)
            .await
            .map_err(|e| Error::Auth(format!("token refresh failed: {e}")))?;

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&fresh) {
                warn!("failed to persist refreshed token: {e}");
            }
        }
        info!("token refreshed (expires in {}s)", fresh.expires_in_secs());

        let token = fresh.token.clone();
        self.session = Some(fresh);
        self.force_refresh = false;
        Ok(token)
    }
}
