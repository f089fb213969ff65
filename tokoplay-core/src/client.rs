// src/client.rs
//
// Stateless mapping to the remote game API. Everything here is a thin
// request/response translation; retry policy and state live in the
// scheduler. The `GameApi` trait is the seam the scheduler is tested
// against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::auth::Session;
use crate::config::BotConfig;
use crate::error::Error;

const PLATFORM: &str = "TOKO";

/// Parameters for one play submission.
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub game_id: u32,
    pub score: u32,
    pub multiplier: String,
}

/// Result of one play, consumed immediately by the scheduler and discarded.
#[derive(Debug, Clone)]
pub struct PlayResult {
    pub success: bool,
    pub score_delta: i64,
    pub multiplier: String,
    /// Authoritative post-play energy, when the server reports it.
    pub energy: Option<u32>,
}

/// Account status as reported by the server.
#[derive(Debug, Clone)]
pub struct GameStatus {
    pub energy: u32,
    pub cap: Option<u32>,
    pub next_regen_at: Option<DateTime<Utc>>,
    pub score: Option<i64>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameApi: Send + Sync {
    /// Exchange the account's init data for a fresh bearer token.
    async fn refresh_token(&self, init_data_raw: &str) -> Result<Session, Error>;

    /// Submit one play. A well-formed rejection is an `Ok` result with
    /// `success == false`; `Err` is reserved for transport, auth, and
    /// protocol failures.
    async fn submit_play(
        &self,
        token: &str,
        user_id: i64,
        request: PlayRequest,
    ) -> Result<PlayResult, Error>;

    /// Poll energy/score figures for the account.
    async fn fetch_status(&self, token: &str, user_id: i64) -> Result<GameStatus, Error>;
}

/// Every response is wrapped in `{"status": "...", "data": {...}}`.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: String,
    data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    fn is_ok(&self) -> bool {
        self.status == "OK"
    }

    fn into_data(self, what: &str) -> Result<T, Error> {
        if !self.is_ok() {
            return Err(Error::Protocol(format!(
                "{what}: server returned status {}",
                self.status
            )));
        }
        self.data
            .ok_or_else(|| Error::Protocol(format!("{what}: missing data payload")))
    }
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameInfoData {
    user_current_energy: u32,
    user_max_energy: Option<u32>,
    /// Epoch milliseconds of the next regeneration tick, when present.
    energy_refresh_time: Option<i64>,
    total_points: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayRewardData {
    user_current_energy: Option<u32>,
    reward_point: Option<i64>,
}

pub struct TokoplayClient {
    http: ReqwestClient,
    base_url: String,
    user_agent: String,
    referer: String,
    token_ttl: chrono::Duration,
}

impl TokoplayClient {
    pub fn new(config: &BotConfig) -> Result<Self, Error> {
        let http = ReqwestClient::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            referer: config.referer.clone(),
            token_ttl: config.token_ttl(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn get_envelope<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        token: Option<&str>,
    ) -> Result<ApiEnvelope<T>, Error> {
        let mut req = self
            .http
            .get(self.url(endpoint))
            .header("user-agent", &self.user_agent)
            .header("referer", &self.referer)
            .header("accept", "application/json, text/plain, */*")
            .query(query);
        if let Some(token) = token {
            req = req.header("authorization", token);
        }
        let resp = req.send().await.map_err(map_send_error)?;
        decode_envelope(resp, endpoint).await
    }

    async fn post_envelope<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
        token: &str,
    ) -> Result<ApiEnvelope<T>, Error> {
        let resp = self
            .http
            .post(self.url(endpoint))
            .header("user-agent", &self.user_agent)
            .header("referer", &self.referer)
            .header("accept", "application/json, text/plain, */*")
            .header("authorization", token)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;
        decode_envelope(resp, endpoint).await
    }
}

#[async_trait]
impl GameApi for TokoplayClient {
    async fn refresh_token(&self, init_data_raw: &str) -> Result<Session, Error> {
        let env: ApiEnvelope<TokenData> = self
            .get_envelope(
                "user/getToken",
                &[
                    ("initDataRaw", init_data_raw.to_string()),
                    ("platform", PLATFORM.to_string()),
                ],
                None,
            )
            .await?;
        let data = env.into_data("getToken")?;
        Ok(Session::new(data.token, Utc::now() + self.token_ttl))
    }

    async fn submit_play(
        &self,
        token: &str,
        user_id: i64,
        request: PlayRequest,
    ) -> Result<PlayResult, Error> {
        let body = serde_json::json!({
            "categories": "Matches",
            "userId": user_id,
            "platform": PLATFORM,
            "gameId": request.game_id,
            "score": request.score,
            "multiplier": request.multiplier,
        });
        let env: ApiEnvelope<PlayRewardData> = self
            .post_envelope("game/playGameGetReward", body, token)
            .await?;
        Ok(play_result_from(env, &request))
    }

    async fn fetch_status(&self, token: &str, user_id: i64) -> Result<GameStatus, Error> {
        let env: ApiEnvelope<GameInfoData> = self
            .get_envelope(
                "game/getUserGameInfo",
                &[
                    ("userId", user_id.to_string()),
                    ("gameId", "1".to_string()),
                    ("platform", PLATFORM.to_string()),
                ],
                Some(token),
            )
            .await?;
        let data = env.into_data("getUserGameInfo")?;
        Ok(GameStatus {
            energy: data.user_current_energy,
            cap: data.user_max_energy,
            next_regen_at: data
                .energy_refresh_time
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            score: data.total_points,
        })
    }
}

/// A rejection the server expressed through the envelope is still a game
/// result; only a missing or mangled payload is a protocol failure.
fn play_result_from(env: ApiEnvelope<PlayRewardData>, request: &PlayRequest) -> PlayResult {
    if !env.is_ok() {
        return PlayResult {
            success: false,
            score_delta: 0,
            multiplier: request.multiplier.clone(),
            energy: None,
        };
    }
    let data = env.data.unwrap_or(PlayRewardData {
        user_current_energy: None,
        reward_point: None,
    });
    PlayResult {
        success: true,
        score_delta: data.reward_point.unwrap_or(request.score as i64),
        multiplier: request.multiplier.clone(),
        energy: data.user_current_energy,
    }
}

fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() {
        Error::Transport(e.to_string())
    } else {
        Error::Http(e)
    }
}

async fn decode_envelope<T: DeserializeOwned>(
    resp: reqwest::Response,
    endpoint: &str,
) -> Result<ApiEnvelope<T>, Error> {
    match resp.status() {
        StatusCode::UNAUTHORIZED => return Err(Error::Unauthorized),
        s if s.is_server_error() => {
            return Err(Error::Transport(format!("{endpoint}: server error {s}")));
        }
        s if !s.is_success() => {
            return Err(Error::Protocol(format!("{endpoint}: unexpected status {s}")));
        }
        _ => {}
    }
    resp.json::<ApiEnvelope<T>>()
        .await
        .map_err(|e| Error::Protocol(format!("{endpoint}: malformed response: {e}")))
}
