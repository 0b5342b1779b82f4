//! Reddit client: blocking OAuth API access for the forum worker.
//!
//! Uses the script-app password grant. Tokens are cached and refreshed when
//! they expire or the API answers 401. Must be built and dropped outside any
//! async runtime (it owns a `reqwest::blocking::Client`).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::{Lookup, optional, required};
use crate::error::{ConfigError, ForumError};
use crate::forum::{BatchStream, Comment, ForumClient, ForumItem, Submission};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";
const LISTING_LIMIT: &str = "100";
const DEFAULT_SUBREDDIT: &str = "mechanicalMercs";
/// Refresh this long before the token actually expires.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

// ── Configuration ───────────────────────────────────────────────────

/// Reddit credentials and target subreddit.
#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub username: String,
    pub password: SecretString,
    pub user_agent: String,
    pub subreddit: String,
}

impl RedditConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let username = required(lookup, "REDDIT_USERNAME")?;
        let user_agent = optional(lookup, "REDDIT_USER_AGENT").unwrap_or_else(|| {
            format!(
                "{}:cerberus:v{} (by /u/{username})",
                std::env::consts::OS,
                env!("CARGO_PKG_VERSION")
            )
        });

        Ok(Self {
            client_id: required(lookup, "REDDIT_CLIENT_ID")?,
            client_secret: SecretString::from(required(lookup, "REDDIT_CLIENT_SECRET")?),
            password: SecretString::from(required(lookup, "REDDIT_PASSWORD")?),
            username,
            user_agent,
            subreddit: optional(lookup, "REDDIT_SUBREDDIT")
                .unwrap_or_else(|| DEFAULT_SUBREDDIT.to_string()),
        })
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    children: Vec<Thing<T>>,
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    data: T,
}

#[derive(Debug, Default, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    json: ApiJson,
}

#[derive(Debug, Default, Deserialize)]
struct ApiJson {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

// ── Client ──────────────────────────────────────────────────────────

struct Inner {
    config: RedditConfig,
    http: Client,
    token: Mutex<Option<AccessToken>>,
}

/// Blocking Reddit API client bound to one subreddit.
#[derive(Clone)]
pub struct RedditClient {
    inner: Arc<Inner>,
}

impl RedditClient {
    pub fn new(config: RedditConfig) -> Result<Self, ForumError> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                token: Mutex::new(None),
            }),
        })
    }

    pub fn subreddit(&self) -> &str {
        &self.inner.config.subreddit
    }

    /// Fetch a token up front so bad credentials fail at startup.
    pub fn authenticate(&self) -> Result<(), ForumError> {
        self.bearer().map(|_| ())
    }

    fn bearer(&self) -> Result<String, ForumError> {
        let mut guard = self
            .inner
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }
        let token = self.request_token()?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    fn invalidate_token(&self) {
        let mut guard = self
            .inner
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = None;
    }

    fn request_token(&self) -> Result<AccessToken, ForumError> {
        let config = &self.inner.config;
        let resp = self
            .inner
            .http
            .post(TOKEN_URL)
            .basic_auth(&config.client_id, Some(config.client_secret.expose_secret()))
            .form(&[
                ("grant_type", "password"),
                ("username", config.username.as_str()),
                ("password", config.password.expose_secret()),
            ])
            .send()?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ForumError::AuthFailed(format!("token endpoint returned {status}")));
        }
        let resp = check_status(resp)?;
        let body: TokenResponse = resp.json()?;
        if let Some(error) = body.error {
            return Err(ForumError::AuthFailed(error));
        }
        let value = body
            .access_token
            .ok_or_else(|| ForumError::AuthFailed("no access_token in response".into()))?;

        info!(user = %config.username, "Authenticated with Reddit");
        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_SLACK);
        Ok(AccessToken {
            value,
            expires_at: Instant::now() + lifetime,
        })
    }

    /// Send an authenticated request, re-authenticating once on 401.
    ///
    /// Reads (`idempotent`) are also retried once after a timeout or a failed
    /// connection.
    fn execute<B>(&self, build: B, idempotent: bool) -> Result<Response, ForumError>
    where
        B: Fn(&Client) -> RequestBuilder,
    {
        let send = |token: &str| {
            let attempt = || build(&self.inner.http).bearer_auth(token).send();
            if idempotent {
                retry_transient(attempt)
            } else {
                attempt()
            }
        };

        let token = self.bearer()?;
        let resp = send(&token)?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check_status(resp);
        }

        debug!("Reddit token rejected; re-authenticating");
        self.invalidate_token();
        let token = self.bearer()?;
        let resp = send(&token)?;
        check_status(resp)
    }

    fn get_listing<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ForumError> {
        let url = format!("{API_BASE}{path}");
        let resp = self.execute(
            |http| {
                http.get(&url)
                    .query(&[("limit", LISTING_LIMIT), ("raw_json", "1")])
            },
            true,
        )?;
        let listing: Listing<T> = resp.json()?;
        Ok(listing.data.children.into_iter().map(|thing| thing.data).collect())
    }

    fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<(), ForumError> {
        let url = format!("{API_BASE}{path}");
        let resp = self.execute(|http| http.post(&url).form(form), false)?;
        let body: ApiEnvelope = resp.json()?;
        api_errors(&body.json)
    }
}

impl ForumClient for RedditClient {
    fn stream_new_submissions(&self) -> BatchStream<Submission> {
        let client = self.clone();
        let path = format!("/r/{}/new", self.subreddit());
        BatchStream::new(move || client.get_listing(&path))
    }

    fn stream_new_comments(&self) -> BatchStream<Comment> {
        let client = self.clone();
        let path = format!("/r/{}/comments", self.subreddit());
        BatchStream::new(move || client.get_listing(&path))
    }

    fn submit_post(&self, title: &str, body: &str) -> Result<(), ForumError> {
        self.post_form(
            "/api/submit",
            &[
                ("sr", self.subreddit()),
                ("kind", "self"),
                ("title", title),
                ("text", body),
                ("api_type", "json"),
            ],
        )
    }

    fn reply_to(&self, item: &dyn ForumItem, text: &str) -> Result<(), ForumError> {
        self.post_form(
            "/api/comment",
            &[
                ("thing_id", item.fullname()),
                ("text", text),
                ("api_type", "json"),
            ],
        )
    }

    fn parent_submission(&self, comment: &Comment) -> Result<Submission, ForumError> {
        let path = format!("/by_id/{}", comment.link_fullname);
        self.get_listing::<Submission>(&path)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ForumError::InvalidResponse(format!("{} not found", comment.link_fullname))
            })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Run `attempt`, and run it once more if it timed out or could not connect.
fn retry_transient<T>(mut attempt: impl FnMut() -> reqwest::Result<T>) -> reqwest::Result<T> {
    match attempt() {
        Err(e) if e.is_timeout() || e.is_connect() => {
            warn!(error = %e, "Reddit request failed; retrying once");
            attempt()
        }
        other => other,
    }
}

fn check_status(resp: Response) -> Result<Response, ForumError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(ForumError::Api {
        status: status.as_u16(),
        body,
    })
}

/// Turn `{"json": {"errors": [["CODE", "message", "field"]]}}` into an error.
fn api_errors(json: &ApiJson) -> Result<(), ForumError> {
    if json.errors.is_empty() {
        return Ok(());
    }
    let reasons: Vec<String> = json
        .errors
        .iter()
        .map(|entry| {
            entry
                .iter()
                .filter_map(serde_json::Value::as_str)
                .take(2)
                .collect::<Vec<_>>()
                .join(": ")
        })
        .collect();
    Err(ForumError::Rejected(reasons.join("; ")))
}
