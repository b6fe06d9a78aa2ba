// Portal session client
// Speaks the appointment portal's wire protocol: sign-in, authenticated JSON queries and the
// booking form. Every HTML, cookie and anti-forgery token quirk stays inside this module.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    redirect, Response,
};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, Credentials},
    dates::{CalendarDate, DateError},
};

pub const SESSION_COOKIE: &str = "_yatri_session";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/109.0.0.0 Safari/537.36";
const BODY_PREVIEW_CHARS: usize = 500;

// Error taxonomy for everything that can go wrong talking to the portal
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortalError {
    #[error("Session error: {0}")]
    AuthSession(String),

    #[error("Portal API error: {0}")]
    DomainApi(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Network error: {0}")]
    TransientNetwork(String),
}

impl PortalError {
    /// Transient faults are retried after a backoff sleep; everything else re-logs in at once.
    pub fn is_transient(&self) -> bool {
        if matches!(self, PortalError::TransientNetwork(_)) {
            return true;
        }

        // case-insensitive: "Connection reset" and "NETWORK" count as well
        let message = self.to_string().to_lowercase();
        ["socket hang up", "network", "connection"]
            .iter()
            .any(|needle| message.contains(needle))
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() || e.is_redirect() || e.is_decode() {
            PortalError::Protocol(e.to_string())
        } else {
            // timeouts, connect/DNS failures, resets while reading the body
            PortalError::TransientNetwork(e.to_string())
        }
    }
}

impl From<DateError> for PortalError {
    fn from(e: DateError) -> Self {
        PortalError::Protocol(e.to_string())
    }
}

/// Where the anti-forgery token lives in a portal page.
#[derive(Debug, Clone, Copy)]
pub struct TokenSelector {
    pub selector: &'static str,
    pub attribute: &'static str,
}

pub const CSRF_META_TOKEN: TokenSelector = TokenSelector {
    selector: r#"meta[name="csrf-token"]"#,
    attribute: "content",
};

impl TokenSelector {
    pub fn extract(&self, html: &str) -> Result<Option<String>, PortalError> {
        let selector = Selector::parse(self.selector)
            .map_err(|e| PortalError::Protocol(format!("bad token selector {}: {e:?}", self.selector)))?;
        let document = Html::parse_document(html);

        Ok(document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr(self.attribute))
            .map(str::to_string))
    }
}

/// Authenticated request context. Replaced wholesale on every login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_cookie: String,
    pub csrf_token: String,
    pub referer: String,
}

impl SessionContext {
    pub fn headers(&self) -> Result<HeaderMap, PortalError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(
            header::COOKIE,
            header_value(&format!("{SESSION_COOKIE}={}", self.session_cookie))?,
        );
        headers.insert(
            HeaderName::from_static("x-csrf-token"),
            header_value(&self.csrf_token)?,
        );
        headers.insert(header::REFERER, header_value(&self.referer)?);
        headers.insert(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        );
        Ok(headers)
    }

    // short prefix of the cookie for debug output
    pub fn cookie_preview(&self) -> String {
        let prefix: String = self.session_cookie.chars().take(12).collect();
        format!("{prefix}...")
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, PortalError> {
    HeaderValue::from_str(raw)
        .map_err(|e| PortalError::Protocol(format!("invalid header value: {e}")))
}

// Portal operations used by the polling loop
#[async_trait]
pub trait Portal: Send + Sync {
    async fn login(&self) -> Result<SessionContext, PortalError>;

    async fn query_available_dates(
        &self,
        ctx: &SessionContext,
        schedule_id: &str,
        facility_id: &str,
    ) -> Result<Vec<CalendarDate>, PortalError>;

    async fn query_available_time(
        &self,
        ctx: &SessionContext,
        schedule_id: &str,
        facility_id: &str,
        date: CalendarDate,
    ) -> Result<Option<String>, PortalError>;

    // Ok means the submission completed; the resulting page is not inspected
    async fn book(
        &self,
        ctx: &SessionContext,
        schedule_id: &str,
        facility_id: &str,
        date: CalendarDate,
        time: &str,
    ) -> Result<(), PortalError>;
}

#[derive(Debug, Deserialize)]
struct DayEntry {
    date: String,
}

#[derive(Debug, Deserialize)]
struct TimesResponse {
    #[serde(default)]
    business_times: Option<Vec<String>>,
    #[serde(default)]
    available_times: Option<Vec<String>>,
}

impl TimesResponse {
    fn first_slot(self) -> Option<String> {
        let first = |list: Option<Vec<String>>| {
            list.and_then(|l| l.into_iter().next())
                .filter(|t| !t.is_empty())
        };
        first(self.business_times).or_else(|| first(self.available_times))
    }
}

pub fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn cookie_names(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('=').map(|(name, _)| name.trim().to_string()))
        .collect()
}

// Reads the session cookie of a response or fails the session attempt
fn require_session_cookie(status: u16, headers: &HeaderMap) -> Result<String, PortalError> {
    match extract_session_cookie(headers) {
        Some(cookie) => Ok(cookie),
        None => {
            warn!(
                status,
                cookies = ?cookie_names(headers),
                "no session cookie ({SESSION_COOKIE}) in response"
            );
            Err(PortalError::AuthSession(
                "Login failed: No session cookie received. Please check your credentials and ensure the website is accessible."
                    .to_string(),
            ))
        }
    }
}

/// Parses a JSON body and surfaces an `error` field as a domain error.
pub fn parse_portal_json(url: &str, status: u16, body: &str) -> Result<Value, PortalError> {
    let json: Value = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
        warn!(url, status, body = %preview, "invalid JSON response");
        PortalError::Protocol(format!("Invalid JSON response: {e}"))
    })?;

    match json.get("error") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(json),
        Some(Value::String(msg)) if msg.is_empty() => Ok(json),
        Some(Value::String(msg)) => Err(PortalError::DomainApi(msg.clone())),
        Some(other) => Err(PortalError::DomainApi(other.to_string())),
    }
}

pub struct SessionClient {
    // follows redirects; used for page fetches, queries and booking
    client: reqwest::Client,
    // redirects are not followed on the credential POST, so the session cookie
    // is read from the sign-in response itself rather than from a redirect target
    no_redirect: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    token: TokenSelector,
}

impl SessionClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, PortalError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(120))
            .timeout(timeout)
            .build()?;
        let no_redirect = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            no_redirect,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            token: CSRF_META_TOKEN,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, PortalError> {
        Self::new(
            cfg.portal_base_url(),
            cfg.credentials.clone(),
            cfg.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sign_in_url(&self) -> String {
        format!("{}/users/sign_in", self.base_url)
    }

    fn appointment_url(&self, schedule_id: &str) -> String {
        format!("{}/schedule/{schedule_id}/appointment", self.base_url)
    }

    // GET a form page and build a context from its cookie and token
    async fn fetch_page(
        &self,
        url: &str,
        ctx: Option<&SessionContext>,
    ) -> Result<SessionContext, PortalError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(""));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        if let Some(ctx) = ctx {
            headers.extend(ctx.headers()?);
        }

        debug!(url, "GET page");
        let resp = self.client.get(url).headers(headers).send().await?;
        let status = resp.status().as_u16();
        debug!(url, status, "page response");

        self.context_from_page(resp).await
    }

    async fn context_from_page(&self, resp: Response) -> Result<SessionContext, PortalError> {
        let status = resp.status().as_u16();
        let session_cookie = require_session_cookie(status, resp.headers())?;
        let html = resp.text().await?;
        let csrf_token = self.token.extract(&html)?.ok_or_else(|| {
            PortalError::Protocol(format!(
                "anti-forgery token not found ({}@{})",
                self.token.selector, self.token.attribute
            ))
        })?;

        Ok(SessionContext {
            session_cookie,
            csrf_token,
            referer: self.base_url.clone(),
        })
    }

    async fn json_request(
        &self,
        url: &str,
        query: &[(&str, &str)],
        ctx: &SessionContext,
    ) -> Result<Value, PortalError> {
        let mut headers = ctx.headers()?;
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );

        debug!(url, cookie = %ctx.cookie_preview(), "JSON request");
        let resp = self
            .client
            .get(url)
            .query(query)
            .headers(headers)
            .send()
            .await?;
        let status = resp.status().as_u16();
        debug!(url, status, "JSON response");

        let body = resp.text().await?;
        parse_portal_json(url, status, &body)
    }
}

#[async_trait]
impl Portal for SessionClient {
    async fn login(&self) -> Result<SessionContext, PortalError> {
        let url = self.sign_in_url();
        info!(url = %url, "logging in");

        let anonymous = self.fetch_page(&url, None).await?;

        let form = [
            ("utf8", "✓"),
            ("user[email]", self.credentials.email.as_str()),
            ("user[password]", self.credentials.password.as_str()),
            ("policy_confirmed", "1"),
            ("commit", "Sign In"),
        ];

        info!(email = %self.credentials.email, "submitting login form");
        let resp = self
            .no_redirect
            .post(&url)
            .headers(anonymous.headers()?)
            .form(&form)
            .send()
            .await?;
        let status = resp.status().as_u16();
        info!(status, "login response received");

        let session_cookie = require_session_cookie(status, resp.headers())?;
        Ok(SessionContext {
            session_cookie,
            ..anonymous
        })
    }

    async fn query_available_dates(
        &self,
        ctx: &SessionContext,
        schedule_id: &str,
        facility_id: &str,
    ) -> Result<Vec<CalendarDate>, PortalError> {
        let url = format!(
            "{}/schedule/{schedule_id}/appointment/days/{facility_id}.json",
            self.base_url
        );
        info!(url = %url, "checking available dates");

        let json = self
            .json_request(&url, &[("appointments[expedite]", "false")], ctx)
            .await?;
        let days: Vec<DayEntry> = serde_json::from_value(json)
            .map_err(|e| PortalError::Protocol(format!("unexpected days payload: {e}")))?;

        days.iter()
            .map(|day| CalendarDate::parse(&day.date).map_err(PortalError::from))
            .collect()
    }

    async fn query_available_time(
        &self,
        ctx: &SessionContext,
        schedule_id: &str,
        facility_id: &str,
        date: CalendarDate,
    ) -> Result<Option<String>, PortalError> {
        let url = format!(
            "{}/schedule/{schedule_id}/appointment/times/{facility_id}.json",
            self.base_url
        );
        let date = date.to_string();

        let json = self
            .json_request(
                &url,
                &[("date", date.as_str()), ("appointments[expedite]", "false")],
                ctx,
            )
            .await?;
        let times: TimesResponse = serde_json::from_value(json)
            .map_err(|e| PortalError::Protocol(format!("unexpected times payload: {e}")))?;

        Ok(times.first_slot())
    }

    async fn book(
        &self,
        ctx: &SessionContext,
        schedule_id: &str,
        facility_id: &str,
        date: CalendarDate,
        time: &str,
    ) -> Result<(), PortalError> {
        let url = self.appointment_url(schedule_id);

        // tokens are single-use, so the booking page is fetched again first
        let booking = self.fetch_page(&url, Some(ctx)).await?;
        let date = date.to_string();

        let form = [
            ("utf8", "✓"),
            ("authenticity_token", booking.csrf_token.as_str()),
            ("confirmed_limit_message", "1"),
            ("use_consulate_appointment_capacity", "true"),
            ("appointments[consulate_appointment][facility_id]", facility_id),
            ("appointments[consulate_appointment][date]", date.as_str()),
            ("appointments[consulate_appointment][time]", time),
            ("appointments[asc_appointment][facility_id]", ""),
            ("appointments[asc_appointment][date]", ""),
            ("appointments[asc_appointment][time]", ""),
        ];

        let resp = self
            .client
            .post(&url)
            .headers(booking.headers()?)
            .form(&form)
            .send()
            .await?;
        info!(status = resp.status().as_u16(), url = %url, "booking form submitted");

        Ok(())
    }
}
