//! Blocking HTTP clients for the two platforms.
//!
//! Both clients implement the engine's [`SourceLister`] and
//! [`DestinationMutator`] traits. They never retry on their own: every call is
//! paced, sent once, and its failure classified into a [`PlatformError`] for
//! the engine's retry policy to act on.
//!
//! [`SourceLister`]: listsync_engine::SourceLister
//! [`DestinationMutator`]: listsync_engine::DestinationMutator

pub mod audience;
pub mod crm;

use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use listsync_engine::{Pacer, PlatformError};

const TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Secrets read from the environment. Never part of `listsync.yaml`.
#[derive(Clone)]
pub struct Credentials {
    pub crm_token: String,
    pub audience_api_key: String,
    pub audience_list_id: String,
    /// Data-center prefix of the audience API host.
    pub audience_dc: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let crm_token = require_env("CRM_TOKEN")?;
        let audience_api_key = require_env("AUDIENCE_API_KEY")?;
        let audience_list_id = require_env("AUDIENCE_LIST_ID")?;
        let audience_dc = match std::env::var("AUDIENCE_DC") {
            Ok(dc) if !dc.trim().is_empty() => dc,
            _ => data_center(&audience_api_key)
                .context("AUDIENCE_DC is unset and AUDIENCE_API_KEY has no '-<dc>' suffix")?,
        };
        Ok(Self {
            crm_token,
            audience_api_key,
            audience_list_id,
            audience_dc,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("audience_list_id", &self.audience_list_id)
            .field("audience_dc", &self.audience_dc)
            .finish_non_exhaustive()
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("environment variable {name} is not set"))
}

/// `abc123-us21` → `us21`
pub fn data_center(api_key: &str) -> Option<String> {
    api_key
        .rsplit_once('-')
        .map(|(_, dc)| dc.trim().to_owned())
        .filter(|dc| !dc.is_empty())
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Base URL, auth header and pacer shared by every request of one client.
pub(crate) struct Http {
    agent: ureq::Agent,
    base_url: String,
    authorization: String,
    pacer: Pacer,
}

impl Http {
    pub(crate) fn new(base_url: impl Into<String>, authorization: String, pacer: Pacer) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(TIMEOUT).build(),
            base_url: base_url.into(),
            authorization,
            pacer,
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.pacer.wait();
        tracing::debug!("{method} {path}");
        self.agent
            .request(method, &format!("{}{}", self.base_url, path))
            .set("Authorization", &self.authorization)
    }

    pub(crate) fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        let mut req = self.request("GET", path);
        for (k, v) in query {
            req = req.query(k, v);
        }
        parse(req.call().map_err(classify)?)
    }

    pub(crate) fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, PlatformError> {
        parse(self.request(method, path).send_json(body).map_err(classify)?)
    }

    /// Send a request whose response body is ignored.
    pub(crate) fn send_unit(
        &self,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(), PlatformError> {
        let req = self.request(method, path);
        let sent = match body {
            Some(body) => req.send_json(body),
            None => req.call(),
        };
        sent.map(drop).map_err(classify)
    }
}

fn parse<T: DeserializeOwned>(resp: ureq::Response) -> Result<T, PlatformError> {
    resp.into_json::<T>()
        .map_err(|e| PlatformError::transient(format!("unreadable response body: {e}")))
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Map a ureq failure onto the engine's error kinds.
pub(crate) fn classify(err: ureq::Error) -> PlatformError {
    match err {
        ureq::Error::Status(code, resp) => {
            let retry_after = resp
                .header("Retry-After")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.into_string().unwrap_or_default();
            classify_status(code, retry_after, &body)
        }
        ureq::Error::Transport(t) => PlatformError::transient(t.to_string()),
    }
}

pub(crate) fn classify_status(code: u16, retry_after: Option<Duration>, body: &str) -> PlatformError {
    let detail = if body.trim().is_empty() {
        format!("HTTP {code}")
    } else {
        format!("HTTP {code}: {}", body.trim())
    };
    match code {
        401 | 403 => PlatformError::auth(detail),
        404 => PlatformError::not_found(detail),
        429 => {
            tracing::warn!("rate limited, retry after {retry_after:?}");
            PlatformError::rate_limited(retry_after)
        }
        500..=599 => PlatformError::transient(detail),
        400 => match missing_field(body) {
            Some(field) => PlatformError::missing_field(field),
            None => PlatformError::validation(detail),
        },
        _ => PlatformError::validation(detail),
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    context: Option<ErrorContext>,
}

#[derive(Deserialize)]
struct ErrorContext {
    #[serde(default, rename = "propertyName")]
    property_name: Vec<String>,
}

/// The unknown field named by a 400 body, if that is what it complains about.
///
/// Audience bodies name it as `merge_fields.<TAG>`; CRM bodies carry a
/// `PROPERTY_DOESNT_EXIST` code with the property in the context.
fn missing_field(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed.errors.into_iter().find_map(|e| {
        if let Some(tag) = e.field.as_deref().and_then(|f| f.strip_prefix("merge_fields.")) {
            return Some(tag.to_owned());
        }
        if e.code.as_deref() == Some("PROPERTY_DOESNT_EXIST") {
            return e.context.and_then(|c| c.property_name.into_iter().next());
        }
        None
    })
}

/// Treat "already gone" as success for idempotent deletes.
pub(crate) fn ignore_not_found(result: Result<(), PlatformError>) -> Result<(), PlatformError> {
    match result {
        Err(e) if e.kind == listsync_engine::PlatformErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listsync_engine::PlatformErrorKind;

    #[test]
    fn data_center_from_key_suffix() {
        assert_eq!(data_center("0123abcd-us21").as_deref(), Some("us21"));
        assert_eq!(data_center("nodash"), None);
        assert_eq!(data_center("trailing-"), None);
    }

    #[test]
    fn status_codes_map_to_kinds() {
        let kind = |code| classify_status(code, None, "").kind;
        assert_eq!(kind(401), PlatformErrorKind::Auth);
        assert_eq!(kind(403), PlatformErrorKind::Auth);
        assert_eq!(kind(404), PlatformErrorKind::NotFound);
        assert_eq!(kind(429), PlatformErrorKind::RateLimited);
        assert_eq!(kind(503), PlatformErrorKind::Transient);
        assert_eq!(kind(400), PlatformErrorKind::Validation);
        assert_eq!(kind(422), PlatformErrorKind::Validation);
    }

    #[test]
    fn rate_limit_keeps_retry_after() {
        let e = classify_status(429, Some(Duration::from_secs(7)), "");
        assert_eq!(e.retry_after, Some(Duration::from_secs(7)));
    }

    #[test]
    fn unknown_merge_field_is_missing_field() {
        let body = r#"{"title":"Invalid Resource","errors":[{"field":"merge_fields.ORI_LISTS","message":"not found"}]}"#;
        let e = classify_status(400, None, body);
        assert_eq!(e.kind, PlatformErrorKind::MissingField);
        assert_eq!(e.field.as_deref(), Some("ORI_LISTS"));
    }

    #[test]
    fn unknown_crm_property_is_missing_field() {
        let body = r#"{"status":"error","errors":[{"code":"PROPERTY_DOESNT_EXIST","context":{"propertyName":["branches"]}}]}"#;
        let e = classify_status(400, None, body);
        assert_eq!(e.field.as_deref(), Some("branches"));
    }

    #[test]
    fn other_bad_request_is_validation() {
        let e = classify_status(400, None, r#"{"title":"Member Exists"}"#);
        assert_eq!(e.kind, PlatformErrorKind::Validation);
        assert!(e.message.contains("Member Exists"));
    }
}
