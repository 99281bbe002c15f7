//! Error types for the report pipeline.
//!
//! Fatal outcomes end the run through [`ReportError`]. Per-record problems
//! during enrichment are [`SkipReason`]s and never leave the enrichment loop.

use std::fmt;
use thiserror::Error;

/// What was sent and received for a failed API call.
#[derive(Debug, Clone, Default)]
pub struct RequestDiagnostics {
    pub method: String,
    pub url: String,
    /// Header name/value pairs, with credentials already redacted.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub status: Option<u16>,
    pub response: String,
}

const REDACTED: &str = "**REDACTED FOR SECURITY**";

impl RequestDiagnostics {
    /// Start a dump for a request.
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Record a header, masking the authorization credential.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let value = if name.eq_ignore_ascii_case("authorization") {
            REDACTED.to_string()
        } else {
            value.to_string()
        };
        self.headers.push((name.to_string(), value));
        self
    }

    /// Record the request body, masking it if it carries credentials.
    pub fn body(mut self, body: &str) -> Self {
        self.body = if body.contains("username") || body.contains("password") {
            Some(REDACTED.to_string())
        } else {
            Some(body.to_string())
        };
        self
    }

    /// Record that a credential-bearing body was sent, without its content.
    pub fn redacted_body(mut self) -> Self {
        self.body = Some(REDACTED.to_string());
        self
    }

    /// Record the response status and payload.
    pub fn response(mut self, status: u16, payload: &str) -> Self {
        self.status = Some(status);
        self.response = payload.to_string();
        self
    }
}

impl fmt::Display for RequestDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BEGIN DEBUG OUTPUT")?;
        writeln!(f, "\tURL:\t\t{} {}", self.method, self.url)?;
        let headers: Vec<String> = self
            .headers
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        writeln!(f, "\tHEADERS:\t{{{}}}", headers.join(", "))?;
        writeln!(f, "\tBODY:\t\t{}", self.body.as_deref().unwrap_or(""))?;
        if let Some(status) = self.status {
            writeln!(f, "\tSTATUS:\t\t{}", status)?;
        }
        write!(f, "\tRESPONSE DATA:\t{}", self.response)
    }
}

/// Fatal errors that terminate a run.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to acquire authentication token\n{0}")]
    Auth(Box<RequestDiagnostics>),

    #[error("failed to acquire record count: {reason}\n{diagnostics}")]
    RecordCount {
        reason: String,
        diagnostics: Box<RequestDiagnostics>,
    },

    #[error("record count probe returned zero queries; nothing to report")]
    ZeroRecords,

    #[error("failed to acquire initial query data\n{0}")]
    Search(Box<RequestDiagnostics>),

    #[error("search payload still malformed after {attempts} reduced requests (last size {last_size})\n{diagnostics}")]
    ShrinkExhausted {
        attempts: u32,
        last_size: u64,
        diagnostics: Box<RequestDiagnostics>,
    },

    #[error("no usable query records in \"results\" (missing, empty or without id/clusterId); fields present: [{}]", .fields.join(", "))]
    NoResults { fields: Vec<String> },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ReportError>;

/// Why a query reference produced no report row.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {0}")]
    Http(u16),

    #[error("empty response body")]
    EmptyBody,

    #[error("response is not a JSON object")]
    NotAnObject,

    #[error("malformed insight data: {0}")]
    MalformedInsights(String),

    #[error("no insights")]
    NoInsights,

    #[error("impact value {0} below threshold")]
    BelowThreshold(i64),
}

impl SkipReason {
    /// Whether the skip came from a failed or unusable response, as opposed
    /// to a valid response that simply had nothing to report.
    pub fn is_failure(&self) -> bool {
        !matches!(self, SkipReason::NoInsights | SkipReason::BelowThreshold(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_header_redacted() {
        let diag = RequestDiagnostics::new("POST", "https://host/api/v1/apps/unifiedsearch")
            .header("Authorization", "JWT secret-token")
            .header("Accept", "application/json");

        let dump = diag.to_string();
        assert!(!dump.contains("secret-token"));
        assert!(dump.contains(REDACTED));
        assert!(dump.contains("Accept: application/json"));
    }

    #[test]
    fn test_credential_body_redacted() {
        let diag = RequestDiagnostics::new("POST", "https://host/api/v1/signIn")
            .body("username=alice&password=hunter2")
            .response(401, "{\"message\":\"bad credentials\"}");

        let dump = diag.to_string();
        assert!(!dump.contains("hunter2"));
        assert!(dump.contains("401"));
        assert!(dump.contains("bad credentials"));
    }

    #[test]
    fn test_plain_body_kept() {
        let diag = RequestDiagnostics::new("POST", "https://host").body("{\"size\":1}");
        assert_eq!(diag.body.as_deref(), Some("{\"size\":1}"));
    }

    #[test]
    fn test_skip_reason_failure_split() {
        assert!(SkipReason::Http(500).is_failure());
        assert!(SkipReason::EmptyBody.is_failure());
        assert!(!SkipReason::NoInsights.is_failure());
        assert!(!SkipReason::BelowThreshold(12).is_failure());
    }
}
