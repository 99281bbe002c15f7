//! HTTP client for the Unravel REST API.
//!
//! Covers the three endpoints the report needs: sign-in, unified search
//! (used both as a count probe and for the bulk fetch) and the per-query
//! BigQuery analysis.

use crate::config::ServerConfig;
use crate::error::{ReportError, RequestDiagnostics, Result, SkipReason};
use crate::models::{QueryReference, SearchWindow};
use chrono::SecondsFormat;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

const SIGN_IN_PATH: &str = "/api/v1/signIn";
const SEARCH_PATH: &str = "/api/v1/apps/unifiedsearch";
const JSON: &str = "application/json";

/// Username and password for sign-in. Either may be absent; the server
/// decides what to do with that.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Bearer credential returned by sign-in.
#[derive(Clone)]
pub struct AuthToken(String);

impl AuthToken {
    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("JWT {}", self.0)
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(**)")
    }
}

/// Total matching records reported by the count probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCount {
    pub total: u64,
    /// Number of clusters, when the response carries a breakdown.
    pub clusters: Option<usize>,
}

/// Unified search request body.
#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    from: u64,
    size: u64,
    start_time: String,
    end_time: String,
    executed_by_unravel: bool,
    #[serde(rename = "appStatus")]
    app_status: Vec<&'static str>,
    #[serde(rename = "appTypes")]
    app_types: &'a [String],
}

impl<'a> SearchRequest<'a> {
    fn new(window: &'a SearchWindow, size: u64) -> Self {
        Self {
            from: 0,
            size,
            start_time: window
                .start_time
                .to_rfc3339_opts(SecondsFormat::Micros, false),
            end_time: window.end_time.to_rfc3339_opts(SecondsFormat::Micros, false),
            executed_by_unravel: false,
            app_status: window.status_codes(),
            app_types: &window.app_types,
        }
    }
}

/// Client for a single Unravel server.
#[derive(Debug, Clone)]
pub struct UnravelClient {
    http: Client,
    base_url: String,
}

impl UnravelClient {
    /// Create a client from server settings.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(format!("unravel-impact/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReportError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Sign in and return the bearer credential.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<AuthToken> {
        let url = format!("{}{}", self.base_url, SIGN_IN_PATH);

        let response = self
            .http
            .post(&url)
            .form(credentials)
            .send()
            .await
            .map_err(|source| ReportError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let payload = response.text().await.unwrap_or_default();
        let diagnostics = || {
            Box::new(
                RequestDiagnostics::new("POST", &url)
                    .redacted_body()
                    .response(status.as_u16(), &payload),
            )
        };

        if status != StatusCode::OK {
            return Err(ReportError::Auth(diagnostics()));
        }

        let token = serde_json::from_str::<Value>(&payload)
            .ok()
            .and_then(|v| v.get("token").and_then(Value::as_str).map(str::to_string))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ReportError::Auth(diagnostics()))?;

        info!("Successfully generated authentication token");
        Ok(AuthToken(token))
    }

    /// Probe the search endpoint for the number of matching records.
    pub async fn record_count(&self, token: &AuthToken, window: &SearchWindow) -> Result<RecordCount> {
        let (status, payload, diagnostics) = self.search(token, window, 1).await?;

        if status != StatusCode::OK {
            return Err(ReportError::RecordCount {
                reason: format!("status code {}", status.as_u16()),
                diagnostics,
            });
        }

        let count = serde_json::from_str::<Value>(&payload)
            .map_err(|e| e.to_string())
            .and_then(|v| parse_record_count(&v))
            .map_err(|reason| ReportError::RecordCount {
                reason,
                diagnostics,
            })?;

        if count.total == 0 {
            return Err(ReportError::ZeroRecords);
        }

        debug!("Record count probe: {:?}", count);
        Ok(count)
    }

    /// Request `size` search results.
    ///
    /// Fails only on transport errors and non-200 responses. The payload is
    /// returned undecoded-in-shape: a body that is not JSON at all comes
    /// back as `Value::Null`, leaving shape checks to the caller. The
    /// exchange's diagnostics come along for callers that reject the shape.
    pub async fn unified_search(
        &self,
        token: &AuthToken,
        window: &SearchWindow,
        size: u64,
    ) -> Result<(Value, Box<RequestDiagnostics>)> {
        info!("Retrieving data for {} queries", size);
        let (status, payload, diagnostics) = self.search(token, window, size).await?;

        if status != StatusCode::OK {
            return Err(ReportError::Search(diagnostics));
        }

        info!(
            "Search response for {} queries has a size of: {} kB",
            size,
            payload.len() / 1024
        );

        let value = serde_json::from_str(&payload).unwrap_or_else(|e| {
            debug!("Search response is not valid JSON: {}", e);
            Value::Null
        });
        Ok((value, diagnostics))
    }

    /// Fetch the BigQuery analysis for one query.
    pub async fn query_analysis(
        &self,
        token: &AuthToken,
        reference: &QueryReference,
    ) -> std::result::Result<Map<String, Value>, SkipReason> {
        let url = format!(
            "{}/api/v1/bigquery/{}/{}/analysis",
            self.base_url, reference.cluster_id, reference.id
        );

        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, token.header_value())
            .header(ACCEPT, JSON)
            .send()
            .await
            .map_err(|e| SkipReason::Transport(e.to_string()))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| SkipReason::Transport(e.to_string()))?;

        if status != StatusCode::OK {
            debug!(
                "{}",
                RequestDiagnostics::new("GET", &url)
                    .header(AUTHORIZATION.as_str(), "")
                    .header(ACCEPT.as_str(), JSON)
                    .response(status.as_u16(), &payload)
            );
            return Err(SkipReason::Http(status.as_u16()));
        }

        if payload.trim().is_empty() {
            return Err(SkipReason::EmptyBody);
        }

        match serde_json::from_str::<Value>(&payload) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(SkipReason::NotAnObject),
        }
    }

    /// Link to the query in the Unravel UI.
    pub fn ui_link(&self, reference: &QueryReference) -> String {
        format!(
            "{}/#/app/application/apptype/bigquery?execId={}&projectId={}",
            self.base_url, reference.id, reference.cluster_id
        )
    }

    async fn search(
        &self,
        token: &AuthToken,
        window: &SearchWindow,
        size: u64,
    ) -> Result<(StatusCode, String, Box<RequestDiagnostics>)> {
        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        let body = serde_json::to_string(&SearchRequest::new(window, size))
            .map_err(|e| ReportError::Config(format!("failed to encode search request: {}", e)))?;
        debug!("Search request: {}", body);

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, token.header_value())
            .header(ACCEPT, JSON)
            .header(CONTENT_TYPE, JSON)
            .body(body.clone())
            .send()
            .await
            .map_err(|source| ReportError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|source| ReportError::Transport {
                url: url.clone(),
                source,
            })?;

        let diagnostics = RequestDiagnostics::new("POST", &url)
            .header(AUTHORIZATION.as_str(), "")
            .header(ACCEPT.as_str(), JSON)
            .header(CONTENT_TYPE.as_str(), JSON)
            .body(&body)
            .response(status.as_u16(), &payload);

        Ok((status, payload, Box::new(diagnostics)))
    }
}

/// Read `metadata.totalRecords` (and the optional cluster breakdown) from a
/// count probe response.
pub fn parse_record_count(payload: &Value) -> std::result::Result<RecordCount, String> {
    let metadata = payload
        .as_object()
        .ok_or("response is not a JSON object")?
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or("response has no \"metadata\" object")?;

    let total = metadata
        .get("totalRecords")
        .ok_or("metadata has no \"totalRecords\" field")?
        .as_u64()
        .ok_or("\"totalRecords\" is not a non-negative integer")?;

    let clusters = metadata
        .get("clusters")
        .and_then(Value::as_object)
        .map(Map::len);

    Ok(RecordCount { total, clusters })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryStatus;
    use chrono::Local;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn window() -> SearchWindow {
        SearchWindow::ending_at(
            Local::now(),
            90,
            QueryStatus::ALL.to_vec(),
            vec!["bigquery".to_string()],
        )
    }

    fn client_for(server: &MockServer) -> UnravelClient {
        let config = ServerConfig {
            base_url: server.uri(),
            timeout_seconds: 5,
            accept_invalid_certs: false,
        };
        UnravelClient::new(&config).unwrap()
    }

    fn token() -> AuthToken {
        AuthToken("abc".to_string())
    }

    fn reference(id: &str) -> QueryReference {
        QueryReference {
            id: id.to_string(),
            cluster_id: "proj-1".to_string(),
            cents: 100.0,
            status: "S".to_string(),
        }
    }

    #[test]
    fn test_parse_record_count() {
        let count = parse_record_count(&json!({"metadata": {"totalRecords": 42}})).unwrap();
        assert_eq!(count, RecordCount { total: 42, clusters: None });

        let count = parse_record_count(&json!({
            "metadata": {"totalRecords": 7, "clusters": {"a": 3, "b": 4}}
        }))
        .unwrap();
        assert_eq!(count.clusters, Some(2));
    }

    #[test]
    fn test_parse_record_count_rejects_bad_shapes() {
        assert!(parse_record_count(&json!([1, 2])).is_err());
        assert!(parse_record_count(&json!({"results": []})).is_err());
        assert!(parse_record_count(&json!({"metadata": {}})).is_err());
        assert!(parse_record_count(&json!({"metadata": {"totalRecords": "12"}})).is_err());
        assert!(parse_record_count(&json!({"metadata": {"totalRecords": -1}})).is_err());
    }

    #[test]
    fn test_search_request_body() {
        let window = window();
        let body = serde_json::to_value(SearchRequest::new(&window, 250)).unwrap();

        assert_eq!(body["from"], 0);
        assert_eq!(body["size"], 250);
        assert_eq!(body["executed_by_unravel"], false);
        assert_eq!(body["appStatus"], json!(["K", "F", "R", "S", "P", "U", "W"]));
        assert_eq!(body["appTypes"], json!(["bigquery"]));
    }

    #[test]
    fn test_ui_link() {
        let config = ServerConfig {
            base_url: "https://unravel.example.com/".to_string(),
            ..Default::default()
        };
        let client = UnravelClient::new(&config).unwrap();

        assert_eq!(
            client.ui_link(&reference("job_9")),
            "https://unravel.example.com/#/app/application/apptype/bigquery?execId=job_9&projectId=proj-1"
        );
    }

    #[test]
    fn test_token_debug_is_masked() {
        assert_eq!(format!("{:?}", token()), "AuthToken(**)");
        assert_eq!(token().header_value(), "JWT abc");
    }

    #[tokio::test]
    async fn test_sign_in_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SIGN_IN_PATH))
            .and(body_string_contains("username=alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t0k"})))
            .mount(&server)
            .await;

        let credentials = Credentials {
            username: Some("alice".to_string()),
            password: Some("secret".to_string()),
        };
        let token = client_for(&server).sign_in(&credentials).await.unwrap();
        assert_eq!(token.header_value(), "JWT t0k");
    }

    #[tokio::test]
    async fn test_sign_in_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SIGN_IN_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .sign_in(&Credentials::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Auth(_)));
    }

    #[tokio::test]
    async fn test_sign_in_empty_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SIGN_IN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": ""})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .sign_in(&Credentials::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Auth(_)));
    }

    #[tokio::test]
    async fn test_record_count_probe() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .and(header("Authorization", "JWT abc"))
            .and(body_partial_json(json!({"size": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metadata": {"totalRecords": 1200, "clusters": {"p1": {}, "p2": {}}},
                "results": [{"id": "x"}]
            })))
            .mount(&server)
            .await;

        let count = client_for(&server)
            .record_count(&token(), &window())
            .await
            .unwrap();
        assert_eq!(count.total, 1200);
        assert_eq!(count.clusters, Some(2));
    }

    #[tokio::test]
    async fn test_record_count_zero_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .and(body_partial_json(json!({"size": 1})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"metadata": {"totalRecords": 0}, "results": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .record_count(&token(), &window())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::ZeroRecords));
    }

    #[tokio::test]
    async fn test_record_count_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .record_count(&token(), &window())
            .await
            .unwrap_err();
        match err {
            ReportError::RecordCount { diagnostics, .. } => {
                assert_eq!(diagnostics.status, Some(500));
                assert_eq!(diagnostics.response, "boom");
                assert!(!diagnostics.to_string().contains("JWT abc"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unified_search_non_json_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEARCH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>too big</html>"))
            .mount(&server)
            .await;

        let (payload, diagnostics) = client_for(&server)
            .unified_search(&token(), &window(), 10)
            .await
            .unwrap();
        assert!(payload.is_null());
        assert_eq!(diagnostics.status, Some(200));
        assert_eq!(diagnostics.response, "<html>too big</html>");
    }

    #[tokio::test]
    async fn test_query_analysis_outcomes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/bigquery/proj-1/ok/analysis"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"insightsV2": {}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/bigquery/proj-1/missing/analysis"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/bigquery/proj-1/empty/analysis"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/bigquery/proj-1/list/analysis"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2, 3])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let ok = client.query_analysis(&token(), &reference("ok")).await.unwrap();
        assert!(ok.contains_key("insightsV2"));

        let missing = client.query_analysis(&token(), &reference("missing")).await;
        assert!(matches!(missing, Err(SkipReason::Http(404))));

        let empty = client.query_analysis(&token(), &reference("empty")).await;
        assert!(matches!(empty, Err(SkipReason::EmptyBody)));

        let list = client.query_analysis(&token(), &reference("list")).await;
        assert!(matches!(list, Err(SkipReason::NotAnObject)));
    }
}
