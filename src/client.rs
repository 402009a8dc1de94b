use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde_json::Value;

use crate::credentials::Credential;
use crate::error::PollError;
use crate::snapshot::{BucketKind, QuotaBucket, UsageSnapshot};

/// The only network destination this application ever contacts.
pub const USAGE_API_URL: &str = "https://api.anthropic.com/api/oauth/usage";

/// Beta header required for OAuth API
const ANTHROPIC_BETA_HEADER: &str = "anthropic-beta";
const ANTHROPIC_BETA_VALUE: &str = "oauth-2025-04-20";

const CLIENT_USER_AGENT: &str = concat!("claude-usage-tray/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct UsageClient {
    http: reqwest::Client,
    endpoint: String,
}

impl UsageClient {
    pub fn new() -> Result<Self, String> {
        Self::with_endpoint(USAGE_API_URL)
    }

    pub(crate) fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    /// One authenticated GET against the usage endpoint.
    pub async fn fetch(&self, credential: &Credential) -> Result<UsageSnapshot, PollError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", credential.token)).map_err(|_| {
            PollError::MissingCredential("access token contains invalid characters".to_string())
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ANTHROPIC_BETA_HEADER, HeaderValue::from_static(ANTHROPIC_BETA_VALUE));
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = self
            .http
            .get(&self.endpoint)
            .headers(headers)
            .send()
            .await
            .map_err(|e| PollError::Network(describe_transport_error(&e)))?;

        let status = response.status().as_u16();
        if let Some(err) = classify_status(status) {
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| PollError::Network(describe_transport_error(&e)))?;

        parse_usage(&body, Utc::now())
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "connection failed".to_string()
    } else {
        "request failed".to_string()
    }
}

/// Map a response status to an error, or `None` for 2xx.
pub fn classify_status(status: u16) -> Option<PollError> {
    match status {
        200..=299 => None,
        401 | 403 => Some(PollError::Unauthorized {
            status: Some(status),
        }),
        429 => Some(PollError::RateLimited),
        _ => Some(PollError::Unknown { status }),
    }
}

/// Decode a usage payload into a snapshot taken at `taken_at`.
pub fn parse_usage(body: &str, taken_at: DateTime<Utc>) -> Result<UsageSnapshot, PollError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| PollError::MalformedResponse(format!("invalid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| PollError::MalformedResponse("payload is not an object".to_string()))?;

    let mut snapshot = UsageSnapshot::new(taken_at);
    for kind in BucketKind::ALL {
        match object.get(kind.api_key()) {
            None if kind.is_required() => {
                return Err(PollError::MalformedResponse(format!(
                    "missing field `{}`",
                    kind.api_key()
                )));
            }
            None | Some(Value::Null) => {}
            Some(entry) => {
                if let Some(bucket) = parse_bucket(kind, entry)? {
                    snapshot.buckets.insert(kind, bucket);
                }
            }
        }
    }

    Ok(snapshot)
}

fn parse_bucket(kind: BucketKind, entry: &Value) -> Result<Option<QuotaBucket>, PollError> {
    let key = kind.api_key();
    let entry = entry
        .as_object()
        .ok_or_else(|| PollError::MalformedResponse(format!("`{}` is not an object", key)))?;

    let utilization = match entry.get("utilization") {
        None => {
            return Err(PollError::MalformedResponse(format!(
                "`{}.utilization` is missing",
                key
            )))
        }
        Some(Value::Null) => return Ok(None),
        Some(v) => v.as_f64().ok_or_else(|| {
            PollError::MalformedResponse(format!("`{}.utilization` is not a number", key))
        })?,
    };

    let reset_at = match entry.get("resets_at") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|_| {
                    PollError::MalformedResponse(format!("`{}.resets_at` is not a timestamp", key))
                })?
                .with_timezone(&Utc),
        ),
        Some(_) => {
            return Err(PollError::MalformedResponse(format!(
                "`{}.resets_at` is not a string",
                key
            )))
        }
    };

    Ok(Some(QuotaBucket::from_utilization(kind, utilization, reset_at)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAYLOAD: &str = r#"{
        "five_hour": {"utilization": 37.0, "resets_at": "2025-06-02T15:00:00.123456+00:00"},
        "seven_day": {"utilization": 81.5, "resets_at": "2025-06-05T09:00:00+00:00"},
        "seven_day_sonnet": null,
        "seven_day_opus": {"utilization": 0.0, "resets_at": null},
        "extra_usage": {"is_enabled": false}
    }"#;

    fn credential() -> Credential {
        Credential {
            token: "token-abc".to_string(),
            expires_at: None,
            subscription: None,
        }
    }

    fn taken_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_full_payload() {
        let snapshot = parse_usage(PAYLOAD, taken_at()).unwrap();

        let session = snapshot.bucket(BucketKind::Session).unwrap();
        assert_eq!(session.used, 37.0);
        assert_eq!(session.limit, 100.0);
        let reset = session.reset_at.unwrap();
        assert_eq!(reset.timestamp(), Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap().timestamp());

        assert_eq!(snapshot.bucket(BucketKind::Weekly).unwrap().used, 81.5);
        assert!(snapshot.bucket(BucketKind::WeeklySonnet).is_none());

        let opus = snapshot.bucket(BucketKind::WeeklyOpus).unwrap();
        assert_eq!(opus.reset_at, None);
        assert_eq!(snapshot.taken_at, taken_at());
    }

    #[test]
    fn missing_required_bucket_is_malformed() {
        let err = parse_usage(r#"{"five_hour": null}"#, taken_at()).unwrap_err();
        assert_eq!(
            err,
            PollError::MalformedResponse("missing field `seven_day`".to_string())
        );
    }

    #[test]
    fn missing_utilization_is_malformed() {
        let body = r#"{"five_hour": {"resets_at": null}, "seven_day": null}"#;
        assert!(matches!(
            parse_usage(body, taken_at()),
            Err(PollError::MalformedResponse(_))
        ));
    }

    #[test]
    fn null_utilization_means_unavailable() {
        let body = r#"{"five_hour": {"utilization": null, "resets_at": null}, "seven_day": null}"#;
        let snapshot = parse_usage(body, taken_at()).unwrap();
        assert!(snapshot.buckets.is_empty());
    }

    #[test]
    fn bad_timestamp_is_malformed() {
        let body = r#"{"five_hour": {"utilization": 1, "resets_at": "tomorrow"}, "seven_day": null}"#;
        assert!(matches!(
            parse_usage(body, taken_at()),
            Err(PollError::MalformedResponse(_))
        ));
    }

    #[test]
    fn non_object_payload_is_malformed() {
        assert!(matches!(
            parse_usage("[1, 2, 3]", taken_at()),
            Err(PollError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_usage("<html>", taken_at()),
            Err(PollError::MalformedResponse(_))
        ));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(204), None);
        assert_eq!(
            classify_status(401),
            Some(PollError::Unauthorized { status: Some(401) })
        );
        assert_eq!(
            classify_status(403),
            Some(PollError::Unauthorized { status: Some(403) })
        );
        assert_eq!(classify_status(429), Some(PollError::RateLimited));
        assert_eq!(classify_status(500), Some(PollError::Unknown { status: 500 }));
        assert_eq!(classify_status(404), Some(PollError::Unknown { status: 404 }));
    }

    #[tokio::test]
    async fn fetch_sends_bearer_and_beta_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/oauth/usage"))
            .and(header("authorization", "Bearer token-abc"))
            .and(header("anthropic-beta", "oauth-2025-04-20"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAYLOAD))
            .expect(1)
            .mount(&server)
            .await;

        let client = UsageClient::with_endpoint(format!("{}/api/oauth/usage", server.uri())).unwrap();
        let snapshot = client.fetch(&credential()).await.unwrap();
        assert_eq!(snapshot.bucket(BucketKind::Session).unwrap().used, 37.0);
    }

    #[tokio::test]
    async fn fetch_maps_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/expired"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"five_hour": 12}"#))
            .mount(&server)
            .await;

        let fetch = |p: &str| {
            let client = UsageClient::with_endpoint(format!("{}{}", server.uri(), p)).unwrap();
            async move { client.fetch(&credential()).await }
        };

        assert_eq!(
            fetch("/expired").await.unwrap_err(),
            PollError::Unauthorized { status: Some(401) }
        );
        assert_eq!(fetch("/limited").await.unwrap_err(), PollError::RateLimited);
        assert_eq!(
            fetch("/broken").await.unwrap_err(),
            PollError::Unknown { status: 503 }
        );
        assert!(matches!(
            fetch("/garbled").await.unwrap_err(),
            PollError::MalformedResponse(_)
        ));
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let client = UsageClient::with_endpoint(format!("{}/api/oauth/usage", uri)).unwrap();
        assert!(matches!(
            client.fetch(&credential()).await,
            Err(PollError::Network(_))
        ));
    }
}
