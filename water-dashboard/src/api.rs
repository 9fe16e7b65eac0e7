use crate::error::{ApiError, ApiResult};
use crate::period::{self, TimeFilter};
use chrono::NaiveDate;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

const LOGIN_PATH: &str = "device/deviceLogin";
const LATEST_PATH: &str = "newWaterReading2/latest";
const STATUS_PATH: &str = "newWaterReading2/toast";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub device_id: String,
    pub initial_pin: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub jwt: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingQuery {
    pub device_id: String,
    pub time_filter: TimeFilter,
    pub target_date: String,
}

impl ReadingQuery {
    pub fn new(device_id: &str, time_filter: TimeFilter, date: NaiveDate) -> Self {
        Self {
            device_id: device_id.to_string(),
            time_filter,
            target_date: period::target_date(date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub device_id: String,
}

/// Parallel label/value arrays for the consumption chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaterSeries {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub data: Vec<f64>,
}

/// One device status event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub date_time: String,
    pub status: String,
    pub timestamp: i64,
}

/// Everything one dashboard refresh brings back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardData {
    pub series: WaterSeries,
    pub statuses: Vec<StatusEntry>,
}

/// The remote telemetry API as the dashboard consumes it.
pub trait TelemetryApi: Clone + Send + Sync + 'static {
    fn set_token(&mut self, token: Option<String>);

    fn login(&self, request: LoginRequest) -> impl Future<Output = ApiResult<LoginResponse>> + Send;

    fn latest_readings(&self, query: ReadingQuery) -> impl Future<Output = ApiResult<WaterSeries>> + Send;

    fn status_history(&self, query: StatusQuery) -> impl Future<Output = ApiResult<Vec<StatusEntry>>> + Send;
}

/// Issues the telemetry request and, when `with_status` is set, the status
/// request alongside it. Either failure fails the whole fetch.
pub async fn fetch_dashboard<A: TelemetryApi>(
    api: &A,
    query: ReadingQuery,
    with_status: bool,
) -> ApiResult<DashboardData> {
    if !with_status {
        let series = api.latest_readings(query).await?;
        return Ok(DashboardData { series, statuses: Vec::new() });
    }

    let status_query = StatusQuery { device_id: query.device_id.clone() };
    let (series, statuses) = tokio::try_join!(
        api.latest_readings(query),
        api.status_history(status_query),
    )?;

    Ok(DashboardData { series, statuses })
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration, accept_invalid_certs: bool) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            base_url: parse_base_url(base_url)?,
            token: None,
        })
    }

    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{}{}: {}", self.base_url, path, e)))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send,
    {
        let url = self.endpoint(path)?;
        log::debug!("POST {}", url);

        let mut request = self.client.post(url).json(body);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status));
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl TelemetryApi for ApiClient {
    fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    async fn login(&self, request: LoginRequest) -> ApiResult<LoginResponse> {
        let url = self.endpoint(LOGIN_PATH)?;
        log::debug!("POST {} for device {}", url, request.device_id);

        // Rejections arrive as a JSON body with `error`, whatever the status code.
        let response = self.client.post(url).json(&request).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let parsed: LoginResponse = serde_json::from_slice(&bytes)?;
        if !status.is_success() {
            log::debug!("login endpoint answered {}", status);
        }

        Ok(parsed)
    }

    async fn latest_readings(&self, query: ReadingQuery) -> ApiResult<WaterSeries> {
        self.post_json(LATEST_PATH, &query).await
    }

    async fn status_history(&self, query: StatusQuery) -> ApiResult<Vec<StatusEntry>> {
        self.post_json(STATUS_PATH, &query).await
    }
}

/// The base must end with `/` for `Url::join` to keep any path prefix.
fn parse_base_url(base_url: &str) -> ApiResult<Url> {
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    Url::parse(&normalized).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn login_request_uses_wire_names() {
        let body = serde_json::to_value(LoginRequest {
            device_id: "1100000571".into(),
            initial_pin: "4321".into(),
        })
        .unwrap();
        assert_eq!(body, json!({"deviceId": "1100000571", "initialPin": "4321"}));
    }

    #[test]
    fn reading_query_formats_target_date() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        let body = serde_json::to_value(ReadingQuery::new("dev-1", TimeFilter::Month, date)).unwrap();
        assert_eq!(
            body,
            json!({"deviceId": "dev-1", "timeFilter": "month", "targetDate": "2024-01-09"})
        );
    }

    #[test]
    fn login_response_fields_are_optional() {
        let ok: LoginResponse = serde_json::from_str(r#"{"jwt":"abc"}"#).unwrap();
        assert_eq!(ok.jwt.as_deref(), Some("abc"));
        assert!(ok.error.is_none());

        let rejected: LoginResponse = serde_json::from_str(r#"{"error":"Invalid PIN"}"#).unwrap();
        assert!(rejected.jwt.is_none());
        assert_eq!(rejected.error.as_deref(), Some("Invalid PIN"));
    }

    #[test]
    fn series_and_status_decode() {
        let series: WaterSeries = serde_json::from_str(r#"{"labels":["a","b"],"data":[1,2.5]}"#).unwrap();
        assert_eq!(series.data, vec![1.0, 2.5]);

        let empty: WaterSeries = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, WaterSeries::default());

        let statuses: Vec<StatusEntry> = serde_json::from_str(
            r#"[{"dateTime":"2024-05-01T10:00:00","status":"LEAK","timestamp":1714557600000}]"#,
        )
        .unwrap();
        assert_eq!(statuses[0].status, "LEAK");
        assert_eq!(statuses[0].timestamp, 1_714_557_600_000);
    }

    #[test]
    fn endpoints_keep_base_path() {
        let client = ApiClient::new("https://localhost:8443/api/", Duration::from_secs(1), false).unwrap();
        assert_eq!(
            client.endpoint(LATEST_PATH).unwrap().as_str(),
            "https://localhost:8443/api/newWaterReading2/latest"
        );

        let bare = ApiClient::new("https://localhost:8443", Duration::from_secs(1), false).unwrap();
        assert_eq!(
            bare.endpoint(LOGIN_PATH).unwrap().as_str(),
            "https://localhost:8443/device/deviceLogin"
        );
    }

    #[derive(Clone)]
    struct CannedApi {
        status_fails: bool,
    }

    impl TelemetryApi for CannedApi {
        fn set_token(&mut self, _token: Option<String>) {}

        async fn login(&self, _request: LoginRequest) -> ApiResult<LoginResponse> {
            Ok(LoginResponse::default())
        }

        async fn latest_readings(&self, _query: ReadingQuery) -> ApiResult<WaterSeries> {
            Ok(WaterSeries { labels: vec!["a".into()], data: vec![7.0] })
        }

        async fn status_history(&self, _query: StatusQuery) -> ApiResult<Vec<StatusEntry>> {
            if self.status_fails {
                return Err(ApiError::Status(reqwest::StatusCode::BAD_GATEWAY));
            }
            Ok(vec![StatusEntry { date_time: "now".into(), status: "OK".into(), timestamp: 1 }])
        }
    }

    fn query() -> ReadingQuery {
        ReadingQuery::new("dev", TimeFilter::Day, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    #[test]
    fn fetch_dashboard_joins_both_requests() {
        let api = CannedApi { status_fails: false };
        let data = tokio_test::block_on(fetch_dashboard(&api, query(), true)).unwrap();
        assert_eq!(data.series.data, vec![7.0]);
        assert_eq!(data.statuses.len(), 1);

        let without_status = tokio_test::block_on(fetch_dashboard(&api, query(), false)).unwrap();
        assert!(without_status.statuses.is_empty());
    }

    #[test]
    fn fetch_dashboard_fails_as_a_whole() {
        let api = CannedApi { status_fails: true };
        let result = tokio_test::block_on(fetch_dashboard(&api, query(), true));
        assert!(matches!(result, Err(ApiError::Status(_))));

        // Status history is not requested at all when disabled.
        assert!(tokio_test::block_on(fetch_dashboard(&api, query(), false)).is_ok());
    }

    /// Serves exactly one HTTP exchange and hands back the raw request text.
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..n]);

                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .filter_map(|l| l.split_once(':'))
                        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).to_string()
        });

        (base_url, handle)
    }

    fn client_with_token(base_url: &str) -> ApiClient {
        let mut client = ApiClient::new(base_url, Duration::from_secs(5), false).unwrap();
        client.set_token(Some("session-jwt".into()));
        client
    }

    #[tokio::test]
    async fn login_reads_error_body_on_unauthorized() {
        let (base_url, server) = one_shot_server("401 Unauthorized", r#"{"error":"Invalid PIN"}"#).await;
        let client = client_with_token(&base_url);

        let response = client
            .login(LoginRequest { device_id: "dev".into(), initial_pin: "0000".into() })
            .await
            .unwrap();
        assert_eq!(response.jwt, None);
        assert_eq!(response.error.as_deref(), Some("Invalid PIN"));

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("post /device/devicelogin "));
        assert!(!request.contains("authorization:"));
        assert!(request.contains(r#""deviceid":"dev""#));
    }

    #[tokio::test]
    async fn telemetry_maps_server_error_and_sends_bearer() {
        let (base_url, server) = one_shot_server("500 Internal Server Error", "{}").await;
        let client = client_with_token(&base_url);

        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let result = client.latest_readings(ReadingQuery::new("dev", TimeFilter::Year, date)).await;
        assert!(matches!(result, Err(ApiError::Status(s)) if s == reqwest::StatusCode::INTERNAL_SERVER_ERROR));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /newWaterReading2/latest "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer session-jwt"));
        assert!(request.contains(r#""targetDate":"2024-06-01""#));
        assert!(request.contains(r#""timeFilter":"year""#));
    }

    #[tokio::test]
    async fn status_history_decodes_success_body() {
        let (base_url, server) = one_shot_server(
            "200 OK",
            r#"[{"dateTime":"2024-06-01T08:00:00","status":"ONLINE","timestamp":1717228800000}]"#,
        )
        .await;
        let client = client_with_token(&base_url);

        let statuses = client.status_history(StatusQuery { device_id: "dev".into() }).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, "ONLINE");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /newWaterReading2/toast "));
    }

    #[tokio::test]
    async fn telemetry_rejects_malformed_json() {
        let (base_url, server) = one_shot_server("200 OK", "not json").await;
        let client = client_with_token(&base_url);

        let result = client.status_history(StatusQuery { device_id: "dev".into() }).await;
        assert!(matches!(result, Err(ApiError::Decode(_))));
        server.await.unwrap();
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let result = ApiClient::new("not a url", Duration::from_secs(1), false);
        assert!(matches!(result, Err(ApiError::InvalidUrl(_))));
    }
}
