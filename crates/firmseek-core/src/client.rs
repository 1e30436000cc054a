//! Query client for the firmware search endpoint.
//!
//! One call probes one candidate. The HTTP status alone says little: the
//! service reports success, throttling and contract errors through a `code`
//! field in the JSON body, and a nested `data.code` distinguishes a match
//! from a confirmed absence. [`classify`] turns a raw exchange into a
//! [`QueryOutcome`].

use crate::config::DeviceTarget;
use crate::error::{Error, Result};
use crate::version::VersionBuild;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::future::Future;
use tracing::{error, info, warn};

/// Top-level `code` of an accepted request
pub const SUCCESS_CODE: &str = "000";

/// Nested `data.code` values meaning "no firmware for this candidate"
pub const NOT_FOUND_CODES: [&str; 2] = ["-5", "-7"];

/// Phrase the service puts in `msg` when requests arrive too often
pub const RATE_LIMIT_PHRASE: &str = "过于频繁";

/// Constant `dataSource` value sent with every request
pub const DATA_SOURCE: u8 = 2;

const REFERER_BASE: &str =
    "https://partners.hikvision.com/support/upgrade/download/detail?serialNo=";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/138.0.0.0 Safari/537.36 Edg/138.0.0.0";

/// Download descriptor returned for an accepted candidate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareRecord {
    /// Result code; anything outside [`NOT_FOUND_CODES`] is a match
    #[serde(deserialize_with = "required_string")]
    pub code: String,
    /// Upgrade path hint
    #[serde(default, deserialize_with = "lenient_string")]
    pub upgrade_path: Option<String>,
    /// Version the service offers
    #[serde(default, deserialize_with = "lenient_string")]
    pub upgrade_version: Option<String>,
    /// Identifier for the download endpoint
    #[serde(default, deserialize_with = "lenient_string")]
    pub download_id: Option<String>,
    /// Publication timestamp
    #[serde(default, deserialize_with = "lenient_string")]
    pub update_time: Option<String>,
    /// Firmware file name
    #[serde(default, deserialize_with = "lenient_string")]
    pub file_name: Option<String>,
    /// Firmware file size
    #[serde(default, deserialize_with = "lenient_string")]
    pub file_size: Option<String>,
}

/// Classified result of a single HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The service knows firmware for this candidate
    Found(FirmwareRecord),
    /// Confirmed absence
    NotFound,
    /// Rate limited; carries the service's message
    Throttled(String),
    /// Non-200 HTTP status
    TransportError(u16),
    /// Success code but an unusable body; carries the raw payload
    Malformed(String),
}

impl QueryOutcome {
    /// Short label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::NotFound => "not-found",
            Self::Throttled(_) => "throttled",
            Self::TransportError(_) => "transport-error",
            Self::Malformed(_) => "malformed",
        }
    }

    /// Writes the outcome to the log with full device and candidate context.
    ///
    /// Found results are the actionable output of a run and log at INFO.
    pub fn log(&self, target: &DeviceTarget, candidate: &VersionBuild) {
        let device = target.name.as_str();
        let serial = target.serial_no.as_str();
        match self {
            Self::Found(record) => {
                warn!(
                    device,
                    serial,
                    candidate = %candidate,
                    "Found version: {} for device {} with serial {}",
                    candidate,
                    target.device_id,
                    serial
                );
                warn!(device, candidate = %candidate, record = ?record, "firmware record");
            }
            Self::NotFound => {
                info!(device, serial, candidate = %candidate, "no firmware for candidate");
            }
            Self::Throttled(message) => {
                warn!(device, serial, candidate = %candidate, message = message.as_str(), "throttled by service");
            }
            Self::TransportError(status) => {
                error!(device, serial, candidate = %candidate, status, "HTTP request failed");
            }
            Self::Malformed(payload) => {
                error!(device, serial, candidate = %candidate, payload = payload.as_str(), "malformed response");
            }
        }
    }
}

/// JSON body of a firmware search request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest<'a> {
    device_id: &'a str,
    serial_no: &'a str,
    build: String,
    version1: String,
    version2: String,
    version3: String,
    data_source: u8,
}

impl<'a> SearchRequest<'a> {
    /// Builds the request body for probing `candidate` on `target`
    pub fn new(target: &'a DeviceTarget, candidate: &VersionBuild) -> Self {
        Self {
            device_id: &target.device_id,
            serial_no: &target.serial_no,
            build: candidate.build_code(),
            version1: candidate.triple.major.to_string(),
            version2: candidate.triple.minor.to_string(),
            version3: candidate.triple.patch.to_string(),
            data_source: DATA_SOURCE,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default, deserialize_with = "lenient_string")]
    code: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Whether a top-level error message is the service's throttle notice
pub fn is_throttle_message(message: &str) -> bool {
    message.contains(RATE_LIMIT_PHRASE)
}

/// Classifies one exchange.
///
/// An unexpected top-level code without the throttle phrase is returned as
/// [`Error::ProtocolViolation`]: the service is saying something this client
/// does not understand, and continuing would mean guessing.
pub fn classify(status: u16, body: &str) -> Result<QueryOutcome> {
    if status != 200 {
        return Ok(QueryOutcome::TransportError(status));
    }

    let Ok(envelope) = serde_json::from_str::<Envelope>(body) else {
        return Ok(QueryOutcome::Malformed(body.to_string()));
    };

    let code = envelope.code.unwrap_or_default();
    if code != SUCCESS_CODE {
        let message = envelope.msg.unwrap_or_default();
        if is_throttle_message(&message) {
            return Ok(QueryOutcome::Throttled(message));
        }
        return Err(Error::protocol_violation(code, message));
    }

    let record = envelope
        .data
        .filter(|data| !data.is_null())
        .and_then(|data| serde_json::from_value::<FirmwareRecord>(data).ok());
    let Some(record) = record else {
        return Ok(QueryOutcome::Malformed(body.to_string()));
    };

    if NOT_FOUND_CODES.contains(&record.code.as_str()) {
        Ok(QueryOutcome::NotFound)
    } else {
        Ok(QueryOutcome::Found(record))
    }
}

/// Something that can probe one candidate against the firmware service.
///
/// Implementations perform exactly one exchange per call; retries belong to
/// [`crate::backoff::BackoffController`].
pub trait FirmwareQuery: Send + Sync {
    /// Probes `candidate` for `target`
    fn query(
        &self,
        target: &DeviceTarget,
        candidate: &VersionBuild,
    ) -> impl Future<Output = Result<QueryOutcome>> + Send;
}

/// [`FirmwareQuery`] over HTTP.
///
/// Holds one connection pool; create one per device so sessions are never
/// shared across searches.
#[derive(Debug, Clone)]
pub struct HttpQueryClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpQueryClient {
    /// Creates a client whose headers pass the service's browser checks for
    /// `target`'s serial number
    pub fn new(endpoint: impl Into<String>, target: &DeviceTarget) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(browser_headers(&target.serial_no)?)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Endpoint this client posts to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl FirmwareQuery for HttpQueryClient {
    async fn query(&self, target: &DeviceTarget, candidate: &VersionBuild) -> Result<QueryOutcome> {
        let request = SearchRequest::new(target, candidate);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = if status == 200 {
            response.text().await?
        } else {
            String::new()
        };
        classify(status, &body)
    }
}

fn browser_headers(serial_no: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,zh-CN;q=0.8,zh;q=0.7,ja;q=0.6,zh-TW;q=0.5"),
    );
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(
        HeaderName::from_static("sec-ch-ua"),
        HeaderValue::from_static(
            "\"Not)A;Brand\";v=\"8\", \"Chromium\";v=\"138\", \"Microsoft Edge\";v=\"138\"",
        ),
    );
    headers.insert(
        HeaderName::from_static("sec-ch-ua-mobile"),
        HeaderValue::from_static("?0"),
    );
    headers.insert(
        HeaderName::from_static("sec-ch-ua-platform"),
        HeaderValue::from_static("\"Windows\""),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("empty"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("cors"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );

    let referer = format!("{}{}", REFERER_BASE, serial_no);
    let referer = HeaderValue::from_str(&referer).map_err(|_| Error::InvalidHeader {
        name: "referer",
        value: referer.clone(),
    })?;
    headers.insert(header::REFERER, referer);

    Ok(headers)
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn required_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_string(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing string value"))
}
