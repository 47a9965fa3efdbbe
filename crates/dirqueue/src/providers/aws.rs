//! AWS SQS provider implementation using the HTTP query API.
//!
//! [`SqsQueue`] is a thin proxy: every queue operation maps onto one SQS
//! action and the service itself tracks visibility and redelivery.
//!
//! | Operation                | SQS action           |
//! |--------------------------|----------------------|
//! | `SqsQueue::open`         | `CreateQueue`        |
//! | `set_visibility_timeout` | `SetQueueAttributes` |
//! | `push`                   | `SendMessage`        |
//! | `pull`                   | `ReceiveMessage`     |
//! | `delete`                 | `DeleteMessage`      |
//! | `close`                  | `DeleteQueue`        |
//!
//! Requests are signed with AWS Signature Version 4 and responses are parsed
//! from XML. Setting `endpoint` in [`AwsSqsConfig`] points the proxy at a
//! local emulator instead of the regional service.
//!
//! Standard SQS queues order messages on a best-effort basis only.

use crate::config::{
    visibility_timeout_from_secs, visibility_timeout_secs, AwsSqsConfig, ProviderType,
};
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{Message, MessageHandle, QueueName};
use crate::queue::MessageQueue;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";

/// Visibility timeout SQS applies to a queue created without attributes
const SQS_DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Error Types
// ============================================================================

/// AWS SQS specific errors
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("SQS service error {code}: {message}")]
    ServiceError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AwsError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::NetworkError(_) => true,
            Self::ServiceError { .. } => true, // Most SQS errors are transient
            Self::QueueNotFound(_) => false,
            Self::InvalidReceipt(_) => false,
            Self::ConfigurationError(_) => false,
            Self::SerializationError(_) => false,
        }
    }

    /// Map AWS error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::ServiceError { code, message } => QueueError::ProviderError {
                provider: "AwsSqs".to_string(),
                code,
                message,
            },
            Self::QueueNotFound(queue) => QueueError::QueueNotFound { queue_name: queue },
            Self::InvalidReceipt(message) => QueueError::ProviderError {
                provider: "AwsSqs".to_string(),
                code: "ReceiptHandleIsInvalid".to_string(),
                message,
            },
            Self::ConfigurationError(msg) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message: msg })
            }
            Self::SerializationError(msg) => {
                QueueError::SerializationError(SerializationError::InvalidResponse { message: msg })
            }
        }
    }
}

impl From<AwsError> for QueueError {
    fn from(err: AwsError) -> Self {
        err.to_queue_error()
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for request authentication
///
/// Implements the AWS Signature V4 signing process:
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(access_key: String, secret_key: String, region: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign an HTTP request with AWS Signature V4
    ///
    /// Returns the headers to add to the request: `Authorization`,
    /// `x-amz-date` and `host`.
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        query_params: &[(String, String)],
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> HashMap<String, String> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        // Task 1: Create canonical request
        let canonical_query_string = encode_query(query_params, true);
        let canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let signed_headers = "host;x-amz-date";
        let payload_hash = hex::encode(Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query_string, canonical_headers, signed_headers, payload_hash
        );

        // Task 2: Create string to sign
        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        // Task 3: Calculate signature
        let signature = self.calculate_signature(&string_to_sign, &date_stamp);

        // Task 4: Build authorization header
        let authorization_header = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), authorization_header);
        headers.insert("x-amz-date".to_string(), amz_date);
        headers.insert("host".to_string(), host.to_string());

        headers
    }

    /// Derive the signing key through the 4-level HMAC chain and sign
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes());

        hex::encode(signature)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this never takes the fallback
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return Vec::new();
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode query parameters, optionally sorted for signing
fn encode_query(params: &[(String, String)], sorted: bool) -> String {
    let mut pairs = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>();
    if sorted {
        pairs.sort();
    }
    pairs.join("&")
}

/// Host (and port) part of an endpoint URL
fn endpoint_host(endpoint: &str) -> &str {
    let without_scheme = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .unwrap_or(endpoint);
    without_scheme
        .split_once('/')
        .map_or(without_scheme, |(host, _)| host)
}

// ============================================================================
// HTTP Client
// ============================================================================

/// Signed access to the SQS query API
struct SqsClient {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    endpoint: String,
}

impl SqsClient {
    fn new(config: &AwsSqsConfig) -> Result<Self, AwsError> {
        if config.region.is_empty() {
            return Err(AwsError::ConfigurationError(
                "Region cannot be empty".to_string(),
            ));
        }

        let signer = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => Some(AwsV4Signer::new(
                access_key.clone(),
                secret_key.clone(),
                config.region.clone(),
            )),
            _ => None,
        };

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://sqs.{}.amazonaws.com", config.region));
        let endpoint = endpoint.trim_end_matches('/').to_string();

        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AwsError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer,
            endpoint,
        })
    }

    /// Call `action` with `params`, returning the response body
    async fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<String, AwsError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| AwsError::Authentication("No credentials configured".to_string()))?;

        let mut query_params = vec![
            ("Action".to_string(), action.to_string()),
            ("Version".to_string(), API_VERSION.to_string()),
        ];
        query_params.extend(params.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        let host = endpoint_host(&self.endpoint);
        let timestamp = Utc::now();
        let auth_headers = signer.sign_request("POST", host, "/", &query_params, "", &timestamp);

        let url = format!("{}/?{}", self.endpoint, encode_query(&query_params, false));
        let mut request = self.http_client.post(&url);
        for (key, value) in auth_headers {
            request = request.header(&key, value);
        }

        debug!(action, "Sending SQS request");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AwsError::NetworkError(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                AwsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                AwsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| AwsError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(parse_error_response(&response_body, status.as_u16()));
        }

        Ok(response_body)
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Collect the text of every element named `tag`, in document order
fn element_texts(xml: &str, tag: &[u8]) -> Result<Vec<String>, AwsError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut values = Vec::new();
    let mut inside = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == tag => {
                inside = true;
            }
            Ok(Event::Text(e)) if inside => {
                let text = e.unescape().map_err(|e| {
                    AwsError::SerializationError(format!("Failed to parse XML: {}", e))
                })?;
                values.push(text.into_owned());
                inside = false;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == tag => {
                // Empty element
                if inside {
                    values.push(String::new());
                    inside = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AwsError::SerializationError(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(values)
}

/// Text of the first element named `tag`
fn required_element(xml: &str, tag: &str) -> Result<String, AwsError> {
    element_texts(xml, tag.as_bytes())?
        .into_iter()
        .next()
        .ok_or_else(|| AwsError::SerializationError(format!("{} not found in response", tag)))
}

/// Parse the first message of a ReceiveMessage response, if any
fn parse_receive_message_response(xml: &str) -> Result<Option<Message>, AwsError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    #[derive(PartialEq)]
    enum Field {
        None,
        ReceiptHandle,
        Body,
    }

    let mut in_message = false;
    let mut field = Field::None;
    let mut receipt_handle: Option<String> = None;
    let mut body: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Message" => in_message = true,
                b"ReceiptHandle" if in_message => field = Field::ReceiptHandle,
                b"Body" if in_message => field = Field::Body,
                _ => {}
            },
            Ok(Event::Text(e)) if field != Field::None => {
                let text = e
                    .unescape()
                    .map_err(|e| AwsError::SerializationError(format!("Failed to parse XML: {}", e)))?
                    .into_owned();
                match field {
                    Field::ReceiptHandle => receipt_handle = Some(text),
                    Field::Body => body = Some(text),
                    Field::None => {}
                }
                field = Field::None;
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"Message" => break,
                b"ReceiptHandle" | b"Body" => field = Field::None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AwsError::SerializationError(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !in_message {
        return Ok(None);
    }

    let receipt_handle = receipt_handle.ok_or_else(|| {
        AwsError::SerializationError("ReceiptHandle not found in message".to_string())
    })?;

    Ok(Some(Message::new(
        MessageHandle::new(receipt_handle),
        body.unwrap_or_default(),
    )))
}

/// Parse error response from XML
fn parse_error_response(xml: &str, status_code: u16) -> AwsError {
    let code = required_element(xml, "Code").unwrap_or_else(|_| "Unknown".to_string());
    let message = required_element(xml, "Message").unwrap_or_else(|_| "Unknown error".to_string());

    // Map AWS error codes to our error types
    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            AwsError::QueueNotFound(message)
        }
        "InvalidClientTokenId" | "UnrecognizedClientException" | "SignatureDoesNotMatch" => {
            AwsError::Authentication(format!("{}: {}", code, message))
        }
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => AwsError::InvalidReceipt(message),
        _ if status_code == 401 || status_code == 403 => {
            AwsError::Authentication(format!("{}: {}", code, message))
        }
        _ => AwsError::ServiceError { code, message },
    }
}

// ============================================================================
// AWS SQS Queue
// ============================================================================

/// Queue backed by an Amazon SQS standard queue
pub struct SqsQueue {
    name: QueueName,
    client: SqsClient,
    queue_url: String,
    visibility_timeout_secs: AtomicU64,
    closed: AtomicBool,
}

impl SqsQueue {
    /// Create (or look up) the SQS queue `name`
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` when no credentials are configured or
    /// the service rejects them, and `ConnectionFailed` when the endpoint
    /// cannot be reached.
    pub async fn open(name: QueueName, config: &AwsSqsConfig) -> Result<Self, QueueError> {
        let client = SqsClient::new(config)?;

        let response = client
            .call("CreateQueue", &[("QueueName", name.as_str())])
            .await?;
        let queue_url = required_element(&response, "QueueUrl")?;

        info!(queue = %name, queue_url = %queue_url, "Opened SQS queue");

        Ok(Self {
            name,
            client,
            queue_url,
            visibility_timeout_secs: AtomicU64::new(SQS_DEFAULT_VISIBILITY_TIMEOUT_SECS),
            closed: AtomicBool::new(false),
        })
    }

    /// URL SQS assigned to the queue
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::QueueClosed {
                queue_name: self.name.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for SqsQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsQueue")
            .field("name", &self.name)
            .field("queue_url", &self.queue_url)
            .field("endpoint", &self.client.endpoint)
            .field("has_credentials", &self.client.signer.is_some())
            .finish()
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn set_visibility_timeout(&self, timeout: Duration) -> Result<(), QueueError> {
        self.ensure_open()?;
        let secs = visibility_timeout_secs(timeout)?;
        let value = secs.to_string();

        self.client
            .call(
                "SetQueueAttributes",
                &[
                    ("QueueUrl", self.queue_url.as_str()),
                    ("Attribute.1.Name", "VisibilityTimeout"),
                    ("Attribute.1.Value", value.as_str()),
                ],
            )
            .await?;

        self.visibility_timeout_secs.store(secs, Ordering::SeqCst);
        Ok(())
    }

    async fn push(&self, body: &str) -> Result<MessageHandle, QueueError> {
        self.ensure_open()?;

        let response = self
            .client
            .call(
                "SendMessage",
                &[("QueueUrl", self.queue_url.as_str()), ("MessageBody", body)],
            )
            .await?;

        Ok(MessageHandle::new(required_element(&response, "MessageId")?))
    }

    async fn pull(&self) -> Result<Option<Message>, QueueError> {
        self.ensure_open()?;

        let response = self
            .client
            .call(
                "ReceiveMessage",
                &[
                    ("QueueUrl", self.queue_url.as_str()),
                    ("MaxNumberOfMessages", "1"),
                ],
            )
            .await?;

        Ok(parse_receive_message_response(&response)?)
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), QueueError> {
        self.ensure_open()?;

        let result = self
            .client
            .call(
                "DeleteMessage",
                &[
                    ("QueueUrl", self.queue_url.as_str()),
                    ("ReceiptHandle", handle.as_str()),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(AwsError::InvalidReceipt(message)) => {
                debug!(
                    queue = %self.name,
                    handle = %handle,
                    reason = %message,
                    "Delete ignored for unknown receipt"
                );
                Ok(())
            }
            Err(e) => Err(e.to_queue_error()),
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.client
            .call("DeleteQueue", &[("QueueUrl", self.queue_url.as_str())])
            .await?;
        info!(queue = %self.name, "Deleted SQS queue");

        Ok(())
    }

    fn visibility_timeout(&self) -> Duration {
        visibility_timeout_from_secs(self.visibility_timeout_secs.load(Ordering::SeqCst))
    }

    fn queue_name(&self) -> &QueueName {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }
}
