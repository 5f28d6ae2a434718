//! AWS SQS transport over the HTTP query API.
//!
//! Requests are plain HTTP POSTs carrying form-encoded query-API parameters
//! (API version `2012-11-05`), signed with AWS Signature Version 4 and answered
//! with XML. Talking to the service directly keeps the transport small and lets
//! the tests run it against a mock HTTP server through the endpoint override.
//!
//! ## Authentication
//!
//! Credentials come from [`AwsSqsConfig`] when set there, otherwise from the
//! `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`
//! environment variables. A transport without credentials can be built, but
//! every call then fails with [`TransportError::Authentication`].
//!
//! ## Example
//!
//! ```no_run
//! use queue_drain::providers::AwsSqsTransport;
//! use queue_drain::{AwsSqsConfig, QueueConfig, QueueEngine};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = AwsSqsTransport::new(AwsSqsConfig::default())?;
//! let mut engine = QueueEngine::new(QueueConfig::new("jobs"), Arc::new(transport))?;
//! engine.create().await?;
//! engine.fill(vec!["a", "b", "c"]).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::AwsSqsConfig;
use crate::error::{BatchEntryFailure, TransportError};
use crate::message::{BatchResult, DeleteEntry, QueueAttributes, ReceiptHandle, ReceivedMessage, SendEntry};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";

/// Query-API parameters; ordered so signatures and bodies are deterministic
type Params = BTreeMap<String, String>;

// ============================================================================
// Credentials
// ============================================================================

/// Static AWS credentials
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Take credentials from the configuration, falling back to the environment
    pub fn resolve(config: &AwsSqsConfig) -> Option<Self> {
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            return Some(Self {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: config.session_token.clone(),
            });
        }

        Self::from_env()
    }

    fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for query-API requests
///
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    credentials: AwsCredentials,
    region: String,
    service: &'static str,
}

impl AwsV4Signer {
    fn new(credentials: AwsCredentials, region: String) -> Self {
        Self {
            credentials,
            region,
            service: "sqs",
        }
    }

    /// Sign a request whose parameters travel in the body
    ///
    /// Returns the headers to add to the request: `Authorization`, `x-amz-date`
    /// and, with temporary credentials, `x-amz-security-token`.
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical headers must be sorted by name
        let mut canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let mut signed_headers = "host;x-amz-date".to_string();
        if let Some(token) = &self.credentials.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
            signed_headers.push_str(";x-amz-security-token");
        }

        let payload_hash = hex::encode(Sha256::digest(body.as_bytes()));

        // No query string: parameters are form-encoded in the body
        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, path, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.credentials.access_key_id, credential_scope, signed_headers, signature
        );

        let mut headers = vec![
            ("Authorization".to_string(), authorization),
            ("x-amz-date".to_string(), amz_date),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers
    }

    /// kSecret -> kDate -> kRegion -> kService -> kSigning -> signature
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");

        hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

// ============================================================================
// AWS SQS Transport
// ============================================================================

/// [`QueueTransport`] backed by AWS SQS (or an SQS-compatible endpoint)
///
/// Cheap to share: clone it or wrap it in an `Arc`.
#[derive(Clone)]
pub struct AwsSqsTransport {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    endpoint: String,
    host: String,
    /// Where every call is POSTed; its path is the one that gets signed
    request_url: url::Url,
}

impl AwsSqsTransport {
    /// Build a transport for the configured region or endpoint
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if the region is empty, the
    /// endpoint is not a valid URL, or the HTTP client cannot be built.
    pub fn new(config: AwsSqsConfig) -> Result<Self, TransportError> {
        if config.region.is_empty() {
            return Err(TransportError::Configuration(
                "Region cannot be empty".to_string(),
            ));
        }

        let endpoint = config.endpoint_url();
        let mut parsed = url::Url::parse(&endpoint).map_err(|e| {
            TransportError::Configuration(format!("Invalid endpoint '{}': {}", endpoint, e))
        })?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(TransportError::Configuration(format!(
                    "Endpoint '{}' has no host",
                    endpoint
                )))
            }
        };

        // Endpoints mounted under a prefix keep it, always with a trailing slash
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }
        parsed.set_query(None);
        parsed.set_fragment(None);

        let signer = match AwsCredentials::resolve(&config) {
            Some(credentials) => Some(AwsV4Signer::new(credentials, config.region.clone())),
            None => {
                warn!("No AWS credentials found; requests will be rejected");
                None
            }
        };

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| {
                TransportError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            signer,
            endpoint,
            host,
            request_url: parsed,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one signed query-API call and return the XML response body
    async fn call(&self, action: &str, mut params: Params) -> Result<String, TransportError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| TransportError::Authentication("No credentials configured".to_string()))?;

        params.insert("Action".to_string(), action.to_string());
        params.insert("Version".to_string(), API_VERSION.to_string());
        let body = encode_form(&params);

        let headers = signer.sign_request(
            "POST",
            &self.host,
            self.request_url.path(),
            &body,
            &Utc::now(),
        );

        let mut request = self
            .http_client
            .post(self.request_url.clone())
            .header("content-type", "application/x-www-form-urlencoded; charset=utf-8")
            .body(body);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        debug!(action, "Sending SQS request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Network(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                TransportError::Network(format!("Connection failed: {}", e))
            } else {
                TransportError::Network(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| {
            TransportError::Network(format!("Failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            let error = parse_error_response(&response_body, status.as_u16());
            debug!(action, status = status.as_u16(), error = %error, "SQS request failed");
            return Err(error);
        }

        Ok(response_body)
    }
}

impl fmt::Debug for AwsSqsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSqsTransport")
            .field("endpoint", &self.endpoint)
            .field("has_credentials", &self.signer.is_some())
            .finish()
    }
}

#[async_trait]
impl QueueTransport for AwsSqsTransport {
    async fn create_queue(
        &self,
        queue_name: &str,
        attributes: &QueueAttributes,
    ) -> Result<String, TransportError> {
        let mut params = Params::new();
        params.insert("QueueName".to_string(), queue_name.to_string());

        let ordered: BTreeMap<&String, &String> = attributes.iter().collect();
        for (index, (name, value)) in ordered.into_iter().enumerate() {
            let n = index + 1;
            params.insert(format!("Attribute.{}.Name", n), name.clone());
            params.insert(format!("Attribute.{}.Value", n), value.clone());
        }

        let xml = self.call("CreateQueue", params).await?;
        single_value(&xml, "QueueUrl")
    }

    async fn get_queue_url(&self, queue_name: &str) -> Result<String, TransportError> {
        let mut params = Params::new();
        params.insert("QueueName".to_string(), queue_name.to_string());

        let xml = self.call("GetQueueUrl", params).await?;
        single_value(&xml, "QueueUrl")
    }

    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[SendEntry],
    ) -> Result<BatchResult, TransportError> {
        let mut params = queue_params(queue_url);
        for (index, entry) in entries.iter().enumerate() {
            let prefix = format!("SendMessageBatchRequestEntry.{}", index + 1);
            params.insert(format!("{}.Id", prefix), entry.id.clone());
            params.insert(format!("{}.MessageBody", prefix), entry.body.clone());
            if let Some(group) = &entry.message_group_id {
                params.insert(format!("{}.MessageGroupId", prefix), group.clone());
            }
        }

        let xml = self.call("SendMessageBatch", params).await?;
        parse_batch_result(&xml, "SendMessageBatchResultEntry")
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_seconds: u32,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let mut params = queue_params(queue_url);
        params.insert("MaxNumberOfMessages".to_string(), max_messages.to_string());
        params.insert("WaitTimeSeconds".to_string(), wait_seconds.to_string());

        let xml = self.call("ReceiveMessage", params).await?;
        parse_received_messages(&xml)
    }

    async fn delete_message_batch(
        &self,
        queue_url: &str,
        entries: &[DeleteEntry],
    ) -> Result<BatchResult, TransportError> {
        let mut params = queue_params(queue_url);
        for (index, entry) in entries.iter().enumerate() {
            let prefix = format!("DeleteMessageBatchRequestEntry.{}", index + 1);
            params.insert(format!("{}.Id", prefix), entry.id.clone());
            params.insert(
                format!("{}.ReceiptHandle", prefix),
                entry.receipt_handle.to_string(),
            );
        }

        let xml = self.call("DeleteMessageBatch", params).await?;
        parse_batch_result(&xml, "DeleteMessageBatchResultEntry")
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), TransportError> {
        self.call("DeleteQueue", queue_params(queue_url)).await?;
        Ok(())
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[&str],
    ) -> Result<QueueAttributes, TransportError> {
        let mut params = queue_params(queue_url);
        for (index, name) in attribute_names.iter().enumerate() {
            params.insert(format!("AttributeName.{}", index + 1), name.to_string());
        }

        let xml = self.call("GetQueueAttributes", params).await?;
        Ok(collect_records(&xml, "Attribute")?
            .into_iter()
            .filter_map(|mut record| Some((record.remove("Name")?, record.remove("Value")?)))
            .collect())
    }
}

fn queue_params(queue_url: &str) -> Params {
    let mut params = Params::new();
    params.insert("QueueUrl".to_string(), queue_url.to_string());
    params
}

fn encode_form(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

// ============================================================================
// XML Response Parsing
// ============================================================================

type Record = HashMap<String, String>;

/// Collect the leaf values of every `record` element in a response
///
/// Text is kept verbatim (no trimming) so message bodies survive intact.
fn collect_records(xml: &str, record: &str) -> Result<Vec<Record>, TransportError> {
    let mut reader = Reader::from_str(xml);

    let mut records = Vec::new();
    let mut current: Option<Record> = None;
    let mut field: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == record {
                    current = Some(Record::new());
                    field = None;
                } else if current.is_some() {
                    field = Some(name);
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(values), Some(name)) = (current.as_mut(), field.as_ref()) {
                    let text = e.unescape().map_err(xml_error)?;
                    values.entry(name.clone()).or_default().push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let (Some(values), Some(name)) = (current.as_mut(), field.as_ref()) {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    values.entry(name.clone()).or_default().push_str(&text);
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == record.as_bytes() {
                    if let Some(values) = current.take() {
                        records.push(values);
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

fn xml_error(e: quick_xml::Error) -> TransportError {
    TransportError::Serialization(format!("XML parsing error: {}", e))
}

/// Text of the first `element` in the response
fn single_value(xml: &str, element: &str) -> Result<String, TransportError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut inside = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == element.as_bytes() => {
                inside = true;
            }
            Ok(Event::Text(e)) if inside => {
                return e.unescape().map(|s| s.into_owned()).map_err(xml_error);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Err(TransportError::Serialization(format!(
        "{} not found in response",
        element
    )))
}

/// Successful ids come from `success_tag` entries, failures from `BatchResultErrorEntry`
fn parse_batch_result(xml: &str, success_tag: &str) -> Result<BatchResult, TransportError> {
    let successful = collect_records(xml, success_tag)?
        .into_iter()
        .filter_map(|mut record| record.remove("Id"))
        .collect();

    let failed = collect_records(xml, "BatchResultErrorEntry")?
        .into_iter()
        .map(|mut record| BatchEntryFailure {
            id: record.remove("Id").unwrap_or_default(),
            code: record.remove("Code").unwrap_or_default(),
            message: record.remove("Message").unwrap_or_default(),
            sender_fault: record
                .get("SenderFault")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
        })
        .collect();

    Ok(BatchResult { successful, failed })
}

fn parse_received_messages(xml: &str) -> Result<Vec<ReceivedMessage>, TransportError> {
    collect_records(xml, "Message")?
        .into_iter()
        .map(|mut record| {
            let receipt_handle = record.remove("ReceiptHandle").ok_or_else(|| {
                TransportError::Serialization("Message without ReceiptHandle".to_string())
            })?;
            Ok(ReceivedMessage::new(
                record.remove("MessageId").unwrap_or_default(),
                record.remove("Body").unwrap_or_default(),
                ReceiptHandle::new(receipt_handle),
            ))
        })
        .collect()
}

/// Map an error response onto a transport error
fn parse_error_response(xml: &str, status_code: u16) -> TransportError {
    let mut record = collect_records(xml, "Error")
        .ok()
        .and_then(|records| records.into_iter().next())
        .unwrap_or_default();

    let code = record
        .remove("Code")
        .unwrap_or_else(|| format!("HTTP{}", status_code));
    let message = record
        .remove("Message")
        .unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            TransportError::QueueNotFound(message)
        }
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "MissingAuthenticationToken"
        | "ExpiredToken"
        | "AccessDenied" => TransportError::Authentication(format!("{}: {}", code, message)),
        "ReceiptHandleIsInvalid" | "InvalidReceiptHandle" => {
            TransportError::InvalidReceipt(message)
        }
        _ if status_code == 401 || status_code == 403 => {
            TransportError::Authentication(format!("{}: {}", code, message))
        }
        _ => TransportError::Service { code, message },
    }
}
