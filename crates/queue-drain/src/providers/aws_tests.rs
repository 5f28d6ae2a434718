//! Tests for the AWS SQS HTTP transport.
//!
//! Signing and XML parsing are tested directly; the query-API calls run against
//! a wiremock server through the endpoint override.

use super::*;
use chrono::TimeZone;
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test Helper Functions
// ============================================================================

fn test_credentials(session_token: Option<&str>) -> AwsCredentials {
    AwsCredentials {
        access_key_id: "AKIDEXAMPLE".to_string(),
        secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
        session_token: session_token.map(str::to_string),
    }
}

fn test_config(endpoint: &str) -> AwsSqsConfig {
    AwsSqsConfig {
        region: "us-west-2".to_string(),
        access_key_id: Some("AKIDEXAMPLE".to_string()),
        secret_access_key: Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string()),
        session_token: None,
        endpoint: Some(endpoint.to_string()),
        request_timeout_seconds: 5,
    }
}

async fn transport_for(server: &MockServer) -> AwsSqsTransport {
    AwsSqsTransport::new(test_config(&server.uri())).unwrap()
}

fn xml_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/xml")
        .set_body_string(body.to_string())
}

fn error_response(status: u16, code: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_string(format!(
        "<ErrorResponse><Error><Type>Sender</Type><Code>{}</Code><Message>{}</Message></Error>\
         <RequestId>42</RequestId></ErrorResponse>",
        code, message
    ))
}

async fn received_bodies(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .collect()
}

const QUEUE_URL: &str = "https://sqs.us-west-2.amazonaws.com/123456789012/jobs";

// ============================================================================
// Configuration Tests
// ============================================================================

mod configuration_tests {
    use super::*;

    #[test]
    fn test_default_endpoint_follows_region() {
        let config = AwsSqsConfig {
            region: "eu-central-1".to_string(),
            access_key_id: Some("a".to_string()),
            secret_access_key: Some("b".to_string()),
            ..Default::default()
        };

        let transport = AwsSqsTransport::new(config).unwrap();

        assert_eq!(transport.endpoint(), "https://sqs.eu-central-1.amazonaws.com");
        assert_eq!(transport.host, "sqs.eu-central-1.amazonaws.com");
    }

    #[test]
    fn test_endpoint_override_keeps_port_in_host() {
        let transport = AwsSqsTransport::new(test_config("http://localhost:4566/")).unwrap();

        assert_eq!(transport.endpoint(), "http://localhost:4566");
        assert_eq!(transport.host, "localhost:4566");
    }

    #[test]
    fn test_endpoint_path_prefix_is_kept() {
        let transport =
            AwsSqsTransport::new(test_config("http://localhost:4566/sqs?x=1")).unwrap();

        assert_eq!(transport.request_url.as_str(), "http://localhost:4566/sqs/");
        assert_eq!(transport.request_url.path(), "/sqs/");
        assert_eq!(transport.host, "localhost:4566");
    }

    #[test]
    fn test_plain_endpoint_posts_to_root() {
        let transport = AwsSqsTransport::new(test_config("http://localhost:4566")).unwrap();

        assert_eq!(transport.request_url.path(), "/");
    }

    #[test]
    fn test_empty_region_is_rejected() {
        let config = AwsSqsConfig {
            region: String::new(),
            ..Default::default()
        };

        assert!(matches!(
            AwsSqsTransport::new(config),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        assert!(matches!(
            AwsSqsTransport::new(test_config("not a url")),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn test_configured_credentials_take_precedence() {
        let mut config = test_config("http://localhost:4566");
        config.session_token = Some("token".to_string());

        let credentials = AwsCredentials::resolve(&config).unwrap();

        assert_eq!(credentials.access_key_id, "AKIDEXAMPLE");
        assert_eq!(credentials.session_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let rendered = format!("{:?}", test_credentials(Some("very-secret-token")));

        assert!(rendered.contains("AKIDEXAMPLE"));
        assert!(!rendered.contains("wJalrXUtnFEMI"));
        assert!(!rendered.contains("very-secret-token"));
    }
}

// ============================================================================
// Signature Tests
// ============================================================================

mod signature_tests {
    use super::*;

    const BODY: &str = "Action=GetQueueUrl&QueueName=jobs&Version=2012-11-05";

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 45).unwrap()
    }

    #[test]
    fn test_signature_is_deterministic() {
        let signer = AwsV4Signer::new(test_credentials(None), "us-west-2".to_string());

        let headers = signer.sign_request(
            "POST",
            "sqs.us-west-2.amazonaws.com",
            "/",
            BODY,
            &timestamp(),
        );

        assert_eq!(
            headers,
            vec![
                (
                    "Authorization".to_string(),
                    "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240115/us-west-2/sqs/aws4_request, \
                     SignedHeaders=host;x-amz-date, \
                     Signature=7cd49fc208f976a3108b91a8a1a7cf11cfcd4e39a1f9b89a451e7b43e03f3695"
                        .to_string()
                ),
                ("x-amz-date".to_string(), "20240115T123045Z".to_string()),
            ]
        );
    }

    #[test]
    fn test_session_token_is_signed() {
        let signer = AwsV4Signer::new(
            test_credentials(Some("session-token")),
            "us-west-2".to_string(),
        );

        let headers = signer.sign_request(
            "POST",
            "sqs.us-west-2.amazonaws.com",
            "/",
            BODY,
            &timestamp(),
        );

        assert_eq!(headers.len(), 3);
        assert!(headers[0].1.contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
        assert!(headers[0].1.ends_with(
            "Signature=45ffe1b6525bedad6e77eb742c9d6fb4dccc0293b2a2c3d363f785e321f024db"
        ));
        assert_eq!(
            headers[2],
            (
                "x-amz-security-token".to_string(),
                "session-token".to_string()
            )
        );
    }

    #[test]
    fn test_form_encoding_is_sorted_and_escaped() {
        let mut params = Params::new();
        params.insert("Version".to_string(), API_VERSION.to_string());
        params.insert("Action".to_string(), "SendMessageBatch".to_string());
        params.insert(
            "SendMessageBatchRequestEntry.1.MessageBody".to_string(),
            "hello world&more".to_string(),
        );

        assert_eq!(
            encode_form(&params),
            "Action=SendMessageBatch\
             &SendMessageBatchRequestEntry.1.MessageBody=hello%20world%26more\
             &Version=2012-11-05"
        );
    }
}

// ============================================================================
// XML Parsing Tests
// ============================================================================

mod xml_parsing_tests {
    use super::*;

    #[test]
    fn test_parse_queue_url() {
        let xml = r#"<?xml version="1.0"?>
            <GetQueueUrlResponse>
                <GetQueueUrlResult>
                    <QueueUrl>https://sqs.us-west-2.amazonaws.com/123456789012/jobs</QueueUrl>
                </GetQueueUrlResult>
                <ResponseMetadata><RequestId>abc</RequestId></ResponseMetadata>
            </GetQueueUrlResponse>"#;

        assert_eq!(single_value(xml, "QueueUrl").unwrap(), QUEUE_URL);
    }

    #[test]
    fn test_missing_queue_url_is_a_serialization_error() {
        let xml = "<CreateQueueResponse><CreateQueueResult/></CreateQueueResponse>";

        assert!(matches!(
            single_value(xml, "QueueUrl"),
            Err(TransportError::Serialization(_))
        ));
    }

    #[test]
    fn test_parse_received_messages_keeps_body_verbatim() {
        let xml = r#"<ReceiveMessageResponse>
            <ReceiveMessageResult>
                <Message>
                    <MessageId>m-1</MessageId>
                    <ReceiptHandle>rh-1</ReceiptHandle>
                    <MD5OfBody>x</MD5OfBody>
                    <Body>  {"a": 1} &amp; more </Body>
                    <Attribute><Name>SenderId</Name><Value>123</Value></Attribute>
                </Message>
                <Message>
                    <MessageId>m-2</MessageId>
                    <ReceiptHandle>rh-2</ReceiptHandle>
                    <Body>second</Body>
                </Message>
            </ReceiveMessageResult>
        </ReceiveMessageResponse>"#;

        let messages = parse_received_messages(xml).unwrap();

        assert_eq!(
            messages,
            vec![
                ReceivedMessage::new("m-1", "  {\"a\": 1} & more ", ReceiptHandle::new("rh-1")),
                ReceivedMessage::new("m-2", "second", ReceiptHandle::new("rh-2")),
            ]
        );
    }

    #[test]
    fn test_parse_empty_receive() {
        let xml = "<ReceiveMessageResponse><ReceiveMessageResult/></ReceiveMessageResponse>";

        assert!(parse_received_messages(xml).unwrap().is_empty());
    }

    #[test]
    fn test_parse_batch_result_with_failures() {
        let xml = r#"<SendMessageBatchResponse>
            <SendMessageBatchResult>
                <SendMessageBatchResultEntry>
                    <Id>0</Id>
                    <MessageId>m-0</MessageId>
                </SendMessageBatchResultEntry>
                <BatchResultErrorEntry>
                    <Id>1</Id>
                    <Code>InvalidMessageContents</Code>
                    <Message>Invalid characters</Message>
                    <SenderFault>true</SenderFault>
                </BatchResultErrorEntry>
            </SendMessageBatchResult>
        </SendMessageBatchResponse>"#;

        let result = parse_batch_result(xml, "SendMessageBatchResultEntry").unwrap();

        assert_eq!(result.successful, vec!["0".to_string()]);
        assert_eq!(
            result.failed,
            vec![BatchEntryFailure {
                id: "1".to_string(),
                code: "InvalidMessageContents".to_string(),
                message: "Invalid characters".to_string(),
                sender_fault: true,
            }]
        );
        assert!(!result.is_complete());
    }

    #[test]
    fn test_malformed_xml_is_a_serialization_error() {
        let xml = "<ReceiveMessageResponse><Message><Body>x</Oops></Message>";

        assert!(matches!(
            parse_received_messages(xml),
            Err(TransportError::Serialization(_))
        ));
    }
}

// ============================================================================
// Error Mapping Tests
// ============================================================================

mod error_mapping_tests {
    use super::*;

    fn error_xml(code: &str) -> String {
        format!(
            "<ErrorResponse><Error><Code>{}</Code><Message>details</Message></Error></ErrorResponse>",
            code
        )
    }

    #[test]
    fn test_missing_queue_maps_to_queue_not_found() {
        let error = parse_error_response(&error_xml("AWS.SimpleQueueService.NonExistentQueue"), 400);

        assert!(matches!(error, TransportError::QueueNotFound(ref m) if m == "details"));
        assert!(!error.is_transient());
    }

    #[test]
    fn test_signature_errors_map_to_authentication() {
        let error = parse_error_response(&error_xml("SignatureDoesNotMatch"), 403);

        assert!(matches!(error, TransportError::Authentication(_)));
    }

    #[test]
    fn test_forbidden_status_maps_to_authentication() {
        let error = parse_error_response(&error_xml("SomethingNew"), 403);

        assert!(matches!(error, TransportError::Authentication(_)));
    }

    #[test]
    fn test_invalid_receipt_maps_to_invalid_receipt() {
        let error = parse_error_response(&error_xml("ReceiptHandleIsInvalid"), 400);

        assert!(matches!(error, TransportError::InvalidReceipt(_)));
    }

    #[test]
    fn test_other_codes_map_to_service_errors() {
        let error = parse_error_response(&error_xml("InternalError"), 500);

        match error {
            TransportError::Service { code, message } => {
                assert_eq!(code, "InternalError");
                assert_eq!(message, "details");
            }
            other => panic!("expected Service error, got {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_error_body_uses_status() {
        let error = parse_error_response("gateway exploded", 502);

        match error {
            TransportError::Service { code, .. } => assert_eq!(code, "HTTP502"),
            other => panic!("expected Service error, got {:?}", other),
        }
    }
}

// ============================================================================
// Operation Tests
// ============================================================================

mod operation_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_queue_sends_attributes_and_returns_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .and(body_string_contains("Action=CreateQueue"))
            .respond_with(xml_response(&format!(
                "<CreateQueueResponse><CreateQueueResult><QueueUrl>{}</QueueUrl>\
                 </CreateQueueResult></CreateQueueResponse>",
                QUEUE_URL
            )))
            .expect(1)
            .mount(&server)
            .await;
        let transport = transport_for(&server).await;

        let mut attributes = QueueAttributes::new();
        attributes.insert("VisibilityTimeout".to_string(), "600".to_string());
        attributes.insert("FifoQueue".to_string(), "true".to_string());

        let url = transport.create_queue("jobs.fifo", &attributes).await.unwrap();

        assert_eq!(url, QUEUE_URL);
        let body = &received_bodies(&server).await[0];
        assert!(body.contains("QueueName=jobs.fifo"));
        assert!(body.contains("Attribute.1.Name=FifoQueue&Attribute.1.Value=true"));
        assert!(body.contains("Attribute.2.Name=VisibilityTimeout&Attribute.2.Value=600"));
        assert!(body.contains("Version=2012-11-05"));
    }

    #[tokio::test]
    async fn test_send_batch_encodes_entries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=SendMessageBatch"))
            .respond_with(xml_response(
                "<SendMessageBatchResponse><SendMessageBatchResult>\
                 <SendMessageBatchResultEntry><Id>0</Id></SendMessageBatchResultEntry>\
                 <SendMessageBatchResultEntry><Id>1</Id></SendMessageBatchResultEntry>\
                 </SendMessageBatchResult></SendMessageBatchResponse>",
            ))
            .mount(&server)
            .await;
        let transport = transport_for(&server).await;

        let result = transport
            .send_message_batch(
                QUEUE_URL,
                &[
                    SendEntry::new("0", "first message").with_message_group_id("1"),
                    SendEntry::new("1", "second").with_message_group_id("1"),
                ],
            )
            .await
            .unwrap();

        assert!(result.is_complete());
        assert_eq!(result.successful, vec!["0".to_string(), "1".to_string()]);
        let body = &received_bodies(&server).await[0];
        assert!(body.contains("SendMessageBatchRequestEntry.1.Id=0"));
        assert!(body.contains("SendMessageBatchRequestEntry.1.MessageBody=first%20message"));
        assert!(body.contains("SendMessageBatchRequestEntry.2.MessageGroupId=1"));
        assert!(body.contains(&format!("QueueUrl={}", urlencoding::encode(QUEUE_URL))));
    }

    #[tokio::test]
    async fn test_receive_requests_batch_size_and_wait_time() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=ReceiveMessage"))
            .respond_with(xml_response(
                "<ReceiveMessageResponse><ReceiveMessageResult><Message>\
                 <MessageId>m-1</MessageId><ReceiptHandle>rh-1</ReceiptHandle><Body>foo</Body>\
                 </Message></ReceiveMessageResult></ReceiveMessageResponse>",
            ))
            .mount(&server)
            .await;
        let transport = transport_for(&server).await;

        let messages = transport.receive_messages(QUEUE_URL, 5, 3).await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "foo");
        let body = &received_bodies(&server).await[0];
        assert!(body.contains("MaxNumberOfMessages=5"));
        assert!(body.contains("WaitTimeSeconds=3"));
    }

    #[tokio::test]
    async fn test_delete_batch_reports_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DeleteMessageBatch"))
            .respond_with(xml_response(
                "<DeleteMessageBatchResponse><DeleteMessageBatchResult>\
                 <DeleteMessageBatchResultEntry><Id>0</Id></DeleteMessageBatchResultEntry>\
                 <BatchResultErrorEntry><Id>1</Id><Code>ReceiptHandleIsInvalid</Code>\
                 <Message>bad handle</Message><SenderFault>true</SenderFault></BatchResultErrorEntry>\
                 </DeleteMessageBatchResult></DeleteMessageBatchResponse>",
            ))
            .mount(&server)
            .await;
        let transport = transport_for(&server).await;

        let result = transport
            .delete_message_batch(
                QUEUE_URL,
                &[
                    DeleteEntry {
                        id: "0".to_string(),
                        receipt_handle: ReceiptHandle::new("rh-0"),
                    },
                    DeleteEntry {
                        id: "1".to_string(),
                        receipt_handle: ReceiptHandle::new("rh-1"),
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(result.successful, vec!["0".to_string()]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].code, "ReceiptHandleIsInvalid");
        let body = &received_bodies(&server).await[0];
        assert!(body.contains("DeleteMessageBatchRequestEntry.2.ReceiptHandle=rh-1"));
    }

    #[tokio::test]
    async fn test_get_queue_attributes_returns_name_value_pairs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=GetQueueAttributes"))
            .respond_with(xml_response(
                "<GetQueueAttributesResponse><GetQueueAttributesResult>\
                 <Attribute><Name>ApproximateNumberOfMessages</Name><Value>7</Value></Attribute>\
                 <Attribute><Name>QueueArn</Name><Value>arn:aws:sqs:us-west-2:123456789012:jobs</Value></Attribute>\
                 </GetQueueAttributesResult></GetQueueAttributesResponse>",
            ))
            .mount(&server)
            .await;
        let transport = transport_for(&server).await;

        let attributes = transport
            .get_queue_attributes(QUEUE_URL, &["ApproximateNumberOfMessages", "QueueArn"])
            .await
            .unwrap();

        assert_eq!(
            attributes.get("ApproximateNumberOfMessages").map(String::as_str),
            Some("7")
        );
        assert_eq!(
            attributes.get("QueueArn").map(String::as_str),
            Some("arn:aws:sqs:us-west-2:123456789012:jobs")
        );
        let body = &received_bodies(&server).await[0];
        assert!(body.contains("AttributeName.1=ApproximateNumberOfMessages"));
        assert!(body.contains("AttributeName.2=QueueArn"));
    }

    #[tokio::test]
    async fn test_delete_missing_queue_surfaces_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DeleteQueue"))
            .respond_with(error_response(
                400,
                "AWS.SimpleQueueService.NonExistentQueue",
                "The specified queue does not exist.",
            ))
            .mount(&server)
            .await;
        let transport = transport_for(&server).await;

        let error = transport.delete_queue("").await.unwrap_err();

        assert!(matches!(error, TransportError::QueueNotFound(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(error_response(500, "InternalError", "try again"))
            .mount(&server)
            .await;
        let transport = transport_for(&server).await;

        let error = transport.get_queue_url("jobs").await.unwrap_err();

        assert!(matches!(error, TransportError::Service { .. }));
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn test_prefixed_endpoint_signs_the_path_it_posts_to() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sqs/"))
            .and(body_string_contains("Action=GetQueueUrl"))
            .respond_with(xml_response(&format!(
                "<GetQueueUrlResponse><GetQueueUrlResult><QueueUrl>{}</QueueUrl>\
                 </GetQueueUrlResult></GetQueueUrlResponse>",
                QUEUE_URL
            )))
            .expect(1)
            .mount(&server)
            .await;
        let transport =
            AwsSqsTransport::new(test_config(&format!("{}/sqs", server.uri()))).unwrap();

        let url = transport.get_queue_url("jobs").await.unwrap();
        assert_eq!(url, QUEUE_URL);

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        assert_eq!(request.url.path(), "/sqs/");

        let header = |name: &str| {
            request
                .headers
                .get(name)
                .unwrap()
                .to_str()
                .unwrap()
                .to_string()
        };
        let signed_at =
            chrono::NaiveDateTime::parse_from_str(&header("x-amz-date"), "%Y%m%dT%H%M%SZ")
                .unwrap()
                .and_utc();
        let host = format!(
            "{}:{}",
            request.url.host_str().unwrap(),
            request.url.port().unwrap()
        );
        let body = String::from_utf8(request.body.clone()).unwrap();

        let signer = AwsV4Signer::new(test_credentials(None), "us-west-2".to_string());
        let expected = signer.sign_request("POST", &host, request.url.path(), &body, &signed_at);

        assert_eq!(header("authorization"), expected[0].1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_network_error() {
        // Nothing listens on port 1
        let transport = AwsSqsTransport::new(test_config("http://127.0.0.1:1")).unwrap();

        let error = transport.get_queue_url("jobs").await.unwrap_err();

        assert!(matches!(error, TransportError::Network(_)));
        assert!(error.is_transient());
    }
}
