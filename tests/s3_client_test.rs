//! S3 Client Integration Tests
//!
//! Runs the SDK backed client against a wiremock S3 endpoint and checks that
//! responses land in the right error classes.
//!
//! ## Test Coverage
//!
//! - CreateMultipartUpload / UploadPart / CompleteMultipartUpload / HeadObject
//! - ListParts pagination
//! - 524, 507 and NoSuchUpload classification
//! - Client read timeouts
//! - Handles rebuilt with a different timeout

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use std::time::Duration;
    use tenacious_uploadr::s3::{CompletedPart, ObjectStore, S3Client, S3ClientConfig, StoreError};
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BUCKET: &str = "test-bucket";
    const KEY: &str = "big.bin";
    const OBJECT_PATH: &str = "/test-bucket/big.bin";

    /// Helper function to create an S3 client pointing to a mock server
    fn create_test_s3_client(mock_server: &MockServer, timeout: Duration) -> S3Client {
        let s3_config = S3ClientConfig {
            region: "us-east-1".to_string(),
            endpoint: Some(mock_server.uri()),
            access_key: Some("test-access".to_string()),
            secret_key: Some("test-secret".to_string()),
            session_token: None,
            max_attempts: 1,
            request_timeout: timeout,
        };
        S3Client::new(s3_config).unwrap()
    }

    fn error_body(code: &str, message: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <Error>
                <Code>{code}</Code>
                <Message>{message}</Message>
                <RequestId>req-1</RequestId>
            </Error>"#
        )
    }

    // ========================================================================
    // TEST: Happy path operations
    // ========================================================================

    #[tokio::test]
    async fn test_create_multipart_returns_upload_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(OBJECT_PATH))
            .and(query_param("uploads", ""))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <InitiateMultipartUploadResult>
                    <Bucket>test-bucket</Bucket>
                    <Key>big.bin</Key>
                    <UploadId>real-upload-id-12345</UploadId>
                </InitiateMultipartUploadResult>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server, Duration::from_secs(5));
        let upload_id = client.create_multipart_upload(BUCKET, KEY).await.unwrap();

        assert_eq!(upload_id, "real-upload-id-12345");
    }

    #[tokio::test]
    async fn test_upload_part_returns_etag() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(OBJECT_PATH))
            .and(query_param("partNumber", "1"))
            .and(query_param("uploadId", "upload-1"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"part-etag-1\""))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server, Duration::from_secs(5));
        let etag = client
            .upload_part(BUCKET, KEY, "upload-1", 1, Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert_eq!(etag, "\"part-etag-1\"");
    }

    #[tokio::test]
    async fn test_complete_multipart_upload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(OBJECT_PATH))
            .and(query_param("uploadId", "upload-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <CompleteMultipartUploadResult>
                    <Bucket>test-bucket</Bucket>
                    <Key>big.bin</Key>
                    <ETag>"merged-2"</ETag>
                </CompleteMultipartUploadResult>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server, Duration::from_secs(5));
        let parts = vec![
            CompletedPart {
                part_number: 1,
                etag: "\"a\"".into(),
            },
            CompletedPart {
                part_number: 2,
                etag: "\"b\"".into(),
            },
        ];

        client
            .complete_multipart_upload(BUCKET, KEY, "upload-1", &parts)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_head_object_reports_size() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path(OBJECT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"merged\"")
                    .set_body_bytes(vec![0u8; 1234]),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server, Duration::from_secs(5));
        let head = client.head_object(BUCKET, KEY).await.unwrap();

        assert_eq!(head.size, Some(1234));
        assert_eq!(head.etag.as_deref(), Some("\"merged\""));
    }

    #[tokio::test]
    async fn test_list_parts_follows_pagination() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(OBJECT_PATH))
            .and(query_param("uploadId", "upload-1"))
            .and(query_param_is_missing("part-number-marker"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <ListPartsResult>
                    <Bucket>test-bucket</Bucket>
                    <Key>big.bin</Key>
                    <UploadId>upload-1</UploadId>
                    <NextPartNumberMarker>2</NextPartNumberMarker>
                    <IsTruncated>true</IsTruncated>
                    <Part><PartNumber>1</PartNumber><ETag>"a"</ETag><Size>5</Size></Part>
                    <Part><PartNumber>2</PartNumber><ETag>"b"</ETag><Size>5</Size></Part>
                </ListPartsResult>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(OBJECT_PATH))
            .and(query_param("uploadId", "upload-1"))
            .and(query_param("part-number-marker", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <ListPartsResult>
                    <Bucket>test-bucket</Bucket>
                    <Key>big.bin</Key>
                    <UploadId>upload-1</UploadId>
                    <IsTruncated>false</IsTruncated>
                    <Part><PartNumber>3</PartNumber><ETag>"c"</ETag><Size>1</Size></Part>
                </ListPartsResult>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server, Duration::from_secs(5));
        let parts = client.list_parts(BUCKET, KEY, "upload-1").await.unwrap();

        assert_eq!(parts, vec![1, 2, 3]);
    }

    // ========================================================================
    // TEST: Error classification
    // ========================================================================

    #[tokio::test]
    async fn test_524_is_gateway_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(524))
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server, Duration::from_secs(5));
        let err = client
            .upload_part(BUCKET, KEY, "upload-1", 2, Bytes::from_static(b"data"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::GatewayTimeout(_)), "got {err:?}");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_507_is_insufficient_storage() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(507))
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server, Duration::from_secs(5));
        let err = client
            .upload_part(BUCKET, KEY, "upload-1", 1, Bytes::from_static(b"data"))
            .await
            .unwrap_err();

        assert!(err.is_insufficient_storage(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_no_such_upload_is_session_missing() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(OBJECT_PATH))
            .and(query_param("uploadId", "gone"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string(error_body(
                    "NoSuchUpload",
                    "The specified upload does not exist",
                )),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server, Duration::from_secs(5));
        let parts = [CompletedPart {
            part_number: 1,
            etag: "\"a\"".into(),
        }];
        let err = client
            .complete_multipart_upload(BUCKET, KEY, "gone", &parts)
            .await
            .unwrap_err();

        assert!(err.is_session_missing(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_access_denied_is_service_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(OBJECT_PATH))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_string(error_body("AccessDenied", "Access Denied")),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server, Duration::from_secs(5));
        let err = client.create_multipart_upload(BUCKET, KEY).await.unwrap_err();

        match err {
            StoreError::Service { status, code, .. } => {
                assert_eq!(status, Some(403));
                assert_eq!(code.as_deref(), Some("AccessDenied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    // ========================================================================
    // TEST: Timeouts
    // ========================================================================

    #[tokio::test]
    async fn test_slow_response_is_client_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server, Duration::from_millis(200));
        let err = client.head_object(BUCKET, KEY).await.unwrap_err();

        assert!(err.is_client_timeout(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_longer_timeout_handle_waits_out_slow_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path(OBJECT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 10])
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server, Duration::from_millis(100));
        assert!(client.head_object(BUCKET, KEY).await.is_err());

        let patient = client.rebuild_with_timeout(Duration::from_secs(5));
        assert_eq!(patient.timeout(), Duration::from_secs(5));
        assert_eq!(client.timeout(), Duration::from_millis(100));

        let head = patient.head_object(BUCKET, KEY).await.unwrap();
        assert_eq!(head.size, Some(10));

        let handle = client.with_timeout(Duration::from_secs(5));
        assert!(handle.head_object(BUCKET, KEY).await.is_ok());
    }
}
