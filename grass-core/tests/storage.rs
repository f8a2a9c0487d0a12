use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use grass_core::{CloudError, StorageClient};

#[tokio::test]
async fn get_download_url_uses_first_download_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v0/b/bucket-1/o/files%2Fu1%2Fnotes.txt"))
        .and(header("authorization", "Firebase test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "files/u1/notes.txt",
            "bucket": "bucket-1",
            "size": "1",
            "downloadTokens": "tok-a,tok-b"
        })))
        .mount(&server)
        .await;

    let client = StorageClient::with_base_url(&server.uri(), "bucket-1").unwrap();
    let url = client
        .get_download_url("files/u1/notes.txt", "test-token")
        .await
        .unwrap();

    assert_eq!(url.path(), "/v0/b/bucket-1/o/files%2Fu1%2Fnotes.txt");
    assert_eq!(url.query(), Some("alt=media&token=tok-a"));
}

#[tokio::test]
async fn get_download_url_without_token_fails() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v0/b/bucket-1/o/files%2Fu1%2Fnotes.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "files/u1/notes.txt",
            "bucket": "bucket-1"
        })))
        .mount(&server)
        .await;

    let client = StorageClient::with_base_url(&server.uri(), "bucket-1").unwrap();
    let err = client
        .get_download_url("files/u1/notes.txt", "test-token")
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::MissingDownloadToken(_)));
}

#[tokio::test]
async fn delete_object_sends_auth_header() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v0/b/bucket-1/o/files%2Fu1%2Fnotes.txt"))
        .and(header("authorization", "Firebase test-token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = StorageClient::with_base_url(&server.uri(), "bucket-1").unwrap();
    client
        .delete_object("files/u1/notes.txt", "test-token")
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_missing_object_reports_status() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v0/b/bucket-1/o/files%2Fu1%2Fgone.txt"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let client = StorageClient::with_base_url(&server.uri(), "bucket-1").unwrap();
    let err = client
        .delete_object("files/u1/gone.txt", "test-token")
        .await
        .unwrap_err();

    assert!(matches!(&err, CloudError::Api { status, .. } if status.as_u16() == 404));
    assert!(!err.is_connectivity());
}
