//! HTTP-level tests for the track search client

use musichive::clients::{SearchClient, errors::Error};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn search_body(names: &[&str]) -> serde_json::Value {
    let items: Vec<_> = names
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "artists": [{ "name": format!("{name} Band") }],
                "album": { "images": [{ "url": format!("https://i.scdn.co/image/{}", name.len()) }] }
            })
        })
        .collect();
    json!({ "tracks": { "href": "https://api.spotify.com/v1/search", "items": items, "total": names.len() } })
}

async fn client_for(server: &MockServer) -> SearchClient {
    SearchClient::builder()
        .api_base(format!("{}/v1", server.uri()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_search_sends_expected_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("q", "miles davis"))
        .and(query_param("type", "track"))
        .and(query_param("limit", "10"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&["So What", "Freddie Freeloader", "Blue in Green"])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let tracks = client
        .search_tracks("miles davis", Some("secret-token"))
        .await
        .unwrap();

    let names: Vec<_> = tracks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["So What", "Freddie Freeloader", "Blue in Green"]);
    assert_eq!(tracks[0].artist, "So What Band");
    assert!(tracks[0].image_url.is_some());
}

#[tokio::test]
async fn test_search_without_token_sends_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&["Paranoid"])))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let result = client.search_tracks("rock", None).await;
    assert!(matches!(result, Err(Error::MissingToken)));
}

#[tokio::test]
async fn test_search_missing_tracks_key_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "albums": { "items": [] } })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let result = client.search_tracks("rock", Some("token")).await;
    assert!(matches!(result, Err(Error::Parse(_))));
}

#[tokio::test]
async fn test_search_empty_result_is_ok() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&[])))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let tracks = client.search_tracks("zzzzzz", Some("token")).await.unwrap();
    assert!(tracks.is_empty());
}

#[tokio::test]
async fn test_search_reports_api_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "status": 401, "message": "Invalid access token" }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    match client.search_tracks("rock", Some("expired")).await {
        Err(Error::Api { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid access token");
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_search_transport_failure() {
    // nothing listens on the discard port
    let client = SearchClient::builder()
        .api_base("http://127.0.0.1:9/v1")
        .build()
        .unwrap();

    let result = client.search_tracks("rock", Some("token")).await;
    assert!(matches!(result, Err(Error::Transport(_))));
}
