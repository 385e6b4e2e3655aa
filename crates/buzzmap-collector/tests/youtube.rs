//! Integration tests for `YoutubeSource` using wiremock HTTP mocks.

use buzzmap_collector::{collect_source, HttpSettings, PostSource, YoutubeSource};
use buzzmap_core::{Platform, SourceConfig};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> HttpSettings {
    HttpSettings {
        timeout_secs: 5,
        user_agent: "buzzmap-test".to_owned(),
        max_retries: 1,
        backoff_base_ms: 0,
    }
}

fn source_config(max_posts: usize) -> SourceConfig {
    SourceConfig {
        platform: Platform::Youtube,
        enabled: true,
        weight: 1.0,
        query: "グルメ OR ラーメン".to_owned(),
        max_posts,
        max_age_days: 30,
        max_duration_secs: Some(120),
    }
}

fn video(id: &str, duration: &str, likes: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "snippet": {
            "title": format!("Video {id}"),
            "description": "新宿 ラーメン",
            "publishedAt": "2024-06-01T10:00:00Z",
            "channelId": "UC1"
        },
        "contentDetails": {"duration": duration},
        "statistics": {"viewCount": "1000", "likeCount": likes}
    })
}

#[tokio::test]
async fn searches_then_filters_by_duration() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("order", "viewCount"))
        .and(query_param("type", "video"))
        .and(query_param("key", "yt-key"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [
                {"id": {"kind": "youtube#video", "videoId": "short1"}},
                {"id": {"kind": "youtube#video", "videoId": "long1"}}
            ],
            "nextPageToken": "PAGE2"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("pageToken", "PAGE2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{"id": {"kind": "youtube#video", "videoId": "short2"}}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/videos"))
        .and(query_param("id", "short1,long1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [video("short1", "PT45S", "300"), video("long1", "PT10M", "900")]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/videos"))
        .and(query_param("id", "short2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [video("short2", "PT2M", "12")]
        })))
        .mount(&server)
        .await;

    let source = YoutubeSource::with_base_url("yt-key", &source_config(80), settings(), &server.uri())
        .expect("client construction should not fail");

    let result = collect_source(&source).await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    let ids: Vec<_> = result.posts.iter().map(|p| p.post_id.as_str()).collect();
    assert_eq!(ids, vec!["short1", "short2"]);
    assert_eq!(result.posts[0].like_count, 300);
    assert_eq!(result.posts[0].text, "Video short1\n新宿 ラーメン");
    assert_eq!(result.posts[0].platform, Platform::Youtube);
}

#[tokio::test]
async fn empty_search_yields_empty_last_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
        .mount(&server)
        .await;

    let source =
        YoutubeSource::with_base_url("yt-key", &source_config(80), settings(), &server.uri()).unwrap();
    let page = source.fetch_page(None).await.unwrap();
    assert!(page.posts.is_empty());
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn server_error_on_second_page_keeps_first_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{"id": {"videoId": "a"}}],
            "nextPageToken": "P2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("pageToken", "P2"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [video("a", "PT30S", "7")]
        })))
        .mount(&server)
        .await;

    let source =
        YoutubeSource::with_base_url("yt-key", &source_config(80), settings(), &server.uri()).unwrap();
    let result = collect_source(&source).await;
    assert_eq!(result.posts.len(), 1);
    let err = result.error.expect("second page should fail");
    assert_eq!(err.platform, Platform::Youtube);
}
