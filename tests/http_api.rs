mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{assistant, embedder, generator};
use docchat::{AssistantConfig, server};
use serde_json::{Value, json};
use tower::ServiceExt;

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn read_body(
    response: axum::response::Response,
) -> Result<String, Box<dyn std::error::Error>> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn post_json(
    uri: &str,
    body: Value,
) -> Result<Request<Body>, axum::http::Error> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
}

#[tokio::test]
async fn ingest_then_ask_over_http() -> TestResult {
    let dir = tempfile::tempdir()?;
    let generator = generator(
        &["search", "Where do kestrels hunt?"],
        &["Over open fields."],
    );
    let assistant = Arc::new(assistant(
        dir.path(),
        embedder(),
        generator,
        AssistantConfig::default(),
    )?);
    let app = server::router(assistant);

    let response = app
        .clone()
        .oneshot(post_json(
            "/ingest",
            json!({
                "text": "Kestrels hunt over open fields and hover in place.",
                "source": "birds.txt"
            }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(post_json(
            "/ask",
            json!({
                "question": "Where do they hunt?",
                "history": [
                    {"role": "user", "content": "Tell me about kestrels"},
                    {"role": "assistant", "content": "They are small falcons."}
                ]
            }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_body(response).await?;
    let frames: Vec<Value> = body
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], "meta");
    assert_eq!(frames[0]["intent"], "search");
    assert_eq!(frames[0]["standalone_question"], "Where do kestrels hunt?");
    assert_eq!(
        frames[0]["sources"],
        json!(["Kestrels hunt over open fields and hover in place."])
    );
    assert_eq!(
        frames[1],
        json!({"type": "token", "content": "Over open fields."})
    );
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_not_found() -> TestResult {
    let dir = tempfile::tempdir()?;
    let assistant = Arc::new(assistant(
        dir.path(),
        embedder(),
        generator(&[], &[]),
        AssistantConfig::default(),
    )?);

    let response = server::router(assistant)
        .oneshot(Request::get("/missing").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
