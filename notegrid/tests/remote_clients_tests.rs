mod common;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use notegrid::error::NoteError;
use notegrid::framework::noop_sink;
use notegrid::ingest::{ingest_output, GraphExtractor, GraphRequest, HttpGraphExtractor, InMemoryNoteStore};
use notegrid::llm::{LlmProvider, TextCompletion};
use notegrid::models::{BoundingBox, Note, ProcessingOutput};
use notegrid::orchestrator::image_metadata;
use notegrid::postprocess::PostProcessor;
use notegrid::preprocess::ImageProperties;
use notegrid::vision::{VisionClient, VisionProvider};

use common::{completion_body, test_config};

#[tokio::test]
async fn test_vision_layout_is_parsed_from_reply() {
    let server = MockServer::start().await;
    let reply = "Here is what I see:\n```json\n{\"total_notes\": 2, \"layout\": \"1x2\", \"notes\": [{\"position\": 1, \"has_qr_code\": false}, {\"position\": 2, \"has_title\": true}]}\n```";

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({ "model": "gpt-4o" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(reply)))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(Some(&server.uri()));
    let vision = VisionProvider::new(&config.vision);
    assert!(vision.is_available());

    let layout = vision.analyze_layout(b"png", "openai/gpt-4o").await.unwrap();
    assert_eq!(layout.total_notes, 2);
    assert_eq!(layout.layout, "1x2");
    assert!(layout.notes[1].has_title);
}

#[tokio::test]
async fn test_vision_request_carries_image_and_prompt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("data:image/png;base64,"))
        .and(body_string_contains("Read this note"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("  buy milk \n")))
        .mount(&server)
        .await;

    let config = test_config(Some(&server.uri()));
    let vision = VisionProvider::new(&config.vision);

    let text = vision
        .extract_text(&[137, 80, 78, 71], "Read this note", "gpt-4o")
        .await
        .unwrap();
    assert_eq!(text, "buy milk");
}

#[tokio::test]
async fn test_vision_client_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad image"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(Some(&server.uri()));
    config.vision.max_retries = 3;
    let vision = VisionProvider::new(&config.vision);

    let error = vision.extract_text(b"png", "read", "gpt-4o").await.unwrap_err();
    assert!(matches!(error, NoteError::Vision(ref msg) if msg.contains("bad image")));
}

#[tokio::test]
async fn test_vision_server_error_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("call mom")))
        .mount(&server)
        .await;

    let mut config = test_config(Some(&server.uri()));
    config.vision.max_retries = 2;
    let vision = VisionProvider::new(&config.vision);

    let text = vision.extract_text(b"png", "read", "gpt-4o").await.unwrap();
    assert_eq!(text, "call mom");
}

#[tokio::test]
async fn test_vision_without_key_is_unavailable() {
    let mut config = test_config(None);
    config.vision.api_key = None;
    let vision = VisionProvider::new(&config.vision);

    assert!(!vision.is_available());
    let error = vision.extract_text(b"png", "read", "gpt-4o").await.unwrap_err();
    assert!(matches!(error, NoteError::VisionUnavailable(_)));
}

#[tokio::test]
async fn test_contextual_correction_through_completion_api() {
    let server = MockServer::start().await;
    let reply = r#"[{"original": "tirne", "corrected": "time", "confidence": 0.95, "reason": "rn read as m"}]"#;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("tirne"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(reply)))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(Some(&server.uri()));
    let completion: Arc<dyn TextCompletion> = Arc::new(LlmProvider::new(config.llm.as_ref()));
    let processor = PostProcessor::new(Some(completion), noop_sink());

    let result = processor.process("meet at tirne", None).await.unwrap();
    assert_eq!(result.text, "meet at time");
    assert_eq!(result.corrections.len(), 1);
    assert_eq!(result.confidence, 0.9);
}

#[tokio::test]
async fn test_completion_outage_falls_back_to_local_correction() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "bad key", "type": "invalid_request_error", "param": null, "code": "invalid_api_key" }
        })))
        .mount(&server)
        .await;

    let config = test_config(Some(&server.uri()));
    let completion: Arc<dyn TextCompletion> = Arc::new(LlmProvider::new(config.llm.as_ref()));
    let processor = PostProcessor::new(Some(completion), noop_sink());

    let result = processor.process("meet at tirne.", None).await.unwrap();
    assert_eq!(result.text, "meet at time.");
    assert_eq!(result.confidence, 0.6);
}

#[tokio::test]
async fn test_graph_extraction_posts_note_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/extract"))
        .and(body_partial_json(json!({ "title": "Groceries", "source_type": "rocketbook" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "triples": [
                { "subject": "user", "predicate": "needs", "object": "milk", "confidence": 0.8 }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(Some(&server.uri()));
    let graph = HttpGraphExtractor::new(config.graph.as_ref().unwrap()).unwrap();

    let triples = graph
        .extract(GraphRequest {
            content: "- milk".to_string(),
            title: "Groceries".to_string(),
            source_type: Some("rocketbook".to_string()),
            user_id: "user-1".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(triples.len(), 1);
    assert_eq!(triples[0].object, "milk");
    assert_eq!(triples[0].confidence, Some(0.8));
}

#[tokio::test]
async fn test_graph_service_error_surfaces() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/extract"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let config = test_config(Some(&server.uri()));
    let graph = HttpGraphExtractor::new(config.graph.as_ref().unwrap()).unwrap();

    let error = graph
        .extract(GraphRequest {
            content: "x".to_string(),
            title: "x".to_string(),
            source_type: None,
            user_id: "u".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(error, NoteError::Graph(ref msg) if msg.contains("500")));
}

#[tokio::test]
async fn test_ingest_survives_graph_outage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/extract"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let config = test_config(Some(&server.uri()));
    let graph: Arc<dyn GraphExtractor> =
        Arc::new(HttpGraphExtractor::new(config.graph.as_ref().unwrap()).unwrap());
    let store = InMemoryNoteStore::new();

    let note = |position: usize, text: &str| {
        let mut note = Note::error(position, BoundingBox::new(0, 0, 50, 50), "");
        note.error = None;
        note.text_content.formatted_text = text.to_string();
        note
    };
    let output = ProcessingOutput::new(
        image_metadata(
            "page.png",
            &ImageProperties {
                width: 100,
                height: 100,
                channels: 3,
                file_size: 10,
                format: "PNG".to_string(),
                color_space: "RGB".to_string(),
            },
        ),
        vec![note(1, "## Groceries ##\n- milk"), note(2, "call mom")],
        5,
        Vec::new(),
        Vec::new(),
    );

    let report = ingest_output(&output, "user-1", Some("rocketbook"), &store, Some(graph)).await;
    for task in report.graph_tasks {
        task.await.unwrap();
    }

    assert_eq!(report.stored.len(), 2);
    assert_eq!(report.stored[1].parent_id, Some(report.stored[0].id));
    assert_eq!(store.notes().await.len(), 2);
}
