mod common;

use std::sync::Arc;

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use notegrid::config::{OcrMode, ProcessOptions};
use notegrid::framework::noop_sink;
use notegrid::models::{ProcessingStatus, OUTPUT_VERSION};
use notegrid::orchestrator::{Capabilities, Orchestrator};
use notegrid::vision::VisionProvider;

use common::{blank_page, completion_body, test_config, write_temp_png, FixedOcr};

const NOTE_TEXT: &str = "## Groceries ##\n[ ] buy milk\n[x] pay rent\n@errands ::due:friday";

async fn mock_vision(server: &MockServer, layout: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("total_notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(layout)))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Extract all text from this note region"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(NOTE_TEXT)))
        .mount(server)
        .await;
}

fn orchestrator(server: &MockServer, ocr_text: &str) -> Orchestrator {
    let mut config = test_config(Some(&server.uri()));
    // Correction is exercised separately; keep the page run to vision calls.
    config.llm = None;
    let capabilities = Capabilities {
        ocr: FixedOcr::shared(ocr_text, 0.8),
        vision: Arc::new(VisionProvider::new(&config.vision)),
        completion: None,
    };
    Orchestrator::with_capabilities(&config, capabilities, noop_sink())
}

#[tokio::test]
async fn test_two_by_two_page_from_disk() {
    let server = MockServer::start().await;
    mock_vision(
        &server,
        r#"{"total_notes": 4, "layout": "2x2 grid", "notes": [{"position": 1}, {"position": 2}, {"position": 3}, {"position": 4}]}"#,
    )
    .await;

    let file = write_temp_png(&blank_page(600, 600));
    let output = orchestrator(&server, NOTE_TEXT)
        .process(file.path(), &ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(output.version, OUTPUT_VERSION);
    assert_eq!(output.notes.len(), 4);
    assert_eq!(output.summary.processing_status, ProcessingStatus::Success);
    assert_eq!(output.summary.total_notes, 4);
    assert_eq!(output.summary.total_todos, 8);

    let positions: Vec<usize> = output.notes.iter().map(|n| n.position).collect();
    assert_eq!(positions, vec![1, 2, 3, 4]);

    let first = &output.notes[0];
    assert_eq!(first.note_id, "note_001");
    assert_eq!(first.processing_details.extraction_method, "hybrid");
    assert_eq!(first.processing_details.ocr_engine, "tesseract");
    assert_eq!(first.structure.title.as_ref().map(|t| t.text.as_str()), Some("Groceries"));
    assert!(first.tags.simple_tags.contains(&"errands".to_string()));
    assert_eq!(first.tags.key_value_tags.get("due").map(String::as_str), Some("friday"));
    assert!(first.quality_metrics.overall_confidence > 0.0);
    assert!(first.quality_metrics.overall_confidence <= 1.0);
    assert_eq!(output.image_metadata.original_dimensions.width, 600);
}

#[tokio::test]
async fn test_llm_mode_single_note() {
    let server = MockServer::start().await;
    mock_vision(&server, r#"{"total_notes": 1, "layout": "single", "notes": []}"#).await;

    let file = write_temp_png(&blank_page(300, 400));
    let options = ProcessOptions {
        ocr_mode: OcrMode::Llm,
        multi_note_detection_enabled: false,
        ..ProcessOptions::default()
    };
    let output = orchestrator(&server, "should not be used")
        .process(file.path(), &options)
        .await
        .unwrap();

    assert_eq!(output.notes.len(), 1);
    let note = &output.notes[0];
    assert_eq!(note.processing_details.ocr_engine, "none");
    assert_eq!(note.processing_details.extraction_method, "vision_only");
    assert_eq!(note.text_content.raw_text, NOTE_TEXT);
    assert_eq!(note.structure.todos.len(), 2);
}

#[tokio::test]
async fn test_vision_outage_in_hybrid_mode_keeps_local_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("model not found"))
        .mount(&server)
        .await;

    let file = write_temp_png(&blank_page(300, 300));
    let output = orchestrator(&server, "call the bank tomorrow")
        .process(file.path(), &ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(output.notes.len(), 1);
    let note = &output.notes[0];
    assert_eq!(note.processing_details.extraction_method, "ocr_only");
    assert!(note.text_content.raw_text.contains("call the bank"));
    assert_eq!(output.summary.processing_status, ProcessingStatus::Success);
}

#[tokio::test]
async fn test_corrupt_file_fails_with_partial_result() {
    let server = MockServer::start().await;
    let file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
    std::fs::write(file.path(), b"definitely not an image").unwrap();

    let partial = orchestrator(&server, "")
        .process(file.path(), &ProcessOptions::default())
        .await
        .unwrap_err();

    assert_eq!(partial.data["processing_status"], "failed");
    assert_eq!(partial.data["error_type"], "preprocessing");
    assert!(partial.error.is_some());
}
