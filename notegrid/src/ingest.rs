//! Hand-off of a processed page to persistence and graph extraction.
//!
//! The first successfully processed note becomes the parent; the others
//! reference it. Graph extraction runs detached after each persist and can
//! never undo or delay note creation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::GraphConfig;
use crate::error::{NoteError, Result};
use crate::models::{Note, ProcessingOutput};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewNote {
    pub user_id: String,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub content: String,
    pub original_text: String,
    pub qr_code: Option<String>,
    pub ocr_confidence: u8,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredNote {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn create_note(&self, note: NewNote) -> Result<StoredNote>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphRequest {
    pub content: String,
    pub title: String,
    pub source_type: Option<String>,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub relationship_type: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Value,
}

#[async_trait]
pub trait GraphExtractor: Send + Sync {
    async fn extract(&self, request: GraphRequest) -> Result<Vec<Triple>>;
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    triples: Vec<Triple>,
}

/// Client for a graph-extraction service exposing `POST /extract`.
#[derive(Debug, Clone)]
pub struct HttpGraphExtractor {
    client: Client,
    base_url: String,
}

impl HttpGraphExtractor {
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NoteError::Graph(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.extractor_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GraphExtractor for HttpGraphExtractor {
    async fn extract(&self, request: GraphRequest) -> Result<Vec<Triple>> {
        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NoteError::Graph(format!(
                "graph extraction failed: {status} - {body}"
            )));
        }

        let parsed: ExtractResponse = response.json().await?;
        Ok(parsed.triples)
    }
}

/// Keeps notes in memory; used by the CLI and tests.
#[derive(Debug, Default)]
pub struct InMemoryNoteStore {
    notes: Mutex<Vec<(NewNote, StoredNote)>>,
}

impl InMemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notes(&self) -> Vec<(NewNote, StoredNote)> {
        self.notes.lock().await.clone()
    }
}

#[async_trait]
impl NoteStore for InMemoryNoteStore {
    async fn create_note(&self, note: NewNote) -> Result<StoredNote> {
        let stored = StoredNote {
            id: Uuid::new_v4(),
            parent_id: note.parent_id,
            title: note.title.clone(),
            created_at: Utc::now(),
        };
        self.notes.lock().await.push((note, stored.clone()));
        Ok(stored)
    }
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub stored: Vec<StoredNote>,
    pub skipped: Vec<String>,
    /// Detached graph-extraction tasks, one per stored note.
    pub graph_tasks: Vec<JoinHandle<()>>,
}

fn title_for(note: &Note) -> String {
    if let Some(title) = &note.structure.title {
        return title.text.clone();
    }
    note.text_content
        .formatted_text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(80).collect())
        .unwrap_or_else(|| format!("Note {}", note.position))
}

fn new_note(note: &Note, user_id: &str, parent_id: Option<Uuid>) -> Result<NewNote> {
    Ok(NewNote {
        user_id: user_id.to_string(),
        parent_id,
        title: title_for(note),
        content: note.text_content.formatted_text.clone(),
        original_text: note.text_content.raw_text.clone(),
        qr_code: note.qr_codes.first().map(|c| c.data.clone()),
        ocr_confidence: (note.quality_metrics.overall_confidence * 100.0).round().clamp(0.0, 100.0) as u8,
        metadata: serde_json::to_value(note)?,
    })
}

/// Persists each successful note and schedules graph extraction for it.
///
/// A store failure on one note is logged and skipped; if the parent cannot
/// be stored the next stored note takes its place.
pub async fn ingest_output(
    output: &ProcessingOutput,
    user_id: &str,
    source_type: Option<&str>,
    store: &dyn NoteStore,
    graph: Option<Arc<dyn GraphExtractor>>,
) -> IngestReport {
    let mut report = IngestReport::default();
    let mut parent_id: Option<Uuid> = None;

    for note in output.notes.iter().filter(|n| !n.is_error()) {
        let record = match new_note(note, user_id, parent_id) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(note = %note.note_id, error = %error, "note record could not be built");
                report.skipped.push(note.note_id.clone());
                continue;
            }
        };
        let request = GraphRequest {
            content: record.content.clone(),
            title: record.title.clone(),
            source_type: source_type.map(str::to_string),
            user_id: user_id.to_string(),
        };

        let stored = match store.create_note(record).await {
            Ok(stored) => stored,
            Err(error) => {
                tracing::error!(note = %note.note_id, error = %error, "failed to store note");
                report.skipped.push(note.note_id.clone());
                continue;
            }
        };
        tracing::info!(note = %note.note_id, id = %stored.id, parent = ?stored.parent_id, "note stored");
        parent_id.get_or_insert(stored.id);

        if let Some(graph) = &graph {
            let graph = Arc::clone(graph);
            let note_id = stored.id;
            report.graph_tasks.push(tokio::spawn(async move {
                match graph.extract(request).await {
                    Ok(triples) => tracing::info!(%note_id, triples = triples.len(), "graph extraction finished"),
                    Err(error) => tracing::warn!(%note_id, error = %error, "graph extraction failed"),
                }
            }));
        }

        report.stored.push(stored);
    }

    report
}
