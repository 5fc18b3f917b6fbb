pub mod gemini;
pub mod render;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use mentor_contracts::events::EventWriter;
use mentor_contracts::history::{HistoryEntry, HistoryStore};
use mentor_contracts::models::{ModelSelection, ModelSelector};
use mentor_contracts::pages::{Mode, Page};
use mentor_contracts::summary::{write_summary, SessionSummary};
use serde_json::{json, Map, Value};

pub use gemini::{GeminiProvider, GenerateRequest, GenerateResponse, GenerationProvider};
pub use render::RenderedImage;

/// Result of one user action on an interactive page.
#[derive(Debug, Clone)]
pub enum Submission {
    /// Blank prompt; nothing was sent.
    Rejected { warning: &'static str },
    Text { mode: Mode, text: String },
    Image {
        image: RenderedImage,
        caption: Option<String>,
    },
}

/// One interactive session: owns the history log, the provider, and the
/// event log. Every call blocks until the provider returns.
pub struct Session {
    out_dir: PathBuf,
    session_id: String,
    events: EventWriter,
    history: HistoryStore,
    provider: Box<dyn GenerationProvider>,
    model_selector: ModelSelector,
    text_model: Option<String>,
    image_model: Option<String>,
    page: Page,
    started_at: String,
    last_fallback_reason: Option<String>,
}

impl Session {
    pub fn new(
        out_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        text_model: Option<String>,
        image_model: Option<String>,
        provider: Box<dyn GenerationProvider>,
    ) -> Result<Self> {
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let session_id = format!("session-{}", uuid::Uuid::new_v4().simple());
        let events = EventWriter::new(events_path.into(), session_id.clone());
        let started_at = now_utc_iso();

        events.emit(
            "session_started",
            map_object(json!({
                "out_dir": out_dir.to_string_lossy().to_string(),
                "provider": provider.name(),
                "text_model": text_model,
                "image_model": image_model,
            })),
        )?;

        Ok(Self {
            out_dir,
            session_id,
            events,
            history: HistoryStore::new(),
            provider,
            model_selector: ModelSelector::new(None),
            text_model,
            image_model,
            page: Page::Teaching,
            started_at,
            last_fallback_reason: None,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn page(&self) -> Page {
        self.page
    }

    pub fn select_page(&mut self, page: Page) -> Result<()> {
        self.page = page;
        self.events.emit(
            "page_selected",
            map_object(json!({
                "page": page.label(),
                "history_len": self.history.len(),
            })),
        )?;
        Ok(())
    }

    pub fn set_text_model(&mut self, model: Option<String>) {
        self.text_model = model;
    }

    pub fn text_model(&self) -> Option<&str> {
        self.text_model.as_deref()
    }

    pub fn set_image_model(&mut self, model: Option<String>) {
        self.image_model = model;
    }

    pub fn image_model(&self) -> Option<&str> {
        self.image_model.as_deref()
    }

    /// Registry models able to serve `mode`, default first.
    pub fn available_models(&self, mode: Mode) -> Vec<String> {
        self.model_selector
            .registry
            .by_capability(mode.capability())
            .into_iter()
            .map(|model| model.name)
            .collect()
    }

    pub fn last_fallback_reason(&self) -> Option<&str> {
        self.last_fallback_reason.as_deref()
    }

    /// Sends `prompt` for `mode` exactly once. A blank prompt is rejected
    /// without calling the provider. History is appended only on success,
    /// as the last step, so an `Err` never leaves an entry behind.
    pub fn submit(&mut self, mode: Mode, prompt: &str) -> Result<Submission> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            let warning = mode.page().empty_prompt_warning();
            self.events.emit(
                "prompt_rejected",
                map_object(json!({
                    "mode": mode.as_str(),
                    "warning": warning,
                })),
            )?;
            return Ok(Submission::Rejected { warning });
        }

        let selection = self.resolve_model(mode)?;
        let model = selection.model.name;
        let request = match mode {
            Mode::Image => GenerateRequest::image(&model, prompt),
            Mode::Text | Mode::Math => GenerateRequest::text(&model, prompt),
        };
        self.events.emit(
            "generation_requested",
            map_object(json!({
                "mode": mode.as_str(),
                "model": model,
                "provider": self.provider.name(),
                "prompt_chars": prompt.chars().count(),
                "model_fallback": selection.fallback_reason,
            })),
        )?;

        let outcome = self.provider.generate(&request).and_then(|response| {
            let (submission, output) = render_response(mode, &response)?;
            Ok((submission, output, response.finish_reason))
        });
        let (submission, output, finish_reason) = match outcome {
            Ok(rendered) => rendered,
            Err(err) => {
                self.events.emit(
                    "generation_failed",
                    map_object(json!({
                        "mode": mode.as_str(),
                        "model": model,
                        "error": error_chain_text(&err, 512),
                    })),
                )?;
                return Err(err);
            }
        };

        let entry = HistoryEntry::new(mode, prompt, output);
        let entry_value = serde_json::to_value(&entry)?;
        self.events.emit(
            "generation_completed",
            map_object(json!({
                "mode": mode.as_str(),
                "model": model,
                "output_chars": entry.output().chars().count(),
                "finish_reason": finish_reason,
            })),
        )?;
        self.events.emit(
            "history_appended",
            map_object(json!({
                "entry": entry_value,
                "history_len": self.history.len() + 1,
            })),
        )?;
        self.history.push(entry);
        Ok(submission)
    }

    /// Writes the rendered PNG into the output directory.
    pub fn download(&self, image: &RenderedImage) -> Result<PathBuf> {
        let path = image.save_to(&self.out_dir)?;
        self.events.emit(
            "image_downloaded",
            map_object(json!({
                "file_name": image.file_name(),
                "path": path.to_string_lossy().to_string(),
                "bytes": image.png_bytes().len(),
                "source_mime_type": image.source_mime_type(),
                "width": image.width(),
                "height": image.height(),
            })),
        )?;
        Ok(path)
    }

    pub fn export_history(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| {
            self.out_dir
                .join(format!("history-{}.json", compact_timestamp()))
        });
        self.history.export(&path, &self.session_id)?;
        self.events.emit(
            "history_exported",
            map_object(json!({
                "path": path.to_string_lossy().to_string(),
                "entries": self.history.len(),
            })),
        )?;
        Ok(path)
    }

    pub fn finish(&mut self) -> Result<()> {
        let mut by_mode = Map::new();
        for mode in Mode::ALL {
            by_mode.insert(
                mode.as_str().to_string(),
                Value::Number((self.history.count_by_mode(mode) as u64).into()),
            );
        }
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            total_interactions: self.history.len() as u64,
            by_mode,
        };
        let summary_path = self.out_dir.join("summary.json");
        write_summary(&summary_path, &summary)?;
        self.events.emit(
            "session_finished",
            map_object(json!({
                "summary_path": summary_path.to_string_lossy().to_string(),
            })),
        )?;
        Ok(())
    }

    fn resolve_model(&mut self, mode: Mode) -> Result<ModelSelection> {
        let requested = match mode {
            Mode::Image => self.image_model.as_deref(),
            Mode::Text | Mode::Math => self.text_model.as_deref(),
        };
        let selection = self
            .model_selector
            .select(requested, mode.capability())
            .map_err(|message| anyhow!(message))?;
        self.last_fallback_reason = selection.fallback_reason.clone();
        Ok(selection)
    }
}

/// Turns a provider response into what the page shows plus the history
/// output reference.
fn render_response(mode: Mode, response: &GenerateResponse) -> Result<(Submission, String)> {
    match mode {
        Mode::Text | Mode::Math => {
            let Some(text) = response.text() else {
                return Err(empty_reply_error("Gemini returned no text", response));
            };
            Ok((
                Submission::Text {
                    mode,
                    text: text.clone(),
                },
                text,
            ))
        }
        Mode::Image => {
            let Some(inline) = response.first_inline_image() else {
                return Err(empty_reply_error("No image returned.", response));
            };
            let image = render::render_inline_image(inline, &chrono::Local::now())?;
            let file_name = image.file_name().to_string();
            let caption = response
                .text()
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty());
            Ok((Submission::Image { image, caption }, file_name))
        }
    }
}

fn empty_reply_error(message: &str, response: &GenerateResponse) -> anyhow::Error {
    match response.finish_reason.as_deref() {
        Some(reason) => anyhow!("{message} (finish reason: {reason})"),
        None => anyhow!("{message}"),
    }
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    let joined = if parts.is_empty() {
        err.to_string()
    } else {
        parts.join(" | caused by: ")
    };
    if joined.chars().count() <= max_chars {
        return joined;
    }
    joined.chars().take(max_chars).collect::<String>() + "…"
}

fn compact_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
