use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::AnnotateSettings;
use crate::db;
use crate::errors::AnnotateError;
use crate::pacing::{RunLoop, RunSummary, StopReason};

/// Labels a batch of text items. Each returned object carries the exact
/// input string under `filename`.
#[allow(async_fn_in_trait)]
pub trait Annotator {
    async fn annotate(&self, prompt_prefix: &str, batch: &[String]) -> Result<Vec<Value>, AnnotateError>;
}

/// Prompt prefix, a newline, then one item per line.
pub fn build_prompt(prompt_prefix: &str, batch: &[String]) -> String {
    format!("{}\n{}", prompt_prefix, batch.join("\n"))
}

/// Parses a reply that may be wrapped in a markdown code fence.
pub fn parse_reply(raw: &str) -> Result<Vec<Value>, AnnotateError> {
    Ok(serde_json::from_str(strip_code_fence(raw))?)
}

fn strip_code_fence(raw: &str) -> &str {
    let s = raw.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

// ── Gemini ──

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<ReplyPart>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ReplyPart {
    text: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct UsageMetadata {
    total_token_count: u64,
    prompt_token_count: u64,
    candidates_token_count: u64,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()?
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// `generateContent` over REST. Raw replies are archived to `responses_dir` when set.
pub struct GeminiAnnotator {
    http: reqwest::Client,
    url: String,
    temperature: f32,
    top_p: f32,
    responses_dir: Option<PathBuf>,
}

impl GeminiAnnotator {
    pub fn new(settings: &AnnotateSettings, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-goog-api-key", HeaderValue::from_str(api_key)?);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()?;
        if let Some(dir) = &settings.responses_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create responses directory {:?}", dir))?;
        }
        Ok(GeminiAnnotator {
            http,
            url: format!(
                "{}/models/{}:generateContent",
                settings.endpoint.trim_end_matches('/'),
                settings.model
            ),
            temperature: settings.temperature,
            top_p: settings.top_p,
            responses_dir: settings.responses_dir.clone(),
        })
    }

    fn request_body<'a>(&self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_p: self.top_p,
            },
        }
    }

    fn archive(&self, text: &str) {
        let Some(dir) = &self.responses_dir else {
            return;
        };
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let path = dir.join(format!("response_{}.txt", stamp));
        if let Err(e) = std::fs::write(&path, text) {
            warn!("Could not archive response to {:?}: {}", path, e);
        }
    }
}

impl Annotator for GeminiAnnotator {
    async fn annotate(&self, prompt_prefix: &str, batch: &[String]) -> Result<Vec<Value>, AnnotateError> {
        let prompt = build_prompt(prompt_prefix, batch);
        let started = Instant::now();
        let response = self
            .http
            .post(&self.url)
            .json(&self.request_body(&prompt))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnnotateError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let reply: GenerateResponse = response.json().await?;
        info!("API call took {:.1} seconds", started.elapsed().as_secs_f64());
        match &reply.usage_metadata {
            Some(usage) => info!(
                "Tokens used: {} (prompt: {}, output: {})",
                usage.total_token_count, usage.prompt_token_count, usage.candidates_token_count
            ),
            None => info!("Usage metadata not available"),
        }

        let text = reply.text().ok_or(AnnotateError::EmptyReply)?;
        self.archive(strip_code_fence(&text));
        parse_reply(&text)
    }
}

// ── Runner ──

pub struct AnnotateReport {
    pub summary: RunSummary,
    pub labeled: usize,
    /// Items sent but missing from the reply; they stay in the queue.
    pub unmatched: usize,
}

/// Sends unlabeled items in batches until the queue is empty, the request
/// ceiling is reached, or the failure budget runs out. A reply that labels
/// nothing also ends the run when the next batch would be the same one.
pub async fn run<A: Annotator>(
    conn: &Connection,
    annotator: &A,
    prompt_prefix: &str,
    settings: &AnnotateSettings,
) -> Result<AnnotateReport> {
    let total = db::count_unlabeled(conn)?;
    info!("{} text items to label", total);

    let mut run = RunLoop::new("annotate", settings.policy());
    let (mut labeled, mut unmatched) = (0, 0);
    // batch whose reply stored nothing; sending it again would repeat the same request
    let mut unproductive: Option<Vec<String>> = None;
    loop {
        let batch = db::fetch_unlabeled(conn, settings.batch_size)?;
        if batch.is_empty() {
            run.stop(StopReason::EndOfListing);
            break;
        }
        if unproductive.as_ref() == Some(&batch) {
            info!("Reply matched none of the {} items and the queue did not move. Stopping", batch.len());
            run.stop(StopReason::Stalled);
            break;
        }

        info!("Sending request {} ({} items)", run.processed() + 1, batch.len());
        unproductive = None;
        match annotator.annotate(prompt_prefix, &batch).await {
            Ok(labels) => {
                let stored = store_labels(conn, &batch, &labels)?;
                labeled += stored;
                unmatched += batch.len() - stored;
                run.record_success();
                if stored == 0 {
                    unproductive = Some(batch);
                }
            }
            Err(e) => run.record_failure(format!("Request {}", run.processed() + 1), e),
        }

        if run.check_stop().is_some() {
            break;
        }
        if db::count_unlabeled(conn)? == 0 {
            run.stop(StopReason::EndOfListing);
            break;
        }
        run.pause().await;
    }

    info!("{} labeled, {} unmatched", labeled, unmatched);
    Ok(AnnotateReport {
        summary: run.finish(),
        labeled,
        unmatched,
    })
}

/// Stores the label whose `filename` equals each batch item exactly. Returns how many matched.
fn store_labels(conn: &Connection, batch: &[String], labels: &[Value]) -> Result<usize> {
    let mut stored = 0;
    for text in batch {
        let label = labels
            .iter()
            .find(|obj| obj.get("filename").and_then(Value::as_str) == Some(text.as_str()));
        match label {
            Some(label) => {
                db::set_label(conn, text, &serde_json::to_string_pretty(label)?)?;
                stored += 1;
            }
            None => info!("Could not find label for {}", text),
        }
    }
    Ok(stored)
}
