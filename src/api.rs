use crate::config::Config;
use crate::error::Result;
use crate::gemini::GeminiClient;
use crate::github::{GitHubFetcher, RepoSnapshot};
use crate::jira::{AttachOptions, AttachmentInfo, JiraClient};
use crate::pdf::{GeneratedArtifact, PdfRenderer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Upper bound on the repository-context block appended to a prompt
pub const PROMPT_CONTEXT_LIMIT: usize = 15_000;
/// Substituted when the provider answers with an empty analysis
pub const EMPTY_RESULT_NOTICE: &str =
    "The AI provider returned no analysis text for this request.";

/// Request payload for `POST /analyze`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// Prompt forwarded to the generative-text provider
    pub prompt: String,
    /// Jira issue to attach the rendered PDF to
    #[serde(default)]
    pub issue_key: Option<String>,
    /// Repository whose README and file listing enrich the prompt
    #[serde(default)]
    pub github_url: Option<String>,
}

/// Response payload for `POST /analyze`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    /// Generated analysis text
    pub result: String,
    /// Public URL of the PDF, or its local path when no public base is set
    pub pdf_url: String,
    /// Attachment indicator: Jira content URL, or "processing" for
    /// background uploads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jira: Option<String>,
}

/// Lifecycle of one background attachment upload
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentStateKind {
    /// Upload dispatched, outcome not yet known
    Pending,
    /// Upload finished successfully
    Completed,
    /// Upload gave up after its retry budget or hit a terminal error
    Failed,
}

/// Recorded outcome of a background upload, pollable by issue key
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentStatus {
    /// Issue the upload targets
    pub issue_key: String,
    /// Current lifecycle state
    pub state: AttachmentStateKind,
    /// When the state last changed
    pub updated_at: DateTime<Utc>,
    /// Attachment details once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentInfo>,
    /// Failure detail once failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Records background upload outcomes so they are observable after the HTTP
/// response has already gone out
#[derive(Debug, Clone, Default)]
pub struct AttachmentTracker {
    entries: Arc<Mutex<HashMap<String, AttachmentStatus>>>,
}

impl AttachmentTracker {
    /// Creates an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that an upload for `issue_key` has been dispatched
    pub async fn mark_pending(&self, issue_key: &str) {
        self.set(issue_key, AttachmentStateKind::Pending, None, None).await;
    }

    /// Records a successful upload
    pub async fn mark_completed(&self, issue_key: &str, attachment: AttachmentInfo) {
        self.set(issue_key, AttachmentStateKind::Completed, Some(attachment), None)
            .await;
    }

    /// Records a failed upload with its diagnostic detail
    pub async fn mark_failed(&self, issue_key: &str, detail: String) {
        self.set(issue_key, AttachmentStateKind::Failed, None, Some(detail))
            .await;
    }

    /// Looks up the latest recorded state for `issue_key`
    pub async fn get(&self, issue_key: &str) -> Option<AttachmentStatus> {
        self.entries.lock().await.get(issue_key).cloned()
    }

    async fn set(
        &self,
        issue_key: &str,
        state: AttachmentStateKind,
        attachment: Option<AttachmentInfo>,
        error: Option<String>,
    ) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            issue_key.to_string(),
            AttachmentStatus {
                issue_key: issue_key.to_string(),
                state,
                updated_at: Utc::now(),
                attachment,
                error,
            },
        );
    }
}

/// Orchestrates one analysis request end to end: enrichment, generation,
/// rendering, attachment
pub struct AnalyzeService {
    config: Arc<Config>,
    gemini: GeminiClient,
    github: GitHubFetcher,
    jira: Option<JiraClient>,
    renderer: PdfRenderer,
    attachments: AttachmentTracker,
}

impl AnalyzeService {
    /// Builds the service and its component clients from the configuration
    pub fn new(config: Config) -> Result<Self> {
        let gemini = GeminiClient::new(&config)?;
        let github = GitHubFetcher::new(&config)?;
        let jira = match &config.jira {
            Some(jira_config) => Some(JiraClient::new(jira_config)?),
            None => None,
        };
        let renderer = PdfRenderer::new(&config);
        Ok(Self {
            config: Arc::new(config),
            gemini,
            github,
            jira,
            renderer,
            attachments: AttachmentTracker::new(),
        })
    }

    /// Shared view of the service configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Tracker holding background upload outcomes
    pub fn attachments(&self) -> &AttachmentTracker {
        &self.attachments
    }

    /// Runs the analysis flow for one request.
    ///
    /// Steps execute strictly in order: credential check, optional prompt
    /// enrichment, generation, PDF rendering, optional attachment. Repo-fetch
    /// failures degrade to the unmodified prompt; attachment behavior depends
    /// on the background/synchronous configuration.
    pub async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalyzeResponse> {
        let api_key = self.config.gemini_api_key()?.to_string();

        let prompt = match request.github_url.as_deref() {
            Some(url) => match self.github.fetch_repo_contents(url).await {
                Some(snapshot) => {
                    info!(
                        owner = %snapshot.owner,
                        repo = %snapshot.repo,
                        files = snapshot.files.len(),
                        "prompt enriched with repository context"
                    );
                    enrich_prompt(&request.prompt, &snapshot)
                }
                None => {
                    warn!(%url, "repository fetch failed, continuing with the unmodified prompt");
                    request.prompt.clone()
                }
            },
            None => request.prompt.clone(),
        };

        let text = self.gemini.generate(&api_key, &prompt).await?;
        let result = if text.trim().is_empty() {
            warn!("provider returned empty analysis text");
            EMPTY_RESULT_NOTICE.to_string()
        } else {
            text
        };

        let artifact = self.renderer.render(&result, request.issue_key.as_deref())?;
        let pdf_url = self.pdf_url(&artifact);

        let jira = match (request.issue_key.as_deref(), self.jira.as_ref()) {
            (Some(issue_key), Some(jira)) => {
                let options = AttachOptions {
                    public_url: self
                        .config
                        .public_base_url
                        .as_ref()
                        .map(|_| pdf_url.clone()),
                    add_comment: self.config.jira_add_comment,
                };
                if self.config.attach_in_background {
                    self.attachments.mark_pending(issue_key).await;
                    self.spawn_attachment(
                        jira.clone(),
                        issue_key.to_string(),
                        artifact.file_path.clone(),
                        options,
                    );
                    Some("processing".to_string())
                } else {
                    let attachment = jira.attach(issue_key, &artifact.file_path, &options).await?;
                    self.attachments
                        .mark_completed(issue_key, attachment.clone())
                        .await;
                    Some(attachment.url)
                }
            }
            (Some(issue_key), None) => {
                warn!(%issue_key, "issue key supplied but Jira is not configured, skipping upload");
                None
            }
            _ => None,
        };

        Ok(AnalyzeResponse {
            result,
            pdf_url,
            jira,
        })
    }

    fn pdf_url(&self, artifact: &GeneratedArtifact) -> String {
        match &self.config.public_base_url {
            Some(base) => format!("{base}/pdfs/{}", artifact.filename),
            None => artifact.file_path.display().to_string(),
        }
    }

    /// Dispatches the upload on a supervised background task. The response
    /// goes out before the outcome is known; the tracker records it for the
    /// `/attachments` endpoint and the log carries the detail.
    fn spawn_attachment(
        &self,
        jira: JiraClient,
        issue_key: String,
        file_path: PathBuf,
        options: AttachOptions,
    ) {
        let tracker = self.attachments.clone();
        tokio::spawn(async move {
            match jira.attach(&issue_key, &file_path, &options).await {
                Ok(attachment) => {
                    info!(%issue_key, url = %attachment.url, "background attachment completed");
                    tracker.mark_completed(&issue_key, attachment).await;
                }
                Err(e) => {
                    error!(%issue_key, error = %e, "background attachment failed");
                    tracker.mark_failed(&issue_key, e.to_string()).await;
                }
            }
        });
    }
}

/// Appends a bounded repository-context block to the prompt
pub fn enrich_prompt(prompt: &str, snapshot: &RepoSnapshot) -> String {
    let mut context = format!("Repository: {}/{}\n", snapshot.owner, snapshot.repo);
    if !snapshot.readme.is_empty() {
        context.push_str("\nREADME:\n");
        context.push_str(&snapshot.readme);
        context.push('\n');
    }
    if !snapshot.files.is_empty() {
        context.push_str("\nFiles:\n");
        for path in &snapshot.files {
            context.push_str("- ");
            context.push_str(path);
            context.push('\n');
        }
    }
    truncate_chars(&mut context, PROMPT_CONTEXT_LIMIT);

    format!("{prompt}\n\n--- Repository context ---\n{context}")
}

fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((cut, _)) = text.char_indices().nth(max_chars) {
        text.truncate(cut);
    }
}
