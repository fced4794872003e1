use crate::config::JiraConfig;
use crate::error::{Result, TrustLayerError};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Retries after the first attempt; 3 attempts total
const MAX_RETRIES: u32 = 2;
/// Linear backoff base: the wait after attempt N is `base * N`
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
const ATTACH_TIMEOUT: Duration = Duration::from_secs(30);
const COMMENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Outcome of a successful attachment upload
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentInfo {
    /// Filename as recorded by Jira
    pub filename: String,
    /// Jira-hosted content URL of the attachment
    pub url: String,
    /// Attachment size in bytes
    pub size: u64,
}

/// Options for a single attach operation
#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    /// Publicly reachable URL of the PDF, used in the follow-up comment
    pub public_url: Option<String>,
    /// Whether to post a comment linking the artifact after uploading
    pub add_comment: bool,
}

/// Uploads local files as Jira issue attachments, with bounded retries
#[derive(Debug, Clone)]
pub struct JiraClient {
    client: Client,
    base_url: String,
    email: String,
    api_token: String,
    retry_delay: Duration,
}

impl JiraClient {
    /// Creates a client for the configured Jira site
    pub fn new(config: &JiraConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            api_token: config.api_token.clone(),
            retry_delay: RETRY_BASE_DELAY,
        })
    }

    /// Overrides the backoff base delay. Tests use this to keep the
    /// three-attempt sequences fast.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Uploads `file_path` as an attachment on `issue_key`.
    ///
    /// Fails fast without touching the network when the file does not exist.
    /// Client-error statuses (400, 401, 403, 413, 415) end the sequence
    /// immediately; anything else is retried with linear backoff until the
    /// attempt budget runs out. Exactly one result is produced per call.
    pub async fn attach(
        &self,
        issue_key: &str,
        file_path: &Path,
        options: &AttachOptions,
    ) -> Result<AttachmentInfo> {
        if !tokio::fs::try_exists(file_path).await? {
            error!(path = %file_path.display(), "attachment source file not found");
            return Err(TrustLayerError::FileNotFound(file_path.to_path_buf()));
        }

        let bytes = tokio::fs::read(file_path).await?;
        let filename = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment.pdf".to_string());
        let url = format!("{}/rest/api/3/issue/{issue_key}/attachments", self.base_url);

        let mut last_status: Option<u16> = None;
        let mut last_details = String::new();

        for attempt in 1..=MAX_RETRIES + 1 {
            // reqwest multipart forms are single-use; rebuild per attempt
            let part = Part::bytes(bytes.clone())
                .file_name(filename.clone())
                .mime_str("application/pdf")?;
            let form = Form::new().part("file", part);

            let outcome = self
                .client
                .post(&url)
                .basic_auth(&self.email, Some(&self.api_token))
                .header("X-Atlassian-Token", "no-check")
                .multipart(form)
                .timeout(ATTACH_TIMEOUT)
                .send()
                .await;

            match outcome {
                Ok(response) if response.status().is_success() => {
                    let status = response.status().as_u16();
                    let attachment = decode_attachment(response).await?;
                    info!(
                        %issue_key,
                        status,
                        filename = %attachment.filename,
                        url = %attachment.url,
                        "attachment uploaded"
                    );

                    if options.add_comment {
                        if let Some(public_url) = options.public_url.as_deref() {
                            let comment = format!(
                                "AI analysis PDF attached: {} (public copy: {public_url})",
                                attachment.url
                            );
                            if let Err(e) = self.add_comment(issue_key, &comment).await {
                                warn!(%issue_key, error = %e, "failed to add Jira comment with public link");
                            }
                        }
                    }

                    return Ok(attachment);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let details = response.text().await.unwrap_or_default();
                    error!(%issue_key, attempt, status, "Jira attach attempt failed");
                    if !TrustLayerError::upload_status_is_retryable(status) {
                        return Err(TrustLayerError::NonRetryableUpload { status, details });
                    }
                    last_status = Some(status);
                    last_details = details;
                }
                Err(e) => {
                    error!(%issue_key, attempt, error = %e, "Jira attach attempt failed");
                    last_status = e.status().map(|status| status.as_u16());
                    last_details = e.to_string();
                }
            }

            if attempt <= MAX_RETRIES {
                sleep(self.retry_delay * attempt).await;
            }
        }

        Err(TrustLayerError::RetriesExhausted {
            status: last_status,
            details: last_details,
        })
    }

    /// Posts a plain comment on the issue
    pub async fn add_comment(&self, issue_key: &str, comment: &str) -> Result<()> {
        let url = format!("{}/rest/api/3/issue/{issue_key}/comment", self.base_url);
        self.client
            .post(&url)
            .basic_auth(&self.email, Some(&self.api_token))
            .json(&serde_json::json!({ "body": comment }))
            .timeout(COMMENT_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

async fn decode_attachment(response: reqwest::Response) -> Result<AttachmentInfo> {
    let body: AttachResponse = response
        .json()
        .await
        .map_err(|e| TrustLayerError::MalformedResponse(format!("attachment JSON: {e}")))?;
    first_attachment(body).ok_or_else(|| {
        TrustLayerError::MalformedResponse("attachment object missing from response".into())
    })
}

fn first_attachment(body: AttachResponse) -> Option<AttachmentInfo> {
    let attachment = match body {
        AttachResponse::List(list) => list.into_iter().next()?,
        AttachResponse::Wrapped { values } => values.into_iter().next()?,
    };
    Some(AttachmentInfo {
        filename: attachment.filename,
        url: attachment.content,
        size: attachment.size,
    })
}

// Jira has returned both a bare array and a values-wrapped object for this
// endpoint; accept either.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AttachResponse {
    List(Vec<RemoteAttachment>),
    Wrapped { values: Vec<RemoteAttachment> },
}

#[derive(Debug, Deserialize)]
struct RemoteAttachment {
    filename: String,
    content: String,
    #[serde(default)]
    size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bare_array_shape() {
        let body: AttachResponse = serde_json::from_str(
            r#"[{"filename":"AI_Analysis_PROJ-1.pdf","content":"https://jira.example/att/1","size":1234}]"#,
        )
        .unwrap();
        let attachment = first_attachment(body).unwrap();
        assert_eq!(attachment.filename, "AI_Analysis_PROJ-1.pdf");
        assert_eq!(attachment.url, "https://jira.example/att/1");
        assert_eq!(attachment.size, 1234);
    }

    #[test]
    fn test_decode_values_wrapped_shape() {
        let body: AttachResponse = serde_json::from_str(
            r#"{"values":[{"filename":"a.pdf","content":"https://jira.example/att/2","size":7}]}"#,
        )
        .unwrap();
        let attachment = first_attachment(body).unwrap();
        assert_eq!(attachment.url, "https://jira.example/att/2");
    }

    #[test]
    fn test_decode_empty_response_has_no_attachment() {
        let body: AttachResponse = serde_json::from_str("[]").unwrap();
        assert!(first_attachment(body).is_none());
    }
}
