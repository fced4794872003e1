use crate::error::{Result, TrustLayerError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default Gemini model used when `GEMINI_MODEL` is not set
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
/// Default listen port used when `PORT` is not set
pub const DEFAULT_PORT: u16 = 3000;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
const GITHUB_API_BASE: &str = "https://api.github.com";

/// Main configuration struct for the service
///
/// Built once at startup from the process environment and passed by reference
/// into each component; business logic never reads environment variables
/// directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shared secret callers must present in the `x-api-key` header
    pub shared_secret: String,
    /// Gemini API key; requests fail with a misconfiguration error when absent
    pub gemini_api_key: Option<String>,
    /// Gemini model name used for `generateContent` calls
    pub gemini_model: String,
    /// Base URL of the Gemini API (overridable for tests)
    pub gemini_base_url: String,
    /// GitHub token for authenticated content fetches
    pub github_token: Option<String>,
    /// Base URL of the GitHub REST API (overridable for tests)
    pub github_base_url: String,
    /// Jira settings; attachment upload is skipped when absent
    pub jira: Option<JiraConfig>,
    /// Directory where generated PDFs are written
    pub output_dir: PathBuf,
    /// Externally reachable base URL for building public PDF links
    pub public_base_url: Option<String>,
    /// Port the HTTP server listens on
    pub port: u16,
    /// Strict revision: fail PDF generation when no issue key is supplied
    pub require_issue_key: bool,
    /// Upload the PDF from a background task instead of awaiting it
    pub attach_in_background: bool,
    /// Post a Jira comment with the public PDF link after a successful upload
    pub jira_add_comment: bool,
}

/// Connection settings for the Jira REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    /// Base URL of the Jira site, without a trailing slash
    pub base_url: String,
    /// Account email for basic authentication
    pub email: String,
    /// API token paired with the email
    pub api_token: String,
}

impl Config {
    /// Builds the configuration from the process environment.
    ///
    /// This is the only place environment variables are read. Fails when the
    /// shared request secret is missing, since the service could never
    /// authorize a caller without it.
    pub fn from_env() -> Result<Self> {
        let shared_secret = std::env::var("TRUST_LAYER_KEY")
            .map_err(|_| TrustLayerError::Config("TRUST_LAYER_KEY is not set".into()))?;

        let jira = match (
            std::env::var("JIRA_BASE_URL").ok(),
            std::env::var("JIRA_EMAIL").ok(),
            std::env::var("JIRA_API_TOKEN").ok(),
        ) {
            (Some(base_url), Some(email), Some(api_token)) => Some(JiraConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                email,
                api_token,
            }),
            _ => None,
        };

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| TrustLayerError::Config(format!("invalid PORT value: {raw}")))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            shared_secret,
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            gemini_model: std::env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_base_url: GEMINI_API_BASE.to_string(),
            github_token: std::env::var("GITHUB_TOKEN").ok(),
            github_base_url: GITHUB_API_BASE.to_string(),
            jira,
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("trust_layer_pdfs")),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .ok()
                .map(|url| url.trim_end_matches('/').to_string()),
            port,
            require_issue_key: env_flag("REQUIRE_ISSUE_KEY", false),
            attach_in_background: env_flag("ATTACH_IN_BACKGROUND", true),
            jira_add_comment: env_flag("JIRA_ADD_COMMENT", true),
        })
    }

    /// Ensures the PDF output directory exists
    ///
    /// Creates any missing directories; calling this repeatedly is harmless.
    pub async fn ensure_directories_exist(&self) -> Result<()> {
        if !tokio::fs::try_exists(&self.output_dir).await? {
            tokio::fs::create_dir_all(&self.output_dir).await?;
        }
        Ok(())
    }

    /// Retrieves the Gemini API key, failing with a misconfiguration error
    /// when it is absent or blank
    pub fn gemini_api_key(&self) -> Result<&str> {
        match self.gemini_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(TrustLayerError::Config(
                "GEMINI_API_KEY is not configured".into(),
            )),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}
