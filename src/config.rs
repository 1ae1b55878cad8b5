//! Runtime configuration, read from a JSON file where every field has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::composite::collage::CollageStyle;
use crate::entitlement::{AccountLimits, FREE_TIER_EDIT_LIMIT, FREE_TIER_STARTING_CREDITS};
use crate::export::ExportFormat;
use crate::foundation::error::{StudioError, StudioResult};
use crate::remote::proxy::ProxyClient;
use crate::remote::{DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL};

pub const DEFAULT_PROXY_URL: &str = "http://localhost:3000/api/geminiProxy";
pub const DEFAULT_WATERMARK: &str = "Made with Retouch";

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StudioConfig {
    pub proxy_url: String,
    pub image_model: String,
    pub text_model: String,
    pub request_timeout_secs: u64,
    pub free_edit_limit: u32,
    pub starting_credits: u32,
    pub account_store: PathBuf,
    pub watermark_text: String,
    pub export_format: ExportFormat,
    pub collage: CollageStyle,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            request_timeout_secs: 120,
            free_edit_limit: FREE_TIER_EDIT_LIMIT,
            starting_credits: FREE_TIER_STARTING_CREDITS,
            account_store: PathBuf::from("retouch-account.json"),
            watermark_text: DEFAULT_WATERMARK.to_string(),
            export_format: ExportFormat::Png,
            collage: CollageStyle::default(),
        }
    }
}

impl StudioConfig {
    pub fn from_json(text: &str) -> StudioResult<Self> {
        let cfg: Self = serde_json::from_str(text).context("parse config json")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> StudioResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> StudioResult<()> {
        if self.proxy_url.trim().is_empty() {
            return Err(StudioError::validation("proxy_url must not be empty"));
        }
        if self.image_model.trim().is_empty() || self.text_model.trim().is_empty() {
            return Err(StudioError::validation("model names must not be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(StudioError::validation("request_timeout_secs must be > 0"));
        }
        if self.free_edit_limit == 0 {
            return Err(StudioError::validation("free_edit_limit must be > 0"));
        }
        self.export_format.validate()
    }

    pub fn limits(&self) -> AccountLimits {
        AccountLimits {
            free_edit_limit: self.free_edit_limit,
            starting_credits: self.starting_credits,
        }
    }

    pub fn proxy_client(&self) -> ProxyClient {
        ProxyClient::new(
            self.proxy_url.clone(),
            Duration::from_secs(self.request_timeout_secs),
        )
    }
}
