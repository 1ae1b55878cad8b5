use std::time::Duration;

use crate::foundation::error::{StudioError, StudioResult};
use crate::remote::wire::{decode_reply, encode_request, error_message};
use crate::remote::{GenerateRequest, GenerativeModel, ModelReply};

const UNKNOWN_FAILURE: &str = "The API request failed with an unknown error.";

/// Blocking client for the server-side proxy that holds the model credentials.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    url: String,
    agent: ureq::Agent,
}

impl ProxyClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            url: url.into(),
            agent,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl GenerativeModel for ProxyClient {
    #[tracing::instrument(skip(self, request), fields(model = %request.model, parts = request.parts.len()))]
    fn generate(&self, request: &GenerateRequest) -> StudioResult<ModelReply> {
        let body = encode_request(request)?;
        let resp = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body);

        match resp {
            Ok(resp) => {
                let text = resp
                    .into_string()
                    .map_err(|e| StudioError::network(format!("failed to read proxy response: {e}")))?;
                decode_reply(&text)
            }
            Err(ureq::Error::Status(status, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                let message = error_message(&text).unwrap_or_else(|| UNKNOWN_FAILURE.to_string());
                tracing::warn!(status, %message, "proxy returned an error");
                Err(StudioError::network(message))
            }
            Err(ureq::Error::Transport(t)) => {
                tracing::warn!(error = %t, "proxy unreachable");
                Err(StudioError::network(t.to_string()))
            }
        }
    }
}
