//! Gemini-style JSON carried through the proxy.

use anyhow::Context;
use base64::Engine as _;

use crate::bitmap::EncodedImage;
use crate::foundation::error::StudioResult;
use crate::remote::{GenerateRequest, ModelReply, Part};

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64 without the data-URL header.
    pub data: String,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct WireContent {
    #[serde(default)]
    pub parts: Vec<WirePart>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConfig {
    pub response_mime_type: &'static str,
    pub response_schema: serde_json::Value,
}

#[derive(Debug, serde::Serialize)]
pub struct WireRequest {
    pub model: String,
    pub contents: WireContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<WireConfig>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
    #[serde(default)]
    pub candidates: Vec<WireCandidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCandidate {
    #[serde(default)]
    pub content: Option<WireContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
    #[serde(default)]
    pub block_reason_message: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct WireErrorBody {
    error: Option<WireError>,
}

#[derive(Debug, serde::Deserialize)]
struct WireError {
    message: Option<String>,
}

pub fn encode_request(req: &GenerateRequest) -> StudioResult<String> {
    let b64 = base64::engine::general_purpose::STANDARD;
    let parts = req
        .parts
        .iter()
        .map(|p| match p {
            Part::Image(img) => WirePart {
                inline_data: Some(InlineData {
                    mime_type: img.mime.clone(),
                    data: b64.encode(&img.bytes),
                }),
                text: None,
            },
            Part::Text(t) => WirePart {
                inline_data: None,
                text: Some(t.clone()),
            },
        })
        .collect();
    let wire = WireRequest {
        model: req.model.clone(),
        contents: WireContent { parts },
        config: req.response_schema.clone().map(|schema| WireConfig {
            response_mime_type: "application/json",
            response_schema: schema,
        }),
    };
    Ok(serde_json::to_string(&wire).context("serialize proxy request")?)
}

/// Flatten the first candidate into a [`ModelReply`].
pub fn decode_reply(body: &str) -> StudioResult<ModelReply> {
    let resp: WireResponse = serde_json::from_str(body).context("parse proxy response")?;
    let b64 = base64::engine::general_purpose::STANDARD;

    let mut reply = ModelReply::default();
    if let Some(fb) = resp.prompt_feedback {
        reply.block_reason = fb.block_reason;
        reply.block_message = fb.block_reason_message;
    }

    let Some(first) = resp.candidates.into_iter().next() else {
        return Ok(reply);
    };
    reply.finish_reason = first.finish_reason;

    let mut text = String::new();
    for part in first.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(inline) = part.inline_data {
            let bytes = b64
                .decode(inline.data.trim())
                .context("decode inline image data")?;
            reply.images.push(EncodedImage {
                mime: inline.mime_type,
                bytes,
            });
        }
        if let Some(t) = part.text {
            text.push_str(&t);
        }
    }
    if !text.is_empty() {
        reply.text = Some(text);
    }
    Ok(reply)
}

/// `error.message` of a failed proxy call, if the body carries one.
pub fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<WireErrorBody>(body)
        .ok()?
        .error?
        .message
        .filter(|m| !m.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_inline_data_and_camel_case() {
        let req = GenerateRequest {
            model: "m".to_string(),
            parts: vec![
                Part::Image(EncodedImage {
                    mime: "image/png".to_string(),
                    bytes: vec![1, 2, 3],
                }),
                Part::Text("hello".to_string()),
            ],
            response_schema: None,
        };
        let v: serde_json::Value = serde_json::from_str(&encode_request(&req).unwrap()).unwrap();
        assert_eq!(v["model"], "m");
        assert_eq!(v["contents"]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(v["contents"]["parts"][0]["inlineData"]["data"], "AQID");
        assert_eq!(v["contents"]["parts"][1]["text"], "hello");
        assert!(v.get("config").is_none());
    }

    #[test]
    fn json_requests_carry_a_schema() {
        let req = GenerateRequest {
            model: "m".to_string(),
            parts: vec![Part::Text("x".to_string())],
            response_schema: Some(serde_json::json!({"type": "ARRAY"})),
        };
        let v: serde_json::Value = serde_json::from_str(&encode_request(&req).unwrap()).unwrap();
        assert_eq!(v["config"]["responseMimeType"], "application/json");
        assert_eq!(v["config"]["responseSchema"]["type"], "ARRAY");
    }

    #[test]
    fn reply_collects_images_text_and_reasons() {
        let body = r#"{
            "candidates": [{
                "content": {"parts": [
                    {"text": "here "},
                    {"inlineData": {"mimeType": "image/png", "data": "AQID"}},
                    {"text": "you go"}
                ]},
                "finishReason": "STOP"
            }],
            "promptFeedback": {"blockReason": "SAFETY", "blockReasonMessage": "nope"}
        }"#;
        let r = decode_reply(body).unwrap();
        assert_eq!(r.images.len(), 1);
        assert_eq!(r.images[0].bytes, vec![1, 2, 3]);
        assert_eq!(r.text.as_deref(), Some("here you go"));
        assert_eq!(r.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(r.block_reason.as_deref(), Some("SAFETY"));
        assert_eq!(r.block_message.as_deref(), Some("nope"));
    }

    #[test]
    fn empty_reply_decodes() {
        let r = decode_reply("{}").unwrap();
        assert!(r.images.is_empty());
        assert!(r.text.is_none());
        assert!(decode_reply("not json").is_err());
    }

    #[test]
    fn error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error": {"message": "quota exceeded"}}"#).as_deref(),
            Some("quota exceeded")
        );
        assert!(error_message(r#"{"error": {}}"#).is_none());
        assert!(error_message("<html>").is_none());
    }
}
