//! The external generative model, consumed as `image(s) + prompt -> image | error`.
//!
//! [`GenerativeModel`] is the transport seam: [`proxy::ProxyClient`] talks to the HTTP proxy,
//! tests script their own replies. [`ImageService`] builds requests for each edit and interprets
//! the replies.

pub mod prompts;
pub mod proxy;
pub mod wire;

use std::sync::Arc;

use rayon::prelude::*;

use crate::bitmap::{Bitmap, EncodedImage};
use crate::foundation::core::Hotspot;
use crate::foundation::error::{StudioError, StudioResult};
use crate::mask::Mask;

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Part {
    Image(EncodedImage),
    Text(String),
}

impl Part {
    pub fn png(bitmap: &Bitmap) -> StudioResult<Self> {
        Ok(Self::Image(EncodedImage::png(bitmap)?))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub parts: Vec<Part>,
    /// Ask for a JSON reply matching this schema.
    pub response_schema: Option<serde_json::Value>,
}

impl GenerateRequest {
    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, Part::Image(_)))
            .count()
    }

    /// Concatenated text parts.
    pub fn prompt(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// First candidate of a model reply, flattened.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub images: Vec<EncodedImage>,
    pub text: Option<String>,
    pub block_reason: Option<String>,
    pub block_message: Option<String>,
    pub finish_reason: Option<String>,
}

impl ModelReply {
    pub fn with_image(image: EncodedImage) -> Self {
        Self {
            images: vec![image],
            finish_reason: Some("STOP".to_string()),
            ..Self::default()
        }
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            finish_reason: Some("STOP".to_string()),
            ..Self::default()
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            block_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

pub trait GenerativeModel: Send + Sync {
    fn generate(&self, request: &GenerateRequest) -> StudioResult<ModelReply>;
}

/// Turn a reply into an image, or into the error that explains why there is none.
pub fn interpret_reply(reply: ModelReply, context: &str) -> StudioResult<Bitmap> {
    if let Some(reason) = reply.block_reason.as_deref() {
        let detail = reply.block_message.as_deref().unwrap_or_default();
        return Err(StudioError::remote_blocked(
            format!("Request was blocked. Reason: {reason}. {detail}")
                .trim_end()
                .to_string(),
        ));
    }

    if let Some(image) = reply.images.first() {
        tracing::debug!(mime = %image.mime, bytes = image.bytes.len(), context, "received image");
        return image.decode();
    }

    if let Some(finish) = reply.finish_reason.as_deref().filter(|f| *f != "STOP") {
        return Err(StudioError::remote_blocked(format!(
            "Image generation for {context} stopped unexpectedly. Reason: {finish}. This often \
             relates to safety settings."
        )));
    }

    let text = reply.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
    Err(StudioError::remote_empty(match text {
        Some(t) => format!(
            "The AI model did not return an image for the {context}. The model responded with \
             text: \"{t}\""
        ),
        None => format!(
            "The AI model did not return an image for the {context}. This can happen due to \
             safety filters or if the request is too complex. Please try rephrasing your prompt \
             to be more direct."
        ),
    }))
}

/// Where a generative layer should appear.
#[derive(Clone, Debug, PartialEq)]
pub enum EditTarget {
    Hotspot(Hotspot),
    Mask(Mask),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseLevel {
    Subtle,
    Moderate,
    Strong,
}

impl NoiseLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subtle => "subtle",
            Self::Moderate => "moderate",
            Self::Strong => "strong",
        }
    }
}

impl std::str::FromStr for NoiseLevel {
    type Err = StudioError;

    fn from_str(s: &str) -> StudioResult<Self> {
        match s {
            "subtle" => Ok(Self::Subtle),
            "moderate" => Ok(Self::Moderate),
            "strong" => Ok(Self::Strong),
            other => Err(StudioError::validation(format!(
                "unknown noise reduction level '{other}' (expected subtle, moderate or strong)"
            ))),
        }
    }
}

/// One look of a fan-out operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VariantStyle {
    pub description: &'static str,
    pub prompt: &'static str,
}

pub const SMART_BACKGROUND_STYLES: [VariantStyle; 4] = [
    VariantStyle {
        description: "Professional",
        prompt: "a clean, out-of-focus modern office suitable for a corporate headshot",
    },
    VariantStyle {
        description: "Scenic",
        prompt: "a serene natural landscape in soft golden-hour light",
    },
    VariantStyle {
        description: "Creative",
        prompt: "a vibrant abstract backdrop of geometric shapes and soft gradients",
    },
    VariantStyle {
        description: "Dramatic",
        prompt: "a dark, moody studio with a single spotlight on the subject",
    },
];

pub const PROFILE_PICTURE_STYLES: [VariantStyle; 4] = [
    VariantStyle {
        description: "Corporate",
        prompt: "a softly lit, out-of-focus modern office",
    },
    VariantStyle {
        description: "Gradient Glow",
        prompt: "a cyan-to-purple gradient with a subtle ring-light glow around the subject",
    },
    VariantStyle {
        description: "B&W Studio",
        prompt: "a dark studio with one high-contrast key light, in black and white",
    },
    VariantStyle {
        description: "Scenic",
        prompt: "a mountain vista at sunset in golden-hour light",
    },
];

#[derive(Clone, Debug, PartialEq)]
pub struct Variant {
    pub description: String,
    pub image: Bitmap,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Suggestion {
    pub title: String,
    pub prompt: String,
}

/// Request builders for every remote edit, on top of one [`GenerativeModel`].
#[derive(Clone)]
pub struct ImageService {
    model: Arc<dyn GenerativeModel>,
    image_model: String,
    text_model: String,
}

impl std::fmt::Debug for ImageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageService")
            .field("image_model", &self.image_model)
            .field("text_model", &self.text_model)
            .finish_non_exhaustive()
    }
}

impl ImageService {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self {
            model,
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
        }
    }

    pub fn with_models(mut self, image_model: impl Into<String>, text_model: impl Into<String>) -> Self {
        self.image_model = image_model.into();
        self.text_model = text_model.into();
        self
    }

    #[tracing::instrument(skip(self, parts), fields(model = %self.image_model))]
    fn image_call(&self, context: &str, parts: Vec<Part>) -> StudioResult<Bitmap> {
        let request = GenerateRequest {
            model: self.image_model.clone(),
            parts,
            response_schema: None,
        };
        let reply = self.model.generate(&request)?;
        interpret_reply(reply, context)
    }

    fn text_call(&self, parts: Vec<Part>, schema: Option<serde_json::Value>) -> StudioResult<String> {
        let request = GenerateRequest {
            model: self.text_model.clone(),
            parts,
            response_schema: schema,
        };
        let reply = self.model.generate(&request)?;
        if let Some(reason) = reply.block_reason {
            return Err(StudioError::remote_blocked(format!(
                "Request was blocked. Reason: {reason}."
            )));
        }
        reply
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StudioError::remote_empty("The AI model returned no text."))
    }

    fn with_image(image: &Bitmap, prompt: String) -> StudioResult<Vec<Part>> {
        Ok(vec![Part::png(image)?, Part::text(prompt)])
    }

    /// A transparent full-frame overlay holding only the generated element.
    pub fn edit_layer(&self, image: &Bitmap, request: &str, target: &EditTarget) -> StudioResult<Bitmap> {
        let parts = match target {
            EditTarget::Hotspot(h) => Self::with_image(image, prompts::layer_at_hotspot(request, *h))?,
            EditTarget::Mask(m) => vec![
                Part::png(image)?,
                Part::Image(m.to_png()?),
                Part::text(prompts::layer_in_mask(request)),
            ],
        };
        self.image_call("edit", parts)
    }

    pub fn remove_object(&self, image: &Bitmap, mask: &Mask) -> StudioResult<Bitmap> {
        let parts = vec![
            Part::png(image)?,
            Part::Image(mask.to_png()?),
            Part::text(prompts::remove_object()),
        ];
        self.image_call("removal", parts)
    }

    pub fn filter(&self, image: &Bitmap, style: &str) -> StudioResult<Bitmap> {
        self.image_call("filter", Self::with_image(image, prompts::filter(style))?)
    }

    pub fn adjust(&self, image: &Bitmap, request: &str, at: Option<Hotspot>) -> StudioResult<Bitmap> {
        self.image_call("adjustment", Self::with_image(image, prompts::adjust(request, at))?)
    }

    pub fn portrait_enhance(&self, image: &Bitmap) -> StudioResult<Bitmap> {
        self.image_call("portrait enhancement", Self::with_image(image, prompts::portrait_enhance())?)
    }

    pub fn passport_photo(&self, image: &Bitmap) -> StudioResult<Bitmap> {
        self.image_call("passport photo", Self::with_image(image, prompts::passport_photo())?)
    }

    pub fn sharpen(&self, image: &Bitmap, intensity: u8) -> StudioResult<Bitmap> {
        self.image_call("sharpen", Self::with_image(image, prompts::sharpen(intensity.min(100)))?)
    }

    pub fn style_transfer(&self, image: &Bitmap, style: &Bitmap, intensity: u8) -> StudioResult<Bitmap> {
        let parts = vec![
            Part::png(image)?,
            Part::png(style)?,
            Part::text(prompts::style_transfer(intensity.min(100))),
        ];
        self.image_call("style transfer", parts)
    }

    pub fn upscale(&self, image: &Bitmap) -> StudioResult<Bitmap> {
        self.image_call("upscale", Self::with_image(image, prompts::upscale())?)
    }

    pub fn denoise(&self, image: &Bitmap, level: NoiseLevel) -> StudioResult<Bitmap> {
        self.image_call("noise reduction", Self::with_image(image, prompts::denoise(level))?)
    }

    pub fn remove_background(&self, image: &Bitmap) -> StudioResult<Bitmap> {
        self.image_call("background removal", Self::with_image(image, prompts::remove_background())?)
    }

    pub fn beautify_background(&self, image: &Bitmap) -> StudioResult<Bitmap> {
        self.image_call(
            "background beautification",
            Self::with_image(image, prompts::beautify_background())?,
        )
    }

    pub fn add_shadow(&self, image: &Bitmap, request: &str) -> StudioResult<Bitmap> {
        self.image_call("shadow", Self::with_image(image, prompts::shadow(request))?)
    }

    /// Black/white segmentation of the object under `at`.
    pub fn smart_select(&self, image: &Bitmap, at: Hotspot) -> StudioResult<Bitmap> {
        self.image_call("smart select", Self::with_image(image, prompts::smart_select(at))?)
    }

    /// Outpaint the transparent part of `composite`, marked white in `fill_mask`.
    pub fn expand(&self, composite: &Bitmap, fill_mask: &Bitmap) -> StudioResult<Bitmap> {
        let parts = vec![
            Part::png(composite)?,
            Part::png(fill_mask)?,
            Part::text(prompts::expand()),
        ];
        self.image_call("expand", parts)
    }

    pub fn uncrop(&self, image: &Bitmap, aspect_ratio: &str) -> StudioResult<Bitmap> {
        self.image_call("uncrop", Self::with_image(image, prompts::uncrop(aspect_ratio))?)
    }

    /// Cut-out subject composited into each smart-background style.
    pub fn smart_backgrounds(&self, subject: &Bitmap) -> StudioResult<Vec<Variant>> {
        let subject = Part::png(subject)?;
        self.generate_variants("background", &SMART_BACKGROUND_STYLES, |style| {
            let parts = vec![
                subject.clone(),
                Part::text(prompts::background_for_subject(style.prompt)),
            ];
            self.image_call("smart background", parts)
        })
    }

    pub fn profile_pictures(&self, subject: &Bitmap) -> StudioResult<Vec<Variant>> {
        let subject = Part::png(subject)?;
        self.generate_variants("profile picture", &PROFILE_PICTURE_STYLES, |style| {
            let parts = vec![subject.clone(), Part::text(prompts::profile_picture(style.prompt))];
            self.image_call(&format!("profile picture: {}", style.description), parts)
        })
    }

    /// Run `call` for every style in parallel, keeping the ones that succeed in style order.
    pub fn generate_variants<F>(&self, what: &str, styles: &[VariantStyle], call: F) -> StudioResult<Vec<Variant>>
    where
        F: Fn(&VariantStyle) -> StudioResult<Bitmap> + Sync,
    {
        let variants: Vec<Variant> = styles
            .par_iter()
            .filter_map(|style| match call(style) {
                Ok(image) => Some(Variant {
                    description: style.description.to_string(),
                    image,
                }),
                Err(e) => {
                    tracing::warn!(style = style.description, error = %e, "variant failed");
                    None
                }
            })
            .collect();

        if variants.is_empty() {
            return Err(StudioError::composite_failure(format!(
                "The AI failed to generate any {what} options. This might be due to safety \
                 filters or a complex subject."
            )));
        }
        tracing::info!(what, ok = variants.len(), total = styles.len(), "variants generated");
        Ok(variants)
    }

    /// A more descriptive version of `request`. Falls back to `request` itself on any failure.
    #[tracing::instrument(skip(self))]
    pub fn enhance_prompt(&self, request: &str) -> String {
        if request.trim().is_empty() {
            return String::new();
        }
        match self.text_call(vec![Part::text(prompts::enhance_prompt(request))], None) {
            Ok(enhanced) => {
                // the model sometimes prefixes a preamble; the instruction is the last line
                let last = enhanced
                    .lines()
                    .rev()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .map(str::to_string);
                last.unwrap_or(enhanced)
            }
            Err(e) => {
                tracing::warn!(error = %e, "prompt enhancement failed, keeping the original");
                request.to_string()
            }
        }
    }

    #[tracing::instrument(skip(self, image))]
    pub fn suggestions(&self, image: &Bitmap) -> StudioResult<Vec<Suggestion>> {
        let schema = serde_json::json!({
            "type": "ARRAY",
            "items": {
                "type": "OBJECT",
                "properties": {
                    "title": {"type": "STRING"},
                    "prompt": {"type": "STRING"}
                },
                "required": ["title", "prompt"]
            }
        });
        let text = self.text_call(Self::with_image(image, prompts::suggestions())?, Some(schema))?;
        let unusable = || StudioError::remote_empty("The AI was unable to provide suggestions for this image.");
        let parsed: Vec<Suggestion> = serde_json::from_str(&text).map_err(|e| {
            tracing::warn!(error = %e, "suggestions were not valid JSON");
            unusable()
        })?;
        if parsed.is_empty() {
            return Err(unusable());
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::foundation::core::PixelSize;

    struct Scripted {
        replies: Mutex<Vec<StudioResult<ModelReply>>>,
        seen: Mutex<Vec<GenerateRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<StudioResult<ModelReply>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl GenerativeModel for Scripted {
        fn generate(&self, request: &GenerateRequest) -> StudioResult<ModelReply> {
            self.seen.lock().unwrap().push(request.clone());
            let mut r = self.replies.lock().unwrap();
            if r.is_empty() {
                return Err(StudioError::network("script exhausted"));
            }
            r.remove(0)
        }
    }

    fn png(w: u32, h: u32) -> EncodedImage {
        EncodedImage::png(&Bitmap::filled(PixelSize::new(w, h).unwrap(), [9, 9, 9, 255])).unwrap()
    }

    #[test]
    fn blocked_reply_wins_over_images() {
        let mut reply = ModelReply::with_image(png(1, 1));
        reply.block_reason = Some("SAFETY".to_string());
        let err = interpret_reply(reply, "edit").unwrap_err();
        assert!(matches!(err, StudioError::RemoteBlocked(m) if m.contains("SAFETY")));
    }

    #[test]
    fn image_reply_decodes() {
        let bmp = interpret_reply(ModelReply::with_image(png(3, 2)), "edit").unwrap();
        assert_eq!(bmp.size(), PixelSize::new(3, 2).unwrap());
    }

    #[test]
    fn unusual_finish_reason_is_blocked() {
        let reply = ModelReply {
            finish_reason: Some("IMAGE_SAFETY".to_string()),
            ..ModelReply::default()
        };
        let err = interpret_reply(reply, "filter").unwrap_err();
        assert!(matches!(err, StudioError::RemoteBlocked(m) if m.contains("IMAGE_SAFETY")));
    }

    #[test]
    fn text_only_reply_is_empty_and_quotes_text() {
        let err = interpret_reply(ModelReply::with_text("I can't do that"), "edit").unwrap_err();
        match err {
            StudioError::RemoteEmpty(m) => assert!(m.contains("\"I can't do that\"")),
            other => panic!("unexpected {other:?}"),
        }
        let err = interpret_reply(ModelReply::default(), "edit").unwrap_err();
        assert!(matches!(err, StudioError::RemoteEmpty(m) if m.contains("rephrasing")));
    }

    #[test]
    fn mask_edit_sends_image_mask_and_prompt() {
        let model = Scripted::new(vec![Ok(ModelReply::with_image(png(4, 4)))]);
        let svc = ImageService::new(model.clone());
        let size = PixelSize::new(4, 4).unwrap();
        let mask = Mask::from_coverage(size, vec![255; 16]).unwrap().unwrap();
        let base = Bitmap::transparent(size);
        svc.edit_layer(&base, "a hat", &EditTarget::Mask(mask)).unwrap();

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].model, DEFAULT_IMAGE_MODEL);
        assert_eq!(seen[0].image_count(), 2);
        assert!(seen[0].prompt().contains("a hat"));
    }

    #[test]
    fn variants_drop_failures_in_order() {
        let model = Scripted::new(vec![]);
        let svc = ImageService::new(model);
        let ok = Bitmap::transparent(PixelSize::new(1, 1).unwrap());
        let out = svc
            .generate_variants("background", &SMART_BACKGROUND_STYLES, |s| {
                if s.description == "Scenic" {
                    Err(StudioError::remote_blocked("no"))
                } else {
                    Ok(ok.clone())
                }
            })
            .unwrap();
        let names: Vec<_> = out.iter().map(|v| v.description.as_str()).collect();
        assert_eq!(names, vec!["Professional", "Creative", "Dramatic"]);

        let err = svc
            .generate_variants("background", &SMART_BACKGROUND_STYLES, |_| {
                Err(StudioError::network("down"))
            })
            .unwrap_err();
        assert!(matches!(err, StudioError::CompositeFailure(_)));
    }

    #[test]
    fn enhance_prompt_keeps_last_line_or_falls_back() {
        let model = Scripted::new(vec![
            Ok(ModelReply::with_text("Sure!\n\nA red fedora, photorealistic\n")),
            Err(StudioError::network("down")),
        ]);
        let svc = ImageService::new(model.clone());
        assert_eq!(svc.enhance_prompt("hat"), "A red fedora, photorealistic");
        assert_eq!(svc.enhance_prompt("hat"), "hat");
        assert_eq!(svc.enhance_prompt("   "), "");
        assert_eq!(model.seen.lock().unwrap()[0].model, DEFAULT_TEXT_MODEL);
    }

    #[test]
    fn suggestions_parse_json() {
        let model = Scripted::new(vec![
            Ok(ModelReply::with_text(r#"[{"title": "Warm", "prompt": "warm it up"}]"#)),
            Ok(ModelReply::with_text("[]")),
            Ok(ModelReply::with_text("sure, here you go")),
        ]);
        let svc = ImageService::new(model.clone());
        let img = Bitmap::transparent(PixelSize::new(1, 1).unwrap());
        let s = svc.suggestions(&img).unwrap();
        assert_eq!(s[0].title, "Warm");
        assert!(matches!(svc.suggestions(&img), Err(StudioError::RemoteEmpty(_))));
        assert!(matches!(svc.suggestions(&img), Err(StudioError::RemoteEmpty(_))));
        assert!(model.seen.lock().unwrap()[0].response_schema.is_some());
    }

    #[test]
    fn noise_level_parses() {
        assert_eq!("strong".parse::<NoiseLevel>().unwrap(), NoiseLevel::Strong);
        assert!("max".parse::<NoiseLevel>().is_err());
    }
}
