//! Instruction text sent alongside images. Kept short; the model does the heavy lifting.

use crate::foundation::core::Hotspot;
use crate::remote::NoiseLevel;

const IMAGE_ONLY: &str = "Return only the resulting image, no text.";

const SAFETY: &str = "Skin tone adjustments such as a tan are fine. Refuse any request to change \
                      a person's race or ethnicity.";

pub fn layer_at_hotspot(request: &str, at: Hotspot) -> String {
    format!(
        "Generate the element described below near pixel ({x}, {y}) of the image, blended \
         realistically into its surroundings.\nRequest: \"{request}\"\nOutput a transparent \
         PNG of the full frame containing only the new element in place. {SAFETY} {IMAGE_ONLY}",
        x = at.x,
        y = at.y,
    )
}

pub fn layer_in_mask(request: &str) -> String {
    format!(
        "Generate the element described below inside the white area of the second image (the \
         mask), blended realistically with the first.\nRequest: \"{request}\"\nOutput a \
         transparent PNG of the full frame containing only the new element. Do not return the \
         original image or the mask. {SAFETY} {IMAGE_ONLY}"
    )
}

pub fn remove_object() -> String {
    format!(
        "Remove whatever is covered by the white area of the mask and reconstruct the \
         background behind it so the result looks untouched. {IMAGE_ONLY}"
    )
}

pub fn filter(style: &str) -> String {
    format!(
        "Apply this stylistic filter to the whole image without changing its content: \
         \"{style}\". The effect should be clearly visible. Filters must not alter anyone's \
         race or ethnicity. {IMAGE_ONLY}"
    )
}

pub fn adjust(request: &str, at: Option<Hotspot>) -> String {
    match at {
        Some(h) => format!(
            "Apply this adjustment around pixel ({x}, {y}) with a smooth falloff, returning the \
             whole image: \"{request}\". {SAFETY} {IMAGE_ONLY}",
            x = h.x,
            y = h.y,
        ),
        None => format!(
            "Apply this adjustment across the whole image, photorealistically: \"{request}\". \
             {SAFETY} {IMAGE_ONLY}"
        ),
    }
}

pub fn portrait_enhance() -> String {
    format!(
        "Retouch this portrait: even out skin while keeping its texture, brighten the eyes and \
         balance the lighting. Keep the person fully recognizable. {IMAGE_ONLY}"
    )
}

pub fn passport_photo() -> String {
    format!(
        "Turn this into a passport photo: centered head and shoulders, neutral expression \
         preserved, plain light-gray background, even lighting. {IMAGE_ONLY}"
    )
}

pub fn sharpen(intensity: u8) -> String {
    format!(
        "Sharpen the whole image at intensity {intensity} out of 100 without halos or \
         artifacts. {IMAGE_ONLY}"
    )
}

pub fn style_transfer(intensity: u8) -> String {
    format!(
        "Redraw the first image in the artistic style of the second, keeping the first \
         image's subject and composition. Style strength: {intensity} out of 100. {IMAGE_ONLY}"
    )
}

pub fn upscale() -> String {
    format!(
        "Upscale this image to exactly twice its resolution, enhancing detail without changing \
         any content. {IMAGE_ONLY}"
    )
}

pub fn denoise(level: NoiseLevel) -> String {
    format!(
        "Reduce luminance and color noise ({level} strength) while keeping detail. The result \
         must not look plastic. {IMAGE_ONLY}",
        level = level.as_str(),
    )
}

pub fn remove_background() -> String {
    format!(
        "Cut out the main foreground subject cleanly and return it on a fully transparent \
         background as a PNG. {IMAGE_ONLY}"
    )
}

pub fn beautify_background() -> String {
    format!(
        "Make the existing background more attractive and realistic (light, color, clutter) \
         while leaving the main subject untouched. {IMAGE_ONLY}"
    )
}

pub fn shadow(request: &str) -> String {
    format!(
        "Add a photorealistic shadow to the main subject, consistent with the scene's \
         lighting: \"{request}\". {IMAGE_ONLY}"
    )
}

pub fn smart_select(at: Hotspot) -> String {
    format!(
        "Find the complete object at or near pixel ({x}, {y}) and return a binary mask of the \
         same size as the image: white for the object, black everywhere else. {IMAGE_ONLY}",
        x = at.x,
        y = at.y,
    )
}

pub fn expand() -> String {
    format!(
        "Fill the transparent areas of the first image (white in the second image, the mask) \
         by extending the scene seamlessly in tone, color and perspective. {IMAGE_ONLY}"
    )
}

pub fn background_for_subject(background: &str) -> String {
    format!(
        "Place the subject (on a transparent background) into this new photorealistic \
         scene, matching light and perspective: \"{background}\". {IMAGE_ONLY}"
    )
}

pub fn profile_picture(background: &str) -> String {
    format!(
        "Create a square 1:1 profile picture of the subject (on a transparent background) \
         set against: \"{background}\". {IMAGE_ONLY}"
    )
}

pub fn uncrop(aspect_ratio: &str) -> String {
    format!(
        "Extend this possibly cropped image into a full scene in the same style, \
         reconstructing any cut-off parts of the subject. The result must have an aspect ratio \
         of exactly {aspect_ratio}. {IMAGE_ONLY}"
    )
}

pub fn enhance_prompt(request: &str) -> String {
    format!(
        "Rewrite this photo-editing request as one detailed, photorealistic instruction. \
         Reply with the instruction only.\nRequest: \"{request}\"\nInstruction:"
    )
}

pub fn suggestions() -> String {
    "Suggest three concrete improvements for this specific image. Reply with a JSON array of \
     three objects, each with a short \"title\" and a detailed, image-specific \"prompt\"."
        .to_string()
}
