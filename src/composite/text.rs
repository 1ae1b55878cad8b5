//! Text overlays (collage labels, watermarks) rasterized through `usvg`/`resvg`.
//!
//! Overlays are described as a full-canvas SVG document, rendered into a premultiplied pixmap
//! and then composited source-over onto the target bitmap.

use std::sync::{Arc, OnceLock};

use anyhow::Context;

use crate::bitmap::Bitmap;
use crate::composite::draw_at;
use crate::foundation::core::PixelSize;
use crate::foundation::error::{StudioError, StudioResult};

/// Average advance of a bold sans-serif glyph, in ems. Used to size label pills.
const BOLD_ADVANCE_EM: f64 = 0.62;

fn system_fontdb() -> Arc<usvg::fontdb::Database> {
    static DB: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    DB.get_or_init(|| {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        tracing::debug!(faces = db.len(), "loaded system fonts for text overlays");
        Arc::new(db)
    })
    .clone()
}

/// Rasterize a full-canvas SVG overlay into a premultiplied bitmap of `size`.
pub fn rasterize_overlay(svg_body: &str, size: PixelSize) -> StudioResult<Bitmap> {
    let doc = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">{svg_body}</svg>"#,
        w = size.width,
        h = size.height,
    );
    let opts = usvg::Options {
        fontdb: system_fontdb(),
        ..Default::default()
    };
    let tree = usvg::Tree::from_data(doc.as_bytes(), &opts).context("parse overlay svg")?;

    let mut pixmap = resvg::tiny_skia::Pixmap::new(size.width, size.height)
        .ok_or_else(|| StudioError::validation("failed to allocate overlay pixmap"))?;
    resvg::render(
        &tree,
        resvg::tiny_skia::Transform::identity(),
        &mut pixmap.as_mut(),
    );
    Bitmap::from_premul(size, pixmap.take())
}

/// Composite an SVG overlay onto a copy of `target`.
pub fn draw_overlay(target: &Bitmap, svg_body: &str) -> StudioResult<Bitmap> {
    let overlay = rasterize_overlay(svg_body, target.size())?;
    let mut out = target.clone();
    draw_at(&mut out, &overlay, 0, 0, 1.0);
    Ok(out)
}

/// Rounded "pill" behind a short label, top-left anchored at `(x, y)`.
#[derive(Clone, Debug, PartialEq)]
pub struct PillLabel {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font_size: f64,
}

impl PillLabel {
    pub fn padding(&self) -> f64 {
        self.font_size / 2.0
    }

    pub fn width(&self) -> f64 {
        let chars = self.text.chars().count() as f64;
        chars * self.font_size * BOLD_ADVANCE_EM + self.padding() * 2.0
    }

    pub fn height(&self) -> f64 {
        self.font_size + self.padding() * 2.0
    }

    pub fn to_svg(&self) -> String {
        let pad = self.padding();
        // Text is top-anchored; 0.8em approximates the ascent of a sans-serif face.
        let baseline = self.y + pad + self.font_size * 0.8;
        format!(
            r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" rx="10" ry="10" fill="black" fill-opacity="0.6"/><text x="{tx}" y="{ty}" font-family="Inter, sans-serif" font-weight="bold" font-size="{fs}" fill="white">{text}</text>"#,
            x = self.x,
            y = self.y,
            w = self.width(),
            h = self.height(),
            tx = self.x + pad,
            ty = baseline,
            fs = self.font_size,
            text = escape_xml(&self.text),
        )
    }
}

/// Bottom-right watermark metrics scaled to the image width.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WatermarkMetrics {
    pub margin: f64,
    pub font_size: f64,
    pub stroke_width: f64,
}

impl WatermarkMetrics {
    pub fn for_width(width: u32) -> Self {
        let w = f64::from(width);
        Self {
            margin: (w / 100.0).round().max(20.0),
            font_size: (w / 50.0).round().max(20.0),
            stroke_width: (w / 500.0).round().max(2.0),
        }
    }
}

pub fn watermark_svg(text: &str, size: PixelSize) -> String {
    let m = WatermarkMetrics::for_width(size.width);
    // Bottom-anchored: lift the alphabetic baseline by an approximate descent.
    let x = f64::from(size.width) - m.margin;
    let y = f64::from(size.height) - m.margin - m.font_size * 0.2;
    format!(
        r#"<text x="{x}" y="{y}" text-anchor="end" font-family="Inter, sans-serif" font-weight="bold" font-size="{fs}" fill="white" fill-opacity="0.7" stroke="black" stroke-opacity="0.5" stroke-width="{sw}" stroke-linejoin="round" paint-order="stroke">{text}</text>"#,
        fs = m.font_size,
        sw = m.stroke_width,
        text = escape_xml(text),
    )
}

/// Stroked + filled text in the bottom-right corner, legible over any background.
#[tracing::instrument(skip(bitmap), fields(width = bitmap.width(), height = bitmap.height()))]
pub fn apply_watermark(bitmap: &Bitmap, text: &str) -> StudioResult<Bitmap> {
    if text.trim().is_empty() {
        return Ok(bitmap.clone());
    }
    draw_overlay(bitmap, &watermark_svg(text, bitmap.size()))
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_metrics_have_floors_and_scale() {
        let small = WatermarkMetrics::for_width(400);
        assert_eq!(small.margin, 20.0);
        assert_eq!(small.font_size, 20.0);
        assert_eq!(small.stroke_width, 2.0);

        let big = WatermarkMetrics::for_width(5000);
        assert_eq!(big.margin, 50.0);
        assert_eq!(big.font_size, 100.0);
        assert_eq!(big.stroke_width, 10.0);
    }

    #[test]
    fn overlay_rect_is_composited() {
        let base = Bitmap::filled(PixelSize::new(20, 20).unwrap(), [255, 255, 255, 255]);
        let out = draw_overlay(&base, r#"<rect x="0" y="0" width="10" height="20" fill="black"/>"#)
            .unwrap();
        assert_eq!(out.pixel(2, 2), Some([0, 0, 0, 255]));
        assert_eq!(out.pixel(15, 2), Some([255, 255, 255, 255]));
    }

    #[test]
    fn watermark_keeps_dimensions() {
        let base = Bitmap::filled(PixelSize::new(64, 48).unwrap(), [30, 30, 30, 255]);
        let out = apply_watermark(&base, "Made with <retouch>").unwrap();
        assert_eq!(out.size(), base.size());
        assert_eq!(apply_watermark(&base, "  ").unwrap(), base);
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_xml(r#"a<b>&"c'"#), "a&lt;b&gt;&amp;&quot;c&apos;");
    }

    #[test]
    fn pill_grows_with_text() {
        let short = PillLabel {
            text: "AFTER".to_string(),
            x: 0.0,
            y: 0.0,
            font_size: 24.0,
        };
        let long = PillLabel {
            text: "BEFORE".to_string(),
            ..short.clone()
        };
        assert!(long.width() > short.width());
        assert_eq!(short.height(), 48.0);
    }
}
