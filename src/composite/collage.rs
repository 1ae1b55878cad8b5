use crate::bitmap::Bitmap;
use crate::composite::text::{PillLabel, draw_overlay};
use crate::composite::{draw_at, stretch_to};
use crate::foundation::core::PixelSize;
use crate::foundation::error::{StudioError, StudioResult};

/// Appearance of a before/after collage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CollageStyle {
    /// Gap between the two panels, in pixels.
    pub gap: u32,
    /// Straight-alpha color behind the panels (shows through the gap).
    pub background: [u8; 4],
    pub labels: bool,
}

impl Default for CollageStyle {
    fn default() -> Self {
        Self {
            gap: 8,
            background: [0x16, 0x19, 0x28, 0xFF],
            labels: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollageLayout {
    SideBySide,
    Stacked,
}

impl CollageLayout {
    /// Decided by the edited image alone.
    pub fn for_after(after: PixelSize) -> Self {
        if after.is_landscape() {
            Self::SideBySide
        } else {
            Self::Stacked
        }
    }

    pub fn canvas_size(self, panel: PixelSize, gap: u32) -> StudioResult<PixelSize> {
        let doubled = |side: u32| {
            side.checked_mul(2)
                .and_then(|d| d.checked_add(gap))
                .ok_or_else(|| {
                    StudioError::validation(format!(
                        "collage of two {}x{} panels with a {gap}px gap is too large",
                        panel.width, panel.height
                    ))
                })
        };
        match self {
            Self::SideBySide => PixelSize::new(doubled(panel.width)?, panel.height),
            Self::Stacked => PixelSize::new(panel.width, doubled(panel.height)?),
        }
    }

    /// Top-left corner of the "after" panel.
    pub fn after_origin(self, panel: PixelSize, gap: u32) -> (u32, u32) {
        match self {
            Self::SideBySide => (panel.width + gap, 0),
            Self::Stacked => (0, panel.height + gap),
        }
    }
}

/// Before/after collage at the edited image's resolution.
#[tracing::instrument(skip(before, after), fields(after_w = after.width(), after_h = after.height()))]
pub fn comparison_collage(before: &Bitmap, after: &Bitmap, style: CollageStyle) -> StudioResult<Bitmap> {
    let panel = after.size();
    let layout = CollageLayout::for_after(panel);
    let size = layout.canvas_size(panel, style.gap)?;

    let mut canvas = Bitmap::filled(size, style.background);
    let before = stretch_to(before, panel)?;
    draw_at(&mut canvas, &before, 0, 0, 1.0);
    let (ax, ay) = layout.after_origin(panel, style.gap);
    draw_at(&mut canvas, after, i64::from(ax), i64::from(ay), 1.0);

    if !style.labels {
        return Ok(canvas);
    }

    let font_size = (f64::from(panel.width) / 30.0).round().max(24.0);
    let margin = font_size;
    let labels = [
        PillLabel {
            text: "BEFORE".to_string(),
            x: margin,
            y: margin,
            font_size,
        },
        PillLabel {
            text: "AFTER".to_string(),
            x: f64::from(ax) + margin,
            y: f64::from(ay) + margin,
            font_size,
        },
    ];
    let svg: String = labels.iter().map(PillLabel::to_svg).collect();
    draw_overlay(&canvas, &svg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(w: u32, h: u32) -> PixelSize {
        PixelSize::new(w, h).unwrap()
    }

    #[test]
    fn layout_follows_after_orientation() {
        assert_eq!(CollageLayout::for_after(px(200, 100)), CollageLayout::SideBySide);
        assert_eq!(CollageLayout::for_after(px(100, 100)), CollageLayout::SideBySide);
        assert_eq!(CollageLayout::for_after(px(100, 200)), CollageLayout::Stacked);
    }

    #[test]
    fn canvas_sizes_include_gap() {
        assert_eq!(
            CollageLayout::SideBySide.canvas_size(px(200, 100), 8).unwrap(),
            px(408, 100)
        );
        assert_eq!(
            CollageLayout::Stacked.canvas_size(px(100, 200), 8).unwrap(),
            px(100, 408)
        );
    }

    #[test]
    fn oversized_panels_are_rejected() {
        let wide = px(u32::MAX / 2 + 1, 1);
        let err = CollageLayout::SideBySide.canvas_size(wide, 8).unwrap_err();
        assert!(matches!(err, StudioError::Validation(_)));
        let tall = px(1, u32::MAX / 2);
        assert!(CollageLayout::Stacked.canvas_size(tall, 8).is_err());
    }

    #[test]
    fn panels_and_gap_are_painted() {
        let before = Bitmap::filled(px(50, 50), [255, 0, 0, 255]);
        let after = Bitmap::filled(px(100, 50), [0, 0, 255, 255]);
        let style = CollageStyle {
            labels: false,
            ..CollageStyle::default()
        };
        let out = comparison_collage(&before, &after, style).unwrap();
        assert_eq!(out.size(), px(208, 50));
        // before stretched to the after panel size
        assert_eq!(out.pixel(99, 49), Some([255, 0, 0, 255]));
        assert_eq!(out.pixel(103, 10), Some([0x16, 0x19, 0x28, 0xFF]));
        assert_eq!(out.pixel(108, 0), Some([0, 0, 255, 255]));
    }

    #[test]
    fn labels_darken_the_pill_area() {
        let before = Bitmap::filled(px(300, 300), [255, 255, 255, 255]);
        let after = Bitmap::filled(px(300, 300), [255, 255, 255, 255]);
        let out = comparison_collage(&before, &after, CollageStyle::default()).unwrap();
        // just inside the BEFORE pill's left edge, below its rounded corner
        let p = out.pixel(26, 40).unwrap();
        assert!(p[0] < 200, "expected pill background, got {p:?}");
        // far corner untouched
        assert_eq!(out.pixel(299, 299), Some([255, 255, 255, 255]));
    }
}
