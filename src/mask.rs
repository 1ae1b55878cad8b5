//! Brush-painted selection masks aligned 1:1 with natural image pixels.

use crate::bitmap::{Bitmap, EncodedImage};
use crate::composite::stretch_to;
use crate::foundation::core::{PixelSize, Point, Size, Viewport};
use crate::foundation::error::{StudioError, StudioResult};

/// Per-pixel coverage, `0` = unselected, `255` = fully selected.
#[derive(Clone, PartialEq, Eq)]
pub struct Mask {
    size: PixelSize,
    coverage: Vec<u8>,
}

impl std::fmt::Debug for Mask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mask")
            .field("width", &self.size.width)
            .field("height", &self.size.height)
            .field("selected", &self.selected_pixels())
            .finish()
    }
}

impl Mask {
    /// `None` when no pixel is selected.
    pub fn from_coverage(size: PixelSize, coverage: Vec<u8>) -> StudioResult<Option<Self>> {
        if coverage.len() != size.pixel_count() {
            return Err(StudioError::validation(format!(
                "expected {} coverage values for a {}x{} mask, got {}",
                size.pixel_count(),
                size.width,
                size.height,
                coverage.len()
            )));
        }
        if coverage.iter().all(|&c| c == 0) {
            return Ok(None);
        }
        Ok(Some(Self { size, coverage }))
    }

    /// Interpret a black/white (or transparent/opaque) image as a mask of `size`.
    ///
    /// Coverage is luminance times alpha, so both white-on-black and white-on-transparent masks
    /// read the same. The image is resampled when its dimensions differ from `size`.
    pub fn from_bitmap(bitmap: &Bitmap, size: PixelSize) -> StudioResult<Option<Self>> {
        let src = stretch_to(bitmap, size)?;
        // premultiplied, so the color channels already carry alpha
        let coverage = src
            .data()
            .chunks_exact(4)
            .map(|p| {
                let l = 299 * u32::from(p[0]) + 587 * u32::from(p[1]) + 114 * u32::from(p[2]);
                ((l + 500) / 1000).min(255) as u8
            })
            .collect();
        Self::from_coverage(size, coverage)
    }

    pub fn size(&self) -> PixelSize {
        self.size
    }

    pub fn coverage(&self) -> &[u8] {
        &self.coverage
    }

    pub fn at(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        Some(self.coverage[y as usize * self.size.width as usize + x as usize])
    }

    pub fn selected_pixels(&self) -> usize {
        self.coverage.iter().filter(|&&c| c != 0).count()
    }

    /// White where selected, transparent elsewhere.
    pub fn to_bitmap(&self) -> StudioResult<Bitmap> {
        let mut data = Vec::with_capacity(self.size.byte_len());
        for &c in &self.coverage {
            data.extend_from_slice(&[c, c, c, c]);
        }
        Bitmap::from_premul(self.size, data)
    }

    pub fn to_png(&self) -> StudioResult<EncodedImage> {
        EncodedImage::png(&self.to_bitmap()?)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrushMode {
    #[default]
    Paint,
    Erase,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum StrokeState {
    Idle,
    /// Last pointer position, in displayed pixels.
    Drawing { last: Point },
}

/// Interactive mask painter.
///
/// Pointer positions arrive in displayed pixels relative to the image's content box; strokes
/// are rasterized in natural pixels.
#[derive(Clone, Debug)]
pub struct MaskSurface {
    viewport: Viewport,
    mode: BrushMode,
    brush_size: f64,
    coverage: Vec<u8>,
    state: StrokeState,
}

impl MaskSurface {
    pub fn new(viewport: Viewport, brush_size: f64) -> Self {
        Self {
            viewport,
            mode: BrushMode::Paint,
            brush_size,
            coverage: vec![0; viewport.natural.pixel_count()],
            state: StrokeState::Idle,
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn mode(&self) -> BrushMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: BrushMode) {
        self.mode = mode;
    }

    pub fn brush_size(&self) -> f64 {
        self.brush_size
    }

    pub fn set_brush_size(&mut self, brush_size: f64) {
        self.brush_size = brush_size.max(0.0);
    }

    /// The displayed element was resized; later strokes use the new scale.
    pub fn set_display_size(&mut self, displayed: Size) -> StudioResult<()> {
        self.viewport = self.viewport.with_displayed(displayed)?;
        Ok(())
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.state, StrokeState::Drawing { .. })
    }

    pub fn pointer_down(&mut self, displayed: Point) {
        self.state = StrokeState::Drawing { last: displayed };
    }

    /// Stroke from the previous pointer position. Ignored unless a stroke is in progress.
    pub fn pointer_move(&mut self, displayed: Point) {
        let StrokeState::Drawing { last } = self.state else {
            return;
        };
        let from = self.viewport.to_natural(last);
        let to = self.viewport.to_natural(displayed);
        let width = self.brush_size * self.viewport.scale().x;
        self.stroke_segment(from, to, width);
        self.state = StrokeState::Drawing { last: displayed };
    }

    /// End the stroke and report the whole mask.
    pub fn pointer_up(&mut self) -> Option<Mask> {
        self.state = StrokeState::Idle;
        self.snapshot()
    }

    /// Replace the painted pixels, e.g. with a smart-select result.
    pub fn load(&mut self, mask: Option<&Mask>) -> StudioResult<()> {
        match mask {
            Some(m) if m.size() != self.viewport.natural => Err(StudioError::validation(format!(
                "mask is {}x{} but the image is {}x{}",
                m.size().width,
                m.size().height,
                self.viewport.natural.width,
                self.viewport.natural.height
            ))),
            Some(m) => {
                self.coverage.copy_from_slice(m.coverage());
                Ok(())
            }
            None => {
                self.clear();
                Ok(())
            }
        }
    }

    pub fn clear(&mut self) {
        self.coverage.fill(0);
        self.state = StrokeState::Idle;
    }

    pub fn snapshot(&self) -> Option<Mask> {
        Mask::from_coverage(self.viewport.natural, self.coverage.clone())
            .ok()
            .flatten()
    }

    /// Round-capped, anti-aliased segment of `width` natural pixels.
    fn stroke_segment(&mut self, a: Point, b: Point, width: f64) {
        let r = width / 2.0;
        if r <= 0.0 || !r.is_finite() {
            return;
        }
        let w = self.viewport.natural.width;
        let h = self.viewport.natural.height;
        let reach = r + 1.0;
        let x0 = (a.x.min(b.x) - reach).floor().max(0.0) as u32;
        let y0 = (a.y.min(b.y) - reach).floor().max(0.0) as u32;
        let x1 = ((a.x.max(b.x) + reach).ceil().max(0.0) as u32).min(w);
        let y1 = ((a.y.max(b.y) + reach).ceil().max(0.0) as u32).min(h);

        for y in y0..y1 {
            for x in x0..x1 {
                let center = Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
                let d = distance_to_segment(center, a, b);
                let cov = (r + 0.5 - d).clamp(0.0, 1.0);
                if cov <= 0.0 {
                    continue;
                }
                let c = (cov * 255.0).round() as u16;
                let i = y as usize * w as usize + x as usize;
                let dst = u16::from(self.coverage[i]);
                self.coverage[i] = match self.mode {
                    // source-over
                    BrushMode::Paint => (c + (dst * (255 - c) + 127) / 255).min(255) as u8,
                    // destination-out
                    BrushMode::Erase => ((dst * (255 - c) + 127) / 255) as u8,
                };
            }
        }
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len2 = ab.hypot2();
    if len2 == 0.0 {
        return (p - a).hypot();
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).hypot()
}
