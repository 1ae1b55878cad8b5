use crate::foundation::error::{StudioError, StudioResult};

pub use kurbo::{Point, Rect, Size, Vec2};

/// Natural (decoded) pixel dimensions of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> StudioResult<Self> {
        if width == 0 || height == 0 {
            return Err(StudioError::validation(format!(
                "image dimensions must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    /// Landscape includes square images.
    pub fn is_landscape(self) -> bool {
        self.width >= self.height
    }

    pub fn pixel_count(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    pub fn byte_len(self) -> usize {
        self.pixel_count().saturating_mul(4)
    }

    pub fn to_size(self) -> Size {
        Size::new(f64::from(self.width), f64::from(self.height))
    }
}

/// The on-screen image: its displayed content box and its natural pixel size.
///
/// Every pointer, hotspot and crop value crosses from displayed to natural space through here.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Viewport {
    pub displayed: Size,
    pub natural: PixelSize,
}

impl Viewport {
    pub fn new(displayed: Size, natural: PixelSize) -> StudioResult<Self> {
        if !displayed.is_finite() || displayed.width <= 0.0 || displayed.height <= 0.0 {
            return Err(StudioError::validation(format!(
                "displayed size must be positive, got {}x{}",
                displayed.width, displayed.height
            )));
        }
        Ok(Self { displayed, natural })
    }

    /// Image shown at its natural size.
    pub fn unscaled(natural: PixelSize) -> Self {
        Self {
            displayed: natural.to_size(),
            natural,
        }
    }

    /// Same image after the displayed element was resized.
    pub fn with_displayed(self, displayed: Size) -> StudioResult<Self> {
        Self::new(displayed, self.natural)
    }

    /// Per-axis `natural / displayed`.
    pub fn scale(&self) -> Vec2 {
        Vec2::new(
            f64::from(self.natural.width) / self.displayed.width,
            f64::from(self.natural.height) / self.displayed.height,
        )
    }

    pub fn to_natural(&self, displayed: Point) -> Point {
        let s = self.scale();
        Point::new(displayed.x * s.x, displayed.y * s.y)
    }

    pub fn rect_to_natural(&self, displayed: Rect) -> Rect {
        let s = self.scale();
        Rect::new(
            displayed.x0 * s.x,
            displayed.y0 * s.y,
            displayed.x1 * s.x,
            displayed.y1 * s.y,
        )
    }

    /// Rounded natural pixel under a displayed offset, clamped to the image.
    pub fn hotspot_at(&self, displayed: Point) -> Hotspot {
        let p = self.to_natural(displayed);
        let max_x = f64::from(self.natural.width.saturating_sub(1));
        let max_y = f64::from(self.natural.height.saturating_sub(1));
        Hotspot {
            x: p.x.round().clamp(0.0, max_x) as u32,
            y: p.y.round().clamp(0.0, max_y) as u32,
        }
    }
}

/// A point in natural pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hotspot {
    pub x: u32,
    pub y: u32,
}

/// A hotspot as picked on screen: the natural pixel plus where the marker is drawn.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PickedPoint {
    pub natural: Hotspot,
    pub displayed: Point,
}

impl PickedPoint {
    pub fn pick(viewport: &Viewport, displayed: Point) -> Self {
        Self {
            natural: viewport.hotspot_at(displayed),
            displayed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(w: u32, h: u32) -> PixelSize {
        PixelSize::new(w, h).unwrap()
    }

    #[test]
    fn pixel_size_rejects_zero() {
        assert!(PixelSize::new(0, 4).is_err());
        assert!(PixelSize::new(4, 0).is_err());
        assert!(px(4, 4).is_landscape());
        assert!(!px(3, 4).is_landscape());
    }

    #[test]
    fn viewport_scale_is_natural_over_displayed() {
        let vp = Viewport::new(Size::new(200.0, 100.0), px(1000, 400)).unwrap();
        assert_eq!(vp.scale(), Vec2::new(5.0, 4.0));
        assert_eq!(vp.to_natural(Point::new(10.0, 10.0)), Point::new(50.0, 40.0));
    }

    #[test]
    fn viewport_recomputes_after_resize() {
        let vp = Viewport::new(Size::new(100.0, 100.0), px(400, 400)).unwrap();
        let resized = vp.with_displayed(Size::new(200.0, 200.0)).unwrap();
        assert_eq!(resized.scale(), Vec2::new(2.0, 2.0));
        assert!(vp.with_displayed(Size::new(0.0, 10.0)).is_err());
    }

    #[test]
    fn hotspot_rounds_and_clamps() {
        let vp = Viewport::new(Size::new(50.0, 50.0), px(100, 100)).unwrap();
        assert_eq!(vp.hotspot_at(Point::new(5.2, 5.3)), Hotspot { x: 10, y: 11 });
        assert_eq!(vp.hotspot_at(Point::new(60.0, -3.0)), Hotspot { x: 99, y: 0 });
    }

    #[test]
    fn rect_maps_per_axis() {
        let vp = Viewport::new(Size::new(100.0, 50.0), px(200, 200)).unwrap();
        let r = vp.rect_to_natural(Rect::new(10.0, 10.0, 20.0, 20.0));
        assert_eq!(r, Rect::new(20.0, 40.0, 40.0, 80.0));
    }
}
