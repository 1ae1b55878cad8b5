//! CPU compositing: flatten, crop, canvas expansion.

pub mod collage;
pub mod text;

use std::borrow::Cow;

use rayon::prelude::*;

use crate::bitmap::{Bitmap, BitmapRef};
use crate::foundation::core::{PixelSize, Rect, Viewport};
use crate::foundation::error::{StudioError, StudioResult};
use crate::history::ApplicationState;

pub type PremulRgba8 = [u8; 4];

/// Porter-Duff source-over for one premultiplied pixel.
pub fn over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = add_sat_u8(sa, mul_div255(u16::from(dst[3]), inv));

    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = add_sat_u8(sc, dc);
    }
    out
}

/// Source-over of two equally sized premultiplied buffers, row-parallel.
pub fn over_in_place(dst: &mut [u8], src: &[u8], row_bytes: usize, opacity: f32) -> StudioResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) || row_bytes == 0 {
        return Err(StudioError::validation(
            "over_in_place expects equal-length rgba8 buffers",
        ));
    }
    dst.par_chunks_mut(row_bytes)
        .zip(src.par_chunks(row_bytes))
        .for_each(|(d_row, s_row)| {
            for (d, s) in d_row.chunks_exact_mut(4).zip(s_row.chunks_exact(4)) {
                let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]], opacity);
                d.copy_from_slice(&out);
            }
        });
    Ok(())
}

/// Draw `src` onto `canvas` with its top-left corner at `(x, y)`, clipped to the canvas.
pub fn draw_at(canvas: &mut Bitmap, src: &Bitmap, x: i64, y: i64, opacity: f32) {
    let cw = i64::from(canvas.width());
    let ch = i64::from(canvas.height());
    let sw = i64::from(src.width());

    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + sw).min(cw);
    let y1 = (y + i64::from(src.height())).min(ch);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let span = ((x1 - x0) * 4) as usize;
    let src_data = src.data();
    let dst = canvas.data_mut();
    for cy in y0..y1 {
        let sy = cy - y;
        let s_off = ((sy * sw + (x0 - x)) * 4) as usize;
        let d_off = ((cy * cw + x0) * 4) as usize;
        let d_row = &mut dst[d_off..d_off + span];
        let s_row = &src_data[s_off..s_off + span];
        for (d, s) in d_row.chunks_exact_mut(4).zip(s_row.chunks_exact(4)) {
            let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]], opacity);
            d.copy_from_slice(&out);
        }
    }
}

/// Resample to exactly `size`. Borrowed when no resampling is needed.
pub fn stretch_to(src: &Bitmap, size: PixelSize) -> StudioResult<Cow<'_, Bitmap>> {
    if src.size() == size {
        return Ok(Cow::Borrowed(src));
    }
    // Resampling premultiplied data directly keeps transparent edges free of color fringes.
    let buf = image::RgbaImage::from_raw(src.width(), src.height(), src.data().to_vec())
        .ok_or_else(|| StudioError::validation("bitmap buffer does not match its dimensions"))?;
    let resized = image::imageops::resize(
        &buf,
        size.width,
        size.height,
        image::imageops::FilterType::Triangle,
    );
    Ok(Cow::Owned(Bitmap::from_premul(size, resized.into_raw())?))
}

/// Rasterize `state.base` plus its layers into one bitmap.
///
/// Without layers this hands back `state.base` itself: no pixels are copied and the returned
/// handle is [`BitmapRef::ptr_eq`] to the base.
#[tracing::instrument(skip(state), fields(layers = state.layers.len()))]
pub fn flatten(state: &ApplicationState) -> StudioResult<BitmapRef> {
    if state.layers.is_empty() {
        return Ok(state.base.clone());
    }

    let size = state.base.size();
    let row_bytes = size.width as usize * 4;
    let mut canvas = state.base.bitmap().clone();
    for layer in &state.layers {
        let src = stretch_to(layer.image.bitmap(), size)?;
        over_in_place(canvas.data_mut(), src.data(), row_bytes, 1.0)?;
    }
    tracing::debug!(width = size.width, height = size.height, "flattened layers");
    Ok(BitmapRef::new(canvas))
}

/// A crop selection as drawn on screen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropRequest {
    /// Selection in displayed pixels, relative to the image's content box.
    pub rect: Rect,
    pub viewport: Viewport,
}

impl CropRequest {
    /// Selection converted to whole natural pixels and clamped to the image.
    pub fn natural_bounds(&self) -> StudioResult<(u32, u32, PixelSize)> {
        let r = self.viewport.rect_to_natural(self.rect.abs());
        let w = f64::from(self.viewport.natural.width);
        let h = f64::from(self.viewport.natural.height);
        let x0 = r.x0.round().clamp(0.0, w);
        let y0 = r.y0.round().clamp(0.0, h);
        let x1 = r.x1.round().clamp(0.0, w);
        let y1 = r.y1.round().clamp(0.0, h);
        if x1 <= x0 || y1 <= y0 {
            return Err(StudioError::validation("Please select an area to crop."));
        }
        let size = PixelSize::new((x1 - x0) as u32, (y1 - y0) as u32)?;
        Ok((x0 as u32, y0 as u32, size))
    }
}

/// Flatten, then cut the selected region out at natural resolution.
#[tracing::instrument(skip(state))]
pub fn crop(state: &ApplicationState, req: &CropRequest) -> StudioResult<BitmapRef> {
    if req.viewport.natural != state.base.size() {
        return Err(StudioError::validation(format!(
            "crop viewport is {}x{} but the image is {}x{}",
            req.viewport.natural.width,
            req.viewport.natural.height,
            state.base.width(),
            state.base.height()
        )));
    }
    let (x, y, size) = req.natural_bounds()?;
    // Transient: never registered in the pool, dropped when this function returns.
    let flattened = flatten(state)?;
    Ok(BitmapRef::new(extract(flattened.bitmap(), x, y, size)?))
}

/// Copy a sub-rectangle of `src`.
pub(crate) fn extract(src: &Bitmap, x: u32, y: u32, size: PixelSize) -> StudioResult<Bitmap> {
    let inside = u64::from(x) + u64::from(size.width) <= u64::from(src.width())
        && u64::from(y) + u64::from(size.height) <= u64::from(src.height());
    if !inside {
        return Err(StudioError::validation(format!(
            "region {}x{} at ({x}, {y}) is outside the {}x{} image",
            size.width,
            size.height,
            src.width(),
            src.height()
        )));
    }
    let sw = src.width() as usize;
    let row = size.width as usize * 4;
    let mut out = Vec::with_capacity(size.byte_len());
    for r in 0..size.height as usize {
        let off = ((y as usize + r) * sw + x as usize) * 4;
        out.extend_from_slice(&src.data()[off..off + row]);
    }
    Bitmap::from_premul(size, out)
}

/// Target canvas for generative expand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExpandCanvas {
    pub width: u32,
    pub height: u32,
    /// Position of the original image on the new canvas.
    pub offset_x: u32,
    pub offset_y: u32,
}

/// Place `image` on a larger transparent canvas and build the matching fill mask
/// (white where the model must paint, black over the original pixels).
pub fn expand_canvas(image: &Bitmap, target: ExpandCanvas) -> StudioResult<(Bitmap, Bitmap)> {
    let size = PixelSize::new(target.width, target.height)?;
    let fits_x = u64::from(target.offset_x) + u64::from(image.width()) <= u64::from(size.width);
    let fits_y = u64::from(target.offset_y) + u64::from(image.height()) <= u64::from(size.height);
    if !fits_x || !fits_y {
        return Err(StudioError::validation(format!(
            "a {}x{} image at ({}, {}) does not fit a {}x{} canvas",
            image.width(),
            image.height(),
            target.offset_x,
            target.offset_y,
            size.width,
            size.height
        )));
    }

    let ox = i64::from(target.offset_x);
    let oy = i64::from(target.offset_y);

    let mut composite = Bitmap::transparent(size);
    draw_at(&mut composite, image, ox, oy, 1.0);

    let mut mask = Bitmap::filled(size, [255, 255, 255, 255]);
    let hole = Bitmap::filled(image.size(), [0, 0, 0, 255]);
    draw_at(&mut mask, &hole, ox, oy, 1.0);

    Ok((composite, mask))
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

fn add_sat_u8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::Size;
    use crate::layers::{Layer, LayerId};

    fn px(w: u32, h: u32) -> PixelSize {
        PixelSize::new(w, h).unwrap()
    }

    #[test]
    fn extract_rejects_regions_outside_the_source() {
        let src = Bitmap::filled(px(4, 4), [1, 2, 3, 255]);
        let inner = extract(&src, 2, 2, px(2, 2)).unwrap();
        assert_eq!(inner.pixel(1, 1), Some([1, 2, 3, 255]));
        assert!(extract(&src, 3, 0, px(2, 1)).is_err());
        assert!(extract(&src, 0, u32::MAX, px(1, 1)).is_err());
    }

    fn state(base: Bitmap, layers: Vec<Bitmap>) -> ApplicationState {
        ApplicationState {
            base: BitmapRef::new(base),
            layers: layers
                .into_iter()
                .enumerate()
                .map(|(i, b)| Layer {
                    id: LayerId::from_raw(i as u64 + 1),
                    image: BitmapRef::new(b),
                    prompt: format!("layer {i}"),
                })
                .collect(),
            description: "test".to_string(),
        }
    }

    #[test]
    fn over_opacity_0_is_noop() {
        let dst = [1, 2, 3, 4];
        let src = [200, 200, 200, 200];
        assert_eq!(over(dst, src, 0.0), dst);
    }

    #[test]
    fn over_src_alpha_0_is_noop() {
        let dst = [10, 20, 30, 40];
        let src = [255, 255, 255, 0];
        assert_eq!(over(dst, src, 1.0), dst);
    }

    #[test]
    fn over_src_opaque_replaces_dst() {
        let dst = [0, 0, 0, 255];
        let src = [255, 0, 0, 255];
        assert_eq!(over(dst, src, 1.0), src);
    }

    #[test]
    fn flatten_without_layers_is_the_base() {
        let s = state(Bitmap::filled(px(4, 4), [1, 2, 3, 255]), vec![]);
        let out = flatten(&s).unwrap();
        assert!(BitmapRef::ptr_eq(&out, &s.base));
    }

    #[test]
    fn flatten_paints_layers_in_order() {
        let mut top = Bitmap::transparent(px(2, 1));
        top.data_mut()[4..8].copy_from_slice(&[0, 0, 255, 255]);
        let s = state(
            Bitmap::filled(px(2, 1), [255, 255, 255, 255]),
            vec![Bitmap::filled(px(2, 1), [255, 0, 0, 255]), top],
        );
        let out = flatten(&s).unwrap();
        assert!(!BitmapRef::ptr_eq(&out, &s.base));
        assert_eq!(out.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(out.pixel(1, 0), Some([0, 0, 255, 255]));
        // base untouched
        assert_eq!(s.base.pixel(0, 0), Some([255, 255, 255, 255]));
    }

    #[test]
    fn flatten_stretches_layers_to_base() {
        let s = state(
            Bitmap::filled(px(8, 8), [0, 0, 0, 255]),
            vec![Bitmap::filled(px(2, 2), [0, 255, 0, 255])],
        );
        let out = flatten(&s).unwrap();
        assert_eq!(out.size(), px(8, 8));
        assert_eq!(out.pixel(7, 7), Some([0, 255, 0, 255]));
    }

    #[test]
    fn crop_scales_from_displayed_space() {
        let mut base = Bitmap::filled(px(100, 100), [0, 0, 0, 255]);
        base.data_mut()[..4].copy_from_slice(&[9, 9, 9, 255]);
        let s = state(base, vec![]);
        let req = CropRequest {
            rect: Rect::new(0.0, 0.0, 25.0, 25.0),
            viewport: Viewport::new(Size::new(50.0, 50.0), px(100, 100)).unwrap(),
        };
        let out = crop(&s, &req).unwrap();
        assert_eq!(out.size(), px(50, 50));
        assert_eq!(out.pixel(0, 0), Some([9, 9, 9, 255]));
    }

    #[test]
    fn crop_clamps_and_rejects_empty() {
        let s = state(Bitmap::filled(px(10, 10), [0, 0, 0, 255]), vec![]);
        let vp = Viewport::unscaled(px(10, 10));
        let out = crop(
            &s,
            &CropRequest {
                rect: Rect::new(5.0, 5.0, 40.0, 40.0),
                viewport: vp,
            },
        )
        .unwrap();
        assert_eq!(out.size(), px(5, 5));

        let empty = CropRequest {
            rect: Rect::new(3.0, 3.0, 3.0, 9.0),
            viewport: vp,
        };
        assert!(matches!(crop(&s, &empty), Err(StudioError::Validation(_))));
    }

    #[test]
    fn expand_builds_composite_and_mask() {
        let img = Bitmap::filled(px(2, 2), [10, 20, 30, 255]);
        let (comp, mask) = expand_canvas(
            &img,
            ExpandCanvas {
                width: 4,
                height: 4,
                offset_x: 1,
                offset_y: 1,
            },
        )
        .unwrap();
        assert_eq!(comp.pixel(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(comp.pixel(1, 1), Some([10, 20, 30, 255]));
        assert_eq!(mask.pixel(0, 0), Some([255, 255, 255, 255]));
        assert_eq!(mask.pixel(2, 2), Some([0, 0, 0, 255]));

        let too_small = ExpandCanvas {
            width: 2,
            height: 2,
            offset_x: 1,
            offset_y: 0,
        };
        assert!(expand_canvas(&img, too_small).is_err());
    }
}
