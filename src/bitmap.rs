//! Decoded raster images and the shared handles history entries hold on to.
//!
//! Pixels are stored as tightly packed, row-major, premultiplied RGBA8. Premultiplication happens
//! once at decode time and is undone once at encode time; every compositing step in between
//! works on premultiplied data.

pub mod pool;

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use base64::Engine as _;

use crate::foundation::core::PixelSize;
use crate::foundation::error::{StudioError, StudioResult};

/// Decoded image in premultiplied RGBA8 form.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    size: PixelSize,
    rgba8_premul: Vec<u8>,
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.size.width)
            .field("height", &self.size.height)
            .finish()
    }
}

impl Bitmap {
    /// Fully transparent bitmap.
    pub fn transparent(size: PixelSize) -> Self {
        Self {
            size,
            rgba8_premul: vec![0; size.byte_len()],
        }
    }

    /// Bitmap filled with one straight-alpha color.
    pub fn filled(size: PixelSize, rgba: [u8; 4]) -> Self {
        let px = premultiply(rgba);
        let mut data = Vec::with_capacity(size.byte_len());
        for _ in 0..size.pixel_count() {
            data.extend_from_slice(&px);
        }
        Self {
            size,
            rgba8_premul: data,
        }
    }

    pub fn from_premul(size: PixelSize, rgba8_premul: Vec<u8>) -> StudioResult<Self> {
        if rgba8_premul.len() != size.byte_len() {
            return Err(StudioError::validation(format!(
                "expected {} bytes for {}x{} rgba8, got {}",
                size.byte_len(),
                size.width,
                size.height,
                rgba8_premul.len()
            )));
        }
        Ok(Self { size, rgba8_premul })
    }

    pub fn from_straight(size: PixelSize, mut rgba8: Vec<u8>) -> StudioResult<Self> {
        premultiply_rgba8_in_place(&mut rgba8);
        Self::from_premul(size, rgba8)
    }

    pub fn from_rgba_image(img: image::RgbaImage) -> StudioResult<Self> {
        let (w, h) = img.dimensions();
        Self::from_straight(PixelSize::new(w, h)?, img.into_raw())
    }

    /// Decode any raster format the `image` crate recognizes.
    pub fn decode(bytes: &[u8]) -> StudioResult<Self> {
        let dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;
        Self::from_rgba_image(dyn_img.to_rgba8())
    }

    pub fn size(&self) -> PixelSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn data(&self) -> &[u8] {
        &self.rgba8_premul
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.rgba8_premul
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let i = (y as usize * self.size.width as usize + x as usize) * 4;
        let p = &self.rgba8_premul[i..i + 4];
        Some([p[0], p[1], p[2], p[3]])
    }

    /// Un-premultiplied copy for encoders and external consumers.
    pub fn to_rgba_image(&self) -> StudioResult<image::RgbaImage> {
        let mut straight = self.rgba8_premul.clone();
        unpremultiply_rgba8_in_place(&mut straight);
        image::RgbaImage::from_raw(self.size.width, self.size.height, straight)
            .ok_or_else(|| StudioError::validation("bitmap buffer does not match its dimensions"))
    }

    pub fn encode_png(&self) -> StudioResult<Vec<u8>> {
        let img = self.to_rgba_image()?;
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .context("encode png")?;
        Ok(buf)
    }

    /// JPEG has no alpha channel; transparent pixels are flattened onto black.
    pub fn encode_jpeg(&self, quality: u8) -> StudioResult<Vec<u8>> {
        let rgb = image::DynamicImage::ImageRgba8(self.to_rgba_image()?).to_rgb8();
        let mut buf = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
        rgb.write_with_encoder(encoder).context("encode jpeg")?;
        Ok(buf)
    }
}

static NEXT_BITMAP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`BitmapRef`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitmapId(u64);

impl BitmapId {
    fn next() -> Self {
        Self(NEXT_BITMAP_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BitmapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared handle to an immutable bitmap.
///
/// Cloning never copies pixels. The handle's [`url`](BitmapRef::url) is resolvable through the
/// [`pool::BitmapPool`] for as long as some history entry retains it.
#[derive(Clone, Debug)]
pub struct BitmapRef {
    id: BitmapId,
    bitmap: Arc<Bitmap>,
}

impl BitmapRef {
    pub fn new(bitmap: Bitmap) -> Self {
        Self {
            id: BitmapId::next(),
            bitmap: Arc::new(bitmap),
        }
    }

    pub fn id(&self) -> BitmapId {
        self.id
    }

    pub fn url(&self) -> String {
        format!("blob:retouch/{}", self.id)
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub fn size(&self) -> PixelSize {
        self.bitmap.size()
    }

    /// Same handle (and therefore same pixels), not merely equal pixels.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.id == b.id && Arc::ptr_eq(&a.bitmap, &b.bitmap)
    }
}

impl std::ops::Deref for BitmapRef {
    type Target = Bitmap;

    fn deref(&self) -> &Bitmap {
        &self.bitmap
    }
}

/// Encoded image bytes with their MIME type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn png(bitmap: &Bitmap) -> StudioResult<Self> {
        Ok(Self {
            mime: "image/png".to_string(),
            bytes: bitmap.encode_png()?,
        })
    }

    pub fn decode(&self) -> StudioResult<Bitmap> {
        Bitmap::decode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    /// Parse `data:<mime>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> StudioResult<Self> {
        let (header, payload) = url
            .split_once(',')
            .ok_or_else(|| StudioError::validation("invalid data URL"))?;
        let mime = header
            .strip_prefix("data:")
            .and_then(|h| h.strip_suffix(";base64"))
            .filter(|m| !m.is_empty())
            .ok_or_else(|| StudioError::validation("could not parse MIME type from data URL"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .context("decode data URL payload")?;
        Ok(Self {
            mime: mime.to_string(),
            bytes,
        })
    }
}

pub(crate) fn premultiply(rgba: [u8; 4]) -> [u8; 4] {
    let a = u16::from(rgba[3]);
    let m = |c: u8| ((u16::from(c) * a + 127) / 255) as u8;
    [m(rgba[0]), m(rgba[1]), m(rgba[2]), rgba[3]]
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

fn unpremultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u32;
        if a == 0 || a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((u32::from(*c) * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba(rgba));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn decode_png_dimensions_and_premul() {
        let bmp = Bitmap::decode(&png_bytes(2, 3, [100, 50, 200, 128])).unwrap();
        assert_eq!(bmp.width(), 2);
        assert_eq!(bmp.height(), 3);
        assert_eq!(
            bmp.pixel(0, 0).unwrap(),
            [
                ((100u16 * 128 + 127) / 255) as u8,
                ((50u16 * 128 + 127) / 255) as u8,
                ((200u16 * 128 + 127) / 255) as u8,
                128
            ]
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Bitmap::decode(b"not an image").is_err());
    }

    #[test]
    fn opaque_png_survives_encode() {
        let bmp = Bitmap::filled(PixelSize::new(3, 3).unwrap(), [10, 20, 30, 255]);
        let back = Bitmap::decode(&bmp.encode_png().unwrap()).unwrap();
        assert_eq!(back, bmp);
    }

    #[test]
    fn jpeg_encode_produces_jfif() {
        let bmp = Bitmap::filled(PixelSize::new(8, 8).unwrap(), [200, 10, 10, 255]);
        let bytes = bmp.encode_jpeg(80).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn clones_share_pixels() {
        let a = BitmapRef::new(Bitmap::transparent(PixelSize::new(1, 1).unwrap()));
        let b = a.clone();
        let c = BitmapRef::new(a.bitmap().clone());
        assert!(BitmapRef::ptr_eq(&a, &b));
        assert!(!BitmapRef::ptr_eq(&a, &c));
        assert_ne!(a.url(), c.url());
    }

    #[test]
    fn data_url_parse_and_errors() {
        let enc = EncodedImage {
            mime: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        };
        let url = enc.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(EncodedImage::from_data_url(&url).unwrap(), enc);

        assert!(EncodedImage::from_data_url("no comma").is_err());
        assert!(EncodedImage::from_data_url("data:;base64,AAAA").is_err());
        assert!(EncodedImage::from_data_url("data:image/png;base64,@@@").is_err());
    }
}
