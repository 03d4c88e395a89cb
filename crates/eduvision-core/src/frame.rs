//! Frame type and the small amount of pixel work the core needs:
//! image decoding, down-scaling for detection, face cropping, bilinear resize.

use crate::types::FaceRegion;
use std::time::Instant;

/// A captured grayscale frame.
///
/// A frame with no pixel data marks the end of the producer's stream.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
    /// Monotonic producer sequence number.
    pub sequence: u64,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
            sequence,
        }
    }

    /// Zero-size frame signalling end of stream.
    pub fn end_of_stream(sequence: u64) -> Self {
        Self::new(Vec::new(), 0, 0, sequence)
    }

    /// Decode any image the `image` crate understands into a grayscale frame.
    pub fn from_image(img: &image::DynamicImage, sequence: u64) -> Self {
        let luma = img.to_luma8();
        let (width, height) = luma.dimensions();
        Self::new(luma.into_raw(), width, height, sequence)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Pixel buffer holds exactly `width * height` bytes.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize
    }

    /// Box-filter down-scale by an integer factor. A factor of 0 or 1 returns a copy.
    pub fn downscale(&self, factor: u32) -> Frame {
        if factor <= 1 || self.is_empty() || !self.is_well_formed() {
            return self.clone();
        }
        let out_w = (self.width / factor).max(1);
        let out_h = (self.height / factor).max(1);
        let w = self.width as usize;
        let f = factor as usize;

        let mut data = Vec::with_capacity((out_w * out_h) as usize);
        for oy in 0..out_h as usize {
            for ox in 0..out_w as usize {
                let mut sum = 0u32;
                let mut n = 0u32;
                for dy in 0..f {
                    let y = oy * f + dy;
                    if y >= self.height as usize {
                        break;
                    }
                    for dx in 0..f {
                        let x = ox * f + dx;
                        if x >= w {
                            break;
                        }
                        sum += self.data[y * w + x] as u32;
                        n += 1;
                    }
                }
                data.push((sum / n.max(1)) as u8);
            }
        }

        Frame {
            data,
            width: out_w,
            height: out_h,
            captured_at: self.captured_at,
            sequence: self.sequence,
        }
    }

    /// Crop `region` grown by `padding` (fraction of the region size on each
    /// side), clamped to the frame. Returns `None` if nothing remains or the
    /// frame is not well formed.
    pub fn crop(&self, region: &FaceRegion, padding: f32) -> Option<(Vec<u8>, u32, u32)> {
        if self.is_empty() || !self.is_well_formed() {
            return None;
        }
        let pad_x = region.width * padding;
        let pad_y = region.height * padding;
        let x0 = (region.x - pad_x).floor().max(0.0) as u32;
        let y0 = (region.y - pad_y).floor().max(0.0) as u32;
        let x1 = ((region.x + region.width + pad_x).ceil().max(0.0) as u32).min(self.width);
        let y1 = ((region.y + region.height + pad_y).ceil().max(0.0) as u32).min(self.height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let crop_w = x1 - x0;
        let crop_h = y1 - y0;
        let w = self.width as usize;
        let mut out = Vec::with_capacity((crop_w * crop_h) as usize);
        for y in y0..y1 {
            let start = y as usize * w + x0 as usize;
            out.extend_from_slice(&self.data[start..start + crop_w as usize]);
        }
        Some((out, crop_w, crop_h))
    }
}

/// Bilinear resize of a grayscale buffer.
pub fn resize_bilinear(src: &[u8], width: usize, height: usize, out_w: usize, out_h: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_w * out_h];
    if width == 0 || height == 0 || src.len() < width * height {
        return out;
    }
    let scale_x = width as f32 / out_w as f32;
    let scale_y = height as f32 / out_h as f32;

    for y in 0..out_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..out_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            out[y * out_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}
