//! Owned pixel buffers and the primitive operations over them.
//!
//! Mirrors the pixel & codec toolbox's `Allocate`/`Set`/`Embed` operations.
//! Only the two pixel formats the pipeline supports are modeled: 8-bit
//! grayscale and 24-bit interleaved RGB.

use crate::error::PyramidError;

/// Pixel layout of a decoded tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One byte per pixel, luminance only.
    Gray8,
    /// Three interleaved bytes per pixel (R, G, B).
    Rgb24,
}

impl PixelFormat {
    /// Number of components per pixel.
    #[inline]
    pub const fn components(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// Number of bytes a single pixel occupies in this format.
#[inline]
pub const fn bytes_per_pixel(format: PixelFormat) -> usize {
    format.components()
}

/// Photometric interpretation carried alongside a pixel format, as declared
/// by DICOM or inferred from TIFF tags. Distinct from `PixelFormat` because
/// several interpretations (RGB, YBR_FULL_422, YBR_ICT) can decode into the
/// same `Rgb24` buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotometricInterpretation {
    Rgb,
    Monochrome2,
    YbrFull422,
    YbrIct,
}

impl PhotometricInterpretation {
    pub const fn dicom_code(self) -> &'static str {
        match self {
            PhotometricInterpretation::Rgb => "RGB",
            PhotometricInterpretation::Monochrome2 => "MONOCHROME2",
            PhotometricInterpretation::YbrFull422 => "YBR_FULL_422",
            PhotometricInterpretation::YbrIct => "YBR_ICT",
        }
    }
}

/// Compression applied to a tile's on-disk/on-wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Uncompressed row-major bytes.
    None,
    Jpeg,
    Jpeg2000,
    JpegLs,
    Png,
    Tiff,
    Dicom,
    /// Sentinel meaning the source codec is unsupported here and decoding
    /// must go through an external fallback (e.g. an OpenSlide preview
    /// endpoint or a DICOM instance's associated rendered-preview call).
    ExternalPreview,
}

/// An owned, row-major pixel buffer.
///
/// `pitch` is the number of bytes per row and may exceed
/// `width * bytes_per_pixel(format)`; callers must always index through
/// `pitch`, never assume tight packing.
#[derive(Debug, Clone)]
pub struct Image {
    format: PixelFormat,
    width: u32,
    height: u32,
    pitch: usize,
    data: Vec<u8>,
}

impl Image {
    /// `Allocate(format, w, h) -> Image`. The buffer is zero-initialized and
    /// tightly packed (`pitch == width * bytes_per_pixel`), which is a valid
    /// choice for "an unspecified but positive pitch".
    pub fn allocate(format: PixelFormat, width: u32, height: u32) -> Self {
        let pitch = width as usize * bytes_per_pixel(format);
        let data = vec![0u8; pitch * height as usize];
        Image {
            format,
            width,
            height,
            pitch,
            data,
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pitch(&self) -> usize {
        self.pitch
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Byte slice for row `y` (full pitch-width, including any padding).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.pitch;
        &self.data[start..start + self.pitch]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.pitch;
        &mut self.data[start..start + self.pitch]
    }

    /// `Set(image, r, g, b)`: fill with a solid color.
    ///
    /// For grayscale buffers, the ITU-R BT.709 luma formula
    /// `0.2126*R + 0.7152*G + 0.0722*B` determines the single channel value.
    pub fn set(&mut self, r: u8, g: u8, b: u8) {
        let bpp = bytes_per_pixel(self.format);
        match self.format {
            PixelFormat::Gray8 => {
                let luma = 0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32;
                let value = luma.round().clamp(0.0, 255.0) as u8;
                for y in 0..self.height {
                    let row = self.row_mut(y);
                    for x in 0..self.width as usize {
                        row[x] = value;
                    }
                }
            }
            PixelFormat::Rgb24 => {
                for y in 0..self.height {
                    let row = self.row_mut(y);
                    for x in 0..self.width as usize {
                        let off = x * bpp;
                        row[off] = r;
                        row[off + 1] = g;
                        row[off + 2] = b;
                    }
                }
            }
        }
    }

    /// `Embed(target, source, x, y)`: copy `source` into `self` at `(x, y)`,
    /// clipping at the right and bottom edges. No-op if `(x, y)` is already
    /// outside `self`.
    pub fn embed(&mut self, source: &Image, x: u32, y: u32) {
        if x >= self.width || y >= self.height {
            return;
        }
        if source.format != self.format {
            return;
        }

        let bpp = bytes_per_pixel(self.format);
        let copy_width = source.width.min(self.width - x) as usize;
        let copy_height = source.height.min(self.height - y);
        let copy_bytes = copy_width * bpp;

        for row in 0..copy_height {
            let src_row = source.row(row);
            let dst_y = y + row;
            let dst_row = self.row_mut(dst_y);
            let dst_start = x as usize * bpp;
            dst_row[dst_start..dst_start + copy_bytes].copy_from_slice(&src_row[..copy_bytes]);
        }
    }

    /// Like [`Image::embed`], but `(x, y)` may be negative (the source
    /// partially lies above/left of `self`) and are given in `self`'s pixel
    /// space. Used to composite a cropped region of pixels spanning several
    /// source tiles into one destination buffer. No-op if there is no
    /// overlap at all.
    pub fn embed_cropped(&mut self, source: &Image, x: i64, y: i64) {
        if source.format != self.format {
            return;
        }

        let bpp = bytes_per_pixel(self.format);
        let src_x0 = (-x).max(0) as u32;
        let src_y0 = (-y).max(0) as u32;
        if src_x0 >= source.width || src_y0 >= source.height {
            return;
        }
        let dst_x0 = x.max(0) as u32;
        let dst_y0 = y.max(0) as u32;
        if dst_x0 >= self.width || dst_y0 >= self.height {
            return;
        }

        let copy_width = (source.width - src_x0).min(self.width - dst_x0) as usize;
        let copy_height = (source.height - src_y0).min(self.height - dst_y0);
        let copy_bytes = copy_width * bpp;
        let src_x_off = src_x0 as usize * bpp;
        let dst_x_off = dst_x0 as usize * bpp;

        for row in 0..copy_height {
            let src_row = source.row(src_y0 + row);
            let dst_row = self.row_mut(dst_y0 + row);
            dst_row[dst_x_off..dst_x_off + copy_bytes]
                .copy_from_slice(&src_row[src_x_off..src_x_off + copy_bytes]);
        }
    }

    /// Nearest-neighbor resize to an arbitrary target size. Used by the IIIF
    /// tile endpoint's `size` parameter, which can ask for dimensions that
    /// don't correspond to any pyramid level.
    pub fn resize_nearest(&self, new_width: u32, new_height: u32) -> Image {
        let mut out = Image::allocate(self.format, new_width, new_height);
        if new_width == 0 || new_height == 0 || self.width == 0 || self.height == 0 {
            return out;
        }
        let bpp = bytes_per_pixel(self.format);
        for dst_y in 0..new_height {
            let src_y = (dst_y as u64 * self.height as u64 / new_height as u64) as u32;
            let src_row = self.row(src_y.min(self.height - 1));
            let dst_row = out.row_mut(dst_y);
            for dst_x in 0..new_width as usize {
                let src_x = (dst_x as u64 * self.width as u64 / new_width as u64) as usize;
                let src_x = src_x.min(self.width as usize - 1);
                let s = src_x * bpp;
                let d = dst_x * bpp;
                dst_row[d..d + bpp].copy_from_slice(&src_row[s..s + bpp]);
            }
        }
        out
    }

    /// Decode raw row-major bytes into an `Image`, validating their length
    /// matches `bytesPerPixel(format) * w * h` exactly.
    pub fn from_raw(
        bytes: &[u8],
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Self, PyramidError> {
        let expected = bytes_per_pixel(format) * width as usize * height as usize;
        if bytes.len() != expected {
            return Err(PyramidError::SizeMismatch(format!(
                "raw tile has {} bytes, expected {} for {}x{} {:?}",
                bytes.len(),
                expected,
                width,
                height,
                format
            )));
        }
        let pitch = width as usize * bytes_per_pixel(format);
        Ok(Image {
            format,
            width,
            height,
            pitch,
            data: bytes.to_vec(),
        })
    }

    /// Downsample by averaging each non-overlapping 2x2 block into one
    /// pixel. Used by the reconstruction command to halve a 2x-mosaic.
    /// `width`/`height` must be even.
    pub fn downsample_2x2_average(&self) -> Image {
        let out_w = self.width / 2;
        let out_h = self.height / 2;
        let mut out = Image::allocate(self.format, out_w, out_h);
        let bpp = bytes_per_pixel(self.format);

        for oy in 0..out_h {
            for ox in 0..out_w {
                for c in 0..bpp {
                    let mut sum: u32 = 0;
                    for dy in 0..2u32 {
                        for dx in 0..2u32 {
                            let sx = ox * 2 + dx;
                            let sy = oy * 2 + dy;
                            let row = self.row(sy);
                            sum += row[sx as usize * bpp + c] as u32;
                        }
                    }
                    let avg = ((sum + 2) / 4) as u8;
                    let orow = out.row_mut(oy);
                    orow[ox as usize * bpp + c] = avg;
                }
            }
        }
        out
    }

    /// Applies a 5x5 Gaussian blur, used by the reconstruction command
    /// (§4.6) to smooth a mosaic before halving it into the next coarser
    /// level. Delegates to `imageproc`'s separable Gaussian filter rather
    /// than hand-rolling convolution, converting through the `image` crate's
    /// buffer types at the boundary since `imageproc` operates on those, not
    /// on this crate's own `Image`.
    ///
    /// `imageproc::filter::gaussian_blur_f32` takes a standard deviation,
    /// not a kernel radius; sigma = 1.0 gives a kernel whose effective
    /// support closely matches a discrete 5x5 Gaussian (radius 2).
    pub fn gaussian_blur_5x5(&self) -> Image {
        const SIGMA: f32 = 1.0;
        match self.format {
            PixelFormat::Gray8 => {
                let buf: image::GrayImage =
                    image::ImageBuffer::from_raw(self.width, self.height, self.data.clone())
                        .expect("tightly packed Gray8 buffer");
                let blurred = imageproc::filter::gaussian_blur_f32(&buf, SIGMA);
                Image {
                    format: self.format,
                    width: self.width,
                    height: self.height,
                    pitch: self.width as usize,
                    data: blurred.into_raw(),
                }
            }
            PixelFormat::Rgb24 => {
                let buf: image::RgbImage =
                    image::ImageBuffer::from_raw(self.width, self.height, self.data.clone())
                        .expect("tightly packed Rgb24 buffer");
                let blurred = imageproc::filter::gaussian_blur_f32(&buf, SIGMA);
                Image {
                    format: self.format,
                    width: self.width,
                    height: self.height,
                    pitch: self.width as usize * 3,
                    data: blurred.into_raw(),
                }
            }
        }
    }
}
