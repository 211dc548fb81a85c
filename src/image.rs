use std::{
    fs::{self, File},
    io::{Cursor, Read},
    path::Path,
    sync::Arc,
    time::Instant,
};

use fast_image_resize::{images::Image as FirImage, PixelType, ResizeOptions, Resizer};
use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType, PngEncoder},
    },
    DynamicImage, ImageFormat, RgbaImage,
};

use crate::{
    error::{Error, Result},
    orientation::{self, Orientation},
    utils,
};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    ///Longest side of the decoded image, larger images are downscaled
    pub max_dimension: Option<u32>,
    pub auto_orient: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_dimension: None,
            auto_orient: true,
        }
    }
}

/// A decoded image and what we read from its header.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub pixels: Arc<DynamicImage>,
    pub orientation: Option<Orientation>,
    pub format: Option<ImageFormat>,
}

/// Turns bytes into pixels and back. The navigator only talks to this trait.
pub trait ImageCodec: Send + Sync {
    fn decode(&self, buffer: &[u8], path: &Path) -> Result<DynamicImage>;

    /// `compression` is 0 (largest file, best quality) to 100 (smallest
    /// file), `None` picks the encoder's default.
    fn encode(
        &self,
        img: &DynamicImage,
        format: ImageFormat,
        compression: Option<u8>,
        path: &Path,
    ) -> Result<Vec<u8>>;
}

/// Codec backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageRsCodec;

impl ImageCodec for ImageRsCodec {
    fn decode(&self, buffer: &[u8], path: &Path) -> Result<DynamicImage> {
        let guessed = ImageFormat::from_path(path)
            .ok()
            .or_else(|| image::guess_format(buffer).ok());

        let decoded = match guessed {
            Some(format) => image::load_from_memory_with_format(buffer, format)
                //extensions lie, give the content sniffing a chance
                .or_else(|_| image::load_from_memory(buffer)),
            None => image::load_from_memory(buffer),
        };

        decoded.map_err(|e| Error::Decode {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })
    }

    fn encode(
        &self,
        img: &DynamicImage,
        format: ImageFormat,
        compression: Option<u8>,
        path: &Path,
    ) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let to_error = |e: image::ImageError| Error::Encode {
            path: path.to_path_buf(),
            cause: e.to_string(),
        };

        match format {
            ImageFormat::Jpeg => {
                let quality = compression
                    .map(|c| 100u8.saturating_sub(c).max(1))
                    .unwrap_or(DEFAULT_JPEG_QUALITY);
                //jpeg has no alpha channel
                DynamicImage::ImageRgb8(img.to_rgb8())
                    .write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))
                    .map_err(to_error)?;
            }
            ImageFormat::Png => {
                let compression = match compression {
                    None => CompressionType::Default,
                    Some(c) if c < 34 => CompressionType::Fast,
                    Some(c) if c < 67 => CompressionType::Default,
                    Some(_) => CompressionType::Best,
                };
                img.write_with_encoder(PngEncoder::new_with_quality(
                    &mut buffer,
                    compression,
                    FilterType::Adaptive,
                ))
                .map_err(to_error)?;
            }
            format => {
                img.write_to(&mut Cursor::new(&mut buffer), format)
                    .map_err(to_error)?;
            }
        }

        Ok(buffer)
    }
}

/// Reads, decodes, orients and optionally downscales an image file.
pub fn load(path: &Path, options: DecodeOptions, codec: &dyn ImageCodec) -> Result<LoadedImage> {
    let file_name = utils::file_name(path);

    let mut now = Instant::now();
    let mut f = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })?;

    let mut buffer = Vec::new();
    f.read_to_end(&mut buffer)?;

    tracing::debug!(
        "{} -> Spent {}ms reading into buffer",
        file_name,
        now.elapsed().as_millis()
    );
    now = Instant::now();

    let mut image = codec.decode(&buffer, path)?;

    tracing::debug!("{} -> Spent {}ms decoding", file_name, now.elapsed().as_millis());
    now = Instant::now();

    let orientation = orientation::read_from(&buffer);
    if options.auto_orient {
        if let Some(o) = orientation {
            image = o.apply(image);
        }
    }

    tracing::debug!("{} -> Spent {}ms orienting", file_name, now.elapsed().as_millis());
    now = Instant::now();

    if let Some(max_dimension) = options.max_dimension {
        image = resize(image, max_dimension);
        tracing::debug!("{} -> Spent {}ms resizing", file_name, now.elapsed().as_millis());
    }

    Ok(LoadedImage {
        pixels: Arc::new(image),
        orientation,
        format: ImageFormat::from_path(path).ok(),
    })
}

/// Encodes and writes `img` to `path`. The file is written next to the target
/// first and renamed over it, so a failed save never leaves half a file.
pub fn save(
    img: &DynamicImage,
    path: &Path,
    format: ImageFormat,
    compression: Option<u8>,
    codec: &dyn ImageCodec,
) -> Result<()> {
    let now = Instant::now();
    let bytes = codec.encode(img, format, compression, path)?;

    let tmp_path = path.with_file_name(format!(".{}.part", utils::file_name(path)));
    let write_error = |source: std::io::Error| Error::Write {
        path: path.to_path_buf(),
        source,
    };

    fs::write(&tmp_path, &bytes).map_err(write_error)?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_error(e));
    }

    tracing::debug!(
        "{} -> Spent {}ms saving",
        utils::file_name(path),
        now.elapsed().as_millis()
    );

    Ok(())
}

/// Downscales so the longest side is at most `target_size`. Smaller images
/// and failures come back untouched.
pub fn resize(img: DynamicImage, target_size: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    if target_size == 0 || (width <= target_size && height <= target_size) {
        return img;
    }

    let aspect_ratio = width as f32 / height as f32;
    let (dest_width, dest_height) = if width > height {
        (target_size, (target_size as f32 / aspect_ratio).round() as u32)
    } else {
        ((target_size as f32 * aspect_ratio).round() as u32, target_size)
    };

    if dest_width == 0 || dest_height == 0 {
        return img;
    }

    let src_image =
        match FirImage::from_vec_u8(width, height, img.to_rgba8().into_raw(), PixelType::U8x4) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!("Failure building fast_image_resize image from dynamic image -> {e}");
                return img;
            }
        };

    let mut dest_image = FirImage::new(dest_width, dest_height, src_image.pixel_type());

    let mut resizer = Resizer::new();
    // By default, Resizer multiplies and divides by alpha channel
    // images with U8x2, U8x4, U16x2 and U16x4 pixels.
    if let Err(e) = resizer.resize(&src_image, &mut dest_image, &ResizeOptions::new()) {
        tracing::warn!("Failure resizing image -> {e}");
        return img;
    }

    match RgbaImage::from_raw(dest_width, dest_height, dest_image.buffer().to_vec()) {
        Some(rgba_image) => DynamicImage::from(rgba_image),
        None => {
            tracing::warn!("Failure building rgba image from resized image");
            img
        }
    }
}
