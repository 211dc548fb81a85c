use image::{imageops, DynamicImage, ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest side a resize may produce.
pub const MAX_RESIZE_DIMENSION: u32 = 1 << 14;

/// Interpolation used by [`Manipulator::Resize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
    Cubic,
    Lanczos,
}

impl From<Interpolation> for imageops::FilterType {
    fn from(value: Interpolation) -> Self {
        match value {
            Interpolation::Nearest => imageops::FilterType::Nearest,
            Interpolation::Linear => imageops::FilterType::Triangle,
            Interpolation::Cubic => imageops::FilterType::CatmullRom,
            Interpolation::Lanczos => imageops::FilterType::Lanczos3,
        }
    }
}

///Stateless pixel transforms the adjustment panels can apply to the current image.
///Parameterless variants have fixed behaviour, the rest carry their settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Manipulator {
    Grayscale,
    AutoAdjust,
    Normalize,
    Invert,
    FlipH,
    FlipV,
    RotateCw,
    RotateCcw,
    Rotate180,
    ///Fills transparent areas with a solid color
    Color { rgb: [u8; 3] },
    Blur { sigma: f32 },
    UnsharpMask { sigma: f32, amount: f32 },
    ///Free rotation in degrees, clockwise. The canvas grows to fit.
    Rotate { angle: f32 },
    Resize {
        scale: f32,
        interpolation: Interpolation,
    },
    Threshold { threshold: u8, color: bool },
    ///hue in degrees, saturation and value in percent (-100..=100)
    Hue {
        hue: i32,
        saturation: i32,
        value: i32,
    },
    Exposure { exposure: f32, offset: f32, gamma: f32 },
}

impl Manipulator {
    /// Every manipulator with the settings a freshly opened panel starts with.
    pub fn defaults() -> Vec<Manipulator> {
        vec![
            Manipulator::Grayscale,
            Manipulator::AutoAdjust,
            Manipulator::Normalize,
            Manipulator::Invert,
            Manipulator::FlipH,
            Manipulator::FlipV,
            Manipulator::RotateCw,
            Manipulator::RotateCcw,
            Manipulator::Rotate180,
            Manipulator::Color { rgb: [255, 255, 255] },
            Manipulator::Blur { sigma: 5.0 },
            Manipulator::UnsharpMask {
                sigma: 3.0,
                amount: 0.5,
            },
            Manipulator::Rotate { angle: 0.0 },
            Manipulator::Resize {
                scale: 1.0,
                interpolation: Interpolation::Linear,
            },
            Manipulator::Threshold {
                threshold: 128,
                color: false,
            },
            Manipulator::Hue {
                hue: 0,
                saturation: 0,
                value: 0,
            },
            Manipulator::Exposure {
                exposure: 0.0,
                offset: 0.0,
                gamma: 1.0,
            },
        ]
    }

    /// The same variant with its default settings.
    pub fn with_defaults(self) -> Manipulator {
        Self::defaults()
            .into_iter()
            .find(|m| m.name() == self.name())
            .unwrap_or(self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Manipulator::Grayscale => "Grayscale",
            Manipulator::AutoAdjust => "Auto Adjust",
            Manipulator::Normalize => "Normalize",
            Manipulator::Invert => "Invert",
            Manipulator::FlipH => "Flip Horizontal",
            Manipulator::FlipV => "Flip Vertical",
            Manipulator::RotateCw => "Rotate 90° Clockwise",
            Manipulator::RotateCcw => "Rotate 90° Counter Clockwise",
            Manipulator::Rotate180 => "Rotate 180°",
            Manipulator::Color { .. } => "Background Color",
            Manipulator::Blur { .. } => "Blur",
            Manipulator::UnsharpMask { .. } => "Sharpen",
            Manipulator::Rotate { .. } => "Rotate",
            Manipulator::Resize { .. } => "Resize",
            Manipulator::Threshold { .. } => "Threshold",
            Manipulator::Hue { .. } => "Hue/Saturation",
            Manipulator::Exposure { .. } => "Exposure",
        }
    }

    pub fn error_message(&self) -> String {
        match self {
            Manipulator::Grayscale => "Sorry, I could not create a grayscale image".into(),
            Manipulator::AutoAdjust => "Sorry, I could not auto adjust the image".into(),
            Manipulator::Normalize => "The image is normalized already".into(),
            Manipulator::Invert | Manipulator::FlipH | Manipulator::FlipV => {
                format!("Sorry, I could not apply {}", self.name().to_lowercase())
            }
            Manipulator::RotateCw | Manipulator::RotateCcw | Manipulator::Rotate180 => {
                "Sorry, I could not rotate the image".into()
            }
            Manipulator::Color { .. } => "Sorry, I could not apply the background color".into(),
            Manipulator::Blur { .. } => "Sorry, I could not blur the image".into(),
            Manipulator::UnsharpMask { .. } => "Sorry, I could not sharpen the image".into(),
            Manipulator::Rotate { .. } => "Sorry, I could not rotate the image".into(),
            Manipulator::Resize { .. } => "Sorry, I could not resize the image".into(),
            Manipulator::Threshold { .. } => "Sorry, I could not threshold the image".into(),
            Manipulator::Hue { .. } => "Sorry, I could not change the hue".into(),
            Manipulator::Exposure { .. } => "Sorry, I could not change the exposure".into(),
        }
    }

    /// True when applying would leave the pixels untouched.
    pub fn is_identity(&self) -> bool {
        match *self {
            Manipulator::Rotate { angle } => angle % 360.0 == 0.0,
            Manipulator::Resize { scale, .. } => scale == 1.0,
            Manipulator::Hue {
                hue,
                saturation,
                value,
            } => hue % 360 == 0 && saturation == 0 && value == 0,
            Manipulator::Exposure {
                exposure,
                offset,
                gamma,
            } => exposure == 0.0 && offset == 0.0 && gamma == 1.0,
            _ => false,
        }
    }

    pub fn apply(&self, img: &DynamicImage) -> Result<DynamicImage> {
        if img.width() == 0 || img.height() == 0 {
            return Err(self.error());
        }

        if self.is_identity() {
            return Ok(img.clone());
        }

        let out = match *self {
            Manipulator::Grayscale => DynamicImage::ImageRgba8(img.grayscale().to_rgba8()),
            Manipulator::AutoAdjust => auto_adjust(img),
            Manipulator::Normalize => normalize(img).ok_or_else(|| self.error())?,
            Manipulator::Invert => {
                let mut out = img.clone();
                out.invert();
                out
            }
            Manipulator::FlipH => img.fliph(),
            Manipulator::FlipV => img.flipv(),
            Manipulator::RotateCw => img.rotate90(),
            Manipulator::RotateCcw => img.rotate270(),
            Manipulator::Rotate180 => img.rotate180(),
            Manipulator::Color { rgb } => background_color(img, rgb),
            Manipulator::Blur { sigma } => {
                if !(sigma > 0.0 && sigma.is_finite()) {
                    return Err(self.error());
                }
                img.blur(sigma)
            }
            Manipulator::UnsharpMask { sigma, amount } => {
                if !(sigma > 0.0 && sigma.is_finite()) || !amount.is_finite() {
                    return Err(self.error());
                }
                unsharp_mask(img, sigma, amount)
            }
            Manipulator::Rotate { angle } => {
                if !angle.is_finite() {
                    return Err(self.error());
                }
                rotate(img, angle)
            }
            Manipulator::Resize {
                scale,
                interpolation,
            } => {
                let (width, height) = resized_dimensions(img.width(), img.height(), scale)
                    .ok_or_else(|| self.error())?;
                img.resize_exact(width, height, interpolation.into())
            }
            Manipulator::Threshold { threshold, color } => apply_threshold(img, threshold, color),
            Manipulator::Hue {
                hue,
                saturation,
                value,
            } => hue_saturation(img, hue, saturation, value),
            Manipulator::Exposure {
                exposure,
                offset,
                gamma,
            } => {
                let finite = exposure.is_finite() && offset.is_finite() && gamma.is_finite();
                if !finite || !(gamma > 0.0) {
                    return Err(self.error());
                }
                apply_exposure(img, exposure, offset, gamma)
            }
        };

        Ok(out)
    }

    fn error(&self) -> Error {
        Error::Manipulation(self.error_message())
    }
}

/// Applies manipulators in order, stopping at the first failure.
pub fn apply_all(img: &DynamicImage, manipulators: &[Manipulator]) -> Result<DynamicImage> {
    let mut out = img.clone();
    for m in manipulators {
        out = m.apply(&out)?;
    }
    Ok(out)
}

fn resized_dimensions(width: u32, height: u32, scale: f32) -> Option<(u32, u32)> {
    if !(scale > 0.0 && scale.is_finite()) {
        return None;
    }

    let width = (width as f64 * scale as f64).round();
    let height = (height as f64 * scale as f64).round();
    let limit = MAX_RESIZE_DIMENSION as f64;
    if width < 1.0 || height < 1.0 || width > limit || height > limit {
        return None;
    }

    Some((width as u32, height as u32))
}

fn map_rgba(img: &DynamicImage, f: impl Fn(Rgba<u8>) -> Rgba<u8>) -> DynamicImage {
    let mut rgba = img.to_rgba8();
    for p in rgba.pixels_mut() {
        *p = f(*p);
    }
    DynamicImage::ImageRgba8(rgba)
}

fn channel_bounds(img: &RgbaImage) -> ([u8; 3], [u8; 3]) {
    let mut min = [u8::MAX; 3];
    let mut max = [u8::MIN; 3];
    for p in img.pixels() {
        for c in 0..3 {
            min[c] = min[c].min(p[c]);
            max[c] = max[c].max(p[c]);
        }
    }
    (min, max)
}

fn stretch(v: u8, min: u8, max: u8) -> u8 {
    if max <= min {
        return v;
    }
    (((v.saturating_sub(min)) as f32 * 255.0 / (max - min) as f32).round()).clamp(0.0, 255.0) as u8
}

//each channel is stretched on its own, which also removes color casts
fn auto_adjust(img: &DynamicImage) -> DynamicImage {
    let (min, max) = channel_bounds(&img.to_rgba8());
    map_rgba(img, |mut p| {
        for c in 0..3 {
            p[c] = stretch(p[c], min[c], max[c]);
        }
        p
    })
}

//one range for all channels so hues are kept
fn normalize(img: &DynamicImage) -> Option<DynamicImage> {
    let (min, max) = channel_bounds(&img.to_rgba8());
    let lo = *min.iter().min()?;
    let hi = *max.iter().max()?;

    if lo == 0 && hi == 255 {
        return None;
    }

    Some(map_rgba(img, |mut p| {
        for c in 0..3 {
            p[c] = stretch(p[c], lo, hi);
        }
        p
    }))
}

fn background_color(img: &DynamicImage, rgb: [u8; 3]) -> DynamicImage {
    map_rgba(img, |p| {
        let a = p[3] as f32 / 255.0;
        let mut out = Rgba([0, 0, 0, 255]);
        for c in 0..3 {
            out[c] = (p[c] as f32 * a + rgb[c] as f32 * (1.0 - a)).round() as u8;
        }
        out
    })
}

fn unsharp_mask(img: &DynamicImage, sigma: f32, amount: f32) -> DynamicImage {
    let original = img.to_rgba8();
    let blurred = imageops::blur(&original, sigma);

    let out = ImageBuffer::from_fn(original.width(), original.height(), |x, y| {
        let o = original.get_pixel(x, y);
        let b = blurred.get_pixel(x, y);
        let mut p = *o;
        for c in 0..3 {
            let v = o[c] as f32 + amount * (o[c] as f32 - b[c] as f32);
            p[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        p
    });

    DynamicImage::ImageRgba8(out)
}

fn rotate(img: &DynamicImage, angle: f32) -> DynamicImage {
    let normalized = angle.rem_euclid(360.0);
    if normalized == 90.0 {
        return img.rotate90();
    } else if normalized == 180.0 {
        return img.rotate180();
    } else if normalized == 270.0 {
        return img.rotate270();
    }

    let src = img.to_rgba8();
    let (w, h) = src.dimensions();
    let rad = normalized.to_radians();
    let (sin, cos) = rad.sin_cos();

    let out_w = (w as f32 * cos.abs() + h as f32 * sin.abs()).ceil() as u32;
    let out_h = (w as f32 * sin.abs() + h as f32 * cos.abs()).ceil() as u32;

    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let (ocx, ocy) = (out_w as f32 / 2.0, out_h as f32 / 2.0);

    let out = ImageBuffer::from_fn(out_w.max(1), out_h.max(1), |x, y| {
        //inverse mapping: rotate the destination pixel center back into the source
        let dx = x as f32 + 0.5 - ocx;
        let dy = y as f32 + 0.5 - ocy;
        let sx = dx * cos + dy * sin + cx - 0.5;
        let sy = -dx * sin + dy * cos + cy - 0.5;
        bilinear(&src, sx, sy)
    });

    DynamicImage::ImageRgba8(out)
}

fn bilinear(src: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let (w, h) = src.dimensions();
    if x < -0.5 || y < -0.5 || x > w as f32 - 0.5 || y > h as f32 - 0.5 {
        return Rgba([0, 0, 0, 0]);
    }

    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let p00 = src.get_pixel(x0, y0);
    let p10 = src.get_pixel(x1, y0);
    let p01 = src.get_pixel(x0, y1);
    let p11 = src.get_pixel(x1, y1);

    let mut out = Rgba([0, 0, 0, 0]);
    for c in 0..4 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round() as u8;
    }
    out
}

fn apply_threshold(img: &DynamicImage, threshold: u8, color: bool) -> DynamicImage {
    map_rgba(img, |mut p| {
        if color {
            for c in 0..3 {
                p[c] = if p[c] >= threshold { 255 } else { 0 };
            }
        } else {
            let luma = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
            let v = if luma.round() as u8 >= threshold { 255 } else { 0 };
            p[0] = v;
            p[1] = v;
            p[2] = v;
        }
        p
    })
}

fn hue_saturation(img: &DynamicImage, hue: i32, saturation: i32, value: i32) -> DynamicImage {
    let sat_factor = 1.0 + saturation.clamp(-100, 100) as f32 / 100.0;
    let val_factor = 1.0 + value.clamp(-100, 100) as f32 / 100.0;

    map_rgba(img, |mut p| {
        let (h, s, v) = rgb_to_hsv(p[0], p[1], p[2]);
        let h = (h + hue as f32).rem_euclid(360.0);
        let s = (s * sat_factor).clamp(0.0, 1.0);
        let v = (v * val_factor).clamp(0.0, 1.0);
        let (r, g, b) = hsv_to_rgb(h, s, v);
        p[0] = r;
        p[1] = g;
        p[2] = b;
        p
    })
}

fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let to_u8 = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (to_u8(r), to_u8(g), to_u8(b))
}

fn apply_exposure(img: &DynamicImage, exposure: f32, offset: f32, gamma: f32) -> DynamicImage {
    let gain = 2f32.powf(exposure);
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        let linear = (i as f32 / 255.0 * gain + offset).clamp(0.0, 1.0);
        *v = (linear.powf(1.0 / gamma) * 255.0).round() as u8;
    }

    map_rgba(img, |mut p| {
        for c in 0..3 {
            p[c] = lut[p[c] as usize];
        }
        p
    })
}
