use std::io::Cursor;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// EXIF orientation (tag 0x0112), values 1 to 8.
//see https://magnushoff.com/articles/jpeg-orientation/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Normal,
    MirrorHorizontal,
    Rotate180,
    MirrorVertical,
    MirrorHorizontalRotate270,
    Rotate90CW,
    MirrorHorizontalRotate90CW,
    Rotate270CW,
}

pub const ALL: [Orientation; 8] = [
    Orientation::Normal,
    Orientation::MirrorHorizontal,
    Orientation::Rotate180,
    Orientation::MirrorVertical,
    Orientation::MirrorHorizontalRotate270,
    Orientation::Rotate90CW,
    Orientation::MirrorHorizontalRotate90CW,
    Orientation::Rotate270CW,
];

impl Orientation {
    /// Unknown values read as `Normal`, like a viewer that ignores the tag.
    pub fn from_exif(value: u32) -> Orientation {
        match value {
            2 => Orientation::MirrorHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::MirrorVertical,
            5 => Orientation::MirrorHorizontalRotate270,
            6 => Orientation::Rotate90CW,
            7 => Orientation::MirrorHorizontalRotate90CW,
            8 => Orientation::Rotate270CW,
            _ => Orientation::Normal,
        }
    }

    pub fn to_exif(self) -> u32 {
        match self {
            Orientation::Normal => 1,
            Orientation::MirrorHorizontal => 2,
            Orientation::Rotate180 => 3,
            Orientation::MirrorVertical => 4,
            Orientation::MirrorHorizontalRotate270 => 5,
            Orientation::Rotate90CW => 6,
            Orientation::MirrorHorizontalRotate90CW => 7,
            Orientation::Rotate270CW => 8,
        }
    }

    /// Where row 0 and column 0 of the stored image end up, as the EXIF
    /// standard names the values.
    pub fn label(self) -> &'static str {
        match self {
            Orientation::Normal => "top, left",
            Orientation::MirrorHorizontal => "top, right",
            Orientation::Rotate180 => "bottom, right",
            Orientation::MirrorVertical => "bottom, left",
            Orientation::MirrorHorizontalRotate270 => "left, top",
            Orientation::Rotate90CW => "right, top",
            Orientation::MirrorHorizontalRotate90CW => "right, bottom",
            Orientation::Rotate270CW => "left, bottom",
        }
    }

    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Orientation::MirrorHorizontalRotate270
                | Orientation::Rotate90CW
                | Orientation::MirrorHorizontalRotate90CW
                | Orientation::Rotate270CW
        )
    }

    /// Turns the stored pixels into the upright image.
    pub fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Orientation::Normal => img,
            Orientation::MirrorHorizontal => img.fliph(),
            Orientation::Rotate180 => img.rotate180(),
            Orientation::MirrorVertical => img.flipv(),
            Orientation::MirrorHorizontalRotate270 => img.fliph().rotate270(),
            Orientation::Rotate90CW => img.rotate90(),
            Orientation::MirrorHorizontalRotate90CW => img.fliph().rotate90(),
            Orientation::Rotate270CW => img.rotate270(),
        }
    }

    /// Undoes [`Orientation::apply`], giving back the stored pixels.
    pub fn invert(self, img: DynamicImage) -> DynamicImage {
        match self {
            Orientation::Rotate90CW => img.rotate270(),
            Orientation::Rotate270CW => img.rotate90(),
            //the rest are their own inverse
            _ => self.apply(img),
        }
    }

    /// Takes pixels shown with this orientation to `to`.
    pub fn reorient(self, img: DynamicImage, to: Orientation) -> DynamicImage {
        if self == to {
            return img;
        }

        to.apply(self.invert(img))
    }
}

/// Reads the orientation tag from an encoded image, `None` if the file has
/// no EXIF block or no orientation in it.
pub fn read_from(buffer: &[u8]) -> Option<Orientation> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(buffer))
        .ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let value = field.value.get_uint(0)?;

    Some(Orientation::from_exif(value))
}
