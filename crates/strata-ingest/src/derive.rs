//! Artifacts generated from a just-written blob and stored beside it.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};

use crate::error::DeriveError;

/// Suffix inserted before the extension of a thumbnail: `007.jpg` becomes
/// `007-s.jpg`.
pub const THUMBNAIL_SUFFIX: &str = "-s";

/// Longest side of a thumbnail, in pixels.
pub const THUMBNAIL_MAX_DIMENSION: u32 = 150;

/// Produces a secondary file from a stored blob.
pub trait DerivedArtifact: Send + Sync {
    /// Inserted between the primary file's stem and extension.
    fn suffix(&self) -> &str;

    fn derive(&self, blob: &[u8]) -> Result<Vec<u8>, DeriveError>;

    /// Where the artifact for `primary` is stored.
    fn path_for(&self, primary: &Path) -> PathBuf {
        derived_path(primary, self.suffix())
    }
}

/// `dir/stem.ext` becomes `dir/stem<suffix>.ext`; a name without an
/// extension just gets the suffix appended.
pub fn derived_path(primary: &Path, suffix: &str) -> PathBuf {
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match primary.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    primary.with_file_name(name)
}

/// Scales an image to fit a square bounding box, keeping its aspect ratio
/// and encoding format.
#[derive(Clone, Copy, Debug)]
pub struct ImageThumbnailer {
    max_dimension: u32,
}

impl ImageThumbnailer {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }
}

impl Default for ImageThumbnailer {
    fn default() -> Self {
        Self::new(THUMBNAIL_MAX_DIMENSION)
    }
}

impl DerivedArtifact for ImageThumbnailer {
    fn suffix(&self) -> &str {
        THUMBNAIL_SUFFIX
    }

    fn derive(&self, blob: &[u8]) -> Result<Vec<u8>, DeriveError> {
        let format = image::guess_format(blob)?;
        let original = image::load_from_memory_with_format(blob, format)?;
        let mut scaled = original.thumbnail(self.max_dimension, self.max_dimension);
        if format == ImageFormat::Jpeg {
            // The JPEG encoder rejects alpha channels.
            scaled = DynamicImage::ImageRgb8(scaled.to_rgb8());
        }

        let mut out = Cursor::new(Vec::new());
        scaled.write_to(&mut out, format)?;
        Ok(out.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn derived_paths() {
        assert_eq!(
            derived_path(Path::new("/srv/img/0/0/007.jpg"), "-s"),
            PathBuf::from("/srv/img/0/0/007-s.jpg")
        );
        assert_eq!(
            derived_path(Path::new("/srv/doc/abc"), "-s"),
            PathBuf::from("/srv/doc/abc-s")
        );
    }

    #[test]
    fn thumbnail_fits_bounding_box() {
        let t = ImageThumbnailer::default();
        let bytes = t.derive(&png(600, 300)).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
        let thumb = image::load_from_memory(&bytes).unwrap();
        let (w, h) = thumb.dimensions();
        assert_eq!(w, THUMBNAIL_MAX_DIMENSION);
        assert!(h <= THUMBNAIL_MAX_DIMENSION);
        assert!(h >= 74 && h <= 76);
    }

    #[test]
    fn jpeg_thumbnails_stay_jpeg() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(400, 400));
        let mut jpeg = Cursor::new(Vec::new());
        img.write_to(&mut jpeg, ImageFormat::Jpeg).unwrap();

        let bytes = ImageThumbnailer::new(40).derive(jpeg.get_ref()).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!(image::load_from_memory(&bytes).unwrap().dimensions(), (40, 40));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = ImageThumbnailer::default().derive(b"definitely not an image");
        assert!(matches!(err, Err(DeriveError::Image(_))));
    }
}
