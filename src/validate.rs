//! Input validation by declared media type.
//!
//! Only the declared type is checked; pixel data is never touched here. A
//! malformed file of an accepted type passes validation and fails later, at
//! decode time.

use crate::types::{ImageAsset, MediaType};

/// Accepted media type of `asset`, or `None` if its declared type is outside
/// the accepted set.
pub fn media_type(asset: &ImageAsset) -> Option<MediaType> {
    MediaType::from_mime(asset.media_type())
}

/// Whether `asset` may enter the optimization pipeline.
pub fn validate(asset: &ImageAsset) -> bool {
    media_type(asset).is_some()
}

/// Declared MIME type for a file extension.
///
/// Covers common raster types beyond the accepted set so that e.g. a `.gif`
/// is declared as `image/gif` and rejected by [`validate`], rather than
/// silently skipped.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "jpe" | "jfif" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "avif" => "image/avif",
        "heic" | "heif" => "image/heic",
        _ => return None,
    };
    Some(mime)
}
