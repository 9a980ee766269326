use image::{imageops, ImageFormat, RgbaImage};
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("no files selected")]
    Empty,
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// File name given to a composited upload.
pub const COMPOSITE_FILE_NAME: &str = "combined.png";

/// Places the images side by side, left to right, top-aligned, and encodes the
/// result as PNG. Width is the sum of widths, height the tallest image; uncovered
/// area stays transparent.
pub fn composite_horizontal(images: &[Vec<u8>]) -> Result<Vec<u8>, DocumentError> {
    if images.is_empty() {
        return Err(DocumentError::Empty);
    }

    let decoded = images
        .iter()
        .map(|bytes| image::load_from_memory(bytes).map(|img| img.to_rgba8()))
        .collect::<Result<Vec<_>, _>>()?;

    let width = decoded.iter().map(|img| img.width()).sum();
    let height = decoded.iter().map(|img| img.height()).max().unwrap_or(0);

    let mut canvas = RgbaImage::new(width, height);
    let mut x_offset: i64 = 0;
    for img in &decoded {
        imageops::replace(&mut canvas, img, x_offset, 0);
        x_offset += i64::from(img.width());
    }

    let mut out = Cursor::new(Vec::new());
    canvas.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_composite_two_images_side_by_side() {
        let red = png(4, 3, [255, 0, 0, 255]);
        let blue = png(2, 5, [0, 0, 255, 255]);

        let combined = composite_horizontal(&[red, blue]).unwrap();
        let img = image::load_from_memory(&combined).unwrap().to_rgba8();

        assert_eq!(img.dimensions(), (6, 5));
        assert_eq!(img.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(img.get_pixel(3, 2), &Rgba([255, 0, 0, 255]));
        assert_eq!(img.get_pixel(4, 0), &Rgba([0, 0, 255, 255]));
        assert_eq!(img.get_pixel(5, 4), &Rgba([0, 0, 255, 255]));
        // Below the shorter left image nothing was drawn.
        assert_eq!(img.get_pixel(0, 4), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_composite_single_image_roundtrips_dimensions() {
        let combined = composite_horizontal(&[png(7, 2, [1, 2, 3, 255])]).unwrap();
        let img = image::load_from_memory(&combined).unwrap();
        assert_eq!((img.width(), img.height()), (7, 2));
    }

    #[test]
    fn test_composite_empty_selection() {
        assert!(matches!(composite_horizontal(&[]), Err(DocumentError::Empty)));
    }

    #[test]
    fn test_composite_rejects_non_image() {
        let err = composite_horizontal(&[b"%PDF-1.7".to_vec()]).unwrap_err();
        assert!(matches!(err, DocumentError::Image(_)));
    }
}
