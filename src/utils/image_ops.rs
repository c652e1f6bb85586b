use anyhow::{Context, Result};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::PathBuf;

/// Decode a captured bitmap off the async runtime.
///
/// Any format the `image` crate can sniff is accepted; the result is
/// always converted to RGBA8 since every pipeline step works on that.
pub async fn decode_rgba_async(bytes: Vec<u8>) -> Result<RgbaImage> {
    tokio::task::spawn_blocking(move || {
        let img = image::load_from_memory(&bytes).context("Failed to decode image")?;
        Ok(img.to_rgba8())
    })
    .await
    .context("Failed to spawn blocking task for image decoding")?
}

/// Read and decode an image file
pub async fn load_rgba_async(path: impl Into<PathBuf>) -> Result<RgbaImage> {
    let path = path.into();
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    decode_rgba_async(bytes).await
}

/// Encode an RGBA bitmap to PNG bytes using spawn_blocking
pub async fn encode_png_async(img: RgbaImage) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || encode_png(&img))
        .await
        .context("Failed to spawn blocking task for PNG encoding")?
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .context("Failed to encode image as PNG")?;
    Ok(png_bytes)
}

/// Encode and write a rendered overlay to disk
pub async fn save_png_async(img: RgbaImage, path: impl Into<PathBuf>) -> Result<()> {
    let path = path.into();
    let bytes = encode_png_async(img).await?;
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[tokio::test]
    async fn test_encode_then_decode_keeps_pixels() {
        let img = RgbaImage::from_pixel(4, 3, Rgba([10, 200, 30, 255]));

        let png = encode_png_async(img).await.unwrap();
        assert!(!png.is_empty());

        let decoded = decode_rgba_async(png).await.unwrap();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(2, 1), &Rgba([10, 200, 30, 255]));
    }

    #[tokio::test]
    async fn test_decode_rejects_garbage() {
        assert!(decode_rgba_async(b"not an image".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.png");

        save_png_async(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])), &path)
            .await
            .unwrap();
        let loaded = load_rgba_async(&path).await.unwrap();
        assert_eq!(loaded.dimensions(), (2, 2));
    }
}
