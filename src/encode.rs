//! Overlay transport encoding: compressed image bytes wrapped in standard base64.

use std::{fmt, io::Cursor, str::FromStr};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
    DynamicImage, ExtendedColorType, ImageEncoder, RgbImage,
};
use serde::{Deserialize, Serialize};

use crate::errors::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayFormat {
    #[default]
    Jpeg,
    Png,
}

impl fmt::Display for OverlayFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        })
    }
}

impl FromStr for OverlayFormat {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            other => Err(format!("unknown overlay format '{other}'; expected 'jpeg' or 'png'")),
        }
    }
}

fn encode_bytes(image: &RgbImage, format: OverlayFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let (width, height) = image.dimensions();
    let encoded = match format {
        OverlayFormat::Jpeg => JpegEncoder::new_with_quality(&mut buffer, jpeg_quality.clamp(1, 100))
            .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8),
        OverlayFormat::Png => PngEncoder::new(&mut buffer).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgb8,
        ),
    };
    encoded.map_err(|e| BridgeError::ImageProcessing {
        path: "overlay".to_string(),
        operation: format!("{format} encoding"),
        source: Box::new(e),
    })?;
    Ok(buffer)
}

/// Encode an overlay for the JSON response.
pub fn encode_overlay(image: &RgbImage, format: OverlayFormat, jpeg_quality: u8) -> Result<String> {
    let bytes = encode_bytes(image, format, jpeg_quality)?;
    Ok(BASE64.encode(bytes))
}

/// Inverse of [`encode_overlay`]; the container format is sniffed from the bytes.
pub fn decode_overlay(encoded: &str) -> Result<DynamicImage> {
    let bytes = BASE64.decode(encoded.trim())?;
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()
        .map_err(|e| BridgeError::ImageProcessing {
            path: "overlay".to_string(),
            operation: "decoding".to_string(),
            source: Box::new(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};

    fn sample() -> RgbImage {
        RgbImage::from_fn(37, 21, |x, y| Rgb([(x * 6) as u8, (y * 12) as u8, 90]))
    }

    #[test]
    fn test_round_trip_keeps_dimensions() -> Result<()> {
        for format in [OverlayFormat::Jpeg, OverlayFormat::Png] {
            let encoded = encode_overlay(&sample(), format, 90)?;
            let decoded = decode_overlay(&encoded)?;
            assert_eq!(decoded.dimensions(), (37, 21));
        }
        Ok(())
    }

    #[test]
    fn test_png_is_lossless() -> Result<()> {
        let image = sample();
        let decoded = decode_overlay(&encode_overlay(&image, OverlayFormat::Png, 90)?)?;
        assert_eq!(decoded.to_rgb8(), image);
        Ok(())
    }

    #[test]
    fn test_jpeg_magic_bytes() -> Result<()> {
        let encoded = encode_overlay(&sample(), OverlayFormat::Jpeg, 75)?;
        let bytes = BASE64.decode(encoded)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(decode_overlay("not base64 at all!").is_err());
        assert!(decode_overlay(&BASE64.encode(b"plain text")).is_err());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JPG".parse::<OverlayFormat>(), Ok(OverlayFormat::Jpeg));
        assert_eq!("png".parse::<OverlayFormat>(), Ok(OverlayFormat::Png));
        assert!("gif".parse::<OverlayFormat>().is_err());
    }
}
