use crate::config::UploadConfig;
use crate::error::DecodeError;
use image::{DynamicImage, GrayImage, ImageError, ImageFormat, ImageReader, Limits};
use std::io::Cursor;

/// Extracts the text payload of a QR code from raw upload bytes.
#[derive(Debug, Clone)]
pub struct QrDecoder {
    max_dimension: u32,
}

impl QrDecoder {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            max_dimension: config.max_dimension,
        }
    }

    /// Decode `bytes` declared as `mime_type` and return the first QR payload found.
    pub fn decode(&self, bytes: &[u8], mime_type: &str) -> Result<String, DecodeError> {
        let gray = self.load_grayscale(bytes, mime_type)?;
        log::debug!(
            "Scanning {}x{} image for QR codes",
            gray.width(),
            gray.height()
        );
        self.scan(&gray)
    }

    fn load_grayscale(&self, bytes: &[u8], mime_type: &str) -> Result<GrayImage, DecodeError> {
        let mime = mime_type.trim().to_lowercase();
        if !mime.starts_with("image/") {
            return Err(DecodeError::Unsupported(mime_type.to_string()));
        }

        // Declared type first, then sniff the bytes for browsers that lie
        let format = ImageFormat::from_mime_type(&mime)
            .or_else(|| image::guess_format(bytes).ok())
            .ok_or_else(|| DecodeError::Unsupported(mime.clone()))?;

        let decoded = match self.load(bytes, format) {
            Ok(img) => img,
            Err(ImageError::Limits(e)) => return Err(DecodeError::TooLarge(e.to_string())),
            Err(first) => match image::guess_format(bytes) {
                Ok(sniffed) if sniffed != format => {
                    log::debug!("Declared {format:?} failed ({first}), retrying as {sniffed:?}");
                    self.load(bytes, sniffed).map_err(|e| match e {
                        ImageError::Limits(e) => DecodeError::TooLarge(e.to_string()),
                        e => DecodeError::Corrupt(e.to_string()),
                    })?
                }
                _ => return Err(DecodeError::Corrupt(first.to_string())),
            },
        };

        Ok(decoded.to_luma8())
    }

    /// Decode with the dimension cap applied before any pixel buffer is allocated.
    fn load(&self, bytes: &[u8], format: ImageFormat) -> Result<DynamicImage, ImageError> {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        // Widest pixel type is 16-bit RGBA
        limits.max_alloc = Some(u64::from(self.max_dimension).pow(2) * 8);

        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        reader.limits(limits);
        reader.decode()
    }

    fn scan(&self, gray: &GrayImage) -> Result<String, DecodeError> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            gray.width() as usize,
            gray.height() as usize,
            |x, y| gray.get_pixel(x as u32, y as u32).0[0],
        );

        let grids = prepared.detect_grids();
        log::debug!("Found {} candidate QR grids", grids.len());

        for grid in grids {
            match grid.decode() {
                Ok((_, content)) if !content.trim().is_empty() => return Ok(content),
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("QR grid failed to decode: {e:?}");
                    continue;
                }
            }
        }

        Err(DecodeError::NotFound)
    }
}
