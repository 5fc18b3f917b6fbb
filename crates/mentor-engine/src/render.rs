use std::fmt::Display;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use image::{DynamicImage, ImageFormat};

use crate::gemini::InlineData;

/// Decoded image plus its PNG re-encoding, ready to preview or download.
/// Lives only as long as the caller keeps it.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    image: DynamicImage,
    png: Vec<u8>,
    file_name: String,
    source_mime_type: Option<String>,
}

impl RenderedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn source_mime_type(&self) -> Option<&str> {
        self.source_mime_type.as_deref()
    }

    pub fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(&self.file_name);
        fs::write(&path, &self.png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

pub fn render_inline_image<Tz>(inline: &InlineData, at: &DateTime<Tz>) -> Result<RenderedImage>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let image = image::load_from_memory(&inline.data).with_context(|| {
        format!(
            "failed to decode inline image ({})",
            inline.mime_type.as_deref().unwrap_or("unknown type")
        )
    })?;
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("failed to encode image as PNG")?;
    Ok(RenderedImage {
        image,
        png,
        file_name: download_file_name(at),
        source_mime_type: inline.mime_type.clone(),
    })
}

/// `img_<YYYYMMDDHHMMSS>.png`
pub fn download_file_name<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("img_{}.png", at.format("%Y%m%d%H%M%S"))
}
