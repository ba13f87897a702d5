//! PNG export of the render surface and the hand-off to whatever persists it.

use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use base64::Engine;
use image::{ImageFormat, RgbaImage};

use crate::error::SnapshotError;

pub fn export_png(surface: &RgbaImage) -> Result<Vec<u8>, SnapshotError> {
    let mut out = Cursor::new(Vec::new());
    surface.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// `data:image/png;base64,...`, the form upload endpoints accept.
pub fn to_data_url(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

/// External persistence for snapshots.
pub trait SnapshotSink {
    /// Stores an encoded PNG and returns a human-readable location.
    fn save(&self, png: &[u8]) -> Result<String, SnapshotError>;
}

/// Writes each snapshot to a timestamped file in a directory.
#[derive(Clone, Debug)]
pub struct DirectorySink {
    directory: PathBuf,
}

impl DirectorySink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl SnapshotSink for DirectorySink {
    fn save(&self, png: &[u8]) -> Result<String, SnapshotError> {
        fs::create_dir_all(&self.directory)?;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let mut path = self.directory.join(format!("tryon-{millis}.png"));
        let mut n = 1;
        while path.exists() {
            path = self.directory.join(format!("tryon-{millis}-{n}.png"));
            n += 1;
        }
        fs::write(&path, png)?;
        log::info!("snapshot saved to {}", path.display());
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn png_decodes_back_to_surface() {
        let surface = RgbaImage::from_pixel(6, 4, Rgba([1, 2, 3, 255]));
        let png = export_png(&surface).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded, surface);
    }

    #[test]
    fn data_url_has_png_prefix() {
        let url = to_data_url(&[0x89, b'P', b'N', b'G']);
        assert_eq!(url, "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn directory_sink_never_overwrites() {
        let dir = std::env::temp_dir().join(format!("facefit-snapshots-{}", std::process::id()));
        let sink = DirectorySink::new(&dir);
        let a = sink.save(b"one").unwrap();
        let b = sink.save(b"two").unwrap();
        assert_ne!(a, b);
        assert_eq!(fs::read(&a).unwrap(), b"one");
        assert_eq!(fs::read(&b).unwrap(), b"two");
        let _ = fs::remove_dir_all(dir);
    }
}
