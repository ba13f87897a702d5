//! Fetches and decodes overlay sprites and background photos, caching decoded
//! handles by source so repeated selections never re-fetch.

use std::{
    collections::HashMap,
    fs,
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use base64::Engine;
use crossbeam_channel::{Receiver, bounded};
use image::RgbaImage;
use reqwest::blocking::Client;

use crate::{
    error::AssetError,
    types::{Frame, ProductType},
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Raw byte source for assets. Sources are URLs (`http(s)://`), `data:` URIs or
/// filesystem paths.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, source: &str) -> Result<Vec<u8>, AssetError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFetcher;

impl AssetFetcher for DefaultFetcher {
    fn fetch(&self, source: &str) -> Result<Vec<u8>, AssetError> {
        if source.starts_with("data:") {
            decode_data_uri(source)
        } else if source.starts_with("http://") || source.starts_with("https://") {
            fetch_http(source)
        } else {
            let path = source.strip_prefix("file://").unwrap_or(source);
            fs::read(path).map_err(|err| fetch_error(source, err))
        }
    }
}

fn fetch_error(source: &str, reason: impl ToString) -> AssetError {
    AssetError::Fetch {
        source_url: display_source(source),
        reason: reason.to_string(),
    }
}

/// Data URIs can be megabytes long; keep error messages readable.
fn display_source(source: &str) -> String {
    const MAX: usize = 64;
    if source.len() <= MAX {
        return source.to_string();
    }
    let mut end = MAX;
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &source[..end])
}

fn fetch_http(url: &str) -> Result<Vec<u8>, AssetError> {
    let client = Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|err| fetch_error(url, err))?;
    let response = client
        .get(url)
        .send()
        .and_then(|resp| resp.error_for_status())
        .map_err(|err| fetch_error(url, err))?;
    let bytes = response.bytes().map_err(|err| fetch_error(url, err))?;
    Ok(bytes.to_vec())
}

/// Decodes `data:[<mime>];base64,<payload>`.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, AssetError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| AssetError::InvalidDataUri("missing data: scheme".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| AssetError::InvalidDataUri("missing ',' separator".to_string()))?;
    if !meta.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        return Err(AssetError::InvalidDataUri(
            "only base64 payloads are supported".to_string(),
        ));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|err| AssetError::InvalidDataUri(err.to_string()))
}

fn decode_image(source: &str, bytes: &[u8]) -> Result<RgbaImage, AssetError> {
    let image = image::load_from_memory(bytes).map_err(|err| AssetError::Decode {
        source_url: display_source(source),
        reason: err.to_string(),
    })?;
    let rgba = image.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(AssetError::Decode {
            source_url: display_source(source),
            reason: "image has no pixels".to_string(),
        });
    }
    Ok(rgba)
}

/// A decoded product overlay. Never mutated once created.
#[derive(Clone, Debug)]
pub struct OverlaySprite {
    pub bitmap: Arc<RgbaImage>,
    pub product_type: ProductType,
}

impl OverlaySprite {
    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    /// Height over width.
    pub fn aspect(&self) -> f32 {
        self.height() as f32 / self.width().max(1) as f32
    }
}

/// Caching loader. Cloning shares the cache.
#[derive(Clone)]
pub struct AssetLoader {
    fetcher: Arc<dyn AssetFetcher>,
    sprites: Arc<Mutex<HashMap<String, Arc<RgbaImage>>>>,
    backgrounds: Arc<Mutex<HashMap<String, Arc<Frame>>>>,
}

impl Default for AssetLoader {
    fn default() -> Self {
        Self::new(Arc::new(DefaultFetcher))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AssetLoader {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            fetcher,
            sprites: Arc::default(),
            backgrounds: Arc::default(),
        }
    }

    pub fn load_sprite(
        &self,
        url: &str,
        product_type: ProductType,
    ) -> Result<OverlaySprite, AssetError> {
        if let Some(bitmap) = lock(&self.sprites).get(url) {
            return Ok(OverlaySprite {
                bitmap: bitmap.clone(),
                product_type,
            });
        }

        let bytes = self.fetcher.fetch(url)?;
        let bitmap = Arc::new(decode_image(url, &bytes)?);
        log::info!(
            "loaded sprite {} ({}x{})",
            display_source(url),
            bitmap.width(),
            bitmap.height()
        );
        // A concurrent load of the same source may have finished first; keep its handle.
        let bitmap = lock(&self.sprites)
            .entry(url.to_string())
            .or_insert(bitmap)
            .clone();
        Ok(OverlaySprite {
            bitmap,
            product_type,
        })
    }

    pub fn load_background(&self, source: &str) -> Result<Arc<Frame>, AssetError> {
        if let Some(frame) = lock(&self.backgrounds).get(source) {
            return Ok(frame.clone());
        }

        let bytes = self.fetcher.fetch(source)?;
        let frame = Arc::new(Frame::from_rgba_image(decode_image(source, &bytes)?));
        log::info!(
            "loaded background {} ({}x{})",
            display_source(source),
            frame.width,
            frame.height
        );
        Ok(lock(&self.backgrounds)
            .entry(source.to_string())
            .or_insert(frame)
            .clone())
    }

    /// Loads a sprite on a worker thread; the result arrives on the returned channel.
    pub fn spawn_sprite(
        &self,
        url: String,
        product_type: ProductType,
    ) -> Receiver<Result<OverlaySprite, AssetError>> {
        let (tx, rx) = bounded(1);
        let loader = self.clone();
        thread::spawn(move || {
            let _ = tx.send(loader.load_sprite(&url, product_type));
        });
        rx
    }

    pub fn spawn_background(&self, source: String) -> Receiver<Result<Arc<Frame>, AssetError>> {
        let (tx, rx) = bounded(1);
        let loader = self.clone();
        thread::spawn(move || {
            let _ = tx.send(loader.load_background(&source));
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use image::{ImageFormat, Rgba};

    use super::*;

    struct CountingFetcher {
        png: Vec<u8>,
        calls: AtomicUsize,
    }

    impl AssetFetcher for CountingFetcher {
        fn fetch(&self, source: &str) -> Result<Vec<u8>, AssetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if source.contains("missing") {
                return Err(fetch_error(source, "404"));
            }
            if source.contains("garbage") {
                return Ok(vec![1, 2, 3]);
            }
            Ok(self.png.clone())
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 200]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn counting_loader() -> (AssetLoader, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher {
            png: png_bytes(40, 20),
            calls: AtomicUsize::new(0),
        });
        (AssetLoader::new(fetcher.clone()), fetcher)
    }

    #[test]
    fn second_sprite_load_hits_the_cache() {
        let (loader, fetcher) = counting_loader();
        let first = loader
            .load_sprite("https://shop.test/glasses.png", ProductType::Glasses)
            .unwrap();
        let second = loader
            .load_sprite("https://shop.test/glasses.png", ProductType::Glasses)
            .unwrap();

        assert!(Arc::ptr_eq(&first.bitmap, &second.bitmap));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!((first.width(), first.height()), (40, 20));
        assert!((first.aspect() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn clones_share_the_cache() {
        let (loader, fetcher) = counting_loader();
        let other = loader.clone();
        let a = loader.load_background("photo.png").unwrap();
        let b = other.load_background("photo.png").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let (loader, fetcher) = counting_loader();
        assert!(matches!(
            loader.load_sprite("missing.png", ProductType::Hat),
            Err(AssetError::Fetch { .. })
        ));
        assert!(matches!(
            loader.load_sprite("garbage.png", ProductType::Hat),
            Err(AssetError::Decode { .. })
        ));
        assert!(loader.load_sprite("missing.png", ProductType::Hat).is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn spawned_load_delivers_result() {
        let (loader, _) = counting_loader();
        let rx = loader.spawn_sprite("a.png".to_string(), ProductType::Earrings);
        let sprite = rx.recv().unwrap().unwrap();
        assert_eq!(sprite.product_type, ProductType::Earrings);
    }

    #[test]
    fn data_uri_decodes_with_default_fetcher() {
        let png = png_bytes(3, 2);
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        );
        let loader = AssetLoader::default();
        let frame = loader.load_background(&uri).unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
    }

    #[test]
    fn malformed_data_uris_are_rejected() {
        assert!(matches!(
            decode_data_uri("data:image/png,rawbytes"),
            Err(AssetError::InvalidDataUri(_))
        ));
        assert!(matches!(
            decode_data_uri("data:image/png;base64"),
            Err(AssetError::InvalidDataUri(_))
        ));
        assert!(matches!(
            decode_data_uri("data:image/png;base64,@@@"),
            Err(AssetError::InvalidDataUri(_))
        ));
    }
}
