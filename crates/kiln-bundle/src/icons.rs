//! Favicon and app icon generation from one source image.
//!
//! Renders the standard PNG sizes, packs the small ones into `favicon.ico`
//! and writes a web app manifest. Rendered icons are cached on disk keyed by
//! the source image hash, so unchanged sources skip rasterization.

use std::fs;
use std::path::{Path, PathBuf};

use resvg::tiny_skia::{FilterQuality, Pixmap, PixmapPaint, Transform};
use resvg::usvg;
use serde::Serialize;

use crate::config::IconConfig;
use crate::error::BuildError;
use crate::namer::content_hash;

/// Directory (relative to the output root) icons are written under.
pub const ICON_DIR: &str = "icons";

/// PNG icons rendered from the source image: `(file name, size)`.
pub const PNG_ICONS: &[(&str, u32)] = &[
    ("favicon-16x16.png", 16),
    ("favicon-32x32.png", 32),
    ("favicon-48x48.png", 48),
    ("apple-touch-icon.png", 180),
    ("android-chrome-192x192.png", 192),
    ("android-chrome-512x512.png", 512),
];

/// Sizes packed into `favicon.ico`.
const ICO_SIZES: &[u32] = &[16, 32, 48];

const ICO_NAME: &str = "favicon.ico";
const MANIFEST_NAME: &str = "manifest.webmanifest";

/// Generated icon files plus the tags referencing them.
#[derive(Debug, Clone)]
pub struct IconSet {
    /// `(path relative to the output root, bytes)`
    pub icons: Vec<(String, Vec<u8>)>,
    /// `(path relative to the output root, bytes)`
    pub manifest: (String, Vec<u8>),
    /// Tags for the HTML shell's `<head>`
    pub head_tags: Vec<String>,
    /// Hash of the source image
    pub source_hash: String,
    /// False when icons were served from the cache
    pub regenerated: bool,
}

/// Produces an [`IconSet`] for a configured source image.
#[derive(Debug, Clone)]
pub struct IconEmitter {
    config: IconConfig,
    cache_dir: Option<PathBuf>,
    public_path: String,
}

impl IconEmitter {
    /// `cache_dir` is the persistent cache root; `None` disables caching.
    pub fn new(config: IconConfig, cache_dir: Option<PathBuf>, public_path: impl Into<String>) -> Self {
        let cache_dir = if config.cache { cache_dir } else { None };
        Self {
            config,
            cache_dir,
            public_path: public_path.into(),
        }
    }

    /// Generate icons for the image at `source`.
    pub fn emit(&self, source: &Path) -> Result<IconSet, BuildError> {
        let bytes = fs::read(source)
            .map_err(|e| BuildError::Icon(format!("{}: {}", source.display(), e)))?;
        let source_hash = content_hash(&bytes);

        let (icons, regenerated) = match self.load_cached(&source_hash) {
            Some(icons) => {
                tracing::debug!("icons for {} served from cache", source.display());
                (icons, false)
            }
            None => {
                let icons = render_icons(source, &bytes)?;
                self.store_cached(&source_hash, &icons);
                (icons, true)
            }
        };

        let manifest = self.manifest()?;
        let head_tags = self.head_tags(&source_hash);

        Ok(IconSet {
            icons: icons
                .into_iter()
                .map(|(name, data)| (format!("{ICON_DIR}/{name}"), data))
                .collect(),
            manifest: (format!("{ICON_DIR}/{MANIFEST_NAME}"), manifest),
            head_tags,
            source_hash,
            regenerated,
        })
    }

    fn cache_path(&self, hash: &str) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(ICON_DIR).join(hash))
    }

    fn icon_names() -> impl Iterator<Item = &'static str> {
        PNG_ICONS
            .iter()
            .map(|(name, _)| *name)
            .chain(std::iter::once(ICO_NAME))
    }

    fn load_cached(&self, hash: &str) -> Option<Vec<(String, Vec<u8>)>> {
        let dir = self.cache_path(hash)?;
        Self::icon_names()
            .map(|name| {
                fs::read(dir.join(name))
                    .ok()
                    .map(|data| (name.to_string(), data))
            })
            .collect()
    }

    fn store_cached(&self, hash: &str, icons: &[(String, Vec<u8>)]) {
        let Some(dir) = self.cache_path(hash) else {
            return;
        };
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!("Failed to create icon cache {}: {}", dir.display(), e);
            return;
        }
        for (name, data) in icons {
            if let Err(e) = fs::write(dir.join(name), data) {
                tracing::warn!("Failed to cache icon {}: {}", name, e);
            }
        }
    }

    fn manifest(&self) -> Result<Vec<u8>, BuildError> {
        let manifest = Manifest {
            name: &self.config.app_name,
            short_name: &self.config.app_name,
            start_url: "/",
            display: "standalone",
            background_color: &self.config.background_color,
            theme_color: &self.config.theme_color,
            icons: PNG_ICONS
                .iter()
                .filter(|(name, _)| name.starts_with("android-chrome"))
                .map(|(name, size)| ManifestIcon {
                    src: (*name).to_string(),
                    sizes: format!("{size}x{size}"),
                    kind: "image/png",
                })
                .collect(),
        };

        serde_json::to_vec_pretty(&manifest).map_err(|e| BuildError::Icon(e.to_string()))
    }

    fn head_tags(&self, hash: &str) -> Vec<String> {
        let version = &hash[..8.min(hash.len())];
        let href = |name: &str| format!("{}{ICON_DIR}/{name}?v={version}", self.public_path);

        let mut tags = vec![format!(
            "<link rel=\"icon\" type=\"image/x-icon\" href=\"{}\">",
            href(ICO_NAME)
        )];
        for (name, size) in PNG_ICONS.iter().filter(|(n, _)| n.starts_with("favicon-")) {
            tags.push(format!(
                "<link rel=\"icon\" type=\"image/png\" sizes=\"{size}x{size}\" href=\"{}\">",
                href(name)
            ));
        }
        tags.push(format!(
            "<link rel=\"apple-touch-icon\" sizes=\"180x180\" href=\"{}\">",
            href("apple-touch-icon.png")
        ));
        tags.push(format!("<link rel=\"manifest\" href=\"{}\">", href(MANIFEST_NAME)));
        tags.push(format!(
            "<meta name=\"theme-color\" content=\"{}\">",
            self.config.theme_color
        ));
        tags
    }
}

#[derive(Serialize)]
struct Manifest<'a> {
    name: &'a str,
    short_name: &'a str,
    start_url: &'a str,
    display: &'a str,
    background_color: &'a str,
    theme_color: &'a str,
    icons: Vec<ManifestIcon>,
}

#[derive(Serialize)]
struct ManifestIcon {
    src: String,
    sizes: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

enum SourceImage {
    Vector(usvg::Tree),
    Raster(Pixmap),
}

impl SourceImage {
    fn load(path: &Path, bytes: &[u8]) -> Result<Self, BuildError> {
        let is_svg = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("svg"));

        if is_svg {
            let tree = usvg::Tree::from_data(bytes, &usvg::Options::default())
                .map_err(|e| BuildError::Icon(format!("{}: {}", path.display(), e)))?;
            Ok(Self::Vector(tree))
        } else {
            let pixmap = Pixmap::decode_png(bytes)
                .map_err(|e| BuildError::Icon(format!("{}: {}", path.display(), e)))?;
            Ok(Self::Raster(pixmap))
        }
    }

    fn dimensions(&self) -> (f32, f32) {
        match self {
            Self::Vector(tree) => (tree.size().width(), tree.size().height()),
            Self::Raster(pixmap) => (pixmap.width() as f32, pixmap.height() as f32),
        }
    }

    /// Render into a `size`x`size` square, preserving aspect ratio.
    fn render(&self, size: u32) -> Result<Vec<u8>, BuildError> {
        let mut pixmap = Pixmap::new(size, size)
            .ok_or_else(|| BuildError::Icon(format!("invalid icon size {size}")))?;

        let (width, height) = self.dimensions();
        if width <= 0.0 || height <= 0.0 {
            return Err(BuildError::Icon("source image has no area".to_string()));
        }

        let side = size as f32;
        let scale = (side / width).min(side / height);
        let transform = Transform::from_scale(scale, scale).post_translate(
            (side - width * scale) / 2.0,
            (side - height * scale) / 2.0,
        );

        match self {
            Self::Vector(tree) => resvg::render(tree, transform, &mut pixmap.as_mut()),
            Self::Raster(source) => {
                let paint = PixmapPaint {
                    quality: FilterQuality::Bicubic,
                    ..PixmapPaint::default()
                };
                pixmap.draw_pixmap(0, 0, source.as_ref(), &paint, transform, None);
            }
        }

        pixmap
            .encode_png()
            .map_err(|e| BuildError::Icon(e.to_string()))
    }
}

fn render_icons(path: &Path, bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, BuildError> {
    let image = SourceImage::load(path, bytes)?;

    let mut icons = Vec::with_capacity(PNG_ICONS.len() + 1);
    for (name, size) in PNG_ICONS {
        icons.push(((*name).to_string(), image.render(*size)?));
    }

    let ico_images: Vec<(u32, Vec<u8>)> = ICO_SIZES
        .iter()
        .map(|&size| image.render(size).map(|png| (size, png)))
        .collect::<Result<_, _>>()?;
    icons.push((ICO_NAME.to_string(), encode_ico(&ico_images)));

    Ok(icons)
}

/// Pack PNG images into an ICO container.
pub fn encode_ico(images: &[(u32, Vec<u8>)]) -> Vec<u8> {
    const HEADER: usize = 6;
    const ENTRY: usize = 16;

    let mut out = Vec::new();
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&(images.len() as u16).to_le_bytes());

    let mut offset = HEADER + ENTRY * images.len();
    for (size, png) in images {
        // 256 is stored as 0
        let dim = if *size >= 256 { 0 } else { *size as u8 };
        out.push(dim);
        out.push(dim);
        out.push(0);
        out.push(0);
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&32u16.to_le_bytes());
        out.extend_from_slice(&(png.len() as u32).to_le_bytes());
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        offset += png.len();
    }

    for (_, png) in images {
        out.extend_from_slice(png);
    }

    out
}
