use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MimeType {
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/webp")]
    Webp,
}

impl MimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    /// Accepts `image/png`-style values, ignoring case and any `;` parameters.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let essence = lowered.split(';').next().unwrap_or_default().trim();
        match essence {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable image payload shared between history snapshots and outbound requests.
///
/// The transport encoding and the display data URL are computed once at construction,
/// so they always agree with `bytes` and `mime_type`. Clones share the same allocation.
#[derive(Clone)]
pub struct ImageAsset {
    inner: Arc<AssetData>,
}

struct AssetData {
    bytes: Vec<u8>,
    mime_type: MimeType,
    raw_base64: String,
    preview: String,
}

impl ImageAsset {
    pub fn new(bytes: Vec<u8>, mime_type: MimeType) -> Self {
        let raw_base64 = BASE64.encode(&bytes);
        let preview = format!("data:{};base64,{}", mime_type.as_str(), raw_base64);
        Self {
            inner: Arc::new(AssetData {
                bytes,
                mime_type,
                raw_base64,
                preview,
            }),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let Some(mime_type) = MimeType::sniff(&bytes) else {
            bail!("unsupported image payload (expected png, jpeg or webp)");
        };
        Ok(Self::new(bytes, mime_type))
    }

    pub fn from_base64(mime_type: &str, data: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .context("image base64 decode failed")?;
        if bytes.is_empty() {
            bail!("image payload is empty");
        }
        let mime = MimeType::parse(mime_type).or_else(|| MimeType::sniff(&bytes));
        let Some(mime) = mime else {
            bail!("unsupported image mime type '{mime_type}'");
        };
        Ok(Self::new(bytes, mime))
    }

    pub fn from_data_url(url: &str) -> Result<Self> {
        let Some(rest) = url.trim().strip_prefix("data:") else {
            bail!("not a data URL");
        };
        let Some((header, data)) = rest.split_once(',') else {
            bail!("data URL is missing its payload");
        };
        let Some(mime) = header.strip_suffix(";base64") else {
            bail!("data URL is not base64 encoded");
        };
        Self::from_base64(mime, data)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let mime = MimeType::sniff(&bytes).or_else(|| MimeType::from_path(path));
        let Some(mime) = mime else {
            bail!(
                "{} is not a supported image (png, jpeg or webp)",
                path.display()
            );
        };
        Ok(Self::new(bytes, mime))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn mime_type(&self) -> MimeType {
        self.inner.mime_type
    }

    pub fn raw_base64(&self) -> &str {
        &self.inner.raw_base64
    }

    pub fn preview(&self) -> &str {
        &self.inner.preview
    }

    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }

    /// Short sha256 fingerprint, used in event payloads and receipts instead of the bytes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.inner.bytes);
        hex::encode(&hasher.finalize()[..8])
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        ImageReader::new(Cursor::new(self.bytes()))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }

    pub fn same_allocation(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for ImageAsset {
    fn eq(&self, other: &Self) -> bool {
        self.same_allocation(other)
            || (self.inner.mime_type == other.inner.mime_type
                && self.inner.bytes == other.inner.bytes)
    }
}

impl Eq for ImageAsset {}

impl fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAsset")
            .field("mime_type", &self.inner.mime_type)
            .field("len", &self.inner.bytes.len())
            .field("digest", &self.digest())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::{ImageAsset, MimeType};

    fn png_bytes() -> Vec<u8> {
        let image = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn preview_embeds_mime_and_transport_encoding() {
        let asset = ImageAsset::new(vec![1, 2, 3], MimeType::Jpeg);
        assert_eq!(asset.raw_base64(), "AQID");
        assert_eq!(asset.preview(), "data:image/jpeg;base64,AQID");
    }

    #[test]
    fn data_url_round_trips_into_the_same_asset() -> anyhow::Result<()> {
        let original = ImageAsset::from_bytes(png_bytes())?;
        let restored = ImageAsset::from_data_url(original.preview())?;
        assert_eq!(restored, original);
        assert!(!restored.same_allocation(&original));
        assert_eq!(restored.mime_type(), MimeType::Png);
        assert_eq!(restored.dimensions(), Some((3, 2)));
        Ok(())
    }

    #[test]
    fn unknown_mime_falls_back_to_sniffing() -> anyhow::Result<()> {
        let png = ImageAsset::from_bytes(png_bytes())?;
        let asset = ImageAsset::from_base64("application/octet-stream", png.raw_base64())?;
        assert_eq!(asset.mime_type(), MimeType::Png);
        Ok(())
    }

    #[test]
    fn rejects_unsupported_payloads() {
        assert!(ImageAsset::from_bytes(b"GIF89a....".to_vec()).is_err());
        assert!(ImageAsset::from_base64("image/png", "").is_err());
        assert!(ImageAsset::from_data_url("https://example.com/a.png").is_err());
        assert!(ImageAsset::from_data_url("data:image/png,abc").is_err());
    }

    #[test]
    fn mime_parsing_is_lenient_about_case_and_parameters() {
        assert_eq!(MimeType::parse("IMAGE/PNG"), Some(MimeType::Png));
        assert_eq!(MimeType::parse("image/jpg; q=1"), Some(MimeType::Jpeg));
        assert_eq!(MimeType::parse("image/gif"), None);
        assert_eq!(
            MimeType::from_path(std::path::Path::new("/tmp/look.WEBP")),
            Some(MimeType::Webp)
        );
    }

    #[test]
    fn load_reads_files_from_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("person.png");
        std::fs::write(&path, png_bytes())?;
        let asset = ImageAsset::load(&path)?;
        assert_eq!(asset.mime_type(), MimeType::Png);
        assert_eq!(asset.digest().len(), 16);
        Ok(())
    }
}
