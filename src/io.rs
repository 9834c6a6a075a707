//! Filesystem access and the bridge to the `image` crate's PNG codec.

use std::io::Cursor as IoCursor;
use std::path::Path;

use image::{ImageFormat, ImageOutputFormat, RgbaImage};

use crate::config::EncodeOptions;
use crate::document::{ColorMode, Document, Layer};
use crate::error::{Error, Result};
use crate::raster::{ChannelOrder, Raster};
use crate::stream::ByteStream;

impl ByteStream {
    /// Loads the file's bytes from `offset` on. The cursor starts at 0.
    pub fn from_file(path: impl AsRef<Path>, offset: usize) -> Result<Self> {
        let data = std::fs::read(path)?;
        if offset > data.len() {
            return Err(Error::OutOfBounds { offset, need: 0, have: data.len() });
        }
        Ok(ByteStream::load(data[offset..].to_vec()))
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.as_bytes())?;
        Ok(())
    }

    /// Writes the whole file at `pos`, or at the cursor and past it when `None`.
    /// Returns the offset written to.
    pub fn include(&mut self, path: impl AsRef<Path>, pos: Option<usize>) -> Result<usize> {
        let bytes = std::fs::read(path)?;
        Ok(match pos {
            Some(p) => self.write_bytes_at(&bytes, p),
            None => self.write_bytes(&bytes),
        })
    }
}

impl From<RgbaImage> for Raster {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        Raster::from_raw(width, height, image.into_raw()).unwrap_or_default()
    }
}

impl Raster {
    /// The raster as an RGBA image; the bytes are taken as RGBA order.
    pub fn to_image(&self) -> Result<RgbaImage> {
        let too_large = || Error::UnsupportedFormat(format!("{}x{} raster", self.width(), self.height()));
        let width = u32::try_from(self.width()).map_err(|_| too_large())?;
        let height = u32::try_from(self.height()).map_err(|_| too_large())?;
        RgbaImage::from_raw(width, height, self.data().to_vec()).ok_or_else(too_large)
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.to_image()?.write_to(&mut IoCursor::new(&mut out), ImageOutputFormat::Png)?;
        Ok(out)
    }

    pub fn from_png_bytes(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
        Ok(image.to_rgba8().into())
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        self.to_image()?.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

/// Reads a PNG as an RGBA raster.
pub fn load_png(path: impl AsRef<Path>) -> Result<Raster> {
    let image = image::open(path)?;
    Ok(image.to_rgba8().into())
}

impl Layer {
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        self.to_raster(ChannelOrder::RGBA).save_png(path)
    }
}

impl Document {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("reading {}", path.display());
        Document::from_bytes(&std::fs::read(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>, options: &EncodeOptions) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes(options)?;
        log::info!("writing {} ({} bytes)", path.display(), bytes.len());
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// One layer per image, bottom first, named after the file stem and
    /// cropped to its non-transparent pixels.
    pub fn from_images<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Result<Self> {
        let mut doc = Document::new(ColorMode::Rgb);
        for path in paths {
            let path = path.as_ref();
            let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            let raster = load_png(path)?;
            doc.add_layer(Layer::from_raster(name, (0, 0), &raster, ChannelOrder::RGBA));
        }
        Ok(doc)
    }

    pub fn save_flattened_png(&self, path: impl AsRef<Path>) -> Result<()> {
        self.flatten(ChannelOrder::RGBA).save_png(path)
    }
}
