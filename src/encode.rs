//! Container encoder.
//!
//! Every variable-length section is written the same way: reserve a 4-byte
//! length, write the body, then patch the length with the number of bytes
//! written after the placeholder. Channel data is always written raw.

use crate::config::EncodeOptions;
use crate::document::{Channel, ColorMode, Document, Layer, ResolutionInfo};
use crate::error::{Error, Result, Warning};
use crate::raster::ChannelOrder;
use crate::stream::ByteStream;
use crate::text::{CharTable, DirectTable, WriteStringOptions};

pub(crate) const SIGNATURE: &str = "8BPS";
pub(crate) const RESOURCE_SIGNATURE: &str = "8BIM";
pub(crate) const RESOLUTION_INFO_ID: u16 = 0x03ED;
pub(crate) const VERSION_INFO_ID: u16 = 0x0421;

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::UnsupportedFormat(format!("{what} of {value} does not fit in 32 bits")))
}

pub struct PsdWriter<'a> {
    doc: &'a Document,
    options: &'a EncodeOptions,
    stream: ByteStream,
    ascii: CharTable,
}

impl<'a> PsdWriter<'a> {
    pub fn new(doc: &'a Document, options: &'a EncodeOptions) -> Self {
        PsdWriter { doc, options, stream: ByteStream::new(), ascii: DirectTable::ascii().into() }
    }

    pub fn write(mut self) -> Result<(Vec<u8>, Vec<Warning>)> {
        let channels = match self.doc.color_mode() {
            ColorMode::Rgb => 4,
            ColorMode::Bitmap | ColorMode::Grayscale => 1,
            ColorMode::Indexed => return Err(Error::UnsupportedFormat("indexed color encoding".into())),
            other => return Err(Error::UnsupportedFormat(format!("encoding {other:?} documents"))),
        };
        self.write_header(channels)?;

        let color_mode_data = self.reserve_length();
        self.patch_length(color_mode_data)?;

        self.write_image_resources()?;
        self.write_layer_and_mask_info()?;
        self.write_composite(channels);

        let warnings = self.stream.take_warnings();
        log::debug!("encoded {} layers into {} bytes", self.doc.layers().len(), self.stream.len());
        Ok((self.stream.into_bytes(), warnings))
    }

    fn write_tag(&mut self, tag: &str) -> Result<()> {
        self.stream.write_string(tag, &self.ascii, &WriteStringOptions::default())?;
        Ok(())
    }

    /// Writes a zero length placeholder and returns its offset.
    fn reserve_length(&mut self) -> usize {
        self.stream.write_u32(0)
    }

    fn patch_length(&mut self, placeholder: usize) -> Result<()> {
        let length = to_u32(self.stream.index() - placeholder - 4, "section length")?;
        self.stream.write_u32_at(length, placeholder);
        Ok(())
    }

    fn write_header(&mut self, channels: u16) -> Result<()> {
        self.write_tag(SIGNATURE)?;
        self.stream.write_u16(1);
        self.stream.write_hex_patch("00 00 00 00 00 00", None)?;
        self.stream.write_u16(channels);
        self.stream.write_u32(to_u32(self.doc.height(), "canvas height")?);
        self.stream.write_u32(to_u32(self.doc.width(), "canvas width")?);
        self.stream.write_u16(8);
        self.stream.write_u16(self.doc.color_mode().as_u16());
        Ok(())
    }

    /// Length-prefixed UTF-16BE string followed by a zero code unit.
    fn write_unicode(&mut self, text: &str) -> Result<()> {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.stream.write_u32(to_u32(units.len(), "unicode string")?);
        for unit in units {
            self.stream.write_u16(unit);
        }
        self.stream.write_u16(0);
        Ok(())
    }

    /// Length byte plus UTF-8 bytes, zero padded to a multiple of 4.
    fn write_pascal_string(&mut self, text: &str) {
        let mut end = text.len().min(255);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end < text.len() {
            self.stream.warn(Warning::NameTruncated { name: text.to_string() });
        }
        let bytes = &text.as_bytes()[..end];
        self.stream.write_u8(bytes.len() as u8);
        self.stream.write_bytes(bytes);
        let mut written = bytes.len() + 1;
        while written % 4 != 0 {
            self.stream.write_u8(0);
            written += 1;
        }
    }

    fn write_image_resources(&mut self) -> Result<()> {
        let section = self.reserve_length();

        if self.options.resolution_info {
            let info = ResolutionInfo::with_dpi(self.options.dpi);
            self.write_tag(RESOURCE_SIGNATURE)?;
            self.stream.write_u16(RESOLUTION_INFO_ID);
            self.stream.write_u16(0);
            let record = self.reserve_length();
            self.stream.write_u32(info.h_res);
            self.stream.write_u16(info.h_res_unit);
            self.stream.write_u16(info.width_unit);
            self.stream.write_u32(info.v_res);
            self.stream.write_u16(info.v_res_unit);
            self.stream.write_u16(info.height_unit);
            self.patch_length(record)?;
        }

        if self.options.version_info {
            self.write_tag(RESOURCE_SIGNATURE)?;
            self.stream.write_u16(VERSION_INFO_ID);
            self.stream.write_u16(0);
            let record = self.reserve_length();
            self.stream.write_u32(1);
            self.stream.write_u8(1);
            let (writer, reader) = (self.options.writer_name.clone(), self.options.reader_name.clone());
            self.write_unicode(&writer)?;
            self.write_unicode(&reader)?;
            self.stream.write_u32(1);
            self.patch_length(record)?;
            self.stream.align(2, 0);
        }

        self.patch_length(section)
    }

    fn write_layer_and_mask_info(&mut self) -> Result<()> {
        let section = self.reserve_length();
        let layer_info = self.reserve_length();

        let doc = self.doc;
        let count = i16::try_from(doc.layers().len()).map_err(|_| Error::UnsupportedFormat(format!("{} layers", doc.layers().len())))?;
        self.stream.write_i16(count);
        for layer in doc.layers() {
            self.write_layer_record(layer)?;
        }
        for layer in doc.layers() {
            for channel in layer.channels() {
                self.write_channel(channel);
            }
        }
        self.stream.write_u16(0);
        self.patch_length(layer_info)?;

        // Global layer mask info: none.
        self.stream.write_u32(0);
        self.patch_length(section)
    }

    fn write_layer_record(&mut self, layer: &Layer) -> Result<()> {
        let rect = layer.bounding_box();
        self.stream.write_i32(rect.top);
        self.stream.write_i32(rect.left);
        self.stream.write_i32(rect.bottom);
        self.stream.write_i32(rect.right);

        let channel_count = u16::try_from(layer.channels().len())
            .map_err(|_| Error::UnsupportedFormat(format!("{} channels in one layer", layer.channels().len())))?;
        self.stream.write_u16(channel_count);
        for channel in layer.channels() {
            self.stream.write_i16(channel.id().0);
            self.stream.write_u32(to_u32(channel.encoded_len(), "channel length")?);
        }

        self.write_tag(RESOURCE_SIGNATURE)?;
        self.write_tag("norm")?;
        self.stream.write_u8(255); // opacity
        self.stream.write_u8(0); // clipping
        self.stream.write_u8(0); // flags
        self.stream.write_u8(0); // filler

        let extra = self.reserve_length();
        self.stream.write_u32(0); // layer mask
        self.stream.write_u32(0); // blending ranges
        self.write_pascal_string(layer.name());
        if self.options.unicode_layer_names {
            self.write_tag(RESOURCE_SIGNATURE)?;
            self.write_tag("luni")?;
            let block = self.reserve_length();
            self.write_unicode(layer.name())?;
            self.patch_length(block)?;
        }
        self.patch_length(extra)
    }

    fn write_channel(&mut self, channel: &Channel) {
        self.stream.write_u16(0);
        self.stream.write_bytes(channel.data());
    }

    /// Raw planar composite: red, green, blue, alpha (just the first plane for single-channel modes).
    fn write_composite(&mut self, channels: u16) {
        let flat = self.doc.flatten(ChannelOrder::RGBA);
        self.stream.write_u16(0);
        for plane in 0..usize::from(channels) {
            let bytes: Vec<u8> = flat.data().iter().skip(plane).step_by(4).copied().collect();
            self.stream.write_bytes(&bytes);
        }
    }
}

pub fn encode(doc: &Document, options: &EncodeOptions) -> Result<Vec<u8>> {
    encode_with_warnings(doc, options).map(|(bytes, _)| bytes)
}

pub fn encode_with_warnings(doc: &Document, options: &EncodeOptions) -> Result<(Vec<u8>, Vec<Warning>)> {
    PsdWriter::new(doc, options).write()
}

impl Document {
    pub fn to_bytes(&self, options: &EncodeOptions) -> Result<Vec<u8>> {
        encode(self, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChannelId;

    fn one_pixel_layer(name: &str) -> Layer {
        let channels = ChannelId::RGB_LAYER.iter().map(|&id| Channel::from_raw(id, 1, 1, vec![0x80]).unwrap()).collect();
        Layer::from_channels(name, (0, 0), (1, 1), channels).unwrap()
    }

    #[test]
    fn empty_document_layout() {
        let bytes = encode(&Document::default(), &EncodeOptions::minimal()).unwrap();
        let mut expected = b"8BPS".to_vec();
        expected.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0, 0, 4]);
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 8, 0, 3]);
        expected.extend_from_slice(&[0, 0, 0, 0]); // color mode data
        expected.extend_from_slice(&[0, 0, 0, 0]); // image resources
        expected.extend_from_slice(&[0, 0, 0, 12, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0, 0]);
        expected.extend_from_slice(&[0, 0]); // composite compression
        assert_eq!(bytes, expected);
    }

    #[test]
    fn resource_lengths_are_back_patched() {
        let bytes = encode(&Document::default(), &EncodeOptions::default()).unwrap();
        let mut s = ByteStream::load(bytes);
        let section = s.read_u32_at(30).unwrap() as usize;
        // resolution record: 12 byte head + 16, version record: 12 + 113 + 1 pad
        assert_eq!(section, 28 + 126);
        assert_eq!(s.read_u16_at(34 + 4).unwrap(), RESOLUTION_INFO_ID);
        assert_eq!(s.read_u32_at(34 + 8).unwrap(), 16);
        assert_eq!(s.read_u32_at(34 + 12).unwrap(), 0x0060_0000);
        assert_eq!(s.read_u16_at(62 + 4).unwrap(), VERSION_INFO_ID);
        assert_eq!(s.read_u32_at(62 + 8).unwrap(), 113);
    }

    #[test]
    fn layer_record_fields() {
        let mut doc = Document::default();
        doc.add_layer(one_pixel_layer("Bg"));
        let bytes = encode(&doc, &EncodeOptions::minimal()).unwrap();
        let mut s = ByteStream::load(bytes);
        // header 26 + two empty sections 8 + two lengths 8, then the count
        s.set_index(44);
        assert_eq!(s.read_i16_at(42).unwrap(), 1);
        assert_eq!([s.read_i32().unwrap(), s.read_i32().unwrap(), s.read_i32().unwrap(), s.read_i32().unwrap()], [0, 0, 1, 1]);
        assert_eq!(s.read_u16().unwrap(), 4);
        assert_eq!(s.read_i16().unwrap(), -1);
        assert_eq!(s.read_u32().unwrap(), 3);
        s.advance_index_by(18);
        assert_eq!(s.read_bytes(8).unwrap(), b"8BIMnorm");
        assert_eq!(s.read_bytes(4).unwrap(), &[255, 0, 0, 0]);
        // mask + ranges + "\x02Bg\0"
        assert_eq!(s.read_u32().unwrap(), 12);
        s.advance_index_by(8);
        assert_eq!(s.read_bytes(4).unwrap(), b"\x02Bg\0");
        // four raw channels
        assert_eq!(s.read_bytes(12).unwrap(), &[0, 0, 0x80, 0, 0, 0x80, 0, 0, 0x80, 0, 0, 0x80]);
    }

    #[test]
    fn pascal_string_padding() {
        let doc = Document::default();
        let options = EncodeOptions::minimal();
        let mut writer = PsdWriter::new(&doc, &options);
        writer.write_pascal_string("abc");
        writer.write_pascal_string("abcd");
        assert_eq!(writer.stream.as_bytes(), b"\x03abc\x04abcd\0\0\0");
    }

    #[test]
    fn unsupported_modes_are_rejected() {
        let options = EncodeOptions::default();
        assert!(matches!(encode(&Document::new(ColorMode::Indexed), &options), Err(Error::UnsupportedFormat(_))));
        assert!(matches!(encode(&Document::new(ColorMode::Cmyk), &options), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn long_names_are_truncated_with_warning() {
        let mut doc = Document::default();
        doc.add_layer(one_pixel_layer(&"n".repeat(300)));
        let (_, warnings) = encode_with_warnings(&doc, &EncodeOptions::minimal()).unwrap();
        assert!(matches!(&warnings[..], [Warning::NameTruncated { .. }]));
    }
}
