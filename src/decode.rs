//! Container decoder.
//!
//! Sections are read in file order. Every length-prefixed block is left by
//! seeking to `start + declared length`, so partially understood blocks never
//! desynchronize the parser. The trailing composite image is not read.

use crate::document::{Channel, ChannelId, ColorMode, Document, Layer, Palette, ResolutionInfo, VersionInfo};
use crate::encode::{RESOLUTION_INFO_ID, RESOURCE_SIGNATURE, SIGNATURE, VERSION_INFO_ID};
use crate::error::{Error, Result, Warning};
use crate::raster::Rect;
use crate::rle;
use crate::stream::ByteStream;
use crate::text::{CharTable, DirectTable, ReadStringOptions};

const PALETTE_LEN: usize = 768;
const HIDDEN_FLAG: u8 = 0x02;

struct Header {
    width: usize,
    height: usize,
    color_mode: ColorMode,
}

struct LayerRecord {
    name: String,
    rect: Rect,
    channels: Vec<(ChannelId, usize)>,
    visible: bool,
}

pub struct PsdParser {
    stream: ByteStream,
    latin1: CharTable,
}

impl PsdParser {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        PsdParser { stream: ByteStream::load(bytes), latin1: DirectTable::latin1().into() }
    }

    pub fn parse(mut self) -> Result<(Document, Vec<Warning>)> {
        let header = self.parse_header()?;
        let mut doc = Document::with_size(header.width, header.height, header.color_mode);
        doc.palette = self.parse_color_mode_data(header.color_mode)?;
        self.parse_image_resources(&mut doc)?;
        for layer in self.parse_layer_and_mask_info(header.color_mode)? {
            doc.push_decoded(layer);
        }
        log::debug!("decoded {}x{} document with {} layers", doc.width(), doc.height(), doc.layers().len());
        Ok((doc, self.stream.take_warnings()))
    }

    fn read_tag(&mut self) -> Result<String> {
        self.stream.read_string(&self.latin1, &ReadStringOptions::fixed(4))
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(self.stream.read_u32()? as usize)
    }

    fn parse_header(&mut self) -> Result<Header> {
        let signature = self.read_tag()?;
        if signature != SIGNATURE {
            return Err(Error::format(0, format!("bad signature {signature:?}")));
        }
        let version = self.stream.read_u16()?;
        if version != 1 {
            return Err(Error::format(4, format!("unsupported version {version}")));
        }
        if self.stream.read_bytes(6)?.iter().any(|&b| b != 0) {
            log::debug!("reserved header bytes are not zero");
        }
        let channels = self.stream.read_u16()?;
        let height = self.stream.read_u32()? as usize;
        let width = self.stream.read_u32()? as usize;
        let depth = self.stream.read_u16()?;
        if depth != 8 {
            return Err(Error::UnsupportedFormat(format!("{depth}-bit channels")));
        }
        let raw_mode = self.stream.read_u16()?;
        let color_mode =
            ColorMode::from_u16(raw_mode).ok_or_else(|| Error::format(24, format!("unknown color mode {raw_mode}")))?;
        log::debug!("header: {width}x{height}, {channels} channels, {color_mode:?}");
        Ok(Header { width, height, color_mode })
    }

    fn parse_color_mode_data(&mut self, color_mode: ColorMode) -> Result<Option<Palette>> {
        let len = self.read_len()?;
        if len == 0 {
            return Ok(None);
        }
        if color_mode != ColorMode::Indexed {
            return Err(Error::UnsupportedFormat(format!("{len} bytes of {color_mode:?} color mode data")));
        }
        if len != PALETTE_LEN {
            return Err(Error::UnsupportedFormat(format!("indexed color data of {len} bytes")));
        }
        // Planar: 256 reds, then 256 greens, then 256 blues.
        let planes = self.stream.read_bytes(PALETTE_LEN)?;
        let entries = (0..256).map(|i| [planes[i], planes[256 + i], planes[512 + i], 255]).collect();
        Ok(Some(Palette { entries }))
    }

    fn parse_image_resources(&mut self, doc: &mut Document) -> Result<()> {
        let len = self.read_len()?;
        let end = self.stream.index().saturating_add(len);
        while self.stream.index().saturating_add(12) <= end {
            let block = self.stream.index();
            let signature = self.read_tag()?;
            if signature != RESOURCE_SIGNATURE {
                return Err(Error::format(block, format!("bad resource signature {signature:?}")));
            }
            let id = self.stream.read_u16()?;
            let name_len = usize::from(self.stream.read_u8()?);
            // Length byte plus name, padded to even.
            self.stream.advance_index_by(name_len + (name_len + 1) % 2);
            let size = self.read_len()?;
            let data = self.stream.index();
            match id {
                RESOLUTION_INFO_ID if size >= 16 => doc.resolution = Some(self.read_resolution_info()?),
                VERSION_INFO_ID => doc.version_info = self.parse_version_info(size),
                _ => log::debug!("skipping image resource {id:#06x} ({size} bytes)"),
            }
            self.stream.set_index(data.saturating_add(size).saturating_add(size % 2));
        }
        self.stream.set_index(end);
        Ok(())
    }

    fn read_resolution_info(&mut self) -> Result<ResolutionInfo> {
        Ok(ResolutionInfo {
            h_res: self.stream.read_u32()?,
            h_res_unit: self.stream.read_u16()?,
            width_unit: self.stream.read_u16()?,
            v_res: self.stream.read_u32()?,
            v_res_unit: self.stream.read_u16()?,
            height_unit: self.stream.read_u16()?,
        })
    }

    /// Writers disagree on whether the unicode strings carry a zero unit after
    /// their declared length; the layout that matches `size` wins.
    fn parse_version_info(&mut self, size: usize) -> Option<VersionInfo> {
        let start = self.stream.index();
        for trailing_nul in [true, false] {
            self.stream.set_index(start);
            match self.read_version_info(trailing_nul) {
                Ok(info) if self.stream.index() - start == size => return Some(info),
                _ => {}
            }
        }
        log::debug!("version info resource at {start:#x} does not match its {size}-byte length");
        None
    }

    fn read_version_info(&mut self, trailing_nul: bool) -> Result<VersionInfo> {
        let version = self.stream.read_u32()?;
        let has_real_merged_data = self.stream.read_u8()? != 0;
        let writer = self.read_unicode(trailing_nul)?;
        let reader = self.read_unicode(trailing_nul)?;
        let file_version = self.stream.read_u32()?;
        Ok(VersionInfo { version, has_real_merged_data, writer, reader, file_version })
    }

    fn read_unicode(&mut self, trailing_nul: bool) -> Result<String> {
        let count = self.read_len()?;
        let mut units = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            units.push(self.stream.read_u16()?);
        }
        if trailing_nul && self.stream.read_u16()? != 0 {
            return Err(Error::format(self.stream.index() - 2, "unicode string is not zero terminated"));
        }
        Ok(String::from_utf16_lossy(&units).trim_end_matches('\0').to_string())
    }

    fn parse_layer_and_mask_info(&mut self, color_mode: ColorMode) -> Result<Vec<Layer>> {
        let section_len = self.read_len()?;
        let section_end = self.stream.index().saturating_add(section_len);
        if section_len == 0 {
            return Ok(Vec::new());
        }
        let info_len = self.read_len()?;
        if info_len == 0 {
            self.stream.set_index(section_end);
            return Ok(Vec::new());
        }
        let count = self.stream.read_i16()?;
        if count < 0 {
            return Err(Error::UnsupportedFormat(format!("negative layer count {count}")));
        }

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            records.push(self.parse_layer_record()?);
        }
        let layers = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| self.parse_channel_data(i, record, color_mode))
            .collect::<Result<Vec<_>>>()?;

        self.stream.set_index(section_end);
        Ok(layers)
    }

    fn parse_layer_record(&mut self) -> Result<LayerRecord> {
        let start = self.stream.index();
        let (top, left, bottom, right) =
            (self.stream.read_i32()?, self.stream.read_i32()?, self.stream.read_i32()?, self.stream.read_i32()?);
        let rect = Rect::new(top, left, bottom, right);
        if rect.width() < 0 || rect.height() < 0 {
            return Err(Error::format(start, format!("inverted layer bounds {rect:?}")));
        }
        let max = i64::from(i32::MAX);
        if rect.width() > max || rect.height() > max {
            return Err(Error::format(start, format!("layer bounds {rect:?} are too large")));
        }

        let channel_count = self.stream.read_u16()?;
        let mut channels = Vec::with_capacity(usize::from(channel_count));
        for _ in 0..channel_count {
            let id = ChannelId(self.stream.read_i16()?);
            channels.push((id, self.read_len()?));
        }

        let signature = self.read_tag()?;
        let blend_key = self.read_tag()?;
        log::debug!("layer record at {start:#x}: blend {signature}/{blend_key}");
        // opacity, clipping, flags, filler
        let flags = self.stream.read_bytes(4)?[2];

        let extra_len = self.read_len()?;
        let extra_start = self.stream.index();
        self.stream.save_state();
        let name = self.parse_layer_name(extra_start.saturating_add(extra_len))?;
        self.stream.restore_state()?;
        self.stream.advance_index_by(extra_len);

        Ok(LayerRecord { name, rect, channels, visible: flags & HIDDEN_FLAG == 0 })
    }

    /// Reads the Pascal name from the extra data, overridden by a `luni` block when present.
    fn parse_layer_name(&mut self, end: usize) -> Result<String> {
        let mask_len = self.read_len()?;
        self.stream.advance_index_by(mask_len);
        let ranges_len = self.read_len()?;
        self.stream.advance_index_by(ranges_len);

        let name_start = self.stream.index();
        let name_len = usize::from(self.stream.read_u8()?);
        let mut name = String::from_utf8_lossy(self.stream.read_bytes(name_len)?).into_owned();
        if (self.stream.index() - name_start) % 2 != 0 {
            self.stream.advance_index_by(1);
        }
        if self.stream.index() < end && self.stream.peek_bytes(self.stream.index(), 1)?[0] != b'8' {
            self.stream.advance_index_by(2);
        }

        while self.stream.index().saturating_add(12) <= end {
            let signature = self.read_tag()?;
            if signature != RESOURCE_SIGNATURE && signature != "8B64" {
                break;
            }
            let key = self.read_tag()?;
            let len = self.read_len()?;
            let data = self.stream.index();
            if key == "luni" {
                name = self.read_unicode(false)?;
            }
            self.stream.set_index(data.saturating_add(len));
        }
        Ok(name)
    }

    fn parse_channel_data(&mut self, index: usize, record: LayerRecord, color_mode: ColorMode) -> Result<Layer> {
        if color_mode != ColorMode::Rgb && !record.channels.is_empty() {
            return Err(Error::UnsupportedFormat(format!("decoding {color_mode:?} channel data")));
        }
        let (width, height) = (record.rect.width() as usize, record.rect.height() as usize);
        let plane = width.checked_mul(height);
        let mut channels = Vec::with_capacity(record.channels.len());
        for &(id, declared) in &record.channels {
            let start = self.stream.index();
            if declared < 2 {
                return Err(Error::format(start, format!("channel length {declared} has no room for compression")));
            }
            if id.is_mask() {
                log::debug!("skipping mask channel {} of layer {:?}", id.0, record.name);
                self.stream.set_index(start.saturating_add(declared));
                continue;
            }
            let plane = plane.ok_or_else(|| Error::format(start, format!("{width}x{height} channel does not fit in memory")))?;
            let (data, consumed) = match self.stream.read_u16()? {
                0 => (self.stream.read_bytes(plane)?.to_vec(), plane),
                1 => {
                    let unpacked = rle::decode(&mut self.stream, width, height)?;
                    (unpacked.data, unpacked.consumed)
                }
                other => return Err(Error::format(start, format!("unknown compression {other}"))),
            };
            if consumed + 2 != declared {
                self.stream.warn(Warning::ChannelLength { layer: index, channel: id.0, declared, consumed: consumed + 2 });
            }
            self.stream.set_index(start.saturating_add(declared));
            let channel = Channel::from_raw(id, width, height, data)
                .ok_or_else(|| Error::format(start, "channel plane does not match layer bounds"))?;
            channels.push(channel);
        }

        let mut layer = Layer::from_channels(record.name, (record.rect.left, record.rect.top), (width, height), channels)?;
        layer.set_visible(record.visible);
        Ok(layer)
    }
}

pub fn decode(bytes: &[u8]) -> Result<Document> {
    decode_with_warnings(bytes).map(|(doc, _)| doc)
}

/// Decodes and also returns the non-fatal conditions hit along the way.
pub fn decode_with_warnings(bytes: &[u8]) -> Result<(Document, Vec<Warning>)> {
    PsdParser::new(bytes).parse()
}

impl Document {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodeOptions;
    use crate::encode::encode;

    fn header(s: &mut ByteStream, depth: u16, mode: u16) {
        s.write_bytes(b"8BPS");
        s.write_u16(1);
        s.write_bytes(&[0; 6]);
        s.write_u16(4);
        s.write_u32(2);
        s.write_u32(3);
        s.write_u16(depth);
        s.write_u16(mode);
        s.write_u32(0);
        s.write_u32(0);
    }

    fn extra(name: &str) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 0, 0, 0, 0, 0, name.len() as u8];
        out.extend_from_slice(name.as_bytes());
        while (out.len() - 8) % 4 != 0 {
            out.push(0);
        }
        out
    }

    fn luni(name: &str) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut out = b"8BIMluni".to_vec();
        out.extend_from_slice(&(4 + 2 * units.len() as u32).to_be_bytes());
        out.extend_from_slice(&(units.len() as u32).to_be_bytes());
        units.iter().for_each(|u| out.extend_from_slice(&u.to_be_bytes()));
        out
    }

    /// A 3x2 RGB file with one layer at the origin holding a single red channel.
    fn single_layer(flags: u8, extra: &[u8], channel: &[u8]) -> Vec<u8> {
        layer_file([0, 0, 2, 3], flags, extra, &[(0, channel)])
    }

    /// A 3x2 RGB file with one layer of the given bounds and `(id, data)` channels.
    fn layer_file(bounds: [i32; 4], flags: u8, extra: &[u8], channels: &[(i16, &[u8])]) -> Vec<u8> {
        let mut s = ByteStream::new();
        header(&mut s, 8, 3);
        let section = s.write_u32(0);
        let info = s.write_u32(0);
        s.write_i16(1);
        for v in bounds {
            s.write_i32(v);
        }
        s.write_u16(channels.len() as u16);
        for (id, data) in channels {
            s.write_i16(*id);
            s.write_u32(data.len() as u32);
        }
        s.write_bytes(b"8BIMnorm");
        s.write_bytes(&[255, 0, flags, 0]);
        s.write_u32(extra.len() as u32);
        s.write_bytes(extra);
        for (_, data) in channels {
            s.write_bytes(data);
        }
        let end = s.index();
        s.write_u32_at((end - info - 4) as u32, info);
        s.write_u32_at((end - section - 4) as u32, section);
        s.into_bytes()
    }

    const RLE_CHANNEL: [u8; 12] = [0x00, 0x01, 0x00, 0x04, 0x00, 0x02, 0x02, 0xAA, 0xBB, 0xCC, 0xFE, 0x11];

    #[test]
    fn packbits_layer() {
        let (doc, warnings) = decode_with_warnings(&single_layer(0, &extra("rle"), &RLE_CHANNEL)).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(doc.size(), (3, 2));
        let layer = &doc.layers()[0];
        assert_eq!(layer.name(), "rle");
        assert_eq!(layer.size(), (3, 2));
        let red = layer.channel(ChannelId::RED).unwrap();
        assert_eq!(red.row(0), &[0xAA, 0xBB, 0xCC]);
        assert_eq!(red.row(1), &[0x11, 0x11, 0x11]);
    }

    #[test]
    fn raw_layer_and_hidden_flag() {
        let channel = [0, 0, 1, 2, 3, 4, 5, 6];
        let doc = decode(&single_layer(HIDDEN_FLAG, &extra("raw"), &channel)).unwrap();
        let layer = &doc.layers()[0];
        assert!(!layer.is_visible());
        assert_eq!(layer.channel(ChannelId::RED).unwrap().data(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn declared_length_wins_over_consumed() {
        let mut channel = RLE_CHANNEL.to_vec();
        channel.extend_from_slice(&[0xEE, 0xEE]);
        let (doc, warnings) = decode_with_warnings(&single_layer(0, &extra("pad"), &channel)).unwrap();
        assert_eq!(doc.layers().len(), 1);
        assert_eq!(warnings, vec![Warning::ChannelLength { layer: 0, channel: 0, declared: 14, consumed: 12 }]);
    }

    #[test]
    fn unicode_name_overrides_pascal_name() {
        let mut data = extra("abc");
        data.extend(luni("Zeé"));
        let doc = decode(&single_layer(0, &data, &RLE_CHANNEL)).unwrap();
        assert_eq!(doc.layers()[0].name(), "Zeé");
    }

    #[test]
    fn unicode_name_after_word_padding() {
        // "a" pads to 4 bytes, two past the even boundary.
        let mut data = extra("a");
        assert_eq!(data.len(), 12);
        data.extend(luni("long name"));
        let doc = decode(&single_layer(0, &data, &RLE_CHANNEL)).unwrap();
        assert_eq!(doc.layers()[0].name(), "long name");
    }

    #[test]
    fn mask_channels_are_skipped_by_declared_length() {
        let red: &[u8] = &[0, 0, 1, 2, 3, 4, 5, 6];
        let mask: &[u8] = &[0, 0, 9, 9, 9];
        let green: &[u8] = &[0, 0, 7, 8, 9, 10, 11, 12];
        let bytes = layer_file([0, 0, 2, 3], 0, &extra("masked"), &[(0, red), (-2, mask), (1, green)]);
        let (doc, warnings) = decode_with_warnings(&bytes).unwrap();
        assert!(warnings.is_empty());
        let layer = &doc.layers()[0];
        let ids: Vec<ChannelId> = layer.channels().iter().map(|c| c.id()).collect();
        assert_eq!(ids, [ChannelId::RED, ChannelId::GREEN]);
        assert_eq!(layer.channel(ChannelId::RED).unwrap().data(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(layer.channel(ChannelId::GREEN).unwrap().data(), &[7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn unicode_name_after_other_tagged_blocks() {
        let mut data = extra("plain");
        data.extend_from_slice(b"8BIMlyid");
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(&7u32.to_be_bytes());
        data.extend(luni("Ebene 2"));
        let doc = decode(&single_layer(0, &data, &RLE_CHANNEL)).unwrap();
        let layer = &doc.layers()[0];
        assert_eq!(layer.name(), "Ebene 2");
        assert_eq!(layer.channel(ChannelId::RED).unwrap().row(1), &[0x11, 0x11, 0x11]);
    }

    #[test]
    fn oversized_packbits_layer_is_an_error() {
        let bounds = [0, 0, 0x7FFF_FFFF, 0x7FFF_FFFF];
        let bytes = layer_file(bounds, 0, &extra("big"), &[(0, &RLE_CHANNEL[..])]);
        assert!(matches!(decode(&bytes), Err(Error::OutOfBounds { .. })));

        let raw: &[u8] = &[0, 0, 1, 2];
        let bytes = layer_file(bounds, 0, &extra("big"), &[(0, raw)]);
        assert!(matches!(decode(&bytes), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn bounds_wider_than_i32_are_format_errors() {
        let bytes = layer_file([0, -2, 1, i32::MAX], 0, &extra("wide"), &[(0, &RLE_CHANNEL[..])]);
        assert!(matches!(decode(&bytes), Err(Error::Format { .. })));

        let bytes = layer_file([i32::MIN, 0, i32::MAX, 1], 0, &extra("tall"), &[]);
        assert!(matches!(decode(&bytes), Err(Error::Format { .. })));
    }

    #[test]
    fn unknown_compression_is_format_error() {
        let mut channel = RLE_CHANNEL;
        channel[1] = 2;
        let err = decode(&single_layer(0, &extra("x"), &channel)).unwrap_err();
        assert!(matches!(err, Error::Format { .. }), "{err}");
    }

    #[test]
    fn header_validation() {
        let good = single_layer(0, &extra("x"), &RLE_CHANNEL);

        let mut bad = good.clone();
        bad[0] = b'9';
        assert!(matches!(decode(&bad), Err(Error::Format { offset: 0, .. })));

        let mut bad = good.clone();
        bad[5] = 2;
        assert!(matches!(decode(&bad), Err(Error::Format { offset: 4, .. })));

        let mut odd = good.clone();
        odd[8] = 1;
        assert!(decode(&odd).is_ok());

        let mut bad = good.clone();
        bad[23] = 16;
        assert!(matches!(decode(&bad), Err(Error::UnsupportedFormat(_))));

        let mut bad = good;
        bad[25] = 5;
        assert!(matches!(decode(&bad), Err(Error::Format { offset: 24, .. })));
    }

    #[test]
    fn negative_layer_count_is_unsupported() {
        let mut bytes = single_layer(0, &extra("x"), &RLE_CHANNEL);
        // count follows header 26, two empty sections and two lengths
        bytes[42] = 0xFF;
        bytes[43] = 0xFF;
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn grayscale_layers_are_unsupported() {
        let mut bytes = single_layer(0, &extra("x"), &RLE_CHANNEL);
        bytes[25] = 1;
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn empty_layer_section() {
        let mut s = ByteStream::new();
        header(&mut s, 8, 3);
        s.write_u32(0);
        let doc = decode(s.as_bytes()).unwrap();
        assert!(doc.layers().is_empty());
        assert_eq!(doc.size(), (3, 2));
    }

    #[test]
    fn truncated_input_is_out_of_bounds() {
        let bytes = single_layer(0, &extra("x"), &RLE_CHANNEL);
        assert!(matches!(decode(&bytes[..30]), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn encoded_resources_are_read_back() {
        let doc = Document::with_size(4, 4, ColorMode::Rgb);
        let decoded = decode(&encode(&doc, &EncodeOptions::default()).unwrap()).unwrap();
        let resolution = decoded.resolution.unwrap();
        assert_eq!(resolution.horizontal_dpi(), 96.0);
        let version = decoded.version_info.unwrap();
        assert_eq!(version.writer, "Paint.NET PSD Plugin");
        assert_eq!(version.reader, "Paint.NET PSD Plugin 2.5.0");
        assert!(version.has_real_merged_data);
    }

    #[test]
    fn color_data_outside_indexed_mode_is_unsupported() {
        let mut s = ByteStream::new();
        header(&mut s, 8, 3);
        let mut bytes = s.into_bytes();
        // color mode data length, just after the 26-byte header
        bytes[29] = 4;
        bytes.extend_from_slice(&[0; 4]);
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn indexed_palette_is_planar() {
        let mut s = ByteStream::new();
        s.write_bytes(b"8BPS");
        s.write_u16(1);
        s.write_bytes(&[0; 6]);
        s.write_u16(1);
        s.write_u32(1);
        s.write_u32(1);
        s.write_u16(8);
        s.write_u16(2);
        s.write_u32(768);
        let mut planes = vec![0u8; 768];
        planes[1] = 10;
        planes[257] = 20;
        planes[513] = 30;
        s.write_bytes(&planes);
        s.write_u32(0);
        s.write_u32(0);
        let palette = decode(s.as_bytes()).unwrap().palette.unwrap();
        assert_eq!(palette.entries.len(), 256);
        assert_eq!(palette.entries[1], [10, 20, 30, 255]);
    }
}
