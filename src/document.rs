use serde::{Deserialize, Serialize};

use crate::compose;
use crate::error::{Error, Result, Warning};
use crate::raster::{bounding_box_and_crop, ChannelOrder, Raster, Rect};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Bitmap = 0,
    Grayscale = 1,
    Indexed = 2,
    Rgb = 3,
    Cmyk = 4,
    Multichannel = 7,
    Duotone = 8,
    Lab = 9,
}

impl ColorMode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ColorMode::Bitmap),
            1 => Some(ColorMode::Grayscale),
            2 => Some(ColorMode::Indexed),
            3 => Some(ColorMode::Rgb),
            4 => Some(ColorMode::Cmyk),
            7 => Some(ColorMode::Multichannel),
            8 => Some(ColorMode::Duotone),
            9 => Some(ColorMode::Lab),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Channel tag: `-1` alpha, `0..=2` red/green/blue, below `-1` masks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub i16);

impl ChannelId {
    pub const ALPHA: ChannelId = ChannelId(-1);
    pub const RED: ChannelId = ChannelId(0);
    pub const GREEN: ChannelId = ChannelId(1);
    pub const BLUE: ChannelId = ChannelId(2);

    /// Channel order of an RGB layer.
    pub const RGB_LAYER: [ChannelId; 4] = [Self::ALPHA, Self::RED, Self::GREEN, Self::BLUE];

    pub fn is_mask(self) -> bool {
        self.0 < -1
    }
}

/// One 8-bit plane, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    id: ChannelId,
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Channel {
    /// `None` unless `data` holds exactly `width * height` bytes.
    pub fn from_raw(id: ChannelId, width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        (width.checked_mul(height) == Some(data.len())).then_some(Channel { id, width, height, data })
    }

    pub fn id(&self) -> ChannelId { self.id }
    pub fn width(&self) -> usize { self.width }
    pub fn height(&self) -> usize { self.height }
    pub fn data(&self) -> &[u8] { &self.data }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    pub fn row(&self, y: usize) -> &[u8] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    /// Length of the raw channel record: the compression word plus the plane.
    pub fn encoded_len(&self) -> usize {
        self.data.len() + 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    name: String,
    x: i32,
    y: i32,
    width: usize,
    height: usize,
    visible: bool,
    channels: Vec<Channel>,
}

impl Layer {
    /// Every channel must be exactly `size`.
    pub fn from_channels(name: impl Into<String>, offset: (i32, i32), size: (usize, usize), channels: Vec<Channel>) -> Result<Self> {
        if let Some(c) = channels.iter().find(|c| (c.width, c.height) != size) {
            return Err(Error::ChannelSize { expected: size, found: (c.width, c.height) });
        }
        Ok(Layer { name: name.into(), x: offset.0, y: offset.1, width: size.0, height: size.1, visible: true, channels })
    }

    /// Builds an RGB layer from the bounding box of `raster`'s non-empty
    /// pixels; `offset` is shifted by the trimmed margins.
    pub fn from_raster(name: impl Into<String>, offset: (i32, i32), raster: &Raster, order: ChannelOrder) -> Self {
        let (rect, cropped) = bounding_box_and_crop(raster);
        let (w, h) = (cropped.width(), cropped.height());
        let channels = ChannelId::RGB_LAYER
            .iter()
            .map(|&id| {
                let pos = order.position(id).unwrap_or(0);
                let plane = cropped.data().chunks_exact(4).map(|px| px[pos]).collect();
                Channel { id, width: w, height: h, data: plane }
            })
            .collect();
        Layer {
            name: name.into(),
            x: offset.0.saturating_add(rect.left),
            y: offset.1.saturating_add(rect.top),
            width: w,
            height: h,
            visible: true,
            channels,
        }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn set_name(&mut self, name: impl Into<String>) { self.name = name.into(); }
    pub fn offset(&self) -> (i32, i32) { (self.x, self.y) }
    pub fn size(&self) -> (usize, usize) { (self.width, self.height) }
    pub fn is_visible(&self) -> bool { self.visible }
    pub fn set_visible(&mut self, visible: bool) { self.visible = visible; }
    pub fn hide(&mut self) { self.visible = false; }
    pub fn show(&mut self) { self.visible = true; }
    pub fn channels(&self) -> &[Channel] { &self.channels }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn bounding_box(&self) -> Rect {
        let extent = |origin: i32, len: usize| origin.saturating_add(i32::try_from(len).unwrap_or(i32::MAX));
        Rect::new(self.y, self.x, extent(self.y, self.height), extent(self.x, self.width))
    }

    /// Interleaves the channels into one raster. A missing alpha channel reads
    /// as opaque, a missing color channel as zero.
    pub fn to_raster(&self, order: ChannelOrder) -> Raster {
        let mut data = vec![0u8; self.width * self.height * 4];
        if self.channel(ChannelId::ALPHA).is_none() {
            data.iter_mut().skip(order.alpha).step_by(4).for_each(|a| *a = 255);
        }
        for channel in &self.channels {
            let Some(pos) = order.position(channel.id) else { continue };
            for (i, &v) in channel.data.iter().enumerate() {
                data[i * 4 + pos] = v;
            }
        }
        Raster::from_raw(self.width, self.height, data).unwrap_or_default()
    }
}

/// 256 RGBA entries, alpha always 255.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub entries: Vec<[u8; 4]>,
}

/// Image resource 0x03ED. Resolutions are 16.16 fixed point.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionInfo {
    pub h_res: u32,
    pub h_res_unit: u16,
    pub width_unit: u16,
    pub v_res: u32,
    pub v_res_unit: u16,
    pub height_unit: u16,
}

impl ResolutionInfo {
    /// Pixels per inch on both axes.
    pub fn with_dpi(dpi: u16) -> Self {
        let fixed = u32::from(dpi) << 16;
        ResolutionInfo { h_res: fixed, h_res_unit: 1, width_unit: 1, v_res: fixed, v_res_unit: 1, height_unit: 1 }
    }

    pub fn horizontal_dpi(&self) -> f64 {
        f64::from(self.h_res) / 65536.0
    }

    pub fn vertical_dpi(&self) -> f64 {
        f64::from(self.v_res) / 65536.0
    }
}

/// Image resource 0x0421.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: u32,
    pub has_real_merged_data: bool,
    pub writer: String,
    pub reader: String,
    pub file_version: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    width: usize,
    height: usize,
    color_mode: ColorMode,
    layers: Vec<Layer>,
    pub palette: Option<Palette>,
    pub resolution: Option<ResolutionInfo>,
    pub version_info: Option<VersionInfo>,
}

impl Default for Document {
    fn default() -> Self {
        Document::new(ColorMode::Rgb)
    }
}

impl Document {
    /// Empty 0x0 canvas; it grows as layers are added.
    pub fn new(color_mode: ColorMode) -> Self {
        Document::with_size(0, 0, color_mode)
    }

    pub fn with_size(width: usize, height: usize, color_mode: ColorMode) -> Self {
        Document { width, height, color_mode, layers: Vec::new(), palette: None, resolution: None, version_info: None }
    }

    pub fn width(&self) -> usize { self.width }
    pub fn height(&self) -> usize { self.height }
    pub fn size(&self) -> (usize, usize) { (self.width, self.height) }
    pub fn color_mode(&self) -> ColorMode { self.color_mode }
    pub fn layers(&self) -> &[Layer] { &self.layers }
    pub fn layers_mut(&mut self) -> &mut [Layer] { &mut self.layers }

    /// Appends on top. The canvas widens to the layer's bottom/right edge and
    /// never shrinks again, not even on removal.
    pub fn add_layer(&mut self, layer: Layer) -> Option<Warning> {
        let rect = layer.bounding_box();
        self.width = self.width.max(rect.right.max(0) as usize);
        self.height = self.height.max(rect.bottom.max(0) as usize);
        let warning = (rect.top < 0 || rect.left < 0).then(|| Warning::LayerOutsideCanvas { name: layer.name.clone() });
        if let Some(w) = &warning {
            log::warn!("{w}");
        }
        self.layers.push(layer);
        warning
    }

    pub(crate) fn push_decoded(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn remove_layer(&mut self, index: usize) -> Option<Layer> {
        (index < self.layers.len()).then(|| self.layers.remove(index))
    }

    pub fn remove_layer_by_name(&mut self, name: &str) -> Option<Layer> {
        let index = self.layers.iter().position(|l| l.name == name)?;
        self.remove_layer(index)
    }

    pub fn layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn layer_by_name_mut(&mut self, name: &str) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.name == name)
    }

    /// Visible layers painted bottom to top onto a transparent canvas.
    pub fn flatten(&self, order: ChannelOrder) -> Raster {
        compose::flatten(&self.layers, self.size(), order)
    }
}
