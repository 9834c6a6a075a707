use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::ChannelId;
use crate::error::{Error, Result};

/// Rectangle in canvas coordinates, edges exclusive on the bottom/right side.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Rect {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

impl Rect {
    pub fn new(top: i32, left: i32, bottom: i32, right: i32) -> Self {
        Rect { top, left, bottom, right }
    }

    /// Computed in `i64` so that no pair of `i32` edges can overflow.
    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// Byte position of each component inside a 4-byte pixel, written as a label
/// such as `"ARGB"` (alpha first) or `"RGBA"`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChannelOrder {
    pub alpha: usize,
    pub red: usize,
    pub green: usize,
    pub blue: usize,
}

impl ChannelOrder {
    /// Order used for channel assignment inside the container.
    pub const ARGB: ChannelOrder = ChannelOrder { alpha: 0, red: 1, green: 2, blue: 3 };
    /// Order of rasters exchanged with image codecs.
    pub const RGBA: ChannelOrder = ChannelOrder { red: 0, green: 1, blue: 2, alpha: 3 };

    pub fn parse(label: &str) -> Result<Self> {
        let find = |c: char| label.find(c);
        let invalid = || Error::InvalidChannelOrder(label.to_string());
        if label.len() != 4 {
            return Err(invalid());
        }
        let order = ChannelOrder {
            alpha: find('A').ok_or_else(invalid)?,
            red: find('R').ok_or_else(invalid)?,
            green: find('G').ok_or_else(invalid)?,
            blue: find('B').ok_or_else(invalid)?,
        };
        Ok(order)
    }

    pub fn position(&self, id: ChannelId) -> Option<usize> {
        match id {
            ChannelId::ALPHA => Some(self.alpha),
            ChannelId::RED => Some(self.red),
            ChannelId::GREEN => Some(self.green),
            ChannelId::BLUE => Some(self.blue),
            _ => None,
        }
    }
}

impl Default for ChannelOrder {
    fn default() -> Self {
        ChannelOrder::ARGB
    }
}

impl FromStr for ChannelOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ChannelOrder::parse(s)
    }
}

/// Row-major raster with 4 interleaved bytes per pixel.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Raster {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Raster {
    /// Fully transparent (all zero) raster.
    ///
    /// # Panics
    ///
    /// If `width * height * 4` overflows `usize`.
    pub fn new(width: usize, height: usize) -> Self {
        Raster { width, height, data: vec![0; width * height * 4] }
    }

    /// `None` unless `data` holds exactly `width * height * 4` bytes.
    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        let len = width.checked_mul(height)?.checked_mul(4)?;
        (data.len() == len).then_some(Raster { width, height, data })
    }

    pub fn width(&self) -> usize { self.width }
    pub fn height(&self) -> usize { self.height }
    pub fn data(&self) -> &[u8] { &self.data }
    pub fn into_raw(self) -> Vec<u8> { self.data }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let i = (y * self.width + x) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, pixel: [u8; 4]) {
        let i = (y * self.width + x) * 4;
        self.data[i..i + 4].copy_from_slice(&pixel);
    }

    fn is_clear(&self, x: usize, y: usize) -> bool {
        self.pixel(x, y) == [0; 4]
    }

    /// Copies the pixels of `rect`, which must lie inside the raster.
    pub fn crop(&self, rect: Rect) -> Raster {
        if rect.is_empty() {
            return Raster::new(0, 0);
        }
        let (left, right) = (rect.left as usize, rect.right as usize);
        let mut data = Vec::with_capacity((right - left) * rect.height() as usize * 4);
        for y in rect.top as usize..rect.bottom as usize {
            let row = y * self.width * 4;
            data.extend_from_slice(&self.data[row + left * 4..row + right * 4]);
        }
        Raster { width: right - left, height: rect.height() as usize, data }
    }
}

/// Trims fully zero rows and columns from every edge. A pixel counts as
/// non-empty when any of its 4 bytes is non-zero. An all-zero raster yields
/// an empty rectangle and a 0x0 raster.
pub fn bounding_box_and_crop(raster: &Raster) -> (Rect, Raster) {
    let (w, h) = (raster.width, raster.height);
    let row_clear = |y: usize| (0..w).all(|x| raster.is_clear(x, y));
    let col_clear = |x: usize| (0..h).all(|y| raster.is_clear(x, y));

    let Some(top) = (0..h).find(|&y| !row_clear(y)) else {
        return (Rect::default(), Raster::new(0, 0));
    };
    // A non-empty row exists, so every search below succeeds.
    let bottom = (0..h).rev().find(|&y| !row_clear(y)).map_or(h, |y| y + 1);
    let left = (0..w).find(|&x| !col_clear(x)).unwrap_or(0);
    let right = (0..w).rev().find(|&x| !col_clear(x)).map_or(w, |x| x + 1);

    let rect = Rect::new(top as i32, left as i32, bottom as i32, right as i32);
    (rect, raster.crop(rect))
}
