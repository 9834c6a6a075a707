use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::config::EncodeOptions;
use crate::document::{ColorMode, Document, Layer};
use crate::error::Error;
use crate::raster::{ChannelOrder, Raster};

fn js_error(err: Error) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[derive(Serialize)]
struct LayerSummary {
    name: String,
    x: i32,
    y: i32,
    width: usize,
    height: usize,
    visible: bool,
    channels: Vec<i16>,
}

#[derive(Serialize)]
struct DocumentSummary {
    width: usize,
    height: usize,
    color_mode: ColorMode,
    layers: Vec<LayerSummary>,
}

/// JavaScript handle on a layered document. Pixel data crosses the boundary
/// as RGBA bytes.
#[wasm_bindgen]
pub struct PsdDocument {
    doc: Document,
    options: EncodeOptions,
}

#[wasm_bindgen]
impl PsdDocument {
    #[wasm_bindgen(constructor)]
    pub fn new() -> PsdDocument {
        console_error_panic_hook::set_once();
        PsdDocument { doc: Document::new(ColorMode::Rgb), options: EncodeOptions::default() }
    }

    pub fn from_bytes(data: &[u8]) -> Result<PsdDocument, JsValue> {
        console_error_panic_hook::set_once();
        let doc = Document::from_bytes(data).map_err(js_error)?;
        Ok(PsdDocument { doc, options: EncodeOptions::default() })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, JsValue> {
        self.doc.to_bytes(&self.options).map_err(js_error)
    }

    /// Replaces the encoder options from a JSON object; missing keys keep their defaults.
    pub fn set_options(&mut self, json: &str) -> Result<(), JsValue> {
        self.options = EncodeOptions::from_json(json).map_err(js_error)?;
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.doc.width()
    }

    pub fn height(&self) -> usize {
        self.doc.height()
    }

    pub fn layer_count(&self) -> usize {
        self.doc.layers().len()
    }

    pub fn layer_name(&self, index: usize) -> Option<String> {
        self.doc.layers().get(index).map(|l| l.name().to_string())
    }

    pub fn set_layer_visible(&mut self, index: usize, visible: bool) -> bool {
        match self.doc.layers_mut().get_mut(index) {
            Some(layer) => {
                layer.set_visible(visible);
                true
            }
            None => false,
        }
    }

    pub fn remove_layer(&mut self, index: usize) -> bool {
        self.doc.remove_layer(index).is_some()
    }

    pub fn layer_rgba(&self, index: usize) -> Option<Vec<u8>> {
        self.doc.layers().get(index).map(|l| l.to_raster(ChannelOrder::RGBA).into_raw())
    }

    pub fn flatten_rgba(&self) -> Vec<u8> {
        self.doc.flatten(ChannelOrder::RGBA).into_raw()
    }

    pub fn flatten_png(&self) -> Result<Vec<u8>, JsValue> {
        self.doc.flatten(ChannelOrder::RGBA).to_png_bytes().map_err(js_error)
    }

    /// Adds an RGBA raster as a new top layer, cropped to its visible pixels.
    /// Returns false when `rgba` is not `width * height * 4` bytes.
    pub fn add_layer_from_rgba(&mut self, name: &str, x: i32, y: i32, width: usize, height: usize, rgba: Vec<u8>) -> bool {
        let Some(raster) = Raster::from_raw(width, height, rgba) else {
            return false;
        };
        self.doc.add_layer(Layer::from_raster(name, (x, y), &raster, ChannelOrder::RGBA));
        true
    }

    pub fn summary(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(&self.summary_data()).map_err(JsValue::from)
    }

    pub fn summary_json(&self) -> String {
        serde_json::to_string(&self.summary_data()).unwrap_or_default()
    }
}

impl Default for PsdDocument {
    fn default() -> Self {
        PsdDocument::new()
    }
}

impl PsdDocument {
    fn summary_data(&self) -> DocumentSummary {
        let layers = self
            .doc
            .layers()
            .iter()
            .map(|l| LayerSummary {
                name: l.name().to_string(),
                x: l.offset().0,
                y: l.offset().1,
                width: l.size().0,
                height: l.size().1,
                visible: l.is_visible(),
                channels: l.channels().iter().map(|c| c.id().0).collect(),
            })
            .collect();
        DocumentSummary { width: self.doc.width(), height: self.doc.height(), color_mode: self.doc.color_mode(), layers }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }
}

#[wasm_bindgen]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_through_the_handle() {
        let mut handle = PsdDocument::new();
        let mut rgba = vec![0u8; 3 * 2 * 4];
        rgba[4..8].copy_from_slice(&[1, 2, 3, 255]);
        assert!(handle.add_layer_from_rgba("dot", 10, 0, 3, 2, rgba));
        assert!(!handle.add_layer_from_rgba("short", 0, 0, 3, 2, vec![0; 5]));
        assert!(!handle.add_layer_from_rgba("huge", 0, 0, usize::MAX, 2, Vec::new()));

        assert_eq!(handle.layer_count(), 1);
        assert_eq!(handle.layer_name(0).as_deref(), Some("dot"));
        assert_eq!((handle.width(), handle.height()), (12, 1));
        assert_eq!(handle.layer_rgba(0).unwrap(), vec![1, 2, 3, 255]);
        assert_eq!(&handle.flatten_rgba()[44..48], &[1, 2, 3, 255]);

        assert!(handle.set_layer_visible(0, false));
        assert!(!handle.set_layer_visible(3, false));
        assert!(handle.flatten_rgba().iter().all(|&b| b == 0));
    }

    #[test]
    fn summary_lists_layers() {
        let mut handle = PsdDocument::default();
        handle.add_layer_from_rgba("a", 0, 0, 1, 1, vec![9, 9, 9, 255]);
        let summary: serde_json::Value = serde_json::from_str(&handle.summary_json()).unwrap();
        assert_eq!(summary["color_mode"], "Rgb");
        assert_eq!(summary["layers"][0]["name"], "a");
        assert_eq!(summary["layers"][0]["channels"], serde_json::json!([-1, 0, 1, 2]));
    }
}
