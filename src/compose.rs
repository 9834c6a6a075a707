//! Flattening of a layer stack into one raster.

use crate::document::Layer;
use crate::raster::{ChannelOrder, Raster};

/// Paints visible layers bottom to top onto an all-zero canvas of `size`.
///
/// No blending: a layer pixel with non-zero alpha replaces the canvas pixel
/// outright, a zero-alpha pixel leaves it as is. Parts of a layer outside the
/// canvas are clipped.
pub fn flatten(layers: &[Layer], size: (usize, usize), order: ChannelOrder) -> Raster {
    let (width, height) = size;
    let mut canvas = Raster::new(width, height);
    for layer in layers.iter().filter(|l| l.is_visible()) {
        let pixels = layer.to_raster(order);
        let (x0, y0) = layer.offset();
        for ly in 0..pixels.height() {
            let Some(cy) = canvas_coord(y0, ly, height) else { continue };
            for lx in 0..pixels.width() {
                let Some(cx) = canvas_coord(x0, lx, width) else { continue };
                let pixel = pixels.pixel(lx, ly);
                if pixel[order.alpha] != 0 {
                    canvas.set_pixel(cx, cy, pixel);
                }
            }
        }
        log::trace!("flattened layer {:?} at {:?}", layer.name(), layer.offset());
    }
    canvas
}

fn canvas_coord(origin: i32, local: usize, extent: usize) -> Option<usize> {
    let c = i64::from(origin) + local as i64;
    (c >= 0 && (c as u64) < extent as u64).then_some(c as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Channel, ChannelId};

    fn layer(name: &str, offset: (i32, i32), size: (usize, usize), rgba: [u8; 4]) -> Layer {
        let n = size.0 * size.1;
        let channels = ChannelId::RGB_LAYER
            .iter()
            .map(|&id| {
                let v = rgba[ChannelOrder::RGBA.position(id).unwrap()];
                Channel::from_raw(id, size.0, size.1, vec![v; n]).unwrap()
            })
            .collect();
        Layer::from_channels(name, offset, size, channels).unwrap()
    }

    #[test]
    fn opaque_top_layer_overwrites_overlap() {
        let bottom = layer("bottom", (0, 0), (3, 3), [1, 2, 3, 255]);
        let top = layer("top", (1, 1), (2, 2), [9, 9, 9, 255]);
        let out = flatten(&[bottom, top], (3, 3), ChannelOrder::RGBA);
        assert_eq!(out.pixel(0, 0), [1, 2, 3, 255]);
        assert_eq!(out.pixel(1, 1), [9, 9, 9, 255]);
        assert_eq!(out.pixel(2, 2), [9, 9, 9, 255]);
        assert_eq!(out.pixel(2, 0), [1, 2, 3, 255]);
    }

    #[test]
    fn transparent_layer_changes_nothing() {
        let bottom = layer("bottom", (0, 0), (2, 2), [1, 2, 3, 255]);
        let ghost = layer("ghost", (0, 0), (2, 2), [200, 200, 200, 0]);
        let alone = flatten(&[bottom.clone()], (2, 2), ChannelOrder::RGBA);
        let with_ghost = flatten(&[bottom, ghost], (2, 2), ChannelOrder::RGBA);
        assert_eq!(alone, with_ghost);
    }

    #[test]
    fn hidden_layers_are_skipped_and_partial_alpha_overwrites() {
        let bottom = layer("bottom", (0, 0), (1, 1), [1, 1, 1, 255]);
        let mut hidden = layer("hidden", (0, 0), (1, 1), [5, 5, 5, 255]);
        hidden.hide();
        let out = flatten(&[bottom.clone(), hidden], (1, 1), ChannelOrder::RGBA);
        assert_eq!(out.pixel(0, 0), [1, 1, 1, 255]);

        let faint = layer("faint", (0, 0), (1, 1), [7, 7, 7, 1]);
        let out = flatten(&[bottom, faint], (1, 1), ChannelOrder::RGBA);
        assert_eq!(out.pixel(0, 0), [7, 7, 7, 1]);
    }

    #[test]
    fn layers_are_clipped_to_canvas() {
        let wide = layer("wide", (-1, -1), (4, 4), [3, 3, 3, 255]);
        let out = flatten(&[wide], (2, 2), ChannelOrder::ARGB);
        assert_eq!(out.width(), 2);
        assert!(out.data().chunks(4).all(|px| px == [255, 3, 3, 3]));
    }

    #[test]
    fn empty_stack_is_transparent() {
        let out = flatten(&[], (2, 1), ChannelOrder::RGBA);
        assert_eq!(out.data(), &[0; 8]);
    }
}
