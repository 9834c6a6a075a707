pub mod bindings;
pub mod compose;
pub mod config;
pub mod decode;
pub mod document;
pub mod encode;
pub mod error;
pub mod hex;
pub mod io;
pub mod raster;
pub mod rle;
pub mod stream;
pub mod text;

pub use bindings::PsdDocument;
pub use compose::flatten;
pub use config::EncodeOptions;
pub use decode::{decode, decode_with_warnings};
pub use document::{Channel, ChannelId, ColorMode, Document, Layer, Palette, ResolutionInfo, VersionInfo};
pub use encode::{encode, encode_with_warnings};
pub use error::{EncodeError, Error, Result, Warning};
pub use io::load_png;
pub use raster::{bounding_box_and_crop, ChannelOrder, Raster, Rect};
pub use stream::{ByteStream, Cursor};
pub use text::{CharTable, CodeTable, DirectTable, ReadStringOptions, UnitWidth, WriteStringOptions};
