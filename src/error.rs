use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed container data: bad magic, bad version, bad compression flag.
    #[error("malformed data at offset {offset:#x}: {message}")]
    Format { offset: usize, message: String },

    /// Well-formed input that falls outside what this codec handles.
    #[error("unsupported: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("restore_state called with no saved state")]
    Scope,

    #[error("read past end of data at offset {offset:#x} (need {need} bytes, have {have})")]
    OutOfBounds { offset: usize, need: usize, have: usize },

    #[error("invalid hex token {token:?}")]
    HexSyntax { token: String },

    #[error("channel is {found:?}, layer is {expected:?}")]
    ChannelSize { expected: (usize, usize), found: (usize, usize) },

    #[error("invalid channel order {0:?}: expected a permutation of \"ARGB\"")]
    InvalidChannelOrder(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn format(offset: usize, message: impl Into<String>) -> Self {
        Error::Format { offset, message: message.into() }
    }
}

/// Fatal string-encoding failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("unknown character {0:?}")]
    UnknownSymbol(char),

    #[error("unknown control code {0:?}")]
    UnknownControlCode(String),

    #[error("control code starting at {0:?} is never closed")]
    UnterminatedControlCode(String),

    #[error("control code {0:?} is not a hex value")]
    InvalidControlCode(String),
}

/// Non-fatal conditions collected while decoding or encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A byte with no entry in the character table; decoded as a `[XX]` placeholder.
    UnresolvedChar { offset: usize, value: u8 },
    /// A string longer than its fixed field was cut after `size` units.
    Truncated { text: String, size: usize },
    /// The declared channel length disagrees with the bytes actually consumed.
    ChannelLength { layer: usize, channel: i16, declared: usize, consumed: usize },
    /// A layer name longer than 255 bytes was cut in its Pascal-string form.
    NameTruncated { name: String },
    /// A layer lies partly at negative canvas coordinates.
    LayerOutsideCanvas { name: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::UnresolvedChar { offset, value } => write!(f, "char {value:02X} at {offset:#x} not in encoding"),
            Warning::Truncated { text, size } => write!(f, "string {text:?} too long, broken at pos {size}"),
            Warning::ChannelLength { layer, channel, declared, consumed } => {
                write!(f, "layer {layer} channel {channel}: declared {declared} bytes, consumed {consumed}")
            }
            Warning::NameTruncated { name } => write!(f, "layer name {name:?} truncated to 255 bytes"),
            Warning::LayerOutsideCanvas { name } => write!(f, "lost data in layer [{name}]"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
