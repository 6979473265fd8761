//! # Print File Formats
//!
//! Codecs that decode a print file into a [`Printable`] or encode one back.
//!
//! ## Built-in Formats
//!
//! | Name | Extensions | Container |
//! |------|------------|-----------|
//! | `sl1` | `.sl1` | Zip with `config.ini` and one PNG per layer |
//! | `cbddlp` | `.cbddlp`, `.photon` | ChiTu binary, 1-bit run-length layers |
//! | `ctb` | `.ctb` | ChiTu binary, 7-bit grayscale run-length layers |
//!
//! ## Selecting a Format
//!
//! A pipeline token selects a format in one of two ways:
//!
//! ```text
//! job.cbddlp --version 1     # by extension; options follow the path
//! cbddlp --version 1 job.bin  # by name; options, then the path
//! ```
//!
//! ## Key Types
//!
//! - [`Format`] - One codec bound to one file
//! - [`FormatRegistry`] - Maps tokens to format constructors
//! - [`Target`] - The file a format instance reads or writes

mod chitu;
mod registry;
mod sl1;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::{Printable, PrintableError};

pub use chitu::{ChituFormat, ChituVariant};
pub use registry::{FormatEntry, FormatFactory, FormatRegistry, RegistryError};
pub use sl1::Sl1Format;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Unrecognized format for '{0}'")]
    Unrecognized(String),

    #[error("{format}: missing filename")]
    MissingFilename { format: &'static str },

    #[error("{format}: {message}")]
    BadOption {
        format: &'static str,
        message: String,
    },

    #[error("Failed to decode {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("Failed to encode {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
}

/// Low-level failure inside a codec
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Layer(#[from] PrintableError),

    #[error("Invalid file: {0}")]
    Invalid(String),
}

impl CodecError {
    pub fn invalid(message: impl Into<String>) -> Self {
        CodecError::Invalid(message.into())
    }
}

/// A codec bound to a single file
///
/// A format instance is single-use: after [`Format::parse`] it either
/// decodes or encodes, and both consume the instance.
pub trait Format {
    /// Registry name of this format
    fn name(&self) -> &'static str;

    /// Consumes this format's options and its filename
    fn parse(&mut self, args: &[String]) -> Result<(), FormatError>;

    /// Tokens left over after [`Format::parse`]
    fn remaining_args(&self) -> &[String];

    /// The bound file, once known
    fn path(&self) -> Option<&Path>;

    /// Reads the bound file
    fn decode(self: Box<Self>) -> Result<Box<dyn Printable>, FormatError>;

    /// Writes `printable` to the bound file
    fn encode(self: Box<Self>, printable: &dyn Printable) -> Result<(), FormatError>;
}

/// The file a format instance operates on
///
/// A path token binds the file immediately. A literal format name leaves it
/// open, and the first positional token after the options becomes the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    format: &'static str,
    path: Option<PathBuf>,
    remaining: Vec<String>,
}

impl Target {
    /// Target bound to a path token
    pub fn path(format: &'static str, path: impl Into<PathBuf>) -> Self {
        Self {
            format,
            path: Some(path.into()),
            remaining: Vec::new(),
        }
    }

    /// Target selected by format name; the path comes from the arguments
    pub fn named(format: &'static str) -> Self {
        Self {
            format,
            path: None,
            remaining: Vec::new(),
        }
    }

    /// Binds the file from the tokens left after option parsing
    pub fn bind(&mut self, mut rest: Vec<String>) -> Result<(), FormatError> {
        if self.path.is_none() {
            if rest.is_empty() {
                return Err(FormatError::MissingFilename {
                    format: self.format,
                });
            }
            self.path = Some(PathBuf::from(rest.remove(0)));
        }
        self.remaining = rest;
        Ok(())
    }

    pub fn file(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn remaining(&self) -> &[String] {
        &self.remaining
    }

    /// Returns the bound path or reports a missing filename
    pub fn require(&self) -> Result<&Path, FormatError> {
        self.file().ok_or(FormatError::MissingFilename {
            format: self.format,
        })
    }

    pub fn bad_option(&self, message: String) -> FormatError {
        FormatError::BadOption {
            format: self.format,
            message,
        }
    }

    pub fn decode_error(&self, source: impl Into<CodecError>) -> FormatError {
        FormatError::Decode {
            path: self.path.clone().unwrap_or_default(),
            source: source.into(),
        }
    }

    pub fn encode_error(&self, source: impl Into<CodecError>) -> FormatError {
        FormatError::Encode {
            path: self.path.clone().unwrap_or_default(),
            source: source.into(),
        }
    }
}
