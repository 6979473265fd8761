//! Domain models for uv3dp
//!
//! Contains the print job model and the layer cache, without any file I/O.

mod cache;
mod printable;

pub use cache::{CacheStats, CachedPrintable, DEFAULT_CACHED_LAYERS};
pub use printable::{
    Bottom, Exposure, Layer, MemoryPrintable, Printable, PrintableError, PreviewKind, Properties,
    Size,
};
