//! Printable domain model
//!
//! A printable is a stack of grayscale layer bitmaps plus the job-level
//! settings a masked-light resin printer needs to expose them.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use image::{GrayImage, RgbaImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrintableError {
    #[error("Layer {index} out of range (printable has {layers} layers)")]
    LayerOutOfRange { index: usize, layers: usize },

    #[error("Layer cache capacity must be at least 1 (got {0})")]
    InvalidCapacity(usize),

    #[error("Layer {index} is corrupt")]
    CorruptLayer {
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PrintableError {
    /// Wraps a decoding failure for a specific layer
    pub fn corrupt(
        index: usize,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        PrintableError::CorruptLayer {
            index,
            source: source.into(),
        }
    }
}

/// Physical and pixel dimensions of a print job
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    /// Horizontal resolution in pixels
    pub x: u32,

    /// Vertical resolution in pixels
    pub y: u32,

    /// Display width in millimetres
    pub millimeter_x: f32,

    /// Display height in millimetres
    pub millimeter_y: f32,

    /// Number of layers
    pub layers: usize,

    /// Layer height in millimetres
    pub layer_height: f32,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            x: 1440,
            y: 2560,
            millimeter_x: 68.04,
            millimeter_y: 120.96,
            layers: 0,
            layer_height: 0.05,
        }
    }
}

/// Exposure and motion settings applied to a layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exposure {
    pub light_on_time: Duration,
    pub light_off_time: Duration,

    /// UV LED power, 0-255
    pub light_pwm: u8,

    /// Lift height in millimetres
    pub lift_height: f32,

    /// Lift speed in millimetres per minute
    pub lift_speed: f32,

    /// Retract height in millimetres
    pub retract_height: f32,

    /// Retract speed in millimetres per minute
    pub retract_speed: f32,
}

impl Default for Exposure {
    fn default() -> Self {
        Self {
            light_on_time: Duration::from_secs(8),
            light_off_time: Duration::from_millis(500),
            light_pwm: 255,
            lift_height: 5.0,
            lift_speed: 60.0,
            retract_height: 0.0,
            retract_speed: 150.0,
        }
    }
}

/// Exposure settings for the first layers, which bond to the build plate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bottom {
    pub exposure: Exposure,

    /// Number of bottom layers
    pub count: usize,
}

impl Default for Bottom {
    fn default() -> Self {
        Self {
            exposure: Exposure {
                light_on_time: Duration::from_secs(35),
                lift_speed: 30.0,
                ..Exposure::default()
            },
            count: 3,
        }
    }
}

/// Which embedded preview an image is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreviewKind {
    Tiny,
    Huge,
}

impl PreviewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewKind::Tiny => "tiny",
            PreviewKind::Huge => "huge",
        }
    }
}

/// Job-level metadata of a printable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    pub size: Size,
    pub exposure: Exposure,
    pub bottom: Bottom,
    pub previews: BTreeMap<PreviewKind, RgbaImage>,
}

impl Properties {
    /// Returns the exposure that applies to a given layer
    pub fn layer_exposure(&self, index: usize) -> Exposure {
        if index < self.bottom.count {
            self.bottom.exposure
        } else {
            self.exposure
        }
    }

    /// Returns the nominal Z height of a layer, in millimetres
    pub fn layer_z(&self, index: usize) -> f32 {
        (index + 1) as f32 * self.size.layer_height
    }

    /// Checks that `index` addresses an existing layer
    pub fn check_index(&self, index: usize) -> Result<(), PrintableError> {
        if index < self.size.layers {
            Ok(())
        } else {
            Err(PrintableError::LayerOutOfRange {
                index,
                layers: self.size.layers,
            })
        }
    }

    /// Estimated print duration in seconds: exposure, light-off and lift per layer
    pub fn estimated_print_time(&self) -> f32 {
        (0..self.size.layers)
            .map(|index| {
                let exposure = self.layer_exposure(index);
                let lift = if exposure.lift_speed > 0.0 {
                    exposure.lift_height / exposure.lift_speed * 60.0
                } else {
                    0.0
                };
                exposure.light_on_time.as_secs_f32() + exposure.light_off_time.as_secs_f32() + lift
            })
            .sum()
    }
}

/// A single decoded layer
///
/// The bitmap is shared, so cloning a layer out of a cache is cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Height of the layer above the build plate, in millimetres
    pub z: f32,

    pub exposure: Exposure,

    /// 8-bit grayscale mask; 0 is dark, 255 is fully exposed
    pub image: Arc<GrayImage>,
}

/// A multi-layer print job
///
/// Layers are addressed by index `0..properties().size.layers`. Reading a
/// layer may decode it on demand, hence the fallible accessor.
pub trait Printable {
    fn properties(&self) -> &Properties;

    fn layer(&self, index: usize) -> Result<Layer, PrintableError>;

    /// Number of layers
    fn layer_count(&self) -> usize {
        self.properties().size.layers
    }
}

impl<P: Printable + ?Sized> Printable for Rc<P> {
    fn properties(&self) -> &Properties {
        (**self).properties()
    }

    fn layer(&self, index: usize) -> Result<Layer, PrintableError> {
        (**self).layer(index)
    }

    fn layer_count(&self) -> usize {
        (**self).layer_count()
    }
}

impl<P: Printable + ?Sized> Printable for Box<P> {
    fn properties(&self) -> &Properties {
        (**self).properties()
    }

    fn layer(&self, index: usize) -> Result<Layer, PrintableError> {
        (**self).layer(index)
    }

    fn layer_count(&self) -> usize {
        (**self).layer_count()
    }
}

/// A fully decoded printable held in memory
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryPrintable {
    properties: Properties,
    layers: Vec<Layer>,
}

impl MemoryPrintable {
    /// Creates a printable from layer bitmaps
    ///
    /// The layer count in `properties` is replaced by the number of images,
    /// and Z heights and exposures are derived from the properties.
    pub fn new(mut properties: Properties, images: Vec<GrayImage>) -> Self {
        properties.size.layers = images.len();
        if let Some(first) = images.first() {
            properties.size.x = first.width();
            properties.size.y = first.height();
        }

        let layers = images
            .into_iter()
            .enumerate()
            .map(|(index, image)| Layer {
                z: properties.layer_z(index),
                exposure: properties.layer_exposure(index),
                image: Arc::new(image),
            })
            .collect();

        Self { properties, layers }
    }
}

impl Printable for MemoryPrintable {
    fn properties(&self) -> &Properties {
        &self.properties
    }

    fn layer(&self, index: usize) -> Result<Layer, PrintableError> {
        self.properties.check_index(index)?;
        Ok(self.layers[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn make_printable(layers: usize) -> MemoryPrintable {
        let images = (0..layers)
            .map(|i| GrayImage::from_pixel(4, 3, Luma([i as u8 * 10])))
            .collect();
        MemoryPrintable::new(Properties::default(), images)
    }

    #[test]
    fn new_derives_size_from_images() {
        let printable = make_printable(5);
        let size = printable.properties().size;

        assert_eq!(size.layers, 5);
        assert_eq!(size.x, 4);
        assert_eq!(size.y, 3);
    }

    #[test]
    fn bottom_layers_use_bottom_exposure() {
        let printable = make_printable(5);
        let props = printable.properties().clone();

        assert_eq!(printable.layer(0).unwrap().exposure, props.bottom.exposure);
        assert_eq!(printable.layer(2).unwrap().exposure, props.bottom.exposure);
        assert_eq!(printable.layer(3).unwrap().exposure, props.exposure);
    }

    #[test]
    fn layer_z_follows_layer_height() {
        let printable = make_printable(3);
        let z = printable.layer(2).unwrap().z;

        assert!((z - 0.15).abs() < 1e-6);
    }

    #[test]
    fn print_time_counts_bottom_layers() {
        let mut properties = Properties::default();
        properties.size.layers = 4;
        properties.bottom.count = 1;
        properties.exposure.light_on_time = Duration::from_secs(2);
        properties.exposure.light_off_time = Duration::ZERO;
        properties.exposure.lift_height = 0.0;
        properties.bottom.exposure.light_on_time = Duration::from_secs(10);
        properties.bottom.exposure.light_off_time = Duration::ZERO;
        properties.bottom.exposure.lift_height = 0.0;

        assert!((properties.estimated_print_time() - 16.0).abs() < 1e-4);
    }

    #[test]
    fn out_of_range_layer_is_an_error() {
        let printable = make_printable(2);
        let err = printable.layer(2).unwrap_err();

        assert!(matches!(
            err,
            PrintableError::LayerOutOfRange { index: 2, layers: 2 }
        ));
    }

    #[test]
    fn boxed_and_shared_printables_delegate() {
        let printable = make_printable(4);
        let boxed: Box<dyn Printable> = Box::new(printable.clone());
        let shared = std::rc::Rc::new(printable.clone());

        assert_eq!(boxed.layer_count(), 4);
        assert_eq!(shared.properties(), printable.properties());
        assert_eq!(boxed.layer(3).unwrap(), printable.layer(3).unwrap());
        assert!(shared.layer(4).is_err());
    }
}
