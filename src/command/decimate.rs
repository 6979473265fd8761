//! `decimate`: shrink every island by its outermost pixels
//!
//! Over-cured edges make parts grow slightly on resin printers. Eroding each
//! layer by one pixel per pass compensates.

use std::sync::Arc;

use clap::Args;
use image::GrayImage;

use super::registry::CommandEntry;
use super::{parse_options, CommandError, Commander};
use crate::domain::{Layer, Printable, PrintableError, Properties};
use crate::options;

/// Options for `decimate`
#[derive(Args, Debug, Clone)]
pub struct DecimateOptions {
    /// Number of pixels to remove from each island edge
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub passes: u32,
}

impl Default for DecimateOptions {
    fn default() -> Self {
        Self { passes: 1 }
    }
}

pub struct Decimate {
    options: DecimateOptions,
    rest: Vec<String>,
}

impl Decimate {
    pub fn new() -> Self {
        Self {
            options: DecimateOptions::default(),
            rest: Vec::new(),
        }
    }

    pub fn entry() -> CommandEntry {
        CommandEntry::new(
            "decimate",
            "Remove outermost pixels of all islands in each layer (reduces over-curing on edges)",
            || Box::new(Decimate::new()),
        )
        .help(|| options::help::<DecimateOptions>("decimate"))
    }
}

impl Default for Decimate {
    fn default() -> Self {
        Self::new()
    }
}

impl Commander for Decimate {
    fn name(&self) -> &'static str {
        "decimate"
    }

    fn parse(&mut self, args: &[String]) -> Result<(), CommandError> {
        let (options, rest) = parse_options::<DecimateOptions>("decimate", args)?;
        self.options = options;
        self.rest = rest;
        Ok(())
    }

    fn remaining_args(&self) -> &[String] {
        &self.rest
    }

    fn filter(self: Box<Self>, input: Box<dyn Printable>) -> Result<Box<dyn Printable>, CommandError> {
        tracing::debug!(passes = self.options.passes, "decimating layers");
        Ok(Box::new(Decimated::new(input, self.options.passes)))
    }
}

/// A printable whose layers are eroded as they are read
pub struct Decimated<P> {
    inner: P,
    passes: u32,
}

impl<P: Printable> Decimated<P> {
    pub fn new(inner: P, passes: u32) -> Self {
        Self { inner, passes }
    }
}

impl<P: Printable> Printable for Decimated<P> {
    fn properties(&self) -> &Properties {
        self.inner.properties()
    }

    fn layer(&self, index: usize) -> Result<Layer, PrintableError> {
        let mut layer = self.inner.layer(index)?;

        let mut image = erode(&layer.image);
        for _ in 1..self.passes {
            image = erode(&image);
        }
        layer.image = Arc::new(image);
        Ok(layer)
    }
}

/// One 4-neighbour erosion pass
///
/// Each pixel becomes the darkest of itself and its orthogonal neighbours.
/// Pixels outside the image count as dark, so the border is always cleared.
fn erode(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        if x == 0 || y == 0 || x + 1 >= width || y + 1 >= height {
            return image::Luma([0]);
        }

        let darkest = [(x, y), (x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
            .into_iter()
            .map(|(nx, ny)| image.get_pixel(nx, ny).0[0])
            .min()
            .unwrap_or(0);
        image::Luma([darkest])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MemoryPrintable;
    use image::Luma;

    fn square(size: u32, from: u32, to: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (from..to).contains(&x) && (from..to).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    fn lit(image: &GrayImage) -> usize {
        image.pixels().filter(|p| p.0[0] > 0).count()
    }

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn erode_removes_island_edge() {
        let eroded = erode(&square(10, 2, 7));

        assert_eq!(lit(&eroded), 9);
        assert_eq!(eroded, square(10, 3, 6));
    }

    #[test]
    fn erode_clears_image_border() {
        let full = GrayImage::from_pixel(5, 4, Luma([255]));
        let eroded = erode(&full);

        assert_eq!(lit(&eroded), 3 * 2);
        assert_eq!(eroded.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn erode_keeps_darkest_gray() {
        let mut image = GrayImage::from_pixel(3, 3, Luma([255]));
        image.put_pixel(1, 0, Luma([100]));

        assert_eq!(erode(&image).get_pixel(1, 1).0[0], 100);
    }

    #[test]
    fn passes_compound() {
        let source = MemoryPrintable::new(Properties::default(), vec![square(12, 1, 11)]);
        let decimated = Decimated::new(source, 3);

        assert_eq!(decimated.layer(0).unwrap().image.as_ref(), &square(12, 4, 8));
    }

    #[test]
    fn parse_stops_at_next_stage() {
        let mut command = Decimate::new();
        command.parse(&args(&["--passes", "2", "out.ctb"])).unwrap();

        assert_eq!(command.options.passes, 2);
        assert_eq!(command.remaining_args(), args(&["out.ctb"]).as_slice());
    }

    #[test]
    fn zero_passes_is_bad_option() {
        let mut command = Decimate::new();
        let err = command.parse(&args(&["--passes=0"])).unwrap_err();

        assert!(matches!(err, CommandError::BadOption { command: "decimate", .. }));
    }

    #[test]
    fn filter_keeps_properties_and_count() {
        let source = MemoryPrintable::new(Properties::default(), vec![square(6, 0, 6); 4]);
        let output = Box::new(Decimate::new()).filter(Box::new(source)).unwrap();

        assert_eq!(output.layer_count(), 4);
        assert_eq!(output.properties().size.x, 6);
        assert_eq!(lit(&output.layer(3).unwrap().image), 16);
    }
}
