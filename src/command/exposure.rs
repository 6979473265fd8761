//! `exposure`: alter exposure and lift settings
//!
//! Settings that are not given keep their current values. Per-layer
//! exposures are recomputed from the resulting bottom/normal split.

use std::time::Duration;

use clap::Args;

use super::registry::CommandEntry;
use super::{parse_options, CommandError, Commander};
use crate::domain::{Layer, Printable, PrintableError, Properties};
use crate::options;

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f32 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    Duration::try_from_secs_f32(seconds).map_err(|_| format!("'{}' is not a valid duration", value))
}

fn parse_non_negative(value: &str) -> Result<f32, String> {
    match value.parse::<f32>() {
        Ok(number) if number >= 0.0 && number.is_finite() => Ok(number),
        _ => Err(format!("'{}' is not a non-negative number", value)),
    }
}

/// Options for `exposure`
#[derive(Args, Debug, Clone, Default)]
pub struct ExposureOptions {
    /// Normal layer light-on time, in seconds
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds)]
    pub normal: Option<Duration>,

    /// Bottom layer light-on time, in seconds
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds)]
    pub bottom: Option<Duration>,

    /// Light-off delay between layers, in seconds
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds)]
    pub light_off: Option<Duration>,

    /// Number of bottom layers
    #[arg(long, value_name = "LAYERS")]
    pub bottom_count: Option<usize>,

    /// Lift height, in millimetres
    #[arg(long, value_name = "MM", value_parser = parse_non_negative)]
    pub lift_height: Option<f32>,

    /// Lift speed, in millimetres per minute
    #[arg(long, value_name = "MM_PER_MIN", value_parser = parse_non_negative)]
    pub lift_speed: Option<f32>,

    /// Retract height, in millimetres
    #[arg(long, value_name = "MM", value_parser = parse_non_negative)]
    pub retract_height: Option<f32>,

    /// Retract speed, in millimetres per minute
    #[arg(long, value_name = "MM_PER_MIN", value_parser = parse_non_negative)]
    pub retract_speed: Option<f32>,

    /// Light PWM level (0-255)
    #[arg(long, value_name = "LEVEL")]
    pub pwm: Option<u8>,
}

impl ExposureOptions {
    /// Applies the given settings to `properties`
    pub fn apply(&self, properties: &mut Properties) {
        let exposure = &mut properties.exposure;
        if let Some(normal) = self.normal {
            exposure.light_on_time = normal;
        }
        if let Some(light_off) = self.light_off {
            exposure.light_off_time = light_off;
        }
        if let Some(height) = self.lift_height {
            exposure.lift_height = height;
        }
        if let Some(speed) = self.lift_speed {
            exposure.lift_speed = speed;
        }
        if let Some(height) = self.retract_height {
            exposure.retract_height = height;
        }
        if let Some(speed) = self.retract_speed {
            exposure.retract_speed = speed;
        }
        if let Some(pwm) = self.pwm {
            exposure.light_pwm = pwm;
        }

        let bottom = &mut properties.bottom;
        if let Some(time) = self.bottom {
            bottom.exposure.light_on_time = time;
        }
        if let Some(count) = self.bottom_count {
            bottom.count = count;
        }
    }
}

pub struct ExposureCommand {
    options: ExposureOptions,
    rest: Vec<String>,
}

impl ExposureCommand {
    pub fn new() -> Self {
        Self {
            options: ExposureOptions::default(),
            rest: Vec::new(),
        }
    }

    pub fn entry() -> CommandEntry {
        CommandEntry::new("exposure", "Alters exposure times", || {
            Box::new(ExposureCommand::new())
        })
        .help(|| options::help::<ExposureOptions>("exposure"))
    }
}

impl Default for ExposureCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl Commander for ExposureCommand {
    fn name(&self) -> &'static str {
        "exposure"
    }

    fn parse(&mut self, args: &[String]) -> Result<(), CommandError> {
        let (options, rest) = parse_options::<ExposureOptions>("exposure", args)?;
        self.options = options;
        self.rest = rest;
        Ok(())
    }

    fn remaining_args(&self) -> &[String] {
        &self.rest
    }

    fn filter(self: Box<Self>, input: Box<dyn Printable>) -> Result<Box<dyn Printable>, CommandError> {
        let mut properties = input.properties().clone();
        self.options.apply(&mut properties);
        tracing::debug!(
            normal = ?properties.exposure.light_on_time,
            bottom = ?properties.bottom.exposure.light_on_time,
            bottom_count = properties.bottom.count,
            "updated exposure"
        );

        Ok(Box::new(Exposed::new(input, properties)))
    }
}

/// A printable with replaced properties
///
/// Layer images come from the wrapped printable unchanged; each layer's
/// exposure follows the replacement properties.
pub struct Exposed<P> {
    inner: P,
    properties: Properties,
}

impl<P: Printable> Exposed<P> {
    pub fn new(inner: P, properties: Properties) -> Self {
        Self { inner, properties }
    }
}

impl<P: Printable> Printable for Exposed<P> {
    fn properties(&self) -> &Properties {
        &self.properties
    }

    fn layer(&self, index: usize) -> Result<Layer, PrintableError> {
        let mut layer = self.inner.layer(index)?;
        layer.exposure = self.properties.layer_exposure(index);
        Ok(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MemoryPrintable;
    use image::{GrayImage, Luma};

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    fn source(layers: usize) -> MemoryPrintable {
        let mut properties = Properties::default();
        properties.bottom.count = 2;
        MemoryPrintable::new(properties, vec![GrayImage::from_pixel(4, 4, Luma([255])); layers])
    }

    fn run(options: &[&str], input: MemoryPrintable) -> Box<dyn Printable> {
        let mut command = Box::new(ExposureCommand::new());
        command.parse(&args(options)).unwrap();
        command.filter(Box::new(input)).unwrap()
    }

    #[test]
    fn normal_exposure_is_replaced() {
        let output = run(&["--normal=8"], source(4));
        let properties = output.properties();

        assert_eq!(properties.exposure.light_on_time, Duration::from_secs(8));
        assert_eq!(output.layer(3).unwrap().exposure.light_on_time, Duration::from_secs(8));
    }

    #[test]
    fn unspecified_settings_are_kept() {
        let input = source(3);
        let before = input.properties().clone();
        let output = run(&["--normal=2.5"], input);
        let after = output.properties();

        assert_eq!(after.exposure.light_on_time, Duration::from_millis(2500));
        assert_eq!(after.bottom, before.bottom);
        assert_eq!(after.size, before.size);
        assert_eq!(after.exposure.lift_height, before.exposure.lift_height);
    }

    #[test]
    fn bottom_count_moves_the_split() {
        let output = run(&["--bottom=30", "--bottom-count", "1"], source(3));

        assert_eq!(output.layer(0).unwrap().exposure.light_on_time, Duration::from_secs(30));
        assert_eq!(
            output.layer(1).unwrap().exposure,
            output.properties().exposure
        );
    }

    #[test]
    fn layer_images_pass_through() {
        let output = run(&["--pwm", "128"], source(2));

        assert_eq!(output.properties().exposure.light_pwm, 128);
        assert_eq!(output.layer(1).unwrap().image.as_raw(), &vec![255u8; 16]);
    }

    #[test]
    fn malformed_values_are_bad_options() {
        let mut command = ExposureCommand::new();

        let err = command.parse(&args(&["--normal=fast"])).unwrap_err();
        assert!(err.to_string().contains("fast"), "{}", err);

        assert!(command.parse(&args(&["--lift-speed=-3"])).is_err());
        assert!(command.parse(&args(&["--pwm=300"])).is_err());
    }

    #[test]
    fn parse_stops_at_output_token() {
        let mut command = ExposureCommand::new();
        command.parse(&args(&["--normal=5", "job2.ctb"])).unwrap();

        assert_eq!(command.remaining_args(), args(&["job2.ctb"]).as_slice());
    }
}
