//! `info`: print what a printable contains

use std::fmt;

use clap::Args;
use serde::Serialize;

use super::registry::CommandEntry;
use super::{parse_options, CommandError, Commander};
use crate::cli::{Output, OutputFormat};
use crate::domain::{Exposure, Printable, PrintableError};
use crate::options;

/// Options for `info`
#[derive(Args, Debug, Clone, Default)]
pub struct InfoOptions {
    /// Also list every layer
    #[arg(long)]
    pub layers: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Exposure settings in display units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExposureReport {
    pub light_on_s: f32,
    pub light_off_s: f32,
    pub pwm: u8,
    pub lift_height_mm: f32,
    pub lift_speed_mm_min: f32,
    pub retract_height_mm: f32,
    pub retract_speed_mm_min: f32,
}

impl From<&Exposure> for ExposureReport {
    fn from(exposure: &Exposure) -> Self {
        Self {
            light_on_s: exposure.light_on_time.as_secs_f32(),
            light_off_s: exposure.light_off_time.as_secs_f32(),
            pwm: exposure.light_pwm,
            lift_height_mm: exposure.lift_height,
            lift_speed_mm_min: exposure.lift_speed,
            retract_height_mm: exposure.retract_height,
            retract_speed_mm_min: exposure.retract_speed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewReport {
    pub kind: &'static str,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerReport {
    pub index: usize,
    pub z_mm: f32,
    pub light_on_s: f32,
    /// Pixels with any light at all
    pub lit_pixels: usize,
}

/// Everything `info` prints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoReport {
    pub resolution: [u32; 2],
    pub size_mm: [f32; 2],
    pub layer_count: usize,
    pub layer_height_mm: f32,
    pub exposure: ExposureReport,
    pub bottom: ExposureReport,
    pub bottom_count: usize,
    pub previews: Vec<PreviewReport>,
    pub print_time_s: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<LayerReport>>,
}

impl InfoReport {
    /// Collects the report; per-layer details read every layer
    pub fn collect(printable: &dyn Printable, with_layers: bool) -> Result<Self, PrintableError> {
        let properties = printable.properties();
        let size = &properties.size;

        let layers = if with_layers {
            let reports = (0..printable.layer_count())
                .map(|index| {
                    let layer = printable.layer(index)?;
                    Ok(LayerReport {
                        index,
                        z_mm: layer.z,
                        light_on_s: layer.exposure.light_on_time.as_secs_f32(),
                        lit_pixels: layer.image.pixels().filter(|p| p.0[0] > 0).count(),
                    })
                })
                .collect::<Result<Vec<_>, PrintableError>>()?;
            Some(reports)
        } else {
            None
        };

        Ok(Self {
            resolution: [size.x, size.y],
            size_mm: [size.millimeter_x, size.millimeter_y],
            layer_count: size.layers,
            layer_height_mm: size.layer_height,
            exposure: ExposureReport::from(&properties.exposure),
            bottom: ExposureReport::from(&properties.bottom.exposure),
            bottom_count: properties.bottom.count,
            previews: properties
                .previews
                .iter()
                .map(|(kind, image)| PreviewReport {
                    kind: kind.as_str(),
                    width: image.width(),
                    height: image.height(),
                })
                .collect(),
            print_time_s: properties.estimated_print_time(),
            layers,
        })
    }
}

fn write_exposure(f: &mut fmt::Formatter<'_>, label: &str, exposure: &ExposureReport) -> fmt::Result {
    writeln!(
        f,
        "{:<14}{:.2} s on, {:.2} s off, PWM {}",
        label, exposure.light_on_s, exposure.light_off_s, exposure.pwm
    )?;
    writeln!(
        f,
        "{:<14}{:.2} mm at {:.1} mm/min, retract {:.2} mm at {:.1} mm/min",
        "",
        exposure.lift_height_mm,
        exposure.lift_speed_mm_min,
        exposure.retract_height_mm,
        exposure.retract_speed_mm_min
    )
}

impl fmt::Display for InfoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<14}{} x {} pixels", "Resolution:", self.resolution[0], self.resolution[1])?;
        writeln!(f, "{:<14}{:.2} x {:.2} mm", "Display:", self.size_mm[0], self.size_mm[1])?;
        writeln!(f, "{:<14}{} x {:.3} mm", "Layers:", self.layer_count, self.layer_height_mm)?;
        write_exposure(f, "Exposure:", &self.exposure)?;
        writeln!(f, "{:<14}{}", "Bottom count:", self.bottom_count)?;
        write_exposure(f, "Bottom:", &self.bottom)?;

        for preview in &self.previews {
            writeln!(f, "{:<14}{} {}x{}", "Preview:", preview.kind, preview.width, preview.height)?;
        }

        let total = self.print_time_s.max(0.0).round() as u64;
        write!(
            f,
            "{:<14}{}:{:02}:{:02}",
            "Print time:",
            total / 3600,
            total / 60 % 60,
            total % 60
        )?;

        if let Some(layers) = &self.layers {
            for layer in layers {
                write!(
                    f,
                    "\nLayer {}: z {:.3} mm, {:.2} s, {} lit pixels",
                    layer.index, layer.z_mm, layer.light_on_s, layer.lit_pixels
                )?;
            }
        }
        Ok(())
    }
}

pub struct Info {
    options: InfoOptions,
    rest: Vec<String>,
}

impl Info {
    pub fn new() -> Self {
        Self {
            options: InfoOptions::default(),
            rest: Vec::new(),
        }
    }

    pub fn entry() -> CommandEntry {
        CommandEntry::new("info", "Dumps information about the printable", || {
            Box::new(Info::new())
        })
        .help(|| options::help::<InfoOptions>("info"))
    }
}

impl Default for Info {
    fn default() -> Self {
        Self::new()
    }
}

impl Commander for Info {
    fn name(&self) -> &'static str {
        "info"
    }

    fn parse(&mut self, args: &[String]) -> Result<(), CommandError> {
        let (options, rest) = parse_options::<InfoOptions>("info", args)?;
        self.options = options;
        self.rest = rest;
        Ok(())
    }

    fn remaining_args(&self) -> &[String] {
        &self.rest
    }

    fn filter(self: Box<Self>, input: Box<dyn Printable>) -> Result<Box<dyn Printable>, CommandError> {
        let report = InfoReport::collect(input.as_ref(), self.options.layers)?;

        let output = Output::new(self.options.format);
        if output.is_json() {
            output.data(&report);
        } else {
            output.text(&report.to_string());
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MemoryPrintable, PreviewKind, Properties};
    use image::{GrayImage, Luma, RgbaImage};

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> MemoryPrintable {
        let mut properties = Properties::default();
        properties.bottom.count = 1;
        properties
            .previews
            .insert(PreviewKind::Huge, RgbaImage::new(40, 30));
        let layers = vec![
            GrayImage::from_pixel(8, 4, Luma([255])),
            GrayImage::from_fn(8, 4, |x, _| if x < 2 { Luma([128]) } else { Luma([0]) }),
        ];
        MemoryPrintable::new(properties, layers)
    }

    #[test]
    fn report_describes_properties() {
        let report = InfoReport::collect(&sample(), false).unwrap();

        assert_eq!(report.resolution, [8, 4]);
        assert_eq!(report.layer_count, 2);
        assert_eq!(report.bottom_count, 1);
        assert_eq!(report.previews, vec![PreviewReport { kind: "huge", width: 40, height: 30 }]);
        assert!(report.layers.is_none());
    }

    #[test]
    fn report_counts_lit_pixels() {
        let report = InfoReport::collect(&sample(), true).unwrap();
        let layers = report.layers.unwrap();

        assert_eq!(layers[0].lit_pixels, 32);
        assert_eq!(layers[1].lit_pixels, 8);
        assert!((layers[0].light_on_s - 35.0).abs() < 1e-4);
    }

    #[test]
    fn text_lists_layers_on_request() {
        let text = InfoReport::collect(&sample(), true).unwrap().to_string();

        assert!(text.contains("Resolution:   8 x 4 pixels"), "{}", text);
        assert!(text.contains("Layer 1: z 0.100 mm"), "{}", text);
    }

    #[test]
    fn json_omits_layers_by_default() {
        let report = InfoReport::collect(&sample(), false).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["resolution"], serde_json::json!([8, 4]));
        assert!(json.get("layers").is_none());
    }

    #[test]
    fn filter_returns_input_unchanged() {
        let source = sample();
        let mut command = Box::new(Info::new());
        command.parse(&args(&["--format", "json"])).unwrap();

        let output = command.filter(Box::new(source.clone())).unwrap();
        assert_eq!(output.properties(), source.properties());
        assert_eq!(output.layer(1).unwrap(), source.layer(1).unwrap());
    }

    #[test]
    fn unknown_format_is_bad_option() {
        let mut command = Info::new();
        let err = command.parse(&args(&["--format", "yaml"])).unwrap_err();

        assert!(matches!(err, CommandError::BadOption { command: "info", .. }));
    }
}
