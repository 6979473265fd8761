//! Prusa SL1 print archives
//!
//! An SL1 file is a zip archive containing:
//! - `config.ini`: job settings (exposure times, layer counts)
//! - `prusaslicer.ini`: printer settings (display resolution and size)
//! - `thumbnail/thumbnailWxH.png`: previews
//! - `<jobDir>00000.png` ...: one grayscale PNG per layer
//!
//! Layer PNGs stay compressed in memory and are decoded on demand.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use image::{GrayImage, ImageFormat, RgbaImage};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::registry::FormatEntry;
use super::{CodecError, Format, FormatError, Target};
use crate::domain::{Layer, PreviewKind, Printable, PrintableError, Properties};
use crate::options;

const DEFAULT_JOB_DIR: &str = "uv3dp";

/// PrusaSlicer's small thumbnail is 400x400
const TINY_PREVIEW_PIXELS: u32 = 400 * 400;

/// Options for the `sl1` format
#[derive(Args, Debug, Clone, Default)]
pub struct Sl1Options {
    /// Material name recorded in config.ini
    #[arg(long, value_name = "NAME")]
    pub material_name: Option<String>,

    /// Printer profile recorded in config.ini
    #[arg(long, value_name = "NAME")]
    pub printer_profile: Option<String>,
}

/// SL1 codec bound to one archive
pub struct Sl1Format {
    target: Target,
    options: Sl1Options,
}

impl Sl1Format {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            options: Sl1Options::default(),
        }
    }

    /// Registry entry for this format
    pub fn entry() -> FormatEntry {
        FormatEntry::new("sl1", "Prusa SL1 print archive", |target| {
            Box::new(Sl1Format::new(target))
        })
        .extension("sl1")
        .help(|| options::help::<Sl1Options>("sl1"))
    }
}

impl Format for Sl1Format {
    fn name(&self) -> &'static str {
        "sl1"
    }

    fn parse(&mut self, args: &[String]) -> Result<(), FormatError> {
        let (options, rest) = options::parse::<Sl1Options>("sl1", args)
            .map_err(|message| self.target.bad_option(message))?;
        self.target.bind(rest)?;
        self.options = options;
        Ok(())
    }

    fn remaining_args(&self) -> &[String] {
        self.target.remaining()
    }

    fn path(&self) -> Option<&Path> {
        self.target.file()
    }

    fn decode(self: Box<Self>) -> Result<Box<dyn Printable>, FormatError> {
        let path = self.target.require()?.to_path_buf();
        tracing::debug!(path = %path.display(), "reading SL1 archive");

        let printable = read_archive(&path).map_err(|e| self.target.decode_error(e))?;
        Ok(Box::new(printable))
    }

    fn encode(self: Box<Self>, printable: &dyn Printable) -> Result<(), FormatError> {
        let path = self.target.require()?.to_path_buf();
        tracing::debug!(path = %path.display(), "writing SL1 archive");

        write_archive(&path, printable, &self.options).map_err(|e| self.target.encode_error(e))
    }
}

/// A decoded SL1 archive
pub struct Sl1Printable {
    properties: Properties,
    /// Compressed PNG data per layer
    layers: Vec<Vec<u8>>,
}

impl Printable for Sl1Printable {
    fn properties(&self) -> &Properties {
        &self.properties
    }

    fn layer(&self, index: usize) -> Result<Layer, PrintableError> {
        self.properties.check_index(index)?;

        let image = decode_png(&self.layers[index])
            .map_err(|e| PrintableError::corrupt(index, e))?
            .into_luma8();

        Ok(Layer {
            z: self.properties.layer_z(index),
            exposure: self.properties.layer_exposure(index),
            image: Arc::new(image),
        })
    }
}

/// Flat `key = value` settings file
#[derive(Debug, Default)]
struct IniFile {
    values: BTreeMap<String, String>,
}

impl IniFile {
    fn parse(text: &str) -> Self {
        let values = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();

        Self { values }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn number<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, CodecError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| CodecError::invalid(format!("{} has invalid value '{}'", key, raw))),
        }
    }

    fn seconds(&self, key: &str) -> Result<Option<Duration>, CodecError> {
        match self.number::<f32>(key)? {
            None => Ok(None),
            Some(secs) => Duration::try_from_secs_f32(secs)
                .map(Some)
                .map_err(|_| CodecError::invalid(format!("{} must be a positive duration", key))),
        }
    }
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, CodecError> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            Ok(Some(data))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn decode_png(data: &[u8]) -> Result<image::DynamicImage, image::ImageError> {
    image::load_from_memory_with_format(data, ImageFormat::Png)
}

fn encode_png<P>(image: &image::ImageBuffer<P, Vec<P::Subpixel>>) -> Result<Vec<u8>, CodecError>
where
    P: image::Pixel + image::PixelWithColorType,
    [P::Subpixel]: image::EncodableLayout,
{
    let mut data = Cursor::new(Vec::new());
    image.write_to(&mut data, ImageFormat::Png)?;
    Ok(data.into_inner())
}

fn read_archive(path: &Path) -> Result<Sl1Printable, CodecError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    let config = read_entry(&mut archive, "config.ini")?
        .map(|data| IniFile::parse(&String::from_utf8_lossy(&data)))
        .ok_or_else(|| CodecError::invalid("missing config.ini"))?;
    let slicer = read_entry(&mut archive, "prusaslicer.ini")?
        .map(|data| IniFile::parse(&String::from_utf8_lossy(&data)))
        .unwrap_or_default();

    let mut properties = Properties::default();

    let fast: usize = config.number("numFast")?.unwrap_or(0);
    let slow: usize = config.number("numSlow")?.unwrap_or(0);
    // Every layer is its own archive entry
    properties.size.layers = fast
        .checked_add(slow)
        .filter(|layers| *layers <= archive.len())
        .ok_or_else(|| {
            CodecError::invalid(format!(
                "numFast {} and numSlow {} exceed the archive's {} entries",
                fast,
                slow,
                archive.len()
            ))
        })?;
    if let Some(height) = config.number("layerHeight")? {
        properties.size.layer_height = height;
    }
    if let Some(time) = config.seconds("expTime")? {
        properties.exposure.light_on_time = time;
    }
    if let Some(time) = config.seconds("expTimeFirst")? {
        properties.bottom.exposure.light_on_time = time;
    }
    if let Some(count) = config.number("numFade")? {
        properties.bottom.count = count;
    }

    if let Some(x) = slicer.number("display_pixels_x")? {
        properties.size.x = x;
    }
    if let Some(y) = slicer.number("display_pixels_y")? {
        properties.size.y = y;
    }
    if let Some(width) = slicer.number("display_width")? {
        properties.size.millimeter_x = width;
    }
    if let Some(height) = slicer.number("display_height")? {
        properties.size.millimeter_y = height;
    }
    if slicer.get("display_orientation") == Some("portrait") {
        let size = &mut properties.size;
        std::mem::swap(&mut size.x, &mut size.y);
        std::mem::swap(&mut size.millimeter_x, &mut size.millimeter_y);
    }

    let job_dir = config.get("jobDir").unwrap_or(DEFAULT_JOB_DIR).to_string();
    let mut layers = Vec::with_capacity(properties.size.layers);
    for index in 0..properties.size.layers {
        let name = layer_name(&job_dir, index);
        let data = read_entry(&mut archive, &name)?
            .ok_or_else(|| CodecError::invalid(format!("missing layer image {}", name)))?;
        layers.push(data);
    }

    // Without printer settings, trust the first layer for the resolution
    if slicer.get("display_pixels_x").is_none() {
        if let Some(first) = layers.first() {
            let image = decode_png(first)?;
            properties.size.x = image.width();
            properties.size.y = image.height();
        }
    }

    properties.previews = read_thumbnails(&mut archive)?;

    tracing::debug!(
        layers = properties.size.layers,
        job_dir = %job_dir,
        "decoded SL1 settings"
    );

    Ok(Sl1Printable { properties, layers })
}

fn read_thumbnails<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<BTreeMap<PreviewKind, RgbaImage>, CodecError> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("thumbnail/") && name.ends_with(".png"))
        .map(str::to_string)
        .collect();
    names.sort();

    let mut thumbnails: Vec<RgbaImage> = Vec::new();
    for name in names {
        if let Some(data) = read_entry(archive, &name)? {
            thumbnails.push(decode_png(&data)?.into_rgba8());
        }
    }
    thumbnails.sort_by_key(|image| image.width() * image.height());

    let mut previews = BTreeMap::new();
    match thumbnails.len() {
        0 => {}
        1 => {
            let image = thumbnails.remove(0);
            let kind = if image.width() * image.height() <= TINY_PREVIEW_PIXELS {
                PreviewKind::Tiny
            } else {
                PreviewKind::Huge
            };
            previews.insert(kind, image);
        }
        _ => {
            if let Some(largest) = thumbnails.pop() {
                previews.insert(PreviewKind::Huge, largest);
            }
            previews.insert(PreviewKind::Tiny, thumbnails.remove(0));
        }
    }
    Ok(previews)
}

fn layer_name(job_dir: &str, index: usize) -> String {
    format!("{}{:05}.png", job_dir, index)
}

fn job_dir_for(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| {
            stem.chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                .collect::<String>()
        })
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| DEFAULT_JOB_DIR.to_string())
}

/// Job settings read by the printer
fn config_ini(properties: &Properties, job_dir: &str, options: &Sl1Options) -> String {
    let bottom = properties.bottom.count.min(properties.size.layers);
    let timestamp = chrono::Utc::now().format("%Y-%m-%d at %H:%M:%S UTC");

    let mut text = String::new();
    let mut line = |key: &str, value: &dyn std::fmt::Display| {
        text.push_str(&format!("{} = {}\n", key, value));
    };
    line("action", &"print");
    line("expTime", &properties.exposure.light_on_time.as_secs_f32());
    line("expTimeFirst", &properties.bottom.exposure.light_on_time.as_secs_f32());
    line("fileCreationTimestamp", &timestamp);
    line("jobDir", &job_dir);
    line("layerHeight", &properties.size.layer_height);
    line(
        "materialName",
        &options.material_name.as_deref().unwrap_or("3DM-ABS @"),
    );
    line("numFade", &bottom);
    line("numFast", &properties.size.layers);
    line("numSlow", &0);
    line("printProfile", &format!("{} Normal", properties.size.layer_height));
    line("printTime", &properties.estimated_print_time());
    line("printerModel", &"SL1");
    line(
        "printerProfile",
        &options.printer_profile.as_deref().unwrap_or("Original Prusa SL1"),
    );
    line("printerVariant", &"default");
    line("prusaSlicerVersion", &concat!("uv3dp ", env!("CARGO_PKG_VERSION")));
    line("usedMaterial", &0);
    text
}

fn prusaslicer_ini(properties: &Properties) -> String {
    let size = properties.size;
    let (orientation, pixels, millimeters) = if size.y > size.x {
        ("portrait", (size.y, size.x), (size.millimeter_y, size.millimeter_x))
    } else {
        ("landscape", (size.x, size.y), (size.millimeter_x, size.millimeter_y))
    };

    format!(
        "display_orientation = {}\n\
         display_pixels_x = {}\n\
         display_pixels_y = {}\n\
         display_width = {}\n\
         display_height = {}\n\
         exposure_time = {}\n\
         initial_exposure_time = {}\n\
         layer_height = {}\n\
         printer_technology = SLA\n",
        orientation,
        pixels.0,
        pixels.1,
        millimeters.0,
        millimeters.1,
        properties.exposure.light_on_time.as_secs_f32(),
        properties.bottom.exposure.light_on_time.as_secs_f32(),
        size.layer_height,
    )
}

fn write_archive(
    path: &Path,
    printable: &dyn Printable,
    options: &Sl1Options,
) -> Result<(), CodecError> {
    let properties = printable.properties();
    let job_dir = job_dir_for(path);

    let file = File::create(path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    let options_deflate =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    // PNG data is already compressed
    let options_stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    zip.start_file("config.ini", options_deflate)?;
    zip.write_all(config_ini(properties, &job_dir, options).as_bytes())?;

    zip.start_file("prusaslicer.ini", options_deflate)?;
    zip.write_all(prusaslicer_ini(properties).as_bytes())?;

    for image in properties.previews.values() {
        let name = format!("thumbnail/thumbnail{}x{}.png", image.width(), image.height());
        zip.start_file(name, options_stored)?;
        zip.write_all(&encode_png(image)?)?;
    }

    for index in 0..printable.layer_count() {
        let layer = printable.layer(index)?;
        let image: &GrayImage = &layer.image;
        zip.start_file(layer_name(&job_dir, index), options_stored)?;
        zip.write_all(&encode_png(image)?)?;
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    Ok(())
}
