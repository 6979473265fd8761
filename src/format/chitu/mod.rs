//! ChiTu binary print files (`.cbddlp`, `.photon`, `.ctb`)
//!
//! Both variants share one little-endian layout:
//!
//! | Block | Size | Notes |
//! |-------|------|-------|
//! | header | 112 bytes | magic, bed size, exposure, table offsets |
//! | print parameters | 60 bytes | lift and light-off settings, version 2 and later |
//! | previews | 32 byte header + RGB555 runs | large, then small |
//! | layer table | 36 bytes per entry | one table per anti-alias level |
//! | layer data | variable | run-length encoded, see [`rle`] |
//!
//! `cbddlp` stores each anti-alias level as a separate 1-bit plane. `ctb`
//! stores one 7-bit grayscale plane and may encrypt it with a per-file key.

mod rle;

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use clap::Args;
use image::{GrayImage, RgbaImage};

use super::registry::FormatEntry;
use super::{CodecError, Format, FormatError, Target};
use crate::domain::{Layer, PreviewKind, Printable, PrintableError, Properties};
use crate::options;

const HEADER_SIZE: u32 = 112;
const PARAMETERS_SIZE: u32 = 60;
const PREVIEW_HEADER_SIZE: u32 = 32;
const LAYER_ENTRY_SIZE: u32 = 36;

const CBDDLP_MAGIC: u32 = 0x12fd_0019;
const CTB_MAGIC: u32 = 0x12fd_0086;

/// Projector flag for a mirrored LCD
const PROJECTOR_LCD_MIRROR: u32 = 1;

const MAX_ANTI_ALIAS: u32 = 16;

/// Largest layer or preview bitmap accepted from a file header
const MAX_PIXELS: u64 = 1 << 28;

/// The two ChiTu file flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChituVariant {
    /// 1-bit planes, optional anti-aliasing
    Cbddlp,
    /// 7-bit grayscale, optional encryption
    Ctb,
}

impl ChituVariant {
    pub fn name(self) -> &'static str {
        match self {
            ChituVariant::Cbddlp => "cbddlp",
            ChituVariant::Ctb => "ctb",
        }
    }

    fn magic(self) -> u32 {
        match self {
            ChituVariant::Cbddlp => CBDDLP_MAGIC,
            ChituVariant::Ctb => CTB_MAGIC,
        }
    }
}

/// Options for the `cbddlp` format
#[derive(Args, Debug, Clone)]
pub struct CbddlpOptions {
    /// Anti-alias levels to write
    #[arg(long, value_name = "LEVELS", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..=MAX_ANTI_ALIAS as i64))]
    pub anti_alias: u32,

    /// File version to write (1 has no print parameters)
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..=2))]
    pub version: u32,
}

/// Options for the `ctb` format
#[derive(Args, Debug, Clone)]
pub struct CtbOptions {
    /// Layer encryption key; 0 writes plain layers
    #[arg(long, value_name = "KEY", default_value_t = 0)]
    pub encryption_key: u32,
}

/// Settings used when writing a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WriteSettings {
    version: u32,
    anti_alias: u32,
    encryption_key: u32,
}

impl Default for WriteSettings {
    fn default() -> Self {
        Self {
            version: 2,
            anti_alias: 1,
            encryption_key: 0,
        }
    }
}

/// ChiTu codec bound to one file
pub struct ChituFormat {
    variant: ChituVariant,
    target: Target,
    settings: WriteSettings,
}

impl ChituFormat {
    pub fn new(variant: ChituVariant, target: Target) -> Self {
        Self {
            variant,
            target,
            settings: WriteSettings::default(),
        }
    }

    /// Registry entry for a variant
    pub fn entry(variant: ChituVariant) -> FormatEntry {
        let factory = move |target| Box::new(ChituFormat::new(variant, target)) as Box<dyn Format>;
        match variant {
            ChituVariant::Cbddlp => {
                FormatEntry::new("cbddlp", "ChiTu anti-aliased bit-plane file", factory)
                    .extension("cbddlp")
                    .extension("photon")
                    .help(|| options::help::<CbddlpOptions>("cbddlp"))
            }
            ChituVariant::Ctb => {
                FormatEntry::new("ctb", "ChiTu grayscale file", factory)
                    .extension("ctb")
                    .help(|| options::help::<CtbOptions>("ctb"))
            }
        }
    }

    fn parse_options(&self, args: &[String]) -> Result<(WriteSettings, Vec<String>), String> {
        match self.variant {
            ChituVariant::Cbddlp => {
                let (opts, rest) = options::parse::<CbddlpOptions>("cbddlp", args)?;
                if opts.version < 2 && opts.anti_alias > 1 {
                    return Err("anti-aliasing requires --version 2".to_string());
                }
                let settings = WriteSettings {
                    version: opts.version,
                    anti_alias: opts.anti_alias,
                    encryption_key: 0,
                };
                Ok((settings, rest))
            }
            ChituVariant::Ctb => {
                let (opts, rest) = options::parse::<CtbOptions>("ctb", args)?;
                let settings = WriteSettings {
                    encryption_key: opts.encryption_key,
                    ..WriteSettings::default()
                };
                Ok((settings, rest))
            }
        }
    }
}

impl Format for ChituFormat {
    fn name(&self) -> &'static str {
        self.variant.name()
    }

    fn parse(&mut self, args: &[String]) -> Result<(), FormatError> {
        let (settings, rest) = self
            .parse_options(args)
            .map_err(|message| self.target.bad_option(message))?;
        self.target.bind(rest)?;
        self.settings = settings;
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
        tracing::debug!(path = %path.display(), variant = self.variant.name(), "reading ChiTu file");

        let data = std::fs::read(&path).map_err(|e| self.target.decode_error(e))?;
        let printable =
            ChituPrintable::parse(self.variant, data).map_err(|e| self.target.decode_error(e))?;
        Ok(Box::new(printable))
    }

    fn encode(self: Box<Self>, printable: &dyn Printable) -> Result<(), FormatError> {
        let path = self.target.require()?.to_path_buf();
        tracing::debug!(
            path = %path.display(),
            variant = self.variant.name(),
            anti_alias = self.settings.anti_alias,
            "writing ChiTu file"
        );

        let data = write_file(self.variant, &self.settings, printable)
            .map_err(|e| self.target.encode_error(e))?;
        std::fs::write(&path, data).map_err(|e| self.target.encode_error(e))
    }
}

/// Fixed-size file header
#[derive(Debug, Clone, Default, PartialEq)]
struct Header {
    magic: u32,
    version: u32,
    bed_mm: [f32; 3],
    layer_height: f32,
    exposure: f32,
    bottom_exposure: f32,
    light_off: f32,
    bottom_count: u32,
    resolution: [u32; 2],
    huge_preview_offset: u32,
    layer_table_offset: u32,
    layer_count: u32,
    tiny_preview_offset: u32,
    print_time: u32,
    projector: u32,
    parameters_offset: u32,
    parameters_size: u32,
    anti_alias: u32,
    light_pwm: u16,
    bottom_light_pwm: u16,
    encryption_key: u32,
    slicer_offset: u32,
    slicer_size: u32,
}

impl Header {
    fn read(r: &mut impl Read) -> io::Result<Self> {
        let magic = r.read_u32::<LittleEndian>()?;
        let version = r.read_u32::<LittleEndian>()?;
        let bed_mm = [
            r.read_f32::<LittleEndian>()?,
            r.read_f32::<LittleEndian>()?,
            r.read_f32::<LittleEndian>()?,
        ];
        let mut padding = [0u8; 12];
        r.read_exact(&mut padding)?;

        Ok(Self {
            magic,
            version,
            bed_mm,
            layer_height: r.read_f32::<LittleEndian>()?,
            exposure: r.read_f32::<LittleEndian>()?,
            bottom_exposure: r.read_f32::<LittleEndian>()?,
            light_off: r.read_f32::<LittleEndian>()?,
            bottom_count: r.read_u32::<LittleEndian>()?,
            resolution: [r.read_u32::<LittleEndian>()?, r.read_u32::<LittleEndian>()?],
            huge_preview_offset: r.read_u32::<LittleEndian>()?,
            layer_table_offset: r.read_u32::<LittleEndian>()?,
            layer_count: r.read_u32::<LittleEndian>()?,
            tiny_preview_offset: r.read_u32::<LittleEndian>()?,
            print_time: r.read_u32::<LittleEndian>()?,
            projector: r.read_u32::<LittleEndian>()?,
            parameters_offset: r.read_u32::<LittleEndian>()?,
            parameters_size: r.read_u32::<LittleEndian>()?,
            anti_alias: r.read_u32::<LittleEndian>()?,
            light_pwm: r.read_u16::<LittleEndian>()?,
            bottom_light_pwm: r.read_u16::<LittleEndian>()?,
            encryption_key: r.read_u32::<LittleEndian>()?,
            slicer_offset: r.read_u32::<LittleEndian>()?,
            slicer_size: r.read_u32::<LittleEndian>()?,
        })
    }

    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.magic)?;
        w.write_u32::<LittleEndian>(self.version)?;
        for value in self.bed_mm {
            w.write_f32::<LittleEndian>(value)?;
        }
        w.write_all(&[0u8; 12])?;
        w.write_f32::<LittleEndian>(self.layer_height)?;
        w.write_f32::<LittleEndian>(self.exposure)?;
        w.write_f32::<LittleEndian>(self.bottom_exposure)?;
        w.write_f32::<LittleEndian>(self.light_off)?;
        w.write_u32::<LittleEndian>(self.bottom_count)?;
        w.write_u32::<LittleEndian>(self.resolution[0])?;
        w.write_u32::<LittleEndian>(self.resolution[1])?;
        w.write_u32::<LittleEndian>(self.huge_preview_offset)?;
        w.write_u32::<LittleEndian>(self.layer_table_offset)?;
        w.write_u32::<LittleEndian>(self.layer_count)?;
        w.write_u32::<LittleEndian>(self.tiny_preview_offset)?;
        w.write_u32::<LittleEndian>(self.print_time)?;
        w.write_u32::<LittleEndian>(self.projector)?;
        w.write_u32::<LittleEndian>(self.parameters_offset)?;
        w.write_u32::<LittleEndian>(self.parameters_size)?;
        w.write_u32::<LittleEndian>(self.anti_alias)?;
        w.write_u16::<LittleEndian>(self.light_pwm)?;
        w.write_u16::<LittleEndian>(self.bottom_light_pwm)?;
        w.write_u32::<LittleEndian>(self.encryption_key)?;
        w.write_u32::<LittleEndian>(self.slicer_offset)?;
        w.write_u32::<LittleEndian>(self.slicer_size)
    }
}

/// Lift and light-off settings, present from version 2
#[derive(Debug, Clone, Default, PartialEq)]
struct Parameters {
    bottom_lift_height: f32,
    bottom_lift_speed: f32,
    lift_height: f32,
    lift_speed: f32,
    retract_speed: f32,
    volume_ml: f32,
    weight_g: f32,
    cost: f32,
    bottom_light_off: f32,
    light_off: f32,
    bottom_count: u32,
}

impl Parameters {
    fn read(r: &mut impl Read) -> io::Result<Self> {
        let parameters = Self {
            bottom_lift_height: r.read_f32::<LittleEndian>()?,
            bottom_lift_speed: r.read_f32::<LittleEndian>()?,
            lift_height: r.read_f32::<LittleEndian>()?,
            lift_speed: r.read_f32::<LittleEndian>()?,
            retract_speed: r.read_f32::<LittleEndian>()?,
            volume_ml: r.read_f32::<LittleEndian>()?,
            weight_g: r.read_f32::<LittleEndian>()?,
            cost: r.read_f32::<LittleEndian>()?,
            bottom_light_off: r.read_f32::<LittleEndian>()?,
            light_off: r.read_f32::<LittleEndian>()?,
            bottom_count: r.read_u32::<LittleEndian>()?,
        };
        let mut padding = [0u8; 16];
        r.read_exact(&mut padding)?;
        Ok(parameters)
    }

    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        for value in [
            self.bottom_lift_height,
            self.bottom_lift_speed,
            self.lift_height,
            self.lift_speed,
            self.retract_speed,
            self.volume_ml,
            self.weight_g,
            self.cost,
            self.bottom_light_off,
            self.light_off,
        ] {
            w.write_f32::<LittleEndian>(value)?;
        }
        w.write_u32::<LittleEndian>(self.bottom_count)?;
        w.write_all(&[0u8; 16])
    }
}

/// One layer table entry
#[derive(Debug, Clone, Default, PartialEq)]
struct LayerEntry {
    z: f32,
    exposure: f32,
    light_off: f32,
    data_offset: u32,
    data_size: u32,
}

impl LayerEntry {
    fn read(r: &mut impl Read) -> io::Result<Self> {
        let entry = Self {
            z: r.read_f32::<LittleEndian>()?,
            exposure: r.read_f32::<LittleEndian>()?,
            light_off: r.read_f32::<LittleEndian>()?,
            data_offset: r.read_u32::<LittleEndian>()?,
            data_size: r.read_u32::<LittleEndian>()?,
        };
        let mut padding = [0u8; 16];
        r.read_exact(&mut padding)?;
        Ok(entry)
    }

    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_f32::<LittleEndian>(self.z)?;
        w.write_f32::<LittleEndian>(self.exposure)?;
        w.write_f32::<LittleEndian>(self.light_off)?;
        w.write_u32::<LittleEndian>(self.data_offset)?;
        w.write_u32::<LittleEndian>(self.data_size)?;
        w.write_all(&[0u8; 16])
    }
}

/// Where one layer's planes live in the file
#[derive(Debug, Clone)]
struct LayerRecord {
    z: f32,
    light_on: f32,
    light_off: f32,
    planes: Vec<Range<usize>>,
}

/// A decoded ChiTu file
///
/// The raw file stays in memory; layers are decoded on demand.
pub struct ChituPrintable {
    variant: ChituVariant,
    properties: Properties,
    encryption_key: u32,
    records: Vec<LayerRecord>,
    data: Vec<u8>,
}

fn seconds(value: f32, fallback: Duration) -> Duration {
    Duration::try_from_secs_f32(value).unwrap_or(fallback)
}

fn checked_range(data: &[u8], offset: usize, size: usize) -> Result<Range<usize>, CodecError> {
    match offset.checked_add(size) {
        Some(end) if end <= data.len() => Ok(offset..end),
        _ => Err(CodecError::invalid(format!(
            "block at 0x{:x} ({} bytes) runs past end of file",
            offset, size
        ))),
    }
}

/// Pixel count of a `width` x `height` bitmap named in a header
fn pixel_count(width: u32, height: u32) -> Result<usize, CodecError> {
    let pixels = u64::from(width) * u64::from(height);
    if pixels > MAX_PIXELS {
        return Err(CodecError::invalid(format!(
            "bitmap of {}x{} pixels is too large",
            width, height
        )));
    }
    Ok(pixels as usize)
}

fn read_preview(data: &[u8], offset: u32) -> Result<Option<RgbaImage>, CodecError> {
    if offset == 0 {
        return Ok(None);
    }

    let mut cursor = Cursor::new(data);
    cursor.seek(SeekFrom::Start(offset as u64))?;
    let width = cursor.read_u32::<LittleEndian>()?;
    let height = cursor.read_u32::<LittleEndian>()?;
    let data_offset = cursor.read_u32::<LittleEndian>()?;
    let data_size = cursor.read_u32::<LittleEndian>()?;
    if width == 0 || height == 0 {
        return Ok(None);
    }

    pixel_count(width, height)?;
    let range = checked_range(data, data_offset as usize, data_size as usize)?;
    let image = rle::decode_rgb15(&data[range], width, height)
        .map_err(|e| CodecError::invalid(format!("preview at 0x{:x}: {}", offset, e)))?;
    Ok(Some(image))
}

impl ChituPrintable {
    fn parse(variant: ChituVariant, data: Vec<u8>) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(data.as_slice());
        let header = Header::read(&mut cursor)?;
        if header.magic != variant.magic() {
            return Err(CodecError::invalid(format!(
                "not a {} file (magic 0x{:08x})",
                variant.name(),
                header.magic
            )));
        }

        let parameters = if header.parameters_offset != 0 && header.parameters_size >= PARAMETERS_SIZE {
            cursor.seek(SeekFrom::Start(header.parameters_offset as u64))?;
            Some(Parameters::read(&mut cursor)?)
        } else {
            None
        };

        pixel_count(header.resolution[0], header.resolution[1])?;

        let mut properties = Properties::default();
        properties.size.x = header.resolution[0];
        properties.size.y = header.resolution[1];
        properties.size.millimeter_x = header.bed_mm[0];
        properties.size.millimeter_y = header.bed_mm[1];
        properties.size.layers = header.layer_count as usize;
        properties.size.layer_height = header.layer_height;

        let exposure = &mut properties.exposure;
        exposure.light_on_time = seconds(header.exposure, exposure.light_on_time);
        exposure.light_off_time = seconds(header.light_off, exposure.light_off_time);
        exposure.light_pwm = header.light_pwm.min(255) as u8;

        let bottom = &mut properties.bottom;
        bottom.count = header.bottom_count as usize;
        bottom.exposure.light_on_time = seconds(header.bottom_exposure, bottom.exposure.light_on_time);
        bottom.exposure.light_off_time = exposure.light_off_time;
        bottom.exposure.light_pwm = header.bottom_light_pwm.min(255) as u8;

        if let Some(parameters) = &parameters {
            exposure.lift_height = parameters.lift_height;
            exposure.lift_speed = parameters.lift_speed;
            exposure.retract_speed = parameters.retract_speed;
            bottom.exposure.lift_height = parameters.bottom_lift_height;
            bottom.exposure.lift_speed = parameters.bottom_lift_speed;
            bottom.exposure.retract_speed = parameters.retract_speed;
            bottom.exposure.light_off_time =
                seconds(parameters.bottom_light_off, bottom.exposure.light_off_time);
        }

        if let Some(image) = read_preview(&data, header.huge_preview_offset)? {
            properties.previews.insert(PreviewKind::Huge, image);
        }
        if let Some(image) = read_preview(&data, header.tiny_preview_offset)? {
            properties.previews.insert(PreviewKind::Tiny, image);
        }

        let planes = match variant {
            ChituVariant::Cbddlp => header.anti_alias.max(1),
            ChituVariant::Ctb => 1,
        };
        if planes > MAX_ANTI_ALIAS {
            return Err(CodecError::invalid(format!(
                "{} anti-alias levels (at most {})",
                planes, MAX_ANTI_ALIAS
            )));
        }
        let planes = planes as usize;
        let layers = header.layer_count as usize;

        // Every table entry must lie inside the file before anything is sized from the counts
        let table_size = planes
            .checked_mul(layers)
            .and_then(|entries| entries.checked_mul(LAYER_ENTRY_SIZE as usize))
            .ok_or_else(|| CodecError::invalid(format!("{} layers is too many", layers)))?;
        checked_range(&data, header.layer_table_offset as usize, table_size)?;

        let mut records = Vec::with_capacity(layers);
        for index in 0..layers {
            let mut record: Option<LayerRecord> = None;
            for plane in 0..planes {
                let position = header.layer_table_offset as u64
                    + ((plane * layers + index) as u64) * LAYER_ENTRY_SIZE as u64;
                cursor.seek(SeekFrom::Start(position))?;
                let entry = LayerEntry::read(&mut cursor)?;
                let range =
                    checked_range(&data, entry.data_offset as usize, entry.data_size as usize)?;

                record
                    .get_or_insert_with(|| LayerRecord {
                        z: entry.z,
                        light_on: entry.exposure,
                        light_off: entry.light_off,
                        planes: Vec::with_capacity(planes),
                    })
                    .planes
                    .push(range);
            }
            if let Some(record) = record {
                records.push(record);
            }
        }

        tracing::debug!(
            version = header.version,
            layers,
            planes,
            encrypted = header.encryption_key != 0,
            "parsed ChiTu header"
        );

        Ok(Self {
            variant,
            properties,
            encryption_key: header.encryption_key,
            records,
            data,
        })
    }

    fn decode_pixels(&self, index: usize, record: &LayerRecord) -> Result<Vec<u8>, rle::RleError> {
        let pixels = self.properties.size.x as usize * self.properties.size.y as usize;
        match self.variant {
            ChituVariant::Cbddlp => {
                let mut counts = vec![0u8; pixels];
                for range in &record.planes {
                    rle::decode_bitplane(&self.data[range.clone()], &mut counts)?;
                }
                let planes = record.planes.len().max(1) as u32;
                Ok(counts
                    .into_iter()
                    .map(|count| (count as u32 * 255 / planes) as u8)
                    .collect())
            }
            ChituVariant::Ctb => {
                let mut bytes = match record.planes.first() {
                    Some(range) => self.data[range.clone()].to_vec(),
                    None => Vec::new(),
                };
                rle::crypt(&mut bytes, self.encryption_key, index as u32);
                rle::decode_gray7(&bytes, pixels)
            }
        }
    }
}

impl Printable for ChituPrintable {
    fn properties(&self) -> &Properties {
        &self.properties
    }

    fn layer(&self, index: usize) -> Result<Layer, PrintableError> {
        self.properties.check_index(index)?;
        let record = &self.records[index];

        let pixels = self
            .decode_pixels(index, record)
            .map_err(|e| PrintableError::corrupt(index, e))?;
        let size = &self.properties.size;
        let image = GrayImage::from_raw(size.x, size.y, pixels).ok_or_else(|| {
            PrintableError::corrupt(index, CodecError::invalid("layer size mismatch"))
        })?;

        let mut exposure = self.properties.layer_exposure(index);
        exposure.light_on_time = seconds(record.light_on, exposure.light_on_time);
        exposure.light_off_time = seconds(record.light_off, exposure.light_off_time);

        Ok(Layer {
            z: record.z,
            exposure,
            image: Arc::new(image),
        })
    }
}

/// Anti-alias plane `plane` of `planes` is lit from this gray level up
fn plane_threshold(plane: u32, planes: u32) -> u8 {
    (((plane + 1) * 256) / (planes + 1)).min(255) as u8
}

fn to_u32(value: usize) -> Result<u32, CodecError> {
    u32::try_from(value).map_err(|_| CodecError::invalid("file exceeds 4 GiB"))
}

fn write_file(
    variant: ChituVariant,
    settings: &WriteSettings,
    printable: &dyn Printable,
) -> Result<Vec<u8>, CodecError> {
    let properties = printable.properties();
    let size = &properties.size;
    let layers = printable.layer_count();
    let planes = match variant {
        ChituVariant::Cbddlp => settings.anti_alias.max(1),
        ChituVariant::Ctb => 1,
    };

    // Encode layers first; the table needs their sizes
    let mut encoded: Vec<Vec<Vec<u8>>> = Vec::with_capacity(layers);
    let mut layer_info = Vec::with_capacity(layers);
    for index in 0..layers {
        let layer = printable.layer(index)?;
        if layer.image.dimensions() != (size.x, size.y) {
            return Err(CodecError::invalid(format!(
                "layer {} is {}x{}, expected {}x{}",
                index,
                layer.image.width(),
                layer.image.height(),
                size.x,
                size.y
            )));
        }

        let data = match variant {
            ChituVariant::Cbddlp => (0..planes)
                .map(|plane| rle::encode_bitplane(&layer.image, plane_threshold(plane, planes)))
                .collect(),
            ChituVariant::Ctb => {
                let mut data = rle::encode_gray7(&layer.image);
                rle::crypt(&mut data, settings.encryption_key, index as u32);
                vec![data]
            }
        };
        encoded.push(data);
        layer_info.push((layer.z, layer.exposure));
    }

    let huge = properties.previews.get(&PreviewKind::Huge).map(|image| (image, rle::encode_rgb15(image)));
    let tiny = properties.previews.get(&PreviewKind::Tiny).map(|image| (image, rle::encode_rgb15(image)));

    let mut offset = HEADER_SIZE as usize;
    let parameters_offset = if settings.version >= 2 {
        let at = offset;
        offset += PARAMETERS_SIZE as usize;
        at
    } else {
        0
    };
    let mut preview_offset = |preview: &Option<(&RgbaImage, Vec<u8>)>| match preview {
        Some((_, data)) => {
            let at = offset;
            offset += PREVIEW_HEADER_SIZE as usize + data.len();
            at
        }
        None => 0,
    };
    let huge_offset = preview_offset(&huge);
    let tiny_offset = preview_offset(&tiny);
    let table_offset = offset;
    offset += planes as usize * layers * LAYER_ENTRY_SIZE as usize;

    let mut data_offsets = vec![vec![0usize; layers]; planes as usize];
    for (plane, offsets) in data_offsets.iter_mut().enumerate() {
        for (index, slot) in offsets.iter_mut().enumerate() {
            *slot = offset;
            offset += encoded[index][plane].len();
        }
    }
    to_u32(offset)?;

    let exposure = &properties.exposure;
    let bottom = &properties.bottom;
    let header = Header {
        magic: variant.magic(),
        version: settings.version,
        bed_mm: [
            size.millimeter_x,
            size.millimeter_y,
            layers as f32 * size.layer_height,
        ],
        layer_height: size.layer_height,
        exposure: exposure.light_on_time.as_secs_f32(),
        bottom_exposure: bottom.exposure.light_on_time.as_secs_f32(),
        light_off: exposure.light_off_time.as_secs_f32(),
        bottom_count: to_u32(bottom.count)?,
        resolution: [size.x, size.y],
        huge_preview_offset: to_u32(huge_offset)?,
        layer_table_offset: to_u32(table_offset)?,
        layer_count: to_u32(layers)?,
        tiny_preview_offset: to_u32(tiny_offset)?,
        print_time: properties.estimated_print_time() as u32,
        projector: PROJECTOR_LCD_MIRROR,
        parameters_offset: to_u32(parameters_offset)?,
        parameters_size: if parameters_offset != 0 { PARAMETERS_SIZE } else { 0 },
        anti_alias: planes,
        light_pwm: exposure.light_pwm as u16,
        bottom_light_pwm: bottom.exposure.light_pwm as u16,
        encryption_key: settings.encryption_key,
        slicer_offset: 0,
        slicer_size: 0,
    };

    let mut out = Vec::with_capacity(offset);
    header.write(&mut out)?;

    if parameters_offset != 0 {
        Parameters {
            bottom_lift_height: bottom.exposure.lift_height,
            bottom_lift_speed: bottom.exposure.lift_speed,
            lift_height: exposure.lift_height,
            lift_speed: exposure.lift_speed,
            retract_speed: exposure.retract_speed,
            bottom_light_off: bottom.exposure.light_off_time.as_secs_f32(),
            light_off: exposure.light_off_time.as_secs_f32(),
            bottom_count: header.bottom_count,
            ..Parameters::default()
        }
        .write(&mut out)?;
    }

    for (preview, at) in [(&huge, huge_offset), (&tiny, tiny_offset)] {
        if let Some((image, data)) = preview {
            out.write_u32::<LittleEndian>(image.width())?;
            out.write_u32::<LittleEndian>(image.height())?;
            out.write_u32::<LittleEndian>(to_u32(at + PREVIEW_HEADER_SIZE as usize)?)?;
            out.write_u32::<LittleEndian>(to_u32(data.len())?)?;
            out.write_all(&[0u8; 16])?;
            out.write_all(data)?;
        }
    }

    for (plane, offsets) in data_offsets.iter().enumerate() {
        for (index, &at) in offsets.iter().enumerate() {
            let (z, exposure) = &layer_info[index];
            LayerEntry {
                z: *z,
                exposure: exposure.light_on_time.as_secs_f32(),
                light_off: exposure.light_off_time.as_secs_f32(),
                data_offset: to_u32(at)?,
                data_size: to_u32(encoded[index][plane].len())?,
            }
            .write(&mut out)?;
        }
    }

    for plane in 0..planes as usize {
        for layer in &encoded {
            out.write_all(&layer[plane])?;
        }
    }

    Ok(out)
}
