//! Run-length codecs used by ChiTu print files
//!
//! Pixels are scanned row by row, left to right.
//!
//! | Codec | Used for | Unit |
//! |-------|----------|------|
//! | bit plane | cbddlp layers | 1 byte: bit 7 lit, bits 0-6 run (1-125) |
//! | gray7 | ctb layers | 7-bit level, bit 7 flags a variable-length run |
//! | rgb15 | previews | 16-bit RGB555, bit 5 flags a 12-bit repeat word |

use image::{GrayImage, Rgba, RgbaImage};
use thiserror::Error;

/// Longest run a single bit-plane byte can hold
const BITPLANE_MAX_RUN: usize = 0x7d;

/// Longest run a gray7 length prefix can hold
const GRAY7_MAX_RUN: usize = 0x0fff_ffff;

/// Longest run a single rgb15 repeat word can hold
const RGB15_MAX_RUN: usize = 0x1000;

const RGB15_REPEAT: u16 = 0x0020;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RleError {
    #[error("run-length data describes more than {expected} pixels")]
    Overflow { expected: usize },

    #[error("run-length data describes {actual} of {expected} pixels")]
    Underflow { expected: usize, actual: usize },

    #[error("run-length data ends inside a run")]
    Truncated,

    #[error("invalid run-length prefix 0x{0:02x}")]
    InvalidPrefix(u8),
}

/// Encodes one anti-alias bit plane: a pixel is lit when `gray >= threshold`
pub fn encode_bitplane(image: &GrayImage, threshold: u8) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pixels = image.as_raw().iter().map(|&gray| gray >= threshold);

    let Some(mut current) = pixels.next() else {
        return out;
    };
    let mut run = 1usize;

    for lit in pixels {
        if lit == current {
            run += 1;
        } else {
            push_bitplane_run(current, run, &mut out);
            current = lit;
            run = 1;
        }
    }
    push_bitplane_run(current, run, &mut out);
    out
}

fn push_bitplane_run(lit: bool, run: usize, out: &mut Vec<u8>) {
    let color = if lit { 0x80 } else { 0x00 };
    let mut remaining = run;
    while remaining > 0 {
        let chunk = remaining.min(BITPLANE_MAX_RUN);
        out.push(color | chunk as u8);
        remaining -= chunk;
    }
}

/// Adds one bit plane to per-pixel lit counts
///
/// Data that stops short leaves the remaining pixels dark.
pub fn decode_bitplane(data: &[u8], counts: &mut [u8]) -> Result<(), RleError> {
    let mut position = 0usize;
    for &byte in data {
        let run = (byte & 0x7f) as usize;
        let end = position + run;
        if end > counts.len() {
            return Err(RleError::Overflow {
                expected: counts.len(),
            });
        }
        if byte & 0x80 != 0 {
            for count in &mut counts[position..end] {
                *count = count.saturating_add(1);
            }
        }
        position = end;
    }
    Ok(())
}

fn push_gray7_run(level: u8, run: usize, out: &mut Vec<u8>) {
    let mut remaining = run;
    while remaining > 0 {
        let chunk = remaining.min(GRAY7_MAX_RUN);
        if chunk == 1 {
            out.push(level);
        } else {
            out.push(level | 0x80);
            if chunk <= 0x7f {
                out.push(chunk as u8);
            } else if chunk <= 0x3fff {
                out.push(0x80 | (chunk >> 8) as u8);
                out.push(chunk as u8);
            } else if chunk <= 0x1f_ffff {
                out.push(0xc0 | (chunk >> 16) as u8);
                out.push((chunk >> 8) as u8);
                out.push(chunk as u8);
            } else {
                out.push(0xe0 | (chunk >> 24) as u8);
                out.push((chunk >> 16) as u8);
                out.push((chunk >> 8) as u8);
                out.push(chunk as u8);
            }
        }
        remaining -= chunk;
    }
}

/// Encodes a layer as 7-bit gray runs; the lowest bit of each pixel is lost
pub fn encode_gray7(image: &GrayImage) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pixels = image.as_raw().iter().map(|&gray| gray >> 1);

    let Some(mut current) = pixels.next() else {
        return out;
    };
    let mut run = 1usize;

    for level in pixels {
        if level == current {
            run += 1;
        } else {
            push_gray7_run(current, run, &mut out);
            current = level;
            run = 1;
        }
    }
    push_gray7_run(current, run, &mut out);
    out
}

/// Decodes 7-bit gray runs into exactly `pixels` 8-bit values
pub fn decode_gray7(data: &[u8], pixels: usize) -> Result<Vec<u8>, RleError> {
    let mut out = Vec::with_capacity(pixels);
    let mut bytes = data.iter().copied();

    while let Some(code) = bytes.next() {
        let level = code & 0x7f;
        let gray = (level << 1) | (level & 1);

        let run = if code & 0x80 == 0 {
            1
        } else {
            let mut next = || bytes.next().ok_or(RleError::Truncated);
            let first = next()?;
            if first & 0x80 == 0 {
                first as usize
            } else if first & 0xc0 == 0x80 {
                ((first & 0x3f) as usize) << 8 | next()? as usize
            } else if first & 0xe0 == 0xc0 {
                ((first & 0x1f) as usize) << 16 | (next()? as usize) << 8 | next()? as usize
            } else if first & 0xf0 == 0xe0 {
                ((first & 0x0f) as usize) << 24
                    | (next()? as usize) << 16
                    | (next()? as usize) << 8
                    | next()? as usize
            } else {
                return Err(RleError::InvalidPrefix(first));
            }
        };

        if out.len() + run > pixels {
            return Err(RleError::Overflow { expected: pixels });
        }
        out.resize(out.len() + run, gray);
    }

    if out.len() != pixels {
        return Err(RleError::Underflow {
            expected: pixels,
            actual: out.len(),
        });
    }
    Ok(out)
}

fn rgb15(pixel: &Rgba<u8>) -> u16 {
    let [r, g, b, _] = pixel.0;
    ((r as u16 >> 3) << 11) | ((g as u16 >> 3) << 6) | (b as u16 >> 3)
}

fn expand5(value: u16) -> u8 {
    let value = (value & 0x1f) as u8;
    (value << 3) | (value >> 2)
}

/// Encodes a preview as RGB555 runs
pub fn encode_rgb15(image: &RgbaImage) -> Vec<u8> {
    let mut out = Vec::new();
    let mut push = |color: u16, run: usize| {
        let mut remaining = run;
        while remaining > 0 {
            let chunk = remaining.min(RGB15_MAX_RUN);
            if chunk == 1 {
                out.extend_from_slice(&color.to_le_bytes());
            } else {
                out.extend_from_slice(&(color | RGB15_REPEAT).to_le_bytes());
                out.extend_from_slice(&(0x3000 | (chunk - 1) as u16).to_le_bytes());
            }
            remaining -= chunk;
        }
    };

    let mut pixels = image.pixels().map(rgb15);
    if let Some(mut current) = pixels.next() {
        let mut run = 1usize;
        for color in pixels {
            if color == current {
                run += 1;
            } else {
                push(current, run);
                current = color;
                run = 1;
            }
        }
        push(current, run);
    }
    out
}

/// Decodes RGB555 runs into a `width` x `height` preview
pub fn decode_rgb15(data: &[u8], width: u32, height: u32) -> Result<RgbaImage, RleError> {
    let expected = width as usize * height as usize;
    let mut pixels: Vec<u8> = Vec::with_capacity(expected * 4);
    let mut words = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));

    while let Some(word) = words.next() {
        let mut run = 1usize;
        if word & RGB15_REPEAT != 0 {
            let repeat = words.next().ok_or(RleError::Truncated)?;
            run += (repeat & 0x0fff) as usize;
        }

        if pixels.len() / 4 + run > expected {
            return Err(RleError::Overflow { expected });
        }
        let rgba = [expand5(word >> 11), expand5(word >> 6), expand5(word), 0xff];
        for _ in 0..run {
            pixels.extend_from_slice(&rgba);
        }
    }

    let actual = pixels.len() / 4;
    if actual != expected {
        return Err(RleError::Underflow { expected, actual });
    }
    RgbaImage::from_raw(width, height, pixels).ok_or(RleError::Underflow { expected, actual })
}

/// Applies the CTB layer cipher in place
///
/// The cipher is a XOR keystream, so the same call encrypts and decrypts.
/// A zero key leaves the data untouched.
pub fn crypt(data: &mut [u8], key: u32, layer: u32) {
    if key == 0 {
        return;
    }

    let init = key.wrapping_mul(0x2d83_cdac).wrapping_add(0xd8a8_3423);
    let mut stream = layer
        .wrapping_mul(0x1e15_30cd)
        .wrapping_add(0xec3d_47cd)
        .wrapping_mul(init);

    for (index, byte) in data.iter_mut().enumerate() {
        let shift = 8 * (index % 4) as u32;
        *byte ^= (stream >> shift) as u8;
        if index % 4 == 3 {
            stream = stream.wrapping_add(init);
        }
    }
}
