//! Stream filters needed to read document structure.
//!
//! Only structural streams (cross-reference streams and object streams) are
//! ever decoded; page content is carried through the rewrite untouched, so
//! FlateDecode with PNG/TIFF predictors is the whole filter set.
//!
//! PDF Spec: Section 7.4.4 - LZW and Flate Filters

use super::error::{PdfError, PdfResult};
use super::object::{Dictionary, Object};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Predictor parameters from `/DecodeParms`.
#[derive(Debug, Clone, Copy)]
struct PredictorParams {
    predictor: i64,
    columns: usize,
    colors: usize,
    bits_per_component: usize,
}

impl PredictorParams {
    fn from_dict(parms: Option<&Dictionary>) -> Self {
        let get = |key: &str, default: i64| {
            parms
                .and_then(|d| d.get(key))
                .and_then(Object::as_integer)
                .unwrap_or(default)
        };
        Self {
            predictor: get("Predictor", 1),
            columns: get("Columns", 1).max(1) as usize,
            colors: get("Colors", 1).max(1) as usize,
            bits_per_component: get("BitsPerComponent", 8).max(1) as usize,
        }
    }

    fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8)
    }

    fn row_length(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }
}

/// Decode a stream's payload according to its `/Filter` chain.
pub fn decode_stream(dict: &Dictionary, data: &[u8]) -> PdfResult<Vec<u8>> {
    let filters: Vec<&str> = match dict.get("Filter") {
        None => Vec::new(),
        Some(Object::Name(n)) => vec![n.as_str()],
        Some(Object::Array(items)) => items.iter().filter_map(Object::as_name).collect(),
        Some(other) => {
            return Err(PdfError::Decode(format!(
                "/Filter must be a name or array, found {}",
                other.type_name()
            )))
        },
    };
    let parms: Vec<Option<&Dictionary>> = match dict.get("DecodeParms") {
        Some(Object::Array(items)) => items.iter().map(Object::as_dict).collect(),
        Some(obj) => vec![obj.as_dict()],
        None => Vec::new(),
    };

    let mut current = data.to_vec();
    for (i, filter) in filters.iter().enumerate() {
        current = match *filter {
            "FlateDecode" | "Fl" => {
                let inflated = flate_decode(&current)?;
                let params = PredictorParams::from_dict(parms.get(i).copied().flatten());
                apply_predictor(inflated, &params)?
            },
            other => return Err(PdfError::UnsupportedFilter(other.to_string())),
        };
    }
    Ok(current)
}

/// Inflate zlib data, falling back to raw deflate and partial output for
/// damaged streams.
pub fn flate_decode(input: &[u8]) -> PdfResult<Vec<u8>> {
    let mut output = Vec::new();
    match ZlibDecoder::new(input).read_to_end(&mut output) {
        Ok(_) => return Ok(output),
        Err(e) if !output.is_empty() => {
            log::warn!(
                "FlateDecode partial recovery: {} bytes before corruption: {}",
                output.len(),
                e
            );
            return Ok(output);
        },
        Err(_) => {},
    }

    output.clear();
    match DeflateDecoder::new(input).read_to_end(&mut output) {
        Ok(_) => Ok(output),
        Err(_) if !output.is_empty() => Ok(output),
        Err(e) => Err(PdfError::Decode(format!("FlateDecode failed: {}", e))),
    }
}

/// Compress data with zlib for `/FlateDecode` streams.
pub fn flate_encode(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn apply_predictor(data: Vec<u8>, params: &PredictorParams) -> PdfResult<Vec<u8>> {
    match params.predictor {
        1 => Ok(data),
        2 => Ok(tiff_predictor(data, params)),
        10..=15 => png_predictor(&data, params),
        other => Err(PdfError::Decode(format!("Unknown predictor {}", other))),
    }
}

fn tiff_predictor(mut data: Vec<u8>, params: &PredictorParams) -> Vec<u8> {
    if params.bits_per_component != 8 {
        log::warn!(
            "TIFF predictor with {} bits per component left undecoded",
            params.bits_per_component
        );
        return data;
    }
    let row = params.row_length();
    let bpp = params.bytes_per_pixel();
    for line in data.chunks_mut(row) {
        for i in bpp..line.len() {
            line[i] = line[i].wrapping_add(line[i - bpp]);
        }
    }
    data
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let p = i16::from(left) + i16::from(up) - i16::from(up_left);
    let pa = (p - i16::from(left)).abs();
    let pb = (p - i16::from(up)).abs();
    let pc = (p - i16::from(up_left)).abs();
    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        up_left
    }
}

/// Undo PNG row filters. Each encoded row carries a leading filter-type byte.
fn png_predictor(data: &[u8], params: &PredictorParams) -> PdfResult<Vec<u8>> {
    let row = params.row_length();
    let bpp = params.bytes_per_pixel();
    let mut prev = vec![0u8; row];
    let mut out = Vec::with_capacity(data.len());

    for encoded in data.chunks(row + 1) {
        let (&filter, bytes) = match encoded.split_first() {
            Some(split) => split,
            None => break,
        };
        let mut line = bytes.to_vec();
        line.resize(row, 0);
        for i in 0..row {
            let left = if i >= bpp { line[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            line[i] = match filter {
                0 => line[i],
                1 => line[i].wrapping_add(left),
                2 => line[i].wrapping_add(up),
                3 => line[i].wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => line[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(PdfError::Decode(format!("Invalid PNG filter type {}", other)))
                },
            };
        }
        out.extend_from_slice(&line);
        prev = line;
    }
    Ok(out)
}
