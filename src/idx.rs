//! Reader for the IDX files the MNIST dataset ships in.
//!
//! All header integers are big-endian `u32`s following a magic number.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use crate::{Error, Result, Tensor};

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::InvalidData(format!("truncated idx header: {e}")))?;
    Ok(u32::from_be_bytes(buf))
}

// `len` comes from the header, so nothing is allocated up front.
fn read_bytes<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut bytes)
        .map_err(|e| Error::InvalidData(format!("failed to read idx data: {e}")))?;
    if bytes.len() != len {
        return Err(Error::InvalidData(format!(
            "expected {len} bytes of idx data, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn check_magic<R: Read>(reader: &mut R, expected: u32) -> Result<()> {
    let magic = read_u32(reader)?;
    if magic != expected {
        return Err(Error::InvalidData(format!(
            "bad idx magic number {magic}, expected {expected}"
        )));
    }
    Ok(())
}

/// Images as a `(rows * cols) x count` tensor of raw 0-255 pixel values.
/// Each image is stored row by row in its own column.
pub fn read_images<R: Read>(mut reader: R) -> Result<Tensor> {
    check_magic(&mut reader, IMAGES_MAGIC)?;
    let count = read_u32(&mut reader)? as usize;
    let rows = read_u32(&mut reader)? as usize;
    let cols = read_u32(&mut reader)? as usize;
    let (pixels, len) = rows
        .checked_mul(cols)
        .and_then(|pixels| Some((pixels, pixels.checked_mul(count)?)))
        .ok_or_else(|| {
            Error::InvalidData(format!(
                "idx header of {count} images of {rows}x{cols} pixels is too large"
            ))
        })?;

    let bytes = read_bytes(&mut reader, len)?;
    // The file is image-major, so the bytes fill a (count x pixels) matrix.
    let images = Tensor::from_shape_vec((count, pixels), bytes.into_iter().map(f32::from).collect())
        .map_err(|e| Error::InvalidData(format!("bad idx image dimensions: {e}")))?;
    Ok(images.reversed_axes().as_standard_layout().to_owned())
}

/// Labels as `classes x count` one-hot columns.
pub fn read_labels<R: Read>(mut reader: R, classes: usize) -> Result<Tensor> {
    check_magic(&mut reader, LABELS_MAGIC)?;
    let count = read_u32(&mut reader)? as usize;
    let labels = read_bytes(&mut reader, count)?;

    let mut one_hot = Tensor::zeros((classes, count));
    for (col, label) in labels.into_iter().enumerate() {
        let label = label as usize;
        if label >= classes {
            return Err(Error::InvalidData(format!(
                "label {label} of example {col} is not below {classes}"
            )));
        }
        one_hot[[label, col]] = 1.0;
    }
    Ok(one_hot)
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::InvalidData(format!("failed to open {}: {e}", path.display())))
}

pub fn load_images(path: impl AsRef<Path>) -> Result<Tensor> {
    read_images(open(path.as_ref())?)
}

pub fn load_labels(path: impl AsRef<Path>, classes: usize) -> Result<Tensor> {
    read_labels(open(path.as_ref())?, classes)
}
