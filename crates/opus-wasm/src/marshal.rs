//! Conversion between host sample buffers and the module's byte layout.
//!
//! Wasm linear memory is little-endian regardless of the host, so every sample
//! crossing the boundary is staged through an explicit LE byte buffer.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{OpusError, Result};

/// A PCM sample type the codec accepts.
///
/// `i16` goes through `opus_encode`/`opus_decode`, `f32` through the
/// `_float` entry points. Both share one marshalling path and differ only in
/// element width.
pub trait Sample: Copy + Default + Send + 'static {
    /// Encoded width of one sample in bytes.
    const WIDTH: usize;

    /// Write `samples` into `dest` as little-endian bytes.
    ///
    /// `dest` must be exactly `samples.len() * WIDTH` bytes long.
    fn write_le(samples: &[Self], dest: &mut [u8]);

    /// Read `src.len() / WIDTH` little-endian samples into `dest`.
    fn read_le(src: &[u8], dest: &mut [Self]);
}

impl Sample for i16 {
    const WIDTH: usize = 2;

    fn write_le(samples: &[Self], dest: &mut [u8]) {
        LittleEndian::write_i16_into(samples, dest);
    }

    fn read_le(src: &[u8], dest: &mut [Self]) {
        LittleEndian::read_i16_into(src, dest);
    }
}

impl Sample for f32 {
    const WIDTH: usize = 4;

    fn write_le(samples: &[Self], dest: &mut [u8]) {
        LittleEndian::write_f32_into(samples, dest);
    }

    fn read_le(src: &[u8], dest: &mut [Self]) {
        LittleEndian::read_f32_into(src, dest);
    }
}

/// Convert samples to a little-endian byte buffer.
pub fn samples_to_bytes<S: Sample>(samples: &[S]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * S::WIDTH];
    S::write_le(samples, &mut bytes);
    bytes
}

/// Convert a little-endian byte buffer into `dest`, returning the number of
/// samples written.
///
/// Fails if `src` is not a whole number of samples or `dest` cannot hold them.
pub fn samples_from_bytes<S: Sample>(src: &[u8], dest: &mut [S]) -> Result<usize> {
    if src.len() % S::WIDTH != 0 {
        return Err(OpusError::Protocol(format!(
            "byte length {} is not a multiple of the {}-byte sample width",
            src.len(),
            S::WIDTH
        )));
    }

    let count = src.len() / S::WIDTH;
    if count > dest.len() {
        return Err(OpusError::Protocol(format!(
            "destination holds {} samples, {} decoded",
            dest.len(),
            count
        )));
    }

    S::read_le(src, &mut dest[..count]);
    Ok(count)
}

/// Decode a little-endian `i32` from the first four bytes of `bytes`.
pub fn read_i32(bytes: &[u8]) -> Result<i32> {
    if bytes.len() < 4 {
        return Err(OpusError::Protocol(format!(
            "expected 4 bytes for an i32, got {}",
            bytes.len()
        )));
    }
    Ok(LittleEndian::read_i32(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_layout_is_little_endian() {
        let bytes = samples_to_bytes(&[0x0102i16, -1, i16::MIN]);
        assert_eq!(bytes, vec![0x02, 0x01, 0xff, 0xff, 0x00, 0x80]);
    }

    #[test]
    fn test_f32_layout_is_little_endian() {
        let bytes = samples_to_bytes(&[1.0f32]);
        assert_eq!(bytes, 1.0f32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_from_bytes_partial_destination() {
        let bytes = samples_to_bytes(&[7i16, -7]);
        let mut dest = [0i16; 4];
        let n = samples_from_bytes(&bytes, &mut dest).unwrap();
        assert_eq!(n, 2);
        assert_eq!(dest, [7, -7, 0, 0]);
    }

    #[test]
    fn test_from_bytes_rejects_ragged_input() {
        let mut dest = [0f32; 4];
        let err = samples_from_bytes(&[0u8; 6], &mut dest).unwrap_err();
        assert!(matches!(err, OpusError::Protocol(_)));
    }

    #[test]
    fn test_from_bytes_rejects_small_destination() {
        let mut dest = [0i16; 1];
        assert!(samples_from_bytes(&[0u8; 4], &mut dest).is_err());
    }

    #[test]
    fn test_read_i32() {
        assert_eq!(read_i32(&(-1000i32).to_le_bytes()).unwrap(), -1000);
        assert!(read_i32(&[1, 2]).is_err());
    }
}
