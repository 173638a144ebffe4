//! zlib streams for compressed chunks.
//!
//! Every chunk is an independent stream, so any chunk can be inflated
//! without touching its neighbours.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::types::{LobError, Result};

fn codec_err(err: impl std::fmt::Display) -> LobError {
    LobError::Codec(err.to_string())
}

/// Deflates `src` as one zlib stream.
pub fn compress(level: u32, src: &[u8]) -> Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::with_capacity(src.len() / 2 + 64), Compression::new(level));
    enc.write_all(src).map_err(codec_err)?;
    enc.finish().map_err(codec_err)
}

/// Inflates a whole stream that must produce exactly `expected` bytes.
pub fn decompress(src: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(src)
        .read_to_end(&mut out)
        .map_err(codec_err)?;
    if out.len() != expected {
        return Err(LobError::Codec(format!(
            "stream inflated to {} bytes, expected {expected}",
            out.len()
        )));
    }
    Ok(out)
}

/// Inflates only `len` bytes starting `skip` bytes into the stream, through
/// a scratch buffer of `scratch` bytes. Inflation stops as soon as the range
/// is complete.
pub fn decompress_range(src: &[u8], skip: usize, len: usize, scratch: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    let mut buf = vec![0u8; scratch.max(64)];
    let mut inflater = Decompress::new(true);
    let mut produced = 0usize;
    while out.len() < len {
        let in_before = inflater.total_in() as usize;
        let out_before = inflater.total_out();
        let status = inflater
            .decompress(&src[in_before..], &mut buf, FlushDecompress::None)
            .map_err(codec_err)?;
        let n = (inflater.total_out() - out_before) as usize;
        let window = produced..produced + n;
        let from = skip.max(window.start);
        let to = (skip + len).min(window.end);
        if from < to {
            out.extend_from_slice(&buf[from - produced..to - produced]);
        }
        produced += n;
        if status == Status::StreamEnd {
            break;
        }
        if n == 0 && inflater.total_in() as usize == in_before {
            return Err(LobError::Codec("truncated zlib stream".into()));
        }
    }
    if out.len() != len {
        return Err(LobError::Codec(format!(
            "stream ended after {produced} bytes, wanted {} at {skip}",
            len
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sample(len: usize) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(7);
        (0..len).map(|i| if i % 3 == 0 { rng.gen() } else { b'a' }).collect()
    }

    #[test]
    fn whole_stream_inflates() {
        let data = sample(10_000);
        let z = compress(6, &data).unwrap();
        assert_eq!(decompress(&z, data.len()).unwrap(), data);
    }

    #[test]
    fn length_mismatch_is_a_codec_error() {
        let z = compress(6, b"hello").unwrap();
        assert!(matches!(decompress(&z, 6), Err(LobError::Codec(_))));
    }

    #[test]
    fn ranges_use_small_scratch() {
        let data = sample(20_000);
        let z = compress(1, &data).unwrap();
        for (skip, len) in [(0, 10), (4095, 2), (5_000, 9_000), (19_990, 10), (0, 20_000)] {
            assert_eq!(
                decompress_range(&z, skip, len, 256).unwrap(),
                &data[skip..skip + len],
                "range {skip}+{len}"
            );
        }
    }

    #[test]
    fn range_past_end_fails() {
        let z = compress(6, &sample(100)).unwrap();
        assert!(decompress_range(&z, 90, 20, 64).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decompress(&[1, 2, 3, 4], 4).is_err());
    }
}
