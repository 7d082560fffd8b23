use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// The two leading bytes of every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Cheap magic-byte sniff telling compressed history apart from raw JSON.
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.len() >= GZIP_MAGIC.len() && bytes[..2] == GZIP_MAGIC
}

pub fn compress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 4 + 32), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

pub fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Compress unless the blob already carries the gzip magic.
pub fn ensure_compressed(bytes: Vec<u8>) -> std::io::Result<Vec<u8>> {
    if is_compressed(&bytes) {
        Ok(bytes)
    } else {
        compress(&bytes)
    }
}

/// Decompress if the blob carries the gzip magic, otherwise return it unchanged.
pub fn ensure_decompressed(bytes: Vec<u8>) -> std::io::Result<Vec<u8>> {
    if is_compressed(&bytes) {
        decompress(&bytes)
    } else {
        Ok(bytes)
    }
}
