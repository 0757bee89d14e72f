//! Deterministic local stand-in for the synthesis provider
//!
//! Used in non-production environments when no API token is configured. The
//! mock produces a solid-color truecolor PNG of the requested dimensions and
//! hands it back as a base64 data URL, so the rest of the pipeline (decode,
//! probe, upload) runs against real bytes. The PNG is written by hand with
//! stored-mode deflate blocks; nothing in the dependency tree encodes images.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Fill color for synthesized frames (light blue)
const FILL: [u8; 3] = [173, 216, 230];

/// Largest dimension the mock will synthesize
const MAX_DIMENSION: u32 = 2048;

/// Build a `data:image/png;base64,...` URL for a solid-color frame
pub fn png_data_url(width: u32, height: u32) -> String {
    let png = encode_png(width, height);
    format!("data:image/png;base64,{}", BASE64.encode(png))
}

/// Encode a solid-color 8-bit RGB PNG
pub fn encode_png(width: u32, height: u32) -> Vec<u8> {
    let width = width.clamp(1, MAX_DIMENSION);
    let height = height.clamp(1, MAX_DIMENSION);

    let mut out = PNG_SIGNATURE.to_vec();

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    // bit depth 8, color type 2 (truecolor), default compression/filter/interlace
    ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);
    push_chunk(&mut out, b"IHDR", &ihdr);

    // Scanlines: filter byte 0 followed by RGB pixels
    let mut raw = Vec::with_capacity((height as usize) * (1 + 3 * width as usize));
    for _ in 0..height {
        raw.push(0);
        for _ in 0..width {
            raw.extend_from_slice(&FILL);
        }
    }
    push_chunk(&mut out, b"IDAT", &zlib_stored(&raw));

    push_chunk(&mut out, b"IEND", &[]);
    out
}

fn push_chunk(out: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(chunk_type);
    out.extend_from_slice(data);

    let mut crc = Crc32::new();
    crc.update(chunk_type);
    crc.update(data);
    out.extend_from_slice(&crc.finish().to_be_bytes());
}

/// Wrap raw bytes in a zlib stream of stored (uncompressed) deflate blocks
fn zlib_stored(raw: &[u8]) -> Vec<u8> {
    let mut z = vec![0x78, 0x01];

    let mut chunks = raw.chunks(u16::MAX as usize).peekable();
    while let Some(chunk) = chunks.next() {
        let is_last = chunks.peek().is_none();
        z.push(u8::from(is_last));
        let len = chunk.len() as u16;
        z.extend_from_slice(&len.to_le_bytes());
        z.extend_from_slice(&(!len).to_le_bytes());
        z.extend_from_slice(chunk);
    }

    z.extend_from_slice(&adler32(raw).to_be_bytes());
    z
}

fn adler32(data: &[u8]) -> u32 {
    const MOD: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + byte as u32) % MOD;
        b = (b + a) % MOD;
    }
    (b << 16) | a
}

struct Crc32 {
    state: u32,
}

impl Crc32 {
    fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.state ^= byte as u32;
            for _ in 0..8 {
                let mask = (self.state & 1).wrapping_neg();
                self.state = (self.state >> 1) ^ (0xEDB8_8320 & mask);
            }
        }
    }

    fn finish(self) -> u32 {
        !self.state
    }
}
