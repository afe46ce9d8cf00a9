//! GF(2^16) polynomial arithmetic and Lagrange-interpolation erasure coding
//! (§4.6.2 `PolyEncoder`/`PolyDecoder`).
//!
//! Grounded on the teacher's `crypto::backup` Shamir secret-sharing module,
//! which splits a secret into GF(256) shares via `gf256_eval_poly` and
//! recombines with Lagrange interpolation at `x = 0`. The SPQR chunk
//! transport needs the opposite shape — recover `k` *data* points, not one
//! secret at `x = 0` — and a wider field (32-byte chunks are sixteen 16-bit
//! lanes), so the field arithmetic is generalized to GF(2^16) and the
//! interpolation target is `x = 1..=k` (systematic Reed–Solomon) rather than
//! `x = 0`.

use crate::error::{RatchetError, Result};

/// 32 bytes per chunk == 16 lanes of `u16` (§4.6.2: "32 B" chunk payload).
pub const CHUNK_SIZE: usize = 32;
const LANES: usize = CHUNK_SIZE / 2;

/// `x^16 + x^5 + x^3 + x + 1`, a primitive polynomial over GF(2), used to
/// reduce products back into GF(2^16).
const IRREDUCIBLE: u32 = 0x1002B;

fn gf_mul(a: u16, b: u16) -> u16 {
    let mut a = a as u32;
    let mut b = b;
    let mut result: u32 = 0;
    for _ in 0..16 {
        if b & 1 == 1 {
            result ^= a;
        }
        let hi_bit_set = a & 0x8000 != 0;
        a <<= 1;
        if hi_bit_set {
            a ^= IRREDUCIBLE;
        }
        b >>= 1;
    }
    (result & 0xFFFF) as u16
}

fn gf_pow(mut base: u16, mut exp: u32) -> u16 {
    let mut result: u16 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

fn gf_inv(a: u16) -> Result<u16> {
    if a == 0 {
        return Err(RatchetError::InvalidMessage(
            "GF(2^16) inverse of zero".to_string(),
        ));
    }
    // Multiplicative group has order 2^16 - 1; a^(order-1) == a^-1.
    Ok(gf_pow(a, (u16::MAX as u32) - 1))
}

/// Lagrange-interpolate the value at `target_x` given the points `(x, y)`.
fn lagrange_eval(points: &[(u16, u16)], target_x: u16) -> Result<u16> {
    let mut total: u16 = 0;
    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut numerator: u16 = 1;
        let mut denominator: u16 = 1;
        for (j, &(xj, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator = gf_mul(numerator, target_x ^ xj);
            denominator = gf_mul(denominator, xi ^ xj);
        }
        let basis = gf_mul(numerator, gf_inv(denominator)?);
        total ^= gf_mul(yi, basis);
    }
    Ok(total)
}

fn chunk_to_lanes(chunk: &[u8; CHUNK_SIZE]) -> [u16; LANES] {
    let mut lanes = [0u16; LANES];
    for (i, lane) in lanes.iter_mut().enumerate() {
        *lane = u16::from_be_bytes([chunk[2 * i], chunk[2 * i + 1]]);
    }
    lanes
}

fn lanes_to_chunk(lanes: &[u16; LANES]) -> [u8; CHUNK_SIZE] {
    let mut chunk = [0u8; CHUNK_SIZE];
    for (i, lane) in lanes.iter().enumerate() {
        let bytes = lane.to_be_bytes();
        chunk[2 * i] = bytes[0];
        chunk[2 * i + 1] = bytes[1];
    }
    chunk
}

/// Splits a byte blob into `k = ceil(len / 32)` data chunks at x-coordinates
/// `1..=k`, and can evaluate additional redundant chunks at any other
/// x-coordinate so a receiver who loses some chunks can still recover the
/// original `k` via [`PolyDecoder`].
#[derive(Clone)]
pub struct PolyEncoder {
    original_len: usize,
    data_points: Vec<[u16; LANES]>,
}

impl PolyEncoder {
    pub fn new(data: &[u8]) -> Self {
        let k = data.len().div_ceil(CHUNK_SIZE).max(1);
        let mut data_points = Vec::with_capacity(k);
        for i in 0..k {
            let start = i * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(data.len());
            let mut chunk = [0u8; CHUNK_SIZE];
            chunk[..end - start].copy_from_slice(&data[start..end]);
            data_points.push(chunk_to_lanes(&chunk));
        }
        PolyEncoder {
            original_len: data.len(),
            data_points,
        }
    }

    pub fn k(&self) -> usize {
        self.data_points.len()
    }

    pub fn original_len(&self) -> usize {
        self.original_len
    }

    /// Evaluate the chunk at 1-indexed `chunk_index`. Indices `1..=k` return
    /// the original data verbatim; higher indices are erasure-coded
    /// redundancy derived by Lagrange interpolation through the `k` data
    /// points.
    pub fn chunk(&self, chunk_index: u32) -> Result<[u8; CHUNK_SIZE]> {
        let x = u16::try_from(chunk_index)
            .map_err(|_| RatchetError::InvalidMessage("chunk index out of range".to_string()))?;
        if x == 0 {
            return Err(RatchetError::InvalidMessage(
                "chunk index must be >= 1".to_string(),
            ));
        }
        if (x as usize) <= self.data_points.len() {
            return Ok(lanes_to_chunk(&self.data_points[x as usize - 1]));
        }
        let k = self.data_points.len();
        let mut lanes = [0u16; LANES];
        for lane_idx in 0..LANES {
            let points: Vec<(u16, u16)> = (1..=k as u16)
                .map(|xi| (xi, self.data_points[xi as usize - 1][lane_idx]))
                .collect();
            lanes[lane_idx] = lagrange_eval(&points, x)?;
        }
        Ok(lanes_to_chunk(&lanes))
    }
}

/// Reassembles a byte blob from any `k` distinct received chunks, once `k`
/// (the original chunk count) is known.
#[derive(Clone)]
pub struct PolyDecoder {
    k: usize,
    original_len: usize,
    received: Vec<(u16, [u16; LANES])>,
}

impl PolyDecoder {
    pub fn new(k: usize, original_len: usize) -> Self {
        PolyDecoder {
            k,
            original_len,
            received: Vec::with_capacity(k),
        }
    }

    pub fn have_enough(&self) -> bool {
        self.received.len() >= self.k
    }

    pub fn add_chunk(&mut self, chunk_index: u32, chunk: &[u8; CHUNK_SIZE]) -> Result<()> {
        let x = u16::try_from(chunk_index)
            .map_err(|_| RatchetError::InvalidMessage("chunk index out of range".to_string()))?;
        if x == 0 {
            return Err(RatchetError::InvalidMessage(
                "chunk index must be >= 1".to_string(),
            ));
        }
        if self.received.iter().any(|(xi, _)| *xi == x) {
            return Ok(()); // duplicate chunk, ignore
        }
        self.received.push((x, chunk_to_lanes(chunk)));
        Ok(())
    }

    /// Recover the original bytes once `have_enough` is true.
    pub fn decode(&self) -> Result<Vec<u8>> {
        if !self.have_enough() {
            return Err(RatchetError::InvalidMessage(
                "not enough chunks to decode".to_string(),
            ));
        }
        let used = &self.received[..self.k];
        let mut out = Vec::with_capacity(self.k * CHUNK_SIZE);
        for target_x in 1..=self.k as u16 {
            let mut lanes = [0u16; LANES];
            for lane_idx in 0..LANES {
                let points: Vec<(u16, u16)> = used
                    .iter()
                    .map(|(xi, lanes)| (*xi, lanes[lane_idx]))
                    .collect::<Vec<_>>();
                lanes[lane_idx] = lagrange_eval(&points, target_x)?;
            }
            out.extend_from_slice(&lanes_to_chunk(&lanes));
        }
        out.truncate(self.original_len);
        Ok(out)
    }
}
