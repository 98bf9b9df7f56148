//! BT.601 (studio swing) conversions between packed BGRA and planar I420.
//!
//! The packed format stores each pixel as the bytes `B, G, R, A`, which is a
//! little-endian `0xAARRGGBB` word (what most consumers call ARGB).

use super::layout::{I420Layout, PACKED_BPP};

/// Alpha written into every packed pixel
pub const OPAQUE: u8 = 0xff;

const SHIFT: u32 = 16;
const HALF: i64 = 1 << (SHIFT - 1);

// Rows of the exact inverse of the decode matrix in `yuv_to_bgra`, scaled by
// 2^16, applied to (R, G, B). Analysing a decoded pixel therefore lands within
// 0.44 of the sample it was decoded from.
const Y_ROW: [i64; 3] = [16819, 33071, 6409];
const U_ROW: [i64; 3] = [-9713, -19099, 28813];
const V_ROW: [i64; 3] = [28766, -24096, -4670];

#[inline(always)]
fn dot(row: &[i64; 3], r: i64, g: i64, b: i64) -> i64 {
    row[0] * r + row[1] * g + row[2] * b
}

#[inline(always)]
fn rgb_to_y(r: i32, g: i32, b: i32) -> i32 {
    16 + ((dot(&Y_ROW, r as i64, g as i64, b as i64) + HALF) >> SHIFT) as i32
}

/// Chroma of the mean of `n` pixels whose channels sum to `r, g, b`.
#[inline(always)]
fn chroma(row: &[i64; 3], r: i32, g: i32, b: i32, n: i32) -> u8 {
    let n = n as i64;
    let c = (dot(row, r as i64, g as i64, b as i64) + n * HALF).div_euclid(n << SHIFT);
    clamp(128 + c as i32)
}

#[inline(always)]
fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Luma values that decode with chroma `u, v` without any channel clipping,
/// or `None` when that chroma is outside the gamut at every luma.
fn luma_range(u: u8, v: u8) -> Option<(u8, u8)> {
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let (mut lo, mut hi) = (0i32, 255i32);
    for k in [409 * e, -100 * d - 208 * e, 516 * d] {
        // 0 <= 298 * (y - 16) + k + 128 <= 0xffff
        lo = lo.max(16 - (k + 128).div_euclid(298));
        hi = hi.min(16 + (0xffff - k - 128).div_euclid(298));
    }
    (lo <= hi).then_some((lo as u8, hi as u8))
}

#[inline(always)]
fn toward_grey(c: u8) -> u8 {
    match c {
        0..=127 => c + 1,
        128 => c,
        _ => c - 1,
    }
}

/// Writes one `B, G, R, A` pixel from a Y/U/V sample.
#[inline(always)]
fn yuv_to_bgra(y: u8, u: u8, v: u8, out: &mut [u8]) {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    out[0] = clamp((c + 516 * d + 128) >> 8);
    out[1] = clamp((c - 100 * d - 208 * e + 128) >> 8);
    out[2] = clamp((c + 409 * e + 128) >> 8);
    out[3] = OPAQUE;
}

/// Converts packed BGRA into planar I420.
///
/// Chroma is computed once per 2x2 block from the block's mean color; blocks
/// on an odd right/bottom edge average the pixels they have. Luma is computed
/// per pixel and limited to the range the block's chroma decodes without
/// clipping. Chroma no luma can carry is pulled toward grey until one can.
/// The output therefore always decodes unclipped, and converting the decoded
/// image again reproduces it exactly.
pub fn packed_to_planar_into(packed: &[u8], layout: &I420Layout, planar: &mut [u8]) {
    let (width, height) = (layout.width, layout.height);
    assert_eq!(packed.len(), width * height * PACKED_BPP, "packed buffer size mismatch");

    let (y_plane, u_plane, v_plane) = layout.planes_mut(planar);

    for cy in 0..layout.chroma_height {
        let rows = (cy * 2)..(cy * 2 + 2).min(height);
        for cx in 0..layout.chroma_width {
            let cols = (cx * 2)..(cx * 2 + 2).min(width);

            let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
            for row in rows.clone() {
                for col in cols.clone() {
                    let px = &packed[(row * width + col) * PACKED_BPP..];
                    b += px[0] as i32;
                    g += px[1] as i32;
                    r += px[2] as i32;
                    n += 1;
                }
            }

            let (mut u, mut v) = (chroma(&U_ROW, r, g, b, n), chroma(&V_ROW, r, g, b, n));
            let (lo, hi) = loop {
                match luma_range(u, v) {
                    Some(range) => break range,
                    None => (u, v) = (toward_grey(u), toward_grey(v)),
                }
            };

            let idx = cy * layout.chroma_width + cx;
            u_plane[idx] = u;
            v_plane[idx] = v;

            for row in rows.clone() {
                for col in cols.clone() {
                    let px = &packed[(row * width + col) * PACKED_BPP..];
                    let y = rgb_to_y(px[2] as i32, px[1] as i32, px[0] as i32);
                    y_plane[row * width + col] = y.clamp(lo as i32, hi as i32) as u8;
                }
            }
        }
    }
}

/// Converts planar I420 into packed BGRA.
///
/// Each chroma sample is replicated over its 2x2 block; alpha is [`OPAQUE`].
pub fn planar_to_packed_into(planar: &[u8], layout: &I420Layout, packed: &mut [u8]) {
    let width = layout.width;
    assert_eq!(packed.len(), width * layout.height * PACKED_BPP, "packed buffer size mismatch");

    let (y_plane, u_plane, v_plane) = layout.planes(planar);

    for (row, dst_row) in packed.chunks_exact_mut((width * PACKED_BPP).max(1)).enumerate() {
        let y_row = &y_plane[row * width..(row + 1) * width];
        let chroma_row = (row / 2) * layout.chroma_width;
        for (col, out) in dst_row.chunks_exact_mut(PACKED_BPP).enumerate() {
            let c = chroma_row + col / 2;
            yuv_to_bgra(y_row[col], u_plane[c], v_plane[c], out);
        }
    }
}

pub fn packed_to_planar(packed: &[u8], width: u32, height: u32) -> Vec<u8> {
    let layout = I420Layout::new(width, height);
    let mut planar = vec![0u8; layout.len()];
    packed_to_planar_into(packed, &layout, &mut planar);
    planar
}

pub fn planar_to_packed(planar: &[u8], width: u32, height: u32) -> Vec<u8> {
    let layout = I420Layout::new(width, height);
    let mut packed = vec![0u8; width as usize * height as usize * PACKED_BPP];
    planar_to_packed_into(planar, &layout, &mut packed);
    packed
}

/// Converts a YUYV (4:2:2 interleaved) image into packed BGRA, keeping the
/// leftmost `width` columns of a `src_width` wide source.
pub fn yuyv_to_packed_into(yuyv: &[u8], src_width: usize, width: usize, height: usize, packed: &mut [u8]) {
    assert!(width <= src_width && width % 2 == 0, "crop width must be even and fit the source");
    assert!(yuyv.len() >= src_width * height * 2, "yuyv buffer too small");
    assert_eq!(packed.len(), width * height * PACKED_BPP, "packed buffer size mismatch");

    for row in 0..height {
        let src = &yuyv[row * src_width * 2..row * src_width * 2 + width * 2];
        let dst = &mut packed[row * width * PACKED_BPP..(row + 1) * width * PACKED_BPP];
        for (quad, out) in src.chunks_exact(4).zip(dst.chunks_exact_mut(2 * PACKED_BPP)) {
            let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
            yuv_to_bgra(y0, u, v, &mut out[..PACKED_BPP]);
            yuv_to_bgra(y1, u, v, &mut out[PACKED_BPP..]);
        }
    }
}
