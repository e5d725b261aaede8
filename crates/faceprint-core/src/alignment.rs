//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a face so its five landmarks land on the canonical keypoints of a
//! 112×112 encoder input, using least-squares estimation of scale, rotation
//! and translation.

use crate::types::Landmarks;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

/// Canonical keypoints for a 112×112 encoder input.
pub const CANONICAL_KEYPOINTS_112: Landmarks = [
    (38.2946, 59.6963),    // left eye
    (73.5318, 59.5014),    // right eye
    (56.0252, 79.7366),    // nose
    (41.5493, 100.3655),   // left mouth
    (70.729904, 100.2041), // right mouth
];

const CANONICAL_SIZE: f32 = 112.0;

/// Canonical keypoints rescaled to a `size × size` output.
pub fn canonical_keypoints(size: u32) -> Landmarks {
    canonical_keypoints_in(size, size)
}

/// Canonical keypoints for a `width × height` output.
///
/// The 112×112 template is scaled uniformly to fit the shorter side and
/// centred on the longer one, so face proportions are kept.
pub fn canonical_keypoints_in(width: u32, height: u32) -> Landmarks {
    let side = width.min(height) as f32;
    let k = side / CANONICAL_SIZE;
    let off_x = (width as f32 - side) / 2.0;
    let off_y = (height as f32 - side) / 2.0;
    CANONICAL_KEYPOINTS_112.map(|(x, y)| (x * k + off_x, y * k + off_y))
}

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
pub fn estimate_similarity_transform(src: &Landmarks, dst: &Landmarks) -> [f32; 6] {
    // Overdetermined system A * [a, b, tx, ty]^T = B, two rows per point:
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f64; 16];
    let mut atb = [0.0f64; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy, dx, dy) = (sx as f64, sy as f64, dx as f64, dy as f64);
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let [a, b, tx, ty] = solve_4x4(&ata, &atb).map(|v| v as f32);
    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f64; 16], atb: &[f64; 4]) -> [f64; 4] {
    let mut m = [[0.0f64; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i * 4..i * 4 + 4]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let max_row = (col..4)
            .max_by(|&p, &q| m[p][col].abs().total_cmp(&m[q][col].abs()))
            .unwrap_or(col);
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            // Degenerate landmarks (all coincident): identity.
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f64; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Apply a similarity warp to produce a `out_width × out_height` RGB image.
///
/// Uses bilinear interpolation. Out-of-bounds pixels are black.
pub fn warp_affine(img: &RgbImage, matrix: &[f32; 6], out_width: u32, out_height: u32) -> RgbImage {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);
    let (src_w, src_h) = (img.width() as i64, img.height() as i64);

    let mut output = RgbImage::new(out_width, out_height);

    // M = [[a, -b], [b, a]], det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return output;
    }
    let ia = a / det;
    let ib = b / det;

    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < src_w && y >= 0 && y < src_h {
            img.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    for (ox, oy, out) in output.enumerate_pixels_mut() {
        // src = M^-1 * (dst - t)
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let mut px = [0u8; 3];
        for (c, v) in px.iter_mut().enumerate() {
            let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            *v = val.round().clamp(0.0, 255.0) as u8;
        }
        *out = Rgb(px);
    }

    output
}

/// Align a face to a canonical `size × size` crop.
pub fn align_face(img: &DynamicImage, landmarks: &Landmarks, size: u32) -> RgbImage {
    align_face_to(img, landmarks, size, size)
}

/// Align a face to a canonical `width × height` crop.
///
/// Computes the similarity transform from the detected landmarks to the
/// canonical keypoints and warps the face region into place. The output
/// already has the target size, so no further (anisotropic) resize is needed.
pub fn align_face_to(img: &DynamicImage, landmarks: &Landmarks, width: u32, height: u32) -> RgbImage {
    let matrix = estimate_similarity_transform(landmarks, &canonical_keypoints_in(width, height));
    tracing::trace!(?matrix, width, height, "alignment transform");

    match img.as_rgb8() {
        Some(rgb) => warp_affine(rgb, &matrix, width, height),
        None => warp_affine(&img.to_rgb8(), &matrix, width, height),
    }
}

/// True when every landmark is finite and lies inside the image.
pub fn landmarks_within(img: &DynamicImage, landmarks: &Landmarks) -> bool {
    let (w, h) = img.dimensions();
    landmarks.iter().all(|&(x, y)| {
        x.is_finite() && y.is_finite() && x >= 0.0 && y >= 0.0 && x < w as f32 && y < h as f32
    })
}
