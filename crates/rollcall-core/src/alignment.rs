//! Face alignment via a least-squares similarity transform.
//!
//! Maps the five detected landmarks onto the InsightFace reference template
//! and resamples a canonical 112×112 crop for the recognizer.

use crate::types::{Landmarks, Point};
use image::{Rgb, RgbImage};

/// Side length of the aligned crop.
pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [Point; 5] = [
    Point::new(38.2946, 51.6963), // left eye
    Point::new(73.5318, 51.5014), // right eye
    Point::new(56.0252, 71.7366), // nose
    Point::new(41.5493, 92.3655), // left mouth
    Point::new(70.7299, 92.2041), // right mouth
];

/// 4-DOF similarity transform: `dst = [a -b; b a] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x - self.b * p.y + self.tx,
            self.b * p.x + self.a * p.y + self.ty,
        )
    }

    /// Map a destination point back into source space.
    pub fn invert(&self, p: Point) -> Point {
        let k = self.a * self.a + self.b * self.b;
        let (dx, dy) = (p.x - self.tx, p.y - self.ty);
        Point::new(
            (self.a * dx + self.b * dy) / k,
            (-self.b * dx + self.a * dy) / k,
        )
    }
}

/// Closed-form least-squares fit of `src -> dst`.
///
/// Returns `None` when the source points are (nearly) coincident.
pub fn estimate_similarity(src: &[Point; 5], dst: &[Point; 5]) -> Option<Similarity> {
    let mean = |pts: &[Point; 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), p| (ax + p.x, ay + p.y));
        Point::new(sx / 5.0, sy / 5.0)
    };
    let sm = mean(src);
    let dm = mean(dst);

    let mut norm = 0.0f32;
    let mut num_a = 0.0f32;
    let mut num_b = 0.0f32;
    for (s, d) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (s.x - sm.x, s.y - sm.y);
        let (dx, dy) = (d.x - dm.x, d.y - dm.y);
        norm += sx * sx + sy * sy;
        num_a += sx * dx + sy * dy;
        num_b += sx * dy - sy * dx;
    }

    if norm < 1e-6 {
        return None;
    }

    let a = num_a / norm;
    let b = num_b / norm;
    Some(Similarity {
        a,
        b,
        tx: dm.x - (a * sm.x - b * sm.y),
        ty: dm.y - (b * sm.x + a * sm.y),
    })
}

/// Produce the 112×112 aligned crop, or `None` for degenerate landmarks.
pub fn align_face(image: &RgbImage, landmarks: &Landmarks) -> Option<RgbImage> {
    let transform = estimate_similarity(&landmarks.to_array(), &REFERENCE_LANDMARKS_112)?;
    if transform.a == 0.0 && transform.b == 0.0 {
        return None;
    }

    Some(RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |u, v| {
        let src = transform.invert(Point::new(u as f32, v as f32));
        Rgb([0, 1, 2].map(|c| sample_bilinear(image, c, src.x, src.y)))
    }))
}

/// Bilinear sample of one channel; pixels outside the image read as black.
fn sample_bilinear(image: &RgbImage, channel: usize, x: f32, y: f32) -> u8 {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || x < -1.0 || y < -1.0 || x >= w as f32 || y >= h as f32 {
        return 0;
    }

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let px = |xi: f32, yi: f32| -> f32 {
        if xi < 0.0 || yi < 0.0 || xi >= w as f32 || yi >= h as f32 {
            0.0
        } else {
            image.get_pixel(xi as u32, yi as u32)[channel] as f32
        }
    };

    let val = px(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + px(x0 + 1.0, y0) * fx * (1.0 - fy)
        + px(x0, y0 + 1.0) * (1.0 - fx) * fy
        + px(x0 + 1.0, y0 + 1.0) * fx * fy;

    val.round().clamp(0.0, 255.0) as u8
}
