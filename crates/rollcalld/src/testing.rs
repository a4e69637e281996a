//! Test doubles for the face pipeline.
//!
//! Test images are uniform squares; the level stands in for "who" is in the
//! picture. Level 0 has no face. `describe` reads the red channel and sets
//! the descriptor's first component to `level / 10` (rest zero), so levels
//! 10 and 13 are 0.3 apart while 10 and 30 are 2.0 apart. `locate` reads the
//! gray level and puts the nose `level - 100` pixels right of the eye midpoint.

use crate::decode::encode_png;
use crate::engine::{EngineError, FacePipeline};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use rollcall_core::{Descriptor, FaceBox, Landmarks};
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct StubPipeline {
    pub dim: usize,
    pub describe_calls: AtomicUsize,
}

impl StubPipeline {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            describe_calls: AtomicUsize::new(0),
        }
    }
}

fn level(image: &GrayImage) -> u8 {
    image.get_pixel(0, 0)[0]
}

#[async_trait]
impl FacePipeline for StubPipeline {
    async fn locate(&self, image: GrayImage) -> Result<Option<FaceBox>, EngineError> {
        let v = level(&image);
        if v == 0 {
            return Ok(None);
        }
        let nose_x = 130.0 + (v as f32 - 100.0);
        Ok(Some(FaceBox {
            x: 80.0,
            y: 80.0,
            width: 100.0,
            height: 120.0,
            confidence: 0.9,
            landmarks: Some(Landmarks::from_array([
                (100.0, 100.0),
                (160.0, 100.0),
                (nose_x, 130.0),
                (110.0, 160.0),
                (150.0, 160.0),
            ])),
        }))
    }

    async fn describe(&self, image: RgbImage) -> Result<Option<Descriptor>, EngineError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let v = image.get_pixel(0, 0)[0];
        if v == 0 {
            return Ok(None);
        }
        let mut values = vec![0.0; self.dim];
        values[0] = v as f32 / 10.0;
        Ok(Some(Descriptor::new(values)))
    }
}

/// Base64 PNG of a uniform image at the given gray level.
pub fn face_png(level: u8) -> String {
    let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([level])));
    BASE64.encode(encode_png(&image).unwrap())
}

/// Base64 PNG of a uniform colour image.
pub fn colour_png(rgb: [u8; 3]) -> String {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb(rgb)));
    BASE64.encode(encode_png(&image).unwrap())
}
