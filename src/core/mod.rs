//! Core math, image, and sensor types shared across the pipeline.

pub mod camera;
pub mod image;
pub mod pose;
pub mod view;

pub use camera::Intrinsics;
pub use image::{DepthImage, Image, ImageSize, RawDepthImage, RgbaImage};
pub use pose::Pose;
pub use view::{ImuMeasurement, View};
