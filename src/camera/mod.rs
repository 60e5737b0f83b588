pub mod v4l2;

pub use v4l2::{Camera, CameraInfo, CameraStream, frame_to_image};
