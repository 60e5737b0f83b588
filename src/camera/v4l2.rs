use crate::common::{Config, Result, SecureAuthError};
use crate::common::config::CameraConfig;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};
use image::{DynamicImage, ImageBuffer, Luma};
use std::fs;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// Summary of a `/dev/video*` node.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub features: Vec<String>,
    pub likely_ir: bool,
}

pub struct Camera;

impl Camera {
    /// List all available cameras with their capabilities
    pub fn list_all_cameras() -> Result<Vec<CameraInfo>> {
        let mut cameras = Vec::new();

        for index in video_node_indices()? {
            let Ok(device) = Device::new(index as usize) else { continue };
            let Ok(caps) = device.query_caps() else { continue };

            let mut features = Vec::new();
            let mut likely_ir = false;

            if caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                features.push("VIDEO_CAPTURE".to_string());
            }

            let formats = device.enum_formats().unwrap_or_default();
            for fmt in &formats {
                let fourcc_str = fmt.fourcc.str().unwrap_or("UNKNOWN");
                if is_grayscale(fourcc_str) {
                    features.push(format!("Grayscale ({})", fourcc_str));
                    likely_ir = true;
                } else if fourcc_str == "MJPG" || fourcc_str == "YUYV" {
                    features.push(format!("Color ({})", fourcc_str));
                }
            }

            if caps.card.contains("IR") || caps.card.contains("Infrared") {
                likely_ir = true;
            }

            cameras.push(CameraInfo { index, name: caps.card.clone(), features, likely_ir });
        }

        cameras.sort_by_key(|c| c.index);
        Ok(cameras)
    }

    /// Picks a capture device: the first color camera, else any capture device, else 0.
    pub fn detect_default_camera() -> Result<u32> {
        let cameras = Self::list_all_cameras()?;

        let color = cameras.iter().find(|c| {
            c.features.iter().any(|f| f == "VIDEO_CAPTURE")
                && c.features.iter().any(|f| f.starts_with("Color"))
        });
        let any_capture = cameras.iter().find(|c| c.features.iter().any(|f| f == "VIDEO_CAPTURE"));

        match color.or(any_capture) {
            Some(camera) => {
                tracing::info!("Selected camera: /dev/video{} ({})", camera.index, camera.name);
                Ok(camera.index)
            }
            None => {
                tracing::warn!("No capture camera detected, falling back to device 0");
                Ok(0)
            }
        }
    }

    pub fn resolve_device_index(config: &CameraConfig) -> Result<u32> {
        if config.device_index == 999 {
            // Special value 999 means auto-detect
            Self::detect_default_camera()
        } else {
            Ok(config.device_index)
        }
    }

    pub fn open_device(index: u32, config: &CameraConfig) -> Result<Device> {
        tracing::debug!("Opening camera device {}", index);

        let device = Device::new(index as usize)
            .map_err(|e| SecureAuthError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| SecureAuthError::Camera(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} may not support standard video capture", index);
        }

        let mut fmt = device.format()
            .map_err(|e| SecureAuthError::Camera(format!("Failed to get format: {}", e)))?;

        fmt.width = config.width;
        fmt.height = config.height;

        // Keep grayscale for IR sensors, otherwise ask for MJPG
        if !is_grayscale(fmt.fourcc.str().unwrap_or("")) {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        // Try to set format, but don't fail if exact resolution isn't supported
        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let final_fmt = device.format()
            .map_err(|e| SecureAuthError::Camera(format!("Failed to get final format: {}", e)))?;
        if final_fmt.width != config.width || final_fmt.height != config.height {
            tracing::warn!("Camera resolution {}x{} differs from requested {}x{}",
                           final_fmt.width, final_fmt.height, config.width, config.height);
        }

        Ok(device)
    }

    /// Grabs a single frame with warmup, opening and closing the device.
    pub fn capture_single(config: &Config) -> Result<DynamicImage> {
        let index = Self::resolve_device_index(&config.camera)?;
        let device = Self::open_device(index, &config.camera)?;
        let fmt = device.format()
            .map_err(|e| SecureAuthError::Camera(format!("Failed to get format: {}", e)))?;

        let mut stream = v4l::io::mmap::Stream::with_buffers(&device, Type::VideoCapture, 4)
            .map_err(|e| SecureAuthError::Camera(format!("Failed to create stream: {}", e)))?;

        warm_up(&mut stream, &config.camera)?;
        next_frame(&mut stream, &fmt)
    }
}

type FrameReply = oneshot::Sender<Result<DynamicImage>>;

/// Live camera stream served by a dedicated capture thread.
///
/// The device is opened and closed on that thread; dropping or stopping the
/// stream ends the thread and frees the hardware.
pub struct CameraStream {
    requests: Option<mpsc::Sender<FrameReply>>,
    worker: Option<JoinHandle<()>>,
}

impl CameraStream {
    /// Opens the camera and runs warmup. Blocks until the device is ready.
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let index = Camera::resolve_device_index(config)?;
        let config = config.clone();
        let (request_tx, request_rx) = mpsc::channel::<FrameReply>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let worker = std::thread::Builder::new()
            .name(format!("camera-{}", index))
            .spawn(move || capture_loop(index, config, ready_tx, request_rx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { requests: Some(request_tx), worker: Some(worker) }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(SecureAuthError::Camera("Capture thread exited during startup".into()))
            }
        }
    }

    pub async fn capture_frame(&self) -> Result<DynamicImage> {
        let requests = self.requests.as_ref()
            .ok_or_else(|| SecureAuthError::Camera("Camera stream already stopped".into()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        requests.send(reply_tx)
            .map_err(|_| SecureAuthError::Camera("Capture thread is gone".into()))?;
        reply_rx.await
            .map_err(|_| SecureAuthError::Camera("Capture thread dropped the frame request".into()))?
    }

    /// Stops the capture thread and waits for the device to close.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Closing the request channel ends the capture loop.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Camera capture thread panicked");
            }
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn capture_loop(
    index: u32,
    config: CameraConfig,
    ready: mpsc::Sender<Result<()>>,
    requests: mpsc::Receiver<FrameReply>,
) {
    let device = match Camera::open_device(index, &config) {
        Ok(device) => device,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let fmt = match device.format() {
        Ok(fmt) => fmt,
        Err(e) => {
            let _ = ready.send(Err(SecureAuthError::Camera(format!("Failed to get format: {}", e))));
            return;
        }
    };
    let mut stream = match v4l::io::mmap::Stream::with_buffers(&device, Type::VideoCapture, 8) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(SecureAuthError::Camera(format!("Failed to create stream: {}", e))));
            return;
        }
    };

    if let Err(e) = warm_up(&mut stream, &config) {
        let _ = ready.send(Err(e));
        return;
    }
    tracing::info!("Camera /dev/video{} ready", index);
    if ready.send(Ok(())).is_err() {
        return;
    }

    while let Ok(reply) = requests.recv() {
        let _ = reply.send(next_frame(&mut stream, &fmt));
    }
    tracing::debug!("Camera /dev/video{} released", index);
}

fn warm_up(stream: &mut v4l::io::mmap::Stream, config: &CameraConfig) -> Result<()> {
    for i in 0..config.warmup_frames {
        stream.next()
            .map_err(|e| SecureAuthError::Camera(format!("Failed to capture warmup frame {}: {}", i, e)))?;
        std::thread::sleep(Duration::from_millis(config.warmup_delay_ms));
    }
    Ok(())
}

fn next_frame(stream: &mut v4l::io::mmap::Stream, fmt: &v4l::Format) -> Result<DynamicImage> {
    let (buf, _meta) = stream.next()
        .map_err(|e| SecureAuthError::Camera(format!("Failed to capture: {}", e)))?;
    frame_to_image(fmt.fourcc.str().unwrap_or(""), buf, fmt.width, fmt.height)
}

/// Decodes a raw frame buffer in the given pixel format.
pub fn frame_to_image(fourcc: &str, data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    match fourcc {
        "GREY" | "Y8" => grey_to_image(data, width, height),
        "YUYV" => {
            // Luma is every other byte
            let luma: Vec<u8> = data.iter().step_by(2).copied().collect();
            grey_to_image(&luma, width, height)
        }
        "MJPG" => Ok(image::load_from_memory(data)?),
        other => Err(SecureAuthError::Camera(format!("Unsupported pixel format: {:?}", other))),
    }
}

fn grey_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let expected = (width as usize) * (height as usize);
    if data.len() < expected {
        return Err(SecureAuthError::Camera(format!(
            "Frame too short: {} bytes for {}x{}", data.len(), width, height
        )));
    }
    let img_buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data[..expected].to_vec())
        .ok_or_else(|| SecureAuthError::Camera("Failed to create grayscale image buffer".into()))?;

    Ok(DynamicImage::ImageLuma8(img_buffer))
}

fn is_grayscale(fourcc: &str) -> bool {
    matches!(fourcc, "GREY" | "Y8" | "Y16")
}

fn video_node_indices() -> Result<Vec<u32>> {
    let mut indices = Vec::new();
    for entry in fs::read_dir("/dev")? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(index) = name.to_str()
            .and_then(|n| n.strip_prefix("video"))
            .and_then(|n| n.parse::<u32>().ok())
        {
            indices.push(index);
        }
    }
    Ok(indices)
}
