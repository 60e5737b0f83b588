use crate::common::{Config, Result, SecureAuthError, resolve_model_path};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

const NMS_IOU_THRESHOLD: f32 = 0.45;
const MAX_FACES: usize = 5;
const MIN_BOX_SIZE: f32 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

pub struct FaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
}

pub(crate) fn build_session(
    environment: &Arc<Environment>,
    model_path: &std::path::Path,
    optimization_level: u32,
) -> Result<Session> {
    if !model_path.exists() {
        return Err(SecureAuthError::Model(format!("Model not found at: {:?}", model_path)));
    }

    let opt_level = match optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };
    let session = SessionBuilder::new(environment)?
        .with_optimization_level(opt_level)?
        .with_model_from_file(model_path)?;
    Ok(session)
}

impl FaceDetector {
    pub fn new(config: &Config) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_detector")
                .build()
                .map_err(|e| SecureAuthError::Model(format!("Failed to create environment: {}", e)))?
        );

        let model_path = resolve_model_path(&config.models.detector_path);
        let session = build_session(&environment, &model_path, config.performance.optimization_level)?;

        Ok(Self {
            session,
            _environment: environment,
            input_width: config.detector.input_width,
            input_height: config.detector.input_height,
            confidence_threshold: config.biometric.detection_confidence,
        })
    }

    /// Detects faces, in original image coordinates, best first.
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let img_array = if image.width() == self.input_width && image.height() == self.input_height {
            self.image_to_array(image)
        } else {
            let resized = image.resize_exact(self.input_width, self.input_height, FilterType::Nearest);
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let Some(output) = outputs.first() else {
            return Ok(Vec::new());
        };
        let tensor = output.try_extract::<f32>()?;
        let view = tensor.view();
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();

        let mut faces = parse_detections(
            &data,
            &shape,
            self.input_width as f32,
            self.input_height as f32,
            self.confidence_threshold,
        );

        // Scale coordinates back to original image dimensions
        let scale_x = orig_width / self.input_width as f32;
        let scale_y = orig_height / self.input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let width = img.width() as usize;
        let height = img.height() as usize;
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        let norm_factor = 1.0 / 255.0;
        for (x, y, pixel) in gray.enumerate_pixels() {
            let value = pixel[0] as f32 * norm_factor;
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = value;
            array[[0, 1, y, x]] = value;
            array[[0, 2, y, x]] = value;
        }

        array
    }
}

/// Decodes YOLO-style output (`[1, N, 5+]` or transposed `[1, 5+, N]`),
/// applies NMS, then the confidence threshold.
pub fn parse_detections(
    data: &[f32],
    shape: &[usize],
    input_width: f32,
    input_height: f32,
    confidence_threshold: f32,
) -> Vec<FaceBox> {
    let (num_predictions, prediction_length, is_transposed) = match shape.len() {
        n if n >= 3 => {
            if shape[2] > shape[1] && shape[1] <= 10 {
                (shape[2], shape[1], true)
            } else {
                (shape[1], shape[2], false)
            }
        }
        2 => (shape[0], shape[1], false),
        _ => {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Vec::new();
        }
    };
    if prediction_length < 4 || data.len() < num_predictions * prediction_length {
        tracing::warn!("Detector output too short for shape {:?}", shape);
        return Vec::new();
    }

    let value = |i: usize, field: usize| -> f32 {
        if field >= prediction_length {
            return 0.0;
        }
        if is_transposed {
            data[field * num_predictions + i]
        } else {
            data[i * prediction_length + field]
        }
    };

    let mut faces = Vec::new();
    for i in 0..num_predictions {
        let (xc, yc, w, h, confidence) = (value(i, 0), value(i, 1), value(i, 2), value(i, 3), value(i, 4));

        // Coordinates may be normalized
        let scale = if xc > 1.0 || yc > 1.0 || w > 1.0 || h > 1.0 { 1.0 } else { input_width };
        let (xc, yc, w, h) = (xc * scale, yc * scale, w * scale, h * scale);

        if confidence <= 0.001 {
            continue;
        }

        let x1 = (xc - w / 2.0).max(0.0);
        let y1 = (yc - h / 2.0).max(0.0);
        let x2 = (xc + w / 2.0).min(input_width);
        let y2 = (yc + h / 2.0).min(input_height);

        if x2 - x1 > MIN_BOX_SIZE && y2 - y1 > MIN_BOX_SIZE {
            faces.push(FaceBox { x1, y1, x2, y2, confidence });
        }
    }

    // NMS before thresholding so duplicates of a strong face are removed
    let mut faces = apply_nms(faces, NMS_IOU_THRESHOLD);
    faces.retain(|face| face.confidence >= confidence_threshold);
    faces.truncate(MAX_FACES);
    faces
}

/// Greedy non-maximum suppression. Output is sorted by confidence.
pub fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| calculate_iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

pub fn calculate_iou(box1: &FaceBox, box2: &FaceBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1.x2 - box1.x1) * (box1.y2 - box1.y1);
    let area2 = (box2.x2 - box2.x1) * (box2.y2 - box2.y1);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceBox {
        FaceBox { x1, y1, x2, y2, confidence }
    }

    #[test]
    fn test_iou() {
        let a = face(0.0, 0.0, 10.0, 10.0, 0.9);
        assert!((calculate_iou(&a, &a) - 1.0).abs() < 1e-6);
        let b = face(20.0, 20.0, 30.0, 30.0, 0.9);
        assert_eq!(calculate_iou(&a, &b), 0.0);
        let c = face(5.0, 0.0, 15.0, 10.0, 0.9);
        assert!((calculate_iou(&a, &c) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_drops_overlapping_duplicates() {
        let boxes = vec![
            face(0.0, 0.0, 100.0, 100.0, 0.8),
            face(2.0, 2.0, 102.0, 102.0, 0.9),
            face(300.0, 300.0, 400.0, 400.0, 0.7),
        ];
        let kept = apply_nms(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_parse_standard_layout() {
        // [1, 12, 5]: two real faces, one below threshold, the rest empty
        let mut data = vec![
            100.0, 100.0, 80.0, 80.0, 0.95,
            400.0, 300.0, 90.0, 90.0, 0.85,
            500.0, 500.0, 50.0, 50.0, 0.2,
        ];
        data.resize(12 * 5, 0.0);
        let faces = parse_detections(&data, &[1, 12, 5], 640.0, 640.0, 0.5);
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].confidence, 0.95);
        assert!((faces[0].x1 - 60.0).abs() < 1e-4);
    }

    #[test]
    fn test_parse_transposed_layout() {
        // [1, 5, 20]: one face at column 3
        let n = 20;
        let mut data = vec![0.0f32; 5 * n];
        data[3] = 320.0;
        data[n + 3] = 320.0;
        data[2 * n + 3] = 100.0;
        data[3 * n + 3] = 120.0;
        data[4 * n + 3] = 0.9;
        let faces = parse_detections(&data, &[1, 5, n], 640.0, 640.0, 0.5);
        assert_eq!(faces.len(), 1);
        assert!((faces[0].y2 - faces[0].y1 - 120.0).abs() < 1e-4);
    }

    #[test]
    fn test_parse_rejects_bad_shape() {
        assert!(parse_detections(&[1.0, 2.0], &[2], 640.0, 640.0, 0.5).is_empty());
        assert!(parse_detections(&[1.0; 5], &[1, 12, 5], 640.0, 640.0, 0.5).is_empty());
    }
}
