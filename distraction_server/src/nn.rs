//! Face detection and facial landmark networks.
//!
//! Landmarks are found in two stages. `UltrafaceModel` locates face candidates in the full
//! frame, then `FaceMeshModel` estimates 468 landmarks and a face-presence score on a square
//! crop around the most confident face. `MeshLandmarker` glues both together and keeps
//! following a face with the mesh alone as long as its presence score stays high enough.
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::s;
use tract_onnx::prelude::*;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = TVec<TValue>;

/// Bounding box in normalized coordinates.
///
/// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`, with the coordinate frame basis
/// in the top left corner of the image.
pub type Bbox = [f32; 4];

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Side length of the square face mesh input.
pub const FACE_MESH_INPUT_SIZE: u32 = 192;

/// Number of landmarks estimated by the face mesh.
pub const FACE_MESH_NUM_LANDMARKS: usize = 468;

/// Padding added to every side of a face region before cropping, relative to its size.
pub const DEFAULT_ROI_PADDING: f32 = 0.3;

/// Run a neural network on a full RGB image.
pub trait InferModel {
    type Output;

    fn run(&self, input: &RgbImage) -> Result<Self::Output>;
}

/// Anything that can tell whether there are facial landmarks in a frame.
pub trait FaceLandmarker {
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<FaceLandmarks>>;
}

/// Single facial landmark in normalized frame coordinates.
///
/// `z` is the relative depth, scaled like `x`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Landmarks of the one face found in a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceLandmarks {
    pub points: Vec<Landmark>,
    /// Face presence probability reported by the mesh.
    pub presence: f32,
    /// Region the mesh was run on.
    pub roi: Bbox,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UltrafaceVariant {
    #[value(name = "w320h240")]
    W320H240,
    #[value(name = "w640h480")]
    W640H480,
}

impl UltrafaceVariant {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            UltrafaceVariant::W320H240 => (320, 240),
            UltrafaceVariant::W640H480 => (640, 480),
        }
    }

    pub fn filename(&self) -> &'static str {
        match self {
            UltrafaceVariant::W320H240 => "version-RFB-320.onnx",
            UltrafaceVariant::W640H480 => "version-RFB-640.onnx",
        }
    }

    pub fn url(&self) -> String {
        format!(
            "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/{}",
            self.filename()
        )
    }
}

pub struct UltrafaceModel {
    model: NnModel,
    width: u32,
    height: u32,
    max_iou: f32,
    min_confidence: f32,
}

impl UltrafaceModel {
    pub fn new(
        model_path: &Path,
        variant: UltrafaceVariant,
        max_iou: f32,
        min_confidence: f32,
    ) -> Result<Self> {
        let (width, height) = variant.dimensions();
        let model = load_model(model_path, (width, height))?;
        log::info!("Loaded face detector {}", model_path.display());

        Ok(Self {
            model,
            width,
            height,
            max_iou,
            min_confidence,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            input,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| {
                // Note: Mean/std are from MobileNet, not from Ultraface, but work well
                let mean = [0.485, 0.456, 0.406][c];
                let std = [0.229, 0.224, 0.225][c];
                (resized[(x as _, y as _)][c] as f32 / 255.0 - mean) / std
            },
        )
        .into()
    }
}

impl InferModel for UltrafaceModel {
    type Output = Vec<(Bbox, f32)>;

    fn run(&self, input: &RgbImage) -> Result<Self::Output> {
        let valid_input = tvec!(self.preproc(input).into());
        let raw_nn_out = self.model.run(valid_input)?;
        decode_detections(&raw_nn_out, self.min_confidence, self.max_iou)
    }
}

/// Turn raw Ultraface outputs into face boxes, most confident first.
///
/// Output 0 holds `[background, face]` confidences per anchor with shape `[1, N, 2]`, output 1
/// the matching boxes with shape `[1, N, 4]`.
fn decode_detections(
    raw_nn_out: &[TValue],
    min_confidence: f32,
    max_iou: f32,
) -> Result<Vec<(Bbox, f32)>> {
    let confidences = raw_nn_out[0]
        .to_array_view::<f32>()?
        .slice(s![0, .., 1])
        .to_vec();

    let bboxes: Vec<f32> = raw_nn_out[1]
        .to_array_view::<f32>()?
        .iter()
        .cloned()
        .collect();
    let bboxes = bboxes
        .chunks_exact(4)
        .map(|x| [x[0], x[1], x[2], x[3]]);

    let mut bboxes_with_confidences: Vec<_> = bboxes
        .zip(confidences)
        .filter(|(_, confidence)| *confidence > min_confidence)
        .collect();

    bboxes_with_confidences.sort_by(|a, b| a.1.total_cmp(&b.1));

    Ok(non_maximum_suppression(bboxes_with_confidences, max_iou))
}

/// Raw face mesh estimate in the pixel space of the network input.
#[derive(Clone, Debug)]
pub struct MeshEstimate {
    pub points: Vec<Landmark>,
    pub presence: f32,
}

/// MediaPipe Face Mesh exported to ONNX.
///
/// The input is a cropped face, NCHW with colors mapped to `[-1, 1]`.
pub struct FaceMeshModel {
    model: NnModel,
}

impl FaceMeshModel {
    pub fn new(model_path: &Path) -> Result<Self> {
        let model = load_model(model_path, (FACE_MESH_INPUT_SIZE, FACE_MESH_INPUT_SIZE))?;
        log::info!("Loaded face mesh {}", model_path.display());

        Ok(Self { model })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let size = FACE_MESH_INPUT_SIZE;
        let resized: RgbImage =
            image::imageops::resize(input, size, size, image::imageops::FilterType::Triangle);

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, c, y, x)| resized[(x as _, y as _)][c] as f32 / 127.5 - 1.0,
        )
        .into()
    }

    /// Output 0 holds `x, y, z` triples for all landmarks, output 1 the face flag logit.
    fn postproc(&self, raw_nn_out: NnOut) -> Result<MeshEstimate> {
        let coords: Vec<f32> = raw_nn_out[0]
            .to_array_view::<f32>()?
            .iter()
            .cloned()
            .collect();
        if coords.len() < FACE_MESH_NUM_LANDMARKS * 3 {
            bail!(
                "face mesh returned {} coordinates, expected {}",
                coords.len(),
                FACE_MESH_NUM_LANDMARKS * 3
            );
        }

        let points = coords
            .chunks_exact(3)
            .take(FACE_MESH_NUM_LANDMARKS)
            .map(|p| Landmark {
                x: p[0],
                y: p[1],
                z: p[2],
            })
            .collect();

        let face_flag = raw_nn_out[1]
            .to_array_view::<f32>()?
            .iter()
            .next()
            .copied()
            .context("face mesh returned no face flag")?;

        Ok(MeshEstimate {
            points,
            presence: sigmoid(face_flag),
        })
    }
}

impl InferModel for FaceMeshModel {
    type Output = MeshEstimate;

    fn run(&self, input: &RgbImage) -> Result<Self::Output> {
        let valid_input = tvec!(self.preproc(input).into());
        let raw_nn_out = self.model.run(valid_input)?;
        self.postproc(raw_nn_out)
    }
}

/// Thresholds of the landmark pipeline.
#[derive(Clone, Copy, Debug)]
pub struct LandmarkerConfig {
    pub min_detection_confidence: f32,
    pub min_presence_confidence: f32,
    pub min_tracking_confidence: f32,
    pub max_iou: f32,
    pub roi_padding: f32,
}

impl Default for LandmarkerConfig {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.5,
            min_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
            max_iou: 0.5,
            roi_padding: DEFAULT_ROI_PADDING,
        }
    }
}

/// Single-face landmarker combining face detection and face mesh.
pub struct MeshLandmarker<D = UltrafaceModel, M = FaceMeshModel> {
    detector: D,
    mesh: M,
    config: LandmarkerConfig,
    tracked_roi: Option<Bbox>,
}

impl MeshLandmarker<UltrafaceModel, FaceMeshModel> {
    pub fn new(
        detector_path: &Path,
        variant: UltrafaceVariant,
        mesh_path: &Path,
        config: LandmarkerConfig,
    ) -> Result<Self> {
        let detector = UltrafaceModel::new(
            detector_path,
            variant,
            config.max_iou,
            config.min_detection_confidence,
        )?;
        let mesh = FaceMeshModel::new(mesh_path)?;

        Ok(Self::from_models(detector, mesh, config))
    }
}

impl<D, M> MeshLandmarker<D, M>
where
    D: InferModel<Output = Vec<(Bbox, f32)>>,
    M: InferModel<Output = MeshEstimate>,
{
    pub fn from_models(detector: D, mesh: M, config: LandmarkerConfig) -> Self {
        Self {
            detector,
            mesh,
            config,
            tracked_roi: None,
        }
    }

    /// Run the mesh on `region` of `frame`.
    ///
    /// Returns `None` if the mesh does not believe there is a face in the region.
    fn estimate_in(&mut self, frame: &RgbImage, region: &Bbox) -> Result<Option<FaceLandmarks>> {
        let (width, height) = frame.dimensions();
        let Some((crop_x, crop_y, crop_w, crop_h)) =
            crop_rect(region, self.config.roi_padding, width, height)
        else {
            return Ok(None);
        };

        let crop = image::imageops::crop_imm(frame, crop_x, crop_y, crop_w, crop_h).to_image();
        let estimate = self.mesh.run(&crop)?;

        if estimate.presence < self.config.min_presence_confidence {
            log::trace!("Face presence {:.2} below threshold", estimate.presence);
            return Ok(None);
        }

        let points = map_to_frame(
            &estimate.points,
            (crop_x, crop_y, crop_w, crop_h),
            (width, height),
        );

        self.tracked_roi = match estimate.presence >= self.config.min_tracking_confidence {
            true => landmarks_bbox(&points),
            false => None,
        };

        let (width, height) = (width as f32, height as f32);
        Ok(Some(FaceLandmarks {
            points,
            presence: estimate.presence,
            roi: [
                crop_x as f32 / width,
                crop_y as f32 / height,
                (crop_x + crop_w) as f32 / width,
                (crop_y + crop_h) as f32 / height,
            ],
        }))
    }
}

impl<D, M> FaceLandmarker for MeshLandmarker<D, M>
where
    D: InferModel<Output = Vec<(Bbox, f32)>>,
    M: InferModel<Output = MeshEstimate>,
{
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<FaceLandmarks>> {
        if let Some(roi) = self.tracked_roi.take() {
            if let Some(landmarks) = self.estimate_in(frame, &roi)? {
                return Ok(Some(landmarks));
            }
            log::debug!("Lost track of face, running detection");
        }

        let faces = self.detector.run(frame)?;
        log::trace!("Found {} face candidates", faces.len());

        match faces.first() {
            Some((bbox, _confidence)) => self.estimate_in(frame, bbox),
            None => Ok(None),
        }
    }
}

fn load_model(model_path: &Path, (width, height): (u32, u32)) -> Result<NnModel> {
    if !model_path.exists() {
        bail!(
            "model file {} not found, ensure it is in the correct location",
            model_path.display()
        );
    }

    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(1, 3, height as usize, width as usize),
    );
    let model = tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to read model {}", model_path.display()))?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Map mesh points from network input pixels of a crop to normalized frame coordinates.
fn map_to_frame(
    points: &[Landmark],
    (crop_x, crop_y, crop_w, crop_h): (u32, u32, u32, u32),
    (width, height): (u32, u32),
) -> Vec<Landmark> {
    let input_size = FACE_MESH_INPUT_SIZE as f32;
    let scale_x = crop_w as f32 / input_size;
    let scale_y = crop_h as f32 / input_size;
    let (width, height) = (width as f32, height as f32);

    points
        .iter()
        .map(|p| Landmark {
            x: (crop_x as f32 + p.x * scale_x) / width,
            y: (crop_y as f32 + p.y * scale_y) / height,
            z: p.z * scale_x / width,
        })
        .collect()
}

/// Grow a normalized region into a padded square and clamp it to the image.
///
/// Returns `(x, y, width, height)` in pixels, or `None` if nothing of the region is inside the
/// image.
fn crop_rect(region: &Bbox, padding: f32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let (img_w, img_h) = (width as f32, height as f32);
    let (x_tl, y_tl) = (region[0] * img_w, region[1] * img_h);
    let (x_br, y_br) = (region[2] * img_w, region[3] * img_h);

    let center_x = (x_tl + x_br) / 2.0;
    let center_y = (y_tl + y_br) / 2.0;
    let side = f32::max(x_br - x_tl, y_br - y_tl) * (1.0 + 2.0 * padding);
    if side.is_nan() || side <= 0.0 {
        return None;
    }

    let left = (center_x - side / 2.0).max(0.0);
    let top = (center_y - side / 2.0).max(0.0);
    let right = (center_x + side / 2.0).min(img_w);
    let bottom = (center_y + side / 2.0).min(img_h);

    let (left, top) = (left.round() as u32, top.round() as u32);
    let (right, bottom) = (right.round() as u32, bottom.round() as u32);
    if right <= left || bottom <= top {
        return None;
    }

    Some((left, top, right - left, bottom - top))
}

/// Bounding box around all landmarks.
fn landmarks_bbox(points: &[Landmark]) -> Option<Bbox> {
    if points.is_empty() {
        return None;
    }

    let init = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
    Some(points.iter().fold(init, |acc, p| {
        [
            acc[0].min(p.x),
            acc[1].min(p.y),
            acc[2].max(p.x),
            acc[3].max(p.y),
        ]
    }))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Start with the most confident bounding box and iterate over all other bounding boxes in the
/// order of sinking confidence. Grow the vector of selected bounding boxes by adding only those
/// candidates which do not have an IoU above `max_iou` with already chosen bounding boxes.
/// Candidates must be sorted by ascending confidence.
fn non_maximum_suppression(
    mut sorted_bboxes_with_confidences: Vec<(Bbox, f32)>,
    max_iou: f32,
) -> Vec<(Bbox, f32)> {
    let mut selected: Vec<(Bbox, f32)> = vec![];
    'candidates: loop {
        // Get next most confident bbox from the back of ascending-sorted vector.
        match sorted_bboxes_with_confidences.pop() {
            Some((bbox, confidence)) => {
                // Check for overlap with any of the selected bboxes
                for (selected_bbox, _) in selected.iter() {
                    if iou(&bbox, selected_bbox) > max_iou {
                        continue 'candidates;
                    }
                }

                // bbox has no large overlap with any of the selected ones, add it
                selected.push((bbox, confidence))
            }
            None => break 'candidates,
        }
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &Bbox, bbox_b: &Bbox) -> f32 {
    // If the boxes do not overlap, the corner points of the overlap box are ill defined and its
    // area is zero.
    let overlap_box: Bbox = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Calculate the area enclosed by a bounding box.
///
/// If the bottom-right point lies above or to the left of the top-left point, the area is zero.
fn bbox_area(bbox: &Bbox) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}
