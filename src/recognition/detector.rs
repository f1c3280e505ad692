use image::{imageops::FilterType, DynamicImage, GenericImageView};
use log::info;
use ndarray::Array;
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::{Mutex, OnceLock, RwLock};
use std::time::Instant;

use super::capture::CaptureFrame;
use super::RecognitionError;

/// 置信度下限，达到（含等于）即保留
const CONF_THRESHOLD: f32 = 0.25;
/// 同类检测框重叠超过该 IoU 即视为重复，NMS 只留置信度最高的
const IOU_THRESHOLD: f32 = 0.45;
/// 模型输入边长
const INPUT_SIZE: u32 = 640;
/// 指针查询时以光标为中心截取的窗口边长
pub const CURSOR_WINDOW: u32 = 320;
/// 光标命中判定的邻域半径（像素）
const CURSOR_RADIUS: i32 = 48;
/// 指针查询最多返回的候选数：1 个主选 + 2 个备选
const MAX_CURSOR_CANDIDATES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
    pub class_id: usize,
}

static YOLO_SESSION: OnceLock<Mutex<Session>> = OnceLock::new();
// 最近一次全帧扫描的留存结果，供覆盖层按坐标反查
static SCAN_RESULTS: RwLock<Vec<Detection>> = RwLock::new(Vec::new());
static SCAN_ORIGIN: RwLock<(i32, i32)> = RwLock::new((0, 0));

fn build_session(model_path: &Path, use_gpu: bool) -> Result<Session, ort::Error> {
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?;
    if use_gpu {
        #[cfg(target_os = "windows")]
        {
            use ort::execution_providers::DirectMLExecutionProvider;
            builder = builder
                .with_execution_providers([DirectMLExecutionProvider::default().build()])?;
        }
        #[cfg(target_os = "macos")]
        {
            use ort::execution_providers::CoreMLExecutionProvider;
            builder =
                builder.with_execution_providers([CoreMLExecutionProvider::default().build()])?;
        }
        #[cfg(target_os = "linux")]
        {
            use ort::execution_providers::CUDAExecutionProvider;
            builder =
                builder.with_execution_providers([CUDAExecutionProvider::default().build()])?;
        }
    }
    builder.commit_from_file(model_path)
}

fn session(model_path: &Path, use_gpu: bool) -> Result<&'static Mutex<Session>, RecognitionError> {
    if YOLO_SESSION.get().is_none() {
        if !model_path.exists() {
            return Err(RecognitionError::Inference(format!(
                "model not found at {:?}",
                model_path
            )));
        }
        let start = Instant::now();
        let session = build_session(model_path, use_gpu)
            .map_err(|e| RecognitionError::Inference(e.to_string()))?;
        info!("[Yolo] 模型加载耗时: {} ms", start.elapsed().as_millis());
        let _ = YOLO_SESSION.set(Mutex::new(session));
    }
    YOLO_SESSION
        .get()
        .ok_or_else(|| RecognitionError::Inference("model session unavailable".into()))
}

/// 把 YOLO 输出张量 [1, 4+C, anchors] 解码成原图坐标系的检测框
fn decode_output(
    data: &[f32],
    num_elements: usize,
    num_anchors: usize,
    orig_w: u32,
    orig_h: u32,
) -> Vec<Detection> {
    let mut candidates = Vec::new();
    let scale_x = orig_w as f32 / INPUT_SIZE as f32;
    let scale_y = orig_h as f32 / INPUT_SIZE as f32;

    for i in 0..num_anchors {
        let xc = data[i];
        let yc = data[num_anchors + i];
        let w = data[2 * num_anchors + i];
        let h = data[3 * num_anchors + i];

        let mut max_score = 0.0f32;
        let mut class_id = 0usize;
        for c in 4..num_elements {
            let score = data[c * num_anchors + i];
            if score > max_score {
                max_score = score;
                class_id = c - 4;
            }
        }

        if max_score >= CONF_THRESHOLD {
            candidates.push(Detection {
                x1: ((xc - w / 2.0) * scale_x) as i32,
                y1: ((yc - h / 2.0) * scale_y) as i32,
                x2: ((xc + w / 2.0) * scale_x) as i32,
                y2: ((yc + h / 2.0) * scale_y) as i32,
                confidence: max_score,
                class_id,
            });
        }
    }
    candidates
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0) * (y2 - y1).max(0);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// 按类做非极大值抑制：同类重叠框只留置信度最高的，异类重叠互不压制
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    let mut kept = Vec::new();
    while !detections.is_empty() {
        let best = detections.remove(0);
        detections.retain(|d| d.class_id != best.class_id || iou(&best, d) < iou_threshold);
        kept.push(best);
    }
    kept
}

/// 对一帧（或裁剪区域）跑一次目标检测，输出已做过 NMS。
pub fn run_inference(
    img: &DynamicImage,
    model_path: &Path,
    use_gpu: bool,
) -> Result<Vec<Detection>, RecognitionError> {
    let session = session(model_path, use_gpu)?;
    let (orig_w, orig_h) = img.dimensions();

    let start = Instant::now();
    // 预处理：拉伸到 640x640，NCHW 归一化
    let resized = img.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Lanczos3);
    let rgb_img = resized.to_rgb8();
    let mut input_array = Array::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
    for (x, y, pixel) in rgb_img.enumerate_pixels() {
        input_array[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        input_array[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
        input_array[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
    }

    let input_shape = vec![1, 3, INPUT_SIZE as i64, INPUT_SIZE as i64];
    let input_tensor = ort::value::Value::from_array((input_shape, input_array.into_raw_vec()))
        .map_err(|e| RecognitionError::Inference(e.to_string()))?;

    let mut guard = session
        .lock()
        .map_err(|_| RecognitionError::Inference("model session poisoned".into()))?;
    let outputs = guard
        .run(vec![("images", input_tensor)])
        .map_err(|e| RecognitionError::Inference(e.to_string()))?;
    let (output_shape, output_data) = outputs["output0"]
        .try_extract_tensor::<f32>()
        .map_err(|e| RecognitionError::Inference(e.to_string()))?;

    let num_elements = output_shape[1] as usize;
    let num_anchors = output_shape[2] as usize;
    info!("[Timer] 推理耗时: {} ms", start.elapsed().as_millis());

    let candidates = decode_output(output_data, num_elements, num_anchors, orig_w, orig_h);
    Ok(nms(candidates, IOU_THRESHOLD))
}

/// 全帧扫描：跑一遍检测，把存活的检测框连同捕获原点留存给覆盖层反查。
pub fn scan_full_frame(
    frame: &CaptureFrame,
    model_path: &Path,
    use_gpu: bool,
) -> Result<usize, RecognitionError> {
    let detections = run_inference(&frame.image, model_path, use_gpu)?;
    info!("[Yolo] Scan complete. Found {} objects.", detections.len());

    let count = detections.len();
    if let Ok(mut origin) = SCAN_ORIGIN.write() {
        *origin = frame.origin;
    }
    if let Ok(mut results) = SCAN_RESULTS.write() {
        *results = detections;
    }
    Ok(count)
}

/// 按屏幕坐标反查最近一次全帧扫描的命中框（多个命中取置信度最高）
pub fn lookup_detection(screen_x: i32, screen_y: i32) -> Option<Detection> {
    let origin = SCAN_ORIGIN.read().ok().map(|o| *o)?;
    let results = SCAN_RESULTS.read().ok()?;
    let x = screen_x - origin.0;
    let y = screen_y - origin.1;
    results
        .iter()
        .filter(|d| d.x1 <= x && x <= d.x2 && d.y1 <= y && y <= d.y2)
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(Ordering::Equal)
        })
        .cloned()
}

/// 丢弃留存的扫描结果，释放内存
pub fn clear_scan_results() {
    if let Ok(mut results) = SCAN_RESULTS.write() {
        results.clear();
    }
}

/// 指针查询：挑出光标邻域内的检测框，置信度降序、实体去重，
/// 最多 1 个主选 + 2 个备选。cursor 为帧内坐标。
pub fn candidates_near_cursor(detections: &[Detection], cursor: (i32, i32)) -> Vec<Detection> {
    let (cx, cy) = cursor;
    let mut hits: Vec<&Detection> = detections
        .iter()
        .filter(|d| {
            d.x1 <= cx + CURSOR_RADIUS
                && d.x2 >= cx - CURSOR_RADIUS
                && d.y1 <= cy + CURSOR_RADIUS
                && d.y2 >= cy - CURSOR_RADIUS
        })
        .collect();
    hits.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut picked: Vec<Detection> = Vec::new();
    for det in hits {
        if picked.iter().any(|p| p.class_id == det.class_id) {
            continue;
        }
        picked.push(det.clone());
        if picked.len() == MAX_CURSOR_CANDIDATES {
            break;
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32, class_id: usize) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = det(10, 10, 50, 50, 0.9, 0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = det(0, 0, 10, 10, 0.9, 0);
        let b = det(100, 100, 110, 110, 0.8, 0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_collapses_same_class_overlaps() {
        let dets = vec![
            det(10, 10, 100, 100, 0.7, 1),
            det(12, 12, 102, 102, 0.9, 1),
            det(11, 11, 99, 99, 0.5, 1),
        ];
        let kept = nms(dets, IOU_THRESHOLD);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let dets = vec![
            det(10, 10, 100, 100, 0.9, 1),
            det(12, 12, 102, 102, 0.8, 2),
        ];
        let kept = nms(dets, IOU_THRESHOLD);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn decode_output_keeps_threshold_boundary() {
        // 两个锚点、两个类别：[1, 6, 2] 的展开布局
        // 锚点 0 恰好等于阈值要保留；锚点 1 低于阈值要丢弃
        let num_anchors = 2;
        let num_elements = 6;
        let mut data = vec![0.0f32; num_elements * num_anchors];
        // xc yc w h
        data[0] = 320.0;
        data[num_anchors] = 320.0;
        data[2 * num_anchors] = 64.0;
        data[3 * num_anchors] = 64.0;
        data[4 * num_anchors] = CONF_THRESHOLD; // class 0, anchor 0
        data[1] = 320.0;
        data[num_anchors + 1] = 320.0;
        data[2 * num_anchors + 1] = 64.0;
        data[3 * num_anchors + 1] = 64.0;
        data[5 * num_anchors + 1] = CONF_THRESHOLD - 0.01; // class 1, anchor 1

        let dets = decode_output(&data, num_elements, num_anchors, 640, 640);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 0);
        assert_eq!((dets[0].x1, dets[0].y1, dets[0].x2, dets[0].y2), (288, 288, 352, 352));
    }

    #[test]
    fn decode_output_scales_back_to_original_size() {
        let num_anchors = 1;
        let num_elements = 5;
        // 中心 (320,320) 尺寸 640x640 的满幅框，原图 1280x720
        let data = vec![320.0, 320.0, 640.0, 640.0, 0.9];
        let dets = decode_output(&data, num_elements, num_anchors, 1280, 720);
        assert_eq!(dets.len(), 1);
        assert_eq!((dets[0].x1, dets[0].y1), (0, 0));
        assert_eq!((dets[0].x2, dets[0].y2), (1280, 720));
    }

    #[test]
    fn cursor_query_orders_and_dedupes() {
        let cursor = (160, 160);
        let dets = vec![
            det(100, 100, 220, 220, 0.55, 7),
            det(120, 120, 200, 200, 0.95, 3),
            det(130, 130, 210, 210, 0.90, 3), // 与上一个同实体，应被去重
            det(140, 140, 190, 190, 0.70, 5),
            det(1000, 1000, 1100, 1100, 0.99, 9), // 离光标太远
        ];
        let picked = candidates_near_cursor(&dets, cursor);
        assert_eq!(picked.len(), 3);
        assert_eq!(picked[0].class_id, 3);
        assert_eq!(picked[1].class_id, 5);
        assert_eq!(picked[2].class_id, 7);
        assert!(picked[0].confidence >= picked[1].confidence);
        assert!(picked[1].confidence >= picked[2].confidence);
    }

    #[test]
    fn cursor_query_caps_at_three_distinct_entities() {
        let cursor = (50, 50);
        let dets: Vec<Detection> = (0..6)
            .map(|i| det(0, 0, 100, 100, 0.9 - i as f32 * 0.1, i))
            .collect();
        let picked = candidates_near_cursor(&dets, cursor);
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn cursor_query_on_empty_is_empty() {
        assert!(candidates_near_cursor(&[], (0, 0)).is_empty());
    }
}
