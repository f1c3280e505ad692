use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use log::{error, info, warn};
use tauri::{Manager, State};

pub mod catalog;
pub mod logwatch;
pub mod recognition;

use recognition::capture::{self, CaptureFrame};
use recognition::gate::GATE;
use recognition::template_bank::{self, LoadingProgress};
use recognition::{classical, detector, resolver, RankedResult, RecognitionError};

/// 启动时加载的只读目录数据
pub struct DbState {
    pub monsters: Arc<RwLock<serde_json::Map<String, serde_json::Value>>>,
    pub items: Arc<RwLock<catalog::ItemDb>>,
    pub class_map: Arc<RwLock<Option<catalog::ClassMap>>>,
}

fn resources_dir(app: &tauri::AppHandle) -> Result<PathBuf, String> {
    let base = app.path().resource_dir().map_err(|e| e.to_string())?;
    Ok(base.join("resources"))
}

fn model_path(app: &tauri::AppHandle) -> Result<PathBuf, String> {
    Ok(resources_dir(app)?.join("models").join("best.onnx"))
}

fn cache_dir() -> PathBuf {
    logwatch::state_cache_path()
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(std::env::temp_dir)
}

/// 在 resources/ 与安装根目录两处找数据文件（打包布局在平台间不一致）
fn locate_data_file(app: &tauri::AppHandle, name: &str) -> Option<PathBuf> {
    let base = app.path().resource_dir().ok()?;
    let candidates = [base.join("resources").join(name), base.join(name)];
    candidates.into_iter().find(|p| p.exists())
}

// --- Commands ---

#[tauri::command]
async fn start_template_loading(app: tauri::AppHandle) -> Result<(), String> {
    let res_dir = resources_dir(&app)?;
    let cache = cache_dir();
    tauri::async_runtime::spawn(async move {
        if let Err(e) = template_bank::load_all(res_dir, cache).await {
            error!("[Init] 模板库加载失败: {}", e);
        }
    });
    Ok(())
}

#[tauri::command]
fn get_template_loading_progress() -> LoadingProgress {
    template_bank::get_loading_progress()
}

#[tauri::command]
fn clear_template_cache() -> Result<(), String> {
    template_bank::clear_cache(&cache_dir())
}

/// 怪物识别：截屏 -> 遭遇区域三槽位模板匹配 -> 槽位结果
#[tauri::command]
fn recognize_monsters_from_screenshot(day: Option<u32>) -> Result<RankedResult, String> {
    let _permit = GATE.try_acquire()?;
    let bank = template_bank::bank().ok_or(RecognitionError::TemplatesNotReady)?;

    let frame = capture::capture_screen()?;
    let templates = template_bank::entries_for_day(bank, day);
    info!("[Recognition] 开始匹配，库中共有 {} 个目标", templates.len());

    let candidates = classical::recognize(&frame, &templates);
    Ok(resolver::resolve_slots(candidates))
}

/// 卡牌/物品识别：截取光标周边小窗 -> 目标检测 -> 主选/备选排序
#[tauri::command]
async fn recognize_card_at_cursor(
    app: tauri::AppHandle,
    state: State<'_, DbState>,
) -> Result<RankedResult, String> {
    let _permit = GATE.try_acquire()?;
    let model = model_path(&app)?;

    let (cx, cy) = capture::cursor_position();
    let frame = capture::capture_around(cx, cy, detector::CURSOR_WINDOW)?;
    let detections = detector::run_inference(&frame.image, &model, false)?;

    // 光标换算到帧内坐标后在邻域里挑候选
    let local = (cx - frame.origin.0, cy - frame.origin.1);
    let picked = detector::candidates_near_cursor(&detections, local);
    let candidates = label_detections(&picked, &frame, &state);
    Ok(resolver::resolve_pointer(candidates))
}

/// 全帧扫描：整屏跑一遍检测，结果留存给覆盖层反查，返回命中数
#[tauri::command]
async fn scan_full_frame(app: tauri::AppHandle, use_gpu: bool) -> Result<usize, String> {
    let _permit = GATE.try_acquire()?;
    let model = model_path(&app)?;

    info!("[Yolo] Starting full-frame scan (GPU: {})...", use_gpu);
    let frame = capture::capture_screen()?;
    let count = detector::scan_full_frame(&frame, &model, use_gpu)?;
    Ok(count)
}

/// 覆盖层右键反查：屏幕坐标命中最近一次全帧扫描的哪个检测框
#[tauri::command]
fn lookup_scan_detection(
    x: i32,
    y: i32,
    state: State<'_, DbState>,
) -> Result<Option<serde_json::Value>, String> {
    let Some(det) = detector::lookup_detection(x, y) else {
        return Ok(None);
    };
    let entity_id = state
        .class_map
        .read()
        .ok()
        .and_then(|m| m.as_ref().and_then(|m| m.entity_id(det.class_id).map(String::from)));
    Ok(Some(serde_json::json!({
        "entity_id": entity_id,
        "class_id": det.class_id,
        "confidence": det.confidence,
        "box": [det.x1, det.y1, det.x2, det.y2],
    })))
}

#[tauri::command]
fn clear_scan_results() -> Result<(), String> {
    detector::clear_scan_results();
    Ok(())
}

#[tauri::command]
fn get_all_monsters(
    state: State<'_, DbState>,
) -> Result<serde_json::Map<String, serde_json::Value>, String> {
    let db = state.monsters.read().map_err(|_| "DB Busy")?;
    Ok(db.clone())
}

#[tauri::command]
fn get_current_day(hours_per_day: Option<u32>, retro: Option<bool>) -> Result<u32, String> {
    // 缓存优先，日志扫描只做首跑兜底
    if logwatch::state_cache_path().exists() {
        let cached = logwatch::load_state();
        if cached.day > 0 {
            return Ok(cached.day);
        }
    }

    let retro = retro.unwrap_or(false);
    info!(
        "[State] No day cache, scanning log tail (hours_per_day: {}, retro: {})",
        hours_per_day.unwrap_or(6),
        retro
    );
    if let Some(day) = logwatch::read_day_from_log(&logwatch::log_path(), retro)? {
        return Ok(day);
    }
    Ok(1)
}

#[tauri::command]
fn update_day(day: u32) -> Result<(), String> {
    let mut state = logwatch::load_state();
    state.day = day;
    logwatch::save_state(&state);
    info!("[State] Manually updated Day to: {}", day);
    Ok(())
}

/// 把检测框换算回屏幕坐标并映射成带实体 id 的候选。
/// 类别表里没有的检测只告警丢弃，不让单个脏类别拖垮整次查询。
fn label_detections(
    detections: &[detector::Detection],
    frame: &CaptureFrame,
    state: &State<'_, DbState>,
) -> Vec<recognition::MatchCandidate> {
    let class_map = state.class_map.read().ok();
    let class_map = class_map.as_ref().and_then(|m| m.as_ref());

    detections
        .iter()
        .filter_map(|det| {
            let Some(entity_id) = class_map.and_then(|m| m.entity_id(det.class_id)) else {
                warn!("[Yolo] 未登记的类别 {}，丢弃该检测", det.class_id);
                return None;
            };
            Some(recognition::MatchCandidate {
                entity_id: entity_id.to_string(),
                confidence: det.confidence,
                region: recognition::CandidateRegion::Box {
                    x1: det.x1 + frame.origin.0,
                    y1: det.y1 + frame.origin.1,
                    x2: det.x2 + frame.origin.0,
                    y2: det.y2 + frame.origin.1,
                },
            })
        })
        .collect()
}

fn load_databases(app: &tauri::AppHandle, db_state: &DbState) {
    if let Some(path) = locate_data_file(app, "monsters_db.json") {
        match catalog::read_monsters_raw(&path) {
            Ok(monsters) => {
                info!("[Init] Successfully loaded {} monsters from {:?}", monsters.len(), path);
                if let Ok(mut db) = db_state.monsters.write() {
                    *db = monsters;
                }
            }
            Err(e) => error!("[Init] Failed to load monsters_db.json: {}", e),
        }
    } else {
        warn!("[Init] monsters_db.json not found in resources");
    }

    if let Some(path) = locate_data_file(app, "items_db.json") {
        match catalog::ItemDb::load(&path) {
            Ok(items) => {
                info!("[Init] Successfully loaded {} items from {:?}", items.list.len(), path);
                if let Ok(mut db) = db_state.items.write() {
                    *db = items;
                }
            }
            Err(e) => error!("[Init] Failed to load items_db.json: {}", e),
        }
    }

    if let Some(path) = locate_data_file(app, "models/model_classes.json") {
        match catalog::ClassMap::load(&path) {
            Ok(map) => {
                info!("[Init] Loaded {} model classes from {:?}", map.len(), path);
                if let Ok(mut slot) = db_state.class_map.write() {
                    *slot = Some(map);
                }
            }
            Err(e) => error!("[Init] Failed to load model_classes.json: {}", e),
        }
    }
}

// --- App Run ---
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .manage(DbState {
            monsters: Arc::new(RwLock::new(serde_json::Map::new())),
            items: Arc::new(RwLock::new(catalog::ItemDb::empty())),
            class_map: Arc::new(RwLock::new(None)),
        })
        .setup(|app| {
            let handle = app.handle().clone();
            let db_state = app.state::<DbState>();

            load_databases(&handle, &db_state);

            // 模板库后台加载，UI 轮询进度
            if let Ok(res_dir) = resources_dir(&handle) {
                let cache = cache_dir();
                tauri::async_runtime::spawn(async move {
                    if let Err(e) = template_bank::load_all(res_dir, cache).await {
                        error!("[Init] 模板库加载失败: {}", e);
                    }
                });
            }

            // 日志监控：天数与库存变化
            logwatch::spawn_watcher(handle.clone(), db_state.items.clone());

            info!("[Init] Setup complete");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            get_all_monsters,
            recognize_monsters_from_screenshot,
            recognize_card_at_cursor,
            scan_full_frame,
            lookup_scan_detection,
            clear_scan_results,
            get_template_loading_progress,
            start_template_loading,
            clear_template_cache,
            get_current_day,
            update_day
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
