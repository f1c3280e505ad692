use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::catalog::{self, MonsterEntry};

use super::features::{self, Feature};

/// 模板库加载进度快照。loaded 永远不会超过 total；
/// is_complete 一旦为 true 就不再回退。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadingProgress {
    pub loaded: usize,
    pub total: usize,
    pub is_complete: bool,
    pub current_name: String,
}

/// 单个参照模板。加载完成后整库只读，匹配端只拿共享引用。
#[derive(Clone, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub id: String,
    pub display_name: String,
    /// 出现天数档位，如 "Day 3"、"Day 10+"
    pub day: String,
    pub features: Vec<Feature>,
    pub source: PathBuf,
}

static TEMPLATE_BANK: OnceLock<Vec<TemplateEntry>> = OnceLock::new();
static LOADING_PROGRESS: OnceLock<Arc<Mutex<LoadingProgress>>> = OnceLock::new();

const CACHE_FILE: &str = "template_features.bin";
/// 缓存条目数下限：数量太少多半是此前加载中断留下的残骸，直接重建
const CACHE_MIN_ENTRIES: usize = 50;

/// 非阻塞读取进度。加载尚未开始时返回全零快照。
pub fn get_loading_progress() -> LoadingProgress {
    LOADING_PROGRESS
        .get()
        .and_then(|p| p.lock().ok())
        .map(|p| p.clone())
        .unwrap_or_default()
}

/// 加载完成后的只读模板库快照；未完成时为 None
pub fn bank() -> Option<&'static [TemplateEntry]> {
    TEMPLATE_BANK.get().map(|v| v.as_slice())
}

pub fn day_bracket(day: u32) -> String {
    if day >= 10 {
        "Day 10+".to_string()
    } else {
        format!("Day {}", day)
    }
}

/// 按天数过滤可参与匹配的模板。
/// Day 10+ 档位同时吸收库中标为 "Day 10" 的条目。
pub fn entries_for_day(bank: &[TemplateEntry], day: Option<u32>) -> Vec<&TemplateEntry> {
    match day.map(day_bracket) {
        Some(bracket) if bracket == "Day 10+" => bank
            .iter()
            .filter(|t| t.day == "Day 10" || t.day == "Day 10+")
            .collect(),
        Some(bracket) => bank.iter().filter(|t| t.day == bracket).collect(),
        None => bank.iter().collect(),
    }
}

struct LoadTask {
    id: String,
    display_name: String,
    day: String,
    path: PathBuf,
}

/// 目录里登记了 available 的条目都算在 total 里。图片路径按
/// 显式路径 -> 立绘目录 -> 背景目录 的顺序解析；都不存在也保留任务，
/// 加载时会以告警跳过但照常推进进度。
fn collect_tasks(resources_dir: &Path, catalog: &HashMap<String, MonsterEntry>) -> Vec<LoadTask> {
    let mut tasks = Vec::new();
    for (key, entry) in catalog.iter() {
        let Some(day) = &entry.available else { continue };

        let mut path = entry
            .image
            .as_ref()
            .map(|rel| resources_dir.join(rel))
            .filter(|p| p.exists());
        if path.is_none() {
            let char_path = resources_dir.join(format!("images_monster_char/{}.webp", key));
            if char_path.exists() {
                path = Some(char_path);
            }
        }
        if path.is_none() {
            let bg_path = resources_dir.join(format!("images_monster_bg/{}.webp", key));
            if bg_path.exists() {
                path = Some(bg_path);
            }
        }
        let path = path.unwrap_or_else(|| {
            resources_dir.join(
                entry
                    .image
                    .clone()
                    .unwrap_or_else(|| format!("images_monster_char/{}.webp", key)),
            )
        });

        tasks.push(LoadTask {
            id: key.clone(),
            display_name: entry.name_zh.clone().unwrap_or_else(|| key.clone()),
            day: day.clone(),
            path,
        });
    }
    // 任务先排好序，条目 id 的字典序同时决定并列时的胜负
    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    tasks
}

fn build_entries(tasks: Vec<LoadTask>, progress: &Arc<Mutex<LoadingProgress>>) -> Vec<TemplateEntry> {
    let mut entries: Vec<TemplateEntry> = tasks
        .into_par_iter()
        .filter_map(|task| {
            let entry = match image::open(&task.path) {
                Ok(img) => Some(TemplateEntry {
                    features: features::extract_features(&img),
                    id: task.id,
                    display_name: task.display_name.clone(),
                    day: task.day,
                    source: task.path,
                }),
                Err(e) => {
                    // 单条失败只跳过，不中断整库
                    warn!("[Init] 模板 {:?} 读取失败，跳过: {}", task.path, e);
                    None
                }
            };
            // 成败都推进进度，保证最终能走到 100%
            if let Ok(mut p) = progress.lock() {
                p.loaded += 1;
                p.current_name = task.display_name;
            }
            entry
        })
        .collect();
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries
}

/// 从资源目录构建模板库（不触碰全局状态，方便离线调试和测试）。
pub fn build_from_resources(
    resources_dir: &Path,
    progress: &Arc<Mutex<LoadingProgress>>,
) -> Result<Vec<TemplateEntry>, String> {
    let catalog = catalog::read_monsters(&resources_dir.join("monsters_db.json"))
        .map_err(|e| e.to_string())?;
    let tasks = collect_tasks(resources_dir, &catalog);

    let total = tasks.len();
    if let Ok(mut p) = progress.lock() {
        p.total = total;
    }
    info!("[Init] 缓存未命中，开始并行计算 {} 个特征点模板...", total);

    Ok(build_entries(tasks, progress))
}

fn read_cache(cache_file: &Path) -> Option<Vec<TemplateEntry>> {
    let data = std::fs::read(cache_file).ok()?;
    let cached: Vec<TemplateEntry> = bincode::deserialize(&data).ok()?;
    if cached.len() < CACHE_MIN_ENTRIES {
        info!("[Init] 缓存中的模板数量过少 ({})，跳过缓存重新加载", cached.len());
        return None;
    }
    Some(cached)
}

fn write_cache(cache_dir: &Path, cache_file: &Path, bank: &[TemplateEntry]) {
    let _ = std::fs::create_dir_all(cache_dir);
    if let Ok(encoded) = bincode::serialize(bank) {
        let _ = std::fs::write(cache_file, encoded);
        info!("[Init] 特征点模板已保存到缓存: {:?}", cache_file);
    }
}

/// 启动时在后台任务里跑一次，结束后整库原子发布，之后不再改动。
pub async fn load_all(resources_dir: PathBuf, cache_dir: PathBuf) -> Result<(), String> {
    let progress = Arc::new(Mutex::new(LoadingProgress::default()));
    let _ = LOADING_PROGRESS.set(progress.clone());

    // 1. 二进制缓存命中则直接发布
    let cache_file = cache_dir.join(CACHE_FILE);
    if let Some(cached) = read_cache(&cache_file) {
        info!("[Init] 从缓存加载了 {} 个特征点模板", cached.len());
        if let Ok(mut p) = progress.lock() {
            p.loaded = cached.len();
            p.total = cached.len();
            p.is_complete = true;
        }
        let _ = TEMPLATE_BANK.set(cached);
        return Ok(());
    }

    // 2. 从原始图片构建
    let bank = build_from_resources(&resources_dir, &progress)?;

    // 3. 写缓存并原子发布快照
    write_cache(&cache_dir, &cache_file, &bank);
    if let Ok(mut p) = progress.lock() {
        p.is_complete = true;
    }
    let _ = TEMPLATE_BANK.set(bank);
    info!("[Init] 特征点模板加载完成");
    Ok(())
}

/// 删除磁盘上的描述子缓存，下次启动全量重建
pub fn clear_cache(cache_dir: &Path) -> Result<(), String> {
    let cache_file = cache_dir.join(CACHE_FILE);
    if cache_file.exists() {
        std::fs::remove_file(cache_file).map_err(|e| e.to_string())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bazaar_lens_bank_{}_{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("images")).unwrap();
        dir
    }

    fn noise_png(path: &Path, seed: u64) {
        let mut state = seed;
        let img = GrayImage::from_fn(64, 64, |_, _| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            Luma([(state >> 33) as u8])
        });
        img.save(path).unwrap();
    }

    fn write_catalog(dir: &Path, body: &str) {
        std::fs::write(dir.join("monsters_db.json"), body).unwrap();
    }

    #[test]
    fn build_publishes_sorted_entries_and_completes_progress() {
        let dir = test_dir("sorted");
        noise_png(&dir.join("images/b.png"), 11);
        noise_png(&dir.join("images/a.png"), 22);
        write_catalog(
            &dir,
            r#"{
                "怪物B": {"name_zh": "怪物B", "available": "Day 2", "image": "images/b.png"},
                "怪物A": {"name_zh": "怪物A", "available": "Day 1", "image": "images/a.png"}
            }"#,
        );

        let progress = Arc::new(Mutex::new(LoadingProgress::default()));
        let bank = build_from_resources(&dir, &progress).unwrap();

        assert_eq!(bank.len(), 2);
        assert_eq!(bank[0].id, "怪物A");
        assert_eq!(bank[1].id, "怪物B");
        assert!(!bank[0].features.is_empty());

        let p = progress.lock().unwrap();
        assert_eq!(p.loaded, 2);
        assert_eq!(p.total, 2);
        assert!(p.loaded <= p.total);
    }

    #[test]
    fn corrupt_entry_is_skipped_but_still_counted() {
        let dir = test_dir("corrupt");
        noise_png(&dir.join("images/ok.png"), 33);
        std::fs::write(dir.join("images/bad.png"), b"not an image").unwrap();
        write_catalog(
            &dir,
            r#"{
                "好怪": {"available": "Day 1", "image": "images/ok.png"},
                "坏怪": {"available": "Day 1", "image": "images/bad.png"},
                "丢图怪": {"available": "Day 2", "image": "images/missing.png"}
            }"#,
        );

        let progress = Arc::new(Mutex::new(LoadingProgress::default()));
        let bank = build_from_resources(&dir, &progress).unwrap();

        // 坏图和丢图被跳过，但 total 仍按目录登记数计，进度能到 100%
        assert_eq!(bank.len(), 1);
        assert_eq!(bank[0].id, "好怪");
        let p = progress.lock().unwrap();
        assert_eq!(p.total, 3);
        assert_eq!(p.loaded, 3);
    }

    #[test]
    fn entries_without_availability_are_not_declared() {
        let dir = test_dir("undeclared");
        write_catalog(
            &dir,
            r#"{"装饰条目": {"name_zh": "装饰条目", "image": "images/x.png"}}"#,
        );
        let progress = Arc::new(Mutex::new(LoadingProgress::default()));
        let bank = build_from_resources(&dir, &progress).unwrap();
        assert!(bank.is_empty());
        assert_eq!(progress.lock().unwrap().total, 0);
    }

    fn entry(id: &str, day: &str) -> TemplateEntry {
        TemplateEntry {
            id: id.to_string(),
            display_name: id.to_string(),
            day: day.to_string(),
            features: Vec::new(),
            source: PathBuf::new(),
        }
    }

    #[test]
    fn day_filter_uses_brackets() {
        let bank = vec![
            entry("a", "Day 3"),
            entry("b", "Day 5"),
            entry("c", "Day 10"),
            entry("d", "Day 10+"),
        ];

        let day3: Vec<_> = entries_for_day(&bank, Some(3)).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(day3, vec!["a"]);

        // Day 10+ 档位合并 Day 10 与 Day 10+
        let late: Vec<_> = entries_for_day(&bank, Some(12)).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(late, vec!["c", "d"]);

        assert_eq!(entries_for_day(&bank, None).len(), 4);
    }

    #[test]
    fn progress_defaults_to_zero_before_loading() {
        let p = LoadingProgress::default();
        assert_eq!(p.loaded, 0);
        assert_eq!(p.total, 0);
        assert!(!p.is_complete);
    }
}
