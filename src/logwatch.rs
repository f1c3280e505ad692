use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::{thread, time};

use tauri::Emitter;

use crate::catalog::{ItemData, ItemDb};

/// 跨重启保留的游戏上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    pub day: u32,
    pub inst_to_temp: HashMap<String, String>,
    pub current_hand: HashSet<String>,
    pub current_stash: HashSet<String>,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            day: 1,
            inst_to_temp: HashMap::new(),
            current_hand: HashSet::new(),
            current_stash: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncPayload {
    pub hand_items: Vec<ItemData>,
    pub stash_items: Vec<ItemData>,
}

pub fn log_path() -> PathBuf {
    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home)
            .join("Library")
            .join("Logs")
            .join("Tempo Storm")
            .join("The Bazaar")
            .join("Player.log")
    } else {
        let home = std::env::var("USERPROFILE").unwrap_or_default();
        PathBuf::from(home)
            .join("AppData")
            .join("LocalLow")
            .join("Tempo Storm")
            .join("The Bazaar")
            .join("Player.log")
    }
}

pub fn prev_log_path() -> PathBuf {
    let mut p = log_path();
    p.set_file_name("Player-prev.log");
    p
}

pub fn state_cache_path() -> PathBuf {
    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("com.duang.BazaarLens")
            .join("state_cache.json")
    } else {
        let home = std::env::var("USERPROFILE").unwrap_or_default();
        PathBuf::from(home)
            .join("AppData")
            .join("Local")
            .join("BazaarLens")
            .join("state_cache.json")
    }
}

pub fn save_state(state: &PersistentState) {
    let path = state_cache_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(json) = serde_json::to_string(state) {
        let _ = std::fs::write(path, json);
    }
}

pub fn load_state() -> PersistentState {
    let path = state_cache_path();
    if let Ok(json) = std::fs::read_to_string(path) {
        if let Ok(state) = serde_json::from_str::<PersistentState>(&json) {
            return state;
        }
    }
    PersistentState::default()
}

/// 无 PVP 的兜底：累计这么多次遭遇后视为过了一天
const HOURS_FALLBACK: u32 = 10;

/// 单行日志消费后的变化标记
#[derive(Debug, Default, Clone, Copy)]
pub struct LineOutcome {
    pub day_changed: bool,
    pub items_changed: bool,
}

impl LineOutcome {
    fn merge(&mut self, other: LineOutcome) {
        self.day_changed |= other.day_changed;
        self.items_changed |= other.items_changed;
    }
}

/// 逐行消费 Player.log，维护天数与手牌/仓库集合。
///
/// 天数规则：新开局重置为 1；一场 PVP 打完回到地图（ChoiceState /
/// LevelUpState）天数 +1；没有 PVP 的模式按遭遇数兜底推进。
pub struct LogTracker {
    pub day: u32,
    pub inst_to_temp: HashMap<String, String>,
    pub hand: HashSet<String>,
    pub stash: HashSet<String>,

    in_pvp: bool,
    hour_count: u32,
    // 游戏状态同步块的解析游标
    in_sync: bool,
    last_iid: String,
    cur_owner: String,

    re_purchase: Regex,
    re_id: Regex,
    re_owner: Regex,
    re_section: Regex,
    re_item_id: Regex,
    re_sold: Regex,
    re_removed: Regex,
    re_moved_to: Regex,
}

impl LogTracker {
    pub fn new() -> Self {
        Self::from_state(PersistentState::default())
    }

    pub fn from_state(state: PersistentState) -> Self {
        Self {
            day: state.day,
            inst_to_temp: state.inst_to_temp,
            hand: state.current_hand,
            stash: state.current_stash,
            in_pvp: false,
            hour_count: 0,
            in_sync: false,
            last_iid: String::new(),
            cur_owner: String::new(),
            re_purchase: Regex::new(r"Card Purchased: InstanceId:\s*(?P<iid>[^ ]+)\s*-\s*TemplateId\s*(?P<tid>[^ ]+)(?:.*Target:(?P<tgt>[^ ]+))?(?:.*Section(?P<sec>[^ ]+))?").unwrap(),
            re_id: Regex::new(r"ID: \[(?P<id>[^\]]+)\]").unwrap(),
            re_owner: Regex::new(r"- Owner: \[(?P<val>[^\]]+)\]").unwrap(),
            re_section: Regex::new(r"- Section: \[(?P<val>[^\]]+)\]").unwrap(),
            re_item_id: Regex::new(r"itm_[A-Za-z0-9_-]+").unwrap(),
            re_sold: Regex::new(r"Sold Card\s+(?P<iid>itm_[^ ]+)").unwrap(),
            re_removed: Regex::new(r"Successfully removed item\s+(?P<iid>itm_[^ ]+)").unwrap(),
            re_moved_to: Regex::new(r"Successfully moved card\s+(?P<iid>itm_[^ ]+)\s+to\s+(?P<tgt>[^ ]+)").unwrap(),
        }
    }

    pub fn to_state(&self) -> PersistentState {
        PersistentState {
            day: self.day,
            inst_to_temp: self.inst_to_temp.clone(),
            current_hand: self.hand.clone(),
            current_stash: self.stash.clone(),
        }
    }

    /// 新开局：天数归 1，库存清空
    fn reset_run(&mut self) {
        self.day = 1;
        self.in_pvp = false;
        self.hour_count = 0;
        self.inst_to_temp.clear();
        self.hand.clear();
        self.stash.clear();
    }

    pub fn apply_line(&mut self, line: &str) -> LineOutcome {
        let trimmed = line.trim();
        let mut outcome = LineOutcome::default();
        outcome.merge(self.apply_day_rules(trimmed));
        outcome.merge(self.apply_inventory_rules(trimmed));
        outcome.merge(self.apply_sync_block(trimmed));
        outcome
    }

    fn apply_day_rules(&mut self, trimmed: &str) -> LineOutcome {
        let mut outcome = LineOutcome::default();

        if trimmed.contains("NetMessageRunInitialized") {
            self.reset_run();
            outcome.day_changed = true;
            outcome.items_changed = true;
            return outcome;
        }

        if trimmed.contains("to [PVPCombatState]") {
            self.in_pvp = true;
        }

        // 最可靠的翻天信号：PVP 打完回到地图
        if self.in_pvp
            && trimmed.contains("State changed")
            && (trimmed.contains("to [ChoiceState]") || trimmed.contains("to [LevelUpState]"))
        {
            self.day = self.day.saturating_add(1);
            self.in_pvp = false;
            self.hour_count = 0;
            outcome.day_changed = true;
            info!("[LogWatch] Day increased to {} after PVP completion", self.day);
            return outcome;
        }

        // 兜底：纯 PVE 模式按离开地图的次数计时
        if trimmed.contains("State changed from [ChoiceState] to [")
            && !trimmed.contains("to [ChoiceState]")
            && !trimmed.contains("to [PVPCombatState]")
        {
            self.hour_count = self.hour_count.saturating_add(1);
            if self.hour_count >= HOURS_FALLBACK {
                self.day = self.day.saturating_add(1);
                self.hour_count = 0;
                outcome.day_changed = true;
                info!("[LogWatch] Day increased to {} after {} encounters", self.day, HOURS_FALLBACK);
            }
        }
        outcome
    }

    fn apply_inventory_rules(&mut self, trimmed: &str) -> LineOutcome {
        let mut outcome = LineOutcome::default();

        if let Some(cap) = self.re_purchase.captures(trimmed) {
            let iid = cap["iid"].to_string();
            self.inst_to_temp.insert(iid.clone(), cap["tid"].to_string());

            let mut section = cap.name("sec").map(|s| s.as_str().to_string());
            // Section 缺失时从 Target 推断落点
            if section.as_deref().unwrap_or("").is_empty() {
                if let Some(tgt) = cap.name("tgt").map(|t| t.as_str()) {
                    if tgt.contains("PlayerStorageSocket") {
                        section = Some("Stash".to_string());
                    } else if tgt.contains("PlayerSocket") {
                        section = Some("Player".to_string());
                    }
                }
            }
            if let Some(s) = section {
                if s == "Player" || s == "Hand" {
                    self.hand.insert(iid);
                    outcome.items_changed = true;
                } else if s == "Stash" || s == "Storage" || s == "PlayerStorage" {
                    self.stash.insert(iid);
                    outcome.items_changed = true;
                }
            }
        }

        if let Some(cap) = self.re_moved_to.captures(trimmed) {
            let iid = cap["iid"].to_string();
            let tgt = &cap["tgt"];
            if tgt.contains("StorageSocket") {
                self.stash.insert(iid.clone());
                self.hand.remove(&iid);
                outcome.items_changed = true;
            } else if tgt.contains("Socket") {
                self.hand.insert(iid.clone());
                self.stash.remove(&iid);
                outcome.items_changed = true;
            }
        }

        if let Some(cap) = self.re_sold.captures(trimmed) {
            let iid = cap["iid"].to_string();
            if self.hand.remove(&iid) || self.stash.remove(&iid) {
                outcome.items_changed = true;
            }
        }

        if let Some(cap) = self.re_removed.captures(trimmed) {
            let iid = cap["iid"].to_string();
            if self.hand.remove(&iid) || self.stash.remove(&iid) {
                outcome.items_changed = true;
            }
        }

        if trimmed.contains("Cards Disposed:") {
            let ids: Vec<String> = self
                .re_item_id
                .find_iter(trimmed)
                .map(|m| m.as_str().to_string())
                .collect();
            for iid in ids {
                if self.hand.remove(&iid) || self.stash.remove(&iid) {
                    outcome.items_changed = true;
                }
            }
        }
        outcome
    }

    /// 全量同步块：ID / Owner / Section 三行一组，按 Section 归位
    fn apply_sync_block(&mut self, trimmed: &str) -> LineOutcome {
        let mut outcome = LineOutcome::default();

        if trimmed.contains("Cards Spawned:")
            || trimmed.contains("Cards Dealt:")
            || trimmed.contains("NetMessageGameStateSync")
            || trimmed.contains("Successfully moved card to:")
        {
            self.in_sync = true;
            return outcome;
        }
        if !self.in_sync {
            return outcome;
        }

        if let Some(cap) = self.re_id.captures(trimmed) {
            self.last_iid = cap["id"].to_string();
        } else if let Some(cap) = self.re_owner.captures(trimmed) {
            self.cur_owner = cap["val"].to_string();
        } else if let Some(cap) = self.re_section.captures(trimmed) {
            if !self.last_iid.is_empty()
                && self.cur_owner == "Player"
                && self.last_iid.starts_with("itm_")
            {
                let iid = self.last_iid.clone();
                match &cap["val"] {
                    "Hand" | "Player" => {
                        self.hand.insert(iid.clone());
                        self.stash.remove(&iid);
                    }
                    "Stash" | "Storage" | "PlayerStorage" => {
                        self.stash.insert(iid.clone());
                        self.hand.remove(&iid);
                    }
                    _ => {
                        self.hand.remove(&iid);
                        self.stash.remove(&iid);
                    }
                }
                outcome.items_changed = true;
            }
            self.last_iid.clear();
            self.cur_owner.clear();
        } else if trimmed.contains("Finished processing") {
            self.in_sync = false;
            outcome.items_changed = true;
        }
        outcome
    }
}

impl Default for LogTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// 从整段日志内容推断当前天数。retro 模式只看最近一局。
pub fn day_from_log_content(content: &str, retro: bool) -> Option<u32> {
    let start_pos = if retro {
        content.rfind("NetMessageRunInitialized").unwrap_or(0)
    } else {
        0
    };
    let mut tracker = LogTracker::new();
    for line in content[start_pos..].lines() {
        tracker.apply_line(line);
    }
    Some(tracker.day)
}

/// 读日志尾部（最多 5MB）推断天数，日志不存在时返回 None
pub fn read_day_from_log(path: &PathBuf, retro: bool) -> Result<Option<u32>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let mut file = File::open(path).map_err(|e| e.to_string())?;
    let file_size = file.metadata().map_err(|e| e.to_string())?.len();

    let read_size = file_size.min(5_000_000) as usize;
    let mut buffer = vec![0u8; read_size];
    file.seek(SeekFrom::End(-(read_size as i64)))
        .map_err(|e| e.to_string())?;
    file.read_exact(&mut buffer).map_err(|e| e.to_string())?;

    let content = String::from_utf8_lossy(&buffer);
    Ok(day_from_log_content(&content, retro))
}

fn build_sync_payload(tracker: &LogTracker, items_db: &ItemDb) -> SyncPayload {
    let map_items = |ids: &HashSet<String>| -> Vec<ItemData> {
        ids.iter()
            .filter_map(|iid| tracker.inst_to_temp.get(iid))
            .filter_map(|tid| items_db.get(tid).cloned())
            .collect()
    };
    SyncPayload {
        hand_items: map_items(&tracker.hand),
        stash_items: map_items(&tracker.stash),
    }
}

/// 日志监控线程：无缓存时先从历史日志回填，之后每 500ms 追日志尾部，
/// 把天数和库存变化推给前端。
pub fn spawn_watcher(handle: tauri::AppHandle, items_db: Arc<RwLock<ItemDb>>) {
    thread::spawn(move || {
        let log_path = log_path();
        let prev_path = prev_log_path();

        let has_cache = state_cache_path().exists();
        let mut tracker = LogTracker::from_state(load_state());
        let mut last_file_size = std::fs::metadata(&log_path).map(|m| m.len()).unwrap_or(0);

        if !has_cache {
            info!("[LogWatch] No cache found, backfilling from logs...");
            for path in [&prev_path, &log_path] {
                if !path.exists() {
                    continue;
                }
                if let Ok(file) = File::open(path) {
                    for line in BufReader::new(file).lines().map_while(Result::ok) {
                        tracker.apply_line(&line);
                    }
                }
            }
            save_state(&tracker.to_state());
        } else {
            info!("[LogWatch] Loading from cache (current_day: {})", tracker.day);
        }

        // 启动后给前端补一次全量状态
        {
            let init_handle = handle.clone();
            let init_day = tracker.day;
            let payload = items_db
                .read()
                .map(|db| build_sync_payload(&tracker, &db))
                .unwrap_or(SyncPayload {
                    hand_items: Vec::new(),
                    stash_items: Vec::new(),
                });
            tauri::async_runtime::spawn(async move {
                tokio::time::sleep(tokio::time::Duration::from_millis(1500)).await;
                let _ = init_handle.emit("day-update", init_day);
                let _ = init_handle.emit("sync-items", payload);
            });
        }

        loop {
            if !log_path.exists() {
                thread::sleep(time::Duration::from_secs(2));
                continue;
            }
            let current_file_size = match std::fs::metadata(&log_path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!("[LogWatch] stat failed: {}", e);
                    thread::sleep(time::Duration::from_secs(2));
                    continue;
                }
            };

            // 日志被滚动/截断：游戏重启了，状态从头来
            if current_file_size < last_file_size {
                info!("[LogWatch] Log truncated, resetting state...");
                tracker = LogTracker::new();
                last_file_size = 0;
                save_state(&tracker.to_state());
            }

            if current_file_size > last_file_size {
                let mut outcome = LineOutcome::default();
                if let Ok(mut f) = File::open(&log_path) {
                    let _ = f.seek(SeekFrom::Start(last_file_size));
                    for line in BufReader::new(f).lines().map_while(Result::ok) {
                        outcome.merge(tracker.apply_line(&line));
                    }
                }

                if outcome.day_changed || outcome.items_changed {
                    if outcome.day_changed {
                        let _ = handle.emit("day-update", tracker.day);
                    }
                    if let Ok(db) = items_db.read() {
                        let _ = handle.emit("sync-items", build_sync_payload(&tracker, &db));
                    }
                    save_state(&tracker.to_state());
                }
                last_file_size = current_file_size;
            }
            thread::sleep(time::Duration::from_millis(500));
        }
    });
}
