use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// monsters_db.json 单条目。识别只关心这三个字段，其余留给前端展示层。
#[derive(Debug, Clone, Deserialize)]
pub struct MonsterEntry {
    pub name_zh: Option<String>,
    pub available: Option<String>,
    pub image: Option<String>,
}

pub fn read_monsters(path: &Path) -> Result<HashMap<String, MonsterEntry>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("读取 {:?} 失败", path))?;
    let monsters: HashMap<String, MonsterEntry> =
        serde_json::from_str(&json).with_context(|| format!("解析 {:?} 失败", path))?;
    Ok(monsters)
}

/// 原始怪物库，原样透传给前端
pub fn read_monsters_raw(path: &Path) -> Result<serde_json::Map<String, serde_json::Value>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("读取 {:?} 失败", path))?;
    match serde_json::from_str::<serde_json::Value>(&json)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("monsters_db.json 顶层不是对象: {:?}", path),
    }
}

/// items_db.json 条目，裁剪到识别与库存同步需要的字段
#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    pub id: String,
    pub name_en: Option<String>,
    pub name_cn: Option<String>,
    pub starting_tier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemData {
    pub uuid: String,
    pub name: String,
    pub name_cn: String,
    pub tier: String,
}

impl From<RawItem> for ItemData {
    fn from(raw: RawItem) -> Self {
        let name = raw.name_en.unwrap_or_else(|| "Unknown".to_string());
        let name_cn = raw.name_cn.unwrap_or_else(|| name.clone());
        ItemData {
            uuid: raw.id,
            name,
            name_cn,
            tier: raw.starting_tier.unwrap_or_else(|| "Bronze".to_string()),
        }
    }
}

pub struct ItemDb {
    pub list: Vec<ItemData>,
    pub id_map: HashMap<String, usize>,
}

impl ItemDb {
    pub fn empty() -> Self {
        Self {
            list: Vec::new(),
            id_map: HashMap::new(),
        }
    }

    pub fn from_raw(raw_list: Vec<RawItem>) -> Self {
        let list: Vec<ItemData> = raw_list.into_iter().map(ItemData::from).collect();
        let id_map = list
            .iter()
            .enumerate()
            .map(|(index, item)| (item.uuid.clone(), index))
            .collect();
        Self { list, id_map }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("读取 {:?} 失败", path))?;
        let raw_list: Vec<RawItem> =
            serde_json::from_str(&json).with_context(|| format!("解析 {:?} 失败", path))?;
        Ok(Self::from_raw(raw_list))
    }

    pub fn get(&self, id: &str) -> Option<&ItemData> {
        self.id_map.get(id).map(|&index| &self.list[index])
    }
}

/// 模型类别下标 -> 实体 id 的映射表（model_classes.json，与 onnx 模型同目录）
#[derive(Debug, Clone, Deserialize)]
pub struct ClassMap {
    classes: Vec<String>,
}

impl ClassMap {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("读取 {:?} 失败", path))?;
        let classes: Vec<String> =
            serde_json::from_str(&json).with_context(|| format!("解析 {:?} 失败", path))?;
        Ok(Self { classes })
    }

    pub fn entity_id(&self, class_id: usize) -> Option<&str> {
        self.classes.get(class_id).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
