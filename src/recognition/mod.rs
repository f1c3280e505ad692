use serde::{Deserialize, Serialize};

pub mod capture;
pub mod classical;
pub mod detector;
pub mod features;
pub mod gate;
pub mod resolver;
pub mod template_bank;

/// 候选命中的位置信息：怪物走固定槽位，卡牌/物品带检测框
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateRegion {
    /// 槽位编号 1..=3，从左到右
    Slot { slot: u8 },
    /// 屏幕坐标系下的检测框
    Box { x1: i32, y1: i32, x2: i32, y2: i32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub entity_id: String,
    pub confidence: f32,
    pub region: CandidateRegion,
}

/// 结果里每个候选的角色标签，前端据此渲染“命中/疑似”
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub entity_id: String,
    pub confidence: f32,
    pub region: CandidateRegion,
    pub role: Role,
}

impl RankedCandidate {
    pub fn new(candidate: MatchCandidate, role: Role) -> Self {
        Self {
            entity_id: candidate.entity_id,
            confidence: candidate.confidence,
            region: candidate.region,
            role,
        }
    }
}

/// 一次识别的最终输出。空列表是合法结果，表示什么都没认出来。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub candidates: Vec<RankedCandidate>,
}

/// 识别流程的错误分类。Display 输出即前端收到的错误字符串。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    /// 模板库还没加载完，调用方应等 is_complete 后再触发
    TemplatesNotReady,
    /// 已有识别在跑，本次调用被拒绝（不排队）
    AlreadyRunning,
    Capture(String),
    Inference(String),
}

impl std::fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognitionError::TemplatesNotReady => write!(f, "templates not loaded"),
            RecognitionError::AlreadyRunning => write!(f, "already running"),
            RecognitionError::Capture(e) => write!(f, "capture failed: {}", e),
            RecognitionError::Inference(e) => write!(f, "inference failed: {}", e),
        }
    }
}

impl std::error::Error for RecognitionError {}

impl From<RecognitionError> for String {
    fn from(e: RecognitionError) -> Self {
        e.to_string()
    }
}
