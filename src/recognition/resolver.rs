use std::cmp::Ordering;

use super::{MatchCandidate, RankedCandidate, RankedResult, Role};

/// 怪物模式：槽位候选本身已按槽位从左到右有序，逐个升格即可。
/// 每个槽位各自就是该槽的确定命中，统一标记 Primary。
pub fn resolve_slots(candidates: Vec<MatchCandidate>) -> RankedResult {
    RankedResult {
        candidates: candidates
            .into_iter()
            .map(|c| RankedCandidate::new(c, Role::Primary))
            .collect(),
    }
}

/// 卡牌/物品模式：按置信度降序排列，第 0 位是 Primary（“命中”），
/// 其余是 Secondary（“疑似”）。空输入输出空结果，不算错误。
pub fn resolve_pointer(mut candidates: Vec<MatchCandidate>) -> RankedResult {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    RankedResult {
        candidates: candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let role = if i == 0 { Role::Primary } else { Role::Secondary };
                RankedCandidate::new(c, role)
            })
            .collect(),
    }
}
