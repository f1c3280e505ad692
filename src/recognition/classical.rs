use image::{DynamicImage, GenericImageView};
use log::info;
use std::time::Instant;

use super::capture::CaptureFrame;
use super::features::{self, Feature};
use super::template_bank::TemplateEntry;
use super::{CandidateRegion, MatchCandidate};

/// 单对描述子判定配对的最大汉明距离
const MATCH_DISTANCE: u32 = 40;
/// 槽位候选的最低配对数，达到（含等于）即接受
pub const MIN_MATCHES: usize = 5;
/// 配对数换算置信度的分母
const CONFIDENCE_SCALE: f32 = 50.0;

/// 画面中部的遭遇区域：宽 5/12 居中，纵向取 15%~50%。
/// 三个怪物立绘在这块区域里按水平三等分排布。
pub fn encounter_region(width: u32, height: u32) -> (u32, u32, u32, u32) {
    let y = (height as f32 * 0.15) as u32;
    let h = (height as f32 * 0.35) as u32;
    let w = (width as f32 * (5.0 / 12.0)) as u32;
    let x = (width as f32 * (0.5 - 5.0 / 24.0)) as u32;
    (x, y, w, h)
}

/// 场景特征里能在模板特征中找到配对的数量
pub fn count_matches(scene: &[Feature], template: &[Feature]) -> usize {
    let mut matches = 0;
    for (scene_desc, _) in scene {
        for (temp_desc, _) in template {
            if features::hamming_distance(scene_desc, temp_desc) < MATCH_DISTANCE {
                matches += 1;
                break;
            }
        }
    }
    matches
}

/// 在给定模板集中为一个槽位选出最优候选。
/// 配对数严格更高者胜；完全并列时取 id 字典序较小者，保证结果可复现。
/// 最优者配对数不足 MIN_MATCHES 时槽位留空，不输出低置信度的硬猜。
pub fn best_candidate(
    scene: &[Feature],
    templates: &[&TemplateEntry],
    slot: u8,
) -> Option<MatchCandidate> {
    let mut best: Option<(&TemplateEntry, usize)> = None;
    for template in templates {
        let matches = count_matches(scene, &template.features);
        if matches == 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((cur, cur_matches)) => {
                matches > cur_matches || (matches == cur_matches && template.id < cur.id)
            }
        };
        if better {
            best = Some((template, matches));
        }
    }

    let (template, matches) = best?;
    if matches < MIN_MATCHES {
        return None;
    }
    Some(MatchCandidate {
        entity_id: template.id.clone(),
        confidence: (matches as f32 / CONFIDENCE_SCALE).min(1.0),
        region: CandidateRegion::Slot { slot },
    })
}

/// 对已裁出的遭遇区域做三槽位匹配，输出按槽位从左到右有序。
pub fn match_slots(region: &DynamicImage, templates: &[&TemplateEntry]) -> Vec<MatchCandidate> {
    let width = region.width();
    let height = region.height();
    let slot_w = width / 3;
    let mut results = Vec::new();

    for i in 0..3u32 {
        let start_slot = Instant::now();
        let x = i * slot_w;
        if slot_w == 0 || x + slot_w > width {
            continue;
        }
        let slice = region.crop_imm(x, 0, slot_w, height);
        let scene = features::extract_features(&slice);
        if scene.is_empty() {
            continue;
        }

        if let Some(candidate) = best_candidate(&scene, templates, (i + 1) as u8) {
            info!(
                "[Slot {}] 识别得出: '{}', 置信度: {:.2}, 耗时: {:?}",
                i + 1,
                candidate.entity_id,
                candidate.confidence,
                start_slot.elapsed()
            );
            results.push(candidate);
        }
    }
    results
}

/// 完整的一次怪物识别：裁出遭遇区域再做槽位匹配
pub fn recognize(frame: &CaptureFrame, templates: &[&TemplateEntry]) -> Vec<MatchCandidate> {
    let start = Instant::now();
    let (x, y, w, h) = encounter_region(frame.width, frame.height);
    if w == 0 || h == 0 || x + w > frame.width || y + h > frame.height {
        return Vec::new();
    }
    let region = frame.image.crop_imm(x, y, w, h);
    let results = match_slots(&region, templates);
    info!("[Timer] 特征提取与比对总耗时: {:?}", start.elapsed());
    results
}
