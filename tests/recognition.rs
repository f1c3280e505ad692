mod common;

use common::synthetic_image::{canvas, glyph, paste_centered};
use image::DynamicImage;
use std::path::PathBuf;

use bazaar_lens_lib::recognition::classical;
use bazaar_lens_lib::recognition::detector::{candidates_near_cursor, Detection};
use bazaar_lens_lib::recognition::features;
use bazaar_lens_lib::recognition::template_bank::{entries_for_day, TemplateEntry};
use bazaar_lens_lib::recognition::{resolver, CandidateRegion, MatchCandidate, Role};

fn template_from(id: &str, day: &str, img: &image::GrayImage) -> TemplateEntry {
    TemplateEntry {
        id: id.to_string(),
        display_name: id.to_string(),
        day: day.to_string(),
        features: features::extract_features(&DynamicImage::ImageLuma8(img.clone())),
        source: PathBuf::new(),
    }
}

/// 1000x300 的遭遇区域，三个已知图案的中心落在 x=100/500/900，
/// 正好分属左/中/右三个槽位。
fn three_glyph_scene() -> (DynamicImage, [image::GrayImage; 3]) {
    let a = glyph(120, 120, 101);
    let b = glyph(120, 120, 202);
    let c = glyph(120, 120, 303);
    let mut region = canvas(1000, 300);
    paste_centered(&mut region, &a, 100, 150);
    paste_centered(&mut region, &b, 500, 150);
    paste_centered(&mut region, &c, 900, 150);
    (DynamicImage::ImageLuma8(region), [a, b, c])
}

#[test]
fn three_templates_land_in_their_slots() {
    let (scene, [a, b, c]) = three_glyph_scene();
    let ta = template_from("entity_a", "Day 1", &a);
    let tb = template_from("entity_b", "Day 1", &b);
    let tc = template_from("entity_c", "Day 1", &c);
    let templates = vec![&ta, &tb, &tc];

    let candidates = classical::match_slots(&scene, &templates);
    assert_eq!(candidates.len(), 3);
    assert_eq!(candidates[0].entity_id, "entity_a");
    assert_eq!(candidates[0].region, CandidateRegion::Slot { slot: 1 });
    assert_eq!(candidates[1].entity_id, "entity_b");
    assert_eq!(candidates[1].region, CandidateRegion::Slot { slot: 2 });
    assert_eq!(candidates[2].entity_id, "entity_c");
    assert_eq!(candidates[2].region, CandidateRegion::Slot { slot: 3 });
}

#[test]
fn identical_inputs_yield_identical_results() {
    let (scene, [a, b, c]) = three_glyph_scene();
    let ta = template_from("entity_a", "Day 1", &a);
    let tb = template_from("entity_b", "Day 1", &b);
    let tc = template_from("entity_c", "Day 1", &c);
    let templates = vec![&ta, &tb, &tc];

    let first = classical::match_slots(&scene, &templates);
    let second = classical::match_slots(&scene, &templates);
    assert_eq!(first, second);

    let ranked_first = resolver::resolve_slots(first);
    let ranked_second = resolver::resolve_slots(second);
    assert_eq!(ranked_first, ranked_second);
}

#[test]
fn day_filter_excludes_unavailable_entities() {
    let (scene, [a, b, c]) = three_glyph_scene();
    let bank = vec![
        template_from("entity_a", "Day 3", &a),
        template_from("entity_b", "Day 5", &b),
        template_from("entity_c", "Day 5", &c),
    ];

    let templates = entries_for_day(&bank, Some(5));
    let candidates = classical::match_slots(&scene, &templates);

    // entity_a 的图案就摆在槽位 1，但它不在 Day 5 档位，不得出现
    assert!(candidates.iter().all(|c| c.entity_id != "entity_a"));
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].entity_id, "entity_b");
    assert_eq!(candidates[0].region, CandidateRegion::Slot { slot: 2 });
    assert_eq!(candidates[1].entity_id, "entity_c");
    assert_eq!(candidates[1].region, CandidateRegion::Slot { slot: 3 });
}

#[test]
fn empty_template_set_matches_nothing() {
    let (scene, _) = three_glyph_scene();
    let candidates = classical::match_slots(&scene, &[]);
    assert!(candidates.is_empty());
    // 空输入走到 resolver 也只是空结果，不是错误
    assert!(resolver::resolve_slots(candidates).candidates.is_empty());
}

#[test]
fn overlapping_pointer_detections_resolve_primary_secondary() {
    // 两个不同实体的检测框大面积重叠且都过了阈值
    let dets = vec![
        Detection {
            x1: 90,
            y1: 90,
            x2: 210,
            y2: 210,
            confidence: 0.81,
            class_id: 2,
        },
        Detection {
            x1: 100,
            y1: 100,
            x2: 200,
            y2: 200,
            confidence: 0.93,
            class_id: 4,
        },
    ];
    let picked = candidates_near_cursor(&dets, (150, 150));
    assert_eq!(picked.len(), 2);

    let candidates: Vec<MatchCandidate> = picked
        .iter()
        .map(|d| MatchCandidate {
            entity_id: format!("cls_{}", d.class_id),
            confidence: d.confidence,
            region: CandidateRegion::Box {
                x1: d.x1,
                y1: d.y1,
                x2: d.x2,
                y2: d.y2,
            },
        })
        .collect();
    let result = resolver::resolve_pointer(candidates);

    assert_eq!(result.candidates.len(), 2);
    assert_eq!(result.candidates[0].entity_id, "cls_4");
    assert_eq!(result.candidates[0].role, Role::Primary);
    assert_eq!(result.candidates[1].entity_id, "cls_2");
    assert_eq!(result.candidates[1].role, Role::Secondary);
    assert!(result.candidates[0].confidence >= result.candidates[1].confidence);
}
