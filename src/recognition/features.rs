use image::DynamicImage;
use imageproc::corners::corners_fast9;

/// 256-bit BRIEF 描述子
pub type Descriptor = [u8; 32];

/// (描述子, 角点坐标)
pub type Feature = (Descriptor, (u32, u32));

/// FAST 角点阈值，在灵敏度和抗噪之间取得平衡
const FAST_THRESHOLD: u8 = 30;
/// 单张图最多保留的特征数。上限给足，避免边缘密集区挤掉画面中间的图案。
const MAX_FEATURES: usize = 1000;
/// BRIEF 采样窗口要求角点距边界至少这么多像素
const BORDER: u32 = 17;

fn compute_brief(img: &image::GrayImage, x: u32, y: u32) -> Option<Descriptor> {
    if x < 16 || y < 16 || x > img.width() - BORDER || y > img.height() - BORDER {
        return None;
    }
    let mut desc = [0u8; 32];
    for i in 0..256 {
        let p1 = img.get_pixel(x + (i % 15) - 7, y + (i / 15 % 15) - 7);
        let p2 = img.get_pixel(x + (i % 13) - 6, y + (i / 13 % 13) - 6);
        if p1.0[0] > p2.0[0] {
            desc[(i / 8) as usize] |= 1 << (i % 8);
        }
    }
    Some(desc)
}

/// 提取 FAST 角点并计算 BRIEF 描述子。结果对同一输入完全确定。
pub fn extract_features(img: &DynamicImage) -> Vec<Feature> {
    let gray = img.to_luma8();
    // 图太小放不下采样窗口，直接视为无特征
    if gray.width() < BORDER * 2 || gray.height() < BORDER * 2 {
        return Vec::new();
    }
    let corners = corners_fast9(&gray, FAST_THRESHOLD);
    let mut features = Vec::new();
    for corner in corners {
        if let Some(desc) = compute_brief(&gray, corner.x, corner.y) {
            features.push((desc, (corner.x, corner.y)));
        }
        if features.len() > MAX_FEATURES {
            break;
        }
    }
    features
}

pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    let mut dist = 0;
    for i in 0..32 {
        dist += (a[i] ^ b[i]).count_ones();
    }
    dist
}
