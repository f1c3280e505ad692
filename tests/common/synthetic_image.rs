use image::{GrayImage, Luma};

/// 线性同余发生器。同一种子生成完全一致的纹理，测试可复现。
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u8(&mut self) -> u8 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u8
    }
}

/// 高对比噪声图案：FAST 能找到大量角点，不同种子之间的描述子互不相似。
pub fn glyph(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut rng = Lcg::new(seed);
    GrayImage::from_fn(width, height, |_, _| Luma([rng.next_u8()]))
}

/// 均匀灰背景画布，背景上不会产生角点
pub fn canvas(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([128u8]))
}

/// 把图案按中心点贴进画布
pub fn paste_centered(canvas: &mut GrayImage, glyph: &GrayImage, cx: u32, cy: u32) {
    let x0 = cx.saturating_sub(glyph.width() / 2);
    let y0 = cy.saturating_sub(glyph.height() / 2);
    image::imageops::replace(canvas, glyph, x0 as i64, y0 as i64);
}
