use anyhow::{Context, Result};
use clap::Parser;
use image::GenericImageView;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bazaar_lens_lib::recognition::classical;
use bazaar_lens_lib::recognition::template_bank::{
    self, entries_for_day, LoadingProgress,
};

/// 对保存好的截图离线跑一遍怪物槽位匹配，调参数用
#[derive(Parser, Debug)]
#[command(author, version, about = "Match a saved screenshot against the template bank", long_about = None)]
struct Args {
    /// 截图文件（整屏截图，会先裁出遭遇区域）
    #[arg(short, long)]
    screenshot: PathBuf,

    /// 资源目录（包含 monsters_db.json 和模板图片）
    #[arg(short, long)]
    resources: PathBuf,

    /// 只匹配指定天数的模板
    #[arg(short, long)]
    day: Option<u32>,

    /// 跳过遭遇区域裁剪，把整张输入当作已裁好的区域
    #[arg(long, default_value_t = false)]
    raw_region: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let start = Instant::now();
    let progress = Arc::new(Mutex::new(LoadingProgress::default()));
    let bank = template_bank::build_from_resources(&args.resources, &progress)
        .map_err(anyhow::Error::msg)?;
    println!("模板库就绪: {} 条, 耗时 {:?}", bank.len(), start.elapsed());

    let img = image::open(&args.screenshot)
        .with_context(|| format!("无法打开截图 {:?}", args.screenshot))?;
    let templates = entries_for_day(&bank, args.day);
    println!("参与匹配: {} 条 (day: {:?})", templates.len(), args.day);

    let region = if args.raw_region {
        img
    } else {
        let (x, y, w, h) = classical::encounter_region(img.width(), img.height());
        img.crop_imm(x, y, w, h)
    };

    let start_match = Instant::now();
    let candidates = classical::match_slots(&region, &templates);
    println!("匹配耗时: {:?}", start_match.elapsed());

    if candidates.is_empty() {
        println!("没有槽位达到接受阈值");
    }
    for c in candidates {
        println!("{:?} -> '{}' (置信度 {:.2})", c.region, c.entity_id, c.confidence);
    }
    Ok(())
}
