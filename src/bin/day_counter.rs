use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use bazaar_lens_lib::logwatch::LogTracker;

/// 离线跑一遍 Player.log，核对天数推断
#[derive(Parser, Debug)]
#[command(author, version, about = "Infer current day from Player.log", long_about = None)]
struct Args {
    /// Path to Player.log
    #[arg(short, long)]
    log: PathBuf,

    /// Print a line every time the day advances
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let file = File::open(&args.log).with_context(|| format!("无法打开日志 {:?}", args.log))?;
    let mut tracker = LogTracker::new();
    let mut last_day = tracker.day;

    for line in BufReader::new(file).lines() {
        let line = line?;
        tracker.apply_line(&line);
        if args.verbose && tracker.day != last_day {
            println!(">>> 进入第 {} 天 <<<", tracker.day);
            last_day = tracker.day;
        }
    }

    println!("当前天数: Day {}", tracker.day);
    println!("手牌 {} 件 / 仓库 {} 件", tracker.hand.len(), tracker.stash.len());
    Ok(())
}
