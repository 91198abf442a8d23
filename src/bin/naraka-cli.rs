//! 网易大神集卡活动自动化 CLI
//!
//! 配置全部来自环境变量（适配青龙面板定时任务）：
//! - NARAKA_SIGN_API_URL 签名计算接口地址（必须）
//! - NARAKA_TOKEN 账号配置（TOKEN#UID#DEVICE_ID#名称，& 分隔多账号）
//! - NARAKA_CARD_BOOK_ID 卡册 ID（可选，不填自动发现）
//! - NARAKA_EXCHANGE_CARDS 是否开启互赠（默认开启）
//! - NARAKA_NOTIFY_URL 中奖通知推送地址（可选）

use anyhow::Result;
use clap::Parser;
use naraka_luckdraw::ds::{config::Settings, runner};
use tracing::{error, info};

/// 大神集卡活动自动化
#[derive(Parser, Debug)]
#[command(name = "naraka-cli")]
#[command(about = "网易大神小程序集卡活动自动化：完成任务、抽奖、账号间互赠卡片", long_about = None)]
struct Args {
    /// 日志级别（默认: info,naraka_luckdraw=debug）
    #[arg(long, default_value = "info,naraka_luckdraw=debug")]
    log_level: String,
}

/// 初始化日志（仅输出到控制台，不落盘）
fn init_logger(log_level: &str) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    info!("[CLI] 🚀 大神集卡活动自动化");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("[CLI] ❌ {}", e);
            info!("[CLI] 格式示例: export NARAKA_TOKEN='TOKEN#UID#DEVICE_ID#名称'");
            info!("[CLI] 格式示例: export NARAKA_SIGN_API_URL='https://xxx.workers.dev/api/sign'");
            std::process::exit(1);
        }
    };

    runner::run(settings).await
}
