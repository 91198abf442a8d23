//! 抽奖循环
//!
//! 剩余次数以服务端为准，每次抽奖前都重新查询，不假设每抽恰好减一。
//! 服务端返回的次数属于不可信输入：为了防止异常数值导致死循环，
//! 单次运行设一个宽松的抽奖上限，命中上限时告警退出而不是继续抽。

use crate::ds::session::DsSession;
use crate::ds::types::DrawOutcome;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// 单次运行的抽奖次数上限
pub const MAX_DRAWS_PER_RUN: usize = 200;

/// 相邻两次抽奖之间的间隔，避免触发限流
pub const DRAW_INTERVAL: Duration = Duration::from_secs(1);

/// 抽奖数据源：查询剩余次数 + 执行一次抽奖
///
/// 拆成 trait 是为了让终止逻辑可以脱离网络单测。
#[async_trait]
pub trait DrawSource {
    /// 账号标识，用于日志
    fn label(&self) -> &str;
    /// 查询当前剩余抽奖次数（每次循环都重新查询）
    async fn remaining_chances(&self) -> Result<i64>;
    /// 消耗一次机会执行抽奖
    async fn draw_once(&self) -> Result<DrawOutcome>;
}

#[async_trait]
impl DrawSource for DsSession {
    fn label(&self) -> &str {
        self.name()
    }

    async fn remaining_chances(&self) -> Result<i64> {
        let res = self.get_draw_info().await?;
        Ok(res
            .result()
            .get("myLeftDrawChance")
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    async fn draw_once(&self) -> Result<DrawOutcome> {
        let res = self.draw().await?;
        Ok(DrawOutcome::from_result(&res.result()))
    }
}

/// 一轮抽奖的汇总结果
#[derive(Debug, Default)]
pub struct DrawReport {
    /// 中奖的奖品名列表
    pub wins: Vec<String>,
    /// 实际执行的抽奖次数
    pub draws: usize,
    /// 是否因为命中防御上限而退出
    pub capped: bool,
}

/// 把剩余机会抽完
///
/// 终止条件 = 服务端报告剩余次数 <= 0，或命中 `MAX_DRAWS_PER_RUN`。
pub async fn run_draws<S: DrawSource + Sync>(source: &S, pace: Duration) -> Result<DrawReport> {
    let mut report = DrawReport::default();
    loop {
        if report.draws >= MAX_DRAWS_PER_RUN {
            report.capped = true;
            warn!(
                "[{}] ⚠️ 单次运行已抽奖 {} 次仍未抽完，服务端次数异常，提前退出",
                source.label(),
                report.draws
            );
            break;
        }

        let chances = source.remaining_chances().await?;
        if chances <= 0 {
            info!("[{}] 没有剩余抽奖机会。", source.label());
            break;
        }

        let outcome = source.draw_once().await?;
        report.draws += 1;
        match outcome.prize_name {
            Some(name) if outcome.is_win => {
                info!("[{}] 🎉 恭喜！抽到: {}", source.label(), name);
                report.wins.push(name);
            }
            _ => info!("[{}] 此次未中奖。", source.label()),
        }
        sleep(pace).await;
    }
    Ok(report)
}
