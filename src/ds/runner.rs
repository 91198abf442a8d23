//! 运行编排
//!
//! 一次运行：先按 (1,2) (3,4) … 配对互赠（如启用），再逐账号执行
//! 每日任务和抽奖。失败在两个粒度上隔离：配对出错不影响其他配对，
//! 账号出错不影响其他账号，整个进程只在配置致命错误时退出。

use crate::ds::cards::partition_cards;
use crate::ds::config::Settings;
use crate::ds::draw::{run_draws, DrawReport, DRAW_INTERVAL};
use crate::ds::exchange::pair_exchange;
use crate::ds::notify::Notifier;
use crate::ds::session::DsSession;
use crate::ds::sign::SignClient;
use crate::ds::tasks::run_tasks;
use anyhow::Result;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// 相邻两个账号 / 两组配对之间的间隔
const UNIT_DELAY: Duration = Duration::from_secs(2);

/// 逐个处理工作单元，单元出错只记日志并继续，不中断后续单元
async fn for_each_isolated<U, F, Fut>(
    units: Vec<U>,
    describe: impl Fn(&U) -> String,
    action: &str,
    pace: Duration,
    mut run: F,
) where
    F: FnMut(U) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    for unit in units {
        let label = describe(&unit);
        if let Err(e) = run(unit).await {
            error!("[{}] {}: {}", label, action, e);
        }
        sleep(pace).await;
    }
}

/// 跑完整个账号名单
pub async fn run(settings: Settings) -> Result<()> {
    info!(
        "[青龙面板] 从环境变量 NARAKA_TOKEN 读取到 {} 个账号",
        settings.accounts.len()
    );
    info!("[签名API] {}", settings.sign_api_url);
    if let Some(book_id) = &settings.card_book_id {
        info!("[活动配置] cardBookId: {}", book_id);
    }

    let sign = SignClient::new(settings.sign_api_url.clone())?;
    let notifier = Notifier::new(settings.notify_url.clone())?;
    // 自动发现的卡册 ID 在一次运行内全局共享：首个发现成功的会话写入
    let shared_book_id: Arc<OnceLock<String>> = Arc::new(OnceLock::new());

    let mut sessions: Vec<DsSession> = Vec::new();
    for cred in &settings.accounts {
        sessions.push(DsSession::new(
            cred.clone(),
            sign.clone(),
            settings.card_book_id.clone(),
            shared_book_id.clone(),
        )?);
    }

    // 1. 按组配对互相赠送卡片
    if settings.exchange_cards {
        info!("# 开始配对互相赠送卡片");
        let pairs: Vec<&mut [DsSession]> = sessions
            .chunks_mut(2)
            .filter(|chunk| chunk.len() == 2)
            .collect();
        for_each_isolated(
            pairs,
            |pair| format!("{} <-> {}", pair[0].name(), pair[1].name()),
            "互赠出错",
            UNIT_DELAY,
            |pair| async move {
                let (a, b) = pair.split_at_mut(1);
                pair_exchange(&mut a[0], &mut b[0]).await
            },
        )
        .await;
        if sessions.len() % 2 == 1 {
            if let Some(last) = sessions.last() {
                info!("[提示] {} 是奇数账号，没有配对对象", last.name());
            }
        }
    } else {
        info!("[提示] 互赠卡片功能已关闭 (NARAKA_EXCHANGE_CARDS=False)");
    }

    // 2. 逐账号执行每日任务
    let units: Vec<&mut DsSession> = sessions.iter_mut().collect();
    for_each_isolated(
        units,
        |s| s.name().to_string(),
        "执行任务出错",
        UNIT_DELAY,
        |s| run_daily(s, &notifier),
    )
    .await;

    info!("所有账号处理完成！");
    Ok(())
}

/// 单个账号的每日流程：初始化 → 分享 → 任务 → 抽奖 → 卡片状态
async fn run_daily(session: &mut DsSession, notifier: &Notifier) -> Result<()> {
    if !session.initialize().await? {
        warn!("[{}] 初始化失败，跳过此账号", session.name());
        return Ok(());
    }

    let nick = session.nick();
    info!("[{}] 开始执行每日任务", nick);
    if let Some(role) = session.role_info() {
        info!(
            "[{}] 角色: {} | 等级: Lv.{} | 服务器: {}",
            nick,
            nick,
            role.role_level,
            if role.server_name.is_empty() {
                "未知"
            } else {
                &role.server_name
            }
        );
    } else {
        warn!("[{}] 警告: 无法获取角色信息，将使用默认配置", nick);
    }

    // 分享卡片增加机会（计入分享任务，失败不阻断）
    session.share_card().await?;

    run_tasks(session).await?;

    // 抽奖
    info!("[{}] --- 开始抽奖 ---", nick);
    if session.luck_draw_as_id.is_empty() {
        warn!("[{}] 未获取到抽奖模块ID(asId)，跳过抽奖", nick);
        return Ok(());
    }
    info!("[{}] 抽奖模块 asId: {}", nick, session.luck_draw_as_id);
    let report: DrawReport = run_draws(&*session, DRAW_INTERVAL).await?;
    if !report.wins.is_empty() {
        let body = format!(
            "{}抽到:\n{}",
            nick,
            report
                .wins
                .iter()
                .map(|p| format!("- {}", p))
                .collect::<Vec<_>>()
                .join("\n")
        );
        notifier.send("集卡抽奖中奖", &body).await;
    }

    // 卡片状态
    info!("[{}] --- 卡片状态 ---", nick);
    let cards = session.get_my_cards().await?;
    let owned: Vec<String> = cards
        .iter()
        .filter(|c| c.num > 0)
        .map(|c| format!("{}({})", c.name, c.num))
        .collect();
    let (_, missing) = partition_cards(&cards);
    info!(
        "[{}] 已拥有: {}",
        nick,
        if owned.is_empty() {
            "无".to_string()
        } else {
            owned.join(", ")
        }
    );
    info!(
        "[{}] 缺少: {}",
        nick,
        if missing.is_empty() {
            "无".to_string()
        } else {
            missing
                .iter()
                .map(|c| c.name.clone())
                .collect::<Vec<_>>()
                .join(", ")
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn middle_unit_failure_does_not_block_the_rest() {
        let done = Mutex::new(Vec::new());
        for_each_isolated(
            vec![1u32, 2, 3],
            |u| format!("账号{}", u),
            "执行任务出错",
            Duration::ZERO,
            |u| {
                let done = &done;
                async move {
                    if u == 2 {
                        anyhow::bail!("初始化失败");
                    }
                    done.lock().unwrap().push(u);
                    Ok(())
                }
            },
        )
        .await;
        assert_eq!(*done.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn all_units_run_in_order_when_nothing_fails() {
        let done = Mutex::new(Vec::new());
        for_each_isolated(
            vec!["甲", "乙", "丙"],
            |u| u.to_string(),
            "互赠出错",
            Duration::ZERO,
            |u| {
                let done = &done;
                async move {
                    done.lock().unwrap().push(u);
                    Ok(())
                }
            },
        )
        .await;
        assert_eq!(*done.lock().unwrap(), vec!["甲", "乙", "丙"]);
    }
}
