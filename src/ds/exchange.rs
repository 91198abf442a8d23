//! 账号配对互赠
//!
//! 两个账号互送卡片：发起方 postGiveWish 拿到 wishId，接收方
//! acceptGiveWish 领取，两步都成功才算送达。任何一步失败只记日志，
//! 不回滚不重试；A→B 和 B→A 两个方向互不影响。

use crate::ds::cards::{partition_cards, pick_gift, CardEntry};
use crate::ds::session::DsSession;
use crate::ds::types::Envelope;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// 赠送发起与领取之间的间隔
const HANDSHAKE_DELAY: Duration = Duration::from_millis(500);

/// 同一配对内相邻两次赠送尝试之间的间隔
const DIRECTION_DELAY: Duration = Duration::from_secs(1);

/// 互赠握手的最小接口，拆出来是为了用桩实现单测握手失败路径
#[async_trait]
pub trait CardGifting {
    /// 日志里的显示名
    fn display_name(&self) -> String;
    async fn post_give_wish(&self, card_id: &str) -> Result<Envelope>;
    async fn accept_give_wish(&self, wish_id: &str) -> Result<Envelope>;
}

#[async_trait]
impl CardGifting for DsSession {
    fn display_name(&self) -> String {
        self.nick()
    }

    async fn post_give_wish(&self, card_id: &str) -> Result<Envelope> {
        DsSession::post_give_wish(self, card_id).await
    }

    async fn accept_give_wish(&self, wish_id: &str) -> Result<Envelope> {
        DsSession::accept_give_wish(self, wish_id).await
    }
}

/// 执行一次定向赠送握手，两步都返回 200 才算成功
pub async fn do_gift<S, R>(sender: &S, receiver: &R, card: &CardEntry, reason: &str) -> Result<bool>
where
    S: CardGifting + Sync,
    R: CardGifting + Sync,
{
    let sender_nick = sender.display_name();
    let receiver_nick = receiver.display_name();
    info!(
        "[{}] -> [{}] {}: {}",
        sender_nick, receiver_nick, reason, card.name
    );

    let give_res = sender.post_give_wish(&card.id).await?;
    let wish_id = give_res
        .result()
        .get("interchangeWishId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !give_res.is_ok() || wish_id.is_empty() {
        warn!("[{}] 赠送发起失败: {}", sender_nick, give_res.errmsg);
        return Ok(false);
    }
    info!("[{}] 赠送发起成功, wishId: {}", sender_nick, wish_id);

    sleep(HANDSHAKE_DELAY).await;
    let accept_res = receiver.accept_give_wish(&wish_id).await?;
    if accept_res.is_ok() {
        info!("[{}] 领取成功!", receiver_nick);
        Ok(true)
    } else {
        warn!("[{}] 领取失败: {}", receiver_nick, accept_res.errmsg);
        Ok(false)
    }
}

/// 从双方快照里为 sender → receiver 方向选卡，并给出选卡理由
fn plan_direction<'a>(
    sender_giftable: &'a [CardEntry],
    receiver_missing: &[CardEntry],
) -> Option<(&'a CardEntry, &'static str)> {
    let missing_ids: HashSet<String> = receiver_missing.iter().map(|c| c.id.clone()).collect();
    let card = pick_gift(sender_giftable, &missing_ids)?;
    let reason = if missing_ids.contains(&card.id) {
        "赠送缺少的卡"
    } else {
        "赠送数量最多的卡(完成任务)"
    };
    Some((card, reason))
}

/// 两个账号配对互赠
pub async fn pair_exchange(a: &mut DsSession, b: &mut DsSession) -> Result<()> {
    // 双方都要初始化成功才能互赠
    if !a.initialize().await? || !b.initialize().await? {
        warn!(
            "[{} <-> {}] 有账号初始化失败，跳过本组互赠",
            a.name(),
            b.name()
        );
        return Ok(());
    }

    let a_nick = a.nick();
    let b_nick = b.nick();
    info!("[配对赠送] {} <-> {}", a_nick, b_nick);

    let (a_giftable, a_missing) = partition_cards(&a.get_my_cards().await?);
    let (b_giftable, b_missing) = partition_cards(&b.get_my_cards().await?);

    let describe = |cards: &[CardEntry]| -> Vec<String> {
        cards.iter().map(|c| format!("{}({})", c.name, c.num)).collect()
    };
    info!("[{}] 可赠送: {:?}", a_nick, describe(&a_giftable));
    info!(
        "[{}] 缺少: {:?}",
        a_nick,
        a_missing.iter().map(|c| &c.name).collect::<Vec<_>>()
    );
    info!("[{}] 可赠送: {:?}", b_nick, describe(&b_giftable));
    info!(
        "[{}] 缺少: {:?}",
        b_nick,
        b_missing.iter().map(|c| &c.name).collect::<Vec<_>>()
    );

    // --- A 送给 B ---
    let mut a_sent = false;
    if let Some((card, reason)) = plan_direction(&a_giftable, &b_missing) {
        a_sent = do_gift(&*a, &*b, card, reason).await?;
        sleep(DIRECTION_DELAY).await;
    }

    // --- B 送给 A ---
    let mut b_sent = false;
    if let Some((card, reason)) = plan_direction(&b_giftable, &a_missing) {
        b_sent = do_gift(&*b, &*a, card, reason).await?;
        sleep(DIRECTION_DELAY).await;
    }

    info!(
        "[赠送结果] {}: {} | {}: {}",
        a_nick,
        if a_sent { "已送出" } else { "未送出" },
        b_nick,
        if b_sent { "已送出" } else { "未送出" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn card(id: &str, num: i64) -> CardEntry {
        CardEntry {
            id: id.to_string(),
            name: format!("卡片{}", id),
            num,
        }
    }

    /// 可配置两步应答的桩账号
    struct StubGifter {
        name: &'static str,
        give_ok: bool,
        accept_ok: bool,
        accepted_wishes: Mutex<Vec<String>>,
    }

    impl StubGifter {
        fn new(name: &'static str, give_ok: bool, accept_ok: bool) -> Self {
            Self {
                name,
                give_ok,
                accept_ok,
                accepted_wishes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CardGifting for StubGifter {
        fn display_name(&self) -> String {
            self.name.to_string()
        }

        async fn post_give_wish(&self, card_id: &str) -> Result<Envelope> {
            Ok(if self.give_ok {
                Envelope {
                    code: 200,
                    errmsg: String::new(),
                    result: Some(json!({"interchangeWishId": format!("wish-{}", card_id)})),
                }
            } else {
                Envelope {
                    code: 500,
                    errmsg: "今日赠送次数已用完".to_string(),
                    result: None,
                }
            })
        }

        async fn accept_give_wish(&self, wish_id: &str) -> Result<Envelope> {
            self.accepted_wishes.lock().unwrap().push(wish_id.to_string());
            Ok(if self.accept_ok {
                Envelope {
                    code: 200,
                    errmsg: String::new(),
                    result: None,
                }
            } else {
                Envelope {
                    code: 500,
                    errmsg: "赠送已失效".to_string(),
                    result: None,
                }
            })
        }
    }

    #[tokio::test]
    async fn gift_completes_when_both_steps_succeed() {
        let a = StubGifter::new("甲", true, true);
        let b = StubGifter::new("乙", true, true);
        let sent = do_gift(&a, &b, &card("c1", 3), "赠送缺少的卡").await.unwrap();
        assert!(sent);
        assert_eq!(
            *b.accepted_wishes.lock().unwrap(),
            vec!["wish-c1".to_string()]
        );
    }

    #[tokio::test]
    async fn accept_failure_marks_direction_failed_without_blocking_the_other() {
        // A→B：发起成功但领取失败
        let a = StubGifter::new("甲", true, true);
        let b = StubGifter::new("乙", true, false);
        let a_sent = do_gift(&a, &b, &card("c1", 3), "赠送缺少的卡").await.unwrap();
        assert!(!a_sent);

        // B→A 方向独立进行，不受上面的失败影响
        let b_sent = do_gift(&b, &a, &card("c2", 2), "赠送缺少的卡").await.unwrap();
        assert!(b_sent);
    }

    #[tokio::test]
    async fn give_failure_skips_accept_call() {
        let a = StubGifter::new("甲", false, true);
        let b = StubGifter::new("乙", true, true);
        let sent = do_gift(&a, &b, &card("c1", 3), "赠送缺少的卡").await.unwrap();
        assert!(!sent);
        assert!(b.accepted_wishes.lock().unwrap().is_empty());
    }

    #[test]
    fn plan_prefers_missing_then_falls_back() {
        let giftable = vec![card("1", 3), card("2", 2)];
        let missing = vec![card("2", 0)];
        let (picked, reason) = plan_direction(&giftable, &missing).unwrap();
        assert_eq!(picked.id, "2");
        assert_eq!(reason, "赠送缺少的卡");

        let (picked, reason) = plan_direction(&giftable, &[]).unwrap();
        assert_eq!(picked.id, "1");
        assert_eq!(reason, "赠送数量最多的卡(完成任务)");

        assert!(plan_direction(&[], &missing).is_none());
    }
}
