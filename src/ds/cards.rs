//! 卡片库存与互赠匹配
//!
//! 纯逻辑：把一份卡片快照划分成"可赠送"和"缺少"两个集合，并为一对
//! 账号各自选出要赠出的卡。网络交互在 `exchange` 模块里。

use crate::ds::types::{loose_string, Envelope};
use serde_json::Value;
use std::collections::HashSet;

/// 一条卡片库存记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardEntry {
    pub id: String,
    pub name: String,
    pub num: i64,
}

impl CardEntry {
    /// 可赠送数量（始终保留 1 张自用）
    pub fn gift_capacity(&self) -> i64 {
        (self.num - 1).max(0)
    }
}

/// 从 myCard 的响应中归一化卡片快照
pub fn normalize_cards(envelope: &Envelope) -> Vec<CardEntry> {
    let result = envelope.result();
    let infos = result
        .get("cardInfos")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    infos
        .iter()
        .filter_map(|c| {
            let id = c.get("id").and_then(loose_string)?;
            Some(CardEntry {
                id,
                name: c
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                num: c.get("num").and_then(Value::as_i64).unwrap_or(0),
            })
        })
        .collect()
}

/// 把快照划分为（可赠送, 缺少）两个集合
///
/// 可赠送 = num > 1，缺少 = num == 0，两者天然不相交。顺序保持
/// 服务端返回顺序，后续"取第一个匹配"依赖这个顺序。
pub fn partition_cards(cards: &[CardEntry]) -> (Vec<CardEntry>, Vec<CardEntry>) {
    let giftable = cards.iter().filter(|c| c.num > 1).cloned().collect();
    let missing = cards.iter().filter(|c| c.num == 0).cloned().collect();
    (giftable, missing)
}

/// 为一个赠送方向选卡
///
/// 策略 1：优先送对方缺少的卡，按快照顺序取第一张匹配的；
/// 策略 2：对方不缺卡（或缺的都送不了）时，送自己数量最多的卡，
/// 数量相同取先出现的——既保住自己的余量，又能完成"送出卡片"任务；
/// 没有可赠送的卡则不送。
pub fn pick_gift<'a>(
    giftable: &'a [CardEntry],
    receiver_missing: &HashSet<String>,
) -> Option<&'a CardEntry> {
    if let Some(card) = giftable.iter().find(|c| receiver_missing.contains(&c.id)) {
        return Some(card);
    }
    // min_by_key 在相等时取先出现的元素
    giftable.iter().min_by_key(|c| std::cmp::Reverse(c.num))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str, num: i64) -> CardEntry {
        CardEntry {
            id: id.to_string(),
            name: format!("卡片{}", id),
            num,
        }
    }

    #[test]
    fn partition_is_disjoint_with_capacity() {
        let snapshot = vec![card("1", 3), card("2", 1), card("3", 0), card("4", 2)];
        let (giftable, missing) = partition_cards(&snapshot);

        assert_eq!(
            giftable.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["1", "4"]
        );
        assert_eq!(giftable[0].gift_capacity(), 2);
        assert_eq!(giftable[1].gift_capacity(), 1);
        assert_eq!(
            missing.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["3"]
        );

        let giftable_ids: HashSet<_> = giftable.iter().map(|c| &c.id).collect();
        assert!(missing.iter().all(|c| !giftable_ids.contains(&c.id)));
    }

    #[test]
    fn prefers_receiver_missing_card_over_higher_count() {
        let giftable = vec![card("1", 3), card("2", 2)];
        let missing: HashSet<String> = ["2".to_string()].into_iter().collect();
        assert_eq!(pick_gift(&giftable, &missing).unwrap().id, "2");
    }

    #[test]
    fn falls_back_to_highest_count_when_nothing_missing() {
        let giftable = vec![card("1", 5), card("2", 2)];
        assert_eq!(pick_gift(&giftable, &HashSet::new()).unwrap().id, "1");
    }

    #[test]
    fn fallback_ties_break_by_first_seen() {
        let giftable = vec![card("1", 3), card("2", 3)];
        assert_eq!(pick_gift(&giftable, &HashSet::new()).unwrap().id, "1");
    }

    #[test]
    fn no_giftable_means_no_gift() {
        let missing: HashSet<String> = ["9".to_string()].into_iter().collect();
        assert!(pick_gift(&[], &missing).is_none());
    }

    #[test]
    fn normalize_cards_reads_snapshot() {
        let env: Envelope = serde_json::from_str(
            r#"{"code":200,"errmsg":"","result":{"cardInfos":[
                {"id":"c1","name":"宝箱","num":2},
                {"id":"c2","name":"灯笼"},
                {"name":"无ID"}
            ]}}"#,
        )
        .unwrap();
        let cards = normalize_cards(&env);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].num, 2);
        assert_eq!(cards[1].num, 0);
    }

    #[test]
    fn normalize_cards_accepts_numeric_ids() {
        let env: Envelope = serde_json::from_str(
            r#"{"code":200,"errmsg":"","result":{"cardInfos":[
                {"id":1001,"name":"宝箱","num":2}
            ]}}"#,
        )
        .unwrap();
        let cards = normalize_cards(&env);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].id, "1001");
    }
}
