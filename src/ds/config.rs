//! 运行配置与账号解析
//!
//! 所有配置都来自环境变量（青龙面板风格），不读写任何本地文件：
//! - `NARAKA_SIGN_API_URL` 签名计算接口地址（必须）
//! - `NARAKA_TOKEN` 账号配置，`TOKEN#UID#DEVICE_ID#名称`，名称可选，
//!   多账号用 `&` 或换行分隔，字段分隔符也可以用 `@`
//! - `NARAKA_CARD_BOOK_ID` 当前活动卡册 ID（可选，不填自动发现）
//! - `NARAKA_EXCHANGE_CARDS` 是否开启账号间互赠（默认开启）
//! - `NARAKA_NOTIFY_URL` 通知推送地址（可选）

use anyhow::{bail, Result};
use tracing::warn;

/// 签名接口的占位默认值，保持未配置时启动即报错
pub const DEFAULT_SIGN_API_URL: &str = "https://your-worker.workers.dev/api/sign";

/// 一组账号凭据，对应请求头里的 GL-Token / GL-Uid / GL-DeviceId
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountCredential {
    pub token: String,
    pub uid: String,
    pub device_id: String,
    /// 日志里的显示名，未配置时为 `账号<序号>`
    pub name: String,
}

/// 一次运行的全部配置
#[derive(Debug, Clone)]
pub struct Settings {
    pub sign_api_url: String,
    pub accounts: Vec<AccountCredential>,
    /// 卡册 ID 覆盖值；None 时初始化阶段自动发现最新卡册
    pub card_book_id: Option<String>,
    pub exchange_cards: bool,
    pub notify_url: Option<String>,
}

impl Settings {
    /// 从环境变量读取配置
    ///
    /// 账号为空或签名接口仍是占位默认值视为致命配置错误。
    pub fn from_env() -> Result<Self> {
        let sign_api_url = std::env::var("NARAKA_SIGN_API_URL")
            .unwrap_or_else(|_| DEFAULT_SIGN_API_URL.to_string())
            .trim()
            .to_string();

        let raw_accounts = std::env::var("NARAKA_TOKEN").unwrap_or_default();
        let accounts = parse_accounts(&raw_accounts);
        if accounts.is_empty() {
            bail!("未配置账号信息，请设置环境变量 NARAKA_TOKEN（格式: TOKEN#UID#DEVICE_ID#名称，多账号用 & 分隔）");
        }
        if sign_api_url.is_empty() || sign_api_url == DEFAULT_SIGN_API_URL {
            bail!("未配置签名 API 地址，请设置环境变量 NARAKA_SIGN_API_URL");
        }

        let card_book_id = std::env::var("NARAKA_CARD_BOOK_ID")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let exchange_cards = std::env::var("NARAKA_EXCHANGE_CARDS")
            .map(|v| v.trim().to_lowercase() == "true")
            .unwrap_or(true);

        let notify_url = std::env::var("NARAKA_NOTIFY_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            sign_api_url,
            accounts,
            card_book_id,
            exchange_cards,
            notify_url,
        })
    }
}

/// 解析多账号配置串
///
/// `&` 与换行符等价，均作为账号分隔符；每行字段分隔符取 `#` 和 `@`
/// 中先出现的那个。字段数不足 3 的行告警跳过，不影响后续行。
pub fn parse_accounts(raw: &str) -> Vec<AccountCredential> {
    let mut accounts = Vec::new();
    for (idx, line) in raw.replace('&', "\n").lines().enumerate() {
        let idx = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let sep = if line.contains('#') { '#' } else { '@' };
        let parts: Vec<&str> = line.split(sep).collect();
        if parts.len() < 3 {
            warn!(
                "[配置] 第{}行账号格式错误，至少需要 TOKEN{}UID{}DEVICE_ID",
                idx, sep, sep
            );
            continue;
        }

        let name = parts
            .get(3)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("账号{}", idx));

        accounts.push(AccountCredential {
            token: parts[0].trim().to_string(),
            uid: parts[1].trim().to_string(),
            device_id: parts[2].trim().to_string(),
            name,
        });
    }
    accounts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_record() {
        let accounts = parse_accounts("tok#uid#dev#小号");
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].token, "tok");
        assert_eq!(accounts[0].uid, "uid");
        assert_eq!(accounts[0].device_id, "dev");
        assert_eq!(accounts[0].name, "小号");
    }

    #[test]
    fn name_defaults_to_indexed_label() {
        let accounts = parse_accounts("t1#u1#d1&t2#u2#d2");
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].name, "账号1");
        assert_eq!(accounts[1].name, "账号2");
    }

    #[test]
    fn at_delimiter_is_supported() {
        let accounts = parse_accounts("t1@u1@d1@大号");
        assert_eq!(accounts[0].uid, "u1");
        assert_eq!(accounts[0].name, "大号");
    }

    #[test]
    fn first_seen_delimiter_wins() {
        // 行内同时出现 # 和 @ 时，以 # 分隔（# 先判断）
        let accounts = parse_accounts("t1#u@1#d1");
        assert_eq!(accounts[0].uid, "u@1");
    }

    #[test]
    fn malformed_line_does_not_derail_following_lines() {
        let accounts = parse_accounts("t1#u1\nt2#u2#d2#正常号");
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "正常号");
        // 序号按行号计算，而不是按成功解析的数量
        let accounts = parse_accounts("bad\nt2#u2#d2");
        assert_eq!(accounts[0].name, "账号2");
    }

    #[test]
    fn ampersand_and_newline_separators_mix() {
        let accounts = parse_accounts("t1#u1#d1\nt2#u2#d2&t3#u3#d3");
        assert_eq!(accounts.len(), 3);
        assert_eq!(accounts[2].uid, "u3");
    }

    #[test]
    fn empty_input_yields_no_accounts() {
        assert!(parse_accounts("").is_empty());
        assert!(parse_accounts("  \n & \n").is_empty());
    }
}
