//! 通知推送
//!
//! 尽力而为：配置了 NARAKA_NOTIFY_URL 就把标题和正文 POST 过去，
//! 没配置静默跳过，推送失败也只记一条日志。

use anyhow::Context;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

#[derive(Serialize)]
struct NotifyBody<'a> {
    title: &'a str,
    content: &'a str,
}

/// 通知发送器，url 为空时所有调用都是空操作
#[derive(Debug, Clone)]
pub struct Notifier {
    http: reqwest::Client,
    url: Option<String>,
}

impl Notifier {
    pub fn new(url: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("创建通知 HTTP 客户端失败")?;
        Ok(Self { http, url })
    }

    /// 发送一条通知，失败不向上传播
    pub async fn send(&self, title: &str, content: &str) {
        let Some(url) = &self.url else {
            return;
        };
        let result = self
            .http
            .post(url)
            .json(&NotifyBody { title, content })
            .send()
            .await;
        if let Err(e) = result {
            warn!("[notify] 发送失败: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_sink_is_a_noop() {
        // 没配置 url 时不应发起任何请求（发起了也没有地址可用）
        let notifier = Notifier::new(None).unwrap();
        notifier.send("标题", "内容").await;
    }
}
