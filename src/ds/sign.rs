//! 签名网关客户端
//!
//! 平台的每个请求都要带 GL-Nonce / GL-CheckSum 两个签名头，签名由
//! 一个外部服务（Cloudflare Worker）根据账号身份和请求体字节计算。
//! 这里只做一次请求一次应答，不重试，由调用方决定失败后的行为。

use crate::ds::config::AccountCredential;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// 签名失败的两种情况：服务不可达 / 服务明确拒绝
#[derive(Debug, Error)]
pub enum SignError {
    #[error("签名服务不可用: {0}")]
    Unavailable(String),
    #[error("签名服务拒绝: {0}")]
    Rejected(String),
}

/// 一次签名结果，作为请求头原样附加
#[derive(Debug, Clone)]
pub struct Signature {
    pub nonce: String,
    pub checksum: String,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    device_id: &'a str,
    token: &'a str,
    uid: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// 签名网关客户端，无状态，可在多个会话间克隆共用
#[derive(Debug, Clone)]
pub struct SignClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SignClient {
    pub fn new(endpoint: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("创建签名 HTTP 客户端失败")?;
        Ok(Self { http, endpoint })
    }

    /// 对即将发出的请求体字节计算签名
    ///
    /// `body_str` 必须与实际发送的字节完全一致，签名覆盖的就是这串字节。
    pub async fn sign(
        &self,
        cred: &AccountCredential,
        body_str: &str,
    ) -> Result<Signature, SignError> {
        debug!("[签名API] 请求签名, body 长度: {}", body_str.len());

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&SignRequest {
                device_id: &cred.device_id,
                token: &cred.token,
                uid: &cred.uid,
                body: body_str,
            })
            .send()
            .await
            .map_err(|e| SignError::Unavailable(e.to_string()))?;

        let data: SignResponse = resp
            .json()
            .await
            .map_err(|e| SignError::Unavailable(format!("响应解析失败: {}", e)))?;

        if !data.ok {
            return Err(SignError::Rejected(
                data.error.unwrap_or_else(|| "未知错误".to_string()),
            ));
        }

        match (data.nonce, data.checksum) {
            (Some(nonce), Some(checksum)) => Ok(Signature { nonce, checksum }),
            _ => Err(SignError::Rejected("响应缺少 nonce/checksum".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_request_timeout() {
        assert!(SignClient::new("http://localhost:0/api/sign".to_string()).is_ok());
    }

    #[test]
    fn sign_response_tolerates_missing_fields() {
        let ok: SignResponse =
            serde_json::from_str(r#"{"ok":true,"nonce":"n1","checksum":"c1"}"#).unwrap();
        assert!(ok.ok);
        assert_eq!(ok.nonce.as_deref(), Some("n1"));

        let rejected: SignResponse =
            serde_json::from_str(r#"{"ok":false,"error":"bad token"}"#).unwrap();
        assert!(!rejected.ok);
        assert_eq!(rejected.error.as_deref(), Some("bad token"));

        // ok 缺失按 false 处理，不会 panic
        let empty: SignResponse = serde_json::from_str("{}").unwrap();
        assert!(!empty.ok);
    }
}
