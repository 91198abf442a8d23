//! 账号会话：签名请求原语 + 惰性初始化状态机 + 平台接口封装
//!
//! 每个账号一个 `DsSession`，生命周期为一次运行。会话里缓存的
//! appKey / roleId / actId / 模块 ID 全部在 `initialize` 里按依赖顺序
//! 动态发现，任何业务操作都应在初始化成功之后调用；初始化失败的
//! 会话在本次运行内保持不可用，由编排层跳过。

use crate::ds::cards::{self, CardEntry};
use crate::ds::config::AccountCredential;
use crate::ds::sign::SignClient;
use crate::ds::types::{
    assign_module_id, loose_string, normalize_modules, normalize_role_list, normalize_tasks,
    Envelope, ModuleKind, ModuleRecord, RoleRecord, TaskRecord,
};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// 大神小程序接口的固定域名
pub const BASE_URL: &str = "https://inf-miniapp.ds.163.com";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 MicroMessenger/7.0.20.1781(0x6700143B) NetType/WIFI MiniProgramEnv/Windows WindowsWechat/WMPF";

/// 一个账号的会话状态
pub struct DsSession {
    cred: AccountCredential,
    http: reqwest::Client,
    sign: SignClient,
    /// 卡册 ID 覆盖值（来自配置，优先于自动发现）
    book_id_override: Option<String>,
    /// 运行内共享的自动发现卡册 ID：首个发现成功的会话写入，
    /// 之后的会话直接复用，不再重复发现
    shared_book_id: Arc<OnceLock<String>>,
    // --- 动态发现的参数（初始化后填充）---
    pub app_key: String,
    pub role_id: String,
    pub server: String,
    pub act_id: String,
    pub card_as_id: String,
    pub luck_draw_as_id: String,
    // --- 缓存 ---
    role_info: Option<RoleRecord>,
    act_config: Option<Value>,
    initialized: bool,
}

impl DsSession {
    /// 创建会话，固定身份头在这里一次性装配
    pub fn new(
        cred: AccountCredential,
        sign: SignClient,
        book_id_override: Option<String>,
        shared_book_id: Arc<OnceLock<String>>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));
        headers.insert(
            "Accept",
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("GL-ClientType", HeaderValue::from_static("52"));
        headers.insert("GL-Source", HeaderValue::from_static("THIRD_WX"));
        headers.insert(
            "GL-Channel",
            HeaderValue::from_static("god_wx53eacbe0d8a7a95a"),
        );
        headers.insert(
            "Referer",
            HeaderValue::from_static(
                "https://servicewechat.com/wx53eacbe0d8a7a95a/324/page-frame.html",
            ),
        );
        headers.insert(
            "GL-DeviceId",
            HeaderValue::from_str(&cred.device_id).context("无效的 device_id")?,
        );
        headers.insert(
            "GL-Token",
            HeaderValue::from_str(&cred.token).context("无效的 token")?,
        );
        headers.insert(
            "GL-Uid",
            HeaderValue::from_str(&cred.uid).context("无效的 uid")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("创建 HTTP 客户端失败")?;

        Ok(Self {
            cred,
            http,
            sign,
            book_id_override,
            shared_book_id,
            app_key: String::new(),
            role_id: String::new(),
            server: String::new(),
            act_id: String::new(),
            card_as_id: String::new(),
            luck_draw_as_id: String::new(),
            role_info: None,
            act_config: None,
            initialized: false,
        })
    }

    /// 日志里的账号标识
    pub fn name(&self) -> &str {
        &self.cred.name
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// 角色昵称（用于展示），角色信息缺失时退回账号名
    pub fn nick(&self) -> String {
        self.role_info
            .as_ref()
            .filter(|r| !r.nick.is_empty())
            .map(|r| r.nick.clone())
            .unwrap_or_else(|| self.cred.name.clone())
    }

    pub fn role_info(&self) -> Option<&RoleRecord> {
        self.role_info.as_ref()
    }

    // =========================================================================
    // 通用签名请求原语
    // =========================================================================

    /// 发起一次签名请求
    ///
    /// 请求体序列化一次，签名覆盖的就是这串字节。签名失败时返回本地
    /// 合成的失败响应（code = -1），不发起网络请求；服务端业务失败
    /// （code != 200）原样返回给调用方检查，不在这里抛错。
    pub async fn request(&self, method: Method, endpoint: &str, body: &Value) -> Result<Envelope> {
        let url = format!("{}{}", BASE_URL, endpoint);
        let body_str = serde_json::to_string(body).context("请求体序列化失败")?;

        let sig = match self.sign.sign(&self.cred, &body_str).await {
            Ok(sig) => sig,
            Err(e) => {
                warn!("[{}] [签名API] {}", self.cred.name, e);
                return Ok(Envelope::local_failure("签名获取失败"));
            }
        };

        debug!("[{}] 📡 {} {}", self.cred.name, method, endpoint);
        let response = self
            .http
            .request(method, &url)
            .header("GL-Nonce", &sig.nonce)
            .header("GL-CheckSum", &sig.checksum)
            .body(body_str)
            .send()
            .await
            .with_context(|| format!("请求发送失败 [{}]", endpoint))?;

        let envelope: Envelope = response
            .json()
            .await
            .with_context(|| format!("响应解析失败 [{}]", endpoint))?;

        if !envelope.is_ok() {
            warn!(
                "[{}] 请求失败 [{}]: {}",
                self.cred.name,
                endpoint,
                if envelope.errmsg.is_empty() {
                    "未知错误"
                } else {
                    &envelope.errmsg
                }
            );
        }
        Ok(envelope)
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Envelope> {
        self.request(Method::POST, endpoint, &body).await
    }

    // =========================================================================
    // 初始化状态机：角色 -> 卡册 -> 活动配置 -> 模块
    // =========================================================================

    /// 初始化：按依赖顺序动态发现所有必要参数
    ///
    /// 幂等；任何一步失败立即返回 false，不写入后续字段。
    pub async fn initialize(&mut self) -> Result<bool> {
        if self.initialized {
            return Ok(true);
        }

        // 1. 角色信息（appKey / roleId / server）
        if self.resolve_role().await?.is_none() {
            warn!("[{}] 初始化失败: 无法获取角色信息", self.cred.name);
            return Ok(false);
        }

        // 2. 卡册 ID（配置覆盖 > 运行内共享缓存 > 自动发现）
        let book_id = match self.resolve_card_book_id().await? {
            Some(id) => id,
            None => {
                warn!(
                    "[{}] 初始化失败: 无法自动发现卡册ID（请稍后重试或手动设置 NARAKA_CARD_BOOK_ID）",
                    self.cred.name
                );
                return Ok(false);
            }
        };

        // 3. 活动配置（actId / 卡片模块 asId）
        if self.resolve_act_config(&book_id).await?.is_none() {
            warn!("[{}] 初始化失败: 无法获取活动配置", self.cred.name);
            return Ok(false);
        }

        // 4. 模块 ID（抽奖、集卡）
        self.resolve_modules().await?;

        self.initialized = true;
        Ok(true)
    }

    /// 获取绑定角色列表并选定目标角色：优先永劫无间（appKey == "d90"），
    /// 没有就退回第一个绑定角色
    async fn resolve_role(&mut self) -> Result<Option<RoleRecord>> {
        if let Some(role) = &self.role_info {
            return Ok(Some(role.clone()));
        }

        let res = self.post("/v1/miniapp/game/role/getBindList", json!({})).await?;
        let roles = normalize_role_list(&res.result());
        if roles.is_empty() {
            warn!("[{}] 警告: 无法获取角色列表", self.cred.name);
            return Ok(None);
        }

        let role = roles
            .iter()
            .find(|r| r.app_key == "d90")
            .unwrap_or(&roles[0])
            .clone();
        self.role_id = role.role_id.clone();
        self.server = role.server.clone();
        self.app_key = if role.app_key.is_empty() {
            "d90".to_string()
        } else {
            role.app_key.clone()
        };
        self.role_info = Some(role.clone());
        Ok(Some(role))
    }

    /// 取得本次运行使用的卡册 ID
    async fn resolve_card_book_id(&self) -> Result<Option<String>> {
        if let Some(id) = &self.book_id_override {
            return Ok(Some(id.clone()));
        }
        if let Some(id) = self.shared_book_id.get() {
            return Ok(Some(id.clone()));
        }

        let discovered = self.discover_latest_card_book_id().await?;
        match discovered {
            Some(id) => {
                // 首次发现成功才会写入；写入成功的那次打一条日志
                if self.shared_book_id.set(id.clone()).is_ok() {
                    info!("[活动配置] 已自动发现 cardBookId: {}", id);
                }
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// 自动发现最新卡册 ID：取卡册列表第一页第一条
    async fn discover_latest_card_book_id(&self) -> Result<Option<String>> {
        let body = json!({
            "appKey": if self.app_key.is_empty() { "d90" } else { self.app_key.as_str() },
            "pageNum": 0,
            "pageSize": 1,
        });
        let res = self
            .post("/v1/miniapp/act/module/interchgCard/cardBookInfos", body)
            .await?;
        let result = res.result();
        let book = result
            .get("books")
            .and_then(Value::as_array)
            .and_then(|books| books.first())
            .cloned()
            .unwrap_or(Value::Null);
        let id = book
            .get("baseInfo")
            .and_then(|b| b.get("id"))
            .and_then(loose_string)
            .or_else(|| book.get("id").and_then(loose_string))
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(if id.is_empty() { None } else { Some(id) })
    }

    /// 从 cardBookDetail 获取活动配置（actId、卡片模块 asId），整体缓存
    async fn resolve_act_config(&mut self, book_id: &str) -> Result<Option<Value>> {
        if let Some(config) = &self.act_config {
            return Ok(Some(config.clone()));
        }

        let body = json!({
            "cardBookId": book_id,
            "appKey": self.app_key,
            "roleId": self.role_id,
            "server": self.server,
        });
        let res = self
            .post("/v1/miniapp/act/module/interchgCard/cardBookDetail", body)
            .await?;
        let result = match res.result {
            Some(result) if !result.is_null() => result,
            _ => return Ok(None),
        };

        self.act_id = result.get("actId").and_then(loose_string).unwrap_or_default();
        self.card_as_id = result.get("asId").and_then(loose_string).unwrap_or_default();
        self.act_config = Some(result.clone());
        Ok(Some(result))
    }

    /// 从模块列表里选定抽奖 / 集卡模块 ID（取第一个匹配，已有值不覆盖）
    async fn resolve_modules(&mut self) -> Result<()> {
        let modules = self.get_act_modules().await?;
        assign_module_id(&mut self.luck_draw_as_id, &modules, ModuleKind::Lottery);
        assign_module_id(&mut self.card_as_id, &modules, ModuleKind::CardCollection);
        Ok(())
    }

    // =========================================================================
    // 平台接口封装
    // =========================================================================

    /// 获取活动全部模块（归一化后）
    pub async fn get_act_modules(&self) -> Result<Vec<ModuleRecord>> {
        let body = json!({
            "actId": self.act_id,
            "ignoreFilterValidTime": true,
            "appKey": self.app_key,
            "roleId": self.role_id,
            "server": self.server,
        });
        let res = self
            .post("/v1/miniapp/act/module/common/actInfo", body)
            .await?;
        Ok(normalize_modules(&res.result()))
    }

    /// 构建活动请求里的角色信息字段（角色缓存缺失时退回最小身份信息）
    fn act_role_info(&self) -> Value {
        match &self.role_info {
            Some(role) => json!({
                "roleLevel": role.role_level,
                "serverName": role.server_name,
                "nick": role.nick,
                "icon": role.icon,
                "lastModified": if role.last_modified > 0 {
                    role.last_modified
                } else {
                    chrono::Utc::now().timestamp_millis()
                },
                "appKey": self.app_key,
                "roleId": self.role_id,
                "server": self.server,
            }),
            None => json!({
                "appKey": self.app_key,
                "roleId": self.role_id,
                "server": self.server,
            }),
        }
    }

    /// 拉取全部任务：先筛出任务类模块，再逐模块取任务列表，
    /// 按任务 ID 去重（先出现的保留）
    pub async fn get_tasks(&self) -> Result<Vec<TaskRecord>> {
        let modules = self.get_act_modules().await?;
        let task_as_ids: Vec<&str> = modules
            .iter()
            .filter(|m| m.kind == ModuleKind::Task)
            .map(|m| m.as_id.as_str())
            .collect();
        if task_as_ids.is_empty() {
            warn!("[{}] 未在当前活动中找到任务模块", self.cred.name);
            return Ok(Vec::new());
        }

        let role_info = self.act_role_info();
        let mut all_tasks: Vec<TaskRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for as_id in task_as_ids {
            let body = json!({
                "actId": self.act_id,
                "asType": 4,
                "asIdList": [as_id],
                "roleLevel": role_info.get("roleLevel").cloned().unwrap_or(json!(0)),
                "serverName": role_info.get("serverName").cloned().unwrap_or(json!("")),
                "nick": role_info.get("nick").cloned().unwrap_or(json!("")),
                "icon": role_info.get("icon").cloned().unwrap_or(json!("")),
                "lastModified": role_info.get("lastModified").cloned().unwrap_or(json!(0)),
                "appKey": self.app_key,
                "roleId": self.role_id,
                "server": self.server,
                "visibleOSType": "ANDROID",
                "visiblePrdType": "MINI_PROGRAM",
            });
            let res = self.post("/v1/miniapp/act/task/taskInfo", body).await?;
            for task in normalize_tasks(&res.result()) {
                if seen.insert(task.as_id.clone()) {
                    all_tasks.push(task);
                }
            }
        }
        Ok(all_tasks)
    }

    /// 执行任务动作
    pub async fn do_task(&self, task_as_id: &str) -> Result<Envelope> {
        let body = json!({
            "actId": self.act_id,
            "asIdList": [task_as_id],
            "asType": 4,
            "appKey": self.app_key,
            "roleId": self.role_id,
            "server": self.server,
        });
        self.post("/v1/miniapp/act/task/doMultiActTask", body).await
    }

    /// 领取任务奖励
    pub async fn apply_task_prize(&self, task_as_id: &str) -> Result<Envelope> {
        let body = json!({
            "actId": self.act_id,
            "asId": task_as_id,
            "asType": 4,
            "appKey": self.app_key,
            "roleId": self.role_id,
            "server": self.server,
        });
        self.post("/v1/miniapp/act/task/applyTaskPrize", body).await
    }

    /// 访问集卡活动页（部分任务的前置副作用，可一次性完成多个任务）
    pub async fn visit_activity(&self) -> Result<Envelope> {
        if self.act_id.is_empty() || self.card_as_id.is_empty() {
            return Ok(Envelope::local_failure("活动参数缺失"));
        }
        let body = json!({
            "actId": self.act_id,
            "asId": self.card_as_id,
            "asType": 43,
        });
        self.post("/v1/miniapp/act/module/interchgCard/collectInfo", body)
            .await
    }

    /// 分享卡片（计入分享类任务）
    pub async fn share_card(&self) -> Result<Envelope> {
        let body = json!({
            "asType": 43,
            "asId": self.card_as_id,
            "actId": self.act_id,
        });
        self.post("/v1/miniapp/act/module/interchgCard/shareCard", body)
            .await
    }

    /// 查询抽奖面板信息
    pub async fn get_draw_info(&self) -> Result<Envelope> {
        let body = json!({
            "actId": self.act_id,
            "asId": self.luck_draw_as_id,
            "asType": 2,
            "appKey": self.app_key,
            "roleId": self.role_id,
            "server": self.server,
            "visibleOSType": "ANDROID",
            "visiblePrdType": "MINI_PROGRAM",
        });
        self.post("/v1/miniapp/act/module/luckDraw/luckDrawInfo", body)
            .await
    }

    /// 执行一次抽奖
    pub async fn draw(&self) -> Result<Envelope> {
        let body = json!({
            "actId": self.act_id,
            "asId": self.luck_draw_as_id,
            "asType": 2,
            "appKey": self.app_key,
            "roleId": self.role_id,
            "server": self.server,
            "visibleOSType": "ANDROID",
            "visiblePrdType": "MINI_PROGRAM",
        });
        self.post("/v1/miniapp/act/module/luckDraw/draw", body).await
    }

    /// 查询持卡快照
    pub async fn get_my_cards(&self) -> Result<Vec<CardEntry>> {
        let body = json!({
            "actId": self.act_id,
            "asId": self.card_as_id,
            "asType": 43,
            "appKey": self.app_key,
            "roleId": self.role_id,
            "server": self.server,
        });
        let res = self
            .post("/v1/miniapp/act/module/interchgCard/myCard", body)
            .await?;
        Ok(cards::normalize_cards(&res))
    }

    /// 发起赠送，成功时返回 interchangeWishId 供接收方领取
    pub async fn post_give_wish(&self, card_id: &str) -> Result<Envelope> {
        let body = json!({
            "asType": 43,
            "actId": self.act_id,
            "asId": self.card_as_id,
            "cardId": card_id,
        });
        self.post("/v1/miniapp/act/module/interchgCard/postGiveWish", body)
            .await
    }

    /// 领取他人发起的赠送
    pub async fn accept_give_wish(&self, wish_id: &str) -> Result<Envelope> {
        let body = json!({
            "asType": 43,
            "actId": self.act_id,
            "asId": self.card_as_id,
            "interchangeWishId": wish_id,
        });
        self.post("/v1/miniapp/act/module/interchgCard/acceptGiveWish", body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> DsSession {
        DsSession::new(
            AccountCredential {
                token: "tok".to_string(),
                uid: "uid".to_string(),
                device_id: "dev".to_string(),
                name: "账号1".to_string(),
            },
            SignClient::new("http://localhost:0/api/sign".to_string()).unwrap(),
            None,
            Arc::new(OnceLock::new()),
        )
        .unwrap()
    }

    #[test]
    fn fresh_session_is_inert() {
        let session = test_session();
        assert!(!session.is_initialized());
        assert!(session.act_id.is_empty());
        assert!(session.luck_draw_as_id.is_empty());
        // 角色信息缺失时昵称退回账号名
        assert_eq!(session.nick(), "账号1");
    }

    #[test]
    fn act_role_info_falls_back_to_minimal_identity() {
        let mut session = test_session();
        session.app_key = "d90".to_string();
        session.role_id = "r1".to_string();
        session.server = "s1".to_string();

        let minimal = session.act_role_info();
        assert_eq!(minimal.get("appKey").and_then(Value::as_str), Some("d90"));
        assert!(minimal.get("roleLevel").is_none());

        session.role_info = Some(RoleRecord {
            nick: "夜行者".to_string(),
            role_level: 88,
            last_modified: 1700000000000,
            ..RoleRecord::default()
        });
        let full = session.act_role_info();
        assert_eq!(full.get("nick").and_then(Value::as_str), Some("夜行者"));
        assert_eq!(full.get("roleLevel").and_then(Value::as_i64), Some(88));
    }

    /// 真实接口冒烟测试：需要配好 NARAKA_TOKEN / NARAKA_SIGN_API_URL
    #[tokio::test]
    #[ignore]
    async fn live_initialize() -> Result<()> {
        let settings = crate::ds::config::Settings::from_env()?;
        let sign = SignClient::new(settings.sign_api_url.clone())?;
        let mut session = DsSession::new(
            settings.accounts[0].clone(),
            sign,
            settings.card_book_id.clone(),
            Arc::new(OnceLock::new()),
        )?;
        let ok = session.initialize().await?;
        assert!(ok, "初始化失败");
        assert!(!session.act_id.is_empty());
        Ok(())
    }
}
