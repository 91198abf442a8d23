//! 平台响应结构与边界解码
//!
//! 大神小程序接口返回的数据形状并不统一（角色列表有多种包装 key、
//! 模块类型 asType 可能是整数/浮点/字符串），这里把所有"宽松解析"
//! 收敛到几个归一化函数里，业务代码只消费归一化后的结构。

use serde::Deserialize;
use serde_json::Value;

/// 本地合成失败响应的错误码（服务端不会返回负数 code）
pub const LOCAL_FAILURE_CODE: i64 = -1;

/// 统一的平台响应包装结构体（code、errmsg、result）
/// result 字段可能为 null 或缺失，因此使用 Option
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub errmsg: String,
    #[serde(default)]
    pub result: Option<Value>,
}

impl Envelope {
    /// 构造一个本地失败响应（签名失败等场景，不发起网络请求）
    pub fn local_failure(errmsg: impl Into<String>) -> Self {
        Self {
            code: LOCAL_FAILURE_CODE,
            errmsg: errmsg.into(),
            result: None,
        }
    }

    /// 服务端约定 code == 200 表示成功
    pub fn is_ok(&self) -> bool {
        self.code == 200
    }

    /// 取出 result，缺失时返回 Null
    pub fn result(&self) -> Value {
        self.result.clone().unwrap_or(Value::Null)
    }
}

/// 活动模块类型（asType 的封闭枚举）
///
/// 2=抽奖，4=任务，43=集卡。其余取值一律归为 Unknown，不参与选择。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Lottery,
    Task,
    CardCollection,
    Unknown,
}

impl ModuleKind {
    /// 从宽松的 asType 值解码（整数、浮点、数字字符串都可能出现）
    pub fn from_raw(raw: &Value) -> Self {
        let num = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match num.map(|f| f as i64) {
            Some(2) => ModuleKind::Lottery,
            Some(4) => ModuleKind::Task,
            Some(43) => ModuleKind::CardCollection,
            _ => ModuleKind::Unknown,
        }
    }
}

/// 归一化后的活动模块记录
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub as_id: String,
    pub kind: ModuleKind,
}

/// 从 actInfo 的 result 中归一化模块列表
///
/// 没有可用 asId 的条目直接丢弃；asType 解析不出来的归为 Unknown。
pub fn normalize_modules(result: &Value) -> Vec<ModuleRecord> {
    let list = result
        .get("moduleList")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut records = Vec::new();
    for m in &list {
        let as_id = m.get("asId").and_then(loose_string).unwrap_or_default();
        if as_id.is_empty() {
            continue;
        }
        let kind = m
            .get("asType")
            .map(ModuleKind::from_raw)
            .unwrap_or(ModuleKind::Unknown);
        records.push(ModuleRecord { as_id, kind });
    }
    records
}

/// 按"取第一个"规则选择某类型的模块 ID（与小程序侧 find(asType===N) 一致，
/// 选择结果依赖服务端返回顺序）
pub fn pick_first_module(records: &[ModuleRecord], kind: ModuleKind) -> Option<&str> {
    records
        .iter()
        .find(|r| r.kind == kind)
        .map(|r| r.as_id.as_str())
}

/// 把第一个匹配类型的模块 ID 写入 `slot`，已有值不覆盖
pub fn assign_module_id(slot: &mut String, records: &[ModuleRecord], kind: ModuleKind) {
    if slot.is_empty() {
        if let Some(id) = pick_first_module(records, kind) {
            *slot = id.to_string();
        }
    }
}

/// 归一化后的绑定角色记录
#[derive(Debug, Clone, Default)]
pub struct RoleRecord {
    pub app_key: String,
    pub role_id: String,
    pub server: String,
    pub server_name: String,
    pub nick: String,
    pub icon: String,
    pub role_level: i64,
    pub last_modified: i64,
}

/// 从 getBindList 的 result 中归一化角色列表
///
/// result 可能直接是数组，也可能是包了一层 appRoleList / roleList / list
/// 的字典，这里统一摊平。
pub fn normalize_role_list(result: &Value) -> Vec<RoleRecord> {
    let list: Vec<Value> = match result {
        Value::Array(arr) => arr.clone(),
        Value::Object(map) => ["appRoleList", "roleList", "list"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    list.iter().map(role_from_value).collect()
}

/// 字符串或数字都转成字符串（服务端的 id 类字段两种类型都出现过）
pub(crate) fn loose_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_field(v: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| v.get(*k).and_then(loose_string))
        .unwrap_or_default()
}

fn i64_field(v: &Value, keys: &[&str]) -> i64 {
    keys.iter()
        .find_map(|k| v.get(*k).and_then(Value::as_i64))
        .unwrap_or(0)
}

fn role_from_value(v: &Value) -> RoleRecord {
    RoleRecord {
        app_key: str_field(v, &["appKey", "app_key"]),
        role_id: str_field(v, &["roleId", "role_id"]),
        server: str_field(v, &["server"]),
        server_name: str_field(v, &["serverName", "server_name"]),
        nick: str_field(v, &["nick", "roleName"]),
        icon: str_field(v, &["icon"]),
        role_level: i64_field(v, &["roleLevel", "level"]),
        last_modified: i64_field(v, &["lastModified"]),
    }
}

/// 归一化后的任务记录
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub as_id: String,
    pub title: String,
    pub completed: bool,
    pub already_got: bool,
}

/// 从 taskInfo 的 result 中归一化任务列表（任务 ID 取 asId，其次 id）
pub fn normalize_tasks(result: &Value) -> Vec<TaskRecord> {
    let list = result
        .get("taskList")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    list.iter()
        .filter_map(|t| {
            let as_id = str_field(t, &["asId", "id"]);
            if as_id.is_empty() {
                return None;
            }
            Some(TaskRecord {
                as_id,
                title: str_field(t, &["title"]),
                completed: t.get("completed").and_then(Value::as_bool).unwrap_or(false),
                already_got: t
                    .get("alreadyGot")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        })
        .collect()
}

/// 单次抽奖结果
#[derive(Debug, Clone)]
pub struct DrawOutcome {
    pub is_win: bool,
    pub prize_name: Option<String>,
}

impl DrawOutcome {
    /// 从 draw 接口的 result 解析（奖品名取 winPrize.prizeName，其次 name）
    pub fn from_result(result: &Value) -> Self {
        let is_win = result.get("isWin").and_then(Value::as_bool).unwrap_or(false);
        let prize_name = if is_win {
            let prize = result.get("winPrize").cloned().unwrap_or(Value::Null);
            let name = str_field(&prize, &["prizeName", "name"]);
            Some(if name.is_empty() {
                "未知奖品".to_string()
            } else {
                name
            })
        } else {
            None
        };
        Self { is_win, prize_name }
    }
}
