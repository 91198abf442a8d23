pub mod ds;

// 重新导出常用类型和函数，方便外部使用
pub use ds::{
    config::{parse_accounts, AccountCredential, Settings},
    session::DsSession,
    sign::{SignClient, SignError, Signature},
    types::{Envelope, ModuleKind},
};
