pub mod cards;
pub mod config;
pub mod draw;
pub mod exchange;
pub mod notify;
pub mod runner;
pub mod session;
pub mod sign;
pub mod tasks;
pub mod types;

// 重新导出常用类型和函数，方便外部使用
pub use config::{parse_accounts, AccountCredential, Settings};
pub use session::DsSession;
pub use sign::{SignClient, SignError, Signature};
pub use types::{Envelope, ModuleKind};
