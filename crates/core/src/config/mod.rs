//! 配置管理
//!
//! 配置来源依次为：内置默认值、TOML配置文件、`DATASERVICE_` 前缀的环境变量。
//! 各配置段提供 `validate()`，加载完成后统一校验。

pub mod models;

pub use models::*;
