//! Tally - 群组任务完成同步与积分奖励账本客户端
//!
//! 模块划分：
//! - **board**: 供 UI 调用的看板门面与命令循环
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 任务缓存、完成编排、奖励账本、汇总对账、错误与恢复
//! - **model**: 任务 / 人员 / 账本条目 / 收益汇总
//! - **observability**: 日志初始化
//! - **remote**: 远端接口抽象与实现（HTTP / 内存）

pub mod board;
pub mod config;
pub mod core;
pub mod model;
pub mod observability;
pub mod remote;

pub use board::{spawn_board, BoardSettings, Command, TaskBoard};
