//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TALLY__*` 覆盖（双下划线表示嵌套，如 `TALLY__REMOTE__BASE_URL=https://...`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::model::UserRef;
use crate::remote::Session;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub session: SessionSection,
    pub remote: RemoteSection,
    pub summary: SummarySection,
}

/// [app] 段：应用名与积分币种
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 账本条目的币种代码
    pub currency: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            currency: "PTS".to_string(),
        }
    }
}

/// [session] 段：登录用户；令牌从 token_env 指定的环境变量读取，不写入配置文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub token_env: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            user_id: "me".to_string(),
            display_name: None,
            avatar_url: None,
            token_env: "TALLY_TOKEN".to_string(),
        }
    }
}

/// [remote] 段：远端地址与请求超时；未设置 base_url 时使用内存远端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: 15,
        }
    }
}

/// [summary] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarySection {
    /// 完成 / 撤销后是否刷新相关人员的汇总
    pub refresh_after_transition: bool,
}

impl Default for SummarySection {
    fn default() -> Self {
        Self {
            refresh_after_transition: true,
        }
    }
}

impl AppConfig {
    /// 由 [session] 段构造会话上下文
    pub fn session(&self) -> Session {
        let user = UserRef {
            id: self.session.user_id.clone(),
            name: self.session.display_name.clone(),
            avatar_url: self.session.avatar_url.clone(),
        };
        let session = Session::new(user);
        match std::env::var(&self.session.token_env) {
            Ok(token) if !token.is_empty() => session.with_token(token),
            _ => session,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TALLY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TALLY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TALLY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
