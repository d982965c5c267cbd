//! 会话上下文：登录用户与访问令牌
//!
//! 每次远端调用都显式传入 Session，客户端自身不持有全局令牌。

use crate::model::UserRef;

#[derive(Clone)]
pub struct Session {
    user: UserRef,
    access_token: Option<String>,
}

impl Session {
    pub fn new(user: UserRef) -> Self {
        Self {
            user,
            access_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn user(&self) -> &UserRef {
        &self.user
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

// 令牌不进日志
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user.id)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .finish()
    }
}
