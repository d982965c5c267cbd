//! 人员：从任务的创建者 / 指派人 / 完成者与当前登录用户推导
//!
//! 每次加载重新推导，不单独持久化；颜色由会话级 ColorBook 分配，跨重载保持不变。

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{PersonId, Task, UserRef};

/// 头像色板（按首次出现顺序循环分配）
pub const PALETTE: [&str; 8] = [
    "#E57373", "#64B5F6", "#81C784", "#FFB74D", "#BA68C8", "#4DB6AC", "#F06292", "#A1887F",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Person {
    pub id: PersonId,
    pub display_first_name: String,
    pub full_name: Option<String>,
    pub color: &'static str,
    pub avatar_url: Option<String>,
}

impl Person {
    /// 转回任务上的用户引用（乐观完成时写入 completed_by）
    pub fn to_user_ref(&self) -> UserRef {
        UserRef {
            id: self.id.clone(),
            name: self.full_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// 取全名的第一个词作为显示名
pub fn first_name(full_name: &str) -> Option<&str> {
    full_name.split_whitespace().next()
}

/// 会话级颜色分配：同一 id 在整个会话内颜色不变
#[derive(Debug, Clone, Default)]
pub struct ColorBook {
    assigned: HashMap<PersonId, usize>,
    next: usize,
}

impl ColorBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color_for(&mut self, id: &str) -> &'static str {
        let slot = match self.assigned.get(id) {
            Some(slot) => *slot,
            None => {
                let slot = self.next;
                self.next += 1;
                self.assigned.insert(id.to_string(), slot);
                slot
            }
        };
        PALETTE[slot % PALETTE.len()]
    }
}

/// 推导人员列表：登录用户在前，其余按首次出现顺序；同一 id 的姓名 / 头像取第一个非空值
pub fn derive_people(signed_in: &UserRef, tasks: &[Task], colors: &mut ColorBook) -> Vec<Person> {
    let mut order: Vec<PersonId> = Vec::new();
    let mut seen: HashMap<PersonId, UserRef> = HashMap::new();

    let refs = std::iter::once(signed_in).chain(
        tasks
            .iter()
            .flat_map(|t| [t.created_by(), t.assigned_to(), t.completed_by()])
            .flatten(),
    );

    for user in refs {
        if user.id.trim().is_empty() {
            continue;
        }
        match seen.get_mut(&user.id) {
            Some(known) => {
                if known.name.is_none() {
                    known.name = user.name.clone();
                }
                if known.avatar_url.is_none() {
                    known.avatar_url = user.avatar_url.clone();
                }
            }
            None => {
                order.push(user.id.clone());
                seen.insert(user.id.clone(), user.clone());
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| seen.remove(&id))
        .map(|user| {
            let display_first_name = user
                .name
                .as_deref()
                .and_then(first_name)
                .unwrap_or(user.id.as_str())
                .to_string();
            Person {
                color: colors.color_for(&user.id),
                display_first_name,
                full_name: user.name,
                avatar_url: user.avatar_url,
                id: user.id,
            }
        })
        .collect()
}
