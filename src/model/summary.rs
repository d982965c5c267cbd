//! 个人收益汇总（远端 Summary Feed 的只读视图）
//!
//! 按日 `YYYY-MM-DD`、ISO 周 `YYYY-Www`、月 `YYYY-MM` 分桶的带符号合计，以及累计总额。

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::model::PersonId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonEarningsSummary {
    pub person_id: PersonId,
    #[serde(default)]
    pub daily: BTreeMap<String, i64>,
    #[serde(default)]
    pub weekly: BTreeMap<String, i64>,
    #[serde(default)]
    pub monthly: BTreeMap<String, i64>,
    #[serde(default)]
    pub lifetime: i64,
}

impl PersonEarningsSummary {
    pub fn empty(person_id: impl Into<PersonId>) -> Self {
        Self {
            person_id: person_id.into(),
            daily: BTreeMap::new(),
            weekly: BTreeMap::new(),
            monthly: BTreeMap::new(),
            lifetime: 0,
        }
    }

    /// 记入一笔带符号金额（测试替身聚合账本时使用）
    pub fn record(&mut self, date: NaiveDate, amount: i64) {
        *self.daily.entry(day_key(date)).or_insert(0) += amount;
        *self.weekly.entry(week_key(date)).or_insert(0) += amount;
        *self.monthly.entry(month_key(date)).or_insert(0) += amount;
        self.lifetime += amount;
    }

    pub fn day_total(&self, date: NaiveDate) -> i64 {
        self.daily.get(&day_key(date)).copied().unwrap_or(0)
    }

    pub fn week_total(&self, date: NaiveDate) -> i64 {
        self.weekly.get(&week_key(date)).copied().unwrap_or(0)
    }

    pub fn month_total(&self, date: NaiveDate) -> i64 {
        self.monthly.get(&month_key(date)).copied().unwrap_or(0)
    }
}

pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn week_key(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}
