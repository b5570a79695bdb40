//! 时序属性
//!
//! 实体与关系都以三条平行列表记录观察：`t_obs`（系统获知时间）、
//! `t_start`（有效期开始）、`t_end`（有效期结束，空表示仍然有效）。
//! 下标 i 的三个值共同描述一次观察。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单次观察
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Observation {
    /// 观察时间
    pub t_obs: DateTime<Utc>,
    /// 有效期开始
    pub t_start: DateTime<Utc>,
    /// 有效期结束
    pub t_end: Option<DateTime<Utc>>,
}

impl Observation {
    /// 从观察时间起持续有效的观察
    pub fn open(t_obs: DateTime<Utc>) -> Self {
        Self {
            t_obs,
            t_start: t_obs,
            t_end: None,
        }
    }

    pub fn new(t_obs: DateTime<Utc>, t_start: DateTime<Utc>, t_end: Option<DateTime<Utc>>) -> Self {
        Self { t_obs, t_start, t_end }
    }
}

/// 平行时序列表
///
/// 合并时只追加不覆盖；追加后按 (t_obs, t_start, t_end) 排序并去除完全相同的观察，
/// 因此同一观察重复合并不会膨胀列表，合并顺序也不影响结果。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Temporal {
    pub t_obs: Vec<DateTime<Utc>>,
    pub t_start: Vec<DateTime<Utc>>,
    pub t_end: Vec<Option<DateTime<Utc>>>,
}

impl Temporal {
    pub fn single(observation: Observation) -> Self {
        let mut temporal = Self::default();
        temporal.push(observation);
        temporal
    }

    pub fn push(&mut self, observation: Observation) {
        self.t_obs.push(observation.t_obs);
        self.t_start.push(observation.t_start);
        self.t_end.push(observation.t_end);
    }

    pub fn len(&self) -> usize {
        self.t_obs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t_obs.is_empty()
    }

    /// 三条列表长度一致
    pub fn is_consistent(&self) -> bool {
        self.t_obs.len() == self.t_start.len() && self.t_obs.len() == self.t_end.len()
    }

    pub fn observations(&self) -> impl Iterator<Item = Observation> + '_ {
        self.t_obs
            .iter()
            .zip(self.t_start.iter())
            .zip(self.t_end.iter())
            .map(|((t_obs, t_start), t_end)| Observation::new(*t_obs, *t_start, *t_end))
    }

    /// 最早观察时间
    pub fn earliest_obs(&self) -> Option<DateTime<Utc>> {
        self.t_obs.iter().min().copied()
    }

    /// 最近一次观察
    pub fn latest(&self) -> Option<Observation> {
        self.observations().max()
    }

    /// 追加另一组观察
    pub fn extend(&mut self, other: &Temporal) {
        let mut all: Vec<Observation> = self.observations().chain(other.observations()).collect();
        all.sort();
        all.dedup();

        *self = Self::default();
        for observation in all {
            self.push(observation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_extend_sorts_and_dedupes() {
        let mut a = Temporal::single(Observation::open(ts(20)));
        let b = Temporal::single(Observation::new(ts(10), ts(5), Some(ts(15))));

        a.extend(&b);
        a.extend(&b);

        assert!(a.is_consistent());
        assert_eq!(a.len(), 2);
        assert_eq!(a.t_obs, vec![ts(10), ts(20)]);
        assert_eq!(a.t_end, vec![Some(ts(15)), None]);
        assert_eq!(a.earliest_obs(), Some(ts(10)));
    }

    #[test]
    fn test_latest_observation() {
        let mut temporal = Temporal::single(Observation::open(ts(1)));
        temporal.push(Observation::new(ts(2), ts(1), Some(ts(2))));

        let latest = temporal.latest().unwrap();
        assert_eq!(latest.t_obs, ts(2));
        assert_eq!(latest.t_end, Some(ts(2)));
    }

    #[test]
    fn test_serialized_as_parallel_lists() {
        let temporal = Temporal::single(Observation::open(ts(0)));
        let json = serde_json::to_value(&temporal).unwrap();
        assert!(json["t_obs"].is_array());
        assert!(json["t_start"].is_array());
        assert_eq!(json["t_end"][0], serde_json::Value::Null);
    }
}
