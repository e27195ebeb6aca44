use chrono::{DateTime, Utc};
use std::fmt;
use std::num::NonZeroU64;

use crate::error::ConfigError;

pub const DEFAULT_WINDOW_SECONDS: u64 = 5;

const DEFAULT_SIZE: NonZeroU64 = match NonZeroU64::new(DEFAULT_WINDOW_SECONDS) {
    Some(n) => n,
    None => panic!("默认窗口大小必须为正"),
};

/// 聚合窗口大小（秒），构造时保证为正
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowSize(NonZeroU64);

impl WindowSize {
    pub fn new(seconds: i64) -> Result<Self, ConfigError> {
        u64::try_from(seconds)
            .ok()
            .and_then(NonZeroU64::new)
            .map(WindowSize)
            .ok_or(ConfigError::InvalidWindowSize(seconds))
    }

    pub fn seconds(&self) -> u64 {
        self.0.get()
    }

    fn seconds_i64(&self) -> i64 {
        i64::try_from(self.0.get()).unwrap_or(i64::MAX)
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        WindowSize(DEFAULT_SIZE)
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// 计算时间戳所在窗口的起始时刻：floor(ts / w) * w
///
/// 相同输入永远得到相同输出。非有限值或超出日历范围的时间戳会被钳制到
/// 可表示的边界，而不是报错。
pub fn window_start(timestamp: f64, size: WindowSize) -> DateTime<Utc> {
    // f64 -> i64 的 `as` 转换是饱和的，NaN 映射为 0
    let secs = timestamp.floor() as i64;
    let w = size.seconds_i64();
    let aligned = secs.div_euclid(w).saturating_mul(w);

    DateTime::from_timestamp(aligned, 0).unwrap_or(if aligned < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}
