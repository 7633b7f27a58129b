//! 时间处理工具模块
//!
//! 提供统一的时间显示转换，支持可配置的时区
//!
//! # 设计原则
//!
//! - **数据层**: 所有时间字段统一为 `DateTime<Utc>`，权威时间戳来自服务端
//! - **显示层**: 根据配置的时区转换后再格式化 / 分组
//! - **日期分组**: 消息按显示时区的日历日期切段，粒度与界面一致

use chrono::{DateTime, Datelike, Duration, FixedOffset, Local, NaiveDate, Utc};
use std::sync::RwLock;

/// 全局时区配置
static TIMEZONE_OFFSET: RwLock<Option<FixedOffset>> = RwLock::new(None);

/// 时区配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimezoneConfig {
    /// 时区偏移（秒），例如：+08:00 = 28800, -05:00 = -18000
    pub offset_seconds: i32,
}

impl TimezoneConfig {
    /// 从小时偏移创建，例如：+8, -5
    pub fn from_hours(hours: i32) -> Self {
        Self {
            offset_seconds: hours * 3600,
        }
    }

    /// 从秒偏移创建
    pub fn from_seconds(seconds: i32) -> Self {
        Self {
            offset_seconds: seconds,
        }
    }

    /// 使用系统本地时区
    pub fn local() -> Self {
        let now = Local::now();
        Self {
            offset_seconds: now.offset().local_minus_utc(),
        }
    }

    pub fn to_fixed_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.offset_seconds)
    }
}

/// 时间格式化工具
pub struct TimeFormatter;

impl TimeFormatter {
    /// 设置全局时区配置
    pub fn set_timezone(config: TimezoneConfig) {
        if let Some(offset) = config.to_fixed_offset() {
            let mut tz = TIMEZONE_OFFSET.write().unwrap();
            *tz = Some(offset);
        }
    }

    /// 获取当前配置的时区，未配置时使用系统本地时区
    fn get_timezone() -> FixedOffset {
        let tz = TIMEZONE_OFFSET.read().unwrap();
        if let Some(offset) = *tz {
            offset
        } else {
            let now = Local::now();
            FixedOffset::east_opt(now.offset().local_minus_utc()).unwrap()
        }
    }

    /// 转换到显示时区
    pub fn to_display(t: DateTime<Utc>) -> DateTime<FixedOffset> {
        t.with_timezone(&Self::get_timezone())
    }

    /// 显示时区下的日历日期（消息日期分组的粒度）
    pub fn display_date(t: DateTime<Utc>) -> NaiveDate {
        Self::to_display(t).date_naive()
    }

    /// 消息气泡时间，格式: "HH:MM"
    pub fn format_message_time(t: DateTime<Utc>) -> String {
        Self::to_display(t).format("%H:%M").to_string()
    }

    /// 日期分割条文案：今天 / 昨天 / 完整日期
    pub fn format_date_header(t: DateTime<Utc>) -> String {
        let date = Self::display_date(t);
        let today = Self::display_date(Utc::now());
        if date == today {
            "Today".to_string()
        } else if Some(date) == today.pred_opt() {
            "Yesterday".to_string()
        } else {
            format!("{} {}, {}", month_name(date.month()), date.day(), date.year())
        }
    }

    /// 会话列表的紧凑相对时间："now" / "5m" / "2h" / "3d"，更久则给日期
    pub fn format_list_time(t: DateTime<Utc>) -> String {
        Self::compact_between(t, Utc::now())
    }

    fn compact_between(t: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let elapsed = now.signed_duration_since(t);
        if elapsed < Duration::minutes(1) {
            "now".to_string()
        } else if elapsed < Duration::hours(1) {
            format!("{}m", elapsed.num_minutes())
        } else if elapsed < Duration::days(1) {
            format!("{}h", elapsed.num_hours())
        } else if elapsed < Duration::days(7) {
            format!("{}d", elapsed.num_days())
        } else {
            let date = Self::display_date(t);
            format!("{} {}", month_name(date.month()), date.day())
        }
    }
}

fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        _ => "December",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_between() {
        let now = Utc::now();
        assert_eq!(TimeFormatter::compact_between(now, now), "now");
        assert_eq!(
            TimeFormatter::compact_between(now - Duration::minutes(5), now),
            "5m"
        );
        assert_eq!(
            TimeFormatter::compact_between(now - Duration::hours(2), now),
            "2h"
        );
        assert_eq!(
            TimeFormatter::compact_between(now - Duration::days(3), now),
            "3d"
        );
    }

    #[test]
    fn test_date_header_today_and_yesterday() {
        // 今天/昨天的判断和输入使用同一显示时区，偏移配置不影响结果
        let now = Utc::now();
        assert_eq!(TimeFormatter::format_date_header(now), "Today");
        assert_eq!(
            TimeFormatter::format_date_header(now - Duration::days(1)),
            "Yesterday"
        );
        let old = now - Duration::days(30);
        let header = TimeFormatter::format_date_header(old);
        assert_ne!(header, "Today");
        assert_ne!(header, "Yesterday");
        assert!(header.contains(',')); // "March 5, 2026" 形式
    }
}
