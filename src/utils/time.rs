// 时间工具 - UTC与IST（报表时区）之间的换算
//
// 记录源中的 created_at 一律是UTC时间戳；用户输入的过滤日期
// 按IST（UTC+5:30）理解，比较前统一换算成UTC

use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use tracing::error;

/// IST偏移量（秒）：UTC + 5:30
const IST_OFFSET_SECONDS: i32 = 5 * 3600 + 30 * 60;

/// 报表时区（IST）
pub fn ist_offset() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECONDS).unwrap()
}

/// 解析 ISO-8601 时间字符串为UTC时间
///
/// 兼容记录源中出现的几种格式：
/// - "2025-10-07T16:37:17.918342+0000"（带偏移量）
/// - "2025-10-07T16:37:17Z"（Zulu）
/// - "2025-10-07T16:37:17"（无时区，按UTC处理）
/// - "2025-10-07"（仅日期，按UTC零点处理）
pub fn parse_iso_datetime(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();

    // 带偏移量（+0000 / +05:30 等）
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(dt.with_timezone(&Utc));
    }

    // Zulu 记法
    if let Some(stripped) = trimmed.strip_suffix('Z') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(naive.and_utc());
        }
    }

    // 无时区，按UTC
    if trimmed.contains('T') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(naive.and_utc());
        }
    }

    // 仅日期
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }

    Err(anyhow!("无法解析时间字符串: {}", raw))
}

/// 解析用户输入的日期/时间（按IST理解）
///
/// 仅日期时，`end_of_day` 为 true 取当天 23:59:59.999999，否则取零点
fn parse_naive_ist(raw: &str, end_of_day: bool) -> Result<NaiveDateTime> {
    // 用户输入不应携带时区，防御性剥离
    let cleaned = raw.split('+').next().unwrap_or(raw).trim_end_matches('Z');

    if cleaned.contains('T') {
        return NaiveDateTime::parse_from_str(cleaned, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|e| anyhow!("无效的日期时间 '{}': {}", raw, e));
    }

    let date = NaiveDate::parse_from_str(cleaned, "%Y-%m-%d")
        .map_err(|e| anyhow!("无效的日期 '{}': {}", raw, e))?;
    let time = if end_of_day {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap()
    } else {
        NaiveTime::MIN
    };
    Ok(date.and_time(time))
}

/// IST日期换算为UTC起点
///
/// 例："2025-10-08" → 2025-10-07T18:30:00Z（即10月8日 0:00 IST）
pub fn ist_day_start_utc(raw: &str) -> Result<DateTime<Utc>> {
    let naive = parse_naive_ist(raw, false)?;
    ist_to_utc(naive)
}

/// IST日期换算为UTC终点
///
/// 例："2025-10-08" → 2025-10-08T18:29:59.999999Z（即10月8日 23:59:59 IST）
pub fn ist_day_end_utc(raw: &str) -> Result<DateTime<Utc>> {
    let naive = parse_naive_ist(raw, true)?;
    ist_to_utc(naive)
}

fn ist_to_utc(naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    ist_offset()
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("IST时间换算失败: {}", naive))
}

/// 判断记录时间（UTC）是否落在给定UTC区间内（闭区间）
///
/// 解析失败视为不在区间内并记录错误，不中断扫描
pub fn is_within_range(created_at: &str, start_utc: &DateTime<Utc>, end_utc: &DateTime<Utc>) -> bool {
    match parse_iso_datetime(created_at) {
        Ok(created) => *start_utc <= created && created <= *end_utc,
        Err(e) => {
            error!("日期比较失败 '{}': {}", created_at, e);
            false
        }
    }
}
