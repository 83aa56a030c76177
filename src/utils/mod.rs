//! 工具函数模块
//!
//! 提供各类通用工具函数，包括：
//! - 时区换算与时间解析（记录源存UTC，报表过滤按IST）
//! - 宽松JSON解析（缓存查询结果内嵌JSON）

pub mod json;
pub mod time;

// 重新导出常用函数
pub use json::*;
pub use time::*;
