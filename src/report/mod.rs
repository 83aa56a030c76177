// 报告定稿模块 - 把封闭的统计桶转换为不可变的报告结构
//
// 定稿发生在记录流耗尽之后，桶不再变化；报告结构只实现 Serialize，
// 字段名、分类键名与百分比格式都是下游消费方依赖的输出契约。

pub mod writer;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregator::{BulkAggregator, StatsBucket};
use crate::models::MissCategory;

/// 百分比统一渲染为两位小数加百分号的字符串（如 "80.00%"）
///
/// total 为 0 时返回 "0.00%"，不产生 NaN
pub fn format_percentage(count: u64, total: u64) -> String {
    if total == 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", (count as f64 / total as f64) * 100.0)
}

/// 单个未命中分类的定稿条目
#[derive(Debug, Clone, Serialize)]
pub struct BreakdownCategoryReport {
    pub count: u64,
    pub percentage: String,
    pub reason: String,
}

/// 未命中细分（12个分类按固定顺序输出）
#[derive(Debug, Clone, Serialize)]
pub struct CacheMissBreakdownReport {
    pub undoable: BreakdownCategoryReport,
    pub unblocker_call: BreakdownCategoryReport,
    pub ocr_steps: BreakdownCategoryReport,
    pub dynamic_step: BreakdownCategoryReport,
    pub failed_step: BreakdownCategoryReport,
    pub null_llm_output: BreakdownCategoryReport,
    pub cache_read_status_none: BreakdownCategoryReport,
    pub no_cache_documents_found: BreakdownCategoryReport,
    pub less_similarity_threshold: BreakdownCategoryReport,
    pub failed_at_must_match_filter: BreakdownCategoryReport,
    pub failed_after_similar_document: BreakdownCategoryReport,
    pub unclassified: BreakdownCategoryReport,
}

/// 命中统计
#[derive(Debug, Clone, Serialize)]
pub struct CacheHitReport {
    pub count: u64,
    pub percentage: String,
    /// 观测耗时均值（秒），无数据时为 0.0
    pub average_latency: f64,
}

/// 未命中统计
#[derive(Debug, Clone, Serialize)]
pub struct CacheMissReport {
    pub count: u64,
    pub percentage: String,
    pub breakdown: CacheMissBreakdownReport,
}

/// 命中但组件不可用统计
#[derive(Debug, Clone, Serialize)]
pub struct CacheHitWithoutComponentReport {
    pub count: u64,
    pub percentage: String,
}

/// 观测日期范围（无数据时两端为 null）
#[derive(Debug, Clone, Serialize)]
pub struct DateRangeReport {
    pub start: Option<String>,
    pub end: Option<String>,
}

/// 命令级报告（跨全部应用包）
#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    /// 出现次数最多的包（并列时取字典序最小，规则确定）
    pub app_package: String,
    pub total_step_runs: u64,
    pub app_package_distribution: BTreeMap<String, u64>,
    pub date_range: DateRangeReport,
    pub cache_hit: CacheHitReport,
    pub cache_miss: CacheMissReport,
    pub cache_hit_without_component: CacheHitWithoutComponentReport,
    pub step_classifications: BTreeMap<String, u64>,
    pub test_step_status: BTreeMap<String, u64>,
    pub date_distribution: BTreeMap<String, u64>,
}

/// 命令+包级报告
#[derive(Debug, Clone, Serialize)]
pub struct CommandPackageReport {
    pub command: String,
    pub app_package: String,
    pub total_step_runs: u64,
    pub date_range: DateRangeReport,
    pub cache_hit: CacheHitReport,
    pub cache_miss: CacheMissReport,
    pub cache_hit_without_component: CacheHitWithoutComponentReport,
    pub step_classifications: BTreeMap<String, u64>,
    pub test_step_status: BTreeMap<String, u64>,
    pub date_distribution: BTreeMap<String, u64>,
}

/// 运行摘要（bulk_analysis_summary.json 的内容）
#[derive(Debug, Clone, Serialize)]
pub struct BulkRunSummary {
    pub bulk_analysis_summary: BulkAnalysisSummary,
    pub command_list: Vec<String>,
    pub command_package_combinations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkAnalysisSummary {
    pub run_id: String,
    pub scan_timestamp: String,
    pub completion_timestamp: String,
    pub duration_seconds: f64,
    pub total_steps_processed: u64,
    pub unique_commands_found: usize,
    pub command_package_combinations: usize,
    pub individual_command_files_generated: usize,
    pub command_package_files_generated: usize,
    /// 扫描中途失败时的错误信息；为 None 表示完整运行
    pub scan_error: Option<String>,
}

// ==================== 定稿函数 ====================

fn build_category(
    bucket: &StatsBucket,
    total_misses: u64,
    category: MissCategory,
) -> BreakdownCategoryReport {
    let count = bucket.cache_miss_breakdown.get(category);
    BreakdownCategoryReport {
        count,
        percentage: format_percentage(count, total_misses),
        reason: category.description().to_string(),
    }
}

fn build_breakdown(bucket: &StatsBucket) -> CacheMissBreakdownReport {
    let misses = bucket.cache_misses;
    CacheMissBreakdownReport {
        undoable: build_category(bucket, misses, MissCategory::Undoable),
        unblocker_call: build_category(bucket, misses, MissCategory::UnblockerCall),
        ocr_steps: build_category(bucket, misses, MissCategory::OcrSteps),
        dynamic_step: build_category(bucket, misses, MissCategory::DynamicStep),
        failed_step: build_category(bucket, misses, MissCategory::FailedStep),
        null_llm_output: build_category(bucket, misses, MissCategory::NullLlmOutput),
        cache_read_status_none: build_category(bucket, misses, MissCategory::CacheReadStatusNone),
        no_cache_documents_found: build_category(
            bucket,
            misses,
            MissCategory::NoCacheDocumentsFound,
        ),
        less_similarity_threshold: build_category(
            bucket,
            misses,
            MissCategory::LessSimilarityThreshold,
        ),
        failed_at_must_match_filter: build_category(
            bucket,
            misses,
            MissCategory::FailedAtMustMatchFilter,
        ),
        failed_after_similar_document: build_category(
            bucket,
            misses,
            MissCategory::FailedAfterSimilarDocument,
        ),
        unclassified: build_category(bucket, misses, MissCategory::Unclassified),
    }
}

fn build_date_range(bucket: &StatsBucket) -> DateRangeReport {
    DateRangeReport {
        start: bucket.date_distribution.keys().min().cloned(),
        end: bucket.date_distribution.keys().max().cloned(),
    }
}

fn average_latency(latencies: &[f64]) -> f64 {
    if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<f64>() / latencies.len() as f64
    }
}

fn build_cache_hit(bucket: &StatsBucket) -> CacheHitReport {
    CacheHitReport {
        count: bucket.cache_hits,
        percentage: format_percentage(bucket.cache_hits, bucket.count),
        average_latency: average_latency(&bucket.cache_latencies),
    }
}

fn build_cache_miss(bucket: &StatsBucket) -> CacheMissReport {
    CacheMissReport {
        count: bucket.cache_misses,
        percentage: format_percentage(bucket.cache_misses, bucket.count),
        breakdown: build_breakdown(bucket),
    }
}

fn build_hit_without_component(bucket: &StatsBucket) -> CacheHitWithoutComponentReport {
    CacheHitWithoutComponentReport {
        count: bucket.cache_hit_without_component,
        percentage: format_percentage(bucket.cache_hit_without_component, bucket.count),
    }
}

/// 取出现次数最多的包名；并列时取字典序最小（BTreeMap 迭代序 + 严格大于）
fn most_common_package(packages: &BTreeMap<String, u64>) -> String {
    let mut best: Option<(&String, u64)> = None;
    for (package, &count) in packages {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((package, count)),
        }
    }
    best.map(|(package, _)| package.clone())
        .unwrap_or_else(|| "UNKNOWN_PACKAGE".to_string())
}

/// 命令级报告定稿
pub fn build_command_report(command: &str, bucket: &StatsBucket) -> CommandReport {
    CommandReport {
        command: command.to_string(),
        app_package: most_common_package(&bucket.app_packages),
        total_step_runs: bucket.count,
        app_package_distribution: bucket.app_packages.clone(),
        date_range: build_date_range(bucket),
        cache_hit: build_cache_hit(bucket),
        cache_miss: build_cache_miss(bucket),
        cache_hit_without_component: build_hit_without_component(bucket),
        step_classifications: bucket.step_classifications.clone(),
        test_step_status: bucket.test_step_status.clone(),
        date_distribution: bucket.date_distribution.clone(),
    }
}

/// 命令+包级报告定稿
pub fn build_command_package_report(
    command: &str,
    app_package: &str,
    bucket: &StatsBucket,
) -> CommandPackageReport {
    CommandPackageReport {
        command: command.to_string(),
        app_package: app_package.to_string(),
        total_step_runs: bucket.count,
        date_range: build_date_range(bucket),
        cache_hit: build_cache_hit(bucket),
        cache_miss: build_cache_miss(bucket),
        cache_hit_without_component: build_hit_without_component(bucket),
        step_classifications: bucket.step_classifications.clone(),
        test_step_status: bucket.test_step_status.clone(),
        date_distribution: bucket.date_distribution.clone(),
    }
}

/// 运行摘要定稿
pub fn build_run_summary(
    aggregator: &BulkAggregator,
    completed_at: DateTime<Utc>,
    individual_files: usize,
    command_package_files: usize,
    scan_error: Option<String>,
) -> BulkRunSummary {
    let started_at = aggregator.started_at();
    let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

    BulkRunSummary {
        bulk_analysis_summary: BulkAnalysisSummary {
            run_id: uuid::Uuid::new_v4().to_string(),
            scan_timestamp: started_at.to_rfc3339(),
            completion_timestamp: completed_at.to_rfc3339(),
            duration_seconds: duration,
            total_steps_processed: aggregator.total_steps_processed(),
            unique_commands_found: aggregator.command_count(),
            command_package_combinations: aggregator.command_package_count(),
            individual_command_files_generated: individual_files,
            command_package_files_generated: command_package_files,
            scan_error,
        },
        command_list: aggregator.command_stats().keys().cloned().collect(),
        command_package_combinations: aggregator
            .command_package_stats()
            .keys()
            .map(|(command, package)| format!("{}|{}", command, package))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawItem, StepRecord};
    use serde_json::json;

    fn record(command: &str, package: &str, status: Option<i64>, latency: Option<f64>) -> StepRecord {
        let mut item = json!({
            "step_id": {"S": "s"},
            "command": {"S": command},
            "app_package": {"S": package},
            "created_at": {"S": "2025-10-07T10:00:00+0000"},
            "step_classification": {"S": "TAP"},
            "test_step_status": {"S": "SUCCESS"},
        });
        let obj = item.as_object_mut().unwrap();
        if let Some(s) = status {
            obj.insert("cache_read_status".to_string(), json!({"N": s.to_string()}));
        }
        if let Some(l) = latency {
            obj.insert("cache_read_latency".to_string(), json!({"N": l.to_string()}));
        }
        let raw: RawItem = obj.clone();
        StepRecord::from_raw(&raw)
    }

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(120, 150), "80.00%");
        assert_eq!(format_percentage(0, 100), "0.00%");
        assert_eq!(format_percentage(0, 0), "0.00%");
        assert_eq!(format_percentage(2, 3), "66.67%");
        assert_eq!(format_percentage(1, 3), "33.33%");
        assert_eq!(format_percentage(3, 3), "100.00%");
    }

    #[test]
    fn test_scenario_e_report() {
        let mut aggregator = BulkAggregator::new(0.75);
        aggregator.process_record(&record("Tap Submit", "com.a", Some(1), Some(0.2)));
        aggregator.process_record(&record("Tap Submit", "com.a", Some(-1), None));
        aggregator.process_record(&record("Tap Submit", "com.a", Some(-1), None));

        let report = build_command_report("Tap Submit", &aggregator.command_stats()["Tap Submit"]);
        assert_eq!(report.total_step_runs, 3);
        assert_eq!(report.cache_hit.count, 1);
        assert_eq!(report.cache_hit.percentage, "33.33%");
        assert_eq!(report.cache_hit.average_latency, 0.2);
        assert_eq!(report.cache_miss.count, 2);
        assert_eq!(report.cache_miss.percentage, "66.67%");
    }

    #[test]
    fn test_breakdown_percentages_relative_to_misses() {
        let mut aggregator = BulkAggregator::new(0.75);
        aggregator.process_record(&record("Cmd", "com.a", Some(1), None));
        let mut failed = record("Cmd", "com.a", Some(-1), None);
        failed.test_step_status = "FAILED".to_string();
        aggregator.process_record(&failed);
        aggregator.process_record(&record("Cmd", "com.a", Some(-1), None));

        let report = build_command_report("Cmd", &aggregator.command_stats()["Cmd"]);
        let breakdown = &report.cache_miss.breakdown;
        // 2个未命中：一个 failed_step，一个 no_cache_documents_found
        assert_eq!(breakdown.failed_step.count, 1);
        assert_eq!(breakdown.failed_step.percentage, "50.00%");
        assert_eq!(breakdown.no_cache_documents_found.count, 1);
        assert_eq!(breakdown.no_cache_documents_found.percentage, "50.00%");
        assert_eq!(breakdown.unclassified.count, 0);
        assert_eq!(breakdown.unclassified.percentage, "0.00%");
        assert!(!breakdown.failed_step.reason.is_empty());
    }

    #[test]
    fn test_zero_miss_breakdown_is_all_zero_percent() {
        let mut aggregator = BulkAggregator::new(0.75);
        aggregator.process_record(&record("Cmd", "com.a", Some(1), None));

        let report = build_command_report("Cmd", &aggregator.command_stats()["Cmd"]);
        assert_eq!(report.cache_miss.count, 0);
        assert_eq!(report.cache_miss.breakdown.undoable.percentage, "0.00%");
        assert_eq!(report.cache_miss.breakdown.unclassified.percentage, "0.00%");
    }

    #[test]
    fn test_most_common_package_tie_break() {
        let mut packages = BTreeMap::new();
        packages.insert("com.zzz".to_string(), 3);
        packages.insert("com.aaa".to_string(), 3);
        packages.insert("com.mmm".to_string(), 1);
        // 并列时取字典序最小
        assert_eq!(most_common_package(&packages), "com.aaa");

        packages.insert("com.zzz".to_string(), 4);
        assert_eq!(most_common_package(&packages), "com.zzz");

        assert_eq!(most_common_package(&BTreeMap::new()), "UNKNOWN_PACKAGE");
    }

    #[test]
    fn test_date_range() {
        let mut aggregator = BulkAggregator::new(0.75);
        let mut r = record("Cmd", "com.a", Some(1), None);
        aggregator.process_record(&r);
        r.created_at = "2025-10-09T10:00:00+0000".to_string();
        aggregator.process_record(&r);
        r.created_at = "2025-10-05T10:00:00+0000".to_string();
        aggregator.process_record(&r);

        let report = build_command_report("Cmd", &aggregator.command_stats()["Cmd"]);
        assert_eq!(report.date_range.start.as_deref(), Some("2025-10-05"));
        assert_eq!(report.date_range.end.as_deref(), Some("2025-10-09"));
    }

    #[test]
    fn test_average_latency_empty_is_zero() {
        let mut aggregator = BulkAggregator::new(0.75);
        aggregator.process_record(&record("Cmd", "com.a", Some(-1), None));

        let report = build_command_report("Cmd", &aggregator.command_stats()["Cmd"]);
        assert_eq!(report.cache_hit.average_latency, 0.0);
    }

    #[test]
    fn test_breakdown_serialization_order_and_names() {
        let mut aggregator = BulkAggregator::new(0.75);
        aggregator.process_record(&record("Cmd", "com.a", Some(-1), None));

        let report = build_command_report("Cmd", &aggregator.command_stats()["Cmd"]);

        // 文件输出按结构体字段顺序序列化，分类键必须按固定分类顺序出现
        let text = serde_json::to_string(&report).unwrap();
        let mut last_position = 0;
        for category in crate::models::MissCategory::ALL {
            let key = format!("\"{}\":", category.as_str());
            let position = text.find(&key).unwrap_or_else(|| panic!("缺少分类键 {}", key));
            assert!(position > last_position, "分类 {} 顺序错误", category.as_str());
            last_position = position;
        }

        // 百分比以字符串形式输出
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            json["cache_miss"]["breakdown"]["no_cache_documents_found"]["percentage"],
            "100.00%"
        );
    }

    #[test]
    fn test_idempotence_bit_identical_reports() {
        let stream = |aggregator: &mut BulkAggregator| {
            aggregator.process_record(&record("B cmd", "com.b", Some(1), Some(0.3)));
            aggregator.process_record(&record("A cmd", "com.a", Some(-1), None));
            aggregator.process_record(&record("A cmd", "com.z", Some(0), None));
        };

        let mut first = BulkAggregator::new(0.75);
        let mut second = BulkAggregator::new(0.75);
        stream(&mut first);
        stream(&mut second);

        for (command, bucket) in first.command_stats() {
            let a = serde_json::to_string(&build_command_report(command, bucket)).unwrap();
            let b = serde_json::to_string(&build_command_report(
                command,
                &second.command_stats()[command],
            ))
            .unwrap();
            assert_eq!(a, b);
        }

        for ((command, package), bucket) in first.command_package_stats() {
            let a = serde_json::to_string(&build_command_package_report(command, package, bucket))
                .unwrap();
            let b = serde_json::to_string(&build_command_package_report(
                command,
                package,
                &second.command_package_stats()[&(command.clone(), package.clone())],
            ))
            .unwrap();
            assert_eq!(a, b);
        }
    }
}
