//! 批量分析引擎
//!
//! 负责一次完整的分析运行，包括：
//! - 从记录源逐条拉取记录并折叠进聚合器（单遍、顺序、严格逐条）
//! - 源端中途失败时保留已聚合的部分结果
//! - 流耗尽后定稿并写出全部报告、诊断与运行摘要
//!
//! 整个循环只有拉取下一条记录这一个挂起点；每条记录都在拉取下一条
//! 之前完整处理完毕，因此任何时刻中断都不会留下半更新的桶。

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::aggregator::BulkAggregator;
use crate::classifier::UnclassifiedDiagnosis;
use crate::event_bus::{AppEvent, EventBus};
use crate::models::StepRecord;
use crate::report::writer::ReportWriter;
use crate::report::{build_command_package_report, build_command_report, build_run_summary, BulkRunSummary};
use crate::scanner::RecordSource;

/// 一次批量分析的运行参数
#[derive(Debug, Clone)]
pub struct BulkAnalysisOptions {
    /// 相似度阈值（传给分类器）
    pub similarity_threshold: f64,
    /// 是否生成命令级报告
    pub generate_individual: bool,
    /// 是否生成命令+包级报告
    pub generate_command_package: bool,
    /// 进度日志间隔（条）
    pub progress_interval: u64,
    /// 记录源表名（仅用于日志与事件）
    pub table_name: String,
}

/// 执行一次批量分析
///
/// 源端中途失败不会丢弃已聚合的数据：已有的桶照常定稿落盘，
/// 错误信息记入摘要的 scan_error 字段由调用方决定如何上报
pub async fn run_bulk_analysis(
    source: &mut dyn RecordSource,
    options: &BulkAnalysisOptions,
    writer: &ReportWriter,
    event_bus: &EventBus,
) -> Result<BulkRunSummary> {
    if !options.generate_individual && !options.generate_command_package {
        bail!("至少需要启用一种报告类型");
    }
    if options.progress_interval == 0 {
        bail!("progress_interval 必须大于 0");
    }

    info!("开始批量分析，单遍扫描记录源");
    info!("命令级报告: {}", options.generate_individual);
    info!("命令+包级报告: {}", options.generate_command_package);

    event_bus.publish(AppEvent::ScanStarted {
        table_name: options.table_name.clone(),
    });

    let mut aggregator = BulkAggregator::with_key_spaces(
        options.similarity_threshold,
        options.generate_individual,
        options.generate_command_package,
    );
    let mut diagnostics: Vec<UnclassifiedDiagnosis> = Vec::new();
    let mut scan_error: Option<String> = None;

    // 单遍拉取循环：一条记录完整处理后才拉下一条
    loop {
        match source.next_record().await {
            Ok(Some(item)) => {
                let record = StepRecord::from_raw(&item);

                if let Some(diagnosis) = aggregator.process_record(&record) {
                    event_bus.publish(AppEvent::StepUnclassified {
                        diagnosis: diagnosis.clone(),
                    });
                    diagnostics.push(diagnosis);
                }

                let processed = aggregator.total_steps_processed();
                if processed % options.progress_interval == 0 {
                    info!(
                        "已处理 {} 条记录, {} 个命令, {} 个命令+包组合",
                        processed,
                        aggregator.command_count(),
                        aggregator.command_package_count()
                    );
                    event_bus.publish(AppEvent::ProgressUpdated {
                        steps_processed: processed,
                        unique_commands: aggregator.command_count(),
                        command_package_combinations: aggregator.command_package_count(),
                    });
                }
            }
            Ok(None) => break,
            Err(e) => {
                // 源端故障：中止拉取，但已聚合的桶逐条更新后都是自洽的，
                // 照常进入定稿流程产出部分结果
                let message = format!("{:#}", e);
                error!("记录源中途失败: {}", message);
                event_bus.publish(AppEvent::ScanFailed {
                    error: message.clone(),
                });
                scan_error = Some(message);
                break;
            }
        }
    }

    if scan_error.is_some() {
        warn!(
            "以 {} 条已处理记录定稿部分结果",
            aggregator.total_steps_processed()
        );
    }

    // 定稿并落盘；单个文件写失败不中断其余文件
    let mut individual_files = 0usize;
    if options.generate_individual {
        info!("生成命令级报告文件...");
        for (command, bucket) in aggregator.command_stats() {
            let report = build_command_report(command, bucket);
            match writer.write_command_report(&report).await {
                Ok(path) => {
                    individual_files += 1;
                    event_bus.publish(AppEvent::ReportWritten { path });
                }
                Err(e) => error!("命令 '{}' 的报告生成失败: {}", command, e),
            }
        }
    }

    let mut command_package_files = 0usize;
    if options.generate_command_package {
        info!("生成命令+包级报告文件...");
        for ((command, package), bucket) in aggregator.command_package_stats() {
            let report = build_command_package_report(command, package, bucket);
            match writer.write_command_package_report(&report).await {
                Ok(path) => {
                    command_package_files += 1;
                    event_bus.publish(AppEvent::ReportWritten { path });
                }
                Err(e) => error!(
                    "命令 '{}' + 包 '{}' 的报告生成失败: {}",
                    command, package, e
                ),
            }
        }
    }

    if let Err(e) = writer.write_diagnostics(&diagnostics).await {
        error!("未分类诊断写入失败: {}", e);
    }

    let completed_at = Utc::now();
    let summary = build_run_summary(
        &aggregator,
        completed_at,
        individual_files,
        command_package_files,
        scan_error,
    );
    writer.write_summary(&summary).await?;

    let duration = summary.bulk_analysis_summary.duration_seconds;
    event_bus.publish(AppEvent::AnalysisCompleted {
        total_steps: aggregator.total_steps_processed(),
        unique_commands: aggregator.command_count(),
        command_package_combinations: aggregator.command_package_count(),
        duration_seconds: duration,
    });

    info!(
        "批量分析完成: {} 条记录, {} 个命令, {} 个组合, 耗时 {:.2} 秒",
        aggregator.total_steps_processed(),
        aggregator.command_count(),
        aggregator.command_package_count(),
        duration
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawItem;
    use crate::scanner::MemorySource;
    use serde_json::json;

    fn item(command: &str, package: &str, status: Option<i64>) -> RawItem {
        let mut value = json!({
            "step_id": {"S": "s"},
            "command": {"S": command},
            "app_package": {"S": package},
            "created_at": {"S": "2025-10-07T10:00:00+0000"},
            "step_classification": {"S": "TAP"},
            "test_step_status": {"S": "SUCCESS"},
        });
        let obj = value.as_object_mut().unwrap();
        if let Some(s) = status {
            obj.insert("cache_read_status".to_string(), json!({"N": s.to_string()}));
        }
        obj.clone()
    }

    fn options() -> BulkAnalysisOptions {
        BulkAnalysisOptions {
            similarity_threshold: 0.75,
            generate_individual: true,
            generate_command_package: true,
            progress_interval: 1000,
            table_name: "TestSteps".to_string(),
        }
    }

    async fn list_files(dir: &std::path::Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_full_run_writes_all_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(tmp.path()).await.unwrap();
        let bus = EventBus::new(100);

        let mut source = MemorySource::new(vec![
            item("Tap Submit", "com.a", Some(1)),
            item("Tap Submit", "com.a", Some(-1)),
            item("Tap Submit", "com.b", Some(-1)),
            item("Type text", "com.a", None),
        ]);

        let summary = run_bulk_analysis(&mut source, &options(), &writer, &bus)
            .await
            .unwrap();

        let inner = &summary.bulk_analysis_summary;
        assert_eq!(inner.total_steps_processed, 4);
        assert_eq!(inner.unique_commands_found, 2);
        assert_eq!(inner.command_package_combinations, 3);
        assert_eq!(inner.individual_command_files_generated, 2);
        assert_eq!(inner.command_package_files_generated, 3);
        assert!(inner.scan_error.is_none());
        assert_eq!(summary.command_list, vec!["Tap Submit", "Type text"]);
        assert_eq!(
            summary.command_package_combinations,
            vec!["Tap Submit|com.a", "Tap Submit|com.b", "Type text|com.a"]
        );

        let files = list_files(tmp.path()).await;
        assert!(files.contains(&"bulk_analysis_summary.json".to_string()));
        assert_eq!(
            files.iter().filter(|f| f.starts_with("command_stats_")).count(),
            2
        );
        assert_eq!(
            files
                .iter()
                .filter(|f| f.starts_with("command_package_stats_"))
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn test_partial_failure_preserves_results() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(tmp.path()).await.unwrap();
        let bus = EventBus::new(100);

        let mut source = MemorySource::failing_after(
            vec![
                item("Tap Submit", "com.a", Some(1)),
                item("Tap Submit", "com.a", Some(-1)),
            ],
            "connection reset by peer",
        );

        let summary = run_bulk_analysis(&mut source, &options(), &writer, &bus)
            .await
            .unwrap();

        let inner = &summary.bulk_analysis_summary;
        // 故障前的记录全部保留
        assert_eq!(inner.total_steps_processed, 2);
        assert_eq!(inner.individual_command_files_generated, 1);
        assert!(inner
            .scan_error
            .as_deref()
            .unwrap()
            .contains("connection reset"));

        // 部分结果照常落盘
        let files = list_files(tmp.path()).await;
        assert!(files.contains(&"bulk_analysis_summary.json".to_string()));
        assert!(files.iter().any(|f| f.starts_with("command_stats_")));
    }

    #[tokio::test]
    async fn test_unclassified_diagnostics_written_and_published() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(tmp.path()).await.unwrap();
        let bus = EventBus::new(100);
        let mut receiver = bus.subscribe();

        // 未命中且不沾任何规则 → 兜底分类
        let mut source = MemorySource::new(vec![{
            let mut it = item("Cmd", "com.a", Some(0));
            it.insert("llm_output".to_string(), json!({"S": "plain output"}));
            it
        }]);

        run_bulk_analysis(&mut source, &options(), &writer, &bus)
            .await
            .unwrap();

        let files = list_files(tmp.path()).await;
        assert!(files
            .iter()
            .any(|f| f.starts_with("unclassified_diagnostics_")));

        // 诊断事件也发布到了总线
        let mut saw_unclassified = false;
        while let Ok(event) = receiver.try_recv() {
            if matches!(event, AppEvent::StepUnclassified { .. }) {
                saw_unclassified = true;
            }
        }
        assert!(saw_unclassified);
    }

    #[tokio::test]
    async fn test_individual_only_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(tmp.path()).await.unwrap();
        let bus = EventBus::new(100);

        let mut opts = options();
        opts.generate_command_package = false;

        let mut source = MemorySource::new(vec![item("Cmd", "com.a", Some(1))]);
        let summary = run_bulk_analysis(&mut source, &opts, &writer, &bus)
            .await
            .unwrap();

        assert_eq!(summary.bulk_analysis_summary.individual_command_files_generated, 1);
        assert_eq!(summary.bulk_analysis_summary.command_package_files_generated, 0);
        assert!(summary.command_package_combinations.is_empty());
    }

    #[tokio::test]
    async fn test_no_key_space_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(tmp.path()).await.unwrap();
        let bus = EventBus::new(100);

        let mut opts = options();
        opts.generate_individual = false;
        opts.generate_command_package = false;

        let mut source = MemorySource::new(vec![]);
        assert!(run_bulk_analysis(&mut source, &opts, &writer, &bus)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_empty_source_produces_summary_only() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(tmp.path()).await.unwrap();
        let bus = EventBus::new(100);

        let mut source = MemorySource::new(vec![]);
        let summary = run_bulk_analysis(&mut source, &options(), &writer, &bus)
            .await
            .unwrap();

        assert_eq!(summary.bulk_analysis_summary.total_steps_processed, 0);
        let files = list_files(tmp.path()).await;
        assert_eq!(files, vec!["bulk_analysis_summary.json"]);
    }
}
