// 命令行入口 - 单遍扫描生成全部命令缓存统计报告

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;

use cache_analyzer::analysis::{run_bulk_analysis, BulkAnalysisOptions};
use cache_analyzer::event_bus::EventBus;
use cache_analyzer::logger;
use cache_analyzer::report::writer::ReportWriter;
use cache_analyzer::scanner::StepScanner;
use cache_analyzer::settings::{AnalyzerSettingsUpdate, SettingsManager};

/// 批量命令缓存分析 - 单遍扫描为所有命令生成统计报告
#[derive(Debug, Parser)]
#[command(name = "cache-analyzer", version, about)]
struct Cli {
    /// 仅生成命令级报告（跨全部应用包）
    #[arg(long)]
    individual_only: bool,

    /// 仅生成命令+应用包级报告
    #[arg(long)]
    command_package_only: bool,

    /// 起始日期过滤（IST，YYYY-MM-DD）
    #[arg(long)]
    start_date: Option<String>,

    /// 结束日期过滤（IST，YYYY-MM-DD）
    #[arg(long)]
    end_date: Option<String>,

    /// 报告输出目录（默认 ./cache_reports）
    #[arg(long)]
    output_dir: Option<String>,

    /// 进度日志间隔（条，默认 1000）
    #[arg(long)]
    batch_size: Option<u64>,

    /// 配置文件路径
    #[arg(long, default_value = "config/cache-analyzer.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = logger::init() {
        eprintln!("日志初始化失败: {}", e);
    }

    if cli.individual_only && cli.command_package_only {
        bail!("--individual-only 与 --command-package-only 不能同时指定");
    }

    // 日期过滤必须成对出现
    if cli.start_date.is_some() != cli.end_date.is_some() {
        bail!("--start-date 与 --end-date 必须同时指定");
    }

    // 加载配置；CLI参数覆盖配置文件
    let manager = SettingsManager::new(cli.config.clone()).await?;
    let settings = if cli.output_dir.is_some() || cli.batch_size.is_some() {
        manager
            .update(AnalyzerSettingsUpdate {
                output_dir: cli.output_dir.clone(),
                progress_interval: cli.batch_size,
                ..Default::default()
            })
            .await?
    } else {
        manager.get().await
    };
    // 配置错误在启动期就终止，不带病运行
    settings.validate()?;

    info!("配置加载完成: {}", cli.config.display());
    if let (Some(start), Some(end)) = (&cli.start_date, &cli.end_date) {
        info!("日期区间(IST): {} ~ {}", start, end);
    }

    // 组装记录源（共享HTTP客户端）
    let client = reqwest::Client::new();
    let mut scanner = StepScanner::new(
        client,
        settings.endpoint.clone(),
        settings.table_name.clone(),
        settings.step_classifications.clone(),
    );
    if let (Some(start), Some(end)) = (&cli.start_date, &cli.end_date) {
        scanner = scanner.with_date_range(start, end)?;
    }

    let writer = ReportWriter::new(&settings.output_dir).await?;
    let event_bus = EventBus::new(256);

    let options = BulkAnalysisOptions {
        similarity_threshold: settings.similarity_threshold,
        generate_individual: !cli.command_package_only,
        generate_command_package: !cli.individual_only,
        progress_interval: settings.progress_interval,
        table_name: settings.table_name.clone(),
    };

    let summary = run_bulk_analysis(&mut scanner, &options, &writer, &event_bus).await?;
    let inner = &summary.bulk_analysis_summary;

    // 控制台摘要
    println!();
    println!("============================================================");
    println!("批量分析完成");
    println!("============================================================");
    println!("处理记录总数: {}", inner.total_steps_processed);
    println!("唯一命令数: {}", inner.unique_commands_found);
    println!("命令+包组合数: {}", inner.command_package_combinations);
    println!("命令级报告文件: {}", inner.individual_command_files_generated);
    println!("命令+包级报告文件: {}", inner.command_package_files_generated);
    println!("耗时: {:.2} 秒", inner.duration_seconds);
    println!("输出目录: {}", writer.output_dir().display());
    println!("============================================================");

    // 扫描中途失败：部分结果已落盘，但以运行级错误上报
    if let Some(error) = &inner.scan_error {
        bail!("扫描中途失败（部分结果已写入）: {}", error);
    }

    Ok(())
}
