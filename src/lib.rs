// 缓存命中分析器 - 主库
//
// 从UI测试流水线的记录源单遍扫描步骤记录，为每条记录解释
// 缓存为何命中/未命中，并按命令、命令+应用包两个键空间
// 增量聚合统计，最终产出JSON报告

// 声明模块
pub mod aggregator;
pub mod analysis;
pub mod classifier;
pub mod event_bus;
pub mod logger;
pub mod models;
pub mod report;
pub mod scanner;
pub mod settings;
pub mod utils;

// 重新导出常用类型
pub use aggregator::{BulkAggregator, CacheOutcome, StatsBucket};
pub use analysis::{run_bulk_analysis, BulkAnalysisOptions};
pub use classifier::{Classification, Classifier, UnclassifiedDiagnosis};
pub use event_bus::{AppEvent, EventBus};
pub use models::{CandidateDocument, MissCategory, RawItem, StepRecord};
pub use report::writer::ReportWriter;
pub use report::BulkRunSummary;
pub use scanner::{MemorySource, RecordSource, StepScanner};
pub use settings::{AnalyzerSettings, AnalyzerSettingsUpdate, SettingsManager};
