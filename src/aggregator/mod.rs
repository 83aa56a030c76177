// 聚合引擎 - 单遍扫描期间维护命令级与命令+包级的运行统计
//
// 记录逐条折叠进两个键空间，内存占用与不同键的数量成正比，
// 与记录总数无关；原始记录绝不保留。
// 每次 update 调用结束后桶都处于自洽状态，记录之间中断是安全的。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::classifier::{Classifier, UnclassifiedDiagnosis};
use crate::models::{MissCategory, StepRecord};

/// 缓存读取结果（比12类分类更粗的三分法）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// cache_read_status = 1，命中且组件可用
    Hit,
    /// cache_read_status = 0，命中但组件不可用（同时计为未命中）
    HitWithoutComponent,
    /// cache_read_status = -1、缺失或其他值
    Miss,
}

impl CacheOutcome {
    /// 状态值三分法
    ///
    /// 域外值（既非1/0/-1也非缺失）按未命中处理，
    /// 保证 hits + misses == count 恒成立
    pub fn from_status(status: Option<i64>) -> Self {
        match status {
            Some(1) => CacheOutcome::Hit,
            Some(0) => CacheOutcome::HitWithoutComponent,
            _ => CacheOutcome::Miss,
        }
    }

    /// 是否计入未命中（status 0 同时计入）
    pub fn counts_as_miss(self) -> bool {
        !matches!(self, CacheOutcome::Hit)
    }
}

/// 未命中分类计数（固定12类，下标与 MissCategory::index 对应）
#[derive(Debug, Clone, Default)]
pub struct BreakdownCounts {
    counts: [u64; 12],
}

impl BreakdownCounts {
    pub fn increment(&mut self, category: MissCategory) {
        self.counts[category.index()] += 1;
    }

    pub fn get(&self, category: MissCategory) -> u64 {
        self.counts[category.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// 单个键的运行统计桶
///
/// 生命周期为一次聚合运行；首条记录创建，之后原地累加，绝不删除。
/// 分布类映射使用 BTreeMap，保证序列化输出确定有序（两次相同输入
/// 的运行产出逐字节一致的报告）
#[derive(Debug, Clone, Default)]
pub struct StatsBucket {
    /// 总记录数
    pub count: u64,
    /// 缓存命中数（status = 1）
    pub cache_hits: u64,
    /// 缓存未命中数（status = 0 / -1 / 缺失）
    pub cache_misses: u64,
    /// 命中但组件不可用数（status = 0，独立计数，与未命中重叠）
    pub cache_hit_without_component: u64,
    /// 包名分布（仅命令级桶填充）
    pub app_packages: BTreeMap<String, u64>,
    /// 日期分布（日历日 → 记录数）
    pub date_distribution: BTreeMap<String, u64>,
    /// 步骤类型分布
    pub step_classifications: BTreeMap<String, u64>,
    /// 步骤执行状态分布
    pub test_step_status: BTreeMap<String, u64>,
    /// 观测到的缓存查询耗时（仅非零值）
    pub cache_latencies: Vec<f64>,
    /// 未命中分类计数
    pub cache_miss_breakdown: BreakdownCounts,
}

impl StatsBucket {
    /// 将一条记录折叠进本桶
    ///
    /// `track_packages` 仅命令级桶为 true；
    /// `miss_category` 在记录为未命中时必有值
    fn apply(
        &mut self,
        record: &StepRecord,
        outcome: CacheOutcome,
        miss_category: Option<MissCategory>,
        track_packages: bool,
    ) {
        self.count += 1;

        match outcome {
            CacheOutcome::Hit => self.cache_hits += 1,
            CacheOutcome::HitWithoutComponent => {
                self.cache_misses += 1;
                self.cache_hit_without_component += 1;
            }
            CacheOutcome::Miss => self.cache_misses += 1,
        }

        if let Some(category) = miss_category {
            self.cache_miss_breakdown.increment(category);
        }

        if track_packages {
            *self
                .app_packages
                .entry(record.app_package.clone())
                .or_insert(0) += 1;
        }

        *self
            .date_distribution
            .entry(record.date_key())
            .or_insert(0) += 1;
        *self
            .step_classifications
            .entry(record.step_classification.clone())
            .or_insert(0) += 1;
        *self
            .test_step_status
            .entry(record.test_step_status.clone())
            .or_insert(0) += 1;

        // 仅收集非零耗时；均值在定稿阶段计算
        if let Some(latency) = record.cache_read_latency {
            if latency != 0.0 {
                self.cache_latencies.push(latency);
            }
        }
    }
}

/// 批量聚合器 - 一次运行的全部可变状态
///
/// 两个键空间相互独立，同一条记录会同时落进两个桶。
/// 不使用任何进程级全局状态：创建一个实例即开始一次新的运行
pub struct BulkAggregator {
    classifier: Classifier,
    /// 命令 → 统计桶
    command_stats: BTreeMap<String, StatsBucket>,
    /// (命令, 包名) → 统计桶
    command_package_stats: BTreeMap<(String, String), StatsBucket>,
    /// 已处理记录总数
    total_steps_processed: u64,
    /// 运行开始时间
    started_at: DateTime<Utc>,
    /// 是否更新命令级键空间
    generate_individual: bool,
    /// 是否更新命令+包级键空间
    generate_command_package: bool,
}

impl BulkAggregator {
    pub fn new(similarity_threshold: f64) -> Self {
        Self::with_key_spaces(similarity_threshold, true, true)
    }

    /// 按需启用键空间（对应CLI的 --individual-only / --command-package-only）
    pub fn with_key_spaces(
        similarity_threshold: f64,
        generate_individual: bool,
        generate_command_package: bool,
    ) -> Self {
        Self {
            classifier: Classifier::new(similarity_threshold),
            command_stats: BTreeMap::new(),
            command_package_stats: BTreeMap::new(),
            total_steps_processed: 0,
            started_at: Utc::now(),
            generate_individual,
            generate_command_package,
        }
    }

    /// 处理一条记录：分类一次，折叠进两个键空间
    ///
    /// 返回兜底分类的诊断（如有），由调用方转交诊断接收端
    pub fn process_record(&mut self, record: &StepRecord) -> Option<UnclassifiedDiagnosis> {
        self.total_steps_processed += 1;

        let outcome = CacheOutcome::from_status(record.cache_read_status);

        // 未命中才进入分类级联；同一结果供两个键空间共用
        let mut diagnosis = None;
        let miss_category = if outcome.counts_as_miss() {
            let classification = self.classifier.classify(record);
            diagnosis = classification.diagnosis;
            Some(classification.category)
        } else {
            None
        };

        if self.generate_individual {
            self.command_stats
                .entry(record.command.clone())
                .or_default()
                .apply(record, outcome, miss_category, true);
        }

        if self.generate_command_package {
            self.command_package_stats
                .entry((record.command.clone(), record.app_package.clone()))
                .or_default()
                .apply(record, outcome, miss_category, false);
        }

        diagnosis
    }

    pub fn total_steps_processed(&self) -> u64 {
        self.total_steps_processed
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn command_count(&self) -> usize {
        self.command_stats.len()
    }

    pub fn command_package_count(&self) -> usize {
        self.command_package_stats.len()
    }

    pub fn command_stats(&self) -> &BTreeMap<String, StatsBucket> {
        &self.command_stats
    }

    pub fn command_package_stats(&self) -> &BTreeMap<(String, String), StatsBucket> {
        &self.command_package_stats
    }
}
