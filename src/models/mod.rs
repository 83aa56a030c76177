// 数据模型模块 - 定义扫描记录与分类的数据结构

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 原始扫描条目（DynamoDB 属性 JSON 格式）
///
/// 形如 {"step_id": {"S": "abc"}, "cache_read_status": {"N": "-1"}}
/// 字段的"完全缺失"与"存在但为空"语义不同，转换时必须保留该区别
pub type RawItem = serde_json::Map<String, Value>;

/// 读取字符串属性 {"S": "..."}
pub fn attr_s(item: &RawItem, key: &str) -> Option<String> {
    item.get(key)?
        .get("S")?
        .as_str()
        .map(|s| s.to_string())
}

/// 读取数值属性 {"N": "123"}，解析失败视为缺失
pub fn attr_n_i64(item: &RawItem, key: &str) -> Option<i64> {
    item.get(key)?.get("N")?.as_str()?.trim().parse::<i64>().ok()
}

/// 读取浮点数值属性 {"N": "0.234"}
pub fn attr_n_f64(item: &RawItem, key: &str) -> Option<f64> {
    item.get(key)?.get("N")?.as_str()?.trim().parse::<f64>().ok()
}

/// 读取布尔属性 {"BOOL": true}
pub fn attr_bool(item: &RawItem, key: &str) -> Option<bool> {
    item.get(key)?.get("BOOL")?.as_bool()
}

/// 单条测试步骤记录（核心只读输入）
///
/// 可选字段使用 Option 显式建模：
/// - `llm_output` 为 None 表示字段缺失，Some("") 表示字段存在但为空串，
///   两者在分类级联中对应不同优先级（null_llm_output 与 cache_read_status_none）
/// - `cache_read_status` 为 None 表示缓存从未尝试
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// 步骤ID
    pub step_id: String,
    /// 命令文本
    pub command: String,
    /// 应用包名
    pub app_package: String,
    /// 线程编码
    pub thread_code: String,
    /// 创建时间（ISO-8601，UTC）
    pub created_at: String,
    /// 缓存读取状态：1=命中，0=命中但无组件，-1=未命中，None=未尝试
    pub cache_read_status: Option<i64>,
    /// 缓存查询耗时（秒）
    pub cache_read_latency: Option<f64>,
    /// 步骤类型（TAP、TEXT等）
    pub step_classification: String,
    /// 步骤执行状态（SUCCESS、FAILED等）
    pub test_step_status: String,
    /// 缓存查询结果（JSON字符串，内嵌候选文档列表）
    pub cache_query_results: Option<String>,
    /// OCR输出
    pub ocr_output: Option<String>,
    /// LLM输出
    pub llm_output: Option<String>,
    /// 是否为阻塞步骤
    pub is_blocker: Option<bool>,
    /// 是否使用了动态组件识别
    pub ensemble_used: Option<bool>,
}

impl StepRecord {
    /// 从原始扫描条目转换
    ///
    /// 缺失的命令/包名回退到占位值，缺失的状态字段回退到 "UNKNOWN"；
    /// 可选字段保持 None，不做任何补全
    pub fn from_raw(item: &RawItem) -> Self {
        Self {
            step_id: attr_s(item, "step_id").unwrap_or_default(),
            command: attr_s(item, "command").unwrap_or_else(|| "UNKNOWN_COMMAND".to_string()),
            app_package: attr_s(item, "app_package")
                .unwrap_or_else(|| "UNKNOWN_PACKAGE".to_string()),
            thread_code: attr_s(item, "thread_code").unwrap_or_default(),
            created_at: attr_s(item, "created_at").unwrap_or_default(),
            cache_read_status: attr_n_i64(item, "cache_read_status"),
            cache_read_latency: attr_n_f64(item, "cache_read_latency"),
            step_classification: attr_s(item, "step_classification")
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            test_step_status: attr_s(item, "test_step_status")
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            cache_query_results: attr_s(item, "cache_query_results"),
            ocr_output: attr_s(item, "ocr_output"),
            llm_output: attr_s(item, "llm_output"),
            is_blocker: attr_bool(item, "is_blocker"),
            ensemble_used: attr_bool(item, "ensemble_used"),
        }
    }

    /// 日期键：created_at 的前10个字符（日历日期），缺失时为 "unknown"
    pub fn date_key(&self) -> String {
        if self.created_at.is_empty() {
            "unknown".to_string()
        } else {
            self.created_at.chars().take(10).collect()
        }
    }
}

/// 相似度检索候选文档（解析自 cache_query_results）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDocument {
    /// 相似度得分（0-1，缺失按0计）
    pub similarity_score: f64,
    /// 该候选是否被实际采用
    pub is_used: bool,
    /// 组件筛选报告
    pub component_selection_report: Option<ComponentSelectionReport>,
}

/// 组件筛选报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSelectionReport {
    /// must_match 过滤后剩余候选数
    pub cand_nos_after_must_match_filter: Option<i64>,
}

/// 缓存未命中分类（固定12类，按优先级从高到低排列）
///
/// 每条记录恰好归入一类；枚举顺序即级联求值顺序，
/// 序列化名称是报告输出契约的一部分，不可改动
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissCategory {
    /// 步骤不可撤销，无需缓存
    Undoable,
    /// 发生解阻调用
    UnblockerCall,
    /// 使用了OCR
    OcrSteps,
    /// 使用了动态组件识别
    DynamicStep,
    /// 步骤执行失败
    FailedStep,
    /// LLM输出为空串
    NullLlmOutput,
    /// cache_read_status 字段完全缺失
    CacheReadStatusNone,
    /// 向量库未找到相似文档（cache_read_status = -1）
    NoCacheDocumentsFound,
    /// 所有候选相似度低于阈值
    LessSimilarityThreshold,
    /// 在 must_match 过滤阶段失败
    FailedAtMustMatchFilter,
    /// 找到相似文档后仍失败
    FailedAfterSimilarDocument,
    /// 兜底分类
    Unclassified,
}

impl MissCategory {
    /// 全部分类，按优先级顺序
    pub const ALL: [MissCategory; 12] = [
        MissCategory::Undoable,
        MissCategory::UnblockerCall,
        MissCategory::OcrSteps,
        MissCategory::DynamicStep,
        MissCategory::FailedStep,
        MissCategory::NullLlmOutput,
        MissCategory::CacheReadStatusNone,
        MissCategory::NoCacheDocumentsFound,
        MissCategory::LessSimilarityThreshold,
        MissCategory::FailedAtMustMatchFilter,
        MissCategory::FailedAfterSimilarDocument,
        MissCategory::Unclassified,
    ];

    /// 分类在固定顺序中的下标（用于桶内计数数组）
    pub fn index(self) -> usize {
        match self {
            MissCategory::Undoable => 0,
            MissCategory::UnblockerCall => 1,
            MissCategory::OcrSteps => 2,
            MissCategory::DynamicStep => 3,
            MissCategory::FailedStep => 4,
            MissCategory::NullLlmOutput => 5,
            MissCategory::CacheReadStatusNone => 6,
            MissCategory::NoCacheDocumentsFound => 7,
            MissCategory::LessSimilarityThreshold => 8,
            MissCategory::FailedAtMustMatchFilter => 9,
            MissCategory::FailedAfterSimilarDocument => 10,
            MissCategory::Unclassified => 11,
        }
    }

    /// 序列化名称（与报告JSON中的分类键一致）
    pub fn as_str(self) -> &'static str {
        match self {
            MissCategory::Undoable => "undoable",
            MissCategory::UnblockerCall => "unblocker_call",
            MissCategory::OcrSteps => "ocr_steps",
            MissCategory::DynamicStep => "dynamic_step",
            MissCategory::FailedStep => "failed_step",
            MissCategory::NullLlmOutput => "null_llm_output",
            MissCategory::CacheReadStatusNone => "cache_read_status_none",
            MissCategory::NoCacheDocumentsFound => "no_cache_documents_found",
            MissCategory::LessSimilarityThreshold => "less_similarity_threshold",
            MissCategory::FailedAtMustMatchFilter => "failed_at_must_match_filter",
            MissCategory::FailedAfterSimilarDocument => "failed_after_similar_document",
            MissCategory::Unclassified => "unclassified",
        }
    }

    /// 报告中展示的人类可读原因
    pub fn description(self) -> &'static str {
        match self {
            MissCategory::Undoable => "Step was undoable, no cache needed",
            MissCategory::UnblockerCall => "Unblocker call made, no cache needed",
            MissCategory::OcrSteps => "OCR was used for step execution, no cache needed",
            MissCategory::DynamicStep => "Dynamic component resolution used, no cache needed",
            MissCategory::FailedStep => "Step execution failed, no cache needed",
            MissCategory::NullLlmOutput => "No LLM output generated, no cache needed",
            MissCategory::CacheReadStatusNone => "Cache was never attempted (dynamic resolution)",
            MissCategory::NoCacheDocumentsFound => {
                "Vector DB found no similar screenshots (cache_read_status=-1)"
            }
            MissCategory::LessSimilarityThreshold => {
                "Found similar documents but similarity below threshold"
            }
            MissCategory::FailedAtMustMatchFilter => {
                "Component selection failed at must_match_filter stage"
            }
            MissCategory::FailedAfterSimilarDocument => {
                "Failed after finding similar document with good similarity"
            }
            MissCategory::Unclassified => "Unclassified cache miss reason",
        }
    }
}
