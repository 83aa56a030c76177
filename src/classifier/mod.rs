// 缓存未命中分类器 - 按优先级级联将每条记录归入唯一分类
//
// 级联自上而下逐条求值，第一个命中的谓词决定分类，后续谓词不再求值，
// 从而保证各分类占比相加恰为100%。任何字段解析失败都降级为"不匹配"，
// 分类过程绝不报错。

use serde::Serialize;
use tracing::debug;

use crate::models::{CandidateDocument, MissCategory, StepRecord};
use crate::utils::parse_candidate_documents;

/// 分类结果
///
/// 命中兜底分类（unclassified）时附带诊断信息，供离线排查分类体系的盲区
#[derive(Debug, Clone)]
pub struct Classification {
    /// 最终分类
    pub category: MissCategory,
    /// 兜底分类的诊断信息
    pub diagnosis: Option<UnclassifiedDiagnosis>,
}

/// 未分类记录的诊断信息
///
/// category_checks 按优先级顺序列出每个谓词的通过情况与原因，
/// 用于发现"所有规则都没接住"的记录长什么样
#[derive(Debug, Clone, Serialize)]
pub struct UnclassifiedDiagnosis {
    pub step_id: String,
    pub step_classification: String,
    pub cache_read_status: Option<i64>,
    pub test_step_status: String,
    pub has_cache_query_results: bool,
    pub has_ocr_output: bool,
    pub is_blocker: Option<bool>,
    pub category_checks: Vec<PredicateCheck>,
}

/// 单个谓词的检查结果
#[derive(Debug, Clone, Serialize)]
pub struct PredicateCheck {
    pub category: MissCategory,
    pub passed: bool,
    pub reason: String,
}

/// 未命中分类器
///
/// 纯函数式：无I/O、无内部状态，同一记录重复分类结果恒定
pub struct Classifier {
    similarity_threshold: f64,
}

impl Classifier {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    /// 将一条记录归入恰好一个分类
    ///
    /// 优先级从高到低：
    /// 0. undoable                      LLM输出含 "undoable"
    /// 1. unblocker_call                LLM输出含 "unblock: "
    /// 2. ocr_steps                     OCR输出非空且非"NA"
    /// 3. dynamic_step                  ensemble_used 为 true
    /// 4. failed_step                   步骤执行失败
    /// 5. null_llm_output               LLM输出存在但为空串
    /// 6. cache_read_status_none        cache_read_status 字段缺失
    /// 7. no_cache_documents_found      cache_read_status = -1
    /// 8. less_similarity_threshold     所有候选相似度低于阈值
    /// 9. failed_at_must_match_filter   must_match 过滤后候选清零
    /// 10. failed_after_similar_document 有合格候选却未被采用
    /// 11. unclassified                 兜底（附诊断）
    pub fn classify(&self, record: &StepRecord) -> Classification {
        if self.is_undoable(record) {
            return Classification {
                category: MissCategory::Undoable,
                diagnosis: None,
            };
        }

        if self.is_unblocker_call(record) {
            return Classification {
                category: MissCategory::UnblockerCall,
                diagnosis: None,
            };
        }

        if self.used_ocr(record) {
            return Classification {
                category: MissCategory::OcrSteps,
                diagnosis: None,
            };
        }

        if self.is_dynamic_step(record) {
            return Classification {
                category: MissCategory::DynamicStep,
                diagnosis: None,
            };
        }

        if self.is_failed_step(record) {
            debug!("步骤 {}: test_step_status = FAILED", record.step_id);
            return Classification {
                category: MissCategory::FailedStep,
                diagnosis: None,
            };
        }

        if self.is_null_llm_output(record) {
            return Classification {
                category: MissCategory::NullLlmOutput,
                diagnosis: None,
            };
        }

        if self.cache_status_missing(record) {
            return Classification {
                category: MissCategory::CacheReadStatusNone,
                diagnosis: None,
            };
        }

        if self.no_documents_found(record) {
            return Classification {
                category: MissCategory::NoCacheDocumentsFound,
                diagnosis: None,
            };
        }

        // 8-10 需要解析候选文档，解析一次共用
        let candidates = record
            .cache_query_results
            .as_deref()
            .and_then(parse_candidate_documents);

        if self.all_below_threshold(&candidates) {
            if let Some(docs) = &candidates {
                debug!(
                    "步骤 {}: 全部 {} 个候选相似度 < {}",
                    record.step_id,
                    docs.len(),
                    self.similarity_threshold
                );
            }
            return Classification {
                category: MissCategory::LessSimilarityThreshold,
                diagnosis: None,
            };
        }

        if self.failed_at_must_match_filter(&candidates) {
            return Classification {
                category: MissCategory::FailedAtMustMatchFilter,
                diagnosis: None,
            };
        }

        if self.failed_after_similar_document(&candidates) {
            return Classification {
                category: MissCategory::FailedAfterSimilarDocument,
                diagnosis: None,
            };
        }

        Classification {
            category: MissCategory::Unclassified,
            diagnosis: Some(self.diagnose(record, &candidates)),
        }
    }

    // ==================== 谓词（按优先级顺序） ====================

    /// 优先级0：LLM输出含 "undoable"（不区分大小写）
    fn is_undoable(&self, record: &StepRecord) -> bool {
        record
            .llm_output
            .as_deref()
            .map(|out| out.to_lowercase().contains("undoable"))
            .unwrap_or(false)
    }

    /// 优先级1：LLM输出含 "unblock: "（不区分大小写）
    fn is_unblocker_call(&self, record: &StepRecord) -> bool {
        record
            .llm_output
            .as_deref()
            .map(|out| out.to_lowercase().contains("unblock: "))
            .unwrap_or(false)
    }

    /// 优先级2：OCR输出存在、非空且非"NA"哨兵
    fn used_ocr(&self, record: &StepRecord) -> bool {
        matches!(record.ocr_output.as_deref(), Some(out) if !out.is_empty() && out != "NA")
    }

    /// 优先级3：使用了动态组件识别
    fn is_dynamic_step(&self, record: &StepRecord) -> bool {
        record.ensemble_used == Some(true)
    }

    /// 优先级4：步骤执行失败
    fn is_failed_step(&self, record: &StepRecord) -> bool {
        record.test_step_status == "FAILED"
    }

    /// 优先级5：LLM输出存在但为空串（与缺失不同）
    fn is_null_llm_output(&self, record: &StepRecord) -> bool {
        record.llm_output.as_deref() == Some("")
    }

    /// 优先级6：cache_read_status 字段完全缺失，缓存从未尝试
    fn cache_status_missing(&self, record: &StepRecord) -> bool {
        record.cache_read_status.is_none()
    }

    /// 优先级7：缓存查了但没查到可用文档
    fn no_documents_found(&self, record: &StepRecord) -> bool {
        record.cache_read_status == Some(-1)
    }

    /// 优先级8：候选列表非空且所有相似度都严格低于阈值
    fn all_below_threshold(&self, candidates: &Option<Vec<CandidateDocument>>) -> bool {
        match candidates {
            Some(docs) if !docs.is_empty() => docs
                .iter()
                .all(|doc| doc.similarity_score < self.similarity_threshold),
            _ => false,
        }
    }

    /// 优先级9：存在相似度过阈值的候选，但 must_match 过滤后候选数为0
    fn failed_at_must_match_filter(&self, candidates: &Option<Vec<CandidateDocument>>) -> bool {
        let Some(docs) = candidates else {
            return false;
        };

        docs.iter().any(|doc| {
            doc.similarity_score > self.similarity_threshold
                && doc
                    .component_selection_report
                    .as_ref()
                    .and_then(|report| report.cand_nos_after_must_match_filter)
                    == Some(0)
        })
    }

    /// 优先级10：存在相似度过阈值、未被采用、且 must_match 过滤后仍有候选的文档
    fn failed_after_similar_document(&self, candidates: &Option<Vec<CandidateDocument>>) -> bool {
        let Some(docs) = candidates else {
            return false;
        };

        docs.iter().any(|doc| {
            if doc.similarity_score <= self.similarity_threshold || doc.is_used {
                return false;
            }
            matches!(
                doc.component_selection_report
                    .as_ref()
                    .and_then(|report| report.cand_nos_after_must_match_filter),
                Some(n) if n != 0
            )
        })
    }

    // ==================== 诊断 ====================

    /// 为兜底分类生成诊断：逐条记录前11个谓词的通过情况与原因
    fn diagnose(
        &self,
        record: &StepRecord,
        candidates: &Option<Vec<CandidateDocument>>,
    ) -> UnclassifiedDiagnosis {
        let llm_state = match record.llm_output.as_deref() {
            None => "absent".to_string(),
            Some("") => "empty".to_string(),
            Some(out) => format!("present ({} chars)", out.chars().count()),
        };
        let candidate_state = match candidates {
            None => "absent/unparseable".to_string(),
            Some(docs) => format!("{} documents", docs.len()),
        };

        let category_checks = vec![
            PredicateCheck {
                category: MissCategory::Undoable,
                passed: self.is_undoable(record),
                reason: format!("llm_output={}", llm_state),
            },
            PredicateCheck {
                category: MissCategory::UnblockerCall,
                passed: self.is_unblocker_call(record),
                reason: format!("llm_output={}", llm_state),
            },
            PredicateCheck {
                category: MissCategory::OcrSteps,
                passed: self.used_ocr(record),
                reason: format!(
                    "ocr_output={}",
                    if self.used_ocr(record) { "present" } else { "absent" }
                ),
            },
            PredicateCheck {
                category: MissCategory::DynamicStep,
                passed: self.is_dynamic_step(record),
                reason: format!("ensemble_used={:?}", record.ensemble_used),
            },
            PredicateCheck {
                category: MissCategory::FailedStep,
                passed: self.is_failed_step(record),
                reason: format!("test_step_status={}", record.test_step_status),
            },
            PredicateCheck {
                category: MissCategory::NullLlmOutput,
                passed: self.is_null_llm_output(record),
                reason: format!("llm_output={}", llm_state),
            },
            PredicateCheck {
                category: MissCategory::CacheReadStatusNone,
                passed: self.cache_status_missing(record),
                reason: format!(
                    "cache_read_status field {}",
                    if record.cache_read_status.is_none() {
                        "missing"
                    } else {
                        "present"
                    }
                ),
            },
            PredicateCheck {
                category: MissCategory::NoCacheDocumentsFound,
                passed: self.no_documents_found(record),
                reason: format!("cache_read_status={:?}", record.cache_read_status),
            },
            PredicateCheck {
                category: MissCategory::LessSimilarityThreshold,
                passed: self.all_below_threshold(candidates),
                reason: format!("cache_query_results={}", candidate_state),
            },
            PredicateCheck {
                category: MissCategory::FailedAtMustMatchFilter,
                passed: self.failed_at_must_match_filter(candidates),
                reason: format!("cache_query_results={}", candidate_state),
            },
            PredicateCheck {
                category: MissCategory::FailedAfterSimilarDocument,
                passed: self.failed_after_similar_document(candidates),
                reason: format!("cache_query_results={}", candidate_state),
            },
        ];

        UnclassifiedDiagnosis {
            step_id: record.step_id.clone(),
            step_classification: record.step_classification.clone(),
            cache_read_status: record.cache_read_status,
            test_step_status: record.test_step_status.clone(),
            has_cache_query_results: record
                .cache_query_results
                .as_deref()
                .map(|s| !s.is_empty())
                .unwrap_or(false),
            has_ocr_output: self.used_ocr(record),
            is_blocker: record.is_blocker,
            category_checks,
        }
    }
}
