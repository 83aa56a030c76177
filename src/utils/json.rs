// JSON工具 - 对不可信的内嵌JSON做宽松解析
//
// cache_query_results 由上游流水线写入，可能是坏JSON、"NA"哨兵
// 或结构不符的数据；一律降级为"缺失"，绝不向上抛错

use serde_json::Value;
use tracing::warn;

use crate::models::{CandidateDocument, ComponentSelectionReport};

/// 宽松解析JSON字符串
///
/// 空串、"NA"哨兵、解析失败都返回 None
pub fn parse_json_string(raw: &str) -> Option<Value> {
    if raw.is_empty() || raw == "NA" {
        return None;
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            let mut message = e.to_string();
            message.truncate(100);
            warn!("JSON解析失败: {}", message);
            None
        }
    }
}

/// 解析候选文档列表
///
/// 非列表或任一元素非对象时整体视为缺失；
/// 元素内字段缺失按默认值处理（similarity_score=0、is_used=false）
pub fn parse_candidate_documents(raw: &str) -> Option<Vec<CandidateDocument>> {
    let value = parse_json_string(raw)?;
    let items = value.as_array()?;

    let mut documents = Vec::with_capacity(items.len());
    for item in items {
        let doc = item.as_object()?;

        let component_selection_report = doc
            .get("component_selection_report")
            .and_then(Value::as_object)
            .map(|report| ComponentSelectionReport {
                cand_nos_after_must_match_filter: report
                    .get("cand_nos_after_must_match_filter")
                    .and_then(Value::as_i64),
            });

        documents.push(CandidateDocument {
            similarity_score: doc
                .get("similarity_score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            is_used: doc.get("is_used").and_then(Value::as_bool).unwrap_or(false),
            component_selection_report,
        });
    }

    Some(documents)
}
