// 报告写入器 - 把定稿报告落盘为带时间戳的JSON文件
//
// 文件名由命令/包名清理而来，完整原文保留在JSON内容里；
// 同一次运行的所有文件共享同一个时间戳后缀

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::info;

use super::{BulkRunSummary, CommandPackageReport, CommandReport};
use crate::classifier::UnclassifiedDiagnosis;

/// 文件名主体的最大长度（超出时首尾截取拼接）
const MAX_FILENAME_PART: usize = 200;

pub struct ReportWriter {
    output_dir: PathBuf,
    /// 本次运行的文件名时间戳（如 "20251007_184045"）
    timestamp: String,
    strip_pattern: Regex,
    collapse_pattern: Regex,
}

impl ReportWriter {
    /// 创建写入器并确保输出目录存在
    pub async fn new(output_dir: impl AsRef<Path>) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("创建输出目录失败: {}", output_dir.display()))?;

        Ok(Self {
            output_dir,
            timestamp: chrono::Local::now().format("%Y%m%d_%H%M%S").to_string(),
            strip_pattern: Regex::new(r"[^\w\s-]").unwrap(),
            collapse_pattern: Regex::new(r"[-\s]+").unwrap(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 把任意文本转成安全的文件名片段
    ///
    /// 去掉特殊字符，空白与连字符折叠为下划线，过长时首尾截取
    fn sanitize_filename(&self, text: &str) -> String {
        let stripped = self.strip_pattern.replace_all(text, "");
        let collapsed = self.collapse_pattern.replace_all(&stripped, "_");
        let safe = collapsed.trim_matches('_');

        let chars: Vec<char> = safe.chars().collect();
        if chars.len() > MAX_FILENAME_PART {
            let head: String = chars[..100].iter().collect();
            let tail: String = chars[chars.len() - 50..].iter().collect();
            format!("{}...{}", head, tail)
        } else {
            safe.to_string()
        }
    }

    async fn write_json<T: Serialize>(&self, filename: &str, value: &T) -> Result<PathBuf> {
        let path = self.output_dir.join(filename);
        let json = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("写入报告失败: {}", path.display()))?;
        Ok(path)
    }

    /// 写命令级报告：command_stats_{命令}_{时间戳}.json
    pub async fn write_command_report(&self, report: &CommandReport) -> Result<PathBuf> {
        let filename = format!(
            "command_stats_{}_{}.json",
            self.sanitize_filename(&report.command),
            self.timestamp
        );
        let path = self.write_json(&filename, report).await?;
        info!("命令报告已写入: {}", path.display());
        Ok(path)
    }

    /// 写命令+包级报告：command_package_stats_{包}_{命令}_{时间戳}.json
    pub async fn write_command_package_report(
        &self,
        report: &CommandPackageReport,
    ) -> Result<PathBuf> {
        let filename = format!(
            "command_package_stats_{}_{}_{}.json",
            self.sanitize_filename(&report.app_package),
            self.sanitize_filename(&report.command),
            self.timestamp
        );
        let path = self.write_json(&filename, report).await?;
        info!("命令+包报告已写入: {}", path.display());
        Ok(path)
    }

    /// 写运行摘要：bulk_analysis_summary.json（固定名，每次运行覆盖）
    pub async fn write_summary(&self, summary: &BulkRunSummary) -> Result<PathBuf> {
        let path = self.write_json("bulk_analysis_summary.json", summary).await?;
        info!("运行摘要已写入: {}", path.display());
        Ok(path)
    }

    /// 写未分类诊断：unclassified_diagnostics_{时间戳}.json
    ///
    /// 没有诊断时不产生文件
    pub async fn write_diagnostics(
        &self,
        diagnostics: &[UnclassifiedDiagnosis],
    ) -> Result<Option<PathBuf>> {
        if diagnostics.is_empty() {
            return Ok(None);
        }

        let filename = format!("unclassified_diagnostics_{}.json", self.timestamp);
        let path = self.write_json(&filename, &diagnostics).await?;
        info!(
            "未分类诊断已写入: {} ({} 条)",
            path.display(),
            diagnostics.len()
        );
        Ok(Some(path))
    }
}
