// 分析器配置 - 持久化为JSON文件，启动时加载并校验

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// 持久化的分析器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerSettings {
    /// 记录源表名
    pub table_name: String,
    /// 扫描API地址（DynamoDB兼容端点）
    pub endpoint: String,
    /// 相似度阈值（分类谓词8-10使用）
    pub similarity_threshold: f64,
    /// 参与分析的步骤类型
    pub step_classifications: Vec<String>,
    /// 报告输出目录
    pub output_dir: String,
    /// 进度日志间隔（条）
    pub progress_interval: u64,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            table_name: "TestSteps".to_string(),
            endpoint: std::env::var("DYNAMODB_HOST")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            similarity_threshold: 0.75,
            step_classifications: vec!["TAP".to_string(), "TEXT".to_string()],
            output_dir: "./cache_reports".to_string(),
            progress_interval: 1000,
        }
    }
}

impl AnalyzerSettings {
    /// 启动期校验
    ///
    /// 配置错误是致命的：缺了阈值或端点就没有可恢复的运行方式
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            bail!("配置错误: table_name 不能为空");
        }
        if self.endpoint.trim().is_empty() {
            bail!("配置错误: endpoint 不能为空");
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            bail!(
                "配置错误: similarity_threshold 必须在 (0, 1] 区间内，当前为 {}",
                self.similarity_threshold
            );
        }
        if self.step_classifications.is_empty() {
            bail!("配置错误: step_classifications 不能为空");
        }
        if self.progress_interval == 0 {
            bail!("配置错误: progress_interval 必须大于 0");
        }
        Ok(())
    }
}

/// 配置更新（所有字段可选，逐项合并）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerSettingsUpdate {
    pub table_name: Option<String>,
    pub endpoint: Option<String>,
    pub similarity_threshold: Option<f64>,
    pub step_classifications: Option<Vec<String>>,
    pub output_dir: Option<String>,
    pub progress_interval: Option<u64>,
}

pub struct SettingsManager {
    path: PathBuf,
    data: RwLock<AnalyzerSettings>,
}

impl SettingsManager {
    pub async fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let initial = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                serde_json::from_slice::<AnalyzerSettings>(&bytes).unwrap_or_default()
            }
            _ => {
                let default = AnalyzerSettings::default();
                let json = serde_json::to_string_pretty(&default)?;
                tokio::fs::write(&path, json).await?;
                default
            }
        };

        Ok(Self {
            path,
            data: RwLock::new(initial),
        })
    }

    pub async fn get(&self) -> AnalyzerSettings {
        self.data.read().await.clone()
    }

    pub async fn update(&self, update: AnalyzerSettingsUpdate) -> Result<AnalyzerSettings> {
        let mut config = self.data.write().await;

        if let Some(value) = update.table_name {
            config.table_name = value;
        }
        if let Some(value) = update.endpoint {
            config.endpoint = value;
        }
        if let Some(value) = update.similarity_threshold {
            config.similarity_threshold = value;
        }
        if let Some(value) = update.step_classifications {
            config.step_classifications = value;
        }
        if let Some(value) = update.output_dir {
            config.output_dir = value;
        }
        if let Some(value) = update.progress_interval {
            config.progress_interval = value;
        }

        self.save(&config).await?;
        Ok(config.clone())
    }

    async fn save(&self, config: &AnalyzerSettings) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = AnalyzerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.similarity_threshold, 0.75);
        assert_eq!(settings.step_classifications, vec!["TAP", "TEXT"]);
    }

    #[test]
    fn test_validation_rejects_bad_threshold() {
        let mut settings = AnalyzerSettings::default();
        settings.similarity_threshold = 0.0;
        assert!(settings.validate().is_err());
        settings.similarity_threshold = 1.5;
        assert!(settings.validate().is_err());
        settings.similarity_threshold = f64::NAN;
        assert!(settings.validate().is_err());
        settings.similarity_threshold = 1.0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let mut settings = AnalyzerSettings::default();
        settings.endpoint = "  ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = AnalyzerSettings::default();
        settings.step_classifications.clear();
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn test_new_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config/analyzer.json");

        let manager = SettingsManager::new(path.clone()).await.unwrap();
        assert!(path.exists());
        assert_eq!(manager.get().await.table_name, "TestSteps");
    }

    #[tokio::test]
    async fn test_update_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("analyzer.json");

        let manager = SettingsManager::new(path.clone()).await.unwrap();
        manager
            .update(AnalyzerSettingsUpdate {
                similarity_threshold: Some(0.8),
                output_dir: Some("./reports".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        // 重新加载，修改应已落盘
        let reloaded = SettingsManager::new(path).await.unwrap();
        let settings = reloaded.get().await;
        assert_eq!(settings.similarity_threshold, 0.8);
        assert_eq!(settings.output_dir, "./reports");
        // 未更新的字段保持原值
        assert_eq!(settings.table_name, "TestSteps");
    }
}
