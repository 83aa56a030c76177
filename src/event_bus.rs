// 事件总线 - 用于模块间解耦通信
//
// 实现发布/订阅模式,消除分析引擎与外部收集端的直接依赖关系
// 使用 tokio::sync::broadcast 实现高效的事件分发

use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::classifier::UnclassifiedDiagnosis;

/// 应用事件枚举 - 定义所有可能的系统事件
#[derive(Debug, Clone)]
pub enum AppEvent {
    // --- 扫描事件 ---

    /// 扫描开始事件
    ScanStarted {
        table_name: String,
    },

    /// 处理进度事件（每处理一批记录发布一次）
    ProgressUpdated {
        steps_processed: u64,
        unique_commands: usize,
        command_package_combinations: usize,
    },

    /// 扫描失败事件（已聚合的部分结果仍会定稿）
    ScanFailed {
        error: String,
    },

    // --- 分析事件 ---

    /// 记录落入兜底分类事件（诊断接收端订阅此事件）
    StepUnclassified {
        diagnosis: UnclassifiedDiagnosis,
    },

    /// 分析完成事件
    AnalysisCompleted {
        total_steps: u64,
        unique_commands: usize,
        command_package_combinations: usize,
        duration_seconds: f64,
    },

    // --- 报告事件 ---

    /// 单个报告文件写入完成事件
    ReportWritten {
        path: PathBuf,
    },
}

/// 事件总线 - 用于模块间解耦通信
///
/// 使用 broadcast channel 实现发布/订阅模式
/// 支持多个订阅者同时接收事件
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// 创建新的事件总线
    ///
    /// # 参数
    /// - `capacity`: 事件缓冲区大小,建议 100-1000
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件
    ///
    /// 如果没有订阅者,事件会被丢弃(这是正常的)
    pub fn publish(&self, event: AppEvent) {
        match self.sender.send(event) {
            Ok(receiver_count) => {
                tracing::trace!("事件已发布，订阅者数量: {}", receiver_count);
            }
            Err(_) => {
                // 没有订阅者,忽略错误
                tracing::trace!("事件已发布但无订阅者");
            }
        }
    }

    /// 订阅事件
    ///
    /// 返回一个接收器,可以用 `.recv().await` 接收事件
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// 获取当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
