// 记录源模块 - TestSteps 表的分页扫描
//
// 拉取式生成器：调用方逐条取记录，内部按页从扫描API拉取，
// 用 LastEvaluatedKey 续页直到扫完。整表不会进内存。
// 分页/重试属于源端职责，核心只管逐条消费。

use std::collections::VecDeque;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::models::{attr_s, RawItem};
use crate::utils::{is_within_range, ist_day_end_utc, ist_day_start_utc};

/// 记录源接口 - 产出惰性、有限、不可重放的记录序列
///
/// 所有实现都必须保证：next_record 返回 Ok(None) 之后流已耗尽；
/// 返回 Err 表示源端故障，调用方可以用已取得的记录做部分定稿
#[async_trait]
pub trait RecordSource: Send {
    /// 拉取下一条记录；流耗尽返回 Ok(None)
    async fn next_record(&mut self) -> Result<Option<RawItem>>;
}

/// 一页扫描结果（DynamoDB Scan 响应中核心关心的部分）
#[derive(Debug, Deserialize)]
struct ScanResponse {
    #[serde(rename = "Items", default)]
    items: Vec<RawItem>,
    #[serde(rename = "LastEvaluatedKey")]
    last_evaluated_key: Option<Value>,
}

/// TestSteps 表扫描器
///
/// - 步骤类型过滤在服务端完成（FilterExpression）
/// - 日期过滤在客户端完成：输入日期按IST理解，换算为UTC闭区间后
///   与每条记录的 created_at 比较；时间解析失败的记录被剔除
pub struct StepScanner {
    client: reqwest::Client,
    endpoint: String,
    table_name: String,
    step_classifications: Vec<String>,
    date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    buffer: VecDeque<RawItem>,
    exclusive_start_key: Option<Value>,
    exhausted: bool,
    page_count: u64,
    scanned_count: u64,
    yielded_count: u64,
}

impl StepScanner {
    /// 创建扫描器（接受共享的HTTP客户端以复用连接池）
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        table_name: impl Into<String>,
        step_classifications: Vec<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            table_name: table_name.into(),
            step_classifications,
            date_range: None,
            buffer: VecDeque::new(),
            exclusive_start_key: None,
            exhausted: false,
            page_count: 0,
            scanned_count: 0,
            yielded_count: 0,
        }
    }

    /// 设置日期过滤区间（IST日历日，闭区间）
    pub fn with_date_range(mut self, start_date: &str, end_date: &str) -> Result<Self> {
        let start = ist_day_start_utc(start_date)?;
        let end = ist_day_end_utc(end_date)?;
        if start > end {
            bail!("起始日期晚于结束日期: {} > {}", start_date, end_date);
        }
        self.date_range = Some((start, end));
        Ok(self)
    }

    /// 组装 Scan 请求体
    fn build_scan_body(&self) -> Value {
        let mut placeholders = Vec::with_capacity(self.step_classifications.len());
        let mut expression_values = serde_json::Map::new();
        for (i, classification) in self.step_classifications.iter().enumerate() {
            let name = format!(":c{}", i);
            expression_values.insert(name.clone(), json!({ "S": classification }));
            placeholders.push(name);
        }

        let mut body = json!({
            "TableName": self.table_name,
            "FilterExpression": format!("step_classification IN ({})", placeholders.join(", ")),
            "ExpressionAttributeValues": Value::Object(expression_values),
        });
        if let Some(key) = &self.exclusive_start_key {
            body["ExclusiveStartKey"] = key.clone();
        }
        body
    }

    /// 判断记录是否通过日期预过滤
    fn accept(&self, item: &RawItem) -> bool {
        let Some((start, end)) = &self.date_range else {
            return true;
        };

        match attr_s(item, "created_at") {
            Some(created_at) => is_within_range(&created_at, start, end),
            None => {
                warn!("记录缺少 created_at，按日期过滤时剔除");
                false
            }
        }
    }

    /// 拉取下一页并填充缓冲区
    async fn fetch_page(&mut self) -> Result<()> {
        if self.page_count == 0 {
            info!("开始扫描表: {}", self.table_name);
            info!("步骤类型过滤: {:?}", self.step_classifications);
            match &self.date_range {
                Some((start, end)) => info!("日期区间(UTC): {} ~ {}", start, end),
                None => info!("日期区间: 不限"),
            }
        }
        self.page_count += 1;

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", "DynamoDB_20120810.Scan")
            .header("Content-Type", "application/x-amz-json-1.0")
            .json(&self.build_scan_body())
            .send()
            .await
            .with_context(|| format!("扫描请求发送失败 (第{}页)", self.page_count))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("扫描请求失败 ({}): {}", status, text);
        }

        let page: ScanResponse = response.json().await.context("扫描响应解析失败")?;
        self.scanned_count += page.items.len() as u64;

        for item in page.items {
            if self.accept(&item) {
                self.buffer.push_back(item);
            }
        }

        match page.last_evaluated_key {
            Some(key) => self.exclusive_start_key = Some(key),
            None => {
                self.exhausted = true;
                info!(
                    "扫描完成。页数: {}, 扫描: {}, 通过过滤: {}",
                    self.page_count,
                    self.scanned_count,
                    self.yielded_count + self.buffer.len() as u64
                );
            }
        }

        if self.page_count % 5 == 0 {
            info!(
                "扫描进度: 第{}页, 已扫描: {}, 已产出: {}",
                self.page_count, self.scanned_count, self.yielded_count
            );
        }

        Ok(())
    }
}

#[async_trait]
impl RecordSource for StepScanner {
    async fn next_record(&mut self) -> Result<Option<RawItem>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                self.yielded_count += 1;
                return Ok(Some(item));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }
}

/// 内存记录源 - 用于测试与离线回放导出的记录
pub struct MemorySource {
    items: VecDeque<RawItem>,
    /// 队列耗尽后注入的错误（模拟扫描中途失败）
    fail_with: Option<String>,
}

impl MemorySource {
    pub fn new(items: Vec<RawItem>) -> Self {
        Self {
            items: items.into(),
            fail_with: None,
        }
    }

    /// 产出全部记录后以给定错误收尾
    pub fn failing_after(items: Vec<RawItem>, error: impl Into<String>) -> Self {
        Self {
            items: items.into(),
            fail_with: Some(error.into()),
        }
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn next_record(&mut self) -> Result<Option<RawItem>> {
        if let Some(item) = self.items.pop_front() {
            return Ok(Some(item));
        }
        if let Some(message) = self.fail_with.take() {
            return Err(anyhow!(message));
        }
        Ok(None)
    }
}
