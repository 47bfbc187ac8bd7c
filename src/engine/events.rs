// ==========================================
// 抽签分配引擎 - 引擎层审计事件
// ==========================================
// 职责: 定义审计事件输出 trait，实现依赖倒置
// 说明: Engine 层定义 trait，Service 层实现持久化适配器
// ==========================================

use crate::domain::audit::AuditType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// 审计事件
// ==========================================

/// 审计事件
///
/// Engine 层产生的事件，由 AuditSink 写入持久化存储
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// 执行 ID
    pub execution_uuid: String,
    /// 记录类型
    pub audit_type: AuditType,
    /// 结构化负载
    pub payload: JsonValue,
}

impl AuditEvent {
    pub fn new(execution_uuid: impl Into<String>, audit_type: AuditType, payload: JsonValue) -> Self {
        Self {
            execution_uuid: execution_uuid.into(),
            audit_type,
            payload,
        }
    }

    /// 求解器自定义事件（CUSTOM）
    pub fn custom(execution_uuid: impl Into<String>, payload: JsonValue) -> Self {
        Self::new(execution_uuid, AuditType::Custom, payload)
    }
}

// ==========================================
// 审计输出 Trait
// ==========================================

/// 审计事件输出
///
/// Engine 层定义，Service 层实现（写入 lottery_audit 表）
///
/// # 实现说明
/// - 同一 execution_uuid 的事件按写入顺序即为执行顺序
/// - 写入失败不应吞掉，调用方决定是否中止
pub trait AuditSink: Send + Sync {
    /// 记录审计事件
    ///
    /// # 参数
    /// - `event`: 审计事件
    ///
    /// # 返回
    /// - `Ok(())`: 写入成功
    /// - `Err`: 写入失败
    fn record(&self, event: AuditEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作审计输出
///
/// 用于不需要审计的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpAuditSink;

impl AuditSink for NoOpAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpAuditSink: 跳过审计记录 - execution_uuid={}, audit_type={}",
            event.execution_uuid,
            event.audit_type.as_str()
        );
        Ok(())
    }
}

/// 内存审计输出
///
/// 收集事件供测试断言
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录事件快照
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// 指定类型的事件
    pub fn events_of(&self, audit_type: AuditType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.audit_type == audit_type)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| format!("审计缓冲区锁获取失败: {}", e))?;
        events.push(event);
        Ok(())
    }
}
