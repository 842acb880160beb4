//! 结果聚合
//!
//! 按接收人下标合并验证失败与投递报告，生成最终的广播结果。
//! 每个接收人最多对应一条失败记录，失败列表按输入顺序排列。

use std::time::Instant;

use chrono::Utc;

use crate::delivery::DeliveryReport;
use crate::fanout::ValidationFailure;
use crate::types::{
    BroadcastResult, BroadcastStatus, DeliveryMode, DeliveryOutcome, FailureReason,
    RecipientFailure,
};

/// 单次广播的元信息
#[derive(Debug, Clone)]
pub struct BroadcastMeta {
    pub broadcast_id: String,
    pub mode: DeliveryMode,
    /// 参与本次广播的接收人数量
    pub attempted: usize,
    pub started_at: Instant,
}

/// 根据成功数与失败数判定整体状态
pub fn status_for(succeeded: usize, failures: usize) -> BroadcastStatus {
    if failures == 0 {
        BroadcastStatus::Success
    } else if succeeded == 0 {
        BroadcastStatus::Failed
    } else {
        BroadcastStatus::PartialFailure
    }
}

fn transport_failure(
    index: usize,
    recipient_id: Option<String>,
    detail: String,
) -> RecipientFailure {
    RecipientFailure {
        index,
        recipient_id,
        reason: FailureReason::TransportFailure { detail },
    }
}

/// 合并验证失败与投递报告
pub fn aggregate(
    meta: BroadcastMeta,
    validation_failures: Vec<ValidationFailure>,
    report: DeliveryReport,
) -> BroadcastResult {
    let succeeded = report.delivered_count();

    let mut failures: Vec<RecipientFailure> = validation_failures
        .into_iter()
        .map(|f| RecipientFailure {
            index: f.index,
            recipient_id: f.recipient_id,
            reason: FailureReason::ValidationFailure { field: f.field },
        })
        .collect();

    match report {
        DeliveryReport::Skipped => {}
        DeliveryReport::Bulk {
            targets,
            outcome: DeliveryOutcome::TransportError(detail),
        } => {
            failures.extend(targets.into_iter().map(|(index, recipient_id)| {
                transport_failure(index, recipient_id, detail.clone())
            }));
        }
        DeliveryReport::Bulk { .. } => {}
        DeliveryReport::PerRecipient(deliveries) => {
            failures.extend(deliveries.into_iter().filter_map(|d| match d.outcome {
                DeliveryOutcome::Ok => None,
                DeliveryOutcome::TransportError(detail) => {
                    Some(transport_failure(d.index, d.recipient_id, detail))
                }
            }));
        }
    }

    // 两组失败各自有序，合并后按下标重新排序
    failures.sort_by_key(|f| f.index);

    BroadcastResult {
        status: status_for(succeeded, failures.len()),
        broadcast_id: meta.broadcast_id,
        mode: meta.mode,
        attempted: meta.attempted,
        succeeded,
        failures,
        duration_ms: meta.started_at.elapsed().as_millis() as u64,
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::RecipientDelivery;
    use crate::types::PayloadField;

    fn meta(mode: DeliveryMode, attempted: usize) -> BroadcastMeta {
        BroadcastMeta {
            broadcast_id: "b-1".to_string(),
            mode,
            attempted,
            started_at: Instant::now(),
        }
    }

    fn invalid(index: usize, id: &str, field: PayloadField) -> ValidationFailure {
        ValidationFailure {
            index,
            recipient_id: Some(id.to_string()),
            field,
        }
    }

    fn delivered(index: usize, id: &str, outcome: DeliveryOutcome) -> RecipientDelivery {
        RecipientDelivery {
            index,
            recipient_id: Some(id.to_string()),
            outcome,
        }
    }

    #[test]
    fn test_status_rules() {
        assert_eq!(status_for(3, 0), BroadcastStatus::Success);
        assert_eq!(status_for(0, 3), BroadcastStatus::Failed);
        assert_eq!(status_for(2, 1), BroadcastStatus::PartialFailure);
    }

    #[test]
    fn test_all_delivered_is_success() {
        let report = DeliveryReport::Bulk {
            targets: vec![(0, Some("a".to_string())), (1, Some("b".to_string()))],
            outcome: DeliveryOutcome::Ok,
        };

        let result = aggregate(meta(DeliveryMode::Bulk, 2), Vec::new(), report);

        assert!(result.is_success());
        assert_eq!(result.succeeded, 2);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_bulk_failure_marks_every_target() {
        let report = DeliveryReport::Bulk {
            targets: vec![(0, Some("a".to_string())), (2, Some("c".to_string()))],
            outcome: DeliveryOutcome::TransportError("timeout".to_string()),
        };
        let validation = vec![invalid(1, "b", PayloadField::Icon)];

        let result = aggregate(meta(DeliveryMode::Bulk, 3), validation, report);

        assert_eq!(result.status, BroadcastStatus::Failed);
        assert_eq!(result.succeeded, 0);
        let indices: Vec<_> = result.failures.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(result.transport_failures().all(|f| f.reason
            == FailureReason::TransportFailure {
                detail: "timeout".to_string()
            }));
    }

    #[test]
    fn test_merges_in_input_order() {
        let validation = vec![
            invalid(1, "b", PayloadField::Icon),
            invalid(4, "e", PayloadField::Path),
        ];
        let report = DeliveryReport::PerRecipient(vec![
            delivered(0, "a", DeliveryOutcome::Ok),
            delivered(2, "c", DeliveryOutcome::TransportError("503".to_string())),
            delivered(3, "d", DeliveryOutcome::Ok),
        ]);

        let result = aggregate(meta(DeliveryMode::PerRecipient, 5), validation, report);

        assert_eq!(result.status, BroadcastStatus::PartialFailure);
        assert_eq!(result.succeeded, 2);
        let ids: Vec<_> = result
            .failures
            .iter()
            .map(|f| f.recipient_id.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(ids, vec!["b", "c", "e"]);
        assert_eq!(result.attempted, 5);
    }

    #[test]
    fn test_all_invalid_is_failed() {
        let validation = vec![
            invalid(0, "a", PayloadField::Icon),
            invalid(1, "b", PayloadField::Icon),
        ];

        let result = aggregate(
            meta(DeliveryMode::Bulk, 2),
            validation,
            DeliveryReport::Skipped,
        );

        assert_eq!(result.status, BroadcastStatus::Failed);
        assert_eq!(result.failure_count(), 2);
        assert_eq!(result.transport_failures().count(), 0);
    }
}
