//! 共享库集成测试
//!
//! 覆盖指标记录函数、日志过滤器构建、配置加载与 Guard 生命周期。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use notif_shared::observability::metrics::{get_handle, record_broadcast, record_single_send};

    #[test]
    fn test_record_broadcast_without_recorder() {
        // 未安装 recorder 时记录为空操作
        record_broadcast("bulk", "success", 100, 0, 0.05);
        record_broadcast("bulk", "failed", 20, 20, 1.2);
        record_broadcast("per_recipient", "partial_failure", 50, 3, 0.4);
    }

    #[test]
    fn test_record_single_send_without_recorder() {
        record_single_send("success");
        record_single_send("failed");
        record_single_send("validation_failed");
    }

    #[test]
    fn test_handle_absent_before_init() {
        assert!(get_handle().is_none());
    }
}

// ============================================================================
// Tracing 测试
// ============================================================================

mod tracing_tests {
    use notif_shared::observability::tracing::build_env_filter;

    #[test]
    fn test_build_env_filter_with_directives() {
        let filter = build_env_filter("notif_dispatch=debug,info");
        let _ = filter.to_string();
    }
}

// ============================================================================
// 配置测试
// ============================================================================

mod config_tests {
    use notif_shared::config::{AppConfig, DeliveryMode, ObservabilityConfig};
    use std::path::Path;

    #[test]
    fn test_default_observability_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(!config.metrics_enabled);
        assert!(!config.json_logs());
    }

    #[test]
    fn test_env_overrides_nested_keys() {
        // SAFETY: 本文件中只有这个测试读取 NOTIF_ 前缀的环境变量
        unsafe {
            std::env::set_var("NOTIF_WEBHOOK__API_KEY", "from-env");
            std::env::set_var("NOTIF_DISPATCH__DELIVERY_MODE", "per_recipient");
        }

        let config =
            AppConfig::load_from("notif-broadcast", "test", Path::new("/nonexistent/notif"))
                .unwrap();

        unsafe {
            std::env::remove_var("NOTIF_WEBHOOK__API_KEY");
            std::env::remove_var("NOTIF_DISPATCH__DELIVERY_MODE");
        }

        assert_eq!(config.webhook.api_key, "from-env");
        assert_eq!(config.dispatch.delivery_mode, DeliveryMode::PerRecipient);
        assert_eq!(config.webhook.timeout_ms, 10_000);
    }
}

// ============================================================================
// Guard 测试
// ============================================================================

mod guard_tests {
    use notif_shared::observability::ObservabilityGuard;

    #[test]
    fn test_guard_drop() {
        // 多次创建和销毁空 guard
        for _ in 0..10 {
            let guard = ObservabilityGuard::empty();
            assert!(!guard.metrics_enabled());
            drop(guard);
        }
    }
}
