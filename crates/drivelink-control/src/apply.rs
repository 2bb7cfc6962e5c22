//! 配置下发
//!
//! 严格按给定顺序写入，遇到第一个失败立即中止（后续写入可能依赖前面的模式切换生效）。

use crate::config::{ConfigProfile, Setting};
use crate::error::ControlError;
use drivelink_driver::NodeClient;
use tracing::{debug, info, warn};

/// 持久化配置使用的函数端点
pub const SAVE_CONFIGURATION_ENDPOINT: &str = "save_configuration";

/// 下发选项
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApplyOptions {
    /// 每次写入后回读校验
    pub verify: bool,
    /// 先读当前值，已在容差内则跳过写入
    pub skip_unchanged: bool,
    /// 浮点比较的绝对容差
    pub tolerance: f64,
    /// 全部成功后调用 `save_configuration`
    pub save: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            verify: false,
            skip_unchanged: false,
            tolerance: 1e-2,
            save: false,
        }
    }
}

impl ApplyOptions {
    /// 读 → 比较 → 写 → 回读
    pub fn verified() -> Self {
        Self {
            verify: true,
            skip_unchanged: true,
            ..Self::default()
        }
    }
}

/// 下发结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub written: usize,
    pub skipped: usize,
    pub saved: bool,
}

/// 按顺序写入全部配置项（fail-fast）
pub fn apply_configuration<C: NodeClient + ?Sized>(
    client: &C,
    node_id: u8,
    settings: &[Setting],
) -> Result<ApplyReport, ControlError> {
    apply_configuration_with(client, node_id, settings, &ApplyOptions::default())
}

pub fn apply_configuration_with<C: NodeClient + ?Sized>(
    client: &C,
    node_id: u8,
    settings: &[Setting],
    options: &ApplyOptions,
) -> Result<ApplyReport, ControlError> {
    let mut report = ApplyReport::default();

    for (index, setting) in settings.iter().enumerate() {
        let path = setting.path.as_str();
        let value = setting.value.to_value(path)?;
        let fail = |source| ControlError::Setting {
            node_id,
            index,
            path: path.to_string(),
            source,
        };

        if options.skip_unchanged {
            let current = client.read(node_id, path).map_err(fail)?;
            if current.approx_eq(&value, options.tolerance) {
                debug!("node {} - {:50} already set ({})", node_id, path, current);
                report.skipped += 1;
                continue;
            }
        }

        if let Err(e) = client.write(node_id, path, value) {
            warn!("node {} - {:50} write failed: {}", node_id, path, e);
            return Err(fail(e));
        }

        if options.verify {
            let actual = client.read(node_id, path).map_err(fail)?;
            if !actual.approx_eq(&value, options.tolerance) {
                warn!(
                    "node {} - {:50} verification failed (wrote {}, read {})",
                    node_id, path, value, actual
                );
                return Err(ControlError::VerifyFailed {
                    node_id,
                    path: path.to_string(),
                    expected: value,
                    actual,
                });
            }
        }

        info!("node {} - {:50} = {}", node_id, path, value);
        report.written += 1;
    }

    if options.save {
        client.call(node_id, SAVE_CONFIGURATION_ENDPOINT)?;
        info!("node {}: configuration saved", node_id);
        report.saved = true;
    }

    Ok(report)
}

/// 下发一个配置档；配置档的 `save` 与选项中的 `save` 任一为真即持久化
pub fn apply_profile<C: NodeClient + ?Sized>(
    client: &C,
    node_id: u8,
    profile: &ConfigProfile,
    options: &ApplyOptions,
) -> Result<ApplyReport, ControlError> {
    let options = ApplyOptions {
        save: options.save || profile.save,
        ..*options
    };
    apply_configuration_with(client, node_id, &profile.settings, &options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeClient;
    use drivelink_driver::DriverError;
    use drivelink_protocol::Value;

    #[test]
    fn test_fail_fast_stops_at_first_failure() {
        let client = FakeClient::new();
        let settings = vec![
            Setting::new("axis0.config.motor.pole_pairs", 20i64),
            Setting::new("axis0.config.motor.torque_constant", 0.92),
            // 分数无法表示为 uint8
            Setting::new("axis0.controller.config.control_mode", 2.5),
            Setting::new("axis0.controller.config.vel_limit", 20.0),
        ];

        let err = apply_configuration(&client, 1, &settings).unwrap_err();
        match err {
            ControlError::Setting {
                index,
                ref path,
                ref source,
                ..
            } => {
                assert_eq!(index, 2);
                assert_eq!(path, "axis0.controller.config.control_mode");
                assert!(matches!(source, DriverError::TypeMismatch { .. }));
            },
            ref other => panic!("unexpected error: {other}"),
        }

        let writes = client.writes.lock();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1, "axis0.config.motor.pole_pairs");
        assert_eq!(writes[1].1, "axis0.config.motor.torque_constant");
    }

    #[test]
    fn test_writes_issued_in_order() {
        let client = FakeClient::new();
        let settings = vec![
            Setting::new("axis0.controller.config.control_mode", 3i64),
            Setting::new("config.brake_resistor0.enable", true),
            Setting::new("axis0.controller.config.vel_limit", 20i64),
        ];
        let report = apply_configuration(&client, 4, &settings).unwrap();
        assert_eq!(report.written, 3);
        assert!(!report.saved);

        let order: Vec<_> = client.writes.lock().iter().map(|w| w.1.clone()).collect();
        assert_eq!(
            order,
            vec![
                "axis0.controller.config.control_mode",
                "config.brake_resistor0.enable",
                "axis0.controller.config.vel_limit"
            ]
        );
        assert!(client.reads.lock().is_empty());
    }

    #[test]
    fn test_skip_unchanged_within_tolerance() {
        let client = FakeClient::new()
            .with_value(1, "axis0.config.motor.torque_constant", 0.921f32)
            .with_value(1, "axis0.config.motor.pole_pairs", 7u32);
        let settings = vec![
            Setting::new("axis0.config.motor.torque_constant", 0.92),
            Setting::new("axis0.config.motor.pole_pairs", 20i64),
        ];

        let report =
            apply_configuration_with(&client, 1, &settings, &ApplyOptions::verified()).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.written, 1);
        assert_eq!(client.writes.lock().len(), 1);
        assert_eq!(
            client.values.lock()[&(1, "axis0.config.motor.pole_pairs".to_string())],
            Value::Uint32(20)
        );
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let client = FakeClient::new();
        client
            .tampered
            .lock()
            .insert("axis0.controller.config.vel_limit".to_string(), Value::Float32(5.0));
        let settings = vec![
            Setting::new("axis0.controller.config.vel_limit", 20.0),
            Setting::new("axis0.config.motor.pole_pairs", 20i64),
        ];
        let options = ApplyOptions {
            verify: true,
            ..ApplyOptions::default()
        };

        let err = apply_configuration_with(&client, 1, &settings, &options).unwrap_err();
        assert!(matches!(err, ControlError::VerifyFailed { .. }));
        assert_eq!(client.writes.lock().len(), 1);
    }

    #[test]
    fn test_profile_save_only_after_success() {
        let client = FakeClient::new();
        let profile = ConfigProfile {
            save: true,
            settings: vec![Setting::new("axis0.config.motor.pole_pairs", 20i64)],
        };
        let report = apply_profile(&client, 2, &profile, &ApplyOptions::default()).unwrap();
        assert!(report.saved);
        assert_eq!(
            client.calls.lock().as_slice(),
            &[(2, SAVE_CONFIGURATION_ENDPOINT.to_string())]
        );

        // 节点无应答：不持久化
        let client = FakeClient::new();
        client.silent.lock().insert(2);
        assert!(apply_profile(&client, 2, &profile, &ApplyOptions::default()).is_err());
        assert!(client.calls.lock().is_empty());
    }
}
