//! 历史表命名
//!
//! 表名由（设备名, 点位名）确定性推导，可随时重新计算，无需只信任已存储的引用。
//! 留存清理与存储管理共用同一函数。

/// 默认表名前缀
pub const DEFAULT_TABLE_PREFIX: &str = "hist";

/// PostgreSQL 标识符长度上限（字节）
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// 超长或含非 ASCII 字符的名称附加的摘要长度
const DIGEST_LEN: usize = 8;

/// 使用默认前缀计算表名
pub fn table_name(device_name: &str, point_name: &str) -> String {
    prefixed_table_name(DEFAULT_TABLE_PREFIX, device_name, point_name)
}

/// 计算表名：小写，连续的非字母数字字符折叠为单个 `_`，去掉首尾 `_`。
///
/// 超过 63 字节时截断，并追加完整名称的 uuid-v5 摘要，保证唯一且稳定。
/// 原名中含非 ASCII 字符时，这些字符无法保留，同样追加原始（设备名, 点位名）的摘要。
pub fn prefixed_table_name(prefix: &str, device_name: &str, point_name: &str) -> String {
    let raw = format!("{}_{}_{}", prefix, device_name, point_name);
    let lossy = !raw.is_ascii();
    let mut name = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !name.is_empty() {
                name.push('_');
            }
            pending_separator = false;
            name.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    if !lossy && name.len() <= MAX_IDENTIFIER_LEN {
        return name;
    }
    let source = if lossy {
        format!("{}\u{1f}{}\u{1f}{}", prefix, device_name, point_name)
    } else {
        name.clone()
    };
    let digest = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, source.as_bytes())
        .simple()
        .to_string();
    let keep = name.len().min(MAX_IDENTIFIER_LEN - DIGEST_LEN - 1);
    let mut truncated = name[..keep].to_string();
    while truncated.ends_with('_') {
        truncated.pop();
    }
    format!("{}_{}", truncated, &digest[..DIGEST_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_separators() {
        assert_eq!(table_name("Device-1234", "Temp Sensor #1"), "hist_device_1234_temp_sensor_1");
        assert_eq!(table_name("  AHU__1 ", "--SAT--"), "hist_ahu_1_sat");
    }

    #[test]
    fn test_non_ascii_names_keep_digest() {
        let co2 = prefixed_table_name("h", "B1/F2", "CO₂ ppm");
        assert!(co2.starts_with("h_b1_f2_co_ppm_"));
        assert_eq!(co2.len(), "h_b1_f2_co_ppm_".len() + DIGEST_LEN);
        assert_ne!(co2, prefixed_table_name("h", "B1/F2", "CO ppm"));

        let supply = table_name("空调一号", "送风温度");
        let humidity = table_name("冷机", "湿度");
        assert_ne!(supply, humidity);
        assert_ne!(table_name("空调一号", "送风温度"), table_name("空调一号", "回风湿度"));
        assert!(supply.starts_with("hist_"));
        assert_eq!(supply.len(), "hist_".len() + DIGEST_LEN);
        assert_eq!(supply, table_name("空调一号", "送风温度"));
    }

    #[test]
    fn test_long_names_stay_unique() {
        let device = "Main Building Chiller Plant Primary Loop";
        let a = table_name(device, "Condenser Water Supply Temperature Sensor A");
        let b = table_name(device, "Condenser Water Supply Temperature Sensor B");
        assert!(a.len() <= MAX_IDENTIFIER_LEN);
        assert!(b.len() <= MAX_IDENTIFIER_LEN);
        assert_ne!(a, b);
        assert_eq!(a, table_name(device, "Condenser Water Supply Temperature Sensor A"));
    }
}
