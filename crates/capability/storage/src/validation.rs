//! 验证辅助函数
//!
//! 历史表名与视图名会被拼接进 DDL/DML，执行前必须通过 [`ensure_identifier`]；
//! 设备名、点位名作为标签写入视图定义时使用 [`quote_literal`]。

use crate::error::StorageError;
use crate::naming::MAX_IDENTIFIER_LEN;

/// 验证 SQL 标识符：仅小写字母、数字、下划线，非数字开头，长度不超过 63 字节。
pub fn ensure_identifier(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        && !name.as_bytes()[0].is_ascii_digit();
    if !valid {
        return Err(StorageError::new(format!("invalid identifier: {:?}", name)));
    }
    Ok(())
}

/// 转义为 SQL 字符串字面量
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
