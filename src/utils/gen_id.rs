use uuid::Uuid;

/// 生成实例指纹(128位随机token的UUID字符串形式)
pub fn generate_fingerprint() -> String {
    Uuid::new_v4().to_string()
}

/// 生成会话ID
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// 生成文件ID
pub fn generate_file_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generate_session_id()));
        }
    }
}
