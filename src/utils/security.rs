use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// 计算证书的SHA-256指纹
///
/// 返回十六进制格式、冒号分隔的指纹字符串
pub fn calculate_cert_fingerprint(cert_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert_data);
    let result = hasher.finalize();

    result
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<String>>()
        .join(":")
}

/// 确保自签名证书存在, 返回证书路径、私钥路径与证书指纹
///
/// 证书不存在时自动生成并保存到`cert_dir`下, 以便下次启动时重用
pub fn ensure_certificate(cert_dir: &Path) -> Result<(PathBuf, PathBuf, String)> {
    let cert_path = cert_dir.join("cert.pem");
    let key_path = cert_dir.join("key.pem");

    if cert_path.exists() && key_path.exists() {
        let cert_data = fs::read(&cert_path)?;
        let fingerprint = calculate_cert_fingerprint(&cert_data);
        info!("复用现有证书, 指纹: {}", fingerprint);
        return Ok((cert_path, key_path, fingerprint));
    }

    info!("未找到现有证书, 开始生成新的自签名证书...");
    if !cert_dir.exists() {
        fs::create_dir_all(cert_dir)?;
    }

    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])?;
    let cert_pem = cert.serialize_pem()?;
    let key_pem = cert.serialize_private_key_pem();

    fs::write(&cert_path, &cert_pem)?;
    info!("证书已保存至: {}", cert_path.display());

    fs::write(&key_path, &key_pem)?;
    info!("私钥已保存至: {}", key_path.display());

    let fingerprint = calculate_cert_fingerprint(cert_pem.as_bytes());
    info!("证书指纹: {}", fingerprint);

    Ok((cert_path, key_path, fingerprint))
}
