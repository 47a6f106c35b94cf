use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use mime_guess::from_path;
use walkdir::WalkDir;

use super::gen_id;
use crate::dto::request::FileMetadata;
use crate::error::{BreezeError, Result};

/// 净化对端提交的文件名
///
/// 只保留最后一个路径分量, 拒绝包含NUL或以`.`开头的名字,
/// 确保落盘文件不会逃出下载目录
///
/// # 参数
/// * `name` - offer中携带的原始文件名
///
/// # 返回
/// * `Result<String>` - 净化后的文件名或错误
pub fn sanitize_file_name(name: &str) -> Result<String> {
    // 同时按正斜杠与反斜杠切分, 取最后一个非空分量
    let last = name
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .next_back()
        .unwrap_or("");

    if last.is_empty() {
        return Err(BreezeError::InvalidFileName(name.to_string()));
    }
    if last.contains('\0') {
        return Err(BreezeError::InvalidFileName(name.to_string()));
    }
    if last.starts_with('.') {
        return Err(BreezeError::InvalidFileName(name.to_string()));
    }

    Ok(last.to_string())
}

/// 在目标目录内为文件名解决冲突
///
/// 若同名文件已存在, 在扩展名前追加`-N`, N取能避开冲突的最小正整数
///
/// # 参数
/// * `dir` - 下载目录
/// * `name` - 已净化的文件名
///
/// # 返回
/// * `PathBuf` - 实际可用的落盘路径
pub fn resolve_collision(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (name.to_string(), None),
    };

    let mut n = 1u32;
    loop {
        let numbered = match &ext {
            Some(ext) => format!("{}-{}.{}", stem, n, ext),
            None => format!("{}-{}", stem, n),
        };
        let candidate = dir.join(numbered);
        if !candidate.exists() {
            debug!("文件名冲突, 改用: {}", candidate.display());
            return candidate;
        }
        n += 1;
    }
}

/// 为单个本地文件构造传输元数据
///
/// # 参数
/// * `path` - 文件路径
///
/// # 返回
/// * `Result<FileMetadata>` - 元数据(新铸文件ID, 文件名, 大小, MIME提示)或错误
pub fn metadata_for_path<P: AsRef<Path>>(path: P) -> Result<FileMetadata> {
    let path = path.as_ref();
    let meta = fs::metadata(path)
        .map_err(|_| BreezeError::FileNotFound(path.display().to_string()))?;
    if !meta.is_file() {
        return Err(BreezeError::InvalidPath(format!(
            "not a regular file: {}",
            path.display()
        )));
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| BreezeError::InvalidPath(path.display().to_string()))?
        .to_string_lossy()
        .to_string();

    Ok(FileMetadata {
        id: gen_id::generate_file_id(),
        file_name,
        size: meta.len(),
        file_type: Some(from_path(path).first_or_octet_stream().to_string()),
    })
}

/// 将一组路径展开为待发送文件列表
///
/// 目录会被逐文件摊平(offer不携带目录结构, 同名文件由接收侧的冲突后缀处理)
///
/// # 参数
/// * `paths` - 文件或目录路径列表
///
/// # 返回
/// * `Result<Vec<(PathBuf, FileMetadata)>>` - 本地路径与其元数据的配对列表
pub fn expand_paths(paths: &[PathBuf]) -> Result<Vec<(PathBuf, FileMetadata)>> {
    let mut result = Vec::new();

    for path in paths {
        if !path.exists() {
            return Err(BreezeError::InvalidPath(format!(
                "path does not exist: {}",
                path.display()
            )));
        }

        if path.is_file() {
            result.push((path.clone(), metadata_for_path(path)?));
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.path().is_file() {
                    let meta = metadata_for_path(entry.path())?;
                    debug!("添加文件: {} ({} 字节)", meta.file_name, meta.size);
                    result.push((entry.path().to_path_buf(), meta));
                }
            }
        } else {
            return Err(BreezeError::InvalidPath(format!(
                "neither file nor directory: {}",
                path.display()
            )));
        }
    }

    if result.is_empty() {
        return Err(BreezeError::ValidationError(
            "no files to send".to_string(),
        ));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_keeps_final_component() {
        assert_eq!(sanitize_file_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(
            sanitize_file_name("../../etc/passwd").unwrap(),
            "passwd"
        );
        assert_eq!(sanitize_file_name("a/b/c.txt").unwrap(), "c.txt");
        assert_eq!(sanitize_file_name("C:\\temp\\x.bin").unwrap(), "x.bin");
    }

    #[test]
    fn test_sanitize_rejects_bad_names() {
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("///").is_err());
        assert!(sanitize_file_name(".hidden").is_err());
        assert!(sanitize_file_name("dir/.profile").is_err());
        assert!(sanitize_file_name("nul\0byte").is_err());
    }

    #[test]
    fn test_collision_suffix() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;

        // 第一次不冲突
        assert_eq!(
            resolve_collision(dir.path(), "report.pdf"),
            dir.path().join("report.pdf")
        );

        // 依次制造冲突
        File::create(dir.path().join("report.pdf"))?;
        assert_eq!(
            resolve_collision(dir.path(), "report.pdf"),
            dir.path().join("report-1.pdf")
        );

        File::create(dir.path().join("report-1.pdf"))?;
        assert_eq!(
            resolve_collision(dir.path(), "report.pdf"),
            dir.path().join("report-2.pdf")
        );

        // 无扩展名的情况
        File::create(dir.path().join("data"))?;
        assert_eq!(
            resolve_collision(dir.path(), "data"),
            dir.path().join("data-1")
        );

        Ok(())
    }

    #[test]
    fn test_metadata_for_path() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("hello.txt");
        File::create(&file_path)?.write_all(b"Hello, world!")?;

        let meta = metadata_for_path(&file_path)?;
        assert_eq!(meta.file_name, "hello.txt");
        assert_eq!(meta.size, 13);
        assert_eq!(meta.file_type.as_deref(), Some("text/plain"));
        assert!(!meta.id.is_empty());

        Ok(())
    }

    #[test]
    fn test_expand_paths_flattens_directories(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        File::create(dir.path().join("a.txt"))?.write_all(b"A")?;
        let sub = dir.path().join("sub");
        fs::create_dir(&sub)?;
        File::create(sub.join("b.txt"))?.write_all(b"BB")?;

        let files = expand_paths(&[dir.path().to_path_buf()])?;
        assert_eq!(files.len(), 2);
        let names: Vec<_> = files.iter().map(|(_, m)| m.file_name.as_str()).collect();
        assert!(names.contains(&"a.txt"));
        assert!(names.contains(&"b.txt"));

        // 空目录没有可发送文件
        let empty = tempdir()?;
        assert!(expand_paths(&[empty.path().to_path_buf()]).is_err());

        Ok(())
    }
}
