use crate::utils::error::{BatchError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 檔名萬用字元 (`*`、`?`)，例如 `*.qgs,*.qgz`
#[derive(Debug, Clone)]
pub struct FilePatterns {
    patterns: Vec<Regex>,
}

impl FilePatterns {
    pub fn parse(list: &str) -> Result<Self> {
        let mut patterns = Vec::new();
        for pattern in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut source = String::from("^");
            for c in pattern.chars() {
                match c {
                    '*' => source.push_str(".*"),
                    '?' => source.push('.'),
                    other => source.push_str(&regex::escape(&other.to_string())),
                }
            }
            source.push('$');
            let regex = Regex::new(&source).map_err(|e| BatchError::InvalidConfigValueError {
                field: "file_patterns".to_string(),
                value: pattern.to_string(),
                reason: e.to_string(),
            })?;
            patterns.push(regex);
        }

        if patterns.is_empty() {
            return Err(BatchError::InvalidConfigValueError {
                field: "file_patterns".to_string(),
                value: list.to_string(),
                reason: "At least one file pattern is required".to_string(),
            });
        }

        Ok(Self { patterns })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(file_name))
    }
}

/// 專案檔副檔名 `qg?` (qgs、qgz…)
pub fn is_project_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.len() == 3 && ext.starts_with("qg"))
        .unwrap_or(false)
}

fn sort_case_insensitive(files: &mut Vec<PathBuf>) {
    files.sort_by_cached_key(|p| p.to_string_lossy().to_lowercase());
    files.dedup();
}

/// 遞迴列出目錄下所有專案檔，路徑不分大小寫排序
pub fn find_project_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_project_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    sort_case_insensitive(&mut files);
    files
}

/// 列出符合檔名樣式的檔案，`recurse` 為 false 時只看第一層
pub fn collect_files(folder: &Path, patterns: &FilePatterns, recurse: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(folder).min_depth(1).follow_links(false);
    if !recurse {
        walker = walker.max_depth(1);
    }

    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| patterns.matches(name))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();

    sort_case_insensitive(&mut files);
    files
}
