use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 清單型欄位在 CSV 中的分隔字元
pub const LIST_SEPARATOR: &str = "|";

/// 演算法執行結果，最後以 JSON 輸出
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmOutput {
    #[serde(flatten)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

impl AlgorithmOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}

/// 加入清單，已存在則略過，保持插入順序
pub fn push_unique(list: &mut Vec<String>, value: &str) -> bool {
    if list.iter().any(|v| v == value) {
        return false;
    }
    list.push(value.to_string());
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasourceEntry {
    pub layer_names: Vec<String>,
    pub projects: Vec<String>,
}

/// 資料來源字串 → 圖層名稱與專案
#[derive(Debug, Clone, Default)]
pub struct DatasourceIndex {
    entries: BTreeMap<String, DatasourceEntry>,
}

impl DatasourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, datasource: &str, layer_name: &str, project: &str) {
        let entry = self.entries.entry(datasource.to_string()).or_default();
        push_unique(&mut entry.layer_names, layer_name);
        push_unique(&mut entry.projects, project);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 依資料來源字串排序
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DatasourceEntry)> {
        self.entries.iter()
    }
}

/// 資料庫表格識別字 `"schema"."table"` → 專案
#[derive(Debug, Clone, Default)]
pub struct TableIndex {
    entries: BTreeMap<String, Vec<String>>,
}

impl TableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, table: &str, project: &str) {
        let projects = self.entries.entry(table.to_string()).or_default();
        push_unique(projects, project);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }
}

/// PostgreSQL 連線設定，`service` 有值時優先使用
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Lizmap 設定檔 (`*.qgs.cfg`) 的 metadata 區段
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LizmapMetadata {
    #[serde(default)]
    pub qgis_desktop_version: Option<serde_json::Value>,
    #[serde(default)]
    pub lizmap_plugin_version: Option<serde_json::Value>,
    #[serde(default)]
    pub lizmap_web_client_target_version: Option<serde_json::Value>,
    #[serde(default)]
    pub project_valid: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LizmapProperties {
    pub has_config: bool,
    pub metadata: LizmapMetadata,
}

/// 專案稽核的一列結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectAudit {
    pub path: String,
    pub basename: String,
    pub last_modified: String,
    pub crs: String,
    pub layer_count: usize,
    pub invalid_layer_count: Option<usize>,
    pub memory_usage_mb: Option<f64>,
    pub print_layout_count: usize,
    pub picture_paths: Vec<String>,
    pub picture_sizes: Vec<u64>,
    pub pictures_total_size: u64,
    pub trust_option_active: bool,
    pub last_save_version: String,
    pub lizmap: Option<LizmapProperties>,
}

impl ProjectAudit {
    pub fn pictures_total_size_mb(&self) -> f64 {
        self.pictures_total_size as f64 / 1024.0 / 1024.0
    }
}
