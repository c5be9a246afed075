use crate::app::algorithms::{
    ApplyAliasesParams, AuditParams, ExportGeopackageParams, ImportPostgresParams, MainColorParams,
    RestrictFieldsParams, RewriteDatasourcesParams, ValueRelationJoinsParams,
};
use crate::domain::model::PostgresConnection;
use crate::utils::error::{BatchError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// 設定檔內容：每個演算法上次使用的參數，以及具名的 PostgreSQL 連線
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredSettings {
    pub audit: AuditParams,
    pub rewrite_datasources: RewriteDatasourcesParams,
    pub apply_aliases: ApplyAliasesParams,
    pub restrict_fields: RestrictFieldsParams,
    pub add_joins: ValueRelationJoinsParams,
    pub main_color: MainColorParams,
    pub export_geopackage: ExportGeopackageParams,
    pub import_postgres: ImportPostgresParams,
    pub connections: BTreeMap<String, PostgresConnection>,
}

impl StoredSettings {
    /// 從 TOML 字串解析設定，`${VAR}` 以環境變數取代
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = substitute_env_vars(content);
        parse(&processed)
    }
}

fn parse(content: &str) -> Result<StoredSettings> {
    toml::from_str(content).map_err(|e| BatchError::InvalidConfigValueError {
        field: "settings".to_string(),
        value: String::new(),
        reason: format!("TOML parsing error: {}", e),
    })
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"))
}

/// 替換環境變數 (例如 ${PGPASSWORD})，未定義的變數保持原樣
pub fn substitute_env_vars(content: &str) -> String {
    env_var_pattern()
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
}

/// 綁定設定檔路徑的設定
///
/// 連線設定寫回時保留原始的 `${VAR}`，避免把密碼寫進檔案。
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    pub settings: StoredSettings,
    raw_connections: BTreeMap<String, PostgresConnection>,
}

impl SettingsStore {
    /// 載入設定檔；檔案不存在時使用預設值
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            tracing::debug!("Settings file {} not found, using defaults", path.display());
            return Ok(Self {
                path,
                settings: StoredSettings::default(),
                raw_connections: BTreeMap::new(),
            });
        }

        let content = fs::read_to_string(&path)?;
        let raw = parse(&content)?;
        let settings = StoredSettings::from_toml_str(&content)?;
        Ok(Self {
            path,
            settings,
            raw_connections: raw.connections,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        let mut stored = self.settings.clone();
        for (name, raw) in &self.raw_connections {
            stored.connections.insert(name.clone(), raw.clone());
        }
        let content = toml::to_string_pretty(&stored).map_err(|e| BatchError::InvalidConfigValueError {
            field: "settings".to_string(),
            value: self.path.display().to_string(),
            reason: format!("TOML serialization error: {}", e),
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, content)?;
        tracing::debug!("Settings saved to {}", self.path.display());
        Ok(())
    }

    /// 依名稱取得連線設定
    pub fn connection(&self, name: &str) -> Result<PostgresConnection> {
        self.settings
            .connections
            .get(name)
            .cloned()
            .ok_or_else(|| BatchError::InvalidConfigValueError {
                field: "connection".to_string(),
                value: name.to_string(),
                reason: format!(
                    "Unknown connection, defined connections: [{}]",
                    self.settings.connections.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SETTINGS: &str = r#"
[audit]
root_directory = "/data/projects"
output_projects_csv = "/tmp/projects.csv"
lizmap_properties = true

[rewrite_datasources]
search_text = "old-host"
replace_text = "new-host"

[connections.prod]
host = "db.example.com"
port = 5432
dbname = "gis"
user = "reader"
password = "${QGS_BATCH_TEST_PASSWORD}"

[connections.local]
service = "gis"
"#;

    #[test]
    fn test_parse_settings_with_defaults() {
        let settings = StoredSettings::from_toml_str(SETTINGS).unwrap();

        assert_eq!(settings.audit.root_directory, Some(PathBuf::from("/data/projects")));
        assert!(settings.audit.lizmap_properties);
        assert!(!settings.audit.resolve_layers);
        assert_eq!(settings.rewrite_datasources.search_text.as_deref(), Some("old-host"));
        assert!(settings.rewrite_datasources.ignore_case);
        assert_eq!(settings.import_postgres.primary_key, "GID");
        assert_eq!(settings.connections.len(), 2);
        assert_eq!(settings.connections["prod"].port, Some(5432));
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("QGS_BATCH_SUBSTITUTION_TEST", "secret");
        assert_eq!(
            substitute_env_vars("password = \"${QGS_BATCH_SUBSTITUTION_TEST}\""),
            "password = \"secret\""
        );
        assert_eq!(
            substitute_env_vars("${QGS_BATCH_UNDEFINED_VARIABLE}"),
            "${QGS_BATCH_UNDEFINED_VARIABLE}"
        );
        std::env::remove_var("QGS_BATCH_SUBSTITUTION_TEST");
    }

    #[test]
    fn test_invalid_toml_is_a_configuration_error() {
        let err = StoredSettings::from_toml_str("[audit\nroot_directory = 1").unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfigValueError { field, .. } if field == "settings"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::load(dir.path().join("missing.toml")).unwrap();
        assert_eq!(store.settings, StoredSettings::default());
        assert!(store.connection("prod").is_err());
    }

    #[test]
    fn test_save_keeps_placeholders_and_updates_parameters() {
        std::env::set_var("QGS_BATCH_TEST_PASSWORD", "s3cret");
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings").join("qgs-batch.toml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, SETTINGS).unwrap();

        let mut store = SettingsStore::load(&path).unwrap();
        assert_eq!(store.connection("prod").unwrap().password.as_deref(), Some("s3cret"));

        store.settings.audit.resolve_layers = true;
        store.save().unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("${QGS_BATCH_TEST_PASSWORD}"));
        assert!(!written.contains("s3cret"));

        let reloaded = SettingsStore::load(&path).unwrap();
        assert!(reloaded.settings.audit.resolve_layers);
        assert_eq!(reloaded.settings.rewrite_datasources.replace_text, "new-host");
        std::env::remove_var("QGS_BATCH_TEST_PASSWORD");
    }
}
