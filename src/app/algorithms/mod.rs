pub mod apply_aliases;
pub mod audit;
pub mod export_geopackage;
pub mod import_postgres;
pub mod main_color;
pub mod restrict_fields;
pub mod rewrite_datasources;
pub mod value_relation_joins;

pub use apply_aliases::{ApplyAliases, ApplyAliasesParams};
pub use audit::{AuditParams, AuditProjects};
pub use export_geopackage::{ExportGeopackage, ExportGeopackageParams};
pub use import_postgres::{ImportPostgres, ImportPostgresParams};
pub use main_color::{MainColor, MainColorParams};
pub use restrict_fields::{RestrictFields, RestrictFieldsParams};
pub use rewrite_datasources::{RewriteDatasources, RewriteDatasourcesParams};
pub use value_relation_joins::{ValueRelationJoins, ValueRelationJoinsParams};

use crate::core::project::QgisProject;
use crate::domain::model::AlgorithmOutput;
use crate::domain::ports::Feedback;
use crate::utils::error::{BatchError, Result};

pub(crate) fn check_canceled(feedback: &dyn Feedback) -> Result<()> {
    if feedback.is_canceled() {
        return Err(BatchError::Canceled);
    }
    Ok(())
}

pub(crate) fn report_progress(feedback: &dyn Feedback, done: usize, total: usize) {
    if total > 0 {
        feedback.set_progress(100.0 * done as f64 / total as f64);
    }
}

/// 同一次執行的所有備份共用同一個時間戳記
pub(crate) fn run_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// 逗號分隔清單，去除空白與空項目
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// 有失敗項目時回傳 `PartialFailure`，否則回傳結果
pub(crate) fn finish(algorithm: &str, failed: Vec<String>, output: AlgorithmOutput) -> Result<AlgorithmOutput> {
    if failed.is_empty() {
        Ok(output)
    } else {
        Err(BatchError::PartialFailure {
            algorithm: algorithm.to_string(),
            failed,
        })
    }
}

/// 被選取圖層的 ID；沒有任何圖層時為設定錯誤
pub(crate) fn selected_layer_ids(project: &QgisProject, selectors: &[String]) -> Result<Vec<String>> {
    let ids: Vec<String> = project
        .select_layers(selectors)
        .iter()
        .map(|layer| layer.id())
        .collect();
    if ids.is_empty() {
        return Err(BatchError::config(format!(
            "No vector layer of {} matches the selection [{}]",
            project.path().display(),
            selectors.join(", ")
        )));
    }
    Ok(ids)
}

/// 專案是否以 3.16 以後的版本存檔 (使用欄位 configurationFlags)
pub(crate) fn uses_field_flags(project: &QgisProject) -> bool {
    project
        .last_save_version()
        .map(|v| v.uses_field_configuration_flags())
        .unwrap_or(true)
}
