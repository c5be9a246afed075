//! 由 CSV 表格套用欄位別名

use super::{check_canceled, report_progress, run_timestamp, selected_layer_ids};
use crate::core::layer::{set_alias, MapLayer};
use crate::core::project::QgisProject;
use crate::domain::model::AlgorithmOutput;
use crate::domain::ports::{Algorithm, Feedback};
use crate::utils::error::{BatchError, Result};
use crate::utils::validation::{validate_existing_file, validate_required_field, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyAliasesParams {
    pub project: Option<PathBuf>,
    /// 圖層名稱或 ID，空白代表全部向量圖層
    pub layers: Vec<String>,
    pub table: Option<PathBuf>,
    pub name_column: Option<String>,
    pub alias_column: Option<String>,
    /// 只填入尚未設定的別名
    pub only_empty: bool,
    pub create_backup: bool,
}

impl Default for ApplyAliasesParams {
    fn default() -> Self {
        Self {
            project: None,
            layers: Vec::new(),
            table: None,
            name_column: None,
            alias_column: None,
            only_empty: true,
            create_backup: true,
        }
    }
}

impl Validate for ApplyAliasesParams {
    fn validate(&self) -> Result<()> {
        validate_existing_file("project", validate_required_field("project", &self.project)?)?;
        validate_existing_file("table", validate_required_field("table", &self.table)?)?;
        let name_column = validate_required_field("name_column", &self.name_column)?;
        let alias_column = validate_required_field("alias_column", &self.alias_column)?;
        if name_column == alias_column {
            return Err(BatchError::InvalidConfigValueError {
                field: "alias_column".to_string(),
                value: alias_column.clone(),
                reason: "The alias column must be different from the field name column".to_string(),
            });
        }
        Ok(())
    }
}

/// 讀取 (欄位名稱, 別名) 對照表，略過欄位名稱為空的列
pub fn read_alias_table(path: &Path, name_column: &str, alias_column: &str) -> Result<Vec<(String, String)>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let position = |column: &str| {
        headers
            .iter()
            .position(|h| h.trim() == column)
            .ok_or_else(|| BatchError::InvalidConfigValueError {
                field: "table".to_string(),
                value: path.display().to_string(),
                reason: format!("Column '{}' not found in [{}]", column, headers.iter().collect::<Vec<_>>().join(", ")),
            })
    };
    let name_index = position(name_column)?;
    let alias_index = position(alias_column)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let name = record.get(name_index).unwrap_or("").trim();
        if name.is_empty() {
            continue;
        }
        let alias = record.get(alias_index).unwrap_or("").trim();
        rows.push((name.to_string(), alias.to_string()));
    }
    Ok(rows)
}

pub struct ApplyAliases {
    params: ApplyAliasesParams,
}

impl ApplyAliases {
    pub fn new(params: ApplyAliasesParams) -> Self {
        Self { params }
    }
}

impl Algorithm for ApplyAliases {
    fn name(&self) -> &'static str {
        "apply_aliases"
    }

    fn display_name(&self) -> &'static str {
        "Apply aliases on layer fields from a CSV table"
    }

    fn process(&self, feedback: &dyn Feedback) -> Result<AlgorithmOutput> {
        self.params.validate()?;
        let project_path = validate_required_field("project", &self.params.project)?;
        let table = validate_required_field("table", &self.params.table)?;
        let name_column = validate_required_field("name_column", &self.params.name_column)?;
        let alias_column = validate_required_field("alias_column", &self.params.alias_column)?;

        let rows = read_alias_table(table, name_column, alias_column)?;
        feedback.push_info(&format!("{} alias(es) read from {}", rows.len(), table.display()));

        let mut project = QgisProject::open(project_path)?;
        let layer_ids = selected_layer_ids(&project, &self.params.layers)?;
        let total = layer_ids.len();
        let mut updated = 0;

        for (current, layer_id) in layer_ids.iter().enumerate() {
            check_canceled(feedback)?;
            let Some(element) = project.layer_element_mut(layer_id) else {
                continue;
            };
            let layer_name = MapLayer::new(element).name();
            feedback.push_info(&format!("Processing layer '{}'", layer_name));

            for (field, alias) in &rows {
                let (has_field, current_alias) = {
                    let layer = MapLayer::new(element);
                    (layer.has_field(field), layer.alias(field))
                };
                if !has_field {
                    continue;
                }
                if !current_alias.is_empty() && self.params.only_empty {
                    feedback.push_debug(&format!(
                        "{}.{} already has the alias '{}', skipped",
                        layer_name, field, current_alias
                    ));
                    continue;
                }
                if set_alias(element, field, alias) {
                    feedback.push_debug(&format!("{}.{} -> '{}'", layer_name, field, alias));
                    updated += 1;
                }
            }
            report_progress(feedback, current + 1, total);
        }

        if updated > 0 {
            project.save(run_timestamp(), self.params.create_backup)?;
            feedback.push_info(&format!("{} alias(es) updated, project saved", updated));
        } else {
            feedback.push_info("No alias to update, the project is left untouched");
        }

        Ok(AlgorithmOutput::new()
            .with("layer_count", total)
            .with("updated_count", updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_read_alias_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aliases.csv");
        fs::write(&path, "field,label,comment\nname,Name,x\n,ignored,\ncode, Code ,\n").unwrap();

        let rows = read_alias_table(&path, "field", "label").unwrap();
        assert_eq!(
            rows,
            vec![
                ("name".to_string(), "Name".to_string()),
                ("code".to_string(), "Code".to_string())
            ]
        );
        assert!(read_alias_table(&path, "field", "missing").is_err());
    }

    #[test]
    fn test_columns_must_differ() {
        let params = ApplyAliasesParams {
            name_column: Some("field".to_string()),
            alias_column: Some("field".to_string()),
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(BatchError::MissingConfigError { .. })));

        let dir = TempDir::new().unwrap();
        let project = dir.path().join("p.qgs");
        let table = dir.path().join("t.csv");
        fs::write(&project, "<qgis/>").unwrap();
        fs::write(&table, "field\n").unwrap();
        let params = ApplyAliasesParams {
            project: Some(project),
            table: Some(table),
            name_column: Some("field".to_string()),
            alias_column: Some("field".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(BatchError::InvalidConfigValueError { field, .. }) if field == "alias_column"
        ));
    }
}
