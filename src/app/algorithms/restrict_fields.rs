//! 依欄位名稱前綴設定唯讀，或從 WMS/WFS 排除

use super::{check_canceled, report_progress, run_timestamp, uses_field_flags};
use crate::core::datasource_uri::DataSourceUri;
use crate::core::layer::{hide_field, set_read_only, FieldFlag, MapLayer};
use crate::core::project::QgisProject;
use crate::domain::model::AlgorithmOutput;
use crate::domain::ports::{Algorithm, Feedback};
use crate::utils::error::{BatchError, Result};
use crate::utils::validation::{validate_existing_file, validate_required_field, Validate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictFieldsParams {
    pub project: Option<PathBuf>,
    pub layers: Vec<String>,
    pub read_only_prefix: String,
    pub excluded_prefix: String,
    pub exclude_primary_key: bool,
    pub create_backup: bool,
}

impl Default for RestrictFieldsParams {
    fn default() -> Self {
        Self {
            project: None,
            layers: Vec::new(),
            read_only_prefix: String::new(),
            excluded_prefix: String::new(),
            exclude_primary_key: false,
            create_backup: true,
        }
    }
}

impl Validate for RestrictFieldsParams {
    fn validate(&self) -> Result<()> {
        validate_existing_file("project", validate_required_field("project", &self.project)?)?;
        if self.read_only_prefix.is_empty() && self.excluded_prefix.is_empty() && !self.exclude_primary_key {
            return Err(BatchError::config(
                "Nothing to do: give a read-only prefix, an excluded prefix or enable exclude_primary_key",
            ));
        }
        Ok(())
    }
}

/// 單一圖層的變更統計
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FieldChanges {
    pub read_only: usize,
    pub excluded: usize,
    pub primary_key: usize,
}

impl FieldChanges {
    pub fn total(&self) -> usize {
        self.read_only + self.excluded + self.primary_key
    }
}

pub struct RestrictFields {
    params: RestrictFieldsParams,
}

impl RestrictFields {
    pub fn new(params: RestrictFieldsParams) -> Self {
        Self { params }
    }

    fn restrict_layer(
        &self,
        project: &mut QgisProject,
        layer_id: &str,
        legacy: bool,
        feedback: &dyn Feedback,
    ) -> FieldChanges {
        let mut changes = FieldChanges::default();
        let Some(element) = project.layer_element_mut(layer_id) else {
            return changes;
        };

        let (fields, primary_key) = {
            let layer = MapLayer::new(element);
            feedback.push_info(&format!("Processing layer '{}'", layer.name()));
            let primary_key = layer
                .datasource()
                .and_then(|ds| DataSourceUri::parse(&ds).key_column().map(str::to_string));
            (layer.field_names(), primary_key)
        };

        let read_only_prefix = self.params.read_only_prefix.as_str();
        let excluded_prefix = self.params.excluded_prefix.as_str();
        for name in &fields {
            if !read_only_prefix.is_empty() && name.starts_with(read_only_prefix) {
                feedback.push_info(&format!("Set readonly '{}'", name));
                set_read_only(element, name);
                changes.read_only += 1;
            }
            if !excluded_prefix.is_empty() && name.starts_with(excluded_prefix) {
                feedback.push_info(&format!("Set disabled '{}'", name));
                hide_field(element, name, FieldFlag::HideFromWms, legacy);
                hide_field(element, name, FieldFlag::HideFromWfs, legacy);
                changes.excluded += 1;
            }
            if self.params.exclude_primary_key && primary_key.as_deref() == Some(name.as_str()) {
                feedback.push_info(&format!("Set disabled PK '{}'", name));
                hide_field(element, name, FieldFlag::HideFromWms, legacy);
                changes.primary_key += 1;
            }
        }
        changes
    }
}

impl Algorithm for RestrictFields {
    fn name(&self) -> &'static str {
        "restrict_fields"
    }

    fn display_name(&self) -> &'static str {
        "Disable or exclude fields starting with a prefix"
    }

    fn process(&self, feedback: &dyn Feedback) -> Result<AlgorithmOutput> {
        self.params.validate()?;
        let project_path = validate_required_field("project", &self.params.project)?;
        let mut project = QgisProject::open(project_path)?;

        let layer_ids: Vec<String> = project
            .select_layers(&self.params.layers)
            .iter()
            .filter(|layer| layer.provider() == "postgres")
            .map(|layer| layer.id())
            .collect();
        if layer_ids.is_empty() {
            return Err(BatchError::config("At least one PostgreSQL layer is required"));
        }

        let legacy = !uses_field_flags(&project);
        if legacy {
            feedback.push_debug("Project saved before QGIS 3.16, using excludeAttributesWMS/WFS");
        }

        let total = layer_ids.len();
        let mut summary = FieldChanges::default();
        for (current, layer_id) in layer_ids.iter().enumerate() {
            check_canceled(feedback)?;
            let changes = self.restrict_layer(&mut project, layer_id, legacy, feedback);
            summary.read_only += changes.read_only;
            summary.excluded += changes.excluded;
            summary.primary_key += changes.primary_key;
            report_progress(feedback, current + 1, total);
        }

        if summary.total() > 0 {
            project.save(run_timestamp(), self.params.create_backup)?;
        }

        Ok(AlgorithmOutput::new()
            .with("layer_count", total)
            .with("read_only_count", summary.read_only)
            .with("excluded_count", summary.excluded)
            .with("primary_key_count", summary.primary_key))
    }
}
