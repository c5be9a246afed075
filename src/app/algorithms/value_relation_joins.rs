//! 為 ValueRelation 欄位建立 join，並隱藏 join 進來的欄位

use super::{check_canceled, finish, report_progress, run_timestamp, selected_layer_ids, uses_field_flags};
use crate::core::layer::{add_join, clear_joins, hide_field, FieldFlag, JoinDefinition, MapLayer};
use crate::core::project::QgisProject;
use crate::domain::model::{push_unique, AlgorithmOutput};
use crate::domain::ports::{Algorithm, Feedback};
use crate::utils::error::Result;
use crate::utils::validation::{validate_existing_file, validate_required_field, Validate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const VALUE_RELATION_WIDGET: &str = "ValueRelation";

const ID_FIELD_SUFFIXES: [&str; 2] = ["_ogc_fid", "_id"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueRelationJoinsParams {
    pub project: Option<PathBuf>,
    pub layers: Vec<String>,
    pub drop_existing_joins: bool,
    pub create_backup: bool,
}

impl Default for ValueRelationJoinsParams {
    fn default() -> Self {
        Self {
            project: None,
            layers: Vec::new(),
            drop_existing_joins: true,
            create_backup: true,
        }
    }
}

impl Validate for ValueRelationJoinsParams {
    fn validate(&self) -> Result<()> {
        validate_existing_file("project", validate_required_field("project", &self.project)?)?;
        Ok(())
    }
}

/// 要加到圖層上的一個 join，以及 join 之後要隱藏的欄位
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedJoin {
    pub field: String,
    pub join: JoinDefinition,
    pub hidden_from_wms: Vec<String>,
    pub hidden_from_wfs: Vec<String>,
}

/// 一個圖層的 join 規劃；找不到參照圖層的欄位放在 `missing`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinPlan {
    pub joins: Vec<PlannedJoin>,
    pub missing: Vec<(String, String)>,
}

/// 依圖層的 ValueRelation 欄位規劃 join
pub fn plan_joins(project: &QgisProject, layer: &MapLayer<'_>) -> JoinPlan {
    let mut plan = JoinPlan::default();
    let layer_fields = layer.field_names();

    for field in &layer_fields {
        let Some(widget) = layer.edit_widget(field) else {
            continue;
        };
        if widget.widget_type != VALUE_RELATION_WIDGET {
            continue;
        }
        let referenced_id = widget.option("Layer").unwrap_or("").to_string();
        let key = widget.option("Key").unwrap_or("").to_string();
        let Some(join_layer) = project.layer_by_id(&referenced_id) else {
            plan.missing.push((field.clone(), referenced_id));
            continue;
        };

        let prefix = join_layer.name();
        let join_fields = join_layer.field_names();
        let mut hidden_from_wms = Vec::new();
        for join_field in &join_fields {
            if !layer_fields.contains(join_field) {
                push_unique(&mut hidden_from_wms, &format!("{}{}", prefix, join_field));
            }
        }
        let hidden_from_wfs = join_fields
            .iter()
            .filter(|f| ID_FIELD_SUFFIXES.iter().any(|suffix| f.ends_with(suffix)))
            .map(|f| format!("{}{}", prefix, f))
            .collect();

        plan.joins.push(PlannedJoin {
            field: field.clone(),
            join: JoinDefinition {
                join_layer_id: referenced_id,
                join_field_name: key,
                target_field_name: field.clone(),
                prefix,
                memory_cache: true,
            },
            hidden_from_wms,
            hidden_from_wfs,
        });
    }
    plan
}

pub struct ValueRelationJoins {
    params: ValueRelationJoinsParams,
}

impl ValueRelationJoins {
    pub fn new(params: ValueRelationJoinsParams) -> Self {
        Self { params }
    }
}

impl Algorithm for ValueRelationJoins {
    fn name(&self) -> &'static str {
        "add_joins"
    }

    fn display_name(&self) -> &'static str {
        "Add joins for value relation fields"
    }

    fn process(&self, feedback: &dyn Feedback) -> Result<AlgorithmOutput> {
        self.params.validate()?;
        let project_path = validate_required_field("project", &self.params.project)?;
        let mut project = QgisProject::open(project_path)?;
        let layer_ids = selected_layer_ids(&project, &self.params.layers)?;
        let legacy = !uses_field_flags(&project);

        let total = layer_ids.len();
        let mut failed = Vec::new();
        let mut join_count = 0;
        let mut removed_count = 0;

        for (current, layer_id) in layer_ids.iter().enumerate() {
            check_canceled(feedback)?;

            let (layer_name, plan) = match project.layer_by_id(layer_id) {
                Some(layer) => (layer.name(), plan_joins(&project, &layer)),
                None => continue,
            };
            feedback.push_info(&format!("Processing layer '{}' with ID {}", layer_name, layer_id));

            let Some(element) = project.layer_element_mut(layer_id) else {
                continue;
            };

            if self.params.drop_existing_joins {
                for removed in clear_joins(element) {
                    feedback.push_info(&format!("Removing join '{}'", removed.join_field_name));
                    removed_count += 1;
                }
            }

            for (field, referenced_id) in &plan.missing {
                feedback.report_error(
                    &format!(
                        "Failed to add the join on {} {}: layer '{}' not found",
                        layer_name, field, referenced_id
                    ),
                    false,
                );
                push_unique(&mut failed, &layer_name);
            }

            for planned in &plan.joins {
                feedback.push_info(&format!("Adding join on '{}'", planned.field));
                add_join(element, &planned.join);
                join_count += 1;

                for field in &planned.hidden_from_wms {
                    hide_field(element, field, FieldFlag::HideFromWms, legacy);
                }
                for field in &planned.hidden_from_wfs {
                    hide_field(element, field, FieldFlag::HideFromWfs, legacy);
                }
                feedback.push_debug(&format!(
                    "Hidden from WMS: {} / from WFS: {}",
                    planned.hidden_from_wms.join(", "),
                    planned.hidden_from_wfs.join(", ")
                ));
            }
            report_progress(feedback, current + 1, total);
        }

        if join_count > 0 || removed_count > 0 {
            project.save(run_timestamp(), self.params.create_backup)?;
            feedback.push_info("Project saved, reopen it in QGIS to see the joins");
        }

        let output = AlgorithmOutput::new()
            .with("layer_count", total)
            .with("join_count", join_count)
            .with("removed_join_count", removed_count);
        finish(self.name(), failed, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::project::ProjectContent;
    use std::path::Path;

    const PROJECT: &str = r#"<qgis version="3.28.4-Firenze">
  <projectlayers>
    <maplayer type="vector">
      <id>parcels_1</id>
      <layername>parcels</layername>
      <provider>postgres</provider>
      <fieldConfiguration>
        <field name="id" configurationFlags="None"/>
        <field name="owner_id" configurationFlags="None">
          <editWidget type="ValueRelation">
            <config>
              <Option type="Map">
                <Option name="Layer" type="QString" value="owners_2"/>
                <Option name="Key" type="QString" value="id"/>
                <Option name="Value" type="QString" value="name"/>
              </Option>
            </config>
          </editWidget>
        </field>
        <field name="zone" configurationFlags="None">
          <editWidget type="ValueRelation">
            <config>
              <Option type="Map">
                <Option name="Layer" type="QString" value="missing_3"/>
                <Option name="Key" type="QString" value="code"/>
              </Option>
            </config>
          </editWidget>
        </field>
      </fieldConfiguration>
    </maplayer>
    <maplayer type="vector">
      <id>owners_2</id>
      <layername>owners_</layername>
      <provider>postgres</provider>
      <fieldConfiguration>
        <field name="id" configurationFlags="None"/>
        <field name="name" configurationFlags="None"/>
        <field name="city_id" configurationFlags="None"/>
      </fieldConfiguration>
    </maplayer>
  </projectlayers>
</qgis>
"#;

    #[test]
    fn test_plan_joins() {
        let project = QgisProject::from_content(
            Path::new("p.qgs"),
            ProjectContent {
                xml: PROJECT.to_string(),
                archive_entry: None,
            },
        )
        .unwrap();
        let layer = project.layer_by_id("parcels_1").unwrap();
        let plan = plan_joins(&project, &layer);

        assert_eq!(plan.missing, vec![("zone".to_string(), "missing_3".to_string())]);
        assert_eq!(plan.joins.len(), 1);
        let planned = &plan.joins[0];
        assert_eq!(planned.join.join_layer_id, "owners_2");
        assert_eq!(planned.join.target_field_name, "owner_id");
        assert_eq!(planned.join.join_field_name, "id");
        assert_eq!(planned.join.prefix, "owners_");
        assert!(planned.join.memory_cache);
        assert_eq!(planned.hidden_from_wms, vec!["owners_name", "owners_city_id"]);
        assert_eq!(planned.hidden_from_wfs, vec!["owners_city_id"]);
    }
}
