mod common;

use anyhow::Result;
use common::{backups, write_file, RecordingFeedback};
use qgs_batch::app::algorithms::{
    ApplyAliases, ApplyAliasesParams, MainColor, MainColorParams, RestrictFields, RestrictFieldsParams,
    ValueRelationJoins, ValueRelationJoinsParams,
};
use qgs_batch::core::layer::FieldFlag;
use qgs_batch::core::project::QgisProject;
use qgs_batch::core::Algorithm;
use qgs_batch::BatchError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn project_xml(version: &str) -> String {
    format!(
        r#"<!DOCTYPE qgis PUBLIC 'http://mrcc.com/qgis.dtd' 'SYSTEM'>
<qgis version="{}">
  <projectlayers>
    <maplayer type="vector" wkbType="MultiPolygon">
      <id>parcels_1</id>
      <datasource>service='gis' key='gid' table="cadastre"."parcels" (geom)</datasource>
      <layername>parcels</layername>
      <provider>postgres</provider>
      <fieldConfiguration>
        <field name="gid" configurationFlags="None"/>
        <field name="ro_code" configurationFlags="None"/>
        <field name="tech_updated" configurationFlags="None"/>
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
      </fieldConfiguration>
      <aliases>
        <alias index="0" field="gid" name=""/>
        <alias index="1" field="ro_code" name="Code"/>
        <alias index="2" field="tech_updated" name=""/>
        <alias index="3" field="owner_id" name=""/>
      </aliases>
      <vectorjoins>
        <join joinLayerId="old_9" joinFieldName="x" targetFieldName="y" memoryCache="0" customPrefix="old_"/>
      </vectorjoins>
      <renderer-v2 type="RuleRenderer">
        <rules key="root">
          <rule key="r1" filter="&quot;kind&quot; = 'built'" symbol="0" label="Built"/>
          <rule key="r2" filter="ELSE" symbol="1" label="Other"/>
        </rules>
        <symbols>
          <symbol name="0" type="fill" alpha="1">
            <layer class="SimpleFill">
              <prop k="color" v="200,10,10,255"/>
              <prop k="style" v="solid"/>
            </layer>
          </symbol>
          <symbol name="1" type="fill" alpha="1">
            <layer class="SimpleFill">
              <prop k="color" v="10,10,200,255"/>
              <prop k="style" v="solid"/>
            </layer>
          </symbol>
        </symbols>
      </renderer-v2>
    </maplayer>
    <maplayer type="vector" wkbType="NoGeometry">
      <id>owners_2</id>
      <datasource>./owners.csv</datasource>
      <layername>owners_</layername>
      <provider>ogr</provider>
      <fieldConfiguration>
        <field name="id" configurationFlags="None"/>
        <field name="name" configurationFlags="None"/>
        <field name="city_id" configurationFlags="None"/>
      </fieldConfiguration>
    </maplayer>
  </projectlayers>
</qgis>
"#,
        version
    )
}

fn setup(version: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let project = write_file(dir.path(), "city.qgs", &project_xml(version));
    (dir, project)
}

fn reopen(path: &Path) -> QgisProject {
    QgisProject::open(path).unwrap()
}

/// 預設只填入空白的別名
#[test]
fn test_apply_aliases_only_fills_empty_aliases() -> Result<()> {
    let (dir, project) = setup("3.28.4-Firenze");
    let table = write_file(
        dir.path(),
        "aliases.csv",
        "field,label\nro_code,Read only code\ntech_updated,Last update\nunknown,Nothing\n",
    );
    let params = ApplyAliasesParams {
        project: Some(project.clone()),
        table: Some(table.clone()),
        name_column: Some("field".to_string()),
        alias_column: Some("label".to_string()),
        ..Default::default()
    };

    let output = ApplyAliases::new(params.clone()).process(&RecordingFeedback::new())?;
    assert_eq!(output.get("updated_count"), Some(&serde_json::json!(1)));

    let reopened = reopen(&project);
    let parcels = reopened.layer_by_id("parcels_1").unwrap();
    assert_eq!(parcels.alias("ro_code"), "Code");
    assert_eq!(parcels.alias("tech_updated"), "Last update");
    assert_eq!(backups(dir.path()).len(), 1);

    let params = ApplyAliasesParams {
        only_empty: false,
        create_backup: false,
        ..params
    };
    ApplyAliases::new(params).process(&RecordingFeedback::new())?;
    let reopened = reopen(&project);
    assert_eq!(reopened.layer_by_id("parcels_1").unwrap().alias("ro_code"), "Read only code");
    Ok(())
}

#[test]
fn test_apply_aliases_without_matching_layer_is_fatal() {
    let (dir, project) = setup("3.28.4-Firenze");
    let table = write_file(dir.path(), "aliases.csv", "field,label\n");
    let params = ApplyAliasesParams {
        project: Some(project),
        layers: vec!["rivers".to_string()],
        table: Some(table),
        name_column: Some("field".to_string()),
        alias_column: Some("label".to_string()),
        ..Default::default()
    };
    let result = ApplyAliases::new(params).process(&RecordingFeedback::new());
    assert!(matches!(result, Err(BatchError::ConfigError { .. })));
}

/// 3.16 之後的專案使用 configurationFlags
#[test]
fn test_restrict_fields_with_configuration_flags() -> Result<()> {
    let (_dir, project) = setup("3.28.4-Firenze");
    let params = RestrictFieldsParams {
        project: Some(project.clone()),
        read_only_prefix: "ro_".to_string(),
        excluded_prefix: "tech_".to_string(),
        exclude_primary_key: true,
        ..Default::default()
    };

    let output = RestrictFields::new(params).process(&RecordingFeedback::new())?;
    assert_eq!(output.get("layer_count"), Some(&serde_json::json!(1)));
    assert_eq!(output.get("read_only_count"), Some(&serde_json::json!(1)));
    assert_eq!(output.get("excluded_count"), Some(&serde_json::json!(1)));
    assert_eq!(output.get("primary_key_count"), Some(&serde_json::json!(1)));

    let reopened = reopen(&project);
    let parcels = reopened.layer_by_id("parcels_1").unwrap();
    assert!(parcels.is_read_only("ro_code"));
    assert!(!parcels.is_read_only("gid"));
    assert_eq!(parcels.field_flags("tech_updated"), vec!["HideFromWms", "HideFromWfs"]);
    assert_eq!(parcels.field_flags("gid"), vec!["HideFromWms"]);
    assert!(parcels.legacy_excluded(FieldFlag::HideFromWms).is_empty());
    Ok(())
}

#[test]
fn test_restrict_fields_on_legacy_project() -> Result<()> {
    let (_dir, project) = setup("3.10.14-A Coruña");
    let params = RestrictFieldsParams {
        project: Some(project.clone()),
        excluded_prefix: "tech_".to_string(),
        ..Default::default()
    };

    RestrictFields::new(params).process(&RecordingFeedback::new())?;
    let reopened = reopen(&project);
    let parcels = reopened.layer_by_id("parcels_1").unwrap();
    assert_eq!(parcels.legacy_excluded(FieldFlag::HideFromWms), vec!["tech_updated"]);
    assert_eq!(parcels.legacy_excluded(FieldFlag::HideFromWfs), vec!["tech_updated"]);
    assert!(parcels.field_flags("tech_updated").is_empty());
    Ok(())
}

#[test]
fn test_restrict_fields_requires_a_postgres_layer() {
    let (_dir, project) = setup("3.28.4-Firenze");
    let params = RestrictFieldsParams {
        project: Some(project),
        layers: vec!["owners_".to_string()],
        read_only_prefix: "ro_".to_string(),
        ..Default::default()
    };
    let result = RestrictFields::new(params).process(&RecordingFeedback::new());
    assert!(matches!(result, Err(BatchError::ConfigError { .. })));
}

/// 既有的 join 被移除，ValueRelation 欄位產生新的 join
#[test]
fn test_value_relation_joins() -> Result<()> {
    let (_dir, project) = setup("3.28.4-Firenze");
    let params = ValueRelationJoinsParams {
        project: Some(project.clone()),
        layers: vec!["parcels".to_string()],
        ..Default::default()
    };

    let output = ValueRelationJoins::new(params).process(&RecordingFeedback::new())?;
    assert_eq!(output.get("join_count"), Some(&serde_json::json!(1)));
    assert_eq!(output.get("removed_join_count"), Some(&serde_json::json!(1)));

    let reopened = reopen(&project);
    let parcels = reopened.layer_by_id("parcels_1").unwrap();
    let joins = parcels.joins();
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].join_layer_id, "owners_2");
    assert_eq!(joins[0].target_field_name, "owner_id");
    assert_eq!(joins[0].join_field_name, "id");
    assert_eq!(joins[0].prefix, "owners_");
    assert!(joins[0].memory_cache);
    assert_eq!(parcels.field_flags("owners_name"), vec!["HideFromWms"]);
    assert_eq!(parcels.field_flags("owners_city_id"), vec!["HideFromWms", "HideFromWfs"]);
    assert_eq!(parcels.field_flags("owners_id"), vec!["HideFromWms"]);
    Ok(())
}

#[test]
fn test_value_relation_join_to_missing_layer() -> Result<()> {
    let dir = TempDir::new()?;
    let xml = project_xml("3.28.4-Firenze").replace("value=\"owners_2\"", "value=\"gone_7\"");
    let project = write_file(dir.path(), "city.qgs", &xml);
    let feedback = RecordingFeedback::new();
    let params = ValueRelationJoinsParams {
        project: Some(project.clone()),
        ..Default::default()
    };

    match ValueRelationJoins::new(params).process(&feedback) {
        Err(BatchError::PartialFailure { failed, .. }) => assert_eq!(failed, vec!["parcels"]),
        other => panic!("unexpected result: {:?}", other),
    }
    // the old join was still removed and saved
    assert!(reopen(&project).layer_by_id("parcels_1").unwrap().joins().is_empty());
    assert!(feedback.errors().iter().any(|(m, fatal)| m.contains("gone_7") && !fatal));
    Ok(())
}

#[test]
fn test_main_color_virtual_fields() -> Result<()> {
    let (_dir, project) = setup("3.28.4-Firenze");
    let params = MainColorParams {
        project: Some(project.clone()),
        layer: Some("parcels".to_string()),
        color_field: Some("main_color".to_string()),
        label_field: Some("main_label".to_string()),
        ..Default::default()
    };

    let output = MainColor::new(params.clone()).process(&RecordingFeedback::new())?;
    assert_eq!(output.get("item_count"), Some(&serde_json::json!(2)));

    let reopened = reopen(&project);
    let parcels = reopened.layer_by_id("parcels_1").unwrap();
    assert_eq!(
        parcels.expression_field("main_color").as_deref(),
        Some(
            " CASE  WHEN \"kind\" = 'built' THEN 'rgba(200,10,10,255)' WHEN True THEN 'rgba(10,10,200,255)' \
             ELSE 'rgba(255,255,255,0.0)' END"
        )
    );
    assert_eq!(
        parcels.expression_field("main_label").as_deref(),
        Some(" CASE  WHEN \"kind\" = 'built' THEN 'Built' WHEN True THEN 'Other' ELSE NULL END")
    );

    // running again updates the fields in place
    MainColor::new(params).process(&RecordingFeedback::new())?;
    let reopened = reopen(&project);
    let parcels = reopened.layer_by_id("parcels_1").unwrap();
    let count = parcels
        .element()
        .child("expressionfields")
        .map(|fields| fields.children_named("field").count());
    assert_eq!(count, Some(2));
    Ok(())
}

#[test]
fn test_main_color_symbol_level_out_of_range() {
    let (_dir, project) = setup("3.28.4-Firenze");
    let params = MainColorParams {
        project: Some(project),
        layer: Some("parcels".to_string()),
        color_field: Some("main_color".to_string()),
        symbol_level: 6,
        ..Default::default()
    };
    let result = MainColor::new(params).process(&RecordingFeedback::new());
    assert!(matches!(result, Err(BatchError::InvalidConfigValueError { field, .. }) if field == "symbol_level"));
}
