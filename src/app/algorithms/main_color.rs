//! 由圖層符號推算每個圖徵的主要顏色，寫成虛擬欄位的運算式

use super::{check_canceled, run_timestamp};
use crate::core::layer::{set_expression_field, MapLayer};
use crate::core::project::QgisProject;
use crate::core::xml::Element;
use crate::domain::model::AlgorithmOutput;
use crate::domain::ports::{Algorithm, Feedback};
use crate::utils::error::{BatchError, Result};
use crate::utils::validation::{
    validate_existing_file, validate_non_empty_string, validate_range, validate_required_field, Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const TRANSPARENT: &str = "rgba(255,255,255,0.0)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MainColorParams {
    pub project: Option<PathBuf>,
    /// 圖層名稱或 ID
    pub layer: Option<String>,
    /// 取色的符號層，-1 代表直接使用符號的顏色
    pub symbol_level: i32,
    pub color_field: Option<String>,
    pub label_field: Option<String>,
    pub create_backup: bool,
}

impl Default for MainColorParams {
    fn default() -> Self {
        Self {
            project: None,
            layer: None,
            symbol_level: 0,
            color_field: None,
            label_field: None,
            create_backup: true,
        }
    }
}

impl Validate for MainColorParams {
    fn validate(&self) -> Result<()> {
        validate_existing_file("project", validate_required_field("project", &self.project)?)?;
        validate_non_empty_string("layer", validate_required_field("layer", &self.layer)?)?;
        validate_range("symbol_level", self.symbol_level, -1, 5)?;
        validate_non_empty_string("color_field", validate_required_field("color_field", &self.color_field)?)?;
        if let Some(label) = &self.label_field {
            validate_non_empty_string("label_field", label)?;
        }
        Ok(())
    }
}

/// 圖例中的一個項目
#[derive(Debug, Clone, PartialEq)]
pub struct LegendItem {
    pub label: String,
    pub expression: String,
    /// `r,g,b,a`，a 介於 0 到 255
    pub color: String,
}

/// 符號層的屬性，支援 `<Option>` 與舊版 `<prop k v>` 兩種格式
fn symbol_layer_properties(layer: &Element) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for child in layer.children() {
        match child.name.as_str() {
            "prop" => {
                if let (Some(k), Some(v)) = (child.attr("k"), child.attr("v")) {
                    properties.insert(k.to_string(), v.to_string());
                }
            }
            "Option" => {
                for option in child.children_named("Option") {
                    if let (Some(name), Some(value)) = (option.attr("name"), option.attr("value")) {
                        properties.insert(name.to_string(), value.to_string());
                    }
                }
            }
            _ => {}
        }
    }
    properties
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// 漸層取中間的色標
fn ramp_middle_color(stops: &str) -> Option<String> {
    let stops: Vec<&str> = stops.split(':').filter(|s| !s.is_empty()).collect();
    let middle = stops.get(stops.len() / 2)?;
    middle.split(';').nth(1).map(str::to_string)
}

fn guess_symbol_layer_color(properties: &BTreeMap<String, String>) -> Option<String> {
    let mut color = match properties.get("style").map(String::as_str) {
        Some("no") => non_empty(properties.get("outline_color")),
        Some("solid") => non_empty(properties.get("color")),
        _ => None,
    };
    if properties.contains_key("rampType") {
        if let Some(ramp) = properties.get("stops").and_then(|s| ramp_middle_color(s)) {
            color = Some(ramp);
        }
    }
    color.or_else(|| non_empty(properties.get("color")))
}

/// 符號的主要顏色，格式為 `r,g,b,a`
pub fn symbol_main_color(symbol: &Element, symbol_level: i32, layer_opacity: f64) -> String {
    let layers: Vec<&Element> = symbol.children_named("layer").collect();
    let mut color = None;

    if symbol_level > -1 {
        if let Some(layer) = layers.get(symbol_level as usize) {
            color = guess_symbol_layer_color(&symbol_layer_properties(layer));
        }
    }
    if color.is_none() {
        color = layers.first().and_then(|layer| {
            let properties = symbol_layer_properties(layer);
            ["color", "line_color", "outline_color"]
                .iter()
                .find_map(|key| non_empty(properties.get(*key)))
        });
    }

    let color = color.unwrap_or_else(|| "0,0,0".to_string());
    let rgb: Vec<&str> = color.split(',').take(3).map(str::trim).collect();
    let alpha: f64 = symbol.attr("alpha").and_then(|a| a.parse().ok()).unwrap_or(1.0);
    let opacity = (alpha * layer_opacity * 255.0) as i64;
    format!("{},{}", rgb.join(","), opacity)
}

/// 整數值保留一位小數，例如 `0.0`
fn format_number(value: &str) -> String {
    match value.trim().parse::<f64>() {
        Ok(number) if number.is_finite() && number.fract() == 0.0 => format!("{:.1}", number),
        Ok(number) => number.to_string(),
        Err(_) => value.trim().to_string(),
    }
}

fn escape_quote(value: &str) -> String {
    value.replace('\'', "\\'")
}

/// 依 renderer 類型建立圖例
pub fn legend_items(layer: &MapLayer<'_>, symbol_level: i32) -> Result<Vec<LegendItem>> {
    let renderer = layer
        .element()
        .child("renderer-v2")
        .ok_or_else(|| BatchError::config(format!("Layer '{}' has no renderer", layer.name())))?;
    let symbols: BTreeMap<&str, &Element> = renderer
        .child("symbols")
        .map(|symbols| {
            symbols
                .children_named("symbol")
                .filter_map(|s| s.attr("name").map(|name| (name, s)))
                .collect()
        })
        .unwrap_or_default();
    let opacity = layer.opacity();
    let color_of = |key: Option<&str>| {
        key.and_then(|k| symbols.get(k))
            .map(|symbol| symbol_main_color(symbol, symbol_level, opacity))
    };
    let class_attribute = renderer.attr("attr").unwrap_or("");

    let mut items = Vec::new();
    match renderer.attr("type").unwrap_or("") {
        "singleSymbol" => {
            if let Some(color) = color_of(Some("0")) {
                items.push(LegendItem {
                    label: layer.name(),
                    expression: "True".to_string(),
                    color,
                });
            }
        }
        "categorizedSymbol" => {
            let categories = renderer.child("categories");
            for category in categories.iter().flat_map(|c| c.children_named("category")) {
                let Some(color) = color_of(category.attr("symbol")) else {
                    continue;
                };
                items.push(LegendItem {
                    label: category.attr("label").unwrap_or("").to_string(),
                    expression: format!(
                        "{} = '{}'",
                        class_attribute,
                        escape_quote(category.attr("value").unwrap_or(""))
                    ),
                    color,
                });
            }
        }
        "graduatedSymbol" => {
            let ranges = renderer.child("ranges");
            for range in ranges.iter().flat_map(|r| r.children_named("range")) {
                let Some(color) = color_of(range.attr("symbol")) else {
                    continue;
                };
                items.push(LegendItem {
                    label: range.attr("label").unwrap_or("").to_string(),
                    expression: format!(
                        "{0} <= ( {1} ) AND ( {1} ) < {2}",
                        format_number(range.attr("lower").unwrap_or("0")),
                        class_attribute,
                        format_number(range.attr("upper").unwrap_or("0"))
                    ),
                    color,
                });
            }
        }
        "RuleRenderer" => {
            let rules = renderer.child("rules").map(|r| r.descendants_named("rule")).unwrap_or_default();
            for rule in rules {
                let Some(color) = color_of(rule.attr("symbol")) else {
                    continue;
                };
                let expression = match rule.attr("filter").map(str::trim) {
                    None | Some("") | Some("ELSE") => "True".to_string(),
                    Some(filter) => filter.to_string(),
                };
                items.push(LegendItem {
                    label: rule.attr("label").unwrap_or("").to_string(),
                    expression,
                    color,
                });
            }
        }
        other => {
            return Err(BatchError::config(format!(
                "Renderer '{}' of layer '{}' is not supported",
                other,
                layer.name()
            )))
        }
    }
    Ok(items)
}

pub fn color_expression(items: &[LegendItem]) -> String {
    let mut expression = String::from(" CASE ");
    for item in items {
        expression.push_str(&format!(" WHEN {} THEN 'rgba({})'", item.expression, item.color));
    }
    expression.push_str(&format!(" ELSE '{}'", TRANSPARENT));
    expression.push_str(" END");
    expression
}

pub fn label_expression(items: &[LegendItem]) -> String {
    let mut expression = String::from(" CASE ");
    for item in items {
        expression.push_str(&format!(" WHEN {} THEN '{}'", item.expression, escape_quote(&item.label)));
    }
    expression.push_str(" ELSE NULL");
    expression.push_str(" END");
    expression
}

pub struct MainColor {
    params: MainColorParams,
}

impl MainColor {
    pub fn new(params: MainColorParams) -> Self {
        Self { params }
    }
}

impl Algorithm for MainColor {
    fn name(&self) -> &'static str {
        "main_color"
    }

    fn display_name(&self) -> &'static str {
        "Set color field value with feature symbol main colour"
    }

    fn process(&self, feedback: &dyn Feedback) -> Result<AlgorithmOutput> {
        self.params.validate()?;
        let project_path = validate_required_field("project", &self.params.project)?;
        let selector = validate_required_field("layer", &self.params.layer)?;
        let color_field = validate_required_field("color_field", &self.params.color_field)?;

        let mut project = QgisProject::open(project_path)?;
        let (layer_id, items) = {
            let layer = project
                .select_layers(std::slice::from_ref(selector))
                .into_iter()
                .next()
                .ok_or_else(|| BatchError::config(format!("Vector layer '{}' not found", selector)))?;
            feedback.push_info(&format!("Layer is {}", layer.name()));
            (layer.id(), legend_items(&layer, self.params.symbol_level)?)
        };
        if items.is_empty() {
            return Err(BatchError::config("Color expression or label expression cannot be generated"));
        }
        for item in &items {
            feedback.push_debug(&format!("{} -> rgba({})", item.label, item.color));
        }
        check_canceled(feedback)?;

        let color = color_expression(&items);
        let label = label_expression(&items);
        if let Some(element) = project.layer_element_mut(&layer_id) {
            if set_expression_field(element, color_field, &color) {
                feedback.push_info(&format!("Virtual field '{}' created", color_field));
            } else {
                feedback.push_info(&format!("Virtual field '{}' updated", color_field));
            }
            if let Some(label_field) = &self.params.label_field {
                set_expression_field(element, label_field, &label);
                feedback.push_info(&format!("Virtual field '{}' set", label_field));
            }
        }
        project.save(run_timestamp(), self.params.create_backup)?;

        Ok(AlgorithmOutput::new()
            .with("item_count", items.len())
            .with("color_expression", color)
            .with("label_expression", label))
    }
}
