//! `<maplayer>` 元素的讀取與欄位設定修改

use crate::core::xml::Element;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFlag {
    HideFromWms,
    HideFromWfs,
}

impl FieldFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldFlag::HideFromWms => "HideFromWms",
            FieldFlag::HideFromWfs => "HideFromWfs",
        }
    }

    /// 舊版 (< 3.16) 專案使用的排除清單元素
    pub fn legacy_list(&self) -> &'static str {
        match self {
            FieldFlag::HideFromWms => "excludeAttributesWMS",
            FieldFlag::HideFromWfs => "excludeAttributesWFS",
        }
    }
}

/// 欄位的編輯元件設定
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditWidget {
    pub widget_type: String,
    pub options: BTreeMap<String, String>,
}

impl EditWidget {
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// 圖層 join 設定
#[derive(Debug, Clone, PartialEq)]
pub struct JoinDefinition {
    pub join_layer_id: String,
    pub join_field_name: String,
    pub target_field_name: String,
    pub prefix: String,
    pub memory_cache: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct MapLayer<'a> {
    element: &'a Element,
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element.child(name).map(|e| e.text().trim().to_string())
}

impl<'a> MapLayer<'a> {
    pub fn new(element: &'a Element) -> Self {
        Self { element }
    }

    pub fn element(&self) -> &'a Element {
        self.element
    }

    pub fn id(&self) -> String {
        child_text(self.element, "id").unwrap_or_default()
    }

    pub fn name(&self) -> String {
        child_text(self.element, "layername").unwrap_or_default()
    }

    /// `<datasource>` 的內容 (已去除前後空白)，元素不存在時為 None
    pub fn datasource(&self) -> Option<String> {
        child_text(self.element, "datasource")
    }

    pub fn provider(&self) -> String {
        child_text(self.element, "provider").unwrap_or_default()
    }

    pub fn layer_type(&self) -> &'a str {
        self.element.attr("type").unwrap_or("")
    }

    pub fn is_vector(&self) -> bool {
        self.layer_type() == "vector"
    }

    /// `wkbType` (例如 MultiPolygon)，舊專案只有 `geometry`
    pub fn wkb_type(&self) -> Option<&'a str> {
        self.element
            .attr("wkbType")
            .or_else(|| self.element.attr("geometry"))
            .filter(|v| !v.is_empty())
    }

    pub fn opacity(&self) -> f64 {
        child_text(self.element, "layerOpacity")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1.0)
    }

    pub fn matches(&self, selector: &str) -> bool {
        self.id() == selector || self.name() == selector
    }

    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .element
            .child("fieldConfiguration")
            .map(|config| {
                config
                    .children_named("field")
                    .filter_map(|f| f.attr("name"))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if names.is_empty() {
            if let Some(aliases) = self.element.child("aliases") {
                names = aliases
                    .children_named("alias")
                    .filter_map(|a| a.attr("field"))
                    .map(str::to_string)
                    .collect();
            }
        }
        names
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.field_names().iter().any(|f| f == field)
    }

    pub fn alias(&self, field: &str) -> String {
        self.element
            .child("aliases")
            .and_then(|aliases| aliases.children_named("alias").find(|a| a.attr("field") == Some(field)))
            .and_then(|a| a.attr("name"))
            .unwrap_or("")
            .to_string()
    }

    pub fn edit_widget(&self, field: &str) -> Option<EditWidget> {
        let field_element = self
            .element
            .child("fieldConfiguration")?
            .children_named("field")
            .find(|f| f.attr("name") == Some(field))?;
        let widget = field_element.child("editWidget")?;

        let mut options = BTreeMap::new();
        if let Some(config) = widget.child("config") {
            for option in config.descendants_named("Option") {
                if let (Some(name), Some(value)) = (option.attr("name"), option.attr("value")) {
                    options.insert(name.to_string(), value.to_string());
                }
            }
        }

        Some(EditWidget {
            widget_type: widget.attr("type").unwrap_or("").to_string(),
            options,
        })
    }

    pub fn field_flags(&self, field: &str) -> Vec<String> {
        self.element
            .child("fieldConfiguration")
            .and_then(|config| config.children_named("field").find(|f| f.attr("name") == Some(field)))
            .and_then(|f| f.attr("configurationFlags"))
            .map(parse_flags)
            .unwrap_or_default()
    }

    pub fn legacy_excluded(&self, flag: FieldFlag) -> Vec<String> {
        self.element
            .child(flag.legacy_list())
            .map(|list| list.children_named("attribute").map(|a| a.text()).collect())
            .unwrap_or_default()
    }

    pub fn is_read_only(&self, field: &str) -> bool {
        self.element
            .child("editable")
            .and_then(|e| e.children_named("field").find(|f| f.attr("name") == Some(field)))
            .and_then(|f| f.attr("editable"))
            == Some("0")
    }

    pub fn joins(&self) -> Vec<JoinDefinition> {
        self.element
            .child("vectorjoins")
            .map(|joins| {
                joins
                    .children_named("join")
                    .map(|join| JoinDefinition {
                        join_layer_id: join.attr("joinLayerId").unwrap_or("").to_string(),
                        join_field_name: join.attr("joinFieldName").unwrap_or("").to_string(),
                        target_field_name: join.attr("targetFieldName").unwrap_or("").to_string(),
                        prefix: join.attr("customPrefix").unwrap_or("").to_string(),
                        memory_cache: join.attr("memoryCache") == Some("1"),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn expression_field(&self, name: &str) -> Option<String> {
        self.element
            .child("expressionfields")?
            .children_named("field")
            .find(|f| f.attr("name") == Some(name))
            .and_then(|f| f.attr("expression"))
            .map(str::to_string)
    }
}

fn parse_flags(value: &str) -> Vec<String> {
    value
        .split('|')
        .map(str::trim)
        .filter(|f| !f.is_empty() && *f != "None")
        .map(str::to_string)
        .collect()
}

fn field_configuration_entry<'e>(layer: &'e mut Element, field: &str) -> &'e mut Element {
    let config = layer.get_or_create_child("fieldConfiguration");
    let exists = config.children_named("field").any(|f| f.attr("name") == Some(field));
    if !exists {
        config.push_child(
            Element::new("field")
                .with_attr("name", field)
                .with_attr("configurationFlags", "None"),
        );
    }
    match config
        .children_named_mut("field")
        .find(|f| f.attr("name") == Some(field))
    {
        Some(entry) => entry,
        None => unreachable!("field entry was just created"),
    }
}

/// 設定欄位別名，回傳是否有改變
pub fn set_alias(layer: &mut Element, field: &str, alias: &str) -> bool {
    let index = MapLayer::new(layer)
        .field_names()
        .iter()
        .position(|f| f == field)
        .unwrap_or(0);
    let aliases = layer.get_or_create_child("aliases");
    if let Some(existing) = aliases
        .children_named_mut("alias")
        .find(|a| a.attr("field") == Some(field))
    {
        if existing.attr("name") == Some(alias) {
            return false;
        }
        existing.set_attr("name", alias);
        return true;
    }

    aliases.push_child(
        Element::new("alias")
            .with_attr("index", &index.to_string())
            .with_attr("field", field)
            .with_attr("name", alias),
    );
    true
}

pub fn set_read_only(layer: &mut Element, field: &str) {
    let editable = layer.get_or_create_child("editable");
    let existing = editable
        .children_named_mut("field")
        .find(|f| f.attr("name") == Some(field));
    if let Some(entry) = existing {
        entry.set_attr("editable", "0");
        return;
    }
    editable.push_child(
        Element::new("field")
            .with_attr("editable", "0")
            .with_attr("name", field),
    );
}

/// 對欄位加上 WMS/WFS 隱藏設定；`legacy` 時寫入 excludeAttributes 清單
pub fn hide_field(layer: &mut Element, field: &str, flag: FieldFlag, legacy: bool) -> bool {
    if legacy {
        let list = layer.get_or_create_child(flag.legacy_list());
        if list.children_named("attribute").any(|a| a.text() == field) {
            return false;
        }
        list.push_child(Element::new("attribute").with_text(field));
        return true;
    }

    let entry = field_configuration_entry(layer, field);
    let mut flags = entry.attr("configurationFlags").map(parse_flags).unwrap_or_default();
    if flags.iter().any(|f| f == flag.as_str()) {
        return false;
    }
    flags.push(flag.as_str().to_string());
    entry.set_attr("configurationFlags", &flags.join("|"));
    true
}

/// 移除所有 join，回傳被移除的 join 設定
pub fn clear_joins(layer: &mut Element) -> Vec<JoinDefinition> {
    let removed = MapLayer::new(layer).joins();
    if let Some(joins) = layer.child_mut("vectorjoins") {
        joins.remove_children_named("join");
    }
    removed
}

pub fn add_join(layer: &mut Element, join: &JoinDefinition) {
    let joins = layer.get_or_create_child("vectorjoins");
    joins.push_child(
        Element::new("join")
            .with_attr("joinLayerId", &join.join_layer_id)
            .with_attr("joinFieldName", &join.join_field_name)
            .with_attr("targetFieldName", &join.target_field_name)
            .with_attr("memoryCache", if join.memory_cache { "1" } else { "0" })
            .with_attr("cascadedDelete", "0")
            .with_attr("editable", "0")
            .with_attr("upsertOnEdit", "0")
            .with_attr("dynamicForm", "0")
            .with_attr("hasCustomPrefix", "1")
            .with_attr("customPrefix", &join.prefix),
    );
}

/// 新增或更新虛擬 (運算式) 欄位，型別為字串
pub fn set_expression_field(layer: &mut Element, name: &str, expression: &str) -> bool {
    let fields = layer.get_or_create_child("expressionfields");
    if let Some(existing) = fields
        .children_named_mut("field")
        .find(|f| f.attr("name") == Some(name))
    {
        existing.set_attr("expression", expression);
        return false;
    }

    fields.push_child(
        Element::new("field")
            .with_attr("name", name)
            .with_attr("expression", expression)
            .with_attr("comment", "")
            .with_attr("length", "0")
            .with_attr("precision", "0")
            .with_attr("subType", "0")
            .with_attr("type", "10")
            .with_attr("typeName", "string"),
    );
    true
}
