//! 資料庫圖層的 `key=value` 連線字串解析 (postgres / oracle / spatialite)
//!
//! 例：`dbname='gis' host=db port=5432 key='id' table="public"."roads" (geom) sql=`

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSourceUri {
    params: BTreeMap<String, String>,
    schema: String,
    table: String,
    geometry_column: String,
    sql: String,
}

impl DataSourceUri {
    pub fn parse(uri: &str) -> Self {
        let mut parsed = Self::default();
        let chars: Vec<char> = uri.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            let key_start = i;
            while i < chars.len() && chars[i] != '=' && !chars[i].is_whitespace() {
                i += 1;
            }
            let key: String = chars[key_start..i].iter().collect();
            if i >= chars.len() || chars[i] != '=' {
                // 沒有值的片段直接略過
                continue;
            }
            i += 1;

            match key.as_str() {
                "sql" => {
                    parsed.sql = chars[i..].iter().collect::<String>().trim().to_string();
                    break;
                }
                "table" => {
                    i = parsed.parse_table(&chars, i);
                }
                _ => {
                    let (value, next) = read_value(&chars, i);
                    parsed.params.insert(key, value);
                    i = next;
                }
            }
        }

        parsed
    }

    fn parse_table(&mut self, chars: &[char], mut i: usize) -> usize {
        let (first, next) = read_identifier(chars, i);
        i = next;
        if i < chars.len() && chars[i] == '.' {
            let (second, next) = read_identifier(chars, i + 1);
            self.schema = first;
            self.table = second;
            i = next;
        } else {
            self.table = first;
        }

        let mut j = i;
        while j < chars.len() && chars[j] == ' ' {
            j += 1;
        }
        if j < chars.len() && chars[j] == '(' {
            if let Some(end) = chars[j..].iter().position(|c| *c == ')') {
                self.geometry_column = chars[j + 1..j + end].iter().collect();
                return j + end + 1;
            }
        }
        i
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn geometry_column(&self) -> &str {
        &self.geometry_column
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn database(&self) -> Option<&str> {
        self.param("dbname")
    }

    pub fn host(&self) -> Option<&str> {
        self.param("host")
    }

    pub fn port(&self) -> Option<&str> {
        self.param("port")
    }

    pub fn username(&self) -> Option<&str> {
        self.param("user")
    }

    pub fn password(&self) -> Option<&str> {
        self.param("password")
    }

    pub fn service(&self) -> Option<&str> {
        self.param("service")
    }

    /// 主鍵欄位
    pub fn key_column(&self) -> Option<&str> {
        self.param("key")
    }

    pub fn srid(&self) -> Option<&str> {
        self.param("srid")
    }

    /// `"schema"."table"`，稽核報表使用的表格識別字
    pub fn quoted_table_name(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table)
    }
}

fn read_value(chars: &[char], mut i: usize) -> (String, usize) {
    let mut value = String::new();
    if i < chars.len() && (chars[i] == '\'' || chars[i] == '"') {
        let quote = chars[i];
        i += 1;
        while i < chars.len() {
            match chars[i] {
                '\\' if i + 1 < chars.len() => {
                    value.push(chars[i + 1]);
                    i += 2;
                }
                c if c == quote => {
                    i += 1;
                    break;
                }
                c => {
                    value.push(c);
                    i += 1;
                }
            }
        }
    } else {
        while i < chars.len() && !chars[i].is_whitespace() {
            value.push(chars[i]);
            i += 1;
        }
    }
    (value, i)
}

fn read_identifier(chars: &[char], mut i: usize) -> (String, usize) {
    let mut ident = String::new();
    if i < chars.len() && chars[i] == '"' {
        i += 1;
        while i < chars.len() {
            if chars[i] == '"' {
                if i + 1 < chars.len() && chars[i + 1] == '"' {
                    ident.push('"');
                    i += 2;
                    continue;
                }
                i += 1;
                break;
            }
            ident.push(chars[i]);
            i += 1;
        }
    } else {
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '.' {
            ident.push(chars[i]);
            i += 1;
        }
    }
    (ident, i)
}
