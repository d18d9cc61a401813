//! Landsat scene metadata (`*_MTL.txt`) parser
//!
//! The MTL format is a tree of `GROUP = NAME` / `END_GROUP = NAME` blocks holding
//! `KEY = VALUE` lines and terminated by a bare `END`. Values are numbers, ISO dates
//! or (possibly quoted) text.

use crate::types::{RasterError, RasterResult};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

/// Single MTL value
#[derive(Debug, Clone, PartialEq)]
pub enum MtlValue {
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl MtlValue {
    fn parse(raw: &str) -> MtlValue {
        let raw = raw.trim();
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            return MtlValue::Text(raw[1..raw.len() - 1].to_string());
        }
        if let Ok(number) = raw.parse::<f64>() {
            return MtlValue::Number(number);
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return MtlValue::Date(date);
        }
        MtlValue::Text(raw.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MtlValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MtlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            MtlValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

/// Named MTL group with its fields and nested groups
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MtlGroup {
    pub name: String,
    pub fields: BTreeMap<String, MtlValue>,
    pub groups: Vec<MtlGroup>,
}

impl MtlGroup {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<&MtlValue> {
        self.fields.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(MtlValue::as_f64)
    }

    /// Depth-first search for a group by name, including this one
    pub fn find_group(&self, name: &str) -> Option<&MtlGroup> {
        if self.name == name {
            return Some(self);
        }
        self.groups.iter().find_map(|g| g.find_group(name))
    }
}

/// Parsed MTL document; the root group is unnamed
#[derive(Debug, Clone, PartialEq)]
pub struct MtlDocument {
    pub root: MtlGroup,
}

impl MtlDocument {
    pub fn parse(content: &str) -> RasterResult<MtlDocument> {
        let line_pattern = Regex::new(r"^\s*([A-Za-z0-9_]+)\s*=\s*(.*?)\s*$")
            .map_err(|e| RasterError::Metadata(format!("Regex error: {}", e)))?;
        let mut stack: Vec<MtlGroup> = vec![MtlGroup::new("")];

        for (line_no, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == "END" {
                break;
            }

            let caps = line_pattern.captures(trimmed).ok_or_else(|| {
                RasterError::Metadata(format!("Malformed MTL line {}: '{}'", line_no + 1, trimmed))
            })?;
            let key = &caps[1];
            let value = &caps[2];

            match key {
                "GROUP" => stack.push(MtlGroup::new(value)),
                "END_GROUP" => {
                    if stack.len() < 2 {
                        return Err(RasterError::Metadata(format!(
                            "END_GROUP = {} without matching GROUP at line {}",
                            value,
                            line_no + 1
                        )));
                    }
                    let group = stack.pop().ok_or_else(|| {
                        RasterError::Metadata("MTL group stack is empty".to_string())
                    })?;
                    if group.name != value {
                        return Err(RasterError::Metadata(format!(
                            "END_GROUP = {} closes group {} at line {}",
                            value,
                            group.name,
                            line_no + 1
                        )));
                    }
                    if let Some(parent) = stack.last_mut() {
                        parent.groups.push(group);
                    }
                }
                _ => {
                    if let Some(current) = stack.last_mut() {
                        current.fields.insert(key.to_string(), MtlValue::parse(value));
                    }
                }
            }
        }

        if stack.len() != 1 {
            let open: Vec<String> = stack.iter().skip(1).map(|g| g.name.clone()).collect();
            return Err(RasterError::Metadata(format!("Unclosed MTL groups: {:?}", open)));
        }

        let root = stack.pop().ok_or_else(|| RasterError::Metadata("Empty MTL document".to_string()))?;
        log::debug!("Parsed MTL document with {} top-level groups", root.groups.len());
        Ok(MtlDocument { root })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> RasterResult<MtlDocument> {
        log::info!("Reading scene metadata from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn find_group(&self, name: &str) -> Option<&MtlGroup> {
        self.root.find_group(name)
    }

    /// First group among `names` that exists and holds `key`
    pub fn lookup(&self, names: &[&str], key: &str) -> Option<&MtlValue> {
        names
            .iter()
            .filter_map(|name| self.find_group(name))
            .find_map(|group| group.get(key))
    }

    pub fn lookup_f64(&self, names: &[&str], key: &str) -> Option<f64> {
        self.lookup(names, key).and_then(MtlValue::as_f64)
    }
}
