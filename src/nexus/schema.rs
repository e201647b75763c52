//! Schema metadata carried by a nexus
//!
//! The row and table types themselves belong to the type system that sits on
//! top of this crate. Here they are only structural descriptions that two
//! definitions of the same nexus must agree on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One field of a row type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub type_name: String,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Structural description of a row
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RowType {
    pub fields: Vec<FieldDef>,
}

impl RowType {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// Builder-style field addition
    pub fn with_field(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.fields.push(FieldDef::new(name, type_name));
        self
    }
}

/// Structural description of a table: its row type and key fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableType {
    pub row_type: RowType,
    pub key_fields: Vec<String>,
}

impl TableType {
    pub fn new(row_type: RowType, key_fields: Vec<String>) -> Self {
        Self {
            row_type,
            key_fields,
        }
    }
}

/// Which way the main queue of a nexus points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Data flows downstream, from writers to readers
    #[default]
    Forward,
    /// Data flows upstream, used for feedback and request/response loops
    Reverse,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Forward => "direct",
            Direction::Reverse => "reverse",
        }
    }
}

/// How trays are distributed among the readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FanoutMode {
    /// Every reader gets every tray
    #[default]
    Broadcast,
    /// Each tray goes to exactly one reader
    Unicast,
}

/// Complete definition of a nexus, as given by the first endpoint
/// that exports it
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NexusDef {
    pub name: String,
    /// Labels of the main queue and their row types, in order
    pub labels: Vec<(String, RowType)>,
    pub row_types: BTreeMap<String, RowType>,
    pub table_types: BTreeMap<String, TableType>,
    pub direction: Direction,
    pub fanout: FanoutMode,
    /// Reader queue high-water mark; the app default applies when absent
    pub queue_limit: Option<usize>,
}

impl NexusDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, row_type: RowType) -> Self {
        self.labels.push((name.into(), row_type));
        self
    }

    pub fn with_row_type(mut self, name: impl Into<String>, row_type: RowType) -> Self {
        self.row_types.insert(name.into(), row_type);
        self
    }

    pub fn with_table_type(mut self, name: impl Into<String>, table_type: TableType) -> Self {
        self.table_types.insert(name.into(), table_type);
        self
    }

    pub fn reverse(mut self) -> Self {
        self.direction = Direction::Reverse;
        self
    }

    pub fn unicast(mut self) -> Self {
        self.fanout = FanoutMode::Unicast;
        self
    }

    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = Some(limit);
        self
    }

    /// Describe the first structural difference from another definition,
    /// or `None` if they match.
    pub fn mismatch(&self, other: &NexusDef) -> Option<String> {
        if self.name != other.name {
            return Some(format!("name '{}' vs '{}'", self.name, other.name));
        }
        if self.direction != other.direction {
            return Some(format!(
                "direction {} vs {}",
                self.direction.name(),
                other.direction.name()
            ));
        }
        if self.fanout != other.fanout {
            return Some(format!("fanout {:?} vs {:?}", self.fanout, other.fanout));
        }
        if self.labels != other.labels {
            return Some("labels differ".to_string());
        }
        if self.row_types != other.row_types {
            return Some("row types differ".to_string());
        }
        if self.table_types != other.table_types {
            return Some("table types differ".to_string());
        }
        None
    }
}
