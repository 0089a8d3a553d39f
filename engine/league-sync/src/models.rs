use crate::error::{FailedOperation, Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Field name to value mapping carried by a record
pub type Fields = BTreeMap<String, Value>;

/// Last-modified marker. Kept for diagnostics only, never used for conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Marker {
    Version(i64),
    Timestamp(DateTime<Utc>),
}

impl Marker {
    /// Read a marker from a raw JSON value, ignoring shapes we don't understand
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Marker::Version),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| Marker::Timestamp(ts.with_timezone(&Utc))),
            _ => None,
        }
    }
}

/// A single league entity: a team, or one player's stats for a period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub fields: Fields,
    pub last_modified: Option<Marker>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), fields: Fields::new(), last_modified: None }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.last_modified = Some(marker);
        self
    }

    /// Overwrite the named fields, leaving every other field untouched
    pub fn merge_fields(&mut self, patch: &Fields) {
        for (name, value) in patch {
            self.fields.insert(name.clone(), value.clone());
        }
    }
}

/// Field equality used when diffing. Numbers compare by value so that `12` and `12.0` match.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs.iter().all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// String form of a scalar used as a key, `None` for anything else
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Describes how raw source items map onto records of one entity kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Target table in the store
    pub table: String,

    /// Raw fields forming the stable identifier, joined with ':'. They stay in `fields` too.
    pub id_fields: Vec<String>,

    /// Raw field holding the last-modified marker
    pub modified_field: Option<String>,

    /// Only keep records whose field value is an id in another table: (table, field)
    pub restrict_to: Option<(String, String)>,
}

impl RecordSchema {
    pub fn new(table: impl Into<String>, id_fields: &[&str]) -> Self {
        Self {
            table: table.into(),
            id_fields: id_fields.iter().map(|f| f.to_string()).collect(),
            modified_field: None,
            restrict_to: None,
        }
    }

    pub fn with_modified_field(mut self, field: impl Into<String>) -> Self {
        self.modified_field = Some(field.into());
        self
    }

    pub fn restricted_to(mut self, table: impl Into<String>, field: impl Into<String>) -> Self {
        self.restrict_to = Some((table.into(), field.into()));
        self
    }

    /// Parse one raw item. `index` is the item's position in the fetched sequence.
    pub fn parse(&self, index: usize, raw: Value) -> Result<Record> {
        let Value::Object(object) = raw else {
            return Err(SyncError::malformed(index, "expected a JSON object"));
        };

        let mut parts = Vec::with_capacity(self.id_fields.len());
        for field in &self.id_fields {
            let part = match object.get(field) {
                Some(value) => key_string(value).ok_or_else(|| {
                    SyncError::malformed(
                        index,
                        format!("identifier field '{}' has unusable value {}", field, value),
                    )
                })?,
                None => {
                    return Err(SyncError::malformed(
                        index,
                        format!("missing identifier field '{}'", field),
                    ))
                }
            };
            parts.push(part);
        }

        let last_modified = self
            .modified_field
            .as_ref()
            .and_then(|field| object.get(field))
            .and_then(Marker::from_value);

        let fields = object
            .into_iter()
            .filter(|(name, _)| self.modified_field.as_ref() != Some(name))
            .collect();

        Ok(Record { id: parts.join(":"), fields, last_modified })
    }
}

/// The entity kinds the two scripts synchronize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Teams,
    PlayerStats,
}

impl EntityKind {
    pub fn schema(&self) -> RecordSchema {
        match self {
            EntityKind::Teams => RecordSchema::new("teams", &["id"]).with_modified_field("updated_at"),
            EntityKind::PlayerStats => RecordSchema::new("player_stats", &["player_id", "season", "week"])
                .with_modified_field("updated_at")
                .restricted_to("players", "player_id"),
        }
    }

    /// Human readable label used in log lines
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Teams => "league data",
            EntityKind::PlayerStats => "player stats",
        }
    }
}

/// One write the applier must perform
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert(Record),
    Update { id: String, fields: Fields, last_modified: Option<Marker> },
}

impl Operation {
    pub fn id(&self) -> &str {
        match self {
            Operation::Insert(record) => &record.id,
            Operation::Update { id, .. } => id,
        }
    }
}

/// Ordered operations, at most one per identifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    operations: Vec<Operation>,
    positions: HashMap<String, usize>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation. An existing operation for the same id is replaced in place.
    pub fn push(&mut self, operation: Operation) {
        match self.positions.get(operation.id()) {
            Some(&position) => self.operations[position] = operation,
            None => {
                self.positions.insert(operation.id().to_string(), self.operations.len());
                self.operations.push(operation);
            }
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn inserts(&self) -> usize {
        self.operations.iter().filter(|op| matches!(op, Operation::Insert(_))).count()
    }

    pub fn updates(&self) -> usize {
        self.operations.len() - self.inserts()
    }
}

/// Outcome of one sync run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub malformed: usize,
    pub filtered: usize,
    pub failed: Vec<FailedOperation>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn any failed writes into a `PartialApplyFailure`
    pub fn ensure_success(&self) -> Result<()> {
        if self.failed.is_empty() {
            return Ok(());
        }
        Err(SyncError::PartialApplyFailure {
            failed: self.failed.clone(),
            applied: self.inserted + self.updated,
        })
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={} inserted={} updated={} unchanged={} malformed={} filtered={} failed={}",
            self.fetched,
            self.inserted,
            self.updated,
            self.unchanged,
            self.malformed,
            self.filtered,
            self.failed.len()
        )
    }
}
