//! Result accumulator filled by protocol decoders.

use serde_json::{Map, Value};

/// Field map produced for one server.
pub type Fields = Map<String, Value>;

/// Group name used for per-player rows.
pub const PLAYERS: &str = "players";

/// Group name used for per-team rows.
pub const TEAMS: &str = "teams";

/// Insertion-ordered fields plus repeated groups of row records.
///
/// Decoders emit scalars with [`add`](Self::add) and row data with
/// [`add_sub`](Self::add_sub). Rows are built column by column: each
/// sub-field lands in the first row that does not have it yet, so a decoder
/// that emits every player's name and then every player's score still ends up
/// with aligned rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    fields: Fields,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a scalar field, replacing any previous value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn add_player(&mut self, key: &str, value: impl Into<Value>) {
        self.add_sub(PLAYERS, key, value);
    }

    pub fn add_team(&mut self, key: &str, value: impl Into<Value>) {
        self.add_sub(TEAMS, key, value);
    }

    /// Adds `key = value` to the first row of `group` lacking `key`, or to a
    /// new row when every existing row already has it.
    pub fn add_sub(&mut self, group: &str, key: &str, value: impl Into<Value>) {
        let entry = self
            .fields
            .entry(group.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        let Value::Array(rows) = entry else {
            return;
        };

        let slot = rows
            .iter()
            .position(|row| row.get(key).is_none())
            .unwrap_or_else(|| {
                rows.push(Value::Object(Map::new()));
                rows.len() - 1
            });

        if !rows[slot].is_object() {
            rows[slot] = Value::Object(Map::new());
        }
        if let Value::Object(row) = &mut rows[slot] {
            row.insert(key.to_string(), value.into());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Folds another result in. Groups are appended row-wise, scalars from
    /// `other` win.
    pub fn merge(&mut self, other: ResultSet) {
        for (name, value) in other.fields {
            match self.fields.get_mut(&name) {
                Some(Value::Array(rows)) if value.is_array() => {
                    if let Value::Array(more) = value {
                        rows.extend(more);
                    }
                }
                _ => {
                    self.fields.insert(name, value);
                }
            }
        }
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

impl From<ResultSet> for Fields {
    fn from(result: ResultSet) -> Self {
        result.fields
    }
}
