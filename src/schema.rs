//! Data model shared by the driver, workers, aggregator and observers
//!
//! A [`ResultSet`] is the unit of update: an optional new [`KeyOrder`] plus
//! partial [`DeclResult`]s keyed by [`Key`]. Updates are merged field by
//! field, so one key's result can arrive as several partial messages.
//!
//! # Wire Format
//!
//! A result set is encoded as a two-element array: the ordering (or `null`)
//! followed by the result map as `[key, result]` pairs.
//!
//! ```json
//! [{"val": [0, 2, 1]}, [[0, {"source": "x = 1", "status": {"complete": null}, "output": "x = 1"}]]]
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of one declaration instance.
///
/// Keys are issued in increasing order for the lifetime of the process and
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(pub u64);

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Evaluation status of a declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StatusRepr", into = "StatusRepr")]
pub enum Status {
    Complete,
    Failed(String),
}

/// Serialized form of [`Status`]: `{"complete": null}` or `{"failed": "..."}`
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StatusRepr {
    Complete(()),
    Failed(String),
}

impl From<StatusRepr> for Status {
    fn from(repr: StatusRepr) -> Self {
        match repr {
            StatusRepr::Complete(()) => Status::Complete,
            StatusRepr::Failed(message) => Status::Failed(message),
        }
    }
}

impl From<Status> for StatusRepr {
    fn from(status: Status) -> Self {
        match status {
            Status::Complete => StatusRepr::Complete(()),
            Status::Failed(message) => StatusRepr::Failed(message),
        }
    }
}

/// Partial or complete result for one key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclResult {
    /// Declaration source text
    pub source: Option<String>,
    /// Evaluation status, absent until the worker finishes
    pub status: Option<Status>,
    /// Output text, appended across updates
    #[serde(default)]
    pub output: String,
}

impl DeclResult {
    /// A result carrying only the declaration's source text
    pub fn source(text: impl Into<String>) -> Self {
        Self {
            source: Some(text.into()),
            ..Self::default()
        }
    }

    /// A finished evaluation
    pub fn finished(status: Status, output: impl Into<String>) -> Self {
        Self {
            source: None,
            status: Some(status),
            output: output.into(),
        }
    }

    /// A parse error: source and failure in one message
    pub fn parse_error(text: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: Some(text.into()),
            status: Some(Status::Failed(message.into())),
            output: String::new(),
        }
    }

    /// Merge a later partial result into this one.
    ///
    /// `source` and `status` are replaced when present in `update`; `output`
    /// is appended.
    pub fn merge(&mut self, update: DeclResult) {
        if update.source.is_some() {
            self.source = update.source;
        }
        if update.status.is_some() {
            self.status = update.status;
        }
        self.output.push_str(&update.output);
    }
}

/// The full in-source-order sequence of keys from the latest parse
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOrder {
    pub val: Vec<Key>,
}

/// Published unit of update, and the aggregator's merged state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ResultSetRepr", into = "ResultSetRepr")]
pub struct ResultSet {
    pub order: Option<KeyOrder>,
    pub results: BTreeMap<Key, DeclResult>,
}

#[derive(Serialize, Deserialize)]
struct ResultSetRepr(
    Option<KeyOrder>,
    #[serde(with = "result_pairs")] BTreeMap<Key, DeclResult>,
);

impl From<ResultSetRepr> for ResultSet {
    fn from(ResultSetRepr(order, results): ResultSetRepr) -> Self {
        Self { order, results }
    }
}

impl From<ResultSet> for ResultSetRepr {
    fn from(set: ResultSet) -> Self {
        ResultSetRepr(set.order, set.results)
    }
}

impl ResultSet {
    /// An update carrying only a new ordering
    pub fn order(keys: Vec<Key>) -> Self {
        Self {
            order: Some(KeyOrder { val: keys }),
            results: BTreeMap::new(),
        }
    }

    /// An update carrying one partial result
    pub fn result(key: Key, result: DeclResult) -> Self {
        let mut results = BTreeMap::new();
        results.insert(key, result);
        Self {
            order: None,
            results,
        }
    }

    /// Merge an incoming update into this state
    pub fn merge(&mut self, update: ResultSet) {
        if update.order.is_some() {
            self.order = update.order;
        }
        for (key, result) in update.results {
            self.results.entry(key).or_default().merge(result);
        }
    }

    /// True once an ordering exists and every key in it has a status
    pub fn is_settled(&self) -> bool {
        match &self.order {
            Some(order) => order.val.iter().all(|key| {
                self.results
                    .get(key)
                    .is_some_and(|result| result.status.is_some())
            }),
            None => false,
        }
    }

    /// Results for the current ordering, in source order
    pub fn ordered(&self) -> Vec<(Key, Option<&DeclResult>)> {
        self.order
            .iter()
            .flat_map(|order| order.val.iter())
            .map(|key| (*key, self.results.get(key)))
            .collect()
    }

    /// Encode as one server-sent-events frame
    pub fn to_event_frame(&self) -> serde_json::Result<String> {
        Ok(format!("data:{}\n\n", serde_json::to_string(self)?))
    }
}

/// Serializes the result map as an array of `[key, result]` pairs
mod result_pairs {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{DeclResult, Key};

    pub fn serialize<S>(map: &BTreeMap<Key, DeclResult>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<Key, DeclResult>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pairs: Vec<(Key, DeclResult)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
