//! Read-only API usage frequencies, consulted for ranking and rarity
//! pruning.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::runtime::{FieldInfo, MethodInfo};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    /// Type name -> member key -> observed count.
    pub types: BTreeMap<String, BTreeMap<String, u64>>,
    pub average: f64,
    pub total: u64,
}

impl Default for Corpus {
    /// No observations: every member weighs the same.
    fn default() -> Self {
        Self {
            types: BTreeMap::new(),
            average: 1.0,
            total: 0,
        }
    }
}

/// `name(arity)` for methods and constructors.
pub fn method_key(method: &MethodInfo) -> String {
    format!("{}({})", method.name, method.params.len())
}

pub fn field_key(field: &FieldInfo) -> String {
    field.name.to_string()
}

impl Corpus {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SearchError> {
        let err = |message: String| SearchError::Corpus {
            path: path.to_owned(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;

        Self::from_json_str(&text).map_err(|e| err(e.to_string()))
    }

    /// Observed weight of `key` on `ty`. Members of types the corpus has
    /// never seen weigh the average.
    pub fn weight(&self, ty: &str, key: &str) -> f64 {
        match self.types.get(ty) {
            Some(members) => members.get(key).copied().unwrap_or(0) as f64,
            None => self.average,
        }
    }

    pub fn is_rare(&self, ty: &str, key: &str, rare_fraction: f64) -> bool {
        self.types.contains_key(ty) && self.weight(ty, key) < rare_fraction * self.average
    }

    /// Mean log-weight of the given `(type, member key)` pairs. Higher is
    /// more natural.
    pub fn naturalness<'a, I>(&self, members: I) -> f64
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let (sum, count) = members.into_iter()
            .map(|(ty, key)| self.weight(ty, key).ln_1p())
            .fold((0.0, 0usize), |(sum, count), w| (sum + w, count + 1));

        if count == 0 {
            self.average.ln_1p()
        } else {
            sum / count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "types": {
            "String": { "length(0)": 900, "toUpperCase(0)": 120, "intern(0)": 1 },
            "Point": { "x": 40 }
        },
        "average": 100.0,
        "total": 1061
    }"#;

    #[test]
    fn rarity_and_weights() {
        let corpus = Corpus::from_json_str(SAMPLE).unwrap();

        assert!(corpus.is_rare("String", "intern(0)", 0.05));
        assert!(corpus.is_rare("String", "hashCode(0)", 0.05));
        assert!(!corpus.is_rare("String", "length(0)", 0.05));
        assert!(!corpus.is_rare("Unknown", "anything(0)", 0.05));
        assert_eq!(corpus.weight("Unknown", "f"), 100.0);
    }

    #[test]
    fn common_members_are_more_natural() {
        let corpus = Corpus::from_json_str(SAMPLE).unwrap();
        let common = corpus.naturalness([("String", "length(0)")]);
        let rare = corpus.naturalness([("String", "intern(0)")]);
        let mixed = corpus.naturalness([("String", "length(0)"), ("String", "intern(0)")]);

        assert!(common > mixed && mixed > rare);
        assert_eq!(corpus.naturalness(std::iter::empty::<(&str, &str)>()), 100f64.ln_1p());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Corpus::from_json_str("{ \"types\": 3 }").is_err());
    }
}
