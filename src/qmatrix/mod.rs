//! Q-matrix: which attributes each item requires
//!
//! Built once per assessment design and read-only during estimation. Rows are
//! validated on construction (length K, binary entries, unique item ids), so
//! every downstream module can index without re-checking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CdmError, Result};
use crate::types::{AttributeSet, MAX_ATTRIBUTES};

/// Minimum number of items per attribute for completeness
pub const MIN_ITEMS_PER_ATTRIBUTE: usize = 2;

/// One Q-matrix row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QMatrixItem {
    pub id: String,
    pub row: Vec<bool>,
    /// Indices k with q_jk = 1, ascending
    pub required: Vec<usize>,
}

/// Wire form of a Q-matrix (item id + 0/1 row)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QMatrixDef {
    pub num_attributes: usize,
    pub items: Vec<(String, Vec<u8>)>,
}

/// Item-by-attribute binary design matrix
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "QMatrixDef", into = "QMatrixDef")]
pub struct QMatrix {
    num_attributes: usize,
    items: Vec<QMatrixItem>,
    index: HashMap<String, usize>,
}

impl PartialEq for QMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.num_attributes == other.num_attributes && self.items == other.items
    }
}

/// Q-matrix identifiability diagnostics
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QMatrixDiagnostics {
    /// Every attribute is required by at least `MIN_ITEMS_PER_ATTRIBUTE` items
    pub is_complete: bool,
    /// Every attribute pair differs on at least one item
    pub is_discernible: bool,
    /// Items requiring each attribute
    pub attribute_coverage: Vec<usize>,
    /// K x K, symmetric; diagonal is true
    pub discernibility_matrix: Vec<Vec<bool>>,
    /// Items with an all-zero row (trivially mastered by everyone)
    pub trivial_items: Vec<String>,
    pub completeness_warnings: Vec<String>,
}

impl QMatrix {
    /// Build from integer rows; every entry must be 0 or 1
    pub fn new(num_attributes: usize, rows: Vec<(String, Vec<u8>)>) -> Result<Self> {
        let mut converted = Vec::with_capacity(rows.len());
        for (id, row) in rows {
            let mut bits = Vec::with_capacity(row.len());
            for (k, &v) in row.iter().enumerate() {
                match v {
                    0 => bits.push(false),
                    1 => bits.push(true),
                    other => {
                        return Err(CdmError::invalid(format!(
                            "item '{id}' has non-binary entry {other} at attribute {k}"
                        )))
                    }
                }
            }
            converted.push((id, bits));
        }
        Self::from_bool_rows(num_attributes, converted)
    }

    pub fn from_bool_rows(num_attributes: usize, rows: Vec<(String, Vec<bool>)>) -> Result<Self> {
        if num_attributes == 0 || num_attributes > MAX_ATTRIBUTES {
            return Err(CdmError::invalid(format!(
                "K={num_attributes} outside supported range 1..={MAX_ATTRIBUTES}"
            )));
        }
        if rows.is_empty() {
            return Err(CdmError::invalid("Q-matrix has no items"));
        }

        let mut items = Vec::with_capacity(rows.len());
        let mut index = HashMap::with_capacity(rows.len());
        for (j, (id, row)) in rows.into_iter().enumerate() {
            if id.is_empty() {
                return Err(CdmError::invalid(format!("item {j} has an empty id")));
            }
            if row.len() != num_attributes {
                return Err(CdmError::invalid(format!(
                    "item '{id}' row has length {}, expected {num_attributes}",
                    row.len()
                )));
            }
            if index.insert(id.clone(), j).is_some() {
                return Err(CdmError::invalid(format!("duplicate item id '{id}'")));
            }
            let required = row
                .iter()
                .enumerate()
                .filter_map(|(k, &q)| q.then_some(k))
                .collect();
            items.push(QMatrixItem { id, row, required });
        }

        Ok(Self {
            num_attributes,
            items,
            index,
        })
    }

    /// Build from relational (item id, attribute id) rows.
    ///
    /// Items appear in order of first occurrence; attribute ids must belong to
    /// `attributes`.
    pub fn from_rows<I, S>(attributes: &AttributeSet, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let k = attributes.len();
        let mut order: Vec<(String, Vec<bool>)> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (item, attr) in rows {
            let (item, attr) = (item.as_ref(), attr.as_ref());
            let a = attributes.index_of(attr).ok_or_else(|| {
                CdmError::invalid(format!("unknown attribute '{attr}' for item '{item}'"))
            })?;
            let pos = match seen.get(item) {
                Some(&pos) => pos,
                None => {
                    order.push((item.to_string(), vec![false; k]));
                    seen.insert(item.to_string(), order.len() - 1);
                    order.len() - 1
                }
            };
            order[pos].1[a] = true;
        }

        Self::from_bool_rows(k, order)
    }

    pub fn num_attributes(&self) -> usize {
        self.num_attributes
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[QMatrixItem] {
        &self.items
    }

    pub fn item(&self, j: usize) -> &QMatrixItem {
        &self.items[j]
    }

    pub fn position(&self, item_id: &str) -> Option<usize> {
        self.index.get(item_id).copied()
    }

    pub fn get(&self, item_id: &str) -> Option<&QMatrixItem> {
        self.position(item_id).map(|j| &self.items[j])
    }

    pub fn required(&self, j: usize) -> &[usize] {
        &self.items[j].required
    }

    pub fn item_ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|it| it.id.as_str())
    }

    /// Completeness and discernibility checks
    pub fn diagnostics(&self) -> QMatrixDiagnostics {
        let k = self.num_attributes;

        let mut attribute_coverage = vec![0usize; k];
        for item in &self.items {
            for &a in &item.required {
                attribute_coverage[a] += 1;
            }
        }

        let completeness_warnings: Vec<String> = attribute_coverage
            .iter()
            .enumerate()
            .filter(|(_, &n)| n < MIN_ITEMS_PER_ATTRIBUTE)
            .map(|(a, &n)| {
                format!(
                    "attribute {a} covered by only {n} item(s), minimum {MIN_ITEMS_PER_ATTRIBUTE} required"
                )
            })
            .collect();

        let mut discernibility_matrix = vec![vec![false; k]; k];
        for k1 in 0..k {
            discernibility_matrix[k1][k1] = true;
            for k2 in (k1 + 1)..k {
                let d = self.items.iter().any(|it| it.row[k1] != it.row[k2]);
                discernibility_matrix[k1][k2] = d;
                discernibility_matrix[k2][k1] = d;
            }
        }
        let is_discernible = discernibility_matrix.iter().all(|r| r.iter().all(|&d| d));

        let trivial_items = self
            .items
            .iter()
            .filter(|it| it.required.is_empty())
            .map(|it| it.id.clone())
            .collect();

        QMatrixDiagnostics {
            is_complete: completeness_warnings.is_empty(),
            is_discernible,
            attribute_coverage,
            discernibility_matrix,
            trivial_items,
            completeness_warnings,
        }
    }
}

impl TryFrom<QMatrixDef> for QMatrix {
    type Error = CdmError;

    fn try_from(def: QMatrixDef) -> Result<Self> {
        QMatrix::new(def.num_attributes, def.items)
    }
}

impl From<QMatrix> for QMatrixDef {
    fn from(q: QMatrix) -> Self {
        QMatrixDef {
            num_attributes: q.num_attributes,
            items: q
                .items
                .into_iter()
                .map(|it| (it.id, it.row.into_iter().map(u8::from).collect()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_attribute_design() -> QMatrix {
        QMatrix::new(
            2,
            vec![
                ("i1".into(), vec![1, 0]),
                ("i2".into(), vec![1, 0]),
                ("i3".into(), vec![0, 1]),
                ("i4".into(), vec![0, 1]),
                ("i5".into(), vec![1, 1]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_required_attributes() {
        let q = two_attribute_design();
        assert_eq!(q.num_items(), 5);
        assert_eq!(q.required(4), &[0, 1]);
        assert_eq!(q.position("i3"), Some(2));
        assert!(q.get("missing").is_none());
    }

    #[test]
    fn test_rejects_malformed_rows() {
        assert!(QMatrix::new(2, vec![("a".into(), vec![1, 0, 1])]).is_err());
        assert!(QMatrix::new(2, vec![("a".into(), vec![1, 2])]).is_err());
        assert!(QMatrix::new(2, vec![]).is_err());
        assert!(QMatrix::new(0, vec![("a".into(), vec![])]).is_err());
        let dup = QMatrix::new(1, vec![("a".into(), vec![1]), ("a".into(), vec![0])]);
        assert!(dup.is_err());
    }

    #[test]
    fn test_from_relational_rows() {
        let attrs = AttributeSet::from_ids(&["data", "diagnosis", "therapy"]).unwrap();
        let rows = vec![
            ("q1", "data"),
            ("q1", "therapy"),
            ("q2", "diagnosis"),
            ("q1", "data"),
        ];
        let q = QMatrix::from_rows(&attrs, rows).unwrap();
        assert_eq!(q.num_items(), 2);
        assert_eq!(q.item(0).row, vec![true, false, true]);
        assert_eq!(q.item(1).required, vec![1]);

        let bad = QMatrix::from_rows(&attrs, vec![("q1", "nope")]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_diagnostics() {
        let q = two_attribute_design();
        let d = q.diagnostics();
        assert!(d.is_complete);
        assert!(d.is_discernible);
        assert_eq!(d.attribute_coverage, vec![3, 3]);

        // identical columns, single coverage, one trivial item
        let q = QMatrix::new(
            3,
            vec![
                ("a".into(), vec![1, 1, 0]),
                ("b".into(), vec![0, 0, 0]),
            ],
        )
        .unwrap();
        let d = q.diagnostics();
        assert!(!d.is_complete);
        assert!(!d.is_discernible);
        assert!(!d.discernibility_matrix[0][1]);
        assert!(d.discernibility_matrix[0][2]);
        assert_eq!(d.trivial_items, vec!["b".to_string()]);
        assert_eq!(d.completeness_warnings.len(), 3);
    }

    #[test]
    fn test_serde_roundtrip_revalidates() {
        let q = two_attribute_design();
        let json = serde_json::to_string(&q).unwrap();
        let back: QMatrix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q);
        assert_eq!(back.position("i5"), Some(4));

        let bad = r#"{"numAttributes":2,"items":[["x",[1,3]]]}"#;
        assert!(serde_json::from_str::<QMatrix>(bad).is_err());
    }
}
