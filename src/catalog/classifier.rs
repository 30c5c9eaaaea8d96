use crate::catalog::format::{
    format_carat_weight, format_ring_size, parse_number, row_metal_type,
};
use crate::catalog::rows::{ProductRow, present};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Candidate attributes that may become selectable options, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum OptionAttribute {
    CaratWeight,
    MetalType,
    Size,
}

impl OptionAttribute {
    pub const PRIORITY: [OptionAttribute; 3] = [
        OptionAttribute::CaratWeight,
        OptionAttribute::MetalType,
        OptionAttribute::Size,
    ];

    pub fn option_name(self) -> &'static str {
        match self {
            OptionAttribute::CaratWeight => "Carat Weight",
            OptionAttribute::MetalType => "Metal Type",
            OptionAttribute::Size => "Size",
        }
    }

    /// Normalised display value for a row, `None` when its source fields are missing.
    pub fn display_value(self, row: &ProductRow) -> Option<String> {
        match self {
            OptionAttribute::CaratWeight => present(&row.stone_weight).and_then(format_carat_weight),
            OptionAttribute::MetalType => row_metal_type(row),
            OptionAttribute::Size => present(&row.ring_size).and_then(format_ring_size),
        }
    }
}

/// An attribute that varies within a group, with its distinct display values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicAttribute {
    pub attribute: OptionAttribute,
    pub values: Vec<String>,
}

impl DynamicAttribute {
    pub fn name(&self) -> &'static str {
        self.attribute.option_name()
    }
}

/// Classifier output. Iteration order is the fixed priority order, which is
/// also the 1-based option position sent to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributeSet {
    attributes: Vec<DynamicAttribute>,
}

impl AttributeSet {
    pub fn iter(&self) -> impl Iterator<Item = &DynamicAttribute> {
        self.attributes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.attributes.iter().map(DynamicAttribute::name).collect()
    }
}

/// Decides which candidate attributes vary enough across the group's rows to
/// become options: an attribute is dynamic when it has at least two distinct
/// normalised values.
pub fn classify(rows: &[ProductRow]) -> AttributeSet {
    let attributes = OptionAttribute::PRIORITY
        .iter()
        .filter_map(|&attribute| {
            let distinct = distinct_values(attribute, rows);
            (distinct.len() >= 2).then(|| DynamicAttribute {
                attribute,
                values: sorted_values(distinct),
            })
        })
        .collect();
    AttributeSet { attributes }
}

fn distinct_values(attribute: OptionAttribute, rows: &[ProductRow]) -> BTreeSet<String> {
    rows.iter()
        .filter_map(|row| attribute.display_value(row))
        .collect()
}

/// Orders display values numerically by their leading number where one
/// exists, then lexically. Values without a number sort after numeric ones.
pub fn sorted_values(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut values: Vec<String> = values.into_iter().collect();
    values.sort_by(|a, b| compare_display_values(a, b));
    values
}

fn compare_display_values(a: &str, b: &str) -> Ordering {
    match (leading_number(a), leading_number(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn leading_number(value: &str) -> Option<f64> {
    value.split_whitespace().next().and_then(parse_number)
}
