use crate::catalog::classifier::{AttributeSet, OptionAttribute, sorted_values};
use crate::catalog::rows::ProductRow;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::warn;

/// One selected option on a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionValue {
    pub attribute: OptionAttribute,
    pub value: String,
}

impl OptionValue {
    pub fn option_name(&self) -> &'static str {
        self.attribute.option_name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantDescriptor {
    pub sku: String,
    pub option_values: Vec<OptionValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
}

impl VariantDescriptor {
    pub fn combination_key(&self) -> CombinationKey {
        CombinationKey::from_values(&self.option_values)
    }
}

/// Order-independent signature of a variant's option values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CombinationKey(String);

impl CombinationKey {
    pub fn from_values(values: &[OptionValue]) -> Self {
        let tokens: BTreeSet<String> = values
            .iter()
            .map(|value| format!("{}:{}", value.option_name(), value.value))
            .collect();
        Self(tokens.into_iter().collect::<Vec<_>>().join("|"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CombinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<no options>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// A product-level option with its 1-based position and ordered values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductOption {
    pub name: &'static str,
    pub position: usize,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedVariant {
    pub sku: String,
    pub combination: CombinationKey,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledGroup {
    pub options: Vec<ProductOption>,
    pub variants: Vec<VariantDescriptor>,
    pub dropped: Vec<DroppedVariant>,
    /// Variant SKU to image key, for binding images after creation.
    pub image_keys_by_sku: BTreeMap<String, String>,
}

impl AssembledGroup {
    pub fn image_keys(&self) -> BTreeSet<&str> {
        self.image_keys_by_sku.values().map(String::as_str).collect()
    }
}

/// Builds one variant per row, restricted to the group's dynamic attributes,
/// keeping only the first row for each combination of option values.
///
/// When nothing varies across the group every row falls back to its own
/// parseable candidate values, so single-variant products still carry
/// options. A row that ends up with no option values at all is kept here
/// and left for submission validation to reject.
pub fn assemble(group_id: &str, rows: &[ProductRow], attributes: &AttributeSet) -> AssembledGroup {
    let selected: Vec<OptionAttribute> = if attributes.is_empty() {
        OptionAttribute::PRIORITY.to_vec()
    } else {
        attributes.iter().map(|entry| entry.attribute).collect()
    };

    let mut seen: HashSet<CombinationKey> = HashSet::new();
    let mut assembled = AssembledGroup::default();

    for row in rows {
        let option_values: Vec<OptionValue> = selected
            .iter()
            .filter_map(|&attribute| {
                attribute
                    .display_value(row)
                    .map(|value| OptionValue { attribute, value })
            })
            .collect();
        let variant = VariantDescriptor {
            sku: row.id.trim().to_string(),
            option_values,
            image_key: row.image_key().map(str::to_string),
        };
        let combination = variant.combination_key();
        if !seen.insert(combination.clone()) {
            warn!(
                target = "export.pipeline",
                group_id = %group_id,
                sku = %variant.sku,
                combination = %combination,
                "duplicate_variant_dropped"
            );
            assembled.dropped.push(DroppedVariant {
                sku: variant.sku,
                combination,
            });
            continue;
        }
        if let Some(key) = &variant.image_key {
            assembled
                .image_keys_by_sku
                .insert(variant.sku.clone(), key.clone());
        }
        assembled.variants.push(variant);
    }

    assembled.options = if attributes.is_empty() {
        options_from_variants(&assembled.variants)
    } else {
        attributes
            .iter()
            .enumerate()
            .map(|(idx, entry)| ProductOption {
                name: entry.name(),
                position: idx + 1,
                values: entry.values.clone(),
            })
            .collect()
    };
    assembled
}

fn options_from_variants(variants: &[VariantDescriptor]) -> Vec<ProductOption> {
    let mut values: BTreeMap<OptionAttribute, BTreeSet<String>> = BTreeMap::new();
    for variant in variants {
        for option in &variant.option_values {
            values
                .entry(option.attribute)
                .or_default()
                .insert(option.value.clone());
        }
    }
    OptionAttribute::PRIORITY
        .iter()
        .filter_map(|attribute| values.remove(attribute).map(|set| (*attribute, set)))
        .enumerate()
        .map(|(idx, (attribute, set))| ProductOption {
            name: attribute.option_name(),
            position: idx + 1,
            values: sorted_values(set),
        })
        .collect()
}
