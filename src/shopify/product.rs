use crate::catalog::assembler::{AssembledGroup, VariantDescriptor};
use crate::catalog::descriptor::ProductDescriptor;
use serde::Serialize;
use serde_with::skip_serializing_none;

/// `ProductSetInput` for a group: descriptor fields plus assembled options
/// and variants.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSubmission {
    pub title: String,
    pub handle: String,
    pub product_type: Option<String>,
    pub description_html: String,
    pub vendor: String,
    pub status: &'static str,
    pub product_options: Vec<OptionInput>,
    pub variants: Vec<VariantInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionInput {
    pub name: String,
    pub position: usize,
    pub values: Vec<NamedValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedValue {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantInput {
    pub option_values: Vec<VariantOptionValue>,
    pub inventory_item: InventoryItemInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantOptionValue {
    pub option_name: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryItemInput {
    pub sku: String,
}

impl ProductSubmission {
    pub fn new(descriptor: &ProductDescriptor, assembled: &AssembledGroup) -> Self {
        Self {
            title: descriptor.title.clone(),
            handle: descriptor.handle.clone(),
            product_type: descriptor.product_type.clone(),
            description_html: descriptor.description_html.clone(),
            vendor: descriptor.vendor.clone(),
            status: descriptor.status,
            product_options: assembled
                .options
                .iter()
                .map(|option| OptionInput {
                    name: option.name.to_string(),
                    position: option.position,
                    values: option
                        .values
                        .iter()
                        .map(|value| NamedValue { name: value.clone() })
                        .collect(),
                })
                .collect(),
            variants: assembled.variants.iter().map(variant_input).collect(),
        }
    }

    pub fn skus(&self) -> Vec<&str> {
        self.variants
            .iter()
            .map(|variant| variant.inventory_item.sku.as_str())
            .collect()
    }
}

fn variant_input(variant: &VariantDescriptor) -> VariantInput {
    VariantInput {
        option_values: variant
            .option_values
            .iter()
            .map(|value| VariantOptionValue {
                option_name: value.option_name().to_string(),
                name: value.value.clone(),
            })
            .collect(),
        inventory_item: InventoryItemInput {
            sku: variant.sku.clone(),
        },
    }
}
