use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One warehouse item as loaded for a group. Column names follow the
/// warehouse tables; everything except the item number is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRow {
    #[serde(rename = "No_", deserialize_with = "required_string")]
    pub id: String,
    #[serde(rename = "Web_Product_Group_ID", default, deserialize_with = "loose_string")]
    pub group_id: Option<String>,
    #[serde(rename = "Item_Category_Code", default, deserialize_with = "loose_string")]
    pub category: Option<String>,
    #[serde(rename = "Product_Subgroup_Code", default, deserialize_with = "loose_string")]
    pub subgroup: Option<String>,
    #[serde(rename = "Metal_Stamp", default, deserialize_with = "loose_string")]
    pub metal_stamp: Option<String>,
    #[serde(rename = "Metal_Color", default, deserialize_with = "loose_string")]
    pub metal_color: Option<String>,
    #[serde(rename = "Metal_Code", default, deserialize_with = "loose_string")]
    pub metal_code: Option<String>,
    #[serde(rename = "Primary_Gem_Material_Type", default, deserialize_with = "loose_string")]
    pub gem_material: Option<String>,
    #[serde(rename = "Primary_Gem_Shape", default, deserialize_with = "loose_string")]
    pub gem_shape: Option<String>,
    #[serde(rename = "Stone_Weight__Carats_", default, deserialize_with = "loose_string")]
    pub stone_weight: Option<String>,
    #[serde(rename = "Ring_Size", default, deserialize_with = "loose_string")]
    pub ring_size: Option<String>,
    #[serde(rename = "Image_SKU", default, deserialize_with = "loose_string")]
    pub image_key: Option<String>,
}

impl ProductRow {
    pub fn image_key(&self) -> Option<&str> {
        present(&self.image_key)
    }
}

/// Sub-part of an item (stones, settings), attached by parent item number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentRow {
    #[serde(rename = "Parent_Item_No_", deserialize_with = "required_string")]
    pub parent_id: String,
    #[serde(rename = "RANK", default)]
    pub rank: i64,
    #[serde(rename = "Metal_Type", default, deserialize_with = "loose_string")]
    pub metal_type: Option<String>,
    #[serde(rename = "Primary_Gem_Shape", default, deserialize_with = "loose_string")]
    pub gem_shape: Option<String>,
    #[serde(rename = "Primary_Gem_Material_Type", default, deserialize_with = "loose_string")]
    pub gem_material: Option<String>,
    #[serde(rename = "Stone_DEW__Carats_", default, deserialize_with = "loose_string")]
    pub stone_weight: Option<String>,
    #[serde(rename = "Pieces_Per", default)]
    pub pieces: Option<i64>,
    #[serde(rename = "Description", default, deserialize_with = "loose_string")]
    pub description: Option<String>,
}

/// Everything loaded for one group id.
#[derive(Debug, Clone, Default)]
pub struct GroupData {
    pub group_id: String,
    pub rows: Vec<ProductRow>,
    pub components: Vec<ComponentRow>,
}

impl GroupData {
    pub fn new(
        group_id: impl Into<String>,
        rows: Vec<ProductRow>,
        components: Vec<ComponentRow>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            rows,
            components,
        }
    }

    /// Components of one row, ordered by rank.
    pub fn components_for(&self, row_id: &str) -> Vec<&ComponentRow> {
        let mut parts: Vec<&ComponentRow> = self
            .components
            .iter()
            .filter(|component| component.parent_id == row_id)
            .collect();
        parts.sort_by_key(|component| component.rank);
        parts
    }
}

/// Trimmed value of an optional field, `None` when absent or blank.
pub fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

// Warehouse columns arrive as strings, numbers or null depending on the table.
fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

fn required_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    loose_string(deserializer)?
        .ok_or_else(|| serde::de::Error::custom("item number is required"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_mixed_column_types() {
        let row: ProductRow = serde_json::from_value(json!({
            "No_": 827748,
            "Web_Product_Group_ID": "GRP-1",
            "Stone_Weight__Carats_": 1.5,
            "Ring_Size": "7",
            "Metal_Stamp": null,
            "Image_SKU": "827749"
        }))
        .expect("row");
        assert_eq!(row.id, "827748");
        assert_eq!(row.stone_weight.as_deref(), Some("1.5"));
        assert_eq!(row.ring_size.as_deref(), Some("7"));
        assert_eq!(row.metal_stamp, None);
        assert_eq!(row.image_key(), Some("827749"));
    }

    #[test]
    fn rejects_row_without_item_number() {
        let err = serde_json::from_value::<ProductRow>(json!({ "No_": null }));
        assert!(err.is_err());
    }

    #[test]
    fn components_are_ordered_by_rank() {
        let group = GroupData::new(
            "G",
            vec![],
            vec![
                ComponentRow {
                    parent_id: "A".into(),
                    rank: 2,
                    ..Default::default()
                },
                ComponentRow {
                    parent_id: "B".into(),
                    rank: 1,
                    ..Default::default()
                },
                ComponentRow {
                    parent_id: "A".into(),
                    rank: 1,
                    ..Default::default()
                },
            ],
        );
        let ranks: Vec<i64> = group.components_for("A").iter().map(|c| c.rank).collect();
        assert_eq!(ranks, vec![1, 2]);
    }

    #[test]
    fn blank_values_are_not_present() {
        assert_eq!(present(&Some("  ".into())), None);
        assert_eq!(present(&Some(" 14K ".into())), Some("14K"));
        assert_eq!(present(&None), None);
    }
}
