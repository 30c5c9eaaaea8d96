use crate::catalog::format::{parse_number, row_metal_type, title_case};
use crate::catalog::rows::{GroupData, ProductRow, present};
use serde::Serialize;

const VENDOR: &str = "Charles Colvard";
const MAX_HANDLE_LEN: usize = 255;

/// Product-level fields the variants and media are attached to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductDescriptor {
    pub title: String,
    pub handle: String,
    pub product_type: Option<String>,
    pub description_html: String,
    pub vendor: String,
    pub status: &'static str,
}

impl ProductDescriptor {
    /// Built from the group's first row; gem shape and material fall back to
    /// the row's top-ranked component when the row itself has none.
    pub fn from_group(group: &GroupData) -> Option<Self> {
        let lead = group.rows.first()?;
        let lead_component = group.components_for(&lead.id).into_iter().next();
        let gem_shape = present(&lead.gem_shape)
            .or_else(|| lead_component.and_then(|c| present(&c.gem_shape)))
            .map(str::to_string);
        let gem_material = present(&lead.gem_material)
            .or_else(|| lead_component.and_then(|c| present(&c.gem_material)))
            .map(str::to_string);
        let facts = ProductFacts {
            row: lead,
            gem_shape,
            gem_material,
        };

        let title = facts.title();
        Some(Self {
            handle: build_handle(&title, &group.group_id),
            title,
            product_type: present(&lead.category).map(product_type_name),
            description_html: facts.description(),
            vendor: VENDOR.to_string(),
            status: "ACTIVE",
        })
    }
}

struct ProductFacts<'a> {
    row: &'a ProductRow,
    gem_shape: Option<String>,
    gem_material: Option<String>,
}

impl ProductFacts<'_> {
    fn stone_weight(&self) -> Option<f64> {
        present(&self.row.stone_weight)
            .and_then(parse_number)
            .filter(|weight| *weight > 0.0)
    }

    fn title(&self) -> String {
        let mut parts = Vec::new();
        if let Some(weight) = self.stone_weight() {
            if self.gem_material.as_deref() == Some("MOISSANITE") {
                parts.push(format!("{weight:.2} CTW DEW"));
            } else {
                parts.push(format!("{weight:.2} CTW"));
            }
        }
        if let Some(shape) = &self.gem_shape {
            parts.push(title_case(shape));
        }
        if let Some(material) = &self.gem_material {
            parts.push(material_name(material));
        }
        if let Some(subgroup) = present(&self.row.subgroup) {
            parts.push(title_case(subgroup));
        }
        if let Some(category) = present(&self.row.category) {
            parts.push(title_case(category));
        }
        if let Some(metal) = row_metal_type(self.row) {
            parts.push(format!("in {metal}"));
        }
        parts.join(" ")
    }

    fn description(&self) -> String {
        let mut sentences = Vec::new();
        if let Some(material) = &self.gem_material {
            sentences.push(format!("Beautiful {} jewelry", material_name(material)));
        }
        if let Some(metal) = row_metal_type(self.row) {
            sentences.push(format!("crafted in {metal}"));
        }
        if let Some(weight) = self.stone_weight() {
            sentences.push(format!("with {weight:.2} total carat weight"));
        }
        if sentences.is_empty() {
            return String::new();
        }
        format!("{}.", sentences.join(". "))
    }
}

pub fn material_name(code: &str) -> String {
    match code.trim() {
        "LGD" => "Lab-Grown Diamond".into(),
        "MOISSANITE" => "Moissanite".into(),
        "NAT" => "Natural Diamond".into(),
        "CZ" => "Cubic Zirconia".into(),
        "SAPPHIRE" | "RUBY" | "EMERALD" | "AMETHYST" => title_case(code.trim()),
        other => other.to_string(),
    }
}

pub fn product_type_name(category: &str) -> String {
    match category {
        "RING" => "Ring".into(),
        "EARRING" => "Earring".into(),
        "NECKLACE" => "Necklace".into(),
        "BRACELET" => "Bracelet".into(),
        "PENDANT" => "Pendant".into(),
        "GEMSTONE" => "Gemstone".into(),
        other => other.to_string(),
    }
}

/// URL handle: lower-cased title reduced to `[a-z0-9-]`, suffixed with the group id.
pub fn build_handle(title: &str, group_id: &str) -> String {
    let lowered = title.to_lowercase().replace(' ', "-");
    let filtered: String = lowered
        .chars()
        .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || *ch == '-')
        .collect();
    let mut collapsed = String::with_capacity(filtered.len());
    for ch in filtered.chars() {
        if ch == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(ch);
    }
    let base = collapsed.trim_matches('-');
    let mut handle = if base.is_empty() {
        group_id.to_lowercase()
    } else {
        format!("{base}-{}", group_id.to_lowercase())
    };
    if handle.len() > MAX_HANDLE_LEN {
        let mut cut = MAX_HANDLE_LEN;
        while !handle.is_char_boundary(cut) {
            cut -= 1;
        }
        handle.truncate(cut);
    }
    handle
}
