//! Display normalisation shared by option classification, variant assembly
//! and title generation. Every place that turns raw warehouse values into
//! customer-facing strings goes through here so option values always line up.

use crate::catalog::rows::{ProductRow, present};

/// Composes the metal display name from stamp, color and metal code.
pub fn format_metal_type(stamp: &str, color: &str, code: Option<&str>) -> String {
    let color = title_case(color.trim());
    let stamp = stamp.trim();
    match code.map(str::trim).unwrap_or("") {
        "10K" | "14K" | "18K" => format!("{stamp} {color} Gold"),
        "SILVER" => format!("{color} Silver"),
        "PLAT" => "Platinum".to_string(),
        "TANTALUM" => prefixed_metal("Tantalum", &color),
        "TITANIUM" => prefixed_metal("Titanium", &color),
        _ => format!("{stamp} {color}"),
    }
}

fn prefixed_metal(metal: &str, color: &str) -> String {
    if color.is_empty() {
        metal.to_string()
    } else {
        format!("{metal} {color}")
    }
}

/// Metal display name for a row; rows missing stamp or color have none.
pub fn row_metal_type(row: &ProductRow) -> Option<String> {
    let stamp = present(&row.metal_stamp)?;
    let color = present(&row.metal_color)?;
    Some(format_metal_type(stamp, color, present(&row.metal_code)))
}

/// Stone weight as `"{w:.2} CTW"`. Non-numeric and zero weights are dropped.
pub fn format_carat_weight(raw: &str) -> Option<String> {
    let weight = parse_number(raw)?;
    if weight == 0.0 {
        return None;
    }
    Some(format!("{weight:.2} CTW"))
}

/// Ring size with one decimal; unparseable sizes are kept verbatim.
pub fn format_ring_size(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match parse_number(trimmed) {
        Some(size) => Some(format!("{size:.1}")),
        None => Some(trimmed.to_string()),
    }
}

pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Upper-cases the first letter of every alphabetic run and lower-cases the
/// rest, so `"WHITE"` becomes `"White"` and `"rose-gold"` becomes `"Rose-Gold"`.
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut previous_alpha = false;
    for ch in value.chars() {
        if ch.is_alphabetic() {
            if previous_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(ch);
            previous_alpha = false;
        }
    }
    out
}
