use crate::catalog::assembler::AssembledGroup;
use crate::catalog::descriptor::ProductDescriptor;

const MAX_TITLE_LEN: usize = 255;
const MAX_SKU_LEN: usize = 255;

/// Checks a product before it is sent. Returns every problem found; an empty
/// list means the submission may proceed.
pub fn validate_submission(
    descriptor: &ProductDescriptor,
    assembled: &AssembledGroup,
) -> Vec<String> {
    let mut problems = Vec::new();

    let title = descriptor.title.trim();
    if title.is_empty() {
        problems.push("title is required".to_string());
    } else if title.chars().count() > MAX_TITLE_LEN {
        problems.push(format!("title exceeds {MAX_TITLE_LEN} characters"));
    }

    if assembled.variants.is_empty() {
        problems.push("at least one variant is required".to_string());
    }

    for (idx, variant) in assembled.variants.iter().enumerate() {
        let sku = variant.sku.trim();
        if sku.is_empty() {
            problems.push(format!("variant {} is missing a SKU", idx + 1));
        } else if sku.chars().count() > MAX_SKU_LEN {
            problems.push(format!("variant {sku} SKU exceeds {MAX_SKU_LEN} characters"));
        }
        if variant.option_values.is_empty() {
            let label = if sku.is_empty() {
                format!("variant {}", idx + 1)
            } else {
                format!("variant {sku}")
            };
            problems.push(format!("{label} has no option values"));
        }
    }

    problems
}
