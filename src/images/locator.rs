/// Storage prefix for an image key: the first six characters, right-padded
/// with `'0'`, split into three two-character directories under `base_dir`.
pub fn locate(image_key: &str, base_dir: &str) -> String {
    let mut digits: Vec<char> = image_key.trim().chars().take(6).collect();
    digits.resize(6, '0');
    let segments: Vec<String> = digits
        .chunks(2)
        .map(|pair| pair.iter().collect())
        .collect();
    let base = base_dir.trim_end_matches('/');
    if base.is_empty() {
        format!("{}/", segments.join("/"))
    } else {
        format!("{base}/{}/", segments.join("/"))
    }
}
