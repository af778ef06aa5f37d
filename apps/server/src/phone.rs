/// Phone numbers are the natural dedup key for clients, so every lookup and
/// insert goes through the same canonical form: '+' followed by digits only.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 9 || digits.len() > 15 {
        return None;
    }
    Some(format!("+{}", digits))
}

// ── Tests ──
