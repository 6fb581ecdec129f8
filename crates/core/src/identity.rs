//! Email identity helpers.
//!
//! Every equality check on people in this system is email-based and
//! case-insensitive; callers hand us whatever casing the directory or the
//! front-end produced. Normalize once at the boundary, compare normalized.

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub fn same_email(left: &str, right: &str) -> bool {
    normalize_email(left) == normalize_email(right)
}

pub fn is_blank(raw: &str) -> bool {
    raw.trim().is_empty()
}
