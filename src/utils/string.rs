//! UTF-8 safe helpers for log output.

/// Return a single-line preview of `s` of at most `n` characters, with a
/// trailing `...` when truncated. Newlines are flattened to spaces.
pub fn preview(s: &str, n: usize) -> String {
    let flat: String = s
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(n)
        .collect();
    if s.chars().count() > n {
        format!("{}...", flat)
    } else {
        flat
    }
}

/// Mask a secret for logging, keeping only the last four characters.
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_basic_ascii() {
        assert_eq!(preview("hello world", 5), "hello...");
        assert_eq!(preview("hello world", 20), "hello world");
    }

    #[test]
    fn preview_flattens_newlines() {
        assert_eq!(preview("line one\nline two", 40), "line one line two");
    }

    #[test]
    fn preview_multibyte_does_not_panic() {
        let s = "Привет, мир! Это длинный пост";
        let p = preview(s, 6);
        assert_eq!(p, "Привет...");
    }

    #[test]
    fn mask_secret_keeps_tail() {
        assert_eq!(mask_secret("123456:ABCDEF"), "*********CDEF");
        assert_eq!(mask_secret("abc"), "***");
    }
}
