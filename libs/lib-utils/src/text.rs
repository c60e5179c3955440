/// Returns at most `max_chars` characters of `s`, never splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hello", 0), "");
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate_chars("héllo wörld", 7), "héllo w");
        assert_eq!(char_len("héllo"), 5);
    }
}
