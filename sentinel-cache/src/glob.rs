//! Redis-style glob patterns

/// Match `text` against a glob pattern (`*`, `?`, `[abc]`, `[^a-z]`, `\x`)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    glob_match_bytes(pattern.as_bytes(), text.as_bytes())
}

/// Byte-level glob matching with single-star backtracking
pub fn glob_match_bytes(pattern: &[u8], text: &[u8]) -> bool {
    let mut p = 0;
    let mut t = 0;
    let mut star_p = None;
    let mut star_t = 0;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    star_p = Some(p);
                    star_t = t;
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((true, consumed)) = match_class(&pattern[p..], text[t]) {
                        p += consumed;
                        t += 1;
                        continue;
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        // backtrack to the last star
        match star_p {
            Some(sp) => {
                p = sp + 1;
                star_t += 1;
                t = star_t;
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }

    p == pattern.len()
}

/// Escape glob metacharacters so `text` matches only itself
pub fn glob_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Returns (matched, bytes consumed), or None for an unclosed class
fn match_class(pattern: &[u8], ch: u8) -> Option<(bool, usize)> {
    let mut i = 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut prev: Option<u8> = None;

    while i < pattern.len() && pattern[i] != b']' {
        match pattern[i] {
            b'\\' if i + 1 < pattern.len() => {
                if pattern[i + 1] == ch {
                    matched = true;
                }
                prev = Some(pattern[i + 1]);
                i += 2;
            }
            b'-' if i + 1 < pattern.len() && pattern[i + 1] != b']' => {
                if let Some(start) = prev {
                    let end = pattern[i + 1];
                    let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
                    if (lo..=hi).contains(&ch) {
                        matched = true;
                    }
                    prev = None;
                    i += 2;
                } else {
                    if ch == b'-' {
                        matched = true;
                    }
                    prev = Some(b'-');
                    i += 1;
                }
            }
            c => {
                if c == ch {
                    matched = true;
                }
                prev = Some(c);
                i += 1;
            }
        }
    }

    if i < pattern.len() {
        Some((matched != negate, i + 1))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*", ""));
        assert!(glob_match("foo*", "foo1"));
        assert!(glob_match("*foo-a*", "prefix:1:foo-aa"));
        assert!(!glob_match("*foo-a*", "prefix:1:foo-bb"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match("h?llo", "hello"));
        assert!(!glob_match("h?llo", "hllo"));
    }

    #[test]
    fn test_classes() {
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("key[0-9]", "key7"));
        assert!(!glob_match("key[0-9]", "keyx"));
    }

    #[test]
    fn test_escape() {
        assert!(glob_match("a\\*b", "a*b"));
        assert!(!glob_match("a\\*b", "axb"));

        let prefix = glob_escape("app[1]*");
        assert_eq!(prefix, "app\\[1\\]\\*");
        assert!(glob_match(&format!("{}:*", prefix), "app[1]*:key"));
        assert!(!glob_match(&format!("{}:*", prefix), "app1x:key"));
    }
}
