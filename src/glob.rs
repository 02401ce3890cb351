//! Ant-style path globs.
//!
//! Patterns and paths are split on `/` into segments, ignoring empty ones:
//!
//! - `**` as a whole segment matches zero or more segments
//! - `*` matches zero or more characters within one segment
//! - `?` matches exactly one character within one segment
//!
//! Matching is case-sensitive. A pattern anchored with a leading `/` only
//! matches paths that also start with `/`, and the other way around.
//!
//! ```
//! use zipstore::glob::match_path;
//!
//! assert!(match_path("*.txt", "a.txt"));
//! assert!(!match_path("*.txt", "sub/c.txt"));
//! assert!(match_path("**/*.txt", "sub/c.txt"));
//! ```

const DEEP_WILDCARD: &str = "**";

/// Match a whole `/`-separated path against a pattern.
pub fn match_path(pattern: &str, path: &str) -> bool {
    if pattern.starts_with('/') != path.starts_with('/') {
        return false;
    }

    let pattern: Vec<&str> = segments(pattern).collect();
    let path: Vec<&str> = segments(path).collect();
    match_segments(&pattern, &path)
}

/// Match one path segment against a segment pattern (`*` and `?` only).
pub fn match_segment(pattern: &str, segment: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let segment: Vec<char> = segment.chars().collect();
    match_chars(&pattern, &segment)
}

fn segments(s: &str) -> impl Iterator<Item = &str> {
    s.split('/').filter(|segment| !segment.is_empty())
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match_sequence(
        pattern,
        path,
        |p| *p == DEEP_WILDCARD,
        |p, segment| match_segment(p, segment),
    )
}

fn match_chars(pattern: &[char], text: &[char]) -> bool {
    match_sequence(pattern, text, |p| *p == '*', |p, c| *p == '?' || p == c)
}

/// Wildcard matching where a star item swallows any run of text items.
///
/// Only the most recent star is remembered: on a mismatch it takes one
/// more item and matching resumes right after it. Runs in O(n * m) time
/// without recursion, whatever the input.
fn match_sequence<P, T>(
    pattern: &[P],
    text: &[T],
    is_star: impl Fn(&P) -> bool,
    matches: impl Fn(&P, &T) -> bool,
) -> bool {
    let (mut p, mut t) = (0, 0);
    // (pattern index of the star, text index it currently swallows up to)
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(item) if is_star(item) => {
                star = Some((p, t));
                p += 1;
            }
            Some(item) if matches(item, &text[t]) => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    star = Some((star_p, star_t + 1));
                    p = star_p + 1;
                    t = star_t + 1;
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|item| is_star(item))
}
