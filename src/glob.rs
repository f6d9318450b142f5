//! Glob-style key matching for the KEYS command.
//!
//! Supported syntax: `*` (zero or more characters), `?` (exactly one
//! character), and `\x` for a literal `x` (so `\*`, `\?`, `\\` escape the
//! metacharacters). Everything else matches itself. A trailing unescaped
//! backslash never matches anything.

/// Returns true when `source` matches the glob `pattern`.
///
/// Iterative two-pointer match with a single backtracking anchor for the most
/// recent `*`; worst case O(len(source) * len(pattern)), no allocation.
pub fn glob_match(source: &str, pattern: &str) -> bool {
    let s = source.as_bytes();
    let p = pattern.as_bytes();
    let mut si = 0;
    let mut pi = 0;
    // pattern position just past the last `*`, and the source position that
    // star is currently assumed to cover up to
    let mut star: Option<(usize, usize)> = None;

    while si < s.len() {
        let mut matched = false;
        if pi < p.len() {
            match p[pi] {
                b'*' => {
                    star = Some((pi + 1, si));
                    pi += 1;
                    continue;
                }
                b'?' => {
                    si += 1;
                    pi += 1;
                    continue;
                }
                b'\\' => {
                    if pi + 1 < p.len() && p[pi + 1] == s[si] {
                        si += 1;
                        pi += 2;
                        matched = true;
                    }
                }
                literal => {
                    if literal == s[si] {
                        si += 1;
                        pi += 1;
                        matched = true;
                    }
                }
            }
        }
        if matched {
            continue;
        }
        // mismatch: widen the last star by one source character, or fail
        match star {
            Some((after_star, anchor)) => {
                let anchor = anchor + 1;
                star = Some((after_star, anchor));
                si = anchor;
                pi = after_star;
            }
            None => return false,
        }
    }

    // source exhausted; only trailing stars may remain
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}
