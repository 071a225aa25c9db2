//! Named-parameter SQL parser (spec component C3).
//!
//! Tokenises a SQL string just enough to find parameter placeholders,
//! skipping anything that cannot contain one: string literals, quoted and
//! bracketed identifiers, and line/block comments. This is a hot path run
//! once per distinct SQL string (the result is cached alongside the
//! prepared statement), so it is a hand-rolled single-pass byte scanner
//! rather than a regex.

use rustc_hash::FxHashMap;

/// Ordered mapping from parameter name (including its sigil, e.g. `:id`)
/// to its first positional index. Anonymous `?` placeholders still occupy
/// a position in the sequential count but are not recorded here.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParamMap {
    order: Vec<(Box<str>, u32)>,
    index_of: FxHashMap<Box<str>, usize>,
}

impl ParamMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `name -> position`, but only if `name` has not been seen
    /// before (first occurrence wins).
    fn insert_first(&mut self, name: Box<str>, position: u32) {
        if self.index_of.contains_key(&name) {
            return;
        }
        self.index_of.insert(name.clone(), self.order.len());
        self.order.push((name, position));
    }

    /// The 1-based positional index first recorded for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u32> {
        self.index_of.get(name).map(|&i| self.order[i].1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates `(name, position)` pairs in first-occurrence (insertion) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.order.iter().map(|(name, pos)| (name.as_ref(), *pos))
    }
}

impl<'a> IntoIterator for &'a ParamMap {
    type Item = (&'a str, u32);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, u32)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Scans `sql` and returns the named-parameter map plus the total number
/// of positional slots (anonymous and named) a prepared statement for this
/// SQL would expose, in order.
#[must_use]
pub fn parse_named_parameters(sql: &str) -> ParamMap {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut i = 0usize;
    let mut param_index: u32 = 0;
    let mut map = ParamMap::new();

    while i < len {
        match bytes[i] {
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'`' => i = skip_quoted(bytes, i, b'`'),
            b'[' => i = skip_bracketed(bytes, i),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'?' => {
                param_index += 1;
                i += 1;
                while i < len && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            sigil @ (b':' | b'@' | b'$') => {
                let name_start = i + 1;
                let mut j = name_start;
                while j < len && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                    j += 1;
                }
                if j > name_start {
                    param_index += 1;
                    let mut name = String::with_capacity(1 + (j - name_start));
                    name.push(sigil as char);
                    name.push_str(&sql[name_start..j]);
                    map.insert_first(name.into_boxed_str(), param_index);
                    i = j;
                } else {
                    // Bare sigil: not a parameter per the named-parameter grammar.
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    map
}

/// Skips a quoted run starting at `quote`, honouring the doubled-quote
/// escape (`''`, `""`, or `` `` ``). Returns the index just past the
/// closing quote, or `bytes.len()` if unterminated.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let len = bytes.len();
    let mut i = start + 1;
    loop {
        match bytes[i..].iter().position(|&b| b == quote) {
            None => return len,
            Some(rel) => {
                let at = i + rel;
                if bytes.get(at + 1) == Some(&quote) {
                    i = at + 2;
                } else {
                    return at + 1;
                }
            }
        }
    }
}

/// Skips a bracketed identifier `[...]`, terminated by the first `]` (no
/// escaping). Returns the index past `]`, or `bytes.len()` if unterminated.
fn skip_bracketed(bytes: &[u8], start: usize) -> usize {
    match bytes[start + 1..].iter().position(|&b| b == b']') {
        Some(rel) => start + 1 + rel + 1,
        None => bytes.len(),
    }
}

/// Skips a `-- ...` line comment up to and including the terminating
/// newline, or to end-of-string if none.
fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    match bytes[start..].iter().position(|&b| b == b'\n') {
        Some(rel) => start + rel + 1,
        None => bytes.len(),
    }
}

/// Skips a non-nesting `/* ... */` block comment. Returns the index past
/// `*/`, or `bytes.len()` if unterminated.
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let len = bytes.len();
    let mut i = start + 2;
    while i + 1 < len {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_repeated_named_param_first_occurrence_wins() {
        let map = parse_named_parameters("SELECT * FROM t WHERE a=:x AND b=@y OR c=:x");
        assert_eq!(map.get(":x"), Some(1));
        assert_eq!(map.get("@y"), Some(2));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn s2_strings_comments_are_skipped() {
        let map = parse_named_parameters("SELECT '::not':real /* :nope */ -- :no\n FROM t");
        assert_eq!(map.get(":real"), Some(1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn s6_positional_anonymous_params() {
        let map = parse_named_parameters("INSERT INTO t VALUES (?, ?1, ?)");
        assert!(map.is_empty());
    }

    #[test]
    fn no_parameters_outside_skipped_regions_yields_empty_map() {
        let map = parse_named_parameters("SELECT \"a:b\" FROM `t@x` WHERE [c$d] = 1 -- :x\n/* :y */");
        assert!(map.is_empty());
    }

    #[test]
    fn doubled_quote_escape_is_honoured() {
        let map = parse_named_parameters("SELECT 'it''s :notparam' WHERE x = :real");
        assert_eq!(map.get(":real"), Some(1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn unterminated_string_consumes_to_end() {
        let map = parse_named_parameters("SELECT 'unterminated :x");
        assert!(map.is_empty());
    }

    #[test]
    fn unterminated_bracket_consumes_to_end() {
        let map = parse_named_parameters("SELECT [unterminated :x");
        assert!(map.is_empty());
    }

    #[test]
    fn unterminated_block_comment_consumes_to_end() {
        let map = parse_named_parameters("SELECT 1 /* :x");
        assert!(map.is_empty());
    }

    #[test]
    fn bare_sigil_is_not_a_parameter() {
        let map = parse_named_parameters("SELECT cast(x : int) FROM t");
        assert!(map.is_empty());
    }

    #[test]
    fn mixed_anonymous_and_named_bump_the_same_counter() {
        let map = parse_named_parameters("SELECT * FROM t WHERE a=? AND b=:name");
        assert_eq!(map.get(":name"), Some(2));
    }
}
