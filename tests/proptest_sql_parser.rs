//! Property-based check of the named-parameter parser's round-trip
//! invariant (spec testable property 6).

use proptest::prelude::*;
use selekt_core::sql_parser::parse_named_parameters;

fn sql_with_no_parameter_sigils() -> impl Strategy<Value = String> {
    "[A-Za-z ,.()=]{0,40}".prop_map(|s| format!("SELECT {s} FROM t"))
}

proptest! {
    /// For SQL containing none of `:`, `@`, `$`, `?` at all, the parser
    /// must return an empty map.
    #[test]
    fn sql_without_sigils_yields_empty_map(sql in sql_with_no_parameter_sigils()) {
        prop_assert!(!sql.contains([':', '@', '$', '?']));
        prop_assert!(parse_named_parameters(&sql).is_empty());
    }

    /// Interpolating the same named parameter `k` times records exactly one
    /// entry, at the first occurrence's position, and the map never grows
    /// past the number of distinct names used.
    #[test]
    fn repeating_one_named_parameter_keeps_first_position(
        prefix_cols in 0usize..5,
        repeats in 1usize..6,
    ) {
        let mut sql = "SELECT * FROM t WHERE ".to_string();
        for i in 0..prefix_cols {
            sql.push_str(&format!("col{i} = ? AND "));
        }
        let first_position = (prefix_cols as u32) + 1;
        for i in 0..repeats {
            sql.push_str(":x");
            if i + 1 < repeats {
                sql.push_str(" = :x AND ");
            }
        }
        let map = parse_named_parameters(&sql);
        prop_assert_eq!(map.len(), 1);
        prop_assert_eq!(map.get(":x"), Some(first_position));
    }

    /// Distinct named parameters each get their own first-seen position, in
    /// left-to-right order, regardless of how many times each repeats.
    #[test]
    fn distinct_named_parameters_get_increasing_positions(n in 1usize..8) {
        let mut sql = "SELECT * FROM t WHERE ".to_string();
        let names: Vec<String> = (0..n).map(|i| format!(":p{i}")).collect();
        for (i, name) in names.iter().enumerate() {
            sql.push_str(&format!("c{i} = {name}"));
            if i + 1 < names.len() {
                sql.push_str(" AND ");
            }
        }
        let map = parse_named_parameters(&sql);
        prop_assert_eq!(map.len(), n);
        for (i, name) in names.iter().enumerate() {
            prop_assert_eq!(map.get(name), Some((i as u32) + 1));
        }
    }
}
