use super::Value;

/// Property state vector of one entity, in persister property order.
pub type State = Vec<Value>;

/// Sorted, de-duplicated list of query spaces (table names).
pub fn normalize_spaces<I, S>(spaces: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut spaces: Vec<String> = spaces.into_iter().map(Into::into).collect();
    spaces.sort();
    spaces.dedup();
    spaces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_spaces() {
        assert_eq!(
            normalize_spaces(["b", "a", "b"]),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
