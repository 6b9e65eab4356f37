//! CLI parsing helpers for clap value parsers.

pub(super) fn parse_pool_depth(s: &str) -> Result<usize, String> {
    let value: usize = s
        .trim()
        .parse()
        .map_err(|_| format!("{s} is not a valid number"))?;
    if (1..=super::MAX_POOL_DEPTH).contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "pool depth must be between 1 and {}",
            super::MAX_POOL_DEPTH
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1", Ok(1))]
    #[case(" 8 ", Ok(8))]
    #[case("256", Ok(256))]
    #[case("0", Err("pool depth must be between 1 and 256"))]
    #[case("257", Err("pool depth must be between 1 and 256"))]
    #[case("many", Err("many is not a valid number"))]
    fn validates_pool_depth(#[case] input: &str, #[case] expected: Result<usize, &str>) {
        assert_eq!(parse_pool_depth(input), expected.map_err(str::to_owned));
    }
}
