use std::path::PathBuf;

const DATA_DIR_NAME: &str = ".code-switch";

/// CLI/env value, else `~/.code-switch`, else `./data`.
pub(crate) fn resolve_data_dir(cli_value: Option<&str>) -> String {
    if let Some(value) = cli_value
        && !value.trim().is_empty()
    {
        return value.trim().to_string();
    }
    default_data_dir(dirs::home_dir())
}

fn default_data_dir(home: Option<PathBuf>) -> String {
    match home {
        Some(home) => home.join(DATA_DIR_NAME).to_string_lossy().into_owned(),
        None => "./data".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_value_wins_and_home_is_the_fallback() {
        assert_eq!(resolve_data_dir(Some(" /srv/cs ")), "/srv/cs");
        assert_eq!(
            default_data_dir(Some(PathBuf::from("/home/u"))),
            "/home/u/.code-switch"
        );
        assert_eq!(default_data_dir(None), "./data");
    }
}
