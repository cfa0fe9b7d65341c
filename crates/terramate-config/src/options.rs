//! Project-wide options carried by the configuration tree, and the four
//! independently-disableable safeguards.

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default)]
pub struct ProjectOptions {
    pub default_remote: Option<String>,
    pub default_branch: String,
    pub safeguards: SafeguardToggles,
    pub experiments: Vec<String>,
}

/// The four safeguards, independently disableable.
#[derive(Debug, Clone, Copy)]
pub struct SafeguardToggles {
    pub git_untracked: bool,
    pub git_uncommitted: bool,
    pub git_out_of_sync: bool,
    pub outdated_code: bool,
}

impl Default for SafeguardToggles {
    fn default() -> Self {
        Self {
            git_untracked: true,
            git_uncommitted: true,
            git_out_of_sync: true,
            outdated_code: true,
        }
    }
}

const SAFEGUARD_NAMES: [&str; 4] = [
    "git-untracked",
    "git-uncommitted",
    "git-out-of-sync",
    "outdated-code",
];

impl SafeguardToggles {
    /// Apply a `--disable-safeguards=<list>` value. `all` disables every
    /// safeguard, `none` re-enables every safeguard; using either alongside
    /// specific names, or using both `all` and `none`, is a fatal config
    /// error.
    pub fn apply_disable_list(&mut self, list: &[String]) -> ConfigResult<()> {
        let has_all = list.iter().any(|s| s == "all");
        let has_none = list.iter().any(|s| s == "none");
        let has_specific = list.iter().any(|s| s != "all" && s != "none");

        if has_all && has_none {
            return Err(ConfigError::InvalidValue {
                field: "disable-safeguards".to_string(),
                message: "`all` and `none` cannot be combined".to_string(),
            });
        }
        if (has_all || has_none) && has_specific {
            return Err(ConfigError::InvalidValue {
                field: "disable-safeguards".to_string(),
                message: "`all`/`none` cannot be combined with specific safeguard names"
                    .to_string(),
            });
        }

        if has_all {
            self.git_untracked = false;
            self.git_uncommitted = false;
            self.git_out_of_sync = false;
            self.outdated_code = false;
            return Ok(());
        }
        if has_none {
            *self = Self::default();
            return Ok(());
        }

        for name in list {
            match name.as_str() {
                "git-untracked" => self.git_untracked = false,
                "git-uncommitted" => self.git_uncommitted = false,
                "git-out-of-sync" => self.git_out_of_sync = false,
                "outdated-code" => self.outdated_code = false,
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: "disable-safeguards".to_string(),
                        message: format!(
                            "unknown safeguard `{other}`, expected one of {SAFEGUARD_NAMES:?}, `all`, or `none`"
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_and_none_conflict() {
        let mut toggles = SafeguardToggles::default();
        let err = toggles
            .apply_disable_list(&["all".to_string(), "none".to_string()])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn all_disables_every_safeguard() {
        let mut toggles = SafeguardToggles::default();
        toggles.apply_disable_list(&["all".to_string()]).unwrap();
        assert!(!toggles.git_untracked);
        assert!(!toggles.outdated_code);
    }

    #[test]
    fn specific_name_disables_just_that_one() {
        let mut toggles = SafeguardToggles::default();
        toggles
            .apply_disable_list(&["git-untracked".to_string()])
            .unwrap();
        assert!(!toggles.git_untracked);
        assert!(toggles.git_uncommitted);
    }
}
