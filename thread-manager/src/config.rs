use {
    crate::{error::ConfigError, pattern::ThreadNamePattern, policy::CoreAllocation},
    pinning_cpu_utils::AffinityDescriptor,
    serde::{Deserialize, Serialize},
    std::collections::BTreeMap,
};

/// Configuration document for name-based affinity policy.
///
/// ```toml
/// default = { group = "general" }
///
/// [groups]
/// io = { cpu_list = "0-1" }
/// general = { text = "1100" }
///
/// [[rules]]
/// pattern = "worker-*"
/// group = "io"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityConfig {
    ///Applied to threads no rule matches. May reference a group.
    pub default: Option<CoreAllocation>,
    pub groups: BTreeMap<String, CoreAllocation>,
    ///Evaluated in order, first match wins
    pub rules: Vec<MatchRuleConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRuleConfig {
    pub pattern: String,
    pub group: String,
}

impl AffinityConfig {
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(document)?)
    }
}

/// A named core set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffinityGroup {
    pub name: String,
    pub descriptor: AffinityDescriptor,
}

/// A compiled rule mapping matching thread names to a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchRule {
    pattern: ThreadNamePattern,
    group: String,
    descriptor: AffinityDescriptor,
}

impl MatchRule {
    pub fn pattern(&self) -> &ThreadNamePattern {
        &self.pattern
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

/// A validated, immutable policy snapshot.
///
/// Every rule refers to an existing group and every group names concrete cores,
/// so resolution can never fail.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicyConfiguration {
    rules: Vec<MatchRule>,
    groups: BTreeMap<String, AffinityDescriptor>,
    default: Option<AffinityDescriptor>,
}

impl PolicyConfiguration {
    /// The "no configuration" state: every resolution yields no affinity.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validates `config` against the platform core count.
    pub fn try_from_config(config: &AffinityConfig) -> Result<Self, ConfigError> {
        Self::try_from_config_within(config, pinning_cpu_utils::core_count()?)
    }

    /// Validates `config` against an explicit core count.
    pub fn try_from_config_within(
        config: &AffinityConfig,
        core_count: usize,
    ) -> Result<Self, ConfigError> {
        let mut groups = BTreeMap::new();
        for (name, allocation) in config.groups.iter() {
            let descriptor = match allocation.concrete(core_count) {
                Some(Ok(descriptor)) => descriptor,
                Some(Err(source)) => {
                    return Err(ConfigError::InvalidGroup {
                        group: name.clone(),
                        source,
                    })
                }
                None => {
                    return Err(ConfigError::NestedGroup {
                        group: name.clone(),
                        target: allocation.group_name().unwrap_or_default().to_string(),
                    })
                }
            };
            groups.insert(name.clone(), descriptor);
        }

        let lookup = |group: &str, referenced_by: String| {
            groups
                .get(group)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownGroup {
                    group: group.to_string(),
                    referenced_by,
                })
        };

        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in config.rules.iter() {
            let pattern =
                ThreadNamePattern::new(&rule.pattern).map_err(|source| {
                    ConfigError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    }
                })?;
            let descriptor = lookup(&rule.group, format!("rule {:?}", rule.pattern))?;
            rules.push(MatchRule {
                pattern,
                group: rule.group.clone(),
                descriptor,
            });
        }

        let default = match &config.default {
            None => None,
            Some(CoreAllocation::Group(group)) => Some(lookup(group, "default".to_string())?),
            Some(allocation) => allocation.concrete(core_count).transpose().map_err(|source| {
                ConfigError::InvalidGroup {
                    group: "default".to_string(),
                    source,
                }
            })?,
        };

        Ok(Self {
            rules,
            groups,
            default,
        })
    }

    pub fn group(&self, name: &str) -> Option<&AffinityDescriptor> {
        self.groups.get(name)
    }

    pub fn groups(&self) -> impl Iterator<Item = AffinityGroup> + '_ {
        self.groups.iter().map(|(name, descriptor)| AffinityGroup {
            name: name.clone(),
            descriptor: descriptor.clone(),
        })
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    pub fn default_descriptor(&self) -> Option<&AffinityDescriptor> {
        self.default.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.default.is_none()
    }

    /// First matching rule's group, else the default, else no affinity.
    pub fn resolve(&self, thread_name: &str) -> Option<&AffinityDescriptor> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(thread_name))
            .map(|rule| &rule.descriptor)
            .or(self.default.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    const SAMPLE: &str = r#"
        [groups]
        io = { cores = [0, 1] }
        default = { cpu_list = "2-3" }

        [[rules]]
        pattern = "worker-*"
        group = "io"

        [[rules]]
        pattern = "*"
        group = "default"
    "#;

    fn cores(list: &[usize]) -> AffinityDescriptor {
        AffinityDescriptor::from_cores_within(list.iter().copied(), 8).unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let config = AffinityConfig::from_toml_str(SAMPLE).unwrap();
        let policy = PolicyConfiguration::try_from_config_within(&config, 8).unwrap();

        assert_eq!(policy.resolve("worker-7"), Some(&cores(&[0, 1])));
        assert_eq!(policy.resolve("misc-thread"), Some(&cores(&[2, 3])));
        assert_eq!(policy.rules()[0].group(), "io");
        assert_eq!(policy.rules()[0].pattern().as_str(), "worker-*");
        assert_eq!(policy.groups().count(), 2);
    }

    #[test]
    fn test_default_fallback_and_absence() {
        let mut config = AffinityConfig::from_toml_str(
            r#"
            [groups]
            io = { cores = [0, 1] }

            [[rules]]
            pattern = "worker-*"
            group = "io"
            "#,
        )
        .unwrap();
        let policy = PolicyConfiguration::try_from_config_within(&config, 8).unwrap();
        assert_eq!(policy.resolve("misc-thread"), None);

        config.default = Some(CoreAllocation::Mask(0b1000));
        let policy = PolicyConfiguration::try_from_config_within(&config, 8).unwrap();
        assert_eq!(policy.resolve("misc-thread"), Some(&cores(&[3])));
        assert_eq!(policy.default_descriptor(), Some(&cores(&[3])));

        config.default = Some(CoreAllocation::from_group("io"));
        let policy = PolicyConfiguration::try_from_config_within(&config, 8).unwrap();
        assert_eq!(policy.resolve("misc-thread"), Some(&cores(&[0, 1])));
    }

    #[test]
    fn test_unknown_group_fails_at_load() {
        let config = AffinityConfig {
            rules: vec![MatchRuleConfig {
                pattern: "worker-*".to_string(),
                group: "io".to_string(),
            }],
            ..AffinityConfig::default()
        };
        assert_matches!(
            PolicyConfiguration::try_from_config_within(&config, 8),
            Err(ConfigError::UnknownGroup { group, referenced_by })
                if group == "io" && referenced_by == "rule \"worker-*\""
        );

        let config = AffinityConfig {
            default: Some(CoreAllocation::from_group("missing")),
            ..AffinityConfig::default()
        };
        assert_matches!(
            PolicyConfiguration::try_from_config_within(&config, 8),
            Err(ConfigError::UnknownGroup { referenced_by, .. }) if referenced_by == "default"
        );
    }

    #[test]
    fn test_invalid_groups_fail_at_load() {
        let config = AffinityConfig::from_toml_str(
            r#"
            [groups]
            wide = { mask = 256 }
            "#,
        )
        .unwrap();
        assert_matches!(
            PolicyConfiguration::try_from_config_within(&config, 8),
            Err(ConfigError::InvalidGroup { group, .. }) if group == "wide"
        );

        let config = AffinityConfig::from_toml_str(
            r#"
            [groups]
            io = { cores = [0] }
            alias = { group = "io" }
            "#,
        )
        .unwrap();
        assert_matches!(
            PolicyConfiguration::try_from_config_within(&config, 8),
            Err(ConfigError::NestedGroup { group, target }) if group == "alias" && target == "io"
        );

        let config = AffinityConfig::from_toml_str(
            r#"
            [groups]
            bad = { text = "10x" }
            "#,
        )
        .unwrap();
        let err = PolicyConfiguration::try_from_config_within(&config, 8).unwrap_err();
        assert_matches!(err, ConfigError::InvalidGroup { ref source, .. } if source.is_invalid_mask());
    }

    #[test]
    fn test_parse_error() {
        assert_matches!(
            AffinityConfig::from_toml_str("groups = 5"),
            Err(ConfigError::Parse(_))
        );
        assert_matches!(
            AffinityConfig::from_toml_str("[groups]\nio = { bogus = 1 }"),
            Err(ConfigError::Parse(_))
        );
    }

    #[test]
    fn test_example_config_file() {
        let mut conffile = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        conffile.push("examples/affinity_policy.toml");
        let document = std::fs::read_to_string(conffile).unwrap();
        let config = AffinityConfig::from_toml_str(&document).unwrap();
        let policy = PolicyConfiguration::try_from_config_within(&config, 2).unwrap();

        assert_eq!(policy.resolve("solNet-0"), Some(&cores(&[0])));
        assert_eq!(policy.resolve("solCompute-3"), Some(&cores(&[1])));
        assert_eq!(policy.resolve("solMisc"), Some(&cores(&[0, 1])));
    }

    #[test]
    fn test_empty_configuration() {
        let policy = PolicyConfiguration::empty();
        assert!(policy.is_empty());
        assert_eq!(policy.resolve("anything"), None);

        let parsed = AffinityConfig::from_toml_str("").unwrap();
        assert_eq!(parsed, AffinityConfig::default());
        assert_eq!(
            PolicyConfiguration::try_from_config_within(&parsed, 8).unwrap(),
            policy
        );
    }
}
