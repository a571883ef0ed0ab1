//! Message group / type filtering.

use rustc_hash::FxHashSet;

use crate::error::{ChatError, Result};

/// A site's table of message groups, each a named bundle of message types.
pub struct MessageGroups {
    groups: &'static [(&'static str, &'static [&'static str])],
}

impl MessageGroups {
    pub const fn new(groups: &'static [(&'static str, &'static [&'static str])]) -> Self {
        Self { groups }
    }

    pub fn group(&self, name: &str) -> Option<&'static [&'static str]> {
        self.groups
            .iter()
            .find(|(group, _)| *group == name)
            .map(|(_, types)| *types)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.groups.iter().map(|(group, _)| *group)
    }

    pub fn all_types(&self) -> FxHashSet<&'static str> {
        self.groups
            .iter()
            .flat_map(|(_, types)| types.iter().copied())
            .collect()
    }
}

/// Resolved filter deciding which events reach the consumer.
#[derive(Debug, Clone)]
pub struct MessageFilter {
    pass_all: bool,
    allowed: FxHashSet<String>,
}

impl MessageFilter {
    /// Build a filter from the requested groups and explicit types.
    ///
    /// `"all"` anywhere lets everything through. Explicit types take
    /// precedence: when any are given, the groups are ignored. Unknown names
    /// fail fast.
    pub fn new(table: &MessageGroups, groups: &[String], types: &[String]) -> Result<Self> {
        let pass_all = groups.iter().chain(types).any(|g| g == "all");

        let known_types = table.all_types();
        let invalid_types: Vec<&str> = types
            .iter()
            .map(String::as_str)
            .filter(|t| *t != "all" && !known_types.contains(t))
            .collect();
        if !invalid_types.is_empty() {
            let mut valid: Vec<_> = known_types.into_iter().collect();
            valid.sort_unstable();
            return Err(ChatError::invalid_parameter(format!(
                "invalid message type(s): {}. Valid types are: {}",
                invalid_types.join(", "),
                valid.join(", ")
            )));
        }

        let invalid_groups: Vec<&str> = groups
            .iter()
            .map(String::as_str)
            .filter(|g| *g != "all" && table.group(g).is_none())
            .collect();
        if !invalid_groups.is_empty() {
            return Err(ChatError::invalid_parameter(format!(
                "invalid message group(s): {}. Valid groups are: {}",
                invalid_groups.join(", "),
                table.group_names().collect::<Vec<_>>().join(", ")
            )));
        }

        let allowed = if types.is_empty() {
            groups
                .iter()
                .filter_map(|g| table.group(g))
                .flat_map(|types| types.iter().map(|t| t.to_string()))
                .collect()
        } else {
            types.iter().cloned().collect()
        };

        Ok(Self { pass_all, allowed })
    }

    /// A filter that lets every event through.
    pub fn pass_all() -> Self {
        Self {
            pass_all: true,
            allowed: FxHashSet::default(),
        }
    }

    pub fn must_add_item(&self, message_type: &str) -> bool {
        self.pass_all || self.allowed.contains(message_type)
    }
}
