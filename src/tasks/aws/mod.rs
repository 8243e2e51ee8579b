//! AWS task catalog

mod autoscaling_group;
mod launch_configuration;
mod security_group;
mod security_group_rule;
mod subnet;
mod vpc;

pub use autoscaling_group::AutoscalingGroup;
pub use launch_configuration::LaunchConfiguration;
pub use security_group::SecurityGroup;
pub use security_group_rule::SecurityGroupRule;
pub use subnet::Subnet;
pub use vpc::Vpc;

use crate::cloud::aws::Tags;

/// The subset of `actual` that an expected tag set manages.
///
/// Tags added by other tools or by AWS itself are not drift.
pub(crate) fn managed_tags(expected: Option<&Tags>, actual: &Tags) -> Option<Tags> {
    let expected = expected?;
    Some(
        actual
            .iter()
            .filter(|(k, _)| expected.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_tags_ignore_foreign_keys() {
        let mut expected = Tags::new();
        expected.insert("Name".into(), "ex.com".into());
        let mut actual = expected.clone();
        actual.insert("aws:cloudformation:stack".into(), "x".into());

        assert_eq!(managed_tags(Some(&expected), &actual), Some(expected));
        assert_eq!(managed_tags(None, &actual), None);
    }
}
