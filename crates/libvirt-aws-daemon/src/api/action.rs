use crate::error::ApiError;
use std::fmt;
use std::str::FromStr;

/// Every action the query API answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    RunInstances,
    DescribeInstances,
    StartInstances,
    StopInstances,
    TerminateInstances,
    DescribeImages,
    CreateVolume,
    DeleteVolume,
    DescribeVolumes,
    AttachVolume,
    DetachVolume,
    DescribeAvailabilityZones,
    CreateTags,
    DeleteTags,
    DescribeTags,
}

impl Action {
    pub const ALL: &'static [Action] = &[
        Action::RunInstances,
        Action::DescribeInstances,
        Action::StartInstances,
        Action::StopInstances,
        Action::TerminateInstances,
        Action::DescribeImages,
        Action::CreateVolume,
        Action::DeleteVolume,
        Action::DescribeVolumes,
        Action::AttachVolume,
        Action::DetachVolume,
        Action::DescribeAvailabilityZones,
        Action::CreateTags,
        Action::DeleteTags,
        Action::DescribeTags,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Action::RunInstances => "RunInstances",
            Action::DescribeInstances => "DescribeInstances",
            Action::StartInstances => "StartInstances",
            Action::StopInstances => "StopInstances",
            Action::TerminateInstances => "TerminateInstances",
            Action::DescribeImages => "DescribeImages",
            Action::CreateVolume => "CreateVolume",
            Action::DeleteVolume => "DeleteVolume",
            Action::DescribeVolumes => "DescribeVolumes",
            Action::AttachVolume => "AttachVolume",
            Action::DetachVolume => "DetachVolume",
            Action::DescribeAvailabilityZones => "DescribeAvailabilityZones",
            Action::CreateTags => "CreateTags",
            Action::DeleteTags => "DeleteTags",
            Action::DescribeTags => "DescribeTags",
        }
    }

    /// Describe calls do not change any resource.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Action::DescribeInstances
                | Action::DescribeImages
                | Action::DescribeVolumes
                | Action::DescribeAvailabilityZones
                | Action::DescribeTags
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.name() == s)
            .ok_or_else(|| {
                ApiError::bad_request(
                    "InvalidAction",
                    format!("The action {} is not valid for this web service.", s),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(action.name().parse::<Action>().unwrap(), *action);
        }
    }

    #[test]
    fn test_unknown_action() {
        let err = "CreateSnapshot".parse::<Action>().unwrap_err();
        assert_eq!(err.code(), "InvalidAction");
        assert!("runinstances".parse::<Action>().is_err());
    }

    #[test]
    fn test_read_only() {
        assert!(Action::DescribeTags.is_read_only());
        assert!(!Action::CreateTags.is_read_only());
    }
}
