use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewAllCenters,
    MutateUsers,
    MutateFinance,
    MarkAttendance,
    ViewReports,

    ManageRoster,
    ManageCenters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    ClubManager,
    HeadCoach,
    Coach,
    CenterManager,
}

/// Flattened view of a role's capability set, as handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_view_all_centers: bool,
    pub can_mutate_users: bool,
    pub can_mutate_finance: bool,
    pub can_mark_attendance: bool,
    pub can_view_reports: bool,
}

static COACH_CAPABILITIES: Lazy<HashSet<Capability>> = Lazy::new(|| {
    let mut capabilities = HashSet::new();

    capabilities.insert(Capability::MarkAttendance);

    capabilities
});

static CENTER_MANAGER_CAPABILITIES: Lazy<HashSet<Capability>> = Lazy::new(|| {
    let mut capabilities = HashSet::new();

    capabilities.extend(COACH_CAPABILITIES.iter().copied());

    capabilities.insert(Capability::ViewReports);
    capabilities.insert(Capability::ManageRoster);
    capabilities.insert(Capability::MutateFinance);

    capabilities
});

static HEAD_COACH_CAPABILITIES: Lazy<HashSet<Capability>> = Lazy::new(|| {
    let mut capabilities = HashSet::new();

    capabilities.extend(COACH_CAPABILITIES.iter().copied());

    capabilities.insert(Capability::ViewAllCenters);
    capabilities.insert(Capability::ViewReports);
    capabilities.insert(Capability::ManageRoster);

    capabilities
});

static CLUB_MANAGER_CAPABILITIES: Lazy<HashSet<Capability>> = Lazy::new(|| {
    let mut capabilities = HashSet::new();

    capabilities.extend(HEAD_COACH_CAPABILITIES.iter().copied());

    capabilities.insert(Capability::MutateFinance);
    capabilities.insert(Capability::MutateUsers);
    capabilities.insert(Capability::ManageCenters);

    capabilities
});

static SUPER_ADMIN_CAPABILITIES: Lazy<HashSet<Capability>> = Lazy::new(|| {
    let mut capabilities = HashSet::new();

    capabilities.extend(CLUB_MANAGER_CAPABILITIES.iter().copied());

    capabilities
});

impl Role {
    pub const ALL: [Role; 5] = [
        Role::SuperAdmin,
        Role::ClubManager,
        Role::HeadCoach,
        Role::Coach,
        Role::CenterManager,
    ];

    pub fn capability_set(&self) -> &'static HashSet<Capability> {
        match self {
            Role::SuperAdmin => &SUPER_ADMIN_CAPABILITIES,
            Role::ClubManager => &CLUB_MANAGER_CAPABILITIES,
            Role::HeadCoach => &HEAD_COACH_CAPABILITIES,
            Role::Coach => &COACH_CAPABILITIES,
            Role::CenterManager => &CENTER_MANAGER_CAPABILITIES,
        }
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capability_set().contains(&capability)
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_view_all_centers: self.has_capability(Capability::ViewAllCenters),
            can_mutate_users: self.has_capability(Capability::MutateUsers),
            can_mutate_finance: self.has_capability(Capability::MutateFinance),
            can_mark_attendance: self.has_capability(Capability::MarkAttendance),
            can_view_reports: self.has_capability(Capability::ViewReports),
        }
    }

    /// Restricted roles are bound to exactly one center.
    pub fn is_center_bound(&self) -> bool {
        !self.has_capability(Capability::ViewAllCenters)
    }

    /// Roles that can be put in charge of a batch.
    pub fn can_lead_batch(&self) -> bool {
        matches!(self, Role::Coach | Role::HeadCoach)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::ClubManager => "club_manager",
            Role::HeadCoach => "head_coach",
            Role::Coach => "coach",
            Role::CenterManager => "center_manager",
        }
    }
}

pub fn capabilities_for(role: &str) -> Result<Capabilities, AppError> {
    Ok(role.parse::<Role>()?.capabilities())
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "super_admin" => Ok(Role::SuperAdmin),
            "club_manager" => Ok(Role::ClubManager),
            "head_coach" => Ok(Role::HeadCoach),
            "coach" => Ok(Role::Coach),
            "center_manager" => Ok(Role::CenterManager),
            _ => Err(AppError::UnknownRole(s.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
