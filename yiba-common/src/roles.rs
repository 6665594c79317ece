//! Roles and the capability table
//!
//! Both `Role` and `Capability` are closed enums and the table is one
//! exhaustive match, so adding a role (or capability) forces every call
//! site to be reconsidered at compile time. The table is a pure function:
//! no I/O, no side effects, same inputs always produce the same output.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Caller role, resolved per request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Platform operator, tenant-unscoped
    PlatformAdmin,
    /// Institution administrator (full tenant access)
    InstitutionAdmin,
    /// Institution staff member
    InstitutionStaff,
    /// QCTO administrator (regulator)
    QctoAdmin,
    /// QCTO reviewer (regulator)
    QctoUser,
    /// Enrolled student
    Student,
}

impl Role {
    /// Wire/database representation (stable, SCREAMING_SNAKE_CASE)
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::PlatformAdmin => "PLATFORM_ADMIN",
            Role::InstitutionAdmin => "INSTITUTION_ADMIN",
            Role::InstitutionStaff => "INSTITUTION_STAFF",
            Role::QctoAdmin => "QCTO_ADMIN",
            Role::QctoUser => "QCTO_USER",
            Role::Student => "STUDENT",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Result<Role> {
        match s {
            "PLATFORM_ADMIN" => Ok(Role::PlatformAdmin),
            "INSTITUTION_ADMIN" => Ok(Role::InstitutionAdmin),
            "INSTITUTION_STAFF" => Ok(Role::InstitutionStaff),
            "QCTO_ADMIN" => Ok(Role::QctoAdmin),
            "QCTO_USER" => Ok(Role::QctoUser),
            "STUDENT" => Ok(Role::Student),
            other => Err(Error::InvalidInput(format!("unknown role: {}", other))),
        }
    }

    /// Regulator roles may not write institution-owned data outside the
    /// explicit review-operation allow-list
    pub fn is_regulator(&self) -> bool {
        matches!(self, Role::QctoAdmin | Role::QctoUser)
    }

    /// Platform roles are tenant-unscoped
    pub fn is_platform(&self) -> bool {
        matches!(self, Role::PlatformAdmin)
    }

    /// Roles whose data access is scoped to their own institution
    pub fn is_institution_scoped(&self) -> bool {
        matches!(
            self,
            Role::InstitutionAdmin | Role::InstitutionStaff | Role::Student
        )
    }
}

/// Named permission checked against a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManageInstitutions,
    ManageUsers,
    ManageLearners,
    SubmitReadiness,
    ReviewSubmissions,
    UploadDocuments,
    ViewAuditLogs,
    ExportAuditLogs,
    ManageCampaigns,
    ViewLeads,
    ViewOwnRecords,
}

/// Can `role` perform `cap`?
///
/// Total over both enums; recomputed on every check (capability grants are
/// never stored).
pub fn role_has(role: Role, cap: Capability) -> bool {
    use Capability::*;
    match role {
        Role::PlatformAdmin => match cap {
            ManageInstitutions | ManageUsers | ManageLearners | SubmitReadiness
            | ReviewSubmissions | UploadDocuments | ViewAuditLogs | ExportAuditLogs
            | ManageCampaigns | ViewLeads | ViewOwnRecords => true,
        },
        Role::InstitutionAdmin => match cap {
            ManageUsers | ManageLearners | SubmitReadiness | UploadDocuments | ViewAuditLogs
            | ExportAuditLogs | ManageCampaigns | ViewOwnRecords => true,
            ManageInstitutions | ReviewSubmissions | ViewLeads => false,
        },
        Role::InstitutionStaff => match cap {
            ManageLearners | SubmitReadiness | UploadDocuments | ViewAuditLogs
            | ViewOwnRecords => true,
            ManageInstitutions | ManageUsers | ReviewSubmissions | ExportAuditLogs
            | ManageCampaigns | ViewLeads => false,
        },
        Role::QctoAdmin => match cap {
            ReviewSubmissions | ViewAuditLogs | ExportAuditLogs | ViewLeads | ViewOwnRecords => {
                true
            }
            ManageInstitutions | ManageUsers | ManageLearners | SubmitReadiness
            | UploadDocuments | ManageCampaigns => false,
        },
        Role::QctoUser => match cap {
            ReviewSubmissions | ViewAuditLogs | ViewOwnRecords => true,
            ManageInstitutions | ManageUsers | ManageLearners | SubmitReadiness
            | UploadDocuments | ExportAuditLogs | ManageCampaigns | ViewLeads => false,
        },
        Role::Student => match cap {
            ViewOwnRecords => true,
            ManageInstitutions | ManageUsers | ManageLearners | SubmitReadiness
            | ReviewSubmissions | UploadDocuments | ViewAuditLogs | ExportAuditLogs
            | ManageCampaigns | ViewLeads => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [
            Role::PlatformAdmin,
            Role::InstitutionAdmin,
            Role::InstitutionStaff,
            Role::QctoAdmin,
            Role::QctoUser,
            Role::Student,
        ] {
            assert_eq!(Role::parse(role.as_str()).unwrap(), role);
        }
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(Role::parse("SUPER_ADMIN").is_err());
        assert!(Role::parse("").is_err());
    }

    #[test]
    fn test_capability_check_is_idempotent() {
        // Same (role, capability) pair always produces the same answer
        for _ in 0..3 {
            assert!(role_has(Role::PlatformAdmin, Capability::ManageInstitutions));
            assert!(!role_has(Role::Student, Capability::ManageInstitutions));
            assert!(role_has(Role::QctoUser, Capability::ReviewSubmissions));
            assert!(!role_has(Role::QctoUser, Capability::ManageLearners));
        }
    }

    #[test]
    fn test_regulators_cannot_manage_institution_data() {
        for role in [Role::QctoAdmin, Role::QctoUser] {
            assert!(!role_has(role, Capability::ManageLearners));
            assert!(!role_has(role, Capability::UploadDocuments));
            assert!(!role_has(role, Capability::SubmitReadiness));
        }
    }

    #[test]
    fn test_role_predicates() {
        assert!(Role::QctoUser.is_regulator());
        assert!(Role::QctoAdmin.is_regulator());
        assert!(!Role::InstitutionAdmin.is_regulator());
        assert!(Role::PlatformAdmin.is_platform());
        assert!(Role::Student.is_institution_scoped());
        assert!(!Role::QctoUser.is_institution_scoped());
    }
}
