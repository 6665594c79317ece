//! HTTP API handlers for yiba-server

pub mod audit;
pub mod auth;
pub mod campaigns;
pub mod documents;
pub mod health;
pub mod institutions;
pub mod leads;
pub mod learners;
pub mod readiness;
pub mod users;

use uuid::Uuid;
use yiba_common::actor::Actor;
use yiba_common::{Error, Result};

/// Parse a path/query id or fail with 400
pub(crate) fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|_| Error::InvalidInput(format!("invalid id: {}", s)))
}

/// Tenant scope for listing queries.
///
/// Platform and regulator roles see all tenants; institution-scoped roles
/// are restricted to their own institution and must have one.
pub(crate) fn listing_scope(actor: &Actor) -> Result<Option<String>> {
    if actor.role.is_institution_scoped() {
        match actor.institution_id {
            Some(id) => Ok(Some(id.to_string())),
            None => Err(Error::Forbidden(
                "institution role without institution scope".to_string(),
            )),
        }
    } else {
        Ok(None)
    }
}

/// Read-access tenant check for a single institution-owned row
pub(crate) fn check_read_scope(actor: &Actor, institution_id: &str) -> Result<()> {
    if actor.role.is_institution_scoped() {
        let owner = parse_id(institution_id)?;
        if actor.institution_id != Some(owner) {
            return Err(Error::Forbidden("institution scope mismatch".to_string()));
        }
    }
    Ok(())
}
