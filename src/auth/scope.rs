//! Center scoping.
//!
//! Every read or write against centers, batches, students, attendance or fees
//! carries an [`EffectiveScope`]. Scopes are produced by [`resolve`] from the
//! caller and the center filter they asked for, and re-checked with
//! [`EffectiveScope::authorize`] at each data-access entry point so that a
//! hand-built scope cannot widen what a restricted user sees.

use serde::Serialize;
use std::fmt;

use super::User;
use crate::error::AppError;

/// The center filter a caller asked for. `"all"` is the sentinel for every center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CenterFilter {
    All,
    Center(i64),
}

impl CenterFilter {
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        match raw.map(str::trim) {
            None | Some("") | Some("all") => Ok(CenterFilter::All),
            Some(value) => value
                .parse::<i64>()
                .map(CenterFilter::Center)
                .map_err(|_| AppError::Validation(format!("invalid center filter '{}'", value))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "center_id", rename_all = "snake_case")]
pub enum EffectiveScope {
    AllCenters,
    SingleCenter(i64),
}

impl EffectiveScope {
    /// Center id to bind into `(? IS NULL OR center_id = ?)` filters.
    pub fn center_id(&self) -> Option<i64> {
        match self {
            EffectiveScope::AllCenters => None,
            EffectiveScope::SingleCenter(id) => Some(*id),
        }
    }

    /// Fails with `ScopeViolation` unless `user` is allowed to use this scope.
    pub fn authorize(&self, user: &User) -> Result<(), AppError> {
        if !user.role.is_center_bound() {
            return Ok(());
        }

        match (self, user.center_id) {
            (EffectiveScope::SingleCenter(id), Some(home)) if *id == home => Ok(()),
            _ => {
                tracing::warn!(
                    user_id = user.id,
                    role = %user.role,
                    home_center = ?user.center_id,
                    requested = %self,
                    "Scope outside user's center"
                );
                Err(AppError::ScopeViolation(format!(
                    "user {} may not access {}",
                    user.id, self
                )))
            }
        }
    }
}

impl fmt::Display for EffectiveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectiveScope::AllCenters => write!(f, "all centers"),
            EffectiveScope::SingleCenter(id) => write!(f, "center {}", id),
        }
    }
}

/// Checks that a single entity living in `center_id` is reachable by `user`.
pub fn authorize_center(user: &User, center_id: i64) -> Result<(), AppError> {
    EffectiveScope::SingleCenter(center_id).authorize(user)
}

pub fn resolve(user: &User, requested: CenterFilter) -> Result<EffectiveScope, AppError> {
    if user.role.is_center_bound() {
        return match user.center_id {
            Some(home) => Ok(EffectiveScope::SingleCenter(home)),
            None => Err(AppError::Permission(format!(
                "{} user {} has no assigned center",
                user.role, user.id
            ))),
        };
    }

    Ok(match requested {
        CenterFilter::All => EffectiveScope::AllCenters,
        CenterFilter::Center(id) => EffectiveScope::SingleCenter(id),
    })
}
