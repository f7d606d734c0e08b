#[cfg(test)]
mod tests {
    use crate::auth::{CenterFilter, EffectiveScope, Role, User, authorize_center, resolve};
    use crate::error::AppError;

    fn user(role: Role, center_id: Option<i64>) -> User {
        User {
            id: 11,
            email: format!("{}@academy.test", role),
            full_name: role.to_string(),
            role,
            center_id,
        }
    }

    #[test]
    fn test_restricted_user_always_gets_home_center() {
        let requests = [
            CenterFilter::All,
            CenterFilter::Center(1),
            CenterFilter::Center(2),
            CenterFilter::Center(99),
        ];

        for role in [Role::Coach, Role::CenterManager] {
            let restricted = user(role, Some(2));
            for requested in requests {
                assert_eq!(
                    resolve(&restricted, requested).expect("resolves"),
                    EffectiveScope::SingleCenter(2),
                    "{} asking for {:?}",
                    role,
                    requested
                );
            }
        }
    }

    #[test]
    fn test_all_center_roles_resolve_all() {
        for role in [Role::SuperAdmin, Role::ClubManager, Role::HeadCoach] {
            let wide = user(role, None);
            assert_eq!(
                resolve(&wide, CenterFilter::All).expect("resolves"),
                EffectiveScope::AllCenters
            );
            assert_eq!(
                resolve(&wide, CenterFilter::Center(5)).expect("resolves"),
                EffectiveScope::SingleCenter(5)
            );
        }
    }

    #[test]
    fn test_restricted_user_without_center() {
        let orphan = user(Role::Coach, None);
        assert!(matches!(
            resolve(&orphan, CenterFilter::All),
            Err(AppError::Permission(_))
        ));
    }

    #[test]
    fn test_forged_scopes_are_rejected() {
        let coach = user(Role::Coach, Some(2));

        assert!(EffectiveScope::SingleCenter(2).authorize(&coach).is_ok());
        assert!(matches!(
            EffectiveScope::SingleCenter(1).authorize(&coach),
            Err(AppError::ScopeViolation(_))
        ));
        assert!(matches!(
            EffectiveScope::AllCenters.authorize(&coach),
            Err(AppError::ScopeViolation(_))
        ));
        assert!(matches!(
            authorize_center(&coach, 1),
            Err(AppError::ScopeViolation(_))
        ));

        let head = user(Role::HeadCoach, None);
        assert!(EffectiveScope::AllCenters.authorize(&head).is_ok());
        assert!(authorize_center(&head, 1).is_ok());
    }

    #[test]
    fn test_center_filter_parsing() {
        assert_eq!(CenterFilter::parse(None).unwrap(), CenterFilter::All);
        assert_eq!(CenterFilter::parse(Some("all")).unwrap(), CenterFilter::All);
        assert_eq!(CenterFilter::parse(Some("")).unwrap(), CenterFilter::All);
        assert_eq!(
            CenterFilter::parse(Some(" 3 ")).unwrap(),
            CenterFilter::Center(3)
        );
        assert!(matches!(
            CenterFilter::parse(Some("north")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_scope_serialization() {
        let all = serde_json::to_value(EffectiveScope::AllCenters).unwrap();
        assert_eq!(all["kind"], "all_centers");

        let single = serde_json::to_value(EffectiveScope::SingleCenter(4)).unwrap();
        assert_eq!(single["kind"], "single_center");
        assert_eq!(single["center_id"], 4);
    }
}
