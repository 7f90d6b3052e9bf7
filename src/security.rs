//! Permission checks against an entity's access-control declaration.

use crate::config::{AclAction, EntityDef};
use crate::error::AppError;

/// Principal every request holds.
pub const EVERYONE: &str = "system.Everyone";
/// Principal held by requests that carry a user id.
pub const AUTHENTICATED: &str = "system.Authenticated";
/// Permission wildcard inside an ACL entry.
pub const ALL_PERMISSIONS: &str = "*";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Permission {
    View,
    New,
    Edit,
    Delete,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::New => "new",
            Permission::Edit => "edit",
            Permission::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is making the request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityContext {
    pub user_id: Option<String>,
    pub groups: Vec<String>,
}

impl SecurityContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user_id: impl Into<String>) -> Self {
        SecurityContext {
            user_id: Some(user_id.into()),
            groups: Vec::new(),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Effective principals: everyone, then user and authenticated, then groups.
    pub fn principals(&self) -> Vec<&str> {
        let mut out = vec![EVERYONE];
        if let Some(user) = &self.user_id {
            out.push(AUTHENTICATED);
            out.push(user);
        }
        out.extend(self.groups.iter().map(String::as_str));
        out
    }
}

/// Decides whether a context holds a permission on an entity.
pub trait PermissionEvaluator: Send + Sync {
    fn has_permission(&self, permission: Permission, entity: &EntityDef, context: &SecurityContext) -> bool;
}

/// Ordered allow/deny entries; the first entry matching a held principal and the permission decides.
/// No matching entry denies.
#[derive(Clone, Copy, Debug, Default)]
pub struct AclEvaluator;

impl PermissionEvaluator for AclEvaluator {
    fn has_permission(&self, permission: Permission, entity: &EntityDef, context: &SecurityContext) -> bool {
        let Some(acl) = &entity.acl else {
            return false;
        };
        let principals = context.principals();
        for entry in acl {
            if !principals.contains(&entry.principal.as_str()) {
                continue;
            }
            let covers = entry
                .permissions
                .iter()
                .any(|p| p == ALL_PERMISSIONS || p == permission.as_str());
            if covers {
                return entry.action == AclAction::Allow;
            }
        }
        false
    }
}

/// Entities without an access-control declaration are open to everyone.
pub fn require(
    evaluator: &dyn PermissionEvaluator,
    permission: Permission,
    entity: &EntityDef,
    context: &SecurityContext,
) -> Result<(), AppError> {
    if !entity.has_acl() || evaluator.has_permission(permission, entity, context) {
        return Ok(());
    }
    tracing::debug!(entity = %entity.name, %permission, user = ?context.user_id, "permission denied");
    Err(AppError::Forbidden)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AclEntry;

    fn entity(acl: Option<Vec<AclEntry>>) -> EntityDef {
        EntityDef {
            name: "Person".into(),
            schema_name: "public".into(),
            table_name: "persons".into(),
            acl,
            properties: Vec::new(),
        }
    }

    fn entry(action: AclAction, principal: &str, perms: &[&str]) -> AclEntry {
        AclEntry {
            action,
            principal: principal.into(),
            permissions: perms.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn no_declaration_allows_everything() {
        let e = entity(None);
        assert!(require(&AclEvaluator, Permission::Delete, &e, &SecurityContext::anonymous()).is_ok());
    }

    #[test]
    fn empty_declaration_denies_everything() {
        let e = entity(Some(Vec::new()));
        let ctx = SecurityContext::authenticated("ada");
        assert!(matches!(
            require(&AclEvaluator, Permission::View, &e, &ctx),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn first_matching_entry_wins() {
        let e = entity(Some(vec![
            entry(AclAction::Deny, "group:banned", &["*"]),
            entry(AclAction::Allow, EVERYONE, &["view"]),
            entry(AclAction::Allow, AUTHENTICATED, &["new", "edit"]),
            entry(AclAction::Allow, "group:admin", &["*"]),
        ]));
        let anon = SecurityContext::anonymous();
        let user = SecurityContext::authenticated("ada");
        let admin = SecurityContext::authenticated("root").with_groups(["group:admin"]);
        let banned = SecurityContext::authenticated("eve").with_groups(["group:banned"]);

        assert!(AclEvaluator.has_permission(Permission::View, &e, &anon));
        assert!(!AclEvaluator.has_permission(Permission::New, &e, &anon));
        assert!(AclEvaluator.has_permission(Permission::Edit, &e, &user));
        assert!(!AclEvaluator.has_permission(Permission::Delete, &e, &user));
        assert!(AclEvaluator.has_permission(Permission::Delete, &e, &admin));
        assert!(!AclEvaluator.has_permission(Permission::View, &e, &banned));
    }
}
