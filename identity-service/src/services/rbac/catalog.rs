//! Built-in roles. Seeded once, never edited or deleted.

use crate::models::{ContextScope, Permission, PermissionSpec, Role};

pub const SUPER_ADMIN: &str = "super_admin";
pub const TENANT_ADMIN: &str = "tenant_admin";
pub const MANAGER: &str = "manager";
pub const ANALYST: &str = "analyst";
pub const OPERATOR: &str = "operator";
pub const VIEWER: &str = "viewer";

pub const SYSTEM_ROLE_NAMES: [&str; 6] = [SUPER_ADMIN, TENANT_ADMIN, MANAGER, ANALYST, OPERATOR, VIEWER];

pub const RESOURCES: [&str; 10] = [
    "inventory",
    "products",
    "orders",
    "users",
    "roles",
    "reports",
    "audit",
    "settings",
    "integrations",
    "tenants",
];

pub const ACTIONS: [&str; 6] = ["read", "create", "update", "delete", "manage", "export"];

const CRUD: [&str; 5] = ["read", "create", "update", "delete", "export"];

pub fn is_system_role_name(name: &str) -> bool {
    SYSTEM_ROLE_NAMES.contains(&name)
}

fn grants(resources: &[&str], actions: &[&str], context: ContextScope) -> Vec<PermissionSpec> {
    resources
        .iter()
        .flat_map(|resource| {
            actions
                .iter()
                .map(move |action| PermissionSpec::new(resource, action, context))
        })
        .collect()
}

fn own_profile() -> Vec<PermissionSpec> {
    grants(&["users"], &["read", "update"], ContextScope::Own)
}

/// Role definitions as (name, description, level, permissions).
pub fn definitions() -> Vec<(&'static str, &'static str, i32, Vec<PermissionSpec>)> {
    let tenant_resources: Vec<&str> = RESOURCES
        .iter()
        .copied()
        .filter(|r| *r != "tenants")
        .collect();

    let tenant_admin = [
        grants(&tenant_resources, &ACTIONS, ContextScope::Tenant),
        grants(&["tenants"], &["read", "update"], ContextScope::Tenant),
    ]
    .concat();

    let manager = [
        grants(&["inventory", "products", "orders"], &CRUD, ContextScope::Tenant),
        grants(&["reports"], &["read", "export"], ContextScope::Tenant),
        grants(
            &["users", "roles", "settings", "integrations"],
            &["read"],
            ContextScope::Tenant,
        ),
        own_profile(),
    ]
    .concat();

    let analyst = [
        grants(
            &["inventory", "products", "orders", "reports"],
            &["read"],
            ContextScope::Tenant,
        ),
        grants(&["reports"], &["export"], ContextScope::Tenant),
        own_profile(),
    ]
    .concat();

    let operator = [
        grants(&["inventory"], &["read", "create", "update"], ContextScope::Tenant),
        grants(&["products", "orders"], &["read"], ContextScope::Tenant),
        grants(&["orders"], &["create", "update"], ContextScope::Team),
        own_profile(),
    ]
    .concat();

    let viewer = [
        grants(
            &["inventory", "products", "orders", "reports"],
            &["read"],
            ContextScope::Tenant,
        ),
        own_profile(),
    ]
    .concat();

    vec![
        (
            SUPER_ADMIN,
            "Platform operator with access to every tenant",
            100,
            grants(&RESOURCES, &ACTIONS, ContextScope::System),
        ),
        (TENANT_ADMIN, "Full control of one tenant", 90, tenant_admin),
        (MANAGER, "Runs day-to-day catalogue and order operations", 70, manager),
        (ANALYST, "Read access plus report exports", 50, analyst),
        (OPERATOR, "Stock and order handling", 40, operator),
        (VIEWER, "Read-only access", 10, viewer),
    ]
}

/// Fresh role rows with their permission rows.
pub fn system_roles() -> Vec<(Role, Vec<Permission>)> {
    definitions()
        .into_iter()
        .map(|(name, description, level, specs)| {
            let role = Role::system(name, description, level);
            let permissions = specs
                .iter()
                .map(|spec| Permission::from_spec(role.role_id, spec))
                .collect();
            (role, permissions)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(name: &str) -> Vec<String> {
        system_roles()
            .into_iter()
            .find(|(role, _)| role.role_name == name)
            .map(|(_, perms)| perms.iter().map(Permission::label).collect())
            .unwrap_or_default()
    }

    #[test]
    fn levels_are_strictly_ordered() {
        let levels: Vec<i32> = definitions().iter().map(|(_, _, level, _)| *level).collect();
        assert_eq!(levels, vec![100, 90, 70, 50, 40, 10]);
    }

    #[test]
    fn every_system_role_is_flagged_and_global() {
        for (role, permissions) in system_roles() {
            assert!(role.is_system);
            assert!(role.tenant_id.is_none());
            assert!(!permissions.is_empty());
            assert!(permissions.iter().all(|p| p.role_id == role.role_id));
        }
    }

    #[test]
    fn only_super_admin_holds_system_scope() {
        for (role, permissions) in system_roles() {
            let has_system = permissions
                .iter()
                .any(|p| p.context() == Some(ContextScope::System));
            assert_eq!(has_system, role.role_name == SUPER_ADMIN);
        }
    }

    #[test]
    fn product_deletion_is_manager_and_above() {
        assert!(labels(MANAGER).contains(&"products:delete:tenant".to_string()));
        assert!(!labels(ANALYST).contains(&"products:delete:tenant".to_string()));
        assert!(!labels(VIEWER).contains(&"products:delete:tenant".to_string()));
        assert!(labels(TENANT_ADMIN).contains(&"inventory:read:tenant".to_string()));
    }
}
