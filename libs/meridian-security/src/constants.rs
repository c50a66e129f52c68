//! Well-known identities and groups.

/// Group every successfully authenticated user belongs to.
pub const AUTHENTICATED_GROUP: &str = "system:authenticated";

/// Group granted cluster-wide administration by the bootstrap policy.
pub const CLUSTER_ADMIN_GROUP: &str = "system:cluster-admins";

/// Group for in-cluster system components (controllers, deployers).
pub const COMPONENT_GROUP: &str = "system:components";

/// Group for deployer pods launched by the deployment controller.
pub const DEPLOYER_GROUP: &str = "system:deployers";

/// Built-in administrator user.
pub const ADMIN_USER: &str = "system:admin";

/// Placeholder name that resolves to the acting user on the current-user route.
pub const CURRENT_USER_NAME: &str = "~";
