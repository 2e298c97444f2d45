pub mod user_group_members;
pub mod user_groups;
pub mod user_permissions;
pub mod users;
