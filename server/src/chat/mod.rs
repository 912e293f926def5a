pub mod group;
pub mod history;
pub mod permissions;
pub mod presence;
pub mod private;
pub mod protocol;
pub mod store;
