// teamdocs-common: domain types and pure algorithms shared by the server

pub mod content;
pub mod images;
pub mod protocol;
pub mod tree;
pub mod types;
pub mod visibility;
