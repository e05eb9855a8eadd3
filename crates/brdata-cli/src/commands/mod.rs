pub mod cache;
pub mod get;
pub mod info;
pub mod list;
pub mod remote;
