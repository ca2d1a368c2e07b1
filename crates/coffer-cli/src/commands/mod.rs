pub mod config;
pub mod decrypt;
pub mod delete;
pub mod encrypt;
pub mod get;
pub mod init;
pub mod keys;
pub mod list;
pub mod put;
pub mod rotate;
pub mod status;
pub mod unlock;
