pub mod config;
pub mod init;
pub mod log;
pub mod logs;
pub mod poll;
pub mod records;
pub mod recover;
pub mod serve;
pub mod stats;
