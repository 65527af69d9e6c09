pub mod config_cmd;
pub mod init_db;
pub mod onboard;
pub mod serve;
pub mod sign_session;
