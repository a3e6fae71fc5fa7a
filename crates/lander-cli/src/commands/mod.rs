pub mod daemon;
pub mod init;
pub mod issue;
pub mod op;
pub mod queue;
