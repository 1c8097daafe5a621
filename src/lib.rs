pub mod app;
pub mod replay;
pub mod shutdown;
