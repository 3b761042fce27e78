pub mod run;
pub mod status;
pub mod task_log;
