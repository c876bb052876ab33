pub mod device;
pub mod task;
pub mod task_execution;
pub mod task_result;
pub mod task_target;
