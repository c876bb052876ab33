pub mod dispatcher;
pub mod handlers;
pub mod runner;
pub mod service;

pub use dispatcher::{DispatchError, Dispatcher};
pub use runner::{DeviceTaskRunner, TaskRunner};
pub use service::{Scheduler, SchedulerHandle};
