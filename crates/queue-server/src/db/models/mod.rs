//! Database models.

pub mod task;

pub use task::{
    AddTaskRequest, AddTaskResponse, CancelRequest, CancelResponse, FinishRequest,
    HeartbeatRequest, LeaseRequest, LeaseResponse, LeasedTask, ListQuery, ListResponse,
    QueuedTask, SuccessResponse, TaskStatus,
};
